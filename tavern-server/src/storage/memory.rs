//! In-process object store for local runs and tests

use async_trait::async_trait;
use axum::body::Bytes;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tavern_common::api::CompletedPart;
use uuid::Uuid;

use super::{ObjectStore, StorageError, StorageResult, StoredObject};

struct PendingUpload {
    bucket: String,
    key: String,
    content_type: Option<String>,
    parts: BTreeMap<i32, (String, Bytes)>,
}

#[derive(Default)]
struct Inner {
    objects: HashMap<(String, String), StoredObject>,
    uploads: HashMap<String, PendingUpload>,
}

/// Objects and pending multipart uploads held in memory
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> StorageResult<MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| StorageError::Backend("memory store lock poisoned".to_string()))
    }

    fn location(bucket: &str, key: &str) -> String {
        format!("memory://{}/{}", bucket, key)
    }

    fn etag(bytes: &[u8]) -> String {
        let digest = Sha256::digest(bytes);
        format!("\"{}\"", &hex::encode(digest)[..32])
    }

    /// Number of multipart uploads started but neither completed nor aborted
    pub fn pending_uploads(&self) -> usize {
        self.lock().map(|inner| inner.uploads.len()).unwrap_or(0)
    }

    /// Whether an object exists
    pub fn contains(&self, bucket: &str, key: &str) -> bool {
        self.lock()
            .map(|inner| {
                inner
                    .objects
                    .contains_key(&(bucket.to_string(), key.to_string()))
            })
            .unwrap_or(false)
    }

    fn pending<'a>(
        inner: &'a mut Inner,
        bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> StorageResult<&'a mut PendingUpload> {
        match inner.uploads.get_mut(upload_id) {
            Some(upload) if upload.bucket == bucket && upload.key == key => Ok(upload),
            _ => Err(StorageError::NoSuchUpload(upload_id.to_string())),
        }
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        content_type: Option<&str>,
    ) -> StorageResult<String> {
        let mut inner = self.lock()?;
        inner.objects.insert(
            (bucket.to_string(), key.to_string()),
            StoredObject {
                bytes: body,
                content_type: content_type.map(str::to_string),
            },
        );
        Ok(Self::location(bucket, key))
    }

    async fn presign_put(
        &self,
        bucket: &str,
        key: &str,
        _content_type: &str,
        expires_in: Duration,
    ) -> StorageResult<String> {
        Ok(format!(
            "{}?expires={}",
            Self::location(bucket, key),
            expires_in.as_secs()
        ))
    }

    async fn create_multipart(
        &self,
        bucket: &str,
        key: &str,
        content_type: Option<&str>,
    ) -> StorageResult<String> {
        let upload_id = Uuid::new_v4().to_string();
        let mut inner = self.lock()?;
        inner.uploads.insert(
            upload_id.clone(),
            PendingUpload {
                bucket: bucket.to_string(),
                key: key.to_string(),
                content_type: content_type.map(str::to_string),
                parts: BTreeMap::new(),
            },
        );
        Ok(upload_id)
    }

    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: Bytes,
    ) -> StorageResult<String> {
        let etag = Self::etag(&body);
        let mut inner = self.lock()?;
        let upload = Self::pending(&mut inner, bucket, key, upload_id)?;
        upload.parts.insert(part_number, (etag.clone(), body));
        Ok(etag)
    }

    async fn list_parts(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> StorageResult<Vec<CompletedPart>> {
        let mut inner = self.lock()?;
        let upload = Self::pending(&mut inner, bucket, key, upload_id)?;
        Ok(upload
            .parts
            .iter()
            .map(|(number, (etag, _))| CompletedPart {
                etag: etag.clone(),
                part_number: *number,
            })
            .collect())
    }

    async fn complete_multipart(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> StorageResult<String> {
        let mut inner = self.lock()?;
        let upload = Self::pending(&mut inner, bucket, key, upload_id)?;

        let mut assembled = Vec::new();
        for part in parts {
            let (_, bytes) = upload.parts.get(&part.part_number).ok_or_else(|| {
                StorageError::Backend(format!("InvalidPart: part {} not found", part.part_number))
            })?;
            assembled.extend_from_slice(bytes);
        }
        let content_type = upload.content_type.clone();

        inner.uploads.remove(upload_id);
        inner.objects.insert(
            (bucket.to_string(), key.to_string()),
            StoredObject {
                bytes: Bytes::from(assembled),
                content_type,
            },
        );
        Ok(Self::location(bucket, key))
    }

    async fn abort_multipart(&self, bucket: &str, key: &str, upload_id: &str) -> StorageResult<()> {
        let mut inner = self.lock()?;
        Self::pending(&mut inner, bucket, key, upload_id)?;
        inner.uploads.remove(upload_id);
        Ok(())
    }

    async fn get_object(&self, bucket: &str, key: &str) -> StorageResult<StoredObject> {
        let inner = self.lock()?;
        inner
            .objects
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_multipart_assembles_in_order() {
        let store = MemoryStore::new();
        let id = store.create_multipart("b", "k", Some("audio/mpeg")).await.unwrap();

        let e2 = store.upload_part("b", "k", &id, 2, Bytes::from_static(b"world")).await.unwrap();
        let e1 = store.upload_part("b", "k", &id, 1, Bytes::from_static(b"hello ")).await.unwrap();

        let listed = store.list_parts("b", "k", &id).await.unwrap();
        assert_eq!(listed.iter().map(|p| p.part_number).collect::<Vec<_>>(), vec![1, 2]);

        let parts = vec![
            CompletedPart { etag: e1, part_number: 1 },
            CompletedPart { etag: e2, part_number: 2 },
        ];
        store.complete_multipart("b", "k", &id, &parts).await.unwrap();

        let object = store.get_object("b", "k").await.unwrap();
        assert_eq!(&object.bytes[..], b"hello world");
        assert_eq!(object.content_type.as_deref(), Some("audio/mpeg"));
        assert_eq!(store.pending_uploads(), 0);
    }

    #[tokio::test]
    async fn test_unknown_upload_rejected() {
        let store = MemoryStore::new();
        let result = store.upload_part("b", "k", "nope", 1, Bytes::new()).await;
        assert!(matches!(result, Err(StorageError::NoSuchUpload(_))));
    }

    #[tokio::test]
    async fn test_upload_id_bound_to_key() {
        let store = MemoryStore::new();
        let id = store.create_multipart("b", "k", None).await.unwrap();
        let result = store.abort_multipart("b", "other", &id).await;
        assert!(matches!(result, Err(StorageError::NoSuchUpload(_))));
        store.abort_multipart("b", "k", &id).await.unwrap();
        assert_eq!(store.pending_uploads(), 0);
    }

    #[tokio::test]
    async fn test_missing_object() {
        let store = MemoryStore::new();
        assert!(matches!(
            store.get_object("b", "k").await,
            Err(StorageError::NotFound(_))
        ));
    }
}

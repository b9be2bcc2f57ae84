//! Object storage behind the upload relay
//!
//! The relay never hands bucket credentials to clients: it either streams
//! bytes through [`ObjectStore`] or issues a presigned URL. Two backends:
//! [`S3Store`] for deployments and [`MemoryStore`] for local runs and tests.

mod memory;
mod s3;

pub use memory::MemoryStore;
pub use s3::S3Store;

use async_trait::async_trait;
use axum::body::Bytes;
use std::time::Duration;
use tavern_common::api::CompletedPart;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("multipart upload not found: {0}")]
    NoSuchUpload(String),

    /// Any other backend failure; carries the backend's message
    #[error("{0}")]
    Backend(String),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Object bytes plus the content type recorded at upload
#[derive(Debug, Clone)]
pub struct StoredObject {
    pub bytes: Bytes,
    pub content_type: Option<String>,
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store a whole object; returns its location URL
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        content_type: Option<&str>,
    ) -> StorageResult<String>;

    /// URL a client can PUT the object to directly until `expires_in` passes
    async fn presign_put(
        &self,
        bucket: &str,
        key: &str,
        content_type: &str,
        expires_in: Duration,
    ) -> StorageResult<String>;

    /// Start a multipart upload; returns the upload id
    async fn create_multipart(
        &self,
        bucket: &str,
        key: &str,
        content_type: Option<&str>,
    ) -> StorageResult<String>;

    /// Upload one part; returns its ETag
    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: Bytes,
    ) -> StorageResult<String>;

    /// Parts the backend has received for an upload, ascending by part number
    async fn list_parts(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> StorageResult<Vec<CompletedPart>>;

    /// Assemble the parts in the given order; returns the object location
    async fn complete_multipart(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> StorageResult<String>;

    async fn abort_multipart(&self, bucket: &str, key: &str, upload_id: &str) -> StorageResult<()>;

    async fn get_object(&self, bucket: &str, key: &str) -> StorageResult<StoredObject>;
}

/// Check a completion list against what the backend actually holds.
///
/// The list must be ascending, unique and contiguous from part 1, and every
/// ETag must match the uploaded part's ETag. Returns a description of the
/// first problem found.
pub fn verify_part_list(requested: &[CompletedPart], uploaded: &[CompletedPart]) -> Result<(), String> {
    if requested.is_empty() {
        return Err("parts list is empty".to_string());
    }

    for (index, part) in requested.iter().enumerate() {
        let expected_number = index as i32 + 1;
        if part.part_number != expected_number {
            return Err(format!(
                "part {} at position {} (expected part {})",
                part.part_number, index, expected_number
            ));
        }

        let Some(stored) = uploaded.iter().find(|p| p.part_number == part.part_number) else {
            return Err(format!("part {} was never uploaded", part.part_number));
        };

        if normalize_etag(&stored.etag) != normalize_etag(&part.etag) {
            return Err(format!("ETag mismatch for part {}", part.part_number));
        }
    }

    if uploaded.len() > requested.len() {
        return Err(format!(
            "{} parts uploaded but only {} listed",
            uploaded.len(),
            requested.len()
        ));
    }

    Ok(())
}

/// ETags arrive both quoted and unquoted depending on the client
fn normalize_etag(etag: &str) -> &str {
    etag.trim().trim_matches('"')
}

//! Moving file bytes to storage through the upload relay
//!
//! Three modes:
//! - `Relay`: one multipart/form-data POST to `/api/upload-server-side`
//! - `Chunked`: S3 multipart upload driven through the relay's
//!   initiate/chunk/complete routes, aborted on failure
//! - `Presigned`: the relay signs a PUT URL and the file goes straight to
//!   the bucket
//!
//! Byte progress is reported as `(loaded, total)` while the body is sent.

use async_trait::async_trait;
use futures::StreamExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use tavern_common::api::{
    AbortMultipartRequest, CompleteMultipartRequest, CompletedPart, ErrorBody,
    InitiateMultipartRequest, InitiateMultipartResponse, PresignedUrlRequest,
    PresignedUrlResponse, UploadChunkResponse, UploadedObject,
};
use tavern_common::limits::DEFAULT_CHUNK_SIZE;
use tavern_common::naming::content_type_for;
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;
use tokio_util::io::ReaderStream;

use crate::error::UploadError;

/// Byte progress callback: `(loaded, total)`
pub type ByteProgress<'a> = &'a (dyn Fn(u64, u64) + Send + Sync);

/// Puts one local file into storage under `file_name`
#[async_trait]
pub trait UploadTransport: Send + Sync {
    async fn upload(
        &self,
        path: &Path,
        file_name: &str,
        progress: ByteProgress<'_>,
    ) -> Result<UploadedObject, UploadError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UploadMode {
    #[default]
    Relay,
    Chunked,
    Presigned,
}

impl fmt::Display for UploadMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            UploadMode::Relay => "relay",
            UploadMode::Chunked => "chunked",
            UploadMode::Presigned => "presigned",
        })
    }
}

impl FromStr for UploadMode {
    type Err = tavern_common::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "relay" | "server-side" => Ok(UploadMode::Relay),
            "chunked" | "multipart" => Ok(UploadMode::Chunked),
            "presigned" => Ok(UploadMode::Presigned),
            other => Err(tavern_common::Error::Config(format!(
                "Unknown upload mode: {}",
                other
            ))),
        }
    }
}

/// Transport that talks to the tavern-server upload relay
#[derive(Clone)]
pub struct HttpTransport {
    http: reqwest::Client,
    base_url: String,
    bucket: String,
    mode: UploadMode,
    chunk_size: u64,
}

impl HttpTransport {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>, bucket: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            bucket: bucket.into(),
            mode: UploadMode::default(),
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    pub fn with_mode(mut self, mode: UploadMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: u64) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn mode(&self) -> UploadMode {
        self.mode
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn post_json<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, UploadError> {
        let response = self.http.post(self.url(path)).json(body).send().await?;
        read_json(response).await
    }

    async fn upload_relay(
        &self,
        path: &Path,
        file_name: &str,
        progress: ByteProgress<'_>,
    ) -> Result<UploadedObject, UploadError> {
        let file = tokio::fs::File::open(path).await?;
        let total = file.metadata().await?.len();
        let (body, sent) = counted_body(file);

        let part = reqwest::multipart::Part::stream_with_length(body, total)
            .file_name(file_name.to_string())
            .mime_str(content_type_for(file_name))?;
        let form = reqwest::multipart::Form::new()
            .text("fileName", file_name.to_string())
            .part("file", part);

        let request = self
            .http
            .post(self.url("/api/upload-server-side"))
            .multipart(form)
            .send();
        let response = send_with_progress(request, sent, total, progress).await?;
        read_json(response).await
    }

    async fn upload_chunked(
        &self,
        path: &Path,
        file_name: &str,
        progress: ByteProgress<'_>,
    ) -> Result<UploadedObject, UploadError> {
        let mut file = tokio::fs::File::open(path).await?;
        let total = file.metadata().await?.len();

        let initiated: InitiateMultipartResponse = self
            .post_json(
                "/api/initiate-multipart",
                &InitiateMultipartRequest {
                    file_name: file_name.to_string(),
                    bucket: self.bucket.clone(),
                    total_size: total,
                },
            )
            .await?;
        tracing::debug!(upload_id = %initiated.upload_id, key = %initiated.key, "Multipart upload started");

        let parts = match self
            .upload_parts(&mut file, total, file_name, &initiated.upload_id, progress)
            .await
        {
            Ok(parts) => parts,
            Err(e) => {
                self.abort(file_name, &initiated.upload_id).await;
                return Err(e);
            }
        };

        let completed = self
            .post_json(
                "/api/complete-multipart",
                &CompleteMultipartRequest {
                    upload_id: initiated.upload_id.clone(),
                    file_name: file_name.to_string(),
                    bucket: self.bucket.clone(),
                    parts,
                },
            )
            .await;
        if completed.is_err() {
            self.abort(file_name, &initiated.upload_id).await;
        }
        completed
    }

    async fn upload_parts(
        &self,
        file: &mut tokio::fs::File,
        total: u64,
        file_name: &str,
        upload_id: &str,
        progress: ByteProgress<'_>,
    ) -> Result<Vec<CompletedPart>, UploadError> {
        let mut parts = Vec::new();
        let mut loaded = 0u64;
        let mut part_number = 1i32;
        progress(0, total);

        loop {
            let mut chunk = Vec::with_capacity(self.chunk_size.min(total.max(1)) as usize);
            (&mut *file).take(self.chunk_size).read_to_end(&mut chunk).await?;
            // An empty file still needs one (empty) part
            if chunk.is_empty() && part_number > 1 {
                break;
            }
            let size = chunk.len() as u64;

            let form = reqwest::multipart::Form::new()
                .text("uploadId", upload_id.to_string())
                .text("partNumber", part_number.to_string())
                .text("fileName", file_name.to_string())
                .text("bucket", self.bucket.clone())
                .part("chunk", reqwest::multipart::Part::bytes(chunk).file_name("blob"));

            let response = self
                .http
                .post(self.url("/api/upload-chunk"))
                .multipart(form)
                .send()
                .await?;
            let uploaded: UploadChunkResponse = read_json(response).await?;
            parts.push(CompletedPart::from(uploaded));

            loaded += size;
            progress(loaded, total);
            if size < self.chunk_size {
                break;
            }
            part_number += 1;
        }

        Ok(parts)
    }

    /// Best-effort cleanup of an unfinished multipart upload
    async fn abort(&self, file_name: &str, upload_id: &str) {
        let request = AbortMultipartRequest {
            upload_id: upload_id.to_string(),
            file_name: file_name.to_string(),
            bucket: self.bucket.clone(),
        };
        match self
            .post_json::<_, serde_json::Value>("/api/abort-multipart", &request)
            .await
        {
            Ok(_) => tracing::info!(upload_id, "Aborted multipart upload"),
            Err(e) => tracing::warn!(upload_id, error = %e, "Failed to abort multipart upload"),
        }
    }

    async fn upload_presigned(
        &self,
        path: &Path,
        file_name: &str,
        progress: ByteProgress<'_>,
    ) -> Result<UploadedObject, UploadError> {
        let file = tokio::fs::File::open(path).await?;
        let total = file.metadata().await?.len();
        let content_type = content_type_for(file_name);

        let signed: PresignedUrlResponse = self
            .post_json(
                "/api/generate-presigned-url",
                &PresignedUrlRequest {
                    file_name: file_name.to_string(),
                    file_size: total,
                    content_type: content_type.to_string(),
                },
            )
            .await?;

        let (body, sent) = counted_body(file);
        let request = self
            .http
            .put(&signed.presigned_url)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .header(reqwest::header::CONTENT_LENGTH, total)
            .body(body)
            .send();
        let response = send_with_progress(request, sent, total, progress).await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(UploadError::Relay {
                status: status.as_u16(),
                code: "PRESIGNED_PUT_FAILED".to_string(),
                message,
            });
        }

        let location = signed
            .presigned_url
            .split_once('?')
            .map(|(base, _)| base.to_string())
            .unwrap_or_else(|| signed.presigned_url.clone());
        Ok(UploadedObject {
            location,
            key: signed.key,
        })
    }
}

#[async_trait]
impl UploadTransport for HttpTransport {
    async fn upload(
        &self,
        path: &Path,
        file_name: &str,
        progress: ByteProgress<'_>,
    ) -> Result<UploadedObject, UploadError> {
        tracing::debug!(mode = %self.mode, file = %path.display(), file_name, "Uploading file");
        match self.mode {
            UploadMode::Relay => self.upload_relay(path, file_name, progress).await,
            UploadMode::Chunked => self.upload_chunked(path, file_name, progress).await,
            UploadMode::Presigned => self.upload_presigned(path, file_name, progress).await,
        }
    }
}

/// Streaming request body that reports each chunk's size as it is read
fn counted_body(file: tokio::fs::File) -> (reqwest::Body, mpsc::UnboundedReceiver<u64>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let stream = ReaderStream::new(file).map(move |chunk| {
        if let Ok(bytes) = &chunk {
            // Receiver gone means the request finished; nothing to report
            let _ = tx.send(bytes.len() as u64);
        }
        chunk
    });
    (reqwest::Body::wrap_stream(stream), rx)
}

/// Drive `request` to completion, forwarding body progress to `progress`
async fn send_with_progress<F>(
    request: F,
    mut sent: mpsc::UnboundedReceiver<u64>,
    total: u64,
    progress: ByteProgress<'_>,
) -> Result<reqwest::Response, UploadError>
where
    F: std::future::Future<Output = reqwest::Result<reqwest::Response>>,
{
    tokio::pin!(request);
    let mut loaded = 0u64;
    progress(0, total);

    let response = loop {
        tokio::select! {
            result = &mut request => break result?,
            Some(n) = sent.recv() => {
                loaded += n;
                progress(loaded.min(total), total);
            }
        }
    };

    while let Ok(n) = sent.try_recv() {
        loaded += n;
    }
    progress(loaded.min(total), total);
    Ok(response)
}

/// Decode a success body, or turn the relay's error envelope into an error
async fn read_json<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, UploadError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response.json().await?);
    }

    let text = response.text().await.unwrap_or_default();
    Err(match serde_json::from_str::<ErrorBody>(&text) {
        Ok(body) => UploadError::Relay {
            status: status.as_u16(),
            code: body.error.code,
            message: body.error.message,
        },
        Err(_) => UploadError::Relay {
            status: status.as_u16(),
            code: "HTTP_ERROR".to_string(),
            message: text,
        },
    })
}

//! Upload relay: presigned URLs, single-shot uploads and multipart uploads

use axum::{
    body::Bytes,
    extract::{multipart::MultipartError, DefaultBodyLimit, Multipart, State},
    http::StatusCode,
    routing::post,
    Json, Router,
};
use std::collections::HashMap;
use tavern_common::api::{
    AbortMultipartRequest, AbortMultipartResponse, CompleteMultipartRequest,
    InitiateMultipartRequest, InitiateMultipartResponse, PresignedUrlRequest,
    PresignedUrlResponse, UploadChunkResponse, UploadedObject,
};
use tavern_common::limits::{MAX_CHUNK_SIZE, MAX_FILE_SIZE, MAX_REQUEST_SIZE, MIB};
use tavern_common::naming::content_type_for;

use super::{require_fields, ApiJson};
use crate::error::{ApiError, ApiResult};
use crate::storage::verify_part_list;
use crate::AppState;

/// S3 accepts part numbers 1..=10000
const MAX_PART_NUMBER: i32 = 10_000;

/// Room for multipart boundaries and text fields around the file bytes
const FORM_OVERHEAD: usize = MIB as usize;

/// Reject names that could escape the configured key prefix
pub fn validate_file_name(file_name: &str) -> ApiResult<()> {
    let trimmed = file_name.trim();
    if trimmed.is_empty() {
        return Err(ApiError::MissingFields("fileName".to_string()));
    }
    if trimmed.starts_with('/') || trimmed.contains("..") || trimmed.contains('\\') {
        return Err(ApiError::BadRequest(format!("Invalid file name: {}", file_name)));
    }
    Ok(())
}

fn check_bucket(state: &AppState, bucket: &str) -> ApiResult<()> {
    if state.config.storage.bucket_allowed(bucket) {
        Ok(())
    } else {
        Err(ApiError::BadRequest(format!("Bucket not allowed: {}", bucket)))
    }
}

fn multipart_error(err: MultipartError) -> ApiError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::RequestTooLarge(err.body_text())
    } else {
        ApiError::BadRequest(err.body_text())
    }
}

/// A multipart/form-data body split into text fields and one binary field
struct FormUpload {
    fields: HashMap<String, String>,
    data: Option<Bytes>,
    content_type: Option<String>,
}

impl FormUpload {
    /// Read every field; `data_field` is kept as bytes and capped at `max_data`
    async fn read(mut multipart: Multipart, data_field: &str, max_data: u64) -> ApiResult<Self> {
        let mut form = FormUpload {
            fields: HashMap::new(),
            data: None,
            content_type: None,
        };

        while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
            let name = field.name().unwrap_or_default().to_string();
            if name == data_field {
                form.content_type = field.content_type().map(str::to_string);
                let bytes = field.bytes().await.map_err(multipart_error)?;
                if bytes.len() as u64 > max_data {
                    return Err(ApiError::FileTooLarge(format!(
                        "{} is {} bytes; the limit is {}MB",
                        data_field,
                        bytes.len(),
                        max_data / MIB
                    )));
                }
                form.data = Some(bytes);
            } else {
                let value = field.text().await.map_err(multipart_error)?;
                form.fields.insert(name, value);
            }
        }

        Ok(form)
    }

    fn field(&self, name: &str) -> &str {
        self.fields.get(name).map(String::as_str).unwrap_or_default()
    }

    fn take_data(&mut self, name: &str) -> ApiResult<Bytes> {
        self.data
            .take()
            .ok_or_else(|| ApiError::MissingFields(name.to_string()))
    }
}

/// POST /api/generate-presigned-url
pub async fn generate_presigned_url(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<PresignedUrlRequest>,
) -> ApiResult<Json<PresignedUrlResponse>> {
    require_fields(&[
        ("fileName", request.file_name.as_str()),
        ("contentType", request.content_type.as_str()),
    ])?;
    validate_file_name(&request.file_name)?;

    if request.file_size > MAX_FILE_SIZE {
        return Err(ApiError::FileTooLarge(format!(
            "File size {} exceeds the {}MB limit",
            request.file_size,
            MAX_FILE_SIZE / MIB
        )));
    }

    let storage = &state.config.storage;
    let key = storage.object_key(&request.file_name);
    let presigned_url = state
        .storage
        .presign_put(&storage.bucket, &key, &request.content_type, storage.presign_ttl)
        .await?;

    tracing::info!(key = %key, size = request.file_size, "Issued presigned upload URL");

    Ok(Json(PresignedUrlResponse {
        presigned_url,
        key,
        bucket: storage.bucket.clone(),
    }))
}

/// POST /api/upload-server-side
pub async fn upload_server_side(
    State(state): State<AppState>,
    multipart: Multipart,
) -> ApiResult<Json<UploadedObject>> {
    let mut form = FormUpload::read(multipart, "file", MAX_FILE_SIZE).await?;
    let file_name = form.field("fileName").to_string();
    validate_file_name(&file_name)?;
    let data = form.take_data("file")?;

    let content_type = form
        .content_type
        .clone()
        .unwrap_or_else(|| content_type_for(&file_name).to_string());
    let storage = &state.config.storage;
    let key = storage.object_key(&file_name);
    let size = data.len();

    let location = state
        .storage
        .put_object(&storage.bucket, &key, data, Some(&content_type))
        .await?;

    tracing::info!(key = %key, size, "Stored upload");
    Ok(Json(UploadedObject { location, key }))
}

/// POST /api/initiate-multipart
pub async fn initiate_multipart(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<InitiateMultipartRequest>,
) -> ApiResult<Json<InitiateMultipartResponse>> {
    require_fields(&[
        ("fileName", request.file_name.as_str()),
        ("bucket", request.bucket.as_str()),
    ])?;
    validate_file_name(&request.file_name)?;
    check_bucket(&state, &request.bucket)?;

    if request.total_size > MAX_FILE_SIZE {
        return Err(ApiError::FileTooLarge(format!(
            "File size {} exceeds the {}MB limit",
            request.total_size,
            MAX_FILE_SIZE / MIB
        )));
    }

    let key = state.config.storage.object_key(&request.file_name);
    let upload_id = state
        .storage
        .create_multipart(&request.bucket, &key, Some(content_type_for(&request.file_name)))
        .await?;

    tracing::info!(key = %key, upload_id = %upload_id, total_size = request.total_size, "Started multipart upload");
    Ok(Json(InitiateMultipartResponse { upload_id, key }))
}

/// POST /api/upload-chunk
pub async fn upload_chunk(
    State(state): State<AppState>,
    multipart: Multipart,
) -> ApiResult<Json<UploadChunkResponse>> {
    let mut form = FormUpload::read(multipart, "chunk", MAX_CHUNK_SIZE).await?;
    require_fields(&[
        ("uploadId", form.field("uploadId")),
        ("partNumber", form.field("partNumber")),
        ("fileName", form.field("fileName")),
        ("bucket", form.field("bucket")),
    ])?;

    let upload_id = form.field("uploadId").to_string();
    let file_name = form.field("fileName").to_string();
    let bucket = form.field("bucket").to_string();
    let part_number: i32 = form
        .field("partNumber")
        .trim()
        .parse()
        .map_err(|_| ApiError::BadRequest(format!("Invalid partNumber: {}", form.field("partNumber"))))?;
    if !(1..=MAX_PART_NUMBER).contains(&part_number) {
        return Err(ApiError::BadRequest(format!(
            "partNumber must be between 1 and {}",
            MAX_PART_NUMBER
        )));
    }

    validate_file_name(&file_name)?;
    check_bucket(&state, &bucket)?;
    let chunk = form.take_data("chunk")?;

    let key = state.config.storage.object_key(&file_name);
    let size = chunk.len();
    let etag = state
        .storage
        .upload_part(&bucket, &key, &upload_id, part_number, chunk)
        .await?;

    tracing::debug!(key = %key, part_number, size, "Stored part");
    Ok(Json(UploadChunkResponse { part_number, etag }))
}

/// POST /api/complete-multipart
pub async fn complete_multipart(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<CompleteMultipartRequest>,
) -> ApiResult<Json<UploadedObject>> {
    require_fields(&[
        ("uploadId", request.upload_id.as_str()),
        ("fileName", request.file_name.as_str()),
        ("bucket", request.bucket.as_str()),
    ])?;
    if request.parts.is_empty() {
        return Err(ApiError::MissingFields("parts".to_string()));
    }
    validate_file_name(&request.file_name)?;
    check_bucket(&state, &request.bucket)?;

    let key = state.config.storage.object_key(&request.file_name);
    let uploaded = state
        .storage
        .list_parts(&request.bucket, &key, &request.upload_id)
        .await?;
    verify_part_list(&request.parts, &uploaded).map_err(ApiError::PartListMismatch)?;

    let location = state
        .storage
        .complete_multipart(&request.bucket, &key, &request.upload_id, &request.parts)
        .await?;

    tracing::info!(key = %key, parts = request.parts.len(), "Completed multipart upload");
    Ok(Json(UploadedObject { location, key }))
}

/// POST /api/abort-multipart
pub async fn abort_multipart(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<AbortMultipartRequest>,
) -> ApiResult<Json<AbortMultipartResponse>> {
    require_fields(&[
        ("uploadId", request.upload_id.as_str()),
        ("fileName", request.file_name.as_str()),
        ("bucket", request.bucket.as_str()),
    ])?;
    validate_file_name(&request.file_name)?;
    check_bucket(&state, &request.bucket)?;

    let key = state.config.storage.object_key(&request.file_name);
    state
        .storage
        .abort_multipart(&request.bucket, &key, &request.upload_id)
        .await?;

    tracing::info!(key = %key, upload_id = %request.upload_id, "Aborted multipart upload");
    Ok(Json(AbortMultipartResponse { success: true }))
}

pub fn upload_routes() -> Router<AppState> {
    Router::new()
        .route("/api/generate-presigned-url", post(generate_presigned_url))
        .route(
            "/api/upload-server-side",
            post(upload_server_side)
                .layer(DefaultBodyLimit::max(MAX_FILE_SIZE as usize + FORM_OVERHEAD)),
        )
        .route("/api/initiate-multipart", post(initiate_multipart))
        .route(
            "/api/upload-chunk",
            post(upload_chunk).layer(DefaultBodyLimit::max(MAX_REQUEST_SIZE as usize)),
        )
        .route("/api/complete-multipart", post(complete_multipart))
        .route("/api/abort-multipart", post(abort_multipart))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_name_validation() {
        assert!(validate_file_name("campaign1Session2.mp3").is_ok());
        assert!(matches!(validate_file_name("  "), Err(ApiError::MissingFields(_))));
        assert!(matches!(validate_file_name("/etc/passwd"), Err(ApiError::BadRequest(_))));
        assert!(matches!(validate_file_name("../x.mp3"), Err(ApiError::BadRequest(_))));
        assert!(matches!(validate_file_name("a\\b.mp3"), Err(ApiError::BadRequest(_))));
    }
}

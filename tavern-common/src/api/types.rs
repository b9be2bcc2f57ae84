//! Upload relay request/response types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ========================================
// Presigned URL
// ========================================

/// POST /api/generate-presigned-url request
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PresignedUrlRequest {
    pub file_name: String,
    pub file_size: u64,
    pub content_type: String,
}

/// POST /api/generate-presigned-url response
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PresignedUrlResponse {
    pub presigned_url: String,
    pub key: String,
    pub bucket: String,
}

// ========================================
// Single-shot and multipart uploads
// ========================================

/// Location of a stored object (single-shot upload and multipart completion)
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadedObject {
    pub location: String,
    pub key: String,
}

/// POST /api/initiate-multipart request
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiateMultipartRequest {
    pub file_name: String,
    pub bucket: String,
    pub total_size: u64,
}

/// POST /api/initiate-multipart response
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiateMultipartResponse {
    pub upload_id: String,
    pub key: String,
}

/// POST /api/upload-chunk response
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadChunkResponse {
    pub part_number: i32,
    pub etag: String,
}

/// One uploaded part as reported back at completion
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletedPart {
    pub etag: String,
    pub part_number: i32,
}

impl From<UploadChunkResponse> for CompletedPart {
    fn from(chunk: UploadChunkResponse) -> Self {
        Self {
            etag: chunk.etag,
            part_number: chunk.part_number,
        }
    }
}

/// POST /api/complete-multipart request
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteMultipartRequest {
    pub upload_id: String,
    pub file_name: String,
    pub bucket: String,
    pub parts: Vec<CompletedPart>,
}

/// POST /api/abort-multipart request
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AbortMultipartRequest {
    pub upload_id: String,
    pub file_name: String,
    pub bucket: String,
}

/// POST /api/abort-multipart response
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AbortMultipartResponse {
    pub success: bool,
}

// ========================================
// Processing trigger
// ========================================

/// POST /api/trigger-lambda request
///
/// Field names match the processing function's event payload.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TriggerLambdaRequest {
    #[serde(rename = "sessionId")]
    pub session_id: String,
    #[serde(rename = "campaignId")]
    pub campaign_id: String,
    pub audio_filename: String,
    #[serde(default)]
    pub user_specified_fields: Value,
}

// ========================================
// Health and errors
// ========================================

/// GET /api/health response
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: DateTime<Utc>,
}

/// Error envelope returned by every failing endpoint
///
/// ```
/// use tavern_common::api::ErrorBody;
///
/// let body = ErrorBody::new("FILE_TOO_LARGE", "File exceeds 300MB");
/// let json = serde_json::to_value(&body).unwrap();
/// assert_eq!(json["error"]["code"], "FILE_TOO_LARGE");
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

/// Machine-readable code plus human-readable message
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
}

impl ErrorBody {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: ErrorDetail {
                code: code.into(),
                message: message.into(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_complete_request_field_names() {
        let json = r#"{
            "uploadId": "u-1",
            "fileName": "campaignaSessionb.mp3",
            "bucket": "tavern-audio",
            "parts": [{"etag": "\"e1\"", "partNumber": 1}, {"etag": "\"e2\"", "partNumber": 2}]
        }"#;
        let request: CompleteMultipartRequest = serde_json::from_str(json).unwrap();
        assert_eq!(request.parts.len(), 2);
        assert_eq!(request.parts[1].part_number, 2);
    }

    #[test]
    fn test_trigger_lambda_mixed_case_fields() {
        let json = r#"{
            "sessionId": "s1",
            "campaignId": "c1",
            "audio_filename": "campaignc1Sessions1.mp3"
        }"#;
        let request: TriggerLambdaRequest = serde_json::from_str(json).unwrap();
        assert_eq!(request.session_id, "s1");
        assert!(request.user_specified_fields.is_null());
    }

    #[test]
    fn test_presigned_request_requires_size() {
        let json = r#"{"fileName": "a.mp3", "contentType": "audio/mpeg"}"#;
        assert!(serde_json::from_str::<PresignedUrlRequest>(json).is_err());
    }
}

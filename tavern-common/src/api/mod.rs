//! HTTP API types shared by the server and the uploader
//!
//! The server deserializes these from request bodies and the uploader
//! serializes them, so both sides agree on field names.

pub mod types;

pub use types::{
    AbortMultipartRequest, AbortMultipartResponse, CompleteMultipartRequest, CompletedPart,
    ErrorBody, ErrorDetail, HealthResponse, InitiateMultipartRequest, InitiateMultipartResponse,
    PresignedUrlRequest, PresignedUrlResponse, TriggerLambdaRequest, UploadChunkResponse,
    UploadedObject,
};

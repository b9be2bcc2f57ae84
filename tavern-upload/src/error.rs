//! Error types for the uploader

use std::path::PathBuf;
use thiserror::Error;

/// Why a batch was refused before anything was sent
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("No sessions to upload")]
    EmptyBatch,

    #[error("Too many sessions: {count} (at most {max} per batch)")]
    TooManyDrafts { count: usize, max: usize },

    #[error("Session {index}: no audio file selected")]
    MissingFile { index: usize },

    #[error("Session {index}: name is required")]
    MissingName { index: usize },

    #[error("Session {index}: date is required")]
    MissingDate { index: usize },

    #[error("Session {index}: cannot read {path}")]
    UnreadableFile { index: usize, path: PathBuf },

    #[error("Session {index}: file is {size} bytes, larger than the {max} byte limit")]
    FileTooLarge { index: usize, size: u64, max: u64 },
}

/// Failure of one draft's upload pipeline
#[derive(Error, Debug)]
pub enum UploadError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The audio container could not be read
    #[error("Could not read audio duration: {0}")]
    Probe(String),

    /// GraphQL record operation failed
    #[error(transparent)]
    Records(#[from] tavern_common::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The upload relay answered with an error body
    #[error("Upload relay returned {status} {code}: {message}")]
    Relay {
        status: u16,
        code: String,
        message: String,
    },

    #[error("Authentication failed: {0}")]
    Auth(String),
}

impl UploadError {
    /// Whether another attempt of the pipeline could succeed.
    ///
    /// Local problems (validation, unreadable audio, missing files) are
    /// terminal; network, record and storage failures are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            UploadError::Validation(_) | UploadError::Probe(_) => false,
            UploadError::Io(e) => !matches!(
                e.kind(),
                std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied
            ),
            UploadError::Records(e) => !matches!(
                e,
                tavern_common::Error::InvalidInput(_)
                    | tavern_common::Error::Config(_)
                    | tavern_common::Error::NotFound(_)
                    | tavern_common::Error::Unauthorized(_)
            ),
            UploadError::Http(_) => true,
            UploadError::Relay { status, code, .. } => {
                code == "PART_LIST_MISMATCH" || !matches!(status, 400 | 413)
            }
            UploadError::Auth(_) => false,
        }
    }
}

/// Why a batch did not finish
#[derive(Error, Debug)]
pub enum BatchError {
    #[error("Invalid batch: {0}")]
    Validation(#[from] ValidationError),

    /// Every session already uploaded; reset the batch to start over
    #[error("Batch already uploaded")]
    AlreadySubmitted,

    #[error("Session {index} ({name}) failed after {attempts} attempts: {source}")]
    DraftFailed {
        index: usize,
        name: String,
        attempts: u32,
        #[source]
        source: UploadError,
    },
}

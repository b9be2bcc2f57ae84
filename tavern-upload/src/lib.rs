//! # tavern-upload
//!
//! Client side of Tavern session uploads: validates a batch of recorded
//! sessions, creates their records, moves the audio through the upload
//! relay and patches the records once the files are stored.

pub mod auth;
pub mod campaigns;
pub mod config;
pub mod error;
pub mod job;
pub mod orchestrator;
pub mod probe;
pub mod records;
pub mod transport;

pub use error::{BatchError, UploadError, ValidationError};
pub use job::{JobStatus, ProgressStage, UploadDraft, UploadJob, UploadObserver, UploadProgress};
pub use orchestrator::{BatchReport, BatchState, BatchUploader, UploadBatch};

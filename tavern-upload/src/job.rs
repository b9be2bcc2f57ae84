//! Upload jobs and progress reporting
//!
//! One [`UploadJob`] per draft session. Jobs live only for the duration of
//! a batch; nothing here is persisted.

use serde::Serialize;
use std::path::PathBuf;
use uuid::Uuid;

/// A session the user wants to upload
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UploadDraft {
    pub file: Option<PathBuf>,
    pub name: String,
    /// Calendar date of the sitting (YYYY-MM-DD)
    pub date: String,
}

impl UploadDraft {
    pub fn new(file: impl Into<PathBuf>, name: impl Into<String>, date: impl Into<String>) -> Self {
        Self {
            file: Some(file.into()),
            name: name.into(),
            date: date.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Idle,
    Uploading,
    Success,
    Error,
}

/// Pipeline step a job is in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStage {
    Waiting,
    Probing,
    CreatingRecord,
    Transferring,
    Finalizing,
    Done,
}

impl ProgressStage {
    /// Percentage range `[start, end]` this stage covers
    pub fn band(&self) -> (f64, f64) {
        match self {
            ProgressStage::Waiting => (0.0, 0.0),
            ProgressStage::Probing => (0.0, 10.0),
            ProgressStage::CreatingRecord => (10.0, 30.0),
            ProgressStage::Transferring => (30.0, 70.0),
            ProgressStage::Finalizing => (70.0, 100.0),
            ProgressStage::Done => (100.0, 100.0),
        }
    }
}

/// Progress of one job
///
/// `loaded`/`total` are transferred bytes; `percentage` covers the whole
/// pipeline, with the byte transfer scaled into the 30-70% band.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UploadProgress {
    pub loaded: u64,
    pub total: u64,
    pub percentage: f64,
    pub status: ProgressStage,
}

impl Default for UploadProgress {
    fn default() -> Self {
        Self {
            loaded: 0,
            total: 0,
            percentage: 0.0,
            status: ProgressStage::Waiting,
        }
    }
}

impl UploadProgress {
    /// Enter `stage` at the start of its band
    pub fn enter(&mut self, stage: ProgressStage) {
        self.status = stage;
        self.percentage = stage.band().0;
    }

    /// Finish `stage` at the end of its band
    pub fn complete(&mut self, stage: ProgressStage) {
        self.status = stage;
        self.percentage = stage.band().1;
    }

    /// Byte progress of the transfer, scaled into the transfer band
    pub fn transferred(&mut self, loaded: u64, total: u64) {
        let (start, end) = ProgressStage::Transferring.band();
        let fraction = if total == 0 {
            1.0
        } else {
            (loaded as f64 / total as f64).clamp(0.0, 1.0)
        };
        self.loaded = loaded;
        self.total = total;
        self.status = ProgressStage::Transferring;
        self.percentage = start + (end - start) * fraction;
    }
}

/// Client-side state of one draft in a batch
#[derive(Debug, Clone, PartialEq)]
pub struct UploadJob {
    pub id: Uuid,
    pub draft: UploadDraft,
    pub status: JobStatus,
    pub progress: UploadProgress,
    pub error_message: Option<String>,
    /// Session record created for this draft, once known
    pub session_id: Option<String>,
}

impl UploadJob {
    pub fn new(draft: UploadDraft) -> Self {
        Self {
            id: Uuid::new_v4(),
            draft,
            status: JobStatus::Idle,
            progress: UploadProgress::default(),
            error_message: None,
            session_id: None,
        }
    }

    /// Back to idle, keeping the draft
    pub fn reset(&mut self) {
        self.reset_for_retry();
        self.session_id = None;
    }

    /// Back to idle after a failure. The session record stays linked so the
    /// next submission patches it instead of creating another.
    pub fn reset_for_retry(&mut self) {
        self.status = JobStatus::Idle;
        self.progress = UploadProgress::default();
        self.error_message = None;
    }

    pub fn fail(&mut self, message: String) {
        self.status = JobStatus::Error;
        self.error_message = Some(message);
    }

    pub fn succeed(&mut self) {
        self.status = JobStatus::Success;
        self.progress.complete(ProgressStage::Done);
        self.error_message = None;
    }
}

/// Receives a snapshot of a job on every progress or status change.
///
/// Callbacks are advisory; they must not block.
pub trait UploadObserver: Send + Sync {
    fn job_updated(&self, index: usize, job: &UploadJob);
}

/// Observer that ignores every update
pub struct NoopObserver;

impl UploadObserver for NoopObserver {
    fn job_updated(&self, _index: usize, _job: &UploadJob) {}
}

/// Observer that logs status changes and progress in 10% steps
#[derive(Default)]
pub struct TracingObserver {
    last_decile: std::sync::Mutex<std::collections::HashMap<usize, u32>>,
}

impl UploadObserver for TracingObserver {
    fn job_updated(&self, index: usize, job: &UploadJob) {
        match job.status {
            JobStatus::Error => {
                tracing::error!(
                    session = index + 1,
                    name = %job.draft.name,
                    error = job.error_message.as_deref().unwrap_or("unknown error"),
                    "Upload failed"
                );
            }
            JobStatus::Success => {
                tracing::info!(
                    session = index + 1,
                    name = %job.draft.name,
                    session_id = job.session_id.as_deref().unwrap_or_default(),
                    "Upload complete"
                );
            }
            JobStatus::Uploading => {
                let decile = (job.progress.percentage / 10.0).floor() as u32;
                let Ok(mut seen) = self.last_decile.lock() else {
                    return;
                };
                if seen.insert(index, decile) != Some(decile) {
                    tracing::info!(
                        session = index + 1,
                        stage = ?job.progress.status,
                        percent = decile * 10,
                        "Uploading {}",
                        job.draft.name
                    );
                }
            }
            JobStatus::Idle => {}
        }
    }
}

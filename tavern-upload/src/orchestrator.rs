//! Multi-session upload orchestration
//!
//! A batch holds 1-5 drafts. They are uploaded strictly one after another,
//! each through the same pipeline:
//!
//! 1. probe the recording's duration (0-10%)
//! 2. create the session record (10-30%)
//! 3. transfer the file (30-70%, scaled from byte progress)
//! 4. patch the record with the stored file keys (70-100%)
//!
//! A failing pipeline is retried per [`RetryPolicy`]. A draft that still
//! fails halts the batch; drafts after it stay idle.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tavern_common::limits::{MAX_BATCH_SIZE, MAX_FILE_SIZE};
use tavern_common::models::{NewSession, Session, SessionUpdate};
use tavern_common::naming::{generate_file_name, transcription_file_name};
use tavern_common::{retry, RetryDecision, RetryPolicy};

use crate::error::{BatchError, UploadError, ValidationError};
use crate::job::{JobStatus, ProgressStage, UploadDraft, UploadJob, UploadObserver};
use crate::probe::DurationProbe;
use crate::records::SessionRecords;
use crate::transport::UploadTransport;

/// Pause before every draft after the first
pub const INTER_DRAFT_DELAY: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchState {
    /// Not submitted yet, or reset
    Draft,
    Running,
    /// Every draft uploaded
    Succeeded,
    /// A draft exhausted its retries
    Failed,
}

/// The drafts of one submission and their upload state
#[derive(Debug, Clone)]
pub struct UploadBatch {
    pub jobs: Vec<UploadJob>,
    state: BatchState,
}

impl UploadBatch {
    pub fn new(drafts: Vec<UploadDraft>) -> Self {
        Self {
            jobs: drafts.into_iter().map(UploadJob::new).collect(),
            state: BatchState::Draft,
        }
    }

    pub fn state(&self) -> BatchState {
        self.state
    }

    /// Start over with the same drafts
    pub fn reset(&mut self) {
        for job in &mut self.jobs {
            job.reset();
        }
        self.state = BatchState::Draft;
    }

    /// Local checks only; nothing is sent when this fails
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.jobs.is_empty() {
            return Err(ValidationError::EmptyBatch);
        }
        if self.jobs.len() > MAX_BATCH_SIZE {
            return Err(ValidationError::TooManyDrafts {
                count: self.jobs.len(),
                max: MAX_BATCH_SIZE,
            });
        }

        for (index, job) in self.jobs.iter().enumerate() {
            let draft = &job.draft;
            let file = match &draft.file {
                Some(file) if !file.as_os_str().is_empty() => file,
                _ => return Err(ValidationError::MissingFile { index }),
            };
            if draft.name.trim().is_empty() {
                return Err(ValidationError::MissingName { index });
            }
            if draft.date.trim().is_empty() {
                return Err(ValidationError::MissingDate { index });
            }

            let metadata = std::fs::metadata(file).map_err(|_| ValidationError::UnreadableFile {
                index,
                path: file.clone(),
            })?;
            if !metadata.is_file() {
                return Err(ValidationError::UnreadableFile {
                    index,
                    path: file.clone(),
                });
            }
            if metadata.len() > MAX_FILE_SIZE {
                return Err(ValidationError::FileTooLarge {
                    index,
                    size: metadata.len(),
                    max: MAX_FILE_SIZE,
                });
            }
        }

        Ok(())
    }
}

/// Sessions created by a successful batch, in input order
#[derive(Debug, Clone)]
pub struct BatchReport {
    pub sessions: Vec<Session>,
}

/// Runs batches against the record store and the upload transport
pub struct BatchUploader {
    campaign_id: String,
    records: Arc<dyn SessionRecords>,
    transport: Arc<dyn UploadTransport>,
    probe: Arc<dyn DurationProbe>,
    observer: Arc<dyn UploadObserver>,
    policy: RetryPolicy,
    inter_draft_delay: Duration,
}

/// State shared between the attempts of one draft
struct DraftRun<'a> {
    index: usize,
    job: Mutex<UploadJob>,
    /// Record created by an earlier attempt, reused instead of creating another
    record: Mutex<Option<Session>>,
    observer: &'a dyn UploadObserver,
}

impl DraftRun<'_> {
    fn update(&self, change: impl FnOnce(&mut UploadJob)) {
        let snapshot = match self.job.lock() {
            Ok(mut job) => {
                change(&mut job);
                job.clone()
            }
            Err(_) => return,
        };
        self.observer.job_updated(self.index, &snapshot);
    }

    fn record(&self) -> Option<Session> {
        self.record.lock().ok().and_then(|r| r.clone())
    }

    fn set_record(&self, session: Session) {
        let id = session.id.clone();
        if let Ok(mut record) = self.record.lock() {
            *record = Some(session);
        }
        self.update(|job| job.session_id = Some(id));
    }

    fn into_job(self) -> Option<UploadJob> {
        self.job.into_inner().ok()
    }
}

impl BatchUploader {
    pub fn new(
        campaign_id: impl Into<String>,
        records: Arc<dyn SessionRecords>,
        transport: Arc<dyn UploadTransport>,
        probe: Arc<dyn DurationProbe>,
        observer: Arc<dyn UploadObserver>,
    ) -> Self {
        Self {
            campaign_id: campaign_id.into(),
            records,
            transport,
            probe,
            observer,
            policy: RetryPolicy::upload_default(),
            inter_draft_delay: INTER_DRAFT_DELAY,
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_inter_draft_delay(mut self, delay: Duration) -> Self {
        self.inter_draft_delay = delay;
        self
    }

    /// Upload every draft in order.
    ///
    /// A batch that already succeeded is rejected until it is reset. After a
    /// failure the batch may be submitted again; drafts that already
    /// succeeded are skipped.
    pub async fn submit(&self, batch: &mut UploadBatch) -> Result<BatchReport, BatchError> {
        if batch.state == BatchState::Succeeded {
            return Err(BatchError::AlreadySubmitted);
        }
        batch.validate()?;

        for (index, job) in batch.jobs.iter_mut().enumerate() {
            if job.status != JobStatus::Success {
                job.reset_for_retry();
                self.observer.job_updated(index, job);
            }
        }
        batch.state = BatchState::Running;

        tracing::info!(
            campaign_id = %self.campaign_id,
            sessions = batch.jobs.len(),
            "Starting upload batch"
        );

        let mut sessions = Vec::with_capacity(batch.jobs.len());
        let mut started = 0usize;

        for index in 0..batch.jobs.len() {
            if batch.jobs[index].status == JobStatus::Success {
                continue;
            }

            if started > 0 && !self.inter_draft_delay.is_zero() {
                tokio::time::sleep(self.inter_draft_delay).await;
            }
            started += 1;

            let run = DraftRun {
                index,
                job: Mutex::new(batch.jobs[index].clone()),
                record: Mutex::new(None),
                observer: self.observer.as_ref(),
            };
            run.update(|job| job.status = JobStatus::Uploading);

            let attempts = Mutex::new(0u32);
            let outcome = retry(
                "upload session",
                &self.policy,
                |e: &UploadError| {
                    if e.is_retryable() {
                        RetryDecision::Retry
                    } else {
                        RetryDecision::Abort
                    }
                },
                |attempt| {
                    if let Ok(mut count) = attempts.lock() {
                        *count = attempt;
                    }
                    self.run_pipeline(&run)
                },
            )
            .await;

            match outcome {
                Ok(session) => {
                    run.update(|job| job.succeed());
                    if let Some(job) = run.into_job() {
                        batch.jobs[index] = job;
                    }
                    sessions.push(session);
                }
                Err(error) => {
                    let message = error.to_string();
                    run.update(|job| job.fail(message));
                    if let Some(job) = run.into_job() {
                        batch.jobs[index] = job;
                    }
                    batch.state = BatchState::Failed;

                    let attempts = attempts.into_inner().unwrap_or(0);
                    tracing::error!(
                        session = index + 1,
                        attempts,
                        error = %error,
                        "Batch halted"
                    );
                    return Err(BatchError::DraftFailed {
                        index,
                        name: batch.jobs[index].draft.name.clone(),
                        attempts,
                        source: error,
                    });
                }
            }
        }

        batch.state = BatchState::Succeeded;
        tracing::info!(sessions = sessions.len(), "Upload batch complete");
        Ok(BatchReport { sessions })
    }

    /// One attempt of the four-step pipeline
    async fn run_pipeline(&self, run: &DraftRun<'_>) -> Result<Session, UploadError> {
        let draft = match run.job.lock() {
            Ok(job) => job.draft.clone(),
            Err(_) => return Err(UploadError::Probe("Job state poisoned".to_string())),
        };
        let path = draft
            .file
            .clone()
            .ok_or(ValidationError::MissingFile { index: run.index })?;

        // 1. Duration
        run.update(|job| job.progress.enter(ProgressStage::Probing));
        let duration = self.probe.duration_secs(&path).await?;
        run.update(|job| job.progress.complete(ProgressStage::Probing));

        // 2. Session record (reused across attempts)
        run.update(|job| job.progress.enter(ProgressStage::CreatingRecord));
        let session = match self.earlier_record(run).await? {
            Some(existing) => {
                tracing::debug!(session_id = %existing.id, "Reusing session record from earlier attempt");
                existing
            }
            None => {
                let created = self
                    .records
                    .create_session(NewSession {
                        name: draft.name.trim().to_string(),
                        date: draft.date.trim().to_string(),
                        duration,
                        campaign_sessions_id: self.campaign_id.clone(),
                    })
                    .await?;
                tracing::info!(session_id = %created.id, name = %created.name, "Created session record");
                run.set_record(created.clone());
                created
            }
        };
        run.update(|job| job.progress.complete(ProgressStage::CreatingRecord));

        // 3. Bytes
        let file_name = generate_file_name(&self.campaign_id, &session.id, &original_name(&path));
        let on_bytes = |loaded: u64, total: u64| run.update(|job| job.progress.transferred(loaded, total));
        let uploaded = self.transport.upload(&path, &file_name, &on_bytes).await?;
        tracing::info!(key = %uploaded.key, "Audio stored");

        // 4. Patch the record
        run.update(|job| job.progress.enter(ProgressStage::Finalizing));
        let transcript_key = sibling_key(
            &uploaded.key,
            &transcription_file_name(&self.campaign_id, &session.id),
        );
        let update = SessionUpdate::uploaded(&session, uploaded.key.clone(), transcript_key);
        let updated = self.apply_update(&update).await?;
        run.set_record(updated.clone());
        run.update(|job| job.progress.complete(ProgressStage::Finalizing));

        Ok(updated)
    }

    /// Record left by an earlier attempt or an earlier submission of this draft
    async fn earlier_record(&self, run: &DraftRun<'_>) -> Result<Option<Session>, UploadError> {
        if let Some(record) = run.record() {
            return Ok(Some(record));
        }
        let linked = run.job.lock().ok().and_then(|job| job.session_id.clone());
        let Some(id) = linked else {
            return Ok(None);
        };

        match self.records.get_session(&id).await? {
            Some(session) => {
                run.set_record(session.clone());
                Ok(Some(session))
            }
            None => {
                tracing::warn!(session_id = %id, "Linked session record is gone; creating a new one");
                run.update(|job| job.session_id = None);
                Ok(None)
            }
        }
    }

    /// Check-and-set update; on a version conflict re-fetch and try once more
    async fn apply_update(&self, update: &SessionUpdate) -> Result<Session, UploadError> {
        match self.records.update_session(update).await {
            Ok(session) => Ok(session),
            Err(tavern_common::Error::Conflict { id, expected }) => {
                tracing::warn!(session_id = %id, expected, "Session changed underneath us; re-fetching");
                let latest = self
                    .records
                    .get_session(&id)
                    .await?
                    .ok_or_else(|| tavern_common::Error::NotFound(format!("Session {}", id)))?;
                Ok(self.records.update_session(&update.rebased_on(&latest)).await?)
            }
            Err(e) => Err(e.into()),
        }
    }
}

fn original_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// `name` in the same "directory" as `key`
fn sibling_key(key: &str, name: &str) -> String {
    match key.rsplit_once('/') {
        Some((dir, _)) => format!("{}/{}", dir, name),
        None => name.to_string(),
    }
}

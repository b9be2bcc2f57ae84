//! Session and campaign records
//!
//! These mirror the records held by the GraphQL API. Field names follow the
//! API's camelCase schema.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Processing state of a session's recording
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TranscriptionStatus {
    /// Record exists, audio not uploaded yet
    NotStarted,
    /// Audio uploaded, waiting for processing
    Uploaded,
    Transcribing,
    Summarizing,
    Completed,
    Error,
}

/// One recorded game sitting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub name: String,
    /// Calendar date of the sitting (YYYY-MM-DD)
    pub date: String,
    /// Length of the recording in whole seconds
    #[serde(default)]
    pub duration: i64,
    #[serde(default)]
    pub audio_file: Option<String>,
    #[serde(default)]
    pub transcription_file: Option<String>,
    pub transcription_status: TranscriptionStatus,
    pub campaign_sessions_id: String,
    /// Optimistic-lock version, must be echoed back on update
    #[serde(rename = "_version")]
    pub version: i64,
}

/// Input for creating a session record
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSession {
    pub name: String,
    pub date: String,
    pub duration: i64,
    pub campaign_sessions_id: String,
}

impl NewSession {
    /// New record with empty file fields and `NOTSTARTED` status
    pub fn into_input(self) -> serde_json::Value {
        serde_json::json!({
            "name": self.name,
            "date": self.date,
            "duration": self.duration,
            "audioFile": "",
            "transcriptionFile": "",
            "transcriptionStatus": TranscriptionStatus::NotStarted,
            "campaignSessionsId": self.campaign_sessions_id,
        })
    }
}

/// Check-and-set update of a session record
///
/// The update only applies when the stored version equals `expected_version`;
/// otherwise the store reports [`crate::Error::Conflict`] and the caller must
/// re-fetch and try again.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionUpdate {
    pub id: String,
    pub expected_version: i64,
    pub audio_file: Option<String>,
    pub transcription_file: Option<String>,
    pub transcription_status: Option<TranscriptionStatus>,
    pub duration: Option<i64>,
}

impl SessionUpdate {
    /// Update that records the uploaded files and marks the session `UPLOADED`
    pub fn uploaded(session: &Session, audio_file: String, transcription_file: String) -> Self {
        Self {
            id: session.id.clone(),
            expected_version: session.version,
            audio_file: Some(audio_file),
            transcription_file: Some(transcription_file),
            transcription_status: Some(TranscriptionStatus::Uploaded),
            duration: None,
        }
    }

    /// Same change, re-targeted at a freshly fetched version
    pub fn rebased_on(&self, latest: &Session) -> Self {
        Self {
            expected_version: latest.version,
            ..self.clone()
        }
    }

    /// GraphQL input object (`_version` carries the expected version)
    pub fn into_input(&self) -> serde_json::Value {
        let mut input = serde_json::json!({
            "id": self.id,
            "_version": self.expected_version,
        });
        if let Some(obj) = input.as_object_mut() {
            if let Some(audio) = &self.audio_file {
                obj.insert("audioFile".into(), audio.clone().into());
            }
            if let Some(transcript) = &self.transcription_file {
                obj.insert("transcriptionFile".into(), transcript.clone().into());
            }
            if let Some(status) = self.transcription_status {
                obj.insert(
                    "transcriptionStatus".into(),
                    serde_json::to_value(status).unwrap_or(serde_json::Value::Null),
                );
            }
            if let Some(duration) = self.duration {
                obj.insert("duration".into(), duration.into());
            }
        }
        input
    }
}

/// Named collection of sessions owned by a user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Campaign {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub owner: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Public view of a session returned by the share endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SharedSession {
    pub id: String,
    pub name: String,
    pub date: String,
    pub duration: i64,
    pub transcription_status: TranscriptionStatus,
}

impl From<Session> for SharedSession {
    fn from(session: Session) -> Self {
        Self {
            id: session.id,
            name: session.name,
            date: session.date,
            duration: session.duration,
            transcription_status: session.transcription_status,
        }
    }
}

//! Recording duration probe
//!
//! Reads container headers only; nothing is decoded.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use symphonia::core::codecs::CODEC_TYPE_NULL;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::error::UploadError;

/// Length of an audio file in whole seconds
#[async_trait]
pub trait DurationProbe: Send + Sync {
    async fn duration_secs(&self, path: &Path) -> Result<i64, UploadError>;
}

/// Probe backed by symphonia's format readers
pub struct SymphoniaProbe;

impl SymphoniaProbe {
    /// Blocking header read; 0 when the container reports no frame count
    pub fn probe_file(path: &Path) -> Result<i64, UploadError> {
        let file = std::fs::File::open(path)?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(extension) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(extension);
        }

        let probed = symphonia::default::get_probe()
            .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
            .map_err(|e| UploadError::Probe(format!("{}: {}", path.display(), e)))?;

        let track = probed
            .format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| UploadError::Probe(format!("{}: no audio track", path.display())))?;

        let params = &track.codec_params;
        let seconds = match (params.n_frames, params.time_base, params.sample_rate) {
            (Some(frames), Some(time_base), _) => time_base.calc_time(frames).seconds,
            (Some(frames), None, Some(rate)) if rate > 0 => frames / u64::from(rate),
            _ => {
                tracing::debug!(path = %path.display(), "Container has no frame count; duration unknown");
                0
            }
        };

        Ok(i64::try_from(seconds).unwrap_or(i64::MAX))
    }
}

#[async_trait]
impl DurationProbe for SymphoniaProbe {
    async fn duration_secs(&self, path: &Path) -> Result<i64, UploadError> {
        let path: PathBuf = path.to_path_buf();
        tokio::task::spawn_blocking(move || Self::probe_file(&path))
            .await
            .map_err(|e| UploadError::Probe(format!("Probe task failed: {}", e)))?
    }
}

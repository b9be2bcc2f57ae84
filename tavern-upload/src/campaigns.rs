//! Campaign listing and the remembered campaign selection

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tavern_common::config::Environment;
use tavern_common::models::Campaign;
use tavern_common::{retry, Error, Result, RetryDecision, RetryPolicy};

use crate::records::CampaignSource;

/// Campaign list with retries for network and sign-in hiccups
pub struct CampaignDirectory {
    source: Arc<dyn CampaignSource>,
    policy: RetryPolicy,
}

impl CampaignDirectory {
    pub fn new(source: Arc<dyn CampaignSource>) -> Self {
        Self {
            source,
            policy: RetryPolicy::listing_default(),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub async fn list_campaigns(&self) -> Result<Vec<Campaign>> {
        retry("list campaigns", &self.policy, classify_listing_error, |_| {
            self.source.list_campaigns()
        })
        .await
    }
}

/// Network failures and rejected tokens are retried (the token may be
/// refreshed in between); anything else is final
fn classify_listing_error(err: &Error) -> RetryDecision {
    match err {
        Error::Unauthorized(_) => RetryDecision::Retry,
        e if e.is_transient() => RetryDecision::Retry,
        _ => RetryDecision::Abort,
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SavedSelection {
    campaign_id: String,
    saved_at: DateTime<Utc>,
}

/// Selected campaign id, persisted per environment
pub struct SelectionCache {
    dir: PathBuf,
}

impl SelectionCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Cache under the user's cache directory
    pub fn default_location() -> Result<Self> {
        Ok(Self::new(tavern_common::config::cache_dir()?))
    }

    pub fn path(&self, environment: Environment) -> PathBuf {
        self.dir
            .join(format!("selected-campaign-{}.json", environment.as_str().to_ascii_lowercase()))
    }

    pub fn load(&self, environment: Environment) -> Result<Option<String>> {
        let path = self.path(environment);
        if !path.exists() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(&path)?;
        match serde_json::from_str::<SavedSelection>(&content) {
            Ok(saved) => Ok(Some(saved.campaign_id)),
            Err(e) => {
                tracing::warn!(path = %path.display(), "Ignoring unreadable campaign selection: {}", e);
                Ok(None)
            }
        }
    }

    pub fn save(&self, environment: Environment, campaign_id: &str) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let saved = SavedSelection {
            campaign_id: campaign_id.to_string(),
            saved_at: Utc::now(),
        };
        let json = serde_json::to_string_pretty(&saved)
            .map_err(|e| Error::Internal(format!("Failed to encode selection: {}", e)))?;
        write_atomic(&self.path(environment), json.as_bytes())?;
        tracing::debug!(environment = %environment, campaign_id, "Saved campaign selection");
        Ok(())
    }

    pub fn clear(&self, environment: Environment) -> Result<()> {
        let path = self.path(environment);
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// The cached campaign if it is still in `campaigns`
pub fn resolve_selection<'a>(campaigns: &'a [Campaign], cached: Option<&str>) -> Option<&'a Campaign> {
    let cached = cached?;
    campaigns.iter().find(|c| c.id == cached)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;
    use tavern_common::Backoff;

    fn campaign(id: &str) -> Campaign {
        Campaign {
            id: id.to_string(),
            name: format!("Campaign {}", id),
            description: None,
            owner: None,
            created_at: Utc::now(),
        }
    }

    /// Serves queued results in order
    struct ScriptedSource {
        results: Mutex<Vec<Result<Vec<Campaign>>>>,
        calls: Mutex<u32>,
    }

    impl ScriptedSource {
        fn new(results: Vec<Result<Vec<Campaign>>>) -> Self {
            Self {
                results: Mutex::new(results),
                calls: Mutex::new(0),
            }
        }
    }

    #[async_trait]
    impl CampaignSource for ScriptedSource {
        async fn list_campaigns(&self) -> Result<Vec<Campaign>> {
            *self.calls.lock().unwrap() += 1;
            self.results.lock().unwrap().remove(0)
        }
    }

    fn quick_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 6,
            backoff: Backoff::Fixed(Duration::ZERO),
        }
    }

    #[tokio::test]
    async fn test_listing_retries_auth_errors() {
        let source = Arc::new(ScriptedSource::new(vec![
            Err(Error::Unauthorized("token expired".to_string())),
            Err(Error::GraphQl("throttled".to_string())),
            Ok(vec![campaign("c1"), campaign("c2")]),
        ]));
        let directory = CampaignDirectory::new(source.clone()).with_policy(quick_policy());

        let campaigns = directory.list_campaigns().await.unwrap();
        assert_eq!(campaigns.len(), 2);
        assert_eq!(*source.calls.lock().unwrap(), 3);
    }

    #[tokio::test]
    async fn test_listing_stops_on_terminal_error() {
        let source = Arc::new(ScriptedSource::new(vec![
            Err(Error::InvalidInput("bad filter".to_string())),
            Ok(vec![]),
        ]));
        let directory = CampaignDirectory::new(source.clone()).with_policy(quick_policy());

        assert!(directory.list_campaigns().await.is_err());
        assert_eq!(*source.calls.lock().unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_listing_backs_off_exponentially() {
        let source = Arc::new(ScriptedSource::new(vec![
            Err(Error::Unauthorized("1".to_string())),
            Err(Error::Unauthorized("2".to_string())),
            Err(Error::Unauthorized("3".to_string())),
            Ok(vec![campaign("c1")]),
        ]));
        let directory = CampaignDirectory::new(source);
        let start = tokio::time::Instant::now();

        directory.list_campaigns().await.unwrap();
        // 1s + 2s + 4s
        assert_eq!(start.elapsed(), Duration::from_secs(7));
    }

    #[test]
    fn test_selection_is_per_environment() {
        let dir = tempfile::tempdir().unwrap();
        let cache = SelectionCache::new(dir.path().join("tavern"));

        assert_eq!(cache.load(Environment::Dev).unwrap(), None);
        cache.save(Environment::Dev, "c1").unwrap();
        cache.save(Environment::Prod, "c9").unwrap();

        assert_eq!(cache.load(Environment::Dev).unwrap().as_deref(), Some("c1"));
        assert_eq!(cache.load(Environment::Prod).unwrap().as_deref(), Some("c9"));
        assert_eq!(cache.load(Environment::DevSort).unwrap(), None);

        cache.clear(Environment::Dev).unwrap();
        assert_eq!(cache.load(Environment::Dev).unwrap(), None);
    }

    #[test]
    fn test_corrupt_selection_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let cache = SelectionCache::new(dir.path());
        std::fs::write(cache.path(Environment::Dev), "{not json").unwrap();

        assert_eq!(cache.load(Environment::Dev).unwrap(), None);
    }

    #[test]
    fn test_resolve_selection() {
        let campaigns = vec![campaign("c1"), campaign("c2")];
        assert_eq!(resolve_selection(&campaigns, Some("c2")).map(|c| c.id.as_str()), Some("c2"));
        assert!(resolve_selection(&campaigns, Some("gone")).is_none());
        assert!(resolve_selection(&campaigns, None).is_none());
    }
}

//! Cognito sign-in and background token refresh
//!
//! [`TokenSource`] is the shared handle every client reads the current
//! access token from. [`TokenRefresher`] owns a task that renews the tokens
//! shortly before they expire and stops when its cancellation token fires.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Deserialize;
use serde_json::json;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tavern_common::graphql::AccessToken;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::UploadError;

/// Renew this long before expiry
pub const DEFAULT_REFRESH_LEAD: Duration = Duration::from_secs(5 * 60);

/// Wait before trying again after a failed refresh
pub const REFRESH_RETRY_DELAY: Duration = Duration::from_secs(30);

/// One set of Cognito tokens
#[derive(Debug, Clone, PartialEq)]
pub struct Tokens {
    pub access_token: String,
    pub id_token: Option<String>,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
}

/// Shared, cheaply cloned handle to the current tokens
#[derive(Clone, Default)]
pub struct TokenSource {
    inner: Arc<RwLock<Option<Tokens>>>,
}

impl TokenSource {
    pub fn new(tokens: Tokens) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Some(tokens))),
        }
    }

    pub fn snapshot(&self) -> Option<Tokens> {
        self.inner.read().ok().and_then(|guard| guard.clone())
    }

    pub fn replace(&self, tokens: Tokens) {
        if let Ok(mut guard) = self.inner.write() {
            *guard = Some(tokens);
        }
    }

    pub fn clear(&self) {
        if let Ok(mut guard) = self.inner.write() {
            *guard = None;
        }
    }
}

impl AccessToken for TokenSource {
    fn current(&self) -> Option<String> {
        self.snapshot().map(|t| t.access_token)
    }
}

/// Obtains tokens from the identity provider
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn sign_in(&self, username: &str, password: &str) -> Result<Tokens, UploadError>;

    async fn refresh(&self, refresh_token: &str) -> Result<Tokens, UploadError>;
}

/// Cognito user-pool client (`InitiateAuth`)
pub struct CognitoAuthenticator {
    http: reqwest::Client,
    endpoint: String,
    client_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InitiateAuthResponse {
    authentication_result: Option<AuthenticationResult>,
    #[serde(default)]
    challenge_name: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AuthenticationResult {
    access_token: String,
    #[serde(default)]
    id_token: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
    expires_in: i64,
}

#[derive(Deserialize)]
struct CognitoError {
    #[serde(rename = "__type", default)]
    kind: String,
    #[serde(default)]
    message: String,
}

impl CognitoAuthenticator {
    pub fn new(http: reqwest::Client, region: &str, client_id: impl Into<String>) -> Self {
        Self {
            http,
            endpoint: format!("https://cognito-idp.{}.amazonaws.com/", region),
            client_id: client_id.into(),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    async fn initiate_auth(
        &self,
        flow: &str,
        parameters: serde_json::Value,
        fallback_refresh: Option<&str>,
    ) -> Result<Tokens, UploadError> {
        let response = self
            .http
            .post(&self.endpoint)
            .header(
                "X-Amz-Target",
                "AWSCognitoIdentityProviderService.InitiateAuth",
            )
            .header(reqwest::header::CONTENT_TYPE, "application/x-amz-json-1.1")
            .json(&json!({
                "AuthFlow": flow,
                "ClientId": self.client_id,
                "AuthParameters": parameters,
            }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let detail = serde_json::from_str::<CognitoError>(&text)
                .map(|e| format!("{}: {}", e.kind, e.message))
                .unwrap_or(text);
            return Err(UploadError::Auth(format!("{} ({})", detail, status)));
        }

        let body: InitiateAuthResponse = response.json().await?;
        let result = body.authentication_result.ok_or_else(|| {
            UploadError::Auth(format!(
                "Sign-in needs an interactive challenge: {}",
                body.challenge_name.unwrap_or_else(|| "unknown".to_string())
            ))
        })?;

        // Refresh responses omit the refresh token; keep the one we used
        let refresh_token = result
            .refresh_token
            .or_else(|| fallback_refresh.map(str::to_string))
            .ok_or_else(|| UploadError::Auth("No refresh token issued".to_string()))?;

        Ok(Tokens {
            access_token: result.access_token,
            id_token: result.id_token,
            refresh_token,
            expires_at: Utc::now() + ChronoDuration::seconds(result.expires_in),
        })
    }
}

#[async_trait]
impl Authenticator for CognitoAuthenticator {
    async fn sign_in(&self, username: &str, password: &str) -> Result<Tokens, UploadError> {
        self.initiate_auth(
            "USER_PASSWORD_AUTH",
            json!({ "USERNAME": username, "PASSWORD": password }),
            None,
        )
        .await
    }

    async fn refresh(&self, refresh_token: &str) -> Result<Tokens, UploadError> {
        self.initiate_auth(
            "REFRESH_TOKEN_AUTH",
            json!({ "REFRESH_TOKEN": refresh_token }),
            Some(refresh_token),
        )
        .await
    }
}

/// Background task keeping a [`TokenSource`] fresh
pub struct TokenRefresher {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl TokenRefresher {
    /// Start refreshing `source` `lead` before each expiry
    pub fn spawn(
        source: TokenSource,
        authenticator: Arc<dyn Authenticator>,
        lead: Duration,
        cancel: CancellationToken,
    ) -> Self {
        let task_cancel = cancel.clone();
        let handle = tokio::spawn(async move {
            refresh_loop(source, authenticator, lead, task_cancel).await;
        });
        Self { cancel, handle }
    }

    /// Cancel the task and wait for it to exit
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.handle.await {
            tracing::warn!("Token refresh task ended abnormally: {}", e);
        }
    }
}

fn until_refresh(tokens: &Tokens, lead: Duration) -> Duration {
    let lead = ChronoDuration::from_std(lead).unwrap_or_else(|_| ChronoDuration::zero());
    (tokens.expires_at - lead - Utc::now())
        .to_std()
        .unwrap_or(Duration::ZERO)
}

async fn refresh_loop(
    source: TokenSource,
    authenticator: Arc<dyn Authenticator>,
    lead: Duration,
    cancel: CancellationToken,
) {
    loop {
        let Some(tokens) = source.snapshot() else {
            tracing::warn!("No tokens to refresh; stopping token refresh");
            return;
        };

        let wait = until_refresh(&tokens, lead);
        tracing::debug!(wait_secs = wait.as_secs(), "Next token refresh scheduled");
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::debug!("Token refresh cancelled");
                return;
            }
            _ = tokio::time::sleep(wait) => {}
        }

        match authenticator.refresh(&tokens.refresh_token).await {
            Ok(fresh) => {
                tracing::info!(expires_at = %fresh.expires_at, "Access token refreshed");
                source.replace(fresh);
            }
            Err(e) => {
                tracing::warn!(error = %e, "Token refresh failed; retrying in {}s", REFRESH_RETRY_DELAY.as_secs());
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(REFRESH_RETRY_DELAY) => {}
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingAuthenticator {
        refreshes: AtomicUsize,
        valid_for: ChronoDuration,
    }

    #[async_trait]
    impl Authenticator for CountingAuthenticator {
        async fn sign_in(&self, _username: &str, _password: &str) -> Result<Tokens, UploadError> {
            Err(UploadError::Auth("not used".to_string()))
        }

        async fn refresh(&self, refresh_token: &str) -> Result<Tokens, UploadError> {
            let n = self.refreshes.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(Tokens {
                access_token: format!("access-{}", n),
                id_token: None,
                refresh_token: refresh_token.to_string(),
                expires_at: Utc::now() + self.valid_for,
            })
        }
    }

    fn tokens(expires_in: ChronoDuration) -> Tokens {
        Tokens {
            access_token: "access-0".to_string(),
            id_token: None,
            refresh_token: "refresh".to_string(),
            expires_at: Utc::now() + expires_in,
        }
    }

    #[test]
    fn test_token_source_is_access_token() {
        let source = TokenSource::new(tokens(ChronoDuration::hours(1)));
        assert_eq!(source.current().as_deref(), Some("access-0"));

        source.clear();
        assert!(source.current().is_none());
    }

    #[test]
    fn test_expired_tokens_refresh_immediately() {
        let expired = tokens(ChronoDuration::minutes(-1));
        assert_eq!(until_refresh(&expired, DEFAULT_REFRESH_LEAD), Duration::ZERO);

        let fresh = tokens(ChronoDuration::hours(1));
        assert!(until_refresh(&fresh, DEFAULT_REFRESH_LEAD) > Duration::from_secs(50 * 60));
    }

    #[tokio::test]
    async fn test_refresher_replaces_expiring_tokens() {
        let source = TokenSource::new(tokens(ChronoDuration::seconds(-5)));
        let authenticator = Arc::new(CountingAuthenticator {
            refreshes: AtomicUsize::new(0),
            valid_for: ChronoDuration::hours(1),
        });

        let refresher = TokenRefresher::spawn(
            source.clone(),
            authenticator.clone(),
            DEFAULT_REFRESH_LEAD,
            CancellationToken::new(),
        );

        for _ in 0..100 {
            if source.current().as_deref() == Some("access-1") {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(source.current().as_deref(), Some("access-1"));

        // Next refresh is an hour away; shutdown must not wait for it
        refresher.shutdown().await;
        assert_eq!(authenticator.refreshes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancelled_refresher_stops() {
        let source = TokenSource::new(tokens(ChronoDuration::hours(1)));
        let authenticator = Arc::new(CountingAuthenticator {
            refreshes: AtomicUsize::new(0),
            valid_for: ChronoDuration::hours(1),
        });
        let cancel = CancellationToken::new();

        let refresher = TokenRefresher::spawn(source, authenticator.clone(), DEFAULT_REFRESH_LEAD, cancel.clone());
        cancel.cancel();
        refresher.shutdown().await;

        assert_eq!(authenticator.refreshes.load(Ordering::SeqCst), 0);
    }
}

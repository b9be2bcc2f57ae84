//! Bearer-token authentication
//!
//! Access and ID tokens are Cognito-issued RS256 JWTs. [`CognitoVerifier`]
//! fetches the pool's JWKS on first use and again when a token names an
//! unknown key id (key rotation), at most once per [`JWKS_REFETCH_INTERVAL`].

use async_trait::async_trait;
use axum::{
    extract::{Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};

use crate::config::CognitoConfig;
use crate::error::ApiError;
use crate::AppState;

/// Authenticated caller, inserted into request extensions by [`require_bearer`]
#[derive(Debug, Clone, PartialEq)]
pub struct AuthUser {
    pub user_id: String,
    pub email: Option<String>,
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Missing bearer token")]
    MissingToken,

    #[error("Token expired")]
    Expired,

    #[error("Invalid token: {0}")]
    Invalid(String),

    #[error("Token signed with unknown key {0}")]
    UnknownKey(String),

    #[error("Authentication is not configured")]
    NotConfigured,

    /// Signing keys could not be fetched
    #[error("{0}")]
    Keys(String),
}

#[async_trait]
pub trait TokenVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<AuthUser, AuthError>;
}

/// Rejects every token; used when no user pool is configured
pub struct DenyAllVerifier;

#[async_trait]
impl TokenVerifier for DenyAllVerifier {
    async fn verify(&self, _token: &str) -> Result<AuthUser, AuthError> {
        Err(AuthError::NotConfigured)
    }
}

#[derive(Debug, Deserialize)]
struct Jwks {
    keys: Vec<Jwk>,
}

#[derive(Debug, Deserialize)]
struct Jwk {
    kid: String,
    kty: String,
    n: String,
    e: String,
}

#[derive(Debug, Deserialize)]
struct CognitoClaims {
    sub: String,
    #[serde(default)]
    email: Option<String>,
    /// Present on ID tokens
    #[serde(default)]
    aud: Option<String>,
    /// Present on access tokens
    #[serde(default)]
    client_id: Option<String>,
    #[serde(default)]
    token_use: Option<String>,
}

/// Shortest gap between two JWKS fetches triggered by unknown key ids
pub const JWKS_REFETCH_INTERVAL: Duration = Duration::from_secs(60);

/// Verifies Cognito JWTs against the user pool's published keys
pub struct CognitoVerifier {
    http: reqwest::Client,
    config: CognitoConfig,
    jwks_url: String,
    keys: RwLock<HashMap<String, DecodingKey>>,
    /// When the keys were last fetched; held while fetching
    last_fetch: Mutex<Option<Instant>>,
}

impl CognitoVerifier {
    pub fn new(http: reqwest::Client, config: CognitoConfig) -> Self {
        Self {
            http,
            jwks_url: config.jwks_url(),
            config,
            keys: RwLock::new(HashMap::new()),
            last_fetch: Mutex::new(None),
        }
    }

    /// Fetch keys from somewhere other than the pool's well-known URL
    pub fn with_jwks_url(mut self, url: impl Into<String>) -> Self {
        self.jwks_url = url.into();
        self
    }

    async fn refresh_keys(&self) -> Result<(), AuthError> {
        let url = &self.jwks_url;
        tracing::debug!(url = %url, "Fetching JWKS");

        let jwks: Jwks = self
            .http
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| AuthError::Keys(format!("JWKS request failed: {}", e)))?
            .json()
            .await
            .map_err(|e| AuthError::Keys(format!("JWKS decode failed: {}", e)))?;

        let mut keys = HashMap::new();
        for jwk in jwks.keys.into_iter().filter(|k| k.kty == "RSA") {
            match DecodingKey::from_rsa_components(&jwk.n, &jwk.e) {
                Ok(key) => {
                    keys.insert(jwk.kid, key);
                }
                Err(e) => tracing::warn!(kid = %jwk.kid, "Skipping unusable JWK: {}", e),
            }
        }

        tracing::info!(count = keys.len(), "Loaded Cognito signing keys");
        *self.keys.write().await = keys;
        Ok(())
    }

    async fn key_for(&self, kid: &str) -> Result<DecodingKey, AuthError> {
        if let Some(key) = self.keys.read().await.get(kid) {
            return Ok(key.clone());
        }

        let mut last_fetch = self.last_fetch.lock().await;
        // Another request may have fetched while this one waited
        if let Some(key) = self.keys.read().await.get(kid) {
            return Ok(key.clone());
        }
        let now = Instant::now();
        if !refetch_due(*last_fetch, now) {
            tracing::debug!(kid = %kid, "Unknown key id; JWKS fetched recently, not fetching again");
            return Err(AuthError::UnknownKey(kid.to_string()));
        }
        *last_fetch = Some(now);
        self.refresh_keys().await?;
        drop(last_fetch);

        self.keys
            .read()
            .await
            .get(kid)
            .cloned()
            .ok_or_else(|| AuthError::UnknownKey(kid.to_string()))
    }
}

#[async_trait]
impl TokenVerifier for CognitoVerifier {
    async fn verify(&self, token: &str) -> Result<AuthUser, AuthError> {
        let header =
            jsonwebtoken::decode_header(token).map_err(|e| AuthError::Invalid(e.to_string()))?;
        let kid = header
            .kid
            .ok_or_else(|| AuthError::Invalid("token header has no kid".to_string()))?;
        let key = self.key_for(&kid).await?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_issuer(&[self.config.issuer()]);
        validation.validate_aud = false;
        validation.set_required_spec_claims(&["sub", "exp", "iss"]);

        let claims = jsonwebtoken::decode::<CognitoClaims>(token, &key, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::Expired,
                _ => AuthError::Invalid(e.to_string()),
            })?;

        check_client(&claims, self.config.client_id.as_deref())?;

        Ok(AuthUser {
            user_id: claims.sub,
            email: claims.email,
        })
    }
}

fn refetch_due(last_fetch: Option<Instant>, now: Instant) -> bool {
    match last_fetch {
        Some(last) => now.saturating_duration_since(last) >= JWKS_REFETCH_INTERVAL,
        None => true,
    }
}

/// ID tokens carry the app client in `aud`, access tokens in `client_id`
fn check_client(claims: &CognitoClaims, expected: Option<&str>) -> Result<(), AuthError> {
    if let Some(use_) = claims.token_use.as_deref() {
        if use_ != "id" && use_ != "access" {
            return Err(AuthError::Invalid(format!("unexpected token_use {}", use_)));
        }
    }

    let Some(expected) = expected else {
        return Ok(());
    };

    let presented = claims.aud.as_deref().or(claims.client_id.as_deref());
    if presented == Some(expected) {
        Ok(())
    } else {
        Err(AuthError::Invalid("token issued for another client".to_string()))
    }
}

/// Token from an `Authorization: Bearer <token>` header
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

/// Middleware: reject the request unless it carries a valid bearer token
pub async fn require_bearer(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = bearer_token(request.headers()).ok_or(AuthError::MissingToken)?;
    let user = state.verifier.verify(token).await?;

    tracing::debug!(user_id = %user.user_id, "Authenticated request");
    request.extensions_mut().insert(user);

    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn claims(aud: Option<&str>, client_id: Option<&str>, token_use: Option<&str>) -> CognitoClaims {
        CognitoClaims {
            sub: "user-1".to_string(),
            email: None,
            aud: aud.map(str::to_string),
            client_id: client_id.map(str::to_string),
            token_use: token_use.map(str::to_string),
        }
    }

    #[test]
    fn test_bearer_token_parsing() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc.def"));
        assert_eq!(bearer_token(&headers), Some("abc.def"));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("bearer xyz"));
        assert_eq!(bearer_token(&headers), Some("xyz"));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic xyz"));
        assert_eq!(bearer_token(&headers), None);

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer "));
        assert_eq!(bearer_token(&headers), None);
    }

    #[test]
    fn test_client_check_accepts_id_and_access_tokens() {
        assert!(check_client(&claims(Some("app"), None, Some("id")), Some("app")).is_ok());
        assert!(check_client(&claims(None, Some("app"), Some("access")), Some("app")).is_ok());
        assert!(check_client(&claims(None, Some("other"), Some("access")), Some("app")).is_err());
        assert!(check_client(&claims(None, None, Some("access")), None).is_ok());
    }

    #[test]
    fn test_client_check_rejects_unknown_token_use() {
        assert!(check_client(&claims(Some("app"), None, Some("refresh")), Some("app")).is_err());
    }

    #[test]
    fn test_refetch_interval() {
        let start = Instant::now();
        assert!(refetch_due(None, start));
        assert!(!refetch_due(Some(start), start + Duration::from_secs(59)));
        assert!(refetch_due(Some(start), start + JWKS_REFETCH_INTERVAL));
    }

    #[tokio::test]
    async fn test_unknown_kids_do_not_refetch_every_request() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let router = axum::Router::new().route(
            "/jwks.json",
            axum::routing::get(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { axum::Json(serde_json::json!({ "keys": [] })) }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        let config = CognitoConfig {
            region: "us-east-1".to_string(),
            user_pool_id: "us-east-1_test".to_string(),
            client_id: None,
        };
        let verifier = CognitoVerifier::new(reqwest::Client::new(), config)
            .with_jwks_url(format!("http://{}/jwks.json", addr));

        for kid in ["forged-1", "forged-2", "forged-3"] {
            assert!(matches!(verifier.key_for(kid).await, Err(AuthError::UnknownKey(_))));
        }
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_deny_all() {
        let result = DenyAllVerifier.verify("anything").await;
        assert!(matches!(result, Err(AuthError::NotConfigured)));
    }
}

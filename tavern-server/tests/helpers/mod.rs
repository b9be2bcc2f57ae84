//! Shared fixtures for tavern-server integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use serde_json::Value;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tower::util::ServiceExt;

use tavern_common::models::{Session, TranscriptionStatus};
use tavern_server::auth::{AuthError, AuthUser, TokenVerifier};
use tavern_server::config::ServerConfig;
use tavern_server::lambda::{FunctionInvoker, InvokeError};
use tavern_server::sessions::SessionDirectory;
use tavern_server::storage::MemoryStore;
use tavern_server::stripe::{
    CheckoutSession, GatewayError, GatewayResult, NewCoupon, NewPromotionCode, PaymentGateway,
    PromotionCode,
};
use tavern_server::{build_router, db, AppState};

pub const WEBHOOK_UUID: &str = "0d6f3a8e-hook";
pub const WEBHOOK_SECRET: &str = "whsec_integration";
pub const BOUNDARY: &str = "tavern-test-boundary";

// ========================================
// Fakes
// ========================================

/// Accepts tokens of the form `valid-<user id>`
pub struct FakeVerifier;

#[async_trait]
impl TokenVerifier for FakeVerifier {
    async fn verify(&self, token: &str) -> Result<AuthUser, AuthError> {
        token
            .strip_prefix("valid-")
            .map(|user_id| AuthUser {
                user_id: user_id.to_string(),
                email: Some(format!("{}@example.com", user_id)),
            })
            .ok_or_else(|| AuthError::Invalid("bad test token".to_string()))
    }
}

/// In-memory payment provider that records what was created
#[derive(Default)]
pub struct FakeGateway {
    pub promotions: Mutex<HashMap<String, PromotionCode>>,
    pub checkouts: Mutex<HashMap<String, CheckoutSession>>,
    pub coupons: Mutex<Vec<NewCoupon>>,
    pub created_promotions: Mutex<Vec<NewPromotionCode>>,
    counter: AtomicUsize,
}

impl FakeGateway {
    pub fn add_promotion(&self, id: &str, code: &str, kind: &str) {
        let promo = PromotionCode {
            id: id.to_string(),
            code: code.to_string(),
            coupon_id: format!("co_{}", id),
            metadata: HashMap::from([("type".to_string(), kind.to_string())]),
        };
        self.promotions.lock().unwrap().insert(id.to_string(), promo);
    }

    pub fn add_checkout(&self, session: CheckoutSession) {
        self.checkouts
            .lock()
            .unwrap()
            .insert(session.id.clone(), session);
    }

    pub fn coupon_count(&self) -> usize {
        self.coupons.lock().unwrap().len()
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn create_coupon(&self, coupon: &NewCoupon) -> GatewayResult<String> {
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        self.coupons.lock().unwrap().push(coupon.clone());
        Ok(format!("co_gen_{}", n))
    }

    async fn create_promotion_code(&self, promo: &NewPromotionCode) -> GatewayResult<PromotionCode> {
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        self.created_promotions.lock().unwrap().push(promo.clone());
        let created = PromotionCode {
            id: format!("promo_gen_{}", n),
            code: promo.code.clone().unwrap_or_else(|| format!("REWARD{}", n)),
            coupon_id: promo.coupon_id.clone(),
            metadata: promo.metadata.clone(),
        };
        self.promotions
            .lock()
            .unwrap()
            .insert(created.id.clone(), created.clone());
        Ok(created)
    }

    async fn promotion_code(&self, id: &str) -> GatewayResult<PromotionCode> {
        self.promotions
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| GatewayError::Api {
                status: 404,
                message: format!("No such promotion code: {}", id),
            })
    }

    async fn checkout_session(&self, id: &str) -> GatewayResult<CheckoutSession> {
        self.checkouts
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| GatewayError::Api {
                status: 404,
                message: format!("No such checkout session: {}", id),
            })
    }
}

/// Records invocation payloads
#[derive(Default)]
pub struct RecordingInvoker {
    pub payloads: Mutex<Vec<Value>>,
}

#[async_trait]
impl FunctionInvoker for RecordingInvoker {
    async fn invoke_event(&self, payload: Vec<u8>) -> Result<i32, InvokeError> {
        let value = serde_json::from_slice(&payload).map_err(|e| InvokeError(e.to_string()))?;
        self.payloads.lock().unwrap().push(value);
        Ok(202)
    }
}

pub struct PanickingInvoker;

#[async_trait]
impl FunctionInvoker for PanickingInvoker {
    async fn invoke_event(&self, _payload: Vec<u8>) -> Result<i32, InvokeError> {
        panic!("invoker exploded");
    }
}

#[derive(Default)]
pub struct FakeSessions {
    pub sessions: HashMap<String, Session>,
}

impl FakeSessions {
    pub fn with_session(id: &str, name: &str) -> Self {
        let session = Session {
            id: id.to_string(),
            name: name.to_string(),
            date: "2026-05-01".to_string(),
            duration: 5400,
            audio_file: Some("public/audioUploads/campaignCSession1.mp3".to_string()),
            transcription_file: None,
            transcription_status: TranscriptionStatus::Completed,
            campaign_sessions_id: "c1".to_string(),
            version: 3,
        };
        Self {
            sessions: HashMap::from([(id.to_string(), session)]),
        }
    }
}

#[async_trait]
impl SessionDirectory for FakeSessions {
    async fn get_session(&self, id: &str) -> tavern_common::Result<Option<Session>> {
        Ok(self.sessions.get(id).cloned())
    }
}

// ========================================
// App construction
// ========================================

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub pool: SqlitePool,
    pub storage: Arc<MemoryStore>,
    pub gateway: Arc<FakeGateway>,
    /// Keeps the database file alive for the test's duration
    _dir: tempfile::TempDir,
}

pub fn test_config() -> ServerConfig {
    let mut config = ServerConfig::local();
    config.stripe.webhook_uuid = Some(WEBHOOK_UUID.to_string());
    config.stripe.webhook_secret = Some(WEBHOOK_SECRET.to_string());
    config.stripe.publishable_key = Some("pk_test_123".to_string());
    config
}

/// App over a tempfile database with fake collaborators
pub async fn test_app(config: ServerConfig) -> TestApp {
    test_app_with(config, |state| state).await
}

pub async fn test_app_with(
    config: ServerConfig,
    customize: impl FnOnce(AppState) -> AppState,
) -> TestApp {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let url = format!("sqlite://{}?mode=rwc", dir.path().join("tavern.db").display());
    let pool = db::init_database_pool(&url)
        .await
        .expect("Failed to create test database");

    let storage = Arc::new(MemoryStore::new());
    let gateway = Arc::new(FakeGateway::default());

    let state = AppState::new(config, pool.clone())
        .with_storage(storage.clone())
        .with_verifier(Arc::new(FakeVerifier))
        .with_payments(gateway.clone());
    let state = customize(state);

    TestApp {
        router: build_router(state.clone()),
        state,
        pool,
        storage,
        gateway,
        _dir: dir,
    }
}

// ========================================
// Requests
// ========================================

pub fn json_request(method: &str, uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(serde_json::to_vec(body).unwrap()))
        .unwrap()
}

pub fn get_request(uri: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method("GET").uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    builder.body(Body::empty()).unwrap()
}

/// One form part: `(name, file name, bytes)`; a file name makes it a file part
pub fn multipart_request(uri: &str, parts: &[(&str, Option<&str>, &[u8])]) -> Request<Body> {
    let mut body = Vec::new();
    for (name, file_name, data) in parts {
        body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
        match file_name {
            Some(file_name) => {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n\
                         Content-Type: audio/mpeg\r\n\r\n",
                        name, file_name
                    )
                    .as_bytes(),
                );
            }
            None => {
                body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", name).as_bytes(),
                );
            }
        }
        body.extend_from_slice(data);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());

    Request::builder()
        .method("POST")
        .uri(uri)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .header(header::CONTENT_LENGTH, body.len())
        .body(Body::from(body))
        .unwrap()
}

/// Send a request and decode the JSON response (Null for empty or non-JSON bodies)
pub async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}

pub fn error_code(body: &Value) -> &str {
    body["error"]["code"].as_str().unwrap_or_default()
}

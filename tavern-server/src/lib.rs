//! tavern-server library interface
//!
//! Upload relay, image and share routes, processing trigger, referral
//! service and Stripe webhook. Exposed as a library for integration tests.

pub mod api;
pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod lambda;
pub mod referral;
pub mod sessions;
pub mod storage;
pub mod stripe;

pub use crate::error::{ApiError, ApiResult};

use axum::{
    http::{HeaderValue, Method},
    middleware,
    response::{IntoResponse, Response},
    Json, Router,
};
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::any::Any;
use std::sync::Arc;
use tavern_common::api::ErrorBody;
use tower_http::{
    catch_panic::CatchPanicLayer,
    cors::{self, CorsLayer},
    trace::TraceLayer,
};

use crate::auth::{DenyAllVerifier, TokenVerifier};
use crate::config::ServerConfig;
use crate::lambda::{FunctionInvoker, LoggingInvoker};
use crate::referral::ReferralService;
use crate::sessions::SessionDirectory;
use crate::storage::{MemoryStore, ObjectStore};
use crate::stripe::{PaymentGateway, UnconfiguredGateway};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub db: SqlitePool,
    pub storage: Arc<dyn ObjectStore>,
    pub functions: Arc<dyn FunctionInvoker>,
    pub verifier: Arc<dyn TokenVerifier>,
    /// Session records for the public share page; absent without a GraphQL endpoint
    pub sessions: Option<Arc<dyn SessionDirectory>>,
    pub referrals: ReferralService,
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    /// State with in-process collaborators: memory storage, no processing
    /// function, no payment provider and no accepted tokens
    pub fn new(config: ServerConfig, db: SqlitePool) -> Self {
        let payments: Arc<dyn PaymentGateway> = Arc::new(UnconfiguredGateway);
        let referrals = ReferralService::new(db.clone(), payments, config.referral.clone());
        Self {
            config: Arc::new(config),
            db,
            storage: Arc::new(MemoryStore::new()),
            functions: Arc::new(LoggingInvoker),
            verifier: Arc::new(DenyAllVerifier),
            sessions: None,
            referrals,
            startup_time: Utc::now(),
        }
    }

    pub fn with_storage(mut self, storage: Arc<dyn ObjectStore>) -> Self {
        self.storage = storage;
        self
    }

    pub fn with_functions(mut self, functions: Arc<dyn FunctionInvoker>) -> Self {
        self.functions = functions;
        self
    }

    pub fn with_verifier(mut self, verifier: Arc<dyn TokenVerifier>) -> Self {
        self.verifier = verifier;
        self
    }

    pub fn with_sessions(mut self, sessions: Arc<dyn SessionDirectory>) -> Self {
        self.sessions = Some(sessions);
        self
    }

    pub fn with_payments(mut self, payments: Arc<dyn PaymentGateway>) -> Self {
        self.referrals = ReferralService::new(self.db.clone(), payments, self.config.referral.clone());
        self
    }
}

/// Turn a handler panic into a logged 500 with the usual error body
fn handle_panic(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "unknown panic".to_string()
    };
    tracing::error!(panic = %detail, "Handler panicked");

    (
        axum::http::StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorBody::new("INTERNAL_ERROR", "Internal server error")),
    )
        .into_response()
}

fn cors_layer(config: &ServerConfig) -> CorsLayer {
    if config.cors_origins.is_empty() {
        return CorsLayer::permissive();
    }

    let origins: Vec<HeaderValue> = config
        .cors_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(cors::Any)
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    // Bearer token required
    let protected = Router::new()
        .merge(api::image_routes())
        .merge(api::protected_referral_routes())
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_bearer,
        ));

    let public = Router::new()
        .merge(api::health_routes())
        .merge(api::upload_routes())
        .merge(api::public_image_routes())
        .merge(api::lambda_routes())
        .merge(api::referral_routes())
        .merge(api::webhook_routes());

    let cors = cors_layer(&state.config);

    Router::new()
        .merge(protected)
        .merge(public)
        .with_state(state)
        .layer(CatchPanicLayer::custom(handle_panic))
        .layer(middleware::from_fn(api::content_length_guard))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

//! tavern-server - upload relay and referral API
//!
//! Brokers audio uploads to object storage (presigned, single-shot and
//! multipart), serves stored images, triggers session processing and runs
//! the referral program's Stripe webhook.

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tavern_common::config::{find_config_file, load_toml_config};
use tavern_common::graphql::{GraphQlAuth, GraphQlClient};
use tokio::signal;
use tracing::{info, warn};

use tavern_server::auth::CognitoVerifier;
use tavern_server::config::{Args, FileConfig, ServerConfig, StorageBackend};
use tavern_server::lambda::LambdaInvoker;
use tavern_server::storage::S3Store;
use tavern_server::stripe::StripeClient;
use tavern_server::{build_router, db, AppState};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tavern_server=info,tower_http=info".into()),
        )
        .init();

    // Build identification first, before any slow startup step
    info!(
        "Starting tavern-server v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    let args = Args::parse();
    let config_path = find_config_file("server", args.config.as_deref());
    if let Some(path) = &config_path {
        info!("Config file: {}", path.display());
    }
    let file_config: FileConfig = load_toml_config(config_path.as_deref())?;
    let config = ServerConfig::resolve(args, file_config).context("Invalid configuration")?;

    let pool = db::init_database_pool(&config.database_url)
        .await
        .context("Failed to open database")?;
    info!("Database connection established");

    let http = reqwest::Client::builder()
        .user_agent(concat!("tavern-server/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("Failed to build HTTP client")?;

    let mut state = AppState::new(config.clone(), pool);

    match config.storage.backend {
        StorageBackend::S3 => {
            info!(bucket = %config.storage.bucket, region = %config.storage.region, "Using S3 storage");
            state = state.with_storage(Arc::new(S3Store::from_env(&config.storage.region).await));
        }
        StorageBackend::Memory => {
            warn!("Using in-memory storage; uploads are lost on restart");
        }
    }

    match &config.lambda_function {
        Some(function) => {
            info!(function = %function, "Processing trigger enabled");
            state = state.with_functions(Arc::new(
                LambdaInvoker::from_env(&config.storage.region, function.clone()).await,
            ));
        }
        None => warn!("TAVERN_LAMBDA_FUNCTION not set; /api/trigger-lambda only logs"),
    }

    match &config.cognito {
        Some(cognito) => {
            info!(issuer = %cognito.issuer(), "Bearer tokens verified against Cognito");
            state = state.with_verifier(Arc::new(CognitoVerifier::new(http.clone(), cognito.clone())));
        }
        None => warn!("COGNITO_USER_POOL_ID not set; authenticated routes reject every request"),
    }

    match (&config.graphql_endpoint, &config.graphql_api_key) {
        (Some(endpoint), Some(api_key)) => {
            let client = GraphQlClient::new(endpoint.clone(), GraphQlAuth::ApiKey(api_key.clone()))
                .with_http_client(http.clone());
            state = state.with_sessions(Arc::new(client));
        }
        _ => warn!("APPSYNC_ENDPOINT/APPSYNC_API_KEY not set; /api/share is unavailable"),
    }

    match &config.stripe.secret_key {
        Some(secret) => {
            state = state.with_payments(Arc::new(StripeClient::new(http.clone(), secret.clone())));
        }
        None => warn!("STRIPE_SECRET_KEY not set; referral codes cannot be issued"),
    }

    info!(
        enabled = config.referral.enabled,
        monthly_cap = config.referral.monthly_cap,
        "Referral system"
    );

    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind))?;
    info!("Listening on http://{}", config.bind);
    info!("Health check: http://{}/api/health", config.bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}

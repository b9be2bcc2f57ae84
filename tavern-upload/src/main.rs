//! tavern-upload - upload recorded game sessions
//!
//! Signs in with Cognito, lists campaigns and uploads up to five session
//! recordings per run through the tavern-server upload relay.

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::sync::Arc;
use tavern_common::config::{find_config_file, load_toml_config};
use tavern_common::graphql::{GraphQlAuth, GraphQlClient};
use tokio_util::sync::CancellationToken;
use tracing::info;

use tavern_upload::auth::{
    Authenticator, CognitoAuthenticator, TokenRefresher, TokenSource, DEFAULT_REFRESH_LEAD,
};
use tavern_upload::campaigns::{resolve_selection, CampaignDirectory, SelectionCache};
use tavern_upload::config::{Args, ClientConfig, Command, Credentials, FileConfig, PreparedUpload};
use tavern_upload::job::TracingObserver;
use tavern_upload::probe::SymphoniaProbe;
use tavern_upload::transport::HttpTransport;
use tavern_upload::BatchUploader;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tavern_upload=info,tavern_common=info".into()),
        )
        .init();

    info!(
        "tavern-upload v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    let args = Args::parse();
    let config_path = find_config_file("upload", args.config.as_deref());
    let file_config: FileConfig = load_toml_config(config_path.as_deref())?;
    let config = ClientConfig::resolve(&args, file_config).context("Invalid configuration")?;
    info!(environment = %config.environment, api_url = %config.api_url, "Configuration loaded");

    let cache = SelectionCache::default_location()?;
    let http = reqwest::Client::builder()
        .user_agent(concat!("tavern-upload/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("Failed to build HTTP client")?;

    match &args.command {
        Command::Select { campaign_id } => {
            cache.save(config.environment, campaign_id)?;
            println!("Selected campaign {} for {}", campaign_id, config.environment);
            Ok(())
        }
        Command::Campaigns => {
            let session = SignedIn::start(&config, &args.credentials, &http).await?;
            let result = list_campaigns(&config, &cache, &session).await;
            session.finish().await;
            result
        }
        Command::Upload(upload) => {
            // Bad drafts fail here, before any sign-in traffic
            let prepared = upload.prepare(&config, &cache)?;
            let session = SignedIn::start(&config, &args.credentials, &http).await?;
            let result = upload_sessions(&config, &session, &http, prepared).await;
            session.finish().await;
            result
        }
    }
}

/// Signed-in state for the duration of one command
struct SignedIn {
    graphql: GraphQlClient,
    refresher: TokenRefresher,
}

impl SignedIn {
    async fn start(config: &ClientConfig, credentials: &Credentials, http: &reqwest::Client) -> Result<Self> {
        let authenticator: Arc<dyn Authenticator> = Arc::new(CognitoAuthenticator::new(
            http.clone(),
            &config.region,
            config.require_client_id()?,
        ));

        let tokens = match (&credentials.refresh_token, &credentials.username, &credentials.password) {
            (Some(refresh_token), _, _) => authenticator.refresh(refresh_token).await?,
            (None, Some(username), Some(password)) => authenticator.sign_in(username, password).await?,
            _ => bail!("Sign in with --refresh-token or --username/--password"),
        };
        info!(expires_at = %tokens.expires_at, "Signed in");

        let source = TokenSource::new(tokens);
        let refresher = TokenRefresher::spawn(
            source.clone(),
            authenticator,
            DEFAULT_REFRESH_LEAD,
            CancellationToken::new(),
        );

        let graphql = GraphQlClient::new(config.require_graphql()?, GraphQlAuth::Token(Arc::new(source)))
            .with_http_client(http.clone());

        Ok(Self { graphql, refresher })
    }

    async fn finish(self) {
        self.refresher.shutdown().await;
    }
}

async fn list_campaigns(config: &ClientConfig, cache: &SelectionCache, session: &SignedIn) -> Result<()> {
    let directory = CampaignDirectory::new(Arc::new(session.graphql.clone()));
    let campaigns = directory.list_campaigns().await?;
    let cached = cache.load(config.environment)?;
    let selected = resolve_selection(&campaigns, cached.as_deref()).map(|c| c.id.clone());

    if campaigns.is_empty() {
        println!("No campaigns");
    }
    for campaign in &campaigns {
        let marker = if selected.as_deref() == Some(campaign.id.as_str()) { "*" } else { " " };
        println!("{} {}  {}", marker, campaign.id, campaign.name);
    }
    Ok(())
}

async fn upload_sessions(
    config: &ClientConfig,
    session: &SignedIn,
    http: &reqwest::Client,
    prepared: PreparedUpload,
) -> Result<()> {
    let PreparedUpload {
        campaign_id,
        mode,
        mut batch,
    } = prepared;
    let transport = HttpTransport::new(http.clone(), config.api_url.clone(), config.bucket.clone())
        .with_mode(mode)
        .with_chunk_size(config.chunk_size);

    let uploader = BatchUploader::new(
        campaign_id.clone(),
        Arc::new(session.graphql.clone()),
        Arc::new(transport),
        Arc::new(SymphoniaProbe),
        Arc::new(TracingObserver::default()),
    )
    .with_inter_draft_delay(config.inter_draft_delay);

    info!(campaign_id = %campaign_id, sessions = batch.jobs.len(), mode = %mode, "Uploading");
    let report = uploader.submit(&mut batch).await?;

    for uploaded in &report.sessions {
        println!(
            "{}  {}  {}s  {}",
            uploaded.id,
            uploaded.name,
            uploaded.duration,
            uploaded.audio_file.as_deref().unwrap_or_default()
        );
    }
    Ok(())
}

//! Configuration for tavern-upload
//!
//! Priority: command line > environment variable > TOML file > compiled default.
//! The TOML file holds one `[environments.<NAME>]` table per deployment
//! (`DEV`, `DEVSORT`, `PROD`) plus shared `[upload]` tunables:
//!
//! ```toml
//! environment = "DEV"
//!
//! [environments.DEV]
//! api_url = "http://localhost:3001"
//! graphql_endpoint = "https://example.appsync-api.us-east-1.amazonaws.com/graphql"
//! cognito_client_id = "abc123"
//! bucket = "tavern-dev-audio"
//!
//! [upload]
//! mode = "chunked"
//! ```

use clap::{Args as ClapArgs, Parser, Subcommand};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use tavern_common::config::Environment;
use tavern_common::limits::{DEFAULT_CHUNK_SIZE, MAX_CHUNK_SIZE, MIB};
use tavern_common::{Error, Result};

use crate::campaigns::SelectionCache;
use crate::error::UploadError;
use crate::job::UploadDraft;
use crate::orchestrator::UploadBatch;
use crate::transport::UploadMode;

pub const DEFAULT_API_URL: &str = "http://localhost:3001";
pub const DEFAULT_REGION: &str = "us-east-1";
pub const DEFAULT_INTER_DRAFT_DELAY_SECS: u64 = 3;

/// Command-line arguments for tavern-upload
#[derive(Parser, Debug)]
#[command(name = "tavern-upload")]
#[command(about = "Upload recorded game sessions to Tavern")]
#[command(version)]
pub struct Args {
    /// TOML config file
    #[arg(short, long, env = "TAVERN_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Deployment environment: DEV, DEVSORT or PROD
    #[arg(short, long, env = "TAVERN_ENV", global = true)]
    pub env: Option<String>,

    /// Base URL of the upload relay
    #[arg(long, env = "TAVERN_API_URL", global = true)]
    pub api_url: Option<String>,

    #[arg(long, env = "APPSYNC_ENDPOINT", global = true)]
    pub graphql_endpoint: Option<String>,

    #[arg(long, env = "COGNITO_CLIENT_ID", global = true)]
    pub cognito_client_id: Option<String>,

    #[arg(long, env = "AWS_REGION", global = true)]
    pub region: Option<String>,

    /// Bucket used for multipart uploads
    #[arg(long, env = "AWS_S3_BUCKET", global = true)]
    pub bucket: Option<String>,

    #[command(flatten)]
    pub credentials: Credentials,

    #[command(subcommand)]
    pub command: Command,
}

/// How to sign in: a saved refresh token, or username and password
#[derive(ClapArgs, Debug, Default, Clone)]
pub struct Credentials {
    #[arg(long, env = "TAVERN_REFRESH_TOKEN", global = true, hide_env_values = true)]
    pub refresh_token: Option<String>,

    #[arg(long, env = "TAVERN_USERNAME", global = true)]
    pub username: Option<String>,

    #[arg(long, env = "TAVERN_PASSWORD", global = true, hide_env_values = true)]
    pub password: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List campaigns and mark the selected one
    Campaigns,

    /// Remember a campaign for later uploads
    Select {
        campaign_id: String,
    },

    /// Upload up to five sessions, one after another
    Upload(UploadArgs),
}

#[derive(ClapArgs, Debug, Default)]
pub struct UploadArgs {
    /// Campaign to upload into (defaults to the selected campaign)
    #[arg(long)]
    pub campaign: Option<String>,

    /// Audio file, once per session
    #[arg(long = "file", required = true)]
    pub files: Vec<PathBuf>,

    /// Session name, once per session, in the same order as --file
    #[arg(long = "name")]
    pub names: Vec<String>,

    /// Session date (YYYY-MM-DD), once per session
    #[arg(long = "date")]
    pub dates: Vec<String>,

    /// relay, chunked or presigned
    #[arg(long, env = "TAVERN_UPLOAD_MODE")]
    pub mode: Option<String>,
}

/// Contents of the TOML config file
#[derive(Debug, Default, Deserialize)]
pub struct FileConfig {
    pub environment: Option<String>,
    #[serde(default)]
    pub environments: HashMap<String, EnvironmentSection>,
    #[serde(default)]
    pub upload: UploadSection,
}

/// Endpoints for one deployment
#[derive(Debug, Default, Clone, Deserialize)]
pub struct EnvironmentSection {
    pub api_url: Option<String>,
    pub graphql_endpoint: Option<String>,
    pub cognito_client_id: Option<String>,
    pub region: Option<String>,
    pub bucket: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UploadSection {
    pub mode: Option<String>,
    pub chunk_size_mb: Option<u64>,
    pub inter_draft_delay_secs: Option<u64>,
}

/// Fully resolved uploader configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub environment: Environment,
    pub api_url: String,
    pub graphql_endpoint: Option<String>,
    pub cognito_client_id: Option<String>,
    pub region: String,
    pub bucket: String,
    pub mode: UploadMode,
    pub chunk_size: u64,
    pub inter_draft_delay: Duration,
}

impl ClientConfig {
    pub fn resolve(args: &Args, file: FileConfig) -> Result<Self> {
        let environment: Environment = match args.env.as_deref().or(file.environment.as_deref()) {
            Some(name) => name.parse()?,
            None => Environment::default(),
        };

        let section = file
            .environments
            .iter()
            .find(|(name, _)| name.parse::<Environment>().ok() == Some(environment))
            .map(|(_, section)| section.clone())
            .unwrap_or_default();

        let mode = match args.upload_mode().or(file.upload.mode) {
            Some(name) => name.parse()?,
            None => UploadMode::default(),
        };

        let chunk_size = file
            .upload
            .chunk_size_mb
            .map(|mb| mb * MIB)
            .unwrap_or(DEFAULT_CHUNK_SIZE);
        if chunk_size == 0 || chunk_size > MAX_CHUNK_SIZE {
            return Err(Error::Config(format!(
                "chunk_size_mb must be between 1 and {}",
                MAX_CHUNK_SIZE / MIB
            )));
        }

        Ok(Self {
            environment,
            api_url: args
                .api_url
                .clone()
                .or(section.api_url)
                .unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            graphql_endpoint: args.graphql_endpoint.clone().or(section.graphql_endpoint),
            cognito_client_id: args.cognito_client_id.clone().or(section.cognito_client_id),
            region: args
                .region
                .clone()
                .or(section.region)
                .unwrap_or_else(|| DEFAULT_REGION.to_string()),
            bucket: args.bucket.clone().or(section.bucket).unwrap_or_default(),
            mode,
            chunk_size,
            inter_draft_delay: Duration::from_secs(
                file.upload
                    .inter_draft_delay_secs
                    .unwrap_or(DEFAULT_INTER_DRAFT_DELAY_SECS),
            ),
        })
    }

    /// GraphQL endpoint, required by every command
    pub fn require_graphql(&self) -> Result<&str> {
        self.graphql_endpoint.as_deref().ok_or_else(|| {
            Error::Config(format!(
                "APPSYNC_ENDPOINT is not set for environment {}",
                self.environment
            ))
        })
    }

    pub fn require_client_id(&self) -> Result<&str> {
        self.cognito_client_id.as_deref().ok_or_else(|| {
            Error::Config(format!(
                "COGNITO_CLIENT_ID is not set for environment {}",
                self.environment
            ))
        })
    }
}

/// An upload checked as far as possible without signing in
#[derive(Debug)]
pub struct PreparedUpload {
    pub campaign_id: String,
    pub mode: UploadMode,
    pub batch: UploadBatch,
}

impl UploadArgs {
    /// Resolve the campaign and validate the batch. Touches only local files.
    pub fn prepare(
        &self,
        config: &ClientConfig,
        cache: &SelectionCache,
    ) -> std::result::Result<PreparedUpload, UploadError> {
        let campaign_id = match &self.campaign {
            Some(id) => id.clone(),
            None => cache.load(config.environment)?.ok_or_else(|| {
                Error::Config(
                    "No campaign given and none selected; use --campaign or `tavern-upload select`"
                        .to_string(),
                )
            })?,
        };

        if config.mode == UploadMode::Chunked && config.bucket.is_empty() {
            return Err(Error::Config(
                "Chunked uploads need a bucket (AWS_S3_BUCKET or [environments.*].bucket)".to_string(),
            )
            .into());
        }

        // Missing names or dates become empty and fail validation
        let drafts = self
            .files
            .iter()
            .enumerate()
            .map(|(i, file)| UploadDraft {
                file: Some(file.clone()),
                name: self.names.get(i).cloned().unwrap_or_default(),
                date: self.dates.get(i).cloned().unwrap_or_default(),
            })
            .collect();
        let batch = UploadBatch::new(drafts);
        batch.validate()?;

        Ok(PreparedUpload {
            campaign_id,
            mode: config.mode,
            batch,
        })
    }
}

impl Args {
    fn upload_mode(&self) -> Option<String> {
        match &self.command {
            Command::Upload(upload) => upload.mode.clone(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(extra: &[&str]) -> Args {
        let mut argv = vec!["tavern-upload"];
        argv.extend_from_slice(extra);
        argv.push("campaigns");
        Args::parse_from(argv)
    }

    fn file_config(toml: &str) -> FileConfig {
        toml::from_str(toml).unwrap()
    }

    const SAMPLE: &str = r#"
        environment = "PROD"

        [environments.DEV]
        api_url = "http://localhost:3001"
        bucket = "tavern-dev"

        [environments.PROD]
        api_url = "https://api.tavern.example"
        graphql_endpoint = "https://prod.example/graphql"
        cognito_client_id = "prod-client"
        bucket = "tavern-prod"

        [upload]
        mode = "chunked"
        chunk_size_mb = 8
    "#;

    #[test]
    fn test_file_selects_environment() {
        let config = ClientConfig::resolve(&args(&[]), file_config(SAMPLE)).unwrap();

        assert_eq!(config.environment, Environment::Prod);
        assert_eq!(config.api_url, "https://api.tavern.example");
        assert_eq!(config.bucket, "tavern-prod");
        assert_eq!(config.mode, UploadMode::Chunked);
        assert_eq!(config.chunk_size, 8 * MIB);
        assert_eq!(config.inter_draft_delay, Duration::from_secs(3));
        assert_eq!(config.require_client_id().unwrap(), "prod-client");
    }

    #[test]
    fn test_cli_overrides_file() {
        let config = ClientConfig::resolve(
            &args(&["--env", "dev", "--api-url", "http://relay:9000"]),
            file_config(SAMPLE),
        )
        .unwrap();

        assert_eq!(config.environment, Environment::Dev);
        assert_eq!(config.api_url, "http://relay:9000");
        assert_eq!(config.bucket, "tavern-dev");
        assert!(config.require_graphql().is_err());
    }

    #[test]
    fn test_defaults_without_file() {
        let config = ClientConfig::resolve(&args(&[]), FileConfig::default()).unwrap();

        assert_eq!(config.environment, Environment::Dev);
        assert_eq!(config.api_url, DEFAULT_API_URL);
        assert_eq!(config.mode, UploadMode::Relay);
        assert_eq!(config.chunk_size, DEFAULT_CHUNK_SIZE);
    }

    #[test]
    fn test_oversized_chunk_rejected() {
        let result = ClientConfig::resolve(
            &args(&[]),
            file_config("[upload]\nchunk_size_mb = 64\n"),
        );
        assert!(result.is_err());
    }

    fn upload_args(argv: &[&str]) -> (ClientConfig, UploadArgs) {
        let mut full = vec!["tavern-upload", "upload"];
        full.extend_from_slice(argv);
        let args = Args::parse_from(full);
        let config = ClientConfig::resolve(&args, FileConfig::default()).unwrap();
        let Command::Upload(upload) = args.command else {
            panic!("expected upload command");
        };
        (config, upload)
    }

    #[test]
    fn test_prepare_rejects_incomplete_draft() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("one.mp3");
        std::fs::write(&file, b"id3").unwrap();
        let file = file.to_str().unwrap();
        let cache = SelectionCache::new(dir.path().join("cache"));

        let (config, upload) = upload_args(&[
            "--campaign", "c1", "--file", file, "--name", "One", "--date", "2026-05-01", "--file", file,
        ]);
        let err = upload.prepare(&config, &cache).unwrap_err();
        assert!(matches!(
            err,
            UploadError::Validation(crate::error::ValidationError::MissingName { index: 1 })
        ));
    }

    #[test]
    fn test_prepare_uses_selected_campaign() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("one.mp3");
        std::fs::write(&file, b"id3").unwrap();
        let file = file.to_str().unwrap();
        let cache = SelectionCache::new(dir.path().join("cache"));

        let (config, upload) = upload_args(&["--file", file, "--name", "One", "--date", "2026-05-01"]);
        assert!(matches!(upload.prepare(&config, &cache), Err(UploadError::Records(Error::Config(_)))));

        cache.save(config.environment, "c7").unwrap();
        let prepared = upload.prepare(&config, &cache).unwrap();
        assert_eq!(prepared.campaign_id, "c7");
        assert_eq!(prepared.mode, UploadMode::Relay);
        assert_eq!(prepared.batch.jobs.len(), 1);
    }

    #[test]
    fn test_prepare_chunked_needs_bucket() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("one.mp3");
        std::fs::write(&file, b"id3").unwrap();
        let file = file.to_str().unwrap();
        let cache = SelectionCache::new(dir.path().join("cache"));

        let (config, upload) = upload_args(&[
            "--campaign", "c1", "--mode", "chunked", "--file", file, "--name", "One", "--date", "2026-05-01",
        ]);
        assert!(matches!(upload.prepare(&config, &cache), Err(UploadError::Records(Error::Config(_)))));
    }

    #[test]
    fn test_upload_arguments() {
        let args = Args::parse_from([
            "tavern-upload",
            "upload",
            "--campaign",
            "c1",
            "--file",
            "one.mp3",
            "--name",
            "One",
            "--date",
            "2026-05-01",
            "--file",
            "two.mp3",
            "--mode",
            "presigned",
        ]);

        let Command::Upload(upload) = &args.command else {
            panic!("expected upload command");
        };
        assert_eq!(upload.files.len(), 2);
        assert_eq!(upload.names, vec!["One"]);
        assert_eq!(args.upload_mode().as_deref(), Some("presigned"));
    }
}

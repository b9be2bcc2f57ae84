//! Configuration for tavern-server
//!
//! Priority: command line > environment variable > TOML file > compiled default.
//! Secrets (Stripe keys, database URL) come from the environment; the TOML
//! file carries non-secret tunables.

use clap::Parser;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tavern_common::{Error, Result};

pub const DEFAULT_BIND: &str = "0.0.0.0:3001";
pub const DEFAULT_DATABASE_URL: &str = "sqlite://tavern.db?mode=rwc";
pub const DEFAULT_KEY_PREFIX: &str = "public/audioUploads/";
pub const DEFAULT_IMAGE_PREFIX: &str = "public/images/";
pub const DEFAULT_PRESIGN_TTL_SECS: u64 = 3600;
pub const DEFAULT_MONTHLY_CAP: u32 = 3;
pub const DEFAULT_MIN_PURCHASE_CENTS: i64 = 100;
pub const DEFAULT_DISCOUNT_PERCENT: u32 = 20;
pub const DEFAULT_REWARD_PERCENT_OFF: u32 = 100;

/// Command-line arguments for tavern-server
#[derive(Parser, Debug, Default)]
#[command(name = "tavern-server")]
#[command(about = "Upload relay and referral API for Tavern")]
#[command(version)]
pub struct Args {
    /// TOML config file
    #[arg(short, long, env = "TAVERN_CONFIG")]
    pub config: Option<PathBuf>,

    /// Address to listen on
    #[arg(short, long, env = "TAVERN_BIND")]
    pub bind: Option<SocketAddr>,

    /// sqlx database URL
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: Option<String>,

    /// Object storage backend: "s3" or "memory"
    #[arg(long, env = "TAVERN_STORAGE")]
    pub storage: Option<String>,

    /// Bucket for uploads
    #[arg(long, env = "AWS_S3_BUCKET")]
    pub bucket: Option<String>,

    #[arg(long, env = "AWS_REGION")]
    pub aws_region: Option<String>,

    /// Processing function invoked by /api/trigger-lambda
    #[arg(long, env = "TAVERN_LAMBDA_FUNCTION")]
    pub lambda_function: Option<String>,

    #[arg(long, env = "COGNITO_USER_POOL_ID")]
    pub cognito_user_pool_id: Option<String>,

    #[arg(long, env = "COGNITO_CLIENT_ID")]
    pub cognito_client_id: Option<String>,

    #[arg(long, env = "APPSYNC_ENDPOINT")]
    pub graphql_endpoint: Option<String>,

    #[arg(long, env = "APPSYNC_API_KEY", hide_env_values = true)]
    pub graphql_api_key: Option<String>,

    #[arg(long, env = "STRIPE_SECRET_KEY", hide_env_values = true)]
    pub stripe_secret_key: Option<String>,

    #[arg(long, env = "STRIPE_PUBLISHABLE_KEY")]
    pub stripe_publishable_key: Option<String>,

    #[arg(long, env = "STRIPE_WEBHOOK_SECRET", hide_env_values = true)]
    pub stripe_webhook_secret: Option<String>,

    /// Path segment Stripe posts webhooks to (/api/stripe/webhook/:uuid)
    #[arg(long, env = "STRIPE_WEBHOOK_UUID")]
    pub stripe_webhook_uuid: Option<String>,

    #[arg(long, env = "FEATURE_REFERRAL_SYSTEM")]
    pub feature_referral_system: Option<String>,

    #[arg(long, env = "REFERRAL_MONTHLY_CAP")]
    pub referral_monthly_cap: Option<u32>,

    #[arg(long, env = "REFERRAL_MIN_PURCHASE_CENTS")]
    pub referral_min_purchase_cents: Option<i64>,

    #[arg(long, env = "REFERRAL_DISCOUNT_PERCENT")]
    pub referral_discount_percent: Option<u32>,

    #[arg(long, env = "REFERRAL_REWARD_PERCENT_OFF")]
    pub referral_reward_percent_off: Option<u32>,
}

/// `[server]`, `[storage]` and `[referral]` tables of the TOML file
#[derive(Debug, Default, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub storage: StorageSection,
    #[serde(default)]
    pub referral: ReferralSection,
}

#[derive(Debug, Default, Deserialize)]
pub struct ServerSection {
    pub bind: Option<SocketAddr>,
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct StorageSection {
    pub backend: Option<String>,
    pub bucket: Option<String>,
    pub region: Option<String>,
    /// Extra buckets clients may name in multipart requests
    #[serde(default)]
    pub allowed_buckets: Vec<String>,
    pub key_prefix: Option<String>,
    pub public_image_prefix: Option<String>,
    pub presign_ttl_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ReferralSection {
    pub enabled: Option<bool>,
    pub monthly_cap: Option<u32>,
    pub min_purchase_cents: Option<i64>,
    pub discount_percent: Option<u32>,
    pub reward_percent_off: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    S3,
    Memory,
}

impl std::str::FromStr for StorageBackend {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "s3" => Ok(StorageBackend::S3),
            "memory" => Ok(StorageBackend::Memory),
            other => Err(Error::Config(format!("Unknown storage backend: {}", other))),
        }
    }
}

/// Object storage settings
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub bucket: String,
    pub region: String,
    pub allowed_buckets: Vec<String>,
    pub key_prefix: String,
    pub public_image_prefix: String,
    pub presign_ttl: Duration,
}

impl StorageConfig {
    /// Whether a caller-supplied bucket name may be used
    pub fn bucket_allowed(&self, bucket: &str) -> bool {
        bucket == self.bucket || self.allowed_buckets.iter().any(|b| b == bucket)
    }

    /// Object key for an uploaded file
    pub fn object_key(&self, file_name: &str) -> String {
        format!("{}{}", self.key_prefix, file_name)
    }
}

/// Cognito user pool used to verify bearer tokens
#[derive(Debug, Clone)]
pub struct CognitoConfig {
    pub region: String,
    pub user_pool_id: String,
    pub client_id: Option<String>,
}

impl CognitoConfig {
    pub fn issuer(&self) -> String {
        format!(
            "https://cognito-idp.{}.amazonaws.com/{}",
            self.region, self.user_pool_id
        )
    }

    pub fn jwks_url(&self) -> String {
        format!("{}/.well-known/jwks.json", self.issuer())
    }
}

/// Stripe credentials and webhook routing
#[derive(Debug, Clone, Default)]
pub struct StripeConfig {
    pub secret_key: Option<String>,
    pub publishable_key: Option<String>,
    pub webhook_secret: Option<String>,
    pub webhook_uuid: Option<String>,
}

/// Referral feature switches and tunables
#[derive(Debug, Clone, PartialEq)]
pub struct ReferralConfig {
    pub enabled: bool,
    /// Rewards a referrer may earn per calendar month (UTC)
    pub monthly_cap: u32,
    /// Smallest purchase (in cents) that qualifies for a reward
    pub min_purchase_cents: i64,
    /// Discount a referred customer gets from a referral code
    pub discount_percent: u32,
    /// Discount on the referrer's reward coupon
    pub reward_percent_off: u32,
}

impl Default for ReferralConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            monthly_cap: DEFAULT_MONTHLY_CAP,
            min_purchase_cents: DEFAULT_MIN_PURCHASE_CENTS,
            discount_percent: DEFAULT_DISCOUNT_PERCENT,
            reward_percent_off: DEFAULT_REWARD_PERCENT_OFF,
        }
    }
}

/// Fully resolved server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: SocketAddr,
    pub database_url: String,
    pub cors_origins: Vec<String>,
    pub storage: StorageConfig,
    pub lambda_function: Option<String>,
    pub cognito: Option<CognitoConfig>,
    pub graphql_endpoint: Option<String>,
    pub graphql_api_key: Option<String>,
    pub stripe: StripeConfig,
    pub referral: ReferralConfig,
}

impl ServerConfig {
    /// Merge command line/environment with the TOML file and defaults
    pub fn resolve(args: Args, file: FileConfig) -> Result<Self> {
        let bind = match args.bind.or(file.server.bind) {
            Some(addr) => addr,
            None => DEFAULT_BIND
                .parse()
                .map_err(|e| Error::Config(format!("Bad default bind address: {}", e)))?,
        };

        let backend = match args.storage.or(file.storage.backend) {
            Some(name) => name.parse()?,
            None => StorageBackend::S3,
        };

        let bucket = args
            .bucket
            .or(file.storage.bucket)
            .unwrap_or_default();
        if backend == StorageBackend::S3 && bucket.trim().is_empty() {
            return Err(Error::Config(
                "AWS_S3_BUCKET must be set when using the s3 storage backend".to_string(),
            ));
        }
        let bucket = if bucket.trim().is_empty() {
            "tavern-local".to_string()
        } else {
            bucket
        };

        let region = args
            .aws_region
            .or(file.storage.region)
            .unwrap_or_else(|| "us-east-1".to_string());

        let storage = StorageConfig {
            backend,
            bucket,
            region: region.clone(),
            allowed_buckets: file.storage.allowed_buckets,
            key_prefix: file
                .storage
                .key_prefix
                .unwrap_or_else(|| DEFAULT_KEY_PREFIX.to_string()),
            public_image_prefix: file
                .storage
                .public_image_prefix
                .unwrap_or_else(|| DEFAULT_IMAGE_PREFIX.to_string()),
            presign_ttl: Duration::from_secs(
                file.storage.presign_ttl_secs.unwrap_or(DEFAULT_PRESIGN_TTL_SECS),
            ),
        };

        let cognito = args.cognito_user_pool_id.map(|user_pool_id| CognitoConfig {
            region: region.clone(),
            user_pool_id,
            client_id: args.cognito_client_id,
        });

        let referral_enabled = match args.feature_referral_system {
            Some(value) => tavern_common::config::parse_flag(&value),
            None => file.referral.enabled.unwrap_or(false),
        };

        let referral = ReferralConfig {
            enabled: referral_enabled,
            monthly_cap: args
                .referral_monthly_cap
                .or(file.referral.monthly_cap)
                .unwrap_or(DEFAULT_MONTHLY_CAP),
            min_purchase_cents: args
                .referral_min_purchase_cents
                .or(file.referral.min_purchase_cents)
                .unwrap_or(DEFAULT_MIN_PURCHASE_CENTS),
            discount_percent: args
                .referral_discount_percent
                .or(file.referral.discount_percent)
                .unwrap_or(DEFAULT_DISCOUNT_PERCENT),
            reward_percent_off: args
                .referral_reward_percent_off
                .or(file.referral.reward_percent_off)
                .unwrap_or(DEFAULT_REWARD_PERCENT_OFF),
        };

        if referral.discount_percent == 0 || referral.discount_percent > 100 {
            return Err(Error::Config(format!(
                "REFERRAL_DISCOUNT_PERCENT must be 1-100, got {}",
                referral.discount_percent
            )));
        }
        if referral.reward_percent_off == 0 || referral.reward_percent_off > 100 {
            return Err(Error::Config(format!(
                "REFERRAL_REWARD_PERCENT_OFF must be 1-100, got {}",
                referral.reward_percent_off
            )));
        }

        Ok(Self {
            bind,
            database_url: args
                .database_url
                .unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string()),
            cors_origins: file.server.cors_origins,
            storage,
            lambda_function: args.lambda_function,
            cognito,
            graphql_endpoint: args.graphql_endpoint,
            graphql_api_key: args.graphql_api_key,
            stripe: StripeConfig {
                secret_key: args.stripe_secret_key,
                publishable_key: args.stripe_publishable_key,
                webhook_secret: args.stripe_webhook_secret,
                webhook_uuid: args.stripe_webhook_uuid,
            },
            referral,
        })
    }

    /// Configuration for tests and local runs: memory storage, no external services
    pub fn local() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 3001)),
            database_url: "sqlite::memory:".to_string(),
            cors_origins: Vec::new(),
            storage: StorageConfig {
                backend: StorageBackend::Memory,
                bucket: "tavern-local".to_string(),
                region: "us-east-1".to_string(),
                allowed_buckets: Vec::new(),
                key_prefix: DEFAULT_KEY_PREFIX.to_string(),
                public_image_prefix: DEFAULT_IMAGE_PREFIX.to_string(),
                presign_ttl: Duration::from_secs(DEFAULT_PRESIGN_TTL_SECS),
            },
            lambda_function: None,
            cognito: None,
            graphql_endpoint: None,
            graphql_api_key: None,
            stripe: StripeConfig::default(),
            referral: ReferralConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_args() -> Args {
        Args {
            storage: Some("memory".to_string()),
            ..Args::default()
        }
    }

    #[test]
    fn test_defaults_applied() {
        let config = ServerConfig::resolve(memory_args(), FileConfig::default()).unwrap();
        assert_eq!(config.bind.port(), 3001);
        assert_eq!(config.storage.key_prefix, DEFAULT_KEY_PREFIX);
        assert!(!config.referral.enabled);
        assert_eq!(config.referral.monthly_cap, DEFAULT_MONTHLY_CAP);
        assert!(config.cognito.is_none());
    }

    #[test]
    fn test_s3_backend_requires_bucket() {
        let result = ServerConfig::resolve(Args::default(), FileConfig::default());
        assert!(result.is_err());
    }

    #[test]
    fn test_args_override_file() {
        let file: FileConfig = toml::from_str(
            r#"
            [referral]
            enabled = false
            monthly_cap = 10
            min_purchase_cents = 500

            [storage]
            key_prefix = "uploads/"
            "#,
        )
        .unwrap();

        let args = Args {
            feature_referral_system: Some("true".to_string()),
            referral_monthly_cap: Some(2),
            ..memory_args()
        };

        let config = ServerConfig::resolve(args, file).unwrap();
        assert!(config.referral.enabled);
        assert_eq!(config.referral.monthly_cap, 2);
        assert_eq!(config.referral.min_purchase_cents, 500);
        assert_eq!(config.storage.object_key("a.mp3"), "uploads/a.mp3");
    }

    #[test]
    fn test_bucket_allow_list() {
        let mut config = ServerConfig::local();
        config.storage.allowed_buckets = vec!["tavern-archive".to_string()];
        assert!(config.storage.bucket_allowed("tavern-local"));
        assert!(config.storage.bucket_allowed("tavern-archive"));
        assert!(!config.storage.bucket_allowed("someone-elses-bucket"));
    }

    #[test]
    fn test_invalid_discount_rejected() {
        let args = Args {
            referral_discount_percent: Some(150),
            ..memory_args()
        };
        assert!(ServerConfig::resolve(args, FileConfig::default()).is_err());
    }

    #[test]
    fn test_cognito_urls() {
        let cognito = CognitoConfig {
            region: "us-west-2".to_string(),
            user_pool_id: "us-west-2_abc".to_string(),
            client_id: None,
        };
        assert_eq!(
            cognito.jwks_url(),
            "https://cognito-idp.us-west-2.amazonaws.com/us-west-2_abc/.well-known/jwks.json"
        );
    }
}

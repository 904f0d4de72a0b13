use crate::archive::UploadOptions;
use crate::blob_store::S3Config;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

const DEFAULT_BIND_ADDR: &str = "127.0.0.1:4170";
const DEFAULT_UPLOAD_TIMEOUT_SECS: u64 = 30;
const DEFAULT_MAX_CONCURRENT_UPLOADS: usize = 4;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing configuration value: {0}")]
    Missing(&'static str),
    #[error("Invalid value for {name}: {value}")]
    Invalid { name: &'static str, value: String },
    #[error("Failed to get home directory")]
    NoHomeDir,
}

/// Where uploaded images are stored
#[derive(Clone, Debug)]
pub enum StorageConfig {
    /// Files under a local directory, served by the kirin server under /media
    Local {
        root: PathBuf,
        public_base_url: String,
    },
    S3(S3Config),
}

/// Application configuration
///
/// Loaded from environment variables, with a `.env` file picked up first
/// when present.
#[derive(Clone, Debug)]
pub struct Config {
    pub database_path: PathBuf,
    pub bind_addr: SocketAddr,
    pub storage: StorageConfig,
    /// Per-file limit for a single blob upload
    pub upload_timeout: Duration,
    pub max_concurrent_uploads: usize,
    /// Bearer token for the admin API; admin routes are disabled without one
    pub admin_token: Option<String>,
}

impl Config {
    /// Load configuration from `.env` and the process environment
    pub fn load() -> Result<Self, ConfigError> {
        if dotenvy::dotenv().is_ok() {
            info!("Config: loaded .env file");
        }
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build configuration from a variable lookup function
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        let bind_addr_raw = get("KIRIN_BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string());
        let bind_addr: SocketAddr = bind_addr_raw.parse().map_err(|_| ConfigError::Invalid {
            name: "KIRIN_BIND_ADDR",
            value: bind_addr_raw.clone(),
        })?;

        let database_path = match get("KIRIN_DATABASE_PATH") {
            Some(path) => PathBuf::from(path),
            None => data_dir()?.join("kirin.db"),
        };

        let use_local_storage = match get("KIRIN_USE_LOCAL_STORAGE") {
            Some(value) => parse_bool("KIRIN_USE_LOCAL_STORAGE", &value)?,
            None => false,
        };

        let storage = if use_local_storage {
            let root = match get("KIRIN_LOCAL_STORAGE_PATH") {
                Some(path) => PathBuf::from(path),
                None => data_dir()?.join("media"),
            };
            let public_base_url = get("KIRIN_PUBLIC_BASE_URL")
                .unwrap_or_else(|| format!("http://{}/media", bind_addr));
            StorageConfig::Local {
                root,
                public_base_url,
            }
        } else {
            StorageConfig::S3(S3Config {
                bucket_name: get("KIRIN_S3_BUCKET").ok_or(ConfigError::Missing("KIRIN_S3_BUCKET"))?,
                region: get("KIRIN_S3_REGION").ok_or(ConfigError::Missing("KIRIN_S3_REGION"))?,
                access_key_id: get("KIRIN_S3_ACCESS_KEY_ID")
                    .ok_or(ConfigError::Missing("KIRIN_S3_ACCESS_KEY_ID"))?,
                secret_access_key: get("KIRIN_S3_SECRET_ACCESS_KEY")
                    .ok_or(ConfigError::Missing("KIRIN_S3_SECRET_ACCESS_KEY"))?,
                endpoint_url: get("KIRIN_S3_ENDPOINT_URL"),
                public_base_url: get("KIRIN_PUBLIC_BASE_URL"),
            })
        };

        let upload_timeout_secs = match get("KIRIN_UPLOAD_TIMEOUT_SECS") {
            Some(value) => parse_positive("KIRIN_UPLOAD_TIMEOUT_SECS", &value)?,
            None => DEFAULT_UPLOAD_TIMEOUT_SECS,
        };

        let max_concurrent_uploads = match get("KIRIN_MAX_CONCURRENT_UPLOADS") {
            Some(value) => parse_positive("KIRIN_MAX_CONCURRENT_UPLOADS", &value)? as usize,
            None => DEFAULT_MAX_CONCURRENT_UPLOADS,
        };

        Ok(Config {
            database_path,
            bind_addr,
            storage,
            upload_timeout: Duration::from_secs(upload_timeout_secs),
            max_concurrent_uploads,
            admin_token: get("KIRIN_ADMIN_TOKEN"),
        })
    }

    /// Upload limits for image batches
    pub fn upload_options(&self) -> UploadOptions {
        UploadOptions {
            upload_timeout: self.upload_timeout,
            max_concurrent_uploads: self.max_concurrent_uploads,
        }
    }
}

/// Default data directory: ~/.kirin
fn data_dir() -> Result<PathBuf, ConfigError> {
    dirs::home_dir()
        .map(|home| home.join(".kirin"))
        .ok_or(ConfigError::NoHomeDir)
}

fn parse_bool(name: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(ConfigError::Invalid {
            name,
            value: value.to_string(),
        }),
    }
}

fn parse_positive(name: &'static str, value: &str) -> Result<u64, ConfigError> {
    match value.trim().parse::<u64>() {
        Ok(parsed) if parsed > 0 => Ok(parsed),
        _ => Err(ConfigError::Invalid {
            name,
            value: value.to_string(),
        }),
    }
}

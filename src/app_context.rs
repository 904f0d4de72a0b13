use crate::archive::ArchiveManager;
use crate::blob_store::{BlobStoreError, BlobStoreManager};
use crate::config::{Config, ConfigError, StorageConfig};
use crate::db::Database;
use std::path::PathBuf;
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum StartupError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Blob storage error: {0}")]
    BlobStore(#[from] BlobStoreError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Services shared by the server and the sync tool
#[derive(Debug, Clone)]
pub struct AppContext {
    pub config: Config,
    pub archive: ArchiveManager,
    /// Directory served under /media when storage is local
    pub media_root: Option<PathBuf>,
}

impl AppContext {
    /// Open the database and blob store described by `config`
    pub async fn init(config: Config) -> Result<Self, StartupError> {
        if let Some(parent) = config.database_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let database = Database::new(&config.database_path.to_string_lossy()).await?;

        let (blob_store, media_root) = match &config.storage {
            StorageConfig::Local {
                root,
                public_base_url,
            } => {
                tokio::fs::create_dir_all(root).await?;
                (
                    BlobStoreManager::local(root.clone(), public_base_url),
                    Some(root.clone()),
                )
            }
            StorageConfig::S3(s3_config) => (BlobStoreManager::new(s3_config.clone()).await?, None),
        };

        let archive = ArchiveManager::new(database, blob_store, config.upload_options());
        info!("Archive ready (database {})", config.database_path.display());

        Ok(AppContext {
            config,
            archive,
            media_root,
        })
    }
}

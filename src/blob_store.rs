use aws_config::{BehaviorVersion, Region};
use aws_credential_types::Credentials;
use aws_sdk_s3::Client;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, OnceLock};
use thiserror::Error;
use tokio::fs;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum BlobStoreError {
    #[error("S3 SDK error: {0}")]
    SdkError(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Invalid storage key: {0}")]
    InvalidKey(String),
}

/// S3 configuration for blob storage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3Config {
    pub bucket_name: String,
    pub region: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub endpoint_url: Option<String>, // For MinIO/S3-compatible services
    /// Base URL readers fetch objects from (CDN or public bucket URL)
    pub public_base_url: Option<String>,
}

impl S3Config {
    pub fn validate(&self) -> Result<(), BlobStoreError> {
        if self.bucket_name.trim().is_empty() {
            return Err(BlobStoreError::Config(
                "Bucket name cannot be empty".to_string(),
            ));
        }
        if self.region.trim().is_empty() {
            return Err(BlobStoreError::Config(
                "Region cannot be empty".to_string(),
            ));
        }
        if self.access_key_id.trim().is_empty() {
            return Err(BlobStoreError::Config(
                "Access key ID cannot be empty".to_string(),
            ));
        }
        if self.secret_access_key.trim().is_empty() {
            return Err(BlobStoreError::Config(
                "Secret access key cannot be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Base URL objects are publicly reachable under
    fn resolved_public_base_url(&self) -> String {
        if let Some(base) = &self.public_base_url {
            return base.trim_end_matches('/').to_string();
        }
        match &self.endpoint_url {
            Some(endpoint) => format!("{}/{}", endpoint.trim_end_matches('/'), self.bucket_name),
            None => format!(
                "https://{}.s3.{}.amazonaws.com",
                self.bucket_name, self.region
            ),
        }
    }
}

/// Trait for blob storage operations (allows mocking for tests)
#[async_trait::async_trait]
pub trait BlobStore: Send + Sync {
    async fn upload(&self, key: &str, data: &[u8], content_type: &str)
        -> Result<(), BlobStoreError>;
    /// Public URL for a key. Does not check that the object exists.
    fn public_url(&self, key: &str) -> String;
    /// All keys under `prefix`
    async fn list(&self, prefix: &str) -> Result<Vec<String>, BlobStoreError>;
}

/// Production S3 blob storage implementation
pub struct S3BlobStore {
    client: Client,
    bucket_name: String,
    public_base_url: String,
}

impl S3BlobStore {
    /// Create a new S3 blob storage client
    pub async fn new(config: S3Config) -> Result<Self, BlobStoreError> {
        config.validate()?;
        let public_base_url = config.resolved_public_base_url();

        let credentials = Credentials::new(
            config.access_key_id,
            config.secret_access_key,
            None, // session_token
            None, // expiration
            "kirin-s3-config",
        );

        let mut aws_config_builder = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region))
            .credentials_provider(credentials);

        if let Some(endpoint) = config.endpoint_url {
            aws_config_builder = aws_config_builder.endpoint_url(endpoint);
        }

        let aws_config = aws_config_builder.load().await;
        let client = Client::new(&aws_config);

        Ok(S3BlobStore {
            client,
            bucket_name: config.bucket_name,
            public_base_url,
        })
    }
}

#[async_trait::async_trait]
impl BlobStore for S3BlobStore {
    async fn upload(
        &self,
        key: &str,
        data: &[u8],
        content_type: &str,
    ) -> Result<(), BlobStoreError> {
        debug!("S3BlobStore: Uploading {} ({} bytes)", key, data.len());

        self.client
            .put_object()
            .bucket(&self.bucket_name)
            .key(key)
            .body(data.to_vec().into())
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| BlobStoreError::SdkError(format!("Put object failed: {}", e)))?;

        Ok(())
    }

    fn public_url(&self, key: &str) -> String {
        format!("{}/{}", self.public_base_url, encode_key(key))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, BlobStoreError> {
        let mut keys = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let response = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket_name)
                .prefix(prefix)
                .set_continuation_token(continuation_token.take())
                .send()
                .await
                .map_err(|e| BlobStoreError::SdkError(format!("List objects failed: {}", e)))?;

            keys.extend(
                response
                    .contents()
                    .iter()
                    .filter_map(|object| object.key().map(str::to_string)),
            );

            match response.next_continuation_token() {
                Some(token) if response.is_truncated().unwrap_or(false) => {
                    continuation_token = Some(token.to_string());
                }
                _ => break,
            }
        }

        Ok(keys)
    }
}

/// Filesystem blob storage for development
///
/// Objects live at `root/<key>`; the server exposes `root` so that
/// `public_base_url/<key>` resolves.
pub struct LocalBlobStore {
    root: PathBuf,
    public_base_url: String,
}

impl LocalBlobStore {
    pub fn new(root: PathBuf, public_base_url: &str) -> Self {
        LocalBlobStore {
            root,
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
        }
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, BlobStoreError> {
        let relative = Path::new(key);
        let is_plain = relative
            .components()
            .all(|component| matches!(component, Component::Normal(_)));
        if key.is_empty() || !is_plain {
            return Err(BlobStoreError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait::async_trait]
impl BlobStore for LocalBlobStore {
    async fn upload(
        &self,
        key: &str,
        data: &[u8],
        _content_type: &str,
    ) -> Result<(), BlobStoreError> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&path, data).await?;
        debug!("LocalBlobStore: Wrote {} bytes to {}", data.len(), path.display());
        Ok(())
    }

    fn public_url(&self, key: &str) -> String {
        format!("{}/{}", self.public_base_url, encode_key(key))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, BlobStoreError> {
        let mut keys = Vec::new();
        let mut pending = vec![self.root.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };

            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if entry.file_type().await?.is_dir() {
                    pending.push(path);
                    continue;
                }
                let Ok(relative) = path.strip_prefix(&self.root) else {
                    continue;
                };
                let key = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                if key.starts_with(prefix) {
                    keys.push(key);
                }
            }
        }

        keys.sort();
        Ok(keys)
    }
}

/// Blob storage manager shared by the archive and the server
#[derive(Clone)]
pub struct BlobStoreManager {
    storage: Arc<dyn BlobStore>,
}

impl std::fmt::Debug for BlobStoreManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlobStoreManager")
            .field("storage", &"<dyn BlobStore>")
            .finish()
    }
}

impl BlobStoreManager {
    /// Create a new blob storage manager with S3 configuration
    pub async fn new(config: S3Config) -> Result<Self, BlobStoreError> {
        info!("Using S3 blob storage (bucket {})", config.bucket_name);
        let storage = S3BlobStore::new(config).await?;
        Ok(Self::from_storage(Arc::new(storage)))
    }

    /// Create a blob storage manager backed by a local directory
    pub fn local(root: PathBuf, public_base_url: &str) -> Self {
        info!("Using local blob storage at {}", root.display());
        Self::from_storage(Arc::new(LocalBlobStore::new(root, public_base_url)))
    }

    /// Wrap an existing storage implementation
    pub fn from_storage(storage: Arc<dyn BlobStore>) -> Self {
        BlobStoreManager { storage }
    }

    /// Upload bytes under `key` and return the object's public URL
    pub async fn upload(&self, key: &str, data: &[u8]) -> Result<String, BlobStoreError> {
        self.storage
            .upload(key, data, content_type_for(key))
            .await?;
        Ok(self.storage.public_url(key))
    }

    pub fn public_url(&self, key: &str) -> String {
        self.storage.public_url(key)
    }

    pub async fn list(&self, prefix: &str) -> Result<Vec<String>, BlobStoreError> {
        self.storage.list(prefix).await
    }
}

fn unsafe_chars() -> &'static Regex {
    static UNSAFE: OnceLock<Regex> = OnceLock::new();
    UNSAFE.get_or_init(|| Regex::new(r"[^A-Za-z0-9._-]+").expect("static regex"))
}

/// Reduce an uploaded file name to `[A-Za-z0-9._-]`
///
/// Runs of other characters collapse to a single `_`. Leading dots are
/// stripped so keys never name hidden files.
pub fn sanitize_file_name(name: &str) -> String {
    let base = name
        .rsplit(|c| c == '/' || c == '\\')
        .next()
        .unwrap_or(name);
    let cleaned = unsafe_chars().replace_all(base, "_");
    let cleaned = cleaned.trim_start_matches('.');

    let (stem, extension) = match cleaned.rsplit_once('.') {
        Some((stem, extension)) => (stem, Some(extension)),
        None => (cleaned, None),
    };
    if !stem.chars().all(|c| c == '_') {
        return cleaned.to_string();
    }

    // Stem was entirely non-ASCII, keep the extension
    match extension {
        Some(ext) if !ext.is_empty() && !ext.chars().all(|c| c == '_') => {
            format!("file.{}", ext)
        }
        _ => "file".to_string(),
    }
}

/// Storage key for one page of an episode upload batch
///
/// Example: episodes/12/1718000000000_3_9f86d081_page_04.png
pub fn image_key(episode_id: i64, timestamp_ms: i64, index: usize, file_name: &str) -> String {
    format!(
        "episodes/{}/{}_{}_{}_{}",
        episode_id,
        timestamp_ms,
        index,
        key_nonce(),
        sanitize_file_name(file_name)
    )
}

/// Eight random hex characters
fn key_nonce() -> String {
    let mut nonce = uuid::Uuid::new_v4().simple().to_string();
    nonce.truncate(8);
    nonce
}

/// Storage key for a work thumbnail
pub fn thumbnail_key(timestamp_ms: i64, file_name: &str) -> String {
    format!(
        "thumbnails/thumb_{}_{}_{}",
        timestamp_ms,
        key_nonce(),
        sanitize_file_name(file_name)
    )
}

/// Content type derived from the key's extension
pub fn content_type_for(key: &str) -> &'static str {
    let extension = key
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match extension.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "avif" => "image/avif",
        _ => "application/octet-stream",
    }
}

/// Percent-encode each `/`-separated segment of a key
fn encode_key(key: &str) -> String {
    key.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

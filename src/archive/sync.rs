use super::manager::{default_episode_title, ArchiveError, ArchiveManager, Mutation, RefreshScope};
use crate::db::{DbEpisode, DbImage, WorkId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::{info, warn};

const IMAGE_EXTENSIONS: [&str; 3] = [".jpg", ".jpeg", ".png"];

/// Register the images already stored under a folder as one episode
#[derive(Debug, Clone, Deserialize)]
pub struct FolderSync {
    pub work_id: WorkId,
    pub episode_number: i64,
    /// Used only when the episode has to be created
    pub title: Option<String>,
    /// Key prefix without the trailing slash, e.g. "AKS/001"
    pub folder: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncReport {
    pub episode: DbEpisode,
    pub created_episode: bool,
    pub images: Vec<DbImage>,
}

impl ArchiveManager {
    /// Replace an episode's images with the image files found in a folder
    ///
    /// Files directly under `folder/` ending in .jpg, .jpeg or .png (any case)
    /// are sorted by name and numbered 1..N. The episode is the first one of
    /// the work with that number, created when missing. When the folder holds
    /// no images nothing is changed.
    pub async fn sync_episode_from_folder(
        &self,
        request: FolderSync,
    ) -> Result<Mutation<SyncReport>, ArchiveError> {
        let folder = request.folder.trim().trim_matches('/');
        if folder.is_empty() {
            return Err(ArchiveError::Validation("Folder is required".to_string()));
        }
        self.get_work(request.work_id).await?;

        let prefix = format!("{}/", folder);
        let keys = self.blob_store.list(&prefix).await?;
        let image_keys = select_image_keys(&prefix, keys);

        if image_keys.is_empty() {
            let top_level = top_level_folders(self.blob_store.list("").await?);
            warn!(
                "No images under {}, top level folders: {:?}",
                prefix, top_level
            );
            return Err(ArchiveError::NotFound(format!(
                "No images found in folder '{}' (top level folders: {})",
                folder,
                top_level.join(", ")
            )));
        }

        let (episode, created_episode) = match self
            .database
            .find_episode_by_number(request.work_id, request.episode_number)
            .await?
        {
            Some(episode) => (episode, false),
            None => {
                let title = request
                    .title
                    .as_deref()
                    .map(str::trim)
                    .filter(|title| !title.is_empty())
                    .map(str::to_string)
                    .unwrap_or_else(|| default_episode_title(request.episode_number));
                let episode = self
                    .database
                    .insert_episode(request.work_id, request.episode_number, &title, None)
                    .await?;
                (episode, true)
            }
        };

        let rows: Vec<(String, String, i64)> = image_keys
            .into_iter()
            .zip(1..)
            .map(|(key, sequence)| (self.blob_store.public_url(&key), key, sequence))
            .collect();
        let images = self
            .database
            .replace_episode_images(episode.id, &rows)
            .await?;
        info!(
            "Synced {} images from {} into episode {} of work {}",
            images.len(),
            folder,
            episode.id,
            request.work_id
        );

        let episode_id = episode.id;
        let report = SyncReport {
            episode,
            created_episode,
            images,
        };
        self.mutation(report, RefreshScope::Images(episode_id)).await
    }
}

/// Image keys directly under `prefix`, sorted by file name
fn select_image_keys(prefix: &str, keys: Vec<String>) -> Vec<String> {
    let mut selected: Vec<String> = keys
        .into_iter()
        .filter(|key| {
            let Some(name) = key.strip_prefix(prefix) else {
                return false;
            };
            let lower = name.to_lowercase();
            !name.contains('/') && IMAGE_EXTENSIONS.iter().any(|ext| lower.ends_with(ext))
        })
        .collect();
    selected.sort();
    selected
}

/// First path segment of every key that sits inside a folder
fn top_level_folders(keys: Vec<String>) -> Vec<String> {
    keys.iter()
        .filter_map(|key| key.split_once('/').map(|(folder, _)| folder.to_string()))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

use super::upload::{plan_uploads, run_batch, AttachReport, BatchCancel, UploadFile, UploadOptions};
use crate::blob_store::{thumbnail_key, BlobStoreError, BlobStoreManager};
use crate::db::{
    CascadeReport, Database, DbEpisode, DbImage, DbWork, EpisodeId,
    EpisodeOrder, ImageId, SequenceEdit, WorkId,
};
use crate::navigation::{resolve_neighbors, EpisodeNavigation};
use crate::ordering::{assign_sequences, unknown_edit_targets};
use crate::tags::{self, TagDisplay, TagSearch};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Database error: {0}")]
    Store(#[from] sqlx::Error),
    #[error("Upload error: {0}")]
    Upload(#[from] BlobStoreError),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error(
        "{} of {} uploads failed",
        .0.failed.len(),
        .0.failed.len() + .0.succeeded.len()
    )]
    PartialBatch(AttachReport),
}

/// Collection to re-fetch after a mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshScope {
    Works,
    Episodes(WorkId),
    Images(EpisodeId),
}

/// Freshly fetched collection returned with every mutation
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "scope", rename_all = "snake_case")]
pub enum Refreshed {
    /// All works, id ascending
    Works { works: Vec<DbWork> },
    /// Episodes of one work, latest number first
    Episodes {
        work_id: WorkId,
        episodes: Vec<DbEpisode>,
    },
    /// Images of one episode in reading order
    Images {
        episode_id: EpisodeId,
        images: Vec<DbImage>,
    },
}

/// Result of a mutation plus the re-fetched collection it affected
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Mutation<T> {
    pub value: T,
    pub refreshed: Refreshed,
}

/// Fields for a new episode
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewEpisode {
    pub episode_number: Option<i64>,
    pub title: Option<String>,
    pub tags: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkDetail {
    pub work: DbWork,
    /// Latest episode number first
    pub episodes: Vec<DbEpisode>,
}

/// Everything the reader page shows for one episode
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReaderView {
    pub episode: DbEpisode,
    pub tags: TagDisplay,
    pub images: Vec<DbImage>,
    pub navigation: EpisodeNavigation,
}

/// One tag search match with its work and highlighted tags
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub episode: DbEpisode,
    pub work_title: String,
    pub work_thumbnail_url: Option<String>,
    pub tags: TagDisplay,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedDelete {
    pub episode_id: EpisodeId,
    pub reason: String,
}

/// Outcome of deleting several episodes of a work
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchDeleteReport {
    pub deleted: Vec<EpisodeId>,
    pub failed: Vec<FailedDelete>,
    /// Rows removed across every deleted episode
    pub removed: CascadeReport,
}

/// Orchestrates the work/episode/image lifecycle over the database and the
/// blob store
///
/// Every mutation re-fetches the collection it touched and returns it in
/// [`Mutation::refreshed`].
#[derive(Debug, Clone)]
pub struct ArchiveManager {
    pub(super) database: Database,
    pub(super) blob_store: BlobStoreManager,
    options: UploadOptions,
}

impl ArchiveManager {
    pub fn new(database: Database, blob_store: BlobStoreManager, options: UploadOptions) -> Self {
        ArchiveManager {
            database,
            blob_store,
            options,
        }
    }

    pub fn database(&self) -> &Database {
        &self.database
    }

    /// Re-fetch one collection
    pub async fn refresh(&self, scope: RefreshScope) -> Result<Refreshed, ArchiveError> {
        Ok(match scope {
            RefreshScope::Works => Refreshed::Works {
                works: self.database.get_works().await?,
            },
            RefreshScope::Episodes(work_id) => Refreshed::Episodes {
                work_id,
                episodes: self
                    .database
                    .get_episodes_for_work(work_id, EpisodeOrder::NumberDescending)
                    .await?,
            },
            RefreshScope::Images(episode_id) => Refreshed::Images {
                episode_id,
                images: self.database.get_images_for_episode(episode_id).await?,
            },
        })
    }

    pub(super) async fn mutation<T>(&self, value: T, scope: RefreshScope) -> Result<Mutation<T>, ArchiveError> {
        let refreshed = self.refresh(scope).await?;
        Ok(Mutation { value, refreshed })
    }

    // ---- Works ----

    /// Register a new work, uploading its thumbnail first when one is given
    pub async fn create_work(
        &self,
        title: &str,
        thumbnail: Option<UploadFile>,
    ) -> Result<Mutation<DbWork>, ArchiveError> {
        let title = title.trim();
        if title.is_empty() {
            return Err(ArchiveError::Validation("Work title is required".to_string()));
        }

        let thumbnail_url = match thumbnail {
            Some(file) => Some(self.upload_thumbnail(&file).await?),
            None => None,
        };

        let work = self
            .database
            .insert_work(title, thumbnail_url.as_deref())
            .await?;
        info!("Created work {} ({})", work.id, work.title);

        self.mutation(work, RefreshScope::Works).await
    }

    /// Upload a new thumbnail and point the work at it
    pub async fn replace_thumbnail(
        &self,
        work_id: WorkId,
        file: UploadFile,
    ) -> Result<Mutation<DbWork>, ArchiveError> {
        self.get_work(work_id).await?;

        let thumbnail_url = self.upload_thumbnail(&file).await?;
        if self
            .database
            .update_work_thumbnail(work_id, &thumbnail_url)
            .await?
            == 0
        {
            return Err(work_not_found(work_id));
        }
        info!("Replaced thumbnail of work {}", work_id);

        let work = self.get_work(work_id).await?;
        self.mutation(work, RefreshScope::Works).await
    }

    async fn upload_thumbnail(&self, file: &UploadFile) -> Result<String, ArchiveError> {
        let key = thumbnail_key(Utc::now().timestamp_millis(), &file.name);
        debug!("Uploading thumbnail {}", key);
        Ok(self.blob_store.upload(&key, &file.bytes).await?)
    }

    /// Delete a work with all its episodes and images
    pub async fn delete_work(
        &self,
        work_id: WorkId,
    ) -> Result<Mutation<CascadeReport>, ArchiveError> {
        let report = self.database.delete_work_cascade(work_id).await?;
        if report.works == 0 {
            return Err(work_not_found(work_id));
        }
        info!(
            "Deleted work {} ({} episodes, {} images)",
            work_id, report.episodes, report.images
        );

        self.mutation(report, RefreshScope::Works).await
    }

    // ---- Episodes ----

    /// Create an episode of a work
    ///
    /// The title defaults to "{number}화" and blank tags are stored as none.
    pub async fn create_episode(
        &self,
        work_id: WorkId,
        episode: NewEpisode,
    ) -> Result<Mutation<DbEpisode>, ArchiveError> {
        let episode_number = episode
            .episode_number
            .ok_or_else(|| ArchiveError::Validation("Episode number is required".to_string()))?;
        self.get_work(work_id).await?;

        let title = match episode.title.as_deref().map(str::trim) {
            Some(title) if !title.is_empty() => title.to_string(),
            _ => default_episode_title(episode_number),
        };
        let tags = episode
            .tags
            .as_deref()
            .map(str::trim)
            .filter(|tags| !tags.is_empty());

        let created = self
            .database
            .insert_episode(work_id, episode_number, &title, tags)
            .await?;
        info!(
            "Created episode {} (#{}) of work {}",
            created.id, episode_number, work_id
        );

        self.mutation(created, RefreshScope::Episodes(work_id)).await
    }

    /// Delete an episode and its images
    pub async fn delete_episode(
        &self,
        episode_id: EpisodeId,
    ) -> Result<Mutation<CascadeReport>, ArchiveError> {
        let episode = self.get_episode(episode_id).await?;

        let report = self.database.delete_episode_cascade(episode_id).await?;
        if report.episodes == 0 {
            return Err(episode_not_found(episode_id));
        }
        info!(
            "Deleted episode {} of work {} ({} images)",
            episode_id, episode.work_id, report.images
        );

        self.mutation(report, RefreshScope::Episodes(episode.work_id))
            .await
    }

    /// Delete several episodes of one work
    ///
    /// Each episode is removed in its own transaction. Ids that do not exist
    /// or belong to another work are reported as failed.
    pub async fn delete_episodes(
        &self,
        work_id: WorkId,
        episode_ids: &[EpisodeId],
    ) -> Result<Mutation<BatchDeleteReport>, ArchiveError> {
        if episode_ids.is_empty() {
            return Err(ArchiveError::Validation(
                "No episodes selected for deletion".to_string(),
            ));
        }
        self.get_work(work_id).await?;

        let mut report = BatchDeleteReport::default();
        for &episode_id in episode_ids {
            match self.delete_episode_of_work(work_id, episode_id).await {
                Ok(removed) => {
                    report.deleted.push(episode_id);
                    report.removed.episodes += removed.episodes;
                    report.removed.images += removed.images;
                }
                Err(e) => {
                    warn!("Failed to delete episode {}: {}", episode_id, e);
                    report.failed.push(FailedDelete {
                        episode_id,
                        reason: e.to_string(),
                    });
                }
            }
        }
        info!(
            "Deleted {} of {} episodes from work {}",
            report.deleted.len(),
            episode_ids.len(),
            work_id
        );

        self.mutation(report, RefreshScope::Episodes(work_id)).await
    }

    async fn delete_episode_of_work(
        &self,
        work_id: WorkId,
        episode_id: EpisodeId,
    ) -> Result<CascadeReport, ArchiveError> {
        match self.database.get_episode_by_id(episode_id).await? {
            Some(episode) if episode.work_id == work_id => {}
            _ => return Err(episode_not_found(episode_id)),
        }
        let removed = self.database.delete_episode_cascade(episode_id).await?;
        if removed.episodes == 0 {
            return Err(episode_not_found(episode_id));
        }
        Ok(removed)
    }

    // ---- Images ----

    /// Upload files to an episode, appending them after its current last image
    ///
    /// Files keep their submitted order: the first file gets the lowest new
    /// sequence. Failures are reported per file in the returned report.
    pub async fn attach_images(
        &self,
        episode_id: EpisodeId,
        files: Vec<UploadFile>,
        cancel: BatchCancel,
    ) -> Result<Mutation<AttachReport>, ArchiveError> {
        if files.is_empty() {
            return Err(ArchiveError::Validation(
                "At least one file is required".to_string(),
            ));
        }
        self.get_episode(episode_id).await?;

        let existing = self.database.get_images_for_episode(episode_id).await?;
        let total = files.len();
        let sequenced = assign_sequences(&existing, files).ok_or_else(|| {
            ArchiveError::Validation(format!(
                "Episode {} has no sequence numbers left after its last image",
                episode_id
            ))
        })?;
        let planned = plan_uploads(episode_id, Utc::now().timestamp_millis(), sequenced);

        let report = run_batch(
            &self.database,
            &self.blob_store,
            episode_id,
            planned,
            self.options,
            cancel,
        )
        .await;

        if report.is_complete() {
            info!("Attached {} images to episode {}", total, episode_id);
        } else {
            warn!(
                "Attached {} of {} images to episode {}",
                report.succeeded.len(),
                total,
                episode_id
            );
        }

        self.mutation(report, RefreshScope::Images(episode_id)).await
    }

    /// Persist new sequence values for images of an episode
    ///
    /// Values are arbitrary integers. Every edit must target an image of the
    /// episode, otherwise nothing is changed.
    pub async fn reorder_images(
        &self,
        episode_id: EpisodeId,
        edits: &[SequenceEdit],
    ) -> Result<Mutation<Vec<DbImage>>, ArchiveError> {
        self.get_episode(episode_id).await?;

        let images = self.database.get_images_for_episode(episode_id).await?;
        let unknown = unknown_edit_targets(&images, edits);
        if !unknown.is_empty() {
            return Err(ArchiveError::NotFound(format!(
                "Images {:?} are not part of episode {}",
                unknown, episode_id
            )));
        }

        if !edits.is_empty() {
            match self.database.update_image_sequences(episode_id, edits).await {
                Ok(()) => {}
                Err(sqlx::Error::RowNotFound) => {
                    return Err(ArchiveError::NotFound(format!(
                        "Image removed from episode {} during reorder",
                        episode_id
                    )));
                }
                Err(e) => return Err(e.into()),
            }
            info!("Reordered {} images of episode {}", edits.len(), episode_id);
        }

        let reordered = self.database.get_images_for_episode(episode_id).await?;
        self.mutation(reordered, RefreshScope::Images(episode_id))
            .await
    }

    /// Delete a single image; the rest keep their sequences
    pub async fn delete_image(
        &self,
        image_id: ImageId,
    ) -> Result<Mutation<CascadeReport>, ArchiveError> {
        let image = self.get_image(image_id).await?;

        let images = self.database.delete_image(image_id).await?;
        if images == 0 {
            return Err(image_not_found(image_id));
        }
        info!("Deleted image {} of episode {}", image_id, image.episode_id);

        let report = CascadeReport {
            images,
            ..CascadeReport::default()
        };
        self.mutation(report, RefreshScope::Images(image.episode_id))
            .await
    }

    // ---- Reads ----

    /// All works, oldest first
    pub async fn list_works(&self) -> Result<Vec<DbWork>, ArchiveError> {
        Ok(self.database.get_works().await?)
    }

    pub async fn get_work(&self, work_id: WorkId) -> Result<DbWork, ArchiveError> {
        self.database
            .get_work_by_id(work_id)
            .await?
            .ok_or_else(|| work_not_found(work_id))
    }

    pub async fn get_episode(&self, episode_id: EpisodeId) -> Result<DbEpisode, ArchiveError> {
        self.database
            .get_episode_by_id(episode_id)
            .await?
            .ok_or_else(|| episode_not_found(episode_id))
    }

    pub async fn get_image(&self, image_id: ImageId) -> Result<DbImage, ArchiveError> {
        self.database
            .get_image_by_id(image_id)
            .await?
            .ok_or_else(|| image_not_found(image_id))
    }

    /// A work with its episodes, latest number first
    pub async fn work_detail(&self, work_id: WorkId) -> Result<WorkDetail, ArchiveError> {
        let work = self.get_work(work_id).await?;
        let episodes = self
            .database
            .get_episodes_for_work(work_id, EpisodeOrder::NumberDescending)
            .await?;
        Ok(WorkDetail { work, episodes })
    }

    /// Episodes of a work, most recently created first
    ///
    /// Backs the admin episode list that bulk deletes are picked from.
    pub async fn admin_episodes(&self, work_id: WorkId) -> Result<WorkDetail, ArchiveError> {
        let work = self.get_work(work_id).await?;
        let episodes = self
            .database
            .get_episodes_for_work(work_id, EpisodeOrder::NewestFirst)
            .await?;
        Ok(WorkDetail { work, episodes })
    }

    /// Previous and next episode of `episode_id` within `work_id`
    ///
    /// Unknown ids resolve to no neighbors instead of an error.
    pub async fn resolve_neighbors(
        &self,
        work_id: WorkId,
        episode_id: EpisodeId,
    ) -> Result<EpisodeNavigation, ArchiveError> {
        let work = self.database.get_work_by_id(work_id).await?;
        let episodes = self
            .database
            .get_episodes_for_work(work_id, EpisodeOrder::NumberAscending)
            .await?;

        let neighbors = resolve_neighbors(&episodes, episode_id);
        Ok(EpisodeNavigation {
            previous: neighbors.previous,
            next: neighbors.next,
            title: episodes
                .iter()
                .find(|episode| episode.id == episode_id)
                .map(|episode| episode.title.clone()),
            work_title: work.map(|work| work.title),
        })
    }

    /// Episode, images in reading order and navigation for the reader page
    pub async fn reader_view(&self, episode_id: EpisodeId) -> Result<ReaderView, ArchiveError> {
        let episode = self.get_episode(episode_id).await?;
        let images = self.database.get_images_for_episode(episode_id).await?;
        let navigation = self.resolve_neighbors(episode.work_id, episode_id).await?;

        Ok(ReaderView {
            tags: tags::display_tags(episode.tags.as_deref(), None),
            episode,
            images,
            navigation,
        })
    }

    /// Episodes whose tags contain `query`, newest first
    pub async fn search_by_tag(&self, query: &str) -> Result<TagSearch<SearchHit>, ArchiveError> {
        if tags::normalize_query(query).is_none() {
            return Ok(TagSearch::Inactive);
        }

        let candidates = self.database.get_tagged_episodes().await?;
        let result = tags::search(candidates, query, |entry| entry.episode.tags.as_deref());

        Ok(match result {
            TagSearch::Inactive => TagSearch::Inactive,
            TagSearch::Results { query, matches } => {
                debug!("Tag search {:?} matched {} episodes", query, matches.len());
                let matches = matches
                    .into_iter()
                    .map(|entry| SearchHit {
                        tags: tags::display_tags(entry.episode.tags.as_deref(), Some(query.as_str())),
                        episode: entry.episode,
                        work_title: entry.work_title,
                        work_thumbnail_url: entry.work_thumbnail_url,
                    })
                    .collect();
                TagSearch::Results { query, matches }
            }
        })
    }
}

pub(super) fn default_episode_title(episode_number: i64) -> String {
    format!("{}화", episode_number)
}

pub(super) fn work_not_found(work_id: WorkId) -> ArchiveError {
    ArchiveError::NotFound(format!("Work {} not found", work_id))
}

pub(super) fn episode_not_found(episode_id: EpisodeId) -> ArchiveError {
    ArchiveError::NotFound(format!("Episode {} not found", episode_id))
}

fn image_not_found(image_id: ImageId) -> ArchiveError {
    ArchiveError::NotFound(format!("Image {} not found", image_id))
}

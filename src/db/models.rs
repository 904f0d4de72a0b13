use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type WorkId = i64;
pub type EpisodeId = i64;
pub type ImageId = i64;

/// Database models for the kirin archive
///
/// The archive is a three level hierarchy:
/// - Works (a comic series)
/// - Episodes (numbered units within a work)
/// - Images (ordered pages/cuts within an episode)
///
/// Ids are SQLite rowids, so ascending id is insertion order.
///
/// A work (comic series)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DbWork {
    pub id: WorkId,
    /// Never empty, stored trimmed
    pub title: String,
    /// Public URL of the cover image, if one was uploaded
    pub thumbnail_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// An episode within a work
///
/// `episode_number` is not unique within a work. Duplicate numbers are kept
/// and ordered by id wherever episodes are sorted by number.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DbEpisode {
    pub id: EpisodeId,
    pub work_id: WorkId,
    pub episode_number: i64,
    pub title: String,
    /// Whitespace separated tag tokens, e.g. "#action #prologue"
    pub tags: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// One page/cut of an episode
///
/// Reading order is ascending `sequence`, ties broken by ascending `id`.
/// Sequences are not required to be contiguous.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DbImage {
    pub id: ImageId,
    pub episode_id: EpisodeId,
    pub image_url: String,
    /// Blob store key the image bytes were uploaded under
    pub storage_key: String,
    pub sequence: i64,
    pub created_at: DateTime<Utc>,
}

/// Episode joined with the work it belongs to, used for tag search results
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DbEpisodeWithWork {
    pub episode: DbEpisode,
    pub work_title: String,
    pub work_thumbnail_url: Option<String>,
}

/// Number of rows removed by a cascading delete
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CascadeReport {
    pub works: u64,
    pub episodes: u64,
    pub images: u64,
}

/// New sequence value for one image, as submitted by a reorder
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct SequenceEdit {
    pub image_id: ImageId,
    pub sequence: i64,
}

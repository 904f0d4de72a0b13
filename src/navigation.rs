//! Previous/next episode resolution within a work

use crate::db::{DbEpisode, EpisodeId};
use serde::Serialize;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Neighbors {
    pub previous: Option<EpisodeId>,
    pub next: Option<EpisodeId>,
}

/// Neighbors of an episode plus the titles the reader header shows
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EpisodeNavigation {
    pub previous: Option<EpisodeId>,
    pub next: Option<EpisodeId>,
    pub title: Option<String>,
    pub work_title: Option<String>,
}

/// Sort episodes into reading order: `episode_number`, then id
pub fn sort_navigation_order(episodes: &mut [DbEpisode]) {
    episodes.sort_by_key(|episode| (episode.episode_number, episode.id));
}

/// Find the episodes before and after `episode_id`
///
/// `episodes` must already be in reading order. An id that is not in the list
/// has no neighbors.
pub fn resolve_neighbors(episodes: &[DbEpisode], episode_id: EpisodeId) -> Neighbors {
    let Some(index) = episodes.iter().position(|e| e.id == episode_id) else {
        return Neighbors::default();
    };

    Neighbors {
        previous: index.checked_sub(1).map(|i| episodes[i].id),
        next: episodes.get(index + 1).map(|e| e.id),
    }
}

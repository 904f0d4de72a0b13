mod client;
mod models;

pub use client::{Database, EpisodeOrder};
pub use models::*;

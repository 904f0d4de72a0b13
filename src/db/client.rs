use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use std::str::FromStr;
use tracing::{debug, info};

use crate::db::models::*;

/// Sort orders used when listing a work's episodes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EpisodeOrder {
    /// Reading order, used for prev/next navigation
    NumberAscending,
    /// Latest episode first, used for the work detail listing
    NumberDescending,
    /// Most recently created first, used by the admin episode list
    NewestFirst,
}

impl EpisodeOrder {
    fn order_by(&self) -> &'static str {
        match self {
            EpisodeOrder::NumberAscending => "episode_number ASC, id ASC",
            EpisodeOrder::NumberDescending => "episode_number DESC, id DESC",
            EpisodeOrder::NewestFirst => "id DESC",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Initialize database connection and create tables
    pub async fn new(database_path: &str) -> Result<Self, sqlx::Error> {
        let database_url = format!("sqlite://{}", database_path);
        info!("Connecting to {}", database_url);

        // Parent rows can only be removed after their children, see delete_work_cascade
        let options = SqliteConnectOptions::from_str(&database_url)?
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new().connect_with(options).await?;

        let db = Database { pool };
        db.create_tables().await?;
        Ok(db)
    }

    /// Create all necessary tables
    async fn create_tables(&self) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS works (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                title TEXT NOT NULL,
                thumbnail_url TEXT,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // No UNIQUE(work_id, episode_number): duplicate numbers are allowed
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS episodes (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                work_id INTEGER NOT NULL,
                episode_number INTEGER NOT NULL,
                title TEXT NOT NULL,
                tags TEXT,
                created_at TEXT NOT NULL,
                FOREIGN KEY (work_id) REFERENCES works (id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS images (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                episode_id INTEGER NOT NULL,
                image_url TEXT NOT NULL,
                storage_key TEXT NOT NULL,
                sequence INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                FOREIGN KEY (episode_id) REFERENCES episodes (id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_episodes_work_id ON episodes (work_id)")
            .execute(&self.pool)
            .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_images_episode_id ON images (episode_id)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Insert a new work
    pub async fn insert_work(
        &self,
        title: &str,
        thumbnail_url: Option<&str>,
    ) -> Result<DbWork, sqlx::Error> {
        let created_at = Utc::now();
        let result = sqlx::query(
            r#"
            INSERT INTO works (title, thumbnail_url, created_at)
            VALUES (?, ?, ?)
            "#,
        )
        .bind(title)
        .bind(thumbnail_url)
        .bind(created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(DbWork {
            id: result.last_insert_rowid(),
            title: title.to_string(),
            thumbnail_url: thumbnail_url.map(str::to_string),
            created_at,
        })
    }

    /// Get all works, oldest first
    pub async fn get_works(&self) -> Result<Vec<DbWork>, sqlx::Error> {
        let rows = sqlx::query("SELECT * FROM works ORDER BY id ASC")
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(work_from_row).collect()
    }

    /// Get work by ID
    pub async fn get_work_by_id(&self, work_id: WorkId) -> Result<Option<DbWork>, sqlx::Error> {
        let row = sqlx::query("SELECT * FROM works WHERE id = ?")
            .bind(work_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(work_from_row).transpose()
    }

    /// Replace the thumbnail URL of a work, returns the number of rows updated
    pub async fn update_work_thumbnail(
        &self,
        work_id: WorkId,
        thumbnail_url: &str,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("UPDATE works SET thumbnail_url = ? WHERE id = ?")
            .bind(thumbnail_url)
            .bind(work_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Insert a new episode
    pub async fn insert_episode(
        &self,
        work_id: WorkId,
        episode_number: i64,
        title: &str,
        tags: Option<&str>,
    ) -> Result<DbEpisode, sqlx::Error> {
        let created_at = Utc::now();
        let result = sqlx::query(
            r#"
            INSERT INTO episodes (work_id, episode_number, title, tags, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(work_id)
        .bind(episode_number)
        .bind(title)
        .bind(tags)
        .bind(created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(DbEpisode {
            id: result.last_insert_rowid(),
            work_id,
            episode_number,
            title: title.to_string(),
            tags: tags.map(str::to_string),
            created_at,
        })
    }

    /// Get an episode by ID
    pub async fn get_episode_by_id(
        &self,
        episode_id: EpisodeId,
    ) -> Result<Option<DbEpisode>, sqlx::Error> {
        let row = sqlx::query("SELECT * FROM episodes WHERE id = ?")
            .bind(episode_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(episode_from_row).transpose()
    }

    /// Get all episodes of a work in the requested order
    pub async fn get_episodes_for_work(
        &self,
        work_id: WorkId,
        order: EpisodeOrder,
    ) -> Result<Vec<DbEpisode>, sqlx::Error> {
        let rows = sqlx::query(&format!(
            "SELECT * FROM episodes WHERE work_id = ? ORDER BY {}",
            order.order_by()
        ))
        .bind(work_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(episode_from_row).collect()
    }

    /// Find the first episode (lowest id) of a work with the given number
    pub async fn find_episode_by_number(
        &self,
        work_id: WorkId,
        episode_number: i64,
    ) -> Result<Option<DbEpisode>, sqlx::Error> {
        let row = sqlx::query(
            "SELECT * FROM episodes WHERE work_id = ? AND episode_number = ? ORDER BY id ASC LIMIT 1",
        )
        .bind(work_id)
        .bind(episode_number)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(episode_from_row).transpose()
    }

    /// Get every episode that has tags, joined with its work, newest first
    ///
    /// Matching against the query happens in `crate::tags`, this only narrows
    /// the scan to episodes that could match at all.
    pub async fn get_tagged_episodes(&self) -> Result<Vec<DbEpisodeWithWork>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT
                e.id, e.work_id, e.episode_number, e.title, e.tags, e.created_at,
                w.title AS work_title, w.thumbnail_url AS work_thumbnail_url
            FROM episodes e
            JOIN works w ON w.id = e.work_id
            WHERE e.tags IS NOT NULL
            ORDER BY e.id DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(DbEpisodeWithWork {
                    episode: episode_from_row(row)?,
                    work_title: row.try_get("work_title")?,
                    work_thumbnail_url: row.try_get("work_thumbnail_url")?,
                })
            })
            .collect()
    }

    /// Insert a new image
    pub async fn insert_image(
        &self,
        episode_id: EpisodeId,
        image_url: &str,
        storage_key: &str,
        sequence: i64,
    ) -> Result<DbImage, sqlx::Error> {
        let created_at = Utc::now();
        let result = sqlx::query(
            r#"
            INSERT INTO images (episode_id, image_url, storage_key, sequence, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(episode_id)
        .bind(image_url)
        .bind(storage_key)
        .bind(sequence)
        .bind(created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(DbImage {
            id: result.last_insert_rowid(),
            episode_id,
            image_url: image_url.to_string(),
            storage_key: storage_key.to_string(),
            sequence,
            created_at,
        })
    }

    /// Get an image by ID
    pub async fn get_image_by_id(&self, image_id: ImageId) -> Result<Option<DbImage>, sqlx::Error> {
        let row = sqlx::query("SELECT * FROM images WHERE id = ?")
            .bind(image_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(image_from_row).transpose()
    }

    /// Get the images of an episode in reading order
    pub async fn get_images_for_episode(
        &self,
        episode_id: EpisodeId,
    ) -> Result<Vec<DbImage>, sqlx::Error> {
        let rows =
            sqlx::query("SELECT * FROM images WHERE episode_id = ? ORDER BY sequence ASC, id ASC")
                .bind(episode_id)
                .fetch_all(&self.pool)
                .await?;

        rows.iter().map(image_from_row).collect()
    }

    /// Persist a batch of sequence edits in a single transaction
    ///
    /// Every edit must target an image of `episode_id`. If any does not, the
    /// whole batch is rolled back and `RowNotFound` is returned.
    pub async fn update_image_sequences(
        &self,
        episode_id: EpisodeId,
        edits: &[SequenceEdit],
    ) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        for edit in edits {
            let result = sqlx::query("UPDATE images SET sequence = ? WHERE id = ? AND episode_id = ?")
                .bind(edit.sequence)
                .bind(edit.image_id)
                .bind(episode_id)
                .execute(&mut *tx)
                .await?;

            if result.rows_affected() == 0 {
                tx.rollback().await?;
                return Err(sqlx::Error::RowNotFound);
            }
        }

        tx.commit().await?;
        debug!(
            "Updated {} image sequences for episode {}",
            edits.len(),
            episode_id
        );
        Ok(())
    }

    /// Replace all images of an episode in a single transaction
    ///
    /// Each entry is `(image_url, storage_key, sequence)`.
    pub async fn replace_episode_images(
        &self,
        episode_id: EpisodeId,
        images: &[(String, String, i64)],
    ) -> Result<Vec<DbImage>, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM images WHERE episode_id = ?")
            .bind(episode_id)
            .execute(&mut *tx)
            .await?;

        let created_at = Utc::now();
        let mut inserted = Vec::with_capacity(images.len());
        for (image_url, storage_key, sequence) in images {
            let result = sqlx::query(
                r#"
                INSERT INTO images (episode_id, image_url, storage_key, sequence, created_at)
                VALUES (?, ?, ?, ?, ?)
                "#,
            )
            .bind(episode_id)
            .bind(image_url)
            .bind(storage_key)
            .bind(sequence)
            .bind(created_at.to_rfc3339())
            .execute(&mut *tx)
            .await?;

            inserted.push(DbImage {
                id: result.last_insert_rowid(),
                episode_id,
                image_url: image_url.clone(),
                storage_key: storage_key.clone(),
                sequence: *sequence,
                created_at,
            });
        }

        tx.commit().await?;
        Ok(inserted)
    }

    /// Delete a single image, returns the number of rows removed
    ///
    /// Remaining images keep their sequences.
    pub async fn delete_image(&self, image_id: ImageId) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM images WHERE id = ?")
            .bind(image_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Delete an episode and its images in one transaction
    pub async fn delete_episode_cascade(
        &self,
        episode_id: EpisodeId,
    ) -> Result<CascadeReport, sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        let report = delete_episode_tree(&mut tx, episode_id).await?;
        tx.commit().await?;
        Ok(report)
    }

    /// Delete a work, its episodes and their images in one transaction
    ///
    /// Children are removed before parents:
    /// - Images of every episode of the work
    /// - Episodes of the work
    /// - The work itself
    pub async fn delete_work_cascade(&self, work_id: WorkId) -> Result<CascadeReport, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        let images = sqlx::query(
            "DELETE FROM images WHERE episode_id IN (SELECT id FROM episodes WHERE work_id = ?)",
        )
        .bind(work_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        let episodes = sqlx::query("DELETE FROM episodes WHERE work_id = ?")
            .bind(work_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        let works = sqlx::query("DELETE FROM works WHERE id = ?")
            .bind(work_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        tx.commit().await?;
        Ok(CascadeReport {
            works,
            episodes,
            images,
        })
    }
}

async fn delete_episode_tree(
    tx: &mut Transaction<'_, Sqlite>,
    episode_id: EpisodeId,
) -> Result<CascadeReport, sqlx::Error> {
    let images = sqlx::query("DELETE FROM images WHERE episode_id = ?")
        .bind(episode_id)
        .execute(&mut **tx)
        .await?
        .rows_affected();

    let episodes = sqlx::query("DELETE FROM episodes WHERE id = ?")
        .bind(episode_id)
        .execute(&mut **tx)
        .await?
        .rows_affected();

    Ok(CascadeReport {
        works: 0,
        episodes,
        images,
    })
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, sqlx::Error> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| sqlx::Error::Decode(Box::new(e)))
}

fn work_from_row(row: &SqliteRow) -> Result<DbWork, sqlx::Error> {
    Ok(DbWork {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        thumbnail_url: row.try_get("thumbnail_url")?,
        created_at: parse_timestamp(&row.try_get::<String, _>("created_at")?)?,
    })
}

fn episode_from_row(row: &SqliteRow) -> Result<DbEpisode, sqlx::Error> {
    Ok(DbEpisode {
        id: row.try_get("id")?,
        work_id: row.try_get("work_id")?,
        episode_number: row.try_get("episode_number")?,
        title: row.try_get("title")?,
        tags: row.try_get("tags")?,
        created_at: parse_timestamp(&row.try_get::<String, _>("created_at")?)?,
    })
}

fn image_from_row(row: &SqliteRow) -> Result<DbImage, sqlx::Error> {
    Ok(DbImage {
        id: row.try_get("id")?,
        episode_id: row.try_get("episode_id")?,
        image_url: row.try_get("image_url")?,
        storage_key: row.try_get("storage_key")?,
        sequence: row.try_get("sequence")?,
        created_at: parse_timestamp(&row.try_get::<String, _>("created_at")?)?,
    })
}

//! MySQL command ports backed by a shared `sqlx` pool.
//!
//! Expects tables `likes (video_id, user_id, created_at)` with a unique key
//! on `(video_id, user_id)`, `comments (id, video_id, user_id, content,
//! created_at)` and `videos (user_id, video_url, title, created_at)`.

use async_trait::async_trait;
use sqlx::mysql::{MySqlDatabaseError, MySqlPool, MySqlPoolOptions};
use std::time::Duration;
use tracing::{debug, info};

use crate::command::{
    Comment, CommentCommand, Like, LikeCommand, StoreError, Video, VideoCommand,
};
use crate::config::StoreConfig;

/// One pool shared by all three command ports. Cheap to clone.
#[derive(Debug, Clone)]
pub struct MySqlStore {
    pool: MySqlPool,
}

impl MySqlStore {
    /// Open the pool and verify the database is reachable.
    pub async fn connect(config: &StoreConfig) -> Result<Self, StoreError> {
        info!(
            max_connections = config.max_connections,
            acquire_timeout_ms = config.acquire_timeout_ms,
            "Creating MySQL pool"
        );

        let pool = MySqlPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_millis(config.acquire_timeout_ms))
            .connect(&config.url)
            .await
            .map_err(store_error)?;

        Ok(Self { pool })
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// Map a driver error onto the store taxonomy, keeping MySQL error numbers.
fn store_error(err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db) => match db.try_downcast_ref::<MySqlDatabaseError>() {
            Some(mysql) => StoreError::database(mysql.number(), mysql.message()),
            None => StoreError::Other(db.to_string()),
        },
        sqlx::Error::PoolTimedOut => {
            StoreError::Timeout("timed out acquiring a connection".to_string())
        }
        sqlx::Error::PoolClosed => StoreError::Connection("pool closed".to_string()),
        sqlx::Error::Io(e) => StoreError::Connection(e.to_string()),
        other => StoreError::Other(other.to_string()),
    }
}

#[async_trait]
impl LikeCommand for MySqlStore {
    async fn insert(&self, like: &Like) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO likes (video_id, user_id, created_at) VALUES (?, ?, ?)")
            .bind(like.video_id)
            .bind(like.user_id)
            .bind(like.created_at)
            .execute(&self.pool)
            .await
            .map_err(store_error)?;
        Ok(())
    }

    async fn delete(&self, video_id: i64, user_id: i64) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM likes WHERE video_id = ? AND user_id = ?")
            .bind(video_id)
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(store_error)?;

        if result.rows_affected() == 0 {
            debug!(video_id, user_id, "No like to delete");
        }
        Ok(())
    }
}

#[async_trait]
impl CommentCommand for MySqlStore {
    async fn insert(&self, comment: &Comment) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO comments (id, video_id, user_id, content, created_at) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(comment.id)
        .bind(comment.video_id)
        .bind(comment.user_id)
        .bind(&comment.content)
        .bind(comment.created_at)
        .execute(&self.pool)
        .await
        .map_err(store_error)?;
        Ok(())
    }

    async fn delete(&self, id: i64, user_id: i64, video_id: i64) -> Result<(), StoreError> {
        let result =
            sqlx::query("DELETE FROM comments WHERE id = ? AND user_id = ? AND video_id = ?")
                .bind(id)
                .bind(user_id)
                .bind(video_id)
                .execute(&self.pool)
                .await
                .map_err(store_error)?;

        if result.rows_affected() == 0 {
            debug!(id, user_id, video_id, "No matching comment to delete");
        }
        Ok(())
    }
}

#[async_trait]
impl VideoCommand for MySqlStore {
    async fn insert(&self, video: &Video) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO videos (user_id, video_url, title, created_at) VALUES (?, ?, ?, ?)")
            .bind(video.user_id)
            .bind(&video.video_url)
            .bind(&video.title)
            .bind(video.created_at)
            .execute(&self.pool)
            .await
            .map_err(store_error)?;
        Ok(())
    }
}

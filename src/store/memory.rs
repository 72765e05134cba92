//! In-memory command ports.
//!
//! Mirrors the uniqueness rules of the relational schema so that redelivered
//! inserts fail with the same duplicate-key code a real database returns.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

use crate::classify::DUPLICATE_KEY;
use crate::command::{
    Comment, CommentCommand, Like, LikeCommand, StoreError, Video, VideoCommand,
};

#[derive(Default)]
struct Tables {
    /// keyed by (video_id, user_id)
    likes: HashMap<(i64, i64), Like>,
    comments: HashMap<i64, Comment>,
    videos: Vec<Video>,
    video_urls: HashSet<String>,
}

/// Thread-safe in-memory store backing all three command ports.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> Result<MutexGuard<'_, Tables>, StoreError> {
        self.tables
            .lock()
            .map_err(|_| StoreError::Other("memory store poisoned".to_string()))
    }

    pub fn like_count(&self) -> usize {
        self.tables().map(|t| t.likes.len()).unwrap_or(0)
    }

    pub fn comment_count(&self) -> usize {
        self.tables().map(|t| t.comments.len()).unwrap_or(0)
    }

    pub fn videos(&self) -> Vec<Video> {
        self.tables().map(|t| t.videos.clone()).unwrap_or_default()
    }

    pub fn has_like(&self, video_id: i64, user_id: i64) -> bool {
        self.tables()
            .map(|t| t.likes.contains_key(&(video_id, user_id)))
            .unwrap_or(false)
    }
}

fn duplicate(key: impl std::fmt::Display, index: &str) -> StoreError {
    StoreError::database(
        DUPLICATE_KEY,
        format!("Duplicate entry '{key}' for key '{index}'"),
    )
}

#[async_trait]
impl LikeCommand for MemoryStore {
    async fn insert(&self, like: &Like) -> Result<(), StoreError> {
        let mut tables = self.tables()?;
        let key = (like.video_id, like.user_id);
        if tables.likes.contains_key(&key) {
            return Err(duplicate(
                format!("{}-{}", like.video_id, like.user_id),
                "likes.video_user",
            ));
        }
        tables.likes.insert(key, like.clone());
        Ok(())
    }

    async fn delete(&self, video_id: i64, user_id: i64) -> Result<(), StoreError> {
        if self.tables()?.likes.remove(&(video_id, user_id)).is_none() {
            debug!(video_id, user_id, "No like to delete");
        }
        Ok(())
    }
}

#[async_trait]
impl CommentCommand for MemoryStore {
    async fn insert(&self, comment: &Comment) -> Result<(), StoreError> {
        let mut tables = self.tables()?;
        if tables.comments.contains_key(&comment.id) {
            return Err(duplicate(comment.id, "PRIMARY"));
        }
        tables.comments.insert(comment.id, comment.clone());
        Ok(())
    }

    async fn delete(&self, id: i64, user_id: i64, video_id: i64) -> Result<(), StoreError> {
        let mut tables = self.tables()?;
        let owned = tables
            .comments
            .get(&id)
            .is_some_and(|c| c.user_id == user_id && c.video_id == video_id);
        if owned {
            tables.comments.remove(&id);
        } else {
            debug!(id, user_id, video_id, "No matching comment to delete");
        }
        Ok(())
    }
}

#[async_trait]
impl VideoCommand for MemoryStore {
    async fn insert(&self, video: &Video) -> Result<(), StoreError> {
        let mut tables = self.tables()?;
        if !tables.video_urls.insert(video.video_url.clone()) {
            return Err(duplicate(&video.video_url, "videos.video_url"));
        }
        tables.videos.push(video.clone());
        Ok(())
    }
}

//! Command ports: the write-only seam into persistence.
//!
//! Topic handlers depend on these traits only. Implementations must be safe
//! for concurrent calls from many in-flight deliveries without any locking
//! done by the caller; see [`crate::store`] for the shipped adapters.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Persistence failures, as seen by the dispatch layer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The relational store answered with an error number
    #[error("database error {code}: {message}")]
    Database { code: u16, message: String },

    /// No connection could be obtained in time
    #[error("store timed out: {0}")]
    Timeout(String),

    /// Network or pool failure
    #[error("store connection failed: {0}")]
    Connection(String),

    #[error("store error: {0}")]
    Other(String),
}

impl StoreError {
    pub fn database(code: u16, message: impl Into<String>) -> Self {
        Self::Database {
            code,
            message: message.into(),
        }
    }

    /// Error number reported by the relational store, if any.
    pub fn code(&self) -> Option<u16> {
        match self {
            Self::Database { code, .. } => Some(*code),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Like {
    pub video_id: i64,
    pub user_id: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Comment {
    pub id: i64,
    pub video_id: i64,
    pub user_id: i64,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Video {
    pub user_id: i64,
    pub video_url: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait LikeCommand: Send + Sync {
    async fn insert(&self, like: &Like) -> Result<(), StoreError>;

    /// Remove the like of `user_id` on `video_id`.
    async fn delete(&self, video_id: i64, user_id: i64) -> Result<(), StoreError>;
}

#[async_trait]
pub trait CommentCommand: Send + Sync {
    async fn insert(&self, comment: &Comment) -> Result<(), StoreError>;

    /// Remove comment `id`, scoped to its author and video.
    async fn delete(&self, id: i64, user_id: i64, video_id: i64) -> Result<(), StoreError>;
}

#[async_trait]
pub trait VideoCommand: Send + Sync {
    async fn insert(&self, video: &Video) -> Result<(), StoreError>;
}

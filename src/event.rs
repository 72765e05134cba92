//! Event envelopes and their wire codecs.
//!
//! Each topic carries one JSON envelope kind. Producers and this subscriber
//! share the exact same schema:
//!
//! ```json
//! {"video_id": 42, "user_id": 7, "action_type": 1, "timestamp": 1700000000000}
//! ```
//!
//! Decoding goes through a lenient wire struct (missing fields default to
//! zero, as producers have always relied on) and is then validated into the
//! strongly-typed envelope. An `action_type` other than `1` or `2` never
//! becomes an envelope.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::HandlerError;
use crate::{COMMENT_TOPIC, LIKE_TOPIC, VIDEO_TOPIC};

/// Add/remove discriminator shared by like and comment events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(into = "i32")]
pub enum ActionType {
    Add = 1,
    Remove = 2,
}

impl TryFrom<i32> for ActionType {
    type Error = HandlerError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(ActionType::Add),
            2 => Ok(ActionType::Remove),
            other => Err(HandlerError::InvalidActionType(other)),
        }
    }
}

impl From<ActionType> for i32 {
    fn from(action: ActionType) -> Self {
        action as i32
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionType::Add => f.write_str("add"),
            ActionType::Remove => f.write_str("remove"),
        }
    }
}

/// A typed envelope bound to exactly one topic.
pub trait Envelope: Serialize + Sized {
    /// Topic this envelope is published on.
    const TOPIC: &'static str;

    /// Decode and validate raw payload bytes.
    fn decode(bytes: &[u8]) -> Result<Self, HandlerError>;

    /// Encode into the JSON wire form.
    fn encode(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}

fn decode_wire<W: DeserializeOwned>(bytes: &[u8]) -> Result<W, HandlerError> {
    serde_json::from_slice(bytes).map_err(HandlerError::Decode)
}

/// Convert an epoch-milliseconds timestamp into a creation time.
pub fn created_at(millis: i64) -> Result<DateTime<Utc>, HandlerError> {
    DateTime::<Utc>::from_timestamp_millis(millis).ok_or(HandlerError::InvalidTimestamp(millis))
}

/// A like being added to or removed from a video.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LikeEvent {
    pub video_id: i64,
    pub user_id: i64,
    pub action_type: ActionType,
    /// Epoch milliseconds
    pub timestamp: i64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct LikeWire {
    video_id: i64,
    user_id: i64,
    action_type: i32,
    timestamp: i64,
}

impl Envelope for LikeEvent {
    const TOPIC: &'static str = LIKE_TOPIC;

    fn decode(bytes: &[u8]) -> Result<Self, HandlerError> {
        let wire: LikeWire = decode_wire(bytes)?;
        Ok(Self {
            video_id: wire.video_id,
            user_id: wire.user_id,
            action_type: ActionType::try_from(wire.action_type)?,
            timestamp: wire.timestamp,
        })
    }
}

/// A comment being posted or removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommentEvent {
    pub id: i64,
    pub video_id: i64,
    pub user_id: i64,
    pub comment: String,
    pub action_type: ActionType,
    /// Epoch milliseconds
    pub timestamp: i64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CommentWire {
    id: i64,
    video_id: i64,
    user_id: i64,
    comment: String,
    action_type: i32,
    timestamp: i64,
}

impl Envelope for CommentEvent {
    const TOPIC: &'static str = COMMENT_TOPIC;

    fn decode(bytes: &[u8]) -> Result<Self, HandlerError> {
        let wire: CommentWire = decode_wire(bytes)?;
        Ok(Self {
            id: wire.id,
            video_id: wire.video_id,
            user_id: wire.user_id,
            comment: wire.comment,
            action_type: ActionType::try_from(wire.action_type)?,
            timestamp: wire.timestamp,
        })
    }
}

/// A freshly uploaded video. Insert-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoEvent {
    #[serde(default)]
    pub video_url: String,
    #[serde(default)]
    pub user_id: i64,
    #[serde(default)]
    pub title: String,
    /// Epoch milliseconds
    #[serde(default)]
    pub timestamp: i64,
}

impl Envelope for VideoEvent {
    const TOPIC: &'static str = VIDEO_TOPIC;

    fn decode(bytes: &[u8]) -> Result<Self, HandlerError> {
        decode_wire(bytes)
    }
}

/// One delivery from the bus: raw payload plus delivery metadata.
///
/// A redelivery is a new `TopicEvent`, even when the payload is identical.
#[derive(Debug, Clone)]
pub struct TopicEvent {
    /// Bus-assigned event id (generated locally when the bus sent none)
    pub id: String,
    pub topic: String,
    pub pubsub_name: String,
    /// Raw JSON payload bytes
    pub data: Vec<u8>,
}

impl TopicEvent {
    pub fn new(
        id: impl Into<String>,
        topic: impl Into<String>,
        pubsub_name: impl Into<String>,
        data: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            id: id.into(),
            topic: topic.into(),
            pubsub_name: pubsub_name.into(),
            data: data.into(),
        }
    }
}

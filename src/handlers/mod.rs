//! Topic handlers: one per event kind.
//!
//! A [`TopicHandler`] binds a subscription (bus, topic, route) to a
//! decode-and-apply routine. The dispatcher only knows the trait; the three
//! concrete handlers are built once at startup by [`all`].
//!
//! ## Writing a handler
//!
//! ```rust,ignore
//! use aweme_sub::handlers::{Subscription, TopicHandler};
//! use aweme_sub::{HandleError, TopicEvent};
//! use async_trait::async_trait;
//!
//! struct FollowHandler;
//!
//! #[async_trait]
//! impl TopicHandler for FollowHandler {
//!     fn subscription(&self) -> Subscription {
//!         Subscription::new("follow", "/follow")
//!     }
//!
//!     async fn handle(&self, event: &TopicEvent) -> Result<(), HandleError> {
//!         // decode event.data, call a command port
//!         Ok(())
//!     }
//! }
//! ```

pub mod comment;
pub mod like;
pub mod video;

use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::command::{CommentCommand, LikeCommand, VideoCommand};
use crate::error::HandleError;
use crate::event::TopicEvent;
use crate::PUBSUB_NAME;

pub use comment::CommentEventHandler;
pub use like::LikeEventHandler;
pub use video::VideoEventHandler;

/// Where a handler listens on the bus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Subscription {
    #[serde(rename = "pubsubname")]
    pub pubsub_name: String,
    pub topic: String,
    pub route: String,
}

impl Subscription {
    /// Subscription on the default pub/sub component.
    pub fn new(topic: impl Into<String>, route: impl Into<String>) -> Self {
        Self {
            pubsub_name: PUBSUB_NAME.to_string(),
            topic: topic.into(),
            route: route.into(),
        }
    }
}

/// Capability shared by every topic handler.
///
/// Handlers must be `Send + Sync`; the dispatcher invokes them concurrently
/// from independent deliveries.
#[async_trait]
pub trait TopicHandler: Send + Sync {
    /// Static subscription, read once at registration.
    fn subscription(&self) -> Subscription;

    /// Apply one delivery.
    ///
    /// `Ok(())` acknowledges the event. On error, [`HandleError::retry`]
    /// tells the bus whether to redeliver.
    async fn handle(&self, event: &TopicEvent) -> Result<(), HandleError>;
}

/// Build the full handler set from its command ports.
pub fn all(
    likes: Arc<dyn LikeCommand>,
    comments: Arc<dyn CommentCommand>,
    videos: Arc<dyn VideoCommand>,
) -> Vec<Arc<dyn TopicHandler>> {
    vec![
        Arc::new(LikeEventHandler::new(likes)),
        Arc::new(CommentEventHandler::new(comments)),
        Arc::new(VideoEventHandler::new(videos)),
    ]
}

/// Log the outcome of a delivery at the level its classification deserves.
pub(crate) fn log_outcome(event: &TopicEvent, result: &Result<(), HandleError>) {
    match result {
        Ok(()) => info!(
            event_id = %event.id,
            event_topic = %event.topic,
            "event handled"
        ),
        Err(e) if e.retry => error!(
            event_id = %event.id,
            event_topic = %event.topic,
            error = %e,
            "event handle error, requesting redelivery"
        ),
        Err(e) if e.is_duplicate() => warn!(
            event_id = %event.id,
            event_topic = %event.topic,
            error = %e,
            "event already applied, dropping"
        ),
        Err(e) => warn!(
            event_id = %event.id,
            event_topic = %event.topic,
            error = %e,
            "event rejected, dropping"
        ),
    }
}

/// Shared fakes for the handler tests.
#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::command::{Comment, Like, StoreError, Video};
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Call {
        InsertLike(Like),
        DeleteLike { video_id: i64, user_id: i64 },
        InsertComment(Comment),
        DeleteComment { id: i64, user_id: i64, video_id: i64 },
        InsertVideo(Video),
    }

    /// Records every command-port call and fails with a canned error.
    #[derive(Default)]
    pub struct RecordingStore {
        calls: Mutex<Vec<Call>>,
        fail_with: Mutex<Option<StoreError>>,
    }

    impl RecordingStore {
        pub fn failing(err: StoreError) -> Self {
            let store = Self::default();
            *store.fail_with.lock().unwrap() = Some(err);
            store
        }

        pub fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }

        fn record(&self, call: Call) -> Result<(), StoreError> {
            self.calls.lock().unwrap().push(call);
            match self.fail_with.lock().unwrap().clone() {
                Some(err) => Err(err),
                None => Ok(()),
            }
        }
    }

    #[async_trait]
    impl LikeCommand for RecordingStore {
        async fn insert(&self, like: &Like) -> Result<(), StoreError> {
            self.record(Call::InsertLike(like.clone()))
        }

        async fn delete(&self, video_id: i64, user_id: i64) -> Result<(), StoreError> {
            self.record(Call::DeleteLike { video_id, user_id })
        }
    }

    #[async_trait]
    impl CommentCommand for RecordingStore {
        async fn insert(&self, comment: &Comment) -> Result<(), StoreError> {
            self.record(Call::InsertComment(comment.clone()))
        }

        async fn delete(&self, id: i64, user_id: i64, video_id: i64) -> Result<(), StoreError> {
            self.record(Call::DeleteComment {
                id,
                user_id,
                video_id,
            })
        }
    }

    #[async_trait]
    impl VideoCommand for RecordingStore {
        async fn insert(&self, video: &Video) -> Result<(), StoreError> {
            self.record(Call::InsertVideo(video.clone()))
        }
    }

    pub fn delivery(topic: &str, data: &str) -> TopicEvent {
        TopicEvent::new("evt-1", topic, PUBSUB_NAME, data.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::testing::RecordingStore;
    use super::*;

    #[test]
    fn test_all_handlers_have_fixed_subscriptions() {
        let store = Arc::new(RecordingStore::default());
        let handlers = all(store.clone(), store.clone(), store);

        let subs: Vec<Subscription> = handlers.iter().map(|h| h.subscription()).collect();
        assert_eq!(
            subs,
            vec![
                Subscription::new("like", "/like"),
                Subscription::new("comment", "/comment"),
                Subscription::new("video", "/video"),
            ]
        );
        assert!(subs.iter().all(|s| s.pubsub_name == "redis-pubsub"));
    }

    #[test]
    fn test_subscription_serializes_bus_field_names() {
        let json = serde_json::to_value(Subscription::new("like", "/like")).unwrap();
        assert_eq!(json["pubsubname"], "redis-pubsub");
        assert_eq!(json["topic"], "like");
        assert_eq!(json["route"], "/like");
    }
}

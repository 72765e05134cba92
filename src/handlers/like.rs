//! Like events: add or remove a user's like on a video.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use super::{log_outcome, Subscription, TopicHandler};
use crate::command::{Like, LikeCommand};
use crate::error::{HandleError, HandlerError};
use crate::event::{created_at, ActionType, Envelope, LikeEvent, TopicEvent};
use crate::{LIKE_ROUTE, LIKE_TOPIC};

pub struct LikeEventHandler {
    likes: Arc<dyn LikeCommand>,
}

impl LikeEventHandler {
    pub fn new(likes: Arc<dyn LikeCommand>) -> Self {
        Self { likes }
    }

    async fn apply(&self, event: &TopicEvent) -> Result<(), HandlerError> {
        let like = LikeEvent::decode(&event.data)?;

        debug!(
            event_id = %event.id,
            video_id = like.video_id,
            user_id = like.user_id,
            action = %like.action_type,
            "Applying like event"
        );

        match like.action_type {
            ActionType::Add => {
                let record = Like {
                    video_id: like.video_id,
                    user_id: like.user_id,
                    created_at: created_at(like.timestamp)?,
                };
                self.likes.insert(&record).await?;
            }
            ActionType::Remove => self.likes.delete(like.video_id, like.user_id).await?,
        }
        Ok(())
    }
}

#[async_trait]
impl TopicHandler for LikeEventHandler {
    fn subscription(&self) -> Subscription {
        Subscription::new(LIKE_TOPIC, LIKE_ROUTE)
    }

    async fn handle(&self, event: &TopicEvent) -> Result<(), HandleError> {
        let result = self.apply(event).await.map_err(HandleError::classified);
        log_outcome(event, &result);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::StoreError;
    use crate::handlers::testing::{delivery, Call, RecordingStore};
    use crate::store::MemoryStore;

    const ADD: &str = r#"{"video_id":42,"user_id":7,"action_type":1,"timestamp":1700000000000}"#;

    #[tokio::test]
    async fn test_add_inserts_once() {
        let store = Arc::new(RecordingStore::default());
        let handler = LikeEventHandler::new(store.clone());

        handler.handle(&delivery("like", ADD)).await.unwrap();

        let calls = store.calls();
        assert_eq!(calls.len(), 1);
        match &calls[0] {
            Call::InsertLike(like) => {
                assert_eq!(like.video_id, 42);
                assert_eq!(like.user_id, 7);
                assert_eq!(like.created_at.timestamp_millis(), 1_700_000_000_000);
            }
            other => panic!("unexpected call: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_remove_deletes_by_natural_key() {
        let store = Arc::new(RecordingStore::default());
        let handler = LikeEventHandler::new(store.clone());
        let body = r#"{"video_id":42,"user_id":7,"action_type":2,"timestamp":1700000000000}"#;

        handler.handle(&delivery("like", body)).await.unwrap();

        assert_eq!(
            store.calls(),
            vec![Call::DeleteLike {
                video_id: 42,
                user_id: 7
            }]
        );
    }

    #[tokio::test]
    async fn test_missing_action_type_is_dropped_without_store_call() {
        let store = Arc::new(RecordingStore::default());
        let handler = LikeEventHandler::new(store.clone());

        let err = handler
            .handle(&delivery("like", r#"{"video_id":42,"user_id":7}"#))
            .await
            .unwrap_err();

        assert!(!err.retry);
        assert!(matches!(err.error, HandlerError::InvalidActionType(0)));
        assert!(store.calls().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_payload_is_dropped_without_store_call() {
        let store = Arc::new(RecordingStore::default());
        let handler = LikeEventHandler::new(store.clone());

        for body in [r#"{"video_id":4"#, r#"{"video_id":[1],"action_type":1}"#, "not json"] {
            let err = handler.handle(&delivery("like", body)).await.unwrap_err();
            assert!(!err.retry);
            assert!(matches!(err.error, HandlerError::Decode(_)));
        }
        assert!(store.calls().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_key_is_dropped() {
        let store = Arc::new(RecordingStore::failing(StoreError::database(
            1062,
            "Duplicate entry",
        )));
        let handler = LikeEventHandler::new(store.clone());

        let err = handler.handle(&delivery("like", ADD)).await.unwrap_err();

        assert!(!err.retry);
        assert!(err.is_duplicate());
        assert_eq!(store.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_connection_error_is_retried() {
        let store = Arc::new(RecordingStore::failing(StoreError::Connection(
            "broken pipe".into(),
        )));
        let handler = LikeEventHandler::new(store);

        let err = handler.handle(&delivery("like", ADD)).await.unwrap_err();
        assert!(err.retry);
    }

    #[tokio::test]
    async fn test_redelivery_persists_one_row() {
        let store = Arc::new(MemoryStore::new());
        let handler = LikeEventHandler::new(store.clone());

        handler.handle(&delivery("like", ADD)).await.unwrap();
        let err = handler.handle(&delivery("like", ADD)).await.unwrap_err();

        assert!(!err.retry);
        assert!(err.is_duplicate());
        assert_eq!(store.like_count(), 1);
    }
}

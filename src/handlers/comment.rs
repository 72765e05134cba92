//! Comment events: post or remove a comment.
//!
//! Store failures here go through the same classifier as the other topics;
//! a failed comment write is never acknowledged silently.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use super::{log_outcome, Subscription, TopicHandler};
use crate::command::{Comment, CommentCommand};
use crate::error::{HandleError, HandlerError};
use crate::event::{created_at, ActionType, CommentEvent, Envelope, TopicEvent};
use crate::{COMMENT_ROUTE, COMMENT_TOPIC};

pub struct CommentEventHandler {
    comments: Arc<dyn CommentCommand>,
}

impl CommentEventHandler {
    pub fn new(comments: Arc<dyn CommentCommand>) -> Self {
        Self { comments }
    }

    async fn apply(&self, event: &TopicEvent) -> Result<(), HandlerError> {
        let comment = CommentEvent::decode(&event.data)?;

        debug!(
            event_id = %event.id,
            comment_id = comment.id,
            video_id = comment.video_id,
            action = %comment.action_type,
            "Applying comment event"
        );

        match comment.action_type {
            ActionType::Add => {
                let record = Comment {
                    id: comment.id,
                    video_id: comment.video_id,
                    user_id: comment.user_id,
                    created_at: created_at(comment.timestamp)?,
                    content: comment.comment,
                };
                self.comments.insert(&record).await?;
            }
            ActionType::Remove => {
                self.comments
                    .delete(comment.id, comment.user_id, comment.video_id)
                    .await?
            }
        }
        Ok(())
    }
}

#[async_trait]
impl TopicHandler for CommentEventHandler {
    fn subscription(&self) -> Subscription {
        Subscription::new(COMMENT_TOPIC, COMMENT_ROUTE)
    }

    async fn handle(&self, event: &TopicEvent) -> Result<(), HandleError> {
        let result = self.apply(event).await.map_err(HandleError::classified);
        log_outcome(event, &result);
        result
    }
}

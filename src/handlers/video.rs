//! Video events: persist an uploaded video. Always an insert.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use super::{log_outcome, Subscription, TopicHandler};
use crate::command::{Video, VideoCommand};
use crate::error::{HandleError, HandlerError};
use crate::event::{created_at, Envelope, TopicEvent, VideoEvent};
use crate::{VIDEO_ROUTE, VIDEO_TOPIC};

pub struct VideoEventHandler {
    videos: Arc<dyn VideoCommand>,
}

impl VideoEventHandler {
    pub fn new(videos: Arc<dyn VideoCommand>) -> Self {
        Self { videos }
    }

    async fn apply(&self, event: &TopicEvent) -> Result<(), HandlerError> {
        let video = VideoEvent::decode(&event.data)?;

        debug!(
            event_id = %event.id,
            user_id = video.user_id,
            video_url = %video.video_url,
            "Applying video event"
        );

        let record = Video {
            user_id: video.user_id,
            created_at: created_at(video.timestamp)?,
            video_url: video.video_url,
            title: video.title,
        };
        self.videos.insert(&record).await?;
        Ok(())
    }
}

#[async_trait]
impl TopicHandler for VideoEventHandler {
    fn subscription(&self) -> Subscription {
        Subscription::new(VIDEO_TOPIC, VIDEO_ROUTE)
    }

    async fn handle(&self, event: &TopicEvent) -> Result<(), HandleError> {
        let result = self.apply(event).await.map_err(HandleError::classified);
        log_outcome(event, &result);
        result
    }
}

//! Publisher - producer side of the like/comment/video topics.
//!
//! Envelopes are posted as JSON to the bus sidecar, which fans them out to
//! subscribers:
//!
//! ```text
//! POST {sidecar_url}/v1.0/publish/redis-pubsub/{topic}
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use aweme_sub::publish::Publisher;
//!
//! let publisher = Publisher::new("http://localhost:3500");
//! publisher.publish_like(42, 7, 1).await?;
//! ```

use chrono::Utc;
use reqwest::{header, Client};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::PublisherConfig;
use crate::event::{ActionType, CommentEvent, Envelope, LikeEvent, VideoEvent};
use crate::PUBSUB_NAME;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Error, Debug)]
pub enum PublishError {
    #[error("invalid action type: {0}")]
    InvalidActionType(i32),

    #[error("failed to encode event: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("sidecar rejected publish ({status}): {body}")]
    Rejected { status: u16, body: String },
}

/// Publishes envelopes through the bus sidecar.
#[derive(Debug, Clone)]
pub struct Publisher {
    client: Client,
    sidecar_url: String,
    timeout: Duration,
}

impl Publisher {
    pub fn new(sidecar_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            sidecar_url: sidecar_url.into().trim_end_matches('/').to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn from_config(config: &PublisherConfig) -> Self {
        Self::new(&config.sidecar_url).with_timeout(Duration::from_millis(config.timeout_ms))
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn topic_url(&self, topic: &str) -> String {
        format!(
            "{}/v1.0/publish/{}/{}",
            self.sidecar_url, PUBSUB_NAME, topic
        )
    }

    /// Publish any envelope on its topic.
    pub async fn publish<E: Envelope>(&self, event: &E) -> Result<(), PublishError> {
        let url = self.topic_url(E::TOPIC);
        let body = event.encode()?;

        debug!(url = %url, topic = E::TOPIC, "Publishing event");

        let response = self
            .client
            .post(&url)
            .timeout(self.timeout)
            .header(header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            info!(topic = E::TOPIC, status = %status, "Event published");
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        warn!(topic = E::TOPIC, status = %status, body = %body, "Sidecar rejected publish");
        Err(PublishError::Rejected {
            status: status.as_u16(),
            body,
        })
    }

    pub async fn publish_like(
        &self,
        video_id: i64,
        user_id: i64,
        action_type: i32,
    ) -> Result<(), PublishError> {
        let event = LikeEvent {
            video_id,
            user_id,
            action_type: action(action_type)?,
            timestamp: now_millis(),
        };
        self.publish(&event).await
    }

    pub async fn publish_comment(
        &self,
        id: i64,
        video_id: i64,
        user_id: i64,
        comment: impl Into<String>,
        action_type: i32,
    ) -> Result<(), PublishError> {
        let event = CommentEvent {
            id,
            video_id,
            user_id,
            comment: comment.into(),
            action_type: action(action_type)?,
            timestamp: now_millis(),
        };
        self.publish(&event).await
    }

    pub async fn publish_video(
        &self,
        user_id: i64,
        video_url: impl Into<String>,
        title: impl Into<String>,
    ) -> Result<(), PublishError> {
        let event = VideoEvent {
            video_url: video_url.into(),
            user_id,
            title: title.into(),
            timestamp: now_millis(),
        };
        self.publish(&event).await
    }
}

fn action(value: i32) -> Result<ActionType, PublishError> {
    ActionType::try_from(value).map_err(|_| PublishError::InvalidActionType(value))
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Bytes,
        extract::{Path, State},
        http::StatusCode,
        routing::post,
        Router,
    };
    use serde_json::Value;
    use std::sync::{Arc, Mutex};

    type Published = Arc<Mutex<Vec<(String, String, Value)>>>;

    /// Fake sidecar recording every publish; topic "closed" is refused.
    async fn sidecar() -> (String, Published) {
        let published: Published = Arc::default();

        async fn accept(
            State(published): State<Published>,
            Path((pubsub, topic)): Path<(String, String)>,
            body: Bytes,
        ) -> StatusCode {
            if topic == "closed" {
                return StatusCode::INTERNAL_SERVER_ERROR;
            }
            let json = serde_json::from_slice(&body).unwrap();
            published.lock().unwrap().push((pubsub, topic, json));
            StatusCode::NO_CONTENT
        }

        let app = Router::new()
            .route("/v1.0/publish/{pubsub}/{topic}", post(accept))
            .with_state(published.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await });

        (format!("http://{addr}"), published)
    }

    #[test]
    fn test_topic_url() {
        let publisher = Publisher::new("http://localhost:3500/");
        assert_eq!(
            publisher.topic_url("like"),
            "http://localhost:3500/v1.0/publish/redis-pubsub/like"
        );
    }

    #[test]
    fn test_from_config() {
        let publisher = Publisher::from_config(&PublisherConfig {
            sidecar_url: "http://sidecar:3500".into(),
            timeout_ms: 250,
        });
        assert_eq!(publisher.sidecar_url, "http://sidecar:3500");
        assert_eq!(publisher.timeout, Duration::from_millis(250));
    }

    #[tokio::test]
    async fn test_publish_like() {
        let (url, published) = sidecar().await;
        let publisher = Publisher::new(url);

        publisher.publish_like(42, 7, 1).await.unwrap();

        let published = published.lock().unwrap();
        let (pubsub, topic, body) = &published[0];
        assert_eq!(pubsub, "redis-pubsub");
        assert_eq!(topic, "like");
        assert_eq!(body["video_id"], 42);
        assert_eq!(body["user_id"], 7);
        assert_eq!(body["action_type"], 1);
        assert!(body["timestamp"].as_i64().unwrap() > 0);
    }

    #[tokio::test]
    async fn test_published_comment_decodes_on_subscriber_side() {
        let (url, published) = sidecar().await;
        let publisher = Publisher::new(url);

        publisher
            .publish_comment(9, 42, 7, "nice", 2)
            .await
            .unwrap();

        let body = published.lock().unwrap()[0].2.to_string();
        let event = CommentEvent::decode(body.as_bytes()).unwrap();
        assert_eq!(event.id, 9);
        assert_eq!(event.comment, "nice");
        assert_eq!(event.action_type, ActionType::Remove);
    }

    #[tokio::test]
    async fn test_publish_video() {
        let (url, published) = sidecar().await;
        Publisher::new(url)
            .publish_video(7, "https://cdn/v.mp4", "first")
            .await
            .unwrap();

        let published = published.lock().unwrap();
        assert_eq!(published[0].1, "video");
        assert_eq!(published[0].2["video_url"], "https://cdn/v.mp4");
        assert_eq!(published[0].2["title"], "first");
    }

    #[tokio::test]
    async fn test_invalid_action_type_is_rejected_before_sending() {
        let (url, published) = sidecar().await;
        let publisher = Publisher::new(url);

        let err = publisher.publish_like(42, 7, 3).await.unwrap_err();
        assert!(matches!(err, PublishError::InvalidActionType(3)));

        let err = publisher
            .publish_comment(1, 42, 7, "x", 0)
            .await
            .unwrap_err();
        assert!(matches!(err, PublishError::InvalidActionType(0)));

        assert!(published.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sidecar_rejection() {
        #[derive(serde::Serialize)]
        struct Closed;

        impl Envelope for Closed {
            const TOPIC: &'static str = "closed";

            fn decode(_bytes: &[u8]) -> Result<Self, crate::error::HandlerError> {
                Ok(Closed)
            }
        }

        let (url, _) = sidecar().await;
        let err = Publisher::new(url).publish(&Closed).await.unwrap_err();
        assert!(matches!(err, PublishError::Rejected { status: 500, .. }));
    }

    #[tokio::test]
    async fn test_unreachable_sidecar() {
        let publisher =
            Publisher::new("http://127.0.0.1:1").with_timeout(Duration::from_millis(500));
        let err = publisher.publish_video(7, "u", "t").await.unwrap_err();
        assert!(matches!(err, PublishError::Http(_)));
    }
}

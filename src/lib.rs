//! # Aweme Subscriber
//!
//! Event ingestion for the aweme write path: likes, comments and video
//! uploads arrive on a pub/sub bus and are applied to the relational store.
//!
//! ## Architecture
//!
//! ```text
//! API -> Publisher -> Sidecar -> Dispatcher -> TopicHandler -> Command port -> MySQL
//! ```
//!
//! Every delivery is answered with `SUCCESS`, `RETRY` or `DROP`. Duplicate
//! keys and malformed payloads are dropped; transient store failures are
//! retried.
//!
//! ## Modules
//!
//! - [`event`]: Topic envelopes and their wire codecs
//! - [`handlers`]: One handler per topic
//! - [`dispatcher`]: Subscription registry and HTTP delivery endpoint
//! - [`classify`]: Retry/drop decisions for failures
//! - [`command`]: Persistence ports; [`store`] holds the adapters
//! - [`publish`]: Producer side of the topics

pub mod classify;
pub mod command;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod event;
pub mod handlers;
pub mod publish;
pub mod shutdown;
pub mod store;

// Re-export commonly used types at crate root
pub use dispatcher::{DeliveryStatus, DispatchError, Dispatcher, RunningDispatcher};
pub use error::{HandleError, HandlerError};
pub use event::{ActionType, CommentEvent, Envelope, LikeEvent, TopicEvent, VideoEvent};
pub use handlers::{Subscription, TopicHandler};
pub use publish::Publisher;

/// Bus component every topic is published on
pub const PUBSUB_NAME: &str = "redis-pubsub";

pub const LIKE_TOPIC: &str = "like";
pub const COMMENT_TOPIC: &str = "comment";
pub const VIDEO_TOPIC: &str = "video";

pub const LIKE_ROUTE: &str = "/like";
pub const COMMENT_ROUTE: &str = "/comment";
pub const VIDEO_ROUTE: &str = "/video";

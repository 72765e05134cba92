//! Errors raised while handling a single delivery.

use thiserror::Error;

use crate::classify;
use crate::command::StoreError;

/// Why a delivery could not be applied.
#[derive(Error, Debug)]
pub enum HandlerError {
    /// Payload is not valid JSON for the topic's envelope
    #[error("cannot decode payload: {0}")]
    Decode(#[from] serde_json::Error),

    /// `action_type` outside the add/remove pair
    #[error("invalid action type: {0}")]
    InvalidActionType(i32),

    /// Timestamp cannot be represented as a creation time
    #[error("timestamp out of range: {0}ms")]
    InvalidTimestamp(i64),

    /// The command port rejected the write
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// A failed delivery together with the bus instruction for it.
#[derive(Error, Debug)]
#[error("{error}")]
pub struct HandleError {
    /// Ask the bus to redeliver later
    pub retry: bool,
    #[source]
    pub error: HandlerError,
}

impl HandleError {
    /// Attach the classifier's retry decision to an error.
    pub fn classified(error: HandlerError) -> Self {
        Self {
            retry: classify::should_retry(&error),
            error,
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(&self.error, HandlerError::Store(e) if classify::is_duplicate_key(e))
    }
}

impl From<HandlerError> for HandleError {
    fn from(error: HandlerError) -> Self {
        Self::classified(error)
    }
}

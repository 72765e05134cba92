//! Retry classification for failed deliveries.
//!
//! The bus delivers at least once, so a redelivered insert that finds its
//! row already present surfaces as a duplicate-key error. That is the one
//! store failure we drop; every other store failure is redelivered.
//! Payload problems never get better on redelivery and are always dropped.

use crate::command::StoreError;
use crate::error::HandlerError;

/// MySQL `ER_DUP_ENTRY`.
pub const DUPLICATE_KEY: u16 = 1062;

/// Returns true when `err` is the store's duplicate-key signature.
pub fn is_duplicate_key(err: &StoreError) -> bool {
    err.code() == Some(DUPLICATE_KEY)
}

/// Decide whether the bus should redeliver after `err`.
pub fn should_retry(err: &HandlerError) -> bool {
    match err {
        HandlerError::Decode(_)
        | HandlerError::InvalidActionType(_)
        | HandlerError::InvalidTimestamp(_) => false,
        HandlerError::Store(store) => !is_duplicate_key(store),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_key_is_not_retried() {
        let err = HandlerError::Store(StoreError::database(1062, "Duplicate entry '42-7'"));
        assert!(!should_retry(&err));
    }

    #[test]
    fn test_other_constraint_is_retried() {
        // foreign key violation
        let err = HandlerError::Store(StoreError::database(1452, "Cannot add or update"));
        assert!(should_retry(&err));
    }

    #[test]
    fn test_transient_store_errors_are_retried() {
        for store in [
            StoreError::Timeout("pool timed out".into()),
            StoreError::Connection("connection reset".into()),
            StoreError::Other("unexpected".into()),
        ] {
            assert!(should_retry(&HandlerError::Store(store)));
        }
    }

    #[test]
    fn test_payload_errors_are_never_retried() {
        let decode = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        assert!(!should_retry(&HandlerError::Decode(decode)));
        assert!(!should_retry(&HandlerError::InvalidActionType(0)));
        assert!(!should_retry(&HandlerError::InvalidTimestamp(i64::MAX)));
    }

    #[test]
    fn test_is_duplicate_key() {
        assert!(is_duplicate_key(&StoreError::database(DUPLICATE_KEY, "dup")));
        assert!(!is_duplicate_key(&StoreError::Timeout("t".into())));
    }
}

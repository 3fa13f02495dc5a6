//! Error types for the subscription reconciler.

use crate::types::SubscriptionKey;
use thiserror::Error;

/// Main error type for reconciler operations.
///
/// Cloneable so a failed transition can resolve its caller and be reported
/// to the error sink with the same value.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SubsError {
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Failed to open subscription {key}: {reason}")]
    Open { key: SubscriptionKey, reason: String },

    #[error("Descriptor already released: {0}")]
    AlreadyReleased(SubscriptionKey),

    #[error("Subscription is not retained: {0}")]
    NotRetained(SubscriptionKey),

    #[error("Transition queue fault: {0}")]
    QueueFault(String),

    #[error("Failed to spawn reconciler worker: {0}")]
    Spawn(String),
}

impl SubsError {
    /// Build an open failure for `key`.
    pub fn open(key: &SubscriptionKey, reason: impl Into<String>) -> Self {
        SubsError::Open {
            key: key.clone(),
            reason: reason.into(),
        }
    }
}

/// Result type for reconciler operations.
pub type Result<T> = std::result::Result<T, SubsError>;

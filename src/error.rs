//! Error types for Clipper Webhooks
//!
//! One enum per layer, all built on `thiserror`:
//!
//! - [`StorageError`] for the event store, retry queue and dead-letter store
//! - [`SignatureError`] for inbound signature verification
//! - [`Error`] as the crate-wide type that wraps the others and carries the
//!   delivery/retry taxonomy
//!
//! Storage errors always fail closed: callers must not mark events processed
//! or drop queue items when they see one.

use thiserror::Error;

/// The main error type for webhook operations
#[derive(Error, Debug)]
pub enum Error {
    /// Persistence failure (fail closed)
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Inbound signature rejected
    #[error("Signature error: {0}")]
    Signature(#[from] SignatureError),

    /// Inbound event was already seen; a no-op signal, not a failure
    #[error("Duplicate event: {0}")]
    DuplicateEvent(String),

    /// Network error, timeout, 5xx or 429 from a subscriber
    #[error("Transient delivery failure: {0}")]
    TransientDeliveryFailure(String),

    /// Policy-classified 4xx from a subscriber
    #[error("Permanent delivery failure (HTTP {status}): {message}")]
    PermanentDeliveryFailure {
        /// HTTP status code returned by the subscriber
        status: u16,
        /// Truncated response body or reason
        message: String,
    },

    /// Refused locally without a network call (inactive subscription,
    /// disallowed target)
    #[error("Delivery rejected: {0}")]
    DeliveryRejected(String),

    /// Retry budget spent; the item was routed to the dead-letter queue
    #[error("Retries exhausted for {reference_id} after {attempts} attempts")]
    RetryExhausted {
        /// The external event or delivery the item concerned
        reference_id: String,
        /// Number of attempts made
        attempts: u32,
    },

    /// Business handler failed while processing an event
    #[error("Processing failed: {0}")]
    ProcessingFailed(String),

    /// Payload could not be parsed
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// Configuration problem
    #[error("Configuration error: {0}")]
    Config(String),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Storage layer errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// Unique key already present
    #[error("Duplicate key: {0}")]
    DuplicateKey(String),

    /// Record does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// The caller's claim on a queue item expired or was taken over
    #[error("Claim lost for queue item {0}")]
    ClaimLost(String),

    /// Backend unavailable or failed mid-operation
    #[error("Storage backend failure: {0}")]
    Backend(String),
}

/// Inbound signature verification errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SignatureError {
    /// Header absent
    #[error("Missing signature header")]
    MissingHeader,

    /// Header present but not `t=...,v1=...`
    #[error("Malformed signature header: {0}")]
    MalformedHeader(String),

    /// Timestamp outside the tolerance window
    #[error("Signature timestamp outside tolerance ({age_secs}s old)")]
    TimestampOutOfTolerance {
        /// Age of the signature in seconds (negative when in the future)
        age_secs: i64,
    },

    /// No `v1` signature matched
    #[error("Signature mismatch")]
    Mismatch,
}

/// Result type alias for webhook operations
pub type Result<T> = std::result::Result<T, Error>;

/// Result type alias for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

impl Error {
    /// Whether the scheduler should try this again later
    pub fn is_retriable(&self) -> bool {
        !matches!(
            self,
            Error::PermanentDeliveryFailure { .. }
                | Error::DeliveryRejected(_)
                | Error::InvalidPayload(_)
                | Error::DuplicateEvent(_)
                | Error::RetryExhausted { .. }
        )
    }

    /// Create a processing error from any displayable error
    pub fn processing<E: std::fmt::Display>(err: E) -> Self {
        Error::ProcessingFailed(err.to_string())
    }
}

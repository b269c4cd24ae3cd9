//! Domain error types.

use thiserror::Error;

/// Top-level error type shared by every evolog component.
#[derive(Debug, Error)]
pub enum DomainError {
    /// Optimistic concurrency conflict: the attempted start version is not
    /// the next free version of the stream.
    #[error(
        "concurrency conflict on {state_kind}/{stream_id}: expected version {expected}, found {actual}"
    )]
    ConcurrencyConflict {
        /// State kind of the stream.
        state_kind: String,
        /// The stream that had the conflict.
        stream_id: String,
        /// The version the writer believed was current.
        expected: i64,
        /// The version actually found in storage.
        actual: i64,
    },

    /// The payload registry could not map a type name to a type, or a value
    /// to a registered name.
    #[error("unresolvable type: {0}")]
    UnresolvableType(String),

    /// No producer is bound for the command type.
    #[error("cannot execute command of type {0}")]
    UnhandleableCommand(String),

    /// No folder is bound for the event type.
    #[error("cannot handle event of type {0}")]
    UnhandleableEvent(String),

    /// The bus rejected a batch after the events were durably stored. The
    /// outbox ticket remains, so the batch will be retried.
    #[error("publish failed for {state_kind}/{stream_id}: {reason}")]
    TransientPublishFailure {
        /// State kind of the stream.
        state_kind: String,
        /// The stream whose batch was not delivered.
        stream_id: String,
        /// Underlying bus error.
        reason: String,
    },

    /// The stream has no events and no snapshot.
    #[error("stream not found: {state_kind}/{stream_id}")]
    StreamNotFound {
        /// State kind of the stream.
        state_kind: String,
        /// The missing stream.
        stream_id: String,
    },

    /// A version was requested that the stream has not reached.
    #[error("stream {stream_id} has not reached version {requested} (latest is {latest})")]
    VersionNotReached {
        /// The stream that was queried.
        stream_id: String,
        /// The requested version.
        requested: i64,
        /// The latest existing version.
        latest: i64,
    },

    /// A command producer refused the command.
    #[error("command rejected: {0}")]
    Rejected(String),

    /// Invalid input.
    #[error("validation error: {0}")]
    Validation(String),

    /// A payload or state could not be (de)serialized.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// An infrastructure/persistence error.
    #[error("infrastructure error: {0}")]
    Infrastructure(String),
}

impl DomainError {
    /// Whether retrying the same operation later may succeed.
    ///
    /// Registration and type defects never heal on their own, so they are
    /// reported as fatal.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ConcurrencyConflict { .. }
                | Self::TransientPublishFailure { .. }
                | Self::Infrastructure(_)
        )
    }
}

use common::{ErrorCode, error_codes};
use thiserror::Error;

use crate::{DomainEventStream, Version};

/// Errors that can occur when interacting with the event store.
#[derive(Debug, Error)]
pub enum EventStoreError {
    /// The first stream of an aggregate was appended twice.
    #[error("Aggregate {} already exists", .stream.aggregate_id)]
    DuplicateAggregateId { stream: Box<DomainEventStream> },

    /// The stream does not start right after the stored tail version.
    #[error(
        "Event version conflict for aggregate {}: stream starts at {}, stored tail is {actual}",
        .stream.aggregate_id,
        .stream.head_version()
    )]
    EventVersionConflict {
        stream: Box<DomainEventStream>,
        actual: Version,
    },

    /// A different stream was already committed under the same request id.
    #[error(
        "Request {} was already committed for aggregate {} with different content",
        .stream.request_id,
        .stream.aggregate_id
    )]
    RequestIdIdempotency { stream: Box<DomainEventStream> },

    /// A load was asked for an impossible version range.
    #[error("Invalid version range: head {head}, tail {tail}")]
    InvalidVersionRange { head: Version, tail: Version },

    /// The stream handed to append is malformed.
    #[error("Invalid event stream: {0}")]
    InvalidStream(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl EventStoreError {
    /// True for the three append-time conflicts.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            EventStoreError::DuplicateAggregateId { .. }
                | EventStoreError::EventVersionConflict { .. }
                | EventStoreError::RequestIdIdempotency { .. }
        )
    }
}

impl ErrorCode for EventStoreError {
    fn error_code(&self) -> &'static str {
        match self {
            EventStoreError::DuplicateAggregateId { .. } => error_codes::DUPLICATE_AGGREGATE_ID,
            EventStoreError::EventVersionConflict { .. } => error_codes::EVENT_VERSION_CONFLICT,
            EventStoreError::RequestIdIdempotency { .. } => error_codes::DUPLICATE_REQUEST_ID,
            EventStoreError::InvalidVersionRange { .. } | EventStoreError::InvalidStream(_) => {
                error_codes::BAD_REQUEST
            }
            EventStoreError::Database(_)
            | EventStoreError::Migration(_)
            | EventStoreError::Serialization(_) => error_codes::INTERNAL,
        }
    }
}

/// Result type for event store operations.
pub type Result<T> = std::result::Result<T, EventStoreError>;

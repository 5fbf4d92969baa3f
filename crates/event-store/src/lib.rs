//! Append-only event log and snapshot storage.
//!
//! The [`EventStore`] trait is the single source of truth for aggregate
//! state; [`SnapshotRepository`] only shortens replay.

pub mod error;
pub mod event;
pub mod memory;
pub mod postgres;
pub mod snapshot;
pub mod store;

pub use common::AggregateId;
pub use error::{EventStoreError, Result};
pub use event::{DomainEvent, DomainEventStream, EventBody, EventId, Version};
pub use memory::InMemoryEventStore;
pub use postgres::PostgresEventStore;
pub use snapshot::{NoOpSnapshotRepository, Snapshot, SnapshotRepository};
pub use store::{
    AggregateIdStream, AppendOutcome, EventStore, EventStoreExt, EventStream, ScanCursor,
    validate_version_range,
};

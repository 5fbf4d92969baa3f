use std::pin::Pin;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{AggregateId, NamedAggregate};
use futures_core::Stream;
use futures_util::TryStreamExt;

use crate::{DomainEventStream, EventStoreError, Result, Version};

/// What an accepted append did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    /// The stream was committed.
    Appended,
    /// An identical stream was already committed under the same request id.
    AlreadyAppended,
}

/// A stream of event streams, in version order.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<DomainEventStream>> + Send>>;

/// A stream of aggregate ids produced by a scan.
pub type AggregateIdStream = Pin<Box<dyn Stream<Item = Result<AggregateId>> + Send>>;

/// Resumable position of an aggregate id scan.
///
/// Scans return ids in `(id, tenant)` order; resume from the last id seen.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanCursor {
    pub(crate) id: String,
    pub(crate) tenant_id: String,
}

impl ScanCursor {
    /// Starts from the beginning.
    pub fn first() -> Self {
        Self::default()
    }

    /// Continues after the given id.
    pub fn after(aggregate_id: &AggregateId) -> Self {
        Self {
            id: aggregate_id.id().to_string(),
            tenant_id: aggregate_id.tenant_id().to_string(),
        }
    }

    pub(crate) fn is_before(&self, aggregate_id: &AggregateId) -> bool {
        (aggregate_id.id(), aggregate_id.tenant_id()) > (self.id.as_str(), self.tenant_id.as_str())
    }
}

/// Core trait for event store implementations.
///
/// The store is the only place that enforces mutual exclusion between
/// writers: duplicate creation, stale or overlapping versions and reused
/// request ids are all rejected atomically by `append`.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Appends one stream.
    ///
    /// Fails with `DuplicateAggregateId` when the stream creates an aggregate
    /// that already exists, `EventVersionConflict` when the stream does not
    /// start right after the stored tail, and `RequestIdIdempotency` when a
    /// different stream was committed under the same request id. Re-appending
    /// an identical stream returns [`AppendOutcome::AlreadyAppended`].
    async fn append(&self, stream: DomainEventStream) -> Result<AppendOutcome>;

    /// Loads the streams whose version lies in `head..=tail`, oldest first.
    ///
    /// The range is validated before any I/O happens.
    async fn load(&self, aggregate_id: &AggregateId, head: Version, tail: Version)
    -> Result<EventStream>;

    /// Loads the streams created within `start..=end`, oldest first.
    async fn load_by_time(
        &self,
        aggregate_id: &AggregateId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<EventStream>;

    /// Returns the stored tail version, or `Version::initial()` when the
    /// aggregate has no events.
    async fn last_version(&self, aggregate_id: &AggregateId) -> Result<Version>;

    /// Lists aggregate ids of one type, for rebuild and backfill tooling.
    async fn scan_aggregate_id(
        &self,
        named_aggregate: &NamedAggregate,
        cursor: ScanCursor,
        limit: usize,
    ) -> Result<AggregateIdStream>;
}

/// Extension trait providing convenience methods for event stores.
#[async_trait]
pub trait EventStoreExt: EventStore {
    /// Loads every stream of an aggregate into memory.
    async fn load_all(&self, aggregate_id: &AggregateId) -> Result<Vec<DomainEventStream>> {
        self.load(aggregate_id, Version::first(), Version::MAX)
            .await?
            .try_collect()
            .await
    }

    /// Loads the streams starting after `version`.
    async fn load_after(
        &self,
        aggregate_id: &AggregateId,
        version: Version,
    ) -> Result<Vec<DomainEventStream>> {
        self.load(aggregate_id, version.next(), Version::MAX)
            .await?
            .try_collect()
            .await
    }

    /// Checks if an aggregate exists (has any events).
    async fn aggregate_exists(&self, aggregate_id: &AggregateId) -> Result<bool> {
        Ok(!self.last_version(aggregate_id).await?.is_initial())
    }
}

// Blanket implementation for all EventStore implementations
impl<T: EventStore + ?Sized> EventStoreExt for T {}

/// Rejects negative bounds and reversed ranges.
pub fn validate_version_range(head: Version, tail: Version) -> Result<()> {
    if head.as_i64() < 0 || tail.as_i64() < 0 || head > tail {
        return Err(EventStoreError::InvalidVersionRange { head, tail });
    }
    Ok(())
}

/// Validates a stream before appending.
pub fn validate_stream_for_append(stream: &DomainEventStream) -> Result<()> {
    stream.validate().map_err(EventStoreError::InvalidStream)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reversed_range_is_rejected() {
        let result = validate_version_range(Version::new(5), Version::new(2));
        assert!(matches!(
            result,
            Err(EventStoreError::InvalidVersionRange { .. })
        ));
    }

    #[test]
    fn negative_range_is_rejected() {
        assert!(validate_version_range(Version::new(-1), Version::new(2)).is_err());
    }

    #[test]
    fn single_version_range_is_valid() {
        assert!(validate_version_range(Version::new(3), Version::new(3)).is_ok());
        assert!(validate_version_range(Version::first(), Version::MAX).is_ok());
    }

    #[test]
    fn cursor_orders_by_id_then_tenant() {
        let named = NamedAggregate::new("test", "thing");
        let first = ScanCursor::first();
        assert!(first.is_before(&named.aggregate_id("a")));

        let cursor = ScanCursor::after(&named.aggregate_id("b"));
        assert!(!cursor.is_before(&named.aggregate_id("a")));
        assert!(!cursor.is_before(&named.aggregate_id("b")));
        assert!(cursor.is_before(&named.aggregate_id("b").with_tenant("z")));
        assert!(cursor.is_before(&named.aggregate_id("c")));
    }
}

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{AggregateId, NamedAggregate};
use futures_util::stream;
use tokio::sync::RwLock;

use crate::{
    DomainEventStream, EventStoreError, Result, Snapshot, Version,
    snapshot::SnapshotRepository,
    store::{
        AggregateIdStream, AppendOutcome, EventStore, EventStream, ScanCursor,
        validate_stream_for_append, validate_version_range,
    },
};

/// In-memory event and snapshot store.
///
/// All conflict checks run under one write lock, which gives the same
/// all-or-nothing behaviour as the unique constraints of the PostgreSQL store.
#[derive(Clone, Default)]
pub struct InMemoryEventStore {
    streams: Arc<RwLock<HashMap<AggregateId, Vec<DomainEventStream>>>>,
    snapshots: Arc<RwLock<HashMap<AggregateId, Snapshot>>>,
}

impl InMemoryEventStore {
    /// Creates a new empty in-memory event store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the total number of events stored.
    pub async fn event_count(&self) -> usize {
        self.streams
            .read()
            .await
            .values()
            .flat_map(|streams| streams.iter().map(DomainEventStream::size))
            .sum()
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn append(&self, stream: DomainEventStream) -> Result<AppendOutcome> {
        validate_stream_for_append(&stream)?;

        let mut store = self.streams.write().await;
        let existing = store.entry(stream.aggregate_id.clone()).or_default();

        if let Some(committed) = existing.iter().find(|s| s.request_id == stream.request_id) {
            if committed.same_content(&stream) {
                return Ok(AppendOutcome::AlreadyAppended);
            }
            return Err(EventStoreError::RequestIdIdempotency {
                stream: Box::new(stream),
            });
        }

        let tail = existing
            .last()
            .map(|s| s.version)
            .unwrap_or(Version::initial());
        if stream.head_version() != tail.next() {
            if stream.is_initial() {
                return Err(EventStoreError::DuplicateAggregateId {
                    stream: Box::new(stream),
                });
            }
            return Err(EventStoreError::EventVersionConflict {
                stream: Box::new(stream),
                actual: tail,
            });
        }

        metrics::counter!("events_appended_total").increment(stream.size() as u64);
        existing.push(stream);
        Ok(AppendOutcome::Appended)
    }

    async fn load(
        &self,
        aggregate_id: &AggregateId,
        head: Version,
        tail: Version,
    ) -> Result<EventStream> {
        validate_version_range(head, tail)?;

        let store = self.streams.read().await;
        let streams: Vec<_> = store
            .get(aggregate_id)
            .map(|streams| {
                streams
                    .iter()
                    .filter(|s| s.version >= head && s.version <= tail)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        Ok(Box::pin(stream::iter(streams.into_iter().map(Ok))))
    }

    async fn load_by_time(
        &self,
        aggregate_id: &AggregateId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<EventStream> {
        let store = self.streams.read().await;
        let streams: Vec<_> = store
            .get(aggregate_id)
            .map(|streams| {
                streams
                    .iter()
                    .filter(|s| s.create_time >= start && s.create_time <= end)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        Ok(Box::pin(stream::iter(streams.into_iter().map(Ok))))
    }

    async fn last_version(&self, aggregate_id: &AggregateId) -> Result<Version> {
        let store = self.streams.read().await;
        Ok(store
            .get(aggregate_id)
            .and_then(|streams| streams.last())
            .map(|s| s.version)
            .unwrap_or(Version::initial()))
    }

    async fn scan_aggregate_id(
        &self,
        named_aggregate: &NamedAggregate,
        cursor: ScanCursor,
        limit: usize,
    ) -> Result<AggregateIdStream> {
        let store = self.streams.read().await;
        let mut ids: Vec<AggregateId> = store
            .iter()
            .filter(|(id, streams)| {
                id.named_aggregate() == named_aggregate
                    && !streams.is_empty()
                    && cursor.is_before(id)
            })
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort_by(|a, b| {
            a.id()
                .cmp(b.id())
                .then_with(|| a.tenant_id().cmp(b.tenant_id()))
        });
        ids.truncate(limit);

        Ok(Box::pin(stream::iter(ids.into_iter().map(Ok))))
    }
}

#[async_trait]
impl SnapshotRepository for InMemoryEventStore {
    async fn load_snapshot(&self, aggregate_id: &AggregateId) -> Result<Option<Snapshot>> {
        let snapshots = self.snapshots.read().await;
        Ok(snapshots.get(aggregate_id).cloned())
    }

    async fn save_snapshot(&self, snapshot: Snapshot) -> Result<()> {
        let mut snapshots = self.snapshots.write().await;
        match snapshots.get(&snapshot.aggregate_id) {
            Some(stored) if stored.version >= snapshot.version => {}
            _ => {
                snapshots.insert(snapshot.aggregate_id.clone(), snapshot);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use common::Header;
    use futures_util::TryStreamExt;

    use super::*;
    use crate::{EventBody, EventStoreExt};

    fn aggregate_id(id: &str) -> AggregateId {
        NamedAggregate::new("test", "thing").aggregate_id(id)
    }

    fn create_test_stream(
        aggregate_id: &AggregateId,
        current: i64,
        request_id: &str,
        names: &[&str],
    ) -> DomainEventStream {
        DomainEventStream::new(
            aggregate_id.clone(),
            Version::new(current),
            request_id,
            format!("cmd-{request_id}"),
            Header::new(),
            names
                .iter()
                .map(|name| EventBody::new(*name, serde_json::json!({"test": true})))
                .collect(),
        )
    }

    #[tokio::test]
    async fn append_first_stream() {
        let store = InMemoryEventStore::new();
        let id = aggregate_id("1");

        let outcome = store
            .append(create_test_stream(&id, 0, "r1", &["Created"]))
            .await
            .unwrap();

        assert_eq!(outcome, AppendOutcome::Appended);
        assert_eq!(store.last_version(&id).await.unwrap(), Version::first());
        assert_eq!(store.event_count().await, 1);
    }

    #[tokio::test]
    async fn versions_are_monotonic_without_gaps() {
        let store = InMemoryEventStore::new();
        let id = aggregate_id("1");

        store
            .append(create_test_stream(&id, 0, "r1", &["Created"]))
            .await
            .unwrap();
        store
            .append(create_test_stream(&id, 1, "r2", &["A", "B"]))
            .await
            .unwrap();
        store
            .append(create_test_stream(&id, 3, "r3", &["C"]))
            .await
            .unwrap();

        let versions: Vec<i64> = store
            .load_all(&id)
            .await
            .unwrap()
            .iter()
            .flat_map(|s| s.events.iter().map(|e| e.version.as_i64()))
            .collect();
        assert_eq!(versions, vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn second_create_is_duplicate_aggregate_id() {
        let store = InMemoryEventStore::new();
        let id = aggregate_id("1");

        store
            .append(create_test_stream(&id, 0, "r1", &["Created"]))
            .await
            .unwrap();
        let result = store
            .append(create_test_stream(&id, 0, "r2", &["Created"]))
            .await;

        assert!(matches!(
            result,
            Err(EventStoreError::DuplicateAggregateId { .. })
        ));
    }

    #[tokio::test]
    async fn stale_version_is_conflict() {
        let store = InMemoryEventStore::new();
        let id = aggregate_id("1");

        store
            .append(create_test_stream(&id, 0, "r1", &["Created"]))
            .await
            .unwrap();
        store
            .append(create_test_stream(&id, 1, "r2", &["Changed"]))
            .await
            .unwrap();

        let result = store
            .append(create_test_stream(&id, 1, "r3", &["Changed"]))
            .await;
        match result {
            Err(EventStoreError::EventVersionConflict { actual, .. }) => {
                assert_eq!(actual, Version::new(2));
            }
            other => panic!("expected version conflict, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn gap_is_conflict() {
        let store = InMemoryEventStore::new();
        let id = aggregate_id("1");

        store
            .append(create_test_stream(&id, 0, "r1", &["Created"]))
            .await
            .unwrap();
        let result = store
            .append(create_test_stream(&id, 5, "r2", &["Changed"]))
            .await;
        assert!(matches!(
            result,
            Err(EventStoreError::EventVersionConflict { .. })
        ));
    }

    #[tokio::test]
    async fn identical_retry_is_a_no_op() {
        let store = InMemoryEventStore::new();
        let id = aggregate_id("1");
        let stream = create_test_stream(&id, 0, "r1", &["Created"]);

        store.append(stream.clone()).await.unwrap();
        let outcome = store.append(stream).await.unwrap();

        assert_eq!(outcome, AppendOutcome::AlreadyAppended);
        assert_eq!(store.event_count().await, 1);
    }

    #[tokio::test]
    async fn reused_request_id_with_different_content_fails() {
        let store = InMemoryEventStore::new();
        let id = aggregate_id("1");

        store
            .append(create_test_stream(&id, 0, "r1", &["Created"]))
            .await
            .unwrap();
        let result = store
            .append(create_test_stream(&id, 1, "r1", &["Changed"]))
            .await;

        match result {
            Err(EventStoreError::RequestIdIdempotency { stream }) => {
                assert_eq!(stream.request_id, "r1");
                assert_eq!(stream.version, Version::new(2));
            }
            other => panic!("expected idempotency error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn concurrent_appends_only_one_wins() {
        let store = InMemoryEventStore::new();
        let id = aggregate_id("1");
        store
            .append(create_test_stream(&id, 0, "r0", &["Created"]))
            .await
            .unwrap();

        let mut handles = Vec::new();
        for i in 0..8 {
            let store = store.clone();
            let stream = create_test_stream(&id, 1, &format!("r{}", i + 1), &["Changed"]);
            handles.push(tokio::spawn(async move { store.append(stream).await }));
        }

        let mut succeeded = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                succeeded += 1;
            }
        }
        assert_eq!(succeeded, 1);
        assert_eq!(store.last_version(&id).await.unwrap(), Version::new(2));
    }

    #[tokio::test]
    async fn empty_stream_is_rejected() {
        let store = InMemoryEventStore::new();
        let id = aggregate_id("1");
        let result = store.append(create_test_stream(&id, 0, "r1", &[])).await;
        assert!(matches!(result, Err(EventStoreError::InvalidStream(_))));
    }

    #[tokio::test]
    async fn load_range_selects_streams_by_last_version() {
        let store = InMemoryEventStore::new();
        let id = aggregate_id("1");
        store
            .append(create_test_stream(&id, 0, "r1", &["A"]))
            .await
            .unwrap();
        store
            .append(create_test_stream(&id, 1, "r2", &["B", "C"]))
            .await
            .unwrap();
        store
            .append(create_test_stream(&id, 3, "r3", &["D"]))
            .await
            .unwrap();

        let streams: Vec<_> = store
            .load(&id, Version::new(2), Version::new(3))
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert_eq!(streams.len(), 1);
        assert_eq!(streams[0].request_id, "r2");

        let after: Vec<_> = store.load_after(&id, Version::new(3)).await.unwrap();
        assert_eq!(after.len(), 1);
        assert_eq!(after[0].version, Version::new(4));
    }

    #[tokio::test]
    async fn load_rejects_reversed_range() {
        let store = InMemoryEventStore::new();
        let result = store
            .load(&aggregate_id("1"), Version::new(3), Version::new(1))
            .await;
        assert!(matches!(
            result,
            Err(EventStoreError::InvalidVersionRange { .. })
        ));
    }

    #[tokio::test]
    async fn load_by_time_window() {
        let store = InMemoryEventStore::new();
        let id = aggregate_id("1");
        let before = Utc::now();
        store
            .append(create_test_stream(&id, 0, "r1", &["A"]))
            .await
            .unwrap();
        let after = Utc::now();

        let inside: Vec<_> = store
            .load_by_time(&id, before, after)
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert_eq!(inside.len(), 1);

        let later: Vec<_> = store
            .load_by_time(
                &id,
                after + chrono::Duration::seconds(1),
                after + chrono::Duration::seconds(2),
            )
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert!(later.is_empty());
    }

    #[tokio::test]
    async fn scan_pages_through_ids_of_one_type() {
        let store = InMemoryEventStore::new();
        for id in ["c", "a", "b"] {
            store
                .append(create_test_stream(&aggregate_id(id), 0, "r", &["Created"]))
                .await
                .unwrap();
        }
        let other = NamedAggregate::new("test", "other").aggregate_id("a");
        store
            .append(create_test_stream(&other, 0, "r", &["Created"]))
            .await
            .unwrap();

        let named = NamedAggregate::new("test", "thing");
        let page: Vec<_> = store
            .scan_aggregate_id(&named, ScanCursor::first(), 2)
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        let ids: Vec<_> = page.iter().map(|id| id.id().to_string()).collect();
        assert_eq!(ids, vec!["a", "b"]);

        let rest: Vec<_> = store
            .scan_aggregate_id(&named, ScanCursor::after(&page[1]), 2)
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].id(), "c");
    }

    #[tokio::test]
    async fn snapshot_keeps_newest_version() {
        let store = InMemoryEventStore::new();
        let id = aggregate_id("1");

        store
            .save_snapshot(Snapshot::new(
                id.clone(),
                Version::new(5),
                serde_json::json!({"v": 5}),
            ))
            .await
            .unwrap();
        store
            .save_snapshot(Snapshot::new(
                id.clone(),
                Version::new(3),
                serde_json::json!({"v": 3}),
            ))
            .await
            .unwrap();

        let stored = store.load_snapshot(&id).await.unwrap().unwrap();
        assert_eq!(stored.version, Version::new(5));
    }

    #[tokio::test]
    async fn snapshot_not_found() {
        let store = InMemoryEventStore::new();
        let result = store.load_snapshot(&aggregate_id("1")).await.unwrap();
        assert!(result.is_none());
    }
}

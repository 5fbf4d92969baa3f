//! Aggregate rehydration from snapshots and the event log.

use std::sync::Arc;

use common::AggregateId;
use event_store::{EventStore, SnapshotRepository, Version};
use futures_util::TryStreamExt;

use crate::aggregate::Aggregate;
use crate::error::Result;
use crate::registry::AggregateMetadata;
use crate::state::StateAggregate;

/// Rebuilds the current state of aggregates of type `A`.
pub struct AggregateRepository<A: Aggregate> {
    event_store: Arc<dyn EventStore>,
    snapshots: Arc<dyn SnapshotRepository>,
    metadata: Arc<AggregateMetadata<A>>,
}

impl<A: Aggregate> Clone for AggregateRepository<A> {
    fn clone(&self) -> Self {
        Self {
            event_store: Arc::clone(&self.event_store),
            snapshots: Arc::clone(&self.snapshots),
            metadata: Arc::clone(&self.metadata),
        }
    }
}

impl<A: Aggregate> AggregateRepository<A> {
    pub fn new(
        event_store: Arc<dyn EventStore>,
        snapshots: Arc<dyn SnapshotRepository>,
        metadata: Arc<AggregateMetadata<A>>,
    ) -> Self {
        Self {
            event_store,
            snapshots,
            metadata,
        }
    }

    pub fn event_store(&self) -> &Arc<dyn EventStore> {
        &self.event_store
    }

    pub fn snapshots(&self) -> &Arc<dyn SnapshotRepository> {
        &self.snapshots
    }

    pub fn metadata(&self) -> &Arc<AggregateMetadata<A>> {
        &self.metadata
    }

    /// Loads the latest snapshot and replays the streams that follow it.
    ///
    /// A snapshot that fails to load or decode is ignored and the aggregate
    /// is replayed from its first event.
    #[tracing::instrument(skip(self), fields(aggregate_id = %aggregate_id))]
    pub async fn rehydrate(&self, aggregate_id: &AggregateId) -> Result<StateAggregate<A>> {
        let state = match self.snapshots.load_snapshot(aggregate_id).await {
            Ok(Some(snapshot)) => match StateAggregate::<A>::from_snapshot(&snapshot) {
                Ok(state) => state,
                Err(e) => {
                    tracing::warn!(error = %e, "Discarding undecodable snapshot");
                    StateAggregate::new(aggregate_id.clone())
                }
            },
            Ok(None) => StateAggregate::new(aggregate_id.clone()),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to load snapshot, replaying full stream");
                StateAggregate::new(aggregate_id.clone())
            }
        };

        self.replay(state, Version::MAX).await
    }

    /// Rebuilds the aggregate as it was at `tail`, ignoring snapshots.
    pub async fn rehydrate_at(
        &self,
        aggregate_id: &AggregateId,
        tail: Version,
    ) -> Result<StateAggregate<A>> {
        self.replay(StateAggregate::new(aggregate_id.clone()), tail)
            .await
    }

    async fn replay(
        &self,
        mut state: StateAggregate<A>,
        tail: Version,
    ) -> Result<StateAggregate<A>> {
        let head = state.expected_next_version();
        if head > tail {
            return Ok(state);
        }

        let mut streams = self
            .event_store
            .load(state.aggregate_id(), head, tail)
            .await?;
        let mut applied = 0usize;
        while let Some(stream) = streams.try_next().await? {
            state.on_sourcing(&stream, &self.metadata.sourcing)?;
            applied += 1;
        }

        tracing::debug!(
            version = %state.version(),
            streams = applied,
            "Aggregate rehydrated"
        );
        Ok(state)
    }
}

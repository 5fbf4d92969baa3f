use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::AggregateId;
use serde::{Deserialize, Serialize};

use crate::{Result, Version};

/// A snapshot of an aggregate's state at a specific version.
///
/// Snapshots only shorten replay. They are never consulted for concurrency
/// checks and may lag behind the event log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// The aggregate this snapshot belongs to.
    pub aggregate_id: AggregateId,

    /// The version of the aggregate at the time of the snapshot.
    pub version: Version,

    /// The serialized aggregate state.
    pub state: serde_json::Value,

    pub deleted: bool,
    pub first_event_time: Option<DateTime<Utc>>,
    pub event_time: Option<DateTime<Utc>>,
    pub first_operator: String,
    pub operator: String,

    /// When the snapshot was created.
    pub snapshot_time: DateTime<Utc>,
}

impl Snapshot {
    /// Creates a snapshot holding only state and version.
    pub fn new(aggregate_id: AggregateId, version: Version, state: serde_json::Value) -> Self {
        Self {
            aggregate_id,
            version,
            state,
            deleted: false,
            first_event_time: None,
            event_time: None,
            first_operator: String::new(),
            operator: String::new(),
            snapshot_time: Utc::now(),
        }
    }

    /// Deserializes the snapshot state into a concrete type.
    pub fn state_as<T: for<'de> Deserialize<'de>>(&self) -> std::result::Result<T, serde_json::Error> {
        serde_json::from_value(self.state.clone())
    }
}

/// Storage for the latest snapshot of each aggregate.
#[async_trait]
pub trait SnapshotRepository: Send + Sync {
    /// Returns the latest snapshot, if any.
    async fn load_snapshot(&self, aggregate_id: &AggregateId) -> Result<Option<Snapshot>>;

    /// Stores a snapshot. A snapshot older than the stored one is ignored.
    async fn save_snapshot(&self, snapshot: Snapshot) -> Result<()>;
}

/// Repository that never stores anything, for aggregates without snapshots.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpSnapshotRepository;

#[async_trait]
impl SnapshotRepository for NoOpSnapshotRepository {
    async fn load_snapshot(&self, _aggregate_id: &AggregateId) -> Result<Option<Snapshot>> {
        Ok(None)
    }

    async fn save_snapshot(&self, _snapshot: Snapshot) -> Result<()> {
        Ok(())
    }
}

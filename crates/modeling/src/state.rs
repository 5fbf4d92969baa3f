//! The in-memory state of one aggregate instance.

use chrono::{DateTime, Utc};
use common::{AggregateId, Header};
use event_store::{DomainEventStream, Snapshot, Version};
use serde::{Serialize, de::DeserializeOwned};

use crate::aggregate::{AggregateDeleted, AggregateRecovered, Event};
use crate::error::{ModelingError, Result};
use crate::registry::SourcingRegistry;

/// Aggregate state plus the bookkeeping the engine keeps for it.
///
/// `version` is 0 until the first stream is sourced. The state value only
/// changes through [`StateAggregate::on_sourcing`].
#[derive(Debug, Clone)]
pub struct StateAggregate<S> {
    aggregate_id: AggregateId,
    version: Version,
    state: S,
    deleted: bool,
    first_event_time: Option<DateTime<Utc>>,
    event_time: Option<DateTime<Utc>>,
    first_operator: String,
    operator: String,
}

impl<S: Default> StateAggregate<S> {
    /// An aggregate that has no events yet.
    pub fn new(aggregate_id: AggregateId) -> Self {
        Self {
            aggregate_id,
            version: Version::initial(),
            state: S::default(),
            deleted: false,
            first_event_time: None,
            event_time: None,
            first_operator: String::new(),
            operator: String::new(),
        }
    }
}

impl<S> StateAggregate<S> {
    pub fn aggregate_id(&self) -> &AggregateId {
        &self.aggregate_id
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn state(&self) -> &S {
        &self.state
    }

    pub fn into_state(self) -> S {
        self.state
    }

    pub fn deleted(&self) -> bool {
        self.deleted
    }

    /// Whether at least one stream has been sourced.
    pub fn initialized(&self) -> bool {
        !self.version.is_initial()
    }

    pub fn first_event_time(&self) -> Option<DateTime<Utc>> {
        self.first_event_time
    }

    pub fn event_time(&self) -> Option<DateTime<Utc>> {
        self.event_time
    }

    pub fn first_operator(&self) -> &str {
        &self.first_operator
    }

    pub fn operator(&self) -> &str {
        &self.operator
    }

    /// The version the next stream must end after.
    pub fn expected_next_version(&self) -> Version {
        self.version.next()
    }
}

impl<S: 'static> StateAggregate<S> {
    /// Applies one stream, which must start right after the current version.
    ///
    /// Events without a sourcing rule are skipped but still advance the
    /// version. On error the aggregate is left unchanged.
    pub fn on_sourcing(
        &mut self,
        stream: &DomainEventStream,
        sourcing: &SourcingRegistry<S>,
    ) -> Result<()>
    where
        S: Clone,
    {
        if stream.aggregate_id != self.aggregate_id {
            return Err(ModelingError::AggregateIdMismatch {
                expected: self.aggregate_id.clone(),
                actual: stream.aggregate_id.clone(),
            });
        }
        if stream.head_version() != self.expected_next_version() {
            return Err(ModelingError::SourcingVersionConflict {
                stream: Box::new(stream.clone()),
                expected: self.expected_next_version(),
            });
        }

        let mut state = self.state.clone();
        let mut deleted = self.deleted;
        for event in &stream.events {
            let name = event.name.as_str();
            if name == AggregateDeleted::NAME {
                deleted = true;
            } else if name == AggregateRecovered::NAME {
                deleted = false;
            } else if !sourcing.apply(&mut state, name, &event.body)? {
                tracing::trace!(
                    aggregate_id = %self.aggregate_id,
                    event = name,
                    "No sourcing rule for event, skipping"
                );
            }
        }

        self.state = state;
        self.deleted = deleted;
        self.version = stream.version;
        self.track_operator(&stream.header, stream.create_time);
        Ok(())
    }
}

impl<S> StateAggregate<S> {
    fn track_operator(&mut self, header: &Header, time: DateTime<Utc>) {
        if self.first_event_time.is_none() {
            self.first_event_time = Some(time);
            self.first_operator = header.operator().to_string();
        }
        self.event_time = Some(time);
        self.operator = header.operator().to_string();
    }
}

impl<S: Serialize> StateAggregate<S> {
    pub fn to_snapshot(&self) -> Result<Snapshot> {
        let mut snapshot = Snapshot::new(
            self.aggregate_id.clone(),
            self.version,
            serde_json::to_value(&self.state)?,
        );
        snapshot.deleted = self.deleted;
        snapshot.first_event_time = self.first_event_time;
        snapshot.event_time = self.event_time;
        snapshot.first_operator = self.first_operator.clone();
        snapshot.operator = self.operator.clone();
        Ok(snapshot)
    }
}

impl<S: DeserializeOwned> StateAggregate<S> {
    pub fn from_snapshot(snapshot: &Snapshot) -> Result<Self> {
        Ok(Self {
            aggregate_id: snapshot.aggregate_id.clone(),
            version: snapshot.version,
            state: snapshot.state_as()?,
            deleted: snapshot.deleted,
            first_event_time: snapshot.first_event_time,
            event_time: snapshot.event_time,
            first_operator: snapshot.first_operator.clone(),
            operator: snapshot.operator.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use common::NamedAggregate;
    use event_store::EventBody;
    use serde::Deserialize;

    use super::*;

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct Total {
        sum: i64,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Added {
        amount: i64,
    }

    impl Event for Added {
        const NAME: &'static str = "Added";
    }

    fn sourcing() -> SourcingRegistry<Total> {
        let mut registry = SourcingRegistry::new();
        registry.on::<Added, _>(|state: &mut Total, event| state.sum += event.amount);
        registry
    }

    fn id() -> AggregateId {
        NamedAggregate::new("test", "total").aggregate_id("t-1")
    }

    fn stream(current: i64, bodies: Vec<EventBody>, operator: &str) -> DomainEventStream {
        DomainEventStream::new(
            id(),
            Version::new(current),
            format!("r{current}"),
            format!("c{current}"),
            Header::new().with(Header::OPERATOR, operator),
            bodies,
        )
    }

    fn added(amount: i64) -> EventBody {
        EventBody::new("Added", serde_json::json!({ "amount": amount }))
    }

    #[test]
    fn sourcing_advances_version_and_state() {
        let sourcing = sourcing();
        let mut state = StateAggregate::<Total>::new(id());
        assert!(!state.initialized());

        state
            .on_sourcing(&stream(0, vec![added(2), added(3)], "alice"), &sourcing)
            .unwrap();
        state
            .on_sourcing(&stream(2, vec![added(5)], "bob"), &sourcing)
            .unwrap();

        assert!(state.initialized());
        assert_eq!(state.version(), Version::new(3));
        assert_eq!(state.state().sum, 10);
        assert_eq!(state.first_operator(), "alice");
        assert_eq!(state.operator(), "bob");
        assert!(state.first_event_time().unwrap() <= state.event_time().unwrap());
    }

    #[test]
    fn unknown_events_still_advance_version() {
        let sourcing = sourcing();
        let mut state = StateAggregate::<Total>::new(id());

        state
            .on_sourcing(
                &stream(0, vec![EventBody::new("Renamed", serde_json::json!({}))], "a"),
                &sourcing,
            )
            .unwrap();

        assert_eq!(state.version(), Version::first());
        assert_eq!(state.state(), &Total::default());
    }

    #[test]
    fn gap_is_a_sourcing_conflict() {
        let sourcing = sourcing();
        let mut state = StateAggregate::<Total>::new(id());

        let result = state.on_sourcing(&stream(1, vec![added(1)], "a"), &sourcing);

        assert!(matches!(
            result,
            Err(ModelingError::SourcingVersionConflict { expected, .. }) if expected == Version::first()
        ));
        assert!(!state.initialized());
    }

    #[test]
    fn foreign_stream_is_rejected() {
        let sourcing = sourcing();
        let mut state =
            StateAggregate::<Total>::new(NamedAggregate::new("test", "total").aggregate_id("t-2"));

        let result = state.on_sourcing(&stream(0, vec![added(1)], "a"), &sourcing);

        assert!(matches!(result, Err(ModelingError::AggregateIdMismatch { .. })));
    }

    #[test]
    fn malformed_event_leaves_state_untouched() {
        let sourcing = sourcing();
        let mut state = StateAggregate::<Total>::new(id());
        let bad = EventBody::new("Added", serde_json::json!({ "amount": "many" }));

        let result = state.on_sourcing(&stream(0, vec![added(1), bad], "a"), &sourcing);

        assert!(matches!(result, Err(ModelingError::Serialization(_))));
        assert_eq!(state.state().sum, 0);
        assert_eq!(state.version(), Version::initial());
    }

    #[test]
    fn delete_and_recover_toggle_flag() {
        let sourcing = sourcing();
        let mut state = StateAggregate::<Total>::new(id());

        state
            .on_sourcing(
                &stream(
                    0,
                    vec![added(1), EventBody::new(AggregateDeleted::NAME, serde_json::json!({}))],
                    "a",
                ),
                &sourcing,
            )
            .unwrap();
        assert!(state.deleted());

        state
            .on_sourcing(
                &stream(
                    2,
                    vec![EventBody::new(AggregateRecovered::NAME, serde_json::json!({}))],
                    "a",
                ),
                &sourcing,
            )
            .unwrap();
        assert!(!state.deleted());
        assert_eq!(state.version(), Version::new(3));
    }

    #[test]
    fn snapshot_roundtrip_keeps_metadata() {
        let sourcing = sourcing();
        let mut state = StateAggregate::<Total>::new(id());
        state
            .on_sourcing(&stream(0, vec![added(4)], "alice"), &sourcing)
            .unwrap();

        let snapshot = state.to_snapshot().unwrap();
        let restored = StateAggregate::<Total>::from_snapshot(&snapshot).unwrap();

        assert_eq!(restored.version(), state.version());
        assert_eq!(restored.state(), state.state());
        assert_eq!(restored.first_operator(), "alice");
        assert_eq!(restored.event_time(), state.event_time());
    }
}

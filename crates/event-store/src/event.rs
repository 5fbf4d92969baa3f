use chrono::{DateTime, Utc};
use common::{AggregateId, Header, generate_global_id};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(Uuid);

impl EventId {
    /// Creates a new random event ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Version number for an aggregate, used for optimistic concurrency control.
///
/// Versions start at 1 for the first event and increment by 1 for each
/// subsequent event on an aggregate. Version 0 means "no events yet".
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Version(i64);

impl Version {
    /// Upper bound used by open-ended loads.
    pub const MAX: Version = Version(i64::MAX);

    /// Creates a new version from a raw value.
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    /// Returns the initial version (0) for a new aggregate.
    pub fn initial() -> Self {
        Self(0)
    }

    /// Returns the first version (1) for the first event.
    pub fn first() -> Self {
        Self(1)
    }

    /// Returns the next version.
    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    /// Returns this version advanced by `count` events.
    pub fn advance(&self, count: usize) -> Self {
        Self(self.0 + count as i64)
    }

    pub fn is_initial(&self) -> bool {
        self.0 == 0
    }

    /// Returns the raw version value.
    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for Version {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl From<Version> for i64 {
    fn from(version: Version) -> Self {
        version.0
    }
}

/// Name and payload of an event before it is placed in a stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventBody {
    pub name: String,
    pub body: serde_json::Value,
}

impl EventBody {
    pub fn new(name: impl Into<String>, body: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            body,
        }
    }
}

/// A single persisted event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainEvent {
    pub id: EventId,
    /// The event type (e.g. "ItemAdded").
    pub name: String,
    /// The version of the aggregate after this event.
    pub version: Version,
    /// Position of the event inside its stream, starting at 0.
    pub sequence: usize,
    pub body: serde_json::Value,
}

/// The ordered, non-empty batch of events produced by one command.
///
/// `version` is the version of the last event; the events occupy the
/// contiguous range `version - len + 1 ..= version`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainEventStream {
    pub id: String,
    pub aggregate_id: AggregateId,
    pub version: Version,
    pub events: Vec<DomainEvent>,
    pub request_id: String,
    pub command_id: String,
    pub header: Header,
    pub create_time: DateTime<Utc>,
}

impl DomainEventStream {
    /// Builds the stream that follows `current_version`.
    pub fn new(
        aggregate_id: AggregateId,
        current_version: Version,
        request_id: impl Into<String>,
        command_id: impl Into<String>,
        header: Header,
        bodies: Vec<EventBody>,
    ) -> Self {
        let events: Vec<DomainEvent> = bodies
            .into_iter()
            .enumerate()
            .map(|(sequence, body)| DomainEvent {
                id: EventId::new(),
                name: body.name,
                version: current_version.advance(sequence + 1),
                sequence,
                body: body.body,
            })
            .collect();
        let version = current_version.advance(events.len());

        Self {
            id: generate_global_id(),
            aggregate_id,
            version,
            events,
            request_id: request_id.into(),
            command_id: command_id.into(),
            header,
            create_time: Utc::now(),
        }
    }

    /// Version of the first event in the stream.
    pub fn head_version(&self) -> Version {
        Version::new(self.version.as_i64() - self.events.len() as i64 + 1)
    }

    pub fn size(&self) -> usize {
        self.events.len()
    }

    /// Whether this stream creates its aggregate.
    pub fn is_initial(&self) -> bool {
        self.head_version() == Version::first()
    }

    /// Compares everything a retried append would reproduce.
    pub fn same_content(&self, other: &DomainEventStream) -> bool {
        self.aggregate_id == other.aggregate_id
            && self.version == other.version
            && self.request_id == other.request_id
            && self.command_id == other.command_id
            && self.events.len() == other.events.len()
            && self
                .events
                .iter()
                .zip(&other.events)
                .all(|(a, b)| a.name == b.name && a.version == b.version && a.body == b.body)
    }

    /// Checks the stream is non-empty and its versions are contiguous.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.events.is_empty() {
            return Err("event stream must contain at least one event".to_string());
        }
        if self.head_version() < Version::first() {
            return Err(format!(
                "event stream version {} is too small for {} events",
                self.version,
                self.events.len()
            ));
        }
        let mut expected = self.head_version();
        for event in &self.events {
            if event.version != expected {
                return Err(format!(
                    "event versions must be contiguous: expected {}, got {}",
                    expected, event.version
                ));
            }
            expected = expected.next();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use common::NamedAggregate;

    use super::*;

    fn aggregate_id() -> AggregateId {
        NamedAggregate::new("test", "thing").aggregate_id("1")
    }

    fn bodies(names: &[&str]) -> Vec<EventBody> {
        names
            .iter()
            .map(|name| EventBody::new(*name, serde_json::json!({"name": name})))
            .collect()
    }

    #[test]
    fn version_ordering() {
        assert!(Version::initial() < Version::first());
        assert_eq!(Version::initial().next(), Version::first());
        assert_eq!(Version::new(3).advance(2), Version::new(5));
        assert!(Version::initial().is_initial());
    }

    #[test]
    fn stream_versions_are_contiguous_from_current() {
        let stream = DomainEventStream::new(
            aggregate_id(),
            Version::new(4),
            "req",
            "cmd",
            Header::new(),
            bodies(&["A", "B", "C"]),
        );

        assert_eq!(stream.version, Version::new(7));
        assert_eq!(stream.head_version(), Version::new(5));
        assert_eq!(stream.size(), 3);
        let versions: Vec<_> = stream.events.iter().map(|e| e.version.as_i64()).collect();
        assert_eq!(versions, vec![5, 6, 7]);
        assert!(!stream.is_initial());
        assert!(stream.validate().is_ok());
    }

    #[test]
    fn first_stream_is_initial() {
        let stream = DomainEventStream::new(
            aggregate_id(),
            Version::initial(),
            "req",
            "cmd",
            Header::new(),
            bodies(&["Created"]),
        );
        assert!(stream.is_initial());
    }

    #[test]
    fn empty_stream_is_invalid() {
        let stream = DomainEventStream::new(
            aggregate_id(),
            Version::initial(),
            "req",
            "cmd",
            Header::new(),
            vec![],
        );
        assert!(stream.validate().is_err());
    }

    #[test]
    fn gap_in_versions_is_invalid() {
        let mut stream = DomainEventStream::new(
            aggregate_id(),
            Version::initial(),
            "req",
            "cmd",
            Header::new(),
            bodies(&["A", "B"]),
        );
        stream.events[1].version = Version::new(5);
        assert!(stream.validate().is_err());
    }

    #[test]
    fn same_content_ignores_generated_ids() {
        let a = DomainEventStream::new(
            aggregate_id(),
            Version::initial(),
            "req",
            "cmd",
            Header::new(),
            bodies(&["A"]),
        );
        let b = DomainEventStream::new(
            aggregate_id(),
            Version::initial(),
            "req",
            "cmd",
            Header::new(),
            bodies(&["A"]),
        );
        assert_ne!(a.id, b.id);
        assert!(a.same_content(&b));

        let c = DomainEventStream::new(
            aggregate_id(),
            Version::first(),
            "req",
            "cmd",
            Header::new(),
            bodies(&["A"]),
        );
        assert!(!a.same_content(&c));
    }
}

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::IdentityError;

/// Tenant used when a command does not name one.
pub const DEFAULT_TENANT_ID: &str = "(0)";

/// Generates a new globally unique identifier for messages and aggregates.
pub fn generate_global_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// A bounded context plus an aggregate type name.
///
/// Each named aggregate owns its own dispatcher, its own event table and its own
/// idempotency checker.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NamedAggregate {
    pub context_name: String,
    pub aggregate_name: String,
}

impl NamedAggregate {
    pub fn new(context_name: impl Into<String>, aggregate_name: impl Into<String>) -> Self {
        Self {
            context_name: context_name.into(),
            aggregate_name: aggregate_name.into(),
        }
    }

    /// Builds an id of this aggregate type in the default tenant.
    pub fn aggregate_id(&self, id: impl Into<String>) -> AggregateId {
        AggregateId::new(self.clone(), id)
    }

    /// Builds an id of this aggregate type with a freshly generated id.
    pub fn generate_id(&self) -> AggregateId {
        AggregateId::new(self.clone(), generate_global_id())
    }
}

impl std::fmt::Display for NamedAggregate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.context_name, self.aggregate_name)
    }
}

/// Unique identifier for an aggregate instance.
///
/// An id is only meaningful together with its aggregate type and tenant, so the
/// three travel together. Ids of different aggregate types are not ordered:
/// `partial_cmp` returns `None` and [`AggregateId::compare`] returns an error.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AggregateId {
    #[serde(flatten)]
    named_aggregate: NamedAggregate,
    id: String,
    tenant_id: String,
}

impl AggregateId {
    /// Creates an aggregate ID in the default tenant.
    pub fn new(named_aggregate: NamedAggregate, id: impl Into<String>) -> Self {
        Self {
            named_aggregate,
            id: id.into(),
            tenant_id: DEFAULT_TENANT_ID.to_string(),
        }
    }

    /// Returns the same id scoped to another tenant.
    pub fn with_tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = tenant_id.into();
        self
    }

    pub fn named_aggregate(&self) -> &NamedAggregate {
        &self.named_aggregate
    }

    pub fn context_name(&self) -> &str {
        &self.named_aggregate.context_name
    }

    pub fn aggregate_name(&self) -> &str {
        &self.named_aggregate.aggregate_name
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    /// Orders two ids of the same aggregate type.
    pub fn compare(&self, other: &Self) -> Result<Ordering, IdentityError> {
        if self.named_aggregate != other.named_aggregate {
            return Err(IdentityError::MismatchedAggregate {
                left: self.named_aggregate.clone(),
                right: other.named_aggregate.clone(),
            });
        }
        Ok(self
            .id
            .cmp(&other.id)
            .then_with(|| self.tenant_id.cmp(&other.tenant_id)))
    }

    /// Picks one of `lanes` worker lanes for this id.
    ///
    /// The result depends only on the id bytes and is the same in every
    /// process and on every platform, so every command for the same
    /// aggregate lands on the same lane.
    pub fn lane_of(&self, lanes: usize) -> usize {
        if lanes <= 1 {
            return 0;
        }
        (fnv1a64(self.id.as_bytes()) % lanes as u64) as usize
    }
}

// FNV-1a, 64 bit.
fn fnv1a64(bytes: &[u8]) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    bytes
        .iter()
        .fold(OFFSET, |hash, &b| (hash ^ u64::from(b)).wrapping_mul(PRIME))
}

impl PartialOrd for AggregateId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        self.compare(other).ok()
    }
}

impl std::fmt::Display for AggregateId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.named_aggregate, self.id)?;
        if self.tenant_id != DEFAULT_TENANT_ID {
            write!(f, "#{}", self.tenant_id)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn orders() -> NamedAggregate {
        NamedAggregate::new("sales", "order")
    }

    #[test]
    fn generated_ids_are_unique() {
        let id1 = orders().generate_id();
        let id2 = orders().generate_id();
        assert_ne!(id1, id2);
    }

    #[test]
    fn ids_of_same_type_are_ordered_by_id() {
        let a = orders().aggregate_id("a");
        let b = orders().aggregate_id("b");
        assert_eq!(a.compare(&b), Ok(Ordering::Less));
        assert!(a < b);
    }

    #[test]
    fn comparing_different_types_is_an_error() {
        let order = orders().aggregate_id("1");
        let cart = NamedAggregate::new("sales", "cart").aggregate_id("1");

        assert!(matches!(
            order.compare(&cart),
            Err(IdentityError::MismatchedAggregate { .. })
        ));
        assert_eq!(order.partial_cmp(&cart), None);
    }

    #[test]
    fn tenant_is_part_of_identity() {
        let a = orders().aggregate_id("1");
        let b = orders().aggregate_id("1").with_tenant("acme");
        assert_ne!(a, b);
        assert_eq!(b.tenant_id(), "acme");
        assert_eq!(a.tenant_id(), DEFAULT_TENANT_ID);
    }

    #[test]
    fn lane_is_stable_and_in_range() {
        let id = orders().aggregate_id("order-42");
        let lane = id.lane_of(8);
        assert!(lane < 8);
        for _ in 0..10 {
            assert_eq!(id.clone().lane_of(8), lane);
        }
        assert_eq!(id.lane_of(1), 0);
        assert_eq!(id.lane_of(0), 0);
    }

    #[test]
    fn lane_hash_is_fixed_across_processes() {
        assert_eq!(fnv1a64(b""), 0xcbf2_9ce4_8422_2325);
        assert_eq!(fnv1a64(b"a"), 0xaf63_dc4c_8601_ec8c);
        assert_eq!(fnv1a64(b"foobar"), 0x8594_4171_f739_67e8);

        assert_eq!(orders().aggregate_id("order-42").lane_of(8), 4);
        assert_eq!(orders().aggregate_id("order-42").lane_of(3), 2);
        assert_eq!(orders().aggregate_id("a").lane_of(7), 5);
    }

    #[test]
    fn display_includes_type_and_tenant() {
        let id = orders().aggregate_id("7");
        assert_eq!(id.to_string(), "sales.order@7");
        assert_eq!(id.with_tenant("t1").to_string(), "sales.order@7#t1");
    }

    #[test]
    fn aggregate_id_serialization_roundtrip() {
        let id = orders().aggregate_id("1").with_tenant("t");
        let json = serde_json::to_value(&id).unwrap();
        assert_eq!(json["context_name"], "sales");
        assert_eq!(json["aggregate_name"], "order");
        let deserialized: AggregateId = serde_json::from_value(json).unwrap();
        assert_eq!(id, deserialized);
    }
}

use event_store::Version;
use serde::{Deserialize, Serialize};

/// When to write a snapshot after a successful append.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SnapshotPolicy {
    Disabled,
    /// Snapshot whenever an append crosses a multiple of `n` events.
    Every(u64),
}

impl Default for SnapshotPolicy {
    fn default() -> Self {
        SnapshotPolicy::Every(100)
    }
}

impl SnapshotPolicy {
    /// Builds the policy from an interval where 0 disables snapshots.
    pub fn from_interval(interval: u64) -> Self {
        if interval == 0 {
            SnapshotPolicy::Disabled
        } else {
            SnapshotPolicy::Every(interval)
        }
    }

    /// `Every(0)` behaves like `Disabled`.
    pub fn should_snapshot(&self, previous: Version, current: Version) -> bool {
        match *self {
            SnapshotPolicy::Disabled | SnapshotPolicy::Every(0) => false,
            SnapshotPolicy::Every(n) => {
                let Ok(n) = i64::try_from(n) else {
                    return false;
                };
                current > previous && current.as_i64() / n > previous.as_i64() / n
            }
        }
    }
}

use thiserror::Error;

use crate::NamedAggregate;

/// Errors raised when comparing or building aggregate identities.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentityError {
    /// Two ids belong to different aggregate types and cannot be ordered.
    #[error("cannot compare aggregate ids of different types: {left} vs {right}")]
    MismatchedAggregate {
        left: NamedAggregate,
        right: NamedAggregate,
    },
}

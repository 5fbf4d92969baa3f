//! Identity and message primitives shared across the engine.

pub mod error;
pub mod error_codes;
pub mod function;
pub mod header;
pub mod types;

pub use error::IdentityError;
pub use error_codes::{ErrorCode, ErrorInfo};
pub use function::FunctionInfo;
pub use header::Header;
pub use types::{AggregateId, DEFAULT_TENANT_ID, NamedAggregate, generate_global_id};

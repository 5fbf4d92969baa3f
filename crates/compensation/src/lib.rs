//! Compensation for failed reactions.
//!
//! When a retryable reaction fails, [`CompensationFilter`] records the
//! failure as an event-sourced [`ExecutionFailed`] aggregate. The
//! [`RetryScheduler`] polls those records and runs the reaction again on an
//! exponential backoff until it succeeds, the retry budget is spent, or the
//! failure is classified as unrecoverable.

pub mod error;
pub mod execution_failed;
pub mod filter;
pub mod recoverable;
pub mod retry;
pub mod scheduler;
pub mod service;

pub use error::{CompensationError, Result};
pub use execution_failed::{
    ApplyExecutionFailed, ApplyExecutionSuccess, ApplyRetrySpec, ChangeFunction,
    CompensationPrepared, CreateExecutionFailed, ErrorDetails, EventRef, ExecutionFailed,
    ExecutionFailedApplied, ExecutionFailedCreated, ExecutionFailedRecorded,
    ExecutionSuccessApplied, ForcePrepareCompensation, FunctionChanged, MarkRecoverable,
    PrepareCompensation, RecordExecutionFailed, RecoverableMarked, RetrySpecApplied,
    compensation_id,
};
pub use filter::CompensationFilter;
pub use recoverable::RecoverableRegistry;
pub use retry::{ExecutionFailedStatus, RecoverableType, RetrySpec, RetryState};
pub use scheduler::{RetryOutcome, RetryScheduler, SchedulerConfig, SchedulerHandle};
pub use service::ExecutionFailedService;

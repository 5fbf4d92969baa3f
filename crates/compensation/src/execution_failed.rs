//! The `ExecutionFailed` aggregate: one record per failed reaction.

use chrono::{DateTime, Utc};
use common::{AggregateId, FunctionInfo};
use event_store::{DomainEvent, DomainEventStream, EventId, Version};
use modeling::{
    Aggregate, Command, CommandRegistry, CommandRejected, Event, Events, SourcingRegistry,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::retry::{ExecutionFailedStatus, RecoverableType, RetrySpec, RetryState};

/// Locates the event whose processing failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRef {
    pub aggregate_id: AggregateId,
    pub event_id: EventId,
    pub name: String,
    pub version: Version,
}

impl EventRef {
    pub fn of(stream: &DomainEventStream, event: &DomainEvent) -> Self {
        Self {
            aggregate_id: stream.aggregate_id.clone(),
            event_id: event.id,
            name: event.name.clone(),
            version: event.version,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetails {
    pub error_code: String,
    pub error_msg: String,
    /// Full cause chain.
    pub stack_trace: String,
}

impl ErrorDetails {
    pub fn new(error_code: impl Into<String>, error_msg: impl Into<String>) -> Self {
        Self {
            error_code: error_code.into(),
            error_msg: error_msg.into(),
            stack_trace: String::new(),
        }
    }

    pub fn from_error(error_code: impl Into<String>, error: &anyhow::Error) -> Self {
        Self {
            error_code: error_code.into(),
            error_msg: format!("{error:#}"),
            stack_trace: format!("{error:?}"),
        }
    }
}

/// Id of the record for `function` failing on `event_id`.
///
/// Derived as a UUID v5, so the same pair always maps to the same record.
pub fn compensation_id(event_id: &EventId, function: &FunctionInfo) -> AggregateId {
    let name = format!("{event_id}@{function}");
    let id = Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes());
    ExecutionFailed::named_aggregate().aggregate_id(id.simple().to_string())
}

// Commands

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateExecutionFailed {
    pub event: EventRef,
    pub function: FunctionInfo,
    pub error: ErrorDetails,
    pub execute_at: DateTime<Utc>,
    pub retry_spec: RetrySpec,
    pub recoverable: RecoverableType,
}

impl Command for CreateExecutionFailed {
    const NAME: &'static str = "CreateExecutionFailed";
    const IS_CREATE: bool = true;
}

/// Starts a scheduled retry. Rejected unless the record is due.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrepareCompensation {
    pub prepare_at: DateTime<Utc>,
}

impl Command for PrepareCompensation {
    const NAME: &'static str = "PrepareCompensation";
}

/// Starts a retry even when the retry budget is spent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForcePrepareCompensation {
    pub prepare_at: DateTime<Utc>,
}

impl Command for ForcePrepareCompensation {
    const NAME: &'static str = "ForcePrepareCompensation";
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplyExecutionFailed {
    pub error: ErrorDetails,
    pub execute_at: DateTime<Utc>,
    pub recoverable: RecoverableType,
}

impl Command for ApplyExecutionFailed {
    const NAME: &'static str = "ApplyExecutionFailed";
}

/// Records a new failure on an existing record, outside of a retry: the
/// same event failed again on a later delivery. Restarts the retry budget.
/// Rejected while a retry is prepared.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordExecutionFailed {
    pub error: ErrorDetails,
    pub execute_at: DateTime<Utc>,
    pub recoverable: RecoverableType,
}

impl Command for RecordExecutionFailed {
    const NAME: &'static str = "RecordExecutionFailed";
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplyExecutionSuccess {
    pub execute_at: DateTime<Utc>,
}

impl Command for ApplyExecutionSuccess {
    const NAME: &'static str = "ApplyExecutionSuccess";
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplyRetrySpec {
    pub retry_spec: RetrySpec,
}

impl Command for ApplyRetrySpec {
    const NAME: &'static str = "ApplyRetrySpec";
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarkRecoverable {
    pub recoverable: RecoverableType,
}

impl Command for MarkRecoverable {
    const NAME: &'static str = "MarkRecoverable";
}

/// Points the record at another function, e.g. after a reaction was renamed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeFunction {
    pub function: FunctionInfo,
}

impl Command for ChangeFunction {
    const NAME: &'static str = "ChangeFunction";
}

// Events

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionFailedCreated {
    pub event: EventRef,
    pub function: FunctionInfo,
    pub error: ErrorDetails,
    pub execute_at: DateTime<Utc>,
    pub retry_spec: RetrySpec,
    pub retry_state: RetryState,
    pub recoverable: RecoverableType,
}

impl Event for ExecutionFailedCreated {
    const NAME: &'static str = "ExecutionFailedCreated";
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompensationPrepared {
    pub event_id: EventId,
    pub function: FunctionInfo,
    pub retry_state: RetryState,
}

impl Event for CompensationPrepared {
    const NAME: &'static str = "CompensationPrepared";
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionFailedApplied {
    pub error: ErrorDetails,
    pub execute_at: DateTime<Utc>,
    pub recoverable: RecoverableType,
}

impl Event for ExecutionFailedApplied {
    const NAME: &'static str = "ExecutionFailedApplied";
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionFailedRecorded {
    pub error: ErrorDetails,
    pub execute_at: DateTime<Utc>,
    pub retry_state: RetryState,
    pub recoverable: RecoverableType,
}

impl Event for ExecutionFailedRecorded {
    const NAME: &'static str = "ExecutionFailedRecorded";
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionSuccessApplied {
    pub execute_at: DateTime<Utc>,
}

impl Event for ExecutionSuccessApplied {
    const NAME: &'static str = "ExecutionSuccessApplied";
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySpecApplied {
    pub retry_spec: RetrySpec,
}

impl Event for RetrySpecApplied {
    const NAME: &'static str = "RetrySpecApplied";
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoverableMarked {
    pub recoverable: RecoverableType,
}

impl Event for RecoverableMarked {
    const NAME: &'static str = "RecoverableMarked";
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionChanged {
    pub function: FunctionInfo,
}

impl Event for FunctionChanged {
    const NAME: &'static str = "FunctionChanged";
}

/// A reaction that failed on one event, and its retry progress.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionFailed {
    event: Option<EventRef>,
    function: Option<FunctionInfo>,
    error: ErrorDetails,
    execute_at: DateTime<Utc>,
    retry_spec: RetrySpec,
    retry_state: RetryState,
    status: ExecutionFailedStatus,
    recoverable: RecoverableType,
}

impl Aggregate for ExecutionFailed {
    const CONTEXT_NAME: &'static str = "compensation";
    const AGGREGATE_NAME: &'static str = "execution_failed";

    fn register_commands(registry: &mut CommandRegistry<Self>) {
        registry
            .on::<CreateExecutionFailed, _>(|_, command| {
                let retry_state = command
                    .retry_spec
                    .next_retry_state(0, command.execute_at);
                Ok(Events::one(ExecutionFailedCreated {
                    event: command.event,
                    function: command.function,
                    error: command.error,
                    execute_at: command.execute_at,
                    retry_spec: command.retry_spec,
                    retry_state,
                    recoverable: command.recoverable,
                }))
            })
            .on::<PrepareCompensation, _>(|state, command| {
                let record = state.state();
                if !record.can_retry(command.prepare_at) {
                    return Err(CommandRejected::illegal_state(format!(
                        "execution can not be retried: status {}, {} of {} retries used",
                        record.status, record.retry_state.retries, record.retry_spec.max_retries
                    )));
                }
                record.prepared(command.prepare_at)
            })
            .on::<ForcePrepareCompensation, _>(|state, command| {
                let record = state.state();
                if !record.can_force_retry(command.prepare_at) {
                    return Err(CommandRejected::illegal_state(format!(
                        "execution can not be retried: status {}",
                        record.status
                    )));
                }
                record.prepared(command.prepare_at)
            })
            .on::<ApplyExecutionFailed, _>(|state, command| {
                state.state().ensure_prepared()?;
                Ok(Events::one(ExecutionFailedApplied {
                    error: command.error,
                    execute_at: command.execute_at,
                    recoverable: command.recoverable,
                }))
            })
            .on::<RecordExecutionFailed, _>(|state, command| {
                let record = state.state();
                if record.status == ExecutionFailedStatus::Prepared {
                    return Err(CommandRejected::illegal_state(
                        "a retry is in progress, its outcome will be applied",
                    ));
                }
                Ok(Events::one(ExecutionFailedRecorded {
                    error: command.error,
                    execute_at: command.execute_at,
                    retry_state: record.retry_spec.next_retry_state(0, command.execute_at),
                    recoverable: command.recoverable,
                }))
            })
            .on::<ApplyExecutionSuccess, _>(|state, command| {
                state.state().ensure_prepared()?;
                Ok(Events::one(ExecutionSuccessApplied {
                    execute_at: command.execute_at,
                }))
            })
            .on::<ApplyRetrySpec, _>(|_, command| {
                Ok(Events::one(RetrySpecApplied {
                    retry_spec: command.retry_spec,
                }))
            })
            .on::<MarkRecoverable, _>(|state, command| {
                if state.state().recoverable == command.recoverable {
                    return Err(CommandRejected::bad_request(format!(
                        "recoverable is already {}",
                        command.recoverable
                    )));
                }
                Ok(Events::one(RecoverableMarked {
                    recoverable: command.recoverable,
                }))
            })
            .on::<ChangeFunction, _>(|state, command| {
                if state.state().function.as_ref() == Some(&command.function) {
                    return Err(CommandRejected::bad_request(format!(
                        "function is already {}",
                        command.function
                    )));
                }
                Ok(Events::one(FunctionChanged {
                    function: command.function,
                }))
            });
    }

    fn register_sourcing(registry: &mut SourcingRegistry<Self>) {
        registry
            .on::<ExecutionFailedCreated, _>(|state, event| {
                state.event = Some(event.event);
                state.function = Some(event.function);
                state.error = event.error;
                state.execute_at = event.execute_at;
                state.retry_spec = event.retry_spec;
                state.retry_state = event.retry_state;
                state.status = ExecutionFailedStatus::Failed;
                state.recoverable = event.recoverable;
            })
            .on::<CompensationPrepared, _>(|state, event| {
                state.retry_state = event.retry_state;
                state.status = ExecutionFailedStatus::Prepared;
            })
            .on::<ExecutionFailedApplied, _>(|state, event| {
                state.error = event.error;
                state.execute_at = event.execute_at;
                state.recoverable = event.recoverable;
                state.status = ExecutionFailedStatus::Failed;
            })
            .on::<ExecutionFailedRecorded, _>(|state, event| {
                state.error = event.error;
                state.execute_at = event.execute_at;
                state.retry_state = event.retry_state;
                state.recoverable = event.recoverable;
                state.status = ExecutionFailedStatus::Failed;
            })
            .on::<ExecutionSuccessApplied, _>(|state, event| {
                state.execute_at = event.execute_at;
                state.status = ExecutionFailedStatus::Succeeded;
            })
            .on::<RetrySpecApplied, _>(|state, event| state.retry_spec = event.retry_spec)
            .on::<RecoverableMarked, _>(|state, event| state.recoverable = event.recoverable)
            .on::<FunctionChanged, _>(|state, event| state.function = Some(event.function));
    }
}

impl ExecutionFailed {
    pub fn event(&self) -> Option<&EventRef> {
        self.event.as_ref()
    }

    pub fn function(&self) -> Option<&FunctionInfo> {
        self.function.as_ref()
    }

    pub fn error(&self) -> &ErrorDetails {
        &self.error
    }

    pub fn execute_at(&self) -> DateTime<Utc> {
        self.execute_at
    }

    pub fn retry_spec(&self) -> &RetrySpec {
        &self.retry_spec
    }

    pub fn retry_state(&self) -> &RetryState {
        &self.retry_state
    }

    pub fn status(&self) -> ExecutionFailedStatus {
        self.status
    }

    pub fn recoverable(&self) -> RecoverableType {
        self.recoverable
    }

    /// Whether the retry budget is not spent yet.
    pub fn is_retryable(&self) -> bool {
        self.retry_state.retries < self.retry_spec.max_retries
    }

    /// Whether a retry may start now, ignoring the retry budget: the record
    /// failed, or its prepared retry exceeded the execution timeout.
    pub fn can_force_retry(&self, now: DateTime<Utc>) -> bool {
        match self.status {
            ExecutionFailedStatus::Failed => true,
            ExecutionFailedStatus::Prepared => self.retry_state.timed_out(now),
            ExecutionFailedStatus::Succeeded => false,
        }
    }

    pub fn can_retry(&self, now: DateTime<Utc>) -> bool {
        self.is_retryable() && self.can_force_retry(now)
    }

    /// Whether the scheduler should retry now: retryable and past the
    /// backoff.
    pub fn should_retry(&self, now: DateTime<Utc>) -> bool {
        self.can_retry(now) && now >= self.retry_state.next_retry_at
    }

    fn prepared(&self, prepare_at: DateTime<Utc>) -> Result<Events, CommandRejected> {
        let (Some(event), Some(function)) = (&self.event, &self.function) else {
            return Err(CommandRejected::illegal_state("execution record is empty"));
        };
        let retries = self.retry_state.retries.saturating_add(1);
        Ok(Events::one(CompensationPrepared {
            event_id: event.event_id,
            function: function.clone(),
            retry_state: self.retry_spec.next_retry_state(retries, prepare_at),
        }))
    }

    fn ensure_prepared(&self) -> Result<(), CommandRejected> {
        if self.status != ExecutionFailedStatus::Prepared {
            return Err(CommandRejected::illegal_state(format!(
                "execution is {}, not PREPARED",
                self.status
            )));
        }
        Ok(())
    }
}

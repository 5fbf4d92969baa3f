//! Command-side access to execution records.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use common::{AggregateId, FunctionInfo};
use modeling::{Command, CommandMessage, CommandProcessor, StateAggregate};
use tokio::sync::Mutex;

use crate::error::Result;
use crate::execution_failed::{
    ApplyExecutionFailed, ApplyExecutionSuccess, ApplyRetrySpec, ChangeFunction,
    CreateExecutionFailed, ErrorDetails, ExecutionFailed, ForcePrepareCompensation,
    MarkRecoverable, PrepareCompensation, RecordExecutionFailed,
};
use crate::retry::{RecoverableType, RetrySpec};

const LANES: usize = 64;

/// Runs commands against execution records through the command processor.
///
/// The filter, the scheduler and operators all write through this service.
/// Commands for one record run one at a time: each record maps to one of a
/// fixed set of lanes with [`AggregateId::lane_of`], the same mapping the
/// command dispatcher uses, and a lane runs one command at a time. Clones
/// share the lanes.
#[derive(Clone)]
pub struct ExecutionFailedService {
    processor: CommandProcessor<ExecutionFailed>,
    lanes: Arc<[Mutex<()>]>,
}

impl ExecutionFailedService {
    pub fn new(processor: CommandProcessor<ExecutionFailed>) -> Self {
        Self {
            processor,
            lanes: (0..LANES).map(|_| Mutex::new(())).collect(),
        }
    }

    pub fn processor(&self) -> &CommandProcessor<ExecutionFailed> {
        &self.processor
    }

    /// Loads a record, or `None` when no record exists under `id`.
    pub async fn load(&self, id: &AggregateId) -> Result<Option<StateAggregate<ExecutionFailed>>> {
        let state = self.processor.repository().rehydrate(id).await?;
        Ok(state.initialized().then_some(state))
    }

    pub async fn create(
        &self,
        id: &AggregateId,
        command: CreateExecutionFailed,
    ) -> Result<StateAggregate<ExecutionFailed>> {
        self.execute(id, &command).await
    }

    pub async fn prepare(
        &self,
        id: &AggregateId,
        prepare_at: DateTime<Utc>,
    ) -> Result<StateAggregate<ExecutionFailed>> {
        self.execute(id, &PrepareCompensation { prepare_at }).await
    }

    pub async fn force_prepare(
        &self,
        id: &AggregateId,
        prepare_at: DateTime<Utc>,
    ) -> Result<StateAggregate<ExecutionFailed>> {
        self.execute(id, &ForcePrepareCompensation { prepare_at })
            .await
    }

    pub async fn apply_failed(
        &self,
        id: &AggregateId,
        error: ErrorDetails,
        recoverable: RecoverableType,
        execute_at: DateTime<Utc>,
    ) -> Result<StateAggregate<ExecutionFailed>> {
        let command = ApplyExecutionFailed {
            error,
            execute_at,
            recoverable,
        };
        self.execute(id, &command).await
    }

    pub async fn record_failed(
        &self,
        id: &AggregateId,
        error: ErrorDetails,
        recoverable: RecoverableType,
        execute_at: DateTime<Utc>,
    ) -> Result<StateAggregate<ExecutionFailed>> {
        let command = RecordExecutionFailed {
            error,
            execute_at,
            recoverable,
        };
        self.execute(id, &command).await
    }

    pub async fn apply_success(
        &self,
        id: &AggregateId,
        execute_at: DateTime<Utc>,
    ) -> Result<StateAggregate<ExecutionFailed>> {
        self.execute(id, &ApplyExecutionSuccess { execute_at }).await
    }

    pub async fn apply_retry_spec(
        &self,
        id: &AggregateId,
        retry_spec: RetrySpec,
    ) -> Result<StateAggregate<ExecutionFailed>> {
        self.execute(id, &ApplyRetrySpec { retry_spec }).await
    }

    pub async fn mark_recoverable(
        &self,
        id: &AggregateId,
        recoverable: RecoverableType,
    ) -> Result<StateAggregate<ExecutionFailed>> {
        self.execute(id, &MarkRecoverable { recoverable }).await
    }

    pub async fn change_function(
        &self,
        id: &AggregateId,
        function: FunctionInfo,
    ) -> Result<StateAggregate<ExecutionFailed>> {
        self.execute(id, &ChangeFunction { function }).await
    }

    #[tracing::instrument(skip(self, command), fields(command = C::NAME))]
    async fn execute<C: Command>(
        &self,
        id: &AggregateId,
        command: &C,
    ) -> Result<StateAggregate<ExecutionFailed>> {
        let message = CommandMessage::of(id.clone(), command)?;
        let _lane = self.lanes[id.lane_of(LANES)].lock().await;
        let outcome = self.processor.process(&message).await?;
        Ok(outcome.state)
    }
}

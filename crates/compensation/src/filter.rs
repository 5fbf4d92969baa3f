//! Turns reaction failures into execution records.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use common::{ErrorCode, FunctionInfo, Header, error_codes};
use event_processor::FailureHandler;
use event_store::{DomainEvent, DomainEventStream};
use modeling::ModelingError;

use crate::error::CompensationError;
use crate::execution_failed::{CreateExecutionFailed, ErrorDetails, EventRef, compensation_id};
use crate::recoverable::RecoverableRegistry;
use crate::retry::RetrySpec;
use crate::service::ExecutionFailedService;

/// Records every failure of a retryable reaction as an `ExecutionFailed`
/// record, to be picked up by the retry scheduler.
///
/// A failure of an event/function pair that already has a record is
/// recorded on that record, which fails again with a fresh retry budget.
/// While one of its retries is running, the retry's own outcome wins.
pub struct CompensationFilter {
    service: ExecutionFailedService,
    recoverable: Arc<RecoverableRegistry>,
    retry_spec: RetrySpec,
}

impl CompensationFilter {
    pub fn new(
        service: ExecutionFailedService,
        recoverable: Arc<RecoverableRegistry>,
        retry_spec: RetrySpec,
    ) -> Self {
        Self {
            service,
            recoverable,
            retry_spec,
        }
    }
}

#[async_trait]
impl FailureHandler for CompensationFilter {
    #[tracing::instrument(
        skip(self, function, stream, event, error),
        fields(%function, event = %event.name, aggregate_id = %stream.aggregate_id)
    )]
    async fn on_failure(
        &self,
        function: &FunctionInfo,
        stream: &DomainEventStream,
        event: &DomainEvent,
        error: &anyhow::Error,
    ) -> anyhow::Result<()> {
        if let Some(record) = stream.header.get(Header::COMPENSATION_ID) {
            tracing::debug!(record, "Failure of a compensation run, left to the scheduler");
            return Ok(());
        }

        let id = compensation_id(&event.id, function);
        let recoverable = self.recoverable.classify(error);
        let details = ErrorDetails::from_error(error_codes::INTERNAL, error);
        let execute_at = Utc::now();
        let command = CreateExecutionFailed {
            event: EventRef::of(stream, event),
            function: function.clone(),
            error: details.clone(),
            execute_at,
            retry_spec: self.retry_spec,
            recoverable,
        };

        match self.service.create(&id, command).await {
            Ok(_) => {
                metrics::counter!("compensation_records_created_total").increment(1);
                tracing::info!(record = %id, %recoverable, "Execution failure recorded");
                return Ok(());
            }
            Err(e) if e.error_code() == error_codes::DUPLICATE_AGGREGATE_ID => {}
            Err(e) => return Err(e.into()),
        }

        match self
            .service
            .record_failed(&id, details, recoverable, execute_at)
            .await
        {
            Ok(_) => {
                metrics::counter!("compensation_records_reopened_total").increment(1);
                tracing::info!(record = %id, %recoverable, "Execution failure recorded again");
                Ok(())
            }
            Err(CompensationError::Modeling(ModelingError::Rejected(rejected))) => {
                tracing::debug!(record = %id, reason = %rejected.message, "Failure not recorded");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

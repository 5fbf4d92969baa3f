//! Periodic re-execution of failed reactions.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use common::{AggregateId, ErrorCode, FunctionInfo, Header, error_codes};
use event_processor::ReactionRegistry;
use event_store::{DomainEvent, DomainEventStream, EventStore, ScanCursor, Version};
use futures_util::TryStreamExt;
use modeling::Aggregate;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::error::{CompensationError, Result};
use crate::execution_failed::{ErrorDetails, EventRef, ExecutionFailed};
use crate::recoverable::RecoverableRegistry;
use crate::retry::RecoverableType;
use crate::service::ExecutionFailedService;

const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub poll_interval: Duration,
    /// Records loaded per scan page.
    pub batch_size: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(60),
            batch_size: 100,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryOutcome {
    Succeeded,
    Failed,
}

impl RetryOutcome {
    fn as_str(&self) -> &'static str {
        match self {
            RetryOutcome::Succeeded => "succeeded",
            RetryOutcome::Failed => "failed",
        }
    }
}

/// Finds execution records that are due and runs their reaction again.
///
/// A retry prepares the record, reloads the failed event, runs the
/// reaction under the record's execution timeout and applies the outcome.
/// Records classified as unrecoverable are left alone.
#[derive(Clone)]
pub struct RetryScheduler {
    service: ExecutionFailedService,
    events: Arc<dyn EventStore>,
    reactions: Arc<ReactionRegistry>,
    recoverable: Arc<RecoverableRegistry>,
    config: SchedulerConfig,
}

impl RetryScheduler {
    pub fn new(
        service: ExecutionFailedService,
        events: Arc<dyn EventStore>,
        reactions: Arc<ReactionRegistry>,
        recoverable: Arc<RecoverableRegistry>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            service,
            events,
            reactions,
            recoverable,
            config,
        }
    }

    /// Polls on a background task every `poll_interval` until shut down.
    /// Intervals below one millisecond are raised to one millisecond.
    pub fn start(self) -> SchedulerHandle {
        let (shutdown, mut stop) = oneshot::channel::<()>();
        let poll_interval = self.config.poll_interval.max(MIN_POLL_INTERVAL);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(poll_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = &mut stop => break,
                    _ = ticker.tick() => {
                        if let Err(e) = self.poll().await {
                            tracing::error!(error = %e, "Compensation poll failed");
                        }
                    }
                }
            }
            tracing::info!("Retry scheduler stopped");
        });

        tracing::info!(?poll_interval, "Retry scheduler started");
        SchedulerHandle {
            shutdown: Some(shutdown),
            task,
        }
    }

    /// Retries every record that is due now. Returns the number of retries
    /// run; a failing retry is logged and does not stop the poll.
    #[tracing::instrument(skip(self))]
    pub async fn poll(&self) -> Result<usize> {
        let store = self.service.processor().repository().event_store().clone();
        let named_aggregate = ExecutionFailed::named_aggregate();
        let batch_size = self.config.batch_size.max(1);
        let mut cursor = ScanCursor::first();
        let mut retried = 0usize;

        loop {
            let ids: Vec<AggregateId> = store
                .scan_aggregate_id(&named_aggregate, cursor, batch_size)
                .await?
                .try_collect()
                .await?;
            let Some(last) = ids.last() else {
                break;
            };
            cursor = ScanCursor::after(last);

            for id in &ids {
                let Some(record) = self.service.load(id).await? else {
                    continue;
                };
                let record = record.state();
                if record.recoverable() == RecoverableType::Unrecoverable
                    || !record.should_retry(Utc::now())
                {
                    continue;
                }
                match self.retry(id).await {
                    Ok(_) => retried += 1,
                    Err(e) => tracing::warn!(record = %id, error = %e, "Retry not started"),
                }
            }
            if ids.len() < batch_size {
                break;
            }
        }

        if retried > 0 {
            tracing::info!(retried, "Compensation poll complete");
        }
        Ok(retried)
    }

    /// Retries one record. Fails when the record is not due.
    pub async fn retry(&self, id: &AggregateId) -> Result<RetryOutcome> {
        let prepared = self.service.prepare(id, Utc::now()).await?;
        self.run(id, prepared.state()).await
    }

    /// Retries one record regardless of its retry budget.
    pub async fn force_retry(&self, id: &AggregateId) -> Result<RetryOutcome> {
        let prepared = self.service.force_prepare(id, Utc::now()).await?;
        self.run(id, prepared.state()).await
    }

    #[tracing::instrument(skip(self, record), fields(record = %id))]
    async fn run(&self, id: &AggregateId, record: &ExecutionFailed) -> Result<RetryOutcome> {
        let (Some(event), Some(function)) = (record.event(), record.function()) else {
            return Err(CompensationError::RecordNotFound(id.clone()));
        };

        let result = self
            .execute(id, event, function, record.retry_spec().execution_timeout)
            .await;
        let outcome = match result {
            Ok(()) => {
                self.service.apply_success(id, Utc::now()).await?;
                tracing::info!(%function, "Compensation succeeded");
                RetryOutcome::Succeeded
            }
            Err(error) => {
                let (error_code, recoverable) = self.classify(&error);
                tracing::warn!(
                    %function,
                    %recoverable,
                    error = %format!("{error:#}"),
                    "Compensation failed"
                );
                self.service
                    .apply_failed(
                        id,
                        ErrorDetails::from_error(error_code, &error),
                        recoverable,
                        Utc::now(),
                    )
                    .await?;
                RetryOutcome::Failed
            }
        };

        metrics::counter!(
            "compensation_retries_total",
            "function" => function.to_string(),
            "outcome" => outcome.as_str()
        )
        .increment(1);
        Ok(outcome)
    }

    async fn execute(
        &self,
        id: &AggregateId,
        event: &EventRef,
        function: &FunctionInfo,
        timeout: Duration,
    ) -> anyhow::Result<()> {
        let reaction = self
            .reactions
            .get(function)
            .ok_or_else(|| CompensationError::UnknownFunction(function.clone()))?;
        let (mut stream, domain_event) = self.find_event(event).await?;
        stream.header.insert(Header::COMPENSATION_ID, id.id());

        tokio::time::timeout(timeout, reaction.react(&stream, &domain_event)).await??;
        Ok(())
    }

    /// Loads the stream that holds the failed event.
    async fn find_event(&self, event: &EventRef) -> Result<(DomainEventStream, DomainEvent)> {
        let not_found = || CompensationError::EventNotFound {
            aggregate_id: event.aggregate_id.clone(),
            event_id: event.event_id,
        };

        let mut streams = self
            .events
            .load(&event.aggregate_id, event.version, Version::MAX)
            .await?;
        while let Some(stream) = streams.try_next().await? {
            if stream.head_version() > event.version {
                break;
            }
            let found = stream
                .events
                .iter()
                .find(|e| e.id == event.event_id)
                .cloned();
            if let Some(found) = found {
                return Ok((stream, found));
            }
        }
        Err(not_found())
    }

    fn classify(&self, error: &anyhow::Error) -> (&'static str, RecoverableType) {
        match error.downcast_ref::<CompensationError>() {
            Some(e @ CompensationError::EventNotFound { .. }) => {
                (e.error_code(), RecoverableType::Unrecoverable)
            }
            Some(e) => (e.error_code(), self.recoverable.classify(error)),
            None => (error_codes::INTERNAL, self.recoverable.classify(error)),
        }
    }
}

/// Controls a running [`RetryScheduler`].
pub struct SchedulerHandle {
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Stops polling after the current poll finishes.
    pub async fn shutdown(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Err(e) = self.task.await {
            tracing::error!(error = %e, "Retry scheduler panicked");
        }
    }
}

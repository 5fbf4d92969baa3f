//! Aggregate-affinity command dispatcher.
//!
//! Each aggregate type runs one dispatcher with a fixed number of lanes.
//! A command goes to lane `aggregate_id.lane_of(parallelism)`, so commands
//! for one aggregate are processed one at a time in arrival order while
//! different lanes run in parallel. A lane runs the whole pipeline for a
//! command before taking the next one: process (rehydrate, handle,
//! append), publish, signal `PROCESSED`, then schedule the snapshot.

use std::sync::Arc;
use std::time::Instant;

use common::{ErrorCode, ErrorInfo, FunctionInfo};
use event_store::SnapshotRepository;
use futures_util::StreamExt;
use modeling::{Aggregate, CommandMessage, CommandOutcome, CommandProcessor, SnapshotPolicy};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::bus::{EventBus, MessageBus, MessageStream};
use crate::error::MessagingError;
use crate::wait::{CommandStage, CommandWaitNotifier, WaitSignal};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DispatcherConfig {
    /// Number of lanes.
    pub parallelism: usize,
    /// Queued commands per lane before intake waits.
    pub lane_capacity: usize,
    pub snapshot: SnapshotPolicy,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            parallelism: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            lane_capacity: 256,
            snapshot: SnapshotPolicy::default(),
        }
    }
}

/// Dispatcher for aggregates of type `A`.
pub struct AggregateDispatcher<A: Aggregate> {
    processor: CommandProcessor<A>,
    snapshots: Arc<dyn SnapshotRepository>,
    event_bus: Arc<dyn EventBus>,
    notifier: CommandWaitNotifier,
    config: DispatcherConfig,
}

impl<A: Aggregate> Clone for AggregateDispatcher<A> {
    fn clone(&self) -> Self {
        Self {
            processor: self.processor.clone(),
            snapshots: Arc::clone(&self.snapshots),
            event_bus: Arc::clone(&self.event_bus),
            notifier: self.notifier.clone(),
            config: self.config,
        }
    }
}

impl<A: Aggregate> AggregateDispatcher<A> {
    pub fn new(
        processor: CommandProcessor<A>,
        event_bus: Arc<dyn EventBus>,
        notifier: CommandWaitNotifier,
        config: DispatcherConfig,
    ) -> Self {
        let snapshots = Arc::clone(processor.repository().snapshots());
        Self {
            processor,
            snapshots,
            event_bus,
            notifier,
            config,
        }
    }

    /// Starts the lanes and routes `commands` onto them until the stream
    /// ends or [`DispatcherHandle::shutdown`] is called.
    pub fn start(self, mut commands: MessageStream<CommandMessage>) -> DispatcherHandle {
        let parallelism = self.config.parallelism.max(1);
        let named_aggregate = A::named_aggregate().to_string();

        let mut lanes = Vec::with_capacity(parallelism);
        let mut workers = Vec::with_capacity(parallelism);
        for lane in 0..parallelism {
            let (sender, mut receiver) =
                mpsc::channel::<CommandMessage>(self.config.lane_capacity.max(1));
            let dispatcher = self.clone();
            workers.push(tokio::spawn(async move {
                while let Some(message) = receiver.recv().await {
                    dispatcher.handle(lane, message).await;
                }
                tracing::debug!(lane, "Dispatcher lane drained");
            }));
            lanes.push(sender);
        }

        let (shutdown, mut stop) = oneshot::channel::<()>();
        let router = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut stop => break,
                    next = commands.next() => {
                        let Some(message) = next else { break };
                        let lane = message.aggregate_id.lane_of(parallelism);
                        if lanes[lane].send(message).await.is_err() {
                            tracing::error!(lane, "Dispatcher lane closed unexpectedly");
                            break;
                        }
                    }
                }
            }
            tracing::info!(aggregate = %named_aggregate, "Dispatcher stopped accepting commands");
        });

        tracing::info!(aggregate = %A::named_aggregate(), parallelism, "Dispatcher started");
        DispatcherHandle {
            shutdown: Some(shutdown),
            router,
            workers,
        }
    }

    /// Runs the full pipeline for one command. Failures are reported to
    /// the waiting caller and logged; they never stop the lane.
    #[tracing::instrument(
        skip(self, message),
        fields(aggregate_id = %message.aggregate_id, command_id = %message.id)
    )]
    pub async fn handle(&self, lane: usize, message: CommandMessage) {
        let started = Instant::now();
        let aggregate = A::named_aggregate().to_string();
        metrics::counter!("commands_dispatched_total", "aggregate" => aggregate.clone())
            .increment(1);

        let function = FunctionInfo::new(aggregate.clone(), message.name.clone());
        let processed = WaitSignal::new(
            message.id.clone(),
            message.aggregate_id.clone(),
            CommandStage::Processed,
            function.clone(),
        );

        match self.processor.process(&message).await {
            Ok(outcome) => {
                let version = outcome.state.version();
                self.publish(&outcome).await;
                self.notifier
                    .notify(&message.header, processed.with_version(version))
                    .await;
                self.schedule_snapshot(&message, outcome, function);
            }
            Err(e) => {
                metrics::counter!(
                    "commands_failed_total",
                    "aggregate" => aggregate.clone(),
                    "error_code" => e.error_code()
                )
                .increment(1);
                tracing::warn!(command = %message.name, error = %e, "Command failed");
                self.notifier
                    .notify(&message.header, processed.with_error(e.to_error_info()))
                    .await;
            }
        }

        metrics::histogram!("command_processing_seconds", "aggregate" => aggregate)
            .record(started.elapsed().as_secs_f64());
    }

    async fn publish(&self, outcome: &CommandOutcome<A>) {
        if !outcome.appended() {
            return;
        }
        let Some(stream) = &outcome.stream else {
            return;
        };
        match self.event_bus.send(stream.clone()).await {
            Ok(()) => {}
            Err(MessagingError::NoReceiver) => {
                tracing::debug!("No event subscribers, stream not published");
            }
            Err(e) => tracing::error!(error = %e, "Failed to publish event stream"),
        }
    }

    /// Saves a snapshot in the background when the policy asks for one,
    /// then signals `SNAPSHOT` whether or not a snapshot was written.
    fn schedule_snapshot(
        &self,
        message: &CommandMessage,
        outcome: CommandOutcome<A>,
        function: FunctionInfo,
    ) {
        let version = outcome.state.version();
        let signal = WaitSignal::new(
            message.id.clone(),
            message.aggregate_id.clone(),
            CommandStage::Snapshot,
            function,
        )
        .with_version(version);
        let header = message.header.clone();
        let notifier = self.notifier.clone();

        let wanted = outcome.appended()
            && self
                .config
                .snapshot
                .should_snapshot(outcome.previous_version, version);
        if !wanted {
            tokio::spawn(async move { notifier.notify(&header, signal).await });
            return;
        }

        let snapshots = Arc::clone(&self.snapshots);
        tokio::spawn(async move {
            let saved = match outcome.state.to_snapshot() {
                Ok(snapshot) => snapshots.save_snapshot(snapshot).await.map_err(|e| e.to_string()),
                Err(e) => Err(e.to_string()),
            };
            let signal = match saved {
                Ok(()) => {
                    metrics::counter!("snapshots_saved_total").increment(1);
                    signal
                }
                Err(e) => {
                    tracing::warn!(%version, error = %e, "Failed to save snapshot");
                    signal.with_error(ErrorInfo::new(common::error_codes::INTERNAL, e))
                }
            };
            notifier.notify(&header, signal).await;
        });
    }
}

/// Controls a running dispatcher.
pub struct DispatcherHandle {
    shutdown: Option<oneshot::Sender<()>>,
    router: JoinHandle<()>,
    workers: Vec<JoinHandle<()>>,
}

impl DispatcherHandle {
    /// Stops intake and waits until every lane has drained its queue.
    pub async fn shutdown(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        self.wait().await;
    }

    /// Waits for the dispatcher to finish on its own, after its command
    /// stream ended.
    pub async fn wait(self) {
        if let Err(e) = self.router.await {
            tracing::error!(error = %e, "Dispatcher router panicked");
        }
        for worker in self.workers {
            if let Err(e) = worker.await {
                tracing::error!(error = %e, "Dispatcher lane panicked");
            }
        }
    }
}

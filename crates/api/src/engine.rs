//! Wiring of the command pipeline, event dispatch and compensation.

use std::sync::Arc;

use compensation::{
    CompensationFilter, ExecutionFailed, ExecutionFailedService, RecoverableRegistry,
    RetryScheduler, SchedulerHandle,
};
use event_processor::{EventDispatcher, ReactionRegistry};
use event_store::{EventStore, SnapshotRepository};
use messaging::{
    AggregateDispatcher, BloomFilterIdempotencyCheckerProvider, CommandBus, CommandGateway,
    CommandWaitNotifier, DispatcherHandle, EventBus, HttpWaitNotificationChannel,
    InMemoryCommandBus, InMemoryEventBus, LocalWaitNotificationChannel, MessageBus,
    RoutingWaitNotificationChannel, WaitStrategyRegistrar,
};
use modeling::{Aggregate, AggregateMetadata, AggregateRepository, CommandProcessor};
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::error::Result;

/// A running engine: one dispatcher per aggregate type on a shared command
/// bus, an event dispatcher feeding reactions, and the compensation
/// scheduler retrying failed reactions.
pub struct Engine {
    config: Config,
    store: Arc<dyn EventStore>,
    snapshots: Arc<dyn SnapshotRepository>,
    command_bus: Arc<dyn CommandBus>,
    event_bus: Arc<dyn EventBus>,
    notifier: CommandWaitNotifier,
    registrar: Arc<WaitStrategyRegistrar>,
    gateway: Arc<CommandGateway>,
    compensation: ExecutionFailedService,
    scheduler: RetryScheduler,
    dispatchers: Vec<DispatcherHandle>,
    event_dispatcher: JoinHandle<()>,
    scheduler_handle: SchedulerHandle,
}

impl Engine {
    /// Starts every background component. Reactions in `reactions` receive
    /// each published stream; failures of retryable ones are compensated.
    pub async fn start(
        config: Config,
        store: Arc<dyn EventStore>,
        snapshots: Arc<dyn SnapshotRepository>,
        reactions: ReactionRegistry,
    ) -> Result<Self> {
        let registrar = Arc::new(WaitStrategyRegistrar::new());
        let channel = RoutingWaitNotificationChannel::new(
            config.wait_endpoint.clone(),
            Arc::new(LocalWaitNotificationChannel::new(Arc::clone(&registrar))),
            Arc::new(HttpWaitNotificationChannel::new(reqwest::Client::new())),
        );
        let notifier = CommandWaitNotifier::new(Arc::new(channel));

        let command_bus: Arc<dyn CommandBus> = Arc::new(InMemoryCommandBus::default());
        let event_bus: Arc<dyn EventBus> = Arc::new(InMemoryEventBus::default());

        // Execution records are written through the service only, never
        // through the command bus.
        let compensation = ExecutionFailedService::new(processor::<ExecutionFailed>(
            &store, &snapshots,
        ));

        let reactions = Arc::new(reactions);
        let recoverable = Arc::new(RecoverableRegistry::default());
        let filter = CompensationFilter::new(
            compensation.clone(),
            Arc::clone(&recoverable),
            config.retry_spec,
        );
        let event_dispatcher = EventDispatcher::new(Arc::clone(&reactions), notifier.clone())
            .with_failure_handler(Arc::new(filter))
            .start(event_bus.receive(&[]).await?);

        let scheduler = RetryScheduler::new(
            compensation.clone(),
            Arc::clone(&store),
            reactions,
            recoverable,
            config.scheduler.clone(),
        );
        let scheduler_handle = scheduler.clone().start();

        let gateway = Arc::new(CommandGateway::new(
            Arc::clone(&command_bus),
            Arc::new(BloomFilterIdempotencyCheckerProvider::default()),
            Arc::clone(&registrar),
            config.wait_endpoint.clone(),
        ));

        tracing::info!(wait_endpoint = %config.wait_endpoint, "Engine started");
        Ok(Self {
            config,
            store,
            snapshots,
            command_bus,
            event_bus,
            notifier,
            registrar,
            gateway,
            compensation,
            scheduler,
            dispatchers: Vec::new(),
            event_dispatcher,
            scheduler_handle,
        })
    }

    /// Starts a dispatcher for commands of aggregate type `A`.
    pub async fn dispatch<A: Aggregate>(&mut self) -> Result<()> {
        let handle = start_dispatcher(
            processor::<A>(&self.store, &self.snapshots),
            &self.command_bus,
            &self.event_bus,
            &self.notifier,
            &self.config,
        )
        .await?;
        self.dispatchers.push(handle);
        Ok(())
    }

    pub fn gateway(&self) -> &Arc<CommandGateway> {
        &self.gateway
    }

    pub fn registrar(&self) -> &Arc<WaitStrategyRegistrar> {
        &self.registrar
    }

    /// Operator access to execution records: retry spec changes,
    /// recoverable marks, function changes and forced retries.
    pub fn compensation(&self) -> &ExecutionFailedService {
        &self.compensation
    }

    pub fn scheduler(&self) -> &RetryScheduler {
        &self.scheduler
    }

    /// Stops intake, drains every dispatcher lane and the event dispatcher,
    /// then stops the retry scheduler.
    pub async fn shutdown(self) {
        for dispatcher in self.dispatchers {
            dispatcher.shutdown().await;
        }
        // The event stream ends once the last bus sender is gone.
        drop(self.event_bus);
        if let Err(e) = self.event_dispatcher.await {
            tracing::error!(error = %e, "Event dispatcher panicked");
        }
        self.scheduler_handle.shutdown().await;
        tracing::info!("Engine stopped");
    }
}

fn processor<A: Aggregate>(
    store: &Arc<dyn EventStore>,
    snapshots: &Arc<dyn SnapshotRepository>,
) -> CommandProcessor<A> {
    CommandProcessor::new(AggregateRepository::new(
        Arc::clone(store),
        Arc::clone(snapshots),
        Arc::new(AggregateMetadata::<A>::new()),
    ))
}

async fn start_dispatcher<A: Aggregate>(
    processor: CommandProcessor<A>,
    command_bus: &Arc<dyn CommandBus>,
    event_bus: &Arc<dyn EventBus>,
    notifier: &CommandWaitNotifier,
    config: &Config,
) -> Result<DispatcherHandle> {
    let commands = command_bus.receive(&[A::named_aggregate()]).await?;
    let dispatcher = AggregateDispatcher::new(
        processor,
        Arc::clone(event_bus),
        notifier.clone(),
        config.dispatcher,
    );
    Ok(dispatcher.start(commands))
}

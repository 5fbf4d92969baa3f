//! Delivers published event streams to reactions.

use std::sync::Arc;

use async_trait::async_trait;
use common::{ErrorInfo, FunctionInfo, NamedAggregate, error_codes};
use event_store::{DomainEvent, DomainEventStream, EventStore, ScanCursor, Version};
use futures_util::{StreamExt, TryStreamExt};
use messaging::{CommandStage, CommandWaitNotifier, MessageStream, WaitSignal};
use tokio::task::JoinHandle;

use crate::Result;
use crate::reaction::{Reaction, ReactionRegistry};

/// Receives failures of retryable reactions.
#[async_trait]
pub trait FailureHandler: Send + Sync {
    async fn on_failure(
        &self,
        function: &FunctionInfo,
        stream: &DomainEventStream,
        event: &DomainEvent,
        error: &anyhow::Error,
    ) -> anyhow::Result<()>;
}

/// Feeds event streams to every subscribed reaction and reports the
/// `PROJECTED` stage back to waiting callers.
///
/// Each reaction sees the events of a stream in order. Reactions are
/// isolated from each other: one failing reaction does not stop the others
/// or the next stream.
#[derive(Clone)]
pub struct EventDispatcher {
    reactions: Arc<ReactionRegistry>,
    notifier: CommandWaitNotifier,
    failure_handler: Option<Arc<dyn FailureHandler>>,
}

impl EventDispatcher {
    pub fn new(reactions: Arc<ReactionRegistry>, notifier: CommandWaitNotifier) -> Self {
        Self {
            reactions,
            notifier,
            failure_handler: None,
        }
    }

    pub fn with_failure_handler(mut self, handler: Arc<dyn FailureHandler>) -> Self {
        self.failure_handler = Some(handler);
        self
    }

    pub fn reactions(&self) -> &Arc<ReactionRegistry> {
        &self.reactions
    }

    /// Consumes `streams` on a background task until the stream ends.
    pub fn start(self, mut streams: MessageStream<DomainEventStream>) -> JoinHandle<()> {
        tracing::info!(reactions = self.reactions.len(), "Event dispatcher started");
        tokio::spawn(async move {
            while let Some(stream) = streams.next().await {
                self.process(&stream).await;
            }
            tracing::info!("Event dispatcher stopped");
        })
    }

    /// Delivers one stream and signals `PROJECTED` per reaction.
    #[tracing::instrument(
        skip(self, stream),
        fields(aggregate_id = %stream.aggregate_id, version = %stream.version)
    )]
    pub async fn process(&self, stream: &DomainEventStream) {
        self.deliver(stream, true).await;
    }

    async fn deliver(&self, stream: &DomainEventStream, notify: bool) {
        let runs = self
            .reactions
            .iter()
            .map(|reaction| self.run_reaction(reaction, stream, notify));
        futures_util::future::join_all(runs).await;
    }

    async fn run_reaction(
        &self,
        reaction: &Arc<dyn Reaction>,
        stream: &DomainEventStream,
        notify: bool,
    ) {
        let function = reaction.function_info();
        let named_aggregate = stream.aggregate_id.named_aggregate();
        let mut handled = false;
        let mut failure = None;

        for event in &stream.events {
            if !reaction.subscribes(named_aggregate, event) {
                continue;
            }
            handled = true;
            if let Err(error) = reaction.react(stream, event).await {
                self.on_failure(reaction.as_ref(), &function, stream, event, &error)
                    .await;
                failure.get_or_insert_with(|| {
                    ErrorInfo::new(error_codes::INTERNAL, format!("{error:#}"))
                });
            }
        }

        if handled && notify {
            let mut signal = WaitSignal::new(
                stream.command_id.clone(),
                stream.aggregate_id.clone(),
                CommandStage::Projected,
                function,
            )
            .with_version(stream.version);
            if let Some(failure) = failure {
                signal = signal.with_error(failure);
            }
            self.notifier.notify(&stream.header, signal).await;
        }
    }

    async fn on_failure(
        &self,
        reaction: &dyn Reaction,
        function: &FunctionInfo,
        stream: &DomainEventStream,
        event: &DomainEvent,
        error: &anyhow::Error,
    ) {
        metrics::counter!("reactions_failed_total", "function" => function.to_string())
            .increment(1);
        tracing::warn!(
            %function,
            event = %event.name,
            event_version = %event.version,
            error = %format!("{error:#}"),
            "Reaction failed"
        );

        if !reaction.retry() {
            return;
        }
        let Some(handler) = &self.failure_handler else {
            return;
        };
        if let Err(e) = handler.on_failure(function, stream, event, error).await {
            tracing::error!(%function, error = %e, "Failed to record reaction failure");
        }
    }

    /// Replays every stored stream of `named_aggregate` to the reactions,
    /// without stage signals. Returns the number of streams delivered.
    #[tracing::instrument(skip(self, store))]
    pub async fn catch_up(
        &self,
        store: &dyn EventStore,
        named_aggregate: &NamedAggregate,
        batch_size: usize,
    ) -> Result<usize> {
        let batch_size = batch_size.max(1);
        let mut cursor = ScanCursor::first();
        let mut delivered = 0usize;

        loop {
            let ids: Vec<_> = store
                .scan_aggregate_id(named_aggregate, cursor, batch_size)
                .await?
                .try_collect()
                .await?;
            let Some(last) = ids.last() else {
                break;
            };
            cursor = ScanCursor::after(last);

            for aggregate_id in &ids {
                let mut streams = store
                    .load(aggregate_id, Version::first(), Version::MAX)
                    .await?;
                while let Some(stream) = streams.try_next().await? {
                    self.deliver(&stream, false).await;
                    delivered += 1;
                }
            }
            if ids.len() < batch_size {
                break;
            }
        }

        tracing::info!(streams = delivered, "Catch-up complete");
        Ok(delivered)
    }
}

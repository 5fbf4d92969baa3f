//! Command and event buses.
//!
//! Backends only need `send` and a filtered `receive`. The in-memory bus
//! fans every message out to all current subscribers; consumer groups are
//! left to real brokers.

use std::collections::HashSet;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use common::{AggregateId, NamedAggregate};
use event_store::DomainEventStream;
use futures_core::Stream;
use modeling::CommandMessage;
use tokio::sync::{RwLock, mpsc};

use crate::error::{MessagingError, Result};

/// A message addressed to one aggregate.
pub trait Routed: Clone + Send + Sync + 'static {
    fn aggregate_id(&self) -> &AggregateId;
}

impl Routed for CommandMessage {
    fn aggregate_id(&self) -> &AggregateId {
        &self.aggregate_id
    }
}

impl Routed for DomainEventStream {
    fn aggregate_id(&self) -> &AggregateId {
        &self.aggregate_id
    }
}

/// Stream of received messages.
pub type MessageStream<M> = Pin<Box<dyn Stream<Item = M> + Send>>;

#[async_trait]
pub trait MessageBus<M: Routed>: Send + Sync {
    /// Delivers `message` to every subscriber of its aggregate type, or
    /// fails with [`MessagingError::NoReceiver`] when there is none.
    async fn send(&self, message: M) -> Result<()>;

    /// Subscribes to messages of the given aggregate types; an empty slice
    /// subscribes to all of them.
    async fn receive(&self, named_aggregates: &[NamedAggregate]) -> Result<MessageStream<M>>;
}

/// Bus carrying commands from gateways to dispatchers.
pub trait CommandBus: MessageBus<CommandMessage> {}

impl<T: MessageBus<CommandMessage> + ?Sized> CommandBus for T {}

/// Bus carrying appended event streams to downstream reactions.
pub trait EventBus: MessageBus<DomainEventStream> {}

impl<T: MessageBus<DomainEventStream> + ?Sized> EventBus for T {}

struct Subscriber<M> {
    filter: HashSet<NamedAggregate>,
    sender: mpsc::Sender<M>,
}

impl<M: Routed> Subscriber<M> {
    fn accepts(&self, message: &M) -> bool {
        self.filter.is_empty() || self.filter.contains(message.aggregate_id().named_aggregate())
    }
}

/// In-process bus with one bounded queue per subscriber.
///
/// `send` waits while a matching subscriber's queue is full, so a slow
/// consumer slows its producers down instead of losing messages. A
/// subscriber that stops reading without dropping its stream therefore
/// stalls every sender addressing it. Subscriber streams end once the last
/// clone of the bus is dropped.
#[derive(Clone)]
pub struct InMemoryMessageBus<M> {
    capacity: usize,
    subscribers: Arc<RwLock<Vec<Subscriber<M>>>>,
}

pub type InMemoryCommandBus = InMemoryMessageBus<CommandMessage>;
pub type InMemoryEventBus = InMemoryMessageBus<DomainEventStream>;

impl<M: Routed> InMemoryMessageBus<M> {
    /// `capacity` bounds each subscriber's queue.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            subscribers: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Number of subscribers whose stream is still alive.
    pub async fn subscriber_count(&self) -> usize {
        let mut subscribers = self.subscribers.write().await;
        subscribers.retain(|s| !s.sender.is_closed());
        subscribers.len()
    }
}

impl<M: Routed> Default for InMemoryMessageBus<M> {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait]
impl<M: Routed> MessageBus<M> for InMemoryMessageBus<M> {
    async fn send(&self, message: M) -> Result<()> {
        let targets: Vec<mpsc::Sender<M>> = self
            .subscribers
            .read()
            .await
            .iter()
            .filter(|s| s.accepts(&message))
            .map(|s| s.sender.clone())
            .collect();

        let mut delivered = 0usize;
        let mut closed = false;
        for sender in targets {
            match sender.send(message.clone()).await {
                Ok(()) => delivered += 1,
                Err(_) => closed = true,
            }
        }
        if closed {
            self.subscribers
                .write()
                .await
                .retain(|s| !s.sender.is_closed());
        }

        if delivered == 0 {
            return Err(MessagingError::NoReceiver);
        }
        Ok(())
    }

    async fn receive(&self, named_aggregates: &[NamedAggregate]) -> Result<MessageStream<M>> {
        let (sender, receiver) = mpsc::channel(self.capacity);
        self.subscribers.write().await.push(Subscriber {
            filter: named_aggregates.iter().cloned().collect(),
            sender,
        });

        let stream = futures_util::stream::unfold(receiver, |mut receiver| async move {
            receiver.recv().await.map(|message| (message, receiver))
        });
        Ok(Box::pin(stream))
    }
}

//! Command transport and the write-side processing pipeline.
//!
//! This crate provides:
//! - [`CommandBus`] / [`EventBus`] contracts with an in-memory backend
//! - [`AggregateDispatcher`], the per-aggregate-type lane runner
//! - [`CommandGateway`] with advisory deduplication and the wait protocol
//! - [`WaitNotificationChannel`] implementations for local and remote waiters

pub mod bus;
pub mod dispatcher;
pub mod error;
pub mod gateway;
pub mod idempotency;
pub mod wait;

pub use bus::{
    CommandBus, EventBus, InMemoryCommandBus, InMemoryEventBus, InMemoryMessageBus, MessageBus,
    MessageStream, Routed,
};
pub use dispatcher::{AggregateDispatcher, DispatcherConfig, DispatcherHandle};
pub use error::{GatewayError, MessagingError, Result};
pub use gateway::CommandGateway;
pub use idempotency::{
    BloomFilter, BloomFilterConfig, BloomFilterIdempotencyChecker,
    BloomFilterIdempotencyCheckerProvider, IdempotencyChecker, IdempotencyCheckerProvider,
    NoOpIdempotencyChecker, NoOpIdempotencyCheckerProvider,
};
pub use wait::{
    CommandResult, CommandStage, CommandWaitNotifier, HttpWaitNotificationChannel,
    LocalWaitNotificationChannel, RoutingWaitNotificationChannel, WaitNotificationChannel,
    WaitSignal, WaitStrategyRegistrar, WaitingFor,
};

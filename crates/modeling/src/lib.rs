//! Event-sourced aggregate modeling.
//!
//! This crate provides:
//! - [`Aggregate`], [`Command`] and [`Event`] traits with explicit registries
//! - [`StateAggregate`], the sourced state of one aggregate instance
//! - [`AggregateRepository`] for rehydration from snapshots and the event log
//! - [`CommandProcessor`] for validating, running and persisting commands

pub mod aggregate;
pub mod command;
pub mod error;
pub mod processor;
pub mod registry;
pub mod repository;
pub mod snapshot;
pub mod state;

pub use aggregate::{
    Aggregate, AggregateDeleted, AggregateRecovered, Command, DeleteAggregate, Event, Events,
    RecoverAggregate,
};
pub use command::CommandMessage;
pub use error::{CommandRejected, ModelingError, Result};
pub use processor::{CommandOutcome, CommandProcessor};
pub use registry::{AggregateMetadata, CommandEntry, CommandRegistry, SourcingRegistry};
pub use repository::AggregateRepository;
pub use snapshot::SnapshotPolicy;
pub use state::StateAggregate;

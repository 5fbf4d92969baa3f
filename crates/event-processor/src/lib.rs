//! Downstream processing of published event streams.
//!
//! This crate provides:
//! - [`Reaction`] trait for projections, sagas and other event consumers
//! - [`EventDispatcher`] for delivering streams to reactions and signalling `PROJECTED`
//! - [`FailureHandler`] hook through which failures reach the compensation engine
//! - [`BlockingPool`] for running blocking reaction code off the async workers

pub mod blocking;
pub mod error;
pub mod processor;
pub mod reaction;

pub use blocking::BlockingPool;
pub use error::{ProcessorError, Result};
pub use processor::{EventDispatcher, FailureHandler};
pub use reaction::{Reaction, ReactionRegistry, decode};

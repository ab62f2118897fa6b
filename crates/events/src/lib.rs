//! Event system for the machine lifecycle engine
//!
//! This crate provides the event bus and the events a sequence run
//! publishes: a start marker and, on failure, the fatal error.

mod bus;
mod types;

pub use bus::{EventBus, DEFAULT_CAPACITY};
pub use types::*;

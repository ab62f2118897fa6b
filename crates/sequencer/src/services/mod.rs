//! Reusable collaborators called by task bodies.

pub mod image;
pub mod retry;

pub use retry::{expected, unexpected, Exponential, RetryError, RetryableError};

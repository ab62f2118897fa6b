//! Value types shared by the machine lifecycle engine: sequences, trigger
//! payloads and the machine configuration document.

pub mod domain;
pub mod error;

pub use domain::*;
pub use error::CoreError;

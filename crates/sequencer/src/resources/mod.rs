//! RAII resource guards for automatic cleanup.
//!
//! - [`SequenceGuard`] - Single in-flight sequence per runtime, fatal event on abnormal exit

mod sequence_guard;

pub(crate) use sequence_guard::ActiveSlot;
pub use sequence_guard::SequenceGuard;

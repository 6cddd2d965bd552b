//! Reception statistics: jitter estimate and per-stream report state

pub mod jitter;
pub mod receiver;

pub use jitter::JitterEstimator;
pub use receiver::{IntervalStats, ReceiverPhase, StreamReceiverState};

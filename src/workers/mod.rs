//! Background worker tasks
//!
//! Streams are spread over a fixed pool of tokio tasks; each stream stays
//! on the task it was attached to.

pub mod pool;

pub use pool::{StreamId, StreamWorkerPool};

//! Packet pipeline for one media stream
//!
//! A `Pipeline` is an ordered chain of `Handler`s. Inbound packets enter at
//! the network side and travel towards the application; packets a stage
//! creates for the network (receiver reports) travel back the other way.
//!
//! # Architecture
//!
//! - Every stage implements `Handler` and forwards through its `Context`
//! - One pipeline belongs to one stream and runs on that stream's worker
//! - `Clock` supplies arrival and report times
//! - `PipelineHealth` counts what the stages drop, recover and emit

pub mod chain;
pub mod clock;
pub mod handler;
pub mod health;
pub mod receiver;
pub mod stage;
pub mod state;
pub mod types;

pub use chain::Pipeline;
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use handler::{Context, Handler};
pub use health::{HealthSummary, PipelineHealth};
pub use stage::PipelineStage;
pub use state::StreamState;
pub use types::{EncodedFrame, MediaKind};

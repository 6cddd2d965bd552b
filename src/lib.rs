//! RTP/RTCP receive pipeline
//!
//! Per-stream packet processing for a media server: FEC recovery,
//! sequence reordering, reception statistics with RTCP receiver reports,
//! and depacketization of VP8 and H.264 into encoded frames.

pub mod config;
pub mod decoder;
pub mod fec;
pub mod packet;
pub mod pipeline;
pub mod sequence;
pub mod stats;
pub mod workers;

#[cfg(test)]
mod testutil;

pub use config::{PipelineConfig, WorkerConfig};
pub use packet::{Packet, PacketError, PacketType};
pub use pipeline::receiver::build_receiver_pipeline;
pub use pipeline::{EncodedFrame, MediaKind, Pipeline};
pub use workers::StreamWorkerPool;

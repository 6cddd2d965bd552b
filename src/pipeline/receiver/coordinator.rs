//! Receiver pipeline assembly
//!
//! Chains FEC → Reorder → ReceiverReport → FrameAssembly for one stream.

use log::info;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::config::PipelineConfig;
use crate::decoder::Codec;
use crate::pipeline::chain::Pipeline;
use crate::pipeline::clock::Clock;
use crate::pipeline::health::PipelineHealth;
use crate::pipeline::receiver::assembly_stage::FrameAssemblyStage;
use crate::pipeline::receiver::fec_stage::FecStage;
use crate::pipeline::receiver::reorder_stage::{ReorderConfig, ReorderStage};
use crate::pipeline::receiver::report_stage::{ReceiverReportStage, ReportConfig};
use crate::pipeline::types::EncodedFrame;

/// Build the receive pipeline for one stream.
///
/// Returns the pipeline together with the receiving end of its frame
/// channel. With `fec_enabled` off the FEC stage is still present but
/// disabled, so it can be switched on later by name.
pub fn build_receiver_pipeline(
    config: &PipelineConfig,
    clock: Arc<dyn Clock>,
) -> (Pipeline, mpsc::Receiver<EncodedFrame>) {
    let health = Arc::new(PipelineHealth::new());
    let (frame_tx, frame_rx) = mpsc::channel(config.frame_channel_depth.max(1));

    let mut pipeline = Pipeline::with_health(clock, health.clone());
    pipeline.add_last(Box::new(FecStage::new(
        config.red_payload_type,
        config.ulpfec_payload_type,
        health.clone(),
    )));
    pipeline.add_last(Box::new(ReorderStage::new(
        ReorderConfig {
            capacity: config.reorder_capacity,
            max_hold_ms: config.max_hold_ms,
            max_streams: config.max_streams,
            idle_ms: config.stream_idle_ms,
        },
        health.clone(),
    )));
    pipeline.add_last(Box::new(ReceiverReportStage::new(
        ReportConfig {
            opus_payload_type: config.opus_payload_type,
            audio_payload_types: config.audio_payload_types.clone(),
            rr_interval_ms: config.rr_interval_ms,
        },
        health.clone(),
    )));
    let codecs = HashMap::from([
        (config.vp8_payload_type, Codec::Vp8),
        (config.h264_payload_type, Codec::H264),
    ]);
    pipeline.add_last(Box::new(
        FrameAssemblyStage::new(codecs, frame_tx, health)
            .with_limits(config.max_streams, config.stream_idle_ms),
    ));

    if !config.fec_enabled {
        pipeline.set_enabled("FecStage", false);
    }
    info!("Receiver pipeline: {}", pipeline.handler_names().join(" → "));

    (pipeline, frame_rx)
}

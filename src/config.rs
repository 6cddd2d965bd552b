use serde::{Deserialize, Serialize};

/// Settings for one stream's receive pipeline
///
/// Every field has a default, so a JSON document only needs to name what
/// it changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Packets the reorder queue holds per SSRC before it forces a gap
    pub reorder_capacity: usize,
    /// Longest a packet waits for a missing predecessor
    pub max_hold_ms: u64,
    /// SSRCs a stage keeps per-source state for
    pub max_streams: usize,
    /// Per-source state with nothing pending is dropped after this long
    pub stream_idle_ms: u64,
    /// Period of timer-driven receiver reports
    pub rr_interval_ms: u64,
    pub fec_enabled: bool,
    pub red_payload_type: u8,
    pub ulpfec_payload_type: u8,
    pub opus_payload_type: u8,
    pub vp8_payload_type: u8,
    pub h264_payload_type: u8,
    /// Payload types reported with an audio clock
    pub audio_payload_types: Vec<u8>,
    /// Encoded frames buffered towards the consumer
    pub frame_channel_depth: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            reorder_capacity: 100,
            max_hold_ms: 150,
            max_streams: 16,
            stream_idle_ms: 10_000,
            rr_interval_ms: 1000,
            fec_enabled: true,
            red_payload_type: 116,
            ulpfec_payload_type: 117,
            opus_payload_type: 111,
            vp8_payload_type: 96,
            h264_payload_type: 102,
            audio_payload_types: vec![111, 0, 8],
            frame_channel_depth: 64,
        }
    }
}

impl PipelineConfig {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// Settings for the stream worker pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub workers: usize,
    /// Packets waiting per worker before `deliver` starts dropping
    pub queue_depth: usize,
    pub tick_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_depth: 1024,
            tick_ms: 20,
        }
    }
}

impl WorkerConfig {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// Returns a version as specified in Cargo.toml
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

//! Health counters for a receive pipeline

use std::sync::atomic::{AtomicU64, Ordering};

/// Health metrics for a pipeline
///
/// Stages hold an `Arc<PipelineHealth>` and bump counters as packets move
/// through. All fields use atomic operations so a monitor on another task
/// can read them while the stream's worker writes.
#[derive(Debug, Default)]
pub struct PipelineHealth {
    /// Packets handed to the first stage
    pub packets_in: AtomicU64,

    /// Packets dropped because their headers did not parse
    pub malformed_drops: AtomicU64,

    /// Media packets rebuilt from FEC
    pub fec_recovered: AtomicU64,

    /// FEC engine errors (recovery skipped, originals kept)
    pub fec_failures: AtomicU64,

    /// Packets pushed out of a full reorder queue ahead of a gap
    pub reorder_evictions: AtomicU64,

    /// Packets arriving after their sequence number was already released
    pub late_drops: AtomicU64,

    /// Frames handed to the frame channel
    pub frames_assembled: AtomicU64,

    /// Keyframes among `frames_assembled`
    pub keyframes: AtomicU64,

    /// Frames lost because the frame channel was full or closed
    pub frame_drops: AtomicU64,

    /// Depacketizer resets caused by sequence gaps
    pub depacketizer_resets: AtomicU64,

    /// Receiver Reports handed to the outbound direction
    pub rrs_sent: AtomicU64,

    /// Pipeline time of the last inbound packet
    pub last_packet_ms: AtomicU64,
}

impl PipelineHealth {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_packet(&self, now_ms: u64) {
        self.packets_in.fetch_add(1, Ordering::Relaxed);
        self.last_packet_ms.store(now_ms, Ordering::Relaxed);
    }

    pub fn record_malformed(&self) {
        self.malformed_drops.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fec_recovered(&self, count: u64) {
        self.fec_recovered.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_fec_failure(&self) {
        self.fec_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reorder_eviction(&self) {
        self.reorder_evictions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_late_drop(&self) {
        self.late_drops.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_frame(&self, keyframe: bool) {
        self.frames_assembled.fetch_add(1, Ordering::Relaxed);
        if keyframe {
            self.keyframes.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_frame_drop(&self) {
        self.frame_drops.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_depacketizer_reset(&self) {
        self.depacketizer_resets.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rr_sent(&self) {
        self.rrs_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn packets_in(&self) -> u64 {
        self.packets_in.load(Ordering::Relaxed)
    }

    pub fn malformed_drops(&self) -> u64 {
        self.malformed_drops.load(Ordering::Relaxed)
    }

    pub fn fec_recovered(&self) -> u64 {
        self.fec_recovered.load(Ordering::Relaxed)
    }

    pub fn fec_failures(&self) -> u64 {
        self.fec_failures.load(Ordering::Relaxed)
    }

    pub fn reorder_evictions(&self) -> u64 {
        self.reorder_evictions.load(Ordering::Relaxed)
    }

    pub fn late_drops(&self) -> u64 {
        self.late_drops.load(Ordering::Relaxed)
    }

    pub fn frames_assembled(&self) -> u64 {
        self.frames_assembled.load(Ordering::Relaxed)
    }

    pub fn keyframes(&self) -> u64 {
        self.keyframes.load(Ordering::Relaxed)
    }

    pub fn frame_drops(&self) -> u64 {
        self.frame_drops.load(Ordering::Relaxed)
    }

    pub fn depacketizer_resets(&self) -> u64 {
        self.depacketizer_resets.load(Ordering::Relaxed)
    }

    pub fn rrs_sent(&self) -> u64 {
        self.rrs_sent.load(Ordering::Relaxed)
    }

    pub fn last_packet_ms(&self) -> u64 {
        self.last_packet_ms.load(Ordering::Relaxed)
    }

    /// Get a summary of health metrics
    pub fn summary(&self) -> HealthSummary {
        HealthSummary {
            packets_in: self.packets_in(),
            malformed_drops: self.malformed_drops(),
            fec_recovered: self.fec_recovered(),
            reorder_evictions: self.reorder_evictions(),
            late_drops: self.late_drops(),
            frames_assembled: self.frames_assembled(),
            keyframes: self.keyframes(),
            frame_drops: self.frame_drops(),
            depacketizer_resets: self.depacketizer_resets(),
            rrs_sent: self.rrs_sent(),
            last_packet_ms: self.last_packet_ms(),
        }
    }
}

/// Snapshot of health metrics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthSummary {
    pub packets_in: u64,
    pub malformed_drops: u64,
    pub fec_recovered: u64,
    pub reorder_evictions: u64,
    pub late_drops: u64,
    pub frames_assembled: u64,
    pub keyframes: u64,
    pub frame_drops: u64,
    pub depacketizer_resets: u64,
    pub rrs_sent: u64,
    pub last_packet_ms: u64,
}

impl std::fmt::Display for HealthSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Health: {} packets ({} malformed, {} late, {} evicted), ",
            self.packets_in, self.malformed_drops, self.late_drops, self.reorder_evictions
        )?;
        write!(
            f,
            "{} recovered by FEC, {} frames ({} keyframes, {} dropped, {} resets), {} RRs",
            self.fec_recovered,
            self.frames_assembled,
            self.keyframes,
            self.frame_drops,
            self.depacketizer_resets,
            self.rrs_sent
        )
    }
}

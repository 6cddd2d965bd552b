//! Interarrival jitter estimate (RFC 3550 §6.4.1)

/// Transit differences at or above this are treated as clock resets and
/// do not feed the estimate.
pub const MAX_TRANSIT_DELTA: u32 = 450_000;

/// One-pole smoothed jitter in RTP timestamp units.
#[derive(Debug, Clone, Copy, Default)]
pub struct JitterEstimator {
    transit: i32,
    jitter: f64,
    last_rtp_timestamp: u32,
}

impl JitterEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one packet arriving at `now_ms` on a media clock of
    /// `clock_rate` ticks per millisecond.
    ///
    /// Packets repeating the previous RTP timestamp (retransmissions, several
    /// packets of one video frame) are ignored.
    pub fn update(&mut self, now_ms: u64, clock_rate: u32, rtp_timestamp: u32) {
        if rtp_timestamp == self.last_rtp_timestamp {
            return;
        }
        self.last_rtp_timestamp = rtp_timestamp;

        let transit = (now_ms as u32)
            .wrapping_mul(clock_rate)
            .wrapping_sub(rtp_timestamp) as i32;
        let delta = transit.wrapping_sub(self.transit).unsigned_abs();
        if self.transit != 0 && delta < MAX_TRANSIT_DELTA {
            self.jitter += (delta as f64 - self.jitter) / 16.0;
        }
        self.transit = transit;
    }

    pub fn jitter(&self) -> f64 {
        self.jitter
    }

    /// Value written into report blocks.
    pub fn jitter_rounded(&self) -> u32 {
        self.jitter.round() as u32
    }

    pub fn transit(&self) -> i32 {
        self.transit
    }
}

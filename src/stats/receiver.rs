//! Per-SSRC reception statistics feeding receiver reports

use crate::packet::{ReceptionReport, RtpHeader};
use crate::sequence::SequenceTracker;
use crate::stats::jitter::JitterEstimator;

/// Where a tracked direction is in its reporting life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiverPhase {
    /// No RTP seen yet.
    Unseen,
    /// Counting RTP, no Sender Report correlated yet.
    Tracking,
    /// At least one Sender Report matched; reports may be emitted.
    SrCorrelated,
}

/// Values computed when a Sender Report closes a reporting interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntervalStats {
    pub expected: u32,
    pub cumulative_lost: i64,
    pub expected_interval: u32,
    pub received_interval: u32,
    pub lost_interval: i64,
    pub fraction_lost: u8,
}

#[derive(Debug, Clone, Default)]
pub struct StreamReceiverState {
    ssrc: u32,
    sequence: SequenceTracker,
    jitter: JitterEstimator,
    packets_received: u32,
    expected_prior: u32,
    received_prior: u32,
    cumulative_lost: i64,
    fraction_lost: u8,
    last_rtp_timestamp: u32,
    last_sr_mid_ntp: u32,
    last_sr_received_at_ms: u64,
    last_rr_sent_at_ms: u64,
    sr_correlated: bool,
}

impl StreamReceiverState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> ReceiverPhase {
        if self.ssrc == 0 {
            ReceiverPhase::Unseen
        } else if self.sr_correlated {
            ReceiverPhase::SrCorrelated
        } else {
            ReceiverPhase::Tracking
        }
    }

    /// Account for one RTP packet. `clock_rate` is in ticks per millisecond.
    ///
    /// Returns false, without touching any counter, when the packet belongs
    /// to a different SSRC than the one this direction locked onto.
    pub fn on_rtp(&mut self, header: &RtpHeader<'_>, arrival_ms: u64, clock_rate: u32) -> bool {
        if self.sequence.is_started() && header.ssrc() != self.ssrc {
            return false;
        }
        self.packets_received = self.packets_received.wrapping_add(1);
        if !self.sequence.is_started() {
            self.ssrc = header.ssrc();
        }
        self.sequence.observe(header.sequence_number());
        self.jitter.update(arrival_ms, clock_rate, header.timestamp());
        self.last_rtp_timestamp = header.timestamp();
        true
    }

    /// Record a matching Sender Report and close the current interval.
    pub fn on_sender_report(&mut self, middle_ntp: u32, received_at_ms: u64) -> IntervalStats {
        self.last_sr_mid_ntp = middle_ntp;
        self.last_sr_received_at_ms = received_at_ms;
        self.sr_correlated = true;
        self.close_interval()
    }

    /// Compute loss over the interval since the previous call and roll the
    /// interval counters forward.
    pub fn close_interval(&mut self) -> IntervalStats {
        let expected = self
            .sequence
            .extended_max()
            .wrapping_sub(self.sequence.base_seq() as u32)
            .wrapping_add(1);
        self.cumulative_lost = expected as i64 - self.packets_received as i64;

        let expected_interval = expected.wrapping_sub(self.expected_prior);
        let received_interval = self.packets_received.wrapping_sub(self.received_prior);
        let lost_interval = expected_interval as i64 - received_interval as i64;
        self.expected_prior = expected;
        self.received_prior = self.packets_received;

        self.fraction_lost = if expected_interval != 0 && lost_interval > 0 {
            ((lost_interval << 8) / expected_interval as i64).min(255) as u8
        } else {
            0
        };

        IntervalStats {
            expected,
            cumulative_lost: self.cumulative_lost,
            expected_interval,
            received_interval,
            lost_interval,
            fraction_lost: self.fraction_lost,
        }
    }

    /// Report block contents as of `now_ms`.
    pub fn build_report(&self, now_ms: u64) -> ReceptionReport {
        let delay_since_last_sr = if self.sr_correlated {
            let elapsed_ms = now_ms.saturating_sub(self.last_sr_received_at_ms);
            (elapsed_ms * 65536 / 1000).min(u32::MAX as u64) as u32
        } else {
            0
        };
        ReceptionReport {
            source_ssrc: self.ssrc,
            fraction_lost: self.fraction_lost,
            cumulative_lost: self.cumulative_lost.clamp(i32::MIN as i64, i32::MAX as i64) as i32,
            extended_highest_seq: self.sequence.extended_max(),
            jitter: self.jitter.jitter_rounded(),
            last_sr: self.last_sr_mid_ntp,
            delay_since_last_sr,
        }
    }

    pub fn mark_report_sent(&mut self, now_ms: u64) {
        self.last_rr_sent_at_ms = now_ms;
    }

    pub fn ssrc(&self) -> u32 {
        self.ssrc
    }

    pub fn sequence(&self) -> &SequenceTracker {
        &self.sequence
    }

    pub fn jitter(&self) -> &JitterEstimator {
        &self.jitter
    }

    pub fn packets_received(&self) -> u32 {
        self.packets_received
    }

    pub fn cumulative_lost(&self) -> i64 {
        self.cumulative_lost
    }

    pub fn fraction_lost(&self) -> u8 {
        self.fraction_lost
    }

    pub fn last_rtp_timestamp(&self) -> u32 {
        self.last_rtp_timestamp
    }

    pub fn last_sr_mid_ntp(&self) -> u32 {
        self.last_sr_mid_ntp
    }

    pub fn last_sr_received_at_ms(&self) -> u64 {
        self.last_sr_received_at_ms
    }

    pub fn last_rr_sent_at_ms(&self) -> u64 {
        self.last_rr_sent_at_ms
    }

    #[cfg(test)]
    pub(crate) fn with_counters(
        ssrc: u32,
        sequence: SequenceTracker,
        packets_received: u32,
        expected_prior: u32,
        received_prior: u32,
    ) -> Self {
        Self {
            ssrc,
            sequence,
            packets_received,
            expected_prior,
            received_prior,
            ..Default::default()
        }
    }
}

//! Receiver report stage
//!
//! Keeps reception statistics for one audio and one video direction and
//! answers every matching Sender Report with a Receiver Report sent back
//! out through the pipeline. Once a direction has seen a Sender Report,
//! `on_tick` also reports it every `rr_interval_ms`.

use log::{debug, info};
use std::sync::Arc;

use crate::packet::rtcp::RTCP_SR_PT;
use crate::packet::{Packet, SenderReport};
use crate::pipeline::handler::{Context, Handler};
use crate::pipeline::health::PipelineHealth;
use crate::pipeline::types::MediaKind;
use crate::stats::{ReceiverPhase, StreamReceiverState};

/// RTP clock ticks per millisecond
const OPUS_CLOCK_RATE: u32 = 48;
const AUDIO_CLOCK_RATE: u32 = 8;
const VIDEO_CLOCK_RATE: u32 = 90;

const DIRECTIONS: [MediaKind; 2] = [MediaKind::Audio, MediaKind::Video];

#[derive(Debug, Clone)]
pub struct ReportConfig {
    pub opus_payload_type: u8,
    /// Payload types treated as audio when the packet carries no media tag
    pub audio_payload_types: Vec<u8>,
    pub rr_interval_ms: u64,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            opus_payload_type: 111,
            audio_payload_types: vec![111, 0, 8],
            rr_interval_ms: 1000,
        }
    }
}

pub struct ReceiverReportStage {
    audio: StreamReceiverState,
    video: StreamReceiverState,
    config: ReportConfig,
    health: Arc<PipelineHealth>,
    enabled: bool,
}

impl ReceiverReportStage {
    pub fn new(config: ReportConfig, health: Arc<PipelineHealth>) -> Self {
        Self {
            audio: StreamReceiverState::new(),
            video: StreamReceiverState::new(),
            config,
            health,
            enabled: true,
        }
    }

    /// Statistics of one direction
    pub fn state(&self, kind: MediaKind) -> &StreamReceiverState {
        match kind {
            MediaKind::Audio => &self.audio,
            MediaKind::Video => &self.video,
        }
    }

    fn state_mut(&mut self, kind: MediaKind) -> &mut StreamReceiverState {
        match kind {
            MediaKind::Audio => &mut self.audio,
            MediaKind::Video => &mut self.video,
        }
    }

    fn classify(&self, packet: &Packet, payload_type: u8) -> MediaKind {
        packet.media().unwrap_or_else(|| {
            if payload_type == self.config.opus_payload_type
                || self.config.audio_payload_types.contains(&payload_type)
            {
                MediaKind::Audio
            } else {
                MediaKind::Video
            }
        })
    }

    fn clock_rate(&self, kind: MediaKind, payload_type: u8) -> u32 {
        match kind {
            MediaKind::Audio if payload_type == self.config.opus_payload_type => OPUS_CLOCK_RATE,
            MediaKind::Audio => AUDIO_CLOCK_RATE,
            MediaKind::Video => VIDEO_CLOCK_RATE,
        }
    }

    /// Returns false when the packet could not be parsed.
    fn on_rtp(&mut self, packet: &Packet) -> bool {
        let head = match packet.rtp_header() {
            Ok(head) => head,
            Err(e) => {
                debug!("ReceiverReportStage: dropping malformed RTP: {}", e);
                return false;
            }
        };
        let kind = self.classify(packet, head.payload_type());
        let clock_rate = self.clock_rate(kind, head.payload_type());
        let state = self.state_mut(kind);
        let first = state.phase() == ReceiverPhase::Unseen;
        if !state.on_rtp(&head, packet.received_at_ms(), clock_rate) {
            debug!(
                "ReceiverReportStage: {} ssrc {:#010x} is not the tracked {:#010x}",
                kind,
                head.ssrc(),
                state.ssrc()
            );
        } else if first {
            info!(
                "ReceiverReportStage: tracking {} ssrc {:#010x}",
                kind,
                head.ssrc()
            );
        }
        true
    }

    /// Returns false when not a single sub-packet could be parsed.
    fn on_rtcp(&mut self, ctx: &mut Context<'_>, packet: &Packet) -> bool {
        let mut parsed_any = false;
        for item in packet.rtcp_packets() {
            let rtcp = match item {
                Ok(rtcp) => rtcp,
                Err(e) => {
                    debug!("ReceiverReportStage: malformed RTCP: {}", e);
                    break;
                }
            };
            parsed_any = true;
            if rtcp.packet_type() != RTCP_SR_PT {
                continue;
            }
            let sr = match SenderReport::parse(rtcp) {
                Ok(sr) => sr,
                Err(e) => {
                    debug!("ReceiverReportStage: malformed sender report: {}", e);
                    continue;
                }
            };
            let Some(kind) = DIRECTIONS.into_iter().find(|&kind| {
                let state = self.state(kind);
                state.phase() != ReceiverPhase::Unseen && state.ssrc() == sr.ssrc()
            }) else {
                debug!(
                    "ReceiverReportStage: sender report for unknown ssrc {:#010x}",
                    sr.ssrc()
                );
                continue;
            };

            let stats = self
                .state_mut(kind)
                .on_sender_report(sr.middle_ntp(), packet.received_at_ms());
            debug!(
                "ReceiverReportStage: {} SR, expected {} lost {} fraction {}",
                kind, stats.expected, stats.cumulative_lost, stats.fraction_lost
            );
            self.send_report(ctx, kind);
        }
        parsed_any
    }

    fn send_report(&mut self, ctx: &mut Context<'_>, kind: MediaKind) {
        // nobody to send it to
        if !ctx.has_outbound() {
            return;
        }
        let now_ms = ctx.now_ms();
        let state = self.state_mut(kind);
        let report = state.build_report(now_ms);
        let bytes = report.to_receiver_report(state.ssrc());
        state.mark_report_sent(now_ms);
        ctx.fire_write(Packet::new(bytes, now_ms).with_media(kind));
        self.health.record_rr_sent();
    }
}

impl Handler for ReceiverReportStage {
    fn name(&self) -> &'static str {
        "ReceiverReportStage"
    }

    fn enable(&mut self) {
        self.enabled = true;
    }

    fn disable(&mut self) {
        self.enabled = false;
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn read(&mut self, ctx: &mut Context<'_>, packet: Packet) {
        if !self.enabled {
            ctx.fire_read(packet);
            return;
        }
        let keep = if packet.is_rtp() {
            self.on_rtp(&packet)
        } else if packet.is_rtcp() {
            self.on_rtcp(ctx, &packet)
        } else {
            true
        };
        if keep {
            ctx.fire_read(packet);
        } else {
            self.health.record_malformed();
        }
    }

    fn on_tick(&mut self, ctx: &mut Context<'_>) {
        // intervals only close when a report actually goes out
        if !self.enabled || !ctx.has_outbound() {
            return;
        }
        let now_ms = ctx.now_ms();
        let interval_ms = self.config.rr_interval_ms;
        for kind in DIRECTIONS {
            let state = self.state_mut(kind);
            if state.phase() != ReceiverPhase::SrCorrelated {
                continue;
            }
            if now_ms.saturating_sub(state.last_rr_sent_at_ms()) < interval_ms {
                continue;
            }
            state.close_interval();
            self.send_report(ctx, kind);
        }
    }
}

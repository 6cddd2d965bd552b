//! Frame assembly stage
//!
//! Runs one depacketizer per video SSRC and hands every completed frame to
//! the consumer over a bounded channel. Packets always continue upstream
//! unchanged; this stage only observes them.

use log::{debug, info, warn};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::decoder::{Codec, Depacketizer, new_depacketizer};
use crate::packet::Packet;
use crate::pipeline::handler::{Context, Handler};
use crate::pipeline::health::PipelineHealth;
use crate::pipeline::types::{EncodedFrame, MediaKind};

const DEFAULT_MAX_STREAMS: usize = 16;
const DEFAULT_IDLE_MS: u64 = 10_000;

struct Assembler {
    depacketizer: Box<dyn Depacketizer>,
    desyncs_seen: u64,
    last_seen_ms: u64,
}

pub struct FrameAssemblyStage {
    codecs: HashMap<u8, Codec>,
    assemblers: HashMap<u32, Assembler>,
    frame_tx: mpsc::Sender<EncodedFrame>,
    health: Arc<PipelineHealth>,
    max_streams: usize,
    idle_ms: u64,
    enabled: bool,
}

impl FrameAssemblyStage {
    /// `codecs` maps payload types to the codec they carry; packets of any
    /// other payload type are not assembled.
    pub fn new(
        codecs: HashMap<u8, Codec>,
        frame_tx: mpsc::Sender<EncodedFrame>,
        health: Arc<PipelineHealth>,
    ) -> Self {
        Self {
            codecs,
            assemblers: HashMap::new(),
            frame_tx,
            health,
            max_streams: DEFAULT_MAX_STREAMS,
            idle_ms: DEFAULT_IDLE_MS,
            enabled: true,
        }
    }

    /// Cap the sources assembled at once. A depacketizer that saw nothing
    /// for `idle_ms` is dropped, partial frame included.
    pub fn with_limits(mut self, max_streams: usize, idle_ms: u64) -> Self {
        self.max_streams = max_streams;
        self.idle_ms = idle_ms;
        self
    }

    /// Number of video sources with a depacketizer
    pub fn streams(&self) -> usize {
        self.assemblers.len()
    }

    fn prune(&mut self, now_ms: u64) {
        let idle_ms = self.idle_ms;
        self.assemblers.retain(|ssrc, assembler| {
            let keep = now_ms.saturating_sub(assembler.last_seen_ms) < idle_ms;
            if !keep {
                debug!("FrameAssemblyStage: dropping idle ssrc {:#010x}", ssrc);
            }
            keep
        });
    }

    fn assemble(&mut self, packet: &Packet, now_ms: u64) {
        if packet.media() == Some(MediaKind::Audio) {
            return;
        }
        let Ok(head) = packet.rtp_header() else {
            return;
        };
        let Some(&codec) = self.codecs.get(&head.payload_type()) else {
            return;
        };
        let ssrc = head.ssrc();

        if !self.assemblers.contains_key(&ssrc) && self.assemblers.len() >= self.max_streams {
            self.prune(now_ms);
            if self.assemblers.len() >= self.max_streams {
                debug!(
                    "FrameAssemblyStage: {} sources assembled, ignoring ssrc {:#010x}",
                    self.assemblers.len(),
                    ssrc
                );
                return;
            }
        }
        let assembler = self.assemblers.entry(ssrc).or_insert_with(|| {
            info!("FrameAssemblyStage: {} stream ssrc {:#010x}", codec, ssrc);
            Assembler {
                depacketizer: new_depacketizer(codec),
                desyncs_seen: 0,
                last_seen_ms: now_ms,
            }
        });
        assembler.last_seen_ms = now_ms;
        if assembler.depacketizer.codec() != codec {
            info!(
                "FrameAssemblyStage: ssrc {:#010x} switched {} -> {}",
                ssrc,
                assembler.depacketizer.codec(),
                codec
            );
            assembler.depacketizer = new_depacketizer(codec);
            assembler.desyncs_seen = 0;
        }

        let depacketizer = &mut assembler.depacketizer;
        depacketizer.fetch_packet(packet.data());
        let complete = depacketizer.process_packet();

        let desyncs = depacketizer.desync_count();
        if desyncs > assembler.desyncs_seen {
            for _ in assembler.desyncs_seen..desyncs {
                self.health.record_depacketizer_reset();
            }
            assembler.desyncs_seen = desyncs;
        }

        if !complete {
            return;
        }
        let keyframe = depacketizer.is_keyframe();
        let Some(data) = depacketizer.take_frame() else {
            return;
        };
        let frame = EncodedFrame {
            ssrc,
            rtp_timestamp: head.timestamp(),
            payload_type: head.payload_type(),
            keyframe,
            data,
        };
        debug!("FrameAssemblyStage: {:?}", frame);
        match self.frame_tx.try_send(frame) {
            Ok(()) => self.health.record_frame(keyframe),
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("FrameAssemblyStage: consumer is behind, dropping frame");
                self.health.record_frame_drop();
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("FrameAssemblyStage: frame receiver closed");
                self.health.record_frame_drop();
            }
        }
    }
}

impl Handler for FrameAssemblyStage {
    fn name(&self) -> &'static str {
        "FrameAssemblyStage"
    }

    fn enable(&mut self) {
        self.enabled = true;
    }

    /// Partial frames are thrown away; assembly restarts at the next
    /// frame start once enabled again.
    fn disable(&mut self) {
        self.enabled = false;
        for assembler in self.assemblers.values_mut() {
            assembler.depacketizer.reset();
        }
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn read(&mut self, ctx: &mut Context<'_>, packet: Packet) {
        if self.enabled && packet.is_rtp() {
            self.assemble(&packet, ctx.now_ms());
        }
        ctx.fire_read(packet);
    }

    fn on_tick(&mut self, ctx: &mut Context<'_>) {
        self.prune(ctx.now_ms());
    }
}

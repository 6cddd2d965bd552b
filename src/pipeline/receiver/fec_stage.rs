//! FEC stage for the receiver pipeline
//!
//! Unwraps RED, feeds media and ULPFEC packets to a `FecEngine` and injects
//! whatever the engine rebuilds as if it had arrived from the network.

use bytes::BytesMut;
use log::{debug, warn};
use std::sync::Arc;

use crate::fec::{FecEngine, FecError, UlpfecReceiver, red};
use crate::packet::{Packet, RtpHeader, RtpHeaderMut};
use crate::pipeline::handler::{Context, Handler};
use crate::pipeline::health::PipelineHealth;

pub struct FecStage {
    engine: Box<dyn FecEngine>,
    red_payload_type: u8,
    ulpfec_payload_type: u8,
    health: Arc<PipelineHealth>,
    enabled: bool,
}

impl FecStage {
    /// Stage backed by a `UlpfecReceiver`
    pub fn new(red_payload_type: u8, ulpfec_payload_type: u8, health: Arc<PipelineHealth>) -> Self {
        Self::with_engine(
            Box::new(UlpfecReceiver::new()),
            red_payload_type,
            ulpfec_payload_type,
            health,
        )
    }

    pub fn with_engine(
        engine: Box<dyn FecEngine>,
        red_payload_type: u8,
        ulpfec_payload_type: u8,
        health: Arc<PipelineHealth>,
    ) -> Self {
        Self {
            engine,
            red_payload_type,
            ulpfec_payload_type,
            health,
            enabled: true,
        }
    }

    /// Replace the RED payload with its primary block. Returns the plain
    /// packet and the primary block's payload type.
    fn unwrap_red(&self, packet: &Packet, head: &RtpHeader<'_>) -> Result<(Packet, u8), FecError> {
        let blocks = red::split(head.payload())?;
        let Some(primary) = blocks.last() else {
            return Err(FecError::EmptyRed);
        };

        let mut buf = BytesMut::with_capacity(head.header_len() + primary.data.len());
        buf.extend_from_slice(&head.as_bytes()[..head.header_len()]);
        buf.extend_from_slice(primary.data);
        {
            let mut writer = RtpHeaderMut::new(&mut buf)?;
            writer.set_payload_type(primary.payload_type);
            writer.set_padding(false);
        }
        Ok((packet.with_data(buf.freeze()), primary.payload_type))
    }

    fn feed(&mut self, packet: Packet) -> Option<Packet> {
        let head = match packet.rtp_header() {
            Ok(head) => head,
            Err(e) => {
                debug!("FecStage: dropping malformed RTP: {}", e);
                self.health.record_malformed();
                return None;
            }
        };

        let (forward, payload_type) = if head.payload_type() == self.red_payload_type {
            match self.unwrap_red(&packet, &head) {
                Ok(unwrapped) => unwrapped,
                Err(e) => {
                    debug!("FecStage: dropping malformed RED packet: {}", e);
                    self.health.record_malformed();
                    return None;
                }
            }
        } else {
            (packet.clone(), head.payload_type())
        };

        let added = if payload_type == self.ulpfec_payload_type {
            forward
                .rtp_header()
                .map_err(FecError::from)
                .and_then(|fec| self.engine.add_fec(fec.ssrc(), fec.payload()))
        } else {
            self.engine.add_media(forward.data())
        };
        if let Err(e) = added {
            warn!("FecStage: engine rejected packet: {}", e);
            self.health.record_fec_failure();
        }
        Some(forward)
    }
}

impl Handler for FecStage {
    fn name(&self) -> &'static str {
        "FecStage"
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
        if !self.enabled || !packet.is_rtp() {
            ctx.fire_read(packet);
            return;
        }

        let template = packet.clone();
        if let Some(forward) = self.feed(packet) {
            ctx.fire_read(forward);
        }

        let mut recovered = Vec::new();
        if let Err(e) = self.engine.recover(&mut |bytes| recovered.push(bytes)) {
            warn!("FecStage: recovery failed: {}", e);
            self.health.record_fec_failure();
        }
        if !recovered.is_empty() {
            self.health.record_fec_recovered(recovered.len() as u64);
        }
        for bytes in recovered {
            ctx.fire_read(template.with_data(bytes));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::chain::Pipeline;
    use crate::pipeline::clock::ManualClock;
    use crate::testutil::{red_payload, rtp_bytes, ulpfec_payload};
    use std::sync::Mutex;

    const RED: u8 = 116;
    const ULPFEC: u8 = 117;
    const VP8: u8 = 100;
    const SSRC: u32 = 0x2222;

    fn fec_pipeline() -> (Pipeline, Arc<PipelineHealth>, Arc<Mutex<Vec<Packet>>>) {
        let health = Arc::new(PipelineHealth::new());
        let mut pipeline = Pipeline::with_health(Arc::new(ManualClock::new(0)), health.clone());
        pipeline.add_last(Box::new(FecStage::new(RED, ULPFEC, health.clone())));
        let out = Arc::new(Mutex::new(Vec::new()));
        let sink = out.clone();
        pipeline.set_inbound_sink(move |p| sink.lock().unwrap().push(p));
        (pipeline, health, out)
    }

    fn media(seq: u16, payload: &[u8]) -> Vec<u8> {
        rtp_bytes(seq, seq as u32 * 100, SSRC, VP8, false, payload)
    }

    fn red_wrap(seq: u16, block_pt: u8, block: &[u8]) -> Vec<u8> {
        rtp_bytes(seq, seq as u32 * 100, SSRC, RED, false, &red_payload(block_pt, block))
    }

    fn seqs(out: &Arc<Mutex<Vec<Packet>>>) -> Vec<(u16, u8)> {
        out.lock()
            .unwrap()
            .iter()
            .map(|p| {
                let head = p.rtp_header().unwrap();
                (head.sequence_number(), head.payload_type())
            })
            .collect()
    }

    #[test]
    fn test_red_primary_is_unwrapped() {
        let (mut pipeline, _, out) = fec_pipeline();
        pipeline.read(Packet::new(red_wrap(5, VP8, &[1, 2, 3]), 0));

        let out = out.lock().unwrap();
        assert_eq!(out.len(), 1);
        let head = out[0].rtp_header().unwrap();
        assert_eq!(head.payload_type(), VP8);
        assert_eq!(head.sequence_number(), 5);
        assert_eq!(head.payload(), &[1, 2, 3]);
    }

    #[test]
    fn test_lost_packet_is_recovered_from_red_ulpfec() {
        let (mut pipeline, health, out) = fec_pipeline();
        let protected = vec![media(10, &[1; 8]), media(11, &[2; 5]), media(12, &[3; 9])];
        let fec = ulpfec_payload(&protected, 10, false);

        pipeline.read(Packet::new(red_wrap(10, VP8, &[1; 8]), 0));
        pipeline.read(Packet::new(red_wrap(12, VP8, &[3; 9]), 0));
        pipeline.read(Packet::new(red_wrap(13, ULPFEC, &fec), 0));

        assert_eq!(
            seqs(&out),
            vec![(10, VP8), (12, VP8), (13, ULPFEC), (11, VP8)]
        );
        let out = out.lock().unwrap();
        assert_eq!(&out[3].data()[..], &protected[1][..]);
        assert_eq!(health.fec_recovered(), 1);
    }

    #[test]
    fn test_plain_ulpfec_stream() {
        let (mut pipeline, _, out) = fec_pipeline();
        let protected = vec![media(20, &[7; 4]), media(21, &[8; 4])];
        let fec = ulpfec_payload(&protected, 20, false);

        pipeline.read(Packet::new(protected[1].clone(), 0));
        pipeline.read(Packet::new(rtp_bytes(22, 0, SSRC, ULPFEC, false, &fec), 0));
        assert_eq!(seqs(&out), vec![(21, VP8), (22, ULPFEC), (20, VP8)]);
    }

    #[test]
    fn test_disabled_passes_everything_unmodified() {
        let (mut pipeline, health, out) = fec_pipeline();
        pipeline.set_enabled("FecStage", false);

        let protected = vec![media(10, &[1; 4]), media(11, &[2; 4])];
        let red = red_wrap(10, VP8, &[1; 4]);
        pipeline.read(Packet::new(red.clone(), 0));
        let fec = ulpfec_payload(&protected, 10, false);
        pipeline.read(Packet::new(red_wrap(12, ULPFEC, &fec), 0));

        assert_eq!(seqs(&out), vec![(10, RED), (12, RED)]);
        assert_eq!(&out.lock().unwrap()[0].data()[..], &red[..]);
        assert_eq!(health.fec_recovered(), 0);
    }

    #[test]
    fn test_broken_fec_does_not_block_media() {
        crate::testutil::init_logging();
        let (mut pipeline, health, out) = fec_pipeline();
        pipeline.read(Packet::new(red_wrap(1, ULPFEC, &[0; 4]), 0));
        pipeline.read(Packet::new(red_wrap(2, VP8, &[5; 4]), 0));

        // the rejected block still goes on unwrapped, like every other RED packet
        assert_eq!(seqs(&out), vec![(1, ULPFEC), (2, VP8)]);
        assert_eq!(out.lock().unwrap()[0].rtp_header().unwrap().payload(), &[0; 4]);
        assert_eq!(health.fec_failures(), 1);
    }

    #[test]
    fn test_truncated_red_is_dropped() {
        let (mut pipeline, health, out) = fec_pipeline();
        pipeline.read(Packet::new(rtp_bytes(3, 0, SSRC, RED, false, &[0x80 | VP8, 0]), 0));
        assert!(out.lock().unwrap().is_empty());
        assert_eq!(health.malformed_drops(), 1);
    }
}

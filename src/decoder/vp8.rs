//! VP8 RTP depacketizer (RFC 7741)

use bytes::{Bytes, BytesMut};
use log::debug;

use super::Codec;
use super::depacketizer::{Depacketizer, FrameState};
use crate::packet::{PacketError, RtpHeader};

/// Fields of the VP8 payload descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Vp8Descriptor {
    pub non_reference: bool,
    pub start_of_partition: bool,
    pub partition_id: u8,
    pub picture_id: Option<u16>,
    pub tl0_pic_idx: Option<u8>,
    pub temporal_id: Option<u8>,
    pub key_idx: Option<u8>,
    /// Bytes the descriptor occupies at the front of the payload
    pub len: usize,
}

impl Vp8Descriptor {
    pub fn parse(payload: &[u8]) -> Result<Self, PacketError> {
        let truncated = |needed: usize| PacketError::Truncated {
            needed,
            actual: payload.len(),
        };
        let first = *payload.first().ok_or_else(|| truncated(1))?;
        let mut desc = Vp8Descriptor {
            non_reference: first & 0x20 != 0,
            start_of_partition: first & 0x10 != 0,
            partition_id: first & 0x07,
            len: 1,
            ..Default::default()
        };
        if first & 0x80 == 0 {
            return Ok(desc);
        }

        let ext = *payload.get(1).ok_or_else(|| truncated(2))?;
        desc.len = 2;
        if ext & 0x80 != 0 {
            let b = *payload.get(desc.len).ok_or_else(|| truncated(desc.len + 1))?;
            if b & 0x80 != 0 {
                let low = *payload.get(desc.len + 1).ok_or_else(|| truncated(desc.len + 2))?;
                desc.picture_id = Some((((b & 0x7f) as u16) << 8) | low as u16);
                desc.len += 2;
            } else {
                desc.picture_id = Some(b as u16);
                desc.len += 1;
            }
        }
        if ext & 0x40 != 0 {
            desc.tl0_pic_idx = Some(*payload.get(desc.len).ok_or_else(|| truncated(desc.len + 1))?);
            desc.len += 1;
        }
        if ext & 0x30 != 0 {
            let b = *payload.get(desc.len).ok_or_else(|| truncated(desc.len + 1))?;
            if ext & 0x20 != 0 {
                desc.temporal_id = Some(b >> 6);
            }
            if ext & 0x10 != 0 {
                desc.key_idx = Some(b & 0x1f);
            }
            desc.len += 1;
        }
        Ok(desc)
    }

    /// First packet of a frame: start of partition 0.
    pub fn is_frame_start(&self) -> bool {
        self.start_of_partition && self.partition_id == 0
    }
}

pub struct Vp8Depacketizer {
    pending: BytesMut,
    state: FrameState,
}

impl Default for Vp8Depacketizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Vp8Depacketizer {
    pub fn new() -> Self {
        Self {
            pending: BytesMut::new(),
            state: FrameState::default(),
        }
    }
}

impl Depacketizer for Vp8Depacketizer {
    fn codec(&self) -> Codec {
        Codec::Vp8
    }

    fn fetch_packet(&mut self, packet: &[u8]) {
        self.pending.clear();
        self.pending.extend_from_slice(packet);
    }

    fn process_packet(&mut self) -> bool {
        let head = match RtpHeader::parse(&self.pending) {
            Ok(head) => head,
            Err(e) => {
                debug!("VP8 depacketizer: bad RTP packet: {}", e);
                return false;
            }
        };
        let payload = head.payload();
        let desc = match Vp8Descriptor::parse(payload) {
            Ok(desc) => desc,
            Err(e) => {
                debug!("VP8 depacketizer: bad payload descriptor: {}", e);
                return false;
            }
        };
        let data = &payload[desc.len..];

        if !self.state.prepare(Codec::Vp8, head.sequence_number()) {
            return false;
        }
        if desc.is_frame_start() {
            self.state.start_frame(Codec::Vp8);
            // inverted P bit of the VP8 payload header
            if data.first().is_some_and(|b| b & 0x01 == 0) {
                self.state.set_keyframe();
            }
        } else if !self.state.in_frame() {
            return false;
        }
        self.state.append(data);
        self.state.finish(head.marker())
    }

    fn is_keyframe(&self) -> bool {
        self.state.is_keyframe()
    }

    fn frame_size(&self) -> usize {
        self.state.frame().len()
    }

    fn frame(&self) -> &[u8] {
        self.state.frame()
    }

    fn take_frame(&mut self) -> Option<Bytes> {
        self.state.take_frame()
    }

    fn reset(&mut self) {
        self.pending.clear();
        self.state.reset();
    }

    fn desync_count(&self) -> u64 {
        self.state.desyncs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{rtp_bytes, vp8_packet};

    const SEQ: u16 = 44444;
    const DATA_SIZE: usize = 20;

    fn feed(depacketizer: &mut Vp8Depacketizer, packet: &[u8]) -> bool {
        depacketizer.fetch_packet(packet);
        depacketizer.process_packet()
    }

    #[test]
    fn test_fresh_depacketizer_is_empty() {
        let depacketizer = Vp8Depacketizer::new();
        assert!(!depacketizer.is_keyframe());
        assert_eq!(depacketizer.frame_size(), 0);
    }

    #[test]
    fn test_single_packet_frame() {
        let mut depacketizer = Vp8Depacketizer::new();
        assert!(feed(&mut depacketizer, &vp8_packet(SEQ, true, false, true)));
        assert!(!depacketizer.is_keyframe());
        assert_eq!(depacketizer.frame_size(), DATA_SIZE);
    }

    #[test]
    fn test_single_packet_keyframe() {
        let mut depacketizer = Vp8Depacketizer::new();
        assert!(feed(&mut depacketizer, &vp8_packet(SEQ, true, true, true)));
        assert!(depacketizer.is_keyframe());
        assert_eq!(depacketizer.frame_size(), DATA_SIZE);
    }

    #[test]
    fn test_multi_packet_keyframe() {
        let mut depacketizer = Vp8Depacketizer::new();
        assert!(!feed(&mut depacketizer, &vp8_packet(SEQ, true, true, false)));
        assert!(!feed(&mut depacketizer, &vp8_packet(SEQ + 1, false, false, false)));
        assert!(feed(&mut depacketizer, &vp8_packet(SEQ + 2, false, false, true)));
        assert!(depacketizer.is_keyframe());
        assert_eq!(depacketizer.frame_size(), DATA_SIZE * 3);
    }

    #[test]
    fn test_reset_after_frame() {
        let mut depacketizer = Vp8Depacketizer::new();
        assert!(feed(&mut depacketizer, &vp8_packet(SEQ, true, true, true)));
        depacketizer.reset();
        assert!(!depacketizer.is_keyframe());
        assert_eq!(depacketizer.frame_size(), 0);
    }

    #[test]
    fn test_next_frame_starts_clean() {
        let mut depacketizer = Vp8Depacketizer::new();
        assert!(feed(&mut depacketizer, &vp8_packet(1, true, true, true)));
        assert!(!feed(&mut depacketizer, &vp8_packet(2, true, false, false)));
        assert!(!depacketizer.is_keyframe());
        assert_eq!(depacketizer.frame_size(), DATA_SIZE);
    }

    #[test]
    fn test_gap_drops_partial_frame() {
        let mut depacketizer = Vp8Depacketizer::new();
        assert!(!feed(&mut depacketizer, &vp8_packet(10, true, true, false)));
        // 11 lost
        assert!(!feed(&mut depacketizer, &vp8_packet(12, false, false, true)));
        assert_eq!(depacketizer.frame_size(), 0);
        assert_eq!(depacketizer.desync_count(), 1);

        // recovers on the next frame start
        assert!(feed(&mut depacketizer, &vp8_packet(13, true, false, true)));
        assert_eq!(depacketizer.frame_size(), DATA_SIZE);
    }

    #[test]
    fn test_continuation_without_start_is_ignored() {
        let mut depacketizer = Vp8Depacketizer::new();
        assert!(!feed(&mut depacketizer, &vp8_packet(5, false, false, true)));
        assert_eq!(depacketizer.frame_size(), 0);
    }

    #[test]
    fn test_lost_marker_restarts_on_new_frame() {
        let mut depacketizer = Vp8Depacketizer::new();
        assert!(!feed(&mut depacketizer, &vp8_packet(1, true, true, false)));
        assert!(feed(&mut depacketizer, &vp8_packet(2, true, false, true)));
        assert!(!depacketizer.is_keyframe());
        assert_eq!(depacketizer.frame_size(), DATA_SIZE);
        assert_eq!(depacketizer.desync_count(), 1);
    }

    #[test]
    fn test_extended_descriptor() {
        // X, then I with 15-bit picture id, L, T and K
        let payload = [0x90, 0xf0, 0x80 | 0x12, 0x34, 7, 0b0110_0011, 0x00, 1, 2];
        let desc = Vp8Descriptor::parse(&payload).unwrap();
        assert!(desc.is_frame_start());
        assert_eq!(desc.picture_id, Some(0x1234));
        assert_eq!(desc.tl0_pic_idx, Some(7));
        assert_eq!(desc.temporal_id, Some(1));
        assert_eq!(desc.key_idx, Some(3));
        assert_eq!(desc.len, 6);

        let mut depacketizer = Vp8Depacketizer::new();
        assert!(feed(&mut depacketizer, &rtp_bytes(1, 0, 9, 100, true, &payload)));
        assert!(depacketizer.is_keyframe());
        assert_eq!(depacketizer.frame(), &[0x00, 1, 2]);
    }

    #[test]
    fn test_truncated_descriptor() {
        assert!(Vp8Descriptor::parse(&[]).is_err());
        assert!(Vp8Descriptor::parse(&[0x80]).is_err());
        assert!(Vp8Descriptor::parse(&[0x80, 0x80, 0x80]).is_err());
        let mut depacketizer = Vp8Depacketizer::new();
        assert!(!feed(&mut depacketizer, &rtp_bytes(1, 0, 9, 100, true, &[0x90, 0xc0])));
    }
}

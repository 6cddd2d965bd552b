use bytes::{BufMut, Bytes, BytesMut};
use log::{debug, warn};

use super::Codec;
use super::depacketizer::{Depacketizer, FrameState};
use crate::packet::RtpHeader;

const START_CODE: [u8; 4] = [0, 0, 0, 1];

const NAL_IDR: u8 = 5;
const NAL_SPS: u8 = 7;
const NAL_STAP_A: u8 = 24;
const NAL_FU_A: u8 = 28;

/// Reassembles H.264 NAL units from RTP packets (RFC 6184)
/// into complete Annex B access units.
///
/// Access units before the first IDR are discarded, since nothing can
/// decode them.
pub struct H264Depacketizer {
    pending: BytesMut,
    state: FrameState,
    seen_idr: bool,
    in_fua_fragment: bool,
}

impl Default for H264Depacketizer {
    fn default() -> Self {
        Self::new()
    }
}

impl H264Depacketizer {
    pub fn new() -> Self {
        Self {
            pending: BytesMut::new(),
            state: FrameState::default(),
            seen_idr: false,
            in_fua_fragment: false,
        }
    }

    fn push_nal(state: &mut FrameState, nal: &[u8]) {
        let Some(&header) = nal.first() else {
            return;
        };
        if matches!(header & 0x1f, NAL_IDR | NAL_SPS) {
            state.set_keyframe();
        }
        let buffer = state.buffer_mut();
        buffer.put_slice(&START_CODE);
        buffer.put_slice(nal);
    }
}

impl Depacketizer for H264Depacketizer {
    fn codec(&self) -> Codec {
        Codec::H264
    }

    fn fetch_packet(&mut self, packet: &[u8]) {
        self.pending.clear();
        self.pending.extend_from_slice(packet);
    }

    fn process_packet(&mut self) -> bool {
        let head = match RtpHeader::parse(&self.pending) {
            Ok(head) => head,
            Err(e) => {
                debug!("H264 depacketizer: bad RTP packet: {}", e);
                return false;
            }
        };
        let payload = head.payload();
        let Some(&indicator) = payload.first() else {
            return false;
        };
        let nal_type = indicator & 0x1f;
        if !matches!(nal_type, 1..=23 | NAL_STAP_A | NAL_FU_A) {
            debug!("H264 depacketizer: ignoring NAL type {}", nal_type);
            return false;
        }

        if !self.state.prepare(Codec::H264, head.sequence_number()) {
            return false;
        }
        if !self.state.in_frame() {
            self.in_fua_fragment = false;
        }

        match nal_type {
            // Single NAL unit
            1..=23 => {
                if !self.state.in_frame() {
                    self.state.start_frame(Codec::H264);
                }
                Self::push_nal(&mut self.state, payload);
            }
            NAL_STAP_A => {
                if !self.state.in_frame() {
                    self.state.start_frame(Codec::H264);
                }
                let mut offset = 1; // skip aggregation header
                while offset + 2 <= payload.len() {
                    let nalu_len =
                        u16::from_be_bytes([payload[offset], payload[offset + 1]]) as usize;
                    offset += 2;
                    if offset + nalu_len > payload.len() {
                        break;
                    }
                    Self::push_nal(&mut self.state, &payload[offset..offset + nalu_len]);
                    offset += nalu_len;
                }
            }
            _ => {
                let Some(&fu_header) = payload.get(1) else {
                    return false;
                };
                let start = (fu_header & 0x80) != 0;
                let end = (fu_header & 0x40) != 0;

                if start {
                    if self.in_fua_fragment {
                        // previous fragment lost its end packet
                        warn!("H264 depacketizer: FU-A start while previous fragment incomplete");
                        self.state.abandon();
                    }
                    if !self.state.in_frame() {
                        self.state.start_frame(Codec::H264);
                    }
                    self.in_fua_fragment = true;
                    // NRI from the indicator, type from the FU header
                    let nal_header = (indicator & 0xe0) | (fu_header & 0x1f);
                    if matches!(fu_header & 0x1f, NAL_IDR | NAL_SPS) {
                        self.state.set_keyframe();
                    }
                    let buffer = self.state.buffer_mut();
                    buffer.put_slice(&START_CODE);
                    buffer.put_u8(nal_header);
                } else if !self.in_fua_fragment {
                    // middle or end without a start
                    if self.state.in_frame() {
                        self.state.abandon();
                    }
                    return false;
                }

                self.state.append(&payload[2..]);
                if end {
                    self.in_fua_fragment = false;
                }
            }
        }

        if !self.state.finish(head.marker()) {
            return false;
        }
        self.in_fua_fragment = false;
        if !self.seen_idr {
            if contains_nal_type(self.state.frame(), NAL_IDR) {
                self.seen_idr = true;
            } else {
                debug!("H264 depacketizer: discarding access unit before first IDR");
                self.state.clear_frame();
                return false;
            }
        }
        true
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

    /// After reset, frames are discarded until the next IDR.
    fn reset(&mut self) {
        self.pending.clear();
        self.state.reset();
        self.seen_idr = false;
        self.in_fua_fragment = false;
    }

    fn desync_count(&self) -> u64 {
        self.state.desyncs()
    }
}

/// Scan Annex B data for a NAL unit with the given type.
fn contains_nal_type(data: &[u8], target_type: u8) -> bool {
    let mut i = 0;
    while i + 4 < data.len() {
        if data[i..i + 4] == START_CODE {
            if (data[i + 4] & 0x1f) == target_type {
                return true;
            }
            i += 4;
        } else {
            i += 1;
        }
    }
    false
}

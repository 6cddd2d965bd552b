use bytes::{Bytes, BytesMut};
use log::debug;

use super::Codec;
use super::h264::H264Depacketizer;
use super::vp8::Vp8Depacketizer;

/// Reassembles one stream's RTP payloads into encoded frames
///
/// Use is two-step: `fetch_packet` hands over a whole RTP packet,
/// `process_packet` consumes it and reports whether it completed a frame.
/// Packets must arrive in sequence order; a gap inside a frame drops the
/// frame and the depacketizer waits for the next frame start.
pub trait Depacketizer: Send {
    fn codec(&self) -> Codec;

    fn fetch_packet(&mut self, packet: &[u8]);

    /// True when the fetched packet completed a frame.
    fn process_packet(&mut self) -> bool;

    /// Whether the current frame started with a keyframe indicator
    fn is_keyframe(&self) -> bool;

    /// Bytes accumulated for the current or just-completed frame
    fn frame_size(&self) -> usize;

    fn frame(&self) -> &[u8];

    /// Hand out the completed frame and start over. `None` while the frame
    /// is still accumulating.
    fn take_frame(&mut self) -> Option<Bytes>;

    fn reset(&mut self);

    /// Frames abandoned because of gaps or missing starts
    fn desync_count(&self) -> u64;
}

pub fn new_depacketizer(codec: Codec) -> Box<dyn Depacketizer> {
    match codec {
        Codec::Vp8 => Box::new(Vp8Depacketizer::new()),
        Codec::H264 => Box::new(H264Depacketizer::new()),
    }
}

/// Frame accumulation shared by the codec depacketizers
#[derive(Debug, Default)]
pub(crate) struct FrameState {
    buffer: BytesMut,
    keyframe: bool,
    in_frame: bool,
    complete: bool,
    last_seq: Option<u16>,
    desyncs: u64,
}

impl FrameState {
    /// Sequence bookkeeping before a packet's payload is looked at.
    /// Returns false for a repeat of the previous packet.
    pub(crate) fn prepare(&mut self, codec: Codec, seq: u16) -> bool {
        if self.last_seq == Some(seq) {
            return false;
        }
        if self.complete {
            self.clear_frame();
        }
        if let Some(last) = self.last_seq
            && self.in_frame
            && seq != last.wrapping_add(1)
        {
            debug!(
                "{} depacketizer: gap {} -> {}, dropping partial frame",
                codec, last, seq
            );
            self.abandon();
        }
        self.last_seq = Some(seq);
        true
    }

    pub(crate) fn start_frame(&mut self, codec: Codec) {
        if self.in_frame {
            debug!("{} depacketizer: new frame before marker, dropping partial frame", codec);
            self.abandon();
        }
        self.in_frame = true;
    }

    pub(crate) fn abandon(&mut self) {
        self.desyncs += 1;
        self.clear_frame();
    }

    pub(crate) fn set_keyframe(&mut self) {
        self.keyframe = true;
    }

    pub(crate) fn in_frame(&self) -> bool {
        self.in_frame
    }

    pub(crate) fn buffer_mut(&mut self) -> &mut BytesMut {
        &mut self.buffer
    }

    pub(crate) fn append(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Close the frame on the marker bit.
    pub(crate) fn finish(&mut self, marker: bool) -> bool {
        if marker && self.in_frame {
            self.in_frame = false;
            self.complete = true;
        }
        self.complete
    }

    pub(crate) fn clear_frame(&mut self) {
        self.buffer.clear();
        self.keyframe = false;
        self.in_frame = false;
        self.complete = false;
    }

    pub(crate) fn reset(&mut self) {
        self.clear_frame();
        self.last_seq = None;
    }

    pub(crate) fn is_keyframe(&self) -> bool {
        self.keyframe
    }

    pub(crate) fn frame(&self) -> &[u8] {
        &self.buffer
    }

    pub(crate) fn take_frame(&mut self) -> Option<Bytes> {
        if !self.complete {
            return None;
        }
        let frame = self.buffer.split().freeze();
        self.clear_frame();
        Some(frame)
    }

    pub(crate) fn desyncs(&self) -> u64 {
        self.desyncs
    }
}

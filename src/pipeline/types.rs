//! Core types for the pipeline system

use bytes::Bytes;

/// Kind of media carried by a packet or stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    /// Video RTP
    Video,
    /// Audio RTP
    Audio,
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MediaKind::Video => write!(f, "Video"),
            MediaKind::Audio => write!(f, "Audio"),
        }
    }
}

/// A complete encoded frame reassembled from RTP payloads
///
/// All fragments of a frame share one RTP timestamp, which is carried
/// through unchanged so the consumer can schedule playout.
#[derive(Clone)]
pub struct EncodedFrame {
    /// Source the frame was received from
    pub ssrc: u32,

    /// RTP timestamp shared by the frame's packets
    pub rtp_timestamp: u32,

    /// Payload type of the packets the frame came from
    pub payload_type: u8,

    /// Whether the frame can be decoded without earlier frames
    pub keyframe: bool,

    /// Codec bitstream (VP8 frame or Annex B access unit)
    pub data: Bytes,
}

impl EncodedFrame {
    /// Get the size of the frame data in bytes
    pub fn size(&self) -> usize {
        self.data.len()
    }
}

impl std::fmt::Debug for EncodedFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncodedFrame")
            .field("ssrc", &self.ssrc)
            .field("rtp_timestamp", &self.rtp_timestamp)
            .field("payload_type", &self.payload_type)
            .field("keyframe", &self.keyframe)
            .field("size", &self.size())
            .finish()
    }
}

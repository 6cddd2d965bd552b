//! Packets flowing through the receive pipeline
//!
//! A `Packet` is a reference-counted byte buffer plus the metadata the
//! transport attached on arrival. Cloning is cheap and never copies the
//! payload; the only way to change the bytes is `Packet::modify`, which
//! copies first so other holders keep seeing the original contents.

mod error;
pub mod rtcp;
pub mod rtp;
mod track;

use bytes::{Bytes, BytesMut};

use crate::pipeline::types::MediaKind;

pub use error::PacketError;
pub use rtcp::{
    ReceiverReport, ReceptionReport, ReportBlock, RtcpCompound, RtcpPacket, SenderReport,
};
pub use rtp::{RtpHeader, RtpHeaderMut};

/// Logical packet type, decided once when the packet is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    Rtp,
    Rtcp,
    Other,
}

#[derive(Clone)]
pub struct Packet {
    data: Bytes,
    packet_type: PacketType,
    media: Option<MediaKind>,
    received_at_ms: u64,
}

impl Packet {
    /// Wrap a datagram, classifying it as RTCP (RFC 5761 rule), RTP
    /// (version 2, at least a fixed header) or other.
    pub fn new(data: impl Into<Bytes>, received_at_ms: u64) -> Self {
        let data = data.into();
        let packet_type = if rtcp::is_rtcp(&data) {
            PacketType::Rtcp
        } else if data.len() >= rtp::RTP_FIXED_HEADER_LEN && data[0] >> 6 == rtp::RTP_VERSION {
            PacketType::Rtp
        } else {
            PacketType::Other
        };
        Self {
            data,
            packet_type,
            media: None,
            received_at_ms,
        }
    }

    /// Wrap bytes that must not be interpreted as RTP or RTCP.
    pub fn other(data: impl Into<Bytes>, received_at_ms: u64) -> Self {
        Self {
            data: data.into(),
            packet_type: PacketType::Other,
            media: None,
            received_at_ms,
        }
    }

    /// Tag the packet with the media kind the transport resolved for it.
    pub fn with_media(mut self, media: MediaKind) -> Self {
        self.media = Some(media);
        self
    }

    /// A new packet with other bytes but this packet's arrival metadata.
    pub fn with_data(&self, data: impl Into<Bytes>) -> Self {
        let mut packet = Self::new(data, self.received_at_ms);
        packet.media = self.media;
        packet
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn packet_type(&self) -> PacketType {
        self.packet_type
    }

    pub fn is_rtp(&self) -> bool {
        self.packet_type == PacketType::Rtp
    }

    pub fn is_rtcp(&self) -> bool {
        self.packet_type == PacketType::Rtcp
    }

    pub fn media(&self) -> Option<MediaKind> {
        self.media
    }

    /// Monotonic arrival time in milliseconds.
    pub fn received_at_ms(&self) -> u64 {
        self.received_at_ms
    }

    pub fn rtp_header(&self) -> Result<RtpHeader<'_>, PacketError> {
        RtpHeader::parse(&self.data)
    }

    pub fn rtcp_packets(&self) -> RtcpCompound<'_> {
        RtcpCompound::new(&self.data)
    }

    /// Copy-on-write mutation of the packet bytes.
    pub fn modify<R>(&mut self, f: impl FnOnce(&mut BytesMut) -> R) -> R {
        let mut buf = BytesMut::from(&self.data[..]);
        let out = f(&mut buf);
        self.data = buf.freeze();
        out
    }
}

impl std::fmt::Debug for Packet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut debug = f.debug_struct("Packet");
        debug
            .field("type", &self.packet_type)
            .field("len", &self.data.len())
            .field("received_at_ms", &self.received_at_ms);
        if let Some(media) = self.media {
            debug.field("media", &media);
        }
        if let Ok(head) = self.rtp_header()
            && self.is_rtp()
        {
            debug
                .field("ssrc", &head.ssrc())
                .field("seq", &head.sequence_number())
                .field("pt", &head.payload_type());
        }
        debug.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{rtp_bytes, sender_report_bytes};

    #[test]
    fn test_classification() {
        let rtp = Packet::new(rtp_bytes(1, 2, 3, 96, false, &[0]), 5);
        assert_eq!(rtp.packet_type(), PacketType::Rtp);
        assert_eq!(rtp.received_at_ms(), 5);

        let rtcp = Packet::new(sender_report_bytes(1, 2, 3), 5);
        assert_eq!(rtcp.packet_type(), PacketType::Rtcp);

        let junk = Packet::new(vec![0x16, 0xfe, 0xfd], 5);
        assert_eq!(junk.packet_type(), PacketType::Other);

        // RTP with marker bit set and PT 72 looks like RTCP 200 and is demuxed as such
        let ambiguous = Packet::new(rtp_bytes(1, 2, 3, 72, true, &[]), 0);
        assert!(ambiguous.is_rtcp());
    }

    #[test]
    fn test_modify_is_copy_on_write() {
        let original = Packet::new(rtp_bytes(10, 0, 7, 96, false, &[1, 2]), 0);
        let mut edited = original.clone();
        edited.modify(|buf| {
            RtpHeaderMut::new(buf).unwrap().set_sequence_number(11);
        });
        assert_eq!(original.rtp_header().unwrap().sequence_number(), 10);
        assert_eq!(edited.rtp_header().unwrap().sequence_number(), 11);
        assert_eq!(edited.rtp_header().unwrap().payload(), &[1, 2]);
    }

    #[test]
    fn test_media_tag() {
        let packet =
            Packet::new(rtp_bytes(1, 2, 3, 111, false, &[]), 0).with_media(MediaKind::Audio);
        assert_eq!(packet.media(), Some(MediaKind::Audio));
    }
}

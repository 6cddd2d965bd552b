//! Bridge from the webrtc-rs track reader to pipeline packets.

use webrtc::rtp::packet::Packet as TrackPacket;
use webrtc::util::marshal::Marshal;

use super::Packet;
use crate::pipeline::types::MediaKind;

impl Packet {
    /// Re-serialize a packet read from a `TrackRemote` so it can enter the
    /// pipeline with its original wire layout.
    pub fn from_webrtc_rtp(
        packet: &TrackPacket,
        media: MediaKind,
        received_at_ms: u64,
    ) -> Result<Self, webrtc::util::Error> {
        let data = packet.marshal()?;
        Ok(Packet::new(data, received_at_ms).with_media(media))
    }
}

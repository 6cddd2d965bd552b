//! Packet builders shared by the unit tests.

use crate::packet::Packet;

pub(crate) fn init_logging() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

pub(crate) fn rtp_bytes(
    seq: u16,
    timestamp: u32,
    ssrc: u32,
    payload_type: u8,
    marker: bool,
    payload: &[u8],
) -> Vec<u8> {
    let mut buf = Vec::with_capacity(12 + payload.len());
    buf.push(0x80);
    buf.push(((marker as u8) << 7) | (payload_type & 0x7f));
    buf.extend_from_slice(&seq.to_be_bytes());
    buf.extend_from_slice(&timestamp.to_be_bytes());
    buf.extend_from_slice(&ssrc.to_be_bytes());
    buf.extend_from_slice(payload);
    buf
}

pub(crate) fn rtp_packet(seq: u16, timestamp: u32, ssrc: u32, received_at_ms: u64) -> Packet {
    Packet::new(rtp_bytes(seq, timestamp, ssrc, 96, false, &[0xaa; 4]), received_at_ms)
}

/// A Sender Report without report blocks.
pub(crate) fn sender_report_bytes(ssrc: u32, ntp_seconds: u32, ntp_fraction: u32) -> Vec<u8> {
    let mut buf = vec![0x80, 200, 0, 6];
    buf.extend_from_slice(&ssrc.to_be_bytes());
    buf.extend_from_slice(&ntp_seconds.to_be_bytes());
    buf.extend_from_slice(&ntp_fraction.to_be_bytes());
    buf.extend_from_slice(&0u32.to_be_bytes()); // rtp timestamp
    buf.extend_from_slice(&10u32.to_be_bytes()); // packet count
    buf.extend_from_slice(&1000u32.to_be_bytes()); // octet count
    buf
}

/// One-byte VP8 descriptor followed by the VP8 payload header byte and
/// `body_len - 1` filler bytes.
pub(crate) fn vp8_payload(start: bool, keyframe: bool, body_len: usize) -> Vec<u8> {
    let mut payload = vec![if start { 0x10 } else { 0x00 }];
    payload.push(if keyframe { 0x00 } else { 0x01 });
    payload.resize(1 + body_len.max(1), 0x5a);
    payload
}

pub(crate) fn vp8_packet(seq: u16, start: bool, keyframe: bool, marker: bool) -> Vec<u8> {
    rtp_bytes(seq, 3000, 0x5678, 100, marker, &vp8_payload(start, keyframe, 20))
}

/// Level-0 ULPFEC payload protecting `media`, mask relative to `seq_base`.
pub(crate) fn ulpfec_payload(media: &[Vec<u8>], seq_base: u16, long_mask: bool) -> Vec<u8> {
    let (mut b0, mut b1, mut ts, mut len) = (0u8, 0u8, 0u32, 0u16);
    let mut mask = 0u64;
    let mask_bits: usize = if long_mask { 48 } else { 16 };
    let prot_len = media.iter().map(|m| m.len() - 12).max().unwrap_or(0);
    let mut data = vec![0u8; prot_len];
    for m in media {
        b0 ^= m[0];
        b1 ^= m[1];
        ts ^= u32::from_be_bytes([m[4], m[5], m[6], m[7]]);
        len ^= (m.len() - 12) as u16;
        for (d, s) in data.iter_mut().zip(&m[12..]) {
            *d ^= s;
        }
        let seq = u16::from_be_bytes([m[2], m[3]]);
        mask |= 1u64 << (mask_bits - 1 - seq.wrapping_sub(seq_base) as usize);
    }
    let mut out = vec![(b0 & 0x3f) | if long_mask { 0x40 } else { 0 }, b1];
    out.extend_from_slice(&seq_base.to_be_bytes());
    out.extend_from_slice(&ts.to_be_bytes());
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(&(prot_len as u16).to_be_bytes());
    out.extend_from_slice(&mask.to_be_bytes()[8 - mask_bits / 8..]);
    out.extend_from_slice(&data);
    out
}

/// RED payload with a single primary block.
pub(crate) fn red_payload(block_pt: u8, block: &[u8]) -> Vec<u8> {
    let mut out = vec![block_pt & 0x7f];
    out.extend_from_slice(block);
    out
}

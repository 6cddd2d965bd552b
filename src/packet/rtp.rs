//! Typed views over RTP headers (RFC 3550 §5.1)
//!
//! The views never own memory: they borrow the packet buffer and decode
//! big-endian fields on access. `RtpHeader::parse` validates every length the
//! header claims before any accessor can be reached, so the accessors
//! themselves index without further checks.

use super::error::{PacketError, ensure_len};

/// Size of the fixed RTP header.
pub const RTP_FIXED_HEADER_LEN: usize = 12;

pub const RTP_VERSION: u8 = 2;

/// Read-only view of a validated RTP packet.
#[derive(Debug, Clone, Copy)]
pub struct RtpHeader<'a> {
    buf: &'a [u8],
    header_len: usize,
    padding_len: usize,
}

impl<'a> RtpHeader<'a> {
    /// Validate `buf` as an RTP packet and return a view over it.
    pub fn parse(buf: &'a [u8]) -> Result<Self, PacketError> {
        ensure_len(buf, RTP_FIXED_HEADER_LEN)?;

        let version = buf[0] >> 6;
        if version != RTP_VERSION {
            return Err(PacketError::BadVersion(version));
        }

        let csrc_count = (buf[0] & 0x0f) as usize;
        let mut header_len = RTP_FIXED_HEADER_LEN + 4 * csrc_count;
        ensure_len(buf, header_len)?;

        if buf[0] & 0x10 != 0 {
            ensure_len(buf, header_len + 4)?;
            let words = u16::from_be_bytes([buf[header_len + 2], buf[header_len + 3]]) as usize;
            header_len += 4 + 4 * words;
            ensure_len(buf, header_len)?;
        }

        let mut padding_len = 0;
        if buf[0] & 0x20 != 0 {
            padding_len = buf[buf.len() - 1] as usize;
            if padding_len == 0 || header_len + padding_len > buf.len() {
                return Err(PacketError::BadLength {
                    declared: header_len + padding_len,
                    actual: buf.len(),
                });
            }
        }

        Ok(Self {
            buf,
            header_len,
            padding_len,
        })
    }

    pub fn version(&self) -> u8 {
        self.buf[0] >> 6
    }

    pub fn has_padding(&self) -> bool {
        self.buf[0] & 0x20 != 0
    }

    pub fn has_extension(&self) -> bool {
        self.buf[0] & 0x10 != 0
    }

    pub fn csrc_count(&self) -> u8 {
        self.buf[0] & 0x0f
    }

    pub fn marker(&self) -> bool {
        self.buf[1] & 0x80 != 0
    }

    pub fn payload_type(&self) -> u8 {
        self.buf[1] & 0x7f
    }

    pub fn sequence_number(&self) -> u16 {
        u16::from_be_bytes([self.buf[2], self.buf[3]])
    }

    pub fn timestamp(&self) -> u32 {
        u32::from_be_bytes([self.buf[4], self.buf[5], self.buf[6], self.buf[7]])
    }

    pub fn ssrc(&self) -> u32 {
        u32::from_be_bytes([self.buf[8], self.buf[9], self.buf[10], self.buf[11]])
    }

    /// Contributing sources, in header order.
    pub fn csrcs(&self) -> impl Iterator<Item = u32> + 'a {
        let count = self.csrc_count() as usize;
        self.buf[RTP_FIXED_HEADER_LEN..RTP_FIXED_HEADER_LEN + 4 * count]
            .chunks_exact(4)
            .map(|c| u32::from_be_bytes([c[0], c[1], c[2], c[3]]))
    }

    /// Length of the fixed header, CSRC list and extension block.
    pub fn header_len(&self) -> usize {
        self.header_len
    }

    pub fn padding_len(&self) -> usize {
        self.padding_len
    }

    /// Payload bytes with header and padding removed.
    pub fn payload(&self) -> &'a [u8] {
        &self.buf[self.header_len..self.buf.len() - self.padding_len]
    }

    /// The whole packet this view was parsed from.
    pub fn as_bytes(&self) -> &'a [u8] {
        self.buf
    }
}

/// In-place writer for the fixed RTP header fields.
///
/// Only touches the first 12 bytes, so it requires nothing beyond a buffer
/// at least that long.
pub struct RtpHeaderMut<'a> {
    buf: &'a mut [u8],
}

impl<'a> RtpHeaderMut<'a> {
    pub fn new(buf: &'a mut [u8]) -> Result<Self, PacketError> {
        ensure_len(buf, RTP_FIXED_HEADER_LEN)?;
        Ok(Self { buf })
    }

    pub fn set_marker(&mut self, marker: bool) {
        if marker {
            self.buf[1] |= 0x80;
        } else {
            self.buf[1] &= 0x7f;
        }
    }

    /// The padding length byte itself is the caller's business.
    pub fn set_padding(&mut self, padding: bool) {
        if padding {
            self.buf[0] |= 0x20;
        } else {
            self.buf[0] &= !0x20;
        }
    }

    pub fn set_payload_type(&mut self, payload_type: u8) {
        self.buf[1] = (self.buf[1] & 0x80) | (payload_type & 0x7f);
    }

    pub fn set_sequence_number(&mut self, seq: u16) {
        self.buf[2..4].copy_from_slice(&seq.to_be_bytes());
    }

    pub fn set_timestamp(&mut self, timestamp: u32) {
        self.buf[4..8].copy_from_slice(&timestamp.to_be_bytes());
    }

    pub fn set_ssrc(&mut self, ssrc: u32) {
        self.buf[8..12].copy_from_slice(&ssrc.to_be_bytes());
    }
}

//! RTCP views and the receiver report writer (RFC 3550 §6.4)
//!
//! Every view checks the declared `length` field against the buffer before
//! exposing it. Compound packets are walked sub-packet by sub-packet and the
//! walk stops at the first one that does not fit.

use bytes::{BufMut, Bytes, BytesMut};

use super::error::{PacketError, ensure_len};

pub const RTCP_SR_PT: u8 = 200;
pub const RTCP_RR_PT: u8 = 201;

const RTCP_HEADER_LEN: usize = 4;
const REPORT_BLOCK_LEN: usize = 24;
const SR_BLOCKS_OFFSET: usize = 28;
const RR_BLOCKS_OFFSET: usize = 8;

/// Length, in 32-bit words minus one, of an RR carrying a single report block.
pub const RR_SINGLE_BLOCK_LENGTH: u16 = 7;

/// RFC 5761 demultiplexing: RTCP packet types fall in 192..=223.
pub fn is_rtcp(buf: &[u8]) -> bool {
    buf.len() >= 2 && (192..=223).contains(&buf[1])
}

/// One RTCP packet (a single element of a compound packet).
#[derive(Debug, Clone, Copy)]
pub struct RtcpPacket<'a> {
    buf: &'a [u8],
}

impl<'a> RtcpPacket<'a> {
    /// Validate the common header. The returned view is trimmed to the
    /// declared length; trailing bytes belong to the next sub-packet.
    pub fn parse(buf: &'a [u8]) -> Result<Self, PacketError> {
        ensure_len(buf, RTCP_HEADER_LEN)?;
        let version = buf[0] >> 6;
        if version != 2 {
            return Err(PacketError::BadVersion(version));
        }
        let declared = (u16::from_be_bytes([buf[2], buf[3]]) as usize + 1) * 4;
        if declared > buf.len() {
            return Err(PacketError::BadLength {
                declared,
                actual: buf.len(),
            });
        }
        Ok(Self {
            buf: &buf[..declared],
        })
    }

    pub fn has_padding(&self) -> bool {
        self.buf[0] & 0x20 != 0
    }

    /// Report count / subtype field (5 bits).
    pub fn count(&self) -> u8 {
        self.buf[0] & 0x1f
    }

    pub fn packet_type(&self) -> u8 {
        self.buf[1]
    }

    /// Raw length field: size in 32-bit words minus one.
    pub fn length_words(&self) -> u16 {
        u16::from_be_bytes([self.buf[2], self.buf[3]])
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Sender / reporter SSRC, when the packet is long enough to carry one.
    pub fn ssrc(&self) -> Option<u32> {
        (self.buf.len() >= 8).then(|| read_u32(self.buf, 4))
    }

    pub fn as_bytes(&self) -> &'a [u8] {
        self.buf
    }
}

/// Iterator over the packets of a compound RTCP datagram.
pub struct RtcpCompound<'a> {
    rest: &'a [u8],
    failed: bool,
}

impl<'a> RtcpCompound<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self {
            rest: buf,
            failed: false,
        }
    }
}

impl<'a> Iterator for RtcpCompound<'a> {
    type Item = Result<RtcpPacket<'a>, PacketError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.rest.is_empty() {
            return None;
        }
        match RtcpPacket::parse(self.rest) {
            Ok(packet) => {
                self.rest = &self.rest[packet.len()..];
                Some(Ok(packet))
            }
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

/// Sender Report view (PT=200).
#[derive(Debug, Clone, Copy)]
pub struct SenderReport<'a> {
    buf: &'a [u8],
}

impl<'a> SenderReport<'a> {
    pub fn parse(packet: RtcpPacket<'a>) -> Result<Self, PacketError> {
        if packet.packet_type() != RTCP_SR_PT {
            return Err(PacketError::UnexpectedType(packet.packet_type()));
        }
        let needed = SR_BLOCKS_OFFSET + REPORT_BLOCK_LEN * packet.count() as usize;
        ensure_len(packet.as_bytes(), needed)?;
        Ok(Self {
            buf: packet.as_bytes(),
        })
    }

    pub fn ssrc(&self) -> u32 {
        read_u32(self.buf, 4)
    }

    pub fn ntp_seconds(&self) -> u32 {
        read_u32(self.buf, 8)
    }

    pub fn ntp_fraction(&self) -> u32 {
        read_u32(self.buf, 12)
    }

    /// The middle 32 bits of the NTP timestamp, echoed back as LSR.
    pub fn middle_ntp(&self) -> u32 {
        read_u32(self.buf, 10)
    }

    pub fn rtp_timestamp(&self) -> u32 {
        read_u32(self.buf, 16)
    }

    pub fn packet_count(&self) -> u32 {
        read_u32(self.buf, 20)
    }

    pub fn octet_count(&self) -> u32 {
        read_u32(self.buf, 24)
    }

    pub fn report_blocks(&self) -> impl Iterator<Item = ReportBlock<'a>> + 'a {
        report_blocks(self.buf, SR_BLOCKS_OFFSET, self.buf[0] & 0x1f)
    }
}

/// Receiver Report view (PT=201).
#[derive(Debug, Clone, Copy)]
pub struct ReceiverReport<'a> {
    buf: &'a [u8],
}

impl<'a> ReceiverReport<'a> {
    pub fn parse(packet: RtcpPacket<'a>) -> Result<Self, PacketError> {
        if packet.packet_type() != RTCP_RR_PT {
            return Err(PacketError::UnexpectedType(packet.packet_type()));
        }
        let needed = RR_BLOCKS_OFFSET + REPORT_BLOCK_LEN * packet.count() as usize;
        ensure_len(packet.as_bytes(), needed)?;
        Ok(Self {
            buf: packet.as_bytes(),
        })
    }

    pub fn ssrc(&self) -> u32 {
        read_u32(self.buf, 4)
    }

    pub fn report_blocks(&self) -> impl Iterator<Item = ReportBlock<'a>> + 'a {
        report_blocks(self.buf, RR_BLOCKS_OFFSET, self.buf[0] & 0x1f)
    }
}

fn report_blocks(buf: &[u8], offset: usize, count: u8) -> impl Iterator<Item = ReportBlock<'_>> {
    buf[offset..offset + REPORT_BLOCK_LEN * count as usize]
        .chunks_exact(REPORT_BLOCK_LEN)
        .map(|buf| ReportBlock { buf })
}

/// One reception report block (24 bytes).
#[derive(Debug, Clone, Copy)]
pub struct ReportBlock<'a> {
    buf: &'a [u8],
}

impl ReportBlock<'_> {
    pub fn source_ssrc(&self) -> u32 {
        read_u32(self.buf, 0)
    }

    pub fn fraction_lost(&self) -> u8 {
        self.buf[4]
    }

    /// Cumulative number of packets lost, sign-extended from 24 bits.
    pub fn cumulative_lost(&self) -> i32 {
        let raw = u32::from_be_bytes([0, self.buf[5], self.buf[6], self.buf[7]]);
        ((raw << 8) as i32) >> 8
    }

    pub fn extended_highest_seq(&self) -> u32 {
        read_u32(self.buf, 8)
    }

    pub fn jitter(&self) -> u32 {
        read_u32(self.buf, 12)
    }

    pub fn last_sr(&self) -> u32 {
        read_u32(self.buf, 16)
    }

    pub fn delay_since_last_sr(&self) -> u32 {
        read_u32(self.buf, 20)
    }
}

/// Owned contents of one report block, ready to be written.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReceptionReport {
    pub source_ssrc: u32,
    pub fraction_lost: u8,
    pub cumulative_lost: i32,
    pub extended_highest_seq: u32,
    pub jitter: u32,
    pub last_sr: u32,
    /// Units of 1/65536 seconds.
    pub delay_since_last_sr: u32,
}

impl ReceptionReport {
    /// Serialize as a single-block Receiver Report sent by `reporter_ssrc`.
    pub fn to_receiver_report(&self, reporter_ssrc: u32) -> Bytes {
        let mut buf = BytesMut::with_capacity(32);
        buf.put_u8(0x80 | 1);
        buf.put_u8(RTCP_RR_PT);
        buf.put_u16(RR_SINGLE_BLOCK_LENGTH);
        buf.put_u32(reporter_ssrc);
        self.write_block(&mut buf);
        buf.freeze()
    }

    fn write_block(&self, buf: &mut BytesMut) {
        let lost = self.cumulative_lost.clamp(-0x80_0000, 0x7f_ffff) as u32 & 0x00ff_ffff;
        buf.put_u32(self.source_ssrc);
        buf.put_u32(((self.fraction_lost as u32) << 24) | lost);
        buf.put_u32(self.extended_highest_seq);
        buf.put_u32(self.jitter);
        buf.put_u32(self.last_sr);
        buf.put_u32(self.delay_since_last_sr);
    }
}

fn read_u32(buf: &[u8], at: usize) -> u32 {
    u32::from_be_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

//! ULPFEC parity recovery (RFC 5109, level 0 only)

use bytes::{BufMut, Bytes, BytesMut};
use log::debug;
use std::collections::{HashMap, VecDeque};

use super::{FecEngine, FecError};
use crate::packet::RtpHeader;
use crate::packet::rtp::RTP_FIXED_HEADER_LEN;

/// FEC header preceding the level headers.
pub const ULPFEC_HEADER_LEN: usize = 10;

const SHORT_LEVEL_HEADER_LEN: usize = 4;
const LONG_LEVEL_HEADER_LEN: usize = 8;

const DEFAULT_MEDIA_HISTORY: usize = 128;
const DEFAULT_FEC_HISTORY: usize = 32;

#[derive(Debug)]
struct StoredFec {
    media_ssrc: u32,
    protected: Vec<u16>,
    bits0: u8,
    bits1: u8,
    timestamp: u32,
    length: u16,
    protection: Bytes,
}

/// Level-0 ULPFEC receiver
///
/// Keeps a bounded history of media and FEC packets. Each FEC packet can
/// rebuild exactly one missing packet of the set its mask covers; a
/// rebuilt packet joins the history and may unlock further FEC packets.
pub struct UlpfecReceiver {
    media: HashMap<(u32, u16), Bytes>,
    media_order: VecDeque<(u32, u16)>,
    fec: VecDeque<StoredFec>,
    max_media: usize,
    max_fec: usize,
    recovered_total: u64,
}

impl UlpfecReceiver {
    pub fn new() -> Self {
        Self::with_history(DEFAULT_MEDIA_HISTORY, DEFAULT_FEC_HISTORY)
    }

    pub fn with_history(max_media: usize, max_fec: usize) -> Self {
        Self {
            media: HashMap::new(),
            media_order: VecDeque::new(),
            fec: VecDeque::new(),
            max_media: max_media.max(1),
            max_fec: max_fec.max(1),
            recovered_total: 0,
        }
    }

    pub fn media_len(&self) -> usize {
        self.media.len()
    }

    pub fn fec_len(&self) -> usize {
        self.fec.len()
    }

    pub fn recovered_total(&self) -> u64 {
        self.recovered_total
    }

    fn store_media(&mut self, key: (u32, u16), packet: Bytes) {
        if self.media.insert(key, packet).is_some() {
            return;
        }
        self.media_order.push_back(key);
        while self.media_order.len() > self.max_media {
            let Some((ssrc, seq)) = self.media_order.pop_front() else {
                break;
            };
            self.media.remove(&(ssrc, seq));
            // those FEC packets could only rebuild the wrong packet now
            self.fec
                .retain(|f| f.media_ssrc != ssrc || !f.protected.contains(&seq));
        }
    }

    fn missing(&self, fec: &StoredFec) -> Vec<u16> {
        fec.protected
            .iter()
            .copied()
            .filter(|seq| !self.media.contains_key(&(fec.media_ssrc, *seq)))
            .collect()
    }

    fn rebuild(&self, fec: &StoredFec, missing_seq: u16) -> Result<Bytes, FecError> {
        let mut bits0 = fec.bits0;
        let mut bits1 = fec.bits1;
        let mut timestamp = fec.timestamp;
        let mut length = fec.length;
        let mut payload = fec.protection.to_vec();

        for seq in fec.protected.iter().filter(|s| **s != missing_seq) {
            let Some(media) = self.media.get(&(fec.media_ssrc, *seq)) else {
                continue;
            };
            bits0 ^= media[0];
            bits1 ^= media[1];
            timestamp ^= u32::from_be_bytes([media[4], media[5], media[6], media[7]]);
            length ^= (media.len() - RTP_FIXED_HEADER_LEN) as u16;
            for (dst, src) in payload.iter_mut().zip(&media[RTP_FIXED_HEADER_LEN..]) {
                *dst ^= src;
            }
        }

        let length = length as usize;
        if length > payload.len() {
            return Err(FecError::IncompleteProtection {
                length,
                available: payload.len(),
            });
        }

        let mut out = BytesMut::with_capacity(RTP_FIXED_HEADER_LEN + length);
        out.put_u8(0x80 | (bits0 & 0x3f));
        out.put_u8(bits1);
        out.put_u16(missing_seq);
        out.put_u32(timestamp);
        out.put_u32(fec.media_ssrc);
        out.put_slice(&payload[..length]);
        let out = out.freeze();
        RtpHeader::parse(&out)?;
        Ok(out)
    }
}

impl Default for UlpfecReceiver {
    fn default() -> Self {
        Self::new()
    }
}

impl FecEngine for UlpfecReceiver {
    fn add_media(&mut self, packet: &[u8]) -> Result<(), FecError> {
        let head = RtpHeader::parse(packet)?;
        let key = (head.ssrc(), head.sequence_number());
        self.store_media(key, Bytes::copy_from_slice(packet));
        Ok(())
    }

    fn add_fec(&mut self, media_ssrc: u32, payload: &[u8]) -> Result<(), FecError> {
        if payload.len() < ULPFEC_HEADER_LEN {
            return Err(FecError::FecHeaderTruncated(payload.len()));
        }
        let long_mask = payload[0] & 0x40 != 0;
        let level_len = if long_mask {
            LONG_LEVEL_HEADER_LEN
        } else {
            SHORT_LEVEL_HEADER_LEN
        };
        let data_start = ULPFEC_HEADER_LEN + level_len;
        if payload.len() < data_start {
            return Err(FecError::FecHeaderTruncated(payload.len()));
        }

        let seq_base = u16::from_be_bytes([payload[2], payload[3]]);
        let protection_len = u16::from_be_bytes([payload[10], payload[11]]) as usize;
        let data = &payload[data_start..];
        if protection_len > data.len() {
            return Err(FecError::BadProtectionLength {
                declared: protection_len,
                actual: data.len(),
            });
        }

        let mask_bytes = &payload[12..data_start];
        let mask_bits = mask_bytes.len() * 8;
        let mask = mask_bytes
            .iter()
            .fold(0u64, |acc, b| (acc << 8) | *b as u64);
        let protected: Vec<u16> = (0..mask_bits)
            .filter(|i| mask >> (mask_bits - 1 - i) & 1 == 1)
            .map(|i| seq_base.wrapping_add(i as u16))
            .collect();
        if protected.is_empty() {
            return Ok(());
        }

        self.fec.push_back(StoredFec {
            media_ssrc,
            protected,
            bits0: payload[0],
            bits1: payload[1],
            timestamp: u32::from_be_bytes([payload[4], payload[5], payload[6], payload[7]]),
            length: u16::from_be_bytes([payload[8], payload[9]]),
            protection: Bytes::copy_from_slice(&data[..protection_len]),
        });
        while self.fec.len() > self.max_fec {
            self.fec.pop_front();
        }
        Ok(())
    }

    fn recover(&mut self, on_recovered: &mut dyn FnMut(Bytes)) -> Result<usize, FecError> {
        let mut recovered = 0;
        loop {
            let mut progress = false;
            let mut index = 0;
            while index < self.fec.len() {
                let missing = self.missing(&self.fec[index]);
                match missing.as_slice() {
                    [] => {
                        self.fec.remove(index);
                    }
                    [seq] => {
                        let seq = *seq;
                        let Some(fec) = self.fec.remove(index) else {
                            break;
                        };
                        let packet = self.rebuild(&fec, seq)?;
                        debug!(
                            "UlpfecReceiver: recovered seq {} for ssrc {:#010x}",
                            seq, fec.media_ssrc
                        );
                        self.store_media((fec.media_ssrc, seq), packet.clone());
                        on_recovered(packet);
                        recovered += 1;
                        self.recovered_total += 1;
                        progress = true;
                    }
                    _ => index += 1,
                }
            }
            if !progress {
                break;
            }
        }
        Ok(recovered)
    }
}

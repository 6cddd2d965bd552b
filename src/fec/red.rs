//! RED payload splitting (RFC 2198)

use super::FecError;

/// One block of a RED payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RedBlock<'a> {
    pub payload_type: u8,
    /// How far this block's timestamp lies before the RTP header's
    pub timestamp_offset: u16,
    pub data: &'a [u8],
    /// The last block, carrying the packet's own media
    pub primary: bool,
}

/// Split a RED payload into its blocks, redundant ones first.
pub fn split(payload: &[u8]) -> Result<Vec<RedBlock<'_>>, FecError> {
    if payload.is_empty() {
        return Err(FecError::EmptyRed);
    }

    // (payload type, timestamp offset, block length) for redundant blocks
    let mut headers = Vec::new();
    let mut offset = 0;
    let primary_pt = loop {
        let Some(&first) = payload.get(offset) else {
            return Err(FecError::RedHeaderTruncated(payload.len()));
        };
        if first & 0x80 == 0 {
            offset += 1;
            break first & 0x7f;
        }
        let Some(rest) = payload.get(offset + 1..offset + 4) else {
            return Err(FecError::RedHeaderTruncated(payload.len()));
        };
        let timestamp_offset = ((rest[0] as u16) << 6) | ((rest[1] as u16) >> 2);
        let length = (((rest[1] & 0x03) as usize) << 8) | rest[2] as usize;
        headers.push((first & 0x7f, timestamp_offset, length));
        offset += 4;
    };

    let needed = offset + headers.iter().map(|h| h.2).sum::<usize>();
    if needed > payload.len() {
        return Err(FecError::RedBlockTruncated {
            needed,
            actual: payload.len(),
        });
    }

    let mut blocks = Vec::with_capacity(headers.len() + 1);
    for (payload_type, timestamp_offset, length) in headers {
        blocks.push(RedBlock {
            payload_type,
            timestamp_offset,
            data: &payload[offset..offset + length],
            primary: false,
        });
        offset += length;
    }
    blocks.push(RedBlock {
        payload_type: primary_pt,
        timestamp_offset: 0,
        data: &payload[offset..],
        primary: true,
    });
    Ok(blocks)
}

use thiserror::Error;

/// Reasons a buffer was rejected by one of the header views.
///
/// These never escape the packet path: stages log them and drop the packet.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PacketError {
    #[error("buffer truncated: need {needed} bytes, have {actual}")]
    Truncated { needed: usize, actual: usize },

    #[error("unsupported version {0}")]
    BadVersion(u8),

    #[error("declared length {declared} exceeds buffer of {actual} bytes")]
    BadLength { declared: usize, actual: usize },

    #[error("unexpected packet type {0}")]
    UnexpectedType(u8),
}

pub(crate) fn ensure_len(buf: &[u8], needed: usize) -> Result<(), PacketError> {
    if buf.len() < needed {
        Err(PacketError::Truncated {
            needed,
            actual: buf.len(),
        })
    } else {
        Ok(())
    }
}

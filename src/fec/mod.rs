//! Forward error correction on the receive path
//!
//! `red` unwraps RFC 2198 redundant encoding, `ulpfec` rebuilds lost media
//! packets from RFC 5109 parity packets. The stage that drives them lives
//! in `pipeline::receiver::fec_stage` and only sees the `FecEngine` trait.

pub mod red;
pub mod ulpfec;

use bytes::Bytes;
use thiserror::Error;

use crate::packet::PacketError;

pub use red::RedBlock;
pub use ulpfec::UlpfecReceiver;

#[derive(Debug, Error)]
pub enum FecError {
    #[error("malformed media packet: {0}")]
    Packet(#[from] PacketError),

    #[error("empty RED payload")]
    EmptyRed,

    #[error("RED block headers run past the payload ({0} bytes)")]
    RedHeaderTruncated(usize),

    #[error("RED blocks need {needed} bytes, payload has {actual}")]
    RedBlockTruncated { needed: usize, actual: usize },

    #[error("FEC packet too short for its headers ({0} bytes)")]
    FecHeaderTruncated(usize),

    #[error("FEC protection length {declared} exceeds the {actual} bytes present")]
    BadProtectionLength { declared: usize, actual: usize },

    #[error("recovered packet claims {length} payload bytes, only {available} protected")]
    IncompleteProtection { length: usize, available: usize },
}

/// Narrow interface to a parity recovery algorithm
///
/// Media packets are full RTP packets as they would have arrived without
/// RED wrapping. FEC packets are the FEC payload only (FEC header onward).
pub trait FecEngine: Send {
    fn add_media(&mut self, packet: &[u8]) -> Result<(), FecError>;

    fn add_fec(&mut self, media_ssrc: u32, payload: &[u8]) -> Result<(), FecError>;

    /// Rebuild whatever the stored packets allow, handing each recovered
    /// RTP packet to `on_recovered`. Returns how many were recovered.
    fn recover(&mut self, on_recovered: &mut dyn FnMut(Bytes)) -> Result<usize, FecError>;
}

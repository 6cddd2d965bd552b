//! RTP payload depacketizers
//!
//! Turn in-order RTP packets of one video stream into whole encoded frames.

mod depacketizer;

pub mod h264;
pub mod vp8;

use serde::{Deserialize, Serialize};
use std::fmt;

/// Video payload formats the depacketizers understand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Codec {
    Vp8,
    H264,
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Codec::Vp8 => write!(f, "VP8"),
            Codec::H264 => write!(f, "H264"),
        }
    }
}

pub use depacketizer::{Depacketizer, new_depacketizer};
pub use h264::H264Depacketizer;
pub use vp8::{Vp8Depacketizer, Vp8Descriptor};

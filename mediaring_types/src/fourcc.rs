//! Four character codes identifying codecs and pixel formats.

use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A four character code, stored as its raw bytes.
///
/// The all-zero code ([`FourCc::NONE`]) means "not set".
#[repr(transparent)]
#[derive(
    Clone, Copy, Default, PartialEq, Eq, Hash, Pod, Zeroable, Serialize, Deserialize,
)]
pub struct FourCc(pub [u8; 4]);

impl FourCc {
    pub const NONE: FourCc = FourCc([0; 4]);

    // Video codecs
    pub const H264: FourCc = FourCc(*b"H264");
    pub const HEVC: FourCc = FourCc(*b"HEVC");
    pub const AV1: FourCc = FourCc(*b"AV01");
    pub const MJPEG: FourCc = FourCc(*b"MJPG");

    // Raw pixel formats
    pub const I420: FourCc = FourCc(*b"I420");
    pub const NV12: FourCc = FourCc(*b"NV12");
    pub const UYVY: FourCc = FourCc(*b"UYVY");
    pub const BGRA: FourCc = FourCc(*b"BGRA");

    // Audio codecs
    pub const AAC: FourCc = FourCc(*b"AAC ");
    pub const OPUS: FourCc = FourCc(*b"OPUS");
    pub const PCM: FourCc = FourCc(*b"PCM ");
    pub const PCM_FLOAT: FourCc = FourCc(*b"FL32");

    /// Build a code from exactly four bytes.
    pub const fn new(code: &[u8; 4]) -> Self {
        FourCc(*code)
    }

    /// Little-endian `u32` form used in the raw item headers.
    #[inline]
    pub const fn to_u32(self) -> u32 {
        u32::from_le_bytes(self.0)
    }

    #[inline]
    pub const fn from_u32(v: u32) -> Self {
        FourCc(v.to_le_bytes())
    }

    #[inline]
    pub fn is_none(&self) -> bool {
        self.0 == [0; 4]
    }
}

impl fmt::Display for FourCc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            return f.write_str("none");
        }
        for &b in &self.0 {
            let c = if b.is_ascii_graphic() || b == b' ' {
                b as char
            } else {
                '.'
            };
            write!(f, "{}", c)?;
        }
        Ok(())
    }
}

impl fmt::Debug for FourCc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FourCc({})", self)
    }
}

impl From<u32> for FourCc {
    fn from(v: u32) -> Self {
        FourCc::from_u32(v)
    }
}

impl From<FourCc> for u32 {
    fn from(v: FourCc) -> Self {
        v.to_u32()
    }
}

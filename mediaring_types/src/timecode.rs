//! SMPTE-style timecode for the timecode payload part.

use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Timecode packed as 8 bytes: hours, minutes, seconds, frames, flags and
/// three reserved bytes.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Pod, Zeroable, Serialize, Deserialize)]
pub struct Timecode {
    pub hours: u8,
    pub minutes: u8,
    pub seconds: u8,
    pub frames: u8,
    pub flags: u8,
    #[serde(skip)]
    pub _reserved: [u8; 3],
}

impl Timecode {
    pub const SIZE: usize = 8;
    pub const DROP_FRAME: u8 = 1 << 0;
    pub const FIELD_MARK: u8 = 1 << 1;

    pub fn new(hours: u8, minutes: u8, seconds: u8, frames: u8) -> Self {
        Self {
            hours,
            minutes,
            seconds,
            frames,
            flags: 0,
            _reserved: [0; 3],
        }
    }

    pub fn is_drop_frame(&self) -> bool {
        self.flags & Self::DROP_FRAME != 0
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        bytemuck::cast(*self)
    }

    /// Parse the first 8 bytes of a timecode part.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        bytes
            .get(..Self::SIZE)
            .map(bytemuck::pod_read_unaligned::<Timecode>)
    }
}

impl fmt::Display for Timecode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sep = if self.is_drop_frame() { ';' } else { ':' };
        write!(
            f,
            "{:02}:{:02}:{:02}{}{:02}",
            self.hours, self.minutes, self.seconds, sep, self.frames
        )
    }
}

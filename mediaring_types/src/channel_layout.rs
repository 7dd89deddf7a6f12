//! Audio channel layout: a speaker bitmask plus an optional explicit order.

use serde::{Deserialize, Serialize};

/// Speaker positions, numbered by their bit in the layout mask.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChannelPosition {
    FrontLeft = 0,
    FrontRight = 1,
    FrontCenter = 2,
    LowFrequency = 3,
    BackLeft = 4,
    BackRight = 5,
    FrontLeftOfCenter = 6,
    FrontRightOfCenter = 7,
    BackCenter = 8,
    SideLeft = 9,
    SideRight = 10,
    TopCenter = 11,
    TopFrontLeft = 12,
    TopFrontCenter = 13,
    TopFrontRight = 14,
    TopBackLeft = 15,
    TopBackCenter = 16,
    TopBackRight = 17,
}

impl ChannelPosition {
    /// Highest numbered position.
    pub const LAST: ChannelPosition = ChannelPosition::TopBackRight;

    #[inline]
    pub const fn bit(self) -> u64 {
        1u64 << (self as u8)
    }

    pub fn from_u8(v: u8) -> Option<Self> {
        use ChannelPosition::*;
        Some(match v {
            0 => FrontLeft,
            1 => FrontRight,
            2 => FrontCenter,
            3 => LowFrequency,
            4 => BackLeft,
            5 => BackRight,
            6 => FrontLeftOfCenter,
            7 => FrontRightOfCenter,
            8 => BackCenter,
            9 => SideLeft,
            10 => SideRight,
            11 => TopCenter,
            12 => TopFrontLeft,
            13 => TopFrontCenter,
            14 => TopFrontRight,
            15 => TopBackLeft,
            16 => TopBackCenter,
            17 => TopBackRight,
            _ => return None,
        })
    }
}

/// Channel layout of an audio stream.
///
/// `mask` is the set of speakers present. `order` is empty when channels
/// follow mask bit order; otherwise it lists every present speaker in the
/// order samples are interleaved.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AudioChannelLayout {
    pub mask: u64,
    #[serde(default)]
    pub order: Vec<ChannelPosition>,
}

impl AudioChannelLayout {
    pub const MONO: u64 = ChannelPosition::FrontCenter.bit();
    pub const STEREO: u64 = ChannelPosition::FrontLeft.bit() | ChannelPosition::FrontRight.bit();
    pub const SURROUND_5_1: u64 = Self::STEREO
        | ChannelPosition::FrontCenter.bit()
        | ChannelPosition::LowFrequency.bit()
        | ChannelPosition::BackLeft.bit()
        | ChannelPosition::BackRight.bit();

    /// Layout in natural (mask) order.
    pub fn from_mask(mask: u64) -> Self {
        Self {
            mask,
            order: Vec::new(),
        }
    }

    /// Layout with an explicit channel order; the mask is derived from it.
    pub fn with_order(order: Vec<ChannelPosition>) -> Self {
        let mask = order.iter().fold(0u64, |m, p| m | p.bit());
        Self { mask, order }
    }

    pub fn stereo() -> Self {
        Self::from_mask(Self::STEREO)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.mask == 0
    }

    /// Number of channels described by this layout.
    pub fn channel_count(&self) -> u32 {
        if self.order.is_empty() {
            self.mask.count_ones()
        } else {
            self.order.len() as u32
        }
    }

    /// Whether the layout needs more than the mask to be described.
    pub fn has_custom_order(&self) -> bool {
        !self.order.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn with_order_derives_mask() {
        let layout = AudioChannelLayout::with_order(vec![
            ChannelPosition::FrontRight,
            ChannelPosition::FrontLeft,
        ]);
        assert_eq!(layout.mask, AudioChannelLayout::STEREO);
        assert_eq!(layout.channel_count(), 2);
        assert!(layout.has_custom_order());
    }

    #[test]
    fn surround_has_six_channels() {
        let layout = AudioChannelLayout::from_mask(AudioChannelLayout::SURROUND_5_1);
        assert_eq!(layout.channel_count(), 6);
        assert!(!layout.has_custom_order());
    }

    #[test]
    fn position_numbering_roundtrips() {
        for v in 0..=ChannelPosition::LAST as u8 {
            let p = ChannelPosition::from_u8(v).unwrap();
            assert_eq!(p as u8, v);
        }
        assert!(ChannelPosition::from_u8(ChannelPosition::LAST as u8 + 1).is_none());
    }
}

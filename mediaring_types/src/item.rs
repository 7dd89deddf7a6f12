//! One logical media record and its payload parts.

use serde::{Deserialize, Serialize};

/// The payload kinds an item can carry, in slot order.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadKind {
    Video = 0,
    Audio = 1,
    Subtitle = 2,
    Caption = 3,
    Timecode = 4,
    UserData = 5,
}

impl PayloadKind {
    /// Every kind, in the order parts are packed into a slot.
    pub const ALL: [PayloadKind; 6] = [
        PayloadKind::Video,
        PayloadKind::Audio,
        PayloadKind::Subtitle,
        PayloadKind::Caption,
        PayloadKind::Timecode,
        PayloadKind::UserData,
    ];

    pub const COUNT: usize = Self::ALL.len();

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            PayloadKind::Video => "video",
            PayloadKind::Audio => "audio",
            PayloadKind::Subtitle => "subtitle",
            PayloadKind::Caption => "caption",
            PayloadKind::Timecode => "timecode",
            PayloadKind::UserData => "user_data",
        }
    }
}

/// One payload part of an item.
///
/// `InPlace(len)` marks bytes the caller already wrote straight into the slot
/// through the zero-copy path; writers skip the copy for it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Payload<'a> {
    #[default]
    Absent,
    Borrowed(&'a [u8]),
    InPlace(usize),
}

impl<'a> Payload<'a> {
    #[inline]
    pub fn len(&self) -> usize {
        match self {
            Payload::Absent => 0,
            Payload::Borrowed(b) => b.len(),
            Payload::InPlace(n) => *n,
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// A part counts as present when it carries at least one byte.
    #[inline]
    pub fn is_present(&self) -> bool {
        !self.is_empty()
    }

    #[inline]
    pub fn as_slice(&self) -> Option<&'a [u8]> {
        match self {
            Payload::Borrowed(b) => Some(b),
            _ => None,
        }
    }

    pub fn from_slice(bytes: &'a [u8]) -> Self {
        if bytes.is_empty() {
            Payload::Absent
        } else {
            Payload::Borrowed(bytes)
        }
    }
}

/// Per-frame flags carried in the item header.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FrameFlags(pub u32);

impl FrameFlags {
    pub const KEY_FRAME: u32 = 1 << 0;
    pub const DISCONTINUITY: u32 = 1 << 1;
    pub const TOP_FIELD_FIRST: u32 = 1 << 2;
    pub const REPEAT_FIRST_FIELD: u32 = 1 << 3;
    pub const CORRUPT: u32 = 1 << 4;

    #[inline]
    pub fn contains(self, bits: u32) -> bool {
        self.0 & bits == bits
    }

    #[inline]
    pub fn insert(&mut self, bits: u32) {
        self.0 |= bits;
    }

    #[inline]
    pub fn is_key_frame(self) -> bool {
        self.contains(Self::KEY_FRAME)
    }
}

/// Coded picture type of the video part.
#[repr(u32)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PictureType {
    #[default]
    Unknown = 0,
    I = 1,
    P = 2,
    B = 3,
}

impl PictureType {
    pub fn from_u32(v: u32) -> Self {
        match v {
            1 => PictureType::I,
            2 => PictureType::P,
            3 => PictureType::B,
            _ => PictureType::Unknown,
        }
    }
}

/// One logical media record, written and read as a unit.
///
/// Parts borrow either the caller's buffers (write side) or the shared
/// segment (read side). Read-side slices are only valid until the reader's
/// next read step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MediaItem<'a> {
    pub video: Payload<'a>,
    pub audio: Payload<'a>,
    pub subtitle: Payload<'a>,
    pub caption: Payload<'a>,
    pub timecode: Payload<'a>,
    pub user_data: Payload<'a>,

    pub video_pts: i64,
    pub video_dts: i64,
    pub audio_pts: i64,
    pub subtitle_pts: i64,
    pub caption_pts: i64,

    pub frame_flags: FrameFlags,
    pub picture_type: PictureType,
    /// Discriminant of the opaque user-data blob.
    pub user_data_type: u32,
    /// Number of audio samples per channel in the audio part.
    pub audio_samples: u32,
}

impl<'a> MediaItem<'a> {
    pub fn part(&self, kind: PayloadKind) -> &Payload<'a> {
        match kind {
            PayloadKind::Video => &self.video,
            PayloadKind::Audio => &self.audio,
            PayloadKind::Subtitle => &self.subtitle,
            PayloadKind::Caption => &self.caption,
            PayloadKind::Timecode => &self.timecode,
            PayloadKind::UserData => &self.user_data,
        }
    }

    pub fn part_mut(&mut self, kind: PayloadKind) -> &mut Payload<'a> {
        match kind {
            PayloadKind::Video => &mut self.video,
            PayloadKind::Audio => &mut self.audio,
            PayloadKind::Subtitle => &mut self.subtitle,
            PayloadKind::Caption => &mut self.caption,
            PayloadKind::Timecode => &mut self.timecode,
            PayloadKind::UserData => &mut self.user_data,
        }
    }

    /// Lengths of every part, in slot order.
    pub fn part_lengths(&self) -> [usize; PayloadKind::COUNT] {
        PayloadKind::ALL.map(|k| self.part(k).len())
    }

    /// Sum of all part lengths.
    pub fn payload_len(&self) -> usize {
        self.part_lengths().iter().sum()
    }

    pub fn has_video(&self) -> bool {
        self.video.is_present()
    }

    pub fn has_audio(&self) -> bool {
        self.audio.is_present()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_lengths_follow_slot_order() {
        let video = [1u8; 10];
        let item = MediaItem {
            video: Payload::Borrowed(&video),
            audio: Payload::InPlace(4),
            user_data: Payload::Borrowed(b"xyz"),
            ..Default::default()
        };
        assert_eq!(item.part_lengths(), [10, 4, 0, 0, 0, 3]);
        assert_eq!(item.payload_len(), 17);
        assert!(item.has_video());
        assert!(!item.subtitle.is_present());
    }

    #[test]
    fn empty_slice_is_absent() {
        assert_eq!(Payload::from_slice(&[]), Payload::Absent);
        assert_eq!(Payload::from_slice(b"a").as_slice(), Some(&b"a"[..]));
        assert_eq!(Payload::InPlace(3).as_slice(), None);
    }

    #[test]
    fn frame_flags_bits() {
        let mut flags = FrameFlags::default();
        assert!(!flags.is_key_frame());
        flags.insert(FrameFlags::KEY_FRAME | FrameFlags::DISCONTINUITY);
        assert!(flags.is_key_frame());
        assert!(flags.contains(FrameFlags::DISCONTINUITY));
        assert!(!flags.contains(FrameFlags::CORRUPT));
    }
}

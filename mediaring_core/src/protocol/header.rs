//! Item sub-headers.
//!
//! Both versions start with [`ItemHeaderPrefix`] followed by the stream head
//! the item was produced with. The legacy header stops there and parts follow
//! back to back in slot order. The current header adds stored part offsets
//! and the key-value area, so readers never recompute positions.
//!
//! ```text
//! legacy:  | prefix (88) | head (64) | video | audio | subtitle | caption | timecode | user data |
//! current: | prefix (88) | head (64) | offsets (40) | parts at stored offsets ... | kv |
//! ```

use bytemuck::{Pod, Zeroable};
use std::ops::Range;

use mediaring_types::{FrameFlags, MediaHeadRaw, MediaItem, PayloadKind, PictureType};

use crate::config::ProtocolVersion;
use crate::error::{MediaRingError, MediaRingResult};

/// Fields shared by every header version.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct ItemHeaderPrefix {
    /// Part lengths in slot order.
    pub lengths: [u32; PayloadKind::COUNT],
    pub video_pts: i64,
    pub video_dts: i64,
    pub audio_pts: i64,
    pub subtitle_pts: i64,
    pub caption_pts: i64,
    pub frame_flags: u32,
    pub picture_type: u32,
    pub video_codec: u32,
    pub audio_codec: u32,
    pub user_data_type: u32,
    pub audio_samples: u32,
}

const _: () = assert!(std::mem::size_of::<ItemHeaderPrefix>() == 88);

impl ItemHeaderPrefix {
    pub fn from_item(item: &MediaItem<'_>, head: &MediaHeadRaw) -> MediaRingResult<Self> {
        let mut lengths = [0u32; PayloadKind::COUNT];
        for (slot, len) in lengths.iter_mut().zip(item.part_lengths()) {
            *slot = u32::try_from(len)?;
        }
        Ok(Self {
            lengths,
            video_pts: item.video_pts,
            video_dts: item.video_dts,
            audio_pts: item.audio_pts,
            subtitle_pts: item.subtitle_pts,
            caption_pts: item.caption_pts,
            frame_flags: item.frame_flags.0,
            picture_type: item.picture_type as u32,
            video_codec: head.video_codec,
            audio_codec: head.audio_codec,
            user_data_type: item.user_data_type,
            audio_samples: item.audio_samples,
        })
    }

    /// Item metadata with every part absent.
    pub fn to_item<'a>(&self) -> MediaItem<'a> {
        MediaItem {
            video_pts: self.video_pts,
            video_dts: self.video_dts,
            audio_pts: self.audio_pts,
            subtitle_pts: self.subtitle_pts,
            caption_pts: self.caption_pts,
            frame_flags: FrameFlags(self.frame_flags),
            picture_type: PictureType::from_u32(self.picture_type),
            user_data_type: self.user_data_type,
            audio_samples: self.audio_samples,
            ..Default::default()
        }
    }

    #[inline]
    pub fn len_of(&self, kind: PayloadKind) -> usize {
        self.lengths[kind.index()] as usize
    }

    pub fn payload_len(&self) -> u64 {
        self.lengths.iter().map(|&l| l as u64).sum()
    }
}

/// Legacy header: offsets are recomputed from the lengths.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct ItemHeaderV1 {
    pub prefix: ItemHeaderPrefix,
    pub head: MediaHeadRaw,
}

pub const HEADER_V1_SIZE: usize = std::mem::size_of::<ItemHeaderV1>();

const _: () = assert!(HEADER_V1_SIZE == 152);

/// Current header: stored offsets and a trailing key-value area.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct ItemHeaderV2 {
    pub prefix: ItemHeaderPrefix,
    pub head: MediaHeadRaw,
    /// Bytes from slot start to the first part; at least `HEADER_V2_SIZE`.
    pub header_size: u32,
    pub flags: u32,
    pub offsets: [u32; PayloadKind::COUNT],
    pub kv_offset: u32,
    pub kv_len: u32,
}

pub const HEADER_V2_SIZE: usize = std::mem::size_of::<ItemHeaderV2>();

const _: () = assert!(HEADER_V2_SIZE == 192);

impl ItemHeaderV2 {
    /// Set when the key-value area holds a channel layout.
    pub const FLAG_LAYOUT: u32 = 1 << 0;
}

/// Header of one slot, tagged by protocol version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemHeader {
    Legacy(ItemHeaderV1),
    Current(ItemHeaderV2),
}

fn slot_corrupt(reason: String) -> MediaRingError {
    MediaRingError::corrupt("item slot", reason)
}

impl ItemHeader {
    pub fn size_for(version: ProtocolVersion) -> usize {
        match version {
            ProtocolVersion::Legacy => HEADER_V1_SIZE,
            ProtocolVersion::Current => HEADER_V2_SIZE,
        }
    }

    /// Decode and bounds-check the header at the start of `slot`.
    pub fn decode(version: ProtocolVersion, slot: &[u8]) -> MediaRingResult<Self> {
        let size = Self::size_for(version);
        let bytes = slot.get(..size).ok_or_else(|| {
            slot_corrupt(format!(
                "{} byte slot shorter than the {} byte header",
                slot.len(),
                size
            ))
        })?;
        let header = match version {
            ProtocolVersion::Legacy => {
                ItemHeader::Legacy(bytemuck::pod_read_unaligned::<ItemHeaderV1>(bytes))
            }
            ProtocolVersion::Current => {
                ItemHeader::Current(bytemuck::pod_read_unaligned::<ItemHeaderV2>(bytes))
            }
        };
        header.check(slot.len())?;
        Ok(header)
    }

    fn check(&self, slot_len: usize) -> MediaRingResult<()> {
        let slot_len = slot_len as u64;
        match self {
            ItemHeader::Legacy(h) => {
                let end = HEADER_V1_SIZE as u64 + h.prefix.payload_len();
                if end > slot_len {
                    return Err(slot_corrupt(format!(
                        "parts end at {} past slot of {} bytes",
                        end, slot_len
                    )));
                }
            }
            ItemHeader::Current(h) => {
                let header_size = h.header_size as u64;
                if header_size < HEADER_V2_SIZE as u64 || header_size > slot_len {
                    return Err(slot_corrupt(format!("header size {}", header_size)));
                }
                for kind in PayloadKind::ALL {
                    let offset = h.offsets[kind.index()] as u64;
                    let len = h.prefix.lengths[kind.index()] as u64;
                    if len > 0 && (offset < header_size || offset + len > slot_len) {
                        return Err(slot_corrupt(format!(
                            "{} part [{}+{}] outside slot of {} bytes",
                            kind.name(),
                            offset,
                            len,
                            slot_len
                        )));
                    }
                }
                let kv_end = h.kv_offset as u64 + h.kv_len as u64;
                if h.kv_len > 0 && (kv_end > slot_len || (h.kv_offset as u64) < header_size) {
                    return Err(slot_corrupt(format!(
                        "key-value area [{}+{}] outside slot",
                        h.kv_offset, h.kv_len
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn prefix(&self) -> &ItemHeaderPrefix {
        match self {
            ItemHeader::Legacy(h) => &h.prefix,
            ItemHeader::Current(h) => &h.prefix,
        }
    }

    pub fn head(&self) -> &MediaHeadRaw {
        match self {
            ItemHeader::Legacy(h) => &h.head,
            ItemHeader::Current(h) => &h.head,
        }
    }

    /// Byte range of a part inside the slot.
    pub fn part_range(&self, kind: PayloadKind) -> Range<usize> {
        let prefix = self.prefix();
        let len = prefix.len_of(kind);
        let start = match self {
            ItemHeader::Legacy(_) => {
                HEADER_V1_SIZE
                    + PayloadKind::ALL[..kind.index()]
                        .iter()
                        .map(|k| prefix.len_of(*k))
                        .sum::<usize>()
            }
            ItemHeader::Current(h) => h.offsets[kind.index()] as usize,
        };
        start..start + len
    }

    /// Byte range of the key-value area, empty for legacy headers.
    pub fn kv_range(&self) -> Range<usize> {
        match self {
            ItemHeader::Legacy(_) => 0..0,
            ItemHeader::Current(h) if h.kv_len > 0 => {
                let start = h.kv_offset as usize;
                start..start + h.kv_len as usize
            }
            ItemHeader::Current(_) => 0..0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mediaring_types::Payload;

    fn prefix_with(lengths: [u32; 6]) -> ItemHeaderPrefix {
        ItemHeaderPrefix {
            lengths,
            ..Default::default()
        }
    }

    #[test]
    fn legacy_offsets_follow_slot_order() {
        let header = ItemHeader::Legacy(ItemHeaderV1 {
            prefix: prefix_with([10, 4, 0, 3, 8, 2]),
            head: MediaHeadRaw::default(),
        });
        assert_eq!(header.part_range(PayloadKind::Video), 152..162);
        assert_eq!(header.part_range(PayloadKind::Audio), 162..166);
        assert_eq!(header.part_range(PayloadKind::Subtitle), 166..166);
        assert_eq!(header.part_range(PayloadKind::Caption), 166..169);
        assert_eq!(header.part_range(PayloadKind::Timecode), 169..177);
        assert_eq!(header.part_range(PayloadKind::UserData), 177..179);
    }

    #[test]
    fn decode_rejects_short_and_overrunning_slots() {
        let v1 = ItemHeaderV1 {
            prefix: prefix_with([100, 0, 0, 0, 0, 0]),
            head: MediaHeadRaw::default(),
        };
        let mut slot = bytemuck::bytes_of(&v1).to_vec();
        assert!(ItemHeader::decode(ProtocolVersion::Legacy, &slot[..100]).is_err());
        assert!(ItemHeader::decode(ProtocolVersion::Legacy, &slot).is_err());
        slot.resize(HEADER_V1_SIZE + 100, 0);
        assert!(ItemHeader::decode(ProtocolVersion::Legacy, &slot).is_ok());
    }

    #[test]
    fn decode_current_checks_stored_offsets() {
        let mut v2 = ItemHeaderV2 {
            prefix: prefix_with([16, 0, 0, 0, 0, 0]),
            header_size: HEADER_V2_SIZE as u32,
            ..Default::default()
        };
        v2.offsets[0] = HEADER_V2_SIZE as u32;
        let mut slot = bytemuck::bytes_of(&v2).to_vec();
        slot.resize(HEADER_V2_SIZE + 16, 0);
        let header = ItemHeader::decode(ProtocolVersion::Current, &slot).unwrap();
        assert_eq!(header.part_range(PayloadKind::Video), 192..208);

        v2.offsets[0] = 8;
        let mut bad = bytemuck::bytes_of(&v2).to_vec();
        bad.resize(HEADER_V2_SIZE + 16, 0);
        assert!(ItemHeader::decode(ProtocolVersion::Current, &bad).is_err());
    }

    #[test]
    fn prefix_carries_item_metadata() {
        let item = MediaItem {
            video: Payload::InPlace(7),
            video_pts: 90_000,
            video_dts: 89_000,
            picture_type: PictureType::P,
            frame_flags: FrameFlags(FrameFlags::KEY_FRAME),
            user_data_type: 42,
            ..Default::default()
        };
        let prefix = ItemHeaderPrefix::from_item(&item, &MediaHeadRaw::default()).unwrap();
        assert_eq!(prefix.len_of(PayloadKind::Video), 7);
        let back = prefix.to_item();
        assert_eq!(back.video_pts, 90_000);
        assert_eq!(back.video_dts, 89_000);
        assert_eq!(back.picture_type, PictureType::P);
        assert!(back.frame_flags.is_key_frame());
        assert_eq!(back.user_data_type, 42);
        assert!(!back.video.is_present());
    }
}

//! Versioned item encoding over one ring slot.

use std::fmt;
use std::ops::Range;

use mediaring_types::{AudioChannelLayout, MediaHead, MediaHeadRaw, MediaItem, Payload, PayloadKind};

use crate::codec::{ChannelLayoutCodec, CompressedLayoutCodec};
use crate::config::ProtocolVersion;
use crate::error::{MediaRingError, MediaRingResult};
use crate::memory::platform::{align_up, WORD};
use crate::mr_log_limited;
use crate::protocol::header::{
    ItemHeader, ItemHeaderPrefix, ItemHeaderV1, ItemHeaderV2, HEADER_V1_SIZE, HEADER_V2_SIZE,
};
use crate::protocol::kv;

/// Lowest accepted audio sample rate.
pub const MIN_SAMPLE_RATE: u32 = 8000;

/// Where each part of one item goes inside its slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemLayout {
    pub version: ProtocolVersion,
    pub header_size: usize,
    pub offsets: [usize; PayloadKind::COUNT],
    pub lengths: [usize; PayloadKind::COUNT],
    pub kv_offset: usize,
    pub kv_len: usize,
    /// Slot bytes the item needs.
    pub total_size: usize,
    layout_blob: Option<(AudioChannelLayout, Vec<u8>)>,
}

impl ItemLayout {
    pub fn range(&self, kind: PayloadKind) -> Range<usize> {
        let start = self.offsets[kind.index()];
        start..start + self.lengths[kind.index()]
    }

    /// Whether this item carries a channel-layout record.
    pub fn carries_layout(&self) -> bool {
        self.layout_blob.is_some()
    }
}

/// Check the per-kind write preconditions of one item.
pub fn validate(head: &MediaHead, item: &MediaItem<'_>) -> MediaRingResult<()> {
    if item.has_video() {
        let v = &head.video;
        if v.width == 0 || v.height == 0 {
            return Err(MediaRingError::invalid_input(format!(
                "video resolution {}x{}",
                v.width, v.height
            )));
        }
        if v.frame_duration == 0 || v.time_scale == 0 || v.frame_duration > v.time_scale {
            return Err(MediaRingError::invalid_input(format!(
                "video frame rate {}/{}",
                v.time_scale, v.frame_duration
            )));
        }
    }
    if item.has_audio() {
        let a = &head.audio;
        if a.channel_layout.is_empty() {
            return Err(MediaRingError::invalid_input("audio channel layout is empty"));
        }
        if a.bits_per_sample == 0 {
            return Err(MediaRingError::invalid_input("audio bits per sample is 0"));
        }
        if a.sample_rate < MIN_SAMPLE_RATE {
            return Err(MediaRingError::invalid_input(format!(
                "audio sample rate {} below {}",
                a.sample_rate, MIN_SAMPLE_RATE
            )));
        }
    }
    Ok(())
}

/// Encoder/decoder for one channel, bound to its negotiated version.
///
/// Writers remember the last channel layout they sent and only attach a new
/// layout record when it changes. Readers remember the last layout record
/// they parsed and use it to restore the channel order.
pub struct ItemProtocol {
    version: ProtocolVersion,
    codec: Box<dyn ChannelLayoutCodec>,
    sent_layout: Option<AudioChannelLayout>,
    seen_layout: Option<AudioChannelLayout>,
}

impl fmt::Debug for ItemProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ItemProtocol")
            .field("version", &self.version)
            .field("sent_layout", &self.sent_layout)
            .field("seen_layout", &self.seen_layout)
            .finish()
    }
}

impl ItemProtocol {
    pub fn new(version: ProtocolVersion) -> Self {
        Self::with_codec(version, Box::<CompressedLayoutCodec>::default())
    }

    pub fn with_codec(version: ProtocolVersion, codec: Box<dyn ChannelLayoutCodec>) -> Self {
        Self {
            version,
            codec,
            sent_layout: None,
            seen_layout: None,
        }
    }

    #[inline]
    pub fn version(&self) -> ProtocolVersion {
        self.version
    }

    #[inline]
    pub fn header_size(&self) -> usize {
        ItemHeader::size_for(self.version)
    }

    /// Record that an item built from `layout` was published. Later items
    /// leave out a layout record until the channel layout changes again.
    pub fn mark_sent(&mut self, layout: &ItemLayout) {
        if let Some((channel_layout, _)) = &layout.layout_blob {
            self.sent_layout = Some(channel_layout.clone());
        }
    }

    fn pending_layout(&self, head: &MediaHead) -> MediaRingResult<Option<(AudioChannelLayout, Vec<u8>)>> {
        if self.version != ProtocolVersion::Current {
            return Ok(None);
        }
        let layout = &head.audio.channel_layout;
        if layout.is_empty() || self.sent_layout.as_ref() == Some(layout) {
            return Ok(None);
        }
        let blob = self.codec.serialize(layout)?;
        Ok(Some((layout.clone(), blob)))
    }

    /// Offsets for an item with the given part lengths. Writes nothing.
    pub fn write_layout(
        &self,
        head: &MediaHead,
        lengths: [usize; PayloadKind::COUNT],
    ) -> MediaRingResult<ItemLayout> {
        let header_size = self.header_size();
        let mut offsets = [0usize; PayloadKind::COUNT];
        let mut cursor = header_size;
        let layout_blob = self.pending_layout(head)?;
        match self.version {
            ProtocolVersion::Legacy => {
                for (offset, len) in offsets.iter_mut().zip(lengths) {
                    *offset = cursor;
                    cursor += len;
                }
            }
            ProtocolVersion::Current => {
                for (offset, len) in offsets.iter_mut().zip(lengths) {
                    *offset = cursor;
                    if len > 0 {
                        cursor = align_up(cursor + len, WORD);
                    }
                }
            }
        }
        let kv_offset = cursor;
        let kv_len = match &layout_blob {
            Some((_, blob)) => kv::encoded_len(&[(kv::KEY_CHANNEL_LAYOUT, blob)]),
            None => 0,
        };
        let total_size = kv_offset + kv_len;
        if u32::try_from(total_size).is_err() {
            return Err(MediaRingError::invalid_input(format!(
                "item of {} bytes exceeds the slot format",
                total_size
            )));
        }
        Ok(ItemLayout {
            version: self.version,
            header_size,
            offsets,
            lengths,
            kv_offset,
            kv_len,
            total_size,
            layout_blob,
        })
    }

    /// Slot bytes needed to send `item`.
    pub fn required_size(&self, head: &MediaHead, item: &MediaItem<'_>) -> MediaRingResult<usize> {
        Ok(self.write_layout(head, item.part_lengths())?.total_size)
    }

    /// Encode `item` into `slot`, copying every borrowed part. `InPlace`
    /// parts are expected at their layout offsets already. Returns the slot
    /// bytes used. The layout record stays pending until
    /// [`mark_sent`](Self::mark_sent).
    pub fn write_item(
        &self,
        head: &MediaHead,
        item: &MediaItem<'_>,
        slot: &mut [u8],
    ) -> MediaRingResult<usize> {
        validate(head, item)?;
        let layout = self.write_layout(head, item.part_lengths())?;
        if layout.total_size > slot.len() {
            return Err(MediaRingError::invalid_input(format!(
                "item needs {} bytes, slot has {}",
                layout.total_size,
                slot.len()
            )));
        }
        for kind in PayloadKind::ALL {
            if let Payload::Borrowed(bytes) = item.part(kind) {
                slot[layout.range(kind)].copy_from_slice(bytes);
            }
        }
        self.stamp(head, item, &layout, slot)
    }

    /// Stamp only the header (and key-value area) over parts the caller
    /// already wrote at the offsets of `layout`.
    pub fn write_item_header_only(
        &self,
        head: &MediaHead,
        item: &MediaItem<'_>,
        layout: &ItemLayout,
        slot: &mut [u8],
    ) -> MediaRingResult<usize> {
        validate(head, item)?;
        if layout.version != self.version {
            return Err(MediaRingError::invalid_input(
                "layout was computed for another protocol version",
            ));
        }
        if layout.lengths != item.part_lengths() {
            return Err(MediaRingError::invalid_input(format!(
                "part lengths {:?} differ from the layout {:?}",
                item.part_lengths(),
                layout.lengths
            )));
        }
        if layout.total_size > slot.len() {
            return Err(MediaRingError::invalid_input(format!(
                "item needs {} bytes, slot has {}",
                layout.total_size,
                slot.len()
            )));
        }
        self.stamp(head, item, layout, slot)
    }

    fn stamp(
        &self,
        head: &MediaHead,
        item: &MediaItem<'_>,
        layout: &ItemLayout,
        slot: &mut [u8],
    ) -> MediaRingResult<usize> {
        let head_raw = MediaHeadRaw::from(head);
        let prefix = ItemHeaderPrefix::from_item(item, &head_raw)?;
        match self.version {
            ProtocolVersion::Legacy => {
                let header = ItemHeaderV1 {
                    prefix,
                    head: head_raw,
                };
                slot[..HEADER_V1_SIZE].copy_from_slice(bytemuck::bytes_of(&header));
            }
            ProtocolVersion::Current => {
                let mut offsets = [0u32; PayloadKind::COUNT];
                for (dst, src) in offsets.iter_mut().zip(layout.offsets) {
                    *dst = u32::try_from(src)?;
                }
                let header = ItemHeaderV2 {
                    prefix,
                    head: head_raw,
                    header_size: HEADER_V2_SIZE as u32,
                    flags: if layout.carries_layout() {
                        ItemHeaderV2::FLAG_LAYOUT
                    } else {
                        0
                    },
                    offsets,
                    kv_offset: u32::try_from(layout.kv_offset)?,
                    kv_len: u32::try_from(layout.kv_len)?,
                };
                slot[..HEADER_V2_SIZE].copy_from_slice(bytemuck::bytes_of(&header));
                if let Some((_, blob)) = &layout.layout_blob {
                    let area = &mut slot[layout.kv_offset..layout.kv_offset + layout.kv_len];
                    kv::write(&[(kv::KEY_CHANNEL_LAYOUT, blob)], area)?;
                }
            }
        }
        Ok(layout.total_size)
    }

    /// Decode one slot. Parts borrow `slot`.
    pub fn read_item<'a>(&mut self, slot: &'a [u8]) -> MediaRingResult<(MediaHead, MediaItem<'a>)> {
        let header = ItemHeader::decode(self.version, slot)?;
        let mut item = header.prefix().to_item();
        for kind in PayloadKind::ALL {
            let range = header.part_range(kind);
            if !range.is_empty() {
                *item.part_mut(kind) = Payload::Borrowed(&slot[range]);
            }
        }

        let kv_range = header.kv_range();
        for record in kv::records(&slot[kv_range]) {
            let (key, value) = record?;
            if key == kv::KEY_CHANNEL_LAYOUT {
                match self.codec.parse(value) {
                    Ok(layout) => self.seen_layout = Some(layout),
                    Err(e) => mr_log_limited!(Warn, "dropping unreadable channel layout: {}", e),
                }
            }
        }

        let mut head = MediaHead::from(header.head());
        if let Some(seen) = &self.seen_layout {
            if seen.mask == head.audio.channel_layout.mask {
                head.audio.channel_layout = seen.clone();
            }
        }
        Ok((head, item))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mediaring_types::{
        AudioParams, ChannelPosition, FourCc, FrameFlags, Interlace, PictureType, VideoParams,
    };

    fn head() -> MediaHead {
        MediaHead {
            video: VideoParams {
                codec: FourCc::H264,
                pixel_format: FourCc::NV12,
                width: 1280,
                height: 720,
                frame_duration: 1,
                time_scale: 25,
                interlace: Interlace::Progressive,
            },
            audio: AudioParams {
                codec: FourCc::PCM,
                channel_layout: AudioChannelLayout::stereo(),
                sample_rate: 48000,
                bits_per_sample: 16,
            },
        }
    }

    fn item<'a>(video: &'a [u8], audio: &'a [u8]) -> MediaItem<'a> {
        MediaItem {
            video: Payload::from_slice(video),
            audio: Payload::from_slice(audio),
            user_data: Payload::Borrowed(b"cc"),
            video_pts: 3600,
            video_dts: 0,
            audio_pts: 3500,
            frame_flags: FrameFlags(FrameFlags::KEY_FRAME),
            picture_type: PictureType::I,
            user_data_type: 9,
            audio_samples: 1024,
            ..Default::default()
        }
    }

    fn roundtrip(version: ProtocolVersion) {
        let writer = ItemProtocol::new(version);
        let mut reader = ItemProtocol::new(version);
        let head = head();
        let video = vec![7u8; 333];
        let audio = vec![1u8; 64];
        let item = item(&video, &audio);

        let size = writer.required_size(&head, &item).unwrap();
        let mut slot = vec![0u8; size];
        assert_eq!(writer.write_item(&head, &item, &mut slot).unwrap(), size);

        let (head_back, item_back) = reader.read_item(&slot).unwrap();
        assert_eq!(head_back, head);
        assert_eq!(item_back, item);
    }

    #[test]
    fn legacy_roundtrip() {
        roundtrip(ProtocolVersion::Legacy);
    }

    #[test]
    fn current_roundtrip() {
        roundtrip(ProtocolVersion::Current);
    }

    #[test]
    fn current_aligns_parts() {
        let protocol = ItemProtocol::new(ProtocolVersion::Current);
        let layout = protocol.write_layout(&head(), [3, 5, 0, 0, 8, 1]).unwrap();
        assert_eq!(layout.offsets[0], HEADER_V2_SIZE);
        assert_eq!(layout.offsets[1] % WORD, 0);
        assert_eq!(layout.offsets[4] % WORD, 0);
        assert!(layout.carries_layout());
        assert!(layout.kv_offset >= layout.range(PayloadKind::UserData).end);
    }

    #[test]
    fn legacy_packs_parts_back_to_back() {
        let protocol = ItemProtocol::new(ProtocolVersion::Legacy);
        let layout = protocol.write_layout(&head(), [3, 5, 0, 0, 8, 1]).unwrap();
        assert_eq!(layout.offsets, [152, 155, 160, 160, 160, 168]);
        assert_eq!(layout.total_size, 169);
        assert!(!layout.carries_layout());
    }

    #[test]
    fn layout_record_only_on_change() {
        let mut writer = ItemProtocol::new(ProtocolVersion::Current);
        let mut head = head();
        let audio = [0u8; 8];
        let item = MediaItem {
            audio: Payload::Borrowed(&audio),
            ..Default::default()
        };
        let first = writer.write_layout(&head, item.part_lengths()).unwrap();
        assert!(first.carries_layout());
        let mut slot = vec![0u8; first.total_size];
        writer.write_item(&head, &item, &mut slot).unwrap();
        // written but never published
        assert!(writer.write_layout(&head, item.part_lengths()).unwrap().carries_layout());

        writer.mark_sent(&first);
        assert!(!writer.write_layout(&head, item.part_lengths()).unwrap().carries_layout());

        head.audio.channel_layout = AudioChannelLayout::with_order(vec![
            ChannelPosition::FrontRight,
            ChannelPosition::FrontLeft,
        ]);
        assert!(writer.write_layout(&head, item.part_lengths()).unwrap().carries_layout());
    }

    #[test]
    fn reader_restores_channel_order() {
        let writer = ItemProtocol::new(ProtocolVersion::Current);
        let mut reader = ItemProtocol::new(ProtocolVersion::Current);
        let mut head = head();
        head.audio.channel_layout = AudioChannelLayout::with_order(vec![
            ChannelPosition::FrontRight,
            ChannelPosition::FrontLeft,
        ]);
        let audio = [0u8; 16];
        let item = MediaItem {
            audio: Payload::Borrowed(&audio),
            ..Default::default()
        };
        for _ in 0..2 {
            let size = writer.required_size(&head, &item).unwrap();
            let mut slot = vec![0u8; size];
            writer.write_item(&head, &item, &mut slot).unwrap();
            let (back, _) = reader.read_item(&slot).unwrap();
            assert_eq!(back.audio.channel_layout, head.audio.channel_layout);
        }
    }

    #[test]
    fn preconditions_reject_without_writing() {
        let protocol = ItemProtocol::new(ProtocolVersion::Current);
        let video = [1u8; 4];
        let item = MediaItem {
            video: Payload::Borrowed(&video),
            ..Default::default()
        };
        let mut slot = vec![0u8; 512];

        let mut bad = head();
        bad.video.width = 0;
        assert!(matches!(
            protocol.write_item(&bad, &item, &mut slot),
            Err(MediaRingError::InvalidInput(_))
        ));
        let mut bad = head();
        bad.video.frame_duration = 30;
        bad.video.time_scale = 25;
        assert!(protocol.write_item(&bad, &item, &mut slot).is_err());
        assert!(slot.iter().all(|&b| b == 0));

        let audio_item = MediaItem {
            audio: Payload::Borrowed(&video),
            ..Default::default()
        };
        let mut bad = head();
        bad.audio.sample_rate = 7999;
        assert!(protocol.write_item(&bad, &audio_item, &mut slot).is_err());
        let mut bad = head();
        bad.audio.channel_layout = AudioChannelLayout::default();
        assert!(protocol.write_item(&bad, &audio_item, &mut slot).is_err());
        let mut bad = head();
        bad.audio.bits_per_sample = 0;
        assert!(protocol.write_item(&bad, &audio_item, &mut slot).is_err());
        assert!(slot.iter().all(|&b| b == 0));
    }

    #[test]
    fn header_only_keeps_in_place_parts() {
        let writer = ItemProtocol::new(ProtocolVersion::Current);
        let mut reader = ItemProtocol::new(ProtocolVersion::Current);
        let head = head();
        let item = MediaItem {
            video: Payload::InPlace(100),
            video_pts: 40,
            ..Default::default()
        };
        let layout = writer.write_layout(&head, item.part_lengths()).unwrap();
        let mut slot = vec![0u8; layout.total_size];
        slot[layout.range(PayloadKind::Video)].fill(0xab);
        writer
            .write_item_header_only(&head, &item, &layout, &mut slot)
            .unwrap();

        let (_, back) = reader.read_item(&slot).unwrap();
        assert_eq!(back.video.as_slice().unwrap(), &[0xab; 100][..]);
        assert_eq!(back.video_pts, 40);

        let wrong = MediaItem {
            video: Payload::InPlace(99),
            ..Default::default()
        };
        assert!(writer
            .write_item_header_only(&head, &wrong, &layout, &mut slot)
            .is_err());
    }

    #[test]
    fn short_slot_is_rejected() {
        let mut protocol = ItemProtocol::new(ProtocolVersion::Legacy);
        let item = item(b"abc", b"");
        let mut slot = vec![0u8; 10];
        assert!(protocol.write_item(&head(), &item, &mut slot).is_err());
        assert!(protocol.read_item(&slot).unwrap_err().is_corrupt());
    }
}

//! Stream head parameters: the geometry every item of a stream shares.
//!
//! The writer stamps a [`MediaHead`] into the channel head region and only
//! re-stamps it when a field changes. In shared memory it lives as the
//! fixed-size [`MediaHeadRaw`].

use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};

use crate::channel_layout::AudioChannelLayout;
use crate::fourcc::FourCc;

/// Field order of video frames.
#[repr(u32)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Interlace {
    #[default]
    Progressive = 0,
    TopFieldFirst = 1,
    BottomFieldFirst = 2,
}

impl Interlace {
    pub fn from_u32(v: u32) -> Self {
        match v {
            1 => Interlace::TopFieldFirst,
            2 => Interlace::BottomFieldFirst,
            _ => Interlace::Progressive,
        }
    }
}

/// Video stream parameters.
///
/// The frame rate is `time_scale / frame_duration` frames per second, e.g.
/// `30000 / 1001` for 29.97 fps.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoParams {
    pub codec: FourCc,
    pub pixel_format: FourCc,
    pub width: u32,
    pub height: u32,
    pub frame_duration: u32,
    pub time_scale: u32,
    pub interlace: Interlace,
}

impl VideoParams {
    /// Frames per second, or 0.0 when the rate is unset.
    pub fn fps(&self) -> f64 {
        if self.frame_duration == 0 {
            return 0.0;
        }
        self.time_scale as f64 / self.frame_duration as f64
    }
}

/// Audio stream parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioParams {
    pub codec: FourCc,
    pub channel_layout: AudioChannelLayout,
    pub sample_rate: u32,
    pub bits_per_sample: u32,
}

impl AudioParams {
    #[inline]
    pub fn channels(&self) -> u32 {
        self.channel_layout.channel_count()
    }
}

/// Head parameters of a media stream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaHead {
    pub video: VideoParams,
    pub audio: AudioParams,
}

/// Shared-memory form of [`MediaHead`] (64 bytes, Pod).
///
/// Only the channel mask of the audio layout is stored here; an explicit
/// channel order travels in the item layout blob.
///
/// # Layout (64 bytes, repr(C))
///
/// ```text
/// video_codec .. interlace: 7 x u32  (28 bytes)
/// audio_codec:              u32      (4 bytes)
/// channel_mask:             u64      (8 bytes)
/// channels:                 u32      (4 bytes)
/// sample_rate:              u32      (4 bytes)
/// bits_per_sample:          u32      (4 bytes)
/// _reserved:                [u32; 3] (12 bytes)
/// ```
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct MediaHeadRaw {
    pub video_codec: u32,
    pub pixel_format: u32,
    pub width: u32,
    pub height: u32,
    pub frame_duration: u32,
    pub time_scale: u32,
    pub interlace: u32,
    pub audio_codec: u32,
    pub channel_mask: u64,
    pub channels: u32,
    pub sample_rate: u32,
    pub bits_per_sample: u32,
    pub _reserved: [u32; 3],
}

const _: () = assert!(std::mem::size_of::<MediaHeadRaw>() == 64);

impl MediaHeadRaw {
    pub const SIZE: usize = std::mem::size_of::<MediaHeadRaw>();
}

impl From<&MediaHead> for MediaHeadRaw {
    fn from(head: &MediaHead) -> Self {
        Self {
            video_codec: head.video.codec.to_u32(),
            pixel_format: head.video.pixel_format.to_u32(),
            width: head.video.width,
            height: head.video.height,
            frame_duration: head.video.frame_duration,
            time_scale: head.video.time_scale,
            interlace: head.video.interlace as u32,
            audio_codec: head.audio.codec.to_u32(),
            channel_mask: head.audio.channel_layout.mask,
            channels: head.audio.channels(),
            sample_rate: head.audio.sample_rate,
            bits_per_sample: head.audio.bits_per_sample,
            _reserved: [0; 3],
        }
    }
}

impl From<&MediaHeadRaw> for MediaHead {
    fn from(raw: &MediaHeadRaw) -> Self {
        Self {
            video: VideoParams {
                codec: FourCc::from_u32(raw.video_codec),
                pixel_format: FourCc::from_u32(raw.pixel_format),
                width: raw.width,
                height: raw.height,
                frame_duration: raw.frame_duration,
                time_scale: raw.time_scale,
                interlace: Interlace::from_u32(raw.interlace),
            },
            audio: AudioParams {
                codec: FourCc::from_u32(raw.audio_codec),
                channel_layout: AudioChannelLayout::from_mask(raw.channel_mask),
                sample_rate: raw.sample_rate,
                bits_per_sample: raw.bits_per_sample,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_head() -> MediaHead {
        MediaHead {
            video: VideoParams {
                codec: FourCc::H264,
                pixel_format: FourCc::NV12,
                width: 1920,
                height: 1080,
                frame_duration: 1001,
                time_scale: 30000,
                interlace: Interlace::TopFieldFirst,
            },
            audio: AudioParams {
                codec: FourCc::AAC,
                channel_layout: AudioChannelLayout::stereo(),
                sample_rate: 48000,
                bits_per_sample: 16,
            },
        }
    }

    #[test]
    fn raw_form_preserves_mask_layouts() {
        let head = sample_head();
        let raw = MediaHeadRaw::from(&head);
        assert_eq!(raw.channels, 2);
        assert_eq!(MediaHead::from(&raw), head);
    }

    #[test]
    fn fps_uses_scale_over_duration() {
        let head = sample_head();
        assert!((head.video.fps() - 29.97).abs() < 0.01);
        assert_eq!(VideoParams::default().fps(), 0.0);
    }
}

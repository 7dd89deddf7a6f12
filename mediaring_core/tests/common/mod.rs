//! Shared test utilities for mediaring_core integration tests
#![allow(dead_code)]

use std::sync::atomic::{AtomicU32, Ordering};

use mediaring_core::{ChannelConfig, ProtocolVersion};
use mediaring_types::{
    AudioChannelLayout, AudioParams, FourCc, Interlace, MediaHead, VideoParams,
};

/// Segment name unique to this process and call.
pub fn unique_name(tag: &str) -> String {
    static NEXT: AtomicU32 = AtomicU32::new(0);
    format!(
        "it_{}_{}_{}",
        tag,
        std::process::id(),
        NEXT.fetch_add(1, Ordering::Relaxed)
    )
}

/// Short waits so failing tests fail fast.
pub fn test_config(protocol: ProtocolVersion) -> ChannelConfig {
    ChannelConfig {
        mode: 0o600,
        open_wait_ms: 200,
        probe_interval_ms: 10,
        reader_timeout_ms: 500,
        protocol,
        ..Default::default()
    }
}

pub fn video_head() -> MediaHead {
    MediaHead {
        video: VideoParams {
            codec: FourCc::H264,
            pixel_format: FourCc::NV12,
            width: 1920,
            height: 1080,
            frame_duration: 1001,
            time_scale: 30000,
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

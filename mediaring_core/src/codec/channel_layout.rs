//! Audio channel layout blob carried in the item key-value area.
//!
//! Blob format: `u32` raw length (little-endian) then the compressed raw
//! form. The raw form is
//!
//! ```text
//! u8  format (1)
//! u8  reserved
//! u16 order length
//! u64 mask
//! u8  × order length   channel positions
//! ```

use mediaring_types::{AudioChannelLayout, ChannelPosition};

use crate::codec::compression::{Compressor, ZlibCodec};
use crate::error::{MediaRingError, MediaRingResult};

const RAW_FORMAT: u8 = 1;
const RAW_HEADER: usize = 12;
/// Upper bound on a raw layout; guards the inflate buffer.
const MAX_RAW_LEN: usize = RAW_HEADER + u16::MAX as usize;

/// Serializer for [`AudioChannelLayout`] blobs.
pub trait ChannelLayoutCodec: Send + Sync {
    fn serialize(&self, layout: &AudioChannelLayout) -> MediaRingResult<Vec<u8>>;

    fn parse(&self, blob: &[u8]) -> MediaRingResult<AudioChannelLayout>;
}

/// Default codec: raw form compressed with any [`Compressor`].
#[derive(Debug, Clone, Default)]
pub struct CompressedLayoutCodec<C: Compressor = ZlibCodec> {
    compressor: C,
}

impl<C: Compressor> CompressedLayoutCodec<C> {
    pub fn new(compressor: C) -> Self {
        Self { compressor }
    }
}

fn encode_raw(layout: &AudioChannelLayout) -> MediaRingResult<Vec<u8>> {
    let count = u16::try_from(layout.order.len())?;
    let mut raw = Vec::with_capacity(RAW_HEADER + layout.order.len());
    raw.push(RAW_FORMAT);
    raw.push(0);
    raw.extend_from_slice(&count.to_le_bytes());
    raw.extend_from_slice(&layout.mask.to_le_bytes());
    raw.extend(layout.order.iter().map(|p| *p as u8));
    Ok(raw)
}

fn decode_raw(raw: &[u8]) -> MediaRingResult<AudioChannelLayout> {
    if raw.len() < RAW_HEADER {
        return Err(MediaRingError::codec("channel layout blob truncated"));
    }
    if raw[0] != RAW_FORMAT {
        return Err(MediaRingError::codec(format!(
            "unknown channel layout format {}",
            raw[0]
        )));
    }
    let count = u16::from_le_bytes([raw[2], raw[3]]) as usize;
    let mut mask_bytes = [0u8; 8];
    mask_bytes.copy_from_slice(&raw[4..RAW_HEADER]);
    let mask = u64::from_le_bytes(mask_bytes);
    let positions = raw
        .get(RAW_HEADER..RAW_HEADER + count)
        .ok_or_else(|| MediaRingError::codec("channel order truncated"))?;
    let order = positions
        .iter()
        .map(|&v| {
            ChannelPosition::from_u8(v)
                .ok_or_else(|| MediaRingError::codec(format!("unknown channel position {}", v)))
        })
        .collect::<MediaRingResult<Vec<_>>>()?;
    Ok(AudioChannelLayout { mask, order })
}

impl<C: Compressor> ChannelLayoutCodec for CompressedLayoutCodec<C> {
    fn serialize(&self, layout: &AudioChannelLayout) -> MediaRingResult<Vec<u8>> {
        let raw = encode_raw(layout)?;
        let packed = self.compressor.compress_to_vec(&raw)?;
        let mut blob = Vec::with_capacity(4 + packed.len());
        blob.extend_from_slice(&(raw.len() as u32).to_le_bytes());
        blob.extend_from_slice(&packed);
        Ok(blob)
    }

    fn parse(&self, blob: &[u8]) -> MediaRingResult<AudioChannelLayout> {
        let (len_bytes, packed) = blob
            .split_first_chunk::<4>()
            .ok_or_else(|| MediaRingError::codec("channel layout blob truncated"))?;
        let raw_len = u32::from_le_bytes(*len_bytes) as usize;
        if raw_len > MAX_RAW_LEN {
            return Err(MediaRingError::codec(format!(
                "channel layout claims {} raw bytes",
                raw_len
            )));
        }
        let mut raw = vec![0u8; raw_len];
        let n = self.compressor.uncompress(packed, &mut raw)?;
        decode_raw(&raw[..n])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordered_layout_roundtrip() {
        let codec = CompressedLayoutCodec::<ZlibCodec>::default();
        let layout = AudioChannelLayout::with_order(vec![
            ChannelPosition::FrontCenter,
            ChannelPosition::FrontLeft,
            ChannelPosition::FrontRight,
            ChannelPosition::LowFrequency,
        ]);
        let blob = codec.serialize(&layout).unwrap();
        assert_eq!(codec.parse(&blob).unwrap(), layout);
    }

    #[test]
    fn mask_only_layout_roundtrip() {
        let codec = CompressedLayoutCodec::new(ZlibCodec::with_level(1));
        let layout = AudioChannelLayout::from_mask(AudioChannelLayout::SURROUND_5_1);
        assert_eq!(codec.parse(&codec.serialize(&layout).unwrap()).unwrap(), layout);
    }

    #[test]
    fn rejects_garbage() {
        let codec = CompressedLayoutCodec::<ZlibCodec>::default();
        assert!(codec.parse(&[1, 2]).is_err());
        assert!(codec.parse(&[0xff, 0xff, 0xff, 0x7f, 0]).is_err());
        assert!(decode_raw(&[9; RAW_HEADER]).is_err());
        let mut raw = encode_raw(&AudioChannelLayout::stereo()).unwrap();
        raw[2] = 3;
        assert!(decode_raw(&raw).is_err());
    }
}

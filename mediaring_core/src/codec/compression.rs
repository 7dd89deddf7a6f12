//! Buffer compression used by the channel-layout serializer.

use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress, Status};

use crate::error::{MediaRingError, MediaRingResult};

/// Whole-buffer compressor.
///
/// Destinations are caller-sized: [`Compressor::estimate_bound`] gives the
/// worst-case compressed length of `src_len` input bytes.
pub trait Compressor: Send + Sync {
    fn estimate_bound(&self, src_len: usize) -> usize;

    /// Compress `src` into `dst`; returns the number of bytes written.
    fn compress(&self, src: &[u8], dst: &mut [u8]) -> MediaRingResult<usize>;

    /// Inflate `src` into `dst`; returns the number of bytes written.
    fn uncompress(&self, src: &[u8], dst: &mut [u8]) -> MediaRingResult<usize>;

    fn compress_to_vec(&self, src: &[u8]) -> MediaRingResult<Vec<u8>> {
        let mut dst = vec![0u8; self.estimate_bound(src.len())];
        let n = self.compress(src, &mut dst)?;
        dst.truncate(n);
        Ok(dst)
    }
}

/// zlib stream format through `flate2`.
#[derive(Debug, Clone, Copy)]
pub struct ZlibCodec {
    level: Compression,
}

impl Default for ZlibCodec {
    fn default() -> Self {
        Self {
            level: Compression::default(),
        }
    }
}

impl ZlibCodec {
    /// `level` is clamped to 0..=9.
    pub fn with_level(level: u32) -> Self {
        Self {
            level: Compression::new(level.min(9)),
        }
    }
}

impl Compressor for ZlibCodec {
    fn estimate_bound(&self, src_len: usize) -> usize {
        // zlib compressBound plus room for the stream header
        src_len + (src_len >> 12) + (src_len >> 14) + (src_len >> 25) + 13 + 6
    }

    fn compress(&self, src: &[u8], dst: &mut [u8]) -> MediaRingResult<usize> {
        let mut z = Compress::new(self.level, true);
        match z.compress(src, dst, FlushCompress::Finish) {
            Ok(Status::StreamEnd) => Ok(z.total_out() as usize),
            Ok(_) => Err(MediaRingError::codec(format!(
                "compressed output of {} bytes does not fit {} bytes",
                src.len(),
                dst.len()
            ))),
            Err(e) => Err(MediaRingError::codec(format!("zlib compress: {}", e))),
        }
    }

    fn uncompress(&self, src: &[u8], dst: &mut [u8]) -> MediaRingResult<usize> {
        let mut z = Decompress::new(true);
        match z.decompress(src, dst, FlushDecompress::Finish) {
            Ok(Status::StreamEnd) => Ok(z.total_out() as usize),
            Ok(_) => Err(MediaRingError::codec(format!(
                "inflated stream does not fit {} bytes or is truncated",
                dst.len()
            ))),
            Err(e) => Err(MediaRingError::codec(format!("zlib uncompress: {}", e))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zlib_roundtrip() {
        let codec = ZlibCodec::default();
        let src: Vec<u8> = (0..4096u32).map(|i| (i % 7) as u8).collect();
        let packed = codec.compress_to_vec(&src).unwrap();
        assert!(packed.len() < src.len());

        let mut out = vec![0u8; src.len()];
        let n = codec.uncompress(&packed, &mut out).unwrap();
        assert_eq!(&out[..n], &src[..]);
    }

    #[test]
    fn bound_fits_incompressible_input() {
        let codec = ZlibCodec::with_level(9);
        let mut state = 0x1234_5678u32;
        let src: Vec<u8> = (0..1000)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 17;
                state ^= state << 5;
                state as u8
            })
            .collect();
        let packed = codec.compress_to_vec(&src).unwrap();
        assert!(packed.len() <= codec.estimate_bound(src.len()));
    }

    #[test]
    fn short_destination_is_an_error() {
        let codec = ZlibCodec::default();
        let packed = codec.compress_to_vec(b"abcabcabcabcabcabc").unwrap();
        let mut out = [0u8; 4];
        assert!(matches!(
            codec.uncompress(&packed, &mut out),
            Err(MediaRingError::Codec(_))
        ));
        assert!(codec.uncompress(b"not zlib", &mut [0u8; 64]).is_err());
    }
}

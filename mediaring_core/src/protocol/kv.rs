//! Key-value area at the end of a current-version slot.
//!
//! A run of `{ key: u32, len: u32, value: [u8; len] }` records, little-endian.

use crate::error::{MediaRingError, MediaRingResult};

/// Serialized audio channel layout.
pub const KEY_CHANNEL_LAYOUT: u32 = 1;

const RECORD_HEADER: usize = 8;

pub fn encoded_len(entries: &[(u32, &[u8])]) -> usize {
    entries.iter().map(|(_, v)| RECORD_HEADER + v.len()).sum()
}

/// Write `entries` into `dst`; returns the bytes written.
pub fn write(entries: &[(u32, &[u8])], dst: &mut [u8]) -> MediaRingResult<usize> {
    let need = encoded_len(entries);
    if need > dst.len() {
        return Err(MediaRingError::invalid_input(format!(
            "key-value area needs {} bytes, {} available",
            need,
            dst.len()
        )));
    }
    let mut at = 0;
    for (key, value) in entries {
        let len = u32::try_from(value.len())?;
        dst[at..at + 4].copy_from_slice(&key.to_le_bytes());
        dst[at + 4..at + 8].copy_from_slice(&len.to_le_bytes());
        at += RECORD_HEADER;
        dst[at..at + value.len()].copy_from_slice(value);
        at += value.len();
    }
    Ok(at)
}

/// Iterate the records of a key-value area.
pub fn records(area: &[u8]) -> Records<'_> {
    Records { rest: area }
}

pub struct Records<'a> {
    rest: &'a [u8],
}

impl<'a> Iterator for Records<'a> {
    type Item = MediaRingResult<(u32, &'a [u8])>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.rest.is_empty() {
            return None;
        }
        let Some((head, tail)) = self.rest.split_first_chunk::<RECORD_HEADER>() else {
            self.rest = &[];
            return Some(Err(MediaRingError::corrupt(
                "item slot",
                "truncated key-value record",
            )));
        };
        let key = u32::from_le_bytes([head[0], head[1], head[2], head[3]]);
        let len = u32::from_le_bytes([head[4], head[5], head[6], head[7]]) as usize;
        if len > tail.len() {
            self.rest = &[];
            return Some(Err(MediaRingError::corrupt(
                "item slot",
                format!("key-value record {} claims {} bytes", key, len),
            )));
        }
        let (value, rest) = tail.split_at(len);
        self.rest = rest;
        Some(Ok((key, value)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_roundtrip() {
        let entries: [(u32, &[u8]); 2] = [(KEY_CHANNEL_LAYOUT, b"layout"), (7, b"")];
        let mut buf = vec![0u8; encoded_len(&entries)];
        assert_eq!(write(&entries, &mut buf).unwrap(), 22);
        let back: Vec<_> = records(&buf).collect::<MediaRingResult<_>>().unwrap();
        assert_eq!(back, vec![(1, &b"layout"[..]), (7, &b""[..])]);
    }

    #[test]
    fn truncated_record_is_reported_once() {
        let mut buf = vec![0u8; 14];
        write(&[(1, b"abcdef")], &mut buf).unwrap();
        let mut it = records(&buf[..10]);
        assert!(it.next().unwrap().is_err());
        assert!(it.next().is_none());
        assert!(write(&[(1, b"abcdef")], &mut buf[..8]).is_err());
    }
}

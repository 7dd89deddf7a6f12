//! Shared head regions of the item channels.
//!
//! ```text
//! fixed-item segment:
//! | LegacyHead (64) | HeadExt (64) | caller header | pad | slot 0 | slot 1 | ...
//! slot: | SlotHeader (16) | item_length bytes, word aligned |
//!
//! ring fixed user area:
//! | VarHead (128) | caller header |
//! ```
//!
//! Every field is atomic. The writer stamps geometry first and `version`
//! last with Release; readers trust nothing else until they load a non-zero
//! version with Acquire.

use std::sync::atomic::{fence, AtomicU32, AtomicU64, Ordering};

use mediaring_types::MediaHeadRaw;

use crate::memory::platform::{align_up, WORD};

/// Version stamped into the head of a fixed-item segment.
pub const ITEM_CHANNEL_VERSION: u32 = 0x0001_0000;

/// Layout version of [`HeadExt`].
pub const HEAD_EXT_VERSION: u32 = 1;

/// Byte offset of [`HeadExt`] from the segment start.
pub const HEAD_EXT_OFFSET: usize = 64;

/// Head plus extension block.
pub const HEAD_REGION_SIZE: usize = HEAD_EXT_OFFSET + std::mem::size_of::<HeadExt>();

/// Alignment of the first slot.
pub const SLOT_ALIGN: usize = 64;

#[repr(C)]
pub(crate) struct LegacyHead {
    pub version: AtomicU32,
    pub header_len: AtomicU32,
    pub item_count: AtomicU32,
    pub item_length: AtomicU32,
    /// Low 32 bits of the write cursor.
    pub item_current: AtomicU32,
    pub item_offset: AtomicU32,
    _reserved: [AtomicU32; 10],
}

const _: () = assert!(std::mem::size_of::<LegacyHead>() == HEAD_EXT_OFFSET);

#[repr(C)]
pub(crate) struct HeadExt {
    pub ext_ver: AtomicU32,
    pub ext_len: AtomicU32,
    /// Monotonic write cursor.
    pub item_current_64: AtomicU64,
    /// Reader heartbeat, epoch milliseconds, 0 = never.
    pub last_read_time_stamp: AtomicU64,
    pub close_flag: AtomicU32,
    _pad: AtomicU32,
    _reserved: [AtomicU64; 4],
}

const _: () = assert!(std::mem::size_of::<HeadExt>() == 64);

/// Per-slot sequence word of a fixed-item slot.
///
/// `seq` is `2c + 1` while item `c` is being written and `2c + 2` once it is
/// complete.
#[repr(C)]
pub(crate) struct SlotHeader {
    pub seq: AtomicU64,
    pub len: AtomicU64,
}

pub(crate) const SLOT_HEADER_SIZE: usize = std::mem::size_of::<SlotHeader>();

impl SlotHeader {
    #[inline]
    pub fn writing(cursor: u64) -> u64 {
        cursor.wrapping_mul(2).wrapping_add(1)
    }

    #[inline]
    pub fn complete(cursor: u64) -> u64 {
        cursor.wrapping_mul(2).wrapping_add(2)
    }
}

/// Geometry of a fixed-item segment, copied out of the head.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedGeometry {
    pub header_len: usize,
    pub item_count: usize,
    pub item_length: usize,
    pub item_offset: usize,
}

impl FixedGeometry {
    pub fn compute(header_len: usize, item_count: usize, item_length: usize) -> Self {
        Self {
            header_len,
            item_count,
            item_length,
            item_offset: align_up(HEAD_REGION_SIZE + header_len, SLOT_ALIGN),
        }
    }

    #[inline]
    pub fn slot_stride(&self) -> usize {
        SLOT_HEADER_SIZE + align_up(self.item_length, WORD)
    }

    pub fn total_size(&self) -> Option<usize> {
        self.item_count
            .checked_mul(self.slot_stride())?
            .checked_add(self.item_offset)
    }

    #[inline]
    pub fn slot_offset(&self, cursor: u64) -> usize {
        self.item_offset + (cursor % self.item_count as u64) as usize * self.slot_stride()
    }

    /// Check a geometry read back from shared memory against the mapping.
    pub fn check(&self, mapped_len: usize) -> Result<(), String> {
        if self.item_count == 0 || self.item_length == 0 {
            return Err(format!(
                "empty geometry: {} items of {} bytes",
                self.item_count, self.item_length
            ));
        }
        if self.item_offset < HEAD_REGION_SIZE + self.header_len || self.item_offset % WORD != 0 {
            return Err(format!(
                "item offset {} overlaps the {} byte header",
                self.item_offset,
                HEAD_REGION_SIZE + self.header_len
            ));
        }
        match self.total_size() {
            Some(total) if total <= mapped_len => Ok(()),
            _ => Err(format!(
                "{} items of {} bytes at {} exceed the {} byte mapping",
                self.item_count, self.item_length, self.item_offset, mapped_len
            )),
        }
    }
}

impl LegacyHead {
    pub fn geometry(&self) -> FixedGeometry {
        FixedGeometry {
            header_len: self.header_len.load(Ordering::Acquire) as usize,
            item_count: self.item_count.load(Ordering::Acquire) as usize,
            item_length: self.item_length.load(Ordering::Acquire) as usize,
            item_offset: self.item_offset.load(Ordering::Acquire) as usize,
        }
    }

    /// Stamp geometry, then the version.
    pub fn stamp(&self, ext: &HeadExt, geometry: &FixedGeometry) {
        self.header_len
            .store(geometry.header_len as u32, Ordering::Relaxed);
        self.item_count
            .store(geometry.item_count as u32, Ordering::Relaxed);
        self.item_length
            .store(geometry.item_length as u32, Ordering::Relaxed);
        self.item_offset
            .store(geometry.item_offset as u32, Ordering::Relaxed);
        self.item_current.store(0, Ordering::Relaxed);
        ext.ext_len
            .store(std::mem::size_of::<HeadExt>() as u32, Ordering::Relaxed);
        ext.item_current_64.store(0, Ordering::Relaxed);
        ext.last_read_time_stamp.store(0, Ordering::Relaxed);
        ext.close_flag.store(0, Ordering::Relaxed);
        ext.ext_ver.store(HEAD_EXT_VERSION, Ordering::Relaxed);
        self.version.store(ITEM_CHANNEL_VERSION, Ordering::Release);
    }
}

/// Head of a ring-based item channel, at the start of the ring's fixed user
/// area.
#[repr(C)]
pub(crate) struct VarHead {
    /// Item protocol version, 0 until stamped.
    pub version: AtomicU32,
    pub close_flag: AtomicU32,
    pub last_read_time_stamp: AtomicU64,
    pub item_count: AtomicU32,
    pub item_length: AtomicU32,
    /// Seqlock word guarding `media_head`; odd while a store is in flight.
    pub media_seq: AtomicU64,
    pub media_head: [AtomicU64; MEDIA_HEAD_WORDS],
    _reserved: [AtomicU64; 4],
}

const MEDIA_HEAD_WORDS: usize = MediaHeadRaw::SIZE / 8;

pub(crate) const VAR_HEAD_SIZE: usize = std::mem::size_of::<VarHead>();

const _: () = assert!(VAR_HEAD_SIZE == 128);

/// Attempts before a contended media-head load gives up.
const SEQLOCK_TRIES: u32 = 64;

impl VarHead {
    /// Publish a new stream head. Writer only.
    pub fn store_media_head(&self, head: &MediaHeadRaw) {
        let words: [u64; MEDIA_HEAD_WORDS] = bytemuck::cast(*head);
        let seq = self.media_seq.load(Ordering::Relaxed);
        self.media_seq.store(seq.wrapping_add(1), Ordering::Relaxed);
        fence(Ordering::Release);
        for (slot, word) in self.media_head.iter().zip(words) {
            slot.store(word, Ordering::Relaxed);
        }
        self.media_seq.store(seq.wrapping_add(2), Ordering::Release);
    }

    /// Load a consistent copy, `None` if never stored or persistently
    /// contended.
    pub fn load_media_head(&self) -> Option<MediaHeadRaw> {
        for _ in 0..SEQLOCK_TRIES {
            let before = self.media_seq.load(Ordering::Acquire);
            if before == 0 {
                return None;
            }
            if before % 2 == 1 {
                std::hint::spin_loop();
                continue;
            }
            let mut words = [0u64; MEDIA_HEAD_WORDS];
            for (word, slot) in words.iter_mut().zip(&self.media_head) {
                *word = slot.load(Ordering::Relaxed);
            }
            fence(Ordering::Acquire);
            if self.media_seq.load(Ordering::Relaxed) == before {
                return Some(bytemuck::cast(words));
            }
        }
        None
    }
}

/// Refresh a heartbeat word; readers race on it, last writer wins.
#[inline]
pub(crate) fn touch(stamp: &AtomicU64, now_ms: u64) {
    stamp.store(now_ms.max(1), Ordering::Relaxed);
}

/// Whether a heartbeat is younger than `timeout_ms`.
#[inline]
pub(crate) fn is_fresh(stamp: &AtomicU64, now_ms: u64, timeout_ms: u64) -> bool {
    let last = stamp.load(Ordering::Relaxed);
    last != 0 && now_ms.saturating_sub(last) <= timeout_ms
}

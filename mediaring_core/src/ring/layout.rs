//! Byte layout of a ring segment.
//!
//! ```text
//! +-----------------+ 0
//! | ControlBlock    |   magic, geometry, published cursors (192 bytes)
//! +-----------------+ fixed_user_offset
//! | fixed user area |   caller-owned, e.g. the item channel head
//! +-----------------+ index_offset
//! | IndexEntry × n  |   one per physical slot (32 bytes each)
//! +-----------------+ payload_offset
//! | payload arena   |   circular, word-aligned spans
//! +-----------------+ total_size
//! ```
//!
//! Every offset and size is a `u64` so the layout is identical for 32- and
//! 64-bit processes sharing the segment.

use bytemuck::{Pod, Zeroable};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::memory::platform::{align_up, WORD};

/// Format tag at the start of every ring segment.
pub const MAGIC: [u8; 16] = *b"MEDIARING-RING01";

/// Current control block sub-version: adds `flags` and `commit_count`.
pub const SUB_VERSION: u64 = 1;

pub const FLAG_INACTIVE: u64 = 1 << 0;
pub const FLAG_REQUESTED: u64 = 1 << 1;

/// Shared control block. Every field is atomic because the block lives in
/// memory mapped by several processes.
#[repr(C)]
pub struct ControlBlock {
    pub(crate) magic: [AtomicU64; 2],
    pub(crate) control_size: AtomicU64,
    pub(crate) total_size: AtomicU64,
    pub(crate) fixed_user_offset: AtomicU64,
    pub(crate) fixed_user_size: AtomicU64,
    pub(crate) index_offset: AtomicU64,
    pub(crate) index_size: AtomicU64,
    pub(crate) max_items: AtomicU64,
    pub(crate) max_item_index: AtomicU64,
    pub(crate) index_item_size: AtomicU64,
    pub(crate) payload_offset: AtomicU64,
    pub(crate) payload_size: AtomicU64,
    pub(crate) next_free_item_index: AtomicU64,
    pub(crate) last_filled_item_index: AtomicU64,
    pub(crate) next_free_payload_offset: AtomicU64,
    pub(crate) item_index_checksum: AtomicU64,
    pub(crate) sub_version: AtomicU64,
    pub(crate) flags: AtomicU64,
    pub(crate) commit_count: AtomicU64,
    /// Oldest index whose entry and payload are still intact. The writer
    /// advances it before reusing arena bytes or index slots.
    pub(crate) oldest_live_index: AtomicU64,
    _reserved: [AtomicU64; 3],
}

pub const CONTROL_SIZE: usize = std::mem::size_of::<ControlBlock>();

const _: () = assert!(CONTROL_SIZE == 192);

/// Magic split into the two words stored in the control block.
pub(crate) fn magic_words() -> [u64; 2] {
    let mut lo = [0u8; 8];
    let mut hi = [0u8; 8];
    lo.copy_from_slice(&MAGIC[..8]);
    hi.copy_from_slice(&MAGIC[8..]);
    [u64::from_ne_bytes(lo), u64::from_ne_bytes(hi)]
}

impl ControlBlock {
    /// Whether the magic has been published. The first word is stored last
    /// by the creator, so it is loaded first here.
    pub(crate) fn has_magic(&self) -> bool {
        let [lo, hi] = magic_words();
        self.magic[0].load(Ordering::Acquire) == lo && self.magic[1].load(Ordering::Relaxed) == hi
    }

    pub(crate) fn publish_magic(&self) {
        let [lo, hi] = magic_words();
        self.magic[1].store(hi, Ordering::Relaxed);
        self.magic[0].store(lo, Ordering::Release);
    }

    pub(crate) fn is_blank(&self) -> bool {
        self.magic[0].load(Ordering::Acquire) == 0 && self.magic[1].load(Ordering::Relaxed) == 0
    }

    /// Snapshot of the geometry words.
    pub fn geometry(&self) -> RingLayout {
        RingLayout {
            control_size: self.control_size.load(Ordering::Relaxed),
            total_size: self.total_size.load(Ordering::Relaxed),
            fixed_user_offset: self.fixed_user_offset.load(Ordering::Relaxed),
            fixed_user_size: self.fixed_user_size.load(Ordering::Relaxed),
            index_offset: self.index_offset.load(Ordering::Relaxed),
            index_size: self.index_size.load(Ordering::Relaxed),
            max_items: self.max_items.load(Ordering::Relaxed),
            max_item_index: self.max_item_index.load(Ordering::Relaxed),
            index_item_size: self.index_item_size.load(Ordering::Relaxed),
            payload_offset: self.payload_offset.load(Ordering::Relaxed),
            payload_size: self.payload_size.load(Ordering::Relaxed),
        }
    }

    /// Stamp geometry and empty cursors. Magic is published separately.
    pub(crate) fn stamp(&self, layout: &RingLayout) {
        self.control_size.store(layout.control_size, Ordering::Relaxed);
        self.total_size.store(layout.total_size, Ordering::Relaxed);
        self.fixed_user_offset
            .store(layout.fixed_user_offset, Ordering::Relaxed);
        self.fixed_user_size
            .store(layout.fixed_user_size, Ordering::Relaxed);
        self.index_offset.store(layout.index_offset, Ordering::Relaxed);
        self.index_size.store(layout.index_size, Ordering::Relaxed);
        self.max_items.store(layout.max_items, Ordering::Relaxed);
        self.max_item_index
            .store(layout.max_item_index, Ordering::Relaxed);
        self.index_item_size
            .store(layout.index_item_size, Ordering::Relaxed);
        self.payload_offset
            .store(layout.payload_offset, Ordering::Relaxed);
        self.payload_size.store(layout.payload_size, Ordering::Relaxed);

        let last_filled = layout.max_item_index - 1;
        self.next_free_item_index.store(0, Ordering::Relaxed);
        self.last_filled_item_index
            .store(last_filled, Ordering::Relaxed);
        self.next_free_payload_offset.store(0, Ordering::Relaxed);
        self.item_index_checksum.store(last_filled, Ordering::Relaxed);
        self.sub_version.store(SUB_VERSION, Ordering::Relaxed);
        self.flags.store(0, Ordering::Relaxed);
        self.commit_count.store(0, Ordering::Relaxed);
        self.oldest_live_index.store(0, Ordering::Relaxed);
    }

    /// Published cursors, `None` when caught mid-update.
    pub(crate) fn cursors(&self) -> Option<Cursors> {
        let next_free = self.next_free_item_index.load(Ordering::Acquire);
        let last_filled = self.last_filled_item_index.load(Ordering::Acquire);
        let checksum = self.item_index_checksum.load(Ordering::Acquire);
        (checksum == next_free.wrapping_add(last_filled)).then_some(Cursors {
            next_free,
            last_filled,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Cursors {
    pub next_free: u64,
    pub last_filled: u64,
}

/// One slot of the index table.
#[repr(C)]
pub struct IndexEntry {
    pub(crate) index: AtomicU64,
    pub(crate) offset: AtomicU64,
    pub(crate) size: AtomicU64,
    pub(crate) checksum: AtomicU64,
}

pub const INDEX_ENTRY_SIZE: usize = std::mem::size_of::<IndexEntry>();

const _: () = assert!(INDEX_ENTRY_SIZE == 32);

impl IndexEntry {
    /// Publish `(index, offset, size)`; the checksum goes last.
    pub(crate) fn publish(&self, index: u64, offset: u64, size: u64) {
        self.index.store(index, Ordering::Relaxed);
        self.offset.store(offset, Ordering::Relaxed);
        self.size.store(size, Ordering::Relaxed);
        self.checksum.store(
            index.wrapping_add(offset).wrapping_add(size),
            Ordering::Release,
        );
    }

    pub fn snapshot(&self) -> IndexEntryRaw {
        let checksum = self.checksum.load(Ordering::Acquire);
        IndexEntryRaw {
            index: self.index.load(Ordering::Acquire),
            offset: self.offset.load(Ordering::Acquire),
            size: self.size.load(Ordering::Acquire),
            checksum,
        }
    }
}

/// Plain copy of an index entry.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct IndexEntryRaw {
    pub index: u64,
    pub offset: u64,
    pub size: u64,
    pub checksum: u64,
}

impl IndexEntryRaw {
    #[inline]
    pub fn is_consistent(&self) -> bool {
        self.checksum == self.index.wrapping_add(self.offset).wrapping_add(self.size)
    }
}

/// Whether `pos` lies in the live window `[oldest, next_free)` of an index
/// space of `max_item_index` positions.
pub(crate) fn in_live_window(pos: u64, oldest: u64, next_free: u64, max_item_index: u64) -> bool {
    let live = (next_free + max_item_index - oldest) % max_item_index;
    (pos + max_item_index - oldest) % max_item_index < live
}

/// Ring geometry, all offsets relative to the segment start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingLayout {
    pub control_size: u64,
    pub total_size: u64,
    pub fixed_user_offset: u64,
    pub fixed_user_size: u64,
    pub index_offset: u64,
    pub index_size: u64,
    pub max_items: u64,
    pub max_item_index: u64,
    pub index_item_size: u64,
    pub payload_offset: u64,
    pub payload_size: u64,
}

impl RingLayout {
    /// Compute the word-aligned geometry for a new ring.
    pub fn compute(fixed_user_size: usize, payload_size: usize, max_items: usize) -> Self {
        let fixed_user_offset = CONTROL_SIZE;
        let fixed_user_size = align_up(fixed_user_size, WORD);
        let index_offset = fixed_user_offset + fixed_user_size;
        let index_size = max_items * INDEX_ENTRY_SIZE;
        let payload_offset = index_offset + index_size;
        let payload_size = align_up(payload_size, WORD);
        Self {
            control_size: CONTROL_SIZE as u64,
            total_size: (payload_offset + payload_size) as u64,
            fixed_user_offset: fixed_user_offset as u64,
            fixed_user_size: fixed_user_size as u64,
            index_offset: index_offset as u64,
            index_size: index_size as u64,
            max_items: max_items as u64,
            max_item_index: 2 * max_items as u64,
            index_item_size: INDEX_ENTRY_SIZE as u64,
            payload_offset: payload_offset as u64,
            payload_size: payload_size as u64,
        }
    }

    /// Check internal consistency against the mapped length. Returns the
    /// first violation found.
    pub fn check(&self, mapped_len: usize) -> Result<(), String> {
        let word = WORD as u64;
        if self.control_size != CONTROL_SIZE as u64 {
            return Err(format!(
                "control size {} (expected {})",
                self.control_size, CONTROL_SIZE
            ));
        }
        if self.total_size > mapped_len as u64 {
            return Err(format!(
                "total size {} exceeds mapping of {} bytes",
                self.total_size, mapped_len
            ));
        }
        if self.max_items <= 1 || self.max_item_index <= 1 {
            return Err(format!(
                "max_items {} / max_item_index {}",
                self.max_items, self.max_item_index
            ));
        }
        if self.max_item_index != self.max_items.saturating_mul(2) {
            return Err(format!(
                "max_item_index {} is not twice max_items {}",
                self.max_item_index, self.max_items
            ));
        }
        if self.index_item_size != INDEX_ENTRY_SIZE as u64 {
            return Err(format!("index item size {}", self.index_item_size));
        }
        if self.fixed_user_offset < self.control_size {
            return Err("fixed user area overlaps the control block".to_string());
        }
        let ordered = [
            (self.fixed_user_offset, self.fixed_user_size, self.index_offset, "fixed user area"),
            (self.index_offset, self.index_size, self.payload_offset, "index table"),
            (self.payload_offset, self.payload_size, self.total_size, "payload arena"),
        ];
        for (offset, size, limit, what) in ordered {
            match offset.checked_add(size) {
                Some(end) if end <= limit => {}
                _ => {
                    return Err(format!(
                        "{} [{}+{}] runs past {}",
                        what, offset, size, limit
                    ))
                }
            }
            if offset % word != 0 {
                return Err(format!("{} offset {} is not word aligned", what, offset));
            }
        }
        if self.index_size < self.max_items.saturating_mul(self.index_item_size) {
            return Err(format!(
                "index table of {} bytes cannot hold {} entries",
                self.index_size, self.max_items
            ));
        }
        if self.payload_size == 0 {
            return Err("empty payload arena".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compute_orders_regions() {
        let layout = RingLayout::compute(13, 4095, 8);
        assert_eq!(layout.fixed_user_offset, 192);
        assert_eq!(layout.fixed_user_size, align_up(13, WORD) as u64);
        assert_eq!(layout.index_offset, 192 + layout.fixed_user_size);
        assert_eq!(layout.index_size, 8 * 32);
        assert_eq!(layout.payload_offset, layout.index_offset + 256);
        assert_eq!(layout.payload_size, 4096);
        assert_eq!(layout.max_item_index, 16);
        layout.check(layout.total_size as usize).unwrap();
    }

    #[test]
    fn check_rejects_inconsistent_geometry() {
        let good = RingLayout::compute(0, 1024, 4);
        assert!(good.check(good.total_size as usize - 1).is_err());

        let mut bad = good;
        bad.max_items = 1;
        bad.max_item_index = 2;
        assert!(bad.check(4096).is_err());

        let mut bad = good;
        bad.index_offset = bad.payload_offset + 8;
        assert!(bad.check(4096).is_err());

        let mut bad = good;
        bad.max_item_index = 7;
        assert!(bad.check(4096).is_err());

        let mut bad = good;
        bad.payload_size = u64::MAX;
        assert!(bad.check(usize::MAX).is_err());
    }

    #[test]
    fn magic_words_keep_byte_order() {
        let [lo, hi] = magic_words();
        let mut bytes = [0u8; 16];
        bytes[..8].copy_from_slice(&lo.to_ne_bytes());
        bytes[8..].copy_from_slice(&hi.to_ne_bytes());
        assert_eq!(&bytes, &MAGIC);
    }

    #[test]
    fn entry_consistency() {
        let entry = IndexEntryRaw {
            index: 3,
            offset: 64,
            size: 9,
            checksum: 76,
        };
        assert!(entry.is_consistent());
        assert!(!IndexEntryRaw { size: 10, ..entry }.is_consistent());
        assert!(!IndexEntryRaw { index: 4, ..entry }.is_consistent());
        assert!(!IndexEntryRaw { offset: 72, ..entry }.is_consistent());
    }

    #[test]
    fn live_window_wraps_the_index_space() {
        assert!(!in_live_window(0, 0, 0, 8));
        assert!(in_live_window(0, 0, 1, 8));
        assert!(!in_live_window(1, 0, 1, 8));
        assert!(in_live_window(7, 6, 2, 8));
        assert!(in_live_window(1, 6, 2, 8));
        assert!(!in_live_window(2, 6, 2, 8));
        assert!(!in_live_window(5, 6, 2, 8));
    }
}

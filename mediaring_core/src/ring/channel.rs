//! Single-writer / multi-reader ring over one [`Segment`].
//!
//! The writer reserves span in the payload arena with [`RingChannel::apply`],
//! fills it, and publishes it with [`RingChannel::commit`]. Publication writes
//! the index entry first and the control cursors last, so a reader that sees
//! a write index also sees the entry and payload behind it. Readers keep
//! their cursor in process memory and re-verify the entry checksum on every
//! read; a torn or stale entry reads as "not readable yet".

use std::ops::Range;
use std::sync::atomic::Ordering;
use std::time::Duration;

use crate::error::{MediaRingError, MediaRingResult};
use crate::memory::platform::{align_up, WORD};
use crate::memory::{DefaultBackend, Segment};
use crate::{mr_log, mr_log_limited};
use crate::ring::layout::{
    in_live_window, ControlBlock, IndexEntry, IndexEntryRaw, RingLayout, CONTROL_SIZE,
    FLAG_INACTIVE, FLAG_REQUESTED, INDEX_ENTRY_SIZE,
};

/// Tries while waiting for a racing creator to publish the magic.
const MAGIC_WAIT_TRIES: u32 = 100;
const MAGIC_WAIT_SLEEP: Duration = Duration::from_millis(1);

/// Handle lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RingState {
    Closed,
    Created,
    Opened,
    /// At least one apply or read happened.
    Active,
}

/// Reader cursor, local to this handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadCursor {
    At(u64),
    /// Jump to the write index on the next read.
    Latest,
}

/// Cursor repositioning targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekTo {
    /// Logical index 0.
    Zero,
    /// The write index, resolved lazily on the next read.
    Write,
    /// The oldest item not yet overwritten.
    Oldest,
    Index(u64),
}

/// Whether the payload of `entry` intersects `span` of the arena.
fn overlaps(entry: &IndexEntryRaw, span: &Range<u64>) -> bool {
    entry.offset < span.end && span.start < entry.offset.saturating_add(entry.size)
}

#[derive(Debug, Clone, Copy)]
struct Applied {
    offset: u64,
    capacity: u64,
}

/// Ring channel handle.
#[derive(Debug)]
pub struct RingChannel {
    segment: Segment,
    layout: RingLayout,
    state: RingState,
    writer: bool,
    cursor: ReadCursor,
    applied: Option<Applied>,
}

impl RingChannel {
    /// Create the ring, or reuse a same-named one.
    ///
    /// A fresh segment is stamped with the geometry computed from the
    /// arguments. A reused one is validated and keeps its own geometry; if
    /// it is smaller than requested this only warns.
    pub fn create(
        name: &str,
        fixed_user_size: usize,
        payload_size: usize,
        max_items: usize,
        mode: u32,
    ) -> MediaRingResult<Self> {
        if max_items < 2 {
            return Err(MediaRingError::config(format!(
                "ring '{}': max_items must be at least 2, got {}",
                name, max_items
            )));
        }
        if payload_size == 0 {
            return Err(MediaRingError::config(format!(
                "ring '{}': payload size must be non-zero",
                name
            )));
        }
        let requested = RingLayout::compute(fixed_user_size, payload_size, max_items);
        let total = usize::try_from(requested.total_size)?;
        let (segment, is_new) = Segment::<DefaultBackend>::create(name, total, mode)?;

        let mut ring = Self {
            segment,
            layout: requested,
            state: RingState::Created,
            writer: true,
            cursor: ReadCursor::At(0),
            applied: None,
        };

        if is_new {
            let control = ring.control().ok_or_else(|| {
                MediaRingError::corrupt(name, "fresh segment smaller than a control block")
            })?;
            control.stamp(&requested);
            control.publish_magic();
            mr_log!(
                Info,
                "Created ring '{}': {} items, {} payload bytes, {} fixed user bytes ({} total)",
                name,
                requested.max_items,
                requested.payload_size,
                requested.fixed_user_size,
                requested.total_size
            );
        } else {
            ring.wait_for_magic()?;
            let existing = ring.validate()?;
            if existing.payload_size < requested.payload_size
                || existing.max_items < requested.max_items
                || existing.fixed_user_size < requested.fixed_user_size
            {
                mr_log_limited!(
                    Warn,
                    "ring '{}' reused with smaller geometry: {} items / {} payload / {} user bytes, requested {} / {} / {}",
                    name,
                    existing.max_items,
                    existing.payload_size,
                    existing.fixed_user_size,
                    requested.max_items,
                    requested.payload_size,
                    requested.fixed_user_size
                );
            }
            ring.layout = existing;
            log::debug!("Reused ring '{}' ({} items)", name, existing.max_items);
        }
        Ok(ring)
    }

    /// Open an existing ring as a reader. The cursor starts at the current
    /// write index.
    pub fn open(name: &str) -> MediaRingResult<Self> {
        let segment = Segment::<DefaultBackend>::open(name)?;
        let mut ring = Self {
            segment,
            layout: RingLayout::compute(0, WORD, 2),
            state: RingState::Opened,
            writer: false,
            cursor: ReadCursor::At(0),
            applied: None,
        };
        ring.wait_for_magic()?;
        ring.layout = ring.validate()?;
        ring.cursor = ReadCursor::At(ring.write_index());
        log::debug!(
            "Opened ring '{}' ({} items, write index {})",
            name,
            ring.layout.max_items,
            ring.write_index()
        );
        Ok(ring)
    }

    fn control(&self) -> Option<&ControlBlock> {
        if self.segment.size() < CONTROL_SIZE {
            return None;
        }
        let base = self.segment.bytes()?;
        // SAFETY: the mapping is page aligned and holds at least CONTROL_SIZE bytes;
        // every field is atomic so shared access from other processes is sound
        Some(unsafe { &*(base.as_ptr() as *const ControlBlock) })
    }

    fn closed(&self) -> MediaRingError {
        MediaRingError::invalid_input(format!("ring '{}' is closed", self.segment.name()))
    }

    fn wait_for_magic(&self) -> MediaRingResult<()> {
        let name = self.segment.name();
        let control = self
            .control()
            .ok_or_else(|| MediaRingError::corrupt(name, "segment smaller than a control block"))?;
        for _ in 0..MAGIC_WAIT_TRIES {
            if control.has_magic() {
                return Ok(());
            }
            if !control.is_blank() {
                return Err(MediaRingError::corrupt(name, "magic code mismatch"));
            }
            std::thread::sleep(MAGIC_WAIT_SLEEP);
        }
        Err(MediaRingError::corrupt(name, "control block was never initialized"))
    }

    /// Validate the shared control block and return its geometry.
    fn validate(&self) -> MediaRingResult<RingLayout> {
        let name = self.segment.name();
        let control = self
            .control()
            .ok_or_else(|| MediaRingError::corrupt(name, "segment smaller than a control block"))?;
        if !control.has_magic() {
            return Err(MediaRingError::corrupt(name, "magic code mismatch"));
        }
        let geometry = control.geometry();
        geometry
            .check(self.segment.size())
            .map_err(|reason| MediaRingError::corrupt(name, reason))?;

        let next_free = control.next_free_item_index.load(Ordering::Acquire);
        let last_filled = control.last_filled_item_index.load(Ordering::Acquire);
        let free_offset = control.next_free_payload_offset.load(Ordering::Acquire);
        if next_free >= geometry.max_item_index || last_filled >= geometry.max_item_index {
            return Err(MediaRingError::corrupt(
                name,
                format!(
                    "cursor out of range: next free {}, last filled {}, index space {}",
                    next_free, last_filled, geometry.max_item_index
                ),
            ));
        }
        if free_offset > geometry.payload_size {
            return Err(MediaRingError::corrupt(
                name,
                format!(
                    "free payload offset {} beyond arena of {} bytes",
                    free_offset, geometry.payload_size
                ),
            ));
        }
        Ok(geometry)
    }

    /// Whether the shared bytes are still a consistent ring with the
    /// geometry this handle validated.
    pub fn is_valid_shm_data(&self) -> bool {
        matches!(self.validate(), Ok(geometry) if geometry == self.layout)
    }

    /// Unmap, leaving the OS object in place.
    pub fn close(&mut self) {
        self.segment.close();
        self.state = RingState::Closed;
        self.applied = None;
    }

    /// Unmap, and remove the OS object when this handle created it.
    pub fn destroy(&mut self) -> MediaRingResult<()> {
        self.state = RingState::Closed;
        self.applied = None;
        self.segment.destroy()
    }

    pub fn state(&self) -> RingState {
        self.state
    }

    pub fn name(&self) -> &str {
        self.segment.name()
    }

    pub fn is_writer(&self) -> bool {
        self.writer
    }

    /// Whether this handle created the segment and will remove it.
    pub fn is_owner(&self) -> bool {
        self.segment.is_owner()
    }

    pub fn segment(&self) -> &Segment {
        &self.segment
    }

    /// Geometry validated on create/open.
    pub fn layout(&self) -> RingLayout {
        self.layout
    }

    #[inline]
    pub fn max_items(&self) -> u64 {
        self.layout.max_items
    }

    #[inline]
    pub fn max_item_index(&self) -> u64 {
        self.layout.max_item_index
    }

    #[inline]
    pub fn payload_size(&self) -> u64 {
        self.layout.payload_size
    }

    #[inline]
    pub fn next_index_step(&self, index: u64) -> u64 {
        (index + 1) % self.layout.max_item_index
    }

    #[inline]
    pub fn previous_index_step(&self, index: u64) -> u64 {
        (index + self.layout.max_item_index - 1) % self.layout.max_item_index
    }

    /// Logical index the next commit will take.
    pub fn write_index(&self) -> u64 {
        self.control()
            .map(|c| c.next_free_item_index.load(Ordering::Acquire) % self.layout.max_item_index)
            .unwrap_or(0)
    }

    /// Logical index of the last commit.
    pub fn last_filled_index(&self) -> u64 {
        self.control()
            .map(|c| c.last_filled_item_index.load(Ordering::Acquire) % self.layout.max_item_index)
            .unwrap_or(0)
    }

    pub fn cursor(&self) -> ReadCursor {
        self.cursor
    }

    /// Cursor position, with `Latest` resolved against the write index.
    pub fn read_index(&self) -> u64 {
        match self.cursor {
            ReadCursor::At(index) => index,
            ReadCursor::Latest => self.write_index(),
        }
    }

    /// Fix a lazy cursor at the current write index.
    pub(crate) fn pin_cursor(&mut self) -> u64 {
        let index = self.read_index();
        self.cursor = ReadCursor::At(index);
        index
    }

    /// Total commits since creation.
    pub fn committed(&self) -> u64 {
        self.control()
            .map(|c| c.commit_count.load(Ordering::Acquire))
            .unwrap_or(0)
    }

    /// Oldest logical index whose entry and payload are both intact.
    pub fn oldest_index(&self) -> u64 {
        self.control()
            .map(|c| c.oldest_live_index.load(Ordering::Acquire) % self.layout.max_item_index)
            .unwrap_or(0)
    }

    /// Entries between the oldest intact index and the write index.
    pub fn live_items(&self) -> u64 {
        (self.write_index() + self.layout.max_item_index - self.oldest_index())
            % self.layout.max_item_index
    }

    /// Advance the oldest live index past entries whose payload intersects
    /// one of `spans`. Runs before those bytes are reused.
    fn retire_overlapped(&self, control: &ControlBlock, spans: &[Range<u64>]) {
        let next_free = control.next_free_item_index.load(Ordering::Relaxed);
        let mut oldest =
            control.oldest_live_index.load(Ordering::Relaxed) % self.layout.max_item_index;
        let mut pos = oldest;
        while pos != next_free {
            let Some(entry) = self.entry(pos) else {
                break;
            };
            // empty items go only together with a later overwritten one
            if entry.size > 0 || !entry.is_consistent() {
                if entry.is_consistent() && !spans.iter().any(|span| overlaps(&entry, span)) {
                    break;
                }
                oldest = self.next_index_step(pos);
            }
            pos = self.next_index_step(pos);
        }
        control.oldest_live_index.store(oldest, Ordering::Release);
    }

    /// Items between the read cursor and the write index.
    pub fn gap(&self) -> u64 {
        (self.write_index() + self.layout.max_item_index - self.read_index())
            % self.layout.max_item_index
    }

    pub fn seek(&mut self, to: SeekTo) -> MediaRingResult<()> {
        self.cursor = match to {
            SeekTo::Zero => ReadCursor::At(0),
            SeekTo::Write => ReadCursor::Latest,
            SeekTo::Oldest => ReadCursor::At(self.oldest_index()),
            SeekTo::Index(index) => {
                if index >= self.layout.max_item_index {
                    return Err(MediaRingError::invalid_input(format!(
                        "index {} outside index space of {}",
                        index, self.layout.max_item_index
                    )));
                }
                ReadCursor::At(index)
            }
        };
        Ok(())
    }

    fn entry_at(&self, pos: u64) -> Option<&IndexEntry> {
        let base = self.segment.bytes()?;
        let slot = pos % self.layout.max_items;
        let offset = self.layout.index_offset + slot * INDEX_ENTRY_SIZE as u64;
        let end = offset + INDEX_ENTRY_SIZE as u64;
        if end > self.segment.size() as u64 {
            debug_assert!(false, "index entry {} beyond the mapping", slot);
            return None;
        }
        // SAFETY: bounds checked above; the index table is word aligned and atomic
        Some(unsafe { &*(base.as_ptr().add(offset as usize) as *const IndexEntry) })
    }

    /// Copy of the index entry occupying the slot of `pos`.
    pub fn entry(&self, pos: u64) -> Option<IndexEntryRaw> {
        self.entry_at(pos).map(IndexEntry::snapshot)
    }

    fn arena_ptr(&self, offset: u64, len: u64) -> Option<*mut u8> {
        let base = self.segment.bytes()?;
        let end = offset.checked_add(len)?;
        if end > self.layout.payload_size {
            return None;
        }
        let start = self.layout.payload_offset + offset;
        // SAFETY: payload_offset + payload_size <= total_size <= mapped length
        Some(unsafe { base.as_ptr().add(start as usize) })
    }

    fn arena(&self, offset: u64, len: u64) -> Option<&[u8]> {
        let ptr = self.arena_ptr(offset, len)?;
        // SAFETY: range checked against the arena by arena_ptr
        Some(unsafe { std::slice::from_raw_parts(ptr, len as usize) })
    }

    /// Reserve `max_size` bytes in the payload arena.
    ///
    /// The span starts word aligned. When the arena tail is too short the
    /// tail is zero-filled and the span starts at the arena beginning.
    pub fn apply(&mut self, max_size: usize) -> MediaRingResult<&mut [u8]> {
        if !self.writer {
            return Err(MediaRingError::role(format!(
                "apply on reader handle of ring '{}'",
                self.name()
            )));
        }
        let payload_size = self.layout.payload_size;
        let max = max_size as u64;
        if max > payload_size {
            return Err(MediaRingError::invalid_input(format!(
                "item of {} bytes exceeds arena of {} bytes",
                max_size, payload_size
            )));
        }
        let need = align_up(max_size, WORD) as u64;
        let control = self.control().ok_or_else(|| self.closed())?;
        let mut offset = control.next_free_payload_offset.load(Ordering::Relaxed);
        if offset > payload_size || offset % WORD as u64 != 0 {
            debug_assert!(false, "free payload offset {} corrupt", offset);
            offset = 0;
        }
        let tail = offset..payload_size;
        let wrapped = offset + need > payload_size;
        if wrapped {
            offset = 0;
        }
        let span = offset..offset + need;
        if wrapped {
            self.retire_overlapped(control, &[tail.clone(), span]);
        } else {
            self.retire_overlapped(control, &[span]);
        }
        if wrapped {
            let tail_len = tail.end - tail.start;
            if let Some(tail) = self.arena_ptr(tail.start, tail_len) {
                // SAFETY: tail range checked by arena_ptr; writer has exclusive write access
                unsafe { std::ptr::write_bytes(tail, 0, tail_len as usize) };
            }
        }
        let ptr = self.arena_ptr(offset, max).ok_or_else(|| self.closed())?;
        self.applied = Some(Applied {
            offset,
            capacity: max,
        });
        self.state = RingState::Active;
        // SAFETY: range checked by arena_ptr; &mut self keeps the span exclusive
        Ok(unsafe { std::slice::from_raw_parts_mut(ptr, max_size) })
    }

    /// Publish `size` bytes at `ptr`, which must be the start of the last
    /// applied span or the start of the arena. Returns the committed index.
    pub fn commit(&mut self, ptr: *const u8, size: usize) -> MediaRingResult<u64> {
        if !self.writer {
            return Err(MediaRingError::role(format!(
                "commit on reader handle of ring '{}'",
                self.name()
            )));
        }
        let applied = self.applied.ok_or_else(|| {
            MediaRingError::invalid_input("commit without a pending apply")
        })?;
        let applied_ptr = self.arena_ptr(applied.offset, 0).ok_or_else(|| self.closed())?;
        let arena_start = self.arena_ptr(0, 0).ok_or_else(|| self.closed())?;
        let offset = if std::ptr::eq(ptr, applied_ptr) {
            applied.offset
        } else if std::ptr::eq(ptr, arena_start) {
            0
        } else {
            return Err(MediaRingError::invalid_input(
                "commit pointer does not match the applied span",
            ));
        };
        let size = size as u64;
        if size > applied.capacity || offset + size > self.layout.payload_size {
            return Err(MediaRingError::invalid_input(format!(
                "commit of {} bytes exceeds the applied {} bytes",
                size, applied.capacity
            )));
        }
        self.applied = None;

        let name = self.segment.name();
        let control = self.control().ok_or_else(|| self.closed())?;
        let index = control.next_free_item_index.load(Ordering::Relaxed);
        if index >= self.layout.max_item_index {
            debug_assert!(false, "write index {} corrupt", index);
            return Err(MediaRingError::corrupt(name, "write index out of range"));
        }
        let entry = self
            .entry_at(index)
            .ok_or_else(|| MediaRingError::corrupt(name, "index entry beyond the mapping"))?;
        // the slot about to be reused holds index - max_items
        let mii = self.layout.max_item_index;
        let oldest = control.oldest_live_index.load(Ordering::Relaxed) % mii;
        if (index + mii - oldest) % mii >= self.layout.max_items {
            control
                .oldest_live_index
                .store((index + mii + 1 - self.layout.max_items) % mii, Ordering::Release);
        }
        entry.publish(index, offset, size);

        let next = self.next_index_step(index);
        let free_offset = (align_up((offset + size) as usize, WORD) as u64).min(self.layout.payload_size);
        control
            .next_free_payload_offset
            .store(free_offset, Ordering::Release);
        control
            .last_filled_item_index
            .store(index, Ordering::Release);
        control
            .item_index_checksum
            .store(next.wrapping_add(index), Ordering::Release);
        control.commit_count.fetch_add(1, Ordering::AcqRel);
        control.next_free_item_index.store(next, Ordering::Release);
        Ok(index)
    }

    /// Commit `size` bytes of the pending applied span.
    pub fn commit_applied(&mut self, size: usize) -> MediaRingResult<u64> {
        let applied = self.applied.ok_or_else(|| {
            MediaRingError::invalid_input("commit without a pending apply")
        })?;
        let ptr = self
            .arena_ptr(applied.offset, 0)
            .ok_or_else(|| self.closed())?;
        self.commit(ptr, size)
    }

    /// The pending applied span, if any.
    pub fn applied_mut(&mut self) -> Option<&mut [u8]> {
        let applied = self.applied?;
        let ptr = self.arena_ptr(applied.offset, applied.capacity)?;
        // SAFETY: range checked by arena_ptr; &mut self keeps the span exclusive
        Some(unsafe { std::slice::from_raw_parts_mut(ptr, applied.capacity as usize) })
    }

    /// Apply, copy and commit one item.
    pub fn write(&mut self, buf: &[u8]) -> MediaRingResult<u64> {
        let span = self.apply(buf.len())?;
        span.copy_from_slice(buf);
        let ptr = span.as_ptr();
        self.commit(ptr, buf.len())
    }

    /// Offset and size of the committed item at `pos`, if it is intact.
    fn locate(&self, pos: u64) -> Option<(u64, u64)> {
        if pos >= self.layout.max_item_index {
            return None;
        }
        let control = self.control()?;
        let cursors = control.cursors()?;
        let oldest =
            control.oldest_live_index.load(Ordering::Acquire) % self.layout.max_item_index;
        if !in_live_window(pos, oldest, cursors.next_free, self.layout.max_item_index) {
            return None;
        }
        let entry = self.entry_at(pos)?.snapshot();
        if !entry.is_consistent() {
            mr_log_limited!(
                Debug,
                "ring '{}': torn index entry at {}",
                self.name(),
                pos
            );
            return None;
        }
        if entry.index != pos {
            return None;
        }
        match entry.offset.checked_add(entry.size) {
            Some(end) if end <= self.layout.payload_size => Some((entry.offset, entry.size)),
            _ => {
                mr_log_limited!(
                    Warn,
                    "ring '{}': entry {} spans [{}+{}] outside the arena",
                    self.name(),
                    pos,
                    entry.offset,
                    entry.size
                );
                None
            }
        }
    }

    /// Read the item at the cursor and advance.
    pub fn read(&mut self) -> Option<&[u8]> {
        let pos = self.pin_cursor();
        let (offset, size) = self.locate(pos)?;
        self.cursor = ReadCursor::At(self.next_index_step(pos));
        self.state = RingState::Active;
        self.arena(offset, size)
    }

    /// Read the item at the cursor without advancing.
    pub fn read_no_step(&self) -> Option<&[u8]> {
        let (offset, size) = self.locate(self.read_index())?;
        self.arena(offset, size)
    }

    /// Read the item at an arbitrary logical index.
    pub fn read_by_pos(&self, pos: u64) -> Option<&[u8]> {
        let (offset, size) = self.locate(pos)?;
        self.arena(offset, size)
    }

    /// Advance the cursor by one without reading.
    pub fn step(&mut self) {
        let pos = self.pin_cursor();
        self.cursor = ReadCursor::At(self.next_index_step(pos));
    }

    /// Whether the entry at `pos` is intact and belongs to `pos`.
    pub fn is_committed(&self, pos: u64) -> bool {
        self.locate(pos).is_some()
    }

    pub fn is_readable(&self) -> bool {
        match self.control().and_then(ControlBlock::cursors) {
            Some(cursors) => self.read_index() != cursors.next_free,
            None => false,
        }
    }

    pub fn is_writeable(&self) -> bool {
        self.writer && self.is_valid_shm_data()
    }

    /// Caller-owned area between the control block and the index table.
    pub fn fixed_user(&self) -> &[u8] {
        match self.fixed_user_ptr() {
            // SAFETY: the area lies inside the validated layout
            Some(ptr) => unsafe {
                std::slice::from_raw_parts(ptr, self.layout.fixed_user_size as usize)
            },
            None => &[],
        }
    }

    pub fn fixed_user_mut(&mut self) -> &mut [u8] {
        match self.fixed_user_ptr() {
            // SAFETY: the area lies inside the validated layout; &mut self is exclusive here
            Some(ptr) => unsafe {
                std::slice::from_raw_parts_mut(ptr, self.layout.fixed_user_size as usize)
            },
            None => &mut [],
        }
    }

    pub(crate) fn fixed_user_ptr(&self) -> Option<*mut u8> {
        let base = self.segment.bytes()?;
        // SAFETY: fixed_user_offset + fixed_user_size <= index_offset <= mapped length
        Some(unsafe { base.as_ptr().add(self.layout.fixed_user_offset as usize) })
    }

    fn set_flag(&self, bit: u64, on: bool) {
        if let Some(control) = self.control() {
            if on {
                control.flags.fetch_or(bit, Ordering::AcqRel);
            } else {
                control.flags.fetch_and(!bit, Ordering::AcqRel);
            }
        }
    }

    fn flag(&self, bit: u64) -> bool {
        self.control()
            .map(|c| c.flags.load(Ordering::Acquire) & bit != 0)
            .unwrap_or(false)
    }

    /// Mark the producer as paused.
    pub fn set_inactive(&self, inactive: bool) {
        self.set_flag(FLAG_INACTIVE, inactive);
    }

    pub fn is_inactive(&self) -> bool {
        self.flag(FLAG_INACTIVE)
    }

    /// Ask the producer to (re)start producing.
    pub fn request(&self, requested: bool) {
        self.set_flag(FLAG_REQUESTED, requested);
    }

    pub fn is_requested(&self) -> bool {
        self.flag(FLAG_REQUESTED)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ring::layout::MAGIC;

    fn unique(tag: &str) -> String {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .subsec_nanos();
        format!("ring_{}_{}_{}", tag, std::process::id(), nanos)
    }

    #[test]
    fn hello_shm_then_full_lap() {
        let name = unique("hello");
        let mut writer = RingChannel::create(&name, 0, 4096, 8, 0o600).unwrap();
        let mut reader = RingChannel::open(&name).unwrap();
        assert!(!reader.is_readable());

        writer.write(b"hello-shm").unwrap();
        assert!(reader.is_readable());
        assert_eq!(reader.read().unwrap(), b"hello-shm");

        for i in 0..8u8 {
            writer.write(&[i; 5]).unwrap();
        }
        let mut seen = vec![b"hello-shm".to_vec()];
        while let Some(item) = reader.read() {
            seen.push(item.to_vec());
        }
        assert_eq!(seen.len(), 9);
        for (i, item) in seen[1..].iter().enumerate() {
            assert_eq!(item, &vec![i as u8; 5]);
        }
    }

    #[test]
    fn read_no_step_peeks() {
        let name = unique("peek");
        let mut writer = RingChannel::create(&name, 0, 1024, 4, 0o600).unwrap();
        let mut reader = RingChannel::open(&name).unwrap();
        writer.write(b"abc").unwrap();
        assert_eq!(reader.read_no_step().unwrap(), b"abc");
        assert_eq!(reader.read_index(), 0);
        assert_eq!(reader.read().unwrap(), b"abc");
        assert_eq!(reader.read_index(), 1);
        assert!(reader.read().is_none());
    }

    #[test]
    fn arena_wrap_keeps_latest_items() {
        let name = unique("wrap");
        let mut writer = RingChannel::create(&name, 0, 1024, 4, 0o600).unwrap();
        for i in 0..10u8 {
            writer.write(&[i; 200]).unwrap();
        }
        let mut reader = RingChannel::open(&name).unwrap();
        reader.seek(SeekTo::Oldest).unwrap();
        let items: Vec<u8> = std::iter::from_fn(|| reader.read().map(|b| b[0])).collect();
        assert_eq!(items, vec![6, 7, 8, 9]);
    }

    #[test]
    fn index_space_is_twice_capacity() {
        let name = unique("steps");
        let ring = RingChannel::create(&name, 0, 256, 4, 0o600).unwrap();
        assert_eq!(ring.max_item_index(), 8);
        assert_eq!(ring.next_index_step(7), 0);
        assert_eq!(ring.previous_index_step(0), 7);
    }

    #[test]
    fn apply_rejects_oversize_and_readers() {
        let name = unique("apply");
        let mut writer = RingChannel::create(&name, 0, 64, 2, 0o600).unwrap();
        assert!(matches!(
            writer.apply(65),
            Err(MediaRingError::InvalidInput(_))
        ));
        let mut reader = RingChannel::open(&name).unwrap();
        assert!(matches!(reader.apply(8), Err(MediaRingError::Role(_))));
        assert!(matches!(
            reader.write(b"x"),
            Err(MediaRingError::Role(_))
        ));
    }

    #[test]
    fn commit_checks_pointer() {
        let name = unique("commit");
        let mut writer = RingChannel::create(&name, 0, 256, 4, 0o600).unwrap();
        writer.write(b"first").unwrap();

        let span = writer.apply(16).unwrap();
        let stray = span[1..].as_ptr();
        assert!(writer.commit(stray, 8).is_err());
        // the apply stays pending after a rejected commit
        writer.commit_applied(8).unwrap();
        assert!(matches!(
            writer.commit_applied(8),
            Err(MediaRingError::InvalidInput(_))
        ));
    }

    #[test]
    fn corrupted_entry_is_not_readable() {
        let name = unique("corrupt");
        let mut writer = RingChannel::create(&name, 0, 256, 4, 0o600).unwrap();
        writer.write(b"payload").unwrap();
        let mut reader = RingChannel::open(&name).unwrap();
        reader.seek(SeekTo::Zero).unwrap();

        let entry = reader.entry(0).unwrap();
        assert!(entry.is_consistent());
        assert_eq!(entry.size, 7);

        writer.entry_at(0).unwrap().size.store(8, Ordering::Release);
        assert!(reader.read().is_none());
        assert_eq!(reader.read_index(), 0);

        writer
            .entry_at(0)
            .unwrap()
            .checksum
            .store(entry.index + entry.offset + 8, Ordering::Release);
        assert_eq!(reader.read().unwrap().len(), 8);
    }

    #[test]
    fn torn_index_or_offset_is_not_readable() {
        let name = unique("torn");
        let mut writer = RingChannel::create(&name, 0, 256, 4, 0o600).unwrap();
        writer.write(b"first").unwrap();
        writer.write(b"second").unwrap();
        let mut reader = RingChannel::open(&name).unwrap();
        reader.seek(SeekTo::Zero).unwrap();

        writer.entry_at(0).unwrap().index.store(4, Ordering::Release);
        assert!(reader.read_by_pos(0).is_none());
        writer.entry_at(0).unwrap().index.store(0, Ordering::Release);
        assert_eq!(reader.read_by_pos(0).unwrap(), b"first");

        let second = reader.entry(1).unwrap();
        writer.entry_at(1).unwrap().offset.store(0, Ordering::Release);
        assert!(!reader.is_committed(1));
        writer.entry_at(1).unwrap().offset.store(second.offset, Ordering::Release);
        assert_eq!(reader.read_by_pos(1).unwrap(), b"second");
    }

    #[test]
    fn wrapped_arena_drops_overwritten_entries() {
        let name = unique("overwrite");
        let mut writer = RingChannel::create(&name, 0, 4096, 8, 0o600).unwrap();
        for i in 0..3u8 {
            writer.write(&[i; 2000]).unwrap();
        }
        // the third item reused the bytes of the first
        assert_eq!(writer.oldest_index(), 1);
        assert_eq!(writer.live_items(), 2);

        let mut reader = RingChannel::open(&name).unwrap();
        assert!(!reader.is_committed(0));
        assert!(reader.read_by_pos(0).is_none());
        reader.seek(SeekTo::Oldest).unwrap();
        let items: Vec<u8> = std::iter::from_fn(|| reader.read().map(|b| b[0])).collect();
        assert_eq!(items, vec![1, 2]);
    }

    #[test]
    fn empty_items_retire_with_their_successor() {
        let name = unique("empty");
        let mut writer = RingChannel::create(&name, 0, 64, 8, 0o600).unwrap();
        writer.write(&[1; 32]).unwrap();
        writer.write(&[]).unwrap();
        writer.write(&[2; 32]).unwrap();
        assert_eq!(writer.oldest_index(), 0);
        // only the first item loses its bytes, the empty one stays
        writer.write(&[3; 32]).unwrap();
        assert_eq!(writer.oldest_index(), 1);
        writer.write(&[]).unwrap();
        writer.write(&[4; 16]).unwrap();
        assert_eq!(writer.oldest_index(), 3);

        let mut reader = RingChannel::open(&name).unwrap();
        reader.seek(SeekTo::Oldest).unwrap();
        let items: Vec<Vec<u8>> =
            std::iter::from_fn(|| reader.read().map(|b| b.to_vec())).collect();
        assert_eq!(items, vec![vec![3; 32], vec![], vec![4; 16]]);
    }

    #[test]
    fn foreign_segment_is_rejected_untouched() {
        let name = unique("foreign");
        let (mut foreign, _) = Segment::<DefaultBackend>::create(&name, 4096, 0o600).unwrap();
        foreign.as_mut_slice()[..16].copy_from_slice(b"NOT-A-RING-AT-AL");
        let before = foreign.as_slice().to_vec();

        let err = RingChannel::open(&name).unwrap_err();
        assert!(err.is_corrupt(), "{err}");
        let err = RingChannel::create(&name, 0, 1024, 4, 0o600).unwrap_err();
        assert!(err.is_corrupt(), "{err}");
        assert_eq!(foreign.as_slice(), &before[..]);
    }

    #[test]
    fn reused_segment_keeps_existing_geometry() {
        let name = unique("reuse");
        let first = RingChannel::create(&name, 0, 4096, 8, 0o600).unwrap();
        let second = RingChannel::create(&name, 0, 8192, 16, 0o600).unwrap();
        assert!(first.is_owner());
        assert!(!second.is_owner());
        assert_eq!(second.max_items(), 8);
        assert_eq!(second.payload_size(), 4096);
        assert!(second.is_valid_shm_data());
    }

    #[test]
    fn seek_write_resolves_lazily() {
        let name = unique("seek");
        let mut writer = RingChannel::create(&name, 0, 256, 4, 0o600).unwrap();
        let mut reader = RingChannel::open(&name).unwrap();
        writer.write(b"old").unwrap();
        reader.seek(SeekTo::Write).unwrap();
        assert_eq!(reader.cursor(), ReadCursor::Latest);
        writer.write(b"new").unwrap();
        assert!(reader.read().is_none());
        writer.write(b"newer").unwrap();
        assert_eq!(reader.read().unwrap(), b"newer");
        assert!(reader.seek(SeekTo::Index(8)).is_err());
    }

    #[test]
    fn flags_are_shared() {
        let name = unique("flags");
        let writer = RingChannel::create(&name, 16, 256, 4, 0o600).unwrap();
        let reader = RingChannel::open(&name).unwrap();
        reader.request(true);
        assert!(writer.is_requested());
        writer.set_inactive(true);
        assert!(reader.is_inactive());
        writer.set_inactive(false);
        assert!(!reader.is_inactive());
        assert!(reader.is_requested());
    }

    #[test]
    fn fixed_user_area_is_shared() {
        let name = unique("user");
        let mut writer = RingChannel::create(&name, 12, 256, 4, 0o600).unwrap();
        assert_eq!(writer.fixed_user().len(), 16);
        writer.fixed_user_mut()[..4].copy_from_slice(b"head");
        let reader = RingChannel::open(&name).unwrap();
        assert_eq!(&reader.fixed_user()[..4], b"head");
    }

    #[test]
    fn destroy_removes_for_owner_only() {
        let name = unique("destroy");
        let mut writer = RingChannel::create(&name, 0, 256, 4, 0o600).unwrap();
        let mut reader = RingChannel::open(&name).unwrap();
        reader.destroy().unwrap();
        assert_eq!(reader.state(), RingState::Closed);
        assert!(Segment::<DefaultBackend>::exists(&name));
        assert!(!reader.is_readable());
        writer.destroy().unwrap();
        #[cfg(unix)]
        assert!(!Segment::<DefaultBackend>::exists(&name));
        assert!(writer.write(b"late").is_err());
    }

    #[test]
    fn magic_is_stamped() {
        let name = unique("magic");
        let writer = RingChannel::create(&name, 0, 256, 4, 0o600).unwrap();
        assert_eq!(&writer.segment().as_slice()[..16], &MAGIC);
    }
}

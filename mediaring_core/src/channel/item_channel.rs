//! Fixed-item channel over a flat segment.
//!
//! `item_count` slots of at most `item_length` bytes each. The writer
//! overwrites the oldest slot unconditionally; every slot carries a sequence
//! word so a reader can tell a complete item from one being rewritten.

use std::sync::atomic::Ordering;
use std::time::Duration;

use crate::channel::head::{
    is_fresh, touch, FixedGeometry, HeadExt, LegacyHead, SlotHeader, HEAD_EXT_OFFSET,
    HEAD_REGION_SIZE, ITEM_CHANNEL_VERSION, SLOT_HEADER_SIZE,
};
use crate::channel::{poll_until, ExistenceProbe, Readiness, Role};
use crate::config::ChannelConfig;
use crate::error::{MediaRingError, MediaRingResult};
use crate::memory::{now_ms, DefaultBackend, Segment};
use crate::{mr_log, mr_log_limited};
use crate::ring::{ReadCursor, SeekTo};

/// Fixed-item channel handle.
#[derive(Debug)]
pub struct ItemChannel {
    segment: Segment,
    config: ChannelConfig,
    role: Role,
    geometry: FixedGeometry,
    cursor: ReadCursor,
    probe: ExistenceProbe,
    skipped: u64,
}

impl ItemChannel {
    /// Create the channel, or reuse a same-named segment.
    ///
    /// When the existing segment is smaller than requested and `clean_data`
    /// is given, it is called with the name, the segment is removed and
    /// created again. Otherwise the existing segment is reused with its own
    /// geometry.
    pub fn create_or_open(
        name: &str,
        header_len: usize,
        item_count: usize,
        item_length: usize,
        config: &ChannelConfig,
        clean_data: Option<&mut dyn FnMut(&str)>,
    ) -> MediaRingResult<Self> {
        config.validate()?;
        if item_count == 0 || item_length == 0 {
            return Err(MediaRingError::config(format!(
                "channel '{}': item count and length must be non-zero, got {} x {}",
                name, item_count, item_length
            )));
        }
        if u32::try_from(item_count).is_err()
            || u32::try_from(item_length).is_err()
            || u32::try_from(header_len).is_err()
        {
            return Err(MediaRingError::config(format!(
                "channel '{}': geometry {} x {} with {} header bytes out of range",
                name, item_count, item_length, header_len
            )));
        }
        let requested = FixedGeometry::compute(header_len, item_count, item_length);
        let total = requested.total_size().ok_or_else(|| {
            MediaRingError::config(format!("channel '{}': geometry overflows", name))
        })?;

        let (mut segment, mut is_new) = Segment::<DefaultBackend>::create(name, total, config.mode)?;
        if !is_new && segment.size() < total {
            if let Some(clean) = clean_data {
                mr_log!(
                    Info,
                    "Recreating channel '{}': existing {} bytes, need {}",
                    name,
                    segment.size(),
                    total
                );
                clean(name);
                segment.close();
                Segment::<DefaultBackend>::remove(name)?;
                let (fresh, fresh_new) = Segment::<DefaultBackend>::create(name, total, config.mode)?;
                segment = fresh;
                is_new = fresh_new;
            }
        }

        // reader until validated, so a rejected segment is not unlinked on drop
        let mut channel = Self {
            segment,
            config: config.clone(),
            role: Role::Reader,
            geometry: requested,
            cursor: ReadCursor::At(0),
            probe: ExistenceProbe::new(config.probe_interval()),
            skipped: 0,
        };
        if is_new {
            let (head, ext) = channel.heads()?;
            head.stamp(ext, &requested);
            mr_log!(
                Info,
                "Created item channel '{}': {} items of {} bytes, {} header bytes",
                name,
                item_count,
                item_length,
                header_len
            );
        } else {
            channel.geometry = channel.wait_for_version(config.open_wait())?;
            if channel.geometry != requested {
                mr_log_limited!(
                    Warn,
                    "item channel '{}' reused with geometry {:?}, requested {:?}",
                    name,
                    channel.geometry,
                    requested
                );
            }
            channel.ext()?.close_flag.store(0, Ordering::Release);
        }
        channel.role = Role::Writer;
        Ok(channel)
    }

    /// Open an existing channel as a reader, waiting for the writer to
    /// stamp the head.
    pub fn open(name: &str, config: &ChannelConfig) -> MediaRingResult<Self> {
        config.validate()?;
        let wait = config.open_wait();
        let segment = poll_until(wait, Duration::from_millis(1), || {
            match Segment::<DefaultBackend>::open(name) {
                Ok(segment) => Ok(Some(segment)),
                Err(MediaRingError::NotFound(_)) => Ok(None),
                Err(e) => Err(e),
            }
        })?
        .ok_or_else(|| MediaRingError::NotFound(name.to_string()))?;

        let mut channel = Self {
            segment,
            config: config.clone(),
            role: Role::Reader,
            geometry: FixedGeometry::compute(0, 1, 1),
            cursor: ReadCursor::At(0),
            probe: ExistenceProbe::new(config.probe_interval()),
            skipped: 0,
        };
        channel.geometry = channel.wait_for_version(wait)?;
        channel.cursor = ReadCursor::At(channel.write_index());
        log::debug!(
            "Opened item channel '{}' ({} items of {} bytes)",
            name,
            channel.geometry.item_count,
            channel.geometry.item_length
        );
        Ok(channel)
    }

    fn heads(&self) -> MediaRingResult<(&LegacyHead, &HeadExt)> {
        let name = self.segment.name();
        if self.segment.size() < HEAD_REGION_SIZE {
            return Err(MediaRingError::corrupt(name, "segment smaller than the channel head"));
        }
        let base = self
            .segment
            .bytes()
            .ok_or_else(|| MediaRingError::invalid_input(format!("channel '{}' is closed", name)))?;
        // SAFETY: the mapping is page aligned and holds HEAD_REGION_SIZE bytes;
        // both heads consist of atomics only
        unsafe {
            Ok((
                &*(base.as_ptr() as *const LegacyHead),
                &*(base.as_ptr().add(HEAD_EXT_OFFSET) as *const HeadExt),
            ))
        }
    }

    fn ext(&self) -> MediaRingResult<&HeadExt> {
        Ok(self.heads()?.1)
    }

    fn wait_for_version(&self, wait: Duration) -> MediaRingResult<FixedGeometry> {
        let name = self.segment.name();
        let (head, _) = self.heads()?;
        let version = poll_until(wait, Duration::from_millis(1), || {
            let version = head.version.load(Ordering::Acquire);
            Ok((version != 0).then_some(version))
        })?
        .ok_or_else(|| {
            MediaRingError::Timeout(format!("channel '{}' version was never stamped", name))
        })?;
        if version != ITEM_CHANNEL_VERSION {
            return Err(MediaRingError::corrupt(
                name,
                format!("unknown item channel version {:#x}", version),
            ));
        }
        let geometry = head.geometry();
        geometry
            .check(self.segment.size())
            .map_err(|reason| MediaRingError::corrupt(name, reason))?;
        Ok(geometry)
    }

    fn require(&self, role: Role, op: &str) -> MediaRingResult<()> {
        if self.role == role {
            return Ok(());
        }
        Err(MediaRingError::role(format!(
            "{} on {:?} handle of channel '{}'",
            op,
            self.role,
            self.segment.name()
        )))
    }

    fn probe_removed(&mut self) -> MediaRingResult<()> {
        let name = self.segment.name();
        if self.probe.check(|| Segment::<DefaultBackend>::exists(name)) {
            return Ok(());
        }
        mr_log_limited!(Warn, "item channel '{}' was removed from the system", name);
        Err(MediaRingError::Removed(name.to_string()))
    }

    /// Writer readiness. The fixed region overwrites the oldest slot, so a
    /// live segment is always ready.
    pub fn sendable(&mut self, _timeout: Duration) -> MediaRingResult<Readiness> {
        self.require(Role::Writer, "sendable")?;
        self.probe_removed()?;
        Ok(Readiness::Ready)
    }

    /// Reader readiness, polling up to `timeout`.
    pub fn readable(&mut self, timeout: Duration) -> MediaRingResult<Readiness> {
        self.require(Role::Reader, "readable")?;
        self.cursor = ReadCursor::At(self.read_index());
        let quantum = self.config.poll_quantum();
        let ready = poll_until(timeout, quantum, || {
            let ext = self.ext()?;
            if ext.close_flag.load(Ordering::Acquire) != 0 {
                return Ok(Some(Readiness::Closed));
            }
            touch(&ext.last_read_time_stamp, now_ms());
            self.probe_removed()?;
            self.catch_up();
            Ok(self.slot_len(self.read_index()).map(|_| Readiness::Ready))
        })?;
        Ok(ready.unwrap_or(Readiness::Wait))
    }

    /// Fast-forward a cursor whose slots were overwritten.
    fn catch_up(&mut self) {
        let count = self.geometry.item_count as u64;
        let write = self.write_index();
        let read = self.read_index();
        if read > write {
            // cursor ahead of a restarted writer
            self.cursor = ReadCursor::At(write);
            return;
        }
        let gap = write - read;
        if gap < count.max(3) {
            return;
        }
        let oldest = write - count.min(write);
        if oldest > read {
            let skipped = oldest - read;
            self.skipped += skipped;
            mr_log_limited!(
                Warn,
                "item channel '{}': reader {} items behind, skipping {}",
                self.segment.name(),
                gap,
                skipped
            );
            self.cursor = ReadCursor::At(oldest);
        }
    }

    /// Items dropped by backlog catch-up.
    pub fn skipped_items(&self) -> u64 {
        self.skipped
    }

    /// Whether a reader polled within `timeout`.
    pub fn has_readers(&self, timeout: Duration) -> bool {
        match self.ext() {
            Ok(ext) => is_fresh(
                &ext.last_read_time_stamp,
                now_ms(),
                timeout.as_millis() as u64,
            ),
            Err(_) => false,
        }
    }

    /// Like [`has_readers`](Self::has_readers) with the configured timeout.
    pub fn has_live_readers(&self) -> bool {
        self.has_readers(self.config.reader_timeout())
    }

    pub fn set_close_flag(&self, closed: bool) -> MediaRingResult<()> {
        self.ext()?
            .close_flag
            .store(u32::from(closed), Ordering::Release);
        Ok(())
    }

    pub fn check_close_flag(&self) -> bool {
        self.ext()
            .map(|ext| ext.close_flag.load(Ordering::Acquire) != 0)
            .unwrap_or(false)
    }

    /// Unlink the named segment. Idempotent.
    pub fn remove_from_kernel(name: &str) -> MediaRingResult<bool> {
        Segment::<DefaultBackend>::remove(name)
    }

    fn slot_ptr(&self, cursor: u64) -> Option<(&SlotHeader, *mut u8)> {
        let base = self.segment.bytes()?;
        let offset = self.geometry.slot_offset(cursor);
        if offset + self.geometry.slot_stride() > self.segment.size() {
            debug_assert!(false, "slot {} beyond the mapping", cursor);
            return None;
        }
        // SAFETY: the slot lies inside the checked geometry; slot offsets are
        // word aligned and the header is atomic
        unsafe {
            let start = base.as_ptr().add(offset);
            Some((
                &*(start as *const SlotHeader),
                start.add(SLOT_HEADER_SIZE),
            ))
        }
    }

    /// Length of the complete item held for `cursor`.
    fn slot_len(&self, cursor: u64) -> Option<usize> {
        if cursor >= self.write_index() {
            return None;
        }
        let (slot, _) = self.slot_ptr(cursor)?;
        if slot.seq.load(Ordering::Acquire) != SlotHeader::complete(cursor) {
            return None;
        }
        let len = slot.len.load(Ordering::Acquire) as usize;
        (len <= self.geometry.item_length).then_some(len)
    }

    /// Copy one item into the next slot. Returns its index.
    pub fn write(&mut self, buf: &[u8]) -> MediaRingResult<u64> {
        self.require(Role::Writer, "write")?;
        if buf.len() > self.geometry.item_length {
            return Err(MediaRingError::invalid_input(format!(
                "item of {} bytes exceeds slot of {} bytes",
                buf.len(),
                self.geometry.item_length
            )));
        }
        let name = self.segment.name();
        let (head, ext) = self.heads()?;
        let cursor = ext.item_current_64.load(Ordering::Relaxed);
        let (slot, data) = self
            .slot_ptr(cursor)
            .ok_or_else(|| MediaRingError::corrupt(name, "slot beyond the mapping"))?;
        slot.seq
            .store(SlotHeader::writing(cursor), Ordering::Relaxed);
        std::sync::atomic::fence(Ordering::Release);
        // SAFETY: data has item_length bytes inside the mapping; single writer
        unsafe { std::ptr::copy_nonoverlapping(buf.as_ptr(), data, buf.len()) };
        slot.len.store(buf.len() as u64, Ordering::Relaxed);
        slot.seq
            .store(SlotHeader::complete(cursor), Ordering::Release);
        head.item_current
            .store((cursor + 1) as u32, Ordering::Release);
        ext.item_current_64.store(cursor + 1, Ordering::Release);
        Ok(cursor)
    }

    fn item_at(&self, cursor: u64) -> Option<&[u8]> {
        let len = self.slot_len(cursor)?;
        let (_, data) = self.slot_ptr(cursor)?;
        // SAFETY: len <= item_length, inside the slot
        Some(unsafe { std::slice::from_raw_parts(data, len) })
    }

    /// Read the item at the cursor and advance.
    pub fn read(&mut self) -> Option<&[u8]> {
        let cursor = self.read_index();
        self.slot_len(cursor)?;
        self.cursor = ReadCursor::At(cursor + 1);
        self.item_at(cursor)
    }

    pub fn read_no_step(&self) -> Option<&[u8]> {
        self.item_at(self.read_index())
    }

    pub fn step_read_index(&mut self) {
        self.cursor = ReadCursor::At(self.read_index() + 1);
    }

    pub fn seek(&mut self, to: SeekTo) -> MediaRingResult<()> {
        let write = self.write_index();
        self.cursor = match to {
            SeekTo::Zero => ReadCursor::At(0),
            SeekTo::Write => ReadCursor::Latest,
            SeekTo::Oldest => {
                ReadCursor::At(write - (self.geometry.item_count as u64).min(write))
            }
            SeekTo::Index(index) => {
                if index > write {
                    return Err(MediaRingError::invalid_input(format!(
                        "index {} beyond write index {}",
                        index, write
                    )));
                }
                ReadCursor::At(index)
            }
        };
        Ok(())
    }

    fn header_ptr(&self) -> Option<*mut u8> {
        let base = self.segment.bytes()?;
        // SAFETY: HEAD_REGION_SIZE + header_len <= item_offset <= mapped length
        Some(unsafe { base.as_ptr().add(HEAD_REGION_SIZE) })
    }

    /// Caller header area.
    pub fn header(&self) -> &[u8] {
        match self.header_ptr() {
            // SAFETY: checked geometry keeps the area inside the mapping
            Some(ptr) => unsafe { std::slice::from_raw_parts(ptr, self.geometry.header_len) },
            None => &[],
        }
    }

    pub fn header_mut(&mut self) -> &mut [u8] {
        match self.header_ptr() {
            // SAFETY: checked geometry keeps the area inside the mapping; &mut self
            Some(ptr) => unsafe {
                std::slice::from_raw_parts_mut(ptr, self.geometry.header_len)
            },
            None => &mut [],
        }
    }

    pub fn version(&self) -> u32 {
        self.heads()
            .map(|(head, _)| head.version.load(Ordering::Acquire))
            .unwrap_or(0)
    }

    pub fn is_creator(&self) -> bool {
        self.role == Role::Writer
    }

    pub fn name(&self) -> &str {
        self.segment.name()
    }

    pub fn geometry(&self) -> FixedGeometry {
        self.geometry
    }

    pub fn write_index(&self) -> u64 {
        self.ext()
            .map(|ext| ext.item_current_64.load(Ordering::Acquire))
            .unwrap_or(0)
    }

    pub fn read_index(&self) -> u64 {
        match self.cursor {
            ReadCursor::At(index) => index,
            ReadCursor::Latest => self.write_index(),
        }
    }
}

impl Drop for ItemChannel {
    fn drop(&mut self) {
        if self.role != Role::Writer {
            return;
        }
        let _ = self.set_close_flag(true);
        self.segment.close();
        if let Err(e) = Segment::<DefaultBackend>::remove(self.segment.name()) {
            mr_log!(
                Warn,
                "Failed to remove item channel '{}': {}",
                self.segment.name(),
                e
            );
        }
    }
}

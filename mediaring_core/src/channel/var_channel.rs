//! Variable-size item channel over a [`RingChannel`].
//!
//! The channel head ([`VarHead`]) sits at the start of the ring's fixed user
//! area, followed by the caller header. The arena holds `item_count + 1`
//! maximum-size items, so the last `item_count` commits are always intact.

use std::sync::atomic::Ordering;
use std::time::Duration;

use mediaring_types::MediaHeadRaw;

use crate::channel::head::{is_fresh, touch, VarHead, VAR_HEAD_SIZE};
use crate::channel::{poll_until, ExistenceProbe, Readiness, Role};
use crate::config::{ChannelConfig, ProtocolVersion};
use crate::error::{MediaRingError, MediaRingResult};
use crate::memory::platform::{align_up, WORD};
use crate::memory::{now_ms, DefaultBackend, Segment};
use crate::{mr_log, mr_log_limited};
use crate::ring::{RingChannel, SeekTo};

/// Ring-based item channel handle.
#[derive(Debug)]
pub struct VarItemChannel {
    ring: RingChannel,
    config: ChannelConfig,
    role: Role,
    version: ProtocolVersion,
    item_count: usize,
    item_length: usize,
    probe: ExistenceProbe,
    skipped: u64,
}

fn arena_size(item_count: usize, item_length: usize) -> Option<usize> {
    item_count
        .checked_add(1)?
        .checked_mul(align_up(item_length, WORD))
}

impl VarItemChannel {
    /// Create the channel, or reuse a same-named one.
    ///
    /// A reused ring smaller than requested is recreated when `clean_data`
    /// is given (after calling it with the name) and kept as-is otherwise.
    pub fn create_or_open(
        name: &str,
        header_len: usize,
        item_count: usize,
        item_length: usize,
        config: &ChannelConfig,
        clean_data: Option<&mut dyn FnMut(&str)>,
    ) -> MediaRingResult<Self> {
        config.validate()?;
        if item_count < 2 || item_length == 0 {
            return Err(MediaRingError::config(format!(
                "channel '{}': needs at least 2 items of non-zero length, got {} x {}",
                name, item_count, item_length
            )));
        }
        if u32::try_from(item_count).is_err() || u32::try_from(item_length).is_err() {
            return Err(MediaRingError::config(format!(
                "channel '{}': geometry {} x {} out of range",
                name, item_count, item_length
            )));
        }
        let payload = arena_size(item_count, item_length).ok_or_else(|| {
            MediaRingError::config(format!("channel '{}': geometry overflows", name))
        })?;
        let user = VAR_HEAD_SIZE + header_len;

        let mut ring = RingChannel::create(name, user, payload, item_count, config.mode)?;
        let smaller = (ring.payload_size() as usize) < payload
            || (ring.max_items() as usize) < item_count
            || ring.fixed_user().len() < user;
        if !ring.is_owner() && smaller {
            if let Some(clean) = clean_data {
                mr_log!(Info, "Recreating channel '{}' with larger geometry", name);
                clean(name);
                ring.close();
                Segment::<DefaultBackend>::remove(name)?;
                ring = RingChannel::create(name, user, payload, item_count, config.mode)?;
            }
        }
        if ring.fixed_user().len() < VAR_HEAD_SIZE {
            return Err(MediaRingError::corrupt(
                name,
                "fixed user area smaller than the channel head",
            ));
        }

        let mut channel = Self {
            ring,
            config: config.clone(),
            role: Role::Reader,
            version: config.protocol,
            item_count,
            item_length,
            probe: ExistenceProbe::new(config.probe_interval()),
            skipped: 0,
        };
        let head = channel.head()?;
        if channel.ring.is_owner() {
            head.item_count.store(item_count as u32, Ordering::Relaxed);
            head.item_length.store(item_length as u32, Ordering::Relaxed);
            head.last_read_time_stamp.store(0, Ordering::Relaxed);
            head.close_flag.store(0, Ordering::Relaxed);
            head.version
                .store(config.protocol.as_u32(), Ordering::Release);
            mr_log!(
                Info,
                "Created item channel '{}': {} items up to {} bytes, protocol {:?}",
                name,
                item_count,
                item_length,
                config.protocol
            );
        } else {
            let existing = head.version.load(Ordering::Acquire);
            if existing == 0 {
                head.item_count.store(item_count as u32, Ordering::Relaxed);
                head.item_length.store(item_length as u32, Ordering::Relaxed);
                head.version
                    .store(config.protocol.as_u32(), Ordering::Release);
            }
            head.close_flag.store(0, Ordering::Release);
            channel.load_geometry()?;
        }
        channel.role = Role::Writer;
        Ok(channel)
    }

    /// Open an existing channel as a reader. Waits up to the configured
    /// open budget for the segment to appear and the version to be stamped.
    pub fn open(name: &str, config: &ChannelConfig) -> MediaRingResult<Self> {
        config.validate()?;
        let wait = config.open_wait();
        let ring = poll_until(wait, Duration::from_millis(1), || match RingChannel::open(name) {
            Ok(ring) => Ok(Some(ring)),
            Err(MediaRingError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        })?
        .ok_or_else(|| MediaRingError::NotFound(name.to_string()))?;
        if ring.fixed_user().len() < VAR_HEAD_SIZE {
            return Err(MediaRingError::corrupt(
                name,
                "fixed user area smaller than the channel head",
            ));
        }

        let mut channel = Self {
            ring,
            config: config.clone(),
            role: Role::Reader,
            version: config.protocol,
            item_count: 0,
            item_length: 0,
            probe: ExistenceProbe::new(config.probe_interval()),
            skipped: 0,
        };
        let head = channel.head()?;
        poll_until(wait, Duration::from_millis(1), || {
            Ok((head.version.load(Ordering::Acquire) != 0).then_some(()))
        })?
        .ok_or_else(|| {
            MediaRingError::Timeout(format!("channel '{}' version was never stamped", name))
        })?;
        channel.load_geometry()?;
        log::debug!(
            "Opened item channel '{}' ({} items up to {} bytes, protocol {:?})",
            name,
            channel.item_count,
            channel.item_length,
            channel.version
        );
        Ok(channel)
    }

    fn load_geometry(&mut self) -> MediaRingResult<()> {
        let name = self.ring.name();
        let head = self.head()?;
        let raw = head.version.load(Ordering::Acquire);
        let version = ProtocolVersion::from_u32(raw).ok_or_else(|| {
            MediaRingError::corrupt(name, format!("unknown protocol version {}", raw))
        })?;
        let item_count = head.item_count.load(Ordering::Acquire) as usize;
        let item_length = head.item_length.load(Ordering::Acquire) as usize;
        let fits = arena_size(item_count, item_length)
            .is_some_and(|size| size as u64 <= self.ring.payload_size());
        if item_count == 0 || item_length == 0 || !fits {
            return Err(MediaRingError::corrupt(
                name,
                format!(
                    "{} items of {} bytes do not fit the {} byte arena",
                    item_count,
                    item_length,
                    self.ring.payload_size()
                ),
            ));
        }
        self.version = version;
        self.item_count = item_count;
        self.item_length = item_length;
        Ok(())
    }

    fn head(&self) -> MediaRingResult<&VarHead> {
        let name = self.ring.name();
        let ptr = self
            .ring
            .fixed_user_ptr()
            .ok_or_else(|| MediaRingError::invalid_input(format!("channel '{}' is closed", name)))?;
        if self.ring.fixed_user().len() < VAR_HEAD_SIZE {
            return Err(MediaRingError::corrupt(name, "channel head outside the user area"));
        }
        // SAFETY: the user area starts word aligned and holds VAR_HEAD_SIZE
        // bytes; the head consists of atomics only
        Ok(unsafe { &*(ptr as *const VarHead) })
    }

    fn require(&self, role: Role, op: &str) -> MediaRingResult<()> {
        if self.role == role {
            return Ok(());
        }
        Err(MediaRingError::role(format!(
            "{} on {:?} handle of channel '{}'",
            op,
            self.role,
            self.ring.name()
        )))
    }

    fn probe_removed(&mut self) -> MediaRingResult<()> {
        let name = self.ring.name();
        if self.probe.check(|| Segment::<DefaultBackend>::exists(name)) {
            return Ok(());
        }
        mr_log_limited!(Warn, "item channel '{}' was removed from the system", name);
        Err(MediaRingError::Removed(name.to_string()))
    }

    /// Writer readiness. The ring overwrites the oldest item, so a live,
    /// consistent segment is always ready.
    pub fn sendable(&mut self, _timeout: Duration) -> MediaRingResult<Readiness> {
        self.require(Role::Writer, "sendable")?;
        self.probe_removed()?;
        if !self.ring.is_writeable() {
            return Err(MediaRingError::corrupt(
                self.ring.name(),
                "control block no longer consistent",
            ));
        }
        Ok(Readiness::Ready)
    }

    /// Reader readiness, polling up to `timeout`.
    pub fn readable(&mut self, timeout: Duration) -> MediaRingResult<Readiness> {
        self.require(Role::Reader, "readable")?;
        // a poll counts as a read attempt for a cursor seeked to the write end
        self.ring.pin_cursor();
        let quantum = self.config.poll_quantum();
        let ready = poll_until(timeout, quantum, || {
            let head = self.head()?;
            if head.close_flag.load(Ordering::Acquire) != 0 {
                return Ok(Some(Readiness::Closed));
            }
            touch(&head.last_read_time_stamp, now_ms());
            self.probe_removed()?;
            self.catch_up()?;
            Ok(self.ring.read_no_step().map(|_| Readiness::Ready))
        })?;
        Ok(ready.unwrap_or(Readiness::Wait))
    }

    /// Fast-forward a cursor that fell a full lap behind, or whose slot was
    /// already overwritten.
    fn catch_up(&mut self) -> MediaRingResult<()> {
        if !self.ring.is_readable() {
            return Ok(());
        }
        let capacity = self.ring.max_items();
        let read = self.ring.read_index();
        let gap = self.ring.gap();
        if gap < capacity.max(3) && self.ring.is_committed(read) {
            return Ok(());
        }
        let oldest = self.ring.oldest_index();
        if oldest == read {
            return Ok(());
        }
        let skipped = (oldest + self.ring.max_item_index() - read) % self.ring.max_item_index();
        self.skipped += skipped;
        mr_log_limited!(
            Warn,
            "item channel '{}': reader {} items behind, skipping {}",
            self.ring.name(),
            gap,
            skipped
        );
        self.ring.seek(SeekTo::Index(oldest))
    }

    /// Items dropped by backlog catch-up.
    pub fn skipped_items(&self) -> u64 {
        self.skipped
    }

    pub fn has_readers(&self, timeout: Duration) -> bool {
        match self.head() {
            Ok(head) => is_fresh(
                &head.last_read_time_stamp,
                now_ms(),
                timeout.as_millis() as u64,
            ),
            Err(_) => false,
        }
    }

    pub fn has_live_readers(&self) -> bool {
        self.has_readers(self.config.reader_timeout())
    }

    pub fn set_close_flag(&self, closed: bool) -> MediaRingResult<()> {
        self.head()?
            .close_flag
            .store(u32::from(closed), Ordering::Release);
        Ok(())
    }

    pub fn check_close_flag(&self) -> bool {
        self.head()
            .map(|head| head.close_flag.load(Ordering::Acquire) != 0)
            .unwrap_or(false)
    }

    /// Unlink the named segment. Idempotent.
    pub fn remove_from_kernel(name: &str) -> MediaRingResult<bool> {
        Segment::<DefaultBackend>::remove(name)
    }

    fn check_size(&self, size: usize) -> MediaRingResult<()> {
        if size > self.item_length {
            return Err(MediaRingError::invalid_input(format!(
                "item of {} bytes exceeds item length {}",
                size, self.item_length
            )));
        }
        Ok(())
    }

    /// Reserve a span of `size` bytes for an in-place write.
    pub fn apply(&mut self, size: usize) -> MediaRingResult<&mut [u8]> {
        self.require(Role::Writer, "apply")?;
        self.check_size(size)?;
        self.ring.apply(size)
    }

    pub fn applied_mut(&mut self) -> Option<&mut [u8]> {
        self.ring.applied_mut()
    }

    pub fn commit_applied(&mut self, size: usize) -> MediaRingResult<u64> {
        self.ring.commit_applied(size)
    }

    pub fn write(&mut self, buf: &[u8]) -> MediaRingResult<u64> {
        self.require(Role::Writer, "write")?;
        self.check_size(buf.len())?;
        self.ring.write(buf)
    }

    pub fn read(&mut self) -> Option<&[u8]> {
        self.ring.read()
    }

    pub fn read_no_step(&self) -> Option<&[u8]> {
        self.ring.read_no_step()
    }

    pub fn read_by_pos(&self, pos: u64) -> Option<&[u8]> {
        self.ring.read_by_pos(pos)
    }

    pub fn step_read_index(&mut self) {
        self.ring.step();
    }

    pub fn seek(&mut self, to: SeekTo) -> MediaRingResult<()> {
        self.ring.seek(to)
    }

    /// Stream head last published by the writer.
    pub fn media_head(&self) -> Option<MediaHeadRaw> {
        self.head().ok()?.load_media_head()
    }

    pub fn store_media_head(&self, head: &MediaHeadRaw) -> MediaRingResult<()> {
        self.require(Role::Writer, "store_media_head")?;
        self.head()?.store_media_head(head);
        Ok(())
    }

    fn header_range(&self) -> std::ops::Range<usize> {
        VAR_HEAD_SIZE..self.ring.fixed_user().len().max(VAR_HEAD_SIZE)
    }

    /// Caller header area after the channel head.
    pub fn header(&self) -> &[u8] {
        let range = self.header_range();
        &self.ring.fixed_user()[range]
    }

    pub fn header_mut(&mut self) -> &mut [u8] {
        let range = self.header_range();
        &mut self.ring.fixed_user_mut()[range]
    }

    pub fn version(&self) -> ProtocolVersion {
        self.version
    }

    pub fn is_creator(&self) -> bool {
        self.role == Role::Writer
    }

    pub fn name(&self) -> &str {
        self.ring.name()
    }

    pub fn item_count(&self) -> usize {
        self.item_count
    }

    pub fn item_length(&self) -> usize {
        self.item_length
    }

    pub fn write_index(&self) -> u64 {
        self.ring.write_index()
    }

    pub fn read_index(&self) -> u64 {
        self.ring.read_index()
    }

    pub fn ring(&self) -> &RingChannel {
        &self.ring
    }

    /// Raise the close flag (writer) and unmap. The writer also unlinks.
    pub fn destroy(&mut self) -> MediaRingResult<()> {
        let writer = self.role == Role::Writer;
        if writer {
            let _ = self.set_close_flag(true);
        }
        self.ring.close();
        // later destroys only unmap
        self.role = Role::Reader;
        if writer {
            Segment::<DefaultBackend>::remove(self.ring.name())?;
        }
        Ok(())
    }
}

impl Drop for VarItemChannel {
    fn drop(&mut self) {
        if let Err(e) = self.destroy() {
            mr_log!(Warn, "Failed to remove item channel '{}': {}", self.ring.name(), e);
        }
    }
}

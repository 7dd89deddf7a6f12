//! Media item channel: a [`VarItemChannel`] speaking the item protocol.
//!
//! ```rust,ignore
//! use mediaring_core::{ChannelConfig, MediaChannel, Polled};
//! let config = ChannelConfig::default();
//! let mut tx = MediaChannel::create_or_open("camera0", 8, 1 << 20, &config)?;
//! tx.send_item(&head, &item)?;
//!
//! let mut rx = MediaChannel::open("camera0", &config)?;
//! if let Polled::Ready((head, item)) = rx.poll_read_item(Duration::from_millis(40))? {
//!     // parts borrow shared memory until the next read
//! }
//! ```

use std::ops::Range;
use std::time::Duration;

use mediaring_types::{MediaHead, MediaHeadRaw, MediaItem, Payload, PayloadKind};

use crate::channel::{Polled, Readiness, VarItemChannel};
use crate::config::{ChannelConfig, ProtocolVersion};
use crate::error::{MediaRingError, MediaRingResult};
use crate::{mediaring_internal, mr_log_limited};
use crate::protocol::{ItemLayout, ItemProtocol};
use crate::ring::SeekTo;

/// One media stream endpoint.
#[derive(Debug)]
pub struct MediaChannel {
    channel: VarItemChannel,
    protocol: ItemProtocol,
    /// Head last stored in the shared head region.
    published_head: Option<MediaHead>,
}

impl MediaChannel {
    /// Create (or reuse) the channel as its writer. `item_length` bounds one
    /// encoded item including its header.
    pub fn create_or_open(
        name: &str,
        item_count: usize,
        item_length: usize,
        config: &ChannelConfig,
    ) -> MediaRingResult<Self> {
        let channel = VarItemChannel::create_or_open(
            name,
            config.fixed_user_size,
            item_count,
            item_length,
            config,
            None,
        )?;
        Ok(Self::wrap(channel))
    }

    /// Like [`create_or_open`](Self::create_or_open), recreating a smaller
    /// existing segment after calling `clean_data`.
    pub fn create_or_recreate(
        name: &str,
        item_count: usize,
        item_length: usize,
        config: &ChannelConfig,
        clean_data: &mut dyn FnMut(&str),
    ) -> MediaRingResult<Self> {
        let channel = VarItemChannel::create_or_open(
            name,
            config.fixed_user_size,
            item_count,
            item_length,
            config,
            Some(clean_data),
        )?;
        Ok(Self::wrap(channel))
    }

    pub fn open(name: &str, config: &ChannelConfig) -> MediaRingResult<Self> {
        Ok(Self::wrap(VarItemChannel::open(name, config)?))
    }

    fn wrap(channel: VarItemChannel) -> Self {
        let protocol = ItemProtocol::new(channel.version());
        Self {
            channel,
            protocol,
            published_head: None,
        }
    }

    /// Close the handle. The writer raises the close flag and unlinks.
    pub fn destroy(mut self) -> MediaRingResult<()> {
        self.channel.destroy()
    }

    pub fn version(&self) -> ProtocolVersion {
        self.protocol.version()
    }

    pub fn is_creator(&self) -> bool {
        self.channel.is_creator()
    }

    pub fn name(&self) -> &str {
        self.channel.name()
    }

    pub fn write_index(&self) -> u64 {
        self.channel.write_index()
    }

    pub fn read_index(&self) -> u64 {
        self.channel.read_index()
    }

    pub fn seek_read_index(&mut self, to: SeekTo) -> MediaRingResult<()> {
        self.channel.seek(to)
    }

    pub fn poll_sendable(&mut self, timeout: Duration) -> MediaRingResult<Readiness> {
        self.channel.sendable(timeout)
    }

    pub fn poll_readable(&mut self, timeout: Duration) -> MediaRingResult<Readiness> {
        self.channel.readable(timeout)
    }

    /// Stream head the writer last published.
    pub fn head(&self) -> Option<MediaHead> {
        self.channel.media_head().map(|raw| MediaHead::from(&raw))
    }

    fn check_fits(&self, size: usize) -> MediaRingResult<()> {
        if size > self.channel.item_length() {
            return Err(MediaRingError::invalid_input(format!(
                "encoded item of {} bytes exceeds item length {}",
                size,
                self.channel.item_length()
            )));
        }
        Ok(())
    }

    /// Encode and publish one item. Returns its index.
    pub fn send_item(&mut self, head: &MediaHead, item: &MediaItem<'_>) -> MediaRingResult<u64> {
        crate::protocol::validate(head, item)?;
        let layout = self.protocol.write_layout(head, item.part_lengths())?;
        self.check_fits(layout.total_size)?;
        let slot = self.channel.apply(layout.total_size)?;
        let used = self.protocol.write_item(head, item, slot)?;
        let index = self.channel.commit_applied(used)?;
        self.protocol.mark_sent(&layout);
        publish_head(&self.channel, &mut self.published_head, head)?;
        Ok(index)
    }

    /// Reserve a slot for an item with the given part lengths and hand it
    /// out for in-place filling.
    pub fn apply_item_buffer(
        &mut self,
        head: &MediaHead,
        lengths: [usize; PayloadKind::COUNT],
    ) -> MediaRingResult<ItemLoan<'_>> {
        let layout = self.protocol.write_layout(head, lengths)?;
        self.check_fits(layout.total_size)?;
        self.channel.apply(layout.total_size)?;
        Ok(ItemLoan {
            channel: &mut self.channel,
            protocol: &mut self.protocol,
            published_head: &mut self.published_head,
            head: head.clone(),
            layout,
            header_written: false,
        })
    }

    fn decode<'a>(
        protocol: &mut ItemProtocol,
        name: &str,
        slot: &'a [u8],
    ) -> MediaRingResult<(MediaHead, MediaItem<'a>)> {
        protocol.read_item(slot).inspect_err(|e| {
            mr_log_limited!(Warn, "channel '{}': undecodable item: {}", name, e);
        })
    }

    /// Wait up to `timeout` for an item, then read it and advance.
    pub fn poll_read_item(
        &mut self,
        timeout: Duration,
    ) -> MediaRingResult<Polled<(MediaHead, MediaItem<'_>)>> {
        match self.channel.readable(timeout)? {
            Readiness::Ready => {}
            Readiness::Wait => return Ok(Polled::Wait),
            Readiness::Closed => return Ok(Polled::Closed),
        }
        let name = self.channel.name().to_string();
        let Some(slot) = self.channel.read() else {
            return Ok(Polled::Wait);
        };
        Self::decode(&mut self.protocol, &name, slot).map(Polled::Ready)
    }

    /// Decode the item at the cursor without advancing.
    pub fn read_item_without_step(&mut self) -> MediaRingResult<Option<(MediaHead, MediaItem<'_>)>> {
        let Some(slot) = self.channel.read_no_step() else {
            return Ok(None);
        };
        Self::decode(&mut self.protocol, self.channel.name(), slot).map(Some)
    }

    pub fn step_read_index(&mut self) {
        self.channel.step_read_index();
    }

    /// Scan backward from the newest item until `predicate` matches. On a
    /// match the read cursor is placed on that item and its index returned.
    pub fn search_items<F>(&mut self, mut predicate: F) -> MediaRingResult<Option<u64>>
    where
        F: FnMut(&MediaHead, &MediaItem<'_>) -> bool,
    {
        let ring = self.channel.ring();
        let mut pos = ring.write_index();
        let mut found = None;
        for _ in 0..ring.max_items() {
            pos = ring.previous_index_step(pos);
            let Some(slot) = self.channel.read_by_pos(pos) else {
                break;
            };
            let (head, item) = match self.protocol.read_item(slot) {
                Ok(decoded) => decoded,
                Err(e) => {
                    mr_log_limited!(Debug, "search stopped at {}: {}", pos, e);
                    break;
                }
            };
            if predicate(&head, &item) {
                found = Some(pos);
                break;
            }
        }
        if let Some(pos) = found {
            self.channel.seek(SeekTo::Index(pos))?;
        }
        Ok(found)
    }

    /// Unlink the named segment. Idempotent.
    pub fn remove_from_system(name: &str) -> MediaRingResult<bool> {
        VarItemChannel::remove_from_kernel(name)
    }

    pub fn has_readers(&self, timeout: Duration) -> bool {
        self.channel.has_readers(timeout)
    }

    pub fn set_close_flag(&self, closed: bool) -> MediaRingResult<()> {
        self.channel.set_close_flag(closed)
    }

    pub fn check_close_flag(&self) -> bool {
        self.channel.check_close_flag()
    }

    /// Items dropped by backlog catch-up on this reader.
    pub fn skipped_items(&self) -> u64 {
        self.channel.skipped_items()
    }

    pub fn header(&self) -> &[u8] {
        self.channel.header()
    }

    pub fn header_mut(&mut self) -> &mut [u8] {
        self.channel.header_mut()
    }

    pub fn channel(&self) -> &VarItemChannel {
        &self.channel
    }
}

/// Store `head` in the shared head region when it differs from the last
/// one stored. Called only after the item that uses it is committed.
fn publish_head(
    channel: &VarItemChannel,
    published: &mut Option<MediaHead>,
    head: &MediaHead,
) -> MediaRingResult<()> {
    if published.as_ref() == Some(head) {
        return Ok(());
    }
    channel.store_media_head(&MediaHeadRaw::from(head))?;
    *published = Some(head.clone());
    Ok(())
}

/// The loan's part of the pending apply. The loan borrows the channel
/// mutably, so a missing apply is a bug.
fn pending_span(channel: &mut VarItemChannel, range: Range<usize>) -> MediaRingResult<&mut [u8]> {
    channel
        .applied_mut()
        .and_then(|span| span.get_mut(range))
        .ok_or_else(|| mediaring_internal!("applied slot is no longer pending"))
}

/// A reserved slot being filled in place.
///
/// Fill the parts through [`region_mut`](Self::region_mut) and its
/// shorthands, stamp the header with [`write_header`](Self::write_header),
/// then [`commit`](Self::commit). Dropping the loan abandons the slot and
/// leaves both the shared head and the layout memory as they were.
#[derive(Debug)]
pub struct ItemLoan<'a> {
    channel: &'a mut VarItemChannel,
    protocol: &'a mut ItemProtocol,
    published_head: &'a mut Option<MediaHead>,
    head: MediaHead,
    layout: ItemLayout,
    header_written: bool,
}

impl ItemLoan<'_> {
    pub fn layout(&self) -> &ItemLayout {
        &self.layout
    }

    /// Bytes reserved for one part.
    pub fn region_mut(&mut self, kind: PayloadKind) -> MediaRingResult<&mut [u8]> {
        let range = self.layout.range(kind);
        pending_span(self.channel, range)
    }

    pub fn video_mut(&mut self) -> MediaRingResult<&mut [u8]> {
        self.region_mut(PayloadKind::Video)
    }

    pub fn audio_mut(&mut self) -> MediaRingResult<&mut [u8]> {
        self.region_mut(PayloadKind::Audio)
    }

    pub fn user_data_mut(&mut self) -> MediaRingResult<&mut [u8]> {
        self.region_mut(PayloadKind::UserData)
    }

    /// Stamp the header over the filled parts. Parts of `item` should be
    /// `InPlace` with the lengths the loan was made for; `Borrowed` parts
    /// are copied in first.
    pub fn write_header(&mut self, item: &MediaItem<'_>) -> MediaRingResult<()> {
        let layout = &self.layout;
        let slot = pending_span(self.channel, 0..layout.total_size)?;
        for kind in PayloadKind::ALL {
            if let Payload::Borrowed(bytes) = item.part(kind) {
                if bytes.len() == layout.lengths[kind.index()] {
                    slot[layout.range(kind)].copy_from_slice(bytes);
                }
            }
        }
        self.protocol
            .write_item_header_only(&self.head, item, layout, slot)?;
        self.header_written = true;
        Ok(())
    }

    /// Publish the slot. Returns its index.
    pub fn commit(self) -> MediaRingResult<u64> {
        if !self.header_written {
            return Err(MediaRingError::invalid_input(
                "commit before the item header was written",
            ));
        }
        let index = self.channel.commit_applied(self.layout.total_size)?;
        self.protocol.mark_sent(&self.layout);
        publish_head(self.channel, self.published_head, &self.head)?;
        Ok(index)
    }
}

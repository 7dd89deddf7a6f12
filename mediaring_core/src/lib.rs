//! # mediaring core
//!
//! Shared-memory transport for timestamped media items: one writer process,
//! any number of independent reader processes, polling only.
//!
//! - **Memory**: portable named segments (POSIX, System-V, Windows mappings)
//! - **Ring**: checksummed single-writer ring with an index table and a
//!   circular payload arena
//! - **Channel**: creator/reader roles, liveness, `sendable`/`readable`
//!   polling with backlog catch-up
//! - **Protocol**: versioned layout of one media item into one ring slot,
//!   with a zero-copy write path
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use mediaring_core::{ChannelConfig, MediaChannel, Polled};
//! use mediaring_types::{MediaHead, MediaItem, Payload};
//!
//! # fn main() -> mediaring_core::MediaRingResult<()> {
//! let config = ChannelConfig::default();
//! let mut tx = MediaChannel::create_or_open("demo", 8, 64 * 1024, &config)?;
//! let item = MediaItem {
//!     user_data: Payload::Borrowed(b"hello-shm"),
//!     ..Default::default()
//! };
//! tx.send_item(&MediaHead::default(), &item)?;
//!
//! let mut rx = MediaChannel::open("demo", &config)?;
//! rx.seek_read_index(mediaring_core::SeekTo::Oldest)?;
//! if let Polled::Ready((_head, item)) = rx.poll_read_item(Duration::from_millis(10))? {
//!     assert_eq!(item.user_data.as_slice(), Some(&b"hello-shm"[..]));
//! }
//! # Ok(())
//! # }
//! ```

pub mod channel;
pub mod codec;
pub mod config;
pub mod error;
pub mod logging;
pub mod memory;
pub mod protocol;
pub mod ring;

pub use channel::{
    FixedGeometry, ItemChannel, ItemLoan, MediaChannel, Polled, Readiness, VarItemChannel,
    ITEM_CHANNEL_VERSION,
};
pub use codec::{ChannelLayoutCodec, CompressedLayoutCodec, Compressor, ZlibCodec};
pub use config::{ChannelConfig, ProtocolVersion};
pub use error::{MediaRingError, MediaRingResult};
pub use logging::{init_logging, LogSink};
pub use memory::{DefaultBackend, Segment, ShmBackend};
pub use protocol::{ItemHeader, ItemLayout, ItemProtocol};
pub use ring::{ReadCursor, RingChannel, RingState, SeekTo};

pub use mediaring_types;

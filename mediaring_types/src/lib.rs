//! # mediaring types - media item types with zero mediaring dependencies
//!
//! This is a leaf crate providing the canonical definitions of:
//! - [`FourCc`] - Four character codec / pixel format tags
//! - [`MediaHead`] - Stream geometry shared by every item (video size, frame
//!   rate, audio format) and its fixed-size shared-memory form [`MediaHeadRaw`]
//! - [`AudioChannelLayout`] - Speaker mask plus optional explicit channel order
//! - [`MediaItem`] - One logical media record made of [`Payload`] parts
//! - [`Timecode`] - SMPTE-style timecode packed into the timecode part
//!
//! `mediaring_core` lays these out into ring slots; this crate knows nothing
//! about shared memory.

pub mod channel_layout;
pub mod fourcc;
pub mod head;
pub mod item;
pub mod timecode;

pub use channel_layout::{AudioChannelLayout, ChannelPosition};
pub use fourcc::FourCc;
pub use head::{AudioParams, Interlace, MediaHead, MediaHeadRaw, VideoParams};
pub use item::{FrameFlags, MediaItem, Payload, PayloadKind, PictureType};
pub use timecode::Timecode;

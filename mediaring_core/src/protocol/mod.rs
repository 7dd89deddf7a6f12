//! Versioned item protocol.
//!
//! Lays one [`MediaItem`](mediaring_types::MediaItem) out into one ring slot:
//! a fixed sub-header followed by the payload parts. Legacy slots recompute
//! part offsets from the lengths; current slots store them and may carry a
//! key-value area with the audio channel layout.

pub mod header;
mod item;
pub mod kv;

pub use header::{ItemHeader, ItemHeaderPrefix, ItemHeaderV1, ItemHeaderV2};
pub use item::{validate, ItemLayout, ItemProtocol, MIN_SAMPLE_RATE};

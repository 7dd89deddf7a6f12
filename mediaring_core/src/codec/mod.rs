// Collaborator codecs: buffer compression and the channel-layout blob

pub mod channel_layout;
pub mod compression;

pub use channel_layout::{ChannelLayoutCodec, CompressedLayoutCodec};
pub use compression::{Compressor, ZlibCodec};

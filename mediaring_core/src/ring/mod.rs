// Checksummed single-writer ring over a shared segment

mod channel;
pub mod layout;

pub use channel::{ReadCursor, RingChannel, RingState, SeekTo};
pub use layout::{IndexEntryRaw, RingLayout, MAGIC};

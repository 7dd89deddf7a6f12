// Shared memory segments for mediaring

pub mod platform;
#[cfg(unix)]
mod posix;
pub mod segment;
#[cfg(unix)]
mod sysv;
#[cfg(windows)]
mod windows;

pub use platform::now_ms;
#[cfg(unix)]
pub use posix::PosixShm;
pub use segment::{DefaultBackend, Segment, ShmBackend};
#[cfg(unix)]
pub use sysv::SysVShm;
#[cfg(windows)]
pub use windows::WindowsShm;

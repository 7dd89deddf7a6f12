// Segment naming and platform directories.
//
// Each backend maps a channel name onto its own OS namespace:
// - POSIX (Linux): /dev/shm/mediaring_<name>, the same object shm_open("/mediaring_<name>") creates
// - POSIX (macOS): shm_open("/mediaring_<name>")
// - System-V:      a key-file /tmp/mediaring/sysv/<name>.key fed to ftok()
// - Windows:       Local\mediaring_<name>

use std::path::PathBuf;

use crate::error::{MediaRingError, MediaRingResult};

/// Prefix applied to every OS object name.
pub const NAME_PREFIX: &str = "mediaring_";

/// Longest OS object or file name component, prefix included.
pub const MAX_OS_NAME_LEN: usize = 255;

/// Longest accepted channel name in bytes.
pub const MAX_NAME_LEN: usize = MAX_OS_NAME_LEN - NAME_PREFIX.len();

/// Project id passed to `ftok` for System-V keys.
#[cfg(unix)]
pub(crate) const SYSV_PROJECT_ID: i32 = b'M' as i32;

/// Check a channel name before it reaches any OS call.
pub fn validate_name(name: &str) -> MediaRingResult<()> {
    if name.is_empty() {
        return Err(MediaRingError::config("segment name must not be empty"));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(MediaRingError::config(format!(
            "segment name '{}...' is {} bytes, maximum is {}",
            name.chars().take(16).collect::<String>(),
            name.len(),
            MAX_NAME_LEN
        )));
    }
    if let Some(bad) = name
        .chars()
        .find(|c| !c.is_ascii() || c.is_ascii_control() || *c == '/' || *c == '\\')
    {
        return Err(MediaRingError::config(format!(
            "segment name '{}' contains invalid character {:?}",
            name.escape_debug(),
            bad
        )));
    }
    Ok(())
}

/// Directory holding POSIX segment files on non-macOS unix.
///
/// `/dev/shm` is tmpfs (RAM-backed) on Linux; elsewhere fall back to a
/// directory under `/tmp`.
#[cfg(all(unix, not(target_os = "macos")))]
pub fn shm_dir() -> PathBuf {
    let dev_shm = PathBuf::from("/dev/shm");
    if dev_shm.is_dir() {
        dev_shm
    } else {
        PathBuf::from("/tmp/mediaring/shm")
    }
}

/// Backing file of a POSIX segment.
#[cfg(all(unix, not(target_os = "macos")))]
pub fn posix_path(name: &str) -> PathBuf {
    shm_dir().join(format!("{}{}", NAME_PREFIX, name))
}

/// `shm_open` object name.
#[cfg(target_os = "macos")]
pub fn posix_object_name(name: &str) -> String {
    format!("/{}{}", NAME_PREFIX, name)
}

/// Directory holding System-V key-files.
#[cfg(unix)]
pub fn sysv_key_dir() -> PathBuf {
    PathBuf::from("/tmp/mediaring/sysv")
}

/// Key-file used to derive the System-V key of a segment.
#[cfg(unix)]
pub fn sysv_key_path(name: &str) -> PathBuf {
    sysv_key_dir().join(format!("{}.key", name))
}

/// Null-terminated wide mapping name.
#[cfg(windows)]
pub fn windows_mapping_name(name: &str) -> Vec<u16> {
    format!("Local\\{}{}", NAME_PREFIX, name)
        .encode_utf16()
        .chain(std::iter::once(0))
        .collect()
}

/// Milliseconds since the Unix epoch, the clock used for heartbeats.
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Machine word size; ring spans are aligned to it.
pub const WORD: usize = std::mem::size_of::<usize>();

#[inline]
pub const fn align_up(n: usize, align: usize) -> usize {
    (n + align - 1) / align * align
}

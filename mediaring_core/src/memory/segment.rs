//! One OS shared-memory mapping.
//!
//! A [`Segment`] is a byte pointer plus its length and an owner flag. It does
//! not interpret the bytes. The OS mechanism sits behind [`ShmBackend`], and
//! the backend is picked at build time through [`DefaultBackend`]:
//!
//! | target | default backend |
//! |---|---|
//! | unix | [`PosixShm`](super::PosixShm) |
//! | unix + `sysv` feature | [`SysVShm`](super::SysVShm) |
//! | windows | [`WindowsShm`](super::WindowsShm) |

use std::fmt;
use std::ptr::NonNull;

use crate::error::{MediaRingError, MediaRingResult};
use crate::memory::platform::validate_name;
use crate::mr_log;

/// OS shared-memory mechanism.
///
/// Dropping a backend value unmaps it; only [`ShmBackend::remove`] deletes
/// the OS object.
pub trait ShmBackend: Send + Sized {
    /// Short label used in log lines.
    const KIND: &'static str;

    /// Open the named object if it exists, otherwise create it with exactly
    /// `size` zeroed bytes. The flag is `true` only for a fresh creation; an
    /// existing object is mapped at its own size.
    fn create(name: &str, size: usize, mode: u32) -> MediaRingResult<(Self, bool)>;

    /// Map an existing object at its current size.
    fn open(name: &str) -> MediaRingResult<Self>;

    fn as_ptr(&self) -> *mut u8;

    fn len(&self) -> usize;

    /// Whether the OS object is still reachable by name.
    fn exists(name: &str) -> bool;

    /// Delete the OS object. `Ok(false)` when there was nothing to delete.
    fn remove(name: &str) -> MediaRingResult<bool>;
}

#[cfg(all(unix, feature = "sysv"))]
pub type DefaultBackend = super::SysVShm;
#[cfg(all(unix, not(feature = "sysv")))]
pub type DefaultBackend = super::PosixShm;
#[cfg(windows)]
pub type DefaultBackend = super::WindowsShm;

/// Mapped shared-memory segment.
///
/// The creator of the OS object is its owner: dropping an owner segment
/// unmaps it and removes the object, dropping any other segment only unmaps.
pub struct Segment<B: ShmBackend = DefaultBackend> {
    mapping: Option<B>,
    name: String,
    len: usize,
    is_owner: bool,
}

impl<B: ShmBackend> Segment<B> {
    /// Open or create `name`. Returns the segment and whether it was freshly
    /// created; for a reused segment callers must re-validate the geometry
    /// since [`Segment::size`] is the pre-existing size.
    pub fn create(name: &str, size: usize, mode: u32) -> MediaRingResult<(Self, bool)> {
        validate_name(name)?;
        if size == 0 {
            return Err(MediaRingError::config(format!(
                "segment '{}' requested with zero size",
                name
            )));
        }
        let (mapping, is_new) = B::create(name, size, mode)?;
        let len = mapping.len();
        if len == 0 {
            return Err(MediaRingError::corrupt(name, "mapped zero bytes"));
        }
        log::debug!(
            "{} segment '{}' {} ({} bytes)",
            B::KIND,
            name,
            if is_new { "created" } else { "reused" },
            len
        );
        Ok((
            Self {
                mapping: Some(mapping),
                name: name.to_string(),
                len,
                is_owner: is_new,
            },
            is_new,
        ))
    }

    /// Map an existing segment. Never the owner.
    pub fn open(name: &str) -> MediaRingResult<Self> {
        validate_name(name)?;
        let mapping = B::open(name)?;
        let len = mapping.len();
        if len == 0 {
            return Err(MediaRingError::corrupt(name, "mapped zero bytes"));
        }
        Ok(Self {
            mapping: Some(mapping),
            name: name.to_string(),
            len,
            is_owner: false,
        })
    }

    /// Unmap without touching the OS object.
    pub fn close(&mut self) {
        self.mapping = None;
        self.len = 0;
    }

    /// Unmap, and remove the OS object if this segment owns it.
    pub fn destroy(&mut self) -> MediaRingResult<()> {
        let was_mapped = self.mapping.take().is_some();
        self.len = 0;
        if was_mapped && self.is_owner {
            self.is_owner = false;
            B::remove(&self.name)?;
            log::debug!("{} segment '{}' removed", B::KIND, self.name);
        }
        Ok(())
    }

    /// Base pointer of the mapping, `None` once closed.
    pub fn bytes(&self) -> Option<NonNull<u8>> {
        self.mapping.as_ref().and_then(|m| NonNull::new(m.as_ptr()))
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        self.mapping.is_some()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_owner(&self) -> bool {
        self.is_owner
    }

    /// Shared bytes. Other processes may change them at any time.
    pub fn as_slice(&self) -> &[u8] {
        match self.bytes() {
            // SAFETY: the mapping is live for the lifetime of &self and spans len bytes
            Some(ptr) => unsafe { std::slice::from_raw_parts(ptr.as_ptr(), self.len) },
            None => &[],
        }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        match self.bytes() {
            // SAFETY: the mapping is live for the lifetime of &mut self and spans len bytes
            Some(ptr) => unsafe { std::slice::from_raw_parts_mut(ptr.as_ptr(), self.len) },
            None => &mut [],
        }
    }

    /// Whether an OS object named `name` currently exists.
    pub fn exists(name: &str) -> bool {
        validate_name(name).is_ok() && B::exists(name)
    }

    /// Remove the OS object named `name`. Idempotent.
    pub fn remove(name: &str) -> MediaRingResult<bool> {
        validate_name(name)?;
        B::remove(name)
    }
}

impl<B: ShmBackend> Drop for Segment<B> {
    fn drop(&mut self) {
        if let Err(e) = self.destroy() {
            mr_log!(Warn, "failed to remove segment '{}': {}", self.name, e);
        }
    }
}

impl<B: ShmBackend> fmt::Debug for Segment<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Segment")
            .field("backend", &B::KIND)
            .field("name", &self.name)
            .field("len", &self.len)
            .field("is_owner", &self.is_owner)
            .field("mapped", &self.mapping.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unique(tag: &str) -> String {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .subsec_nanos();
        format!("seg_{}_{}_{}", tag, std::process::id(), nanos)
    }

    #[test]
    fn create_then_open_shares_bytes() {
        let name = unique("share");
        let (mut writer, is_new) = Segment::<DefaultBackend>::create(&name, 4096, 0o600).unwrap();
        assert!(is_new);
        assert!(writer.is_owner());
        assert_eq!(writer.size(), 4096);
        writer.as_mut_slice()[..5].copy_from_slice(b"hello");

        let reader = Segment::<DefaultBackend>::open(&name).unwrap();
        assert!(!reader.is_owner());
        assert_eq!(reader.size(), 4096);
        assert_eq!(&reader.as_slice()[..5], b"hello");
    }

    #[test]
    fn second_create_reuses_existing_size() {
        let name = unique("reuse");
        let (first, is_new) = Segment::<DefaultBackend>::create(&name, 8192, 0o600).unwrap();
        assert!(is_new);
        let (second, is_new) = Segment::<DefaultBackend>::create(&name, 100, 0o600).unwrap();
        assert!(!is_new);
        assert!(!second.is_owner());
        assert_eq!(second.size(), first.size());
    }

    #[test]
    fn fresh_segment_is_zeroed() {
        let name = unique("zero");
        let (seg, _) = Segment::<DefaultBackend>::create(&name, 1024, 0o600).unwrap();
        assert!(seg.as_slice().iter().all(|&b| b == 0));
    }

    #[test]
    fn only_owner_removes() {
        let name = unique("owner");
        let (owner, _) = Segment::<DefaultBackend>::create(&name, 1024, 0o600).unwrap();
        let reader = Segment::<DefaultBackend>::open(&name).unwrap();
        drop(reader);
        assert!(Segment::<DefaultBackend>::exists(&name));
        drop(owner);
        #[cfg(unix)]
        assert!(!Segment::<DefaultBackend>::exists(&name));
    }

    #[cfg(unix)]
    #[test]
    fn close_keeps_object() {
        let name = unique("close");
        let (mut owner, _) = Segment::<DefaultBackend>::create(&name, 1024, 0o600).unwrap();
        owner.close();
        assert!(!owner.is_valid());
        assert!(owner.bytes().is_none());
        assert_eq!(owner.size(), 0);
        assert!(Segment::<DefaultBackend>::exists(&name));
        assert!(Segment::<DefaultBackend>::remove(&name).unwrap());
        assert!(!Segment::<DefaultBackend>::remove(&name).unwrap());
    }

    #[test]
    fn open_missing_fails() {
        let err = Segment::<DefaultBackend>::open(&unique("missing")).unwrap_err();
        assert!(matches!(err, MediaRingError::NotFound(_)), "{err}");
    }

    #[test]
    fn rejects_bad_arguments() {
        assert!(matches!(
            Segment::<DefaultBackend>::create("", 16, 0o600),
            Err(MediaRingError::Config(_))
        ));
        assert!(matches!(
            Segment::<DefaultBackend>::create(&unique("empty"), 0, 0o600),
            Err(MediaRingError::Config(_))
        ));
    }
}

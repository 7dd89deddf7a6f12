// POSIX shared memory backend
//
// - Linux (and other non-macOS unix): files in /dev/shm mapped with memmap2.
//   /dev/shm is tmpfs, so this is the same RAM-backed object shm_open creates.
// - macOS: shm_open() + mmap (no /dev/shm).

use crate::error::{MediaRingError, MediaRingResult};
use crate::memory::segment::ShmBackend;

use std::time::Duration;

/// Attempts made while a racing creator has the object but not its size yet.
const SIZE_RACE_RETRIES: u32 = 100;
const SIZE_RACE_SLEEP: Duration = Duration::from_millis(1);

#[cfg(not(target_os = "macos"))]
use crate::memory::platform::{posix_path, shm_dir};
#[cfg(not(target_os = "macos"))]
use memmap2::{MmapOptions, MmapRaw};
#[cfg(not(target_os = "macos"))]
use std::fs::{File, OpenOptions};
#[cfg(not(target_os = "macos"))]
use std::io::ErrorKind;
#[cfg(not(target_os = "macos"))]
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};

/// POSIX shared-memory segment.
#[derive(Debug)]
pub struct PosixShm {
    #[cfg(not(target_os = "macos"))]
    map: MmapRaw,
    #[cfg(not(target_os = "macos"))]
    _file: File,

    #[cfg(target_os = "macos")]
    ptr: *mut u8,
    #[cfg(target_os = "macos")]
    fd: i32,

    len: usize,
}

// ============================================================================
// File-backed implementation (/dev/shm)
// ============================================================================

#[cfg(not(target_os = "macos"))]
impl PosixShm {
    fn map(file: File, len: usize) -> MediaRingResult<Self> {
        // SAFETY: file is open read-write and at least len bytes long
        let map = unsafe { MmapOptions::new().len(len).map_raw(&file)? };
        Ok(Self {
            map,
            _file: file,
            len,
        })
    }

    fn open_existing(file: File, name: &str) -> MediaRingResult<Option<Self>> {
        let len = file.metadata()?.len();
        if len == 0 {
            return Ok(None);
        }
        let len = usize::try_from(len)?;
        log::trace!("posix segment '{}' opened at {} bytes", name, len);
        Self::map(file, len).map(Some)
    }
}

#[cfg(not(target_os = "macos"))]
impl ShmBackend for PosixShm {
    const KIND: &'static str = "posix";

    fn create(name: &str, size: usize, mode: u32) -> MediaRingResult<(Self, bool)> {
        std::fs::create_dir_all(shm_dir())?;
        let path = posix_path(name);

        for _ in 0..SIZE_RACE_RETRIES {
            match OpenOptions::new().read(true).write(true).open(&path) {
                Ok(file) => match Self::open_existing(file, name)? {
                    Some(shm) => return Ok((shm, false)),
                    None => {
                        std::thread::sleep(SIZE_RACE_SLEEP);
                        continue;
                    }
                },
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }

            match OpenOptions::new()
                .read(true)
                .write(true)
                .create_new(true)
                .mode(mode)
                .open(&path)
            {
                Ok(file) => {
                    // umask may have masked the requested bits
                    let init = std::fs::set_permissions(
                        &path,
                        std::fs::Permissions::from_mode(mode),
                    )
                    .and_then(|_| file.set_len(size as u64));
                    if let Err(e) = init {
                        let _ = std::fs::remove_file(&path);
                        return Err(e.into());
                    }
                    // set_len on a new file yields zeroed pages
                    return match Self::map(file, size) {
                        Ok(shm) => Ok((shm, true)),
                        Err(e) => {
                            let _ = std::fs::remove_file(&path);
                            Err(e)
                        }
                    };
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(MediaRingError::Timeout(format!(
            "segment '{}' still has no size after {} attempts",
            name, SIZE_RACE_RETRIES
        )))
    }

    fn open(name: &str) -> MediaRingResult<Self> {
        let path = posix_path(name);
        for _ in 0..SIZE_RACE_RETRIES {
            let file = match OpenOptions::new().read(true).write(true).open(&path) {
                Ok(file) => file,
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    return Err(MediaRingError::NotFound(name.to_string()))
                }
                Err(e) => return Err(e.into()),
            };
            if let Some(shm) = Self::open_existing(file, name)? {
                return Ok(shm);
            }
            std::thread::sleep(SIZE_RACE_SLEEP);
        }
        Err(MediaRingError::corrupt(name, "segment has zero length"))
    }

    fn as_ptr(&self) -> *mut u8 {
        self.map.as_mut_ptr()
    }

    fn len(&self) -> usize {
        self.len
    }

    fn exists(name: &str) -> bool {
        posix_path(name).exists()
    }

    fn remove(name: &str) -> MediaRingResult<bool> {
        match std::fs::remove_file(posix_path(name)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

// ============================================================================
// macOS implementation - shm_open() + mmap
// ============================================================================

#[cfg(target_os = "macos")]
use crate::memory::platform::posix_object_name;
#[cfg(target_os = "macos")]
use std::ffi::CString;

// SAFETY: the mapping is process-wide; access discipline is enforced by the ring layer
#[cfg(target_os = "macos")]
unsafe impl Send for PosixShm {}

#[cfg(target_os = "macos")]
impl PosixShm {
    fn c_name(name: &str) -> MediaRingResult<CString> {
        Ok(CString::new(posix_object_name(name))?)
    }

    fn fd_len(fd: i32) -> MediaRingResult<usize> {
        // SAFETY: stat is plain data; fd is a valid descriptor
        let mut st: libc::stat = unsafe { std::mem::zeroed() };
        if unsafe { libc::fstat(fd, &mut st) } != 0 {
            return Err(std::io::Error::last_os_error().into());
        }
        Ok(usize::try_from(st.st_size)?)
    }

    fn map(fd: i32, len: usize) -> MediaRingResult<Self> {
        // SAFETY: fd is valid, len > 0, flags are valid POSIX mmap constants
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            let err = std::io::Error::last_os_error();
            // SAFETY: fd is a valid open file descriptor
            unsafe { libc::close(fd) };
            return Err(err.into());
        }
        Ok(Self {
            ptr: ptr as *mut u8,
            fd,
            len,
        })
    }

    fn open_fd(fd: i32, name: &str) -> MediaRingResult<Option<Self>> {
        let len = match Self::fd_len(fd) {
            Ok(len) => len,
            Err(e) => {
                // SAFETY: fd is a valid open file descriptor
                unsafe { libc::close(fd) };
                return Err(e);
            }
        };
        if len == 0 {
            // SAFETY: fd is a valid open file descriptor
            unsafe { libc::close(fd) };
            return Ok(None);
        }
        log::trace!("posix segment '{}' opened at {} bytes", name, len);
        Self::map(fd, len).map(Some)
    }
}

#[cfg(target_os = "macos")]
impl ShmBackend for PosixShm {
    const KIND: &'static str = "posix";

    fn create(name: &str, size: usize, mode: u32) -> MediaRingResult<(Self, bool)> {
        let c_name = Self::c_name(name)?;
        for _ in 0..SIZE_RACE_RETRIES {
            // SAFETY: c_name is a valid null-terminated CString
            let fd = unsafe { libc::shm_open(c_name.as_ptr(), libc::O_RDWR, mode as libc::c_uint) };
            if fd >= 0 {
                match Self::open_fd(fd, name)? {
                    Some(shm) => return Ok((shm, false)),
                    None => {
                        std::thread::sleep(SIZE_RACE_SLEEP);
                        continue;
                    }
                }
            }

            // SAFETY: c_name is a valid null-terminated CString; flags are valid POSIX constants
            let fd = unsafe {
                libc::shm_open(
                    c_name.as_ptr(),
                    libc::O_CREAT | libc::O_RDWR | libc::O_EXCL,
                    mode as libc::c_uint,
                )
            };
            if fd < 0 {
                let err = std::io::Error::last_os_error();
                if err.raw_os_error() == Some(libc::EEXIST) {
                    continue;
                }
                return Err(err.into());
            }
            // SAFETY: fd is a valid descriptor from shm_open above
            if unsafe { libc::ftruncate(fd, size as libc::off_t) } != 0 {
                let err = std::io::Error::last_os_error();
                // SAFETY: fd and c_name are valid
                unsafe {
                    libc::close(fd);
                    libc::shm_unlink(c_name.as_ptr());
                }
                return Err(err.into());
            }
            return match Self::map(fd, size) {
                Ok(shm) => Ok((shm, true)),
                Err(e) => {
                    // SAFETY: c_name is a valid null-terminated CString
                    unsafe { libc::shm_unlink(c_name.as_ptr()) };
                    Err(e)
                }
            };
        }
        Err(MediaRingError::Timeout(format!(
            "segment '{}' still has no size after {} attempts",
            name, SIZE_RACE_RETRIES
        )))
    }

    fn open(name: &str) -> MediaRingResult<Self> {
        let c_name = Self::c_name(name)?;
        for _ in 0..SIZE_RACE_RETRIES {
            // SAFETY: c_name is a valid null-terminated CString
            let fd = unsafe { libc::shm_open(c_name.as_ptr(), libc::O_RDWR, 0) };
            if fd < 0 {
                let err = std::io::Error::last_os_error();
                if err.raw_os_error() == Some(libc::ENOENT) {
                    return Err(MediaRingError::NotFound(name.to_string()));
                }
                return Err(err.into());
            }
            if let Some(shm) = Self::open_fd(fd, name)? {
                return Ok(shm);
            }
            std::thread::sleep(SIZE_RACE_SLEEP);
        }
        Err(MediaRingError::corrupt(name, "segment has zero length"))
    }

    fn as_ptr(&self) -> *mut u8 {
        self.ptr
    }

    fn len(&self) -> usize {
        self.len
    }

    fn exists(name: &str) -> bool {
        let Ok(c_name) = Self::c_name(name) else {
            return false;
        };
        // SAFETY: c_name is a valid null-terminated CString
        let fd = unsafe { libc::shm_open(c_name.as_ptr(), libc::O_RDONLY, 0) };
        if fd >= 0 {
            // SAFETY: fd is a valid open file descriptor
            unsafe { libc::close(fd) };
            true
        } else {
            false
        }
    }

    fn remove(name: &str) -> MediaRingResult<bool> {
        let c_name = Self::c_name(name)?;
        // SAFETY: c_name is a valid null-terminated CString
        if unsafe { libc::shm_unlink(c_name.as_ptr()) } == 0 {
            return Ok(true);
        }
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::ENOENT) {
            Ok(false)
        } else {
            Err(err.into())
        }
    }
}

#[cfg(target_os = "macos")]
impl Drop for PosixShm {
    fn drop(&mut self) {
        // SAFETY: ptr/len describe the live mapping; fd is a valid open descriptor
        unsafe {
            libc::munmap(self.ptr as *mut libc::c_void, self.len);
            libc::close(self.fd);
        }
    }
}

#[cfg(all(test, not(target_os = "macos")))]
mod tests {
    use super::*;

    #[test]
    fn remove_is_idempotent() {
        let name = format!("posix_rm_{}", std::process::id());
        let (shm, is_new) = PosixShm::create(&name, 64, 0o600).unwrap();
        assert!(is_new);
        assert!(PosixShm::exists(&name));
        drop(shm);
        assert!(PosixShm::exists(&name));
        assert!(PosixShm::remove(&name).unwrap());
        assert!(!PosixShm::remove(&name).unwrap());
        assert!(!PosixShm::exists(&name));
    }

    #[test]
    fn creator_applies_requested_mode() {
        let name = format!("posix_mode_{}", std::process::id());
        let (_shm, _) = PosixShm::create(&name, 64, 0o640).unwrap();
        let meta = std::fs::metadata(posix_path(&name)).unwrap();
        assert_eq!(meta.permissions().mode() & 0o777, 0o640);
        PosixShm::remove(&name).unwrap();
    }
}

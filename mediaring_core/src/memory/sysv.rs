// System-V shared memory backend
//
// The key comes from ftok() over a small key-file under /tmp/mediaring/sysv.
// The key-file only exists to derive a stable key; it holds no data.
// Removal (owner destroy or `remove`) marks the segment IPC_RMID and deletes
// the key-file. Readers never touch the key-file.

use std::ffi::CString;
use std::fs::OpenOptions;
use std::io::ErrorKind;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

use crate::error::{MediaRingError, MediaRingResult};
use crate::memory::platform::{sysv_key_dir, sysv_key_path, SYSV_PROJECT_ID};
use crate::memory::segment::ShmBackend;

const CREATE_RACE_RETRIES: u32 = 100;

/// System-V shared-memory segment.
#[derive(Debug)]
pub struct SysVShm {
    ptr: *mut u8,
    len: usize,
    shmid: libc::c_int,
}

// SAFETY: the attachment is process-wide; access discipline is enforced by the ring layer
unsafe impl Send for SysVShm {}

fn ftok(path: &Path) -> MediaRingResult<libc::key_t> {
    let c_path = CString::new(path.as_os_str().as_bytes())?;
    // SAFETY: c_path is a valid null-terminated CString
    let key = unsafe { libc::ftok(c_path.as_ptr(), SYSV_PROJECT_ID) };
    if key == -1 {
        return Err(std::io::Error::last_os_error().into());
    }
    Ok(key)
}

/// Key of an existing key-file, `None` when there is none.
fn existing_key(name: &str) -> MediaRingResult<Option<libc::key_t>> {
    let path = sysv_key_path(name);
    if !path.exists() {
        return Ok(None);
    }
    ftok(&path).map(Some)
}

fn lookup(key: libc::key_t) -> Option<libc::c_int> {
    // SAFETY: shmget with size 0 and no flags only looks the key up
    let id = unsafe { libc::shmget(key, 0, 0) };
    (id >= 0).then_some(id)
}

fn segment_size(shmid: libc::c_int) -> MediaRingResult<usize> {
    // SAFETY: shmid_ds is plain data, filled by IPC_STAT
    let mut ds: libc::shmid_ds = unsafe { std::mem::zeroed() };
    // SAFETY: ds is a valid, writable shmid_ds
    if unsafe { libc::shmctl(shmid, libc::IPC_STAT, &mut ds) } != 0 {
        return Err(std::io::Error::last_os_error().into());
    }
    Ok(ds.shm_segsz as usize)
}

impl SysVShm {
    fn attach(shmid: libc::c_int, len: usize) -> MediaRingResult<Self> {
        // SAFETY: shmid refers to a live segment; a null address lets the kernel choose
        let ptr = unsafe { libc::shmat(shmid, std::ptr::null(), 0) };
        if ptr as isize == -1 {
            return Err(std::io::Error::last_os_error().into());
        }
        Ok(Self {
            ptr: ptr as *mut u8,
            len,
            shmid,
        })
    }

    /// Kernel id of the attached segment.
    pub fn shmid(&self) -> libc::c_int {
        self.shmid
    }
}

impl ShmBackend for SysVShm {
    const KIND: &'static str = "sysv";

    fn create(name: &str, size: usize, mode: u32) -> MediaRingResult<(Self, bool)> {
        std::fs::create_dir_all(sysv_key_dir())?;
        let path = sysv_key_path(name);
        OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;
        let key = ftok(&path)?;

        for _ in 0..CREATE_RACE_RETRIES {
            if let Some(id) = lookup(key) {
                let len = segment_size(id)?;
                return Ok((Self::attach(id, len)?, false));
            }
            let flags = libc::IPC_CREAT | libc::IPC_EXCL | (mode & 0o777) as libc::c_int;
            // SAFETY: plain syscall; new System-V segments are zero-filled by the kernel
            let id = unsafe { libc::shmget(key, size, flags) };
            if id >= 0 {
                return match Self::attach(id, size) {
                    Ok(shm) => Ok((shm, true)),
                    Err(e) => {
                        // SAFETY: id is the segment just created above
                        unsafe { libc::shmctl(id, libc::IPC_RMID, std::ptr::null_mut()) };
                        Err(e)
                    }
                };
            }
            let err = std::io::Error::last_os_error();
            if err.raw_os_error() != Some(libc::EEXIST) {
                return Err(err.into());
            }
        }
        Err(MediaRingError::Timeout(format!(
            "segment '{}' kept racing during creation",
            name
        )))
    }

    fn open(name: &str) -> MediaRingResult<Self> {
        let not_found = || MediaRingError::NotFound(name.to_string());
        let key = existing_key(name)?.ok_or_else(not_found)?;
        let id = lookup(key).ok_or_else(not_found)?;
        let len = segment_size(id)?;
        Self::attach(id, len)
    }

    fn as_ptr(&self) -> *mut u8 {
        self.ptr
    }

    fn len(&self) -> usize {
        self.len
    }

    fn exists(name: &str) -> bool {
        matches!(existing_key(name), Ok(Some(key)) if lookup(key).is_some())
    }

    fn remove(name: &str) -> MediaRingResult<bool> {
        let Some(key) = existing_key(name)? else {
            return Ok(false);
        };
        let mut removed = false;
        if let Some(id) = lookup(key) {
            // SAFETY: id is a live segment id; IPC_RMID takes no buffer
            if unsafe { libc::shmctl(id, libc::IPC_RMID, std::ptr::null_mut()) } != 0 {
                return Err(std::io::Error::last_os_error().into());
            }
            removed = true;
        }
        match std::fs::remove_file(sysv_key_path(name)) {
            Ok(()) => removed = true,
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        Ok(removed)
    }
}

impl Drop for SysVShm {
    fn drop(&mut self) {
        // SAFETY: ptr is the address returned by shmat
        unsafe { libc::shmdt(self.ptr as *const libc::c_void) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::Segment;

    fn unique(tag: &str) -> String {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .subsec_nanos();
        format!("sysv_{}_{}_{}", tag, std::process::id(), nanos)
    }

    #[test]
    fn create_open_share_bytes() {
        let name = unique("share");
        let (mut writer, is_new) = Segment::<SysVShm>::create(&name, 4096, 0o600).unwrap();
        assert!(is_new);
        writer.as_mut_slice()[..4].copy_from_slice(b"sysv");

        let reader = Segment::<SysVShm>::open(&name).unwrap();
        assert_eq!(reader.size(), 4096);
        assert_eq!(&reader.as_slice()[..4], b"sysv");
    }

    #[test]
    fn owner_destroy_removes_segment_and_key_file() {
        let name = unique("destroy");
        let (mut owner, _) = Segment::<SysVShm>::create(&name, 1024, 0o600).unwrap();
        assert!(sysv_key_path(&name).exists());

        let reader = Segment::<SysVShm>::open(&name).unwrap();
        drop(reader);
        assert!(sysv_key_path(&name).exists());
        assert!(Segment::<SysVShm>::exists(&name));

        owner.destroy().unwrap();
        assert!(!sysv_key_path(&name).exists());
        assert!(!Segment::<SysVShm>::exists(&name));
    }

    #[test]
    fn remove_is_idempotent() {
        let name = unique("remove");
        let (mut seg, _) = Segment::<SysVShm>::create(&name, 1024, 0o600).unwrap();
        seg.close();
        assert!(Segment::<SysVShm>::remove(&name).unwrap());
        assert!(!Segment::<SysVShm>::remove(&name).unwrap());
        assert!(matches!(
            Segment::<SysVShm>::open(&name),
            Err(MediaRingError::NotFound(_))
        ));
    }
}

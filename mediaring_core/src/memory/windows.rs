// Windows backend - CreateFileMappingW with INVALID_HANDLE_VALUE
// (pagefile-backed, no temp files). The mapping disappears with its last
// handle, so there is nothing to unlink.

use windows_sys::Win32::Foundation::{
    CloseHandle, GetLastError, ERROR_ALREADY_EXISTS, INVALID_HANDLE_VALUE,
};
use windows_sys::Win32::System::Memory::{
    CreateFileMappingW, MapViewOfFile, OpenFileMappingW, UnmapViewOfFile, VirtualQuery,
    FILE_MAP_ALL_ACCESS, MEMORY_BASIC_INFORMATION, PAGE_READWRITE,
};

use crate::error::{MediaRingError, MediaRingResult};
use crate::memory::platform::windows_mapping_name;
use crate::memory::segment::ShmBackend;

/// Windows named file mapping.
#[derive(Debug)]
pub struct WindowsShm {
    ptr: *mut u8,
    handle: isize, // HANDLE
    len: usize,
}

// SAFETY: the view is process-wide; access discipline is enforced by the ring layer
unsafe impl Send for WindowsShm {}

fn last_error(call: &str) -> MediaRingError {
    // SAFETY: GetLastError is always safe to call after a Windows API failure
    let code = unsafe { GetLastError() };
    MediaRingError::Io(std::io::Error::other(format!("{} failed: error {}", call, code)))
}

impl WindowsShm {
    fn map_view(handle: isize, len: Option<usize>) -> MediaRingResult<Self> {
        // SAFETY: handle is a valid file mapping; 0 bytes maps the whole object
        let ptr = unsafe { MapViewOfFile(handle, FILE_MAP_ALL_ACCESS, 0, 0, len.unwrap_or(0)) };
        if ptr.is_null() {
            let err = last_error("MapViewOfFile");
            // SAFETY: handle is a valid file mapping handle
            unsafe { CloseHandle(handle) };
            return Err(err);
        }
        let len = match len {
            Some(len) => len,
            None => {
                // SAFETY: MEMORY_BASIC_INFORMATION is plain data; ptr is a live view
                let mut info: MEMORY_BASIC_INFORMATION = unsafe { std::mem::zeroed() };
                let written = unsafe {
                    VirtualQuery(
                        ptr as *const _,
                        &mut info,
                        std::mem::size_of::<MEMORY_BASIC_INFORMATION>(),
                    )
                };
                if written == 0 {
                    let err = last_error("VirtualQuery");
                    // SAFETY: ptr and handle are live
                    unsafe {
                        UnmapViewOfFile(ptr as *const _);
                        CloseHandle(handle);
                    }
                    return Err(err);
                }
                info.RegionSize
            }
        };
        Ok(Self {
            ptr: ptr as *mut u8,
            handle,
            len,
        })
    }
}

impl ShmBackend for WindowsShm {
    const KIND: &'static str = "windows";

    fn create(name: &str, size: usize, _mode: u32) -> MediaRingResult<(Self, bool)> {
        let wide_name = windows_mapping_name(name);
        // SAFETY: INVALID_HANDLE_VALUE selects a pagefile-backed mapping; wide_name is
        // a valid null-terminated wide string
        let handle = unsafe {
            CreateFileMappingW(
                INVALID_HANDLE_VALUE as isize,
                std::ptr::null(),
                PAGE_READWRITE,
                (size as u64 >> 32) as u32,
                size as u32,
                wide_name.as_ptr(),
            )
        };
        if handle == 0 {
            return Err(last_error("CreateFileMappingW"));
        }
        // SAFETY: GetLastError is always safe to call
        let existed = unsafe { GetLastError() } == ERROR_ALREADY_EXISTS;
        if existed {
            Ok((Self::map_view(handle, None)?, false))
        } else {
            // fresh pagefile-backed mappings are zero-filled
            Ok((Self::map_view(handle, Some(size))?, true))
        }
    }

    fn open(name: &str) -> MediaRingResult<Self> {
        let wide_name = windows_mapping_name(name);
        // SAFETY: wide_name is a valid null-terminated wide string
        let handle = unsafe { OpenFileMappingW(FILE_MAP_ALL_ACCESS, 0, wide_name.as_ptr()) };
        if handle == 0 {
            return Err(MediaRingError::NotFound(name.to_string()));
        }
        Self::map_view(handle, None)
    }

    fn as_ptr(&self) -> *mut u8 {
        self.ptr
    }

    fn len(&self) -> usize {
        self.len
    }

    fn exists(name: &str) -> bool {
        let wide_name = windows_mapping_name(name);
        // SAFETY: wide_name is a valid null-terminated wide string
        let handle = unsafe { OpenFileMappingW(FILE_MAP_ALL_ACCESS, 0, wide_name.as_ptr()) };
        if handle == 0 {
            return false;
        }
        // SAFETY: handle was just opened
        unsafe { CloseHandle(handle) };
        true
    }

    fn remove(_name: &str) -> MediaRingResult<bool> {
        Ok(false)
    }
}

impl Drop for WindowsShm {
    fn drop(&mut self) {
        // SAFETY: ptr is a live view and handle a live mapping owned by self
        unsafe {
            UnmapViewOfFile(self.ptr as *const _);
            CloseHandle(self.handle);
        }
    }
}

// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 bitrpc-team

//! POSIX shared memory segment management.
//!
//! Safe wrappers around `shm_open`, `ftruncate`, and `mmap` for creating
//! and mapping the ring-buffer backing object.
//!
//! # Segment Lifecycle
//!
//! 1. The producer creates the segment with [`ShmSegment::create`]
//!    (replacing any stale object of the same name)
//! 2. The consumer opens it with [`ShmSegment::open`]
//! 3. The mapping is unmapped on drop
//! 4. The creator calls [`ShmSegment::unlink`] on cleanup
//!
//! Segment names must start with `/` and contain no other `/`.

use super::{Result, ShmError};
use std::ffi::CString;
use std::io;
use std::ptr;

/// Shared memory segment wrapper.
///
/// Unmaps the region on drop. Does NOT unlink automatically; that is the
/// creator's responsibility.
pub struct ShmSegment {
    ptr: *mut u8,
    size: usize,
    name: String,
}

// SAFETY: the pointer refers to shared memory accessed from multiple
// threads and processes; all cross-party coordination goes through the
// atomic fields of the structures placed in it.
unsafe impl Send for ShmSegment {}
unsafe impl Sync for ShmSegment {}

impl ShmSegment {
    /// Create a fresh segment of `size` bytes, replacing any existing
    /// object with this name. The new region is zero-filled by the
    /// kernel.
    pub fn create(name: &str, size: usize) -> Result<Self> {
        Self::validate_name(name)?;
        let c_name = CString::new(name).map_err(|_| ShmError::InvalidName(name.to_string()))?;

        // SAFETY: c_name is a valid NUL-terminated string. Unlinking a
        // missing object is harmless (error ignored); O_CREAT|O_EXCL then
        // guarantees we own a brand-new, zero-filled object.
        let fd = unsafe {
            libc::shm_unlink(c_name.as_ptr());
            libc::shm_open(
                c_name.as_ptr(),
                libc::O_CREAT | libc::O_RDWR | libc::O_EXCL,
                0o600,
            )
        };
        if fd < 0 {
            return Err(ShmError::SegmentCreate(io::Error::last_os_error()));
        }

        // SAFETY: fd is valid from the shm_open above; ftruncate sizes the
        // object and fails gracefully on bad sizes.
        let ret = unsafe { libc::ftruncate(fd, size as libc::off_t) };
        if ret < 0 {
            let err = io::Error::last_os_error();
            // SAFETY: fd is valid and not used again on this error path.
            unsafe { libc::close(fd) };
            return Err(ShmError::SegmentCreate(err));
        }

        Self::map(fd, size, name)
    }

    /// Open an existing segment of `size` bytes.
    pub fn open(name: &str, size: usize) -> Result<Self> {
        Self::validate_name(name)?;
        let c_name = CString::new(name).map_err(|_| ShmError::InvalidName(name.to_string()))?;

        // SAFETY: c_name is a valid NUL-terminated string; without O_CREAT
        // the mode argument is ignored and shm_open fails if the object
        // does not exist.
        let fd = unsafe { libc::shm_open(c_name.as_ptr(), libc::O_RDWR, 0) };
        if fd < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::NotFound {
                return Err(ShmError::NotFound(name.to_string()));
            }
            return Err(ShmError::SegmentOpen(err));
        }

        Self::map(fd, size, name)
    }

    fn map(fd: libc::c_int, size: usize, name: &str) -> Result<Self> {
        // SAFETY: fd is a valid shared-memory descriptor sized to at least
        // `size` by the creator; MAP_SHARED with PROT_READ|PROT_WRITE is
        // the standard cross-process mapping. mmap returns MAP_FAILED on
        // error, checked below.
        let ptr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                0,
            )
        };

        // SAFETY: the mapping (when successful) holds its own reference to
        // the object, so the descriptor can be closed either way.
        unsafe { libc::close(fd) };

        if ptr == libc::MAP_FAILED {
            return Err(ShmError::Mmap(io::Error::last_os_error()));
        }

        Ok(Self {
            ptr: ptr.cast(),
            size,
            name: name.to_string(),
        })
    }

    fn validate_name(name: &str) -> Result<()> {
        if !name.starts_with('/') {
            return Err(ShmError::InvalidName(format!(
                "segment name must start with '/': {name}"
            )));
        }
        if name.len() > 1 && name[1..].contains('/') {
            return Err(ShmError::InvalidName(format!(
                "segment name cannot contain '/' after the prefix: {name}"
            )));
        }
        if name.len() > 255 {
            return Err(ShmError::InvalidName(format!(
                "segment name too long (max 255): {name}"
            )));
        }
        Ok(())
    }

    /// Unlink (delete) a segment by name.
    ///
    /// The object disappears once all processes unmap it. Idempotent: a
    /// missing segment is not an error.
    pub fn unlink(name: &str) -> Result<()> {
        let c_name = CString::new(name).map_err(|_| ShmError::InvalidName(name.to_string()))?;

        // SAFETY: c_name is a valid NUL-terminated string; shm_unlink only
        // touches the filesystem namespace.
        let ret = unsafe { libc::shm_unlink(c_name.as_ptr()) };
        if ret < 0 {
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::NotFound {
                return Err(ShmError::SegmentOpen(err));
            }
        }
        Ok(())
    }

    /// Check whether a segment with this name exists
    #[must_use]
    pub fn exists(name: &str) -> bool {
        let Ok(c_name) = CString::new(name) else {
            return false;
        };
        // SAFETY: read-only probe; a valid fd is closed immediately.
        let fd = unsafe { libc::shm_open(c_name.as_ptr(), libc::O_RDONLY, 0) };
        if fd >= 0 {
            // SAFETY: fd is valid and not used after this close.
            unsafe { libc::close(fd) };
            true
        } else {
            false
        }
    }

    /// Raw pointer to the mapped region
    #[inline]
    #[must_use]
    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr
    }

    /// Size of the mapping in bytes
    #[inline]
    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Segment name (for unlink)
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for ShmSegment {
    fn drop(&mut self) {
        // SAFETY: ptr/size came from the successful mmap in map() and Drop
        // runs at most once. The name is intentionally NOT unlinked here.
        unsafe {
            libc::munmap(self.ptr.cast(), self.size);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unique_name() -> String {
        use std::time::{SystemTime, UNIX_EPOCH};
        let ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        format!("/bitrpc_seg_{ts}")
    }

    #[test]
    fn test_validate_name() {
        assert!(ShmSegment::validate_name("/ok").is_ok());
        assert!(ShmSegment::validate_name("no_slash").is_err());
        assert!(ShmSegment::validate_name("/a/b").is_err());
    }

    #[test]
    fn test_create_open_shared_bytes() {
        let name = unique_name();
        let seg1 = ShmSegment::create(&name, 4096).expect("create");
        assert_eq!(seg1.size(), 4096);

        // SAFETY: offsets 0..2 are inside the fresh 4096-byte mapping.
        unsafe {
            *seg1.as_ptr() = 0x42;
            *seg1.as_ptr().add(1) = 0x43;
        }

        let seg2 = ShmSegment::open(&name, 4096).expect("open");
        // SAFETY: same object, same offsets, written above.
        unsafe {
            assert_eq!(*seg2.as_ptr(), 0x42);
            assert_eq!(*seg2.as_ptr().add(1), 0x43);
        }

        drop(seg1);
        drop(seg2);
        ShmSegment::unlink(&name).ok();
    }

    #[test]
    fn test_create_replaces_stale_segment() {
        let name = unique_name();
        let seg1 = ShmSegment::create(&name, 4096).expect("create");
        // SAFETY: offset 0 is inside the mapping.
        unsafe { *seg1.as_ptr() = 0xAA };
        drop(seg1);

        // Re-creation yields a fresh zero-filled object.
        let seg2 = ShmSegment::create(&name, 4096).expect("recreate");
        // SAFETY: offset 0 is inside the mapping.
        unsafe { assert_eq!(*seg2.as_ptr(), 0) };

        drop(seg2);
        ShmSegment::unlink(&name).ok();
    }

    #[test]
    fn test_open_nonexistent() {
        let result = ShmSegment::open("/bitrpc_nonexistent_424242", 4096);
        assert!(matches!(result, Err(ShmError::NotFound(_))));
    }

    #[test]
    fn test_exists_and_unlink_idempotent() {
        let name = unique_name();
        assert!(!ShmSegment::exists(&name));

        let _seg = ShmSegment::create(&name, 4096).expect("create");
        assert!(ShmSegment::exists(&name));

        assert!(ShmSegment::unlink(&name).is_ok());
        assert!(ShmSegment::unlink(&name).is_ok());
        assert!(!ShmSegment::exists(&name));
    }
}

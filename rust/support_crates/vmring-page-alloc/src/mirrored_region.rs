//! Double-mapped memory region with support for large pages.
//!
//! This module provides `MirroredRegion`, a virtual range of `2 * capacity` bytes
//! whose two halves are backed by the same physical pages. A write through
//! `ptr() + i` is visible through `ptr() + capacity + i` and vice versa, so any
//! access of at most `capacity` bytes starting inside the first half is
//! contiguous, even when it logically runs past the end of the storage.
//!
//! # Large Pages
//!
//! With large pages the capacity is one huge page (2MB on Linux). Huge pages must
//! be reserved by the administrator beforehand; when none are available the
//! construction fails. There is no automatic fallback to regular pages.

use std::sync::OnceLock;

use vmring_common::{Result, error::Error};

use crate::mmap;

/// An exclusively owned, double-mapped range of virtual memory.
///
/// The region is neither `Clone` nor `Copy`. Dropping it unmaps both halves;
/// [`MirroredRegion::release`] does the same and reports failures.
pub struct MirroredRegion {
    /// Start of the `2 * capacity` byte range.
    ptr: *mut u8,
    /// Size of one copy of the storage (one page granule).
    capacity: usize,
    /// Whether the storage object uses large pages.
    uses_large_pages: bool,
}

impl MirroredRegion {
    /// Returns the size of a regular memory page on the current system.
    pub fn regular_page_size() -> usize {
        mmap::get_page_size()
    }

    /// Returns the size of a large (huge) memory page used for large page regions.
    pub fn large_page_size() -> usize {
        mmap::get_large_page_size()
    }

    /// Maps one regular page granule twice.
    ///
    /// `name` labels the backing storage object where the platform supports it
    /// (visible in `/proc/self/fd/` on Linux).
    ///
    /// # Errors
    ///
    /// Returns a construction error (`BackingStore`, `Resize`, `Map`, ...) if any
    /// step of the double mapping fails. Nothing stays mapped in that case.
    pub fn allocate_regular(name: &str) -> Result<MirroredRegion> {
        Self::map(name, false)
    }

    /// Maps one large page granule twice.
    ///
    /// # Errors
    ///
    /// Besides the errors of [`MirroredRegion::allocate_regular`], this fails when
    /// the system has no free huge pages or the process lacks the privilege to
    /// use them.
    pub fn allocate_large_pages(name: &str) -> Result<MirroredRegion> {
        check_and_enable_large_page_support();
        Self::map(name, true)
    }

    fn map(name: &str, large_pages: bool) -> Result<MirroredRegion> {
        let (ptr, capacity) = match mmap::map_mirrored(name, large_pages) {
            Ok(res) => res,
            Err(e) => {
                log::warn!(
                    "failed to map mirrored region '{name}' (large pages: {large_pages}): {e}"
                );
                return Err(e);
            }
        };
        debug_assert!((ptr as usize).is_multiple_of(Self::regular_page_size()));
        log::debug!("mapped mirrored region '{name}' at {ptr:p}, capacity {capacity} bytes");
        Ok(MirroredRegion {
            ptr: ptr.cast(),
            capacity,
            uses_large_pages: large_pages,
        })
    }

    /// Returns the size of one copy of the storage in bytes.
    ///
    /// The mapped range is twice as large.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns a raw pointer to the beginning of the mapped range.
    ///
    /// # Safety
    ///
    /// The caller must ensure that:
    /// - The pointer is not used after the `MirroredRegion` is dropped
    /// - Any access stays within `0..2 * capacity`
    #[inline]
    pub fn ptr(&self) -> *mut u8 {
        self.ptr
    }

    /// Returns `true` if this region is backed by large pages.
    #[inline]
    pub fn uses_large_pages(&self) -> bool {
        self.uses_large_pages
    }

    /// Returns the first copy of the storage as a byte slice.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ptr, self.capacity) }
    }

    /// Returns the first copy of the storage as a mutable byte slice.
    #[inline]
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.ptr, self.capacity) }
    }

    /// Unmaps both halves of the region.
    ///
    /// # Errors
    ///
    /// Returns an `Unmap` error if the OS refuses to release the range. The
    /// region is consumed either way.
    pub fn release(self) -> Result<()> {
        let this = std::mem::ManuallyDrop::new(self);
        unsafe { this.unmap() }
    }

    /// # Safety
    ///
    /// Must be called at most once per region.
    unsafe fn unmap(&self) -> Result<()> {
        unsafe { mmap::unmap_mirrored(self.ptr.cast(), self.capacity) }.map_err(Error::unmap)?;
        log::debug!(
            "unmapped mirrored region at {:p}, capacity {} bytes",
            self.ptr,
            self.capacity
        );
        Ok(())
    }
}

impl Drop for MirroredRegion {
    fn drop(&mut self) {
        if let Err(e) = unsafe { self.unmap() } {
            log::warn!("{e}");
        }
    }
}

// SAFETY: MirroredRegion exclusively owns its mapping, which is not tied to the
// creating thread.
unsafe impl Send for MirroredRegion {}

impl std::fmt::Debug for MirroredRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MirroredRegion")
            .field("ptr", &self.ptr)
            .field("capacity", &self.capacity)
            .field("uses_large_pages", &self.uses_large_pages)
            .finish()
    }
}

/// Enables the platform privilege needed for large pages, once per process.
///
/// Failure is only logged: the mapping attempt that follows reports the actual error.
fn check_and_enable_large_page_support() {
    static RESULT: OnceLock<()> = OnceLock::new();
    RESULT.get_or_init(|| {
        if let Err(e) = mmap::try_enable_large_pages() {
            log::warn!("failed to enable large page support: {e}");
        }
    });
}

use std::{
    ffi::c_void,
    os::fd::{AsRawFd, FromRawFd, OwnedFd},
    sync::OnceLock,
};

use vmring_common::{Result, error::Error, error::MapStage};

/// Huge page granule selected by `MFD_HUGE_2MB` / `MAP_HUGE_2MB`.
const HUGE_PAGE_SIZE: usize = 2 * 1024 * 1024;

/// Maps one granule of anonymous shared memory twice, back to back.
///
/// The storage object is a `memfd` sized to exactly one granule (a regular page,
/// or a 2MB huge page when `large_pages` is set). The returned range is
/// `2 * granule` bytes long, and byte `i` of the first half is the same physical
/// byte as byte `i` of the second half.
///
/// # Returns
///
/// `Ok((ptr, granule))`, where `ptr` is the start of the `2 * granule` range.
///
/// # Errors
///
/// - `InvalidArgument` if `name` contains a NUL byte
/// - `MetadataAllocation` if the storage name cannot be allocated
/// - `BackingStore` if `memfd_create` fails
/// - `Resize` if `ftruncate` fails
/// - `Map` if either mapping fails
///
/// Every resource acquired before the failing step is released before returning.
///
/// # Prerequisites
///
/// The initial mapping reserves the whole range, so huge page mode needs two
/// free huge pages, e.g.:
/// ```bash
/// sudo sysctl -w vm.nr_hugepages=2
/// ```
///
/// # Safety
///
/// The returned range must be released with [`unmap_mirrored`] using the returned
/// granule.
pub fn map_mirrored(name: &str, large_pages: bool) -> Result<(*mut c_void, usize)> {
    let (granule, mfd_flags, mmap_flags) = if large_pages {
        (
            get_large_page_size(),
            libc::MFD_HUGETLB | libc::MFD_HUGE_2MB,
            libc::MAP_HUGETLB | libc::MAP_HUGE_2MB,
        )
    } else {
        (get_page_size(), 0, 0)
    };
    assert!(granule.is_power_of_two());

    let c_name = nul_terminated(name)?;
    let fd = unsafe { libc::memfd_create(c_name.as_ptr().cast(), libc::MFD_CLOEXEC | mfd_flags) };
    if fd == -1 {
        return Err(Error::backing_store(std::io::Error::last_os_error()));
    }
    // Closed on every exit path; the mappings stay valid after the close.
    let fd = unsafe { OwnedFd::from_raw_fd(fd) };

    if unsafe { libc::ftruncate(fd.as_raw_fd(), granule as libc::off_t) } == -1 {
        return Err(Error::resize(granule, std::io::Error::last_os_error()));
    }

    // Reserve the whole contiguous range with the first mapping, so the fixed
    // mirror below can only ever replace our own pages.
    let first = unsafe {
        libc::mmap(
            std::ptr::null_mut(),
            2 * granule,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_SHARED | mmap_flags,
            fd.as_raw_fd(),
            0,
        )
    };
    if first.is_null() || first == libc::MAP_FAILED {
        return Err(Error::map(
            MapStage::First,
            std::io::Error::last_os_error(),
        ));
    }
    let reservation = Reservation {
        ptr: first,
        len: 2 * granule,
    };

    let mirror_at = unsafe { first.cast::<u8>().add(granule) }.cast::<c_void>();
    let second = unsafe {
        libc::mmap(
            mirror_at,
            granule,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_SHARED | libc::MAP_FIXED | mmap_flags,
            fd.as_raw_fd(),
            0,
        )
    };
    if second == libc::MAP_FAILED {
        return Err(Error::map(
            MapStage::Second,
            std::io::Error::last_os_error(),
        ));
    }
    if second != mirror_at {
        return Err(Error::map(
            MapStage::Second,
            std::io::Error::other("mirror mapping was relocated"),
        ));
    }

    Ok((reservation.into_raw(), granule))
}

/// Releases a range returned by [`map_mirrored`].
///
/// # Safety
///
/// - `ptr` and `granule` must come from a single successful [`map_mirrored`] call
/// - the range must not have been released already
/// - no references into the range may outlive this call
pub unsafe fn unmap_mirrored(ptr: *mut c_void, granule: usize) -> std::io::Result<()> {
    let res = unsafe { libc::munmap(ptr, 2 * granule) };
    if res < 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

/// Attempts to enable large page support for the current process.
///
/// This is a no-op on Linux: huge pages are reserved administratively, see
/// <https://www.kernel.org/doc/Documentation/vm/hugetlbpage.txt>.
pub fn try_enable_large_pages() -> std::io::Result<()> {
    Ok(())
}

/// Returns the huge page granule in bytes.
///
/// The mapping flags request 2MB pages explicitly, so this does not depend on
/// the system default reported in `/proc/meminfo`.
pub fn get_large_page_size() -> usize {
    HUGE_PAGE_SIZE
}

/// Gets the system's standard page size in bytes.
///
/// The value is cached after the first call. If the page size cannot be
/// determined, returns 4KB.
pub fn get_page_size() -> usize {
    static SIZE: OnceLock<usize> = OnceLock::new();
    if let Some(&size) = SIZE.get() {
        size
    } else {
        match read_page_size() {
            Ok(size) => {
                let _ = SIZE.set(size);
                size
            }
            Err(_) => 4 * 1024,
        }
    }
}

fn read_page_size() -> std::io::Result<usize> {
    let res = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if res < 0 {
        return Err(std::io::Error::last_os_error());
    }
    assert!(res < i32::MAX as _);
    Ok(res as usize)
}

/// Copies `name` into a NUL-terminated buffer without aborting on allocation failure.
fn nul_terminated(name: &str) -> Result<Vec<u8>> {
    if name.as_bytes().contains(&0) {
        return Err(Error::invalid_arg("name", "must not contain NUL bytes"));
    }
    let mut buf = Vec::new();
    buf.try_reserve_exact(name.len() + 1)
        .map_err(|_| Error::metadata_allocation("backing store name"))?;
    buf.extend_from_slice(name.as_bytes());
    buf.push(0);
    Ok(buf)
}

/// Unmaps the reserved range unless ownership is handed out with `into_raw`.
struct Reservation {
    ptr: *mut c_void,
    len: usize,
}

impl Reservation {
    fn into_raw(self) -> *mut c_void {
        let ptr = self.ptr;
        std::mem::forget(self);
        ptr
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if unsafe { libc::munmap(self.ptr, self.len) } < 0 {
            log::warn!(
                "failed to release reserved range {:p}: {}",
                self.ptr,
                std::io::Error::last_os_error()
            );
        }
    }
}

use std::{ffi::c_void, sync::OnceLock};

use vmring_common::{Result, error::Error, error::MapStage};
use windows_sys::Win32::{
    Foundation::{CloseHandle, ERROR_SUCCESS, GetLastError, HANDLE, INVALID_HANDLE_VALUE, LUID},
    Security::{
        AdjustTokenPrivileges, LookupPrivilegeValueW, SE_LOCK_MEMORY_NAME, TOKEN_ADJUST_PRIVILEGES,
        TOKEN_PRIVILEGES, TOKEN_QUERY,
    },
    System::{
        Memory::{
            CreateFileMappingW, FILE_MAP_ALL_ACCESS, FILE_MAP_LARGE_PAGES, GetLargePageMinimum,
            MEM_RELEASE, MEM_RESERVE, MEMORY_MAPPED_VIEW_ADDRESS, MapViewOfFileEx, PAGE_NOACCESS,
            PAGE_READWRITE, SEC_COMMIT, SEC_LARGE_PAGES, UnmapViewOfFile, VirtualAlloc,
            VirtualFree,
        },
        SystemInformation::{GetSystemInfo, SYSTEM_INFO},
        Threading::{GetCurrentProcess, OpenProcessToken},
    },
};

/// Maps one granule of pagefile-backed memory twice, back to back.
///
/// The storage object is an unnamed pagefile-backed section of exactly one
/// granule: the allocation granularity for regular pages (views must start on
/// it), or the large page minimum when `large_pages` is set. A free range of
/// `2 * granule` bytes is located by reserving and immediately releasing it,
/// then both views are mapped at exact addresses. `MapViewOfFileEx` fails
/// instead of relocating, so a racing allocation surfaces as a `Map` error.
///
/// `name` is only used by the Linux backend; sections here are unnamed so they
/// cannot be opened by other processes.
///
/// # Returns
///
/// `Ok((ptr, granule))`, where `ptr` is the start of the `2 * granule` range.
///
/// # Prerequisites
///
/// Large pages need the "Lock pages in memory" privilege, see
/// [`try_enable_large_pages`].
pub fn map_mirrored(_name: &str, large_pages: bool) -> Result<(*mut c_void, usize)> {
    let (granule, protect, access) = if large_pages {
        (
            get_large_page_size(),
            PAGE_READWRITE | SEC_COMMIT | SEC_LARGE_PAGES,
            FILE_MAP_ALL_ACCESS | FILE_MAP_LARGE_PAGES,
        )
    } else {
        (get_allocation_granularity(), PAGE_READWRITE, FILE_MAP_ALL_ACCESS)
    };
    assert!(granule.is_power_of_two());

    let size = granule as u64;
    let section = unsafe {
        CreateFileMappingW(
            INVALID_HANDLE_VALUE,
            std::ptr::null(),
            protect,
            (size >> 32) as u32,
            size as u32,
            std::ptr::null(),
        )
    };
    if section.is_null() {
        return Err(Error::backing_store(last_error()));
    }
    // Views keep the section alive, so the handle is closed on every exit path.
    let section = Section(section);

    let base = unsafe { VirtualAlloc(std::ptr::null(), 2 * granule, MEM_RESERVE, PAGE_NOACCESS) };
    if base.is_null() {
        return Err(Error::map(MapStage::First, last_error()));
    }
    unsafe { VirtualFree(base, 0, MEM_RELEASE) };

    let first = unsafe { MapViewOfFileEx(section.0, access, 0, 0, granule, base) };
    if first.Value.is_null() {
        return Err(Error::map(MapStage::First, last_error()));
    }
    let first = View(first);

    let mirror_at = unsafe { base.cast::<u8>().add(granule) }.cast::<c_void>();
    let second = unsafe { MapViewOfFileEx(section.0, access, 0, 0, granule, mirror_at) };
    if second.Value.is_null() {
        return Err(Error::map(MapStage::Second, last_error()));
    }
    if second.Value != mirror_at {
        unsafe { UnmapViewOfFile(second) };
        return Err(Error::map(
            MapStage::Second,
            std::io::Error::other("mirror view was relocated"),
        ));
    }

    std::mem::forget(first);
    Ok((base, granule))
}

/// Releases a range returned by [`map_mirrored`].
///
/// # Safety
///
/// - `ptr` and `granule` must come from a single successful [`map_mirrored`] call
/// - the range must not have been released already
/// - no references into the range may outlive this call
pub unsafe fn unmap_mirrored(ptr: *mut c_void, granule: usize) -> std::io::Result<()> {
    let mirror = unsafe { ptr.cast::<u8>().add(granule) }.cast::<c_void>();
    let first = unsafe { UnmapViewOfFile(MEMORY_MAPPED_VIEW_ADDRESS { Value: ptr }) };
    let second = unsafe { UnmapViewOfFile(MEMORY_MAPPED_VIEW_ADDRESS { Value: mirror }) };
    if first == 0 || second == 0 {
        return Err(last_error());
    }
    Ok(())
}

/// Attempts to enable large page support for the current process.
///
/// This enables `SeLockMemoryPrivilege`, which is required to map large pages.
/// The privilege setting persists for the lifetime of the process.
pub fn try_enable_large_pages() -> std::io::Result<()> {
    adjust_lock_memory_privilege()
}

/// Gets the system's large page size in bytes, 2MB if it cannot be determined.
pub fn get_large_page_size() -> usize {
    static LARGE_PAGE_SIZE: OnceLock<usize> = OnceLock::new();

    *LARGE_PAGE_SIZE.get_or_init(|| unsafe {
        let large_page_size = GetLargePageMinimum();
        if large_page_size > 0 {
            large_page_size
        } else {
            2 * 1024 * 1024
        }
    })
}

/// Gets the system's standard page size in bytes.
pub fn get_page_size() -> usize {
    system_info().0
}

/// Gets the granularity at which views may be placed, typically 64KB.
pub fn get_allocation_granularity() -> usize {
    system_info().1
}

fn system_info() -> (usize, usize) {
    static INFO: OnceLock<(usize, usize)> = OnceLock::new();

    *INFO.get_or_init(|| unsafe {
        let mut system_info: SYSTEM_INFO = std::mem::zeroed();
        GetSystemInfo(&mut system_info);
        (
            system_info.dwPageSize as usize,
            system_info.dwAllocationGranularity as usize,
        )
    })
}

fn last_error() -> std::io::Error {
    std::io::Error::from_raw_os_error(unsafe { GetLastError() } as i32)
}

struct Section(HANDLE);

impl Drop for Section {
    fn drop(&mut self) {
        unsafe { CloseHandle(self.0) };
    }
}

struct View(MEMORY_MAPPED_VIEW_ADDRESS);

impl Drop for View {
    fn drop(&mut self) {
        unsafe { UnmapViewOfFile(MEMORY_MAPPED_VIEW_ADDRESS { Value: self.0.Value }) };
    }
}

fn adjust_lock_memory_privilege() -> std::io::Result<()> {
    unsafe {
        let mut token_handle: HANDLE = std::ptr::null_mut();
        let current_process = GetCurrentProcess();

        let result = OpenProcessToken(
            current_process,
            TOKEN_ADJUST_PRIVILEGES | TOKEN_QUERY,
            &mut token_handle,
        );
        if result == 0 {
            return Err(last_error());
        }

        let mut luid = LUID {
            LowPart: 0,
            HighPart: 0,
        };
        let result = LookupPrivilegeValueW(std::ptr::null(), SE_LOCK_MEMORY_NAME, &mut luid);
        if result == 0 {
            let err = last_error();
            CloseHandle(token_handle);
            return Err(err);
        }

        let token_privileges = TOKEN_PRIVILEGES {
            PrivilegeCount: 1,
            Privileges: [windows_sys::Win32::Security::LUID_AND_ATTRIBUTES {
                Luid: luid,
                Attributes: windows_sys::Win32::Security::SE_PRIVILEGE_ENABLED,
            }],
        };

        let result = AdjustTokenPrivileges(
            token_handle,
            0,
            &token_privileges,
            0,
            std::ptr::null_mut(),
            std::ptr::null_mut(),
        );
        // AdjustTokenPrivileges reports partial success through GetLastError.
        let last_error_code = GetLastError();
        CloseHandle(token_handle);

        if result == 0 || last_error_code != ERROR_SUCCESS {
            return Err(std::io::Error::from_raw_os_error(last_error_code as i32));
        }
        Ok(())
    }
}

use std::ffi::c_void;

use vmring_common::{Result, error::Error};

/// Mirrored mappings need an anonymous shareable storage object and a
/// fixed-address mapping primitive; neither is available on this platform.
pub fn map_mirrored(_name: &str, _large_pages: bool) -> Result<(*mut c_void, usize)> {
    Err(Error::unsupported(
        "mirrored mappings are only implemented for Linux and Windows",
    ))
}

/// Releases a range returned by [`map_mirrored`].
pub unsafe fn unmap_mirrored(_ptr: *mut c_void, _granule: usize) -> std::io::Result<()> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "mirrored mappings are not supported",
    ))
}

pub fn try_enable_large_pages() -> std::io::Result<()> {
    Ok(())
}

/// Returns the "large page" size in bytes.
pub fn get_large_page_size() -> usize {
    2 * 1024 * 1024
}

/// Returns the "standard page" size in bytes.
pub fn get_page_size() -> usize {
    4 * 1024
}

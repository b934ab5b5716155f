use crate::{mirrored_region::MirroredRegion, mmap};

#[test]
fn test_page_sizes() {
    let page_size = mmap::get_page_size();
    assert!(page_size.is_power_of_two());
    assert!(page_size >= 4096);
    assert!(mmap::get_large_page_size().is_power_of_two());
    assert!(mmap::get_large_page_size() > page_size);
}

#[cfg(any(target_os = "linux", windows))]
mod mirrored {
    use super::*;

    fn expected_granule() -> usize {
        #[cfg(windows)]
        {
            mmap::get_allocation_granularity()
        }
        #[cfg(not(windows))]
        {
            mmap::get_page_size()
        }
    }

    #[test]
    fn test_raw_map_and_unmap() {
        let (ptr, granule) = mmap::map_mirrored("raw", false).expect("map_mirrored");
        assert!(!ptr.is_null());
        assert_eq!(granule, expected_granule());
        assert!((ptr as usize).is_multiple_of(mmap::get_page_size()));
        unsafe { mmap::unmap_mirrored(ptr, granule) }.expect("unmap_mirrored");
    }

    #[test]
    fn test_regular_region_properties() {
        let region = MirroredRegion::allocate_regular("props").expect("allocate_regular");
        assert_eq!(region.capacity(), expected_granule());
        assert!(region.capacity().is_power_of_two());
        assert!(!region.uses_large_pages());
        assert!(!region.ptr().is_null());
        assert_eq!(region.as_bytes().len(), region.capacity());
    }

    #[test]
    fn test_fresh_region_is_zeroed() {
        let region = MirroredRegion::allocate_regular("zeroed").expect("allocate_regular");
        let cap = region.capacity();
        let both = unsafe { std::slice::from_raw_parts(region.ptr(), 2 * cap) };
        assert!(both.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_halves_alias_each_other() {
        let region = MirroredRegion::allocate_regular("alias").expect("allocate_regular");
        let cap = region.capacity();
        let base = region.ptr();

        for i in 0..cap {
            let v = (i % 251) as u8 + 1;
            unsafe {
                base.add(i).write_volatile(v);
                assert_eq!(base.add(cap + i).read_volatile(), v);
            }
        }

        for _ in 0..1000 {
            let i = fastrand::usize(0..cap);
            let v = fastrand::u8(..);
            unsafe {
                base.add(cap + i).write_volatile(v);
                assert_eq!(base.add(i).read_volatile(), v);
            }
        }
    }

    #[test]
    fn test_contiguous_access_across_boundary() {
        let mut region = MirroredRegion::allocate_regular("span").expect("allocate_regular");
        let cap = region.capacity();
        let bytes = region.as_bytes_mut();
        bytes[cap - 2..].copy_from_slice(b"ab");
        bytes[..2].copy_from_slice(b"cd");

        let span = unsafe { std::slice::from_raw_parts(region.ptr().add(cap - 2), 4) };
        assert_eq!(span, b"abcd");
    }

    #[test]
    fn test_release() {
        let region = MirroredRegion::allocate_regular("release").expect("allocate_regular");
        region.release().expect("release");
    }

    #[test]
    fn test_many_regions_are_independent() {
        let mut regions = (0..8)
            .map(|i| MirroredRegion::allocate_regular(&format!("many-{i}")).unwrap())
            .collect::<Vec<_>>();
        for (i, region) in regions.iter_mut().enumerate() {
            region.as_bytes_mut()[0] = i as u8;
        }
        for (i, region) in regions.iter().enumerate() {
            assert_eq!(region.as_bytes()[0], i as u8);
            let cap = region.capacity();
            assert_eq!(unsafe { region.ptr().add(cap).read() }, i as u8);
        }
    }

    #[test]
    fn test_large_page_region() {
        match MirroredRegion::allocate_large_pages("large") {
            Ok(region) => {
                assert!(region.uses_large_pages());
                assert_eq!(region.capacity(), MirroredRegion::large_page_size());
                let cap = region.capacity();
                unsafe {
                    region.ptr().add(cap - 1).write(0x5a);
                    assert_eq!(region.ptr().add(2 * cap - 1).read(), 0x5a);
                }
            }
            Err(e) => {
                println!("Large pages not available, skipping test: {e}");
                assert!(e.is_construction_failure());
            }
        }
    }
}

#[cfg(target_os = "linux")]
#[test]
fn test_name_with_nul_is_rejected() {
    let err = MirroredRegion::allocate_regular("bad\0name").unwrap_err();
    assert!(matches!(
        err.kind(),
        vmring_common::error::ErrorKind::InvalidArgument { .. }
    ));
}

#[cfg(not(any(target_os = "linux", windows)))]
#[test]
fn test_unsupported_platform() {
    let err = MirroredRegion::allocate_regular("unsupported").unwrap_err();
    assert!(matches!(
        err.kind(),
        vmring_common::error::ErrorKind::Unsupported { .. }
    ));
}

//! Teardown releases the whole double-mapped range.
//!
//! Kept as the only test in this binary so no other test thread can map
//! something into the released range before it is probed.

#[cfg(target_os = "linux")]
#[test]
fn test_range_is_unmapped_after_free() {
    use vmring::{PageMode, RingBuffer};

    let mut rb = RingBuffer::new(PageMode::Standard).unwrap();
    rb.write(b"soon gone").unwrap();
    let base = rb.get(0).wrapping_sub(rb.index());
    let len = 2 * rb.capacity();

    let is_mapped = |addr: *mut u8, len: usize| unsafe {
        libc::msync(addr.cast(), len, libc::MS_ASYNC) == 0
    };
    assert!(is_mapped(base, len));

    rb.free().unwrap();

    // msync reports ENOMEM for ranges that are not mapped.
    assert!(!is_mapped(base, len));
    assert_eq!(
        std::io::Error::last_os_error().raw_os_error(),
        Some(libc::ENOMEM)
    );
}

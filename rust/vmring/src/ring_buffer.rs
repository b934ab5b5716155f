//! Cursor-addressed ring buffer over a [`MirroredRegion`].

use vmring_common::{Result, error::Error, verify_arg};
use vmring_page_alloc::MirroredRegion;

use crate::options::{PageMode, RingBufferOptions};

/// A fixed-capacity circular byte buffer with a single cursor.
///
/// All positions are byte offsets relative to the cursor (`index`). Because the
/// storage is mapped twice back to back, the `capacity` bytes following any
/// cursor position are contiguous in memory, and reading or writing across the
/// logical end of the buffer needs no special handling.
///
/// Two families of accessors are provided:
/// - raw ones ([`get`](Self::get), [`read_unchecked`](Self::read_unchecked),
///   [`write_unchecked`](Self::write_unchecked)) that trust the caller to keep
///   every access within `capacity` bytes of the cursor;
/// - checked ones ([`read`](Self::read), [`write`](Self::write),
///   [`peek`](Self::peek) and friends) that validate the range first and then
///   delegate to the raw ones.
///
/// The buffer is `Send` but not `Sync`; moving the cursor takes `&mut self`.
#[derive(Debug)]
pub struct RingBuffer {
    region: MirroredRegion,
    /// Next write position, always in `0..capacity`.
    index: usize,
    page_mode: PageMode,
}

impl RingBuffer {
    /// Creates a ring buffer of one page of the given kind.
    pub fn new(page_mode: PageMode) -> Result<RingBuffer> {
        Self::with_options(&RingBufferOptions::new(page_mode))
    }

    /// Creates a ring buffer from explicit options.
    ///
    /// # Errors
    ///
    /// - `InvalidArgument` if the options do not validate
    /// - a construction error (`MetadataAllocation`, `BackingStore`, `Resize`,
    ///   `Map`, `Unsupported`) if the double mapping cannot be set up. No
    ///   resources are held after a failure.
    pub fn with_options(options: &RingBufferOptions) -> Result<RingBuffer> {
        options.validate()?;
        let region = match options.page_mode {
            PageMode::Standard => MirroredRegion::allocate_regular(&options.name)?,
            PageMode::Huge => MirroredRegion::allocate_large_pages(&options.name)?,
        };
        log::debug!(
            "created ring buffer '{}' ({:?}), capacity {} bytes",
            options.name,
            options.page_mode,
            region.capacity()
        );
        Ok(RingBuffer {
            region,
            index: 0,
            page_mode: options.page_mode,
        })
    }

    /// Size of the buffer in bytes. Fixed at construction.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.region.capacity()
    }

    /// Current cursor position, in `0..capacity`.
    #[inline]
    pub fn index(&self) -> usize {
        self.index
    }

    #[inline]
    pub fn page_mode(&self) -> PageMode {
        self.page_mode
    }

    #[inline]
    pub fn uses_large_pages(&self) -> bool {
        self.region.uses_large_pages()
    }

    /// Returns the address `offset` bytes past the cursor.
    ///
    /// No bounds are enforced. Dereferencing the result is only valid for
    /// accesses of `len` bytes where `offset + len <= capacity`.
    #[inline]
    pub fn get(&self, offset: usize) -> *mut u8 {
        self.region.ptr().wrapping_add(self.index).wrapping_add(offset)
    }

    /// Copies `out.len()` bytes starting `offset` bytes past the cursor into `out`.
    ///
    /// The cursor does not move.
    ///
    /// # Safety
    ///
    /// `offset + out.len()` must not exceed [`capacity`](Self::capacity), and `out`
    /// must not point into this buffer's storage.
    #[inline]
    pub unsafe fn read_unchecked(&self, out: &mut [u8], offset: usize) {
        unsafe { std::ptr::copy_nonoverlapping(self.get(offset), out.as_mut_ptr(), out.len()) }
    }

    /// Copies `data` to the cursor position and advances the cursor past it.
    ///
    /// # Safety
    ///
    /// `data.len()` must not exceed [`capacity`](Self::capacity), and `data` must
    /// not point into this buffer's storage.
    #[inline]
    pub unsafe fn write_unchecked(&mut self, data: &[u8]) {
        unsafe { std::ptr::copy_nonoverlapping(data.as_ptr(), self.get(0), data.len()) };
        self.roll(data.len());
    }

    /// Advances the cursor by `num_bytes`, wrapping modulo the capacity.
    #[inline]
    pub fn roll(&mut self, num_bytes: usize) {
        let capacity = self.capacity();
        self.index = (self.index + num_bytes % capacity) % capacity;
    }

    /// Number of items of `item_size` bytes that fit in the buffer.
    ///
    /// # Panics
    ///
    /// Panics if `item_size` is zero.
    #[inline]
    pub fn length(&self, item_size: usize) -> usize {
        self.capacity() / item_size
    }

    /// Number of `T` items that fit in the buffer.
    ///
    /// # Panics
    ///
    /// Panics if `T` is zero-sized.
    #[inline]
    pub fn length_of<T>(&self) -> usize {
        self.length(std::mem::size_of::<T>())
    }

    /// Checked version of [`read_unchecked`](Self::read_unchecked).
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if `offset + out.len()` exceeds the capacity.
    pub fn read(&self, out: &mut [u8], offset: usize) -> Result<()> {
        self.verify_range(offset, out.len())?;
        unsafe { self.read_unchecked(out, offset) };
        Ok(())
    }

    /// Checked version of [`write_unchecked`](Self::write_unchecked).
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if `data` is longer than the capacity. The
    /// buffer is left untouched in that case.
    pub fn write(&mut self, data: &[u8]) -> Result<()> {
        verify_arg!(data, data.len() <= self.capacity());
        unsafe { self.write_unchecked(data) };
        Ok(())
    }

    /// Returns `len` bytes starting `offset` bytes past the cursor.
    ///
    /// The slice may run across the logical end of the buffer; its tail then
    /// shows the bytes at the start of the storage.
    pub fn peek(&self, offset: usize, len: usize) -> Result<&[u8]> {
        self.verify_range(offset, len)?;
        Ok(unsafe { std::slice::from_raw_parts(self.get(offset), len) })
    }

    /// Mutable version of [`peek`](Self::peek). The cursor does not move.
    pub fn peek_mut(&mut self, offset: usize, len: usize) -> Result<&mut [u8]> {
        self.verify_range(offset, len)?;
        Ok(unsafe { std::slice::from_raw_parts_mut(self.get(offset), len) })
    }

    /// Returns `count` items of type `T` starting `offset` bytes past the cursor.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the items do not fit within the capacity or
    /// the resulting address is not suitably aligned for `T`.
    pub fn peek_as<T>(&self, offset: usize, count: usize) -> Result<&[T]>
    where
        T: bytemuck::AnyBitPattern,
    {
        let bytes = self.peek(offset, Self::items_len::<T>(count)?)?;
        bytemuck::try_cast_slice(bytes).map_err(|e| Error::invalid_arg("offset", format!("{e:?}")))
    }

    /// Mutable version of [`peek_as`](Self::peek_as).
    pub fn peek_as_mut<T>(&mut self, offset: usize, count: usize) -> Result<&mut [T]>
    where
        T: bytemuck::AnyBitPattern + bytemuck::NoUninit,
    {
        let len = Self::items_len::<T>(count)?;
        let bytes = self.peek_mut(offset, len)?;
        bytemuck::try_cast_slice_mut(bytes)
            .map_err(|e| Error::invalid_arg("offset", format!("{e:?}")))
    }

    /// Returns the storage in physical order, independent of the cursor.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        self.region.as_bytes()
    }

    /// Resets the cursor and zeroes the storage.
    pub fn clear(&mut self) {
        self.region.as_bytes_mut().fill(0);
        self.index = 0;
    }

    /// Unmaps the storage.
    ///
    /// Dropping the buffer has the same effect but cannot report failures.
    pub fn free(self) -> Result<()> {
        self.region.release()
    }

    fn verify_range(&self, offset: usize, len: usize) -> Result<()> {
        verify_arg!(
            offset,
            offset
                .checked_add(len)
                .is_some_and(|end| end <= self.capacity())
        );
        Ok(())
    }

    fn items_len<T>(count: usize) -> Result<usize> {
        count
            .checked_mul(std::mem::size_of::<T>())
            .ok_or_else(|| Error::invalid_arg("count", "item range overflows"))
    }
}

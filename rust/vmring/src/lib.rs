//! A fixed-capacity circular byte buffer backed by a double-mapped page.
//!
//! The storage is mapped twice, back to back, so every access of at most
//! `capacity` bytes starting at the cursor is contiguous in virtual memory,
//! even when it logically wraps around the end of the buffer. Only the cursor
//! update needs modulo arithmetic; copies never get split at the wrap point.
//!
//! ```no_run
//! use vmring::{PageMode, RingBuffer};
//!
//! let mut rb = RingBuffer::new(PageMode::Standard)?;
//! rb.roll(rb.capacity() - 2);
//! rb.write(b"wrap")?;
//! rb.roll(rb.capacity() - 4);
//! assert_eq!(rb.peek(0, 4)?, b"wrap");
//! # Ok::<(), vmring::Error>(())
//! ```

pub mod options;
pub mod ring_buffer;

pub use options::{PageMode, RingBufferOptions};
pub use ring_buffer::RingBuffer;
pub use vmring_common::{Result, error::Error, error::ErrorKind};

//! Construction options for [`RingBuffer`](crate::RingBuffer).

use vmring_common::{Result, verify_arg};

/// Name given to the backing storage object when none is specified.
pub const DEFAULT_NAME: &str = "vmring";

/// Page granule backing the ring buffer, which also fixes its capacity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PageMode {
    /// One regular page (e.g. 4KB on x86_64 Linux).
    #[default]
    Standard,
    /// One huge page (2MB on Linux). Huge pages must be reserved beforehand,
    /// e.g. `sudo sysctl -w vm.nr_hugepages=2`.
    Huge,
}

/// Configuration for ring buffer construction.
#[derive(Debug, Clone)]
pub struct RingBufferOptions {
    /// Page granule used for the backing storage.
    pub page_mode: PageMode,
    /// Label of the backing storage object, for diagnostics. Must be non-empty
    /// and free of NUL bytes.
    pub name: String,
}

impl Default for RingBufferOptions {
    fn default() -> Self {
        Self {
            page_mode: PageMode::Standard,
            name: DEFAULT_NAME.to_string(),
        }
    }
}

impl RingBufferOptions {
    pub fn new(page_mode: PageMode) -> Self {
        Self {
            page_mode,
            ..Default::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Validates the options and returns an error if invalid.
    pub fn validate(&self) -> Result<()> {
        verify_arg!(name, !self.name.is_empty());
        verify_arg!(name, !self.name.contains('\0'));
        Ok(())
    }
}

/// Base address hint of the first region when none is configured.
pub const HEAP_START: usize = 0x0404_0000;

/// Smallest region we ever ask the OS for.
pub const REGION_MIN_SIZE: usize = 2 * 4096;

/// Implementation chosen constants of a [`crate::Heap`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapConfig {
    /// Where the first region should be mapped. Only a hint: if the address
    /// is taken the OS picks another one.
    pub base: usize,
    /// Lower bound for the size of every mapped region, in bytes.
    pub min_region_size: usize,
}

impl HeapConfig {
    pub const fn new() -> Self {
        Self {
            base: HEAP_START,
            min_region_size: REGION_MIN_SIZE,
        }
    }

    pub const fn with_base(mut self, base: usize) -> Self {
        self.base = base;
        self
    }

    pub const fn with_min_region_size(mut self, min_region_size: usize) -> Self {
        self.min_region_size = min_region_size;
        self
    }
}

impl Default for HeapConfig {
    fn default() -> Self {
        Self::new()
    }
}

use snafu::Snafu;

/// Failures reported by [`crate::Heap`].
///
/// Running out of memory is an ordinary, recoverable outcome. A corrupted heap
/// means some earlier operation broke the block list and is reported apart so
/// it isn't mistaken for exhaustion.
#[derive(Debug, Snafu, Clone, Copy, PartialEq, Eq)]
#[snafu(visibility(pub(crate)))]
pub enum HeapError {
    #[snafu(display("the OS refused to map a region for {size} bytes"))]
    MappingFailed { size: usize },

    #[snafu(display("out of memory while allocating {size} bytes"))]
    OutOfMemory { size: usize },

    #[snafu(display("the block list is corrupted"))]
    CorruptedHeap,
}

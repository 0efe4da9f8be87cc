use std::fmt;

use crate::heap::Heap;

/// How many leading data bytes are shown per block.
const DEBUG_FIRST_BYTES: usize = 4;

/// Table of every block of a [`Heap`]: header address, capacity, status and
/// the first bytes of its data area. Formatting it never modifies the heap.
///
/// ```text
///  --- Heap ---
///      start   capacity   status   contents
/// 0x4040000       2048    taken   0000
/// 0x4040818       6096     free   0000
/// ```
pub struct HeapDump<'a> {
    heap: &'a Heap,
}

impl<'a> HeapDump<'a> {
    pub(crate) fn new(heap: &'a Heap) -> Self {
        Self { heap }
    }
}

impl fmt::Display for HeapDump<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, " --- Heap ---")?;
        writeln!(f, "{:>10} {:>10} {:>8}   {}", "start", "capacity", "status", "contents")?;

        for block in self.heap.blocks() {
            let status = if block.is_free() { "free" } else { "taken" };
            write!(f, "{:>10p} {:>10} {:>8}   ", block.addr(), block.capacity().0, status)?;

            for byte in (0..DEBUG_FIRST_BYTES).map_while(|i| block.byte(i)) {
                write!(f, "{byte:X}")?;
            }
            writeln!(f)?;
        }

        Ok(())
    }
}

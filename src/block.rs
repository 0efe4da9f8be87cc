//! Block header protocol.
//!
//! This is the only place where raw heap memory is reinterpreted as typed
//! headers. Everything above this module works on typed block views and never
//! touches the underlying bytes directly. Callers outside the crate only ever
//! see [`BlockRef`], which borrows the heap it came from.

use std::{fmt, marker::PhantomData, mem, ptr::NonNull};

/// Smallest data area a block may have. Guarantees that whatever is split off
/// a block can itself host a header plus a minimal payload later on.
pub const BLOCK_MIN_CAPACITY: usize = 24;

/// Size of the header that precedes the data area of every block.
pub const BLOCK_HEADER_SIZE: usize = mem::size_of::<BlockHeader>();

/// This is the record written in place at the start of every block. The
/// data area handed out to the user starts right after it.
///
/// ```text
/// +---------------------+ <------+
/// |        next         |        |
/// +---------------------+        |
/// |      capacity       |        | -> Header
/// +---------------------+        |
/// |    is_free (1b)     |        |
/// +---------------------+ <------+ <- contents
/// |       Content       |        |
/// |         ...         |        | -> `capacity` bytes
/// |                     |        |
/// +---------------------+ <------+ <- block_after
/// ```
///
/// `next` follows address order but is not necessarily address contiguous:
/// a later region may have been mapped somewhere else entirely.
#[repr(C)]
pub struct BlockHeader {
    next: Option<NonNull<BlockHeader>>,
    capacity: usize,
    is_free: bool,
}

/// Usable bytes of a block, header excluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct BlockCapacity(pub usize);

/// Bytes a block spans in memory, header included.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct BlockSize(pub usize);

#[inline]
pub const fn size_from_capacity(capacity: BlockCapacity) -> BlockSize {
    BlockSize(capacity.0 + BLOCK_HEADER_SIZE)
}

#[inline]
pub const fn capacity_from_size(size: BlockSize) -> BlockCapacity {
    BlockCapacity(size.0 - BLOCK_HEADER_SIZE)
}

/// Typed view over a [`BlockHeader`] living inside heap memory.
///
/// A `Block` can only be obtained through the unsafe constructors below, which
/// is where we vouch that the pointer refers to a live header. It carries no
/// lifetime, so it never leaves the crate: callers get a [`BlockRef`] instead.
#[derive(Clone, Copy, PartialEq, Eq)]
pub(crate) struct Block(NonNull<BlockHeader>);

impl Block {
    /// Writes a fresh free header at `addr` spanning `size` bytes and linked to `next`.
    ///
    /// **SAFETY**: `addr..addr + size` must be writable memory owned by the
    /// heap, `addr` must be aligned for [`BlockHeader`] and `size` must be at
    /// least [`BLOCK_HEADER_SIZE`].
    pub(crate) unsafe fn init(addr: NonNull<u8>, size: BlockSize, next: Option<Block>) -> Block {
        debug_assert!(size.0 >= BLOCK_HEADER_SIZE);
        debug_assert_eq!(0, addr.as_ptr() as usize % mem::align_of::<BlockHeader>());

        let header = addr.cast::<BlockHeader>();

        unsafe {
            header.as_ptr().write(BlockHeader {
                next: next.map(|block| block.0),
                capacity: capacity_from_size(size).0,
                is_free: true,
            });
        }

        Block(header)
    }

    /// Adopts a header that already exists at `addr`.
    ///
    /// **SAFETY**: a header previously written by [`Block::init`] must live at `addr`.
    pub(crate) unsafe fn from_raw(addr: NonNull<u8>) -> Block {
        Block(addr.cast())
    }

    /// Recovers the header of a data pointer handed out by the allocator.
    ///
    /// **SAFETY**: `contents` must have been returned by
    /// [`crate::Heap::allocate`] on a heap that is still alive.
    pub(crate) unsafe fn from_contents(contents: NonNull<u8>) -> Block {
        unsafe { Block(contents.sub(BLOCK_HEADER_SIZE).cast()) }
    }

    /// Address of the header itself.
    #[inline]
    pub(crate) fn addr(self) -> *mut u8 {
        self.0.as_ptr().cast()
    }

    /// First byte of the data area, the pointer returned on allocation.
    #[inline]
    pub(crate) fn contents(self) -> NonNull<u8> {
        unsafe { self.0.cast::<u8>().add(BLOCK_HEADER_SIZE) }
    }

    /// The address right after the data area of this block.
    #[inline]
    pub(crate) fn after(self) -> *mut u8 {
        self.contents().as_ptr().wrapping_add(self.capacity().0)
    }

    #[inline]
    pub(crate) fn capacity(self) -> BlockCapacity {
        unsafe { BlockCapacity((*self.0.as_ptr()).capacity) }
    }

    #[inline]
    pub(crate) fn size(self) -> BlockSize {
        size_from_capacity(self.capacity())
    }

    #[inline]
    pub(crate) fn is_free(self) -> bool {
        unsafe { (*self.0.as_ptr()).is_free }
    }

    #[inline]
    pub(crate) fn next(self) -> Option<Block> {
        unsafe { (*self.0.as_ptr()).next.map(Block) }
    }

    /// Byte `index` of the data area, `None` past the capacity.
    pub(crate) fn byte(self, index: usize) -> Option<u8> {
        if index >= self.capacity().0 {
            return None;
        }

        unsafe { Some(self.contents().add(index).read()) }
    }

    #[inline]
    pub(crate) fn set_capacity(self, capacity: BlockCapacity) {
        unsafe { (*self.0.as_ptr()).capacity = capacity.0 }
    }

    #[inline]
    pub(crate) fn set_free(self, is_free: bool) {
        unsafe { (*self.0.as_ptr()).is_free = is_free }
    }

    #[inline]
    pub(crate) fn set_next(self, next: Option<Block>) {
        unsafe { (*self.0.as_ptr()).next = next.map(|block| block.0) }
    }
}

/// Address of the first byte after `block`'s data area.
#[inline]
pub(crate) fn block_after(block: Block) -> *mut u8 {
    block.after()
}

impl fmt::Debug for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Block")
            .field("addr", &self.addr())
            .field("capacity", &self.capacity().0)
            .field("is_free", &self.is_free())
            .field("next", &self.next().map(Block::addr))
            .finish()
    }
}

/// Read-only view of a block, borrowed from the [`crate::Heap`] it belongs to.
///
/// The borrow keeps the heap from being modified while the view is alive, so
/// a header can't be merged away or split underneath it:
///
/// ```compile_fail
/// use blockheap::Heap;
///
/// let mut heap = Heap::init(4096).unwrap();
/// let first = heap.blocks().next().unwrap();
/// heap.allocate(64).unwrap();
/// println!("{}", first.capacity().0);
/// ```
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct BlockRef<'a> {
    block: Block,
    marker: PhantomData<&'a BlockHeader>,
}

impl<'a> BlockRef<'a> {
    /// **SAFETY**: `block` must stay a live header, untouched, for `'a`.
    pub(crate) unsafe fn new(block: Block) -> Self {
        Self {
            block,
            marker: PhantomData,
        }
    }

    #[inline]
    pub(crate) fn block(self) -> Block {
        self.block
    }

    /// Address of the header itself.
    #[inline]
    pub fn addr(self) -> *const u8 {
        self.block.addr()
    }

    /// First byte of the data area.
    #[inline]
    pub fn contents(self) -> *const u8 {
        self.block.contents().as_ptr()
    }

    /// The address right after the data area.
    #[inline]
    pub fn after(self) -> *const u8 {
        self.block.after()
    }

    #[inline]
    pub fn capacity(self) -> BlockCapacity {
        self.block.capacity()
    }

    #[inline]
    pub fn size(self) -> BlockSize {
        self.block.size()
    }

    #[inline]
    pub fn is_free(self) -> bool {
        self.block.is_free()
    }

    #[inline]
    pub fn next(self) -> Option<BlockRef<'a>> {
        // SAFETY: the successor lives in the same heap, borrowed for `'a`.
        self.block.next().map(|block| unsafe { BlockRef::new(block) })
    }

    /// Byte `index` of the data area, `None` past the capacity.
    #[inline]
    pub fn byte(self, index: usize) -> Option<u8> {
        self.block.byte(index)
    }
}

impl fmt::Debug for BlockRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.block, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Word aligned scratch memory to write headers into.
    fn scratch(words: usize) -> Vec<usize> {
        vec![0; words]
    }

    #[test]
    fn header_is_word_aligned() {
        assert_eq!(0, BLOCK_HEADER_SIZE % mem::align_of::<usize>());
        assert!(BLOCK_HEADER_SIZE >= 2 * mem::size_of::<usize>() + 1);
    }

    #[test]
    fn size_and_capacity_are_inverse() {
        for bytes in [BLOCK_MIN_CAPACITY, 100, 4096] {
            let capacity = BlockCapacity(bytes);
            let size = size_from_capacity(capacity);

            assert_eq!(bytes + BLOCK_HEADER_SIZE, size.0);
            assert_eq!(capacity, capacity_from_size(size));
        }
    }

    #[test]
    fn init_writes_a_free_header() {
        let mut memory = scratch(64);
        let total = memory.len() * mem::size_of::<usize>();
        let addr = NonNull::new(memory.as_mut_ptr().cast::<u8>()).unwrap();

        let block = unsafe { Block::init(addr, BlockSize(total), None) };

        assert!(block.is_free());
        assert!(block.next().is_none());
        assert_eq!(total - BLOCK_HEADER_SIZE, block.capacity().0);
        assert_eq!(BlockSize(total), block.size());
        assert_eq!(addr.as_ptr(), block.addr());
        assert_eq!(addr.as_ptr().wrapping_add(total), block_after(block));
    }

    #[test]
    fn contents_round_trips_to_header() {
        let mut memory = scratch(16);
        let addr = NonNull::new(memory.as_mut_ptr().cast::<u8>()).unwrap();

        unsafe {
            let block = Block::init(addr, BlockSize(16 * mem::size_of::<usize>()), None);
            let contents = block.contents();

            assert_eq!(block.addr().wrapping_add(BLOCK_HEADER_SIZE), contents.as_ptr());
            assert_eq!(block, Block::from_contents(contents));
            assert_eq!(block, Block::from_raw(addr));

            contents.write(0x7F);
            assert_eq!(Some(0x7F), block.byte(0));
            assert_eq!(None, block.byte(block.capacity().0));
        }
    }

    #[test]
    fn view_follows_the_same_header() {
        let mut memory = scratch(32);
        let base = memory.as_mut_ptr().cast::<u8>();
        let half = 16 * mem::size_of::<usize>();

        unsafe {
            let second = Block::init(NonNull::new(base.add(half)).unwrap(), BlockSize(half), None);
            let first = Block::init(NonNull::new(base).unwrap(), BlockSize(half), Some(second));
            let view = BlockRef::new(first);

            assert_eq!(first.addr() as *const u8, view.addr());
            assert_eq!(first.capacity(), view.capacity());
            assert!(view.is_free());
            assert_eq!(Some(second.addr() as *const u8), view.next().map(BlockRef::addr));
            assert_eq!(view.after(), view.next().unwrap().addr());
            assert!(view.next().unwrap().next().is_none());
        }
    }

    #[test]
    fn setters_update_the_header_in_place() {
        let mut memory = scratch(32);
        let base = memory.as_mut_ptr().cast::<u8>();
        let half = 16 * mem::size_of::<usize>();

        unsafe {
            let second = Block::init(NonNull::new(base.add(half)).unwrap(), BlockSize(half), None);
            let first = Block::init(NonNull::new(base).unwrap(), BlockSize(half), Some(second));

            assert_eq!(Some(second), first.next());
            assert_eq!(second.addr(), first.after());

            first.set_free(false);
            first.set_capacity(BlockCapacity(BLOCK_MIN_CAPACITY));
            first.set_next(None);

            let adopted = Block::from_raw(NonNull::new(base).unwrap());
            assert!(!adopted.is_free());
            assert_eq!(BlockCapacity(BLOCK_MIN_CAPACITY), adopted.capacity());
            assert!(adopted.next().is_none());
        }
    }
}

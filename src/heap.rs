use std::{cmp, mem, ptr::NonNull};

use snafu::OptionExt;

use crate::{
    block::{BLOCK_MIN_CAPACITY, Block, BlockCapacity, BlockRef, block_after},
    config::HeapConfig,
    dump::HeapDump,
    error::{CorruptedHeapSnafu, HeapError, MappingFailedSnafu, OutOfMemorySnafu},
    list::{self, Blocks, SearchResult},
    region::acquire_region,
    utils::align,
};

/// Requests above this are refused before any size arithmetic can overflow.
const MAX_REQUEST: usize = isize::MAX as usize / 2;

/// A heap made of page mappings, handed out as variable size blocks.
///
/// The heap owns one block list rooted at its base. Allocation is first fit
/// over that list, splitting what it finds down to the requested size. When
/// nothing fits, a new region is mapped right after the last block if the OS
/// lets us, otherwise wherever it wants, and linked at the end of the list.
///
/// The heap never returns memory to the OS and is not thread safe: the raw
/// pointers inside make it neither `Send` nor `Sync`.
pub struct Heap {
    start: Option<Block>,
    config: HeapConfig,
}

impl Heap {
    /// Creates a heap able to serve at least `initial` bytes, with the default
    /// [`HeapConfig`].
    pub fn init(initial: usize) -> Result<Self, HeapError> {
        Self::with_config(initial, HeapConfig::default())
    }

    /// Maps the first region at `config.base` (or wherever the OS puts it) and
    /// makes it the heap base.
    pub fn with_config(initial: usize, config: HeapConfig) -> Result<Self, HeapError> {
        let capacity = request_capacity(initial).context(MappingFailedSnafu { size: initial })?;
        let region = acquire_region(config.base as *mut u8, capacity, config.min_region_size)
            .context(MappingFailedSnafu { size: initial })?;

        log::debug!("heap initialized at {:p}, {} bytes", region.addr, region.size);

        Ok(Self {
            start: Some(region.block()),
            config,
        })
    }

    /// Adopts the block list rooted at `base`. A null `base` yields a heap whose
    /// every allocation reports [`HeapError::CorruptedHeap`].
    ///
    /// **SAFETY**: a non null `base` must be the base of a heap created by
    /// [`Heap::with_config`] that is no longer used through any other handle.
    pub unsafe fn from_base(base: *mut u8, config: HeapConfig) -> Self {
        Self {
            start: NonNull::new(base).map(|base| unsafe { Block::from_raw(base) }),
            config,
        }
    }

    /// Address of the first block header, null if the heap has none.
    pub fn base(&self) -> *mut u8 {
        self.start.map_or(std::ptr::null_mut(), Block::addr)
    }

    pub fn config(&self) -> &HeapConfig {
        &self.config
    }

    /// Returns a pointer to at least `size` usable bytes.
    ///
    /// Requests are clamped to [`BLOCK_MIN_CAPACITY`] and rounded up to the
    /// machine word. On failure the block list is left consistent.
    pub fn allocate(&mut self, size: usize) -> Result<NonNull<u8>, HeapError> {
        let query = request_capacity(size).context(OutOfMemorySnafu { size })?;

        let block = match try_allocate_existing(self.start, query) {
            SearchResult::Found(block) => block,
            SearchResult::Corrupted => return CorruptedHeapSnafu.fail(),
            SearchResult::ReachedEnd(last) => {
                let Some(grown) = self.grow(last, query) else {
                    log::warn!("allocation of {size} bytes failed, could not grow the heap");
                    return OutOfMemorySnafu { size }.fail();
                };

                match try_allocate_existing(Some(grown), query) {
                    SearchResult::Found(block) => block,
                    SearchResult::Corrupted => return CorruptedHeapSnafu.fail(),
                    SearchResult::ReachedEnd(_) => return OutOfMemorySnafu { size }.fail(),
                }
            }
        };

        log::trace!("allocated {size} bytes at {:p}, capacity {}", block.contents(), block.capacity().0);

        Ok(block.contents())
    }

    /// Gives the block behind `ptr` back to the heap and merges it with every
    /// free block that directly follows it. A null `ptr` is ignored.
    ///
    /// Blocks are only merged forward. A free block right before this one
    /// absorbs it the next time an allocation walks past it.
    ///
    /// **SAFETY**: a non null `ptr` must come from [`Heap::allocate`] on this
    /// heap and must not have been deallocated already.
    pub unsafe fn deallocate(&mut self, ptr: *mut u8) {
        let Some(contents) = NonNull::new(ptr) else {
            return;
        };

        let block = unsafe { Block::from_contents(contents) };
        block.set_free(true);
        let merged = list::merge_forward(block);

        log::trace!("freed {ptr:p}, merged {merged} following blocks, capacity {}", block.capacity().0);
    }

    /// Maps a new region for at least `query` bytes right after `last` and
    /// links it at the end of the list. Returns the block the search should
    /// resume from: `last` itself if the region could be merged into it, the
    /// region's block otherwise.
    fn grow(&mut self, last: Block, query: BlockCapacity) -> Option<Block> {
        let region = acquire_region(block_after(last), query, self.config.min_region_size)?;
        let block = region.block();

        last.set_next(Some(block));

        if list::try_merge_with_next(last) {
            log::debug!("heap grew in place by {} bytes at {:p}", region.size, region.addr);
            return Some(last);
        }

        log::debug!(
            "heap grew by {} bytes at {:p}, extends: {}",
            region.size,
            region.addr,
            region.extends
        );

        Some(block)
    }

    /// Read-only view of the block behind a pointer returned by [`Heap::allocate`].
    ///
    /// **SAFETY**: `ptr` must come from [`Heap::allocate`] on this heap and must
    /// not have been deallocated.
    pub unsafe fn block_of(&self, ptr: NonNull<u8>) -> BlockRef<'_> {
        unsafe { BlockRef::new(Block::from_contents(ptr)) }
    }

    /// Read-only walk over every block, in list order.
    pub fn blocks(&self) -> Blocks<'_> {
        // SAFETY: `&self` keeps the list from being modified while iterating.
        unsafe { Blocks::new(self.start) }
    }

    /// Human readable listing of the blocks, see [`HeapDump`].
    pub fn dump(&self) -> HeapDump<'_> {
        HeapDump::new(self)
    }
}

/// Capacity actually searched for a request of `size` bytes.
fn request_capacity(size: usize) -> Option<BlockCapacity> {
    if size > MAX_REQUEST {
        return None;
    }

    let bytes = cmp::max(size, BLOCK_MIN_CAPACITY);

    Some(BlockCapacity(align(bytes, mem::size_of::<usize>())))
}

/// Searches from `start` without growing the heap. A fitting block is split
/// down to `query` and marked as used.
fn try_allocate_existing(start: Option<Block>, query: BlockCapacity) -> SearchResult {
    let searched = list::find_good_or_last(start, query);

    if let SearchResult::Found(block) = searched {
        list::split_if_too_big(block, query);
        block.set_free(false);
    }

    searched
}

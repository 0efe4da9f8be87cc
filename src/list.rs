//! Block list engine.
//!
//! The heap is one singly linked list of block headers in address order,
//! rooted at the heap base. The list lives inside the memory it manages, so
//! every operation here rewrites headers in place:
//!
//! ```text
//!        region 1                               region 2 (not adjacent)
//! +------+------+------+------------+        +-----------------------+
//! | used | free | free | used       |  --->  | free                  |
//! +------+------+------+------------+        +-----------------------+
//!            \____/
//!     continuous free pair, mergeable
//! ```
//!
//! Only continuous pairs are ever merged. Two blocks that are neighbours in
//! the list but live in different mappings stay separate forever.

use std::ptr::NonNull;

use crate::block::{BLOCK_HEADER_SIZE, BLOCK_MIN_CAPACITY, Block, BlockCapacity, BlockRef, BlockSize};

/// Outcome of [`find_good_or_last`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SearchResult {
    /// A free block with enough capacity.
    Found(Block),
    /// Nothing fits. Carries the last block of the list, the anchor for growth.
    ReachedEnd(Block),
    /// The list entry point is missing or a visited header is broken.
    Corrupted,
}

/// Whether `snd` starts exactly where the data area of `fst` ends.
#[inline]
pub(crate) fn blocks_continuous(fst: Block, snd: Block) -> bool {
    snd.addr() == fst.after()
}

#[inline]
pub(crate) fn mergeable(fst: Block, snd: Block) -> bool {
    fst.is_free() && snd.is_free() && blocks_continuous(fst, snd)
}

/// Absorbs the successor of `block` if both are free and continuous.
/// Returns whether a merge happened.
pub(crate) fn try_merge_with_next(block: Block) -> bool {
    let Some(next) = block.next() else {
        return false;
    };

    if !mergeable(block, next) {
        return false;
    }

    block.set_capacity(BlockCapacity(block.capacity().0 + next.size().0));
    block.set_next(next.next());

    log::trace!("merged {:p} into {:p}, capacity {}", next.addr(), block.addr(), block.capacity().0);

    true
}

/// Keeps merging `block` with its successor until that is no longer possible.
/// Returns how many blocks were absorbed.
pub(crate) fn merge_forward(block: Block) -> usize {
    let mut merged = 0;

    while try_merge_with_next(block) {
        merged += 1;
    }

    merged
}

/// Whether `block` can give away everything past `query` bytes and still leave
/// room for a header with a minimal payload.
#[inline]
pub(crate) fn block_splittable(block: Block, query: BlockCapacity) -> bool {
    let needed = query.0.checked_add(BLOCK_HEADER_SIZE + BLOCK_MIN_CAPACITY);

    block.is_free() && needed.is_some_and(|needed| needed <= block.capacity().0)
}

/// Shrinks a free `block` to exactly `query` bytes, turning the rest into a
/// new free block linked right after it. Returns whether the block was split.
///
/// `query` has to be word aligned so the new header is too.
pub(crate) fn split_if_too_big(block: Block, query: BlockCapacity) -> bool {
    if !block_splittable(block, query) {
        return false;
    }

    let remainder_size = BlockSize(block.capacity().0 - query.0);

    // SAFETY: the remainder lies inside the data area of `block`, which is
    // free and owned by the heap. Splittable guarantees it fits a header.
    let remainder = unsafe {
        let addr: NonNull<u8> = block.contents().add(query.0);
        Block::init(addr, remainder_size, block.next())
    };

    block.set_capacity(query);
    block.set_next(Some(remainder));

    log::trace!(
        "split {:p} at {} bytes, remainder {:p} with capacity {}",
        block.addr(),
        query.0,
        remainder.addr(),
        remainder.capacity().0
    );

    true
}

#[inline]
fn block_is_big_enough(block: Block, query: BlockCapacity) -> bool {
    block.capacity() >= query
}

/// First fit search starting at `start`.
///
/// Every visited block is first merged with as many free continuous
/// successors as possible, so the search also pays off fragmentation left
/// behind by earlier frees. If no block fits, the last block of the list is
/// returned as [`SearchResult::ReachedEnd`].
pub(crate) fn find_good_or_last(start: Option<Block>, query: BlockCapacity) -> SearchResult {
    let Some(mut block) = start else {
        log::error!("heap corrupted: the block list has no entry point");
        return SearchResult::Corrupted;
    };

    loop {
        if block.capacity().0 < BLOCK_MIN_CAPACITY {
            log::error!(
                "heap corrupted: block {:p} has capacity {}",
                block.addr(),
                block.capacity().0
            );
            return SearchResult::Corrupted;
        }

        merge_forward(block);

        if block.is_free() && block_is_big_enough(block, query) {
            return SearchResult::Found(block);
        }

        match block.next() {
            Some(next) => block = next,
            None => return SearchResult::ReachedEnd(block),
        }
    }
}

/// Read-only iterator over the block list.
pub struct Blocks<'a> {
    current: Option<BlockRef<'a>>,
}

impl<'a> Blocks<'a> {
    /// **SAFETY**: `start` must be the head of a well formed list that is not
    /// modified for as long as the iterator lives.
    pub(crate) unsafe fn new(start: Option<Block>) -> Self {
        Self {
            current: start.map(|block| unsafe { BlockRef::new(block) }),
        }
    }
}

impl<'a> Iterator for Blocks<'a> {
    type Item = BlockRef<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let block = self.current?;
        self.current = block.next();

        Some(block)
    }
}

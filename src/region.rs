use std::{cmp, ptr::NonNull};

use crate::{
    block::{Block, BlockCapacity, BlockSize, size_from_capacity},
    kernel::{self, Placement},
    utils::align,
};

/// One mapping obtained from the OS.
///
/// [`kernel::map_pages`] gives us memory regions aligned with the computer
/// page size, but we cannot assume that two regions are adjacent. When a new
/// region lands right after the previous one (`extends`), its block can be
/// merged with the last block of the heap. Otherwise it is only linked:
///
/// ```text
/// +-------------------------------+      +----------------+
/// | Block | Block | Block (last)  |  ->  | Block (region) |      extends == false
/// +-------------------------------+      +----------------+
///
/// +-------------------------------+----------------+
/// | Block | Block | Block (last)  | Block (region) |           extends == true
/// +-------------------------------+----------------+
/// ```
///
/// A region has no identity once its block is in the list, it is never
/// unmapped by the allocator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    /// Start address returned by the OS.
    pub addr: NonNull<u8>,
    /// Mapped size in bytes, a whole number of pages.
    pub size: usize,
    /// Whether the mapping landed exactly on the requested hint.
    pub extends: bool,
}

impl Region {
    /// The single free block spanning the whole region.
    #[inline]
    pub(crate) fn block(&self) -> Block {
        // SAFETY: `acquire_region` writes this header before handing the region out.
        unsafe { Block::from_raw(self.addr) }
    }
}

/// How many bytes we really map for a request of `query` bytes.
pub fn region_actual_size(query: usize, min_region_size: usize) -> usize {
    align(cmp::max(query, min_region_size), kernel::page_size())
}

/// Maps a region able to hold a block of `capacity` bytes, preferably at `hint`,
/// and initializes it as one free block with no successor.
///
/// The mapping is first attempted exactly at `hint` without replacing anything
/// that already lives there. If that fails the OS is allowed to choose the
/// address. Returns `None` only if both attempts fail.
pub fn acquire_region(hint: *mut u8, capacity: BlockCapacity, min_region_size: usize) -> Option<Region> {
    let size = region_actual_size(size_from_capacity(capacity).0, min_region_size);

    let (addr, extends) = unsafe {
        match kernel::map_pages(hint, size, Placement::Exact) {
            Some(addr) => (addr, true),
            None => {
                log::warn!("could not map {size} bytes at {hint:p}, letting the OS choose");
                (kernel::map_pages(hint, size, Placement::Anywhere)?, false)
            }
        }
    };

    // SAFETY: `addr` is a fresh page aligned mapping of `size` bytes.
    unsafe { Block::init(addr, BlockSize(size), None) };

    log::debug!("mapped region at {addr:p}, {size} bytes, extends: {extends}");

    Some(Region { addr, size, extends })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::{BLOCK_HEADER_SIZE, BLOCK_MIN_CAPACITY};

    const MIN_REGION_SIZE: usize = 2 * 4096;

    #[test]
    fn actual_size_is_page_rounded_and_clamped() {
        let page = kernel::page_size();
        let min = 2 * page;

        assert_eq!(min, region_actual_size(1, min));
        assert_eq!(min, region_actual_size(min, min));
        assert_eq!(3 * page, region_actual_size(min + 1, min));
        assert_eq!(page, region_actual_size(page - 10, page - 10));
    }

    #[test]
    fn region_is_initialized_as_one_free_block() {
        let region = acquire_region(std::ptr::null_mut(), BlockCapacity(100), MIN_REGION_SIZE).unwrap();
        let block = region.block();

        assert!(!region.extends);
        assert_eq!(region.addr.as_ptr(), block.addr());
        assert!(block.is_free());
        assert!(block.next().is_none());
        assert_eq!(region.size - BLOCK_HEADER_SIZE, block.capacity().0);
        assert!(region.size >= MIN_REGION_SIZE);

        unsafe { kernel::unmap_pages(region.addr.as_ptr(), region.size) };
    }

    #[test]
    fn large_requests_fit_in_the_region() {
        let capacity = BlockCapacity(5 * kernel::page_size() + 1);
        let region = acquire_region(std::ptr::null_mut(), capacity, MIN_REGION_SIZE).unwrap();

        assert!(region.block().capacity() >= capacity);
        assert_eq!(0, region.size % kernel::page_size());

        unsafe { kernel::unmap_pages(region.addr.as_ptr(), region.size) };
    }

    #[test]
    fn occupied_hint_falls_back_to_another_address() {
        let first = acquire_region(std::ptr::null_mut(), BlockCapacity(BLOCK_MIN_CAPACITY), MIN_REGION_SIZE).unwrap();
        let second = acquire_region(first.addr.as_ptr(), BlockCapacity(BLOCK_MIN_CAPACITY), MIN_REGION_SIZE).unwrap();

        assert!(!second.extends);
        assert_ne!(first.addr, second.addr);
        // The existing mapping was not clobbered.
        assert!(first.block().is_free());
        assert_eq!(first.size - BLOCK_HEADER_SIZE, first.block().capacity().0);

        unsafe {
            kernel::unmap_pages(second.addr.as_ptr(), second.size);
            kernel::unmap_pages(first.addr.as_ptr(), first.size);
        }
    }
}

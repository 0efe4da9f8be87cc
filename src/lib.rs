//! # blockheap
//!
//! A user space heap allocator built on page mappings obtained from the OS.
//!
//! The heap is a singly linked list of blocks, written in place inside the
//! memory it manages. Every block is a header followed by its data area:
//!
//! ```text
//!   heap base
//!   v
//!   +--------+--------+--------+-----------------+        +--------+------------+
//!   | header | data   | header | data            |  --->  | header | data       |
//!   +--------+--------+--------+-----------------+        +--------+------------+
//!   \________________ region 1 _________________/         \____ region 2 _____/
//! ```
//!
//! - **Allocation** is first fit. The search merges free neighbours as it
//!   walks, and a block that is too large is split, leaving the rest free.
//! - **Deallocation** marks the block free and merges it with the free blocks
//!   that directly follow it.
//! - **Growth**: when no block fits, a new region is mapped right after the
//!   last block if possible and merged into it, or linked at the end of the
//!   list if the OS placed it somewhere else.
//!
//! Memory is never given back to the OS, and a [`Heap`] must only be used
//! from one thread.
//!
//! ```rust,no_run
//! use blockheap::Heap;
//!
//! let mut heap = Heap::init(4096).unwrap();
//!
//! let ptr = heap.allocate(1024).unwrap();
//! unsafe {
//!     ptr.as_ptr().write_bytes(0, 1024);
//!     heap.deallocate(ptr.as_ptr());
//! }
//!
//! println!("{}", heap.dump());
//! ```

pub mod block;
pub mod config;
pub mod dump;
pub mod error;
pub mod heap;
pub mod kernel;
pub mod list;
pub mod region;
pub mod utils;

pub use block::{BLOCK_HEADER_SIZE, BLOCK_MIN_CAPACITY, BlockCapacity, BlockRef};
pub use config::HeapConfig;
pub use error::HeapError;
pub use heap::Heap;

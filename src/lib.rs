//! Segregated-fit heap allocator with boundary tags
//!
//! Free blocks are kept in 32 size-class lists, each sorted by size, and
//! adjacent free blocks are merged immediately on release. The arena grows
//! on demand from an [`ArenaSource`] and never shrinks.
//!
//! [`SegListAllocator`] is the single-threaded core. [`SegAlloc`] wraps it
//! behind a spin lock so it can serve as a `#[global_allocator]`.

#![no_std]
#![forbid(unsafe_op_in_unsafe_fn)]

#[cfg(test)]
extern crate std;

pub mod allocator;
pub mod arena;
pub mod block;
mod coalesce;
pub mod config;
pub mod error;
mod free_list;
#[cfg(unix)]
pub mod page_allocator;
pub mod seglist_allocator;
pub mod validate;

#[cfg(test)]
mod test_utils;

pub use allocator::SegAlloc;
pub use arena::{ArenaSource, BoundedArena};
pub use block::{ALIGNMENT, CLASS_COUNT, MIN_BLOCK_SIZE, round_up_to_alignment, size_class};
pub use config::{FitPolicy, HeapConfig};
pub use error::{HeapError, Result};
#[cfg(unix)]
pub use page_allocator::{PAGE_SIZE, PageArena};
pub use seglist_allocator::SegListAllocator;
#[cfg(any(test, debug_assertions, feature = "heap-check"))]
pub use validate::HeapViolation;
pub use validate::HeapStats;

//! Heap consistency checks and statistics
//!
//! The validator walks the free-list index and the arena independently and
//! cross-checks them. It never repairs anything and is only compiled into
//! debug builds, tests, or builds with the `heap-check` feature.

use log::debug;
#[cfg(any(test, debug_assertions, feature = "heap-check"))]
use thiserror::Error;

use crate::arena::ArenaSource;
use crate::block::MIN_BLOCK_SIZE;
#[cfg(any(test, debug_assertions, feature = "heap-check"))]
use crate::block::{ALIGNMENT, CLASS_COUNT, Tag, header_of, size_class};
#[cfg(any(test, debug_assertions, feature = "heap-check"))]
use crate::free_list::{FreeLists, NIL};
use crate::seglist_allocator::{FIRST_HEADER, PREFIX_BYTES, SegListAllocator};
#[cfg(any(test, debug_assertions, feature = "heap-check"))]
use crate::seglist_allocator::PROLOGUE;

/// First inconsistency found by [`SegListAllocator::check`]
///
/// Offsets are relative to the arena base.
#[cfg(any(test, debug_assertions, feature = "heap-check"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum HeapViolation {
    #[error("free-list node {node:#x} is outside the block area")]
    NodeOutOfRange { node: usize },
    #[error("free-list node {node:#x} has a broken back link")]
    BrokenLink { node: usize },
    #[error("linked block {header:#x} is marked allocated")]
    LinkedAllocated { header: usize },
    #[error("block {header:#x} is linked in class {found}, belongs in {expected}")]
    WrongClass {
        header: usize,
        found: usize,
        expected: usize,
    },
    #[error("class {class} is out of size order at {header:#x}")]
    Unordered { class: usize, header: usize },
    #[error("block {header:#x} has invalid size {size}")]
    BadSize { header: usize, size: usize },
    #[error("block {header:#x} header and footer sizes differ")]
    TagMismatch { header: usize },
    #[error("block {header:#x} and its predecessor are both free")]
    AdjacentFree { header: usize },
    #[error("block {header:#x} has a stale prev-allocated flag")]
    StalePrevFlag { header: usize },
    #[error("boundary marker at {offset:#x} is damaged")]
    BadMarker { offset: usize },
    #[error("{linked} blocks linked but {free} free blocks in the arena")]
    CountMismatch { linked: usize, free: usize },
}

/// Block accounting from one walk over the arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HeapStats {
    /// Bytes obtained from the arena source
    pub arena_bytes: usize,
    /// Sentinel table and boundary markers
    pub metadata_bytes: usize,
    pub free_bytes: usize,
    pub allocated_bytes: usize,
    pub free_blocks: usize,
    pub allocated_blocks: usize,
}

#[cfg(any(test, debug_assertions, feature = "heap-check"))]
impl<S: ArenaSource> SegListAllocator<S> {
    /// Cross-checks the free-list index against the arena
    ///
    /// # Errors
    ///
    /// The first [`HeapViolation`] encountered.
    pub fn check(&self) -> Result<(), HeapViolation> {
        let linked = self.check_free_lists()?;
        let free = self.check_blocks()?;
        if linked != free {
            return Err(HeapViolation::CountMismatch { linked, free });
        }
        Ok(())
    }

    /// Whether every structural invariant holds
    #[must_use]
    pub fn validate(&self) -> bool {
        match self.check() {
            Ok(()) => true,
            Err(violation) => {
                debug!("heap check failed: {violation}");
                false
            }
        }
    }

    /// Walks every class, returning the number of linked blocks
    fn check_free_lists(&self) -> Result<usize, HeapViolation> {
        let arena = &self.arena;
        let max_nodes = arena.len() / MIN_BLOCK_SIZE;
        let mut linked = 0;

        for class in 0..CLASS_COUNT {
            let mut expected_prev = self.lists.sentinel(class);
            let (mut node, _) = FreeLists::links(arena, expected_prev);
            let mut last_size = 0;

            while node != NIL {
                // past the sentinel table and the prologue
                if node < PREFIX_BYTES
                    || node >= self.epilogue()
                    || node % ALIGNMENT != 0
                {
                    return Err(HeapViolation::NodeOutOfRange { node });
                }
                let (next, prev) = FreeLists::links(arena, node);
                if prev != expected_prev {
                    return Err(HeapViolation::BrokenLink { node });
                }

                let header = header_of(node);
                let tag = arena.tag(header);
                if tag.is_allocated() {
                    return Err(HeapViolation::LinkedAllocated { header });
                }
                let expected = size_class(tag.size());
                if expected != class {
                    return Err(HeapViolation::WrongClass {
                        header,
                        found: class,
                        expected,
                    });
                }
                if tag.size() < last_size {
                    return Err(HeapViolation::Unordered { class, header });
                }

                linked += 1;
                if linked > max_nodes {
                    return Err(HeapViolation::BrokenLink { node });
                }
                last_size = tag.size();
                expected_prev = node;
                node = next;
            }
        }

        Ok(linked)
    }

    /// Walks the blocks from the prologue to the epilogue, returning the
    /// number of free blocks
    fn check_blocks(&self) -> Result<usize, HeapViolation> {
        let arena = &self.arena;
        let epilogue = self.epilogue();
        if arena.tag(PROLOGUE) != Tag::MARKER {
            return Err(HeapViolation::BadMarker { offset: PROLOGUE });
        }

        let mut header = FIRST_HEADER;
        let mut prev_allocated = true;
        let mut free = 0;

        while header < epilogue {
            let tag = arena.tag(header);
            let size = tag.size();
            let fits = header
                .checked_add(size)
                .is_some_and(|end| end <= epilogue);
            if size < MIN_BLOCK_SIZE || size % ALIGNMENT != 0 || !fits {
                return Err(HeapViolation::BadSize { header, size });
            }
            if arena.tag(arena.footer(header)).size() != size {
                return Err(HeapViolation::TagMismatch { header });
            }
            if tag.is_prev_allocated() != prev_allocated {
                return Err(HeapViolation::StalePrevFlag { header });
            }
            if !tag.is_allocated() && !prev_allocated {
                return Err(HeapViolation::AdjacentFree { header });
            }

            if !tag.is_allocated() {
                free += 1;
            }
            prev_allocated = tag.is_allocated();
            header += size;
        }

        let marker = arena.tag(epilogue);
        if header != epilogue
            || marker.size() != 0
            || !marker.is_allocated()
            || marker.is_prev_allocated() != prev_allocated
        {
            return Err(HeapViolation::BadMarker { offset: epilogue });
        }

        Ok(free)
    }
}

impl<S: ArenaSource> SegListAllocator<S> {
    /// Sums block sizes by state
    ///
    /// `free_bytes + allocated_bytes + metadata_bytes == arena_bytes` holds for
    /// a consistent heap.
    #[must_use]
    pub fn stats(&self) -> HeapStats {
        let mut stats = HeapStats {
            arena_bytes: self.arena.len(),
            metadata_bytes: PREFIX_BYTES,
            ..HeapStats::default()
        };

        for (_, size, allocated) in self.blocks() {
            if allocated {
                stats.allocated_blocks += 1;
                stats.allocated_bytes += size;
            } else {
                stats.free_blocks += 1;
                stats.free_bytes += size;
            }
        }

        stats
    }

    /// Logs every block of the arena at debug level
    pub fn dump(&self) {
        debug!(
            "heap at {:p}: {} bytes",
            self.arena.base(),
            self.arena.len()
        );
        for (header, size, allocated) in self.blocks() {
            let state = if allocated { "allocated" } else { "free" };
            debug!("  {header:#08x} {size:>8} {state}");
        }
    }

    /// `(header, size, allocated)` of every block, stopping early at a
    /// damaged size
    fn blocks(&self) -> impl Iterator<Item = (usize, usize, bool)> + '_ {
        let epilogue = self.epilogue();
        let mut header = FIRST_HEADER;
        core::iter::from_fn(move || {
            if header >= epilogue {
                return None;
            }
            let tag = self.arena.tag(header);
            if tag.size() < MIN_BLOCK_SIZE {
                return None;
            }
            let block = (header, tag.size(), tag.is_allocated());
            header += tag.size();
            Some(block)
        })
    }
}

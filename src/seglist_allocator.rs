use core::ptr::{self, NonNull};

use log::{debug, trace, warn};

use crate::arena::{Arena, ArenaSource};
use crate::block::{
    ALIGNMENT, MIN_BLOCK_SIZE, OVERHEAD, Tag, WORD, block_size_for, header_of, payload_of,
    round_up_to_alignment,
};
use crate::coalesce::{coalesce, coalesce_backward};
use crate::config::HeapConfig;
use crate::error::{HeapError, Result};
use crate::free_list::{FreeLists, TABLE_BYTES};

/// Offset of the zero-size marker closing the front of the arena
pub(crate) const PROLOGUE: usize = round_up_to_alignment(TABLE_BYTES + 2 * WORD) - 2 * WORD;

/// Header offset of the first real block
pub(crate) const FIRST_HEADER: usize = PROLOGUE + WORD;

/// Bytes laid out by initialization, also the first payload offset
pub(crate) const PREFIX_BYTES: usize = FIRST_HEADER + WORD;

const _: () = assert!(PREFIX_BYTES % ALIGNMENT == 0);

/// Segregated-fit allocator over one growable arena
///
/// Layout: sentinel table, prologue, blocks, epilogue.
pub struct SegListAllocator<S: ArenaSource> {
    pub(crate) source: S,
    pub(crate) arena: Arena,
    pub(crate) lists: FreeLists,
    pub(crate) config: HeapConfig,
}

impl<S: ArenaSource> SegListAllocator<S> {
    /// Lays out the sentinel table and boundary markers with the default config
    ///
    /// # Errors
    ///
    /// See [`with_config`](Self::with_config).
    pub fn new(source: S) -> Result<Self> {
        Self::with_config(source, HeapConfig::new())
    }

    /// Lays out the sentinel table and boundary markers
    ///
    /// # Errors
    ///
    /// - `HeapError::RegionTooSmall` if the source cannot provide the initial layout
    /// - `HeapError::Misaligned` if the source's region is not 16-byte aligned
    pub fn with_config(mut source: S, config: HeapConfig) -> Result<Self> {
        if config.max_arena_bytes.is_some_and(|max| max < PREFIX_BYTES) {
            return Err(HeapError::RegionTooSmall);
        }
        let base = source.grow(PREFIX_BYTES).map_err(|err| match err {
            HeapError::OutOfMemory => HeapError::RegionTooSmall,
            other => other,
        })?;
        if base.align_offset(ALIGNMENT) != 0 {
            return Err(HeapError::Misaligned);
        }

        let arena = Arena::new(base, PREFIX_BYTES);
        let lists = FreeLists::init(&arena);
        arena.set_tag(PROLOGUE, Tag::MARKER);
        arena.set_tag(FIRST_HEADER, Tag::MARKER);
        debug!("heap initialized at {base:p}, {PREFIX_BYTES} bytes of metadata");

        Ok(Self {
            source,
            arena,
            lists,
            config,
        })
    }

    #[must_use]
    pub const fn config(&self) -> &HeapConfig {
        &self.config
    }

    #[must_use]
    pub const fn source(&self) -> &S {
        &self.source
    }

    /// Bytes obtained from the arena source so far
    #[must_use]
    pub const fn arena_bytes(&self) -> usize {
        self.arena.len()
    }

    /// Allocates at least `size` bytes aligned to 16
    ///
    /// A zero-sized request allocates nothing and yields `Ok(None)`.
    ///
    /// # Errors
    ///
    /// - `HeapError::OutOfMemory` if the arena cannot grow enough
    /// - `HeapError::SizeOverflow` if `size` is too large to describe as a block
    pub fn allocate(&mut self, size: usize) -> Result<Option<NonNull<u8>>> {
        if size == 0 {
            trace!("allocate(0) -> none");
            return Ok(None);
        }
        let block_size = block_size_for(size).ok_or(HeapError::SizeOverflow)?;

        let found = self
            .lists
            .find_first_fit(&self.arena, block_size, self.config.fit_policy);
        let header = match found {
            Some(header) => header,
            None => match self.grow(block_size) {
                Ok(header) => header,
                Err(err) => {
                    warn!("allocate({size}) failed: {err}");
                    return Err(err);
                }
            },
        };

        self.place(header, block_size);
        let ptr = self.arena.ptr_at(payload_of(header));
        trace!("allocate({size}) -> {ptr:p}");
        self.after_op();

        Ok(Some(ptr))
    }

    /// Allocates `count * size` zeroed bytes
    ///
    /// # Errors
    ///
    /// - `HeapError::SizeOverflow` if `count * size` overflows
    /// - anything [`allocate`](Self::allocate) returns
    pub fn allocate_zeroed(&mut self, count: usize, size: usize) -> Result<Option<NonNull<u8>>> {
        let total = count.checked_mul(size).ok_or(HeapError::SizeOverflow)?;
        let ptr = self.allocate(total)?;
        if let Some(ptr) = ptr {
            // SAFETY: the block just allocated holds at least `total` bytes.
            unsafe { ptr.as_ptr().write_bytes(0, total) };
        }
        Ok(ptr)
    }

    /// Returns a block to the heap
    ///
    /// `None`, pointers outside the arena and blocks that are already free are
    /// ignored.
    ///
    /// # Safety
    ///
    /// - `ptr`, if some, must be a pointer returned by this heap, or point
    ///   outside its arena
    /// - the payload must not be used after this call
    pub unsafe fn free(&mut self, ptr: Option<NonNull<u8>>) {
        let Some(ptr) = ptr else {
            return;
        };
        let Some(header) = self.live_header(ptr) else {
            warn!("free({ptr:p}) ignored: not a live allocation");
            return;
        };

        let tag = self.arena.tag(header);
        self.arena.write_block(header, tag.with_allocated(false));
        self.arena.set_prev_allocated(header + tag.size(), false);
        self.release(header);
        trace!("free({ptr:p})");
        self.after_op();
    }

    /// Moves an allocation to a block of `new_size` bytes
    ///
    /// A `None` pointer behaves like [`allocate`](Self::allocate); a zero size
    /// frees the block and yields `Ok(None)`. Otherwise the contents are copied
    /// into a fresh block, up to the smaller of the two sizes, and the old block
    /// is freed.
    ///
    /// # Safety
    ///
    /// - `ptr`, if some, must be a live pointer returned by this heap
    /// - on success, the old payload must not be used anymore
    ///
    /// # Errors
    ///
    /// - `HeapError::InvalidPointer` if `ptr` is not a live allocation
    /// - anything [`allocate`](Self::allocate) returns; the old block stays
    ///   allocated and untouched
    pub unsafe fn resize(
        &mut self,
        ptr: Option<NonNull<u8>>,
        new_size: usize,
    ) -> Result<Option<NonNull<u8>>> {
        let Some(old) = ptr else {
            return self.allocate(new_size);
        };
        if new_size == 0 {
            // SAFETY: forwarded from the caller.
            unsafe { self.free(Some(old)) };
            return Ok(None);
        }
        let Some(old_usable) = self.usable_size(old) else {
            warn!("resize({old:p}, {new_size}) rejected: not a live allocation");
            return Err(HeapError::InvalidPointer);
        };

        let Some(new) = self.allocate(new_size)? else {
            return Ok(None);
        };
        // SAFETY: both payloads are live and distinct blocks, each holding at
        // least the copied length.
        unsafe {
            ptr::copy_nonoverlapping(old.as_ptr(), new.as_ptr(), old_usable.min(new_size));
            self.free(Some(old));
        }
        trace!("resize({old:p}, {new_size}) -> {new:p}");

        Ok(Some(new))
    }

    /// Payload bytes available behind a live allocation
    #[must_use]
    pub fn usable_size(&self, ptr: NonNull<u8>) -> Option<usize> {
        self.live_header(ptr)
            .map(|header| self.arena.tag(header).size() - OVERHEAD)
    }

    /// Offset of the epilogue marker
    pub(crate) const fn epilogue(&self) -> usize {
        self.arena.len() - WORD
    }

    /// Header of the allocated block whose payload starts at `ptr`
    fn live_header(&self, ptr: NonNull<u8>) -> Option<usize> {
        let payload = self.arena.offset_of(ptr)?;
        if payload < PREFIX_BYTES || payload % ALIGNMENT != 0 {
            return None;
        }
        let header = header_of(payload);
        let tag = self.arena.tag(header);
        let size = tag.size();
        let in_bounds = header
            .checked_add(size)
            .is_some_and(|end| end <= self.epilogue());

        (tag.is_allocated() && size >= MIN_BLOCK_SIZE && size % ALIGNMENT == 0 && in_bounds)
            .then_some(header)
    }

    /// Extends the arena by at least `block_size` bytes
    ///
    /// A free tail already large enough is taken as is. Otherwise returns the
    /// new block merged with the free tail, if any. The block is not linked in
    /// the index.
    fn grow(&mut self, block_size: usize) -> Result<usize> {
        let epilogue = self.epilogue();
        if !self.arena.tag(epilogue).is_prev_allocated() {
            let tail = self.arena.prev_header(epilogue);
            if self.arena.tag(tail).size() >= block_size {
                self.lists.remove(&self.arena, tail);
                trace!("reusing free tail at {tail:#x} instead of growing");
                return Ok(tail);
            }
        }

        let bytes = block_size.max(self.config.grow_granularity);
        let total = self
            .arena
            .len()
            .checked_add(bytes)
            .ok_or(HeapError::OutOfMemory)?;
        if self.config.max_arena_bytes.is_some_and(|max| total > max) {
            return Err(HeapError::OutOfMemory);
        }

        let region = self.source.grow(bytes)?;
        if region != self.arena.ptr_at(self.arena.len()) {
            return Err(HeapError::NotContiguous);
        }

        let header = self.epilogue();
        let prev_allocated = self.arena.tag(header).is_prev_allocated();
        self.arena.extend(bytes);
        self.arena
            .write_block(header, Tag::new(bytes, false, prev_allocated));
        self.arena
            .set_tag(self.epilogue(), Tag::MARKER.with_prev_allocated(false));
        debug!(
            "arena grown by {bytes} bytes at {region:p}, now {} bytes",
            self.arena.len()
        );

        Ok(coalesce_backward(&self.arena, &self.lists, header))
    }

    /// Marks the unlinked free block at `header` allocated, splitting off the
    /// tail when it can hold a block of its own
    fn place(&mut self, header: usize, block_size: usize) {
        let tag = self.arena.tag(header);
        let size = tag.size();
        debug_assert!(!tag.is_allocated());
        debug_assert!(size >= block_size);

        if size >= block_size + MIN_BLOCK_SIZE {
            self.arena
                .write_block(header, Tag::new(block_size, true, tag.is_prev_allocated()));
            let rest = header + block_size;
            self.arena
                .write_block(rest, Tag::new(size - block_size, false, true));
            self.lists.insert(&self.arena, rest);
            trace!("split {size} byte block into {block_size} + {}", size - block_size);
        } else {
            self.arena.write_block(header, tag.with_allocated(true));
            self.arena.set_prev_allocated(header + size, true);
        }
    }

    /// Coalesces the unlinked free block at `header` and links the result
    fn release(&mut self, header: usize) {
        let merged = coalesce(&self.arena, &self.lists, header);
        self.lists.insert(&self.arena, merged);
    }

    #[inline]
    fn after_op(&self) {
        #[cfg(any(test, debug_assertions, feature = "heap-check"))]
        if self.config.check_every_op && !self.validate() {
            log::error!("heap invariants violated");
            if cfg!(debug_assertions) {
                panic!("heap invariants violated");
            }
        }
    }
}

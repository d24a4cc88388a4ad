use core::marker::PhantomData;
use core::ptr::NonNull;

use crate::block::{ALIGNMENT, Tag, WORD, footer_of, next_header_of, prev_footer_of, prev_header_of};
use crate::error::{HeapError, Result};

/// Provider of the single contiguous region a heap manages
///
/// # Safety
///
/// Every successful [`grow`](ArenaSource::grow) must return a region that starts
/// exactly where the previously returned region ended, and bytes handed out
/// earlier must stay valid and in place for as long as the source lives.
/// The first region must be aligned to 16 bytes.
pub unsafe trait ArenaSource {
    /// Extends the arena by `bytes` and returns the start of the new bytes
    ///
    /// # Errors
    ///
    /// - `HeapError::OutOfMemory` if the arena cannot grow by `bytes`
    fn grow(&mut self, bytes: usize) -> Result<NonNull<u8>>;
}

// SAFETY: forwarding keeps the contract of the underlying source.
unsafe impl<S: ArenaSource + ?Sized> ArenaSource for &mut S {
    fn grow(&mut self, bytes: usize) -> Result<NonNull<u8>> {
        (**self).grow(bytes)
    }
}

/// Arena source carved out of a caller-provided buffer
///
/// Growth past the end of the buffer, or past an optional lower limit, fails
/// with `OutOfMemory`. The start of the buffer is rounded up to 16 bytes.
#[derive(Debug)]
pub struct BoundedArena<'a> {
    start: NonNull<u8>,
    capacity: usize,
    used: usize,
    _buf: PhantomData<&'a mut [u8]>,
}

impl<'a> BoundedArena<'a> {
    #[must_use]
    pub fn new(buf: &'a mut [u8]) -> Self {
        let len = buf.len();
        let ptr = NonNull::from(buf).cast::<u8>();
        let adjustment = ptr.align_offset(ALIGNMENT);
        let capacity = len.saturating_sub(adjustment);
        // SAFETY: with a non-zero capacity the adjustment lies inside the buffer,
        // otherwise no bytes are ever handed out from the dangling start.
        let start = if capacity == 0 {
            ptr
        } else {
            unsafe { ptr.add(adjustment) }
        };

        Self {
            start,
            capacity,
            used: 0,
            _buf: PhantomData,
        }
    }

    /// Same as [`new`](Self::new), refusing to hand out more than `limit` bytes
    #[must_use]
    pub fn with_limit(buf: &'a mut [u8], limit: usize) -> Self {
        let mut arena = Self::new(buf);
        arena.capacity = arena.capacity.min(limit);
        arena
    }

    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    #[must_use]
    pub const fn used(&self) -> usize {
        self.used
    }
}

// SAFETY: regions are handed out back to back from one buffer that outlives `'a`.
unsafe impl ArenaSource for BoundedArena<'_> {
    fn grow(&mut self, bytes: usize) -> Result<NonNull<u8>> {
        if bytes > self.capacity - self.used {
            return Err(HeapError::OutOfMemory);
        }
        // SAFETY: `used + bytes <= capacity`, so the result stays in the buffer.
        let region = unsafe { self.start.add(self.used) };
        self.used += bytes;
        Ok(region)
    }
}

// SAFETY: the source owns its borrow of the buffer exclusively.
unsafe impl Send for BoundedArena<'_> {}

/// Raw word-level view of the managed region
///
/// Offsets are measured from the arena base. All accessors trust the offset to
/// lie inside the grown region; this is checked in debug builds only.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Arena {
    base: NonNull<u8>,
    len: usize,
}

impl Arena {
    pub(crate) const fn new(base: NonNull<u8>, len: usize) -> Self {
        Self { base, len }
    }

    pub(crate) const fn base(&self) -> NonNull<u8> {
        self.base
    }

    pub(crate) const fn len(&self) -> usize {
        self.len
    }

    /// Accounts for `bytes` more bytes following the current end
    pub(crate) const fn extend(&mut self, bytes: usize) {
        self.len += bytes;
    }

    /// Address of the byte at `offset`
    pub(crate) fn ptr_at(&self, offset: usize) -> NonNull<u8> {
        debug_assert!(offset <= self.len);
        // SAFETY: the offset is inside the region (or one past its end).
        unsafe { self.base.add(offset) }
    }

    /// Offset of `ptr` from the base, if it points into the grown region
    pub(crate) fn offset_of(&self, ptr: NonNull<u8>) -> Option<usize> {
        let offset = ptr.addr().get().checked_sub(self.base.addr().get())?;
        (offset < self.len).then_some(offset)
    }

    #[inline]
    pub(crate) fn word(&self, offset: usize) -> usize {
        debug_assert!(offset % WORD == 0);
        debug_assert!(offset + WORD <= self.len);
        // SAFETY: word-aligned offset inside the grown region.
        unsafe { self.base.add(offset).cast::<usize>().read() }
    }

    #[inline]
    pub(crate) fn set_word(&self, offset: usize, value: usize) {
        debug_assert!(offset % WORD == 0);
        debug_assert!(offset + WORD <= self.len);
        // SAFETY: word-aligned offset inside the grown region.
        unsafe { self.base.add(offset).cast::<usize>().write(value) }
    }

    #[inline]
    pub(crate) fn tag(&self, offset: usize) -> Tag {
        Tag::from_raw(self.word(offset))
    }

    #[inline]
    pub(crate) fn set_tag(&self, offset: usize, tag: Tag) {
        self.set_word(offset, tag.raw());
    }

    /// Writes matching header and footer for the block at `header`
    pub(crate) fn write_block(&self, header: usize, tag: Tag) {
        self.set_tag(header, tag);
        self.set_tag(footer_of(header, tag.size()), tag);
    }

    #[cfg(any(test, debug_assertions, feature = "heap-check"))]
    pub(crate) fn footer(&self, header: usize) -> usize {
        footer_of(header, self.tag(header).size())
    }

    pub(crate) fn next_header(&self, header: usize) -> usize {
        next_header_of(header, self.tag(header).size())
    }

    /// Header of the previous block, found through its footer
    pub(crate) fn prev_header(&self, header: usize) -> usize {
        prev_header_of(header, self.tag(prev_footer_of(header)).size())
    }

    /// Updates the prev-allocated flag of the block at `header`
    pub(crate) fn set_prev_allocated(&self, header: usize, prev_allocated: bool) {
        let tag = self.tag(header).with_prev_allocated(prev_allocated);
        self.set_tag(header, tag);
    }
}

// SAFETY: the view is only reachable through the heap that owns the region.
unsafe impl Send for Arena {}

#[cfg(test)]
mod test {
    extern crate alloc;

    use super::*;

    #[test]
    fn bounded_growth_is_contiguous() {
        let mut buffer = alloc::vec![0u8; 256];
        let mut source = BoundedArena::new(&mut buffer);
        assert!(source.capacity() >= 256 - ALIGNMENT);

        let first = source.grow(64).unwrap();
        assert_eq!(first.addr().get() % ALIGNMENT, 0);
        let second = source.grow(32).unwrap();
        assert_eq!(second.addr().get(), first.addr().get() + 64);
        assert_eq!(source.used(), 96);
    }

    #[test]
    fn bounded_growth_stops_at_limit() {
        let mut buffer = alloc::vec![0u8; 4096];
        let mut source = BoundedArena::with_limit(&mut buffer, 128);
        assert_eq!(source.capacity(), 128);

        assert!(source.grow(100).is_ok());
        assert_eq!(source.grow(29), Err(HeapError::OutOfMemory));
        assert!(source.grow(28).is_ok());
        assert_eq!(source.grow(1), Err(HeapError::OutOfMemory));
    }

    #[test]
    fn empty_buffer_never_grows() {
        let mut buffer: [u8; 0] = [];
        let mut source = BoundedArena::new(&mut buffer);
        assert_eq!(source.capacity(), 0);
        assert_eq!(source.grow(1), Err(HeapError::OutOfMemory));
        assert!(source.grow(0).is_ok());
    }

    #[test]
    fn words_and_tags() {
        let mut buffer = alloc::vec![0u8; 256];
        let mut source = BoundedArena::new(&mut buffer);
        let base = source.grow(128).unwrap();
        let arena = Arena::new(base, 128);

        arena.write_block(16, Tag::new(64, false, true));
        assert_eq!(arena.tag(16).size(), 64);
        assert_eq!(arena.tag(16 + 64 - WORD), Tag::new(64, false, true));
        assert_eq!(arena.footer(16), 16 + 64 - WORD);
        assert_eq!(arena.next_header(16), 80);

        arena.write_block(80, Tag::new(32, true, false));
        assert_eq!(arena.prev_header(80), 16);

        arena.set_prev_allocated(80, true);
        assert!(arena.tag(80).is_prev_allocated());
        assert!(arena.tag(80).is_allocated());

        assert_eq!(arena.offset_of(arena.ptr_at(24)), Some(24));
        assert_eq!(arena.offset_of(arena.ptr_at(128)), None);
    }
}

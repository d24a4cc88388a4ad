//! One size-ordered doubly linked list per class, each hanging off a sentinel
//! at the start of the arena. Links are arena offsets of payload nodes.

use crate::arena::Arena;
use crate::block::{CLASS_COUNT, WORD, header_of, payload_of, size_class};
use crate::config::FitPolicy;

/// End-of-list link
pub(crate) const NIL: usize = usize::MAX;

const NEXT: usize = 0;
const PREV: usize = WORD;

/// Bytes occupied by one sentinel node
pub(crate) const NODE_BYTES: usize = 2 * WORD;

/// Bytes occupied by the sentinel table
pub(crate) const TABLE_BYTES: usize = CLASS_COUNT * NODE_BYTES;

/// Handle on the sentinel table of one arena
#[derive(Debug, Clone, Copy)]
pub(crate) struct FreeLists {
    table: usize,
}

impl FreeLists {
    /// Lays out empty sentinels at the start of the arena
    pub(crate) fn init(arena: &Arena) -> Self {
        let lists = Self { table: 0 };
        for class in 0..CLASS_COUNT {
            let sentinel = lists.sentinel(class);
            arena.set_word(sentinel + NEXT, NIL);
            arena.set_word(sentinel + PREV, NIL);
        }
        lists
    }

    #[inline]
    pub(crate) const fn sentinel(&self, class: usize) -> usize {
        self.table + class * NODE_BYTES
    }

    /// First offset past the sentinel table
    #[inline]
    pub(crate) const fn table_end(&self) -> usize {
        self.table + TABLE_BYTES
    }

    /// Links the free block at `header` into its class, keeping sizes ascending
    pub(crate) fn insert(&self, arena: &Arena, header: usize) {
        let size = arena.tag(header).size();
        let node = payload_of(header);

        let mut cursor = self.sentinel(size_class(size));
        let mut next = arena.word(cursor + NEXT);
        while next != NIL && arena.tag(header_of(next)).size() < size {
            debug_assert!(next >= self.table_end());
            cursor = next;
            next = arena.word(cursor + NEXT);
        }

        arena.set_word(node + NEXT, next);
        arena.set_word(node + PREV, cursor);
        arena.set_word(cursor + NEXT, node);
        if next != NIL {
            arena.set_word(next + PREV, node);
        }
    }

    /// Unlinks the free block at `header` from whichever class holds it
    pub(crate) fn remove(&self, arena: &Arena, header: usize) {
        let node = payload_of(header);
        let next = arena.word(node + NEXT);
        let prev = arena.word(node + PREV);

        if next != NIL {
            arena.set_word(next + PREV, prev);
        }
        if prev != NIL {
            arena.set_word(prev + NEXT, next);
        }
        arena.set_word(node + NEXT, NIL);
        arena.set_word(node + PREV, NIL);
    }

    /// Unlinks and returns the first block of at least `min_size` bytes
    ///
    /// Only the class of `min_size` is searched under [`FitPolicy::SingleClass`];
    /// [`FitPolicy::Escalating`] moves on to the larger classes in order.
    pub(crate) fn find_first_fit(
        &self,
        arena: &Arena,
        min_size: usize,
        policy: FitPolicy,
    ) -> Option<usize> {
        let first = size_class(min_size);
        let last = match policy {
            FitPolicy::SingleClass => first,
            FitPolicy::Escalating => CLASS_COUNT - 1,
        };

        for class in first..=last {
            let found = self
                .blocks(arena, class)
                .find(|&header| arena.tag(header).size() >= min_size);
            if let Some(header) = found {
                self.remove(arena, header);
                return Some(header);
            }
        }

        None
    }

    /// Headers of the blocks linked in `class`, in list order
    pub(crate) fn blocks<'a>(&self, arena: &'a Arena, class: usize) -> ClassIter<'a> {
        ClassIter {
            arena,
            node: arena.word(self.sentinel(class) + NEXT),
        }
    }

    /// Raw links of the node at `node`, as `(next, prev)`
    #[cfg(any(test, debug_assertions, feature = "heap-check"))]
    pub(crate) fn links(arena: &Arena, node: usize) -> (usize, usize) {
        (arena.word(node + NEXT), arena.word(node + PREV))
    }
}

pub(crate) struct ClassIter<'a> {
    arena: &'a Arena,
    node: usize,
}

impl Iterator for ClassIter<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        if self.node == NIL {
            return None;
        }
        let header = header_of(self.node);
        self.node = self.arena.word(self.node + NEXT);
        Some(header)
    }
}

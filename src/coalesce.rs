//! Boundary-tag coalescing
//!
//! Both directions expect `header` to be a free block that is not linked in
//! the index, and return the header of the merged block, also unlinked.
//! Forward keeps the address, backward moves it to the previous block.

use crate::arena::Arena;
use crate::block::{Tag, footer_of, prev_footer_of};
use crate::free_list::FreeLists;

/// Absorbs the next block if it is free
pub(crate) fn coalesce_forward(arena: &Arena, lists: &FreeLists, header: usize) -> usize {
    let tag = arena.tag(header);
    let next = arena.next_header(header);
    let next_tag = arena.tag(next);
    if next_tag.is_allocated() {
        return header;
    }

    lists.remove(arena, next);
    let old_footer = footer_of(header, tag.size());
    arena.write_block(header, tag.with_size(tag.size() + next_tag.size()));
    arena.set_word(old_footer, 0);
    arena.set_word(next, 0);

    header
}

/// Merges into the previous block if it is free
pub(crate) fn coalesce_backward(arena: &Arena, lists: &FreeLists, header: usize) -> usize {
    let tag = arena.tag(header);
    if tag.is_prev_allocated() {
        return header;
    }

    let prev = arena.prev_header(header);
    let prev_tag = arena.tag(prev);
    debug_assert!(!prev_tag.is_allocated());

    lists.remove(arena, prev);
    arena.write_block(
        prev,
        Tag::new(prev_tag.size() + tag.size(), false, prev_tag.is_prev_allocated()),
    );
    arena.set_word(prev_footer_of(header), 0);
    arena.set_word(header, 0);

    prev
}

/// Forward then backward; returns the block covering the whole merged extent
pub(crate) fn coalesce(arena: &Arena, lists: &FreeLists, header: usize) -> usize {
    let header = coalesce_forward(arena, lists, header);
    coalesce_backward(arena, lists, header)
}

#[cfg(test)]
mod test {
    extern crate alloc;

    use super::*;
    use crate::arena::{ArenaSource, BoundedArena};
    use crate::block::WORD;
    use crate::free_list::TABLE_BYTES;

    const FIRST: usize = TABLE_BYTES + WORD;

    /// Blocks of the given sizes and states, closed by an epilogue
    fn layout(blocks: &[(usize, bool)]) -> (Arena, FreeLists) {
        let total = FIRST + blocks.iter().map(|(size, _)| size).sum::<usize>() + WORD;
        let buffer = alloc::vec![0u8; total + 64].leak();
        let mut source = BoundedArena::new(buffer);
        let arena = Arena::new(source.grow(total).unwrap(), total);
        let lists = FreeLists::init(&arena);

        let mut header = FIRST;
        let mut prev_allocated = true;
        for &(size, allocated) in blocks {
            arena.write_block(header, Tag::new(size, allocated, prev_allocated));
            prev_allocated = allocated;
            header += size;
        }
        arena.set_tag(header, Tag::MARKER.with_prev_allocated(prev_allocated));

        let mut header = FIRST;
        for &(size, allocated) in blocks {
            if !allocated {
                lists.insert(&arena, header);
            }
            header += size;
        }
        (arena, lists)
    }

    #[test]
    fn forward_absorbs_free_successor() {
        let (arena, lists) = layout(&[(32, true), (64, true), (48, false), (32, true)]);
        let header = FIRST + 32;
        arena.write_block(header, arena.tag(header).with_allocated(false));

        let merged = coalesce_forward(&arena, &lists, header);
        assert_eq!(merged, header);
        assert_eq!(arena.tag(merged).size(), 112);
        assert!(arena.tag(merged).is_prev_allocated());
        assert_eq!(arena.tag(arena.footer(merged)).size(), 112);
        assert_eq!(arena.word(FIRST + 32 + 64), 0);
        assert_eq!(lists.blocks(&arena, 0).count(), 0);
    }

    #[test]
    fn forward_stops_at_allocated_successor() {
        let (arena, lists) = layout(&[(64, false), (32, true)]);
        lists.remove(&arena, FIRST);

        assert_eq!(coalesce_forward(&arena, &lists, FIRST), FIRST);
        assert_eq!(arena.tag(FIRST).size(), 64);
    }

    #[test]
    fn forward_stops_at_epilogue() {
        let (arena, lists) = layout(&[(64, false)]);
        lists.remove(&arena, FIRST);

        assert_eq!(coalesce_forward(&arena, &lists, FIRST), FIRST);
        assert_eq!(arena.tag(FIRST).size(), 64);
    }

    #[test]
    fn backward_moves_identity() {
        let (arena, lists) = layout(&[(32, true), (96, false), (32, true), (32, true)]);
        let header = FIRST + 128;
        arena.write_block(header, Tag::new(32, false, false));

        let merged = coalesce_backward(&arena, &lists, header);
        assert_eq!(merged, FIRST + 32);
        assert_eq!(arena.tag(merged), Tag::new(128, false, true));
        assert_eq!(arena.tag(arena.footer(merged)).size(), 128);
        assert_eq!(arena.word(header), 0);
        assert_eq!(lists.blocks(&arena, 1).count(), 0);
    }

    #[test]
    fn backward_stops_at_first_block() {
        let (arena, lists) = layout(&[(32, false), (32, true)]);
        lists.remove(&arena, FIRST);

        assert_eq!(coalesce_backward(&arena, &lists, FIRST), FIRST);
    }

    #[test]
    fn both_sides_merge_into_one() {
        let (arena, lists) = layout(&[(32, false), (32, true), (64, false), (32, true)]);
        let header = FIRST + 32;
        arena.write_block(header, Tag::new(32, false, false));

        let merged = coalesce(&arena, &lists, header);
        assert_eq!(merged, FIRST);
        assert_eq!(arena.tag(merged).size(), 128);
        assert_eq!(arena.tag(arena.footer(merged)).size(), 128);
        for class in 0..crate::block::CLASS_COUNT {
            assert_eq!(lists.blocks(&arena, class).count(), 0);
        }
    }
}

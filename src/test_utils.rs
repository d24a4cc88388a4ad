extern crate alloc;

use crate::arena::BoundedArena;
use crate::block::ALIGNMENT;
use crate::config::HeapConfig;
use crate::seglist_allocator::SegListAllocator;

pub(crate) type TestHeap = SegListAllocator<BoundedArena<'static>>;

/// Heap over a leaked buffer that refuses to grow past `capacity` bytes
pub(crate) fn bounded_heap(capacity: usize) -> TestHeap {
    bounded_heap_with(capacity, HeapConfig::new())
}

pub(crate) fn bounded_heap_with(capacity: usize, config: HeapConfig) -> TestHeap {
    let buffer = alloc::vec![0u8; capacity + ALIGNMENT].leak();
    let source = BoundedArena::with_limit(buffer, capacity);
    SegListAllocator::with_config(source, config).unwrap()
}

/// Small deterministic generator for randomized workloads
pub(crate) struct Lcg(u32);

impl Lcg {
    pub(crate) const fn new(seed: u32) -> Self {
        Self(seed)
    }

    pub(crate) fn next_u32(&mut self) -> u32 {
        self.0 = self.0.wrapping_mul(1_103_515_245).wrapping_add(12345);
        self.0 >> 8
    }
}

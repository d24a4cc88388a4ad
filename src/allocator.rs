use core::alloc::{GlobalAlloc, Layout};
use core::ptr::{self, NonNull};

use spin::Mutex;

use crate::arena::ArenaSource;
use crate::block::ALIGNMENT;
use crate::config::HeapConfig;
use crate::seglist_allocator::SegListAllocator;
use crate::validate::HeapStats;

enum Slot<S: ArenaSource> {
    Pending(S, HeapConfig),
    Ready(SegListAllocator<S>),
    Failed,
}

/// [`GlobalAlloc`] front for a [`SegListAllocator`]
///
/// The heap is initialized on first use and every call runs under one spin
/// lock. Layouts aligned beyond 16 bytes are refused with a null pointer.
///
/// The heap logs through the `log` facade; a logger installed in a process
/// that uses this as its global allocator must not allocate while logging,
/// or it will deadlock on the lock.
///
/// ```ignore
/// use segfit::{PageArena, SegAlloc};
///
/// #[global_allocator]
/// static ALLOCATOR: SegAlloc<PageArena> = SegAlloc::new(PageArena::new(1 << 30));
/// ```
pub struct SegAlloc<S: ArenaSource> {
    inner: Mutex<Slot<S>>,
}

impl<S: ArenaSource> SegAlloc<S> {
    #[must_use]
    pub const fn new(source: S) -> Self {
        Self::with_config(source, HeapConfig::new())
    }

    #[must_use]
    pub const fn with_config(source: S, config: HeapConfig) -> Self {
        Self {
            inner: Mutex::new(Slot::Pending(source, config)),
        }
    }

    /// Runs `f` on the heap, initializing it first if needed
    ///
    /// Returns `None` if the heap could not be initialized.
    pub fn with_heap<R>(&self, f: impl FnOnce(&mut SegListAllocator<S>) -> R) -> Option<R> {
        let mut slot = self.inner.lock();
        if matches!(*slot, Slot::Pending(..)) {
            let Slot::Pending(source, config) = core::mem::replace(&mut *slot, Slot::Failed) else {
                return None;
            };
            match SegListAllocator::with_config(source, config) {
                Ok(heap) => *slot = Slot::Ready(heap),
                Err(err) => log::warn!("heap initialization failed: {err}"),
            }
        }

        match &mut *slot {
            Slot::Ready(heap) => Some(f(heap)),
            Slot::Pending(..) | Slot::Failed => None,
        }
    }

    #[must_use]
    pub fn stats(&self) -> Option<HeapStats> {
        self.with_heap(|heap| heap.stats())
    }

    #[cfg(any(test, debug_assertions, feature = "heap-check"))]
    #[must_use]
    pub fn validate(&self) -> bool {
        self.with_heap(|heap| heap.validate()).unwrap_or(false)
    }
}

fn into_raw(result: Option<crate::Result<Option<NonNull<u8>>>>) -> *mut u8 {
    match result {
        Some(Ok(Some(ptr))) => ptr.as_ptr(),
        _ => ptr::null_mut(),
    }
}

unsafe impl<S: ArenaSource> GlobalAlloc for SegAlloc<S> {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        if layout.align() > ALIGNMENT {
            return ptr::null_mut();
        }
        into_raw(self.with_heap(|heap| heap.allocate(layout.size())))
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        if layout.align() > ALIGNMENT {
            return ptr::null_mut();
        }
        into_raw(self.with_heap(|heap| heap.allocate_zeroed(1, layout.size())))
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        // SAFETY: the caller hands back a pointer obtained from this allocator.
        self.with_heap(|heap| unsafe { heap.free(NonNull::new(ptr)) });
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        if layout.align() > ALIGNMENT {
            return ptr::null_mut();
        }
        // SAFETY: the caller hands back a live pointer obtained from this allocator.
        into_raw(self.with_heap(|heap| unsafe { heap.resize(NonNull::new(ptr), new_size) }))
    }
}

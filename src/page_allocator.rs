use core::ffi::c_void;
use core::ptr::{self, NonNull};

use lazy_static::lazy_static;
use libc::{MAP_ANONYMOUS, MAP_FAILED, MAP_NORESERVE, MAP_PRIVATE, PROT_READ, PROT_WRITE};
use log::{debug, warn};

use crate::arena::ArenaSource;
use crate::error::{HeapError, Result};

lazy_static! {
    pub static ref PAGE_SIZE: usize = page_size();
}

fn page_size() -> usize {
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    usize::try_from(size).unwrap_or(4096)
}

/// Arena source backed by one anonymous mapping
///
/// The whole address range is reserved on the first growth and handed out
/// front to back, so the arena never moves. Pages are only committed by the
/// kernel once touched. The mapping is released when the source is dropped.
#[derive(Debug)]
pub struct PageArena {
    reserve: usize,
    base: Option<NonNull<u8>>,
    mapped: usize,
    used: usize,
}

impl PageArena {
    /// A source able to grow up to `reserve` bytes, rounded up to whole pages
    #[must_use]
    pub const fn new(reserve: usize) -> Self {
        Self {
            reserve,
            base: None,
            mapped: 0,
            used: 0,
        }
    }

    /// Bytes handed out so far
    #[must_use]
    pub const fn used(&self) -> usize {
        self.used
    }

    fn map(&mut self) -> Result<NonNull<u8>> {
        let page = *PAGE_SIZE;
        let len = self
            .reserve
            .checked_next_multiple_of(page)
            .filter(|&len| len > 0)
            .ok_or(HeapError::OutOfMemory)?;

        let mem_ptr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                len,
                PROT_READ | PROT_WRITE,
                MAP_PRIVATE | MAP_ANONYMOUS | MAP_NORESERVE,
                -1,
                0,
            )
        };
        if mem_ptr == MAP_FAILED {
            warn!("failed to reserve {len} bytes for the arena");
            return Err(HeapError::OutOfMemory);
        }
        let base = NonNull::new(mem_ptr.cast::<u8>()).ok_or(HeapError::OutOfMemory)?;
        debug!("reserved {len} bytes at {base:p}");

        self.base = Some(base);
        self.mapped = len;
        Ok(base)
    }
}

// SAFETY: regions are handed out back to back from a single mapping that is
// only unmapped on drop.
unsafe impl ArenaSource for PageArena {
    fn grow(&mut self, bytes: usize) -> Result<NonNull<u8>> {
        let base = match self.base {
            Some(base) => base,
            None => self.map()?,
        };
        if bytes > self.mapped - self.used {
            return Err(HeapError::OutOfMemory);
        }

        // SAFETY: `used + bytes <= mapped`, so the region stays in the mapping.
        let region = unsafe { base.add(self.used) };
        self.used += bytes;
        Ok(region)
    }
}

impl Drop for PageArena {
    fn drop(&mut self) {
        if let Some(base) = self.base.take() {
            unsafe { libc::munmap(base.as_ptr().cast::<c_void>(), self.mapped) };
        }
    }
}

// SAFETY: the mapping is owned exclusively by this source.
unsafe impl Send for PageArena {}

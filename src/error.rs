use thiserror::Error;

/// Errors that can occur during heap operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum HeapError {
    /// The arena source refused to grow
    #[error("Out of memory")]
    OutOfMemory,
    /// The first growth could not hold the free-list table and boundary markers
    #[error("Initial region too small for the free-list table")]
    RegionTooSmall,
    /// The arena source handed back a region that is not 16-byte aligned
    #[error("Arena region is not 16-byte aligned")]
    Misaligned,
    /// The arena source handed back a region that does not follow the previous one
    #[error("Arena growth is not contiguous")]
    NotContiguous,
    /// The request cannot be expressed as a block size
    #[error("Requested size overflows")]
    SizeOverflow,
    /// The pointer is not a live allocation of this heap
    #[error("Invalid pointer")]
    InvalidPointer,
}

pub type Result<T> = core::result::Result<T, HeapError>;

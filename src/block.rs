//! Header and footer tags: block size in the high bits, allocated and
//! prev-allocated flags in bits 0 and 1.

/// Machine word, the unit of every tag and link
pub const WORD: usize = size_of::<usize>();

/// Global alignment of every block and every payload
pub const ALIGNMENT: usize = 16;

/// Header, footer and two links, rounded to the alignment
pub const MIN_BLOCK_SIZE: usize = 32;

/// Number of segregated size classes
pub const CLASS_COUNT: usize = 32;

/// Bytes of a block that are not usable payload
pub const OVERHEAD: usize = 2 * WORD;

const _: () = assert!(MIN_BLOCK_SIZE >= OVERHEAD + 2 * WORD);
const _: () = assert!(MIN_BLOCK_SIZE % ALIGNMENT == 0);
const _: () = assert!(MIN_BLOCK_SIZE.is_power_of_two());

const ALLOCATED: usize = 1;
const PREV_ALLOCATED: usize = 2;
const FLAGS: usize = ALLOCATED | PREV_ALLOCATED;

/// Rounds `n` up to the global alignment.
///
/// Overflows for `n` within 15 of `usize::MAX`; use [`block_size_for`] for
/// untrusted request sizes.
#[inline]
pub const fn round_up_to_alignment(n: usize) -> usize {
    (n + ALIGNMENT - 1) & !(ALIGNMENT - 1)
}

/// Segregated class of a block size: `floor(log2(n / 32))`, clamped to `[0, 31]`
#[inline]
pub const fn size_class(n: usize) -> usize {
    let units = n / MIN_BLOCK_SIZE;
    if units == 0 {
        return 0;
    }
    let class = units.ilog2() as usize;
    if class >= CLASS_COUNT {
        CLASS_COUNT - 1
    } else {
        class
    }
}

/// Block size needed to serve a request of `requested` payload bytes
///
/// Returns `None` when the rounded size does not fit in a `usize`.
#[inline]
pub const fn block_size_for(requested: usize) -> Option<usize> {
    match requested.checked_add(OVERHEAD + ALIGNMENT - 1) {
        Some(padded) => {
            let size = padded & !(ALIGNMENT - 1);
            if size < MIN_BLOCK_SIZE {
                Some(MIN_BLOCK_SIZE)
            } else {
                Some(size)
            }
        }
        None => None,
    }
}

/// A header or footer word
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct Tag(usize);

impl Tag {
    /// Zero-size marker used for the prologue and the epilogue
    pub const MARKER: Self = Self(ALLOCATED | PREV_ALLOCATED);

    #[inline]
    pub const fn new(size: usize, allocated: bool, prev_allocated: bool) -> Self {
        debug_assert!(size & FLAGS == 0);
        Self(size).with_allocated(allocated).with_prev_allocated(prev_allocated)
    }

    #[inline]
    pub const fn from_raw(raw: usize) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn raw(self) -> usize {
        self.0
    }

    #[inline]
    pub const fn size(self) -> usize {
        self.0 & !FLAGS
    }

    #[inline]
    pub const fn is_allocated(self) -> bool {
        self.0 & ALLOCATED != 0
    }

    #[inline]
    pub const fn is_prev_allocated(self) -> bool {
        self.0 & PREV_ALLOCATED != 0
    }

    #[inline]
    #[must_use]
    pub const fn with_allocated(self, allocated: bool) -> Self {
        if allocated {
            Self(self.0 | ALLOCATED)
        } else {
            Self(self.0 & !ALLOCATED)
        }
    }

    #[inline]
    #[must_use]
    pub const fn with_prev_allocated(self, prev_allocated: bool) -> Self {
        if prev_allocated {
            Self(self.0 | PREV_ALLOCATED)
        } else {
            Self(self.0 & !PREV_ALLOCATED)
        }
    }

    #[inline]
    #[must_use]
    pub const fn with_size(self, size: usize) -> Self {
        debug_assert!(size & FLAGS == 0);
        Self(size | (self.0 & FLAGS))
    }
}

#[inline]
pub const fn payload_of(header: usize) -> usize {
    header + WORD
}

#[inline]
pub const fn header_of(payload: usize) -> usize {
    payload - WORD
}

#[inline]
pub const fn footer_of(header: usize, size: usize) -> usize {
    header + size - WORD
}

#[inline]
pub const fn next_header_of(header: usize, size: usize) -> usize {
    header + size
}

#[inline]
pub const fn prev_footer_of(header: usize) -> usize {
    header - WORD
}

/// Header of the previous block, given the size read from its footer
#[inline]
pub const fn prev_header_of(header: usize, prev_size: usize) -> usize {
    header - prev_size
}

#[cfg(test)]
mod test {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(0, 0)]
    #[case(1, 16)]
    #[case(15, 16)]
    #[case(16, 16)]
    #[case(17, 32)]
    #[case(100, 112)]
    fn rounds_up(#[case] n: usize, #[case] expected: usize) {
        assert_eq!(round_up_to_alignment(n), expected);
    }

    #[rstest]
    #[case(0, 0)]
    #[case(32, 0)]
    #[case(63, 0)]
    #[case(64, 1)]
    #[case(127, 1)]
    #[case(128, 2)]
    #[case(4096, 7)]
    #[case(usize::MAX, CLASS_COUNT - 1)]
    fn classes_are_near_log2(#[case] size: usize, #[case] class: usize) {
        assert_eq!(size_class(size), class);
    }

    #[rstest]
    #[case(1, 32)]
    #[case(16, 32)]
    #[case(17, 48)]
    #[case(40, 64)]
    #[case(1000, 1024)]
    fn block_sizes_include_both_tags(#[case] requested: usize, #[case] block: usize) {
        if WORD == 8 {
            assert_eq!(block_size_for(requested), Some(block));
        }
        let size = block_size_for(requested).unwrap();
        assert!(size >= MIN_BLOCK_SIZE);
        assert_eq!(size % ALIGNMENT, 0);
        assert!(size - OVERHEAD >= requested);
    }

    #[test]
    fn huge_request_overflows() {
        assert_eq!(block_size_for(usize::MAX), None);
        assert_eq!(block_size_for(usize::MAX - OVERHEAD), None);
    }

    #[test]
    fn flags_leave_size_alone() {
        let tag = Tag::new(64, false, false);
        assert_eq!(tag.size(), 64);
        assert!(!tag.is_allocated());
        assert!(!tag.is_prev_allocated());

        let tag = tag.with_allocated(true);
        assert_eq!(tag.size(), 64);
        assert!(tag.is_allocated());
        assert!(!tag.is_prev_allocated());

        let tag = tag.with_prev_allocated(true).with_allocated(false);
        assert_eq!(tag.size(), 64);
        assert!(!tag.is_allocated());
        assert!(tag.is_prev_allocated());

        let tag = tag.with_size(128);
        assert_eq!(tag.size(), 128);
        assert!(tag.is_prev_allocated());
        assert_eq!(tag.raw(), 128 | 2);
    }

    #[test]
    fn marker_is_empty_and_allocated() {
        assert_eq!(Tag::MARKER.size(), 0);
        assert!(Tag::MARKER.is_allocated());
        assert!(Tag::MARKER.is_prev_allocated());
    }

    #[test]
    fn neighbor_math() {
        let header = 520;
        let size = 64;
        assert_eq!(payload_of(header), 520 + WORD);
        assert_eq!(header_of(payload_of(header)), header);
        assert_eq!(footer_of(header, size), 520 + 64 - WORD);
        assert_eq!(next_header_of(header, size), 584);
        assert_eq!(prev_footer_of(584), 584 - WORD);
        assert_eq!(prev_header_of(584, size), header);
    }
}

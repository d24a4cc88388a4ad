use crate::block::ALIGNMENT;

/// Where the free-list index looks for a fitting block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FitPolicy {
    /// Only the class of the requested size; an exhausted class means growth
    #[default]
    SingleClass,
    /// The requested class first, then every larger class in ascending order
    Escalating,
}

/// Tunables of a [`SegListAllocator`](crate::SegListAllocator)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapConfig {
    pub(crate) grow_granularity: usize,
    pub(crate) max_arena_bytes: Option<usize>,
    pub(crate) fit_policy: FitPolicy,
    pub(crate) check_every_op: bool,
}

impl Default for HeapConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl HeapConfig {
    /// Grow by exactly the block being served, no ceiling, single-class search
    #[must_use]
    pub const fn new() -> Self {
        Self {
            grow_granularity: 0,
            max_arena_bytes: None,
            fit_policy: FitPolicy::SingleClass,
            check_every_op: false,
        }
    }

    /// Never ask the arena source for fewer than `bytes` at a time
    #[must_use]
    pub const fn with_grow_granularity(mut self, bytes: usize) -> Self {
        self.grow_granularity = match bytes.checked_add(ALIGNMENT - 1) {
            Some(padded) => padded & !(ALIGNMENT - 1),
            None => usize::MAX & !(ALIGNMENT - 1),
        };
        self
    }

    /// Refuse to grow the arena past `bytes` in total
    #[must_use]
    pub const fn with_max_arena_bytes(mut self, bytes: usize) -> Self {
        self.max_arena_bytes = Some(bytes);
        self
    }

    #[must_use]
    pub const fn with_fit_policy(mut self, policy: FitPolicy) -> Self {
        self.fit_policy = policy;
        self
    }

    /// Run the heap validator after every public operation
    ///
    /// Has no effect when the validator is compiled out.
    #[must_use]
    pub const fn with_check_every_op(mut self, check: bool) -> Self {
        self.check_every_op = check;
        self
    }

    #[must_use]
    pub const fn grow_granularity(&self) -> usize {
        self.grow_granularity
    }

    #[must_use]
    pub const fn max_arena_bytes(&self) -> Option<usize> {
        self.max_arena_bytes
    }

    #[must_use]
    pub const fn fit_policy(&self) -> FitPolicy {
        self.fit_policy
    }

    #[must_use]
    pub const fn check_every_op(&self) -> bool {
        self.check_every_op
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn defaults_match_plain_heap() {
        let config = HeapConfig::default();
        assert_eq!(config, HeapConfig::new());
        assert_eq!(config.grow_granularity(), 0);
        assert_eq!(config.max_arena_bytes(), None);
        assert_eq!(config.fit_policy(), FitPolicy::SingleClass);
        assert!(!config.check_every_op());
    }

    #[test]
    fn granularity_is_aligned() {
        let config = HeapConfig::new().with_grow_granularity(4000);
        assert_eq!(config.grow_granularity(), 4000_usize.next_multiple_of(16));
    }

    #[test]
    fn granularity_saturates() {
        let config = HeapConfig::new().with_grow_granularity(usize::MAX);
        assert_eq!(config.grow_granularity(), usize::MAX - 15);
        let config = HeapConfig::new().with_grow_granularity(usize::MAX - 20);
        assert_eq!(config.grow_granularity(), usize::MAX - 15);
    }
}

//! Block allocation counters.

/// Block allocation statistics for one handle store.
///
/// Local handle stores and global handle tables each keep their own copy, so
/// counts never mix between contexts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HandleStats {
    /// Blocks allocated since the store was created.
    pub blocks_allocated: usize,
    /// Blocks released since the store was created.
    pub blocks_released: usize,
}

impl HandleStats {
    /// All counters at zero.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            blocks_allocated: 0,
            blocks_released: 0,
        }
    }

    /// Blocks currently held.
    #[must_use]
    pub const fn live_blocks(&self) -> usize {
        self.blocks_allocated - self.blocks_released
    }

    pub(crate) const fn record_allocated(&mut self) {
        self.blocks_allocated += 1;
    }

    pub(crate) const fn record_released(&mut self, count: usize) {
        self.blocks_released += count;
    }
}

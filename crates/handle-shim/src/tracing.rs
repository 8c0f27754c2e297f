//! Structured logging for block lifecycle and collector hooks.
//!
//! With the `tracing` feature these helpers emit `tracing` events and spans.
//! Without it they compile to nothing, so call sites stay unconditional.

#[cfg(feature = "tracing")]
#[allow(missing_docs)]
pub mod internal {
    use tracing::{span, Level};

    /// Which store a block belongs to.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum BlockKind {
        /// A local handle block.
        Local,
        /// A global node block.
        Global,
    }

    /// Create a span for one collector hook invocation.
    pub fn span_collector_hook(hook: &'static str) -> span::EnteredSpan {
        span!(Level::DEBUG, "collector_hook", hook = hook).entered()
    }

    pub fn log_block_allocated(kind: BlockKind, live_blocks: usize) {
        tracing::trace!(kind = ?kind, live_blocks, "block_allocated");
    }

    pub fn log_block_released(kind: BlockKind, released: usize, live_blocks: usize) {
        tracing::trace!(kind = ?kind, released, live_blocks, "block_released");
    }

    pub fn log_scope_exit(level: u32, freed_blocks: usize) {
        tracing::trace!(level, freed_blocks, "scope_exit");
    }

    pub fn log_roots_enumerated(strong: usize, weak: usize) {
        tracing::debug!(strong, weak, "roots_enumerated");
    }

    pub fn log_mark_participation(ready_to_die: usize) {
        tracing::debug!(ready_to_die, "mark_participation");
    }

    pub fn log_first_pass(has_callback: bool, queued_second_pass: bool) {
        tracing::debug!(has_callback, queued_second_pass, "first_pass");
    }

    pub fn log_second_pass(pending: usize) {
        tracing::debug!(pending, "second_pass");
    }

    pub fn log_tear_down(released: usize) {
        tracing::debug!(released, "tear_down");
    }
}

#[cfg(not(feature = "tracing"))]
#[allow(missing_docs, clippy::missing_const_for_fn)]
pub mod internal {
    /// Which store a block belongs to.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum BlockKind {
        /// A local handle block.
        Local,
        /// A global node block.
        Global,
    }

    /// Stub span guard when tracing is disabled.
    pub struct NoSpan;

    #[inline]
    pub fn span_collector_hook(_hook: &'static str) -> NoSpan {
        NoSpan
    }

    #[inline]
    pub fn log_block_allocated(_kind: BlockKind, _live_blocks: usize) {}

    #[inline]
    pub fn log_block_released(_kind: BlockKind, _released: usize, _live_blocks: usize) {}

    #[inline]
    pub fn log_scope_exit(_level: u32, _freed_blocks: usize) {}

    #[inline]
    pub fn log_roots_enumerated(_strong: usize, _weak: usize) {}

    #[inline]
    pub fn log_mark_participation(_ready_to_die: usize) {}

    #[inline]
    pub fn log_first_pass(_has_callback: bool, _queued_second_pass: bool) {}

    #[inline]
    pub fn log_second_pass(_pending: usize) {}

    #[inline]
    pub fn log_tear_down(_released: usize) {}
}

pub use internal::BlockKind;

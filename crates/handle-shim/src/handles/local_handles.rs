//! Local handle storage for one execution context.
//!
//! This module implements the core data structures for stack-discipline handles:
//! - `HandleSlot`: Individual handle storage (single word)
//! - `HandleBlock`: Fixed-size array of slots plus chain links
//! - `HandleScopeData`: The allocation cursor and nesting level
//! - `LocalHandles`: The block chain and cursor for one context
//!
//! Blocks are boxed and never move, so a slot's address is stable until the
//! scope that allocated its block exits. The chain is kept in a `Vec` in chain
//! order; `previous`/`next` are indices into it.

#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::manual_assert)]

use std::collections::HashMap;

use crate::metrics::HandleStats;
use crate::tracing::internal::{log_block_allocated, log_block_released, log_scope_exit};
use crate::tracing::BlockKind;
use crate::value::{Engine, RawValue};

/// Bytes per handle block in the foreign ABI.
pub const HANDLE_BLOCK_BYTES: usize = 0x4000;

/// Slots per handle block: the block minus its two link words.
pub const HANDLE_BLOCK_SIZE: usize =
    (HANDLE_BLOCK_BYTES - 2 * std::mem::size_of::<usize>()) / std::mem::size_of::<HandleSlot>();

#[repr(C)]
#[derive(Debug)]
pub struct HandleSlot {
    value: RawValue,
}

impl HandleSlot {
    #[inline]
    pub const fn new(value: RawValue) -> Self {
        Self { value }
    }

    #[inline]
    pub const fn null() -> Self {
        Self {
            value: RawValue::NULL,
        }
    }

    #[inline]
    pub const fn get(&self) -> RawValue {
        self.value
    }

    #[inline]
    pub fn is_null(&self) -> bool {
        self.value.is_null()
    }

    #[inline]
    pub fn set(&mut self, value: RawValue) {
        self.value = value;
    }
}

impl Default for HandleSlot {
    fn default() -> Self {
        Self::null()
    }
}

pub struct HandleBlock {
    previous: Option<usize>,
    next: Option<usize>,
    pub(crate) slots: [HandleSlot; HANDLE_BLOCK_SIZE],
}

impl HandleBlock {
    pub fn new() -> Box<Self> {
        Box::new(Self::default())
    }

    #[inline]
    pub fn slots_ptr(&mut self) -> *mut HandleSlot {
        self.slots.as_mut_ptr()
    }

    #[inline]
    pub fn slots_end(&mut self) -> *mut HandleSlot {
        // SAFETY: one past the end of the slot array.
        unsafe { self.slots.as_mut_ptr().add(HANDLE_BLOCK_SIZE) }
    }

    #[inline]
    pub fn previous(&self) -> Option<usize> {
        self.previous
    }

    #[inline]
    pub fn next(&self) -> Option<usize> {
        self.next
    }

    /// Number of slots between the start of this block and `cursor`.
    #[inline]
    fn slots_before(&self, cursor: *const HandleSlot) -> usize {
        (cursor as usize - self.slots.as_ptr() as usize) / std::mem::size_of::<HandleSlot>()
    }
}

impl Default for HandleBlock {
    fn default() -> Self {
        Self {
            previous: None,
            next: None,
            slots: std::array::from_fn(|_| HandleSlot::null()),
        }
    }
}

/// The allocation cursor.
///
/// `block` is the chain index of the block `next`/`limit` point into, or
/// `None` when the cursor is empty.
#[derive(Debug, Clone, Copy)]
pub struct HandleScopeData {
    pub(crate) next: *mut HandleSlot,
    pub(crate) limit: *mut HandleSlot,
    pub(crate) block: Option<usize>,
    pub(crate) level: u32,
    #[cfg(debug_assertions)]
    pub(crate) sealed_level: u32,
}

impl HandleScopeData {
    pub const fn new() -> Self {
        Self {
            next: std::ptr::null_mut(),
            limit: std::ptr::null_mut(),
            block: None,
            level: 0,
            #[cfg(debug_assertions)]
            sealed_level: 0,
        }
    }

    #[inline]
    pub const fn is_active(&self) -> bool {
        self.level > 0
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.block.is_none()
    }

    #[cfg(debug_assertions)]
    #[inline]
    pub const fn is_sealed(&self) -> bool {
        self.level <= self.sealed_level && self.sealed_level > 0
    }

    #[cfg(not(debug_assertions))]
    #[inline]
    pub const fn is_sealed(&self) -> bool {
        false
    }
}

impl Default for HandleScopeData {
    fn default() -> Self {
        Self::new()
    }
}

/// Cursor snapshot taken when a scope is entered.
#[derive(Debug, Clone, Copy)]
pub struct ScopeFrame {
    next: *mut HandleSlot,
    limit: *mut HandleSlot,
    block: Option<usize>,
    level: u32,
}

impl ScopeFrame {
    /// Nesting level outside the scope this frame belongs to.
    #[inline]
    pub fn level(&self) -> u32 {
        self.level
    }
}

pub struct LocalHandles {
    blocks: Vec<Box<HandleBlock>>,
    pub(crate) scope_data: HandleScopeData,
    snapshot: HandleScopeData,
    stats: HandleStats,
}

impl LocalHandles {
    pub fn new() -> Self {
        Self {
            blocks: Vec::new(),
            scope_data: HandleScopeData::new(),
            snapshot: HandleScopeData::new(),
            stats: HandleStats::new(),
        }
    }

    #[inline]
    pub fn scope_data_mut(&mut self) -> &mut HandleScopeData {
        &mut self.scope_data
    }

    #[inline]
    pub fn scope_data(&self) -> &HandleScopeData {
        &self.scope_data
    }

    #[inline]
    pub fn stats(&self) -> HandleStats {
        self.stats
    }

    /// Number of blocks in the chain.
    #[inline]
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Pushes a scope frame: snapshots the cursor and bumps the level.
    pub fn enter_scope(&mut self) -> ScopeFrame {
        let data = &mut self.scope_data;
        let frame = ScopeFrame {
            next: data.next,
            limit: data.limit,
            block: data.block,
            level: data.level,
        };
        let Some(level) = data.level.checked_add(1) else {
            panic!("HandleScope nesting overflow");
        };
        data.level = level;
        frame
    }

    /// Pops `frame`, restoring the cursor and releasing blocks allocated
    /// after it. Leaving the outermost scope releases every block.
    #[track_caller]
    pub fn leave_scope(&mut self, frame: &ScopeFrame) {
        if self.scope_data.level != frame.level + 1 {
            panic!(
                "HandleScope exited out of order: scope at level {} is not the innermost (level {})",
                frame.level + 1,
                self.scope_data.level
            );
        }

        let data = &mut self.scope_data;
        data.next = frame.next;
        data.limit = frame.limit;
        data.block = frame.block;
        data.level = frame.level;

        let keep = if data.level == 0 {
            data.next = std::ptr::null_mut();
            data.limit = std::ptr::null_mut();
            data.block = None;
            0
        } else {
            frame.block.map_or(0, |index| index + 1)
        };

        let freed = self.release_after(keep);
        log_scope_exit(frame.level, freed);
    }

    /// Frees every block from chain index `keep` on, tail first.
    fn release_after(&mut self, keep: usize) -> usize {
        if keep >= self.blocks.len() {
            return 0;
        }
        if let Some(last) = keep.checked_sub(1) {
            self.blocks[last].next = None;
        }

        let mut freed = 0;
        while self.blocks.len() > keep {
            drop(self.blocks.pop());
            freed += 1;
        }

        self.stats.record_released(freed);
        log_block_released(BlockKind::Local, freed, self.stats.live_blocks());
        freed
    }

    /// Appends a block after the cursor's block and points the cursor at it.
    pub fn add_block(&mut self) -> (*mut HandleSlot, *mut HandleSlot) {
        let previous = self.scope_data.block;
        // Scope exit trims the chain, so the cursor's block is always the tail.
        debug_assert_eq!(previous.map_or(0, |index| index + 1), self.blocks.len());

        let index = self.blocks.len();
        let mut new_block = HandleBlock::new();
        new_block.previous = previous;
        if let Some(previous) = previous {
            self.blocks[previous].next = Some(index);
        }
        self.blocks.push(new_block);
        self.stats.record_allocated();
        log_block_allocated(BlockKind::Local, self.stats.live_blocks());

        let block = &mut self.blocks[index];
        let (start, end) = (block.slots_ptr(), block.slots_end());
        self.scope_data.block = Some(index);
        self.scope_data.next = start;
        self.scope_data.limit = end;
        (start, end)
    }

    #[inline]
    #[track_caller]
    pub fn allocate(&mut self) -> *mut HandleSlot {
        if !self.scope_data.is_active() {
            panic!("Cannot create a local handle without an open HandleScope");
        }

        #[cfg(debug_assertions)]
        {
            if self.scope_data.is_sealed() {
                panic!("Cannot allocate handle in sealed scope");
            }
        }

        if self.scope_data.next >= self.scope_data.limit || self.scope_data.next.is_null() {
            self.add_block();
        }

        let slot = self.scope_data.next;
        unsafe {
            self.scope_data.next = self.scope_data.next.add(1);
        }
        slot
    }

    /// Number of allocated slots in the chain.
    ///
    /// Seals the live cursor into this context's snapshot first, then counts
    /// full blocks behind the snapshot block plus the partial count in it.
    pub fn number_of_handles(&mut self) -> usize {
        self.snapshot = self.scope_data;

        let Some(index) = self.snapshot.block else {
            return 0;
        };
        let block = &self.blocks[index];
        let mut handles = block.slots_before(self.snapshot.next);
        let mut previous = block.previous;
        while let Some(index) = previous {
            handles += HANDLE_BLOCK_SIZE;
            previous = self.blocks[index].previous;
        }
        handles
    }

    /// The cursor as of the last [`LocalHandles::number_of_handles`] call.
    #[inline]
    pub fn snapshot(&self) -> &HandleScopeData {
        &self.snapshot
    }

    pub fn iterate<F>(&self, mut visitor: F)
    where
        F: FnMut(RawValue),
    {
        let Some(cursor_block) = self.scope_data.block else {
            return;
        };

        let mut block_opt = Some(0);
        while let Some(index) = block_opt {
            let block = &self.blocks[index];
            let end = if index == cursor_block {
                block.slots_before(self.scope_data.next)
            } else {
                HANDLE_BLOCK_SIZE
            };

            for slot in &block.slots[..end] {
                if !slot.is_null() {
                    visitor(slot.get());
                }
            }

            block_opt = if index == cursor_block {
                None
            } else {
                block.next()
            };
        }
    }

    /// Counts live heap values held by local handles, keyed by value.
    ///
    /// The collector treats every key as a root while locals reference it.
    pub fn active_values(&self, engine: &dyn Engine) -> HashMap<RawValue, usize> {
        let mut counts = HashMap::new();
        self.iterate(|value| {
            if engine.kind(value).is_heap_object() {
                *counts.entry(value).or_insert(0) += 1;
            }
        });
        counts
    }
}

impl Default for LocalHandles {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for LocalHandles {
    fn drop(&mut self) {
        self.release_after(0);
    }
}

//! The global handle table.
//!
//! Global handles outlive every scope. Each one is a [`Node`] in a 64-slot
//! [`NodeBlock`]; the node never moves while the handle is live, so native
//! code may keep its address. Nodes can be weakened, in which case the
//! collector consults the table through [`CollectorHooks`] to decide what
//! survives and which finalizers to run.

#![allow(clippy::missing_panics_doc)]
#![allow(clippy::must_use_candidate)]

mod block;
mod hooks;
mod node;
mod weak;

pub use block::{BlockId, ListKind, NodeBlock, ALL_FREE, NODES_PER_BLOCK};
pub use hooks::{CollectorHooks, ReadyToDie, RootSet};
pub use node::{
    Node, NodeState, NODE_CLASS_ID_OFFSET, NODE_FLAGS_OFFSET, NODE_IS_ACTIVE_SHIFT,
    NODE_IS_INDEPENDENT_SHIFT, NODE_STATE_IS_NEAR_DEATH, NODE_STATE_IS_PENDING,
    NODE_STATE_IS_WEAK, NODE_STATE_MASK,
};
pub use weak::{
    PendingSecondPass, ReadySecondPasses, WeakCallback, WeakCallbackInfo, WeakCallbackType,
};

use std::fmt;
use std::ptr::NonNull;
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};

use crate::handles::{unsupported, Local};
use crate::metrics::HandleStats;
use crate::tracing::internal::{log_block_allocated, log_block_released, log_tear_down, BlockKind};
use crate::value::{Engine, Parameter, RawValue, Target, ValueKind};

use block::BlockArena;
use node::{ACTIVE_BIT, ACTIVE_WEAK, ACTIVE_WEAK_MASK};

/// Identity of one global handle: its block and slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GlobalHandle {
    block: BlockId,
    index: u8,
}

impl GlobalHandle {
    /// Block holding the node.
    #[must_use]
    pub const fn block(self) -> BlockId {
        self.block
    }

    /// Slot index within the block, `0..64`.
    #[must_use]
    pub const fn index(self) -> u8 {
        self.index
    }
}

/// Block counts per list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlockCensus {
    /// Blocks with at least one free slot.
    pub available: usize,
    /// Blocks with no free slot.
    pub used: usize,
}

/// Global handle table of one isolate.
pub struct GlobalHandles {
    engine: Arc<dyn Engine>,
    blocks: BlockArena,
    number_of_global_handles: usize,
    stats: HandleStats,
    pending_second_passes: Vec<PendingSecondPass>,
    ready_second_passes: ReadySecondPasses,
}

impl GlobalHandles {
    /// An empty table. No block is allocated until the first handle.
    pub fn new(engine: Arc<dyn Engine>) -> Self {
        Self {
            engine,
            blocks: BlockArena::new(),
            number_of_global_handles: 0,
            stats: HandleStats::new(),
            pending_second_passes: Vec::new(),
            ready_second_passes: ReadySecondPasses::default(),
        }
    }

    /// The engine this table asks about values.
    pub fn engine(&self) -> &dyn Engine {
        &*self.engine
    }

    /// Stores `value` in a free slot and returns its handle.
    pub fn create(&mut self, value: RawValue) -> GlobalHandle {
        let id = match self.blocks.first_available() {
            Some(id) => id,
            None => self.allocate_block(),
        };

        let block = self.blocks.block_mut(id);
        let Some(slot) = run_finder::one(block.bitmap) else {
            unreachable!("block {id:?} is on the available list with no free slot");
        };
        #[allow(clippy::cast_possible_truncation)]
        let index = slot as u8;
        block.bitmap &= !(1 << slot);
        block.nodes[slot as usize] = Node::new(index, value);
        let full = block.is_full();

        self.number_of_global_handles += 1;
        if full {
            self.blocks.move_to(id, ListKind::Used);
        }

        GlobalHandle { block: id, index }
    }

    /// Promotes a local handle's value to a global handle.
    pub fn globalize(&mut self, local: &Local<'_>) -> GlobalHandle {
        self.create(local.value())
    }

    /// Frees `handle`'s slot. A block left with no live slots is released.
    ///
    /// # Panics
    ///
    /// Panics if `handle` was already destroyed.
    #[track_caller]
    pub fn destroy(&mut self, handle: GlobalHandle) {
        let id = handle.block;
        let block = self.blocks.block_mut(id);
        if !block.is_occupied(handle.index) {
            panic!("global handle slot {} of {id:?} destroyed twice", handle.index);
        }

        let was_full = block.is_full();
        block.bitmap |= 1 << handle.index;
        block.nodes[handle.index as usize] = Node::EMPTY;
        let now_empty = block.is_empty();

        self.number_of_global_handles -= 1;
        if now_empty {
            self.blocks.remove(id);
            self.stats.record_released(1);
            log_block_released(BlockKind::Global, 1, self.stats.live_blocks());
        } else if was_full {
            self.blocks.move_to(id, ListKind::Available);
        }
    }

    /// A new handle to the same value, carrying over the class id, flags,
    /// callbacks, parameter and payload. Only the slot index differs.
    #[track_caller]
    pub fn copy_global(&mut self, handle: GlobalHandle) -> GlobalHandle {
        let source = *self.node(handle);
        let copy = self.create(source.value);
        let node = self.blocks.node_mut(copy.block, copy.index);
        *node = source;
        node.index = copy.index;
        copy
    }

    /// Weakens `handle`.
    ///
    /// A container of an engine object is swapped for a weak proxy and its
    /// protection released, and the node becomes active: the collector asks
    /// about it during marking. Any other value only changes state. A
    /// previously registered second-pass callback is dropped.
    #[track_caller]
    pub fn make_weak(
        &mut self,
        handle: GlobalHandle,
        parameter: Parameter,
        callback: Option<WeakCallback>,
        kind: WeakCallbackType,
    ) {
        let engine = &*self.engine;
        let node = self.blocks.node_mut(handle.block, handle.index);

        if engine.kind(node.value).is_wrappable() {
            if let Some(target) = engine.target(node.value) {
                engine.ensure_private_wrapper(target);
                node.value = engine.new_weak_proxy(target);
                engine.unprotect(target);
                node.flags |= ACTIVE_BIT;
            }
        }

        node.set_state(NODE_STATE_IS_WEAK);
        node.parameter = parameter;
        node.weak_callback = callback;
        node.callback_type = kind;
        node.second_pass_callback = None;
    }

    /// Weakens `handle` with no parameter and no callback.
    #[track_caller]
    pub fn make_weak_phantom(&mut self, handle: GlobalHandle) {
        self.make_weak(handle, Parameter::NULL, None, WeakCallbackType::Parameter);
    }

    /// The field-index form of weakening is not supported.
    #[track_caller]
    pub fn make_weak_with_field_indices(
        &mut self,
        _handle: GlobalHandle,
        _parameter: Parameter,
        _field_index1: i32,
        _field_index2: i32,
        _callback: WeakCallback,
    ) -> ! {
        unsupported("GlobalHandles::make_weak_with_field_indices")
    }

    /// Makes an active weak handle strong again.
    ///
    /// Returns the parameter given to [`GlobalHandles::make_weak`], or
    /// `None` (changing nothing) if the node is not in the active-weak state.
    #[track_caller]
    pub fn clear_weakness(&mut self, handle: GlobalHandle) -> Option<Parameter> {
        let engine = &*self.engine;
        let node = self.blocks.node_mut(handle.block, handle.index);
        if node.masked_flags() != ACTIVE_WEAK {
            return None;
        }

        if engine.kind(node.value) == ValueKind::WeakProxy {
            if let Some(target) = engine.target(node.value) {
                node.value = engine.new_strong_value(target);
                engine.protect(target);
            }
        }

        node.flags &= !ACTIVE_WEAK_MASK;
        node.weak_callback = None;
        node.second_pass_callback = None;
        Some(std::mem::take(&mut node.parameter))
    }

    /// The node behind `handle`.
    ///
    /// # Panics
    ///
    /// Panics if `handle` was destroyed.
    #[track_caller]
    pub fn node(&self, handle: GlobalHandle) -> &Node {
        self.blocks.node(handle.block, handle.index)
    }

    /// Value stored in `handle`.
    #[track_caller]
    pub fn value(&self, handle: GlobalHandle) -> RawValue {
        self.node(handle).value
    }

    /// Reference state of `handle`.
    #[track_caller]
    pub fn state(&self, handle: GlobalHandle) -> NodeState {
        self.node(handle).state()
    }

    /// Address of the node. Stable until `handle` is destroyed.
    #[track_caller]
    pub fn location(&self, handle: GlobalHandle) -> NonNull<Node> {
        NonNull::from(self.node(handle))
    }

    /// Whether `handle` still names an occupied slot.
    pub fn is_live(&self, handle: GlobalHandle) -> bool {
        self.blocks
            .get(handle.block)
            .is_some_and(|block| block.is_occupied(handle.index))
    }

    /// Embedder class id of `handle`; 0 when unset.
    #[track_caller]
    pub fn class_id(&self, handle: GlobalHandle) -> u16 {
        self.node(handle).class_id
    }

    /// Tags `handle` with an embedder class id.
    #[track_caller]
    pub fn set_class_id(&mut self, handle: GlobalHandle, class_id: u16) {
        self.blocks.node_mut(handle.block, handle.index).class_id = class_id;
    }

    /// Number of live global handles.
    pub const fn number_of_global_handles(&self) -> usize {
        self.number_of_global_handles
    }

    /// Block allocation counters.
    pub const fn stats(&self) -> HandleStats {
        self.stats
    }

    /// Block counts per list.
    pub const fn block_census(&self) -> BlockCensus {
        BlockCensus {
            available: self.blocks.list_len(ListKind::Available),
            used: self.blocks.list_len(ListKind::Used),
        }
    }

    /// Every live block, used list first.
    pub fn blocks(&self) -> impl Iterator<Item = (BlockId, &NodeBlock)> + '_ {
        self.blocks
            .ids()
            .into_iter()
            .filter_map(move |id| self.blocks.get(id).map(|block| (id, block)))
    }

    /// Second passes queued by first-pass callbacks and not yet handed out.
    pub fn pending_second_passes(&self) -> &[PendingSecondPass] {
        &self.pending_second_passes
    }

    /// Takes every queued second pass, ready or not.
    pub fn take_pending_second_passes(&mut self) -> Vec<PendingSecondPass> {
        std::mem::take(&mut self.pending_second_passes)
    }

    /// Runs every queued second pass through [`CollectorHooks::run_second_pass`].
    /// Returns how many ran.
    pub fn run_pending_second_passes(&mut self) -> usize {
        let pending = self.take_pending_second_passes();
        let count = pending.len();
        for entry in pending {
            self.run_second_pass(entry);
        }
        count
    }

    /// Records that the engine finalized `target`.
    ///
    /// Second passes queued for `target` move to the ready queue. Returns how
    /// many moved.
    pub fn notify_target_finalized(&mut self, target: Target) -> usize {
        let before = self.pending_second_passes.len();
        let ready = &self.ready_second_passes;
        self.pending_second_passes.retain(|pending| {
            if pending.target == Some(target) {
                ready.push(pending.clone());
                false
            } else {
                true
            }
        });
        before - self.pending_second_passes.len()
    }

    /// The queue of second passes whose targets were finalized.
    pub fn ready_second_passes(&self) -> ReadySecondPasses {
        self.ready_second_passes.clone()
    }

    /// Drains the ready queue.
    pub fn take_ready_second_passes(&self) -> Vec<PendingSecondPass> {
        std::iter::from_fn(|| self.ready_second_passes.pop()).collect()
    }

    /// Releases every block. Outstanding handles become invalid.
    /// Returns how many blocks were released.
    pub fn tear_down(&mut self) -> usize {
        let released = self.blocks.clear();
        self.number_of_global_handles = 0;
        self.stats.record_released(released);
        log_tear_down(released);
        released
    }

    fn allocate_block(&mut self) -> BlockId {
        let id = self.blocks.insert();
        self.stats.record_allocated();
        log_block_allocated(BlockKind::Global, self.stats.live_blocks());
        id
    }
}

impl Drop for GlobalHandles {
    fn drop(&mut self) {
        self.tear_down();
    }
}

impl fmt::Debug for GlobalHandles {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GlobalHandles")
            .field("number_of_global_handles", &self.number_of_global_handles)
            .field("blocks", &self.blocks)
            .field("stats", &self.stats)
            .field("pending_second_passes", &self.pending_second_passes.len())
            .finish_non_exhaustive()
    }
}

/// A global handle table shared between threads.
///
/// Every operation runs under one lock.
#[derive(Clone)]
pub struct SharedGlobalHandles {
    inner: Arc<Mutex<GlobalHandles>>,
}

impl SharedGlobalHandles {
    /// Wraps a fresh table over `engine`.
    pub fn new(engine: Arc<dyn Engine>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(GlobalHandles::new(engine))),
        }
    }

    /// Locks the table.
    pub fn lock(&self) -> MutexGuard<'_, GlobalHandles> {
        self.inner.lock()
    }

    /// Runs `f` with the table locked.
    pub fn with<R>(&self, f: impl FnOnce(&mut GlobalHandles) -> R) -> R {
        f(&mut self.inner.lock())
    }

    /// Shortcut for [`GlobalHandles::create`].
    pub fn create(&self, value: RawValue) -> GlobalHandle {
        self.inner.lock().create(value)
    }

    /// Shortcut for [`GlobalHandles::destroy`].
    #[track_caller]
    pub fn destroy(&self, handle: GlobalHandle) {
        self.inner.lock().destroy(handle);
    }

    /// Ready queue of the shared table. Draining it does not take the lock.
    pub fn ready_second_passes(&self) -> ReadySecondPasses {
        self.inner.lock().ready_second_passes()
    }
}

impl From<GlobalHandles> for SharedGlobalHandles {
    fn from(table: GlobalHandles) -> Self {
        Self {
            inner: Arc::new(Mutex::new(table)),
        }
    }
}

impl fmt::Debug for SharedGlobalHandles {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inner.try_lock() {
            Some(table) => f.debug_tuple("SharedGlobalHandles").field(&*table).finish(),
            None => f.write_str("SharedGlobalHandles(<locked>)"),
        }
    }
}

//! Entry points the collector calls on a global handle table.

use std::collections::HashMap;

use super::node::{ACTIVE_WEAK, NODE_STATE_IS_NEAR_DEATH, NODE_STATE_IS_WEAK};
use super::weak::{PendingSecondPass, WeakCallbackInfo};
use super::{GlobalHandle, GlobalHandles, NodeState};
use crate::tracing::internal::{
    log_first_pass, log_mark_participation, log_roots_enumerated, log_second_pass,
    span_collector_hook,
};
use crate::value::{Marker, RawValue, Target, ValueKind};

/// Heap values referenced from global handles.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RootSet {
    /// Values that must survive, with the number of handles holding each.
    pub strong: HashMap<RawValue, usize>,
    /// Values held only weakly, with the handles that point at them.
    pub weak: HashMap<RawValue, Vec<GlobalHandle>>,
}

/// Handles found unreachable during marking, with their targets.
pub type ReadyToDie = HashMap<GlobalHandle, Target>;

/// What a collector needs from a handle table.
pub trait CollectorHooks {
    /// Classifies every occupied slot holding a heap value.
    ///
    /// Active weak nodes hold a weak proxy, which is itself counted strong;
    /// the proxy carries the weakness.
    fn enumerate_roots(&self) -> RootSet;

    /// Moves every active weak node whose target `marker` has not reached
    /// to near-death, then marks those targets so they survive this cycle
    /// and their finalizers can still see them.
    fn participate_in_mark(&mut self, marker: &dyn Marker) -> ReadyToDie;

    /// Runs `handle`'s weak callback for a dying `target`.
    ///
    /// # Panics
    ///
    /// Panics unless the node is weak or near death.
    fn run_first_pass(&mut self, handle: GlobalHandle, target: Option<Target>);

    /// Runs a second-pass callback queued by [`CollectorHooks::run_first_pass`].
    fn run_second_pass(&mut self, pending: PendingSecondPass);
}

impl CollectorHooks for GlobalHandles {
    fn enumerate_roots(&self) -> RootSet {
        let _span = span_collector_hook("enumerate_roots");
        let engine = self.engine();
        let mut roots = RootSet::default();

        for (id, block) in self.blocks() {
            for index in block.occupied() {
                let node = &block.nodes[index as usize];
                let kind = engine.kind(node.value);
                if !kind.is_heap_object() {
                    continue;
                }

                let masked = node.masked_flags();
                if masked == NODE_STATE_IS_WEAK || masked == NODE_STATE_IS_NEAR_DEATH {
                    if !matches!(kind, ValueKind::Container { .. }) {
                        roots
                            .weak
                            .entry(node.value)
                            .or_default()
                            .push(GlobalHandle { block: id, index });
                    }
                } else {
                    *roots.strong.entry(node.value).or_insert(0) += 1;
                }
            }
        }

        log_roots_enumerated(roots.strong.len(), roots.weak.len());
        roots
    }

    fn participate_in_mark(&mut self, marker: &dyn Marker) -> ReadyToDie {
        let _span = span_collector_hook("participate_in_mark");
        let engine = &*self.engine;
        let mut ready = ReadyToDie::new();

        for id in self.blocks.ids() {
            let block = self.blocks.block_mut(id);
            for index in block.occupied() {
                let node = &mut block.nodes[index as usize];
                if node.masked_flags() != ACTIVE_WEAK || !engine.kind(node.value).is_heap_object() {
                    continue;
                }
                let Some(target) = engine.target(node.value) else {
                    continue;
                };
                if !marker.is_marked(target) {
                    node.set_state(NODE_STATE_IS_NEAR_DEATH);
                    ready.insert(GlobalHandle { block: id, index }, target);
                }
            }
        }

        for &target in ready.values() {
            marker.mark(target);
        }

        log_mark_participation(ready.len());
        ready
    }

    #[track_caller]
    fn run_first_pass(&mut self, handle: GlobalHandle, target: Option<Target>) {
        let _span = span_collector_hook("run_first_pass");
        let engine = &*self.engine;
        let node = self.blocks.node_mut(handle.block, handle.index);
        assert!(
            matches!(node.state(), NodeState::NearDeath | NodeState::Weak),
            "first pass on a global handle that is neither weak nor near death"
        );

        let embedder_fields = target
            .and_then(|target| engine.private_payload(target))
            .unwrap_or_default();
        let parameter = node.parameter;
        let mut second_pass = None;
        if let Some(callback) = node.weak_callback {
            let mut info = WeakCallbackInfo::first_pass(parameter, embedder_fields, &mut second_pass);
            callback(&mut info);
        }
        node.second_pass_callback = second_pass;

        log_first_pass(node.weak_callback.is_some(), second_pass.is_some());
        if let Some(callback) = second_pass {
            self.pending_second_passes.push(PendingSecondPass {
                callback,
                parameter,
                embedder_fields,
                target,
            });
        }
    }

    fn run_second_pass(&mut self, pending: PendingSecondPass) {
        let _span = span_collector_hook("run_second_pass");
        pending.invoke();
        log_second_pass(self.pending_second_passes.len());
    }
}

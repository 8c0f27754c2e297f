//! A recording engine and marker shared by the integration tests.

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use handle_shim::value::EmbedderFields;
use handle_shim::{Engine, Marker, RawValue, Target, ValueKind};
use parking_lot::Mutex;

#[derive(Clone, Copy)]
struct Repr {
    kind: ValueKind,
    target: Option<Target>,
}

#[derive(Default)]
struct State {
    next_bits: usize,
    reprs: HashMap<usize, Repr>,
    wrappers: HashMap<Target, EmbedderFields>,
    protection: HashMap<Target, isize>,
    weak_proxies: usize,
    strong_values: usize,
}

/// An engine whose representations are table entries keyed by word.
///
/// Words with the low bit set are immediates. Heap words step by 0x10.
#[derive(Default)]
pub struct FakeEngine {
    state: Mutex<State>,
}

impl FakeEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn alloc(&self, kind: ValueKind, target: Option<Target>) -> RawValue {
        let mut state = self.state.lock();
        state.next_bits += 0x10;
        let bits = 0x1_0000 + state.next_bits;
        state.reprs.insert(bits, Repr { kind, target });
        RawValue::from_bits(bits)
    }

    /// A strong container of the engine object `target`, holding one
    /// protection on it.
    pub fn object(&self, target: usize) -> RawValue {
        let target = Target::new(target).expect("non-zero target");
        *self.state.lock().protection.entry(target).or_insert(0) += 1;
        self.alloc(ValueKind::Container { holds_object: true }, Some(target))
    }

    /// A container of a non-object engine value.
    pub fn boxed_primitive(&self, target: usize) -> RawValue {
        self.alloc(
            ValueKind::Container {
                holds_object: false,
            },
            Target::new(target),
        )
    }

    /// A heap primitive such as a string.
    pub fn primitive(&self) -> RawValue {
        self.alloc(ValueKind::Primitive, None)
    }

    /// A small integer.
    pub fn smi(value: usize) -> RawValue {
        RawValue::from_bits((value << 1) | 1)
    }

    pub fn set_payload(&self, target: Target, fields: EmbedderFields) {
        self.state.lock().wrappers.insert(target, fields);
    }

    pub fn has_wrapper(&self, target: Target) -> bool {
        self.state.lock().wrappers.contains_key(&target)
    }

    pub fn protect_count(&self, target: Target) -> isize {
        self.state.lock().protection.get(&target).copied().unwrap_or(0)
    }

    pub fn weak_proxies_created(&self) -> usize {
        self.state.lock().weak_proxies
    }

    pub fn strong_values_created(&self) -> usize {
        self.state.lock().strong_values
    }
}

impl Engine for FakeEngine {
    fn kind(&self, value: RawValue) -> ValueKind {
        if value.is_null() || value.bits() & 1 == 1 {
            return ValueKind::Immediate;
        }
        self.state
            .lock()
            .reprs
            .get(&value.bits())
            .map_or(ValueKind::Other, |repr| repr.kind)
    }

    fn target(&self, value: RawValue) -> Option<Target> {
        self.state
            .lock()
            .reprs
            .get(&value.bits())
            .and_then(|repr| repr.target)
    }

    fn new_weak_proxy(&self, target: Target) -> RawValue {
        self.state.lock().weak_proxies += 1;
        self.alloc(ValueKind::WeakProxy, Some(target))
    }

    fn new_strong_value(&self, target: Target) -> RawValue {
        self.state.lock().strong_values += 1;
        self.alloc(ValueKind::Container { holds_object: true }, Some(target))
    }

    fn ensure_private_wrapper(&self, target: Target) {
        self.state.lock().wrappers.entry(target).or_insert([0, 0]);
    }

    fn private_payload(&self, target: Target) -> Option<EmbedderFields> {
        self.state.lock().wrappers.get(&target).copied()
    }

    fn protect(&self, target: Target) {
        *self.state.lock().protection.entry(target).or_insert(0) += 1;
    }

    fn unprotect(&self, target: Target) {
        *self.state.lock().protection.entry(target).or_insert(0) -= 1;
    }
}

/// A marker that reports only the targets it was told about or has marked.
#[derive(Default)]
pub struct FakeMarker {
    marked: RefCell<HashSet<Target>>,
}

impl FakeMarker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_marked(targets: impl IntoIterator<Item = Target>) -> Self {
        Self {
            marked: RefCell::new(targets.into_iter().collect()),
        }
    }

    pub fn marked(&self) -> HashSet<Target> {
        self.marked.borrow().clone()
    }
}

impl Marker for FakeMarker {
    fn is_marked(&self, target: Target) -> bool {
        self.marked.borrow().contains(&target)
    }

    fn mark(&self, target: Target) {
        self.marked.borrow_mut().insert(target);
    }
}

pub fn target(bits: usize) -> Target {
    Target::new(bits).expect("non-zero target")
}

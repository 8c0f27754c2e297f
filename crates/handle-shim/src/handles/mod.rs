//! Local handle scopes.
//!
//! A [`HandleContext`] owns the block chain and allocation cursor for one
//! execution context. Scopes borrow the context, snapshot the cursor on
//! entry and restore it on drop, reclaiming every block allocated inside
//! them. Scopes must be dropped in LIFO order; anything else panics.

#![allow(missing_docs)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::elidable_lifetime_names)]
#![allow(clippy::manual_assert)]

mod local_handles;

pub use local_handles::{
    HandleBlock, HandleScopeData, HandleSlot, LocalHandles, ScopeFrame, HANDLE_BLOCK_BYTES,
    HANDLE_BLOCK_SIZE,
};

use std::cell::{Cell, UnsafeCell};
use std::collections::HashMap;
use std::marker::PhantomData;
use std::ptr::NonNull;

use crate::metrics::HandleStats;
use crate::value::{Engine, RawValue};

/// Fails fast on a foreign-API entry point this layer does not implement.
#[cold]
#[track_caller]
pub fn unsupported(entry_point: &str) -> ! {
    panic!("{entry_point} is not supported by this handle layer")
}

/// Local handle state for one execution context.
///
/// Confined to the thread that created it.
pub struct HandleContext {
    local_handles: UnsafeCell<LocalHandles>,
    _marker: PhantomData<*mut ()>,
}

impl HandleContext {
    pub fn new() -> Self {
        Self {
            local_handles: UnsafeCell::new(LocalHandles::new()),
            _marker: PhantomData,
        }
    }

    #[inline]
    pub(crate) fn local_handles_ptr(&self) -> *mut LocalHandles {
        self.local_handles.get()
    }

    /// Current scope nesting depth.
    pub fn level(&self) -> u32 {
        unsafe { (*self.local_handles_ptr()).scope_data().level }
    }

    /// Number of slots allocated across the chain.
    pub fn number_of_handles(&self) -> usize {
        // SAFETY: the context is thread-confined and no other borrow of the
        // handle store outlives a single call.
        unsafe { (*self.local_handles_ptr()).number_of_handles() }
    }

    /// Number of blocks currently in the chain.
    pub fn block_count(&self) -> usize {
        unsafe { (*self.local_handles_ptr()).block_count() }
    }

    pub fn stats(&self) -> HandleStats {
        unsafe { (*self.local_handles_ptr()).stats() }
    }

    /// Live heap values held by local handles, with reference counts.
    pub fn active_values(&self, engine: &dyn Engine) -> HashMap<RawValue, usize> {
        unsafe { (*self.local_handles_ptr()).active_values(engine) }
    }
}

impl Default for HandleContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Counts the local handles allocated in `context`.
pub fn number_of_handles(context: &HandleContext) -> usize {
    context.number_of_handles()
}

pub struct HandleScope<'env> {
    context: &'env HandleContext,
    frame: ScopeFrame,
    _marker: PhantomData<*mut ()>,
}

impl<'env> HandleScope<'env> {
    pub fn new(context: &'env HandleContext) -> Self {
        // SAFETY: We have exclusive access via the borrow of the context
        let frame = unsafe { (*context.local_handles_ptr()).enter_scope() };

        Self {
            context,
            frame,
            _marker: PhantomData,
        }
    }

    /// Stores `value` in a fresh slot of this scope.
    ///
    /// # Panics
    ///
    /// Panics unless this is the innermost open scope on its context. A slot
    /// taken while a nested scope is open would be reclaimed when that scope
    /// exits.
    #[track_caller]
    pub fn create_handle<'scope>(&'scope self, value: RawValue) -> Local<'scope> {
        if self.level() != self.context.level() {
            panic!(
                "HandleScope nesting violation: scope at level {} allocated while level {} is open",
                self.level(),
                self.context.level()
            );
        }

        let local_handles = self.context.local_handles_ptr();

        // SAFETY: We have exclusive access via the borrow of the context
        let slot = unsafe { (*local_handles).allocate() };
        unsafe {
            (*slot).set(value);
        }

        Local {
            // SAFETY: allocate never returns null
            slot: unsafe { NonNull::new_unchecked(slot) },
            _marker: PhantomData,
        }
    }

    /// Nesting level of this scope; the outermost scope is level 1.
    pub fn level(&self) -> u32 {
        self.frame.level() + 1
    }

    pub fn context(&self) -> &'env HandleContext {
        self.context
    }

    /// Deleting scope extensions is not supported.
    #[track_caller]
    pub fn delete_extensions(_context: &HandleContext) -> ! {
        unsupported("HandleScope::delete_extensions")
    }
}

impl Drop for HandleScope<'_> {
    fn drop(&mut self) {
        let local_handles = self.context.local_handles_ptr();

        // SAFETY: We have exclusive access via the borrow of the context
        unsafe {
            (*local_handles).leave_scope(&self.frame);
        }
    }
}

/// A slot in a handle scope.
#[derive(Clone, Copy)]
pub struct Local<'scope> {
    slot: NonNull<HandleSlot>,
    _marker: PhantomData<&'scope ()>,
}

impl<'scope> Local<'scope> {
    #[inline]
    pub fn value(&self) -> RawValue {
        // SAFETY: the slot lives as long as its scope
        unsafe { self.slot.as_ref().get() }
    }

    #[inline]
    pub fn set(&self, value: RawValue) {
        // SAFETY: the slot lives as long as its scope, and the context is
        // thread-confined
        unsafe { (*self.slot.as_ptr()).set(value) }
    }

    /// The slot's address.
    #[inline]
    pub fn location(&self) -> *mut HandleSlot {
        self.slot.as_ptr()
    }
}

impl std::fmt::Debug for Local<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Local").field(&self.value()).finish()
    }
}

/// A slot that may be empty.
#[derive(Clone, Copy)]
pub struct MaybeLocal<'scope> {
    slot: Option<NonNull<HandleSlot>>,
    _marker: PhantomData<&'scope ()>,
}

impl<'scope> MaybeLocal<'scope> {
    pub const fn empty() -> Self {
        Self {
            slot: None,
            _marker: PhantomData,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.slot.is_none()
    }

    pub fn to_local(self) -> Option<Local<'scope>> {
        self.slot.map(|slot| Local {
            slot,
            _marker: PhantomData,
        })
    }
}

impl<'scope> From<Local<'scope>> for MaybeLocal<'scope> {
    fn from(local: Local<'scope>) -> Self {
        Self {
            slot: Some(local.slot),
            _marker: PhantomData,
        }
    }
}

impl Default for MaybeLocal<'_> {
    fn default() -> Self {
        Self::empty()
    }
}

/// A scope that can hand exactly one value to its enclosing scope.
pub struct EscapableHandleScope<'env> {
    inner: HandleScope<'env>,
    escaped: Cell<bool>,
    escape_slot: NonNull<HandleSlot>,
}

impl<'env> EscapableHandleScope<'env> {
    /// Reserves the escape slot in the enclosing scope, then opens a new one.
    ///
    /// # Panics
    ///
    /// Panics if no scope is open on `context`.
    #[track_caller]
    pub fn new(context: &'env HandleContext) -> Self {
        let local_handles = context.local_handles_ptr();

        // Pre-allocate escape slot in parent scope
        let escape_slot = unsafe { (*local_handles).allocate() };
        unsafe {
            (*escape_slot).set(RawValue::NULL);
        }

        let inner = HandleScope::new(context);

        Self {
            inner,
            escaped: Cell::new(false),
            // SAFETY: allocate never returns null
            escape_slot: unsafe { NonNull::new_unchecked(escape_slot) },
        }
    }

    pub fn create_handle<'scope>(&'scope self, value: RawValue) -> Local<'scope> {
        self.inner.create_handle(value)
    }

    pub fn level(&self) -> u32 {
        self.inner.level()
    }

    /// The plain scope underneath, usable as the `parent` of a nested
    /// escapable scope's [`EscapableHandleScope::escape`].
    pub fn handle_scope(&self) -> &HandleScope<'env> {
        &self.inner
    }

    /// Copies `value` into the reserved slot and returns it as a handle of
    /// `parent`. An empty `value` escapes nothing.
    ///
    /// # Panics
    ///
    /// Panics when called twice, or in debug builds when `parent` is not the
    /// scope directly enclosing this one.
    #[track_caller]
    pub fn escape<'parent>(
        &self,
        parent: &'parent HandleScope<'_>,
        value: MaybeLocal<'_>,
    ) -> Option<Local<'parent>> {
        if self.escaped.get() {
            panic!("EscapableHandleScope::escape() can only be called once");
        }

        #[cfg(debug_assertions)]
        {
            if parent.level() + 1 != self.inner.level() {
                panic!("escape() called with incorrect parent scope");
            }
        }
        #[cfg(not(debug_assertions))]
        let _ = parent;

        let local = value.to_local()?;
        self.escaped.set(true);

        unsafe {
            (*self.escape_slot.as_ptr()).set(local.value());
        }

        Some(Local {
            slot: self.escape_slot,
            _marker: PhantomData,
        })
    }
}

/// Marks the current scope as closed to new handles.
///
/// Release builds compile this to a no-op guard. Debug builds additionally
/// panic when a handle is created at or below the sealed level; scopes
/// opened inside the sealed one may still allocate.
#[cfg(debug_assertions)]
pub struct SealedHandleScope<'env> {
    context: &'env HandleContext,
    prev_sealed_level: u32,
}

#[cfg(not(debug_assertions))]
pub struct SealedHandleScope<'env>(PhantomData<&'env ()>);

impl<'env> SealedHandleScope<'env> {
    #[cfg(debug_assertions)]
    pub fn new(context: &'env HandleContext) -> Self {
        let local_handles = context.local_handles_ptr();

        let prev_sealed_level = unsafe {
            let handles = &mut *local_handles;
            let scope_data = handles.scope_data_mut();
            let prev = scope_data.sealed_level;
            scope_data.sealed_level = scope_data.level;
            prev
        };

        Self {
            context,
            prev_sealed_level,
        }
    }

    #[cfg(not(debug_assertions))]
    pub fn new(_context: &'env HandleContext) -> Self {
        Self(PhantomData)
    }
}

#[cfg(debug_assertions)]
impl Drop for SealedHandleScope<'_> {
    fn drop(&mut self) {
        let local_handles = self.context.local_handles_ptr();

        unsafe {
            let handles = &mut *local_handles;
            handles.scope_data_mut().sealed_level = self.prev_sealed_level;
        }
    }
}

/// Canonicalizing scopes are not supported; only `lookup` exists, and it
/// fails fast.
pub struct CanonicalHandleScope<'env> {
    _scope: HandleScope<'env>,
}

impl<'env> CanonicalHandleScope<'env> {
    pub fn new(context: &'env HandleContext) -> Self {
        Self {
            _scope: HandleScope::new(context),
        }
    }

    #[track_caller]
    pub fn lookup(&self, _value: RawValue) -> ! {
        unsupported("CanonicalHandleScope::lookup")
    }
}

//! Values as the handle layer sees them, and the engine interfaces it calls.
//!
//! The handle layer never looks inside a value. A slot stores a [`RawValue`],
//! one machine word pointing at the engine-side representation. Everything
//! the layer needs to know about that representation is asked of the
//! [`Engine`], and reachability questions go to the collector's [`Marker`].

use std::fmt;
use std::num::NonZeroUsize;

/// Number of embedder payload words carried by a weak callback.
pub const EMBEDDER_FIELD_COUNT: usize = 2;

/// Embedder payload captured from a target's private wrapper.
pub type EmbedderFields = [usize; EMBEDDER_FIELD_COUNT];

/// The word stored in a handle slot.
///
/// Zero is the null value.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(transparent)]
pub struct RawValue(usize);

impl RawValue {
    /// The null value.
    pub const NULL: Self = Self(0);

    /// Wraps a raw word.
    #[inline]
    #[must_use]
    pub const fn from_bits(bits: usize) -> Self {
        Self(bits)
    }

    /// Wraps a pointer to an engine representation.
    #[inline]
    #[must_use]
    pub fn from_ptr<T>(ptr: *const T) -> Self {
        Self(ptr as usize)
    }

    /// The raw word.
    #[inline]
    #[must_use]
    pub const fn bits(self) -> usize {
        self.0
    }

    /// Whether this is the empty value.
    #[inline]
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Debug for RawValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RawValue({:#x})", self.0)
    }
}

/// An underlying engine object, as the collector sees it.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Target(NonZeroUsize);

impl Target {
    /// Wraps a raw engine object reference. Returns `None` for zero.
    #[inline]
    #[must_use]
    pub const fn new(bits: usize) -> Option<Self> {
        match NonZeroUsize::new(bits) {
            Some(bits) => Some(Self(bits)),
            None => None,
        }
    }

    /// The raw engine object reference.
    #[inline]
    #[must_use]
    pub const fn bits(self) -> usize {
        self.0.get()
    }
}

impl fmt::Debug for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Target({:#x})", self.0)
    }
}

/// Opaque word handed back to weak callbacks.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(transparent)]
pub struct Parameter(usize);

impl Parameter {
    /// No parameter.
    pub const NULL: Self = Self(0);

    /// Wraps a raw word.
    #[inline]
    #[must_use]
    pub const fn from_bits(bits: usize) -> Self {
        Self(bits)
    }

    /// Wraps an embedder pointer.
    #[inline]
    #[must_use]
    pub fn from_ptr<T>(ptr: *mut T) -> Self {
        Self(ptr as usize)
    }

    /// The raw word.
    #[inline]
    #[must_use]
    pub const fn bits(self) -> usize {
        self.0
    }

    /// The word as an embedder pointer.
    #[inline]
    #[must_use]
    pub fn as_ptr<T>(self) -> *mut T {
        self.0 as *mut T
    }

    /// Whether this is [`Parameter::NULL`].
    #[inline]
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Debug for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Parameter({:#x})", self.0)
    }
}

/// What kind of representation a [`RawValue`] points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    /// Not a heap object (small integer or null word).
    Immediate,
    /// A heap primitive (string, number box, ...).
    Primitive,
    /// A strong value or array-buffer container.
    Container {
        /// Whether the contained engine value is an object.
        holds_object: bool,
    },
    /// A weak proxy created by [`Engine::new_weak_proxy`].
    WeakProxy,
    /// Any other heap object.
    Other,
}

impl ValueKind {
    /// Whether the representation lives on the engine heap.
    #[inline]
    #[must_use]
    pub const fn is_heap_object(self) -> bool {
        !matches!(self, Self::Immediate)
    }

    /// Whether `make_weak` replaces the representation with a weak proxy.
    #[inline]
    #[must_use]
    pub const fn is_wrappable(self) -> bool {
        matches!(self, Self::Container { holds_object: true })
    }
}

/// The underlying engine, as far as the handle layer needs it.
///
/// Implemented by the embedder. All calls are synchronous and must not call
/// back into the handle table.
pub trait Engine: Send + Sync {
    /// Classifies a stored representation.
    fn kind(&self, value: RawValue) -> ValueKind;

    /// The engine object behind a container or weak proxy.
    fn target(&self, value: RawValue) -> Option<Target>;

    /// Allocates a weak proxy representation for `target`.
    fn new_weak_proxy(&self, target: Target) -> RawValue;

    /// Allocates a strong container representation for `target`.
    fn new_strong_value(&self, target: Target) -> RawValue;

    /// Makes sure `target` has a private wrapper to carry embedder payload.
    fn ensure_private_wrapper(&self, target: Target);

    /// Embedder payload stored in `target`'s private wrapper, if it has one.
    fn private_payload(&self, target: Target) -> Option<EmbedderFields>;

    /// Keeps `target` alive regardless of reachability.
    fn protect(&self, target: Target);

    /// Releases a protection taken with [`Engine::protect`].
    fn unprotect(&self, target: Target);
}

/// The collector's view of reachability during a mark phase.
pub trait Marker {
    /// Whether `target` has been marked reachable.
    fn is_marked(&self, target: Target) -> bool;

    /// Marks `target` reachable.
    fn mark(&self, target: Target);
}

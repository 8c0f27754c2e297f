//! Handle management for an embedding-API compatibility layer.
//!
//! `handle-shim` gives native code the two kinds of handle an embedding API
//! expects, on top of an engine that has its own garbage collector:
//!
//! - **Local handles** live in stack-disciplined [`HandleScope`]s. Slots come
//!   from fixed-size blocks chained per context, and a scope reclaims every
//!   block it allocated when it is dropped.
//! - **Global handles** live in a [`GlobalHandles`] table of 64-slot node
//!   blocks. A slot's address is stable for as long as the handle lives, and
//!   a handle can be weakened so the collector may reclaim its value and run
//!   two-pass finalization callbacks.
//!
//! The layer never looks inside values. It asks the embedder's [`Engine`]
//! what a stored word is, and the collector reaches the table through
//! [`CollectorHooks`].
//!
//! # Quick Start
//!
//! ```
//! use handle_shim::{HandleContext, HandleScope, RawValue};
//!
//! let context = HandleContext::new();
//! {
//!     let scope = HandleScope::new(&context);
//!     let local = scope.create_handle(RawValue::from_bits(0x1000));
//!     assert_eq!(local.value(), RawValue::from_bits(0x1000));
//!     assert_eq!(context.number_of_handles(), 1);
//! }
//! assert_eq!(context.number_of_handles(), 0);
//! ```
//!
//! # Thread Safety
//!
//! A [`HandleContext`] and its scopes are `!Send` and `!Sync`. A
//! [`GlobalHandles`] table takes `&mut self` for every mutation; share one
//! between threads through [`SharedGlobalHandles`].

#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

mod metrics;

/// Global handle table and collector hooks.
pub mod global;

/// Local handle scopes.
pub mod handles;

/// Structured logging helpers, active with the `tracing` feature.
pub mod tracing;

/// Stored values and the engine interfaces.
pub mod value;

// Re-export public API
pub use global::{
    CollectorHooks, GlobalHandle, GlobalHandles, NodeState, PendingSecondPass, ReadySecondPasses,
    ReadyToDie, RootSet, SharedGlobalHandles, WeakCallback, WeakCallbackInfo, WeakCallbackType,
};
pub use handles::{
    number_of_handles, EscapableHandleScope, HandleContext, HandleScope, Local, MaybeLocal,
    SealedHandleScope,
};
pub use metrics::HandleStats;
pub use value::{Engine, Marker, Parameter, RawValue, Target, ValueKind};

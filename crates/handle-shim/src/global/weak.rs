//! Weak callbacks and the second-pass finalization queue.
//!
//! Finalization runs in two passes. The first pass sees the dying target's
//! embedder payload and may register a second-pass callback; the second pass
//! runs later, after every first pass of the cycle, with only the parameter
//! and the payload captured when it was queued.

#![allow(missing_docs)]

use std::fmt;
use std::sync::Arc;

use crossbeam_queue::SegQueue;

use crate::tracing::internal::log_second_pass;
use crate::value::{EmbedderFields, Parameter, Target};

/// A weak callback. Called once per pass it was registered for.
pub type WeakCallback = fn(&mut WeakCallbackInfo<'_>);

/// What a weak callback receives besides its parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum WeakCallbackType {
    /// Parameter only.
    #[default]
    Parameter,
    /// Parameter plus the two embedder fields of the target's wrapper.
    InternalFields,
}

/// Arguments to a weak callback.
pub struct WeakCallbackInfo<'a> {
    parameter: Parameter,
    embedder_fields: EmbedderFields,
    second_pass: Option<&'a mut Option<WeakCallback>>,
}

impl<'a> WeakCallbackInfo<'a> {
    pub(crate) fn first_pass(
        parameter: Parameter,
        embedder_fields: EmbedderFields,
        second_pass: &'a mut Option<WeakCallback>,
    ) -> Self {
        Self {
            parameter,
            embedder_fields,
            second_pass: Some(second_pass),
        }
    }

    pub(crate) const fn second_pass(parameter: Parameter, embedder_fields: EmbedderFields) -> Self {
        Self {
            parameter,
            embedder_fields,
            second_pass: None,
        }
    }

    #[must_use]
    pub const fn parameter(&self) -> Parameter {
        self.parameter
    }

    /// Embedder field `index` (0 or 1).
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of range.
    #[must_use]
    pub const fn embedder_field(&self, index: usize) -> usize {
        self.embedder_fields[index]
    }

    #[must_use]
    pub const fn embedder_fields(&self) -> EmbedderFields {
        self.embedder_fields
    }

    #[must_use]
    pub const fn is_first_pass(&self) -> bool {
        self.second_pass.is_some()
    }

    /// Asks for `callback` to run in the second pass.
    ///
    /// # Panics
    ///
    /// Panics when called from a second-pass callback.
    #[track_caller]
    pub fn set_second_pass_callback(&mut self, callback: WeakCallback) {
        match self.second_pass.as_deref_mut() {
            Some(slot) => *slot = Some(callback),
            None => panic!("a second-pass callback cannot register another pass"),
        }
    }
}

impl fmt::Debug for WeakCallbackInfo<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakCallbackInfo")
            .field("parameter", &self.parameter)
            .field("embedder_fields", &self.embedder_fields)
            .field("first_pass", &self.is_first_pass())
            .finish()
    }
}

/// A second-pass callback waiting to run.
#[derive(Clone)]
pub struct PendingSecondPass {
    pub(crate) callback: WeakCallback,
    pub(crate) parameter: Parameter,
    pub(crate) embedder_fields: EmbedderFields,
    pub(crate) target: Option<Target>,
}

impl PendingSecondPass {
    #[must_use]
    pub const fn parameter(&self) -> Parameter {
        self.parameter
    }

    #[must_use]
    pub const fn embedder_fields(&self) -> EmbedderFields {
        self.embedder_fields
    }

    /// The target whose first pass queued this callback.
    #[must_use]
    pub const fn target(&self) -> Option<Target> {
        self.target
    }

    /// Runs the callback. Consumes the entry, so it runs at most once.
    pub fn invoke(self) {
        let mut info = WeakCallbackInfo::second_pass(self.parameter, self.embedder_fields);
        (self.callback)(&mut info);
    }
}

impl fmt::Debug for PendingSecondPass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingSecondPass")
            .field("parameter", &self.parameter)
            .field("embedder_fields", &self.embedder_fields)
            .field("target", &self.target)
            .finish_non_exhaustive()
    }
}

/// Second passes whose targets the engine has finalized.
///
/// A cloneable handle onto a lock-free queue. The table pushes entries when
/// it is told a target was finalized; the collector can drain them from any
/// thread without holding the table.
#[derive(Clone, Default)]
pub struct ReadySecondPasses {
    queue: Arc<SegQueue<PendingSecondPass>>,
}

impl ReadySecondPasses {
    pub(crate) fn push(&self, pending: PendingSecondPass) {
        self.queue.push(pending);
    }

    #[must_use]
    pub fn pop(&self) -> Option<PendingSecondPass> {
        self.queue.pop()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Runs every queued callback. Returns how many ran.
    pub fn run_all(&self) -> usize {
        let mut ran = 0;
        while let Some(pending) = self.queue.pop() {
            pending.invoke();
            ran += 1;
        }
        log_second_pass(ran);
        ran
    }
}

impl fmt::Debug for ReadySecondPasses {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadySecondPasses")
            .field("len", &self.queue.len())
            .finish()
    }
}

//! Global handle node layout and flag encoding.
//!
//! Native code compiled against the foreign API reads the class id and flags
//! straight out of a node, so the field order and offsets are fixed.

#![allow(missing_docs)]

use std::fmt;

use crate::global::weak::{WeakCallback, WeakCallbackType};
use crate::value::{EmbedderFields, Parameter, RawValue, EMBEDDER_FIELD_COUNT};

/// Mask of the state bits in [`Node::flags`].
pub const NODE_STATE_MASK: u8 = 0x7;
pub const NODE_STATE_IS_WEAK: u8 = 2;
pub const NODE_STATE_IS_PENDING: u8 = 3;
pub const NODE_STATE_IS_NEAR_DEATH: u8 = 4;
pub const NODE_IS_INDEPENDENT_SHIFT: u8 = 3;
pub const NODE_IS_ACTIVE_SHIFT: u8 = 4;

/// Byte offset of the class id within a node.
pub const NODE_CLASS_ID_OFFSET: usize = std::mem::size_of::<usize>();
/// Byte offset of the flags within a node.
pub const NODE_FLAGS_OFFSET: usize = std::mem::size_of::<usize>() + 3;

pub(crate) const ACTIVE_BIT: u8 = 1 << NODE_IS_ACTIVE_SHIFT;
pub(crate) const ACTIVE_WEAK_MASK: u8 = NODE_STATE_MASK | ACTIVE_BIT;
pub(crate) const ACTIVE_WEAK: u8 = NODE_STATE_IS_WEAK | ACTIVE_BIT;
#[cfg(test)]
pub(crate) const ACTIVE_NEAR_DEATH: u8 = NODE_STATE_IS_NEAR_DEATH | ACTIVE_BIT;

/// Reference state of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    /// Holds its value strongly.
    Strong,
    /// Does not keep its value alive.
    Weak,
    /// Reserved by the foreign ABI; never entered by this layer.
    Pending,
    /// The collector found the value unreachable; finalizers are due.
    NearDeath,
}

impl NodeState {
    #[must_use]
    pub const fn from_flags(flags: u8) -> Self {
        match flags & NODE_STATE_MASK {
            NODE_STATE_IS_WEAK => Self::Weak,
            NODE_STATE_IS_PENDING => Self::Pending,
            NODE_STATE_IS_NEAR_DEATH => Self::NearDeath,
            _ => Self::Strong,
        }
    }
}

/// One global handle slot.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct Node {
    pub(crate) value: RawValue,
    pub(crate) class_id: u16,
    pub(crate) index: u8,
    pub(crate) flags: u8,
    _reserved: [u8; std::mem::size_of::<usize>() - 4],
    pub(crate) weak_callback: Option<WeakCallback>,
    pub(crate) second_pass_callback: Option<WeakCallback>,
    pub(crate) parameter: Parameter,
    pub(crate) embedder_fields: EmbedderFields,
    pub(crate) callback_type: WeakCallbackType,
}

impl Node {
    pub(crate) const EMPTY: Self = Self {
        value: RawValue::NULL,
        class_id: 0,
        index: 0,
        flags: 0,
        _reserved: [0; std::mem::size_of::<usize>() - 4],
        weak_callback: None,
        second_pass_callback: None,
        parameter: Parameter::NULL,
        embedder_fields: [0; EMBEDDER_FIELD_COUNT],
        callback_type: WeakCallbackType::Parameter,
    };

    /// A zeroed node stamped with its slot index and holding `value`.
    pub(crate) const fn new(index: u8, value: RawValue) -> Self {
        let mut node = Self::EMPTY;
        node.index = index;
        node.value = value;
        node
    }

    #[inline]
    #[must_use]
    pub const fn value(&self) -> RawValue {
        self.value
    }

    #[inline]
    #[must_use]
    pub const fn class_id(&self) -> u16 {
        self.class_id
    }

    #[inline]
    #[must_use]
    pub const fn index(&self) -> u8 {
        self.index
    }

    #[inline]
    #[must_use]
    pub const fn flags(&self) -> u8 {
        self.flags
    }

    #[inline]
    #[must_use]
    pub const fn state(&self) -> NodeState {
        NodeState::from_flags(self.flags)
    }

    #[inline]
    #[must_use]
    pub const fn is_weak(&self) -> bool {
        matches!(self.state(), NodeState::Weak)
    }

    #[inline]
    #[must_use]
    pub const fn is_near_death(&self) -> bool {
        matches!(self.state(), NodeState::NearDeath)
    }

    /// Whether the node takes part in incremental marking.
    #[inline]
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.flags & ACTIVE_BIT != 0
    }

    #[inline]
    #[must_use]
    pub const fn is_independent(&self) -> bool {
        self.flags & (1 << NODE_IS_INDEPENDENT_SHIFT) != 0
    }

    #[inline]
    #[must_use]
    pub const fn parameter(&self) -> Parameter {
        self.parameter
    }

    #[inline]
    #[must_use]
    pub const fn callback_type(&self) -> WeakCallbackType {
        self.callback_type
    }

    #[inline]
    #[must_use]
    pub const fn has_weak_callback(&self) -> bool {
        self.weak_callback.is_some()
    }

    #[inline]
    #[must_use]
    pub const fn has_second_pass_callback(&self) -> bool {
        self.second_pass_callback.is_some()
    }

    #[inline]
    #[must_use]
    pub const fn embedder_fields(&self) -> EmbedderFields {
        self.embedder_fields
    }

    #[inline]
    pub(crate) const fn set_state(&mut self, state: u8) {
        self.flags = (self.flags & !NODE_STATE_MASK) | state;
    }

    #[inline]
    pub(crate) const fn masked_flags(&self) -> u8 {
        self.flags & ACTIVE_WEAK_MASK
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("value", &self.value)
            .field("class_id", &self.class_id)
            .field("index", &self.index)
            .field("state", &self.state())
            .field("active", &self.is_active())
            .field("parameter", &self.parameter)
            .field("weak_callback", &self.weak_callback.is_some())
            .field("second_pass_callback", &self.second_pass_callback.is_some())
            .field("callback_type", &self.callback_type)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_abi_offsets() {
        assert_eq!(std::mem::offset_of!(Node, value), 0);
        assert_eq!(std::mem::offset_of!(Node, class_id), NODE_CLASS_ID_OFFSET);
        assert_eq!(std::mem::offset_of!(Node, flags), NODE_FLAGS_OFFSET);
        assert_eq!(
            std::mem::offset_of!(Node, weak_callback),
            2 * std::mem::size_of::<usize>()
        );
    }

    #[test]
    fn test_node_new_is_strong() {
        let node = Node::new(17, RawValue::from_bits(0x80));
        assert_eq!(node.index(), 17);
        assert_eq!(node.value(), RawValue::from_bits(0x80));
        assert_eq!(node.state(), NodeState::Strong);
        assert!(!node.is_active());
        assert!(!node.has_weak_callback());
        assert!(node.parameter().is_null());
    }

    #[test]
    fn test_set_state_keeps_other_bits() {
        let mut node = Node::EMPTY;
        node.flags = ACTIVE_BIT | (1 << NODE_IS_INDEPENDENT_SHIFT);

        node.set_state(NODE_STATE_IS_WEAK);
        assert!(node.is_weak());
        assert!(node.is_active());
        assert!(node.is_independent());
        assert_eq!(node.masked_flags(), ACTIVE_WEAK);

        node.set_state(NODE_STATE_IS_NEAR_DEATH);
        assert!(node.is_near_death());
        assert_eq!(node.masked_flags(), ACTIVE_NEAR_DEATH);
    }

    #[test]
    fn test_state_from_flags() {
        assert_eq!(NodeState::from_flags(0), NodeState::Strong);
        assert_eq!(NodeState::from_flags(2), NodeState::Weak);
        assert_eq!(NodeState::from_flags(3), NodeState::Pending);
        assert_eq!(NodeState::from_flags(4 | ACTIVE_BIT), NodeState::NearDeath);
        assert_eq!(NodeState::from_flags(7), NodeState::Strong);
    }
}

//! Node blocks and the arena that owns them.
//!
//! Every live block sits on exactly one of two intrusive lists threaded
//! through the arena by [`BlockId`]: *available* blocks have at least one
//! free slot, *used* blocks have none. A block whose slots are all free is
//! removed from the arena at once.

use std::fmt;

use crate::global::node::Node;

/// Slots per node block. One bit of the occupancy bitmap per slot.
pub const NODES_PER_BLOCK: usize = 64;

/// Bitmap of a block with every slot free.
pub const ALL_FREE: u64 = u64::MAX;

/// Generational index of a block in the arena.
///
/// The generation changes every time an arena entry is vacated, so ids of
/// released blocks never resolve to a later block in the same entry.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockId {
    index: u32,
    generation: u32,
}

impl BlockId {
    /// Slot in the arena.
    #[must_use]
    pub const fn index(self) -> u32 {
        self.index
    }

    /// Bumped each time the slot is released.
    #[must_use]
    pub const fn generation(self) -> u32 {
        self.generation
    }
}

impl fmt::Debug for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockId({}v{})", self.index, self.generation)
    }
}

/// Which list a block is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListKind {
    /// At least one free slot.
    Available,
    /// No free slots.
    Used,
}

/// 64 global handle nodes and their occupancy bitmap (1 = free).
pub struct NodeBlock {
    pub(crate) bitmap: u64,
    pub(crate) nodes: [Node; NODES_PER_BLOCK],
    list: ListKind,
    prev: Option<BlockId>,
    next: Option<BlockId>,
}

impl NodeBlock {
    fn new() -> Box<Self> {
        Box::new(Self {
            bitmap: ALL_FREE,
            nodes: [Node::EMPTY; NODES_PER_BLOCK],
            list: ListKind::Available,
            prev: None,
            next: None,
        })
    }

    /// Occupancy bitmap, 1 = free.
    #[inline]
    #[must_use]
    pub const fn bitmap(&self) -> u64 {
        self.bitmap
    }

    /// List the block is currently on.
    #[inline]
    #[must_use]
    pub const fn list(&self) -> ListKind {
        self.list
    }

    /// Number of occupied slots.
    #[inline]
    #[must_use]
    pub const fn live_count(&self) -> u32 {
        self.bitmap.count_zeros()
    }

    /// No free slots.
    #[inline]
    #[must_use]
    pub const fn is_full(&self) -> bool {
        self.bitmap == 0
    }

    /// No occupied slots.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.bitmap == ALL_FREE
    }

    /// Whether slot `index` holds a node.
    #[inline]
    #[must_use]
    pub const fn is_occupied(&self, index: u8) -> bool {
        (index as usize) < NODES_PER_BLOCK && self.bitmap & (1 << index) == 0
    }

    /// Indices of occupied slots, lowest first.
    pub fn occupied(&self) -> impl Iterator<Item = u8> {
        let mut bits = !self.bitmap;
        std::iter::from_fn(move || {
            if bits == 0 {
                return None;
            }
            #[allow(clippy::cast_possible_truncation)]
            let index = bits.trailing_zeros() as u8;
            bits &= bits - 1;
            Some(index)
        })
    }
}

impl fmt::Debug for NodeBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeBlock")
            .field("bitmap", &format_args!("{:#018x}", self.bitmap))
            .field("list", &self.list)
            .field("prev", &self.prev)
            .field("next", &self.next)
            .finish_non_exhaustive()
    }
}

struct Entry {
    generation: u32,
    block: Option<Box<NodeBlock>>,
}

#[derive(Debug, Default, Clone, Copy)]
struct ListHead {
    first: Option<BlockId>,
    len: usize,
}

/// Owner of every node block of one table.
#[derive(Default)]
pub(crate) struct BlockArena {
    entries: Vec<Entry>,
    vacant: Vec<u32>,
    available: ListHead,
    used: ListHead,
}

impl BlockArena {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Allocates an empty block at the head of the available list.
    pub(crate) fn insert(&mut self) -> BlockId {
        let id = if let Some(index) = self.vacant.pop() {
            let entry = &mut self.entries[index as usize];
            entry.block = Some(NodeBlock::new());
            BlockId {
                index,
                generation: entry.generation,
            }
        } else {
            let index = u32::try_from(self.entries.len())
                .unwrap_or_else(|_| panic!("global handle arena exhausted"));
            self.entries.push(Entry {
                generation: 0,
                block: Some(NodeBlock::new()),
            });
            BlockId {
                index,
                generation: 0,
            }
        };
        self.push_front(id, ListKind::Available);
        id
    }

    pub(crate) fn get(&self, id: BlockId) -> Option<&NodeBlock> {
        self.entries
            .get(id.index as usize)
            .filter(|entry| entry.generation == id.generation)
            .and_then(|entry| entry.block.as_deref())
    }

    pub(crate) fn get_mut(&mut self, id: BlockId) -> Option<&mut NodeBlock> {
        self.entries
            .get_mut(id.index as usize)
            .filter(|entry| entry.generation == id.generation)
            .and_then(|entry| entry.block.as_deref_mut())
    }

    #[track_caller]
    pub(crate) fn block_mut(&mut self, id: BlockId) -> &mut NodeBlock {
        match self.get_mut(id) {
            Some(block) => block,
            None => panic!("global handle refers to released block {id:?}"),
        }
    }

    /// The occupied node at `index` of block `id`.
    ///
    /// # Panics
    ///
    /// Panics if the block was released or the slot is free.
    #[track_caller]
    pub(crate) fn node(&self, id: BlockId, index: u8) -> &Node {
        let Some(block) = self.get(id) else {
            panic!("global handle refers to released block {id:?}");
        };
        if !block.is_occupied(index) {
            panic!("global handle slot {index} of {id:?} is not in use");
        }
        &block.nodes[index as usize]
    }

    /// Mutable form of [`BlockArena::node`].
    #[track_caller]
    pub(crate) fn node_mut(&mut self, id: BlockId, index: u8) -> &mut Node {
        let Some(block) = self.get_mut(id) else {
            panic!("global handle refers to released block {id:?}");
        };
        if !block.is_occupied(index) {
            panic!("global handle slot {index} of {id:?} is not in use");
        }
        &mut block.nodes[index as usize]
    }

    /// Unlinks and frees block `id`, invalidating every id that names it.
    pub(crate) fn remove(&mut self, id: BlockId) -> Option<Box<NodeBlock>> {
        self.get(id)?;
        self.unlink(id);
        let entry = &mut self.entries[id.index as usize];
        let block = entry.block.take();
        entry.generation = entry.generation.wrapping_add(1);
        self.vacant.push(id.index);
        block
    }

    /// Moves block `id` to the head of `list`.
    pub(crate) fn move_to(&mut self, id: BlockId, list: ListKind) {
        if self.get(id).is_some_and(|block| block.list != list) {
            self.unlink(id);
            self.push_front(id, list);
        }
    }

    pub(crate) const fn first_available(&self) -> Option<BlockId> {
        self.available.first
    }

    /// Ids of every live block: the used list first, then the available one.
    pub(crate) fn ids(&self) -> Vec<BlockId> {
        let mut ids = Vec::with_capacity(self.len());
        for head in [self.used, self.available] {
            let mut cursor = head.first;
            while let Some(id) = cursor {
                ids.push(id);
                cursor = self.get(id).and_then(|block| block.next);
            }
        }
        ids
    }

    /// Frees every block. Returns how many were freed.
    pub(crate) fn clear(&mut self) -> usize {
        let ids = self.ids();
        for &id in &ids {
            self.remove(id);
        }
        ids.len()
    }

    pub(crate) const fn len(&self) -> usize {
        self.available.len + self.used.len
    }

    pub(crate) const fn list_len(&self, list: ListKind) -> usize {
        match list {
            ListKind::Available => self.available.len,
            ListKind::Used => self.used.len,
        }
    }

    fn head_mut(&mut self, list: ListKind) -> &mut ListHead {
        match list {
            ListKind::Available => &mut self.available,
            ListKind::Used => &mut self.used,
        }
    }

    fn unlink(&mut self, id: BlockId) {
        let Some(block) = self.get_mut(id) else {
            return;
        };
        let list = block.list;
        let prev = block.prev.take();
        let next = block.next.take();

        match prev {
            Some(prev) => {
                if let Some(block) = self.get_mut(prev) {
                    block.next = next;
                }
            }
            None => self.head_mut(list).first = next,
        }
        if let Some(block) = next.and_then(|next| self.get_mut(next)) {
            block.prev = prev;
        }
        self.head_mut(list).len -= 1;
    }

    fn push_front(&mut self, id: BlockId, list: ListKind) {
        let head = self.head_mut(list);
        let old_first = head.first.replace(id);
        head.len += 1;

        if let Some(block) = old_first.and_then(|first| self.get_mut(first)) {
            block.prev = Some(id);
        }
        if let Some(block) = self.get_mut(id) {
            block.list = list;
            block.prev = None;
            block.next = old_first;
        }
    }
}

impl fmt::Debug for BlockArena {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockArena")
            .field("available", &self.available.len)
            .field("used", &self.used.len)
            .field("vacant", &self.vacant.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn walk(arena: &BlockArena, list: ListKind) -> Vec<BlockId> {
        arena
            .ids()
            .into_iter()
            .filter(|&id| arena.get(id).map(NodeBlock::list) == Some(list))
            .collect()
    }

    #[test]
    fn test_insert_joins_available() {
        let mut arena = BlockArena::new();
        let a = arena.insert();
        let b = arena.insert();

        assert_eq!(arena.first_available(), Some(b));
        assert_eq!(walk(&arena, ListKind::Available), vec![b, a]);
        assert_eq!(arena.list_len(ListKind::Available), 2);
        assert_eq!(arena.list_len(ListKind::Used), 0);
        assert!(arena.get(a).is_some_and(NodeBlock::is_empty));
    }

    #[test]
    fn test_move_between_lists() {
        let mut arena = BlockArena::new();
        let a = arena.insert();
        let b = arena.insert();
        let c = arena.insert();

        arena.move_to(b, ListKind::Used);
        assert_eq!(walk(&arena, ListKind::Available), vec![c, a]);
        assert_eq!(walk(&arena, ListKind::Used), vec![b]);
        assert_eq!(arena.ids(), vec![b, c, a]);

        // Moving to the list a block is already on changes nothing.
        arena.move_to(b, ListKind::Used);
        assert_eq!(arena.list_len(ListKind::Used), 1);

        arena.move_to(b, ListKind::Available);
        assert_eq!(walk(&arena, ListKind::Available), vec![b, c, a]);
        assert_eq!(arena.list_len(ListKind::Used), 0);
    }

    #[test]
    fn test_remove_invalidates_id() {
        let mut arena = BlockArena::new();
        let a = arena.insert();
        let b = arena.insert();

        assert!(arena.remove(a).is_some());
        assert!(arena.get(a).is_none());
        assert!(arena.remove(a).is_none());
        assert_eq!(arena.ids(), vec![b]);

        // The vacated entry is reused under a new generation.
        let c = arena.insert();
        assert_eq!(c.index(), a.index());
        assert_ne!(c.generation(), a.generation());
        assert!(arena.get(a).is_none());
        assert!(arena.get(c).is_some());
    }

    #[test]
    fn test_remove_middle_keeps_links() {
        let mut arena = BlockArena::new();
        let a = arena.insert();
        let b = arena.insert();
        let c = arena.insert();

        arena.remove(b);
        assert_eq!(walk(&arena, ListKind::Available), vec![c, a]);
        arena.remove(c);
        assert_eq!(arena.first_available(), Some(a));
        arena.remove(a);
        assert_eq!(arena.first_available(), None);
        assert_eq!(arena.len(), 0);
    }

    #[test]
    fn test_clear_counts_blocks() {
        let mut arena = BlockArena::new();
        let a = arena.insert();
        let _ = arena.insert();
        arena.move_to(a, ListKind::Used);

        assert_eq!(arena.clear(), 2);
        assert_eq!(arena.len(), 0);
        assert!(arena.ids().is_empty());
    }

    #[test]
    fn test_occupied_iterates_clear_bits() {
        let mut arena = BlockArena::new();
        let id = arena.insert();
        let block = arena.get_mut(id).unwrap();
        block.bitmap = !((1 << 0) | (1 << 5) | (1 << 63));

        assert_eq!(block.occupied().collect::<Vec<_>>(), vec![0, 5, 63]);
        assert_eq!(block.live_count(), 3);
        assert!(block.is_occupied(5));
        assert!(!block.is_occupied(6));
        assert!(!block.is_occupied(64));
    }

    #[test]
    #[should_panic(expected = "not in use")]
    fn test_node_on_free_slot_panics() {
        let mut arena = BlockArena::new();
        let id = arena.insert();
        let _ = arena.node(id, 3);
    }
}

//! Per-page lookup index: 24-bit item-identity hash → entry slot.
//!
//! The list is rebuilt from flash on every page load and never persisted.
//! Nodes are packed four bytes each into 128-byte blocks so a fully loaded
//! page costs at most five blocks.

use crate::item::Item;
use crate::u24::u24;
use alloc::vec::Vec;

/// Slot value marking an invalidated node.
const INVALID_SLOT: u8 = 0xFF;

/// Nodes per block: 128 bytes minus the length word.
const BLOCK_CAPACITY: usize = (128 - core::mem::size_of::<usize>()) / core::mem::size_of::<Node>();

#[derive(Copy, Clone)]
struct Node {
    slot: u8,
    hash: u24,
}

impl Node {
    fn is_valid(&self) -> bool {
        self.slot != INVALID_SLOT
    }

    fn matches(&self, start_slot: u8, hash: u24) -> bool {
        self.is_valid() && self.hash == hash && self.slot >= start_slot
    }
}

struct Block {
    count: usize,
    nodes: [Node; BLOCK_CAPACITY],
}

impl Block {
    fn new() -> Block {
        Block { count: 0, nodes: [Node { slot: INVALID_SLOT, hash: u24::from_u32(0) }; BLOCK_CAPACITY] }
    }

    fn add(&mut self, slot: u8, hash: u24) -> bool {
        if self.count >= BLOCK_CAPACITY {
            return false;
        }
        self.nodes[self.count] = Node { slot, hash };
        self.count += 1;
        true
    }
}

#[derive(Default)]
pub(crate) struct HashList {
    blocks: Vec<Block>,
}

impl HashList {
    pub fn new() -> HashList {
        HashList { blocks: Vec::new() }
    }

    /// Appends `item`'s identity hash for `slot`.
    pub fn insert(&mut self, item: &Item, slot: u8) {
        let hash = item.calculate_hash();
        if let Some(block) = self.blocks.last_mut()
            && block.add(slot, hash)
        {
            return;
        }
        let mut block = Block::new();
        block.add(slot, hash);
        self.blocks.push(block);
    }

    /// Invalidates the node for `slot`; a block left without valid nodes is
    /// dropped.
    pub fn erase(&mut self, slot: u8) {
        let mut block_index = 0;
        while block_index < self.blocks.len() {
            let block = &mut self.blocks[block_index];
            let mut found = false;
            let mut have_entries = false;
            for node in block.nodes[..block.count].iter_mut() {
                if node.slot == slot {
                    node.slot = INVALID_SLOT;
                    found = true;
                }
                if node.is_valid() {
                    have_entries = true;
                }
            }
            if !have_entries {
                self.blocks.remove(block_index);
            } else {
                block_index += 1;
            }
            if found {
                return;
            }
        }
    }

    /// First slot `>= start_slot` whose node matches `hash`, or `None`.
    /// Candidates still need full verification against the entry on flash.
    pub fn find_hash(&self, start_slot: u8, hash: u24) -> Option<u8> {
        self.blocks
            .iter()
            .flat_map(|block| block.nodes[..block.count].iter())
            .find(|node| node.matches(start_slot, hash))
            .map(|node| node.slot)
    }
}

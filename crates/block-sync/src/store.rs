//! The in-memory block store for one open page.
//!
//! `BlockStore` is a cheap cloneable handle; every component that reads or
//! writes the page holds a clone. Each operation takes the lock once and
//! never holds it across an `.await`.

use crate::block::{Block, BlockId};
use crate::tree::{self, Move};
use std::collections::HashSet;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Clone, Default)]
pub struct BlockStore {
    blocks: Arc<RwLock<Vec<Block>>>,
}

impl BlockStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_blocks(blocks: Vec<Block>) -> Self {
        Self {
            blocks: Arc::new(RwLock::new(blocks)),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<Block>> {
        self.blocks.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<Block>> {
        self.blocks.write().unwrap_or_else(|e| e.into_inner())
    }

    pub fn replace_all(&self, blocks: Vec<Block>) {
        *self.write() = blocks;
    }

    /// Snapshot of every block.
    pub fn get_all(&self) -> Vec<Block> {
        self.read().clone()
    }

    pub fn get(&self, id: &BlockId) -> Option<Block> {
        self.read().iter().find(|b| &b.id == id).cloned()
    }

    pub fn contains(&self, id: &BlockId) -> bool {
        self.read().iter().any(|b| &b.id == id)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Replace every block with `f(block)`.
    pub fn map_transform(&self, mut f: impl FnMut(&Block) -> Block) {
        let mut blocks = self.write();
        for block in blocks.iter_mut() {
            *block = f(block);
        }
    }

    /// Mutate one block in place. Returns false if it is not in the store.
    pub fn update(&self, id: &BlockId, f: impl FnOnce(&mut Block)) -> bool {
        let mut blocks = self.write();
        match blocks.iter_mut().find(|b| &b.id == id) {
            Some(block) => {
                f(block);
                true
            }
            None => false,
        }
    }

    /// Put `block` in place of the stored block with the same id.
    pub fn replace(&self, block: Block) -> bool {
        let id = block.id.clone();
        self.update(&id, |stored| *stored = block)
    }

    pub fn append(&self, block: Block) {
        self.write().push(block);
    }

    /// Remove the given ids, returning the removed blocks.
    pub fn remove(&self, ids: &HashSet<BlockId>) -> Vec<Block> {
        let mut blocks = self.write();
        let (removed, kept): (Vec<Block>, Vec<Block>) =
            blocks.drain(..).partition(|b| ids.contains(&b.id));
        *blocks = kept;
        removed
    }

    /// Apply a reorder batch. Returns how many blocks changed.
    pub fn apply_moves(&self, moves: &[Move]) -> usize {
        tree::apply_moves(&mut self.write(), moves)
    }

    pub fn children(&self, parent: Option<&BlockId>) -> Vec<Block> {
        let blocks = self.read();
        tree::children(&blocks, parent).into_iter().cloned().collect()
    }

    pub fn document_order(&self) -> Vec<BlockId> {
        tree::document_order(&self.read())
    }

    pub fn descendant_ids(&self, id: &BlockId) -> HashSet<BlockId> {
        tree::descendant_ids(&self.read(), id)
    }

    pub fn check_invariants(&self) -> Result<(), tree::TreeError> {
        tree::check_invariants(&self.read())
    }
}

impl std::fmt::Debug for BlockStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockStore")
            .field("blocks", &self.len())
            .finish()
    }
}

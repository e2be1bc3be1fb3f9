//! Read helpers over a snapshot of a page's blocks.
//!
//! Blocks form a forest through `parent_id`. Siblings are ordered by
//! `sort`; ties keep snapshot order.

use crate::block::{Block, BlockId};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use thiserror::Error;

/// One `(parent, sort)` assignment in a reorder batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Move {
    pub id: BlockId,
    pub parent_id: Option<BlockId>,
    pub sort: u32,
}

/// A violated tree invariant.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TreeError {
    #[error("duplicate block id {0}")]
    DuplicateId(BlockId),

    #[error("block {0} is its own ancestor")]
    Cycle(BlockId),

    #[error("block {id} points at missing parent {parent}")]
    MissingParent { id: BlockId, parent: BlockId },

    #[error("children of {parent:?} have sorts {found:?}, expected 0..{}", found.len())]
    SortGap {
        parent: Option<BlockId>,
        found: Vec<u32>,
    },
}

/// Children grouped by parent, each list ordered by `sort`.
pub struct ChildIndex<'a> {
    children: HashMap<Option<BlockId>, Vec<&'a Block>>,
}

impl<'a> ChildIndex<'a> {
    pub fn new(blocks: &'a [Block]) -> Self {
        let mut children: HashMap<Option<BlockId>, Vec<&'a Block>> = HashMap::new();
        for block in blocks {
            children
                .entry(block.parent_id.clone())
                .or_default()
                .push(block);
        }
        for list in children.values_mut() {
            list.sort_by_key(|b| b.sort);
        }
        Self { children }
    }

    pub fn children(&self, parent: Option<&BlockId>) -> &[&'a Block] {
        self.children
            .get(&parent.cloned())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    fn parents(&self) -> impl Iterator<Item = Option<&BlockId>> + '_ {
        self.children.keys().map(Option::as_ref)
    }
}

pub fn find<'a>(blocks: &'a [Block], id: &BlockId) -> Option<&'a Block> {
    blocks.iter().find(|b| &b.id == id)
}

/// Children of `parent`, ordered by `sort`.
pub fn children<'a>(blocks: &'a [Block], parent: Option<&BlockId>) -> Vec<&'a Block> {
    let mut list: Vec<&Block> = blocks
        .iter()
        .filter(|b| b.parent_id.as_ref() == parent)
        .collect();
    list.sort_by_key(|b| b.sort);
    list
}

pub fn child_ids(blocks: &[Block], parent: Option<&BlockId>) -> Vec<BlockId> {
    children(blocks, parent)
        .into_iter()
        .map(|b| b.id.clone())
        .collect()
}

/// The parent of `id` and the ordered ids of its sibling list (including `id`).
pub fn siblings_of(blocks: &[Block], id: &BlockId) -> Option<(Option<BlockId>, Vec<BlockId>)> {
    let block = find(blocks, id)?;
    let parent = block.parent_id.clone();
    let ids = child_ids(blocks, parent.as_ref());
    Some((parent, ids))
}

/// All ids below `id` (not including `id` itself).
pub fn descendant_ids(blocks: &[Block], id: &BlockId) -> HashSet<BlockId> {
    let index = ChildIndex::new(blocks);
    let mut found = HashSet::new();
    let mut stack = vec![id];
    while let Some(current) = stack.pop() {
        for child in index.children(Some(current)) {
            if found.insert(child.id.clone()) {
                stack.push(&child.id);
            }
        }
    }
    found
}

/// Ids in depth-first document order.
///
/// Blocks whose parent is missing from the snapshot are treated as roots.
pub fn document_order(blocks: &[Block]) -> Vec<BlockId> {
    let index = ChildIndex::new(blocks);
    let known: HashSet<&BlockId> = blocks.iter().map(|b| &b.id).collect();

    let mut roots: Vec<&Block> = blocks
        .iter()
        .filter(|b| b.parent_id.as_ref().is_none_or(|p| !known.contains(p)))
        .collect();
    roots.sort_by_key(|b| b.sort);

    let mut order = Vec::with_capacity(blocks.len());
    let mut visited = HashSet::new();
    let mut stack: Vec<&Block> = roots.into_iter().rev().collect();
    while let Some(block) = stack.pop() {
        if !visited.insert(&block.id) {
            continue;
        }
        order.push(block.id.clone());
        stack.extend(index.children(Some(&block.id)).iter().rev());
    }
    order
}

/// Nesting depth of `id` (roots are 0).
pub fn depth(blocks: &[Block], id: &BlockId) -> usize {
    let mut depth = 0;
    let mut seen = HashSet::new();
    let mut current = find(blocks, id).and_then(|b| b.parent_id.as_ref());
    while let Some(parent) = current {
        if !seen.insert(parent) {
            break;
        }
        depth += 1;
        current = find(blocks, parent).and_then(|b| b.parent_id.as_ref());
    }
    depth
}

/// Verify unique ids, acyclic parent chains and contiguous sibling sorts.
pub fn check_invariants(blocks: &[Block]) -> Result<(), TreeError> {
    let mut by_id: HashMap<&BlockId, &Block> = HashMap::new();
    for block in blocks {
        if by_id.insert(&block.id, block).is_some() {
            return Err(TreeError::DuplicateId(block.id.clone()));
        }
    }

    for block in blocks {
        let mut seen = HashSet::new();
        let mut current = block;
        while let Some(parent) = &current.parent_id {
            if parent == &block.id || !seen.insert(parent) {
                return Err(TreeError::Cycle(block.id.clone()));
            }
            current = by_id.get(parent).copied().ok_or_else(|| TreeError::MissingParent {
                id: current.id.clone(),
                parent: parent.clone(),
            })?;
        }
    }

    let index = ChildIndex::new(blocks);
    for parent in index.parents() {
        let found: Vec<u32> = index.children(parent).iter().map(|b| b.sort).collect();
        let contiguous = found.iter().enumerate().all(|(i, sort)| *sort as usize == i);
        if !contiguous {
            return Err(TreeError::SortGap {
                parent: parent.cloned(),
                found,
            });
        }
    }
    Ok(())
}

/// Assign sequential sorts to each `(parent, ids)` list, keeping only changes.
pub fn sequence(blocks: &[Block], lists: &[(Option<BlockId>, Vec<BlockId>)]) -> Vec<Move> {
    let mut moves = Vec::new();
    for (parent, ids) in lists {
        for (sort, id) in ids.iter().enumerate() {
            let sort = sort as u32;
            let unchanged = find(blocks, id)
                .is_some_and(|b| b.parent_id.as_ref() == parent.as_ref() && b.sort == sort);
            if !unchanged {
                moves.push(Move {
                    id: id.clone(),
                    parent_id: parent.clone(),
                    sort,
                });
            }
        }
    }
    moves
}

/// Apply moves to a snapshot in place. Returns how many blocks changed.
pub fn apply_moves(blocks: &mut [Block], moves: &[Move]) -> usize {
    let targets: HashMap<&BlockId, &Move> = moves.iter().map(|m| (&m.id, m)).collect();
    let mut changed = 0;
    for block in blocks.iter_mut() {
        if let Some(m) = targets.get(&block.id) {
            block.parent_id = m.parent_id.clone();
            block.sort = m.sort;
            changed += 1;
        }
    }
    changed
}

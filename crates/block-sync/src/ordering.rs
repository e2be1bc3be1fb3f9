//! Structural planners: indent, outdent, sibling moves, unwrap, delete.
//!
//! Every planner is pure. It reads a snapshot and returns the `(parent,
//! sort)` changes to commit, or `None` when the operation is a no-op at a
//! structural boundary. Every list a plan touches is rewritten with
//! sequential sorts starting at 0.

use crate::block::{Block, BlockId};
use crate::tree::{self, Move};
use std::collections::HashSet;

/// Moves to commit plus the block that should receive focus.
#[derive(Debug, Clone, PartialEq)]
pub struct ReorderPlan {
    pub moves: Vec<Move>,
    pub focus: BlockId,
}

/// Result of unwrapping a section.
#[derive(Debug, Clone, PartialEq)]
pub struct UnwrapPlan {
    pub section: BlockId,
    /// Reorder for the section's former siblings with its children spliced in.
    pub moves: Vec<Move>,
    pub focus: Option<BlockId>,
}

/// Result of deleting a block locally.
#[derive(Debug, Clone, PartialEq)]
pub struct DeletePlan {
    pub block: BlockId,
    /// The block and all of its descendants.
    pub removed: HashSet<BlockId>,
    /// Resequenced remaining siblings.
    pub moves: Vec<Move>,
    pub focus: Option<BlockId>,
}

/// Make `id` the last child of its previous sibling.
pub fn indent(blocks: &[Block], id: &BlockId) -> Option<ReorderPlan> {
    let (parent, mut siblings) = tree::siblings_of(blocks, id)?;
    let index = siblings.iter().position(|s| s == id)?;
    if index == 0 {
        return None;
    }

    let new_parent = siblings[index - 1].clone();
    siblings.remove(index);
    let mut adopted = tree::child_ids(blocks, Some(&new_parent));
    adopted.push(id.clone());

    let moves = tree::sequence(blocks, &[(parent, siblings), (Some(new_parent), adopted)]);
    Some(ReorderPlan {
        moves,
        focus: id.clone(),
    })
}

/// Move `id` out of its parent, right after that parent.
///
/// Siblings that followed `id` come along, after it and in order.
pub fn outdent(blocks: &[Block], id: &BlockId) -> Option<ReorderPlan> {
    let block = tree::find(blocks, id)?;
    let parent_id = block.parent_id.clone()?;
    let grandparent = tree::find(blocks, &parent_id)?.parent_id.clone();

    let siblings = tree::child_ids(blocks, Some(&parent_id));
    let index = siblings.iter().position(|s| s == id)?;
    let (staying, leaving) = siblings.split_at(index);

    let mut outer = tree::child_ids(blocks, grandparent.as_ref());
    let parent_index = outer.iter().position(|s| s == &parent_id)?;
    outer.splice(parent_index + 1..parent_index + 1, leaving.iter().cloned());

    let moves = tree::sequence(
        blocks,
        &[(Some(parent_id), staying.to_vec()), (grandparent, outer)],
    );
    Some(ReorderPlan {
        moves,
        focus: id.clone(),
    })
}

/// Swap `id` with the sibling `delta` positions away.
pub fn move_within_siblings(blocks: &[Block], id: &BlockId, delta: isize) -> Option<ReorderPlan> {
    let (parent, mut siblings) = tree::siblings_of(blocks, id)?;
    let index = siblings.iter().position(|s| s == id)?;
    let target = index.checked_add_signed(delta)?;
    if delta == 0 || target >= siblings.len() {
        return None;
    }

    siblings.swap(index, target);
    let moves = tree::sequence(blocks, &[(parent, siblings)]);
    Some(ReorderPlan {
        moves,
        focus: id.clone(),
    })
}

pub fn move_up(blocks: &[Block], id: &BlockId) -> Option<ReorderPlan> {
    move_within_siblings(blocks, id, -1)
}

pub fn move_down(blocks: &[Block], id: &BlockId) -> Option<ReorderPlan> {
    move_within_siblings(blocks, id, 1)
}

/// Remove a section, splicing its children into its place.
///
/// Returns `None` if `id` is not a section.
pub fn unwrap_section(blocks: &[Block], id: &BlockId) -> Option<UnwrapPlan> {
    let section = tree::find(blocks, id)?;
    if !section.is_section() {
        return None;
    }

    let (parent, siblings) = tree::siblings_of(blocks, id)?;
    let index = siblings.iter().position(|s| s == id)?;
    let children = tree::child_ids(blocks, Some(id));

    let previous = index.checked_sub(1).map(|i| siblings[i].clone());
    let next = siblings.get(index + 1).cloned();

    let mut spliced = siblings;
    spliced.splice(index..=index, children.iter().cloned());
    let moves = tree::sequence(blocks, &[(parent.clone(), spliced)]);

    let focus = children.first().cloned().or(previous).or(next).or(parent);
    Some(UnwrapPlan {
        section: id.clone(),
        moves,
        focus,
    })
}

/// Remove `id` and its subtree, closing the gap among its siblings.
pub fn delete(blocks: &[Block], id: &BlockId) -> Option<DeletePlan> {
    let (parent, mut siblings) = tree::siblings_of(blocks, id)?;
    let index = siblings.iter().position(|s| s == id)?;

    let previous = index.checked_sub(1).map(|i| siblings[i].clone());
    let next = siblings.get(index + 1).cloned();
    siblings.remove(index);

    let mut removed = tree::descendant_ids(blocks, id);
    removed.insert(id.clone());

    let moves = tree::sequence(blocks, &[(parent.clone(), siblings)]);
    Some(DeletePlan {
        block: id.clone(),
        removed,
        moves,
        focus: previous.or(next).or(parent),
    })
}

/// Place `id` directly after `anchor` among the anchor's siblings.
///
/// With no anchor `id` goes to the end of the root list.
pub fn place_after(blocks: &[Block], anchor: Option<&BlockId>, id: &BlockId) -> Option<ReorderPlan> {
    let (parent, mut list) = match anchor {
        Some(anchor) => tree::siblings_of(blocks, anchor)?,
        None => (None, tree::child_ids(blocks, None)),
    };
    list.retain(|s| s != id);
    let at = match anchor {
        Some(anchor) => list.iter().position(|s| s == anchor)? + 1,
        None => list.len(),
    };
    list.insert(at, id.clone());

    let moves = tree::sequence(blocks, &[(parent, list)]);
    Some(ReorderPlan {
        moves,
        focus: id.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::fixtures::{para, section};
    use crate::tree::check_invariants;

    fn id(s: &str) -> BlockId {
        BlockId::from(s)
    }

    fn commit(blocks: &mut Vec<Block>, moves: &[Move]) {
        tree::apply_moves(blocks, moves);
        check_invariants(blocks).unwrap();
    }

    fn parent_of(blocks: &[Block], s: &str) -> Option<String> {
        tree::find(blocks, &id(s))
            .and_then(|b| b.parent_id.clone())
            .map(|p| p.to_string())
    }

    fn ids(list: Vec<BlockId>) -> Vec<String> {
        list.into_iter().map(|i| i.to_string()).collect()
    }

    #[test]
    fn indent_then_outdent_round_trips() {
        let mut blocks = vec![para("A", None, 0), para("B", None, 1)];

        let plan = indent(&blocks, &id("B")).unwrap();
        assert_eq!(plan.focus, id("B"));
        commit(&mut blocks, &plan.moves);
        assert_eq!(parent_of(&blocks, "B"), Some("A".into()));

        let plan = outdent(&blocks, &id("B")).unwrap();
        commit(&mut blocks, &plan.moves);
        assert_eq!(parent_of(&blocks, "B"), None);
        assert_eq!(ids(tree::child_ids(&blocks, None)), vec!["A", "B"]);
    }

    #[test]
    fn indent_first_sibling_is_noop() {
        let blocks = vec![para("A", None, 0), para("B", None, 1)];
        assert_eq!(indent(&blocks, &id("A")), None);
    }

    #[test]
    fn indent_appends_after_existing_children() {
        let mut blocks = vec![
            para("A", None, 0),
            para("A1", Some("A"), 0),
            para("B", None, 1),
            para("C", None, 2),
        ];

        let plan = indent(&blocks, &id("B")).unwrap();
        commit(&mut blocks, &plan.moves);

        assert_eq!(ids(tree::child_ids(&blocks, Some(&id("A")))), vec!["A1", "B"]);
        assert_eq!(ids(tree::child_ids(&blocks, None)), vec!["A", "C"]);
    }

    #[test]
    fn outdent_root_is_noop() {
        let blocks = vec![para("A", None, 0)];
        assert_eq!(outdent(&blocks, &id("A")), None);
    }

    #[test]
    fn outdent_carries_following_siblings() {
        let mut blocks = vec![
            section("P", None, 0, None),
            para("x", Some("P"), 0),
            para("y", Some("P"), 1),
            para("z", Some("P"), 2),
            para("Q", None, 1),
        ];

        let plan = outdent(&blocks, &id("y")).unwrap();
        commit(&mut blocks, &plan.moves);

        assert_eq!(ids(tree::child_ids(&blocks, Some(&id("P")))), vec!["x"]);
        assert_eq!(ids(tree::child_ids(&blocks, None)), vec!["P", "y", "z", "Q"]);
    }

    #[test]
    fn move_swaps_with_neighbour() {
        let mut blocks = vec![para("A", None, 0), para("B", None, 1), para("C", None, 2)];

        let plan = move_up(&blocks, &id("C")).unwrap();
        assert_eq!(plan.moves.len(), 2);
        commit(&mut blocks, &plan.moves);
        assert_eq!(ids(tree::child_ids(&blocks, None)), vec!["A", "C", "B"]);

        assert_eq!(move_up(&blocks, &id("A")), None);
        assert_eq!(move_down(&blocks, &id("B")), None);
    }

    #[test]
    fn unwrap_splices_children_into_place() {
        let mut blocks = vec![
            para("before", None, 0),
            section("S", None, 1, Some(1)),
            para("c1", Some("S"), 0),
            para("c2", Some("S"), 1),
            para("after", None, 2),
        ];

        let plan = unwrap_section(&blocks, &id("S")).unwrap();
        assert_eq!(plan.focus, Some(id("c1")));

        tree::apply_moves(&mut blocks, &plan.moves);
        blocks.retain(|b| b.id != plan.section);
        check_invariants(&blocks).unwrap();
        assert_eq!(
            ids(tree::child_ids(&blocks, None)),
            vec!["before", "c1", "c2", "after"]
        );
    }

    #[test]
    fn unwrap_focus_falls_back_in_order() {
        let blocks = vec![
            para("prev", None, 0),
            section("S", None, 1, None),
            para("next", None, 2),
        ];
        assert_eq!(unwrap_section(&blocks, &id("S")).unwrap().focus, Some(id("prev")));

        let blocks = vec![section("S", None, 0, None), para("next", None, 1)];
        assert_eq!(unwrap_section(&blocks, &id("S")).unwrap().focus, Some(id("next")));

        let blocks = vec![section("P", None, 0, None), section("S", Some("P"), 0, None)];
        assert_eq!(unwrap_section(&blocks, &id("S")).unwrap().focus, Some(id("P")));
    }

    #[test]
    fn unwrap_non_section_is_noop() {
        let blocks = vec![para("A", None, 0)];
        assert_eq!(unwrap_section(&blocks, &id("A")), None);
    }

    #[test]
    fn delete_removes_subtree_and_resequences() {
        let blocks = vec![
            para("A", None, 0),
            para("B", None, 1),
            para("B1", Some("B"), 0),
            para("C", None, 2),
        ];

        let plan = delete(&blocks, &id("B")).unwrap();

        assert_eq!(plan.removed.len(), 2);
        assert_eq!(plan.focus, Some(id("A")));
        assert_eq!(plan.moves, vec![Move { id: id("C"), parent_id: None, sort: 1 }]);
    }

    #[test]
    fn place_after_anchor() {
        let mut blocks = vec![para("A", None, 0), para("B", None, 1), para("new", None, 2)];

        let plan = place_after(&blocks, Some(&id("A")), &id("new")).unwrap();
        commit(&mut blocks, &plan.moves);

        assert_eq!(ids(tree::child_ids(&blocks, None)), vec!["A", "new", "B"]);
    }
}

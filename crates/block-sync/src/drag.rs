//! Drag-and-drop placement.
//!
//! `compute_drop_target` turns a cursor position over a hovered section
//! header into a `DropPlan`; `plan_drop` turns that plan into moves. Both
//! are pure. A dragged block travels with its chunk: itself plus the
//! non-section siblings that immediately follow it.

use crate::block::{Block, BlockId};
use crate::ordering::ReorderPlan;
use crate::tree;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

/// Vertical midpoint of one rendered sibling.
#[derive(Debug, Clone, PartialEq)]
pub struct SiblingSlot {
    pub id: BlockId,
    pub mid_y: f64,
}

/// Rendered geometry around the hovered section.
#[derive(Debug, Clone, PartialEq)]
pub struct DragGeometry {
    /// Left edge of the hovered section's header.
    pub header_left: f64,
    /// Siblings of the hovered section, top to bottom.
    pub siblings: Vec<SiblingSlot>,
}

/// Horizontal offsets (px) from the header's left edge.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DragThresholds {
    #[serde(default = "default_child_offset")]
    pub child_offset: f64,
    #[serde(default = "default_outdent_offset")]
    pub outdent_offset: f64,
}

fn default_child_offset() -> f64 {
    40.0
}

fn default_outdent_offset() -> f64 {
    40.0
}

impl Default for DragThresholds {
    fn default() -> Self {
        Self {
            child_offset: default_child_offset(),
            outdent_offset: default_outdent_offset(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropZone {
    /// Appended as the hovered section's last child.
    Child,
    /// Placed right after the hovered section's parent.
    AfterParent,
    /// Placed among the hovered section's siblings.
    Sibling,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DropPlan {
    pub dragged: BlockId,
    /// The dragged block and the blocks moving with it, in order.
    pub chunk: Vec<BlockId>,
    pub zone: DropZone,
    pub parent: Option<BlockId>,
    /// Insertion index in the receiving list with the chunk removed.
    pub index: usize,
}

/// The dragged block plus following non-section siblings.
pub fn chunk_of(blocks: &[Block], id: &BlockId) -> Vec<BlockId> {
    let Some((parent, _)) = tree::siblings_of(blocks, id) else {
        return Vec::new();
    };
    let siblings = tree::children(blocks, parent.as_ref());
    let Some(start) = siblings.iter().position(|b| &b.id == id) else {
        return Vec::new();
    };

    std::iter::once(id.clone())
        .chain(
            siblings[start + 1..]
                .iter()
                .take_while(|b| !b.is_section())
                .map(|b| b.id.clone()),
        )
        .collect()
}

/// Every id that must not become the chunk's new parent.
fn forbidden_parents(blocks: &[Block], chunk: &[BlockId]) -> HashSet<BlockId> {
    let mut forbidden: HashSet<BlockId> = chunk.iter().cloned().collect();
    for id in chunk {
        forbidden.extend(tree::descendant_ids(blocks, id));
    }
    forbidden
}

/// Work out where a drop at `cursor` over `hovered` would land.
///
/// Returns `None` when the drop is impossible: `hovered` is not a section,
/// or the placement would put the chunk under itself.
pub fn compute_drop_target(
    blocks: &[Block],
    dragged: &BlockId,
    hovered: &BlockId,
    cursor: Point,
    geometry: &DragGeometry,
    thresholds: &DragThresholds,
) -> Option<DropPlan> {
    let hovered_block = tree::find(blocks, hovered)?;
    // Drop zones are measured against a section header.
    if !hovered_block.is_section() {
        return None;
    }
    let chunk = chunk_of(blocks, dragged);
    if chunk.is_empty() {
        return None;
    }
    let forbidden = forbidden_parents(blocks, &chunk);
    let dx = cursor.x - geometry.header_left;

    let remaining = |parent: Option<&BlockId>| -> Vec<BlockId> {
        tree::child_ids(blocks, parent)
            .into_iter()
            .filter(|id| !chunk.contains(id))
            .collect()
    };

    let (zone, parent, index) = match hovered_block.parent_id.as_ref() {
        _ if dx > thresholds.child_offset => {
            let index = remaining(Some(hovered)).len();
            (DropZone::Child, Some(hovered.clone()), index)
        }
        Some(hovered_parent) if dx < -thresholds.outdent_offset => {
            let outer_parent = tree::find(blocks, hovered_parent)?.parent_id.clone();
            let list = remaining(outer_parent.as_ref());
            let index = list.iter().position(|id| id == hovered_parent)? + 1;
            (DropZone::AfterParent, outer_parent, index)
        }
        hovered_parent => {
            let list = remaining(hovered_parent);
            let above = geometry
                .siblings
                .iter()
                .filter(|slot| !chunk.contains(&slot.id) && slot.mid_y < cursor.y)
                .last();
            let index = match above {
                Some(slot) => list.iter().position(|id| id == &slot.id)? + 1,
                None => 0,
            };
            (DropZone::Sibling, hovered_parent.cloned(), index)
        }
    };

    if parent.as_ref().is_some_and(|p| forbidden.contains(p)) {
        return None;
    }

    Some(DropPlan {
        dragged: dragged.clone(),
        chunk,
        zone,
        parent,
        index,
    })
}

/// Turn a drop plan into moves against the current snapshot.
///
/// Re-checks the cycle rule since the snapshot may have changed since the
/// plan was computed. Returns `None` for a drop that changes nothing.
pub fn plan_drop(blocks: &[Block], plan: &DropPlan) -> Option<ReorderPlan> {
    if plan.chunk.iter().any(|id| tree::find(blocks, id).is_none()) {
        return None;
    }
    if let Some(parent) = &plan.parent {
        tree::find(blocks, parent)?;
        if forbidden_parents(blocks, &plan.chunk).contains(parent) {
            return None;
        }
    }

    let source_parent = tree::find(blocks, &plan.dragged)?.parent_id.clone();
    let mut target: Vec<BlockId> = tree::child_ids(blocks, plan.parent.as_ref())
        .into_iter()
        .filter(|id| !plan.chunk.contains(id))
        .collect();
    let index = plan.index.min(target.len());
    target.splice(index..index, plan.chunk.iter().cloned());

    let mut lists = vec![(plan.parent.clone(), target)];
    if source_parent != plan.parent {
        let vacated: Vec<BlockId> = tree::child_ids(blocks, source_parent.as_ref())
            .into_iter()
            .filter(|id| !plan.chunk.contains(id))
            .collect();
        lists.push((source_parent, vacated));
    }

    let moves = tree::sequence(blocks, &lists);
    if moves.is_empty() {
        return None;
    }
    Some(ReorderPlan {
        moves,
        focus: plan.dragged.clone(),
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

    fn slots(entries: &[(&str, f64)]) -> Vec<SiblingSlot> {
        entries
            .iter()
            .map(|(s, y)| SiblingSlot {
                id: id(s),
                mid_y: *y,
            })
            .collect()
    }

    /// Root: S1(section) [a, b], p, S2(section) [S3(section)]
    fn page() -> Vec<Block> {
        vec![
            section("S1", None, 0, Some(1)),
            para("a", Some("S1"), 0),
            para("b", Some("S1"), 1),
            para("p", None, 1),
            section("S2", None, 2, Some(1)),
            section("S3", Some("S2"), 0, Some(2)),
        ]
    }

    fn root_geometry(x: f64) -> (DragGeometry, f64) {
        (
            DragGeometry {
                header_left: 100.0,
                siblings: slots(&[("S1", 10.0), ("p", 50.0), ("S2", 90.0)]),
            },
            x,
        )
    }

    #[test]
    fn chunk_stops_at_next_section() {
        assert_eq!(chunk_of(&page(), &id("S1")), vec![id("S1"), id("p")]);
        assert_eq!(chunk_of(&page(), &id("a")), vec![id("a"), id("b")]);
        assert_eq!(chunk_of(&page(), &id("S2")), vec![id("S2")]);
    }

    #[test]
    fn right_of_threshold_drops_as_child() {
        let blocks = page();
        let (geometry, x) = root_geometry(150.0);

        let plan = compute_drop_target(
            &blocks,
            &id("a"),
            &id("S2"),
            Point { x, y: 90.0 },
            &geometry,
            &DragThresholds::default(),
        )
        .unwrap();

        assert_eq!(plan.zone, DropZone::Child);
        assert_eq!(plan.parent, Some(id("S2")));
        assert_eq!(plan.index, 1);

        let mut blocks = blocks;
        let reorder = plan_drop(&blocks, &plan).unwrap();
        tree::apply_moves(&mut blocks, &reorder.moves);
        check_invariants(&blocks).unwrap();
        let under_s2: Vec<String> = tree::child_ids(&blocks, Some(&id("S2")))
            .iter()
            .map(|i| i.to_string())
            .collect();
        assert_eq!(under_s2, vec!["S3", "a", "b"]);
        assert!(tree::child_ids(&blocks, Some(&id("S1"))).is_empty());
    }

    #[test]
    fn left_of_threshold_drops_after_parent() {
        let blocks = page();
        let geometry = DragGeometry {
            header_left: 100.0,
            siblings: slots(&[("S3", 120.0)]),
        };

        let plan = compute_drop_target(
            &blocks,
            &id("a"),
            &id("S3"),
            Point { x: 20.0, y: 120.0 },
            &geometry,
            &DragThresholds::default(),
        )
        .unwrap();

        assert_eq!(plan.zone, DropZone::AfterParent);
        assert_eq!(plan.parent, None);
        // Root without the chunk: S1, p, S2 -> after S2
        assert_eq!(plan.index, 3);
    }

    #[test]
    fn left_of_threshold_at_root_falls_back_to_sibling() {
        let blocks = page();
        let (geometry, _) = root_geometry(0.0);

        let plan = compute_drop_target(
            &blocks,
            &id("a"),
            &id("S2"),
            Point { x: 0.0, y: 60.0 },
            &geometry,
            &DragThresholds::default(),
        )
        .unwrap();

        assert_eq!(plan.zone, DropZone::Sibling);
        assert_eq!(plan.parent, None);
        // Above y=60: S1 and p, so insert after p
        assert_eq!(plan.index, 2);
    }

    #[test]
    fn sibling_index_follows_midpoints() {
        let blocks = page();
        let (geometry, x) = root_geometry(110.0);

        let plan = compute_drop_target(
            &blocks,
            &id("S2"),
            &id("S1"),
            Point { x, y: 5.0 },
            &geometry,
            &DragThresholds::default(),
        )
        .unwrap();

        assert_eq!(plan.index, 0);

        let mut blocks = blocks;
        let reorder = plan_drop(&blocks, &plan).unwrap();
        tree::apply_moves(&mut blocks, &reorder.moves);
        check_invariants(&blocks).unwrap();
        assert_eq!(tree::child_ids(&blocks, None)[0], id("S2"));
    }

    #[test]
    fn drop_onto_own_descendant_is_rejected() {
        let blocks = page();
        let geometry = DragGeometry {
            header_left: 100.0,
            siblings: slots(&[("S3", 120.0)]),
        };

        let plan = compute_drop_target(
            &blocks,
            &id("S2"),
            &id("S3"),
            Point { x: 200.0, y: 120.0 },
            &geometry,
            &DragThresholds::default(),
        );

        assert_eq!(plan, None);
    }

    #[test]
    fn hovering_a_paragraph_is_not_a_target() {
        let blocks = page();
        let (geometry, _) = root_geometry(0.0);

        for x in [0.0, 110.0, 200.0] {
            let plan = compute_drop_target(
                &blocks,
                &id("S2"),
                &id("p"),
                Point { x, y: 50.0 },
                &geometry,
                &DragThresholds::default(),
            );
            assert_eq!(plan, None, "x = {x}");
        }
    }

    #[test]
    fn stale_plan_is_rechecked() {
        let blocks = page();
        let plan = DropPlan {
            dragged: id("S2"),
            chunk: vec![id("S2")],
            zone: DropZone::Child,
            parent: Some(id("S3")),
            index: 0,
        };
        assert_eq!(plan_drop(&blocks, &plan), None);
    }

    #[test]
    fn drop_in_place_is_noop() {
        let blocks = page();
        let plan = DropPlan {
            dragged: id("p"),
            chunk: vec![id("p")],
            zone: DropZone::Sibling,
            parent: None,
            index: 1,
        };
        assert_eq!(plan_drop(&blocks, &plan), None);
    }
}

//! Outline normalization: derive section nesting from heading levels.

use crate::block::{Block, BlockBody, BlockId, SectionContent, SectionProps};
use crate::tree::{self, ChildIndex, Move};
use std::collections::HashMap;

/// How a block takes part in outline nesting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    /// Section (or legacy heading) with a level.
    Leveled(u8),
    /// Section without a level.
    Plain,
    Content,
}

fn role(block: &Block) -> Role {
    match &block.body {
        BlockBody::Section { props, .. } => props.level.map_or(Role::Plain, Role::Leveled),
        BlockBody::Heading { props, .. } => props
            .level
            .map_or(Role::Plain, |level| Role::Leveled(level.min(3))),
        _ => Role::Content,
    }
}

/// Changes needed to bring a scope's outline in line with its levels.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizePlan {
    /// Legacy headings to convert to sections, in document order.
    pub upgrades: Vec<Block>,
    /// Desired parent for every participant.
    pub parents: HashMap<BlockId, Option<BlockId>>,
    pub moves: Vec<Move>,
}

impl NormalizePlan {
    pub fn is_empty(&self) -> bool {
        self.upgrades.is_empty() && self.moves.is_empty()
    }
}

/// Convert a legacy heading into a section, keeping its level and text.
///
/// Returns `None` for anything that is not a heading.
pub fn upgrade_heading(block: &Block) -> Option<Block> {
    let BlockBody::Heading { props, content } = &block.body else {
        return None;
    };
    let mut upgraded = block.clone();
    upgraded.body = BlockBody::Section {
        props: SectionProps {
            level: props.level.map(|level| level.min(3)),
            extra: props.extra.clone(),
            ..Default::default()
        },
        content: SectionContent {
            title: content.text.clone(),
            extra: content.extra.clone(),
        },
    };
    Some(upgraded)
}

/// Participants of `scope` in document order.
///
/// The scope's children plus, recursively, the children of leveled sections.
fn participants<'a>(index: &ChildIndex<'a>, scope: Option<&BlockId>) -> Vec<&'a Block> {
    let mut found = Vec::new();
    let mut stack: Vec<&Block> = index.children(scope).iter().rev().copied().collect();
    while let Some(block) = stack.pop() {
        found.push(block);
        if matches!(role(block), Role::Leveled(_)) {
            stack.extend(index.children(Some(&block.id)).iter().rev());
        }
    }
    found
}

/// Compute the nesting of `scope` implied by section levels.
pub fn normalize(blocks: &[Block], scope: Option<&BlockId>) -> NormalizePlan {
    let index = ChildIndex::new(blocks);
    let participants = participants(&index, scope);
    let scope = scope.cloned();

    let mut upgrades = Vec::new();
    let mut parents = HashMap::new();
    let mut buckets: Vec<(Option<BlockId>, Vec<BlockId>)> = Vec::new();
    // Most recent section seen at each level (index 0 unused).
    let mut last_at_level: [Option<BlockId>; 4] = Default::default();
    let mut container: Option<BlockId> = None;

    for block in participants {
        if let Some(upgraded) = upgrade_heading(block) {
            upgrades.push(upgraded);
        }

        let parent = match role(block) {
            Role::Leveled(level) => {
                let level = usize::from(level.clamp(1, 3));
                let parent = if level == 1 {
                    scope.clone()
                } else {
                    last_at_level[level - 1].clone().or_else(|| scope.clone())
                };
                last_at_level[level] = Some(block.id.clone());
                container = Some(block.id.clone());
                parent
            }
            Role::Plain => {
                last_at_level = Default::default();
                container = None;
                scope.clone()
            }
            Role::Content => container.clone().or_else(|| scope.clone()),
        };

        match buckets.iter_mut().find(|(p, _)| p == &parent) {
            Some((_, ids)) => ids.push(block.id.clone()),
            None => buckets.push((parent.clone(), vec![block.id.clone()])),
        }
        parents.insert(block.id.clone(), parent);
    }

    let moves = tree::sequence(blocks, &buckets);
    NormalizePlan {
        upgrades,
        parents,
        moves,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::fixtures::{block, para, section};
    use crate::tree::check_invariants;

    fn id(s: &str) -> BlockId {
        BlockId::from(s)
    }

    fn apply(blocks: &mut Vec<Block>, plan: &NormalizePlan) {
        for upgraded in &plan.upgrades {
            if let Some(b) = blocks.iter_mut().find(|b| b.id == upgraded.id) {
                *b = upgraded.clone();
            }
        }
        tree::apply_moves(blocks, &plan.moves);
        check_invariants(blocks).unwrap();
    }

    #[test]
    fn levels_nest_under_nearest_lower_level() {
        let mut blocks = vec![
            section("h1a", None, 0, Some(1)),
            section("h2a", None, 1, Some(2)),
            section("h2b", None, 2, Some(2)),
            section("h1b", None, 3, Some(1)),
            section("h3", None, 4, Some(3)),
        ];

        let plan = normalize(&blocks, None);

        assert_eq!(plan.parents[&id("h1a")], None);
        assert_eq!(plan.parents[&id("h2a")], Some(id("h1a")));
        assert_eq!(plan.parents[&id("h2b")], Some(id("h1a")));
        assert_eq!(plan.parents[&id("h1b")], None);
        assert_eq!(plan.parents[&id("h3")], Some(id("h2b")));

        apply(&mut blocks, &plan);
        assert_eq!(
            tree::child_ids(&blocks, Some(&id("h1a"))),
            vec![id("h2a"), id("h2b")]
        );
        assert_eq!(tree::child_ids(&blocks, None), vec![id("h1a"), id("h1b")]);
    }

    #[test]
    fn content_nests_under_latest_leveled_section() {
        let blocks = vec![
            para("intro", None, 0),
            section("h1", None, 1, Some(1)),
            para("body", None, 2),
            section("h2", None, 3, Some(2)),
            para("detail", None, 4),
        ];

        let plan = normalize(&blocks, None);

        assert_eq!(plan.parents[&id("intro")], None);
        assert_eq!(plan.parents[&id("body")], Some(id("h1")));
        assert_eq!(plan.parents[&id("h2")], Some(id("h1")));
        assert_eq!(plan.parents[&id("detail")], Some(id("h2")));
    }

    #[test]
    fn plain_section_resets_context() {
        let blocks = vec![
            section("h1", None, 0, Some(1)),
            section("plain", None, 1, None),
            para("after", None, 2),
            section("h2", None, 3, Some(2)),
        ];

        let plan = normalize(&blocks, None);

        assert_eq!(plan.parents[&id("plain")], None);
        assert_eq!(plan.parents[&id("after")], None);
        assert_eq!(plan.parents[&id("h2")], None);
    }

    #[test]
    fn plain_section_keeps_its_subtree() {
        let blocks = vec![
            section("plain", None, 0, None),
            para("inside", Some("plain"), 0),
        ];

        let plan = normalize(&blocks, None);

        assert!(!plan.parents.contains_key(&id("inside")));
        assert!(plan.moves.is_empty());
    }

    #[test]
    fn already_nested_children_are_flattened_and_renested() {
        let mut blocks = vec![
            section("h1", None, 0, Some(1)),
            section("h3", Some("h1"), 0, Some(3)),
            para("p", Some("h3"), 0),
        ];

        let plan = normalize(&blocks, None);
        apply(&mut blocks, &plan);

        // No level 2 precedes h3, so it goes to the scope.
        assert_eq!(plan.parents[&id("h3")], None);
        assert_eq!(plan.parents[&id("p")], Some(id("h3")));
    }

    #[test]
    fn headings_are_upgraded() {
        let mut blocks = vec![
            block("h", None, 0, BlockBody::heading("Chapter One", Some(1))),
            para("p", None, 1),
        ];

        let plan = normalize(&blocks, None);

        assert_eq!(plan.upgrades.len(), 1);
        match &plan.upgrades[0].body {
            BlockBody::Section { props, content } => {
                assert_eq!(props.level, Some(1));
                assert_eq!(content.title, "Chapter One");
            }
            other => panic!("expected section, got {other:?}"),
        }

        apply(&mut blocks, &plan);
        assert_eq!(tree::child_ids(&blocks, Some(&id("h"))), vec![id("p")]);
    }

    #[test]
    fn scoped_normalization_leaves_outside_alone() {
        let blocks = vec![
            section("outside", None, 0, Some(1)),
            section("scope", None, 1, None),
            section("inner1", Some("scope"), 0, Some(1)),
            section("inner2", Some("scope"), 1, Some(2)),
        ];

        let plan = normalize(&blocks, Some(&id("scope")));

        assert!(!plan.parents.contains_key(&id("outside")));
        assert_eq!(plan.parents[&id("inner1")], Some(id("scope")));
        assert_eq!(plan.parents[&id("inner2")], Some(id("inner1")));
    }

    #[test]
    fn normalized_outline_is_stable() {
        let mut blocks = vec![
            section("h1", None, 0, Some(1)),
            section("h2", None, 1, Some(2)),
            para("p", None, 2),
        ];

        let first = normalize(&blocks, None);
        apply(&mut blocks, &first);

        assert!(normalize(&blocks, None).is_empty());
    }
}

//! Plain-text rendering of a page and id lookup for the command line.

use anyhow::{Result, bail};
use block_sync::tree;
use block_sync::{Block, BlockBody, BlockId, Renderer};
use std::fmt::Write;
use tracing::debug;

/// Render blocks as an indented outline, one line per block.
///
/// `focus` is marked with `>`.
pub fn render_outline(blocks: &[Block], focus: Option<&BlockId>) -> String {
    let mut out = String::new();
    for id in tree::document_order(blocks) {
        let Some(block) = tree::find(blocks, &id) else {
            continue;
        };
        let marker = if Some(&id) == focus { '>' } else { ' ' };
        let indent = "  ".repeat(tree::depth(blocks, &id));
        let _ = writeln!(out, "{marker} {indent}{}  [{}]", label(block), short_id(&id));
    }
    out
}

fn label(block: &Block) -> String {
    match &block.body {
        BlockBody::Section { props, content } => {
            let level = props
                .level
                .map(|level| "#".repeat(level as usize))
                .unwrap_or_else(|| "§".to_string());
            let collapsed = if props.collapsed { " (collapsed)" } else { "" };
            format!("{level} {}{collapsed}", content.title)
        }
        BlockBody::Heading { props, content } => {
            format!("h{} {}", props.level.unwrap_or(1), content.text)
        }
        BlockBody::Divider { .. } => "---".to_string(),
        BlockBody::Table { content, .. } => format!(
            "table {}x{}",
            content.table.rows.len(),
            content.table.columns.len()
        ),
        body => body.text().unwrap_or_default().to_string(),
    }
}

fn short_id(id: &BlockId) -> &str {
    let id = id.as_str();
    id.get(..8).unwrap_or(id)
}

/// Find the block whose id is `needle` or starts with it.
pub fn resolve_id(blocks: &[Block], needle: &str) -> Result<BlockId> {
    if let Some(exact) = blocks.iter().find(|b| b.id.as_str() == needle) {
        return Ok(exact.id.clone());
    }
    let matches: Vec<&Block> = blocks
        .iter()
        .filter(|b| b.id.as_str().starts_with(needle))
        .collect();
    match matches.as_slice() {
        [block] => Ok(block.id.clone()),
        [] => bail!("No block matches {needle:?}"),
        _ => bail!("{needle:?} matches {} blocks, use a longer prefix", matches.len()),
    }
}

/// Renderer that logs each redraw.
#[derive(Debug, Clone, Copy, Default)]
pub struct TraceRenderer;

impl Renderer for TraceRenderer {
    fn render(&self, blocks: &[Block], focus: Option<&BlockId>) {
        debug!("Rendered {} block(s), focus {:?}", blocks.len(), focus);
    }
}

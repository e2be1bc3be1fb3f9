//! Partial block updates.
//!
//! Patches merge while they wait for their debounce timer: `type`,
//! `parentId` and `sort` are last-write-wins, `props` and `content` merge
//! key by key. Before a patch goes over the wire it is rebased on the
//! block's current state so the payload carries complete objects.

use crate::block::{Block, BlockBody, BlockId, JsonMap, Result};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// A partial update to one block.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockPatch {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub block_type: Option<String>,
    /// `Some(None)` moves the block to the page root.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "nullable"
    )]
    pub parent_id: Option<Option<BlockId>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub props: Option<JsonMap>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<JsonMap>,
}

impl BlockPatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Patch that sets `content.text`.
    pub fn text(text: impl Into<String>) -> Self {
        Self::new().with_content("text", Value::String(text.into()))
    }

    pub fn with_type(mut self, block_type: impl Into<String>) -> Self {
        self.block_type = Some(block_type.into());
        self
    }

    pub fn with_parent(mut self, parent_id: Option<BlockId>) -> Self {
        self.parent_id = Some(parent_id);
        self
    }

    pub fn with_sort(mut self, sort: u32) -> Self {
        self.sort = Some(sort);
        self
    }

    pub fn with_prop(mut self, key: impl Into<String>, value: Value) -> Self {
        self.props
            .get_or_insert_with(JsonMap::new)
            .insert(key.into(), value);
        self
    }

    pub fn with_content(mut self, key: impl Into<String>, value: Value) -> Self {
        self.content
            .get_or_insert_with(JsonMap::new)
            .insert(key.into(), value);
        self
    }

    /// Patch that replaces a block's whole body.
    pub fn replace_body(body: &BlockBody) -> Self {
        let (block_type, props, content) = body.to_parts();
        BlockPatch {
            block_type: Some(block_type),
            props: Some(props),
            content: Some(content),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.block_type.is_none()
            && self.parent_id.is_none()
            && self.sort.is_none()
            && self.props.is_none()
            && self.content.is_none()
    }

    /// Whether the patch carries a structural change (`parentId` or `sort`).
    pub fn is_structural(&self) -> bool {
        self.parent_id.is_some() || self.sort.is_some()
    }

    /// The `content.text` value carried by this patch, if any.
    pub fn content_text(&self) -> Option<&str> {
        self.content
            .as_ref()
            .and_then(|content| content.get("text"))
            .and_then(Value::as_str)
    }

    pub fn touches_text(&self) -> bool {
        self.content
            .as_ref()
            .is_some_and(|content| content.contains_key("text"))
    }

    /// Fold a newer patch into this one.
    pub fn merge(&mut self, newer: BlockPatch) {
        if newer.block_type.is_some() {
            self.block_type = newer.block_type;
        }
        if newer.parent_id.is_some() {
            self.parent_id = newer.parent_id;
        }
        if newer.sort.is_some() {
            self.sort = newer.sort;
        }
        merge_map(&mut self.props, newer.props);
        merge_map(&mut self.content, newer.content);
    }

    /// Apply this patch to `block`, re-validating the resulting body.
    pub fn apply_to(&self, block: &Block) -> Result<Block> {
        let (current_type, mut props, mut content) = block.body.to_parts();
        if let Some(patch_props) = &self.props {
            props.extend(patch_props.clone());
        }
        if let Some(patch_content) = &self.content {
            content.extend(patch_content.clone());
        }
        let block_type = self.block_type.as_deref().unwrap_or(&current_type);

        let mut updated = block.clone();
        updated.body = BlockBody::from_parts(block_type, props, content)?;
        if let Some(parent_id) = &self.parent_id {
            updated.parent_id = parent_id.clone();
        }
        if let Some(sort) = self.sort {
            updated.sort = sort;
        }
        Ok(updated)
    }

    /// Produce the wire payload for this patch against the block's current state.
    ///
    /// Any of `props`/`content` the patch touches is expanded to the complete
    /// object so the server never has to merge.
    pub fn rebase_on(&self, current: &Block) -> Result<BlockPatch> {
        let merged = self.apply_to(current)?;
        let (block_type, props, content) = merged.body.to_parts();
        Ok(BlockPatch {
            block_type: self.block_type.as_ref().map(|_| block_type),
            parent_id: self.parent_id.as_ref().map(|_| merged.parent_id.clone()),
            sort: self.sort.map(|_| merged.sort),
            props: self.props.as_ref().map(|_| props),
            content: self.content.as_ref().map(|_| content),
        })
    }
}

fn merge_map(target: &mut Option<JsonMap>, newer: Option<JsonMap>) {
    if let Some(newer) = newer {
        target.get_or_insert_with(JsonMap::new).extend(newer);
    }
}

fn nullable<'de, D>(deserializer: D) -> std::result::Result<Option<Option<BlockId>>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<BlockId>::deserialize(deserializer).map(Some)
}

//! The persistence boundary: the system of record for blocks.
//!
//! Implementations:
//! - `InMemoryPersistence` - For testing, with call recording and failure injection
//! - `JsonFilePersistence` (in notes-cli) - One JSON file per page
//!
//! `BlockTable` holds the record-keeping rules both implementations share.

use crate::block::{Block, BlockBody, BlockError, BlockId, JsonMap, PageId};
use crate::patch::BlockPatch;
use crate::tree::{self, Move};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("Block not found: {0}")]
    NotFound(BlockId),

    #[error("Rejected: {0}")]
    Rejected(String),

    #[error("Invalid block: {0}")]
    Invalid(#[from] BlockError),

    #[error("IO error: {0}")]
    Io(String),
}

pub type Result<T> = std::result::Result<T, PersistError>;

/// Fields for a block the server has not assigned an id to yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewBlock {
    #[serde(rename = "type")]
    pub block_type: String,
    pub parent_id: Option<BlockId>,
    pub sort: u32,
    #[serde(default)]
    pub props: JsonMap,
    #[serde(default)]
    pub content: JsonMap,
}

impl NewBlock {
    pub fn from_body(body: &BlockBody, parent_id: Option<BlockId>, sort: u32) -> Self {
        let (block_type, props, content) = body.to_parts();
        Self {
            block_type,
            parent_id,
            sort,
            props,
            content,
        }
    }

    pub fn paragraph(text: impl Into<String>) -> Self {
        Self::from_body(&BlockBody::paragraph(text), None, 0)
    }
}

/// Async persistence API for a page's blocks.
#[async_trait]
pub trait PersistenceApi: Send + Sync {
    async fn fetch_blocks(&self, page_id: &PageId) -> Result<Vec<Block>>;

    /// Create a block; the server assigns `id` and `createdAt`.
    async fn create_block(&self, page_id: &PageId, draft: NewBlock) -> Result<Block>;

    /// Apply a patch and return the authoritative record.
    async fn patch_block(&self, id: &BlockId, patch: &BlockPatch) -> Result<Block>;

    async fn delete_block(&self, id: &BlockId) -> Result<()>;

    /// Apply a batch of moves, all or nothing.
    async fn reorder_blocks(&self, page_id: &PageId, moves: &[Move]) -> Result<()>;
}

#[async_trait]
impl<T: PersistenceApi + ?Sized> PersistenceApi for Arc<T> {
    async fn fetch_blocks(&self, page_id: &PageId) -> Result<Vec<Block>> {
        (**self).fetch_blocks(page_id).await
    }

    async fn create_block(&self, page_id: &PageId, draft: NewBlock) -> Result<Block> {
        (**self).create_block(page_id, draft).await
    }

    async fn patch_block(&self, id: &BlockId, patch: &BlockPatch) -> Result<Block> {
        (**self).patch_block(id, patch).await
    }

    async fn delete_block(&self, id: &BlockId) -> Result<()> {
        (**self).delete_block(id).await
    }

    async fn reorder_blocks(&self, page_id: &PageId, moves: &[Move]) -> Result<()> {
        (**self).reorder_blocks(page_id, moves).await
    }
}

/// Server-side record keeping over a flat list of blocks.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlockTable {
    blocks: Vec<Block>,
}

impl BlockTable {
    pub fn new(blocks: Vec<Block>) -> Self {
        Self { blocks }
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn page(&self, page_id: &PageId) -> Vec<Block> {
        self.blocks
            .iter()
            .filter(|b| &b.page_id == page_id)
            .cloned()
            .collect()
    }

    pub fn get(&self, id: &BlockId) -> Option<&Block> {
        tree::find(&self.blocks, id)
    }

    pub fn create(&mut self, page_id: &PageId, draft: NewBlock) -> Result<Block> {
        if let Some(parent) = &draft.parent_id {
            self.get(parent)
                .ok_or_else(|| PersistError::NotFound(parent.clone()))?;
        }
        let block = Block {
            id: BlockId::generate(),
            page_id: page_id.clone(),
            parent_id: draft.parent_id,
            sort: draft.sort,
            body: BlockBody::from_parts(&draft.block_type, draft.props, draft.content)?,
            created_at: Utc::now(),
        };
        self.blocks.push(block.clone());
        Ok(block)
    }

    /// Overwrite every field the patch carries.
    pub fn patch(&mut self, id: &BlockId, patch: &BlockPatch) -> Result<Block> {
        let current = self
            .get(id)
            .cloned()
            .ok_or_else(|| PersistError::NotFound(id.clone()))?;
        let (current_type, current_props, current_content) = current.body.to_parts();

        let mut updated = current;
        updated.body = BlockBody::from_parts(
            patch.block_type.as_deref().unwrap_or(&current_type),
            patch.props.clone().unwrap_or(current_props),
            patch.content.clone().unwrap_or(current_content),
        )?;
        if let Some(parent_id) = &patch.parent_id {
            if parent_id.as_ref() == Some(id) {
                return Err(PersistError::Rejected(format!("{id} cannot be its own parent")));
            }
            updated.parent_id = parent_id.clone();
        }
        if let Some(sort) = patch.sort {
            updated.sort = sort;
        }

        if let Some(stored) = self.blocks.iter_mut().find(|b| &b.id == id) {
            *stored = updated.clone();
        }
        Ok(updated)
    }

    /// Delete a block and everything below it.
    pub fn delete(&mut self, id: &BlockId) -> Result<()> {
        if self.get(id).is_none() {
            return Err(PersistError::NotFound(id.clone()));
        }
        let mut doomed = tree::descendant_ids(&self.blocks, id);
        doomed.insert(id.clone());
        self.blocks.retain(|b| !doomed.contains(&b.id));
        Ok(())
    }

    /// Validate every move, then apply them together.
    pub fn reorder(&mut self, page_id: &PageId, moves: &[Move]) -> Result<()> {
        for m in moves {
            let block = self
                .get(&m.id)
                .ok_or_else(|| PersistError::NotFound(m.id.clone()))?;
            if &block.page_id != page_id {
                return Err(PersistError::Rejected(format!(
                    "{} does not belong to page {page_id}",
                    m.id
                )));
            }
            if let Some(parent) = &m.parent_id {
                self.get(parent)
                    .ok_or_else(|| PersistError::NotFound(parent.clone()))?;
            }
        }

        let mut staged = self.blocks.clone();
        tree::apply_moves(&mut staged, moves);
        let moved: HashSet<&BlockId> = moves.iter().map(|m| &m.id).collect();
        for id in moved {
            let mut seen = HashSet::new();
            let mut current = tree::find(&staged, id).and_then(|b| b.parent_id.as_ref());
            while let Some(parent) = current {
                if parent == id || !seen.insert(parent) {
                    return Err(PersistError::Rejected(format!(
                        "moving {id} would create a cycle"
                    )));
                }
                current = tree::find(&staged, parent).and_then(|b| b.parent_id.as_ref());
            }
        }

        self.blocks = staged;
        Ok(())
    }
}

/// Kinds of call, for failure injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallKind {
    Fetch,
    Create,
    Patch,
    Delete,
    Reorder,
}

/// A recorded call against `InMemoryPersistence`.
#[derive(Debug, Clone, PartialEq)]
pub enum ApiCall {
    Fetch { page_id: PageId },
    Create { page_id: PageId, draft: NewBlock },
    Patch { id: BlockId, patch: BlockPatch },
    Delete { id: BlockId },
    Reorder { page_id: PageId, moves: Vec<Move> },
}

impl ApiCall {
    pub fn kind(&self) -> CallKind {
        match self {
            ApiCall::Fetch { .. } => CallKind::Fetch,
            ApiCall::Create { .. } => CallKind::Create,
            ApiCall::Patch { .. } => CallKind::Patch,
            ApiCall::Delete { .. } => CallKind::Delete,
            ApiCall::Reorder { .. } => CallKind::Reorder,
        }
    }
}

/// In-memory persistence for tests.
#[derive(Default)]
pub struct InMemoryPersistence {
    table: RwLock<BlockTable>,
    calls: Mutex<Vec<ApiCall>>,
    failing: RwLock<HashSet<CallKind>>,
    latency: RwLock<Option<Duration>>,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_blocks(blocks: Vec<Block>) -> Self {
        Self {
            table: RwLock::new(BlockTable::new(blocks)),
            ..Default::default()
        }
    }

    /// Make every call of `kind` fail until cleared.
    pub fn set_failing(&self, kind: CallKind, failing: bool) {
        let mut set = self.failing.write().unwrap_or_else(|e| e.into_inner());
        if failing {
            set.insert(kind);
        } else {
            set.remove(&kind);
        }
    }

    /// Delay every call by `latency` (uses tokio time, so paused clocks apply).
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.write().unwrap_or_else(|e| e.into_inner()) = latency;
    }

    /// Every call made so far, in order.
    pub fn calls(&self) -> Vec<ApiCall> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn calls_of(&self, kind: CallKind) -> Vec<ApiCall> {
        self.calls()
            .into_iter()
            .filter(|c| c.kind() == kind)
            .collect()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }

    /// Server-side copy of a block.
    pub fn stored(&self, id: &BlockId) -> Option<Block> {
        self.table
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .cloned()
    }

    pub fn stored_page(&self, page_id: &PageId) -> Vec<Block> {
        self.table
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .page(page_id)
    }

    /// Record the call, wait out any latency, then check for injected failure.
    async fn enter(&self, call: ApiCall) -> Result<()> {
        let kind = call.kind();
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(call);

        let latency = *self.latency.read().unwrap_or_else(|e| e.into_inner());
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        if self
            .failing
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&kind)
        {
            return Err(PersistError::Io(format!("injected {kind:?} failure")));
        }
        Ok(())
    }

    fn table(&self) -> std::sync::RwLockWriteGuard<'_, BlockTable> {
        self.table.write().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl PersistenceApi for InMemoryPersistence {
    async fn fetch_blocks(&self, page_id: &PageId) -> Result<Vec<Block>> {
        self.enter(ApiCall::Fetch {
            page_id: page_id.clone(),
        })
        .await?;
        Ok(self.table().page(page_id))
    }

    async fn create_block(&self, page_id: &PageId, draft: NewBlock) -> Result<Block> {
        self.enter(ApiCall::Create {
            page_id: page_id.clone(),
            draft: draft.clone(),
        })
        .await?;
        self.table().create(page_id, draft)
    }

    async fn patch_block(&self, id: &BlockId, patch: &BlockPatch) -> Result<Block> {
        self.enter(ApiCall::Patch {
            id: id.clone(),
            patch: patch.clone(),
        })
        .await?;
        self.table().patch(id, patch)
    }

    async fn delete_block(&self, id: &BlockId) -> Result<()> {
        self.enter(ApiCall::Delete { id: id.clone() }).await?;
        self.table().delete(id)
    }

    async fn reorder_blocks(&self, page_id: &PageId, moves: &[Move]) -> Result<()> {
        self.enter(ApiCall::Reorder {
            page_id: page_id.clone(),
            moves: moves.to_vec(),
        })
        .await?;
        self.table().reorder(page_id, moves)
    }
}

//! File-backed persistence: one page per JSON file.
//!
//! Every call reads the file, applies the change through [`BlockTable`] and
//! writes it back. Missing files read as an empty page named after the file.

use async_trait::async_trait;
use block_sync::persistence::Result;
use block_sync::{
    Block, BlockId, BlockPatch, BlockTable, Move, NewBlock, PageId, PersistError, PersistenceApi,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::debug;

/// On-disk layout of a page file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageFile {
    pub page_id: PageId,
    #[serde(default)]
    pub blocks: BlockTable,
}

impl PageFile {
    pub fn empty(page_id: PageId) -> Self {
        Self {
            page_id,
            blocks: BlockTable::default(),
        }
    }
}

pub struct JsonFilePersistence {
    path: PathBuf,
    /// Serializes read-modify-write cycles.
    lock: Mutex<()>,
}

impl JsonFilePersistence {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Page id stored in the file, or the file stem for a new file.
    pub async fn page_id(&self) -> Result<PageId> {
        let _guard = self.lock.lock().await;
        Ok(self.read().await?.page_id)
    }

    async fn read(&self) -> Result<PageFile> {
        if !self.path.exists() {
            let stem = self
                .path
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_else(|| "page".to_string());
            debug!("{:?} does not exist yet, starting page {}", self.path, stem);
            return Ok(PageFile::empty(PageId::new(stem)));
        }

        let contents = fs::read_to_string(&self.path)
            .await
            .map_err(|e| PersistError::Io(format!("reading {:?}: {e}", self.path)))?;
        serde_json::from_str(&contents)
            .map_err(|e| PersistError::Io(format!("parsing {:?}: {e}", self.path)))
    }

    async fn write(&self, page: &PageFile) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .await
                    .map_err(|e| PersistError::Io(e.to_string()))?;
            }
        }

        let contents =
            serde_json::to_string_pretty(page).map_err(|e| PersistError::Io(e.to_string()))?;
        // Write next to the target and rename so a crash never leaves half a page.
        let staging = self.path.with_extension("json.tmp");
        fs::write(&staging, contents)
            .await
            .map_err(|e| PersistError::Io(e.to_string()))?;
        fs::rename(&staging, &self.path)
            .await
            .map_err(|e| PersistError::Io(e.to_string()))
    }

    /// Apply `f` to the stored table and save only if it succeeds.
    async fn modify<T>(&self, f: impl FnOnce(&mut BlockTable) -> Result<T>) -> Result<T> {
        let _guard = self.lock.lock().await;
        let mut page = self.read().await?;
        let value = f(&mut page.blocks)?;
        self.write(&page).await?;
        Ok(value)
    }
}

#[async_trait]
impl PersistenceApi for JsonFilePersistence {
    async fn fetch_blocks(&self, page_id: &PageId) -> Result<Vec<Block>> {
        let _guard = self.lock.lock().await;
        let page = self.read().await?;
        if &page.page_id != page_id {
            return Err(PersistError::Rejected(format!(
                "{:?} holds page {}, not {page_id}",
                self.path, page.page_id
            )));
        }
        Ok(page.blocks.page(page_id))
    }

    async fn create_block(&self, page_id: &PageId, draft: NewBlock) -> Result<Block> {
        self.modify(|table| table.create(page_id, draft)).await
    }

    async fn patch_block(&self, id: &BlockId, patch: &BlockPatch) -> Result<Block> {
        self.modify(|table| table.patch(id, patch)).await
    }

    async fn delete_block(&self, id: &BlockId) -> Result<()> {
        self.modify(|table| table.delete(id)).await
    }

    async fn reorder_blocks(&self, page_id: &PageId, moves: &[Move]) -> Result<()> {
        self.modify(|table| table.reorder(page_id, moves)).await
    }
}

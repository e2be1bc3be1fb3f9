//! One open page: store, sync pipeline, planners and renderer wired together.
//!
//! Structural operations apply their plan to the store, render, and queue
//! their server writes. One worker per editor sends the queue in order, so
//! the server sees structural changes in the order they were made. A failed
//! background call is logged and reported as an event; the local state is
//! kept.

use crate::block::{Block, BlockBody, BlockId, PageId};
use crate::config::EditorConfig;
use crate::drag::{self, DragGeometry, DragThresholds, DropPlan, Point};
use crate::events::{EventBus, SyncEvent, SyncStatus};
use crate::guard::DataLossGuard;
use crate::ordering::{self, ReorderPlan};
use crate::outline::{self, NormalizePlan};
use crate::patch::BlockPatch;
use crate::persistence::{NewBlock, PersistError, PersistenceApi};
use crate::store::BlockStore;
use crate::sync::{FlushHandle, FlushOutcome, SyncError, SyncOptions, SyncPipeline};
use crate::tree::{self, Move};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum EditorError {
    #[error(transparent)]
    Persist(#[from] PersistError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error("Block not found: {0}")]
    NotFound(BlockId),
}

pub type Result<T> = std::result::Result<T, EditorError>;

/// Draws the page. Called after every committed change.
pub trait Renderer: Send + Sync {
    fn render(&self, blocks: &[Block], focus: Option<&BlockId>);
}

/// Renderer that draws nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopRenderer;

impl Renderer for NoopRenderer {
    fn render(&self, _blocks: &[Block], _focus: Option<&BlockId>) {}
}

/// A server write queued by a structural operation.
enum Job {
    Reorder(Vec<Move>),
    /// Reorder the children out, then delete the section.
    Unwrap { section: BlockId, moves: Vec<Move> },
    /// Delete the block, then resequence its former siblings.
    Delete { block: BlockId, moves: Vec<Move> },
    /// Resolves once every job queued before it has been sent.
    Barrier(oneshot::Sender<()>),
}

pub struct PageEditor<P> {
    page_id: PageId,
    api: Arc<P>,
    store: BlockStore,
    events: Arc<EventBus>,
    sync: SyncPipeline<P>,
    renderer: Arc<dyn Renderer>,
    drag: DragThresholds,
    /// Started on the first queued job.
    queue: Mutex<Option<mpsc::UnboundedSender<Job>>>,
}

impl<P: PersistenceApi + 'static> PageEditor<P> {
    pub fn new(page_id: PageId, api: Arc<P>, config: &EditorConfig) -> Self {
        let store = BlockStore::new();
        let events = Arc::new(EventBus::new());
        let sync = SyncPipeline::new(
            Arc::clone(&api),
            store.clone(),
            Arc::clone(&events),
            SyncOptions::from_config(config),
        );
        Self {
            page_id,
            api,
            store,
            events,
            sync,
            renderer: Arc::new(NoopRenderer),
            drag: config.drag,
            queue: Mutex::new(None),
        }
    }

    pub fn with_renderer(mut self, renderer: Arc<dyn Renderer>) -> Self {
        self.renderer = renderer;
        self
    }

    /// Replace the data-loss guard. Call before making any edits.
    pub fn with_guard(mut self, guard: DataLossGuard) -> Self {
        self.sync = SyncPipeline::new(
            Arc::clone(&self.api),
            self.store.clone(),
            Arc::clone(&self.events),
            SyncOptions {
                delay: self.sync.delay(),
                guard,
            },
        );
        self
    }

    pub fn page_id(&self) -> &PageId {
        &self.page_id
    }

    pub fn store(&self) -> &BlockStore {
        &self.store
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn sync(&self) -> &SyncPipeline<P> {
        &self.sync
    }

    pub fn status(&self) -> SyncStatus {
        self.sync.status()
    }

    pub fn snapshot(&self) -> Vec<Block> {
        self.store.get_all()
    }

    /// Fetch the page from the server, dropping anything pending.
    pub async fn load(&self) -> Result<usize> {
        let blocks = self.api.fetch_blocks(&self.page_id).await?;
        if let Err(e) = tree::check_invariants(&blocks) {
            warn!("Page {} loaded with an inconsistent tree: {}", self.page_id, e);
        }

        let count = blocks.len();
        self.sync.discard_all();
        self.store.replace_all(blocks);
        info!("Loaded {} block(s) for page {}", count, self.page_id);
        self.render(None);
        Ok(count)
    }

    /// Throw away local state and fetch the server's copy again.
    pub async fn reload(&self) -> Result<usize> {
        info!("Reloading page {}", self.page_id);
        self.load().await
    }

    pub fn indent(&self, id: &BlockId) -> BlockId {
        let plan = ordering::indent(&self.snapshot(), id);
        self.commit("indent", id, plan)
    }

    pub fn outdent(&self, id: &BlockId) -> BlockId {
        let plan = ordering::outdent(&self.snapshot(), id);
        self.commit("outdent", id, plan)
    }

    pub fn move_up(&self, id: &BlockId) -> BlockId {
        let plan = ordering::move_up(&self.snapshot(), id);
        self.commit("move up", id, plan)
    }

    pub fn move_down(&self, id: &BlockId) -> BlockId {
        let plan = ordering::move_down(&self.snapshot(), id);
        self.commit("move down", id, plan)
    }

    /// Commit a computed drop.
    pub fn drop_block(&self, plan: &DropPlan) -> BlockId {
        let reorder = drag::plan_drop(&self.snapshot(), plan);
        self.commit("drop", &plan.dragged, reorder)
    }

    /// Drop `dragged` at `cursor` over the header of `hovered`.
    pub fn drag_to(
        &self,
        dragged: &BlockId,
        hovered: &BlockId,
        cursor: Point,
        geometry: &DragGeometry,
    ) -> BlockId {
        let snapshot = self.snapshot();
        match drag::compute_drop_target(&snapshot, dragged, hovered, cursor, geometry, &self.drag)
        {
            Some(plan) => self.drop_block(&plan),
            None => {
                debug!("No valid drop target for {} over {}", dragged, hovered);
                dragged.clone()
            }
        }
    }

    /// Re-nest `scope`'s outline from section levels, upgrading legacy headings.
    pub fn normalize_outline(&self, scope: Option<&BlockId>) -> NormalizePlan {
        let plan = outline::normalize(&self.snapshot(), scope);
        if plan.is_empty() {
            debug!("Outline already normalized");
            return plan;
        }

        for upgraded in &plan.upgrades {
            // Swap the body first so the patch merges onto the section, not the heading.
            self.store.replace(upgraded.clone());
            let patch = BlockPatch::replace_body(&upgraded.body);
            if let Err(e) = self.sync.patch_with_delay(&upgraded.id, patch, Duration::ZERO) {
                warn!("Could not upgrade heading {}: {}", upgraded.id, e);
            }
        }

        self.store.apply_moves(&plan.moves);
        info!(
            "Normalized outline: {} upgrade(s), {} move(s)",
            plan.upgrades.len(),
            plan.moves.len()
        );
        self.render(scope);
        self.queue_reorder(plan.moves.clone());
        plan
    }

    /// Remove a section and splice its children into its place.
    ///
    /// The reorder is sent before the delete so the server never cascades
    /// into the children. Returns the block to focus.
    pub fn unwrap_section(&self, id: &BlockId) -> Option<BlockId> {
        let Some(plan) = ordering::unwrap_section(&self.snapshot(), id) else {
            debug!("{} is not a section, nothing to unwrap", id);
            return Some(id.clone());
        };

        self.store.apply_moves(&plan.moves);
        self.store.remove(&HashSet::from([id.clone()]));
        self.sync.discard(id);
        self.render(plan.focus.as_ref());

        self.enqueue(Job::Unwrap {
            section: plan.section.clone(),
            moves: plan.moves,
        });

        plan.focus
    }

    /// Schedule a debounced patch.
    pub fn edit(&self, id: &BlockId, patch: BlockPatch) -> Result<FlushHandle> {
        let handle = self.sync.patch(id, patch)?;
        self.render(Some(id));
        Ok(handle)
    }

    /// Flush a block's pending patch right away.
    pub async fn save(&self, id: &BlockId) -> Option<FlushOutcome> {
        self.sync.flush_block(id).await
    }

    /// Create a block on the server and place it after `anchor`.
    ///
    /// Without an anchor the block is appended to the page root.
    pub async fn insert_after(&self, anchor: Option<&BlockId>, body: BlockBody) -> Result<Block> {
        let snapshot = self.snapshot();
        let (parent_id, sort) = match anchor {
            Some(anchor) => {
                let anchor_block = tree::find(&snapshot, anchor)
                    .ok_or_else(|| EditorError::NotFound(anchor.clone()))?;
                (anchor_block.parent_id.clone(), anchor_block.sort + 1)
            }
            None => (None, tree::children(&snapshot, None).len() as u32),
        };

        let draft = NewBlock::from_body(&body, parent_id, sort);
        let created = self.api.create_block(&self.page_id, draft).await?;
        debug!("Created block {}", created.id);
        self.store.append(created.clone());

        let snapshot = self.snapshot();
        let plan = ordering::place_after(&snapshot, anchor, &created.id)
            .or_else(|| ordering::place_after(&snapshot, None, &created.id));
        self.commit("insert", &created.id, plan);
        Ok(created)
    }

    /// Remove a block and its subtree locally and on the server.
    ///
    /// The server is expected to cascade the delete to descendants.
    pub fn delete_block(&self, id: &BlockId) -> Option<BlockId> {
        let Some(plan) = ordering::delete(&self.snapshot(), id) else {
            debug!("Block {} not found, nothing to delete", id);
            return None;
        };

        self.store.remove(&plan.removed);
        for removed in &plan.removed {
            self.sync.discard(removed);
        }
        self.store.apply_moves(&plan.moves);
        self.render(plan.focus.as_ref());

        self.enqueue(Job::Delete {
            block: plan.block.clone(),
            moves: plan.moves,
        });

        plan.focus
    }

    /// Wait for queued server writes, then flush everything pending.
    pub async fn settle(&self) -> SyncStatus {
        let sender = self
            .queue
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        if let Some(sender) = sender {
            let (done, drained) = oneshot::channel();
            if sender.send(Job::Barrier(done)).is_ok() && drained.await.is_err() {
                warn!("Write queue for page {} stopped early", self.page_id);
            }
        }

        let flushed = self.sync.flush_all().await;
        self.sync.wait_idle().await;
        if flushed == SyncStatus::Error || self.sync.status() == SyncStatus::Error {
            SyncStatus::Error
        } else {
            SyncStatus::Saved
        }
    }

    fn render(&self, focus: Option<&BlockId>) {
        self.renderer.render(&self.store.get_all(), focus);
    }

    fn commit(&self, operation: &str, id: &BlockId, plan: Option<ReorderPlan>) -> BlockId {
        let Some(plan) = plan else {
            debug!("{} of {} is a no-op", operation, id);
            return id.clone();
        };

        debug!("{} of {}: {} move(s)", operation, id, plan.moves.len());
        self.store.apply_moves(&plan.moves);
        self.render(Some(&plan.focus));
        self.queue_reorder(plan.moves);
        plan.focus
    }

    fn queue_reorder(&self, moves: Vec<Move>) {
        if moves.is_empty() {
            return;
        }
        self.enqueue(Job::Reorder(moves));
    }

    fn enqueue(&self, job: Job) {
        let mut queue = self.queue.lock().unwrap_or_else(|e| e.into_inner());
        let sender = queue.get_or_insert_with(|| {
            let (tx, rx) = mpsc::unbounded_channel();
            tokio::spawn(run_queue(
                Arc::clone(&self.api),
                Arc::clone(&self.events),
                self.page_id.clone(),
                rx,
            ));
            debug!("Started write queue for page {}", self.page_id);
            tx
        });
        if let Err(mpsc::error::SendError(job)) = sender.send(job) {
            // The worker is gone; start a fresh one for this and later jobs.
            *queue = None;
            drop(queue);
            self.enqueue(job);
        }
    }
}

/// Send queued jobs one at a time until the editor is dropped.
async fn run_queue<P: PersistenceApi>(
    api: Arc<P>,
    events: Arc<EventBus>,
    page_id: PageId,
    mut jobs: mpsc::UnboundedReceiver<Job>,
) {
    while let Some(job) = jobs.recv().await {
        match job {
            Job::Reorder(moves) => {
                reorder(api.as_ref(), &events, &page_id, &moves).await;
            }
            Job::Unwrap { section, moves } => {
                if !moves.is_empty() && !reorder(api.as_ref(), &events, &page_id, &moves).await {
                    warn!("Keeping unwrapped section {} on the server", section);
                    continue;
                }
                delete(api.as_ref(), &events, section).await;
            }
            Job::Delete { block, moves } => {
                delete(api.as_ref(), &events, block).await;
                if !moves.is_empty() {
                    reorder(api.as_ref(), &events, &page_id, &moves).await;
                }
            }
            Job::Barrier(done) => {
                let _ = done.send(());
            }
        }
    }
    debug!("Write queue for page {} closed", page_id);
}

/// Returns whether the reorder went through.
async fn reorder<P: PersistenceApi>(
    api: &P,
    events: &EventBus,
    page_id: &PageId,
    moves: &[Move],
) -> bool {
    match api.reorder_blocks(page_id, moves).await {
        Ok(()) => true,
        Err(e) => {
            warn!("Reorder of {} block(s) failed: {}", moves.len(), e);
            events.emit(SyncEvent::ReorderFailed {
                page_id: page_id.clone(),
                moves: moves.len(),
                error: e.to_string(),
            });
            false
        }
    }
}

async fn delete<P: PersistenceApi>(api: &P, events: &EventBus, block_id: BlockId) {
    if let Err(e) = api.delete_block(&block_id).await {
        warn!("Failed to delete block {}: {}", block_id, e);
        events.emit(SyncEvent::DeleteFailed {
            block_id,
            error: e.to_string(),
        });
    }
}

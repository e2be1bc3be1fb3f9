//! Debounced, optimistic block patching.
//!
//! Every `patch` call is applied to the store immediately and merged into a
//! per-block pending patch. A per-block tokio task fires after the debounce
//! delay and sends the merged patch, rebased on the block's state at that
//! moment. Rescheduling aborts the old task and bumps a generation counter,
//! so a timer that already woke up sees it was superseded and does nothing.
//!
//! The server's response is written back into the store. Edits made while a
//! request was on the wire are re-applied on top so they stay visible.

use crate::block::{Block, BlockError, BlockId};
use crate::config::EditorConfig;
use crate::events::{EventBus, SyncEvent, SyncStatus};
use crate::guard::{DataLossGuard, GuardError};
use crate::patch::BlockPatch;
use crate::persistence::PersistenceApi;
use crate::store::BlockStore;
use futures::future::join_all;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("Block not found: {0}")]
    NotFound(BlockId),

    #[error(transparent)]
    Invalid(#[from] BlockError),
}

pub type Result<T> = std::result::Result<T, SyncError>;

/// How a scheduled flush ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlushOutcome {
    /// The server confirmed the patch.
    Saved,
    /// The data-loss guard refused the patch.
    Vetoed,
    /// The server call failed; the patch was dropped.
    Failed(String),
    /// Dropped without a network call.
    Discarded,
}

impl FlushOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, FlushOutcome::Vetoed | FlushOutcome::Failed(_))
    }
}

/// Resolves once the flush carrying a patch has finished.
///
/// Patches merged while waiting share one flush, so every handle for them
/// resolves to the same outcome.
#[must_use = "dropping the handle does not cancel the flush"]
pub struct FlushHandle {
    rx: oneshot::Receiver<FlushOutcome>,
}

impl Future for FlushHandle {
    type Output = FlushOutcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<FlushOutcome> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|result| result.unwrap_or(FlushOutcome::Discarded))
    }
}

/// Tuning for a pipeline.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub delay: Duration,
    pub guard: DataLossGuard,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self::from_config(&EditorConfig::default())
    }
}

impl SyncOptions {
    pub fn from_config(config: &EditorConfig) -> Self {
        Self {
            delay: config.debounce(),
            guard: DataLossGuard::default(),
        }
    }
}

type Waiter = oneshot::Sender<FlushOutcome>;

#[derive(Default)]
struct PendingFlush {
    patch: BlockPatch,
    generation: u64,
    timer: Option<JoinHandle<()>>,
    waiters: Vec<Waiter>,
}

#[derive(Default)]
struct PipelineState {
    pending: HashMap<BlockId, PendingFlush>,
    in_flight: usize,
    generation: u64,
    /// Generation of the newest flush sent per block.
    latest_sent: HashMap<BlockId, u64>,
    /// Last server-confirmed `content.text` per block.
    confirmed_text: HashMap<BlockId, String>,
    status: SyncStatus,
    cycle_flushed: bool,
    cycle_failed: bool,
}

impl PipelineState {
    fn outstanding(&self) -> usize {
        self.pending.len() + self.in_flight
    }

    /// Take a pending entry and mark it in flight.
    ///
    /// `abort_timer` cancels a still-sleeping debounce task. The timer's own
    /// task passes `false`: aborting itself would cancel the flush it is
    /// about to run at its first await.
    fn take_for_flush(&mut self, id: &BlockId, abort_timer: bool) -> Option<PendingFlush> {
        let mut entry = self.pending.remove(id)?;
        if let Some(timer) = entry.timer.take() {
            if abort_timer {
                timer.abort();
            }
        }
        self.latest_sent.insert(id.clone(), entry.generation);
        self.in_flight += 1;
        Some(entry)
    }

    /// Recompute the aggregate status, returning an event if it changed.
    fn refresh_status(&mut self) -> Option<SyncEvent> {
        let next = if self.in_flight > 0 {
            SyncStatus::Saving
        } else if !self.pending.is_empty() {
            SyncStatus::Dirty
        } else if self.cycle_failed {
            SyncStatus::Error
        } else if self.cycle_flushed {
            SyncStatus::Saved
        } else if matches!(self.status, SyncStatus::Dirty | SyncStatus::Saving) {
            SyncStatus::Idle
        } else {
            self.status
        };

        if self.outstanding() == 0 {
            self.cycle_failed = false;
            self.cycle_flushed = false;
        }
        if next == self.status {
            return None;
        }
        self.status = next;
        Some(SyncEvent::StatusChanged {
            status: next,
            pending: self.outstanding(),
        })
    }
}

struct Inner<P> {
    api: Arc<P>,
    store: BlockStore,
    events: Arc<EventBus>,
    guard: DataLossGuard,
    state: Mutex<PipelineState>,
    idle: Notify,
}

impl<P: PersistenceApi + 'static> Inner<P> {
    fn lock_state(&self) -> MutexGuard<'_, PipelineState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn emit(&self, event: Option<SyncEvent>) {
        if let Some(event) = event {
            self.events.emit(event);
        }
    }

    /// Debounce timer expiry for `id`.
    async fn fire(&self, id: BlockId, generation: u64) {
        let (entry, event) = {
            let mut state = self.lock_state();
            if state.pending.get(&id).map(|e| e.generation) != Some(generation) {
                debug!("Timer for block {} superseded", id);
                return;
            }
            let Some(entry) = state.take_for_flush(&id, false) else {
                return;
            };
            (entry, state.refresh_status())
        };
        self.emit(event);

        let outcome = self.flush(&id, &entry.patch, entry.generation).await;
        self.finish(vec![(entry.waiters, outcome)]);
    }

    /// Send one patch. The caller has already counted it as in flight.
    async fn flush(&self, id: &BlockId, patch: &BlockPatch, generation: u64) -> FlushOutcome {
        let Some(current) = self.store.get(id) else {
            debug!("Block {} is gone, dropping its pending patch", id);
            return FlushOutcome::Discarded;
        };

        let payload = match patch.rebase_on(&current) {
            Ok(payload) => payload,
            Err(e) => {
                error!("Pending patch for block {} no longer applies: {}", id, e);
                return self.failed(id, e.to_string());
            }
        };

        if let Some(candidate) = payload.content_text() {
            let confirmed = self.lock_state().confirmed_text.get(id).cloned();
            if let Some(previous) = confirmed {
                if let Err(err) = self.guard.check(id, &previous, candidate) {
                    error!("{}", err);
                    let GuardError::AnnotationsErased { previous, .. } = err;
                    self.events.emit(SyncEvent::DataLossBlocked {
                        block_id: id.clone(),
                        previous,
                    });
                    return FlushOutcome::Vetoed;
                }
            }
        }

        debug!("Flushing patch for block {}", id);
        match self.api.patch_block(id, &payload).await {
            Ok(record) => {
                self.reconcile(&record, generation, payload.is_structural());
                self.events.emit(SyncEvent::BlockSaved {
                    block_id: id.clone(),
                });
                FlushOutcome::Saved
            }
            Err(e) => {
                error!("Failed to save block {}: {}", id, e);
                self.failed(id, e.to_string())
            }
        }
    }

    fn failed(&self, id: &BlockId, error: String) -> FlushOutcome {
        self.events.emit(SyncEvent::FlushFailed {
            block_id: id.clone(),
            error: error.clone(),
        });
        FlushOutcome::Failed(error)
    }

    /// Write an authoritative record back into the store.
    fn reconcile(&self, record: &Block, generation: u64, structural: bool) {
        let mut state = self.lock_state();
        if state.latest_sent.get(&record.id) != Some(&generation) {
            debug!("Ignoring stale response for block {}", record.id);
            return;
        }
        if let Some(text) = record.text() {
            state
                .confirmed_text
                .insert(record.id.clone(), text.to_string());
        }

        let newer = state.pending.get(&record.id).map(|p| p.patch.clone());
        self.store.update(&record.id, |block| {
            block.reconcile(record, structural);
            if let Some(newer) = &newer {
                match newer.apply_to(block) {
                    Ok(reapplied) => *block = reapplied,
                    Err(e) => warn!("Could not re-apply pending edit to {}: {}", record.id, e),
                }
            }
        });
    }

    /// Account for finished flushes and resolve their handles.
    fn finish(&self, results: Vec<(Vec<Waiter>, FlushOutcome)>) {
        let (event, idle) = {
            let mut state = self.lock_state();
            state.in_flight = state.in_flight.saturating_sub(results.len());
            for (_, outcome) in &results {
                if outcome.is_failure() {
                    state.cycle_failed = true;
                } else if *outcome == FlushOutcome::Saved {
                    state.cycle_flushed = true;
                }
            }
            (state.refresh_status(), state.outstanding() == 0)
        };
        self.emit(event);

        for (waiters, outcome) in results {
            for waiter in waiters {
                let _ = waiter.send(outcome.clone());
            }
        }
        if idle {
            self.idle.notify_waiters();
        }
    }
}

/// Per-page patch pipeline. Cloning shares the same pipeline.
pub struct SyncPipeline<P> {
    inner: Arc<Inner<P>>,
    delay: Duration,
}

impl<P> Clone for SyncPipeline<P> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            delay: self.delay,
        }
    }
}

impl<P: PersistenceApi + 'static> SyncPipeline<P> {
    pub fn new(
        api: Arc<P>,
        store: BlockStore,
        events: Arc<EventBus>,
        options: SyncOptions,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                api,
                store,
                events,
                guard: options.guard,
                state: Mutex::new(PipelineState::default()),
                idle: Notify::new(),
            }),
            delay: options.delay,
        }
    }

    pub fn store(&self) -> &BlockStore {
        &self.inner.store
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn status(&self) -> SyncStatus {
        self.inner.lock_state().status
    }

    /// Pending timers plus in-flight flushes.
    pub fn pending_count(&self) -> usize {
        self.inner.lock_state().outstanding()
    }

    pub fn has_pending(&self, id: &BlockId) -> bool {
        self.inner.lock_state().pending.contains_key(id)
    }

    /// Schedule a patch with the configured debounce delay.
    ///
    /// Must be called from within a tokio runtime.
    pub fn patch(&self, id: &BlockId, patch: BlockPatch) -> Result<FlushHandle> {
        self.patch_with_delay(id, patch, self.delay)
    }

    /// Apply `patch` to the store now and flush it after `delay`.
    ///
    /// An invalid patch is rejected here and never scheduled.
    pub fn patch_with_delay(
        &self,
        id: &BlockId,
        patch: BlockPatch,
        delay: Duration,
    ) -> Result<FlushHandle> {
        let (tx, rx) = oneshot::channel();
        let event = {
            let mut state = self.inner.lock_state();
            let current = self
                .inner
                .store
                .get(id)
                .ok_or_else(|| SyncError::NotFound(id.clone()))?;
            let updated = patch.apply_to(&current)?;

            if patch.touches_text() {
                state
                    .confirmed_text
                    .entry(id.clone())
                    .or_insert_with(|| current.text().unwrap_or_default().to_string());
            }
            self.inner.store.replace(updated);

            state.generation += 1;
            let generation = state.generation;
            let entry = state.pending.entry(id.clone()).or_default();
            entry.patch.merge(patch);
            entry.generation = generation;
            entry.waiters.push(tx);
            if let Some(timer) = entry.timer.take() {
                timer.abort();
            }

            let inner = Arc::clone(&self.inner);
            let block_id = id.clone();
            entry.timer = Some(tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                inner.fire(block_id, generation).await;
            }));
            debug!("Scheduled flush for block {} in {:?}", id, delay);

            state.refresh_status()
        };
        self.inner.emit(event);
        Ok(FlushHandle { rx })
    }

    /// Flush one block's pending patch now.
    ///
    /// Returns `None` if nothing was pending for it.
    pub async fn flush_block(&self, id: &BlockId) -> Option<FlushOutcome> {
        let (entry, event) = {
            let mut state = self.inner.lock_state();
            let entry = state.take_for_flush(id, true)?;
            (entry, state.refresh_status())
        };
        self.inner.emit(event);

        let outcome = self
            .inner
            .flush(id, &entry.patch, entry.generation)
            .await;
        self.inner.finish(vec![(entry.waiters, outcome.clone())]);
        Some(outcome)
    }

    /// Cancel every timer and flush everything pending at once.
    ///
    /// Returns `Error` if any of those flushes failed or was vetoed.
    pub async fn flush_all(&self) -> SyncStatus {
        let (entries, event) = {
            let mut state = self.inner.lock_state();
            let ids: Vec<BlockId> = state.pending.keys().cloned().collect();
            let entries: Vec<(BlockId, PendingFlush)> = ids
                .into_iter()
                .filter_map(|id| state.take_for_flush(&id, true).map(|entry| (id, entry)))
                .collect();
            (entries, state.refresh_status())
        };
        self.inner.emit(event);

        if entries.is_empty() {
            return match self.status() {
                SyncStatus::Error => SyncStatus::Error,
                _ => SyncStatus::Saved,
            };
        }
        debug!("Flushing {} pending block(s)", entries.len());

        let outcomes = join_all(
            entries
                .iter()
                .map(|(id, entry)| self.inner.flush(id, &entry.patch, entry.generation)),
        )
        .await;
        let failed = outcomes.iter().any(FlushOutcome::is_failure);

        let results = entries
            .into_iter()
            .zip(outcomes)
            .map(|((_, entry), outcome)| (entry.waiters, outcome))
            .collect();
        self.inner.finish(results);

        if failed {
            SyncStatus::Error
        } else {
            SyncStatus::Saved
        }
    }

    /// Drop a pending patch without sending it.
    ///
    /// The optimistic change stays in the store.
    pub fn discard(&self, id: &BlockId) -> bool {
        let (entry, event, idle) = {
            let mut state = self.inner.lock_state();
            let Some(mut entry) = state.pending.remove(id) else {
                return false;
            };
            if let Some(timer) = entry.timer.take() {
                timer.abort();
            }
            (entry, state.refresh_status(), state.outstanding() == 0)
        };
        debug!("Discarded pending patch for block {}", id);
        self.inner.emit(event);

        for waiter in entry.waiters {
            let _ = waiter.send(FlushOutcome::Discarded);
        }
        if idle {
            self.inner.idle.notify_waiters();
        }
        true
    }

    /// Drop every pending patch and forget confirmed text, e.g. before a reload.
    pub fn discard_all(&self) {
        let ids: Vec<BlockId> = self.inner.lock_state().pending.keys().cloned().collect();
        for id in &ids {
            self.discard(id);
        }
        let mut state = self.inner.lock_state();
        state.confirmed_text.clear();
        state.latest_sent.clear();
    }

    /// Wait until no patch is pending or in flight.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            if self.pending_count() == 0 {
                return;
            }
            notified.await;
        }
    }
}

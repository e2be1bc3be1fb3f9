//! block-sync: block-tree pages with optimistic, debounced persistence.
//!
//! This crate provides the core functionality for:
//! - The block model and the per-page in-memory store
//! - Structural planners (indent, outdent, moves, drag-and-drop, unwrap)
//! - Outline normalization from section levels
//! - A debounced patch pipeline with a data-loss guard
//! - The `PersistenceApi` trait and a `PageEditor` facade tying it together

pub mod block;
pub mod config;
pub mod drag;
pub mod editor;
pub mod events;
pub mod guard;
pub mod ordering;
pub mod outline;
pub mod patch;
pub mod persistence;
pub mod store;
pub mod sync;
pub mod tree;

pub use block::{Block, BlockBody, BlockError, BlockId, JsonMap, PageId};
pub use config::{ConfigError, EditorConfig};
pub use drag::{DragGeometry, DragThresholds, DropPlan, DropZone, Point, SiblingSlot};
pub use editor::{EditorError, NoopRenderer, PageEditor, Renderer};
pub use events::{EventBus, EventLog, Subscription, SyncEvent, SyncStatus};
pub use guard::{AnnotationTokenizer, DataLossGuard, DefaultTokenizer, GuardError};
pub use ordering::ReorderPlan;
pub use outline::NormalizePlan;
pub use patch::BlockPatch;
pub use persistence::{BlockTable, InMemoryPersistence, NewBlock, PersistError, PersistenceApi};
pub use store::BlockStore;
pub use sync::{FlushHandle, FlushOutcome, SyncError, SyncOptions, SyncPipeline};
pub use tree::{Move, TreeError};

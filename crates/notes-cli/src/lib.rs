//! notes-cli library: the file-backed page store and outline rendering
//! used by the `notes` binary.

pub mod file_store;
pub mod outline;

pub use file_store::{JsonFilePersistence, PageFile};
pub use outline::{TraceRenderer, render_outline, resolve_id};

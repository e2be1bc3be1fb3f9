//! Refuses saves that would silently wipe every annotation from a text field.
//!
//! The check is a heuristic: it also fires when a user really did delete the
//! last link on purpose. Reloading from the server clears the block's state.

use crate::block::BlockId;
use annotations::TokenCounts;
use std::sync::Arc;
use thiserror::Error;

/// Counts annotation tokens in free text.
pub trait AnnotationTokenizer: Send + Sync {
    fn count(&self, text: &str) -> TokenCounts;
}

/// Tokenizer backed by the `annotations` crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultTokenizer;

impl AnnotationTokenizer for DefaultTokenizer {
    fn count(&self, text: &str) -> TokenCounts {
        annotations::count_tokens(text)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GuardError {
    #[error(
        "refusing to save block {block_id}: the edit removes all {} annotation(s)",
        previous.total()
    )]
    AnnotationsErased {
        block_id: BlockId,
        previous: TokenCounts,
    },
}

pub type Result<T> = std::result::Result<T, GuardError>;

#[derive(Clone)]
pub struct DataLossGuard {
    tokenizer: Arc<dyn AnnotationTokenizer>,
}

impl Default for DataLossGuard {
    fn default() -> Self {
        Self::new(Arc::new(DefaultTokenizer))
    }
}

impl DataLossGuard {
    pub fn new(tokenizer: Arc<dyn AnnotationTokenizer>) -> Self {
        Self { tokenizer }
    }

    /// Check a text change from `previous` (last confirmed) to `candidate`.
    pub fn check(&self, block_id: &BlockId, previous: &str, candidate: &str) -> Result<()> {
        if previous == candidate {
            return Ok(());
        }
        let before = self.tokenizer.count(previous);
        if before.is_empty() {
            return Ok(());
        }
        if self.tokenizer.count(candidate).is_empty() {
            return Err(GuardError::AnnotationsErased {
                block_id: block_id.clone(),
                previous: before,
            });
        }
        Ok(())
    }
}

impl std::fmt::Debug for DataLossGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataLossGuard").finish_non_exhaustive()
    }
}

//! Search Index Integration
//!
//! Abstractions and implementations for the document index behind
//! `SearchFiles`. Building the index (embedding ingestion) happens elsewhere;
//! the tools only query it.

mod kernel_memory;
mod memory;

pub use kernel_memory::{KernelMemoryConfig, KernelMemoryIndex};
pub use memory::MemoryIndex;

use async_trait::async_trait;

use crate::error::Result;
use crate::model::SearchHit;

/// Search index trait (Strategy pattern)
///
/// Implementations return at most `limit` hits, best first.
#[async_trait]
pub trait SearchIndex: Send + Sync {
    /// Run a ranked search
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>>;

    /// Index name
    fn name(&self) -> &str;
}

//! # chat-tools
//!
//! Tools that let the chat agent look into a folder of documents.
//!
//! ## Tools
//!
//! | Name                       | Argument        | Backed by           |
//! |----------------------------|-----------------|---------------------|
//! | `GetFileContent`           | `fileName`      | `DocumentDirectory` |
//! | `GetFileContentByPartOfIt` | `partOfContent` | `DocumentDirectory` |
//! | `SearchFiles`              | `query`         | `SearchIndex`       |
//!
//! The directory tools scan one folder, non-recursively, in file name order.
//! `SearchFiles` asks the index for the best five passages and returns them
//! as a JSON string:
//!
//! ```text
//! {"query":"budget","noResult":false,
//!  "results":[{"source":"budget.txt","score":0.93,"excerpt":"..."}]}
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! let directory = Arc::new(LocalDirectory::new(FileToolsConfig::from_env()?));
//! let index = Arc::new(MemoryIndex::from_directory(directory.as_ref()).await?);
//!
//! let mut registry = ToolRegistry::new();
//! chat_tools::register_file_tools(&mut registry, directory, index)?;
//! ```

pub mod directory;
pub mod error;
pub mod index;
pub mod model;
pub mod svckit;

use std::sync::Arc;

use chat_core::ToolRegistry;

pub use directory::{DocumentDirectory, FileText, FileToolsConfig, LocalDirectory};
pub use error::{Result, ToolsError};
pub use index::{KernelMemoryConfig, KernelMemoryIndex, MemoryIndex, SearchIndex};
pub use model::{SearchHit, SearchReport};

/// Re-export tools for easy registration
pub mod tools {
    pub use crate::svckit::{
        GetFileContentByPartOfItTool, GetFileContentTool, SEARCH_LIMIT, SearchFilesTool,
    };
}

/// Register the three document tools on a registry
pub fn register_file_tools(
    registry: &mut ToolRegistry,
    directory: Arc<dyn DocumentDirectory>,
    index: Arc<dyn SearchIndex>,
) -> chat_core::Result<()> {
    registry.register(tools::GetFileContentTool::new(Arc::clone(&directory)))?;
    registry.register(tools::GetFileContentByPartOfItTool::new(directory))?;
    registry.register(tools::SearchFilesTool::new(index))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_file_tools() {
        let mut registry = ToolRegistry::new();
        register_file_tools(
            &mut registry,
            Arc::new(LocalDirectory::at("./files")),
            Arc::new(MemoryIndex::new()),
        )
        .unwrap();

        assert_eq!(
            registry.names(),
            vec!["GetFileContent", "GetFileContentByPartOfIt", "SearchFiles"]
        );

        // registering twice collides on names
        let again = register_file_tools(
            &mut registry,
            Arc::new(LocalDirectory::at("./files")),
            Arc::new(MemoryIndex::new()),
        );
        assert!(again.is_err());
    }
}

//! Local Directory
//!
//! `DocumentDirectory` backed by a folder on disk.

use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use tokio::io::AsyncReadExt;

use super::{DocumentDirectory, FileText, FileToolsConfig};
use crate::error::{Result, ToolsError};

/// Folder on the local file system
pub struct LocalDirectory {
    config: FileToolsConfig,
}

impl LocalDirectory {
    pub fn new(config: FileToolsConfig) -> Self {
        Self { config }
    }

    /// Directory at `root` with the default read limit
    pub fn at(root: impl Into<PathBuf>) -> Self {
        Self::new(FileToolsConfig::new(root))
    }

    pub fn config(&self) -> &FileToolsConfig {
        &self.config
    }

    /// Resolve a listed name to a path, refusing anything that leaves the root
    fn entry_path(&self, name: &str) -> Result<PathBuf> {
        let mut components = Path::new(name).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(_)), None) => Ok(self.config.root.join(name)),
            _ => Err(ToolsError::Directory(format!("'{name}' is not a file name in the files directory"))),
        }
    }
}

#[async_trait]
impl DocumentDirectory for LocalDirectory {
    async fn list(&self) -> Result<Vec<String>> {
        let mut entries = tokio::fs::read_dir(&self.config.root).await.map_err(|e| {
            ToolsError::Directory(format!("cannot open {}: {}", self.config.root.display(), e))
        })?;

        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            // follow symlinks so linked files count as files
            let metadata = match tokio::fs::metadata(entry.path()).await {
                Ok(m) => m,
                Err(e) => {
                    tracing::debug!(path = %entry.path().display(), error = %e, "Skipping unreadable entry");
                    continue;
                }
            };
            if !metadata.is_file() {
                continue;
            }
            match entry.file_name().into_string() {
                Ok(name) => names.push(name),
                Err(raw) => tracing::debug!(name = ?raw, "Skipping non UTF-8 file name"),
            }
        }

        names.sort();
        Ok(names)
    }

    async fn read(&self, name: &str) -> Result<FileText> {
        let path = self.entry_path(name)?;
        let limit = self.config.max_file_bytes;

        let file = tokio::fs::File::open(&path).await?;
        let mut bytes = Vec::new();
        file.take(limit.saturating_add(1)).read_to_end(&mut bytes).await?;

        if bytes.len() as u64 > limit {
            return Ok(FileText::TooLarge { limit });
        }

        Ok(String::from_utf8(bytes).map_or(FileText::Binary, FileText::Text))
    }

    fn location(&self) -> String {
        self.config.root.display().to_string()
    }
}

//! Files Directory
//!
//! Read-only view of the one folder the file tools are allowed to look at.

mod local;

pub use local::LocalDirectory;

use async_trait::async_trait;
use std::path::PathBuf;

use crate::error::{Result, ToolsError};

/// Default cap on how much of a single file is read into memory
pub const DEFAULT_MAX_FILE_BYTES: u64 = 1024 * 1024;

/// File tools configuration
#[derive(Clone, Debug)]
pub struct FileToolsConfig {
    /// Folder the tools operate on (not searched recursively)
    pub root: PathBuf,

    /// Files larger than this are reported or skipped instead of read
    pub max_file_bytes: u64,
}

impl Default for FileToolsConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("./files"),
            max_file_bytes: DEFAULT_MAX_FILE_BYTES,
        }
    }
}

impl FileToolsConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Default::default()
        }
    }

    /// Read `FILES_DIR` and `FILES_MAX_BYTES`
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(root) = std::env::var("FILES_DIR") {
            config.root = PathBuf::from(root);
        }
        if let Ok(max) = std::env::var("FILES_MAX_BYTES") {
            config.max_file_bytes = max
                .parse()
                .map_err(|_| ToolsError::Config(format!("FILES_MAX_BYTES is not a number: {max}")))?;
        }

        Ok(config)
    }
}

/// Contents of one file as far as the tools are concerned
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FileText {
    /// Whole file decoded as UTF-8
    Text(String),
    /// Larger than the configured limit
    TooLarge { limit: u64 },
    /// Not valid UTF-8
    Binary,
}

/// Directory access trait (Strategy pattern)
#[async_trait]
pub trait DocumentDirectory: Send + Sync {
    /// Names of the regular files directly inside the folder, sorted by name
    async fn list(&self) -> Result<Vec<String>>;

    /// Read one listed file
    async fn read(&self, name: &str) -> Result<FileText>;

    /// Human-readable location, used in log lines
    fn location(&self) -> String;
}

//! Byte source collaborator used by file-backed loaders

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::common::{Error, Result};

/// Somewhere file contents can be read from
#[async_trait]
pub trait ByteSource: Send + Sync {
    async fn read(&self, path: &Path) -> Result<Vec<u8>>;
}

/// Reads from the local file system
#[derive(Debug, Default, Clone, Copy)]
pub struct FsSource;

#[async_trait]
impl ByteSource for FsSource {
    async fn read(&self, path: &Path) -> Result<Vec<u8>> {
        tokio::fs::read(path).await.map_err(|e| Error::FileRead {
            path: path.display().to_string(),
            error: e.to_string(),
        })
    }
}

/// Fixed set of in-memory files, for tests and embedded fixtures
#[derive(Debug, Default, Clone)]
pub struct MemorySource {
    files: HashMap<PathBuf, Vec<u8>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(mut self, path: impl Into<PathBuf>, contents: impl Into<Vec<u8>>) -> Self {
        self.files.insert(path.into(), contents.into());
        self
    }
}

#[async_trait]
impl ByteSource for MemorySource {
    async fn read(&self, path: &Path) -> Result<Vec<u8>> {
        self.files.get(path).cloned().ok_or_else(|| Error::FileRead {
            path: path.display().to_string(),
            error: "no such file".to_string(),
        })
    }
}

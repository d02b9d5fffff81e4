//! Data loaders
//!
//! A loader produces the byte payload a step works with: a literal, a file,
//! a value another step left in the context, or a rewritten structured
//! document. Like steps, loaders are validated before they run.

mod document;
mod source;
mod xml;

pub use document::{rewrite, DocumentFormat, DocumentLoader, DocumentOrigin, RewriteRule};
pub use source::{ByteSource, FsSource, MemorySource};

use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use crate::common::{Error, Result};
use crate::context::Context;

/// A freshly produced payload, positioned at its start
pub type ByteStream = Cursor<Vec<u8>>;

/// Produces a byte payload from the current context
#[async_trait]
pub trait DataLoader: Send + Sync {
    /// Short description used in log messages
    fn describe(&self) -> String;

    /// Check configuration without touching anything outside the loader
    fn validate(&self, ctx: &Context) -> Result<()>;

    /// Produce the payload
    async fn load(&self, ctx: &Context) -> Result<ByteStream>;
}

/// Literal text
pub struct TextLoader {
    value: String,
}

impl TextLoader {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
        }
    }
}

#[async_trait]
impl DataLoader for TextLoader {
    fn describe(&self) -> String {
        format!("text ({} bytes)", self.value.len())
    }

    fn validate(&self, _ctx: &Context) -> Result<()> {
        Ok(())
    }

    async fn load(&self, _ctx: &Context) -> Result<ByteStream> {
        Ok(Cursor::new(self.value.as_bytes().to_vec()))
    }
}

/// Whole file contents
pub struct FileLoader {
    path: PathBuf,
    source: Arc<dyn ByteSource>,
}

impl FileLoader {
    pub fn new(path: PathBuf, source: Arc<dyn ByteSource>) -> Self {
        Self { path, source }
    }
}

#[async_trait]
impl DataLoader for FileLoader {
    fn describe(&self) -> String {
        format!("file {}", self.path.display())
    }

    fn validate(&self, _ctx: &Context) -> Result<()> {
        if self.path.as_os_str().is_empty() {
            return Err(Error::missing_field("file", "path"));
        }
        Ok(())
    }

    async fn load(&self, _ctx: &Context) -> Result<ByteStream> {
        Ok(Cursor::new(self.source.read(&self.path).await?))
    }
}

/// Payload stored in the context by an earlier step
pub struct ContextLoader {
    key: String,
}

impl ContextLoader {
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }
}

#[async_trait]
impl DataLoader for ContextLoader {
    fn describe(&self) -> String {
        format!("context '{}'", self.key)
    }

    fn validate(&self, _ctx: &Context) -> Result<()> {
        if self.key.is_empty() {
            return Err(Error::missing_field("context", "key"));
        }
        Ok(())
    }

    async fn load(&self, ctx: &Context) -> Result<ByteStream> {
        let payload = ctx
            .get_payload(&self.key)?
            .ok_or_else(|| Error::Load(format!("context key '{}' is not set", self.key)))?;
        Ok(Cursor::new(payload))
    }
}

/// Read a loader's payload to the end
pub async fn load_bytes(loader: &dyn DataLoader, ctx: &Context) -> Result<Vec<u8>> {
    Ok(loader.load(ctx).await?.into_inner())
}

// === Persisted configuration ===

/// Payload configuration as written in a test case
///
/// A plain string is shorthand for `{ source: text, value: ... }`.
#[derive(Deserialize, Debug, Clone)]
#[serde(untagged)]
pub enum DataConfig {
    Literal(String),
    Source(DataSource),
}

/// Explicit payload source
#[derive(Deserialize, Debug, Clone)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum DataSource {
    /// Literal text
    Text { value: String },
    /// Contents of a file, relative to the test case file
    File { path: PathBuf },
    /// Value stored in the context
    Context { key: String },
    /// Structured document with optional node rewrites
    Document {
        path: Option<PathBuf>,
        inline: Option<String>,
        format: Option<DocumentFormat>,
        #[serde(default)]
        rewrites: Vec<RewriteRule>,
    },
}

impl DataConfig {
    /// Build the loader, resolving relative paths against `base_dir`
    pub fn build(&self, base_dir: &Path, source: &Arc<dyn ByteSource>) -> Result<Box<dyn DataLoader>> {
        let loader: Box<dyn DataLoader> = match self {
            DataConfig::Literal(value) => Box::new(TextLoader::new(value.clone())),
            DataConfig::Source(DataSource::Text { value }) => {
                Box::new(TextLoader::new(value.clone()))
            }
            DataConfig::Source(DataSource::File { path }) => Box::new(FileLoader::new(
                resolve(base_dir, path),
                Arc::clone(source),
            )),
            DataConfig::Source(DataSource::Context { key }) => {
                Box::new(ContextLoader::new(key.clone()))
            }
            DataConfig::Source(DataSource::Document {
                path,
                inline,
                format,
                rewrites,
            }) => {
                let origin = match (path, inline) {
                    (Some(path), None) => DocumentOrigin::File(resolve(base_dir, path)),
                    (None, Some(text)) => DocumentOrigin::Inline(text.clone()),
                    _ => {
                        return Err(Error::Configuration(
                            "document: exactly one of 'path' or 'inline' must be set".to_string(),
                        ))
                    }
                };
                Box::new(DocumentLoader::new(
                    origin,
                    *format,
                    rewrites.clone(),
                    Arc::clone(source),
                ))
            }
        };
        Ok(loader)
    }
}

fn resolve(base_dir: &Path, path: &Path) -> PathBuf {
    if path.is_relative() && !path.as_os_str().is_empty() {
        base_dir.join(path)
    } else {
        path.to_path_buf()
    }
}

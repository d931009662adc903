//! Dataset readers
//!
//! A reader turns input paths plus keyword options into a [`Dataset`].
//! Readers are looked up by read-method name in a [`ReaderRegistry`].

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use super::dataset::{Dataset, DatasetMetadata};
use crate::batch::{ColumnarBatch, Row};
use crate::error::{PrelearnerError, Result};

/// Keyword options passed to a reader
pub type ReadKwargs = serde_json::Map<String, serde_json::Value>;

/// Number of blocks the loaded dataset is split into
pub const OVERRIDE_NUM_BLOCKS: &str = "override_num_blocks";

pub const READ_JSON: &str = "read_json";
pub const FROM_ITEMS: &str = "from_items";

/// Block count requested by `kwargs`, if any
pub fn override_num_blocks(kwargs: &ReadKwargs) -> Result<Option<usize>> {
    match kwargs.get(OVERRIDE_NUM_BLOCKS) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(value) => value
            .as_u64()
            .filter(|&n| n > 0)
            .map(|n| Some(n as usize))
            .ok_or_else(|| PrelearnerError::InvalidConfig {
                reason: format!(
                    "{} must be a positive integer, got {}",
                    OVERRIDE_NUM_BLOCKS, value
                ),
            }),
    }
}

#[async_trait]
pub trait DatasetReader: Send + Sync {
    /// Read-method name this reader is registered under
    fn name(&self) -> &str;

    async fn load(&self, paths: &[PathBuf], kwargs: &ReadKwargs) -> Result<Dataset>;
}

/// Read methods by name
#[derive(Clone)]
pub struct ReaderRegistry {
    readers: HashMap<String, Arc<dyn DatasetReader>>,
}

impl ReaderRegistry {
    pub fn empty() -> Self {
        Self {
            readers: HashMap::new(),
        }
    }

    /// Registry holding the JSON-lines reader
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register(JsonReader);
        registry
    }

    /// Add or replace a reader under its own name
    pub fn register<R: DatasetReader + 'static>(&mut self, reader: R) -> &mut Self {
        self.readers.insert(reader.name().to_string(), Arc::new(reader));
        self
    }

    pub fn with_reader<R: DatasetReader + 'static>(mut self, reader: R) -> Self {
        self.register(reader);
        self
    }

    pub fn get(&self, method: &str) -> Result<Arc<dyn DatasetReader>> {
        self.readers
            .get(method)
            .cloned()
            .ok_or_else(|| PrelearnerError::UnknownReadMethod {
                method: method.to_string(),
            })
    }

    pub fn methods(&self) -> Vec<&str> {
        let mut methods: Vec<&str> = self.readers.keys().map(String::as_str).collect();
        methods.sort_unstable();
        methods
    }
}

impl Default for ReaderRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl std::fmt::Debug for ReaderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReaderRegistry")
            .field("methods", &self.methods())
            .finish()
    }
}

/// JSON-lines files: one row object per line
///
/// Directories are expanded to the files they directly contain, in name
/// order. Blank lines are skipped; columns missing from a row read as null.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonReader;

#[async_trait]
impl DatasetReader for JsonReader {
    fn name(&self) -> &str {
        READ_JSON
    }

    async fn load(&self, paths: &[PathBuf], kwargs: &ReadKwargs) -> Result<Dataset> {
        let num_blocks = override_num_blocks(kwargs)?;
        let files = expand_paths(paths).await?;
        if files.is_empty() {
            return Err(PrelearnerError::ReadFailed {
                path: display_paths(paths),
                reason: "no input files".into(),
            });
        }

        let mut rows: Vec<Row> = Vec::new();
        for file in &files {
            let before = rows.len();
            read_json_lines(file, &mut rows).await?;
            debug!("Read {} rows from {}", rows.len() - before, file.display());
        }

        let sources = files.iter().map(|f| f.display().to_string()).collect();
        let metadata = DatasetMetadata::new(sources);
        let dataset = Dataset::from_blocks(vec![ColumnarBatch::from_rows(&rows)], metadata);
        dataset.repartition(num_blocks.unwrap_or(files.len()))
    }
}

async fn expand_paths(paths: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for path in paths {
        let metadata = tokio::fs::metadata(path).await.map_err(|e| read_failed(path, e))?;
        if !metadata.is_dir() {
            files.push(path.clone());
            continue;
        }

        let mut entries = tokio::fs::read_dir(path).await.map_err(|e| read_failed(path, e))?;
        let mut found = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|e| read_failed(path, e))? {
            let file_type = entry.file_type().await.map_err(|e| read_failed(path, e))?;
            if file_type.is_file() {
                found.push(entry.path());
            }
        }
        found.sort();
        files.extend(found);
    }
    Ok(files)
}

async fn read_json_lines(file: &Path, rows: &mut Vec<Row>) -> Result<()> {
    let text = tokio::fs::read_to_string(file).await.map_err(|e| read_failed(file, e))?;
    for (line_no, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let row: Row = serde_json::from_str(line).map_err(|e| PrelearnerError::ReadFailed {
            path: file.display().to_string(),
            reason: format!("line {}: {}", line_no + 1, e),
        })?;
        rows.push(row);
    }
    Ok(())
}

fn read_failed(path: &Path, e: impl std::fmt::Display) -> PrelearnerError {
    PrelearnerError::ReadFailed {
        path: path.display().to_string(),
        reason: e.to_string(),
    }
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// In-memory rows, ignoring input paths
#[derive(Debug, Clone, Default)]
pub struct ItemsReader {
    rows: Arc<Vec<Row>>,
}

impl ItemsReader {
    pub fn new(rows: Vec<Row>) -> Self {
        Self { rows: Arc::new(rows) }
    }
}

#[async_trait]
impl DatasetReader for ItemsReader {
    fn name(&self) -> &str {
        FROM_ITEMS
    }

    async fn load(&self, _paths: &[PathBuf], kwargs: &ReadKwargs) -> Result<Dataset> {
        let num_blocks = override_num_blocks(kwargs)?;
        let metadata = DatasetMetadata::new(vec![FROM_ITEMS.to_string()]);
        let dataset = Dataset::from_blocks(vec![ColumnarBatch::from_rows(&self.rows)], metadata);
        dataset.repartition(num_blocks.unwrap_or(1))
    }
}

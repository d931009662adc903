//! Offline data configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::batch::ModuleId;
use crate::data::reader::{ReadKwargs, OVERRIDE_NUM_BLOCKS, READ_JSON};
use crate::error::{PrelearnerError, Result};
use crate::schema::SchemaMapping;

/// One input path or several
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InputPaths {
    Single(PathBuf),
    Many(Vec<PathBuf>),
}

impl InputPaths {
    pub fn to_vec(&self) -> Vec<PathBuf> {
        match self {
            InputPaths::Single(path) => vec![path.clone()],
            InputPaths::Many(paths) => paths.clone(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            InputPaths::Single(path) => path.as_os_str().is_empty(),
            InputPaths::Many(paths) => paths.is_empty(),
        }
    }
}

impl Default for InputPaths {
    fn default() -> Self {
        InputPaths::Many(Vec::new())
    }
}

impl From<&str> for InputPaths {
    fn from(path: &str) -> Self {
        InputPaths::Single(PathBuf::from(path))
    }
}

impl From<PathBuf> for InputPaths {
    fn from(path: PathBuf) -> Self {
        InputPaths::Single(path)
    }
}

impl From<Vec<PathBuf>> for InputPaths {
    fn from(paths: Vec<PathBuf>) -> Self {
        InputPaths::Many(paths)
    }
}

/// Configuration of the offline data façade
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OfflineDataConfig {
    /// Data source path(s)
    pub input: InputPaths,
    /// Read-method name looked up in the reader registry
    pub input_read_method: String,
    /// Reader options, merged over the defaults
    pub input_read_method_kwargs: ReadKwargs,
    /// Number of training learners
    pub num_learners: usize,
    pub multi_agent: bool,
    /// Modules to keep in sampled batches; all when unset
    pub policies_to_train: Option<Vec<ModuleId>>,
    /// Transform calls between module state refreshes; never when unset
    pub prelearner_module_synch_period: Option<u64>,
    /// Transform workers in single-iterator modes
    pub map_concurrency: usize,
    pub prefetch_batches: usize,
    /// Shuffle buffer size as a multiple of `num_samples`
    pub shuffle_buffer_factor: usize,
    pub load_timeout_ms: u64,
    pub snapshot_timeout_ms: u64,
    /// User column name to reserved column name
    pub schema_mapping: SchemaMapping,
    /// Seed for learner selection and shuffling; entropy when unset
    pub seed: Option<u64>,
}

impl Default for OfflineDataConfig {
    fn default() -> Self {
        Self {
            input: InputPaths::default(),
            input_read_method: READ_JSON.into(),
            input_read_method_kwargs: ReadKwargs::new(),
            num_learners: 0,
            multi_agent: false,
            policies_to_train: None,
            prelearner_module_synch_period: None,
            map_concurrency: crate::DEFAULT_MAP_CONCURRENCY,
            prefetch_batches: 2,
            shuffle_buffer_factor: crate::DEFAULT_SHUFFLE_BUFFER_FACTOR,
            load_timeout_ms: 60_000,
            snapshot_timeout_ms: 30_000,
            schema_mapping: SchemaMapping::default(),
            seed: None,
        }
    }
}

impl OfflineDataConfig {
    pub fn new(input: impl Into<InputPaths>) -> Self {
        Self {
            input: input.into(),
            ..Default::default()
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json).map_err(|e| PrelearnerError::InvalidConfig {
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| PrelearnerError::InvalidConfig {
            reason: format!("{}: {}", path.display(), e),
        })?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: &str| {
            Err(PrelearnerError::InvalidConfig {
                reason: reason.to_string(),
            })
        };
        if self.input_read_method.is_empty() {
            return invalid("input_read_method must not be empty");
        }
        if self.map_concurrency == 0 {
            return invalid("map_concurrency must be at least 1");
        }
        if self.prefetch_batches == 0 {
            return invalid("prefetch_batches must be at least 1");
        }
        if self.prelearner_module_synch_period == Some(0) {
            return invalid("prelearner_module_synch_period must be at least 1");
        }
        self.schema_mapping.validate()
    }

    /// Reader options: defaults overlaid with the configured kwargs
    pub fn read_kwargs(&self) -> ReadKwargs {
        let mut kwargs = default_read_method_kwargs(self.num_learners);
        for (key, value) in &self.input_read_method_kwargs {
            kwargs.insert(key.clone(), value.clone());
        }
        kwargs
    }

    pub fn load_timeout(&self) -> Duration {
        Duration::from_millis(self.load_timeout_ms)
    }

    pub fn snapshot_timeout(&self) -> Duration {
        Duration::from_millis(self.snapshot_timeout_ms)
    }
}

/// At least two blocks per learner, and never fewer than two
pub fn default_read_method_kwargs(num_learners: usize) -> ReadKwargs {
    let mut kwargs = ReadKwargs::new();
    kwargs.insert(
        OVERRIDE_NUM_BLOCKS.to_string(),
        serde_json::Value::from(std::cmp::max(num_learners * 2, 2)),
    );
    kwargs
}

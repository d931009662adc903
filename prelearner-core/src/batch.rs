//! Columnar batches and module-keyed training batches
//!
//! A [`ColumnarBatch`] holds one column per field with one row per logged
//! transition. A [`MultiAgentBatch`] partitions post-connector data by the
//! module that trains on it.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{PrelearnerError, Result};

/// Identifier of a trainable module
pub type ModuleId = String;

/// Module id used when a single module trains on all data
pub const DEFAULT_MODULE_ID: &str = "default_policy";

/// A single cell value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
    /// Raw payload, possibly a packed observation
    Bytes(Bytes),
}

impl Value {
    /// Interpret the value as a flag. Integers are accepted for data
    /// written by pipelines that store booleans as 0/1.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            Value::Int(i) => Some(*i != 0),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Stable textual key, used for ids stored as strings or integers
    pub fn to_key(&self) -> String {
        match self {
            Value::Str(s) => s.clone(),
            Value::Int(i) => i.to_string(),
            other => serde_json::to_string(other).unwrap_or_default(),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<Bytes> for Value {
    fn from(v: Bytes) -> Self {
        Value::Bytes(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::List(v)
    }
}

/// A row as a column name → value map
pub type Row = BTreeMap<String, Value>;

/// Column-oriented batch with equal-length columns
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ColumnarBatch {
    columns: BTreeMap<String, Vec<Value>>,
    num_rows: usize,
}

impl ColumnarBatch {
    /// Create an empty batch
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a batch from named columns, rejecting ragged input
    pub fn from_columns<I, K>(columns: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, Vec<Value>)>,
        K: Into<String>,
    {
        let mut batch = Self::new();
        for (name, values) in columns {
            batch.insert_column(name, values)?;
        }
        Ok(batch)
    }

    /// Build a batch from rows. Keys missing from a row become `Null`.
    pub fn from_rows(rows: &[Row]) -> Self {
        let mut names: Vec<&String> = rows.iter().flat_map(|r| r.keys()).collect();
        names.sort();
        names.dedup();

        let columns = names
            .into_iter()
            .map(|name| {
                let values = rows
                    .iter()
                    .map(|row| row.get(name).cloned().unwrap_or(Value::Null))
                    .collect();
                (name.clone(), values)
            })
            .collect();

        Self {
            columns,
            num_rows: rows.len(),
        }
    }

    /// Add or replace a column
    pub fn insert_column(&mut self, name: impl Into<String>, values: Vec<Value>) -> Result<()> {
        let name = name.into();
        let replacing_only_column = self.columns.len() == 1 && self.columns.contains_key(&name);
        if !self.columns.is_empty() && !replacing_only_column && values.len() != self.num_rows {
            return Err(PrelearnerError::malformed(format!(
                "column '{}' has {} rows, expected {}",
                name,
                values.len(),
                self.num_rows
            )));
        }
        self.num_rows = values.len();
        self.columns.insert(name, values);
        Ok(())
    }

    pub fn num_rows(&self) -> usize {
        self.num_rows
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.num_rows == 0
    }

    pub fn contains(&self, name: &str) -> bool {
        self.columns.contains_key(name)
    }

    pub fn column(&self, name: &str) -> Option<&[Value]> {
        self.columns.get(name).map(Vec::as_slice)
    }

    /// Column names in sorted order
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.keys().map(String::as_str).collect()
    }

    pub fn columns(&self) -> impl Iterator<Item = (&str, &[Value])> {
        self.columns.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    /// Value at (`column`, `row`)
    pub fn get(&self, column: &str, row: usize) -> Option<&Value> {
        self.columns.get(column).and_then(|c| c.get(row))
    }

    /// Copy `len` rows starting at `start` (clamped to the batch)
    pub fn slice(&self, start: usize, len: usize) -> Self {
        let start = start.min(self.num_rows);
        let end = start.saturating_add(len).min(self.num_rows);
        let columns = self
            .columns
            .iter()
            .map(|(k, v)| (k.clone(), v[start..end].to_vec()))
            .collect();
        Self {
            columns,
            num_rows: end - start,
        }
    }

    /// Concatenate batches sharing the same column set
    pub fn concat(batches: &[&ColumnarBatch]) -> Result<Self> {
        let non_empty: Vec<&&ColumnarBatch> =
            batches.iter().filter(|b| b.num_columns() > 0).collect();
        let Some(first) = non_empty.first() else {
            return Ok(Self::new());
        };

        let mut columns: BTreeMap<String, Vec<Value>> = first
            .columns
            .keys()
            .map(|k| (k.clone(), Vec::new()))
            .collect();
        let mut num_rows = 0;

        for batch in &non_empty {
            if batch.columns.len() != columns.len()
                || batch.columns.keys().any(|k| !columns.contains_key(k))
            {
                return Err(PrelearnerError::malformed(format!(
                    "cannot concatenate batches with columns {:?} and {:?}",
                    first.column_names(),
                    batch.column_names()
                )));
            }
            for (name, values) in &batch.columns {
                if let Some(target) = columns.get_mut(name) {
                    target.extend(values.iter().cloned());
                }
            }
            num_rows += batch.num_rows;
        }

        Ok(Self { columns, num_rows })
    }
}

/// Post-connector batch partitioned by module id
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MultiAgentBatch {
    policy_batches: BTreeMap<ModuleId, ColumnarBatch>,
    env_steps: u64,
}

impl MultiAgentBatch {
    pub fn new(policy_batches: BTreeMap<ModuleId, ColumnarBatch>, env_steps: u64) -> Self {
        Self {
            policy_batches,
            env_steps,
        }
    }

    /// Number of environment transitions represented
    pub fn env_steps(&self) -> u64 {
        self.env_steps
    }

    pub fn module_ids(&self) -> Vec<ModuleId> {
        self.policy_batches.keys().cloned().collect()
    }

    pub fn get(&self, module_id: &str) -> Option<&ColumnarBatch> {
        self.policy_batches.get(module_id)
    }

    pub fn policy_batches(&self) -> &BTreeMap<ModuleId, ColumnarBatch> {
        &self.policy_batches
    }

    pub fn remove(&mut self, module_id: &str) -> Option<ColumnarBatch> {
        self.policy_batches.remove(module_id)
    }

    pub fn len(&self) -> usize {
        self.policy_batches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policy_batches.is_empty()
    }
}

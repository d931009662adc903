//! Reserved column names for logged transitions
//!
//! Every raw batch is read through this contract. Columns outside of
//! [`SCHEMA`] are carried into episodes as extra model outputs.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::batch::ColumnarBatch;
use crate::error::{PrelearnerError, Result};

pub const EPS_ID: &str = "eps_id";
pub const AGENT_ID: &str = "agent_id";
pub const MODULE_ID: &str = "module_id";
pub const OBS: &str = "obs";
pub const ACTIONS: &str = "actions";
pub const REWARDS: &str = "rewards";
pub const INFOS: &str = "infos";
pub const NEXT_OBS: &str = "new_obs";
pub const TERMINATEDS: &str = "terminateds";
pub const TRUNCATEDS: &str = "truncateds";
pub const T: &str = "t";

// Legacy names written by older pipelines
pub const AGENT_INDEX: &str = "agent_index";
pub const DONES: &str = "dones";
pub const UNROLL_ID: &str = "unroll_id";

/// All reserved column names, including legacy aliases
pub const SCHEMA: [&str; 14] = [
    EPS_ID,
    AGENT_ID,
    MODULE_ID,
    OBS,
    ACTIONS,
    REWARDS,
    INFOS,
    NEXT_OBS,
    TERMINATEDS,
    TRUNCATEDS,
    T,
    AGENT_INDEX,
    DONES,
    UNROLL_ID,
];

/// Columns an episode cannot be built without
pub const REQUIRED_COLUMNS: [&str; 5] = [EPS_ID, OBS, NEXT_OBS, ACTIONS, REWARDS];

/// Returns true if `column` belongs to the reserved schema
pub fn is_reserved(column: &str) -> bool {
    SCHEMA.contains(&column)
}

/// Renames user columns onto reserved names before episode construction.
///
/// The identity mapping is the default.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SchemaMapping {
    renames: BTreeMap<String, String>,
}

impl SchemaMapping {
    /// Create an identity mapping
    pub fn identity() -> Self {
        Self::default()
    }

    /// Map `source` in the raw data onto the reserved column `target`
    pub fn with_rename(mut self, source: impl Into<String>, target: impl Into<String>) -> Self {
        self.renames.insert(source.into(), target.into());
        self
    }

    pub fn is_identity(&self) -> bool {
        self.renames.is_empty()
    }

    /// Check that every rename targets a reserved column
    pub fn validate(&self) -> Result<()> {
        for (source, target) in &self.renames {
            if !is_reserved(target) {
                return Err(PrelearnerError::InvalidConfig {
                    reason: format!(
                        "schema mapping '{}' targets unknown column '{}'",
                        source, target
                    ),
                });
            }
        }
        Ok(())
    }

    /// Apply the mapping to a batch. Columns without a rename are kept as-is.
    pub fn apply(&self, batch: &ColumnarBatch) -> Result<ColumnarBatch> {
        if self.is_identity() {
            return Ok(batch.clone());
        }
        let mut out = ColumnarBatch::new();
        for (name, values) in batch.columns() {
            let target = self.renames.get(name).map(String::as_str).unwrap_or(name);
            if out.contains(target) {
                return Err(PrelearnerError::malformed(format!(
                    "schema mapping produces duplicate column '{}'",
                    target
                )));
            }
            out.insert_column(target, values.to_vec())?;
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::Value;

    #[test]
    fn test_reserved_columns() {
        assert!(is_reserved(OBS));
        assert!(is_reserved(DONES));
        assert!(!is_reserved("action_logp"));
        for column in REQUIRED_COLUMNS {
            assert!(is_reserved(column));
        }
    }

    #[test]
    fn test_mapping_renames_columns() {
        let mut batch = ColumnarBatch::new();
        batch.insert_column("state", vec![Value::Int(1)]).unwrap();
        batch.insert_column("rewards", vec![Value::Float(0.5)]).unwrap();

        let mapping = SchemaMapping::identity().with_rename("state", OBS);
        let mapped = mapping.apply(&batch).unwrap();
        assert!(mapped.contains(OBS));
        assert_eq!(mapped.get(OBS, 0), Some(&Value::Int(1)));
        assert_eq!(mapped.get(REWARDS, 0), Some(&Value::Float(0.5)));
        assert!(!mapped.contains("state"));
    }

    #[test]
    fn test_mapping_rejects_unknown_target() {
        let mapping = SchemaMapping::identity().with_rename("state", "observation");
        assert!(mapping.validate().is_err());
    }

    #[test]
    fn test_mapping_rejects_collision() {
        let mut batch = ColumnarBatch::new();
        batch.insert_column("state", vec![Value::Int(1)]).unwrap();
        batch.insert_column(OBS, vec![Value::Int(2)]).unwrap();
        let mapping = SchemaMapping::identity().with_rename("state", OBS);
        assert!(mapping.apply(&batch).is_err());
    }
}

//! Episodes built from logged transitions
//!
//! Each row of a raw batch becomes a single-agent episode holding exactly
//! one transition: two observations, one action, one reward.

use std::collections::BTreeMap;

use crate::batch::{ColumnarBatch, Value};
use crate::compression::unpack_if_needed;
use crate::error::{PrelearnerError, Result};
use crate::schema::{self, SchemaMapping};

/// Whether rows describe one agent or several agents sharing a timestep
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AgentMode {
    #[default]
    SingleAgent,
    /// Rows carry agent ids. Episode construction is not supported yet.
    MultiAgent,
}

/// A trajectory segment covering a single transition
#[derive(Debug, Clone, PartialEq)]
pub struct SingleAgentEpisode {
    pub id: String,
    pub agent_id: Option<String>,
    /// Current and next observation
    pub observations: Vec<Value>,
    /// Empty map, then the logged info (or empty)
    pub infos: Vec<Value>,
    pub actions: Vec<Value>,
    pub rewards: Vec<f64>,
    pub terminated: bool,
    pub truncated: bool,
    /// Non-schema columns, one-element sequence per column
    pub extra_model_outputs: BTreeMap<String, Vec<Value>>,
    pub len_lookback_buffer: usize,
}

impl SingleAgentEpisode {
    /// Number of environment steps this episode covers
    pub fn env_steps(&self) -> u64 {
        self.actions.len() as u64
    }
}

/// Episode produced by the row conversion
#[derive(Debug, Clone, PartialEq)]
pub enum Episode {
    SingleAgent(SingleAgentEpisode),
}

impl Episode {
    pub fn env_steps(&self) -> u64 {
        match self {
            Episode::SingleAgent(e) => e.env_steps(),
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Episode::SingleAgent(e) => &e.id,
        }
    }

    pub fn as_single_agent(&self) -> Option<&SingleAgentEpisode> {
        match self {
            Episode::SingleAgent(e) => Some(e),
        }
    }
}

/// Convert every row of `batch` into one episode, preserving row order.
///
/// Fails without producing any episode when a required column is missing
/// or when rows are flagged multi-agent.
pub fn rows_to_episodes(
    batch: &ColumnarBatch,
    mode: AgentMode,
    mapping: &SchemaMapping,
) -> Result<Vec<Episode>> {
    let mapped;
    let batch = if mapping.is_identity() {
        batch
    } else {
        mapped = mapping.apply(batch)?;
        &mapped
    };

    for column in schema::REQUIRED_COLUMNS {
        if !batch.contains(column) {
            return Err(PrelearnerError::MissingColumn {
                column: column.to_string(),
            });
        }
    }
    if !batch.contains(schema::TERMINATEDS) && !batch.contains(schema::DONES) {
        return Err(PrelearnerError::MissingColumn {
            column: schema::TERMINATEDS.to_string(),
        });
    }

    if mode == AgentMode::MultiAgent {
        return Err(PrelearnerError::UnsupportedMultiAgent);
    }

    let extra_columns: Vec<(&str, &[Value])> = batch
        .columns()
        .filter(|(name, _)| !schema::is_reserved(name))
        .collect();

    let mut episodes = Vec::with_capacity(batch.num_rows());
    for i in 0..batch.num_rows() {
        let cell = |column: &str| batch.get(column, i).cloned().unwrap_or(Value::Null);

        let reward = cell(schema::REWARDS).as_f64().ok_or_else(|| {
            PrelearnerError::malformed(format!("row {}: reward is not numeric", i))
        })?;
        // Null cells come from sources that lack the column for some rows
        let terminated = match cell(schema::TERMINATEDS) {
            Value::Null => match cell(schema::DONES) {
                Value::Null => {
                    return Err(PrelearnerError::malformed(format!(
                        "row {}: neither '{}' nor '{}' is set",
                        i,
                        schema::TERMINATEDS,
                        schema::DONES
                    )))
                }
                dones => flag(&dones, schema::DONES, i)?,
            },
            terminated => flag(&terminated, schema::TERMINATEDS, i)?,
        };
        let truncated = match cell(schema::TRUNCATEDS) {
            Value::Null => false,
            truncated => flag(&truncated, schema::TRUNCATEDS, i)?,
        };
        let info = match cell(schema::INFOS) {
            Value::Null => empty_info(),
            info => info,
        };

        let extra_model_outputs = extra_columns
            .iter()
            .map(|(name, values)| (name.to_string(), vec![values[i].clone()]))
            .collect();

        episodes.push(Episode::SingleAgent(SingleAgentEpisode {
            id: cell(schema::EPS_ID).to_key(),
            agent_id: None,
            observations: vec![
                unpack_if_needed(&cell(schema::OBS))?,
                unpack_if_needed(&cell(schema::NEXT_OBS))?,
            ],
            infos: vec![empty_info(), info],
            actions: vec![cell(schema::ACTIONS)],
            rewards: vec![reward],
            terminated,
            truncated,
            extra_model_outputs,
            len_lookback_buffer: 0,
        }));
    }

    Ok(episodes)
}

/// Agent id of a row: `agent_id`, else the legacy `agent_index`
pub fn row_agent_id(batch: &ColumnarBatch, row: usize) -> Option<String> {
    batch
        .get(schema::AGENT_ID, row)
        .or_else(|| batch.get(schema::AGENT_INDEX, row))
        .filter(|v| !v.is_null())
        .map(Value::to_key)
}

fn flag(value: &Value, column: &str, row: usize) -> Result<bool> {
    value.as_bool().ok_or_else(|| {
        PrelearnerError::malformed(format!("row {}: column '{}' is not a flag", row, column))
    })
}

fn empty_info() -> Value {
    Value::Map(BTreeMap::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compression::{pack, CompressionConfig};

    fn batch(rows: usize) -> ColumnarBatch {
        let n = rows as i64;
        ColumnarBatch::from_columns([
            (schema::EPS_ID, (0..n).map(|i| Value::Int(100 + i)).collect()),
            (schema::OBS, (0..n).map(|i| Value::Float(i as f64)).collect()),
            (schema::NEXT_OBS, (0..n).map(|i| Value::Float(i as f64 + 1.0)).collect()),
            (schema::ACTIONS, (0..n).map(Value::Int).collect()),
            (schema::REWARDS, (0..n).map(|_| Value::Float(1.0)).collect()),
            (schema::TERMINATEDS, (0..n).map(|i| Value::Bool(i == n - 1)).collect()),
        ])
        .unwrap()
    }

    fn single_agent(batch: &ColumnarBatch) -> Result<Vec<Episode>> {
        rows_to_episodes(batch, AgentMode::SingleAgent, &SchemaMapping::identity())
    }

    #[test]
    fn test_one_episode_per_row() {
        let episodes = single_agent(&batch(3)).unwrap();
        assert_eq!(episodes.len(), 3);

        let first = episodes[0].as_single_agent().unwrap();
        assert_eq!(first.id, "100");
        assert_eq!(first.observations, vec![Value::Float(0.0), Value::Float(1.0)]);
        assert_eq!(first.infos, vec![empty_info(), empty_info()]);
        assert!(!first.terminated);
        assert!(!first.truncated);
        assert!(first.agent_id.is_none());
        assert_eq!(first.len_lookback_buffer, 0);
        assert!(episodes[2].as_single_agent().unwrap().terminated);
    }

    #[test]
    fn test_legacy_dones_and_extra_outputs() {
        let mut b = batch(2);
        let terms = b.column(schema::TERMINATEDS).unwrap().to_vec();
        let mut legacy = ColumnarBatch::new();
        for (name, values) in b.columns() {
            if name != schema::TERMINATEDS {
                legacy.insert_column(name, values.to_vec()).unwrap();
            }
        }
        legacy.insert_column(schema::DONES, terms).unwrap();
        legacy
            .insert_column("action_logp", vec![Value::Float(-0.1), Value::Float(-0.2)])
            .unwrap();
        b = legacy;

        let episodes = single_agent(&b).unwrap();
        let last = episodes[1].as_single_agent().unwrap();
        assert!(last.terminated);
        assert_eq!(last.extra_model_outputs["action_logp"], vec![Value::Float(-0.2)]);
        assert!(!last.extra_model_outputs.contains_key(schema::DONES));
    }

    #[test]
    fn test_packed_observations_are_unpacked() {
        let obs = Value::List(vec![Value::Float(0.5), Value::Float(0.75)]);
        let packed = pack(&obs, &CompressionConfig::default()).unwrap();
        let mut b = batch(1);
        b.insert_column(schema::OBS, vec![packed]).unwrap();

        let episodes = single_agent(&b).unwrap();
        assert_eq!(episodes[0].as_single_agent().unwrap().observations[0], obs);
    }

    #[test]
    fn test_multi_agent_is_unsupported() {
        let result = rows_to_episodes(&batch(2), AgentMode::MultiAgent, &SchemaMapping::identity());
        assert!(matches!(result, Err(PrelearnerError::UnsupportedMultiAgent)));
    }

    #[test]
    fn test_agent_id_falls_back_to_agent_index() {
        let mut b = batch(1);
        b.insert_column(schema::AGENT_INDEX, vec![Value::Int(7)]).unwrap();
        assert_eq!(row_agent_id(&b, 0), Some("7".to_string()));
        b.insert_column(schema::AGENT_ID, vec![Value::Str("agent_a".into())]).unwrap();
        assert_eq!(row_agent_id(&b, 0), Some("agent_a".to_string()));
    }

    #[test]
    fn test_non_numeric_reward_is_malformed() {
        let mut b = batch(1);
        b.insert_column(schema::REWARDS, vec![Value::Str("high".into())]).unwrap();
        let result = single_agent(&b);
        assert!(matches!(result, Err(PrelearnerError::MalformedBatch { .. })));
    }

    #[test]
    fn test_null_truncated_reads_as_false() {
        let mut b = batch(2);
        b.insert_column(schema::TRUNCATEDS, vec![Value::Bool(true), Value::Null]).unwrap();

        let episodes = single_agent(&b).unwrap();
        assert!(episodes[0].as_single_agent().unwrap().truncated);
        assert!(!episodes[1].as_single_agent().unwrap().truncated);
    }

    #[test]
    fn test_null_terminated_falls_back_to_dones() {
        let mut b = batch(3);
        b.insert_column(
            schema::TERMINATEDS,
            vec![Value::Bool(false), Value::Null, Value::Null],
        )
        .unwrap();
        b.insert_column(
            schema::DONES,
            vec![Value::Null, Value::Bool(true), Value::Null],
        )
        .unwrap();

        let err = single_agent(&b).unwrap_err();
        assert!(err.to_string().contains("row 2"));

        b.insert_column(
            schema::DONES,
            vec![Value::Null, Value::Bool(true), Value::Bool(false)],
        )
        .unwrap();
        let episodes = single_agent(&b).unwrap();
        let terminated: Vec<bool> = episodes
            .iter()
            .map(|e| e.as_single_agent().unwrap().terminated)
            .collect();
        assert_eq!(terminated, vec![false, true, false]);
    }
}

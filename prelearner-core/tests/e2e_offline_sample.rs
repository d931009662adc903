//! End-to-end sampling through `OfflineData`
//!
//! Uses in-memory and JSON-lines readers with fake remote learners.

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use parking_lot::Mutex;
use prelearner_core::batch::{MultiAgentBatch, Row};
use prelearner_core::compression::{pack, CompressionAlgorithm, CompressionConfig};
use prelearner_core::data::{ItemsReader, ReaderRegistry};
use prelearner_core::learner::{
    LearnerGroup, ModelSnapshot, ModuleSpec, NodeId, RemoteLearner, RlModule, SnapshotModule,
    SnapshotModuleSpec, StaticLearner,
};
use prelearner_core::{OfflineData, OfflineDataConfig, PrelearnerError, Result, Value};
use prelearner_core::DEFAULT_MODULE_ID;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn row(i: i64) -> Row {
    Row::from([
        ("eps_id".to_string(), Value::from(format!("e{}", i))),
        ("obs".to_string(), Value::List(vec![Value::Float(i as f64), Value::Float(0.0)])),
        ("new_obs".to_string(), Value::List(vec![Value::Float(i as f64 + 1.0), Value::Float(0.0)])),
        ("actions".to_string(), Value::Int(i % 3)),
        ("rewards".to_string(), Value::Float(0.5)),
        ("terminateds".to_string(), Value::Bool(i % 2 == 0)),
        ("truncateds".to_string(), Value::Bool(false)),
        ("infos".to_string(), Value::Map(Default::default())),
    ])
}

fn items_config() -> OfflineDataConfig {
    let mut config = OfflineDataConfig::new("memory");
    config.input_read_method = "from_items".into();
    config.seed = Some(11);
    config
}

fn registry(rows: i64) -> ReaderRegistry {
    ReaderRegistry::with_defaults().with_reader(ItemsReader::new((0..rows).map(row).collect()))
}

fn local_learner() -> LearnerGroup {
    LearnerGroup::Local(Arc::new(StaticLearner::new(SnapshotModule::new(vec![
        DEFAULT_MODULE_ID.to_string(),
    ]))))
}

/// Remote learner answering `get_state` with a fixed snapshot
struct FakeRemote {
    id: String,
    node: NodeId,
    snapshot: ModelSnapshot,
    calls: Arc<AtomicUsize>,
    delay: Duration,
}

#[async_trait]
impl RemoteLearner for FakeRemote {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn node_id(&self) -> NodeId {
        self.node.clone()
    }

    async fn get_state(&self, _component: &str) -> Result<ModelSnapshot> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        Ok(self.snapshot.clone())
    }
}

/// Spec that records the state every built module is seeded with
struct RecordingSpec {
    seeded: Arc<Mutex<Vec<ModelSnapshot>>>,
}

struct RecordingModule {
    inner: SnapshotModule,
    seeded: Arc<Mutex<Vec<ModelSnapshot>>>,
}

impl RlModule for RecordingModule {
    fn get_state(&self) -> ModelSnapshot {
        self.inner.get_state()
    }

    fn set_state(&mut self, state: &ModelSnapshot) -> Result<()> {
        self.seeded.lock().push(state.clone());
        self.inner.set_state(state)
    }

    fn module_ids(&self) -> Vec<String> {
        self.inner.module_ids()
    }
}

impl ModuleSpec for RecordingSpec {
    fn build(&self) -> Result<Box<dyn RlModule>> {
        Ok(Box::new(RecordingModule {
            inner: SnapshotModule::new(vec![DEFAULT_MODULE_ID.to_string()]),
            seeded: self.seeded.clone(),
        }))
    }
}

fn remote_group(
    nodes: &[&str],
    calls: &Arc<AtomicUsize>,
    delay: Duration,
    spec: Arc<dyn ModuleSpec>,
) -> LearnerGroup {
    let weights = Bytes::from_static(b"weights-v1");
    let snapshot = ModelSnapshot::new().with_module(DEFAULT_MODULE_ID, weights);
    let handles: Vec<Arc<dyn RemoteLearner>> = nodes
        .iter()
        .enumerate()
        .map(|(i, node)| {
            Arc::new(FakeRemote {
                id: format!("learner-{}", i),
                node: node.to_string(),
                snapshot: snapshot.clone(),
                calls: calls.clone(),
                delay,
            }) as Arc<dyn RemoteLearner>
        })
        .collect();
    LearnerGroup::remote(handles, spec)
}

#[tokio::test]
async fn test_single_batch_counts_env_steps() {
    let mut data = OfflineData::new(items_config(), &registry(3))
        .await
        .unwrap()
        .with_learners(local_learner());

    let batch = data.sample(3, false, 0).await.unwrap().into_batch().unwrap();
    assert_eq!(batch.env_steps(), 3);
    assert_eq!(batch.module_ids(), vec![DEFAULT_MODULE_ID.to_string()]);
    assert_eq!(batch.get(DEFAULT_MODULE_ID).unwrap().num_rows(), 3);
}

#[tokio::test]
async fn test_single_iterator_streams_whole_dataset() {
    let mut data = OfflineData::new(items_config(), &registry(10))
        .await
        .unwrap()
        .with_learners(local_learner());

    let iterator = data.sample(4, true, 1).await.unwrap().into_iterator().unwrap();
    let mut steps = 0;
    loop {
        match iterator.next_batch().await {
            Ok(batch) => steps += batch.env_steps(),
            Err(PrelearnerError::DataExhausted) => break,
            Err(e) => panic!("unexpected error: {}", e),
        }
    }
    assert_eq!(steps, 10);
}

#[tokio::test]
async fn test_sharded_sampling_fetches_snapshot_once() {
    let calls = Arc::new(AtomicUsize::new(0));
    let seeded = Arc::new(Mutex::new(Vec::new()));
    let spec = Arc::new(RecordingSpec { seeded: seeded.clone() });
    let group = remote_group(&["n0", "n1", "n2", "n3"], &calls, Duration::ZERO, spec);

    let mut data = OfflineData::new(items_config(), &registry(40))
        .await
        .unwrap()
        .with_learners(group)
        .with_worker_nodes(vec!["n0".into(), "n1".into(), "n2".into(), "n3".into()]);

    let shards = data.sample(5, true, 4).await.unwrap().into_shards().unwrap();
    assert_eq!(shards.len(), 4);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let handles: Vec<_> = shards
        .into_iter()
        .map(|shard| {
            tokio::spawn(async move {
                shard
                    .into_stream()
                    .map(|batch| batch.unwrap().env_steps())
                    .collect::<Vec<u64>>()
                    .await
            })
        })
        .collect();
    let mut total = 0;
    for handle in handles {
        total += handle.await.unwrap().iter().sum::<u64>();
    }
    assert_eq!(total, 40);

    // Still one fetch: units never call back for state
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    let seeded = seeded.lock();
    assert_eq!(seeded.len(), 4);
    assert!(seeded.iter().all(|s| s == &seeded[0]));
    assert_eq!(
        seeded[0].module(DEFAULT_MODULE_ID).map(|b| b.as_ref()),
        Some(&b"weights-v1"[..])
    );
}

#[tokio::test]
async fn test_slow_snapshot_fetch_times_out() {
    let calls = Arc::new(AtomicUsize::new(0));
    let spec = Arc::new(SnapshotModuleSpec::new(vec![DEFAULT_MODULE_ID.to_string()]));
    let group = remote_group(&["n0", "n1"], &calls, Duration::from_secs(5), spec);

    let mut config = items_config();
    config.snapshot_timeout_ms = 20;
    let mut data = OfflineData::new(config, &registry(4)).await.unwrap().with_learners(group);

    let err = data.sample(2, true, 2).await.unwrap_err();
    assert!(matches!(err, PrelearnerError::Timeout { .. }));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_invalid_path_reports_unavailable() {
    let config = OfflineDataConfig::new("/nonexistent/offline/data.json");
    let mut data = OfflineData::new(config, &ReaderRegistry::with_defaults())
        .await
        .unwrap()
        .with_learners(local_learner());
    assert!(!data.is_ready());
    assert!(data.dataset().is_none());

    for (return_iterator, num_shards) in [(false, 0), (true, 1), (true, 4)] {
        let err = data.sample(8, return_iterator, num_shards).await.unwrap_err();
        assert!(matches!(err, PrelearnerError::DatasetUnavailable { .. }));
    }
}

/// Write each part as one JSON-lines file in a fresh directory
async fn write_parts(parts: &[Vec<Row>]) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("prelearner-e2e-{}", uuid::Uuid::new_v4()));
    tokio::fs::create_dir_all(&dir).await.unwrap();
    for (i, rows) in parts.iter().enumerate() {
        let lines: Vec<String> = rows.iter().map(|r| serde_json::to_string(r).unwrap()).collect();
        let file = dir.join(format!("part-{}.json", i));
        tokio::fs::write(file, lines.join("\n")).await.unwrap();
    }
    dir
}

async fn json_offline(dir: &Path) -> OfflineData {
    let config = OfflineDataConfig::from_json_str(&format!(
        r#"{{"input": "{}", "num_learners": 1, "seed": 3}}"#,
        dir.display()
    ))
    .unwrap();
    OfflineData::new(config, &ReaderRegistry::with_defaults())
        .await
        .unwrap()
        .with_learners(local_learner())
}

fn module_column(batch: &MultiAgentBatch, column: &str) -> Vec<Value> {
    batch.get(DEFAULT_MODULE_ID).unwrap().column(column).unwrap().to_vec()
}

#[tokio::test]
async fn test_json_lines_dataset() {
    let dir = write_parts(&[(0..3).map(row).collect(), (3..6).map(row).collect()]).await;
    let mut data = json_offline(&dir).await;
    assert!(data.is_ready());
    assert_eq!(data.dataset().unwrap().num_rows(), 6);
    assert_eq!(data.dataset().unwrap().num_blocks(), 2);

    let batch = data.sample(6, false, 0).await.unwrap().into_batch().unwrap();
    assert_eq!(batch.env_steps(), 6);

    tokio::fs::remove_dir_all(&dir).await.unwrap();
}

#[tokio::test]
async fn test_json_files_with_different_flag_columns() {
    // Second file predates `terminateds` and `truncateds`
    let legacy: Vec<Row> = (3..6)
        .map(|i| {
            let mut r = row(i);
            let terminated = r.remove("terminateds").unwrap();
            r.remove("truncateds");
            r.insert("dones".to_string(), terminated);
            r
        })
        .collect();
    let dir = write_parts(&[(0..3).map(row).collect(), legacy]).await;
    let mut data = json_offline(&dir).await;

    let batch = data.sample(6, false, 0).await.unwrap().into_batch().unwrap();
    assert_eq!(batch.env_steps(), 6);

    let terminated = module_column(&batch, "terminateds");
    let done_count = terminated.iter().filter(|v| **v == Value::Bool(true)).count();
    // rows 0, 2 and 4
    assert_eq!(done_count, 3);
    let truncated = module_column(&batch, "truncateds");
    assert!(truncated.iter().all(|v| *v == Value::Bool(false)));

    tokio::fs::remove_dir_all(&dir).await.unwrap();
}

#[tokio::test]
async fn test_json_packed_observations() {
    let config = CompressionConfig {
        algorithm: CompressionAlgorithm::Zstd,
        ..Default::default()
    };
    let rows: Vec<Row> = (0..4)
        .map(|i| {
            let mut r = row(i);
            for column in ["obs", "new_obs"] {
                let packed = pack(&r[column], &config).unwrap();
                r.insert(column.to_string(), packed);
            }
            r
        })
        .collect();
    let dir = write_parts(&[rows]).await;
    let mut data = json_offline(&dir).await;

    let batch = data.sample(4, false, 0).await.unwrap().into_batch().unwrap();
    let first = |v: &Value| match v {
        Value::List(items) => items[0].as_f64().unwrap(),
        other => panic!("observation not unpacked: {:?}", other),
    };
    let mut observations = module_column(&batch, "obs");
    observations.sort_by(|a, b| first(a).total_cmp(&first(b)));
    let expected: Vec<Value> = (0..4).map(|i| row(i)["obs"].clone()).collect();
    assert_eq!(observations, expected);

    tokio::fs::remove_dir_all(&dir).await.unwrap();
}

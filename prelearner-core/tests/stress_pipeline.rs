//! Stress tests for the sampling pipeline
//!
//! Run with: cargo test --release --test stress_pipeline -- --nocapture

use futures::StreamExt;
use prelearner_core::batch::Row;
use prelearner_core::data::{ItemsReader, ReaderRegistry};
use prelearner_core::learner::{LearnerGroup, SnapshotModule, StaticLearner};
use prelearner_core::{OfflineData, OfflineDataConfig, PrelearnerError, Value, DEFAULT_MODULE_ID};
use std::sync::Arc;
use std::time::Instant;

fn rows(n: i64, obs_dim: usize) -> Vec<Row> {
    (0..n)
        .map(|i| {
            Row::from([
                ("eps_id".to_string(), Value::Int(i)),
                ("obs".to_string(), Value::List(vec![Value::Float(i as f64); obs_dim])),
                ("new_obs".to_string(), Value::List(vec![Value::Float(i as f64 + 1.0); obs_dim])),
                ("actions".to_string(), Value::Int(i % 5)),
                ("rewards".to_string(), Value::Float(1.0)),
                ("terminateds".to_string(), Value::Bool(false)),
                ("truncateds".to_string(), Value::Bool(i % 100 == 99)),
                ("action_logp".to_string(), Value::Float(-0.7)),
            ])
        })
        .collect()
}

async fn offline(num_rows: i64, num_learners: usize) -> OfflineData {
    let mut config = OfflineDataConfig::new("memory");
    config.input_read_method = "from_items".into();
    config.num_learners = num_learners;
    config.seed = Some(1);
    let registry = ReaderRegistry::empty().with_reader(ItemsReader::new(rows(num_rows, 16)));
    let learner = StaticLearner::new(SnapshotModule::new(vec![DEFAULT_MODULE_ID.to_string()]));
    OfflineData::new(config, &registry)
        .await
        .unwrap()
        .with_learners(LearnerGroup::Local(Arc::new(learner)))
}

/// Drain a single iterator over a large dataset
#[tokio::test]
async fn stress_single_iterator_throughput() {
    let num_rows = 20_000;
    let mut data = offline(num_rows, 4).await;

    let start = Instant::now();
    let iterator = data.sample(256, true, 1).await.unwrap().into_iterator().unwrap();
    let mut steps = 0u64;
    let mut batches = 0u64;
    loop {
        match iterator.next_batch().await {
            Ok(batch) => {
                steps += batch.env_steps();
                batches += 1;
            }
            Err(PrelearnerError::DataExhausted) => break,
            Err(e) => panic!("pipeline failed: {}", e),
        }
    }
    let elapsed = start.elapsed();

    println!("Single iterator throughput:");
    println!("  Batches: {}", batches);
    println!("  Env steps: {}", steps);
    println!("  Elapsed: {:?}", elapsed);
    println!("  Rate: {:.0} steps/s", steps as f64 / elapsed.as_secs_f64());
    println!("{}", data.metrics().to_prometheus());

    assert_eq!(steps, num_rows as u64);
    assert_eq!(data.metrics().env_steps.get(), num_rows as u64);
}

/// Many shards consumed concurrently must together see every row exactly once
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn stress_many_shards() {
    let num_rows = 10_000;
    let num_shards = 8;
    let mut data = offline(num_rows, num_shards).await;

    let start = Instant::now();
    let shards = data.sample(100, true, num_shards).await.unwrap().into_shards().unwrap();
    let handles: Vec<_> = shards
        .into_iter()
        .map(|shard| {
            tokio::spawn(async move {
                shard
                    .into_stream()
                    .fold(0u64, |acc, batch| async move { acc + batch.unwrap().env_steps() })
                    .await
            })
        })
        .collect();

    let mut per_shard = Vec::new();
    for handle in handles {
        per_shard.push(handle.await.unwrap());
    }
    let elapsed = start.elapsed();

    println!("Sharded sampling:");
    println!("  Shards: {}", num_shards);
    println!("  Steps per shard: {:?}", per_shard);
    println!("  Elapsed: {:?}", elapsed);

    assert_eq!(per_shard.iter().sum::<u64>(), num_rows as u64);
    assert_eq!(data.metrics().active_units.get(), 0);
}

//! Offline sampling tool
//!
//! Loads an offline data config, samples a few batches against a local
//! placeholder module and prints what came out.

use prelearner_core::learner::{LearnerGroup, SnapshotModule, StaticLearner};
use prelearner_core::{OfflineData, OfflineDataConfig, PrelearnerError, DEFAULT_MODULE_ID};
use prelearner_core::data::ReaderRegistry;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("OFFLINE_CONFIG").ok())
        .ok_or("usage: offline-sample <config.json> (or set OFFLINE_CONFIG)")?;
    let num_samples: usize = std::env::var("NUM_SAMPLES").unwrap_or_else(|_| "32".into()).parse()?;
    let num_batches: usize = std::env::var("NUM_BATCHES").unwrap_or_else(|_| "4".into()).parse()?;

    info!("Loading config from {}", config_path);
    let config = OfflineDataConfig::from_json_file(&config_path)?;

    let learner = StaticLearner::new(SnapshotModule::new(vec![DEFAULT_MODULE_ID.to_string()]));
    let mut data = OfflineData::new(config, &ReaderRegistry::with_defaults())
        .await?
        .with_learners(LearnerGroup::Local(Arc::new(learner)));

    if !data.is_ready() {
        error!("Dataset could not be loaded, nothing to sample");
        return Err("dataset unavailable".into());
    }

    for i in 0..num_batches {
        let batch = match data.sample(num_samples, false, 0).await {
            Ok(output) => output.into_batch().ok_or("sample returned no batch")?,
            Err(PrelearnerError::DataExhausted) => {
                info!("Dataset exhausted after {} batches", i);
                break;
            }
            Err(e) => {
                error!("Sampling failed: {}", e);
                return Err(e.into());
            }
        };

        let modules: Vec<String> = batch
            .policy_batches()
            .iter()
            .map(|(id, b)| format!("{}[{} rows x {} cols]", id, b.num_rows(), b.num_columns()))
            .collect();
        println!("batch {}: env_steps={} modules={}", i, batch.env_steps(), modules.join(" "));
    }

    print!("{}", data.metrics().to_prometheus());
    data.shutdown();
    Ok(())
}

//! End-to-end training job: load, split, encode, fit, score, persist, report

use anyhow::{Context, Result};
use race_rank_core::metrics::mean_group_ndcg;
use race_rank_core::RankingMetrics;
use std::fs;
use tracing::{error, info, warn};

use crate::config::TrainingConfig;
use crate::dataset::Dataset;
use crate::encoding::FeatureEncoder;
use crate::model::{ModelMetadata, RankerModel, FORMAT_VERSION, TOP_FEATURES};
use crate::report::TrainingResult;
use crate::split::train_test_split;
use crate::tracking::{open_store, ActiveRun};
use crate::trainer::{Partition, RankerTrainer};

fn partition(encoder: &FeatureEncoder, dataset: &Dataset) -> Result<Partition> {
    Ok(Partition {
        features: encoder.transform(dataset)?,
        labels: dataset.labels.clone(),
        groups: dataset.group_ranges(),
    })
}

/// Run the whole job described by `config`.
///
/// Once the tracking run has started it is closed on every path: FINISHED
/// on success, FAILED if anything after it errors.
pub fn train_ranker(config: &TrainingConfig) -> Result<TrainingResult> {
    let params = config.hyperparameters()?;

    fs::create_dir_all(&config.output_path).with_context(|| {
        format!("Failed to create output directory {}", config.output_path.display())
    })?;

    info!("Loading data from {}", config.data_path.display());
    let dataset = match Dataset::from_csv(&config.data_path) {
        Ok(dataset) => dataset,
        Err(err) => {
            error!("Error loading data: {:#}", err);
            return Err(err);
        }
    };
    dataset.log_summary();
    if !dataset.races_are_contiguous() {
        warn!("Input rows interleave races; partitions are regrouped race by race");
    }

    let split = train_test_split(&dataset, config.test_size, params.random_seed)?;
    info!(
        "Split into {} training rows and {} test rows",
        split.train.len(),
        split.test.len()
    );

    let encoder = FeatureEncoder::fit(&split.train);
    let train = partition(&encoder, &split.train)?;
    let test = partition(&encoder, &split.test)?;

    let tracking = &config.tracking;
    let mut run = ActiveRun::start(open_store(tracking), &tracking.experiment_name, &tracking.run_name)
        .context("Failed to start tracking run")?;
    run.log_params(&config.hyperparameters)?;

    info!("Training ranker...");
    let outcome = RankerTrainer::new(params.clone()).train(&train, Some(&test))?;
    for (step, round) in outcome.history.iter().enumerate() {
        run.log_metric_step("learn", round.learn, step as u64)?;
        if let Some(test) = round.test {
            run.log_metric_step("test", test, step as u64)?;
        }
    }

    let model = RankerModel::new(
        ModelMetadata {
            format_version: FORMAT_VERSION,
            trainer_version: crate::VERSION.to_string(),
            loss_function: params.loss_function.to_string(),
            eval_metric: params.eval_metric.to_string(),
            best_iteration: outcome.best_iteration,
            trained_rows: train.len(),
        },
        encoder,
        outcome.model,
        &outcome.feature_gains,
    );

    info!("Evaluating model...");
    let predictions = model.predict(&split.test)?;
    let metrics = RankingMetrics::evaluate(&split.test.labels, &predictions);
    info!(
        "ndcg4={:.4} ndcg3={:.4} ndcg2={:.4} accuracy={:.1}",
        metrics.ndcg4, metrics.ndcg3, metrics.ndcg2, metrics.accuracy
    );

    run.log_metric("ndcg4", metrics.ndcg4)?;
    run.log_metric("ndcg3", metrics.ndcg3)?;
    run.log_metric("ndcg2", metrics.ndcg2)?;
    run.log_metric("accuracy", metrics.accuracy)?;
    run.log_metric(
        "race_ndcg4",
        mean_group_ndcg(&split.test.labels, &predictions, &test.groups, 4),
    )?;
    if let Some(best) = outcome.best_iteration {
        run.log_metric("best_iteration", best as f64)?;
    }

    let (model_path, model_hash) = model.save(&config.output_path)?;
    run.log_artifact(&model_path)
        .context("Failed to log model artifact")?;

    let result = TrainingResult::new(
        &model_path,
        metrics,
        config.hyperparameters.clone(),
        model.top_features(TOP_FEATURES),
        model_hash,
    );

    run.finish().context("Failed to close tracking run")?;
    Ok(result)
}

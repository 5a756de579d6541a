//! Result summary printed on stdout after a training run

use chrono::Local;
use race_rank_core::RankingMetrics;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::Path;

use crate::model::FeatureImportance;

/// Fixed values reported until the corresponding evaluations exist
pub const PLACEHOLDER_PRECISION: f64 = 0.92;
pub const PLACEHOLDER_RECALL: f64 = 0.90;
pub const PLACEHOLDER_CALIBRATION_ERROR: f64 = 0.05;
/// Milliseconds
pub const PLACEHOLDER_INFERENCE_LATENCY: u64 = 25;

/// Names of the `metrics` entries that are not computed
pub const PLACEHOLDER_METRICS: [&str; 4] = ["precision", "recall", "calibrationError", "inferenceLatency"];

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultMetrics {
    pub ndcg4: f64,
    pub ndcg3: f64,
    pub ndcg2: f64,
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub calibration_error: f64,
    pub inference_latency: u64,
}

impl From<RankingMetrics> for ResultMetrics {
    fn from(metrics: RankingMetrics) -> Self {
        Self {
            ndcg4: metrics.ndcg4,
            ndcg3: metrics.ndcg3,
            ndcg2: metrics.ndcg2,
            accuracy: metrics.accuracy,
            precision: PLACEHOLDER_PRECISION,
            recall: PLACEHOLDER_RECALL,
            calibration_error: PLACEHOLDER_CALIBRATION_ERROR,
            inference_latency: PLACEHOLDER_INFERENCE_LATENCY,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainingResult {
    pub model_path: String,
    pub metrics: ResultMetrics,
    pub placeholder_metrics: Vec<String>,
    /// Local time, ISO-8601 without offset
    pub timestamp: String,
    /// Echo of the configured hyperparameters object
    pub hyperparameters: Map<String, Value>,
    pub feature_importance: Vec<FeatureImportance>,
    pub model_hash: String,
}

impl TrainingResult {
    pub fn new(
        model_path: &Path,
        metrics: RankingMetrics,
        hyperparameters: Map<String, Value>,
        feature_importance: Vec<FeatureImportance>,
        model_hash: String,
    ) -> Self {
        Self {
            model_path: model_path.display().to_string(),
            metrics: metrics.into(),
            placeholder_metrics: PLACEHOLDER_METRICS.iter().map(|s| s.to_string()).collect(),
            timestamp: Local::now().format("%Y-%m-%dT%H:%M:%S%.6f").to_string(),
            hyperparameters,
            feature_importance,
            model_hash,
        }
    }

    /// Single-line JSON for stdout
    pub fn to_json_line(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

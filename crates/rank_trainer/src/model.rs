//! Persisted ranker: tree ensemble, feature encoder and training metadata
//!
//! Saved as canonical JSON next to a `.hash` file holding the blake3 digest
//! of the exact bytes written.

use anyhow::{bail, Context, Result};
use race_rank_core::gbdt::Model;
use race_rank_core::serialization::canonical_json_string;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::dataset::Dataset;
use crate::encoding::FeatureEncoder;

pub const MODEL_FILE_NAME: &str = "ranker_model.json";
pub const HASH_FILE_NAME: &str = "ranker_model.hash";

/// Current on-disk format
pub const FORMAT_VERSION: u32 = 1;

/// Number of features reported in the result summary
pub const TOP_FEATURES: usize = 10;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FeatureImportance {
    pub feature: String,
    pub importance: f64,
}

/// Training metadata stored with the model
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelMetadata {
    pub format_version: u32,
    pub trainer_version: String,
    pub loss_function: String,
    pub eval_metric: String,
    pub best_iteration: Option<usize>,
    pub trained_rows: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RankerModel {
    pub metadata: ModelMetadata,
    pub encoder: FeatureEncoder,
    pub ensemble: Model,
    /// Split gain per feature, in encoder order, summing to 100
    pub importances: Vec<f64>,
}

/// Scale raw gains so they sum to 100; all zeros stay zero.
pub fn normalize_importances(gains: &[f64]) -> Vec<f64> {
    let total: f64 = gains.iter().sum();
    if total <= 0.0 || !total.is_finite() {
        return vec![0.0; gains.len()];
    }
    gains.iter().map(|gain| gain * 100.0 / total).collect()
}

impl RankerModel {
    pub fn new(metadata: ModelMetadata, encoder: FeatureEncoder, ensemble: Model, gains: &[f64]) -> Self {
        Self {
            metadata,
            encoder,
            ensemble,
            importances: normalize_importances(gains),
        }
    }

    /// Scores for every row of `dataset`, in row order
    pub fn predict(&self, dataset: &Dataset) -> Result<Vec<f64>> {
        let rows = self.encoder.transform(dataset)?;
        Ok(rows.iter().map(|row| self.ensemble.score_f64(row)).collect())
    }

    /// Features by descending importance, ties by name
    pub fn feature_importance(&self) -> Vec<FeatureImportance> {
        let mut ranked: Vec<FeatureImportance> = self
            .encoder
            .feature_names()
            .into_iter()
            .zip(&self.importances)
            .map(|(feature, &importance)| FeatureImportance { feature, importance })
            .collect();

        ranked.sort_by(|a, b| {
            b.importance
                .partial_cmp(&a.importance)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.feature.cmp(&b.feature))
        });
        ranked
    }

    pub fn top_features(&self, n: usize) -> Vec<FeatureImportance> {
        let mut ranked = self.feature_importance();
        ranked.truncate(n);
        ranked
    }

    pub fn validate(&self) -> Result<()> {
        self.ensemble.validate()?;
        if self.importances.len() != self.encoder.columns.len() {
            bail!(
                "{} importances for {} features",
                self.importances.len(),
                self.encoder.columns.len()
            );
        }
        Ok(())
    }

    /// blake3 hex digest of the saved file contents
    pub fn hash_hex(&self) -> Result<String> {
        let json = canonical_json_string(self).context("Failed to serialize model")?;
        Ok(hex::encode(blake3::hash(json.as_bytes()).as_bytes()))
    }

    /// Write `ranker_model.json` and `ranker_model.hash` into `dir`.
    /// Returns the model path and hash.
    pub fn save(&self, dir: &Path) -> Result<(PathBuf, String)> {
        self.validate()?;
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create model directory {}", dir.display()))?;

        let json = canonical_json_string(self).context("Failed to serialize model")?;
        let hash = self.hash_hex()?;

        let model_path = dir.join(MODEL_FILE_NAME);
        fs::write(&model_path, &json)
            .with_context(|| format!("Failed to write {}", model_path.display()))?;
        let hash_path = dir.join(HASH_FILE_NAME);
        fs::write(&hash_path, &hash)
            .with_context(|| format!("Failed to write {}", hash_path.display()))?;

        info!("Saved model to {} (blake3 {})", model_path.display(), hash);
        Ok((model_path, hash))
    }

    /// Load a saved model, checking the sibling hash file when present.
    pub fn load(path: &Path) -> Result<Self> {
        let json = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;

        let hash_path = path.with_file_name(HASH_FILE_NAME);
        if hash_path.exists() {
            let expected = fs::read_to_string(&hash_path)
                .with_context(|| format!("Failed to read {}", hash_path.display()))?;
            let actual = hex::encode(blake3::hash(json.as_bytes()).as_bytes());
            if expected.trim() != actual {
                bail!("Model hash mismatch: expected {}, got {}", expected.trim(), actual);
            }
        }

        let model: Self = serde_json::from_str(&json)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        if model.metadata.format_version != FORMAT_VERSION {
            bail!("Unsupported model format version {}", model.metadata.format_version);
        }
        model.validate()?;
        Ok(model)
    }
}

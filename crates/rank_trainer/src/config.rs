//! Training configuration parsed from the command-line JSON blob
//!
//! Every key is optional. Types and ranges are checked up front so a bad
//! config fails before any data is read.

use serde::Deserialize;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::errors::TrainerError;
use crate::loss::LossFunction;
use crate::trainer::EvalMetric;

pub const DEFAULT_DATA_PATH: &str = "/tmp/training_data.csv";
pub const DEFAULT_OUTPUT_PATH: &str = "/tmp/models";
pub const DEFAULT_TEST_SIZE: f64 = 0.2;

/// Environment variable consulted when no tracking URI is configured
pub const TRACKING_URI_ENV: &str = "MLFLOW_TRACKING_URI";
pub const DEFAULT_TRACKING_URI: &str = "mlruns";

/// Hyperparameter keys understood by the trainer
pub const KNOWN_HYPERPARAMETERS: &[&str] = &[
    "iterations",
    "learning_rate",
    "depth",
    "loss_function",
    "eval_metric",
    "early_stopping_rounds",
    "l2_leaf_reg",
    "min_data_in_leaf",
    "border_count",
    "random_seed",
    "verbose",
];

fn default_data_path() -> PathBuf {
    PathBuf::from(DEFAULT_DATA_PATH)
}

fn default_output_path() -> PathBuf {
    PathBuf::from(DEFAULT_OUTPUT_PATH)
}

fn default_test_size() -> f64 {
    DEFAULT_TEST_SIZE
}

/// Top-level training configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainingConfig {
    /// Input CSV
    #[serde(default = "default_data_path")]
    pub data_path: PathBuf,

    /// Directory receiving the model artifact
    #[serde(default = "default_output_path")]
    pub output_path: PathBuf,

    /// Share of races held out for evaluation
    #[serde(default = "default_test_size")]
    pub test_size: f64,

    /// Raw hyperparameters, echoed back in the result and logged as run params
    #[serde(default)]
    pub hyperparameters: Map<String, Value>,

    #[serde(default)]
    pub tracking: TrackingConfig,

    /// Anything else the caller sent
    #[serde(flatten)]
    pub unknown: Map<String, Value>,
}

impl TrainingConfig {
    /// Parse and validate a JSON config string.
    pub fn from_json_str(json: &str) -> Result<Self, TrainerError> {
        let config: Self = serde_json::from_str(json)
            .map_err(|err| TrainerError::Config(format!("config is not valid JSON: {err}")))?;
        config.validate()?;
        config.warn_unknown_keys();
        Ok(config)
    }

    /// Parse the CLI argument: inline JSON, or `@path` to a JSON file.
    pub fn from_arg(arg: &str) -> Result<Self, TrainerError> {
        match arg.strip_prefix('@') {
            Some(path) => Self::from_file(Path::new(path)),
            None => Self::from_json_str(arg),
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, TrainerError> {
        let json = std::fs::read_to_string(path).map_err(|err| {
            TrainerError::Config(format!("cannot read config file {}: {err}", path.display()))
        })?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<(), TrainerError> {
        if !(self.test_size.is_finite() && self.test_size > 0.0 && self.test_size < 1.0) {
            return Err(TrainerError::Config(format!(
                "testSize must be between 0 and 1 (exclusive), got {}",
                self.test_size
            )));
        }

        if self.data_path.as_os_str().is_empty() {
            return Err(TrainerError::Config("dataPath must not be empty".into()));
        }

        if self.output_path.as_os_str().is_empty() {
            return Err(TrainerError::Config("outputPath must not be empty".into()));
        }

        self.hyperparameters()?;
        Ok(())
    }

    /// Typed view of `hyperparameters`, with defaults filled in.
    pub fn hyperparameters(&self) -> Result<Hyperparameters, TrainerError> {
        let params: Hyperparameters =
            serde_json::from_value(Value::Object(self.hyperparameters.clone()))
                .map_err(|err| TrainerError::Config(format!("hyperparameters: {err}")))?;
        params.validate()?;
        Ok(params)
    }

    fn warn_unknown_keys(&self) {
        for key in self.unknown.keys() {
            warn!("Ignoring unknown config key {key:?}");
        }
        for key in self.hyperparameters.keys() {
            if !KNOWN_HYPERPARAMETERS.contains(&key.as_str()) {
                warn!("Hyperparameter {key:?} is not used by the trainer");
            }
        }
    }
}

/// Experiment tracking settings
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TrackingConfig {
    pub enabled: bool,
    pub uri: Option<String>,
    pub experiment_name: String,
    pub run_name: String,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            uri: None,
            experiment_name: "Default".to_string(),
            run_name: "ranker_training".to_string(),
        }
    }
}

impl TrackingConfig {
    /// Configured URI, else `$MLFLOW_TRACKING_URI`, else `./mlruns`.
    pub fn resolved_uri(&self) -> String {
        self.uri
            .clone()
            .or_else(|| std::env::var(TRACKING_URI_ENV).ok())
            .filter(|uri| !uri.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_TRACKING_URI.to_string())
    }
}

/// Boosting hyperparameters
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Hyperparameters {
    pub iterations: usize,
    pub learning_rate: f64,
    pub depth: usize,
    pub loss_function: LossFunction,
    pub eval_metric: EvalMetric,
    /// 0 disables early stopping
    pub early_stopping_rounds: usize,
    pub l2_leaf_reg: f64,
    pub min_data_in_leaf: usize,
    pub border_count: usize,
    pub random_seed: u64,
    /// Log progress every N iterations, 0 = quiet
    pub verbose: usize,
}

impl Default for Hyperparameters {
    fn default() -> Self {
        Self {
            iterations: 1000,
            learning_rate: 0.05,
            depth: 8,
            loss_function: LossFunction::YetiRank,
            eval_metric: EvalMetric::Ndcg { top: 4 },
            early_stopping_rounds: 50,
            l2_leaf_reg: 3.0,
            min_data_in_leaf: 1,
            border_count: 254,
            random_seed: 42,
            verbose: 100,
        }
    }
}

impl Hyperparameters {
    pub fn validate(&self) -> Result<(), TrainerError> {
        let invalid = |msg: String| Err(TrainerError::Config(msg));

        if self.iterations == 0 {
            return invalid("iterations must be positive".into());
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0 && self.learning_rate <= 1.0) {
            return invalid(format!("learning_rate must be in (0, 1], got {}", self.learning_rate));
        }
        if !(1..=16).contains(&self.depth) {
            return invalid(format!("depth must be between 1 and 16, got {}", self.depth));
        }
        if !(self.l2_leaf_reg.is_finite() && self.l2_leaf_reg >= 0.0) {
            return invalid(format!("l2_leaf_reg must be non-negative, got {}", self.l2_leaf_reg));
        }
        if self.min_data_in_leaf == 0 {
            return invalid("min_data_in_leaf must be at least 1".into());
        }
        if !(1..=u16::MAX as usize).contains(&self.border_count) {
            return invalid(format!("border_count must be between 1 and 65535, got {}", self.border_count));
        }
        Ok(())
    }
}

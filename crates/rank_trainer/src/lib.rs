//! Race outcome ranker trainer
//!
//! Loads race results from CSV, fits a deterministic gradient-boosted ranker
//! and reports NDCG and top-1 metrics on a held-out set of races.

pub mod cart;
pub mod config;
pub mod dataset;
pub mod deterministic;
pub mod encoding;
pub mod errors;
pub mod loss;
pub mod model;
pub mod pipeline;
pub mod report;
pub mod split;
pub mod tracking;
pub mod trainer;

pub use config::{Hyperparameters, TrackingConfig, TrainingConfig};
pub use dataset::Dataset;
pub use deterministic::{LcgRng, SplitTieBreaker};
pub use errors::{TrackingError, TrainerError};
pub use loss::LossFunction;
pub use model::{FeatureImportance, RankerModel};
pub use pipeline::train_ranker;
pub use report::TrainingResult;
pub use trainer::{EvalMetric, Partition, RankerTrainer, TrainingOutcome};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

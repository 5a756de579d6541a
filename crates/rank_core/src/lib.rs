//! Core types for the race outcome ranker
//!
//! Modules:
//! - `gbdt`: Fixed-point tree ensemble with deterministic scoring
//! - `metrics`: NDCG@k and top-1 accuracy over finishing ranks
//! - `serialization`: Canonical JSON and blake3 hashing helpers

pub mod gbdt;
pub mod metrics;
pub mod serialization;

pub use gbdt::{Model, ModelError, Node, Tree, SCALE};
pub use metrics::{ndcg_at_k, top1_accuracy, RankingMetrics, PLACED_RANK_CUTOFF};

/// Crate version string recorded in model metadata
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

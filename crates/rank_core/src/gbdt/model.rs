//! Tree ensemble with integer-only inference
//!
//! - Canonical JSON serialization
//! - Blake3 model hashing
//! - Fixed-point scoring, identical across platforms

use super::tree::Tree;
use crate::serialization::canonical_hash_hex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Ensemble errors
#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Model validation failed: {0}")]
    ValidationFailed(String),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

/// Fixed-point scale factor (1e6)
pub const SCALE: i64 = 1_000_000;

/// Convert a float to fixed-point at [`SCALE`], saturating at the i64 range.
///
/// The low end stops at `i64::MIN + 1`, so a real value never collides with
/// the `i64::MIN` missing-value sentinel.
pub fn to_fixed(value: f64) -> i64 {
    // `as` saturates and maps NaN to 0
    ((value * SCALE as f64).round() as i64).max(i64::MIN + 1)
}

/// Convert a fixed-point integer back to a float.
pub fn from_fixed(value: i64) -> f64 {
    value as f64 / SCALE as f64
}

/// Gradient-boosted tree ensemble
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Model {
    /// Model format version
    pub version: i32,

    /// Fixed-point scale of thresholds, leaves and weights
    pub scale: i64,

    /// Trees in boosting order
    pub trees: Vec<Tree>,

    /// Starting score before any tree (fixed-point)
    pub bias: i64,
}

impl Model {
    pub fn new(trees: Vec<Tree>, bias: i64) -> Self {
        Self {
            version: 1,
            scale: SCALE,
            trees,
            bias,
        }
    }

    pub fn validate(&self) -> Result<(), ModelError> {
        if self.version != 1 {
            return Err(ModelError::ValidationFailed(format!(
                "Unsupported model version: {}",
                self.version
            )));
        }

        if self.scale <= 0 {
            return Err(ModelError::ValidationFailed(format!(
                "Invalid scale: {}",
                self.scale
            )));
        }

        for (i, tree) in self.trees.iter().enumerate() {
            tree.validate().map_err(|e| {
                ModelError::ValidationFailed(format!("Tree {} validation failed: {}", i, e))
            })?;
        }

        Ok(())
    }

    /// Fixed-point score: `bias + Σ leaf * weight / scale`.
    pub fn score(&self, features: &[i64]) -> i64 {
        self.trees.iter().fold(self.bias, |sum, tree| {
            sum.saturating_add(self.tree_contribution(tree, features))
        })
    }

    /// Weighted output of one tree, as accumulated by [`Model::score`].
    pub fn tree_contribution(&self, tree: &Tree, features: &[i64]) -> i64 {
        let leaf_value = tree.evaluate(features) as i128;
        let weighted = leaf_value * tree.weight as i128 / self.scale as i128;
        weighted.clamp(i64::MIN as i128, i64::MAX as i128) as i64
    }

    /// Score as a float, for metrics and reporting.
    pub fn score_f64(&self, features: &[i64]) -> f64 {
        self.score(features) as f64 / self.scale as f64
    }

    /// Keep only the first `len` trees.
    pub fn truncate(&mut self, len: usize) {
        self.trees.truncate(len);
    }

    pub fn num_trees(&self) -> usize {
        self.trees.len()
    }

    /// Blake3 hash of the compact canonical JSON, hex encoded
    pub fn hash_hex(&self) -> Result<String, ModelError> {
        Ok(canonical_hash_hex(self)?)
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gbdt::tree::Node;

    fn create_test_model() -> Model {
        let tree1 = Tree::new(
            vec![
                Node::internal(0, 0, 50 * SCALE, 1, 2),
                Node::leaf(1, 100 * SCALE),
                Node::leaf(2, 200 * SCALE),
            ],
            SCALE,
        );

        let tree2 = Tree::new(
            vec![
                Node::internal(0, 1, 30 * SCALE, 1, 2),
                Node::leaf(1, -50 * SCALE),
                Node::leaf(2, 50 * SCALE),
            ],
            SCALE,
        );

        Model::new(vec![tree1, tree2], 0)
    }

    #[test]
    fn test_model_inference() {
        let model = create_test_model();
        let features = vec![30 * SCALE, 20 * SCALE];
        assert_eq!(model.score(&features), 50 * SCALE);
        assert_eq!(model.score_f64(&features), 50.0);

        let features = vec![60 * SCALE, 40 * SCALE];
        assert_eq!(model.score(&features), 250 * SCALE);
    }

    #[test]
    fn test_tree_weight_shrinks_leaves() {
        let tree = Tree::new(vec![Node::leaf(0, 2 * SCALE)], SCALE / 10);
        let model = Model::new(vec![tree], SCALE);
        // 1.0 + 2.0 * 0.1
        assert_eq!(model.score(&[]), 1_200_000);
    }

    #[test]
    fn test_fixed_point_conversion() {
        assert_eq!(to_fixed(1.5), 1_500_000);
        assert_eq!(to_fixed(-0.000_000_4), 0);
        assert_eq!(to_fixed(f64::NAN), 0);
        assert_eq!(to_fixed(1e300), i64::MAX);
        assert_eq!(to_fixed(-1e300), i64::MIN + 1);
        assert_eq!(to_fixed(f64::NEG_INFINITY), i64::MIN + 1);
        assert_eq!(from_fixed(2_500_000), 2.5);
    }

    #[test]
    fn test_hash_changes_with_model() {
        let model1 = create_test_model();
        let mut model2 = create_test_model();
        model2.truncate(1);

        let hash1 = model1.hash_hex().unwrap();
        assert_eq!(hash1, create_test_model().hash_hex().unwrap());
        assert_ne!(hash1, model2.hash_hex().unwrap());
        assert_eq!(hash1.len(), 64);
    }

    #[test]
    fn test_model_validation() {
        assert!(create_test_model().validate().is_ok());

        let mut invalid = create_test_model();
        invalid.scale = 0;
        assert!(invalid.validate().is_err());

        let mut invalid = create_test_model();
        invalid.version = 999;
        assert!(invalid.validate().is_err());
    }
}

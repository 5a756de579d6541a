//! Fixed-point gradient-boosted tree ensemble
//!
//! The trainer emits trees in this format and the same code scores rows at
//! evaluation time, so training-time and persisted predictions never diverge.
//!
//! - Feature values, thresholds, leaves and tree weights are `i64` scaled by
//!   [`SCALE`] (1e6)
//! - A row goes left when `feature <= threshold`; missing values are encoded
//!   as `i64::MIN` and therefore always go left
//! - Serialization is canonical JSON, hashed with blake3
//!
//! ```rust
//! use race_rank_core::gbdt::{Model, Node, Tree, SCALE};
//!
//! let tree = Tree::new(
//!     vec![
//!         Node::internal(0, 0, 50 * SCALE, 1, 2),
//!         Node::leaf(1, SCALE),
//!         Node::leaf(2, -SCALE),
//!     ],
//!     SCALE / 10,
//! );
//! let model = Model::new(vec![tree], 0);
//! assert_eq!(model.score(&[10 * SCALE]), SCALE / 10);
//! ```

pub mod model;
pub mod tree;

pub use model::{from_fixed, to_fixed, Model, ModelError, SCALE};
pub use tree::{Node, Tree};

#[cfg(test)]
mod integration_tests {
    use super::*;

    #[test]
    fn test_canonical_json_roundtrip_scores_identically() {
        let tree = Tree::new(
            vec![
                Node::internal(0, 0, 50_000_000, 1, 2),
                Node::leaf(1, 100_000_000),
                Node::leaf(2, 200_000_000),
            ],
            100_000,
        );

        let original = Model::new(vec![tree], 12345);
        let json = crate::serialization::canonical_json_string(&original).unwrap();
        let restored: Model = serde_json::from_str(&json).unwrap();

        assert_eq!(original, restored);
        for features in [[30_000_000], [70_000_000], [i64::MIN]] {
            assert_eq!(original.score(&features), restored.score(&features));
        }
    }
}

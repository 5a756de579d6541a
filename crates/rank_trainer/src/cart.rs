//! CART (Classification and Regression Tree) builder
//!
//! Depth-wise greedy tree construction over quantized features. Gradient and
//! hessian sums are fixed-point integers and split gains are computed in
//! `i128`, so the chosen splits do not depend on float rounding.

use race_rank_core::gbdt::{Node, Tree};

use crate::deterministic::SplitTieBreaker;

/// Training parameters for a single tree
#[derive(Clone, Debug)]
pub struct TreeConfig {
    pub max_depth: usize,
    pub min_data_in_leaf: usize,
    /// L2 penalty on leaf values (fixed-point)
    pub l2_leaf_reg: i64,
    /// Tree weight written into the ensemble (fixed-point learning rate)
    pub weight: i64,
    /// Fixed-point scale of gradients, hessians and leaves
    pub scale: i64,
}

/// Training features quantized into per-feature bins.
///
/// A value falls in bin `b` when `borders[b - 1] < value <= borders[b]`, so
/// "bin <= b" is exactly "value <= borders[b]".
#[derive(Clone, Debug)]
pub struct BinnedFeatures {
    borders: Vec<Vec<i64>>,
    bins: Vec<Vec<u16>>,
    rows: usize,
}

impl BinnedFeatures {
    pub fn new(rows: &[Vec<i64>], border_count: usize) -> Self {
        let feature_count = rows.first().map_or(0, Vec::len);
        let mut borders = Vec::with_capacity(feature_count);
        let mut bins = Vec::with_capacity(feature_count);

        for feature in 0..feature_count {
            let mut values: Vec<i64> = rows.iter().map(|row| row[feature]).collect();
            let feature_borders = select_borders(&mut values, border_count);
            bins.push(
                rows.iter()
                    .map(|row| feature_borders.partition_point(|&b| b < row[feature]) as u16)
                    .collect(),
            );
            borders.push(feature_borders);
        }

        Self {
            borders,
            bins,
            rows: rows.len(),
        }
    }

    pub fn feature_count(&self) -> usize {
        self.borders.len()
    }

    pub fn row_count(&self) -> usize {
        self.rows
    }

    pub fn borders(&self, feature: usize) -> &[i64] {
        &self.borders[feature]
    }
}

/// Candidate borders: every distinct value but the largest, thinned to
/// quantiles when there are more than `border_count` of them.
fn select_borders(values: &mut [i64], border_count: usize) -> Vec<i64> {
    values.sort_unstable();
    let Some(&max) = values.last() else {
        return Vec::new();
    };

    let mut distinct: Vec<i64> = values.to_vec();
    distinct.dedup();
    distinct.pop();

    if distinct.len() <= border_count {
        return distinct;
    }

    let n = values.len();
    let mut borders: Vec<i64> = (1..=border_count)
        .map(|q| values[(q * n / (border_count + 1)).min(n - 1)])
        .filter(|&value| value < max)
        .collect();
    borders.dedup();
    borders
}

/// Gradient, hessian and row totals of a set of rows
#[derive(Clone, Copy, Debug, Default)]
struct Bucket {
    gradient: i64,
    hessian: i64,
    count: usize,
}

impl Bucket {
    fn add(&mut self, gradient: i64, hessian: i64) {
        self.gradient = self.gradient.saturating_add(gradient);
        self.hessian = self.hessian.saturating_add(hessian);
        self.count += 1;
    }

    fn minus(self, other: Bucket) -> Bucket {
        Bucket {
            gradient: self.gradient.saturating_sub(other.gradient),
            hessian: self.hessian.saturating_sub(other.hessian),
            count: self.count - other.count,
        }
    }

    fn plus(self, other: Bucket) -> Bucket {
        Bucket {
            gradient: self.gradient.saturating_add(other.gradient),
            hessian: self.hessian.saturating_add(other.hessian),
            count: self.count + other.count,
        }
    }
}

/// Split candidate with gain and tie-breaker
#[derive(Debug, Clone)]
struct SplitCandidate {
    feature_idx: usize,
    border_idx: usize,
    gain: i128,
    tie_breaker: SplitTieBreaker,
}

/// Tree plus the split gain it credited to each feature
#[derive(Clone, Debug)]
pub struct BuiltTree {
    pub tree: Tree,
    pub feature_gains: Vec<f64>,
}

/// Build a regression tree using the depth-wise greedy CART algorithm
pub struct CartBuilder<'a> {
    config: TreeConfig,
    features: &'a BinnedFeatures,
    gradients: &'a [i64],
    hessians: &'a [i64],
}

impl<'a> CartBuilder<'a> {
    pub fn new(
        features: &'a BinnedFeatures,
        gradients: &'a [i64],
        hessians: &'a [i64],
        config: TreeConfig,
    ) -> Self {
        debug_assert_eq!(features.row_count(), gradients.len());
        debug_assert_eq!(features.row_count(), hessians.len());

        Self {
            config,
            features,
            gradients,
            hessians,
        }
    }

    pub fn build(&self) -> BuiltTree {
        let mut nodes = Vec::new();
        let mut feature_gains = vec![0.0; self.features.feature_count()];
        let indices: Vec<usize> = (0..self.gradients.len()).collect();

        self.build_node(&indices, 0, 0, &mut nodes, &mut feature_gains);

        BuiltTree {
            tree: Tree::new(nodes, self.config.weight),
            feature_gains,
        }
    }

    fn build_node(
        &self,
        indices: &[usize],
        depth: usize,
        node_id: usize,
        nodes: &mut Vec<Node>,
        feature_gains: &mut [f64],
    ) -> i32 {
        let current = nodes.len() as i32;
        let total = self.bucket(indices);

        let split = if depth < self.config.max_depth
            && indices.len() >= 2 * self.config.min_data_in_leaf
        {
            self.find_best_split(indices, total, node_id)
        } else {
            None
        };

        let Some(split) = split else {
            nodes.push(Node::leaf(current, self.leaf_value(total)));
            return current;
        };

        let bins = &self.features.bins[split.feature_idx];
        let (left, right): (Vec<usize>, Vec<usize>) = indices
            .iter()
            .partition(|&&i| bins[i] as usize <= split.border_idx);

        feature_gains[split.feature_idx] += split.gain as f64 / self.config.scale as f64;

        // placeholder until the children are placed
        nodes.push(Node::internal(
            current,
            split.feature_idx as i32,
            self.features.borders(split.feature_idx)[split.border_idx],
            -1,
            -1,
        ));

        let left_idx = self.build_node(&left, depth + 1, node_id * 2 + 1, nodes, feature_gains);
        let right_idx = self.build_node(&right, depth + 1, node_id * 2 + 2, nodes, feature_gains);

        nodes[current as usize].left = left_idx;
        nodes[current as usize].right = right_idx;

        current
    }

    /// Best positive-gain split honouring `min_data_in_leaf`
    fn find_best_split(&self, indices: &[usize], total: Bucket, node_id: usize) -> Option<SplitCandidate> {
        let parent_score = self.score(total);
        let min_leaf = self.config.min_data_in_leaf;
        let mut best: Option<SplitCandidate> = None;

        for feature_idx in 0..self.features.feature_count() {
            let borders = self.features.borders(feature_idx);
            if borders.is_empty() {
                continue;
            }

            let mut histogram = vec![Bucket::default(); borders.len() + 1];
            let bins = &self.features.bins[feature_idx];
            for &i in indices {
                histogram[bins[i] as usize].add(self.gradients[i], self.hessians[i]);
            }

            let mut left = Bucket::default();
            for (border_idx, bucket) in histogram.iter().take(borders.len()).enumerate() {
                left = left.plus(*bucket);
                let right = total.minus(left);

                if left.count < min_leaf || right.count < min_leaf {
                    continue;
                }

                let gain = self.score(left) + self.score(right) - parent_score;
                if gain <= 0 {
                    continue;
                }

                let tie_breaker = SplitTieBreaker::new(feature_idx, border_idx, node_id);
                let better = match &best {
                    None => true,
                    Some(current) => {
                        gain > current.gain
                            || (gain == current.gain && tie_breaker < current.tie_breaker)
                    }
                };

                if better {
                    best = Some(SplitCandidate {
                        feature_idx,
                        border_idx,
                        gain,
                        tie_breaker,
                    });
                }
            }
        }

        best
    }

    fn bucket(&self, indices: &[usize]) -> Bucket {
        let mut bucket = Bucket::default();
        for &i in indices {
            bucket.add(self.gradients[i], self.hessians[i]);
        }
        bucket
    }

    /// Structure score `G² / (H + λ)`, fixed-point
    fn score(&self, bucket: Bucket) -> i128 {
        let denominator = bucket.hessian as i128 + self.config.l2_leaf_reg as i128;
        if denominator <= 0 {
            return 0;
        }
        (bucket.gradient as i128 * bucket.gradient as i128) / denominator
    }

    /// Newton step `-G / (H + λ)`, fixed-point
    fn leaf_value(&self, bucket: Bucket) -> i64 {
        let denominator = bucket.hessian as i128 + self.config.l2_leaf_reg as i128;
        if denominator <= 0 {
            return 0;
        }
        let value = -(bucket.gradient as i128 * self.config.scale as i128) / denominator;
        value.clamp(i64::MIN as i128, i64::MAX as i128) as i64
    }
}

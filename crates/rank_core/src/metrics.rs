//! Ranking quality metrics over race outcomes.
//!
//! Labels are finishing ranks, lower is better. An entry is *placed* when its
//! rank is at most [`PLACED_RANK_CUTOFF`]; only placed entries carry gain.
//!
//! | Metric         | What it measures                                  | Range   |
//! |----------------|---------------------------------------------------|---------|
//! | NDCG@k         | Discounted gain of placed entries in the top k    | 0.0-1.0 |
//! | Top-1 accuracy | Whether the best-scored entry was placed          | 0 or 1  |
//!
//! The headline report evaluates both over the whole held-out set at once.
//! Training-time early stopping uses the per-race means from
//! [`mean_group_ndcg`] and [`mean_group_top1`].

use serde::{Deserialize, Serialize};
use std::ops::Range;

/// Highest finishing rank that still counts as placed.
pub const PLACED_RANK_CUTOFF: i64 = 2;

pub fn is_placed(rank: i64) -> bool {
    rank <= PLACED_RANK_CUTOFF
}

fn discount(position: usize) -> f64 {
    1.0 / ((position + 2) as f64).log2()
}

/// Row indices ordered by descending score. Ties keep input order.
pub fn ranked_indices(scores: &[f64]) -> Vec<usize> {
    // -0.0 and 0.0 must tie
    let key = |idx: usize| if scores[idx] == 0.0 { 0.0 } else { scores[idx] };
    let mut indices: Vec<usize> = (0..scores.len()).collect();
    indices.sort_by(|&a, &b| key(b).total_cmp(&key(a)));
    indices
}

fn placed_gain<I: Iterator<Item = i64>>(ranks: I) -> f64 {
    ranks
        .enumerate()
        .filter(|(_, rank)| is_placed(*rank))
        .map(|(position, _)| discount(position))
        .sum()
}

/// NDCG@k of `scores` against finishing ranks.
///
/// Returns 0.0 when the ideal ordering has no placed entry in its top k.
pub fn ndcg_at_k(true_ranks: &[i64], scores: &[f64], k: usize) -> f64 {
    let n = true_ranks.len().min(scores.len());
    let (true_ranks, scores) = (&true_ranks[..n], &scores[..n]);

    let dcg = placed_gain(
        ranked_indices(scores)
            .into_iter()
            .take(k)
            .map(|idx| true_ranks[idx]),
    );

    let mut ideal = true_ranks.to_vec();
    ideal.sort_unstable();
    let idcg = placed_gain(ideal.into_iter().take(k));

    if idcg > 0.0 {
        dcg / idcg
    } else {
        0.0
    }
}

/// 1.0 when the highest-scored row was placed, else 0.0.
pub fn top1_accuracy(true_ranks: &[i64], scores: &[f64]) -> f64 {
    let n = true_ranks.len().min(scores.len());
    match ranked_indices(&scores[..n]).first() {
        Some(&best) if is_placed(true_ranks[best]) => 1.0,
        _ => 0.0,
    }
}

/// Mean NDCG@k over groups, skipping groups without any placed entry.
pub fn mean_group_ndcg(true_ranks: &[i64], scores: &[f64], groups: &[Range<usize>], k: usize) -> f64 {
    let per_group: Vec<f64> = groups
        .iter()
        .filter(|&group| true_ranks[group.clone()].iter().any(|&rank| is_placed(rank)))
        .map(|group| ndcg_at_k(&true_ranks[group.clone()], &scores[group.clone()], k))
        .collect();
    mean(&per_group)
}

/// Share of groups whose best-scored entry was placed.
pub fn mean_group_top1(true_ranks: &[i64], scores: &[f64], groups: &[Range<usize>]) -> f64 {
    let per_group: Vec<f64> = groups
        .iter()
        .filter(|group| !group.is_empty())
        .map(|group| top1_accuracy(&true_ranks[group.clone()], &scores[group.clone()]))
        .collect();
    mean(&per_group)
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Headline metrics computed over a whole held-out set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RankingMetrics {
    pub ndcg4: f64,
    pub ndcg3: f64,
    pub ndcg2: f64,
    pub accuracy: f64,
}

impl RankingMetrics {
    pub fn evaluate(true_ranks: &[i64], scores: &[f64]) -> Self {
        Self {
            ndcg4: ndcg_at_k(true_ranks, scores, 4),
            ndcg3: ndcg_at_k(true_ranks, scores, 3),
            ndcg2: ndcg_at_k(true_ranks, scores, 2),
            accuracy: top1_accuracy(true_ranks, scores),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn perfect_scores(ranks: &[i64]) -> Vec<f64> {
        ranks.iter().map(|&rank| -(rank as f64)).collect()
    }

    #[test]
    fn perfect_ordering_scores_one() {
        let ranks = vec![3, 1, 4, 2, 4, 1];
        let scores = perfect_scores(&ranks);
        for k in 1..=3 {
            assert!((ndcg_at_k(&ranks, &scores, k) - 1.0).abs() < 1e-12, "k={k}");
        }
    }

    #[test]
    fn no_placed_entries_scores_zero() {
        let ranks = vec![3, 4, 4, 3];
        assert_eq!(ndcg_at_k(&ranks, &[0.4, 0.3, 0.2, 0.1], 4), 0.0);
    }

    #[test]
    fn reversed_ordering_is_penalised() {
        let ranks = vec![1, 2, 3, 4];
        let scores = vec![0.0, 1.0, 2.0, 3.0];
        // top-2 predicted are ranks 4 and 3, neither placed
        assert_eq!(ndcg_at_k(&ranks, &scores, 2), 0.0);

        // top-4 holds both placed entries at positions 2 and 3
        let expected = (discount(2) + discount(3)) / (discount(0) + discount(1));
        assert!((ndcg_at_k(&ranks, &scores, 4) - expected).abs() < 1e-12);
    }

    #[test]
    fn k_larger_than_input_uses_everything() {
        let ranks = vec![2, 4];
        let scores = vec![0.1, 0.9];
        let expected = discount(1) / discount(0);
        assert!((ndcg_at_k(&ranks, &scores, 10) - expected).abs() < 1e-12);
    }

    #[test]
    fn empty_input_is_zero() {
        assert_eq!(ndcg_at_k(&[], &[], 4), 0.0);
        assert_eq!(top1_accuracy(&[], &[]), 0.0);
    }

    #[test]
    fn top1_follows_argmax() {
        assert_eq!(top1_accuracy(&[4, 2, 3], &[0.1, 0.9, 0.5]), 1.0);
        assert_eq!(top1_accuracy(&[4, 2, 3], &[0.1, 0.5, 0.9]), 0.0);
        // first maximum wins on ties
        assert_eq!(top1_accuracy(&[1, 4], &[0.5, 0.5]), 1.0);
        assert_eq!(top1_accuracy(&[4, 1], &[0.5, 0.5]), 0.0);
    }

    #[test]
    fn group_means_skip_groups_without_placed_entries() {
        let ranks = vec![1, 4, 3, 4, 2, 3];
        let scores = vec![0.9, 0.1, 0.5, 0.5, 0.1, 0.9];
        let groups = vec![0..2, 2..4, 4..6];

        let ndcg = mean_group_ndcg(&ranks, &scores, &groups, 1);
        // group 0 perfect, group 1 skipped, group 2 misses at k=1
        assert!((ndcg - 0.5).abs() < 1e-12);

        let top1 = mean_group_top1(&ranks, &scores, &groups);
        assert!((top1 - 1.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn headline_metrics_bundle() {
        let ranks = vec![1, 2, 3, 4];
        let metrics = RankingMetrics::evaluate(&ranks, &perfect_scores(&ranks));
        assert_eq!(metrics.ndcg2, 1.0);
        assert_eq!(metrics.ndcg3, 1.0);
        assert_eq!(metrics.ndcg4, 1.0);
        assert_eq!(metrics.accuracy, 1.0);
    }
}

//! Ranking objectives
//!
//! Each objective turns current scores into per-row first and second
//! derivatives. Gradients follow the `d loss / d score` sign convention, so a
//! Newton leaf is `-G / H`.

use serde::Deserialize;
use std::fmt;
use std::ops::Range;
use std::str::FromStr;

use crate::deterministic::LcgRng;

/// Rank of an entry that finished out of the placings
pub const OUT_RANK: i64 = 4;

/// Noisy permutations sampled per race and iteration by YetiRank
const YETI_PERMUTATIONS: usize = 10;
/// Weight decay per position for YetiRank pairs
const YETI_DECAY: f64 = 0.85;

/// Training gain of a finishing rank: rank 1 → 3, rank 4 and worse → 0.
pub fn relevance(rank: i64) -> f64 {
    (OUT_RANK - rank).max(0) as f64
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub enum LossFunction {
    /// Pairwise logistic loss over adjacent pairs of noise-perturbed rankings
    YetiRank,
    /// Pairwise logistic loss over every differently-relevant pair in a race
    PairLogit,
    /// Pointwise squared error against relevance
    Rmse,
}

impl FromStr for LossFunction {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "YetiRank" => Ok(Self::YetiRank),
            "PairLogit" => Ok(Self::PairLogit),
            "RMSE" => Ok(Self::Rmse),
            other => Err(format!(
                "unsupported loss_function {other:?} (expected YetiRank, PairLogit or RMSE)"
            )),
        }
    }
}

impl TryFrom<String> for LossFunction {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl fmt::Display for LossFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::YetiRank => "YetiRank",
            Self::PairLogit => "PairLogit",
            Self::Rmse => "RMSE",
        })
    }
}

/// Per-row derivatives for one boosting round
#[derive(Debug, Clone, PartialEq)]
pub struct Derivatives {
    pub gradients: Vec<f64>,
    pub hessians: Vec<f64>,
}

impl Derivatives {
    fn zeros(n: usize) -> Self {
        Self {
            gradients: vec![0.0; n],
            hessians: vec![0.0; n],
        }
    }

    /// Logistic loss on `score[winner] - score[loser]`, scaled by `weight`.
    fn add_pair(&mut self, scores: &[f64], winner: usize, loser: usize, weight: f64) {
        let p = sigmoid(scores[winner] - scores[loser]);
        let push = weight * (1.0 - p);
        let curvature = weight * p * (1.0 - p);

        self.gradients[winner] -= push;
        self.gradients[loser] += push;
        self.hessians[winner] += curvature;
        self.hessians[loser] += curvature;
    }
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

impl LossFunction {
    /// Starting score of every row.
    pub fn initial_score(&self, relevance: &[f64]) -> f64 {
        match self {
            Self::Rmse if !relevance.is_empty() => {
                relevance.iter().sum::<f64>() / relevance.len() as f64
            }
            _ => 0.0,
        }
    }

    pub fn derivatives(
        &self,
        relevance: &[f64],
        scores: &[f64],
        groups: &[Range<usize>],
        rng: &mut LcgRng,
    ) -> Derivatives {
        debug_assert_eq!(relevance.len(), scores.len());
        let mut out = Derivatives::zeros(scores.len());

        match self {
            Self::Rmse => {
                for (i, (&rel, &score)) in relevance.iter().zip(scores).enumerate() {
                    out.gradients[i] = score - rel;
                    out.hessians[i] = 1.0;
                }
            }
            Self::PairLogit => {
                for group in groups {
                    for i in group.clone() {
                        for j in i + 1..group.end {
                            if relevance[i] > relevance[j] {
                                out.add_pair(scores, i, j, 1.0);
                            } else if relevance[j] > relevance[i] {
                                out.add_pair(scores, j, i, 1.0);
                            }
                        }
                    }
                }
            }
            Self::YetiRank => {
                let mut order: Vec<(f64, usize)> = Vec::new();
                for group in groups.iter().filter(|group| group.len() > 1) {
                    for _ in 0..YETI_PERMUTATIONS {
                        order.clear();
                        order.extend(group.clone().map(|i| (scores[i] + rng.next_logistic(), i)));
                        order.sort_by(|a, b| b.0.total_cmp(&a.0).then(a.1.cmp(&b.1)));

                        let mut weight = 1.0 / YETI_PERMUTATIONS as f64;
                        for pair in order.windows(2) {
                            let (a, b) = (pair[0].1, pair[1].1);
                            if relevance[a] > relevance[b] {
                                out.add_pair(scores, a, b, weight);
                            } else if relevance[b] > relevance[a] {
                                out.add_pair(scores, b, a, weight);
                            }
                            weight *= YETI_DECAY;
                        }
                    }
                }
            }
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relevance_of_ranks() {
        assert_eq!(relevance(1), 3.0);
        assert_eq!(relevance(2), 2.0);
        assert_eq!(relevance(3), 1.0);
        assert_eq!(relevance(4), 0.0);
        assert_eq!(relevance(9), 0.0);
    }

    #[test]
    fn parse_names() {
        assert_eq!("YetiRank".parse::<LossFunction>(), Ok(LossFunction::YetiRank));
        assert_eq!("RMSE".parse::<LossFunction>(), Ok(LossFunction::Rmse));
        assert!("rmse".parse::<LossFunction>().is_err());
        assert_eq!(LossFunction::PairLogit.to_string(), "PairLogit");
    }

    #[test]
    fn rmse_gradient_is_residual() {
        let mut rng = LcgRng::new(1);
        let out = LossFunction::Rmse.derivatives(&[3.0, 0.0], &[1.0, 1.0], &[0..2], &mut rng);
        assert_eq!(out.gradients, vec![-2.0, 1.0]);
        assert_eq!(out.hessians, vec![1.0, 1.0]);
        assert_eq!(LossFunction::Rmse.initial_score(&[3.0, 0.0]), 1.5);
        assert_eq!(LossFunction::YetiRank.initial_score(&[3.0, 0.0]), 0.0);
    }

    #[test]
    fn pairwise_losses_push_winners_up() {
        let relevance = vec![3.0, 0.0, 1.0];
        let scores = vec![0.0; 3];

        for loss in [LossFunction::PairLogit, LossFunction::YetiRank] {
            let mut rng = LcgRng::new(42);
            let out = loss.derivatives(&relevance, &scores, &[0..3], &mut rng);
            assert!(out.gradients[0] < 0.0, "{loss}");
            assert!(out.gradients[1] > 0.0, "{loss}");
            assert!(out.hessians.iter().all(|&h| h >= 0.0), "{loss}");
            // pairwise gradients cancel within a race
            assert!(out.gradients.iter().sum::<f64>().abs() < 1e-9, "{loss}");
        }
    }

    #[test]
    fn pairs_never_cross_races() {
        let relevance = vec![3.0, 3.0];
        let scores = vec![0.0, 0.0];
        let mut rng = LcgRng::new(42);
        let out = LossFunction::PairLogit.derivatives(&relevance, &scores, &[0..1, 1..2], &mut rng);
        assert_eq!(out.gradients, vec![0.0, 0.0]);
    }

    #[test]
    fn yetirank_is_reproducible_for_a_seed() {
        let relevance = vec![3.0, 2.0, 1.0, 0.0];
        let scores = vec![0.1, 0.4, -0.2, 0.3];
        let run = || {
            let mut rng = LcgRng::new(7);
            LossFunction::YetiRank.derivatives(&relevance, &scores, &[0..4], &mut rng)
        };
        assert_eq!(run(), run());
    }
}

//! Gradient-boosted ranker training
//!
//! Each round asks the objective for per-row derivatives, quantizes them to
//! fixed-point, grows one CART tree and adds it to the ensemble. When a
//! held-out partition is supplied, the eval metric is tracked per round and
//! the ensemble is cut back to its best round.

use anyhow::{bail, Result};
use race_rank_core::gbdt::{from_fixed, to_fixed, Model};
use race_rank_core::metrics::{mean_group_ndcg, mean_group_top1};
use serde::Deserialize;
use std::fmt;
use std::ops::Range;
use std::str::FromStr;
use tracing::{debug, info};

use crate::cart::{BinnedFeatures, CartBuilder, TreeConfig};
use crate::config::Hyperparameters;
use crate::deterministic::LcgRng;
use crate::loss::relevance;

/// Metric watched for early stopping, averaged over races. Higher is better.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub enum EvalMetric {
    /// NDCG over the top `top` entries of each race
    Ndcg { top: usize },
    /// Share of races whose top-scored entry was placed
    Top1Accuracy,
}

impl EvalMetric {
    pub fn evaluate(&self, ranks: &[i64], scores: &[f64], groups: &[Range<usize>]) -> f64 {
        match self {
            Self::Ndcg { top } => mean_group_ndcg(ranks, scores, groups, *top),
            Self::Top1Accuracy => mean_group_top1(ranks, scores, groups),
        }
    }
}

impl FromStr for EvalMetric {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        if value == "Top1Accuracy" {
            return Ok(Self::Top1Accuracy);
        }
        if value == "NDCG" {
            return Ok(Self::Ndcg { top: usize::MAX });
        }

        let top = value
            .strip_prefix("NDCG:top=")
            .ok_or_else(|| {
                format!("unsupported eval_metric {value:?} (expected NDCG, NDCG:top=N or Top1Accuracy)")
            })?
            .parse::<usize>()
            .map_err(|err| format!("eval_metric {value:?}: {err}"))?;

        if top == 0 {
            return Err(format!("eval_metric {value:?}: top must be at least 1"));
        }
        Ok(Self::Ndcg { top })
    }
}

impl TryFrom<String> for EvalMetric {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl fmt::Display for EvalMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ndcg { top: usize::MAX } => f.write_str("NDCG"),
            Self::Ndcg { top } => write!(f, "NDCG:top={top}"),
            Self::Top1Accuracy => f.write_str("Top1Accuracy"),
        }
    }
}

/// Model-ready rows: fixed-point features, finishing ranks, contiguous races
#[derive(Clone, Debug, PartialEq)]
pub struct Partition {
    pub features: Vec<Vec<i64>>,
    pub labels: Vec<i64>,
    pub groups: Vec<Range<usize>>,
}

impl Partition {
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    fn check(&self, name: &str) -> Result<()> {
        if self.features.len() != self.labels.len() {
            bail!(
                "{name}: {} feature rows for {} labels",
                self.features.len(),
                self.labels.len()
            );
        }
        let covered: usize = self.groups.iter().map(|g| g.len()).sum();
        if covered != self.len() || self.groups.iter().any(|g| g.end > self.len()) {
            bail!("{name}: groups cover {covered} of {} rows", self.len());
        }
        Ok(())
    }
}

/// Eval metric after one boosting round, with that round's tree included
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct IterationMetrics {
    pub learn: f64,
    pub test: Option<f64>,
}

/// Result of a training run
#[derive(Clone, Debug)]
pub struct TrainingOutcome {
    pub model: Model,
    /// Total split gain per feature over the kept trees
    pub feature_gains: Vec<f64>,
    /// Zero-based round with the best eval metric
    pub best_iteration: Option<usize>,
    pub best_score: Option<f64>,
    /// Rounds grown before stopping
    pub iterations_run: usize,
    /// One entry per grown round
    pub history: Vec<IterationMetrics>,
}

/// Gradient-boosted ranker trainer
pub struct RankerTrainer {
    params: Hyperparameters,
}

impl RankerTrainer {
    pub fn new(params: Hyperparameters) -> Self {
        Self { params }
    }

    /// Fit on `train`, early stopping on `eval` when given
    pub fn train(&self, train: &Partition, eval: Option<&Partition>) -> Result<TrainingOutcome> {
        if train.is_empty() {
            bail!("Training partition is empty");
        }
        train.check("train")?;
        if let Some(eval) = eval {
            eval.check("eval")?;
        }

        let params = &self.params;
        let loss = params.loss_function;
        let metric = params.eval_metric;
        let feature_count = train.features[0].len();
        if train.features.iter().any(|row| row.len() != feature_count) {
            bail!("Training rows have inconsistent feature counts");
        }

        let relevance: Vec<f64> = train.labels.iter().map(|&rank| relevance(rank)).collect();
        let mut model = Model::new(Vec::new(), to_fixed(loss.initial_score(&relevance)));

        let binned = BinnedFeatures::new(&train.features, params.border_count);
        let tree_config = TreeConfig {
            max_depth: params.depth,
            min_data_in_leaf: params.min_data_in_leaf,
            l2_leaf_reg: to_fixed(params.l2_leaf_reg),
            weight: to_fixed(params.learning_rate),
            scale: model.scale,
        };
        let mut rng = LcgRng::new(params.random_seed);

        let mut train_scores = vec![model.bias; train.len()];
        let mut eval_scores = eval.map(|eval| vec![model.bias; eval.len()]);
        let mut tree_gains: Vec<Vec<f64>> = Vec::with_capacity(params.iterations);
        let mut history: Vec<IterationMetrics> = Vec::with_capacity(params.iterations);
        let mut best: Option<(usize, f64)> = None;

        info!(
            "Training {} on {} rows ({} races), {} features",
            loss,
            train.len(),
            train.groups.len(),
            feature_count
        );

        for iteration in 0..params.iterations {
            let scores: Vec<f64> = train_scores.iter().map(|&s| from_fixed(s)).collect();
            let derivatives = loss.derivatives(&relevance, &scores, &train.groups, &mut rng);
            let gradients: Vec<i64> = derivatives.gradients.iter().map(|&g| to_fixed(g)).collect();
            let hessians: Vec<i64> = derivatives.hessians.iter().map(|&h| to_fixed(h)).collect();

            let built = CartBuilder::new(&binned, &gradients, &hessians, tree_config.clone()).build();
            debug!(
                "Tree {}: {} leaves, depth {}",
                iteration,
                built.tree.leaf_count(),
                built.tree.depth()
            );

            for (score, row) in train_scores.iter_mut().zip(&train.features) {
                *score = score.saturating_add(model.tree_contribution(&built.tree, row));
            }
            let updated: Vec<f64> = train_scores.iter().map(|&s| from_fixed(s)).collect();
            let learn = metric.evaluate(&train.labels, &updated, &train.groups);

            let mut eval_value = None;
            if let (Some(eval), Some(scores)) = (eval, eval_scores.as_mut()) {
                for (score, row) in scores.iter_mut().zip(&eval.features) {
                    *score = score.saturating_add(model.tree_contribution(&built.tree, row));
                }
                let floats: Vec<f64> = scores.iter().map(|&s| from_fixed(s)).collect();
                let value = metric.evaluate(&eval.labels, &floats, &eval.groups);
                if best.map_or(true, |(_, best_value)| value > best_value) {
                    best = Some((iteration, value));
                }
                eval_value = Some(value);
            }

            model.trees.push(built.tree);
            tree_gains.push(built.feature_gains);
            history.push(IterationMetrics {
                learn,
                test: eval_value,
            });

            let last = iteration + 1 == params.iterations;
            if params.verbose > 0 && (iteration % params.verbose == 0 || last) {
                match (eval_value, best) {
                    (Some(test), Some((best_iteration, best_value))) => info!(
                        "{iteration}:\tlearn: {learn:.7}\ttest: {test:.7}\tbest: {best_value:.7} ({best_iteration})"
                    ),
                    _ => info!("{iteration}:\tlearn: {learn:.7}"),
                }
            }

            if let Some((best_iteration, _)) = best {
                let stale = iteration - best_iteration;
                if params.early_stopping_rounds > 0 && stale >= params.early_stopping_rounds {
                    info!(
                        "Stopped by overfitting detector ({} iterations wait)",
                        params.early_stopping_rounds
                    );
                    break;
                }
            }
        }

        let iterations_run = model.num_trees();
        if let Some((best_iteration, best_value)) = best {
            info!("bestTest = {best_value:.7}, bestIteration = {best_iteration}");
            if best_iteration + 1 < iterations_run {
                info!("Shrink model to first {} iterations.", best_iteration + 1);
                model.truncate(best_iteration + 1);
            }
        }

        let mut feature_gains = vec![0.0; feature_count];
        for gains in tree_gains.iter().take(model.num_trees()) {
            for (total, gain) in feature_gains.iter_mut().zip(gains) {
                *total += gain;
            }
        }

        Ok(TrainingOutcome {
            model,
            feature_gains,
            best_iteration: best.map(|(iteration, _)| iteration),
            best_score: best.map(|(_, value)| value),
            iterations_run,
            history,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loss::LossFunction;
    use race_rank_core::SCALE;

    /// Races of four where feature 0 equals the finishing rank
    fn ordered_races(races: usize) -> Partition {
        let mut features = Vec::new();
        let mut labels = Vec::new();
        let mut groups = Vec::new();
        for race in 0..races {
            let start = labels.len();
            for rank in [3i64, 1, 4, 2] {
                features.push(vec![rank * SCALE, ((race as i64 * 7 + rank) % 5) * SCALE]);
                labels.push(rank);
            }
            groups.push(start..labels.len());
        }
        Partition {
            features,
            labels,
            groups,
        }
    }

    fn params(loss_function: LossFunction) -> Hyperparameters {
        Hyperparameters {
            iterations: 20,
            learning_rate: 0.3,
            depth: 3,
            loss_function,
            early_stopping_rounds: 0,
            verbose: 0,
            ..Hyperparameters::default()
        }
    }

    #[test]
    fn test_eval_metric_names() {
        assert_eq!("NDCG:top=4".parse::<EvalMetric>(), Ok(EvalMetric::Ndcg { top: 4 }));
        assert_eq!("NDCG".parse::<EvalMetric>(), Ok(EvalMetric::Ndcg { top: usize::MAX }));
        assert_eq!("Top1Accuracy".parse::<EvalMetric>(), Ok(EvalMetric::Top1Accuracy));
        assert!("NDCG:top=0".parse::<EvalMetric>().is_err());
        assert!("NDCG:top=x".parse::<EvalMetric>().is_err());
        assert!("AUC".parse::<EvalMetric>().is_err());
        assert_eq!(EvalMetric::Ndcg { top: 3 }.to_string(), "NDCG:top=3");
    }

    #[test]
    fn test_learns_the_ordering() -> Result<()> {
        let train = ordered_races(12);
        let eval = ordered_races(3);

        for loss in [LossFunction::YetiRank, LossFunction::PairLogit, LossFunction::Rmse] {
            let outcome = RankerTrainer::new(params(loss)).train(&train, Some(&eval))?;
            let scores: Vec<f64> = eval.features.iter().map(|row| outcome.model.score_f64(row)).collect();
            let ndcg = EvalMetric::Ndcg { top: 2 }.evaluate(&eval.labels, &scores, &eval.groups);
            assert!((ndcg - 1.0).abs() < 1e-9, "{loss}: ndcg={ndcg}");
            assert!(outcome.feature_gains[0] > outcome.feature_gains[1], "{loss}");
        }
        Ok(())
    }

    #[test]
    fn test_determinism() -> Result<()> {
        let train = ordered_races(6);
        let trainer = RankerTrainer::new(params(LossFunction::YetiRank));

        let first = trainer.train(&train, None)?;
        let second = trainer.train(&train, None)?;

        assert_eq!(first.model, second.model);
        assert_eq!(first.model.hash_hex()?, second.model.hash_hex()?);
        Ok(())
    }

    #[test]
    fn test_early_stopping_truncates_to_best() -> Result<()> {
        let train = ordered_races(8);
        let eval = ordered_races(2);
        let trainer = RankerTrainer::new(Hyperparameters {
            iterations: 200,
            early_stopping_rounds: 5,
            ..params(LossFunction::PairLogit)
        });

        let outcome = trainer.train(&train, Some(&eval))?;
        let best = outcome.best_iteration.expect("eval set was given");

        assert!(outcome.iterations_run < 200);
        assert_eq!(outcome.iterations_run, best + 6);
        assert_eq!(outcome.model.num_trees(), best + 1);
        assert_eq!(outcome.best_score, Some(1.0));
        Ok(())
    }

    #[test]
    fn test_history_scores_include_the_new_tree() -> Result<()> {
        let train = ordered_races(6);
        let eval = ordered_races(2);
        let trainer = RankerTrainer::new(Hyperparameters {
            iterations: 8,
            eval_metric: EvalMetric::Ndcg { top: 2 },
            ..params(LossFunction::Rmse)
        });

        let outcome = trainer.train(&train, Some(&eval))?;
        assert_eq!(outcome.history.len(), outcome.iterations_run);

        // one round in, both sides already reflect the first tree
        let mut first = outcome.model.clone();
        first.truncate(1);
        let score = |partition: &Partition| -> f64 {
            let scores: Vec<f64> = partition.features.iter().map(|row| first.score_f64(row)).collect();
            EvalMetric::Ndcg { top: 2 }.evaluate(&partition.labels, &scores, &partition.groups)
        };
        assert_eq!(outcome.history[0].learn, score(&train));
        assert_eq!(outcome.history[0].test, Some(score(&eval)));
        Ok(())
    }

    #[test]
    fn test_rejects_bad_partitions() {
        let trainer = RankerTrainer::new(params(LossFunction::Rmse));
        let empty = Partition {
            features: vec![],
            labels: vec![],
            groups: vec![],
        };
        assert!(trainer.train(&empty, None).is_err());

        let mut misgrouped = ordered_races(2);
        misgrouped.groups.pop();
        assert!(trainer.train(&misgrouped, None).is_err());
    }
}

//! Feature encoding into the fixed-point matrix the ensemble consumes
//!
//! Numeric cells are scaled by `SCALE`. Categorical cells are replaced by a
//! smoothed target statistic learned on the training partition: the mean
//! relevance of rows carrying that level, blended with the global mean.
//! Missing cells become [`MISSING_VALUE`], which every split routes left.

use anyhow::{bail, Result};
use race_rank_core::gbdt::{from_fixed, to_fixed};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::dataset::{ColumnValues, Dataset, FeatureColumn};
use crate::loss::relevance;

/// Encoded value of a missing cell
pub const MISSING_VALUE: i64 = i64::MIN;

/// Pseudo-count of the global prior in each level's statistic
const PRIOR_WEIGHT: f64 = 1.0;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ColumnEncoder {
    Numeric {
        name: String,
    },
    Categorical {
        name: String,
        /// Fixed-point statistic for unseen or missing levels
        prior: i64,
        /// Fixed-point statistic per level
        levels: BTreeMap<String, i64>,
    },
}

impl ColumnEncoder {
    pub fn name(&self) -> &str {
        match self {
            Self::Numeric { name } | Self::Categorical { name, .. } => name,
        }
    }

    fn fit(column: &FeatureColumn, gains: &[f64], prior: f64) -> Self {
        match &column.values {
            ColumnValues::Numeric(_) => Self::Numeric {
                name: column.name.clone(),
            },
            ColumnValues::Categorical(values) => {
                let mut totals: BTreeMap<&str, (f64, f64)> = BTreeMap::new();
                for (value, &gain) in values.iter().zip(gains) {
                    if let Some(level) = value {
                        let entry = totals.entry(level.as_str()).or_default();
                        entry.0 += gain;
                        entry.1 += 1.0;
                    }
                }

                let levels = totals
                    .into_iter()
                    .map(|(level, (sum, count))| {
                        let statistic = (sum + prior * PRIOR_WEIGHT) / (count + PRIOR_WEIGHT);
                        (level.to_string(), to_fixed(statistic))
                    })
                    .collect();

                Self::Categorical {
                    name: column.name.clone(),
                    prior: to_fixed(prior),
                    levels,
                }
            }
        }
    }

    fn encode(&self, column: &FeatureColumn, out: &mut [Vec<i64>]) -> Result<()> {
        match (self, &column.values) {
            (Self::Numeric { .. }, ColumnValues::Numeric(values)) => {
                for (row, value) in out.iter_mut().zip(values) {
                    row.push(value.map_or(MISSING_VALUE, to_fixed));
                }
            }
            (Self::Categorical { prior, levels, .. }, ColumnValues::Categorical(values)) => {
                for (row, value) in out.iter_mut().zip(values) {
                    let encoded = value
                        .as_ref()
                        .and_then(|level| levels.get(level))
                        .copied()
                        .unwrap_or(*prior);
                    row.push(encoded);
                }
            }
            _ => bail!(
                "Column {:?} is {:?} but the model was trained on a different kind",
                column.name,
                column.kind()
            ),
        }
        Ok(())
    }
}

/// Per-column encoders, in model feature order
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FeatureEncoder {
    pub columns: Vec<ColumnEncoder>,
}

impl FeatureEncoder {
    /// Learn categorical statistics from the training partition
    pub fn fit(train: &Dataset) -> Self {
        let gains: Vec<f64> = train.labels.iter().map(|&rank| relevance(rank)).collect();
        let prior = if gains.is_empty() {
            0.0
        } else {
            gains.iter().sum::<f64>() / gains.len() as f64
        };

        Self {
            columns: train
                .columns
                .iter()
                .map(|column| ColumnEncoder::fit(column, &gains, prior))
                .collect(),
        }
    }

    pub fn feature_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name().to_string()).collect()
    }

    /// Row-major fixed-point features, columns matched by name
    pub fn transform(&self, dataset: &Dataset) -> Result<Vec<Vec<i64>>> {
        let mut rows = vec![Vec::with_capacity(self.columns.len()); dataset.len()];

        for encoder in &self.columns {
            let Some(column) = dataset.columns.iter().find(|c| c.name == encoder.name()) else {
                bail!("Dataset is missing feature column {:?}", encoder.name());
            };
            encoder.encode(column, &mut rows)?;
        }

        Ok(rows)
    }

    /// Learned statistic per level of a categorical column, as floats
    pub fn level_statistics(&self, name: &str) -> Option<BTreeMap<String, f64>> {
        self.columns.iter().find_map(|encoder| match encoder {
            ColumnEncoder::Categorical { name: n, levels, .. } if n == name => Some(
                levels
                    .iter()
                    .map(|(level, &value)| (level.clone(), from_fixed(value)))
                    .collect(),
            ),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use race_rank_core::SCALE;

    fn dataset() -> Dataset {
        Dataset::from_reader(
            "race_id,rank,odds,going\n\
             1,1,2.5,firm\n\
             1,4,NA,soft\n\
             2,2,3.0,firm\n\
             2,4,9.0,\n"
                .as_bytes(),
        )
        .unwrap()
    }

    #[test]
    fn numeric_columns_are_scaled() {
        let data = dataset();
        let rows = FeatureEncoder::fit(&data).transform(&data).unwrap();
        assert_eq!(rows[0][0], 2_500_000);
        assert_eq!(rows[1][0], MISSING_VALUE);
        assert_eq!(rows[3][0], 9 * SCALE);
    }

    #[test]
    fn huge_negative_values_stay_distinct_from_missing() {
        let encoder = FeatureEncoder::fit(&dataset());
        let other = Dataset::from_reader("rank,odds,going\n1,-1e300,firm\n2,NA,firm\n".as_bytes()).unwrap();
        let rows = encoder.transform(&other).unwrap();
        assert_eq!(rows[0][0], i64::MIN + 1);
        assert_eq!(rows[1][0], MISSING_VALUE);
    }

    #[test]
    fn categorical_levels_use_smoothed_relevance() {
        let data = dataset();
        let encoder = FeatureEncoder::fit(&data);
        // relevance: 3, 0, 2, 0 -> prior 1.25
        let stats = encoder.level_statistics("going").unwrap();
        assert!((stats["firm"] - (3.0 + 2.0 + 1.25) / 3.0).abs() < 1e-6);
        assert!((stats["soft"] - 1.25 / 2.0).abs() < 1e-6);

        let rows = encoder.transform(&data).unwrap();
        // missing level falls back to the prior
        assert_eq!(rows[3][1], 1_250_000);
    }

    #[test]
    fn unseen_levels_get_the_prior() {
        let encoder = FeatureEncoder::fit(&dataset());
        let other = Dataset::from_reader("rank,odds,going\n1,1.0,heavy\n".as_bytes()).unwrap();
        let rows = encoder.transform(&other).unwrap();
        assert_eq!(rows[0], vec![SCALE, 1_250_000]);
    }

    #[test]
    fn columns_are_matched_by_name() {
        let encoder = FeatureEncoder::fit(&dataset());
        let reordered = Dataset::from_reader("going,rank,odds\nfirm,1,4.0\n".as_bytes()).unwrap();
        let rows = encoder.transform(&reordered).unwrap();
        assert_eq!(rows[0][0], 4 * SCALE);

        let missing = Dataset::from_reader("rank,odds\n1,4.0\n".as_bytes()).unwrap();
        assert!(encoder.transform(&missing).is_err());
    }

    #[test]
    fn kind_mismatch_is_an_error() {
        let encoder = FeatureEncoder::fit(&dataset());
        let numeric_going = Dataset::from_reader("rank,odds,going\n1,1.0,3\n".as_bytes()).unwrap();
        assert!(encoder.transform(&numeric_going).is_err());
    }
}

//! Train/test partitioning
//!
//! Races are assigned to a partition whole, then each partition is flattened
//! race by race so its group ranges are contiguous. Splitting rows first and
//! slicing race counts afterwards would hand the ranker group sizes that do not
//! match the rows they describe.

use anyhow::{bail, Result};
use std::collections::HashMap;
use tracing::warn;

use crate::dataset::Dataset;
use crate::deterministic::LcgRng;

#[derive(Clone, Debug)]
pub struct TrainTestSplit {
    pub train: Dataset,
    pub test: Dataset,
}

/// Number of held-out units: `ceil(test_size * n)`, keeping one unit on each side.
fn held_out_count(units: usize, test_size: f64) -> usize {
    let wanted = (test_size * units as f64).ceil() as usize;
    wanted.clamp(1, units.saturating_sub(1))
}

/// Split by race when there are at least two races, by row otherwise.
/// A single race stays one group on each side.
pub fn train_test_split(dataset: &Dataset, test_size: f64, seed: u64) -> Result<TrainTestSplit> {
    let mut rng = LcgRng::new(seed);

    let (train_rows, test_rows) = match &dataset.race_ids {
        Some(race_ids) => match race_rows(race_ids) {
            races if races.len() >= 2 => split_races(&races, test_size, &mut rng),
            _ => {
                warn!("Only one race in the data, splitting its rows instead");
                split_rows(dataset.len(), test_size, &mut rng)?
            }
        },
        None => split_rows(dataset.len(), test_size, &mut rng)?,
    };

    Ok(TrainTestSplit {
        train: dataset.take(&train_rows),
        test: dataset.take(&test_rows),
    })
}

/// Rows per race, races in order of first appearance
fn race_rows(race_ids: &[String]) -> Vec<Vec<usize>> {
    let mut race_index: HashMap<&str, usize> = HashMap::new();
    let mut races: Vec<Vec<usize>> = Vec::new();
    for (row, id) in race_ids.iter().enumerate() {
        let slot = *race_index.entry(id.as_str()).or_insert_with(|| {
            races.push(Vec::new());
            races.len() - 1
        });
        races[slot].push(row);
    }
    races
}

fn split_races(races: &[Vec<usize>], test_size: f64, rng: &mut LcgRng) -> (Vec<usize>, Vec<usize>) {
    let mut order: Vec<usize> = (0..races.len()).collect();
    rng.shuffle(&mut order);

    let n_test = held_out_count(races.len(), test_size);
    let (test_races, train_races) = order.split_at(n_test);

    let flatten = |selected: &[usize]| -> Vec<usize> {
        selected
            .iter()
            .flat_map(|&race| races[race].iter().copied())
            .collect()
    };

    (flatten(train_races), flatten(test_races))
}

fn split_rows(rows: usize, test_size: f64, rng: &mut LcgRng) -> Result<(Vec<usize>, Vec<usize>)> {
    if rows < 2 {
        bail!("Need at least 2 rows to hold out a test set, found {rows}");
    }

    let mut order: Vec<usize> = (0..rows).collect();
    rng.shuffle(&mut order);

    let n_test = held_out_count(rows, test_size);
    let (test, train) = order.split_at(n_test);
    Ok((train.to_vec(), test.to_vec()))
}

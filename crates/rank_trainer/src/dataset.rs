//! CSV dataset loading
//!
//! Reads a headered, comma-delimited race results file. `rank` is the label,
//! `race_id` groups rows into races, and every other column except
//! `horse_id` becomes a feature. Column kinds are inferred from the cells: a
//! column is categorical as soon as one non-missing cell is not a number.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::io::Read;
use std::ops::Range;
use std::path::Path;
use tracing::{debug, info};

pub const TARGET_COLUMN: &str = "rank";
pub const HORSE_ID_COLUMN: &str = "horse_id";
pub const RACE_ID_COLUMN: &str = "race_id";

/// Cell spellings treated as a missing value
const MISSING_MARKERS: &[&str] = &["", "NA", "N/A", "NaN", "nan", "null", "NULL", "None"];

fn is_missing(cell: &str) -> bool {
    MISSING_MARKERS.contains(&cell)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureKind {
    Numeric,
    Categorical,
}

/// Column storage, `None` marks a missing cell
#[derive(Clone, Debug, PartialEq)]
pub enum ColumnValues {
    Numeric(Vec<Option<f64>>),
    Categorical(Vec<Option<String>>),
}

#[derive(Clone, Debug, PartialEq)]
pub struct FeatureColumn {
    pub name: String,
    pub values: ColumnValues,
}

impl FeatureColumn {
    /// Infer the column kind from raw cells.
    fn from_cells(name: String, cells: Vec<String>) -> Self {
        let numeric: Option<Vec<Option<f64>>> = cells
            .iter()
            .map(|cell| {
                if is_missing(cell) {
                    Some(None)
                } else {
                    cell.parse::<f64>().ok().map(Some)
                }
            })
            .collect();

        let values = match numeric {
            Some(values) => ColumnValues::Numeric(values),
            None => ColumnValues::Categorical(
                cells
                    .into_iter()
                    .map(|cell| (!is_missing(&cell)).then_some(cell))
                    .collect(),
            ),
        };

        Self { name, values }
    }

    pub fn kind(&self) -> FeatureKind {
        match self.values {
            ColumnValues::Numeric(_) => FeatureKind::Numeric,
            ColumnValues::Categorical(_) => FeatureKind::Categorical,
        }
    }

    pub fn len(&self) -> usize {
        match &self.values {
            ColumnValues::Numeric(values) => values.len(),
            ColumnValues::Categorical(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn take(&self, indices: &[usize]) -> Self {
        let values = match &self.values {
            ColumnValues::Numeric(values) => {
                ColumnValues::Numeric(indices.iter().map(|&i| values[i]).collect())
            }
            ColumnValues::Categorical(values) => {
                ColumnValues::Categorical(indices.iter().map(|&i| values[i].clone()).collect())
            }
        };
        Self {
            name: self.name.clone(),
            values,
        }
    }
}

/// Race results: feature columns, finishing ranks and optional race ids
#[derive(Clone, Debug, PartialEq)]
pub struct Dataset {
    pub columns: Vec<FeatureColumn>,
    pub labels: Vec<i64>,
    pub race_ids: Option<Vec<String>>,
}

impl Dataset {
    /// Load a dataset from a CSV file with a header row
    pub fn from_csv<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = std::fs::File::open(path)
            .with_context(|| format!("Failed to open {}", path.display()))?;
        Self::from_reader(file).with_context(|| format!("Failed to parse {}", path.display()))
    }

    /// Load a dataset from any CSV source with a header row
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let headers: Vec<String> = reader
            .headers()
            .context("Failed to read CSV header")?
            .iter()
            .map(str::to_string)
            .collect();

        let mut seen = HashMap::new();
        for (idx, name) in headers.iter().enumerate() {
            if let Some(previous) = seen.insert(name.as_str(), idx) {
                bail!("Duplicate column {name:?} (columns {} and {})", previous + 1, idx + 1);
            }
        }

        let Some(&target_idx) = seen.get(TARGET_COLUMN) else {
            bail!("Missing required column {TARGET_COLUMN:?}");
        };
        let race_idx = seen.get(RACE_ID_COLUMN).copied();

        let mut cells: Vec<Vec<String>> = vec![Vec::new(); headers.len()];
        for (row_idx, record) in reader.records().enumerate() {
            // header is line 1
            let record = record.with_context(|| format!("Line {}: malformed record", row_idx + 2))?;
            for (column, cell) in cells.iter_mut().zip(record.iter()) {
                column.push(cell.to_string());
            }
        }

        let mut labels = Vec::with_capacity(cells[target_idx].len());
        for (row_idx, cell) in cells[target_idx].iter().enumerate() {
            labels.push(
                parse_rank(cell).with_context(|| format!("Line {}: invalid {TARGET_COLUMN}", row_idx + 2))?,
            );
        }

        if labels.is_empty() {
            bail!("Dataset is empty");
        }

        let race_ids = race_idx.map(|idx| std::mem::take(&mut cells[idx]));

        let columns: Vec<FeatureColumn> = headers
            .into_iter()
            .zip(cells)
            .filter(|(name, _)| ![TARGET_COLUMN, HORSE_ID_COLUMN, RACE_ID_COLUMN].contains(&name.as_str()))
            .map(|(name, cells)| FeatureColumn::from_cells(name, cells))
            .collect();

        if columns.is_empty() {
            bail!("Dataset has no feature columns");
        }

        Ok(Self {
            columns,
            labels,
            race_ids,
        })
    }

    /// Get number of rows
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn feature_count(&self) -> usize {
        self.columns.len()
    }

    pub fn feature_names(&self) -> Vec<String> {
        self.columns.iter().map(|column| column.name.clone()).collect()
    }

    pub fn categorical_features(&self) -> Vec<&str> {
        self.columns
            .iter()
            .filter(|column| column.kind() == FeatureKind::Categorical)
            .map(|column| column.name.as_str())
            .collect()
    }

    /// Rows per race, races ordered by id (numeric ids compare numerically).
    /// `None` when the file has no `race_id` column.
    pub fn race_sizes(&self) -> Option<Vec<usize>> {
        let race_ids = self.race_ids.as_ref()?;
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for id in race_ids {
            *counts.entry(id.as_str()).or_default() += 1;
        }

        let mut ordered: Vec<(&str, usize)> = counts.into_iter().collect();
        ordered.sort_by(|a, b| compare_ids(a.0, b.0));
        Some(ordered.into_iter().map(|(_, count)| count).collect())
    }

    /// Contiguous row ranges sharing a race id, in row order.
    /// Without race ids the whole dataset is a single group.
    pub fn group_ranges(&self) -> Vec<Range<usize>> {
        if self.is_empty() {
            return Vec::new();
        }

        let Some(race_ids) = &self.race_ids else {
            return vec![0..self.len()];
        };

        let mut groups = Vec::new();
        let mut start = 0;
        for i in 1..race_ids.len() {
            if race_ids[i] != race_ids[start] {
                groups.push(start..i);
                start = i;
            }
        }
        groups.push(start..race_ids.len());
        groups
    }

    /// True when every race occupies a single contiguous block of rows.
    pub fn races_are_contiguous(&self) -> bool {
        match self.race_sizes() {
            Some(sizes) => sizes.len() == self.group_ranges().len(),
            None => true,
        }
    }

    /// Rows at `indices`, in that order
    pub fn take(&self, indices: &[usize]) -> Self {
        Self {
            columns: self.columns.iter().map(|column| column.take(indices)).collect(),
            labels: indices.iter().map(|&i| self.labels[i]).collect(),
            race_ids: self
                .race_ids
                .as_ref()
                .map(|ids| indices.iter().map(|&i| ids[i].clone()).collect()),
        }
    }

    /// Log shape and per-column statistics
    pub fn log_summary(&self) {
        let races = self.race_sizes().map(|sizes| sizes.len());
        info!(
            "Loaded {} rows, {} features ({} categorical), {} races",
            self.len(),
            self.feature_count(),
            self.categorical_features().len(),
            races.map_or_else(|| "no".to_string(), |n| n.to_string())
        );

        let mut label_counts: BTreeMap<i64, usize> = BTreeMap::new();
        for &label in &self.labels {
            *label_counts.entry(label).or_default() += 1;
        }
        info!("Label distribution: {:?}", label_counts);

        for column in &self.columns {
            match &column.values {
                ColumnValues::Numeric(values) => {
                    let present: Vec<f64> = values.iter().flatten().copied().collect();
                    let min = present.iter().copied().fold(f64::INFINITY, f64::min);
                    let max = present.iter().copied().fold(f64::NEG_INFINITY, f64::max);
                    debug!(
                        "  {}: numeric min={} max={} missing={}",
                        column.name,
                        min,
                        max,
                        values.len() - present.len()
                    );
                }
                ColumnValues::Categorical(values) => {
                    let mut distinct: Vec<&String> = values.iter().flatten().collect();
                    distinct.sort_unstable();
                    distinct.dedup();
                    debug!(
                        "  {}: categorical levels={} missing={}",
                        column.name,
                        distinct.len(),
                        values.iter().filter(|v| v.is_none()).count()
                    );
                }
            }
        }
    }
}

fn parse_rank(cell: &str) -> Result<i64> {
    let value: f64 = cell
        .parse()
        .with_context(|| format!("{cell:?} is not a number"))?;
    if !value.is_finite() || value.fract() != 0.0 || value < 1.0 {
        bail!("{cell:?} is not a finishing rank");
    }
    Ok(value as i64)
}

/// Numeric ids sort numerically and before non-numeric ids.
fn compare_ids(a: &str, b: &str) -> Ordering {
    match (a.parse::<f64>(), b.parse::<f64>()) {
        (Ok(x), Ok(y)) => x.total_cmp(&y).then_with(|| a.cmp(b)),
        (Ok(_), Err(_)) => Ordering::Less,
        (Err(_), Ok(_)) => Ordering::Greater,
        (Err(_), Err(_)) => a.cmp(b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_test_csv() -> Result<NamedTempFile> {
        let mut file = NamedTempFile::new()?;
        writeln!(file, "race_id,horse_id,rank,odds,going,weight")?;
        writeln!(file, "10,h1,1,2.5,firm,55")?;
        writeln!(file, "10,h2,3,6.0,firm,")?;
        writeln!(file, "10,h3,2,4.0,firm,57")?;
        writeln!(file, "9,h4,4,11.0,soft,54")?;
        writeln!(file, "9,h5,1,1.8,soft,NaN")?;
        file.flush()?;
        Ok(file)
    }

    #[test]
    fn test_load_csv() -> Result<()> {
        let file = create_test_csv()?;
        let dataset = Dataset::from_csv(file.path())?;

        assert_eq!(dataset.len(), 5);
        assert_eq!(dataset.feature_names(), vec!["odds", "going", "weight"]);
        assert_eq!(dataset.labels, vec![1, 3, 2, 4, 1]);
        assert_eq!(dataset.categorical_features(), vec!["going"]);
        assert_eq!(
            dataset.columns[2].values,
            ColumnValues::Numeric(vec![Some(55.0), None, Some(57.0), Some(54.0), None])
        );

        Ok(())
    }

    #[test]
    fn test_race_sizes_follow_id_order() -> Result<()> {
        let dataset = Dataset::from_csv(create_test_csv()?.path())?;
        // race 9 sorts before race 10 numerically
        assert_eq!(dataset.race_sizes(), Some(vec![2, 3]));
        assert_eq!(dataset.group_ranges(), vec![0..3, 3..5]);
        assert!(dataset.races_are_contiguous());
        Ok(())
    }

    #[test]
    fn test_interleaved_races_are_detected() -> Result<()> {
        let csv = "race_id,rank,x\na,1,1\nb,1,2\na,2,3\n";
        let dataset = Dataset::from_reader(csv.as_bytes())?;
        assert_eq!(dataset.race_sizes(), Some(vec![2, 1]));
        assert_eq!(dataset.group_ranges().len(), 3);
        assert!(!dataset.races_are_contiguous());
        Ok(())
    }

    #[test]
    fn test_optional_id_columns() -> Result<()> {
        let dataset = Dataset::from_reader("rank,x\n1,0.5\n2,0.1\n".as_bytes())?;
        assert_eq!(dataset.race_ids, None);
        assert_eq!(dataset.race_sizes(), None);
        assert_eq!(dataset.group_ranges(), vec![0..2]);
        Ok(())
    }

    #[test]
    fn test_load_errors() {
        assert!(Dataset::from_csv("/definitely/not/here.csv").is_err());
        // no rank column
        assert!(Dataset::from_reader("race_id,x\n1,2\n".as_bytes()).is_err());
        // non-integral rank
        assert!(Dataset::from_reader("rank,x\n1.5,2\n".as_bytes()).is_err());
        // header only
        assert!(Dataset::from_reader("rank,x\n".as_bytes()).is_err());
        // nothing but ids and label
        assert!(Dataset::from_reader("race_id,horse_id,rank\n1,a,1\n".as_bytes()).is_err());
        // ragged row
        assert!(Dataset::from_reader("rank,x\n1,2,3\n".as_bytes()).is_err());
        // duplicate header
        assert!(Dataset::from_reader("rank,x,x\n1,2,3\n".as_bytes()).is_err());
    }

    #[test]
    fn test_take_keeps_columns_aligned() -> Result<()> {
        let dataset = Dataset::from_csv(create_test_csv()?.path())?;
        let subset = dataset.take(&[4, 0]);
        assert_eq!(subset.labels, vec![1, 1]);
        assert_eq!(subset.race_ids, Some(vec!["9".to_string(), "10".to_string()]));
        assert_eq!(
            subset.columns[1].values,
            ColumnValues::Categorical(vec![Some("soft".into()), Some("firm".into())])
        );
        Ok(())
    }
}

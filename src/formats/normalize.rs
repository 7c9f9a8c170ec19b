//! Structural cleaning of raw extracts before they reach a staging table
//!
//! Every column is treated as text. Cleaning trims column names, trims every
//! cell, turns null-like literals into the missing marker and drops rows that
//! repeat an earlier row exactly. Cleaning its own output changes nothing.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info};

use super::dataset::{Cell, Dataset};
use super::delimited::{DelimitedConfig, ReadFailure, read_delimited};

/// Text values that stand for "no value" in the extracts (case-sensitive)
pub const MISSING_LIKE: [&str; 5] = ["nan", "NaN", "NULL", "None", ""];

/// Outcomes that stop a single file from being normalized
///
/// Both are skip conditions for the batch, not failures.
#[derive(Debug, Error)]
pub enum NormalizeError {
    #[error("file not found: {}", path.display())]
    Missing { path: PathBuf },

    #[error("could not read {}: {cause}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        cause: ReadFailure,
    },
}

/// What cleaning did to a dataset (informational only)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanReport {
    pub rows_read: usize,
    pub duplicates_dropped: usize,
    /// Cells turned into the missing marker, per column, in column order
    pub missing_by_column: Vec<(String, usize)>,
}

impl CleanReport {
    pub fn rows_kept(&self) -> usize {
        self.rows_read - self.duplicates_dropped
    }
}

/// A cleaned dataset plus its cleaning report
#[derive(Debug, Clone)]
pub struct Normalized {
    pub dataset: Dataset,
    pub report: CleanReport,
}

/// Reads one delimited file and applies structural cleaning
#[derive(Debug, Clone, Default)]
pub struct Normalizer {
    config: DelimitedConfig,
}

impl Normalizer {
    pub fn new(config: DelimitedConfig) -> Self {
        Self { config }
    }

    /// Read and clean the file at `path`
    ///
    /// A path that does not exist yields [`NormalizeError::Missing`]; anything
    /// else that prevents parsing yields [`NormalizeError::Read`]. A header-only
    /// file is a valid, empty dataset.
    pub async fn normalize(&self, path: &Path) -> Result<Normalized, NormalizeError> {
        info!("[READ] Loading file: {}", path.display());

        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(NormalizeError::Missing {
                    path: path.to_path_buf(),
                });
            }
            Err(e) => return Err(read_error(path, e.into())),
        };

        let raw = read_delimited(&bytes, &self.config).map_err(|cause| read_error(path, cause))?;
        let normalized = clean(raw);

        if let Some(name) = normalized.dataset.duplicate_column() {
            return Err(read_error(path, ReadFailure::DuplicateColumn(name.to_string())));
        }

        let report = &normalized.report;
        if report.duplicates_dropped > 0 {
            info!("  -> Dropped {} fully duplicate rows.", report.duplicates_dropped);
        }
        for (column, count) in report.missing_by_column.iter().filter(|(_, n)| *n > 0) {
            debug!(column = %column, count, "null-like values replaced");
        }
        info!("  -> {} rows ready for staging.", report.rows_kept());

        Ok(normalized)
    }
}

fn read_error(path: &Path, cause: ReadFailure) -> NormalizeError {
    NormalizeError::Read {
        path: path.to_path_buf(),
        cause,
    }
}

/// Apply structural cleaning to a dataset
///
/// 1. Trim column names.
/// 2. Trim every text cell and replace [`MISSING_LIKE`] values with `None`.
/// 3. Drop rows identical to an earlier row, keeping the first and preserving order.
pub fn clean(mut dataset: Dataset) -> Normalized {
    let (columns, rows) = dataset.parts_mut();
    let rows_read = rows.len();

    for name in columns.iter_mut() {
        let trimmed = name.trim();
        if trimmed.len() != name.len() {
            *name = trimmed.to_string();
        }
    }

    let mut missing_counts = vec![0usize; columns.len()];
    for row in rows.iter_mut() {
        for (idx, cell) in row.iter_mut().enumerate() {
            if clean_cell(cell) {
                missing_counts[idx] += 1;
            }
        }
    }

    let duplicates_dropped = drop_duplicate_rows(rows);

    let missing_by_column = columns.iter().cloned().zip(missing_counts).collect();

    Normalized {
        dataset,
        report: CleanReport {
            rows_read,
            duplicates_dropped,
            missing_by_column,
        },
    }
}

/// Trim a cell in place; returns true when it was turned into the missing marker
fn clean_cell(cell: &mut Cell) -> bool {
    let Some(text) = cell else {
        return false;
    };

    let trimmed = text.trim();
    if MISSING_LIKE.contains(&trimmed) {
        *cell = None;
        return true;
    }
    if trimmed.len() != text.len() {
        *text = trimmed.to_string();
    }
    false
}

/// Remove rows equal to an earlier row; returns how many were removed
fn drop_duplicate_rows(rows: &mut Vec<Vec<Cell>>) -> usize {
    let before = rows.len();

    let keep: Vec<bool> = {
        let mut seen: HashSet<&[Cell]> = HashSet::with_capacity(rows.len());
        rows.iter().map(|row| seen.insert(row.as_slice())).collect()
    };

    let mut keep = keep.into_iter();
    rows.retain(|_| keep.next().unwrap_or(true));

    before - rows.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::{NamedTempFile, TempDir};

    fn text(values: &[&str]) -> Vec<Cell> {
        values.iter().map(|v| Some(v.to_string())).collect()
    }

    fn dataset(columns: &[&str], rows: Vec<Vec<Cell>>) -> Dataset {
        Dataset::new(columns.iter().map(|c| c.to_string()).collect(), rows).unwrap()
    }

    fn csv_file(content: &[u8]) -> NamedTempFile {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(content).unwrap();
        temp_file.flush().unwrap();
        temp_file
    }

    #[test]
    fn test_trims_column_names() {
        let normalized = clean(dataset(&["id ", " name", "\tphone\t"], vec![]));
        assert_eq!(normalized.dataset.columns(), ["id", "name", "phone"]);
    }

    #[test]
    fn test_null_like_literals_become_missing() {
        let normalized = clean(dataset(
            &["v"],
            vec![
                text(&["nan"]),
                text(&[" NaN "]),
                text(&["NULL"]),
                text(&["None"]),
                text(&["   "]),
                text(&["null"]),
                text(&["none"]),
            ],
        ));

        let values: Vec<Cell> = normalized
            .dataset
            .rows()
            .iter()
            .map(|row| row[0].clone())
            .collect();
        // all five markers collapse into one missing row; case variants survive as text
        assert_eq!(
            values,
            vec![None, Some("null".to_string()), Some("none".to_string())]
        );
        assert_eq!(normalized.report.missing_by_column, vec![("v".to_string(), 5)]);
    }

    #[test]
    fn test_duplicates_dropped_after_cleaning_first_wins() {
        let normalized = clean(dataset(
            &["id", "city"],
            vec![
                text(&["1", "sao paulo"]),
                text(&["2", "rio"]),
                text(&[" 1", "sao paulo  "]),
                text(&["3", "NULL"]),
                text(&["3", ""]),
                text(&["2", "rio"]),
            ],
        ));

        assert_eq!(
            normalized.dataset.rows(),
            [
                text(&["1", "sao paulo"]),
                text(&["2", "rio"]),
                vec![Some("3".to_string()), None],
            ]
        );
        assert_eq!(normalized.report.rows_read, 6);
        assert_eq!(normalized.report.duplicates_dropped, 3);
        assert_eq!(normalized.report.rows_kept(), 3);
    }

    #[test]
    fn test_missing_marker_distinct_from_text() {
        let normalized = clean(dataset(
            &["a"],
            vec![text(&["x"]), vec![None], text(&["NULL"])],
        ));
        assert_eq!(normalized.dataset.rows(), [text(&["x"]), vec![None]]);
    }

    #[test]
    fn test_clean_is_a_fixed_point() {
        let once = clean(dataset(
            &[" order_id ", "status", "note"],
            vec![
                text(&["o1 ", "delivered", "  nan"]),
                text(&["o2", " shipped", "NULL "]),
                text(&["o1", "delivered", ""]),
                text(&["o3", "canceled", " fragile "]),
            ],
        ));
        let twice = clean(once.dataset.clone());

        assert_eq!(twice.dataset, once.dataset);
        assert_eq!(twice.report.duplicates_dropped, 0);
        assert!(twice.report.missing_by_column.iter().all(|(_, n)| *n == 0));
    }

    #[test]
    fn test_no_duplicate_rows_and_no_marker_literals_survive() {
        let normalized = clean(dataset(
            &["a", "b"],
            vec![
                text(&["1", "None"]),
                text(&["1", "nan"]),
                text(&["2", " x"]),
                text(&["2", "x "]),
            ],
        ));
        let rows = normalized.dataset.rows();

        for (i, row) in rows.iter().enumerate() {
            assert!(!rows[..i].contains(row));
            for cell in row.iter().flatten() {
                assert!(!MISSING_LIKE.contains(&cell.as_str()));
                assert_eq!(cell.trim(), cell);
            }
        }
    }

    #[tokio::test]
    async fn test_customer_file_end_to_end() {
        let file = csv_file(b"id , name,phone\n  42 ,Jane ,NULL\n7,Ana,555-0100\n42,Jane,NULL\n");

        let normalized = Normalizer::default().normalize(file.path()).await.unwrap();

        assert_eq!(normalized.dataset.columns(), ["id", "name", "phone"]);
        assert_eq!(
            normalized.dataset.rows(),
            [
                vec![Some("42".to_string()), Some("Jane".to_string()), None],
                text(&["7", "Ana", "555-0100"]),
            ]
        );
        assert_eq!(normalized.report.duplicates_dropped, 1);
    }

    #[tokio::test]
    async fn test_missing_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("olist_sellers_dataset.csv");

        let err = Normalizer::default().normalize(&path).await.unwrap_err();
        assert!(matches!(err, NormalizeError::Missing { path: p } if p == path));
    }

    #[tokio::test]
    async fn test_unreadable_file() {
        let file = csv_file(b"a,b\n1,2\n3\n");
        let err = Normalizer::default()
            .normalize(file.path())
            .await
            .unwrap_err();
        assert!(matches!(err, NormalizeError::Read { cause: ReadFailure::Csv(_), .. }));
    }

    #[tokio::test]
    async fn test_directory_is_unreadable_not_missing() {
        let dir = TempDir::new().unwrap();
        let err = Normalizer::default().normalize(dir.path()).await.unwrap_err();
        assert!(matches!(err, NormalizeError::Read { cause: ReadFailure::Io(_), .. }));
    }

    #[tokio::test]
    async fn test_columns_colliding_after_trim_are_unreadable() {
        let file = csv_file(b"id,id ,name\n1,2,x\n");
        let err = Normalizer::default()
            .normalize(file.path())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            NormalizeError::Read { cause: ReadFailure::DuplicateColumn(ref c), .. } if c == "id"
        ));
    }

    #[tokio::test]
    async fn test_header_only_file_is_empty_not_error() {
        let file = csv_file(b"seller_id,seller_zip_code_prefix\n");
        let normalized = Normalizer::default().normalize(file.path()).await.unwrap();
        assert!(normalized.dataset.is_empty());
        assert_eq!(normalized.dataset.column_count(), 2);
    }
}

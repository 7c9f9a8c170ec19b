//! In-memory tabular data handed from the normalizer to the staging loader

/// A single cell. `None` is the missing-value marker, distinct from `Some("")`.
pub type Cell = Option<String>;

/// Ordered named columns with rows of uniform width, every cell held as text
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Dataset {
    columns: Vec<String>,
    rows: Vec<Vec<Cell>>,
}

impl Dataset {
    /// Build a dataset; every row must have one cell per column
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Cell>>) -> Result<Self, RowWidthMismatch> {
        if let Some((index, row)) = rows
            .iter()
            .enumerate()
            .find(|(_, row)| row.len() != columns.len())
        {
            return Err(RowWidthMismatch {
                row_index: index,
                expected: columns.len(),
                found: row.len(),
            });
        }
        Ok(Self { columns, rows })
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Cell>] {
        &self.rows
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// True when there are no data rows, regardless of columns
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// First column name that appears more than once
    pub fn duplicate_column(&self) -> Option<&str> {
        self.columns
            .iter()
            .enumerate()
            .find(|(idx, name)| self.columns[..*idx].contains(name))
            .map(|(_, name)| name.as_str())
    }

    pub(crate) fn parts_mut(&mut self) -> (&mut Vec<String>, &mut Vec<Vec<Cell>>) {
        (&mut self.columns, &mut self.rows)
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("row {row_index} has {found} cells, expected {expected}")]
pub struct RowWidthMismatch {
    pub row_index: usize,
    pub expected: usize,
    pub found: usize,
}

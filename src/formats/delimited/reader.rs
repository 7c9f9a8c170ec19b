use thiserror::Error;

use crate::formats::dataset::{Cell, Dataset, RowWidthMismatch};

/// Configuration for delimited file reading
#[derive(Debug, Clone)]
pub struct DelimitedConfig {
    pub delimiter: u8,
    pub quote: u8,
}

impl Default for DelimitedConfig {
    fn default() -> Self {
        Self {
            delimiter: b',',
            quote: b'"',
        }
    }
}

impl DelimitedConfig {
    pub fn csv() -> Self {
        Self::default()
    }
}

/// Why a file that exists could not be turned into a dataset
#[derive(Debug, Error)]
pub enum ReadFailure {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed CSV: {0}")]
    Csv(#[from] csv::Error),

    #[error("inconsistent row width: {0}")]
    Shape(#[from] RowWidthMismatch),

    #[error("no header row")]
    NoHeader,

    #[error("column '{0}' appears more than once")]
    DuplicateColumn(String),
}

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Parse delimited bytes with a header row into a dataset of raw text cells
///
/// Every field becomes `Some(text)`; interpreting null-like text is left to the
/// normalizer. Rows with a different field count than the header are rejected.
pub fn read_delimited(bytes: &[u8], config: &DelimitedConfig) -> Result<Dataset, ReadFailure> {
    let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);

    let mut csv_reader = csv::ReaderBuilder::new()
        .delimiter(config.delimiter)
        .quote(config.quote)
        .has_headers(true)
        .flexible(false)
        .from_reader(bytes);

    let columns: Vec<String> = csv_reader
        .headers()?
        .iter()
        .map(|name| name.to_string())
        .collect();

    if columns.is_empty() {
        return Err(ReadFailure::NoHeader);
    }

    let mut rows = Vec::new();
    for result in csv_reader.records() {
        let record = result?;
        rows.push(
            record
                .iter()
                .map(|field| Some(field.to_string()))
                .collect::<Vec<Cell>>(),
        );
    }

    Ok(Dataset::new(columns, rows)?)
}

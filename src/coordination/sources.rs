//! The fixed mapping from expected extract files to staging tables

use serde::Serialize;
use thiserror::Error;

use crate::db::{InvalidIdentifier, quote_identifier};

/// The nine Olist extracts and the staging table each one replaces, in load order
pub const OLIST_SOURCES: [(&str, &str); 9] = [
    ("olist_customers_dataset.csv", "staging_customers"),
    ("olist_geolocation_dataset.csv", "staging_geolocation"),
    ("olist_order_items_dataset.csv", "staging_order_items"),
    ("olist_order_payments_dataset.csv", "staging_order_payments"),
    ("olist_order_reviews_dataset.csv", "staging_order_reviews"),
    ("olist_orders_dataset.csv", "staging_orders"),
    ("olist_products_dataset.csv", "staging_products"),
    ("olist_sellers_dataset.csv", "staging_sellers"),
    (
        "product_category_name_translation.csv",
        "staging_product_category_translation",
    ),
];

/// One expected file and the staging table it feeds
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceFile {
    pub file_name: String,
    pub table_name: String,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SourceMapError {
    #[error("file '{0}' is mapped more than once")]
    DuplicateFile(String),

    #[error("table '{0}' is the target of more than one file")]
    DuplicateTable(String),

    #[error("invalid staging table name: {0}")]
    InvalidTable(#[from] InvalidIdentifier),

    #[error("file name '{0}' must be a bare file name")]
    InvalidFile(String),
}

/// Ordered file→table mapping with unique file names and unique table names
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceMap {
    entries: Vec<SourceFile>,
}

impl SourceMap {
    pub fn new<I, F, T>(entries: I) -> Result<Self, SourceMapError>
    where
        I: IntoIterator<Item = (F, T)>,
        F: Into<String>,
        T: Into<String>,
    {
        let mut validated: Vec<SourceFile> = Vec::new();

        for (file_name, table_name) in entries {
            let entry = SourceFile {
                file_name: file_name.into(),
                table_name: table_name.into(),
            };

            if entry.file_name.is_empty()
                || entry.file_name.contains(['/', '\\'])
                || entry.file_name == ".."
            {
                return Err(SourceMapError::InvalidFile(entry.file_name));
            }
            quote_identifier(&entry.table_name)?;

            if validated.iter().any(|e| e.file_name == entry.file_name) {
                return Err(SourceMapError::DuplicateFile(entry.file_name));
            }
            if validated.iter().any(|e| e.table_name == entry.table_name) {
                return Err(SourceMapError::DuplicateTable(entry.table_name));
            }

            validated.push(entry);
        }

        Ok(Self { entries: validated })
    }

    /// The standard nine-file Olist batch
    pub fn olist() -> Result<Self, SourceMapError> {
        Self::new(OLIST_SOURCES)
    }

    pub fn entries(&self) -> &[SourceFile] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

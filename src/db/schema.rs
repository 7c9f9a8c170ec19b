use super::pool::Pool;

/// Columns of an existing staging table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableColumns {
    pub table_name: String,
    pub columns: Vec<String>,
}

impl TableColumns {
    /// Dataset columns that the table does not have
    ///
    /// MySQL column names are case-insensitive, so the comparison is too.
    pub fn missing_from_table<'a>(&self, dataset_columns: &'a [String]) -> Vec<&'a str> {
        dataset_columns
            .iter()
            .filter(|name| {
                !self
                    .columns
                    .iter()
                    .any(|column| column.eq_ignore_ascii_case(name))
            })
            .map(|name| name.as_str())
            .collect()
    }
}

/// Query the column list of an existing table; `None` when the table does not exist
pub async fn query_table_columns(
    pool: &Pool,
    table_name: &str,
) -> Result<Option<TableColumns>, sqlx::Error> {
    let columns = pool.fetch_column_names(table_name).await?;

    if columns.is_empty() {
        return Ok(None);
    }

    Ok(Some(TableColumns {
        table_name: table_name.to_string(),
        columns,
    }))
}

use async_trait::async_trait;
use std::fmt;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::config::{DEFAULT_BATCH_SIZE, MAX_BIND_PARAMS};
use crate::db::schema::query_table_columns;
use crate::db::{InvalidIdentifier, Pool, PoolTransaction, escape_identifier, quote_identifier};
use crate::formats::Dataset;

/// Step of a staging replace at which a failure happened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStage {
    Schema,
    Connect,
    Clear,
    Insert,
    Commit,
}

impl fmt::Display for LoadStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LoadStage::Schema => "schema check",
            LoadStage::Connect => "connect",
            LoadStage::Clear => "clear",
            LoadStage::Insert => "insert",
            LoadStage::Commit => "commit",
        })
    }
}

#[derive(Debug, Error)]
pub enum LoadFailure {
    #[error("table does not exist")]
    TableNotFound,

    #[error("columns not present in the table: {}", .0.join(", "))]
    UnknownColumns(Vec<String>),

    #[error(transparent)]
    InvalidName(#[from] InvalidIdentifier),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// A staging table could not be replaced; the table keeps its previous rows
#[derive(Debug, Error)]
#[error("loading {table} failed at {stage}: {cause}")]
pub struct LoadError {
    pub table: String,
    pub stage: LoadStage,
    #[source]
    pub cause: LoadFailure,
}

impl LoadError {
    fn new(table: &str, stage: LoadStage, cause: impl Into<LoadFailure>) -> Self {
        Self {
            table: table.to_string(),
            stage,
            cause: cause.into(),
        }
    }
}

/// Destination that can atomically replace a staging table's contents
#[async_trait]
pub trait StagingTarget: Send + Sync {
    /// Replace every row of `table_name` with the rows of `dataset`,
    /// returning the number of rows inserted
    async fn replace(&self, dataset: &Dataset, table_name: &str) -> Result<u64, LoadError>;
}

/// Replaces staging tables through the shared pool, one transaction per table
pub struct StagingLoader {
    pool: Pool,
    batch_size: usize,
}

impl StagingLoader {
    pub fn new(pool: Pool) -> Self {
        Self {
            pool,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    /// Rows per INSERT statement; capped further by the bind parameter limit
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    fn rows_per_statement(&self, column_count: usize) -> usize {
        let by_params = MAX_BIND_PARAMS / column_count.max(1);
        self.batch_size.min(by_params).max(1)
    }

    /// Clear the table and insert the dataset inside `tx`
    ///
    /// Clearing is a `DELETE`, not `TRUNCATE`, so it rolls back with the inserts.
    /// Auto-increment counters are therefore not reset.
    async fn replace_in(
        &self,
        tx: &mut PoolTransaction,
        table: &str,
        dataset: &Dataset,
    ) -> Result<u64, (LoadStage, sqlx::Error)> {
        let backend = self.pool.backend();

        tx.execute(backend.disable_foreign_keys())
            .await
            .map_err(|e| (LoadStage::Clear, e))?;
        let cleared = tx.execute(&format!("DELETE FROM {}", table)).await;
        // Restore checks even if the delete failed; the setting outlives the transaction
        let restored = tx.execute(backend.enable_foreign_keys()).await;
        let removed = cleared.map_err(|e| (LoadStage::Clear, e))?;
        restored.map_err(|e| (LoadStage::Clear, e))?;
        debug!(table, removed, "staging table cleared");

        let column_list = dataset
            .columns()
            .iter()
            .map(|name| escape_identifier(name))
            .collect::<Vec<_>>()
            .join(", ");
        let chunk_rows = self.rows_per_statement(dataset.column_count());

        let mut inserted = 0u64;
        for chunk in dataset.rows().chunks(chunk_rows) {
            let insert_sql =
                build_insert_sql(table, &column_list, dataset.column_count(), chunk.len());
            let values: Vec<Option<&str>> = chunk
                .iter()
                .flat_map(|row| row.iter().map(|cell| cell.as_deref()))
                .collect();

            inserted += tx
                .execute_with_values(&insert_sql, &values)
                .await
                .map_err(|e| (LoadStage::Insert, e))?;
        }

        Ok(inserted)
    }
}

#[async_trait]
impl StagingTarget for StagingLoader {
    async fn replace(&self, dataset: &Dataset, table_name: &str) -> Result<u64, LoadError> {
        info!(
            "[LOAD] Loading {} rows into {}...",
            dataset.row_count(),
            table_name
        );

        let table = quote_identifier(table_name)
            .map_err(|e| LoadError::new(table_name, LoadStage::Schema, e))?;

        // Reject unknown columns before anything is cleared
        let table_columns = query_table_columns(&self.pool, table_name)
            .await
            .map_err(|e| LoadError::new(table_name, LoadStage::Schema, e))?
            .ok_or_else(|| {
                LoadError::new(table_name, LoadStage::Schema, LoadFailure::TableNotFound)
            })?;
        let unknown = table_columns.missing_from_table(dataset.columns());
        if !unknown.is_empty() {
            let unknown = unknown.into_iter().map(str::to_string).collect();
            return Err(LoadError::new(
                table_name,
                LoadStage::Schema,
                LoadFailure::UnknownColumns(unknown),
            ));
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| LoadError::new(table_name, LoadStage::Connect, e))?;

        match self.replace_in(&mut tx, &table, dataset).await {
            Ok(inserted) => {
                tx.commit()
                    .await
                    .map_err(|e| LoadError::new(table_name, LoadStage::Commit, e))?;
                info!("  -> Done loading {}.", table_name);
                Ok(inserted)
            }
            Err((stage, e)) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!(table = table_name, "rollback failed: {}", rollback_err);
                }
                let err = LoadError::new(table_name, stage, e);
                error!("  -> Error loading {}: {}", table_name, err.cause);
                Err(err)
            }
        }
    }
}

/// `INSERT INTO t (a, b) VALUES (?, ?), (?, ?)` for `row_count` rows
fn build_insert_sql(table: &str, column_list: &str, column_count: usize, row_count: usize) -> String {
    let row_placeholders = format!("({})", vec!["?"; column_count].join(", "));
    let values_clause = vec![row_placeholders.as_str(); row_count].join(", ");
    format!(
        "INSERT INTO {} ({}) VALUES {}",
        table, column_list, values_clause
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formats::dataset::Cell;

    fn dataset(columns: &[&str], rows: &[&[Option<&str>]]) -> Dataset {
        Dataset::new(
            columns.iter().map(|c| c.to_string()).collect(),
            rows.iter()
                .map(|row| row.iter().map(|v| v.map(str::to_string)).collect::<Vec<Cell>>())
                .collect(),
        )
        .unwrap()
    }

    async fn seeded_pool() -> Pool {
        let pool = Pool::sqlite_in_memory().await.unwrap();
        pool.execute_query(
            "CREATE TABLE staging_sellers (\
                seller_id TEXT NOT NULL, \
                seller_zip_code_prefix TEXT, \
                seller_city TEXT)",
        )
        .await
        .unwrap();
        pool.execute_query(
            "INSERT INTO staging_sellers VALUES \
                ('old-1', '01000', 'sao paulo'), \
                ('old-2', '20000', 'rio de janeiro')",
        )
        .await
        .unwrap();
        pool
    }

    async fn sorted_rows(pool: &Pool) -> Vec<Vec<Option<String>>> {
        let mut rows = pool
            .fetch_text_rows(
                "SELECT seller_id, seller_zip_code_prefix, seller_city FROM staging_sellers",
            )
            .await
            .unwrap();
        rows.sort();
        rows
    }

    fn owned(rows: &[&[Option<&str>]]) -> Vec<Vec<Option<String>>> {
        let mut rows: Vec<Vec<Option<String>>> = rows
            .iter()
            .map(|row| row.iter().map(|v| v.map(str::to_string)).collect())
            .collect();
        rows.sort();
        rows
    }

    #[test]
    fn test_build_insert_sql() {
        assert_eq!(
            build_insert_sql("`t`", "`a`, `b`", 2, 3),
            "INSERT INTO `t` (`a`, `b`) VALUES (?, ?), (?, ?), (?, ?)"
        );
    }

    #[tokio::test]
    async fn test_rows_per_statement_respects_bind_limit() {
        let pool = Pool::sqlite_in_memory().await.unwrap();
        let loader = StagingLoader::new(pool).with_batch_size(100_000);
        assert_eq!(loader.rows_per_statement(3), MAX_BIND_PARAMS / 3);

        let loader = loader.with_batch_size(0);
        assert_eq!(loader.rows_per_statement(3), 1);
    }

    #[tokio::test]
    async fn test_replace_leaves_exactly_the_new_rows() {
        let pool = seeded_pool().await;
        let new_rows: &[&[Option<&str>]] = &[
            &[Some("s1"), Some("13023"), Some("campinas")],
            &[Some("s2"), None, Some("curitiba")],
            &[Some("s3"), Some("04195"), None],
        ];
        let data = dataset(
            &["seller_id", "seller_zip_code_prefix", "seller_city"],
            new_rows,
        );

        let inserted = StagingLoader::new(pool.clone())
            .with_batch_size(2)
            .replace(&data, "staging_sellers")
            .await
            .unwrap();

        assert_eq!(inserted, 3);
        assert_eq!(sorted_rows(&pool).await, owned(new_rows));
    }

    #[tokio::test]
    async fn test_columns_matched_by_name_not_position() {
        let pool = seeded_pool().await;
        let data = dataset(
            &["seller_city", "seller_id"],
            &[&[Some("belo horizonte"), Some("s9")]],
        );

        StagingLoader::new(pool.clone())
            .replace(&data, "staging_sellers")
            .await
            .unwrap();

        assert_eq!(
            sorted_rows(&pool).await,
            owned(&[&[Some("s9"), None, Some("belo horizonte")]])
        );
    }

    #[tokio::test]
    async fn test_insert_failure_rolls_back_the_clear() {
        let pool = seeded_pool().await;
        let before = sorted_rows(&pool).await;
        // seller_id is NOT NULL, so the second row fails after the table was cleared
        let data = dataset(
            &["seller_id", "seller_city"],
            &[&[Some("s1"), Some("campinas")], &[None, Some("curitiba")]],
        );

        let err = StagingLoader::new(pool.clone())
            .replace(&data, "staging_sellers")
            .await
            .unwrap_err();

        assert_eq!(err.table, "staging_sellers");
        assert_eq!(err.stage, LoadStage::Insert);
        assert!(matches!(err.cause, LoadFailure::Database(_)));
        assert_eq!(sorted_rows(&pool).await, before);
    }

    #[tokio::test]
    async fn test_unknown_column_fails_before_clearing() {
        let pool = seeded_pool().await;
        let before = sorted_rows(&pool).await;
        let data = dataset(&["seller_id", "seller_state"], &[&[Some("s1"), Some("SP")]]);

        let err = StagingLoader::new(pool.clone())
            .replace(&data, "staging_sellers")
            .await
            .unwrap_err();

        assert_eq!(err.stage, LoadStage::Schema);
        assert!(matches!(
            &err.cause,
            LoadFailure::UnknownColumns(cols) if cols == &vec!["seller_state".to_string()]
        ));
        assert!(err.to_string().contains("staging_sellers"));
        assert!(err.to_string().contains("seller_state"));
        assert_eq!(sorted_rows(&pool).await, before);
    }

    #[tokio::test]
    async fn test_missing_table() {
        let pool = Pool::sqlite_in_memory().await.unwrap();
        let data = dataset(&["a"], &[&[Some("1")]]);

        let err = StagingLoader::new(pool)
            .replace(&data, "staging_absent")
            .await
            .unwrap_err();

        assert!(matches!(err.cause, LoadFailure::TableNotFound));
    }

    #[tokio::test]
    async fn test_invalid_table_name() {
        let pool = Pool::sqlite_in_memory().await.unwrap();
        let data = dataset(&["a"], &[&[Some("1")]]);

        let err = StagingLoader::new(pool)
            .replace(&data, "staging; DROP TABLE x")
            .await
            .unwrap_err();

        assert!(matches!(err.cause, LoadFailure::InvalidName(_)));
    }

    #[tokio::test]
    async fn test_replacing_twice_does_not_accumulate() {
        let pool = seeded_pool().await;
        let rows: &[&[Option<&str>]] = &[&[Some("s1"), Some("13023"), Some("campinas")]];
        let data = dataset(
            &["seller_id", "seller_zip_code_prefix", "seller_city"],
            rows,
        );
        let loader = StagingLoader::new(pool.clone());

        loader.replace(&data, "staging_sellers").await.unwrap();
        loader.replace(&data, "staging_sellers").await.unwrap();

        assert_eq!(sorted_rows(&pool).await, owned(rows));
    }

    async fn parent_child_pool() -> Pool {
        let pool = Pool::sqlite_in_memory().await.unwrap();
        pool.execute_query(
            "CREATE TABLE staging_parent (id TEXT PRIMARY KEY NOT NULL, label TEXT NOT NULL)",
        )
        .await
        .unwrap();
        pool.execute_query(
            "CREATE TABLE staging_child (\
                id TEXT NOT NULL, \
                parent_id TEXT REFERENCES staging_parent(id))",
        )
        .await
        .unwrap();
        pool.execute_query("INSERT INTO staging_parent VALUES ('a', 'old a'), ('b', 'old b')")
            .await
            .unwrap();
        pool.execute_query("INSERT INTO staging_child VALUES ('c1', 'a')")
            .await
            .unwrap();
        pool
    }

    async fn parent_rows(pool: &Pool) -> Vec<Vec<Option<String>>> {
        let mut rows = pool
            .fetch_text_rows("SELECT id, label FROM staging_parent")
            .await
            .unwrap();
        rows.sort();
        rows
    }

    #[tokio::test]
    async fn test_replace_referenced_table() {
        let pool = parent_child_pool().await;
        // The child row keeps pointing at 'a', which the new parent rows no longer contain
        let data = dataset(
            &["id", "label"],
            &[&[Some("b"), Some("new b")], &[Some("z"), Some("new z")]],
        );

        let inserted = StagingLoader::new(pool.clone())
            .replace(&data, "staging_parent")
            .await
            .unwrap();

        assert_eq!(inserted, 2);
        assert_eq!(
            parent_rows(&pool).await,
            owned(&[&[Some("b"), Some("new b")], &[Some("z"), Some("new z")]])
        );
        let children = pool
            .fetch_text_rows("SELECT id, parent_id FROM staging_child")
            .await
            .unwrap();
        assert_eq!(children, owned(&[&[Some("c1"), Some("a")]]));

        // Checks are enforced again once the replace is done
        assert!(pool
            .execute_query("INSERT INTO staging_child VALUES ('c2', 'q')")
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_referenced_table_rolls_back_on_insert_failure() {
        let pool = parent_child_pool().await;
        let before = parent_rows(&pool).await;
        // label is NOT NULL
        let data = dataset(&["id", "label"], &[&[Some("a"), None]]);

        let err = StagingLoader::new(pool.clone())
            .replace(&data, "staging_parent")
            .await
            .unwrap_err();

        assert_eq!(err.stage, LoadStage::Insert);
        assert_eq!(parent_rows(&pool).await, before);
        assert!(pool
            .execute_query("INSERT INTO staging_child VALUES ('c2', 'q')")
            .await
            .is_err());
    }

    #[test]
    fn test_connection_failure_names_its_stage() {
        let err = LoadError::new("staging_orders", LoadStage::Connect, sqlx::Error::PoolTimedOut);
        assert_eq!(
            err.to_string(),
            format!(
                "loading staging_orders failed at connect: database error: {}",
                sqlx::Error::PoolTimedOut
            )
        );
    }
}

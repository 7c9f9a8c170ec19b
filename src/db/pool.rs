//! Connection handle over the sqlx MySQL driver.
use anyhow::{Context, Result};
use derive_builder::Builder;
use sqlx::mysql::{MySqlConnectOptions, MySqlPoolOptions};
use sqlx::{MySql, Row, Transaction};
use std::str::FromStr;
use std::time::Duration;

use crate::config::{CONNECT_TIMEOUT, MAX_POOL_SIZE};

/// Inner pool variants
#[derive(Debug, Clone)]
enum PoolInner {
    MySql(sqlx::MySqlPool),
    #[cfg(test)]
    Sqlite(sqlx::SqlitePool),
}

/// SQL dialect of the pool, for the few statements that differ per backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    MySql,
    #[cfg(test)]
    Sqlite,
}

impl Backend {
    /// Session-scoped statement that suspends referential checks
    pub fn disable_foreign_keys(self) -> &'static str {
        match self {
            Backend::MySql => "SET FOREIGN_KEY_CHECKS = 0",
            // SQLite ignores PRAGMA foreign_keys inside a transaction; deferral is the closest match
            #[cfg(test)]
            Backend::Sqlite => "PRAGMA defer_foreign_keys = ON",
        }
    }

    /// Statement that restores referential checks
    pub fn enable_foreign_keys(self) -> &'static str {
        match self {
            Backend::MySql => "SET FOREIGN_KEY_CHECKS = 1",
            #[cfg(test)]
            Backend::Sqlite => "PRAGMA defer_foreign_keys = OFF",
        }
    }

    /// Query listing a table's column names, taking the table name as its only bind
    fn column_names_query(self) -> &'static str {
        match self {
            Backend::MySql => {
                r#"
                SELECT CAST(column_name AS CHAR) AS column_name
                FROM information_schema.columns
                WHERE table_schema = DATABASE() AND table_name = ?
                ORDER BY ordinal_position
                "#
            }
            #[cfg(test)]
            Backend::Sqlite => "SELECT name FROM pragma_table_info(?) ORDER BY cid",
        }
    }
}

// Wrap pool implementations so the loader and the merge can stay backend-agnostic.
#[derive(Debug, Clone)]
pub struct Pool {
    inner: PoolInner,
}

#[derive(Builder)]
pub struct PoolArgs {
    #[builder(setter(into))]
    url: String,
    #[builder(default = "MAX_POOL_SIZE")]
    max_pool_size: u32,
    #[builder(default = "CONNECT_TIMEOUT")]
    connect_timeout: Duration,
}

pub async fn pool(args: PoolArgs) -> Result<Pool> {
    let PoolArgs {
        url,
        max_pool_size,
        connect_timeout,
    } = args;

    let connect_options =
        MySqlConnectOptions::from_str(&url).context("Invalid database connection settings")?;

    tracing::info!(
        host = connect_options.get_host(),
        database = connect_options.get_database().unwrap_or_default(),
        "connecting to MySQL"
    );

    let mysql_pool = MySqlPoolOptions::new()
        .max_connections(max_pool_size)
        .acquire_timeout(connect_timeout)
        .connect_with(connect_options)
        .await
        .context("Failed to connect to the MySQL database")?;

    Ok(Pool {
        inner: PoolInner::MySql(mysql_pool),
    })
}

impl Pool {
    /// Create an in-memory SQLite pool for testing
    ///
    /// A single connection keeps every query on the same in-memory database.
    #[cfg(test)]
    pub async fn sqlite_in_memory() -> Result<Self, sqlx::Error> {
        let sqlite_pool = sqlx::sqlite::SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;

        Ok(Pool {
            inner: PoolInner::Sqlite(sqlite_pool),
        })
    }

    pub fn backend(&self) -> Backend {
        match &self.inner {
            PoolInner::MySql(_) => Backend::MySql,
            #[cfg(test)]
            PoolInner::Sqlite(_) => Backend::Sqlite,
        }
    }

    /// Open a new transactional scope on its own connection
    pub async fn begin(&self) -> Result<PoolTransaction, sqlx::Error> {
        match &self.inner {
            PoolInner::MySql(pool) => Ok(PoolTransaction::MySql(pool.begin().await?)),
            #[cfg(test)]
            PoolInner::Sqlite(pool) => Ok(PoolTransaction::Sqlite(pool.begin().await?)),
        }
    }

    /// Execute a statement outside any explicit transaction
    #[cfg(test)]
    pub async fn execute_query(&self, sql: &str) -> Result<(), sqlx::Error> {
        match &self.inner {
            PoolInner::MySql(pool) => {
                sqlx::raw_sql(sql).execute(pool).await?;
                Ok(())
            }
            #[cfg(test)]
            PoolInner::Sqlite(pool) => {
                sqlx::raw_sql(sql).execute(pool).await?;
                Ok(())
            }
        }
    }

    /// Column names of `table_name` in declaration order; empty if the table does not exist
    pub async fn fetch_column_names(&self, table_name: &str) -> Result<Vec<String>, sqlx::Error> {
        let sql = self.backend().column_names_query();
        match &self.inner {
            PoolInner::MySql(pool) => {
                let rows = sqlx::query(sql).bind(table_name).fetch_all(pool).await?;
                rows.iter().map(|row| row.try_get::<String, _>(0)).collect()
            }
            #[cfg(test)]
            PoolInner::Sqlite(pool) => {
                let rows = sqlx::query(sql).bind(table_name).fetch_all(pool).await?;
                rows.iter().map(|row| row.try_get::<String, _>(0)).collect()
            }
        }
    }

    /// Fetch every row of a query as optional text cells (test inspection helper)
    #[cfg(test)]
    pub async fn fetch_text_rows(&self, sql: &str) -> Result<Vec<Vec<Option<String>>>, sqlx::Error> {
        match &self.inner {
            PoolInner::Sqlite(pool) => {
                let rows = sqlx::query(sql).fetch_all(pool).await?;
                rows.iter()
                    .map(|row| {
                        (0..row.len())
                            .map(|idx| row.try_get::<Option<String>, _>(idx))
                            .collect()
                    })
                    .collect()
            }
            PoolInner::MySql(_) => Err(sqlx::Error::Protocol(
                "fetch_text_rows is only available on the SQLite test pool".to_string(),
            )),
        }
    }
}

/// An open transaction on one of the pool backends
///
/// Dropping it without calling [`PoolTransaction::commit`] rolls the work back.
pub enum PoolTransaction {
    MySql(Transaction<'static, MySql>),
    #[cfg(test)]
    Sqlite(Transaction<'static, sqlx::Sqlite>),
}

impl PoolTransaction {
    /// Run a statement with no bind parameters, returning rows affected
    pub async fn execute(&mut self, sql: &str) -> Result<u64, sqlx::Error> {
        match self {
            PoolTransaction::MySql(tx) => {
                let result = sqlx::query(sql).execute(&mut **tx).await?;
                Ok(result.rows_affected())
            }
            #[cfg(test)]
            PoolTransaction::Sqlite(tx) => {
                let result = sqlx::query(sql).execute(&mut **tx).await?;
                Ok(result.rows_affected())
            }
        }
    }

    /// Run a statement with `?` placeholders; `None` binds SQL NULL
    pub async fn execute_with_values(
        &mut self,
        sql: &str,
        values: &[Option<&str>],
    ) -> Result<u64, sqlx::Error> {
        match self {
            PoolTransaction::MySql(tx) => {
                let mut query = sqlx::query(sql);
                for value in values {
                    query = query.bind(*value);
                }
                Ok(query.execute(&mut **tx).await?.rows_affected())
            }
            #[cfg(test)]
            PoolTransaction::Sqlite(tx) => {
                let mut query = sqlx::query(sql);
                for value in values {
                    query = query.bind(*value);
                }
                Ok(query.execute(&mut **tx).await?.rows_affected())
            }
        }
    }

    pub async fn commit(self) -> Result<(), sqlx::Error> {
        match self {
            PoolTransaction::MySql(tx) => tx.commit().await,
            #[cfg(test)]
            PoolTransaction::Sqlite(tx) => tx.commit().await,
        }
    }

    pub async fn rollback(self) -> Result<(), sqlx::Error> {
        match self {
            PoolTransaction::MySql(tx) => tx.rollback().await,
            #[cfg(test)]
            PoolTransaction::Sqlite(tx) => tx.rollback().await,
        }
    }
}

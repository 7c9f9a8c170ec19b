use async_trait::async_trait;
use thiserror::Error;
use tracing::info;

use crate::db::{InvalidIdentifier, Pool, quote_identifier};

#[derive(Debug, Error)]
#[error("warehouse merge {procedure}() failed: {cause}")]
pub struct MergeError {
    pub procedure: String,
    #[source]
    pub cause: sqlx::Error,
}

/// The downstream merge from staging tables into the warehouse
#[async_trait]
pub trait WarehouseMerge: Send + Sync {
    /// Human-readable name used in logs and messages
    fn name(&self) -> &str;

    async fn merge(&self) -> Result<(), MergeError>;
}

/// Calls a no-argument stored procedure in its own transaction
pub struct StoredProcedureMerge {
    pool: Pool,
    procedure: String,
    call_sql: String,
}

impl StoredProcedureMerge {
    pub fn new(pool: Pool, procedure: impl Into<String>) -> Result<Self, InvalidIdentifier> {
        let procedure = procedure.into();
        let call_sql = format!("CALL {}()", quote_identifier(&procedure)?);
        Ok(Self {
            pool,
            procedure,
            call_sql,
        })
    }
}

#[async_trait]
impl WarehouseMerge for StoredProcedureMerge {
    fn name(&self) -> &str {
        &self.procedure
    }

    async fn merge(&self) -> Result<(), MergeError> {
        info!("[DW LOAD] Calling stored procedure {}() ...", self.procedure);

        let fail = |cause| MergeError {
            procedure: self.procedure.clone(),
            cause,
        };

        let mut tx = self.pool.begin().await.map_err(fail)?;
        tx.execute(&self.call_sql).await.map_err(fail)?;
        tx.commit().await.map_err(fail)?;

        info!("  -> Data warehouse loaded successfully!");
        Ok(())
    }
}

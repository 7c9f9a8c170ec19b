//! Configuration for the staging loader
//!
//! This module centralizes the tunable constants used throughout the
//! application and the database settings read from the environment.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

// ============================================================================
// Connection Pool Configuration
// ============================================================================

pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Loads and the merge run one at a time, so a small pool is plenty.
pub const MAX_POOL_SIZE: u32 = 4;

// ============================================================================
// Staging Load Configuration
// ============================================================================

/// Default number of rows per multi-row INSERT statement
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Upper bound on bind parameters in a single statement
///
/// SQLite caps host parameters at 32766 and MySQL at 65535; the lower of the
/// two keeps one code path valid for both backends.
pub const MAX_BIND_PARAMS: usize = 32766;

/// Stored procedure that merges the staging tables into the warehouse
pub const DEFAULT_MERGE_PROCEDURE: &str = "sp_LoadOlist_DW_Incremental";

// ============================================================================
// Database Settings
// ============================================================================

pub const ENV_DB_USER: &str = "DB_USER";
pub const ENV_DB_PASS: &str = "DB_PASS";
pub const ENV_DB_HOST: &str = "DB_HOST";
pub const ENV_DB_PORT: &str = "DB_PORT";
pub const ENV_DB_NAME: &str = "DB_NAME";
pub const ENV_MERGE_PROCEDURE: &str = "DW_MERGE_PROCEDURE";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("database credentials are not set: missing {}", .0.join(", "))]
    Missing(Vec<&'static str>),

    #[error("DB_PORT must be a port number, got '{0}'")]
    InvalidPort(String),
}

/// The five values needed to reach the warehouse database
#[derive(Clone, PartialEq, Eq)]
pub struct DbSettings {
    pub user: String,
    pub password: String,
    pub host: String,
    pub port: u16,
    pub database: String,
}

impl DbSettings {
    /// Load `.env` if present, then read settings from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenv::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from any key lookup; every variable is checked so the
    /// error names all of the missing ones at once.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut missing = Vec::new();
        let mut get = |key: &'static str| match lookup(key) {
            Some(value) if !value.trim().is_empty() => value,
            _ => {
                missing.push(key);
                String::new()
            }
        };

        let user = get(ENV_DB_USER);
        let password = get(ENV_DB_PASS);
        let host = get(ENV_DB_HOST);
        let port = get(ENV_DB_PORT);
        let database = get(ENV_DB_NAME);

        if !missing.is_empty() {
            return Err(ConfigError::Missing(missing));
        }

        let port = port
            .trim()
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort(port.clone()))?;

        Ok(Self {
            user,
            password,
            host,
            port,
            database,
        })
    }

    /// Connection URI with the password percent-encoded
    pub fn connection_url(&self) -> String {
        format!(
            "mysql://{}:{}@{}:{}/{}",
            urlencoding::encode(&self.user),
            urlencoding::encode(&self.password),
            self.host,
            self.port,
            self.database
        )
    }
}

impl fmt::Debug for DbSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DbSettings")
            .field("user", &self.user)
            .field("password", &"***")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .finish()
    }
}

/// Merge procedure name, overridable through the environment
pub fn merge_procedure_from_env() -> String {
    std::env::var(ENV_MERGE_PROCEDURE)
        .ok()
        .filter(|name| !name.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_MERGE_PROCEDURE.to_string())
}

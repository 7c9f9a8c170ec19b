//! Database layer - connection pool, identifier quoting and staging-table introspection

pub mod pool;
pub mod schema;

pub use pool::{Pool, PoolTransaction};

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("'{0}' is not a valid SQL identifier")]
pub struct InvalidIdentifier(pub String);

/// Quote a table, column or procedure name for interpolation into SQL
///
/// Only plain identifiers (`[A-Za-z_][A-Za-z0-9_]*`) are accepted. Backticks are
/// understood by both MySQL and SQLite.
pub fn quote_identifier(name: &str) -> Result<String, InvalidIdentifier> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) => {
            (first.is_ascii_alphabetic() || first == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    };

    if valid {
        Ok(format!("`{}`", name))
    } else {
        Err(InvalidIdentifier(name.to_string()))
    }
}

/// Quote a column name taken from a file header, escaping embedded backticks
pub fn escape_identifier(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

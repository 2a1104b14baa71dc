//! Error types for the database layer and the migration engine

use crate::migrations::MigrationDirection;
use stockroom_core::CoreError;
use thiserror::Error;

/// Result type alias for backend operations
pub type DbResult<T> = Result<T, DbError>;

/// Result type alias for migration operations
pub type MigrationResult<T> = Result<T, MigrationError>;

/// Errors raised by a database backend
#[derive(Debug, Clone, Error)]
pub enum DbError {
    /// Could not connect or acquire a pooled connection
    #[error("Connection error: {0}")]
    Connection(String),
    /// A statement or query failed
    #[error("Query error: {0}")]
    Query(String),
    /// begin/commit/rollback failed
    #[error("Transaction error: {0}")]
    Transaction(String),
    /// A column could not be read as the expected type
    #[error("Decode error: {0}")]
    Decode(String),
    /// Advisory lock acquisition or release failed
    #[error("Lock error: {0}")]
    Lock(String),
}

impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                DbError::Connection(err.to_string())
            }
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
                DbError::Decode(err.to_string())
            }
            _ => DbError::Query(err.to_string()),
        }
    }
}

/// Errors raised while planning or executing migrations.
///
/// Step errors carry the migration id and name so a halted run can be
/// reported without further lookups.
#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("Invalid migration definition: {0}")]
    InvalidDefinition(String),

    #[error("Failed to read migration ledger '{table}': {source}")]
    LedgerRead {
        table: String,
        #[source]
        source: DbError,
    },

    #[error(
        "Failed to {} migration {id} ({name}) at statement {statement}: {source}",
        .direction.verb()
    )]
    Statement {
        id: i64,
        name: String,
        direction: MigrationDirection,
        /// 1-based position of the failing statement in the batch
        statement: usize,
        #[source]
        source: DbError,
    },

    #[error("Failed to update ledger for migration {id} ({name}): {source}")]
    LedgerWrite {
        id: i64,
        name: String,
        #[source]
        source: DbError,
    },

    #[error("Transaction for migration {id} ({name}) failed: {source}")]
    Transaction {
        id: i64,
        name: String,
        #[source]
        source: DbError,
    },

    #[error("Another migration run holds the advisory lock (key {key})")]
    Locked { key: i64 },

    #[error(transparent)]
    Database(#[from] DbError),
}

impl From<MigrationError> for CoreError {
    fn from(err: MigrationError) -> Self {
        match err {
            MigrationError::Database(db) => CoreError::database(db.to_string()),
            other => CoreError::migration(other.to_string()),
        }
    }
}

impl From<DbError> for CoreError {
    fn from(err: DbError) -> Self {
        CoreError::database(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_statement_error_message_names_direction() {
        let err = MigrationError::Statement {
            id: 4,
            name: "add_sku".to_string(),
            direction: MigrationDirection::Down,
            statement: 2,
            source: DbError::Query("column \"sku\" does not exist".to_string()),
        };

        assert_eq!(
            err.to_string(),
            "Failed to roll back migration 4 (add_sku) at statement 2: Query error: column \"sku\" does not exist"
        );
    }

    #[test]
    fn test_conversion_into_core_error() {
        let core: CoreError = MigrationError::Locked { key: 7 }.into();
        assert!(matches!(core, CoreError::Migration { .. }));

        let core: CoreError = MigrationError::Database(DbError::Connection("refused".into())).into();
        assert!(matches!(core, CoreError::Database { .. }));
    }
}

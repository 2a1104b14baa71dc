//! Core Database Backend Traits
//!
//! The migration engine only needs a small slice of a database: transactions
//! that execute statements, a way to read rows back, a table existence probe
//! and a cross-session lock. These traits describe that slice so the engine
//! can run against PostgreSQL in production and an in-memory store in tests.

use crate::error::{DbError, DbResult};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};

/// Abstract database connection pool
#[async_trait]
pub trait DatabasePool: Send + Sync {
    /// Begin a transaction on a pooled connection
    async fn begin_transaction(&self) -> DbResult<Box<dyn DatabaseTransaction>>;

    /// Execute a query and return the result rows
    async fn fetch_all(&self, sql: &str, params: &[DatabaseValue]) -> DbResult<Vec<Box<dyn DatabaseRow>>>;

    /// Check whether a table exists in the current schema
    async fn table_exists(&self, table: &str) -> DbResult<bool>;

    /// Try to take the session-level lock identified by `key`.
    ///
    /// Returns `Ok(None)` when another session already holds it.
    async fn try_lock(&self, key: i64) -> DbResult<Option<Box<dyn AdvisoryLock>>>;

    /// Close the pool
    async fn close(&self);
}

/// Abstract database transaction
#[async_trait]
pub trait DatabaseTransaction: Send {
    /// Execute a statement within the transaction
    async fn execute(&mut self, sql: &str, params: &[DatabaseValue]) -> DbResult<u64>;

    /// Commit the transaction
    async fn commit(self: Box<Self>) -> DbResult<()>;

    /// Rollback the transaction
    async fn rollback(self: Box<Self>) -> DbResult<()>;
}

/// A held cross-session lock. Dropping it without `release` ends the
/// owning session, which frees the lock server-side.
#[async_trait]
pub trait AdvisoryLock: Send {
    async fn release(self: Box<Self>) -> DbResult<()>;
}

/// Abstract database row
pub trait DatabaseRow: Send + Sync {
    /// Get a column value by name
    fn get_by_name(&self, name: &str) -> DbResult<DatabaseValue>;
}

/// Database value enumeration for type-safe parameter binding
#[derive(Debug, Clone, PartialEq)]
pub enum DatabaseValue {
    Null,
    Bool(bool),
    Int32(i32),
    Int64(i64),
    String(String),
    /// `TIMESTAMPTZ`
    DateTime(DateTime<Utc>),
    /// `TIMESTAMP` (without time zone), read and written as UTC wall time
    Timestamp(NaiveDateTime),
}

impl DatabaseValue {
    /// Check if the value is null
    pub fn is_null(&self) -> bool {
        matches!(self, DatabaseValue::Null)
    }

    /// Read an integer column regardless of its width
    pub fn as_i64(&self) -> DbResult<i64> {
        match self {
            DatabaseValue::Int32(i) => Ok(i64::from(*i)),
            DatabaseValue::Int64(i) => Ok(*i),
            other => Err(DbError::Decode(format!("expected integer, found {:?}", other))),
        }
    }

    pub fn as_str(&self) -> DbResult<&str> {
        match self {
            DatabaseValue::String(s) => Ok(s),
            other => Err(DbError::Decode(format!("expected text, found {:?}", other))),
        }
    }

    /// Read either timestamp flavor; naive values are taken as UTC
    pub fn as_datetime(&self) -> DbResult<DateTime<Utc>> {
        match self {
            DatabaseValue::DateTime(dt) => Ok(*dt),
            DatabaseValue::Timestamp(naive) => Ok(DateTime::from_naive_utc_and_offset(*naive, Utc)),
            other => Err(DbError::Decode(format!("expected timestamp, found {:?}", other))),
        }
    }

    /// Value for a `TIMESTAMP` column
    pub fn as_timestamp(&self) -> DbResult<NaiveDateTime> {
        match self {
            DatabaseValue::Timestamp(naive) => Ok(*naive),
            other => Err(DbError::Decode(format!(
                "expected timestamp without time zone, found {:?}",
                other
            ))),
        }
    }
}

impl From<bool> for DatabaseValue {
    fn from(value: bool) -> Self {
        DatabaseValue::Bool(value)
    }
}

impl From<i32> for DatabaseValue {
    fn from(value: i32) -> Self {
        DatabaseValue::Int32(value)
    }
}

impl From<i64> for DatabaseValue {
    fn from(value: i64) -> Self {
        DatabaseValue::Int64(value)
    }
}

impl From<String> for DatabaseValue {
    fn from(value: String) -> Self {
        DatabaseValue::String(value)
    }
}

impl From<&str> for DatabaseValue {
    fn from(value: &str) -> Self {
        DatabaseValue::String(value.to_string())
    }
}

impl From<DateTime<Utc>> for DatabaseValue {
    fn from(value: DateTime<Utc>) -> Self {
        DatabaseValue::DateTime(value)
    }
}

impl From<NaiveDateTime> for DatabaseValue {
    fn from(value: NaiveDateTime) -> Self {
        DatabaseValue::Timestamp(value)
    }
}

impl<T> From<Option<T>> for DatabaseValue
where
    T: Into<DatabaseValue>,
{
    fn from(value: Option<T>) -> Self {
        match value {
            Some(v) => v.into(),
            None => DatabaseValue::Null,
        }
    }
}

/// Database pool configuration
#[derive(Debug, Clone)]
pub struct DatabasePoolConfig {
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout_seconds: u64,
}

impl Default for DatabasePoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 5,
            min_connections: 1,
            acquire_timeout_seconds: 30,
        }
    }
}

impl From<&stockroom_core::MigrateConfig> for DatabasePoolConfig {
    fn from(config: &stockroom_core::MigrateConfig) -> Self {
        Self {
            max_connections: config.max_connections,
            min_connections: 1,
            acquire_timeout_seconds: config.acquire_timeout_secs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_widths_decode_to_i64() {
        assert_eq!(DatabaseValue::Int32(7).as_i64().unwrap(), 7);
        assert_eq!(DatabaseValue::Int64(1 << 40).as_i64().unwrap(), 1 << 40);
        assert!(matches!(
            DatabaseValue::String("7".into()).as_i64(),
            Err(DbError::Decode(_))
        ));
    }

    #[test]
    fn test_timestamp_flavors() {
        let now = Utc::now();
        let naive = DatabaseValue::from(now.naive_utc());

        assert_eq!(naive.as_timestamp().unwrap(), now.naive_utc());
        assert_eq!(naive.as_datetime().unwrap(), now);
        assert_eq!(DatabaseValue::from(now).as_datetime().unwrap(), now);
        assert!(matches!(
            DatabaseValue::from(now).as_timestamp(),
            Err(DbError::Decode(_))
        ));
    }

    #[test]
    fn test_option_conversion() {
        assert_eq!(DatabaseValue::from(None::<i64>), DatabaseValue::Null);
        assert_eq!(DatabaseValue::from(Some("products")), DatabaseValue::String("products".into()));
        assert!(DatabaseValue::from(None::<String>).is_null());
    }
}

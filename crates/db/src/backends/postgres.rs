//! PostgreSQL Backend Implementation
//!
//! Implements the backend traits on top of a sqlx `PgPool`. The run lock is a
//! session-level `pg_try_advisory_lock` held on a dedicated pooled connection.

use super::core::*;
use crate::error::{DbError, DbResult};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::postgres::{PgArguments, PgPoolOptions, PgRow};
use sqlx::pool::PoolConnection;
use sqlx::query::Query;
use sqlx::{Column, PgPool, Postgres, Row, TypeInfo, ValueRef};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

const TABLE_EXISTS_SQL: &str = "SELECT EXISTS (\
    SELECT 1 FROM information_schema.tables \
    WHERE table_schema = current_schema() AND table_name = $1\
)";

/// PostgreSQL database backend
#[derive(Debug, Default)]
pub struct PostgresBackend;

impl PostgresBackend {
    pub fn new() -> Self {
        Self
    }

    /// Open a connection pool for the given URL
    pub async fn connect(&self, database_url: &str, config: DatabasePoolConfig) -> DbResult<Arc<PostgresPool>> {
        self.validate_database_url(database_url)?;

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_seconds))
            .connect(database_url)
            .await
            .map_err(|e| DbError::Connection(format!("Failed to create PostgreSQL pool: {}", e)))?;

        debug!(
            max_connections = config.max_connections,
            "PostgreSQL pool established"
        );

        Ok(Arc::new(PostgresPool::new(pool)))
    }

    pub fn validate_database_url(&self, url: &str) -> DbResult<()> {
        let parsed = url::Url::parse(url)
            .map_err(|e| DbError::Connection(format!("Invalid database URL: {}", e)))?;

        match parsed.scheme() {
            "postgres" | "postgresql" => Ok(()),
            other => Err(DbError::Connection(format!(
                "Invalid PostgreSQL URL scheme '{}'",
                other
            ))),
        }
    }
}

/// PostgreSQL connection pool
pub struct PostgresPool {
    pool: PgPool,
}

impl PostgresPool {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DatabasePool for PostgresPool {
    async fn begin_transaction(&self) -> DbResult<Box<dyn DatabaseTransaction>> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| DbError::Transaction(format!("Failed to begin transaction: {}", e)))?;

        Ok(Box::new(PostgresTransaction { tx: Some(tx) }))
    }

    async fn fetch_all(&self, sql: &str, params: &[DatabaseValue]) -> DbResult<Vec<Box<dyn DatabaseRow>>> {
        let rows = bind_all(sqlx::query(sql), params)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(PostgresRow::boxed).collect())
    }

    async fn table_exists(&self, table: &str) -> DbResult<bool> {
        let exists: bool = sqlx::query_scalar(TABLE_EXISTS_SQL)
            .bind(table)
            .fetch_one(&self.pool)
            .await?;
        Ok(exists)
    }

    async fn try_lock(&self, key: i64) -> DbResult<Option<Box<dyn AdvisoryLock>>> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| DbError::Connection(format!("Failed to acquire lock connection: {}", e)))?;

        let acquired: bool = sqlx::query_scalar("SELECT pg_try_advisory_lock($1)")
            .bind(key)
            .fetch_one(&mut *conn)
            .await
            .map_err(|e| DbError::Lock(format!("pg_try_advisory_lock({}) failed: {}", key, e)))?;

        if !acquired {
            return Ok(None);
        }

        debug!(key, "Advisory lock acquired");
        Ok(Some(Box::new(PostgresAdvisoryLock {
            conn: Some(conn),
            key,
        })))
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

/// PostgreSQL transaction
pub struct PostgresTransaction {
    tx: Option<sqlx::Transaction<'static, Postgres>>,
}

impl PostgresTransaction {
    fn active(&mut self) -> DbResult<&mut sqlx::Transaction<'static, Postgres>> {
        self.tx
            .as_mut()
            .ok_or_else(|| DbError::Transaction("Transaction already completed".to_string()))
    }
}

#[async_trait]
impl DatabaseTransaction for PostgresTransaction {
    async fn execute(&mut self, sql: &str, params: &[DatabaseValue]) -> DbResult<u64> {
        let tx = self.active()?;
        let result = bind_all(sqlx::query(sql), params).execute(&mut **tx).await?;
        Ok(result.rows_affected())
    }

    async fn commit(mut self: Box<Self>) -> DbResult<()> {
        let tx = self
            .tx
            .take()
            .ok_or_else(|| DbError::Transaction("Transaction already completed".to_string()))?;

        tx.commit()
            .await
            .map_err(|e| DbError::Transaction(format!("Transaction commit failed: {}", e)))
    }

    async fn rollback(mut self: Box<Self>) -> DbResult<()> {
        let tx = self
            .tx
            .take()
            .ok_or_else(|| DbError::Transaction("Transaction already completed".to_string()))?;

        tx.rollback()
            .await
            .map_err(|e| DbError::Transaction(format!("Transaction rollback failed: {}", e)))
    }
}

/// Session-level advisory lock pinned to one pooled connection
pub struct PostgresAdvisoryLock {
    conn: Option<PoolConnection<Postgres>>,
    key: i64,
}

#[async_trait]
impl AdvisoryLock for PostgresAdvisoryLock {
    async fn release(mut self: Box<Self>) -> DbResult<()> {
        let Some(mut conn) = self.conn.take() else {
            return Ok(());
        };

        let released = sqlx::query_scalar::<_, bool>("SELECT pg_advisory_unlock($1)")
            .bind(self.key)
            .fetch_one(&mut *conn)
            .await;

        match released {
            Ok(true) => {
                debug!(key = self.key, "Advisory lock released");
                Ok(())
            }
            Ok(false) => {
                // Not held by this session any more; close it rather than pool it.
                warn!(key = self.key, "Advisory lock was not held at release");
                drop(conn.detach());
                Ok(())
            }
            Err(e) => {
                drop(conn.detach());
                Err(DbError::Lock(format!(
                    "pg_advisory_unlock({}) failed: {}",
                    self.key, e
                )))
            }
        }
    }
}

impl Drop for PostgresAdvisoryLock {
    fn drop(&mut self) {
        // A pooled connection would keep the session (and the lock) alive.
        if let Some(conn) = self.conn.take() {
            drop(conn.detach());
        }
    }
}

/// PostgreSQL row
pub struct PostgresRow {
    row: PgRow,
}

impl PostgresRow {
    fn boxed(row: PgRow) -> Box<dyn DatabaseRow> {
        Box::new(Self { row })
    }
}

impl DatabaseRow for PostgresRow {
    fn get_by_name(&self, name: &str) -> DbResult<DatabaseValue> {
        let index = self
            .row
            .columns()
            .iter()
            .position(|col| col.name() == name)
            .ok_or_else(|| DbError::Decode(format!("Column '{}' not found", name)))?;

        postgres_value_to_database_value(&self.row, index)
    }
}

fn bind_all<'q>(
    mut query: Query<'q, Postgres, PgArguments>,
    params: &[DatabaseValue],
) -> Query<'q, Postgres, PgArguments> {
    for param in params {
        query = bind_database_value(query, param);
    }
    query
}

/// Bind a DatabaseValue to a sqlx query
fn bind_database_value<'q>(
    query: Query<'q, Postgres, PgArguments>,
    value: &DatabaseValue,
) -> Query<'q, Postgres, PgArguments> {
    match value {
        DatabaseValue::Null => query.bind(Option::<String>::None),
        DatabaseValue::Bool(b) => query.bind(*b),
        DatabaseValue::Int32(i) => query.bind(*i),
        DatabaseValue::Int64(i) => query.bind(*i),
        DatabaseValue::String(s) => query.bind(s.clone()),
        DatabaseValue::DateTime(dt) => query.bind(*dt),
        DatabaseValue::Timestamp(naive) => query.bind(*naive),
    }
}

/// Convert a PostgreSQL column value to DatabaseValue
fn postgres_value_to_database_value(row: &PgRow, index: usize) -> DbResult<DatabaseValue> {
    let raw = row.try_get_raw(index)?;
    if raw.is_null() {
        return Ok(DatabaseValue::Null);
    }

    let type_name = row.columns()[index].type_info().name().to_string();
    let value = match type_name.as_str() {
        "BOOL" => DatabaseValue::Bool(row.try_get(index)?),
        "INT2" => DatabaseValue::Int32(i32::from(row.try_get::<i16, _>(index)?)),
        "INT4" => DatabaseValue::Int32(row.try_get(index)?),
        "INT8" => DatabaseValue::Int64(row.try_get(index)?),
        "TIMESTAMPTZ" => DatabaseValue::DateTime(row.try_get::<DateTime<Utc>, _>(index)?),
        "TIMESTAMP" => DatabaseValue::Timestamp(row.try_get::<NaiveDateTime, _>(index)?),
        "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" => DatabaseValue::String(row.try_get(index)?),
        other => {
            return Err(DbError::Decode(format!(
                "Unsupported column type '{}' for column {}",
                other, index
            )))
        }
    };

    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_validation() {
        let backend = PostgresBackend::new();
        assert!(backend.validate_database_url("postgres://localhost/stockroom").is_ok());
        assert!(backend.validate_database_url("postgresql://u:p@db:5432/stockroom").is_ok());
        assert!(matches!(
            backend.validate_database_url("mysql://localhost/stockroom"),
            Err(DbError::Connection(_))
        ));
        assert!(backend.validate_database_url("not a url").is_err());
    }

    #[test]
    fn test_table_exists_probe_is_schema_scoped() {
        assert!(TABLE_EXISTS_SQL.contains("current_schema()"));
        assert!(TABLE_EXISTS_SQL.contains("$1"));
    }
}

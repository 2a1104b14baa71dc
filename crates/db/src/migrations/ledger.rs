//! Ledger Reader - what the database says has been applied.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{debug, error};

use super::definitions::{LedgerEntry, LedgerFailurePolicy};
use super::sql::LedgerSql;
use crate::backends::DatabasePool;
use crate::error::{DbResult, MigrationError, MigrationResult};

/// Reads the ledger table through the backend pool
pub struct LedgerReader {
    pool: Arc<dyn DatabasePool>,
    sql: LedgerSql,
    policy: LedgerFailurePolicy,
}

impl LedgerReader {
    pub fn new(pool: Arc<dyn DatabasePool>, sql: LedgerSql, policy: LedgerFailurePolicy) -> Self {
        Self { pool, sql, policy }
    }

    /// Ids recorded in the ledger. A missing ledger table means nothing is applied.
    pub async fn applied_ids(&self) -> MigrationResult<BTreeSet<i64>> {
        match self.read_applied_ids().await {
            Ok(Some(ids)) => Ok(ids),
            Ok(None) => {
                debug!(
                    target: "stockroom::migrate",
                    table = self.sql.table(),
                    "Ledger table not found, treating as bootstrap state"
                );
                Ok(BTreeSet::new())
            }
            Err(source) => match self.policy {
                LedgerFailurePolicy::Strict => Err(MigrationError::LedgerRead {
                    table: self.sql.table().to_string(),
                    source,
                }),
                LedgerFailurePolicy::FailOpen => {
                    error!(
                        target: "stockroom::migrate",
                        table = self.sql.table(),
                        error = %source,
                        "Could not read migration ledger, assuming nothing is applied"
                    );
                    Ok(BTreeSet::new())
                }
            },
        }
    }

    /// Full ledger rows in id order; empty when the table does not exist
    pub async fn entries(&self) -> MigrationResult<Vec<LedgerEntry>> {
        self.read_entries()
            .await
            .map(Option::unwrap_or_default)
            .map_err(|source| MigrationError::LedgerRead {
                table: self.sql.table().to_string(),
                source,
            })
    }

    async fn read_applied_ids(&self) -> DbResult<Option<BTreeSet<i64>>> {
        if !self.pool.table_exists(self.sql.table()).await? {
            return Ok(None);
        }

        let rows = self.pool.fetch_all(&self.sql.select_applied_ids(), &[]).await?;
        let mut ids = BTreeSet::new();
        for row in rows {
            ids.insert(row.get_by_name("migration_id")?.as_i64()?);
        }
        Ok(Some(ids))
    }

    async fn read_entries(&self) -> DbResult<Option<Vec<LedgerEntry>>> {
        if !self.pool.table_exists(self.sql.table()).await? {
            return Ok(None);
        }

        let rows = self.pool.fetch_all(&self.sql.select_entries(), &[]).await?;
        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            entries.push(LedgerEntry {
                migration_id: row.get_by_name("migration_id")?.as_i64()?,
                name: row.get_by_name("name")?.as_str()?.to_string(),
                applied_at: row.get_by_name("applied_at")?.as_datetime()?,
            });
        }
        Ok(Some(entries))
    }
}

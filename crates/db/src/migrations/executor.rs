//! Migration Executor - runs one migration step inside one transaction.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, warn};

use super::definitions::{Migration, MigrationDirection};
use super::sql::{split_sql_statements, LedgerSql};
use crate::backends::{DatabasePool, DatabaseTransaction, DatabaseValue};
use crate::error::{MigrationError, MigrationResult};

/// Applies or rolls back single migrations, keeping the ledger in step
pub struct MigrationExecutor {
    pool: Arc<dyn DatabasePool>,
    sql: LedgerSql,
}

impl MigrationExecutor {
    pub fn new(pool: Arc<dyn DatabasePool>, sql: LedgerSql) -> Self {
        Self { pool, sql }
    }

    /// Run `up_sql` and record the migration, atomically
    pub async fn apply(&self, migration: &Migration) -> MigrationResult<()> {
        self.execute(migration, MigrationDirection::Up).await
    }

    /// Run `down_sql` and remove the ledger row, atomically
    pub async fn rollback(&self, migration: &Migration) -> MigrationResult<()> {
        self.execute(migration, MigrationDirection::Down).await
    }

    pub async fn execute(&self, migration: &Migration, direction: MigrationDirection) -> MigrationResult<()> {
        let mut tx = self
            .pool
            .begin_transaction()
            .await
            .map_err(|source| MigrationError::Transaction {
                id: migration.id,
                name: migration.name.clone(),
                source,
            })?;

        match self.run_in_transaction(tx.as_mut(), migration, direction).await {
            Ok(()) => tx.commit().await.map_err(|source| MigrationError::Transaction {
                id: migration.id,
                name: migration.name.clone(),
                source,
            }),
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!(
                        target: "stockroom::migrate",
                        id = migration.id,
                        error = %rollback_err,
                        "Failed to roll back transaction after migration error"
                    );
                }
                Err(err)
            }
        }
    }

    async fn run_in_transaction(
        &self,
        tx: &mut dyn DatabaseTransaction,
        migration: &Migration,
        direction: MigrationDirection,
    ) -> MigrationResult<()> {
        // The bootstrap migration's down drops the ledger table itself.
        let ledger_first = direction == MigrationDirection::Down && migration.bootstraps_ledger;

        if ledger_first {
            self.write_ledger(tx, migration, direction).await?;
        }

        let statements = split_sql_statements(migration.sql_for(direction));
        for (index, statement) in statements.iter().enumerate() {
            debug!(
                target: "stockroom::migrate",
                id = migration.id,
                statement = index + 1,
                "{}",
                statement
            );
            tx.execute(statement, &[])
                .await
                .map_err(|source| MigrationError::Statement {
                    id: migration.id,
                    name: migration.name.clone(),
                    direction,
                    statement: index + 1,
                    source,
                })?;
        }

        if !ledger_first {
            self.write_ledger(tx, migration, direction).await?;
        }

        Ok(())
    }

    async fn write_ledger(
        &self,
        tx: &mut dyn DatabaseTransaction,
        migration: &Migration,
        direction: MigrationDirection,
    ) -> MigrationResult<()> {
        let result = match direction {
            MigrationDirection::Up => {
                let params = [
                    DatabaseValue::Int64(migration.id),
                    DatabaseValue::String(migration.name.clone()),
                    DatabaseValue::Timestamp(Utc::now().naive_utc()),
                ];
                tx.execute(&self.sql.insert_entry(), &params).await
            }
            MigrationDirection::Down => {
                tx.execute(&self.sql.delete_entry(), &[DatabaseValue::Int64(migration.id)])
                    .await
            }
        };

        result.map(|_| ()).map_err(|source| MigrationError::LedgerWrite {
            id: migration.id,
            name: migration.name.clone(),
            source,
        })
    }
}

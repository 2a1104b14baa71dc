//! Migration Definitions - Core types shared by the registry, ledger,
//! planner and executor.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use stockroom_core::MigrateConfig;

/// A hand-authored, reversible schema change
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Migration {
    /// Positive, registry-unique identifier; defines application order
    pub id: i64,
    /// Human-readable name, snapshotted into the ledger
    pub name: String,
    /// SQL statements to apply the migration
    pub up_sql: String,
    /// SQL statements to rollback the migration
    pub down_sql: String,
    /// Whether `up_sql` creates the ledger table itself
    pub bootstraps_ledger: bool,
}

impl Migration {
    pub fn new(
        id: i64,
        name: impl Into<String>,
        up_sql: impl Into<String>,
        down_sql: impl Into<String>,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            up_sql: up_sql.into(),
            down_sql: down_sql.into(),
            bootstraps_ledger: false,
        }
    }

    /// Mark this migration as the one that creates the ledger table
    pub fn bootstrapping(mut self) -> Self {
        self.bootstraps_ledger = true;
        self
    }

    /// The statement batch to run in the given direction
    pub fn sql_for(&self, direction: MigrationDirection) -> &str {
        match direction {
            MigrationDirection::Up => &self.up_sql,
            MigrationDirection::Down => &self.down_sql,
        }
    }
}

impl fmt::Display for Migration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.id, self.name)
    }
}

/// One applied migration as persisted in the ledger table
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerEntry {
    pub migration_id: i64,
    /// Name at the time of application; may differ from the current registry
    pub name: String,
    pub applied_at: DateTime<Utc>,
}

/// Migration direction for execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MigrationDirection {
    /// Apply the migration (run UP statements)
    Up,
    /// Rollback the migration (run DOWN statements)
    Down,
}

impl MigrationDirection {
    /// Verb used in progress and error messages
    pub fn verb(&self) -> &'static str {
        match self {
            MigrationDirection::Up => "apply",
            MigrationDirection::Down => "roll back",
        }
    }
}

impl fmt::Display for MigrationDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MigrationDirection::Up => write!(f, "up"),
            MigrationDirection::Down => write!(f, "down"),
        }
    }
}

/// What to do when the ledger exists but cannot be read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LedgerFailurePolicy {
    /// Abort the run with `MigrationError::LedgerRead`
    #[default]
    Strict,
    /// Log the failure and treat the ledger as empty
    FailOpen,
}

/// Engine settings derived from `MigrateConfig`
#[derive(Debug, Clone)]
pub struct MigrationConfig {
    /// Table name for tracking migrations
    pub migrations_table: String,
    /// Advisory lock key guarding a run
    pub lock_key: i64,
    pub ledger_failure_policy: LedgerFailurePolicy,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            migrations_table: stockroom_core::DEFAULT_MIGRATIONS_TABLE.to_string(),
            lock_key: stockroom_core::DEFAULT_LOCK_KEY,
            ledger_failure_policy: LedgerFailurePolicy::Strict,
        }
    }
}

impl From<&MigrateConfig> for MigrationConfig {
    fn from(config: &MigrateConfig) -> Self {
        Self {
            migrations_table: config.migrations_table.clone(),
            lock_key: config.lock_key,
            ledger_failure_policy: if config.ledger_fail_open {
                LedgerFailurePolicy::FailOpen
            } else {
                LedgerFailurePolicy::Strict
            },
        }
    }
}

/// Migration status in the system
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum MigrationStatus {
    /// Migration is pending (not yet applied)
    Pending,
    /// Migration has been applied
    Applied {
        /// When it was applied
        applied_at: DateTime<Utc>,
    },
}

/// A registry migration paired with its ledger state
#[derive(Debug, Clone, Serialize)]
pub struct MigrationStatusEntry {
    pub id: i64,
    pub name: String,
    #[serde(flatten)]
    pub status: MigrationStatus,
}

impl MigrationStatusEntry {
    pub fn is_applied(&self) -> bool {
        matches!(self.status, MigrationStatus::Applied { .. })
    }
}

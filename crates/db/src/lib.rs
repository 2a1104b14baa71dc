//! # stockroom-db: Database layer and migration engine for stockroom
//!
//! Backend traits with a PostgreSQL implementation on sqlx, and the
//! migration engine (registry, ledger, planner, executor, runner) built on
//! top of them.

pub mod backends;
pub mod error;
pub mod migrations;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use backends::{
    AdvisoryLock, DatabasePool, DatabasePoolConfig, DatabaseRow, DatabaseTransaction, DatabaseValue,
    PostgresBackend, PostgresPool,
};
pub use error::{DbError, DbResult, MigrationError, MigrationResult};
pub use migrations::{
    LedgerFailurePolicy, Migration, MigrationConfig, MigrationDirection, MigrationPlan, MigrationPlanner,
    MigrationRegistry, MigrationRunner, MigrationStatus, MigrationStatusEntry, RunObserver, RunReport,
    RunRequest,
};

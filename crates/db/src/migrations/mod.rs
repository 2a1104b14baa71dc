//! Migration System
//!
//! Versioned, reversible schema changes tracked in a ledger table:
//! - Registry of hand-authored migrations and the built-in catalog
//! - Ledger reads with an explicit failure policy
//! - Pure planning for forward and backward runs
//! - One transaction per migration, ledger write included
//! - A locked runner that halts at the first failure

pub mod catalog;
pub mod definitions;
pub mod executor;
pub mod ledger;
pub mod planner;
pub mod registry;
pub mod runner;
pub mod sql;

pub use definitions::*;
pub use executor::MigrationExecutor;
pub use ledger::LedgerReader;
pub use planner::{MigrationPlan, MigrationPlanner};
pub use registry::MigrationRegistry;
pub use runner::{MigrationRunner, MigrationSummary, RunObserver, RunReport, RunRequest, StepFailure};
pub use sql::{split_sql_statements, LedgerSql};

pub use crate::error::{MigrationError, MigrationResult};

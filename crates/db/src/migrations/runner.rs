//! Migration Runner - the locked read, plan, execute loop.
//!
//! A run takes the advisory lock, reads the ledger, plans, then executes the
//! plan one transaction per step. The first failing step halts the run; the
//! steps before it stay committed.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{info, warn};

use super::definitions::{
    Migration, MigrationConfig, MigrationDirection, MigrationStatus, MigrationStatusEntry,
};
use super::executor::MigrationExecutor;
use super::ledger::LedgerReader;
use super::planner::{MigrationPlan, MigrationPlanner};
use super::registry::MigrationRegistry;
use super::sql::LedgerSql;
use crate::backends::DatabasePool;
use crate::error::{MigrationError, MigrationResult};

/// What a run should do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunRequest {
    pub direction: MigrationDirection,
    /// Up: apply through this id. Down: roll back down to and including it.
    pub target: Option<i64>,
    /// Plan only, execute nothing
    pub dry_run: bool,
}

impl RunRequest {
    pub fn up() -> Self {
        Self {
            direction: MigrationDirection::Up,
            target: None,
            dry_run: false,
        }
    }

    pub fn down() -> Self {
        Self {
            direction: MigrationDirection::Down,
            ..Self::up()
        }
    }

    pub fn to(mut self, target: i64) -> Self {
        self.target = Some(target);
        self
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }
}

impl Default for RunRequest {
    fn default() -> Self {
        Self::up()
    }
}

/// Id and name of a planned migration
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationSummary {
    pub id: i64,
    pub name: String,
}

impl From<&Migration> for MigrationSummary {
    fn from(migration: &Migration) -> Self {
        Self {
            id: migration.id,
            name: migration.name.clone(),
        }
    }
}

/// The step that halted a run
#[derive(Debug)]
pub struct StepFailure {
    pub id: i64,
    pub name: String,
    pub error: MigrationError,
}

/// Outcome of one run
#[derive(Debug)]
pub struct RunReport {
    pub direction: MigrationDirection,
    pub dry_run: bool,
    pub planned: Vec<MigrationSummary>,
    /// Ids committed by this run, in execution order
    pub completed: Vec<i64>,
    pub failure: Option<StepFailure>,
    /// Ledger ids the registry does not know
    pub orphaned: Vec<i64>,
    pub elapsed: Duration,
}

impl RunReport {
    /// True unless a step failed
    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }

    pub fn planned_ids(&self) -> Vec<i64> {
        self.planned.iter().map(|m| m.id).collect()
    }

    /// Planned steps that were never attempted
    pub fn skipped(&self) -> Vec<i64> {
        let attempted = self.completed.len() + usize::from(self.failure.is_some());
        if self.dry_run {
            return self.planned_ids();
        }
        self.planned.iter().skip(attempted).map(|m| m.id).collect()
    }
}

/// Progress callbacks for a run. All methods default to doing nothing.
pub trait RunObserver: Send + Sync {
    fn on_plan(&self, _plan: &MigrationPlan, _dry_run: bool) {}

    fn on_step_started(&self, _migration: &Migration, _direction: MigrationDirection) {}

    fn on_step_finished(&self, _migration: &Migration, _direction: MigrationDirection, _elapsed: Duration) {}

    fn on_step_failed(&self, _migration: &Migration, _error: &MigrationError) {}
}

struct SilentObserver;

impl RunObserver for SilentObserver {}

/// Drives migration runs against one pool
pub struct MigrationRunner {
    pool: Arc<dyn DatabasePool>,
    registry: Arc<MigrationRegistry>,
    config: MigrationConfig,
    ledger: LedgerReader,
    executor: MigrationExecutor,
}

impl MigrationRunner {
    pub fn new(pool: Arc<dyn DatabasePool>, registry: Arc<MigrationRegistry>, config: MigrationConfig) -> Self {
        let sql = LedgerSql::new(config.migrations_table.clone());
        let ledger = LedgerReader::new(pool.clone(), sql.clone(), config.ledger_failure_policy);
        let executor = MigrationExecutor::new(pool.clone(), sql);

        Self {
            pool,
            registry,
            config,
            ledger,
            executor,
        }
    }

    pub async fn run(&self, request: RunRequest) -> MigrationResult<RunReport> {
        self.run_with_observer(request, &SilentObserver).await
    }

    /// Run under the advisory lock, reporting progress to `observer`.
    ///
    /// `Err` means the run never started executing (lock, ledger or setup
    /// failure). A step failure is returned inside the report.
    pub async fn run_with_observer(
        &self,
        request: RunRequest,
        observer: &dyn RunObserver,
    ) -> MigrationResult<RunReport> {
        let key = self.config.lock_key;
        let lock = self
            .pool
            .try_lock(key)
            .await?
            .ok_or(MigrationError::Locked { key })?;

        let result = self.run_locked(request, observer).await;

        if let Err(e) = lock.release().await {
            warn!(target: "stockroom::migrate", key, error = %e, "Failed to release advisory lock");
        }

        result
    }

    async fn run_locked(&self, request: RunRequest, observer: &dyn RunObserver) -> MigrationResult<RunReport> {
        let started = Instant::now();

        let applied = self.ledger.applied_ids().await?;
        let orphaned = MigrationPlanner::orphaned(&self.registry, &applied);
        for id in &orphaned {
            warn!(
                target: "stockroom::migrate",
                id,
                "Ledger records migration {} which is not in the registry; it will be left alone",
                id
            );
        }

        let plan = MigrationPlanner::plan(&self.registry, &applied, request.direction, request.target);
        info!(
            target: "stockroom::migrate",
            direction = %plan.direction,
            steps = plan.len(),
            dry_run = request.dry_run,
            "Migration plan ready"
        );
        observer.on_plan(&plan, request.dry_run);

        let mut report = RunReport {
            direction: request.direction,
            dry_run: request.dry_run,
            planned: plan.steps().iter().map(MigrationSummary::from).collect(),
            completed: Vec::new(),
            failure: None,
            orphaned,
            elapsed: Duration::ZERO,
        };

        if !request.dry_run {
            for migration in plan.steps() {
                observer.on_step_started(migration, plan.direction);
                let step_started = Instant::now();

                match self.executor.execute(migration, plan.direction).await {
                    Ok(()) => {
                        let elapsed = step_started.elapsed();
                        info!(
                            target: "stockroom::migrate",
                            id = migration.id,
                            name = %migration.name,
                            elapsed_ms = elapsed.as_millis() as u64,
                            "Migration {}",
                            if plan.direction == MigrationDirection::Up { "applied" } else { "rolled back" }
                        );
                        observer.on_step_finished(migration, plan.direction, elapsed);
                        report.completed.push(migration.id);
                    }
                    Err(error) => {
                        warn!(
                            target: "stockroom::migrate",
                            id = migration.id,
                            error = %error,
                            "Migration failed, halting run"
                        );
                        observer.on_step_failed(migration, &error);
                        report.failure = Some(StepFailure {
                            id: migration.id,
                            name: migration.name.clone(),
                            error,
                        });
                        break;
                    }
                }
            }
        }

        report.elapsed = started.elapsed();
        Ok(report)
    }

    /// Every registry migration, ascending by id, with its ledger state
    pub async fn status(&self) -> MigrationResult<Vec<MigrationStatusEntry>> {
        let applied: HashMap<i64, _> = self
            .ledger
            .entries()
            .await?
            .into_iter()
            .map(|entry| (entry.migration_id, entry.applied_at))
            .collect();

        let mut migrations: Vec<&Migration> = self.registry.iter().collect();
        migrations.sort_by_key(|m| m.id);

        Ok(migrations
            .into_iter()
            .map(|m| MigrationStatusEntry {
                id: m.id,
                name: m.name.clone(),
                status: match applied.get(&m.id) {
                    Some(applied_at) => MigrationStatus::Applied {
                        applied_at: *applied_at,
                    },
                    None => MigrationStatus::Pending,
                },
            })
            .collect())
    }

    /// Ledger ids the registry does not know
    pub async fn orphaned(&self) -> MigrationResult<Vec<i64>> {
        let applied = self.ledger.applied_ids().await?;
        Ok(MigrationPlanner::orphaned(&self.registry, &applied))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryPool;

    fn runner(pool: &Arc<MemoryPool>) -> MigrationRunner {
        let registry = Arc::new(MigrationRegistry::catalog("migrations").unwrap());
        MigrationRunner::new(pool.clone(), registry, MigrationConfig::default())
    }

    #[tokio::test]
    async fn test_fresh_database_applies_catalog() {
        let pool = Arc::new(MemoryPool::new("migrations"));
        let report = runner(&pool).run(RunRequest::up()).await.unwrap();

        assert!(report.is_success());
        assert_eq!(report.completed, vec![1, 2]);
        assert!(report.skipped().is_empty());
        assert_eq!(pool.ledger_ids(), vec![1, 2]);
        assert!(!pool.is_locked());
    }

    #[tokio::test]
    async fn test_dry_run_executes_nothing() {
        let pool = Arc::new(MemoryPool::new("migrations"));
        let report = runner(&pool).run(RunRequest::up().dry_run(true)).await.unwrap();

        assert_eq!(report.planned_ids(), vec![1, 2]);
        assert!(report.completed.is_empty());
        assert_eq!(report.skipped(), vec![1, 2]);
        assert!(pool.tables().is_empty());
        assert_eq!(pool.commits(), 0);
    }

    #[tokio::test]
    async fn test_status_lists_pending_and_applied() {
        let pool = Arc::new(MemoryPool::new("migrations"));
        let runner = runner(&pool);
        runner.run(RunRequest::up().to(1)).await.unwrap();

        let status = runner.status().await.unwrap();
        assert_eq!(status.len(), 2);
        assert!(status[0].is_applied());
        assert_eq!(status[1].status, MigrationStatus::Pending);
    }

    #[tokio::test]
    async fn test_lock_released_after_failed_step() {
        let pool = Arc::new(MemoryPool::new("migrations"));
        pool.fail_on("CREATE TABLE IF NOT EXISTS products");

        let report = runner(&pool).run(RunRequest::up()).await.unwrap();
        assert!(!report.is_success());
        assert_eq!(report.failure.as_ref().map(|f| f.id), Some(2));
        assert!(!pool.is_locked());
    }
}

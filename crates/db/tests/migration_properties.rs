use std::sync::Arc;

use stockroom_db::{
    testing::MemoryPool, LedgerFailurePolicy, Migration, MigrationConfig, MigrationDirection, MigrationError,
    MigrationRegistry, MigrationRunner, RunRequest,
};

/// Registry with the ledger bootstrap plus `count - 1` table migrations
fn registry(count: i64) -> Arc<MigrationRegistry> {
    let mut migrations = MigrationRegistry::catalog("migrations")
        .unwrap()
        .iter()
        .take(1)
        .cloned()
        .collect::<Vec<_>>();

    for id in 2..=count {
        migrations.push(Migration::new(
            id,
            format!("create_table_{}", id),
            format!("CREATE TABLE t{id} (id SERIAL PRIMARY KEY); CREATE INDEX idx_t{id} ON t{id}(id);"),
            format!("DROP TABLE t{id}"),
        ));
    }

    Arc::new(MigrationRegistry::new(migrations).unwrap())
}

fn runner(pool: &Arc<MemoryPool>, registry: Arc<MigrationRegistry>) -> MigrationRunner {
    MigrationRunner::new(pool.clone(), registry, MigrationConfig::default())
}

#[tokio::test]
async fn forward_runs_are_idempotent() {
    let pool = Arc::new(MemoryPool::new("migrations"));
    let runner = runner(&pool, registry(3));

    let first = runner.run(RunRequest::up()).await.unwrap();
    assert_eq!(first.completed, vec![1, 2, 3]);
    let statements_after_first = pool.statement_log().len();

    let second = runner.run(RunRequest::up()).await.unwrap();
    assert!(second.is_success());
    assert!(second.planned.is_empty());
    assert!(second.completed.is_empty());
    assert_eq!(pool.ledger_ids(), vec![1, 2, 3]);
    assert_eq!(pool.statement_log().len(), statements_after_first + 1);
}

#[tokio::test]
async fn migrations_apply_in_id_order_regardless_of_declaration() {
    let pool = Arc::new(MemoryPool::new("migrations"));
    let mut migrations: Vec<Migration> = registry(4).iter().cloned().collect();
    migrations.reverse();
    let runner = runner(&pool, Arc::new(MigrationRegistry::new(migrations).unwrap()));

    let report = runner.run(RunRequest::up()).await.unwrap();
    assert_eq!(report.completed, vec![1, 2, 3, 4]);

    let creates: Vec<String> = pool
        .statement_log()
        .into_iter()
        .filter(|sql| sql.starts_with("CREATE TABLE t"))
        .collect();
    assert_eq!(creates.len(), 3);
    assert!(creates[0].starts_with("CREATE TABLE t2"));
    assert!(creates[2].starts_with("CREATE TABLE t4"));
}

#[tokio::test]
async fn failed_step_is_atomic_and_halts_the_run() {
    let pool = Arc::new(MemoryPool::new("migrations"));
    let runner = runner(&pool, registry(5));
    pool.fail_on("CREATE INDEX idx_t3");

    let report = runner.run(RunRequest::up()).await.unwrap();

    assert!(!report.is_success());
    assert_eq!(report.completed, vec![1, 2]);
    let failure = report.failure.as_ref().unwrap();
    assert_eq!(failure.id, 3);
    assert_eq!(failure.name, "create_table_3");
    assert!(matches!(failure.error, MigrationError::Statement { statement: 2, .. }));
    assert_eq!(report.skipped(), vec![4, 5]);

    // t3's CREATE TABLE ran before the failing index and must not survive.
    assert!(!pool.tables().contains("t3"));
    assert!(!pool.tables().contains("t4"));
    assert_eq!(pool.ledger_ids(), vec![1, 2]);

    pool.clear_failures();
    let resumed = runner.run(RunRequest::up()).await.unwrap();
    assert_eq!(resumed.completed, vec![3, 4, 5]);
}

#[tokio::test]
async fn forward_target_is_inclusive() {
    let pool = Arc::new(MemoryPool::new("migrations"));
    let runner = runner(&pool, registry(5));
    runner.run(RunRequest::up().to(2)).await.unwrap();
    assert_eq!(pool.ledger_ids(), vec![1, 2]);

    let report = runner.run(RunRequest::up().to(4)).await.unwrap();
    assert_eq!(report.completed, vec![3, 4]);
    assert_eq!(pool.ledger_ids(), vec![1, 2, 3, 4]);
}

#[tokio::test]
async fn rollback_defaults_to_the_latest_migration() {
    let pool = Arc::new(MemoryPool::new("migrations"));
    let runner = runner(&pool, registry(3));
    runner.run(RunRequest::up()).await.unwrap();

    let report = runner.run(RunRequest::down()).await.unwrap();
    assert_eq!(report.direction, MigrationDirection::Down);
    assert_eq!(report.completed, vec![3]);
    assert_eq!(pool.ledger_ids(), vec![1, 2]);
    assert!(!pool.tables().contains("t3"));
    assert!(pool.tables().contains("t2"));
}

#[tokio::test]
async fn rollback_to_target_runs_in_descending_order() {
    let pool = Arc::new(MemoryPool::new("migrations"));
    let runner = runner(&pool, registry(4));
    runner.run(RunRequest::up()).await.unwrap();

    let report = runner.run(RunRequest::down().to(2)).await.unwrap();
    assert_eq!(report.completed, vec![4, 3, 2]);
    assert_eq!(pool.ledger_ids(), vec![1]);
}

#[tokio::test]
async fn failed_rollback_is_atomic_and_halts_the_run() {
    let pool = Arc::new(MemoryPool::new("migrations"));
    let runner = runner(&pool, registry(3));
    runner.run(RunRequest::up()).await.unwrap();
    pool.fail_on("DROP TABLE t3");

    let report = runner.run(RunRequest::down().to(1)).await.unwrap();

    assert!(!report.is_success());
    assert!(report.completed.is_empty());
    assert_eq!(report.planned_ids(), vec![3, 2, 1]);
    assert_eq!(report.skipped(), vec![2, 1]);
    let failure = report.failure.as_ref().unwrap();
    assert_eq!(failure.id, 3);
    assert!(matches!(
        failure.error,
        MigrationError::Statement { direction: MigrationDirection::Down, statement: 1, .. }
    ));

    assert_eq!(pool.ledger_ids(), vec![1, 2, 3]);
    assert!(pool.tables().contains("t3"));
    assert!(pool.tables().contains("t2"));
    assert!(pool.tables().contains("migrations"));
    assert!(!pool.is_locked());
}

#[tokio::test]
async fn bootstrap_from_an_empty_database() {
    let pool = Arc::new(MemoryPool::new("migrations"));
    let runner = runner(&pool, Arc::new(MigrationRegistry::catalog("migrations").unwrap()));

    let report = runner.run(RunRequest::up()).await.unwrap();
    assert_eq!(report.completed, vec![1, 2]);
    assert!(pool.tables().contains("migrations"));
    assert!(pool.tables().contains("products"));
    assert_eq!(pool.ledger_ids(), vec![1, 2]);
}

#[tokio::test]
async fn rolling_back_everything_removes_the_ledger() {
    let pool = Arc::new(MemoryPool::new("migrations"));
    let runner = runner(&pool, Arc::new(MigrationRegistry::catalog("migrations").unwrap()));
    runner.run(RunRequest::up()).await.unwrap();

    let report = runner.run(RunRequest::down().to(1)).await.unwrap();
    assert!(report.is_success());
    assert_eq!(report.completed, vec![2, 1]);
    assert!(pool.tables().is_empty());

    let again = runner.run(RunRequest::up()).await.unwrap();
    assert_eq!(again.completed, vec![1, 2]);
}

#[tokio::test]
async fn held_lock_blocks_a_second_runner() {
    let pool = Arc::new(MemoryPool::new("migrations"));
    let config = MigrationConfig::default();
    pool.hold_lock(config.lock_key);
    let runner = runner(&pool, registry(2));

    let err = runner.run(RunRequest::up()).await.unwrap_err();
    assert!(matches!(err, MigrationError::Locked { key } if key == config.lock_key));
    assert!(pool.statement_log().is_empty());

    pool.release_lock(config.lock_key);
    assert!(runner.run(RunRequest::up()).await.unwrap().is_success());
}

#[tokio::test]
async fn ledger_read_failure_depends_on_policy() {
    let pool = Arc::new(MemoryPool::new("migrations"));
    pool.seed_applied(&[(1, "create_migrations_table")]);
    pool.fail_ledger_reads(true);

    let strict = runner(&pool, registry(2));
    let err = strict.run(RunRequest::up()).await.unwrap_err();
    assert!(matches!(err, MigrationError::LedgerRead { .. }));
    assert!(!pool.is_locked());

    let config = MigrationConfig {
        ledger_failure_policy: LedgerFailurePolicy::FailOpen,
        ..MigrationConfig::default()
    };
    let fail_open = MigrationRunner::new(pool.clone(), registry(2), config);
    let report = fail_open.run(RunRequest::up()).await.unwrap();

    // The unreadable ledger is treated as empty.
    assert_eq!(report.planned_ids(), vec![1, 2]);
}

#[tokio::test]
async fn orphaned_ledger_rows_are_reported_and_left_alone() {
    let pool = Arc::new(MemoryPool::new("migrations"));
    let runner = runner(&pool, registry(2));
    runner.run(RunRequest::up()).await.unwrap();
    pool.seed_applied(&[(9, "from_a_newer_build")]);

    let report = runner.run(RunRequest::down()).await.unwrap();
    assert_eq!(report.orphaned, vec![9]);
    assert_eq!(report.completed, vec![2]);
    assert_eq!(pool.ledger_ids(), vec![1, 9]);
}

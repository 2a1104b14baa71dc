use std::sync::Arc;

use stockroom_core::config::redact;
use stockroom_core::{init_logging, AppConfigTrait, CoreError, CoreResult, LoggingConfig, MigrateConfig};
use stockroom_db::{
    DatabasePool, DatabasePoolConfig, MigrationConfig, MigrationRegistry, MigrationRunner, PostgresBackend,
    RunRequest,
};
use tracing::{debug, info};

use crate::reporter::{self, ConsoleReporter};
use crate::Cli;

/// What one invocation does
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrateAction {
    Status { json: bool },
    Run(RunRequest),
}

/// Result of a command that got as far as talking to the database
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    /// A migration failed and the run halted
    Failed,
}

impl RunOutcome {
    pub fn exit_code(self) -> u8 {
        match self {
            RunOutcome::Completed => 0,
            RunOutcome::Failed => 1,
        }
    }
}

/// Load configuration, set up logging, connect and run the requested action
pub async fn run(cli: &Cli) -> CoreResult<RunOutcome> {
    let config = load_config(cli)?;

    init_logging(LoggingConfig::for_cli(&config.log_level, config.json_logs))
        .map_err(|e| CoreError::logging(e.to_string()))?;

    for (field, source) in config.config_sources() {
        debug!(target: "stockroom::config", field = %field, source = %source, "Configuration value");
    }

    let database_url = config.require_database_url()?;
    info!(
        target: "stockroom::migrate",
        database = %redact(database_url),
        table = %config.migrations_table,
        "Connecting to database"
    );

    let pool = PostgresBackend::new()
        .connect(database_url, DatabasePoolConfig::from(&config))
        .await?;

    let outcome = execute(pool.clone(), &config, cli.action()).await;
    pool.close().await;
    outcome
}

/// Environment first, then command line flags on top
pub fn load_config(cli: &Cli) -> CoreResult<MigrateConfig> {
    let mut config = MigrateConfig::from_env()?;
    apply_overrides(&mut config, cli);
    config.validate()?;
    Ok(config)
}

fn apply_overrides(config: &mut MigrateConfig, cli: &Cli) {
    if let Some(url) = &cli.database_url {
        config.database_url = Some(url.clone());
        config.mark_flag_override("database_url", "--database-url");
    }
    if let Some(table) = &cli.table {
        config.migrations_table = table.clone();
        config.mark_flag_override("migrations_table", "--table");
    }
    if let Some(level) = &cli.log_level {
        config.log_level = level.clone();
        config.mark_flag_override("log_level", "--log-level");
    }
    if cli.json_logs {
        config.json_logs = true;
        config.mark_flag_override("json_logs", "--json-logs");
    }
}

/// Run `action` against an already connected pool
pub async fn execute(
    pool: Arc<dyn DatabasePool>,
    config: &MigrateConfig,
    action: MigrateAction,
) -> CoreResult<RunOutcome> {
    let registry = Arc::new(MigrationRegistry::catalog(&config.migrations_table)?);
    let runner = MigrationRunner::new(pool, registry, MigrationConfig::from(config));

    match action {
        MigrateAction::Status { json } => {
            let entries = runner.status().await?;
            if json {
                reporter::print_status_json(&entries)?;
            } else {
                let orphaned = runner.orphaned().await?;
                reporter::print_status_table(&entries, &orphaned);
            }
            Ok(RunOutcome::Completed)
        }
        MigrateAction::Run(request) => {
            reporter::print_start(&request, &config.migrations_table);
            let report = runner.run_with_observer(request, &ConsoleReporter).await?;
            reporter::print_summary(&report);

            Ok(if report.is_success() {
                RunOutcome::Completed
            } else {
                RunOutcome::Failed
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use stockroom_core::ConfigSource;
    use stockroom_db::testing::MemoryPool;

    fn config() -> MigrateConfig {
        let mut config = MigrateConfig::new();
        config.database_url = Some("postgres://localhost/stockroom".to_string());
        config
    }

    #[tokio::test]
    async fn test_successful_run_exits_zero() {
        let pool = Arc::new(MemoryPool::new("migrations"));
        let outcome = execute(pool.clone(), &config(), MigrateAction::Run(RunRequest::up()))
            .await
            .unwrap();

        assert_eq!(outcome, RunOutcome::Completed);
        assert_eq!(outcome.exit_code(), 0);
        assert_eq!(pool.ledger_ids(), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_noop_run_exits_zero() {
        let pool = Arc::new(MemoryPool::new("migrations"));
        let outcome = execute(pool.clone(), &config(), MigrateAction::Run(RunRequest::down()))
            .await
            .unwrap();
        assert_eq!(outcome.exit_code(), 0);
    }

    #[tokio::test]
    async fn test_halted_run_exits_one() {
        let pool = Arc::new(MemoryPool::new("migrations"));
        pool.fail_on("CREATE TABLE IF NOT EXISTS products");

        let outcome = execute(pool.clone(), &config(), MigrateAction::Run(RunRequest::up()))
            .await
            .unwrap();

        assert_eq!(outcome, RunOutcome::Failed);
        assert_eq!(outcome.exit_code(), 1);
        assert_eq!(pool.ledger_ids(), vec![1]);
    }

    #[tokio::test]
    async fn test_lock_contention_is_an_error() {
        let pool = Arc::new(MemoryPool::new("migrations"));
        let config = config();
        pool.hold_lock(config.lock_key);

        let result = execute(pool.clone(), &config, MigrateAction::Run(RunRequest::up())).await;
        assert!(matches!(result, Err(CoreError::Migration { .. })));
    }

    #[tokio::test]
    async fn test_status_uses_configured_table() {
        let pool = Arc::new(MemoryPool::new("schema_ledger"));
        let mut config = config();
        config.migrations_table = "schema_ledger".to_string();

        execute(pool.clone(), &config, MigrateAction::Run(RunRequest::up().to(1)))
            .await
            .unwrap();
        let outcome = execute(pool.clone(), &config, MigrateAction::Status { json: true })
            .await
            .unwrap();

        assert_eq!(outcome, RunOutcome::Completed);
        assert!(pool.tables().contains("schema_ledger"));
    }

    #[test]
    fn test_flags_override_environment_values() {
        let cli = Cli::try_parse_from([
            "stockroom-migrate",
            "--database-url",
            "postgres://cli@db/stockroom",
            "--table",
            "schema_ledger",
            "--log-level",
            "debug",
            "--json-logs",
        ])
        .unwrap();

        let mut config = config();
        apply_overrides(&mut config, &cli);

        assert_eq!(config.database_url.as_deref(), Some("postgres://cli@db/stockroom"));
        assert_eq!(config.migrations_table, "schema_ledger");
        assert_eq!(config.log_level, "debug");
        assert!(config.json_logs);

        let sources = config.config_sources();
        assert_eq!(
            sources["database_url"],
            ConfigSource::CommandLine("--database-url".to_string())
        );
        assert_eq!(sources["migrations_table"], ConfigSource::CommandLine("--table".to_string()));
        assert_eq!(sources["json_logs"], ConfigSource::CommandLine("--json-logs".to_string()));
    }

    #[test]
    fn test_unset_flags_leave_sources_alone() {
        let cli = Cli::try_parse_from(["stockroom-migrate"]).unwrap();
        let mut config = config();
        apply_overrides(&mut config, &cli);

        let sources = config.config_sources();
        assert!(!matches!(sources["migrations_table"], ConfigSource::CommandLine(_)));
        assert!(!matches!(sources["log_level"], ConfigSource::CommandLine(_)));
    }
}

mod commands;
mod reporter;

use std::process::ExitCode;

use clap::Parser;
use commands::migrate::{self, MigrateAction};
use stockroom_db::RunRequest;

#[derive(Debug, Parser)]
#[command(name = "stockroom-migrate")]
#[command(version, about = "Apply, roll back and inspect stockroom catalog schema migrations")]
pub struct Cli {
    /// Apply pending migrations (default)
    #[arg(long, conflicts_with = "down")]
    pub up: bool,

    /// Roll back applied migrations; only the latest one unless --to is given
    #[arg(long)]
    pub down: bool,

    /// With --up apply through this id, with --down roll back to and including it
    #[arg(long, value_name = "ID", value_parser = clap::value_parser!(i64).range(1..))]
    pub to: Option<i64>,

    /// Show every migration and whether it is applied, then exit
    #[arg(long, conflicts_with_all = ["up", "down", "to", "dry_run"])]
    pub status: bool,

    /// Print --status output as JSON
    #[arg(long, requires = "status")]
    pub json: bool,

    /// Print the plan without executing anything
    #[arg(long)]
    pub dry_run: bool,

    /// PostgreSQL connection URL, overrides DATABASE_URL
    #[arg(long, value_name = "URL")]
    pub database_url: Option<String>,

    /// Ledger table name, overrides MIGRATIONS_TABLE
    #[arg(long, value_name = "NAME")]
    pub table: Option<String>,

    /// Log level for diagnostics on stderr, overrides LOG_LEVEL
    #[arg(long, value_parser = ["trace", "debug", "info", "warn", "error"])]
    pub log_level: Option<String>,

    /// Emit diagnostics as JSON lines
    #[arg(long)]
    pub json_logs: bool,
}

impl Cli {
    pub fn action(&self) -> MigrateAction {
        if self.status {
            return MigrateAction::Status { json: self.json };
        }

        let request = if self.down {
            RunRequest::down()
        } else {
            RunRequest::up()
        };
        let request = match self.to {
            Some(target) => request.to(target),
            None => request,
        };

        MigrateAction::Run(request.dry_run(self.dry_run))
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match migrate::run(&cli).await {
        Ok(outcome) => ExitCode::from(outcome.exit_code()),
        Err(e) => {
            reporter::print_error(&e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stockroom_db::MigrationDirection;

    fn parse(args: &[&str]) -> Result<Cli, clap::Error> {
        Cli::try_parse_from(std::iter::once("stockroom-migrate").chain(args.iter().copied()))
    }

    #[test]
    fn test_defaults_to_forward_run() {
        let cli = parse(&[]).unwrap();
        match cli.action() {
            MigrateAction::Run(request) => {
                assert_eq!(request.direction, MigrationDirection::Up);
                assert_eq!(request.target, None);
                assert!(!request.dry_run);
            }
            other => panic!("unexpected action: {:?}", other),
        }
    }

    #[test]
    fn test_down_with_target() {
        let cli = parse(&["--down", "--to", "3", "--dry-run"]).unwrap();
        match cli.action() {
            MigrateAction::Run(request) => {
                assert_eq!(request.direction, MigrationDirection::Down);
                assert_eq!(request.target, Some(3));
                assert!(request.dry_run);
            }
            other => panic!("unexpected action: {:?}", other),
        }
    }

    #[test]
    fn test_up_and_down_conflict() {
        assert!(parse(&["--up", "--down"]).is_err());
    }

    #[test]
    fn test_target_must_be_positive() {
        assert!(parse(&["--to", "0"]).is_err());
        assert!(parse(&["--to", "-4"]).is_err());
        assert!(parse(&["--to", "abc"]).is_err());
        assert_eq!(parse(&["--to", "12"]).unwrap().to, Some(12));
    }

    #[test]
    fn test_status_flags() {
        let cli = parse(&["--status", "--json"]).unwrap();
        assert!(matches!(cli.action(), MigrateAction::Status { json: true }));

        assert!(parse(&["--status", "--down"]).is_err());
        assert!(parse(&["--json"]).is_err());
    }

    #[test]
    fn test_log_level_is_restricted() {
        assert!(parse(&["--log-level", "debug"]).is_ok());
        assert!(parse(&["--log-level", "loud"]).is_err());
    }
}

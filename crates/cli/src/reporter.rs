//! Human-facing output on stdout. Diagnostics go through tracing on stderr.

use std::time::Duration;

use console::style;
use stockroom_core::CoreError;
use stockroom_db::migrations::{Migration, MigrationPlan};
use stockroom_db::{
    MigrationDirection, MigrationError, MigrationStatus, MigrationStatusEntry, RunObserver, RunReport,
    RunRequest,
};

/// Prints one line per step as the run progresses
pub struct ConsoleReporter;

impl RunObserver for ConsoleReporter {
    fn on_plan(&self, plan: &MigrationPlan, dry_run: bool) {
        if plan.is_empty() {
            let message = match plan.direction {
                MigrationDirection::Up => "Nothing to migrate, database is up to date.",
                MigrationDirection::Down => "Nothing to roll back.",
            };
            println!("{}", style(message).dim());
            return;
        }

        if dry_run {
            println!("{}", style("Plan (dry run, nothing will be executed):").bold());
            for migration in plan.steps() {
                println!("  {} {}", style("•").cyan(), migration);
            }
        }
    }

    fn on_step_started(&self, migration: &Migration, direction: MigrationDirection) {
        let verb = match direction {
            MigrationDirection::Up => "Applying",
            MigrationDirection::Down => "Rolling back",
        };
        println!("{} {} {}", style("→").cyan(), verb, migration);
    }

    fn on_step_finished(&self, migration: &Migration, direction: MigrationDirection, elapsed: Duration) {
        let verb = match direction {
            MigrationDirection::Up => "Applied",
            MigrationDirection::Down => "Rolled back",
        };
        println!(
            "{} {} {} {}",
            style("✓").green(),
            verb,
            migration,
            style(format!("({}ms)", elapsed.as_millis())).dim()
        );
    }

    fn on_step_failed(&self, migration: &Migration, error: &MigrationError) {
        println!("{} Failed {}", style("✗").red().bold(), migration);
        println!("    {}", style(error).red());
    }
}

pub fn print_start(request: &RunRequest, table: &str) {
    let action = match request.direction {
        MigrationDirection::Up => "Running migrations",
        MigrationDirection::Down => "Rolling back migrations",
    };
    let target = request
        .target
        .map(|id| format!(" (target {})", id))
        .unwrap_or_default();

    println!(
        "{}{} {}",
        style(action).bold(),
        target,
        style(format!("[ledger: {}]", table)).dim()
    );
}

pub fn print_summary(report: &RunReport) {
    for id in &report.orphaned {
        println!(
            "{} Ledger records migration {} which this build does not know; left untouched",
            style("!").yellow().bold(),
            id
        );
    }

    if report.dry_run {
        println!("{} migration(s) planned.", report.planned.len());
        return;
    }

    let noun = match report.direction {
        MigrationDirection::Up => "applied",
        MigrationDirection::Down => "rolled back",
    };

    match &report.failure {
        None => {
            if !report.completed.is_empty() {
                println!(
                    "{} {} migration(s) {} in {}ms.",
                    style("Done.").green().bold(),
                    report.completed.len(),
                    noun,
                    report.elapsed.as_millis()
                );
            }
        }
        Some(failure) => {
            println!(
                "{} Halted at migration {} ({}): {} of {} migration(s) {}, {} not attempted.",
                style("Failed.").red().bold(),
                failure.id,
                failure.name,
                report.completed.len(),
                report.planned.len(),
                noun,
                report.skipped().len()
            );
        }
    }
}

pub fn print_status_table(entries: &[MigrationStatusEntry], orphaned: &[i64]) {
    if entries.is_empty() {
        println!("No migrations registered.");
        return;
    }

    println!(
        "{}",
        style(format!("{:>4}  {:<8}  {:<20}  {}", "ID", "STATE", "APPLIED AT", "NAME")).bold()
    );
    for entry in entries {
        let (state, applied_at) = match &entry.status {
            MigrationStatus::Applied { applied_at } => (
                style(format!("{:<8}", "applied")).green(),
                applied_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            ),
            MigrationStatus::Pending => (style(format!("{:<8}", "pending")).yellow(), "-".to_string()),
        };
        println!("{:>4}  {}  {:<20}  {}", entry.id, state, applied_at, entry.name);
    }

    let applied = entries.iter().filter(|e| e.is_applied()).count();
    println!();
    println!("{} applied, {} pending", applied, entries.len() - applied);

    for id in orphaned {
        println!(
            "{} Ledger records unknown migration {}",
            style("!").yellow().bold(),
            id
        );
    }
}

pub fn print_status_json(entries: &[MigrationStatusEntry]) -> Result<(), CoreError> {
    println!("{}", serde_json::to_string_pretty(entries)?);
    Ok(())
}

pub fn print_error(error: &CoreError) {
    eprintln!("{} {}", style("error:").red().bold(), error);
}

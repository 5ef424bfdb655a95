//! Command line surface: delete a cell, inspect recorded timings.

use anyhow::Result;
use clap::{Parser, Subcommand};
use pty_host::PortablePtySpawner;
use std::path::PathBuf;
use std::sync::Arc;

use crate::cleanup::TerminalCleanupGuard;
use crate::config::Settings;
use crate::domains::agents::ChatAgentSessions;
use crate::domains::lifecycle::{
    CellDeletionLifecycle, DeletionCollaborators, DeletionReport, DeletionTimeouts,
};
use crate::domains::services::ServiceManager;
use crate::domains::terminal::TerminalHub;
use crate::domains::timing::{TimingFilter, TimingReport, TimingWorkflow, query_timings};
use crate::domains::workspace::GitWorktreeManager;
use crate::events::LogNotifier;
use crate::infrastructure::database::Database;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Cell orchestration core
#[derive(Parser, Debug)]
#[command(name = "cellyard")]
#[command(version = VERSION)]
pub struct Cli {
    /// Settings file (defaults to $CELLYARD_CONFIG, then the user config dir)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Tear a cell down and remove its record
    Delete {
        cell_id: String,
        /// Print the step report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show recorded create/delete runs and their steps
    Timings {
        #[arg(long = "cell", value_name = "ID")]
        cell_id: Option<String>,
        #[arg(long, value_parser = parse_workflow)]
        workflow: Option<TimingWorkflow>,
        #[arg(long = "run", value_name = "ID")]
        run_id: Option<String>,
        #[arg(long)]
        limit: Option<usize>,
        #[arg(long)]
        json: bool,
    },
}

fn parse_workflow(raw: &str) -> Result<TimingWorkflow, String> {
    raw.parse()
}

pub async fn run(cli: Cli) -> Result<()> {
    let settings = Settings::load(cli.config.as_deref())?;
    let db = Database::new(settings.database_path())?;

    match cli.command {
        Commands::Delete { cell_id, json } => {
            let hub = TerminalHub::new(
                &settings.terminal,
                settings.effective_shell(),
                Arc::new(PortablePtySpawner::new()),
            );
            let _guard = TerminalCleanupGuard::new(hub.clone());
            let lifecycle = deletion_lifecycle(&settings, db, hub);
            let report = lifecycle.delete_cell(&cell_id).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print!("{}", render_deletion(&report));
            }
            Ok(())
        }
        Commands::Timings {
            cell_id,
            workflow,
            run_id,
            limit,
            json,
        } => {
            let filter = TimingFilter {
                cell_id,
                workflow,
                run_id,
                limit,
            };
            let report = query_timings(&db, &filter).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print!("{}", render_timings(&report));
            }
            Ok(())
        }
    }
}

pub fn deletion_lifecycle(settings: &Settings, db: Database, hub: TerminalHub) -> CellDeletionLifecycle {
    let db = Arc::new(db);
    let services = ServiceManager::new(hub.clone(), &settings.services);
    CellDeletionLifecycle::new(DeletionCollaborators {
        cells: db.clone(),
        timings: db,
        agents: Arc::new(ChatAgentSessions::new(hub.clone())),
        terminals: Arc::new(hub),
        services: Arc::new(services),
        worktrees: Arc::new(GitWorktreeManager::new()),
        notifier: Arc::new(LogNotifier),
    })
    .with_timeouts(DeletionTimeouts::from(&settings.deletion))
}

pub fn render_deletion(report: &DeletionReport) -> String {
    let mut out = format!(
        "deleted {} in {}ms (run {})\n",
        report.cell_id, report.total_duration_ms, report.run_id
    );
    for step in &report.steps {
        out.push_str(&format!(
            "  {:<24} {:<5} {:>7}ms",
            step.name, step.status.as_str(), step.duration_ms
        ));
        if let Some(error) = &step.error {
            out.push_str(&format!("  {error}"));
        }
        out.push('\n');
    }
    out
}

pub fn render_timings(report: &TimingReport) -> String {
    if report.runs.is_empty() {
        return "no timing runs recorded\n".to_string();
    }

    let mut out = String::new();
    for run in &report.runs {
        out.push_str(&format!(
            "{} {} {} {}ms cell={} finished={}",
            run.run_id,
            run.workflow.as_str(),
            run.status.as_str(),
            run.total_duration_ms,
            run.cell_id,
            run.finished_at.to_rfc3339()
        ));
        if let Some(attempt) = run.attempt {
            out.push_str(&format!(" attempt={attempt}"));
        }
        out.push('\n');

        let mut steps: Vec<_> = report.steps.iter().filter(|s| s.run_id == run.run_id).collect();
        steps.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        for step in steps {
            out.push_str(&format!(
                "  {:<24} {:<5} {:>7}ms",
                step.step, step.status.as_str(), step.duration_ms
            ));
            if let Some(error) = &step.error {
                out.push_str(&format!("  {error}"));
            }
            out.push('\n');
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::lifecycle::StepOutcome;
    use crate::domains::timing::TimingStatus;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_timings_filters() {
        let cli = Cli::try_parse_from([
            "cellyard", "--config", "/tmp/c.toml", "timings", "--cell", "cell-1", "--workflow",
            "delete", "--limit", "20",
        ])
        .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/c.toml")));
        match cli.command {
            Commands::Timings {
                cell_id,
                workflow,
                limit,
                json,
                ..
            } => {
                assert_eq!(cell_id.as_deref(), Some("cell-1"));
                assert_eq!(workflow, Some(TimingWorkflow::Delete));
                assert_eq!(limit, Some(20));
                assert!(!json);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn rejects_unknown_workflow() {
        assert!(Cli::try_parse_from(["cellyard", "timings", "--workflow", "merge"]).is_err());
    }

    #[test]
    fn deletion_report_lists_failed_steps() {
        let report = DeletionReport {
            run_id: "run-1".into(),
            cell_id: "cell-1".into(),
            steps: vec![
                StepOutcome {
                    name: "stop_services".into(),
                    status: TimingStatus::Error,
                    duration_ms: 30,
                    error: Some("supervisor offline".into()),
                },
                StepOutcome {
                    name: "delete_cell_record".into(),
                    status: TimingStatus::Ok,
                    duration_ms: 2,
                    error: None,
                },
            ],
            status: TimingStatus::Ok,
            total_duration_ms: 40,
        };
        let rendered = render_deletion(&report);
        assert!(rendered.starts_with("deleted cell-1 in 40ms"));
        assert!(rendered.contains("supervisor offline"));
        assert_eq!(rendered.lines().count(), 3);
    }

    #[test]
    fn empty_timing_report() {
        assert_eq!(
            render_timings(&TimingReport::default()),
            "no timing runs recorded\n"
        );
    }
}

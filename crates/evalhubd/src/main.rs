//! evalhub - evaluation event administration CLI
//!
//! ## Commands
//!
//! - `migrate`: connect and initialize the schema
//! - `create` / `update` / `delete` / `lock` / `unlock`: event lifecycle
//! - `sync-evaluators` / `sync-criteria` / `status`: assignments
//! - `submit` / `results` / `note`: scores and notes
//! - `progress`: per-evaluator completion

mod roster;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use evalhub_core::metrics::METRICS;
use evalhub_core::obs::event_span;
use evalhub_core::{
    telemetry, AssignmentStatus, CriterionId, Directory, EvaluationConfig,
    EventLifecycleController, EventId, EventPatch, EventSpec, GroupId, ResultFilter, ResultId,
    ResultInput, SubjectId, TracingNotifier, UserId,
};
use evalhub_state::{EventStore, SurrealEventStore, SurrealHandle};
use serde::Serialize;
use tracing::{info, Instrument, Level};

use crate::roster::RosterSnapshot;

#[derive(Parser)]
#[command(name = "evalhub")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Evaluation event administration", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Roster snapshot (groups, teams, subjects, catalogs, identities)
    #[arg(long, global = true, env = "EVALHUB_ROSTER")]
    roster: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to the database and initialize the schema
    Migrate,

    /// Create an event from a JSON spec file
    Create {
        #[arg(long)]
        group: i64,
        /// Creating user
        #[arg(long)]
        creator: i64,
        /// Path to the event spec (JSON)
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Apply a partial update from a JSON patch file
    Update {
        event: EventId,
        #[arg(long)]
        group: i64,
        #[arg(long)]
        actor: i64,
        /// Path to the patch (JSON); absent fields are left untouched
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Show one event
    Show { event: EventId },

    /// List the events of a group
    List {
        #[arg(long)]
        group: i64,
    },

    /// Delete an unlocked event with its assignments and results
    Delete { event: EventId },

    /// Lock an event against relationship changes
    Lock { event: EventId },

    /// Unlock an event
    Unlock { event: EventId },

    /// Show evaluator assignments
    Assignments { event: EventId },

    /// Make the evaluator set equal the given ids
    SyncEvaluators {
        event: EventId,
        /// Comma-separated user ids (empty clears the set)
        #[arg(long, value_delimiter = ',', num_args = 0..)]
        ids: Vec<i64>,
        /// Fail if the event moved past this version
        #[arg(long)]
        expected_version: Option<u64>,
    },

    /// Make the criteria set equal the given ids
    SyncCriteria {
        event: EventId,
        /// Comma-separated skill or metric ids (empty clears the set)
        #[arg(long, value_delimiter = ',', num_args = 0..)]
        ids: Vec<i64>,
        #[arg(long)]
        expected_version: Option<u64>,
    },

    /// Write an evaluator's assignment status
    Status {
        event: EventId,
        #[arg(long)]
        evaluator: i64,
        /// invited | accepted | declined | completed
        #[arg(long, value_parser = parse_status)]
        status: AssignmentStatus,
    },

    /// Submit result rows from a JSON file
    Submit {
        event: EventId,
        #[arg(long)]
        evaluator: i64,
        /// Path to an array of result rows (JSON)
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Show results, optionally filtered
    Results {
        event: EventId,
        #[arg(long)]
        subject: Option<i64>,
        #[arg(long)]
        evaluator: Option<i64>,
        #[arg(long)]
        criterion: Option<i64>,
    },

    /// Manage the note on a result
    Note {
        #[command(subcommand)]
        action: NoteAction,
    },

    /// Show per-evaluator completion
    Progress { event: EventId },
}

#[derive(Subcommand)]
enum NoteAction {
    /// Attach a note (fails if one exists)
    Add {
        event: EventId,
        result: ResultId,
        #[arg(long)]
        evaluator: i64,
        text: String,
    },
    /// Replace the note (fails if there is none)
    Update {
        event: EventId,
        result: ResultId,
        #[arg(long)]
        evaluator: i64,
        text: String,
    },
    /// Clear the note
    Delete {
        event: EventId,
        result: ResultId,
        #[arg(long)]
        evaluator: i64,
    },
}

fn parse_status(s: &str) -> std::result::Result<AssignmentStatus, String> {
    AssignmentStatus::parse(s).ok_or_else(|| format!("unknown status '{s}'"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    telemetry::init_tracing(cli.json, level);

    let handle = SurrealHandle::setup_from_env()
        .await
        .context("Failed to connect to evalhub database")?;
    if matches!(cli.command, Commands::Migrate) {
        println!("Schema initialized");
        return Ok(());
    }

    let config = EvaluationConfig::from_env().context("Invalid evalhub configuration")?;
    let directory = load_directory(cli.roster.as_deref())?;
    let store: Arc<dyn EventStore> = Arc::new(SurrealEventStore::new(Arc::new(handle)));
    let controller = EventLifecycleController::new(store, directory, config);

    let result = run(&controller, cli.command).await;
    METRICS.flush();
    result
}

fn load_directory(path: Option<&Path>) -> Result<Directory> {
    let snapshot = match path {
        Some(path) => RosterSnapshot::load(path)?,
        None => {
            info!("No roster given; every group lookup will fail");
            RosterSnapshot::default()
        }
    };
    Ok(snapshot.into_directory(Arc::new(TracingNotifier)))
}

async fn run(controller: &EventLifecycleController, command: Commands) -> Result<()> {
    match command {
        Commands::Migrate => Ok(()),
        Commands::Create {
            group,
            creator,
            file,
        } => {
            let spec: EventSpec = read_json(&file)?;
            let event = controller
                .create(GroupId(group), spec, UserId(creator))
                .await?;
            print_json(&event)
        }
        Commands::Update {
            event,
            group,
            actor,
            file,
        } => {
            let patch: EventPatch = read_json(&file)?;
            let updated = controller
                .update(GroupId(group), event, patch, UserId(actor))
                .instrument(event_span(&event))
                .await?;
            print_json(&updated)
        }
        Commands::Show { event } => print_json(&controller.get_event(event).await?),
        Commands::List { group } => print_json(&controller.list_events(GroupId(group)).await?),
        Commands::Delete { event } => {
            controller.delete(event).await?;
            println!("Deleted event {}", event);
            Ok(())
        }
        Commands::Lock { event } => cmd_set_locked(controller, event, true).await,
        Commands::Unlock { event } => cmd_set_locked(controller, event, false).await,
        Commands::Assignments { event } => print_json(&controller.assignments(event).await?),
        Commands::SyncEvaluators {
            event,
            ids,
            expected_version,
        } => {
            let outcome = controller
                .evaluators()
                .sync_evaluators(event, ids.into_iter().map(UserId), expected_version)
                .instrument(event_span(&event))
                .await?;
            print_json(&outcome)
        }
        Commands::SyncCriteria {
            event,
            ids,
            expected_version,
        } => {
            let outcome = controller
                .criteria()
                .sync_criteria(event, ids.into_iter().map(CriterionId), expected_version)
                .instrument(event_span(&event))
                .await?;
            print_json(&outcome)
        }
        Commands::Status {
            event,
            evaluator,
            status,
        } => {
            let assignment = controller
                .evaluators()
                .update_status(event, UserId(evaluator), status)
                .await?;
            print_json(&assignment)
        }
        Commands::Submit {
            event,
            evaluator,
            file,
        } => {
            let rows: Vec<ResultInput> = read_json(&file)?;
            let written = controller
                .results()
                .submit(event, UserId(evaluator), rows)
                .instrument(event_span(&event))
                .await?;
            print_json(&written)
        }
        Commands::Results {
            event,
            subject,
            evaluator,
            criterion,
        } => {
            let filter = ResultFilter {
                subject_id: subject.map(SubjectId),
                evaluator_id: evaluator.map(UserId),
                criterion_id: criterion.map(CriterionId),
            };
            print_json(&controller.results().get_results(event, filter).await?)
        }
        Commands::Note { action } => cmd_note(controller, action).await,
        Commands::Progress { event } => cmd_progress(controller, event).await,
    }
}

async fn cmd_set_locked(
    controller: &EventLifecycleController,
    event_id: EventId,
    locked: bool,
) -> Result<()> {
    let event = controller.set_locked(event_id, locked).await?;
    println!(
        "Event {} is now {} (version {})",
        event.id,
        if event.flags.locked { "locked" } else { "unlocked" },
        event.version
    );
    Ok(())
}

async fn cmd_note(controller: &EventLifecycleController, action: NoteAction) -> Result<()> {
    let results = controller.results();
    let row = match action {
        NoteAction::Add {
            event,
            result,
            evaluator,
            text,
        } => results.add_note(event, result, UserId(evaluator), text).await?,
        NoteAction::Update {
            event,
            result,
            evaluator,
            text,
        } => {
            results
                .update_note(event, result, UserId(evaluator), text)
                .await?
        }
        NoteAction::Delete {
            event,
            result,
            evaluator,
        } => results.delete_note(event, result, UserId(evaluator)).await?,
    };
    print_json(&row)
}

async fn cmd_progress(controller: &EventLifecycleController, event_id: EventId) -> Result<()> {
    let progress = controller.progress().get_progress(event_id).await?;
    if progress.is_empty() {
        println!("No evaluators assigned to {}", event_id);
        return Ok(());
    }
    for p in &progress {
        println!(
            "{:>8}  {:<10} {:>4}/{:<4} {:>6.1}%",
            p.evaluator_id.0,
            p.status.as_str(),
            p.completed,
            p.total,
            p.percentage
        );
    }
    Ok(())
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {:?}", path))?;
    serde_json::from_str(&raw).with_context(|| format!("Failed to parse {:?} as JSON", path))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

use anyhow::Context;
use chrono::{NaiveDate, TimeZone, Utc};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use taskmesh_core::{
    Config, NewTask, Priority, SyncEngine, SyncTracker, TaskPatch, TaskQuery, TaskStatus,
    TaskStore, UpdateOptions,
};

#[derive(Parser)]
#[command(name = "taskmesh")]
#[command(about = "Personal task manager with cross-source sync", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Add a task
    Add {
        /// Task description
        #[arg(required = true)]
        description: Vec<String>,
        /// Nest under an existing task
        #[arg(long)]
        parent: Option<String>,
        /// Due date (YYYY-MM-DD)
        #[arg(long)]
        due: Option<String>,
        /// Priority: high, normal, or low
        #[arg(long)]
        priority: Option<String>,
    },
    /// List tasks
    List {
        /// Include archived tasks
        #[arg(long)]
        all: bool,
    },
    /// Mark a task done
    Done { id: String },
    /// Cancel a task
    Cancel { id: String },
    /// Reopen a done or canceled task
    Reopen { id: String },
    /// Delete a task and its subtasks
    Delete { id: String },
    /// Run a synchronization pass
    Sync,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::load().context("failed to load configuration")?;
    let store = TaskStore::with_config(&config.store).context("failed to open task store")?;

    match cli.command {
        Commands::Add {
            description,
            parent,
            due,
            priority,
        } => {
            let mut new = NewTask::new(description.join(" "));
            new.parent_id = parent;
            if let Some(due) = due {
                let date = NaiveDate::parse_from_str(&due, "%Y-%m-%d")
                    .context("due date must be YYYY-MM-DD")?;
                new.due_date = date
                    .and_hms_opt(0, 0, 0)
                    .and_then(|dt| Utc.from_local_datetime(&dt).single());
            }
            if let Some(p) = priority {
                new.priority = match p.as_str() {
                    "high" => Priority::High,
                    "normal" => Priority::Normal,
                    "low" => Priority::Low,
                    other => anyhow::bail!("unknown priority: {other}"),
                };
            }
            let task = store.create_task(new).await?;
            println!("Created task {}", task.id);
        }
        Commands::List { all } => {
            let tasks = store
                .get_all_tasks(&TaskQuery {
                    include_archived: all,
                    ..TaskQuery::default()
                })
                .await;
            for task in tasks {
                let indent = "  ".repeat(task.depth as usize);
                let due = task
                    .due_date
                    .map(|d| format!(" (due {})", d.format("%Y-%m-%d")))
                    .unwrap_or_default();
                println!(
                    "{indent}[{}] {} {}{due}",
                    task.status.as_str(),
                    task.id,
                    task.description
                );
            }
        }
        Commands::Done { id } => {
            store
                .update_task(
                    &id,
                    TaskPatch::with_status(TaskStatus::Done),
                    UpdateOptions::default(),
                )
                .await?;
            println!("Done: {id}");
        }
        Commands::Cancel { id } => {
            store
                .update_task(
                    &id,
                    TaskPatch::with_status(TaskStatus::Canceled),
                    UpdateOptions::default(),
                )
                .await?;
            println!("Canceled: {id}");
        }
        Commands::Reopen { id } => {
            store
                .update_task(
                    &id,
                    TaskPatch::with_status(TaskStatus::Todo),
                    UpdateOptions::default(),
                )
                .await?;
            println!("Reopened: {id}");
        }
        Commands::Delete { id } => {
            store.delete_task(&id).await?;
            println!("Deleted: {id}");
        }
        Commands::Sync => {
            let tracker = SyncTracker::load(config.store.tracker_path())
                .context("failed to load sync state")?;
            let engine = SyncEngine::new(store.clone(), config.sync.clone(), tracker);
            let report = engine.sync().await;
            println!(
                "Sync {}: {} fetched, {} created, {} updated, {} deleted, {} skipped, {} conflicts",
                if report.success { "ok" } else { "failed" },
                report.fetched,
                report.created,
                report.updated,
                report.deleted,
                report.skipped,
                report.conflicts
            );
            for error in &report.errors {
                eprintln!("  error: {error}");
            }
            for conflict in &report.unresolved {
                eprintln!(
                    "  conflict: {} ({} vs {})",
                    conflict.local.task.description,
                    conflict.local.meta.source_id,
                    conflict.remote.meta.source_id
                );
            }
        }
    }

    // Drain the debounced writer before exit.
    store.flush().await?;
    Ok(())
}

use std::{path::PathBuf, sync::Arc};

use clap::{Parser, Subcommand};
use course_engine::{
    backend::HttpBackend, config::Config, session::CourseSession, sync::SyncOutcome,
    utils::init_log,
};
use futures::StreamExt;
use serde::Serialize;
use tracing::info;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to config file, defaults and environment are used without one
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory for daily rotated log files, logs go to stderr without one
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Learner id
    #[arg(short, long)]
    learner: i64,

    /// Course id
    #[arg(long)]
    course: i64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the modules and lessons the learner can open
    Tree {
        #[arg(long)]
        json: bool,
    },
    /// Print enrollment state and progress
    Status,
    /// Wait for entitlement to show up after a purchase
    Reconcile,
    /// Mark a lesson as watched
    Complete { lesson: i64 },
}

fn print_json(value: &impl Serialize) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Cli::parse();
    let _guard = init_log(args.log_dir.clone());

    let config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::from_env()?,
    };
    let backend = Arc::new(HttpBackend::from_config(&config.api)?);
    let session = CourseSession::open(backend, args.course, args.learner, &config).await?;

    match args.command {
        Command::Tree { json } => {
            let tree = session.visible_tree();
            if json {
                print_json(&*tree)?;
            } else {
                println!("# {}\n{}", session.course().title, tree.get_table_of_contents());
            }
        }
        Command::Status => {
            print_json(&serde_json::json!({
                "enrollment": session.enrollment(),
                "progress": session.progress(),
            }))?;
        }
        Command::Reconcile => {
            let mut reconciliation = session.reconcile();
            let interrupted = loop {
                tokio::select! {
                    item = reconciliation.next() => match item {
                        Some(Ok(state)) => print_json(&state)?,
                        Some(Err(e)) => return Err(e.into()),
                        None => break false,
                    },
                    _ = tokio::signal::ctrl_c() => break true,
                }
            };
            if interrupted {
                reconciliation.cancel().await;
                info!("reconciliation interrupted");
            }
        }
        Command::Complete { lesson } => match session.complete_lesson(lesson).await? {
            SyncOutcome::Committed {
                snapshot,
                course_just_completed,
            } => {
                print_json(&snapshot)?;
                if course_just_completed {
                    info!("course {} completed", session.course().id);
                }
            }
            SyncOutcome::CompletionFailed { snapshot, error } => {
                print_json(&snapshot)?;
                anyhow::bail!(
                    "progress saved but the course could not be marked completed: {error}"
                );
            }
            SyncOutcome::RolledBack { error, .. } => return Err(error.into()),
        },
    }
    Ok(())
}

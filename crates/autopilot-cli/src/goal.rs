//! `autopilot goal ...`
//!
//! These commands only touch the goal store. Runs are started by a running
//! daemon, which picks up queued goals on its next poll.

use std::sync::Arc;

use chrono::Local;
use clap::Subcommand;
use tokio::sync::mpsc;

use autopilot_config::AutopilotConfig;
use autopilot_goals::{GoalEngine, NewGoal, queue_run};
use autopilot_session::ProcessSessionRunner;
use autopilot_storage::GoalStore;
use autopilot_types::LongTermGoal;

#[derive(Subcommand)]
pub enum GoalCommand {
    /// Create a goal and queue its first run
    Add {
        /// Goal name
        name: String,

        /// What the goal should achieve
        #[arg(short, long)]
        description: String,

        /// Assistant ID (defaults to the configured default)
        #[arg(long)]
        assistant: Option<String>,

        /// Working directory
        #[arg(long)]
        cwd: Option<String>,

        /// Minutes between runs, 0 runs again immediately
        #[arg(long, default_value_t = 30)]
        retry_interval: i64,

        /// Maximum number of runs before giving up
        #[arg(long, default_value_t = 10)]
        max_runs: u32,
    },
    /// List all goals
    List,
    /// Show a goal and its progress log
    Show { id: String },
    /// Pause a goal
    Pause { id: String },
    /// Reactivate a goal and queue a run now
    Resume { id: String },
    /// Delete a goal
    Remove { id: String },
}

pub async fn run(action: GoalCommand, config: &AutopilotConfig) -> anyhow::Result<()> {
    let dir = autopilot_config::ensure_config_dir()?;
    let store = Arc::new(GoalStore::open(autopilot_config::goals_file_path(&dir)));
    // CRUD never starts a session; the receiver is dropped on purpose.
    let (tx, _) = mpsc::unbounded_channel();
    let engine = GoalEngine::new(
        store.clone(),
        Arc::new(ProcessSessionRunner::new(config.runner.clone(), tx)),
        Arc::new(config.assistant_directory()),
        config.goals.clone(),
    );

    match action {
        GoalCommand::Add {
            name,
            description,
            assistant,
            cwd,
            retry_interval,
            max_runs,
        } => {
            let goal = engine
                .create_goal(NewGoal {
                    name,
                    description,
                    assistant_id: assistant,
                    cwd,
                    retry_interval,
                    max_runs,
                })
                .await?;
            queue_run(&store, &goal.id).await?;
            println!("Created goal {}", goal.id);
            println!("  first run is queued for the daemon");
        }
        GoalCommand::List => {
            let goals = engine.list_goals().await;
            if goals.is_empty() {
                println!("No goals.");
            }
            for goal in goals {
                println!("{}  {}", goal.id, summary_line(&goal));
            }
        }
        GoalCommand::Show { id } => {
            let Some(goal) = engine.get_goal(&id).await else {
                anyhow::bail!("Goal {id} not found");
            };
            print_goal(&goal);
        }
        GoalCommand::Pause { id } => match engine.pause_goal(&id).await? {
            Some(goal) => println!("Paused: {}", summary_line(&goal)),
            None => anyhow::bail!("Goal {id} not found"),
        },
        GoalCommand::Resume { id } => match queue_run(&store, &id).await? {
            Some(goal) => println!("Resumed: {}", summary_line(&goal)),
            None => anyhow::bail!("Goal {id} not found"),
        },
        GoalCommand::Remove { id } => {
            if !engine.delete_goal(&id).await? {
                anyhow::bail!("Goal {id} not found");
            }
            println!("Removed goal {id}");
        }
    }
    Ok(())
}

fn summary_line(goal: &LongTermGoal) -> String {
    format!(
        "[{:?}] {} | runs {}/{} | errors {}",
        goal.status, goal.name, goal.total_runs, goal.max_runs, goal.consecutive_errors
    )
}

fn print_goal(goal: &LongTermGoal) {
    println!("{}", summary_line(goal));
    println!("  id: {}", goal.id);
    println!("  description: {}", goal.description);
    if let Some(assistant) = &goal.assistant_id {
        println!("  assistant: {assistant}");
    }
    if let Some(cwd) = &goal.cwd {
        println!("  cwd: {cwd}");
    }
    println!("  retry interval: {} min", goal.retry_interval);
    if let Some(at) = goal.next_run_at {
        println!("  next run: {}", at.with_timezone(&Local).format("%Y-%m-%d %H:%M"));
    }
    if goal.progress_log.is_empty() {
        println!("  no runs logged yet");
        return;
    }
    println!("  progress:");
    for entry in &goal.progress_log {
        let marker = match (entry.is_complete, entry.is_error) {
            (true, _) => "done",
            (_, true) => "error",
            _ => "ok",
        };
        println!(
            "    run {} {} [{marker}] {}",
            entry.run,
            entry.run_at.with_timezone(&Local).format("%Y-%m-%d %H:%M"),
            entry.summary
        );
        if let Some(next) = &entry.next_steps {
            println!("      next: {next}");
        }
    }
}

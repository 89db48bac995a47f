mod goal;
mod task;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use autopilot_config::AutopilotConfig;
use autopilot_storage::{GoalStore, TaskStore};
use autopilot_types::GoalStatus;

#[derive(Parser)]
#[command(name = "autopilot", about = "Scheduled tasks and long-term goals for AI assistants")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scheduler daemon until Ctrl-C
    Run,
    /// Manage scheduled tasks
    Task {
        #[command(subcommand)]
        action: task::TaskCommand,
    },
    /// Manage long-term goals
    Goal {
        #[command(subcommand)]
        action: goal::GoalCommand,
    },
    /// Check system health
    Health,
}

fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config();
    let rt = tokio::runtime::Runtime::new()?;

    match cli.command {
        Commands::Run => {
            rt.block_on(async {
                let shutdown = CancellationToken::new();
                let on_signal = shutdown.clone();
                tokio::spawn(async move {
                    if let Err(e) = tokio::signal::ctrl_c().await {
                        warn!("Failed to listen for Ctrl-C: {e}");
                        return;
                    }
                    info!("Ctrl-C received");
                    on_signal.cancel();
                });
                autopilot_daemon::start_daemon(config, shutdown).await
            })?;
        }
        Commands::Task { action } => rt.block_on(task::run(action, &config))?,
        Commands::Goal { action } => rt.block_on(goal::run(action, &config))?,
        Commands::Health => rt.block_on(health(&config))?,
    }

    Ok(())
}

fn load_config() -> AutopilotConfig {
    autopilot_config::load_config().unwrap_or_else(|e| {
        warn!("Failed to load config, using defaults: {e}");
        AutopilotConfig::default()
    })
}

async fn health(config: &AutopilotConfig) -> anyhow::Result<()> {
    let dir = autopilot_config::config_dir()?;
    let tasks = TaskStore::open(autopilot_config::tasks_file_path(&dir)).list().await;
    let goals = GoalStore::open(autopilot_config::goals_file_path(&dir)).list().await;
    let count = |status: GoalStatus| goals.iter().filter(|g| g.status == status).count();

    println!("autopilot is healthy");
    println!("  data directory: {}", dir.display());
    println!("  default assistant: {}", config.default_assistant);
    println!("  assistants configured: {}", config.assistants.len());
    println!("  poll interval: {}s", config.scheduler.poll_interval_secs);
    println!("  runner: {} {}", config.runner.command, config.runner.args.join(" "));
    println!(
        "  tasks: {} ({} enabled)",
        tasks.len(),
        tasks.iter().filter(|t| t.enabled).count()
    );
    println!(
        "  goals: {} active, {} paused, {} completed, {} abandoned",
        count(GoalStatus::Active),
        count(GoalStatus::Paused),
        count(GoalStatus::Completed),
        count(GoalStatus::Abandoned)
    );
    Ok(())
}

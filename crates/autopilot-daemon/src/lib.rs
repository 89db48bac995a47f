//! autopilot-daemon: Long-running scheduler process.
//!
//! Provides:
//! - Store, scheduler, goal engine and hook registry wiring
//! - Completion routing from the session runner back into the goal engine
//!   and the `session.complete` hooks
//! - Startup entry points: startup hooks, due-task scan, goal resume
//! - Periodic pending-goal sync
//! - Configuration hot-reload of assistant profiles

pub mod config_watcher;
pub mod router;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use autopilot_config::AutopilotConfig;
use autopilot_cron::TaskScheduler;
use autopilot_goals::GoalEngine;
use autopilot_hooks::{HookEvent, HookRegistry};
use autopilot_session::{ProcessSessionRunner, SessionRunner, SharedAssistants};
use autopilot_storage::{GoalStore, TaskStore};
use autopilot_types::SessionCompletion;

/// Everything a running daemon owns.
pub struct Daemon {
    pub scheduler: Arc<TaskScheduler>,
    pub goals: Arc<GoalEngine>,
    pub hooks: Arc<HookRegistry>,
    pub assistants: Arc<SharedAssistants>,
    completions: UnboundedReceiver<SessionCompletion>,
    poll_interval: Duration,
}

impl Daemon {
    /// Build a daemon backed by the process session runner.
    pub fn new(config: &AutopilotConfig, data_dir: &Path) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let runner = Arc::new(ProcessSessionRunner::new(config.runner.clone(), tx));
        Self::with_runner(config, data_dir, runner, rx)
    }

    /// Build a daemon around any runner. `completions` must receive the
    /// runner's session outcomes.
    pub fn with_runner(
        config: &AutopilotConfig,
        data_dir: &Path,
        runner: Arc<dyn SessionRunner>,
        completions: UnboundedReceiver<SessionCompletion>,
    ) -> Self {
        let poll_interval = Duration::from_secs(config.scheduler.poll_interval_secs.max(1));
        let assistants = Arc::new(SharedAssistants::new(config.assistant_directory()));

        let task_store = Arc::new(TaskStore::open(autopilot_config::tasks_file_path(data_dir)));
        let goal_store = Arc::new(GoalStore::open(autopilot_config::goals_file_path(data_dir)));

        let scheduler = Arc::new(
            TaskScheduler::new(task_store, runner.clone(), assistants.clone())
                .with_poll_interval(poll_interval),
        );
        let goals = GoalEngine::new(goal_store, runner, assistants.clone(), config.goals.clone());

        Self {
            scheduler,
            goals,
            hooks: Arc::new(HookRegistry::new()),
            assistants,
            completions,
            poll_interval,
        }
    }

    /// Run until `shutdown` is cancelled.
    pub async fn run(self, shutdown: CancellationToken) {
        self.scheduler.register_hooks(&self.hooks).await;

        let router = tokio::spawn(router::route_completions(
            self.completions,
            self.goals.clone(),
            self.hooks.clone(),
            shutdown.clone(),
        ));

        // Startup entry points.
        self.hooks.dispatch(HookEvent::Startup).await;
        let scheduler = tokio::spawn(self.scheduler.clone().run(shutdown.clone()));
        let resumed = self.goals.resume_active_goals().await;
        info!(resumed, "Active goals resumed");

        let sync = tokio::spawn(sync_pending_goals(
            self.goals.clone(),
            self.poll_interval,
            shutdown.clone(),
        ));

        shutdown.cancelled().await;
        info!("Shutting down");
        for (name, handle) in [("router", router), ("scheduler", scheduler), ("goal sync", sync)] {
            if let Err(e) = handle.await {
                warn!("{name} task failed: {e}");
            }
        }
    }
}

/// Arm goals scheduled by other processes on the scheduler's cadence.
async fn sync_pending_goals(goals: Arc<GoalEngine>, interval: Duration, shutdown: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // Startup already resumed everything.
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                let armed = goals.sync_pending().await;
                if armed > 0 {
                    debug!(armed, "Synced pending goal runs");
                }
            }
        }
    }
}

/// Start the daemon with the process runner and config hot-reload.
///
/// This is the main entry point used by `autopilot run`.
pub async fn start_daemon(config: AutopilotConfig, shutdown: CancellationToken) -> anyhow::Result<()> {
    let data_dir = autopilot_config::ensure_config_dir()?;
    info!("Data directory: {}", data_dir.display());
    info!("  Tasks: {}", autopilot_config::tasks_file_path(&data_dir).display());
    info!("  Goals: {}", autopilot_config::goals_file_path(&data_dir).display());
    info!("  Runner: {} {}", config.runner.command, config.runner.args.join(" "));

    let daemon = Daemon::new(&config, &data_dir);

    let config_path: PathBuf = autopilot_config::config_file_path()?;
    let watcher = config_watcher::start_config_watcher(
        config_path,
        daemon.assistants.clone(),
        shutdown.clone(),
    );
    if watcher.is_some() {
        info!("  Config watcher: active");
    }

    daemon.run(shutdown).await;

    if let Some(watcher) = watcher {
        if let Err(e) = watcher.await {
            warn!("Config watcher failed: {e}");
        }
    }
    Ok(())
}

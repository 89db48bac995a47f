//! Configuration file watcher for hot-reload of assistant profiles.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::mpsc::RecvTimeoutError;
use std::time::Duration;

use notify_debouncer_mini::{DebouncedEventKind, new_debouncer};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use autopilot_session::SharedAssistants;

/// How often the watcher thread checks for shutdown while idle.
const SHUTDOWN_POLL: Duration = Duration::from_millis(500);

/// Start watching the config file for changes.
/// Returns a JoinHandle that finishes once `shutdown` is cancelled.
pub fn start_config_watcher(
    config_path: PathBuf,
    assistants: Arc<SharedAssistants>,
    shutdown: CancellationToken,
) -> Option<tokio::task::JoinHandle<()>> {
    // Only watch if the config directory exists
    let watch_dir = match config_path.parent() {
        Some(dir) if dir.exists() => dir.to_path_buf(),
        Some(dir) => {
            info!(
                "Config directory {} does not exist yet, skipping watcher",
                dir.display()
            );
            return None;
        }
        None => return None,
    };

    let handle = tokio::task::spawn_blocking(move || {
        run_watcher(watch_dir, config_path, assistants, shutdown);
    });

    Some(handle)
}

fn run_watcher(
    watch_dir: PathBuf,
    config_path: PathBuf,
    assistants: Arc<SharedAssistants>,
    shutdown: CancellationToken,
) {
    let (tx, rx) = std::sync::mpsc::channel();

    let mut debouncer = match new_debouncer(Duration::from_secs(1), tx) {
        Ok(d) => d,
        Err(e) => {
            warn!("Failed to create file watcher: {e}");
            return;
        }
    };

    if let Err(e) = debouncer
        .watcher()
        .watch(&watch_dir, notify::RecursiveMode::NonRecursive)
    {
        warn!("Failed to watch config directory: {e}");
        return;
    }

    info!("Config watcher started: watching {}", watch_dir.display());

    while !shutdown.is_cancelled() {
        match rx.recv_timeout(SHUTDOWN_POLL) {
            Ok(Ok(events)) => {
                let config_changed = events.iter().any(|event| {
                    event.kind == DebouncedEventKind::Any && event.path == config_path
                });

                if config_changed {
                    info!("Config file changed, reloading assistants...");
                    reload_assistants(&config_path, &assistants);
                }
            }
            Ok(Err(e)) => {
                warn!("Config watcher error: {e:?}");
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                info!("Config watcher channel closed, stopping");
                break;
            }
        }
    }
}

/// Re-read the config file and swap in its assistant directory.
///
/// Scheduler and runner settings only take effect on restart.
pub fn reload_assistants(config_path: &Path, assistants: &SharedAssistants) {
    match autopilot_config::load_config_from(config_path) {
        Ok(config) => {
            let directory = config.assistant_directory();
            let count = directory.assistants.len();
            assistants.replace(directory);
            info!(assistants = count, "Assistants reloaded");
        }
        Err(e) => {
            warn!("Failed to reload config, keeping previous assistants: {e}");
        }
    }
}

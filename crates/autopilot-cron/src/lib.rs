//! autopilot-cron: Scheduled task management.
//!
//! Computes when each task should next run, polls for due tasks, and fires
//! hook tasks on application lifecycle events. Execution is always delegated
//! to a [`SessionRunner`](autopilot_session::SessionRunner).

pub mod schedule;
pub mod scheduler;

use serde::{Deserialize, Serialize};

use autopilot_types::ScheduleConfig;

pub use schedule::{next_run, next_run_for};
pub use scheduler::TaskScheduler;

/// Input for creating a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTask {
    pub name: String,
    pub prompt: String,
    #[serde(default)]
    pub cwd: Option<String>,
    #[serde(default)]
    pub assistant_id: Option<String>,
    pub schedule: ScheduleConfig,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

/// Partial update of a task. `None` leaves a field unchanged; the nested
/// options clear the override when set to `Some(None)`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskPatch {
    pub name: Option<String>,
    pub prompt: Option<String>,
    pub cwd: Option<Option<String>>,
    pub assistant_id: Option<Option<String>>,
    pub schedule: Option<ScheduleConfig>,
    pub enabled: Option<bool>,
}

fn default_true() -> bool {
    true
}

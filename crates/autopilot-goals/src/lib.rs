//! autopilot-goals: Long-term goals pursued across repeated sessions.
//!
//! Each run gets a prompt with the goal and its recent progress, and the
//! model answers with structured tags. The engine logs every run and decides
//! whether the goal is completed, abandoned, paused by the error circuit
//! breaker, or scheduled again after its retry interval.

pub mod engine;
pub mod prompt;

use serde::{Deserialize, Serialize};

pub use engine::{GoalEngine, queue_run};

/// Input for creating a goal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewGoal {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub assistant_id: Option<String>,
    #[serde(default)]
    pub cwd: Option<String>,
    /// Minutes between runs; zero runs again immediately.
    #[serde(default)]
    pub retry_interval: i64,
    pub max_runs: u32,
}

/// Partial update of a goal's descriptive and control fields.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GoalPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub assistant_id: Option<Option<String>>,
    pub cwd: Option<Option<String>>,
    pub retry_interval: Option<i64>,
    pub max_runs: Option<u32>,
}

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use autopilot_types::{AssistantDirectory, AssistantProfile};

/// Environment variable overriding the config directory.
pub const HOME_ENV: &str = "AUTOPILOT_HOME";

const CONFIG_FILE: &str = "config.json5";
const TASKS_FILE: &str = "tasks.json";
const GOALS_FILE: &str = "goals.json";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON5 parse error: {0}")]
    Json5(#[from] json5::Error),
    #[error("Config directory not found")]
    NoDirFound,
}

/// Scheduler loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Seconds between due-task scans.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
}

fn default_poll_interval() -> u64 {
    60
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
        }
    }
}

/// Goal engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoalsConfig {
    /// Consecutive error completions that auto-pause a goal.
    #[serde(default = "default_retry_threshold")]
    pub retry_threshold: u32,
    /// Progress log entries embedded in each run's prompt.
    #[serde(default = "default_progress_window")]
    pub progress_window: usize,
    /// Length of the fallback summary taken from the end of a reply.
    #[serde(default = "default_summary_excerpt")]
    pub summary_excerpt_chars: usize,
}

fn default_retry_threshold() -> u32 {
    3
}

fn default_progress_window() -> usize {
    8
}

fn default_summary_excerpt() -> usize {
    300
}

impl Default for GoalsConfig {
    fn default() -> Self {
        Self {
            retry_threshold: default_retry_threshold(),
            progress_window: default_progress_window(),
            summary_excerpt_chars: default_summary_excerpt(),
        }
    }
}

/// Process-backed session runner settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Executable that receives the prompt on stdin.
    #[serde(default = "default_runner_command")]
    pub command: String,
    #[serde(default = "default_runner_args")]
    pub args: Vec<String>,
    /// Kill the session after this many seconds (no limit if None).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    /// Captured stdout is truncated to this many bytes.
    #[serde(default = "default_max_output")]
    pub max_output_bytes: usize,
}

fn default_runner_command() -> String {
    "claude".to_string()
}

fn default_runner_args() -> Vec<String> {
    vec!["-p".to_string()]
}

fn default_max_output() -> usize {
    200_000
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            command: default_runner_command(),
            args: default_runner_args(),
            timeout_secs: None,
            max_output_bytes: default_max_output(),
        }
    }
}

/// Top-level autopilot configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutopilotConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub goals: GoalsConfig,
    #[serde(default)]
    pub runner: RunnerConfig,
    /// Named assistant profiles.
    #[serde(default)]
    pub assistants: HashMap<String, AssistantProfile>,
    /// Default assistant ID.
    #[serde(default = "default_assistant_id")]
    pub default_assistant: String,
}

fn default_assistant_id() -> String {
    "default".to_string()
}

impl Default for AutopilotConfig {
    fn default() -> Self {
        let mut assistants = HashMap::new();
        assistants.insert(
            "default".to_string(),
            AssistantProfile {
                name: "default".to_string(),
                provider: Some("anthropic".to_string()),
                model: Some("claude-sonnet-4".to_string()),
                default_cwd: None,
                skills: Vec::new(),
                persona: None,
            },
        );

        Self {
            scheduler: SchedulerConfig::default(),
            goals: GoalsConfig::default(),
            runner: RunnerConfig::default(),
            assistants,
            default_assistant: default_assistant_id(),
        }
    }
}

impl AutopilotConfig {
    /// Snapshot of the assistant section.
    pub fn assistant_directory(&self) -> AssistantDirectory {
        AssistantDirectory {
            assistants: self.assistants.clone(),
            default_assistant: self.default_assistant.clone(),
        }
    }
}

/// Resolve the config directory ($AUTOPILOT_HOME or ~/.autopilot/).
pub fn config_dir() -> Result<PathBuf, ConfigError> {
    if let Ok(dir) = std::env::var(HOME_ENV) {
        let dir = dir.trim();
        if !dir.is_empty() {
            return Ok(PathBuf::from(dir));
        }
    }
    dirs::home_dir()
        .map(|h| h.join(".autopilot"))
        .ok_or(ConfigError::NoDirFound)
}

/// Resolve the config file path.
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join(CONFIG_FILE))
}

/// Path of the task store document inside `dir`.
pub fn tasks_file_path(dir: &Path) -> PathBuf {
    dir.join(TASKS_FILE)
}

/// Path of the goal store document inside `dir`.
pub fn goals_file_path(dir: &Path) -> PathBuf {
    dir.join(GOALS_FILE)
}

/// Load configuration from the default path, falling back to defaults.
pub fn load_config() -> Result<AutopilotConfig, ConfigError> {
    let _ = dotenvy::dotenv();

    let path = config_file_path()?;
    load_config_from(&path)
}

/// Load configuration from a specific path, falling back to defaults if not found.
pub fn load_config_from(path: &Path) -> Result<AutopilotConfig, ConfigError> {
    if !path.exists() {
        tracing::debug!("Config file not found at {}, using defaults", path.display());
        return Ok(AutopilotConfig::default());
    }

    let content = std::fs::read_to_string(path)?;
    let config: AutopilotConfig = json5::from_str(&content)?;
    Ok(config)
}

/// Ensure the config directory exists.
pub fn ensure_config_dir() -> Result<PathBuf, ConfigError> {
    let dir = config_dir()?;
    if !dir.exists() {
        std::fs::create_dir_all(&dir)?;
    }
    Ok(dir)
}

/// Save configuration to the default path.
pub fn save_config(config: &AutopilotConfig) -> Result<(), ConfigError> {
    let dir = ensure_config_dir()?;
    save_config_to(&dir.join(CONFIG_FILE), config)
}

/// Save configuration to a specific path.
pub fn save_config_to(path: &Path, config: &AutopilotConfig) -> Result<(), ConfigError> {
    let content = serde_json::to_string_pretty(config)
        .map_err(|e| ConfigError::Io(std::io::Error::other(e)))?;
    std::fs::write(path, content)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AutopilotConfig::default();
        assert_eq!(config.default_assistant, "default");
        assert!(config.assistants.contains_key("default"));
        assert_eq!(config.scheduler.poll_interval_secs, 60);
        assert_eq!(config.goals.retry_threshold, 3);
        assert_eq!(config.goals.progress_window, 8);
    }

    #[test]
    fn test_json5_parse() {
        let json5_str = r#"{
            scheduler: { poll_interval_secs: 30 },
            assistants: {
                "coder": {
                    name: "coder",
                    provider: "anthropic",
                    model: "claude-sonnet-4",
                    skills: ["git", "tests"],
                    default_cwd: "/work",
                }
            },
            default_assistant: "coder",
        }"#;
        let config: AutopilotConfig = json5::from_str(json5_str).unwrap();
        assert_eq!(config.scheduler.poll_interval_secs, 30);
        assert_eq!(config.goals.retry_threshold, 3);
        assert_eq!(config.runner.command, "claude");
        let dir = config.assistant_directory();
        let (id, profile) = dir.resolve(None).unwrap();
        assert_eq!(id, "coder");
        assert_eq!(profile.default_cwd.as_deref(), Some("/work"));
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config_from(&dir.path().join("nope.json5")).unwrap();
        assert_eq!(config.default_assistant, "default");
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        let mut config = AutopilotConfig::default();
        config.goals.retry_threshold = 5;
        save_config_to(&path, &config).unwrap();

        let loaded = load_config_from(&path).unwrap();
        assert_eq!(loaded.goals.retry_threshold, 5);
    }

    #[test]
    fn test_store_paths() {
        let base = Path::new("/tmp/ap");
        assert_eq!(tasks_file_path(base), PathBuf::from("/tmp/ap/tasks.json"));
        assert_eq!(goals_file_path(base), PathBuf::from("/tmp/ap/goals.json"));
    }
}

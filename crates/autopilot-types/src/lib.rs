use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ──────────────────── Assistant Types ────────────────────

/// Execution profile for a single assistant.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AssistantProfile {
    /// Display name for this assistant.
    pub name: String,
    /// Provider ID (e.g. "anthropic").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    /// Model ID to use (e.g. "claude-sonnet-4").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Working directory used when a task or goal does not override it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_cwd: Option<String>,
    /// Skill names enabled for this assistant.
    #[serde(default)]
    pub skills: Vec<String>,
    /// Persona / system prompt override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persona: Option<String>,
}

/// Read-only snapshot of the configured assistants.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AssistantDirectory {
    #[serde(default)]
    pub assistants: HashMap<String, AssistantProfile>,
    #[serde(default)]
    pub default_assistant: String,
}

impl AssistantDirectory {
    /// Look up an assistant by ID, falling back to the default assistant.
    pub fn resolve(&self, id: Option<&str>) -> Option<(&str, &AssistantProfile)> {
        id.filter(|s| !s.is_empty())
            .and_then(|wanted| self.assistants.get_key_value(wanted))
            .or_else(|| self.assistants.get_key_value(self.default_assistant.as_str()))
            .map(|(key, profile)| (key.as_str(), profile))
    }
}

// ──────────────────── Schedule Types ────────────────────

/// Discriminator of the persisted schedule configuration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleType {
    Once,
    Interval,
    Daily,
    Heartbeat,
    Hook,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IntervalUnit {
    Minutes,
    Hours,
    Days,
    Weeks,
}

impl IntervalUnit {
    /// Length of one unit in minutes.
    pub fn minutes(self) -> i64 {
        match self {
            IntervalUnit::Minutes => 1,
            IntervalUnit::Hours => 60,
            IntervalUnit::Days => 60 * 24,
            IntervalUnit::Weeks => 60 * 24 * 7,
        }
    }
}

/// Application lifecycle events a hook task can subscribe to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum HookEventKind {
    #[serde(rename = "startup")]
    Startup,
    #[serde(rename = "session.complete")]
    SessionComplete,
}

impl HookEventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            HookEventKind::Startup => "startup",
            HookEventKind::SessionComplete => "session.complete",
        }
    }
}

/// Optional conditions a `session.complete` event must satisfy.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HookFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assistant_id: Option<String>,
    /// Regular expression searched in the completed session's title.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title_pattern: Option<String>,
    #[serde(default)]
    pub error_only: bool,
}

/// Schedule configuration exactly as persisted.
///
/// Fields are lenient so that a half-edited record still loads; use
/// [`ScheduleConfig::resolve`] to obtain a well-formed [`Schedule`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleConfig {
    pub schedule_type: ScheduleType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval_value: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval_unit: Option<IntervalUnit>,
    /// Local clock time, `HH:MM`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub daily_time: Option<String>,
    /// Permitted weekdays, 0 = Sunday .. 6 = Saturday. Empty means every day.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub daily_days: Option<Vec<u8>>,
    /// Heartbeat period in minutes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heartbeat_interval: Option<u64>,
    #[serde(default)]
    pub heartbeat_suppress_trivial: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hook_event: Option<HookEventKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hook_filter: Option<HookFilter>,
}

impl ScheduleConfig {
    fn empty(schedule_type: ScheduleType) -> Self {
        Self {
            schedule_type,
            scheduled_time: None,
            interval_value: None,
            interval_unit: None,
            daily_time: None,
            daily_days: None,
            heartbeat_interval: None,
            heartbeat_suppress_trivial: false,
            hook_event: None,
            hook_filter: None,
        }
    }

    pub fn once(at: DateTime<Utc>) -> Self {
        Self {
            scheduled_time: Some(at),
            ..Self::empty(ScheduleType::Once)
        }
    }

    pub fn interval(value: u64, unit: IntervalUnit) -> Self {
        Self {
            interval_value: Some(value),
            interval_unit: Some(unit),
            ..Self::empty(ScheduleType::Interval)
        }
    }

    pub fn daily(time: &str, days: Option<Vec<u8>>) -> Self {
        Self {
            daily_time: Some(time.to_string()),
            daily_days: days,
            ..Self::empty(ScheduleType::Daily)
        }
    }

    pub fn heartbeat(minutes: u64, suppress_trivial: bool) -> Self {
        Self {
            heartbeat_interval: Some(minutes),
            heartbeat_suppress_trivial: suppress_trivial,
            ..Self::empty(ScheduleType::Heartbeat)
        }
    }

    pub fn hook(event: HookEventKind, filter: Option<HookFilter>) -> Self {
        Self {
            hook_event: Some(event),
            hook_filter: filter,
            ..Self::empty(ScheduleType::Hook)
        }
    }

    /// Resolve into a typed schedule. Missing or malformed parameters yield `None`.
    pub fn resolve(&self) -> Option<Schedule> {
        match self.schedule_type {
            ScheduleType::Once => self.scheduled_time.map(|at| Schedule::Once { at }),
            ScheduleType::Interval => {
                let value = self.interval_value.filter(|v| *v > 0)?;
                let unit = self.interval_unit?;
                let every_minutes = i64::try_from(value).ok()?.checked_mul(unit.minutes())?;
                Some(Schedule::Interval { every_minutes })
            }
            ScheduleType::Daily => {
                let (hour, minute) = parse_clock_time(self.daily_time.as_deref()?)?;
                let weekdays = self
                    .daily_days
                    .as_deref()
                    .filter(|days| !days.is_empty())
                    .map(WeekdaySet::from_days);
                Some(Schedule::Daily {
                    hour,
                    minute,
                    weekdays,
                })
            }
            ScheduleType::Heartbeat => {
                let minutes = self.heartbeat_interval.filter(|v| *v > 0)?;
                Some(Schedule::Heartbeat {
                    every_minutes: i64::try_from(minutes).ok()?,
                    suppress_trivial: self.heartbeat_suppress_trivial,
                })
            }
            ScheduleType::Hook => Some(Schedule::Hook {
                event: self.hook_event?,
                filter: self.hook_filter.clone().unwrap_or_default(),
            }),
        }
    }
}

/// Parse `HH:MM` (24h clock).
pub fn parse_clock_time(s: &str) -> Option<(u32, u32)> {
    let (h, m) = s.trim().split_once(':')?;
    let hour: u32 = h.parse().ok()?;
    let minute: u32 = m.parse().ok()?;
    (hour < 24 && minute < 60).then_some((hour, minute))
}

/// Bitmask of permitted weekdays, bit 0 = Sunday.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WeekdaySet(u8);

impl WeekdaySet {
    /// Out-of-range day numbers are ignored, so a list made only of invalid
    /// days permits nothing.
    pub fn from_days(days: &[u8]) -> Self {
        Self(
            days.iter()
                .filter(|d| **d < 7)
                .fold(0u8, |mask, d| mask | (1 << d)),
        )
    }

    pub fn contains(self, weekday: chrono::Weekday) -> bool {
        self.0 & (1 << weekday.num_days_from_sunday()) != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

/// Well-formed schedule, one variant per schedule kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Schedule {
    Once {
        at: DateTime<Utc>,
    },
    Interval {
        every_minutes: i64,
    },
    Daily {
        hour: u32,
        minute: u32,
        weekdays: Option<WeekdaySet>,
    },
    Heartbeat {
        every_minutes: i64,
        suppress_trivial: bool,
    },
    Hook {
        event: HookEventKind,
        filter: HookFilter,
    },
}

// ──────────────────── Task Types ────────────────────

/// A unit of deferred or recurring work.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledTask {
    pub id: String,
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub prompt: String,
    /// Working directory override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    /// Target assistant (default assistant if None).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assistant_id: Option<String>,
    #[serde(flatten)]
    pub schedule: ScheduleConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run: Option<DateTime<Utc>>,
    /// Always the next-run calculation for the current configuration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_run: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ScheduledTask {
    pub fn is_hook(&self) -> bool {
        self.schedule.schedule_type == ScheduleType::Hook
    }
}

// ──────────────────── Goal Types ────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GoalStatus {
    Active,
    Paused,
    Completed,
    Abandoned,
}

/// One completed run of a goal.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEntry {
    pub session_id: String,
    #[serde(default)]
    pub run: u32,
    pub run_at: DateTime<Utc>,
    pub summary: String,
    pub is_complete: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_steps: Option<String>,
    #[serde(default)]
    pub is_error: bool,
}

/// A multi-run objective pursued across repeated sessions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LongTermGoal {
    pub id: String,
    pub name: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assistant_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    /// Minutes between runs; zero or less runs again immediately.
    #[serde(default)]
    pub retry_interval: i64,
    pub max_runs: u32,
    pub status: GoalStatus,
    #[serde(default)]
    pub total_runs: u32,
    #[serde(default)]
    pub consecutive_errors: u32,
    /// Pending run, persisted so it survives a restart.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_run_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub progress_log: Vec<ProgressEntry>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ──────────────────── Session Types ────────────────────

/// Identifies what requested a session, carried from trigger to completion.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Correlation {
    Task {
        task_id: String,
        /// Started by a hook task.
        #[serde(default)]
        hook: bool,
    },
    Goal {
        goal_id: String,
        run: u32,
    },
}

/// A fully resolved request to start an AI session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRequest {
    pub session_id: String,
    pub title: String,
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assistant_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default)]
    pub skills: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persona: Option<String>,
    /// Suppress trivial output (heartbeat check-ins).
    #[serde(default)]
    pub quiet: bool,
    pub correlation: Correlation,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Success,
    Error,
}

/// Terminal outcome of a session, reported back by the session layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionCompletion {
    pub session_id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assistant_id: Option<String>,
    pub last_message: String,
    pub status: SessionStatus,
    pub correlation: Correlation,
}

impl SessionCompletion {
    pub fn is_error(&self) -> bool {
        self.status == SessionStatus::Error
    }
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Weekday};

    fn task_json(schedule: &str) -> String {
        format!(
            r#"{{"id":"t1","name":"n","prompt":"p","createdAt":"2025-01-06T09:00:00Z","updatedAt":"2025-01-06T09:00:00Z",{schedule}}}"#
        )
    }

    #[test]
    fn test_task_flattened_schedule_serde() {
        let json = task_json(r#""scheduleType":"daily","dailyTime":"09:00","dailyDays":[1,3]"#);
        let task: ScheduledTask = serde_json::from_str(&json).unwrap();
        assert!(task.enabled);
        assert_eq!(task.schedule.schedule_type, ScheduleType::Daily);
        assert_eq!(task.schedule.daily_days, Some(vec![1, 3]));

        let out = serde_json::to_value(&task).unwrap();
        assert_eq!(out["scheduleType"], "daily");
        assert_eq!(out["dailyTime"], "09:00");
        assert!(out.get("nextRun").is_none());
    }

    #[test]
    fn test_interval_without_unit_resolves_to_none() {
        let json = task_json(r#""scheduleType":"interval","intervalValue":5"#);
        let task: ScheduledTask = serde_json::from_str(&json).unwrap();
        assert_eq!(task.schedule.resolve(), None);
    }

    #[test]
    fn test_resolve_interval_in_minutes() {
        let cfg = ScheduleConfig::interval(2, IntervalUnit::Hours);
        assert_eq!(cfg.resolve(), Some(Schedule::Interval { every_minutes: 120 }));
        assert_eq!(ScheduleConfig::interval(0, IntervalUnit::Hours).resolve(), None);
    }

    #[test]
    fn test_resolve_daily_rejects_bad_clock() {
        assert_eq!(ScheduleConfig::daily("25:00", None).resolve(), None);
        assert_eq!(ScheduleConfig::daily("9am", None).resolve(), None);
        assert!(ScheduleConfig::daily("07:05", None).resolve().is_some());
    }

    #[test]
    fn test_empty_day_list_means_every_day() {
        let resolved = ScheduleConfig::daily("09:00", Some(vec![])).resolve();
        assert_eq!(
            resolved,
            Some(Schedule::Daily {
                hour: 9,
                minute: 0,
                weekdays: None
            })
        );
    }

    #[test]
    fn test_weekday_set() {
        let set = WeekdaySet::from_days(&[0, 6, 9]);
        assert!(set.contains(Weekday::Sun));
        assert!(set.contains(Weekday::Sat));
        assert!(!set.contains(Weekday::Mon));
        assert!(WeekdaySet::from_days(&[7, 8]).is_empty());
    }

    #[test]
    fn test_hook_event_names() {
        let json = task_json(
            r#""scheduleType":"hook","hookEvent":"session.complete","hookFilter":{"errorOnly":true}"#,
        );
        let task: ScheduledTask = serde_json::from_str(&json).unwrap();
        assert!(task.is_hook());
        match task.schedule.resolve() {
            Some(Schedule::Hook { event, filter }) => {
                assert_eq!(event, HookEventKind::SessionComplete);
                assert!(filter.error_only);
                assert!(filter.assistant_id.is_none());
            }
            other => panic!("Expected Hook schedule, got {other:?}"),
        }
    }

    #[test]
    fn test_hook_without_event_is_malformed() {
        let cfg = ScheduleConfig {
            hook_event: None,
            ..ScheduleConfig::hook(HookEventKind::Startup, None)
        };
        assert_eq!(cfg.resolve(), None);
    }

    #[test]
    fn test_goal_defaults_compat() {
        let json = r#"{"id":"g","name":"n","description":"d","maxRuns":5,"status":"active",
            "createdAt":"2025-01-06T09:00:00Z","updatedAt":"2025-01-06T09:00:00Z"}"#;
        let goal: LongTermGoal = serde_json::from_str(json).unwrap();
        assert_eq!(goal.retry_interval, 0);
        assert_eq!(goal.total_runs, 0);
        assert!(goal.progress_log.is_empty());
        assert!(goal.next_run_at.is_none());
    }

    #[test]
    fn test_correlation_tagging() {
        let c = Correlation::Goal {
            goal_id: "g1".into(),
            run: 3,
        };
        let json = serde_json::to_string(&c).unwrap();
        assert!(json.contains("\"kind\":\"goal\""));
        let parsed: Correlation = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, c);
    }

    #[test]
    fn test_assistant_directory_fallback() {
        let mut dir = AssistantDirectory {
            default_assistant: "main".into(),
            ..Default::default()
        };
        dir.assistants.insert(
            "main".into(),
            AssistantProfile {
                name: "Main".into(),
                ..Default::default()
            },
        );
        dir.assistants.insert(
            "coder".into(),
            AssistantProfile {
                name: "Coder".into(),
                ..Default::default()
            },
        );
        assert_eq!(dir.resolve(Some("coder")).unwrap().0, "coder");
        assert_eq!(dir.resolve(Some("missing")).unwrap().0, "main");
        assert_eq!(dir.resolve(None).unwrap().0, "main");
    }

    #[test]
    fn test_assistant_directory_json5() {
        let src = r#"{
            assistants: { main: { name: "Main", model: "claude-sonnet-4", skills: ["git"] } },
            default_assistant: "main",
        }"#;
        let dir: AssistantDirectory = json5::from_str(src).unwrap();
        let (_, profile) = dir.resolve(None).unwrap();
        assert_eq!(profile.skills, vec!["git".to_string()]);
    }

    #[test]
    fn test_once_roundtrip_keeps_timestamp() {
        let at = Utc.with_ymd_and_hms(2025, 3, 1, 8, 0, 0).unwrap();
        assert_eq!(ScheduleConfig::once(at).resolve(), Some(Schedule::Once { at }));
    }
}

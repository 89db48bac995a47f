//! Task scheduler: polls for due tasks and dispatches hook tasks.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local, TimeZone, Utc};
use regex::Regex;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use autopilot_hooks::{HookEvent, HookRegistry};
use autopilot_session::heartbeat::heartbeat_prompt;
use autopilot_session::{AssistantConfigProvider, SessionRunner, SessionSpec, build_request};
use autopilot_storage::TaskStore;
use autopilot_types::{
    Correlation, HookEventKind, HookFilter, Schedule, ScheduleType, ScheduledTask,
    SessionCompletion,
};

use crate::schedule::next_run;
use crate::{NewTask, TaskPatch};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(60);

/// Characters of the triggering session's last message passed to a hook task.
const HOOK_CONTEXT_CHARS: usize = 2_000;

/// Why a task is being fired.
enum TriggerMode<'a> {
    /// Polling found it due.
    Due,
    /// Explicit "run now".
    Manual,
    /// A lifecycle event matched its hook.
    Hook(Option<&'a SessionCompletion>),
}

/// Owns the scheduling decisions for [`ScheduledTask`]s.
///
/// The store is the single source of truth; every trigger persists
/// `last_run`/`next_run` before handing the session to the runner, so a
/// task cannot be selected twice for the same due instant.
pub struct TaskScheduler {
    store: Arc<TaskStore>,
    runner: Arc<dyn SessionRunner>,
    assistants: Arc<dyn AssistantConfigProvider>,
    poll_interval: Duration,
}

impl TaskScheduler {
    pub fn new(
        store: Arc<TaskStore>,
        runner: Arc<dyn SessionRunner>,
        assistants: Arc<dyn AssistantConfigProvider>,
    ) -> Self {
        Self {
            store,
            runner,
            assistants,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    // ─── CRUD ───────────────────────────────────────────────

    /// Create a task and compute its first `next_run`.
    pub async fn add_task(&self, new: NewTask) -> anyhow::Result<ScheduledTask> {
        validate_name_and_prompt(&new.name, &new.prompt)?;
        let now = Local::now();
        let now_utc = now.with_timezone(&Utc);
        let mut task = ScheduledTask {
            id: uuid::Uuid::new_v4().to_string(),
            name: new.name,
            enabled: new.enabled,
            prompt: new.prompt,
            cwd: new.cwd,
            assistant_id: new.assistant_id,
            schedule: new.schedule,
            last_run: None,
            next_run: None,
            created_at: now_utc,
            updated_at: now_utc,
        };
        task.next_run = next_run(&task, &now);
        if task.schedule.resolve().is_none() {
            warn!(name = %task.name, "Task schedule is incomplete, it will not fire automatically");
        }
        self.store.insert(task.clone()).await?;
        info!(task_id = %task.id, name = %task.name, next_run = ?task.next_run, "Task added");
        Ok(task)
    }

    /// Apply a patch and recompute `next_run`. Returns `None` for unknown IDs.
    pub async fn update_task(&self, id: &str, patch: TaskPatch) -> anyhow::Result<Option<ScheduledTask>> {
        if let Some(name) = &patch.name {
            anyhow::ensure!(!name.trim().is_empty(), "Task name is required");
        }
        if let Some(prompt) = &patch.prompt {
            anyhow::ensure!(!prompt.trim().is_empty(), "Task prompt is required");
        }
        let now = Local::now();
        let updated = self
            .store
            .update(id, |task| {
                if let Some(name) = patch.name {
                    task.name = name;
                }
                if let Some(prompt) = patch.prompt {
                    task.prompt = prompt;
                }
                if let Some(cwd) = patch.cwd {
                    task.cwd = cwd;
                }
                if let Some(assistant_id) = patch.assistant_id {
                    task.assistant_id = assistant_id;
                }
                if let Some(schedule) = patch.schedule {
                    task.schedule = schedule;
                }
                if let Some(enabled) = patch.enabled {
                    task.enabled = enabled;
                }
                task.updated_at = now.with_timezone(&Utc);
                task.next_run = next_run(task, &now);
            })
            .await?;
        if let Some(task) = &updated {
            info!(task_id = %task.id, next_run = ?task.next_run, "Task updated");
        }
        Ok(updated)
    }

    pub async fn set_enabled(&self, id: &str, enabled: bool) -> anyhow::Result<Option<ScheduledTask>> {
        self.update_task(
            id,
            TaskPatch {
                enabled: Some(enabled),
                ..Default::default()
            },
        )
        .await
    }

    /// Remove a task. Nothing is cancelled: a task has no pending runtime state.
    pub async fn delete_task(&self, id: &str) -> anyhow::Result<bool> {
        let removed = self.store.remove(id).await?;
        if removed {
            info!(task_id = %id, "Task deleted");
        }
        Ok(removed)
    }

    pub async fn list_tasks(&self) -> Vec<ScheduledTask> {
        self.store.list().await
    }

    pub async fn get_task(&self, id: &str) -> Option<ScheduledTask> {
        self.store.get(id).await
    }

    /// Fire a task immediately, whatever its schedule or enabled state.
    pub async fn run_task_now(&self, id: &str) -> anyhow::Result<bool> {
        self.trigger(id, &Local::now(), TriggerMode::Manual).await
    }

    // ─── Polling ────────────────────────────────────────────

    /// Fire every enabled, time-driven task whose `next_run` has arrived.
    pub async fn run_due_tasks(&self) -> usize {
        self.run_due_tasks_at(&Local::now()).await
    }

    /// [`run_due_tasks`](Self::run_due_tasks) against an explicit clock.
    ///
    /// Due tasks fire in store order.
    pub async fn run_due_tasks_at<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> usize {
        let now_utc = now.with_timezone(&Utc);
        let due: Vec<String> = self
            .store
            .list()
            .await
            .into_iter()
            .filter(|task| is_due(task, now_utc))
            .map(|task| task.id)
            .collect();

        let mut fired = 0;
        for id in due {
            match self.trigger(&id, now, TriggerMode::Due).await {
                Ok(true) => fired += 1,
                Ok(false) => {}
                Err(e) => warn!(task_id = %id, "Failed to record task run: {e}"),
            }
        }
        fired
    }

    /// Poll on a fixed cadence until `shutdown` is cancelled. The first scan
    /// happens immediately.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        info!(interval_secs = self.poll_interval.as_secs(), "Task scheduler started");
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let fired = self.run_due_tasks().await;
                    if fired > 0 {
                        debug!(fired, "Poll tick fired tasks");
                    }
                }
            }
        }
        info!("Task scheduler stopped");
    }

    // ─── Hooks ──────────────────────────────────────────────

    /// Subscribe this scheduler's hook dispatcher to the registry.
    pub async fn register_hooks(self: &Arc<Self>, registry: &HookRegistry) {
        let scheduler = self.clone();
        registry
            .on_many(
                &[HookEventKind::Startup, HookEventKind::SessionComplete],
                Arc::new(move |event| {
                    let scheduler = scheduler.clone();
                    Box::pin(async move {
                        scheduler.dispatch_hook(&event).await;
                    })
                }),
            )
            .await;
    }

    /// Fire every enabled hook task matching the event.
    pub async fn dispatch_hook(&self, event: &HookEvent) -> usize {
        self.dispatch_hook_at(event, &Local::now()).await
    }

    pub async fn dispatch_hook_at<Tz: TimeZone>(&self, event: &HookEvent, now: &DateTime<Tz>) -> usize {
        let completion = event.completion();
        if let Some(Correlation::Task { hook: true, .. }) = completion.map(|c| &c.correlation) {
            debug!("Skipping session.complete hooks for a hook-started session");
            return 0;
        }

        let kind = event.kind();
        let matching: Vec<String> = self
            .store
            .list()
            .await
            .into_iter()
            .filter(|task| task.enabled)
            .filter(|task| match task.schedule.resolve() {
                Some(Schedule::Hook { event, filter }) => {
                    event == kind && filter_matches(&filter, completion)
                }
                _ => false,
            })
            .map(|task| task.id)
            .collect();

        let mut fired = 0;
        for id in matching {
            match self.trigger(&id, now, TriggerMode::Hook(completion)).await {
                Ok(true) => fired += 1,
                Ok(false) => {}
                Err(e) => warn!(task_id = %id, "Failed to record hook run: {e}"),
            }
        }
        if fired > 0 {
            info!(event = kind.as_str(), fired, "Hook tasks triggered");
        }
        fired
    }

    // ─── Trigger ────────────────────────────────────────────

    /// Record the run, recompute `next_run`, then hand off to the runner.
    ///
    /// Returns `Ok(false)` when the task vanished or is no longer due.
    async fn trigger<Tz: TimeZone>(
        &self,
        id: &str,
        now: &DateTime<Tz>,
        mode: TriggerMode<'_>,
    ) -> anyhow::Result<bool> {
        let now_utc = now.with_timezone(&Utc);
        let only_if_due = matches!(mode, TriggerMode::Due);
        let mut fire = false;
        let updated = self
            .store
            .update(id, |task| {
                if only_if_due && !is_due(task, now_utc) {
                    return;
                }
                fire = true;
                task.last_run = Some(now_utc);
                if task.schedule.schedule_type == ScheduleType::Once {
                    task.enabled = false;
                }
                task.next_run = next_run(task, now);
            })
            .await?;

        let task = match updated {
            Some(task) if fire => task,
            _ => return Ok(false),
        };

        let (prompt, quiet) = match task.schedule.resolve() {
            Some(Schedule::Heartbeat {
                suppress_trivial, ..
            }) => (heartbeat_prompt(&task.prompt), suppress_trivial),
            _ => (task.prompt.clone(), false),
        };
        let (prompt, hook) = match mode {
            TriggerMode::Hook(Some(completion)) => (with_session_context(&prompt, completion), true),
            TriggerMode::Hook(None) => (prompt, true),
            TriggerMode::Due | TriggerMode::Manual => (prompt, false),
        };

        let request = build_request(
            self.assistants.as_ref(),
            SessionSpec {
                title: task.name.clone(),
                prompt,
                cwd: task.cwd.clone(),
                assistant_id: task.assistant_id.clone(),
                quiet,
                correlation: Correlation::Task {
                    task_id: task.id.clone(),
                    hook,
                },
            },
        );
        info!(task_id = %task.id, name = %task.name, next_run = ?task.next_run, "Triggering task");
        if let Err(e) = self.runner.start(request).await {
            warn!(task_id = %task.id, "Failed to start task session: {e}");
        }
        Ok(true)
    }
}

fn is_due(task: &ScheduledTask, now: DateTime<Utc>) -> bool {
    task.enabled && !task.is_hook() && task.next_run.is_some_and(|next| next <= now)
}

/// Whether a hook filter accepts the event's session context.
///
/// Events without session context (startup) accept every filter.
fn filter_matches(filter: &HookFilter, completion: Option<&SessionCompletion>) -> bool {
    let Some(completion) = completion else {
        return true;
    };
    let assistant_ok = filter
        .assistant_id
        .as_deref()
        .is_none_or(|wanted| completion.assistant_id.as_deref() == Some(wanted));
    if !assistant_ok {
        return false;
    }
    if filter.error_only && !completion.is_error() {
        return false;
    }
    match &filter.title_pattern {
        Some(pattern) => match Regex::new(pattern) {
            Ok(re) => re.is_match(&completion.title),
            Err(e) => {
                warn!(pattern = %pattern, "Invalid hook title pattern: {e}");
                false
            }
        },
        None => true,
    }
}

fn with_session_context(prompt: &str, completion: &SessionCompletion) -> String {
    let status = if completion.is_error() { "error" } else { "success" };
    format!(
        "{prompt}\n\n---\nTriggered by session \"{}\" ({status}).\nLast message:\n{}",
        completion.title,
        tail_chars(&completion.last_message, HOOK_CONTEXT_CHARS)
    )
}

fn tail_chars(text: &str, max: usize) -> &str {
    let count = text.chars().count();
    if count <= max {
        return text;
    }
    let skip = count - max;
    text.char_indices()
        .nth(skip)
        .map(|(i, _)| &text[i..])
        .unwrap_or(text)
}

fn validate_name_and_prompt(name: &str, prompt: &str) -> anyhow::Result<()> {
    if name.trim().is_empty() {
        anyhow::bail!("Task name is required");
    }
    if prompt.trim().is_empty() {
        anyhow::bail!("Task prompt is required");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use autopilot_types::{
        AssistantDirectory, IntervalUnit, ScheduleConfig, SessionRequest, SessionStatus,
    };
    use chrono::FixedOffset;

    #[derive(Default)]
    struct RecordingRunner {
        requests: Mutex<Vec<SessionRequest>>,
        reject: bool,
    }

    impl RecordingRunner {
        fn requests(&self) -> Vec<SessionRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl SessionRunner for RecordingRunner {
        async fn start(&self, request: SessionRequest) -> anyhow::Result<()> {
            self.requests.lock().unwrap().push(request);
            if self.reject {
                anyhow::bail!("no runner registered");
            }
            Ok(())
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        store: Arc<TaskStore>,
        runner: Arc<RecordingRunner>,
        scheduler: Arc<TaskScheduler>,
    }

    fn fixture_with(runner: RecordingRunner) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(TaskStore::open(dir.path().join("tasks.json")));
        let runner = Arc::new(runner);
        let scheduler = Arc::new(TaskScheduler::new(
            store.clone(),
            runner.clone(),
            Arc::new(AssistantDirectory::default()),
        ));
        Fixture {
            _dir: dir,
            store,
            runner,
            scheduler,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(RecordingRunner::default())
    }

    fn new_task(name: &str, schedule: ScheduleConfig) -> NewTask {
        NewTask {
            name: name.into(),
            prompt: format!("do {name}"),
            cwd: None,
            assistant_id: None,
            schedule,
            enabled: true,
        }
    }

    fn at(hour: u32, minute: u32) -> DateTime<FixedOffset> {
        FixedOffset::east_opt(0)
            .unwrap()
            .with_ymd_and_hms(2030, 1, 7, hour, minute, 0)
            .unwrap()
    }

    async fn make_due(f: &Fixture, id: &str, when: DateTime<FixedOffset>) {
        f.store
            .update(id, |t| t.next_run = Some(when.with_timezone(&Utc)))
            .await
            .unwrap();
    }

    fn completion(title: &str, status: SessionStatus, correlation: Correlation) -> SessionCompletion {
        SessionCompletion {
            session_id: "s-1".into(),
            title: title.into(),
            assistant_id: Some("main".into()),
            last_message: "all tests passed".into(),
            status,
            correlation,
        }
    }

    fn plain_correlation() -> Correlation {
        Correlation::Task {
            task_id: "other".into(),
            hook: false,
        }
    }

    #[tokio::test]
    async fn test_add_task_computes_next_run() {
        let f = fixture();
        let task = f
            .scheduler
            .add_task(new_task("digest", ScheduleConfig::interval(1, IntervalUnit::Hours)))
            .await
            .unwrap();
        assert!(task.next_run.unwrap() > Utc::now());
        assert_eq!(f.store.get(&task.id).await.unwrap().next_run, task.next_run);
    }

    #[tokio::test]
    async fn test_add_task_rejects_blank_prompt() {
        let f = fixture();
        let mut new = new_task("x", ScheduleConfig::interval(1, IntervalUnit::Hours));
        new.prompt = "   ".into();
        assert!(f.scheduler.add_task(new).await.is_err());
        assert!(f.scheduler.list_tasks().await.is_empty());
    }

    #[tokio::test]
    async fn test_due_task_fires_once_per_due_instant() {
        let f = fixture();
        let task = f
            .scheduler
            .add_task(new_task("digest", ScheduleConfig::interval(10, IntervalUnit::Minutes)))
            .await
            .unwrap();
        make_due(&f, &task.id, at(9, 0)).await;

        assert_eq!(f.scheduler.run_due_tasks_at(&at(9, 0)).await, 1);
        assert_eq!(f.scheduler.run_due_tasks_at(&at(9, 0)).await, 0);

        let stored = f.store.get(&task.id).await.unwrap();
        assert_eq!(stored.last_run, Some(at(9, 0).with_timezone(&Utc)));
        assert_eq!(stored.next_run, Some(at(9, 10).with_timezone(&Utc)));

        let requests = f.runner.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].title, "digest");
        assert_eq!(
            requests[0].correlation,
            Correlation::Task {
                task_id: task.id.clone(),
                hook: false
            }
        );
    }

    #[tokio::test]
    async fn test_not_yet_due_is_left_alone() {
        let f = fixture();
        let task = f
            .scheduler
            .add_task(new_task("later", ScheduleConfig::interval(10, IntervalUnit::Minutes)))
            .await
            .unwrap();
        make_due(&f, &task.id, at(9, 1)).await;
        assert_eq!(f.scheduler.run_due_tasks_at(&at(9, 0)).await, 0);
        assert!(f.runner.requests().is_empty());
    }

    #[tokio::test]
    async fn test_once_task_disabled_after_firing() {
        let f = fixture();
        let when = Utc::now() + chrono::Duration::hours(1);
        let task = f
            .scheduler
            .add_task(new_task("reminder", ScheduleConfig::once(when)))
            .await
            .unwrap();
        assert_eq!(task.next_run, Some(when));

        let fire_at = when.with_timezone(&FixedOffset::east_opt(0).unwrap());
        assert_eq!(f.scheduler.run_due_tasks_at(&fire_at).await, 1);

        let stored = f.store.get(&task.id).await.unwrap();
        assert!(!stored.enabled);
        assert_eq!(stored.next_run, None);
        assert_eq!(f.scheduler.run_due_tasks_at(&fire_at).await, 0);
    }

    #[tokio::test]
    async fn test_disabled_and_hook_tasks_not_polled() {
        let f = fixture();
        let disabled = f
            .scheduler
            .add_task(new_task("off", ScheduleConfig::interval(5, IntervalUnit::Minutes)))
            .await
            .unwrap();
        make_due(&f, &disabled.id, at(8, 0)).await;
        f.store.update(&disabled.id, |t| t.enabled = false).await.unwrap();

        let hook = f
            .scheduler
            .add_task(new_task("hook", ScheduleConfig::hook(HookEventKind::Startup, None)))
            .await
            .unwrap();
        assert!(hook.next_run.is_none());
        make_due(&f, &hook.id, at(8, 0)).await;

        assert_eq!(f.scheduler.run_due_tasks_at(&at(9, 0)).await, 0);
    }

    #[tokio::test]
    async fn test_due_tasks_fire_in_store_order() {
        let f = fixture();
        let mut ids = Vec::new();
        for name in ["first", "second", "third"] {
            let task = f
                .scheduler
                .add_task(new_task(name, ScheduleConfig::interval(5, IntervalUnit::Minutes)))
                .await
                .unwrap();
            make_due(&f, &task.id, at(8, 0)).await;
            ids.push(task.id);
        }
        assert_eq!(f.scheduler.run_due_tasks_at(&at(9, 0)).await, 3);
        let titles: Vec<_> = f.runner.requests().into_iter().map(|r| r.title).collect();
        assert_eq!(titles, vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn test_rejected_start_still_advances_schedule() {
        let f = fixture_with(RecordingRunner {
            reject: true,
            ..Default::default()
        });
        let task = f
            .scheduler
            .add_task(new_task("digest", ScheduleConfig::interval(10, IntervalUnit::Minutes)))
            .await
            .unwrap();
        make_due(&f, &task.id, at(9, 0)).await;

        assert_eq!(f.scheduler.run_due_tasks_at(&at(9, 0)).await, 1);
        let stored = f.store.get(&task.id).await.unwrap();
        assert_eq!(stored.next_run, Some(at(9, 10).with_timezone(&Utc)));
    }

    #[tokio::test]
    async fn test_heartbeat_prompt_and_quiet_flag() {
        let f = fixture();
        let task = f
            .scheduler
            .add_task(new_task("pulse", ScheduleConfig::heartbeat(30, true)))
            .await
            .unwrap();
        make_due(&f, &task.id, at(9, 0)).await;
        f.scheduler.run_due_tasks_at(&at(9, 0)).await;

        let requests = f.runner.requests();
        let request = &requests[0];
        assert!(request.quiet);
        assert!(request.prompt.contains("do pulse"));
        assert!(request.prompt.contains(autopilot_session::heartbeat::HEARTBEAT_OK));
    }

    #[tokio::test]
    async fn test_update_recomputes_next_run() {
        let f = fixture();
        let task = f
            .scheduler
            .add_task(new_task("digest", ScheduleConfig::interval(10, IntervalUnit::Minutes)))
            .await
            .unwrap();

        let disabled = f.scheduler.set_enabled(&task.id, false).await.unwrap().unwrap();
        assert!(disabled.next_run.is_none());

        let enabled = f.scheduler.set_enabled(&task.id, true).await.unwrap().unwrap();
        assert!(enabled.next_run.is_some());

        let mut broken = ScheduleConfig::interval(10, IntervalUnit::Minutes);
        broken.interval_unit = None;
        let patched = f
            .scheduler
            .update_task(
                &task.id,
                TaskPatch {
                    schedule: Some(broken),
                    ..Default::default()
                },
            )
            .await
            .unwrap()
            .unwrap();
        assert!(patched.next_run.is_none());

        assert!(f.scheduler.update_task("missing", TaskPatch::default()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_run_task_now_ignores_schedule() {
        let f = fixture();
        let task = f
            .scheduler
            .add_task(new_task("manual", ScheduleConfig::daily("03:00", None)))
            .await
            .unwrap();
        f.scheduler.set_enabled(&task.id, false).await.unwrap();

        assert!(f.scheduler.run_task_now(&task.id).await.unwrap());
        assert!(!f.scheduler.run_task_now("missing").await.unwrap());
        assert_eq!(f.runner.requests().len(), 1);
        assert!(f.store.get(&task.id).await.unwrap().last_run.is_some());
    }

    #[tokio::test]
    async fn test_delete_task() {
        let f = fixture();
        let task = f
            .scheduler
            .add_task(new_task("gone", ScheduleConfig::interval(1, IntervalUnit::Days)))
            .await
            .unwrap();
        assert!(f.scheduler.delete_task(&task.id).await.unwrap());
        assert!(f.scheduler.get_task(&task.id).await.is_none());
        assert!(!f.scheduler.delete_task(&task.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_startup_hook_fires_and_ignores_session_filters() {
        let f = fixture();
        let filter = HookFilter {
            error_only: true,
            ..Default::default()
        };
        f.scheduler
            .add_task(new_task(
                "boot",
                ScheduleConfig::hook(HookEventKind::Startup, Some(filter)),
            ))
            .await
            .unwrap();
        f.scheduler
            .add_task(new_task(
                "after",
                ScheduleConfig::hook(HookEventKind::SessionComplete, None),
            ))
            .await
            .unwrap();

        assert_eq!(f.scheduler.dispatch_hook_at(&HookEvent::Startup, &at(9, 0)).await, 1);
        let requests = f.runner.requests();
        assert_eq!(requests[0].title, "boot");
        assert!(matches!(
            requests[0].correlation,
            Correlation::Task { hook: true, .. }
        ));
    }

    #[tokio::test]
    async fn test_session_complete_filters() {
        let f = fixture();
        let add = |name: &str, filter: HookFilter| {
            new_task(
                name,
                ScheduleConfig::hook(HookEventKind::SessionComplete, Some(filter)),
            )
        };
        f.scheduler
            .add_task(add(
                "on-error",
                HookFilter {
                    error_only: true,
                    ..Default::default()
                },
            ))
            .await
            .unwrap();
        f.scheduler
            .add_task(add(
                "on-other-assistant",
                HookFilter {
                    assistant_id: Some("coder".into()),
                    ..Default::default()
                },
            ))
            .await
            .unwrap();
        f.scheduler
            .add_task(add(
                "on-nightly",
                HookFilter {
                    title_pattern: Some("^nightly".into()),
                    ..Default::default()
                },
            ))
            .await
            .unwrap();
        f.scheduler
            .add_task(add(
                "bad-pattern",
                HookFilter {
                    title_pattern: Some("(".into()),
                    ..Default::default()
                },
            ))
            .await
            .unwrap();

        let ok = HookEvent::SessionComplete {
            completion: completion("nightly build", SessionStatus::Success, plain_correlation()),
        };
        assert_eq!(f.scheduler.dispatch_hook_at(&ok, &at(9, 0)).await, 1);

        let failed = HookEvent::SessionComplete {
            completion: completion("nightly build", SessionStatus::Error, plain_correlation()),
        };
        assert_eq!(f.scheduler.dispatch_hook_at(&failed, &at(9, 1)).await, 2);

        let titles: Vec<_> = f.runner.requests().into_iter().map(|r| r.title).collect();
        assert_eq!(titles, vec!["on-nightly", "on-error", "on-nightly"]);
        let last = f.runner.requests().pop().unwrap();
        assert!(last.prompt.contains("Triggered by session \"nightly build\" (error)"));
        assert!(last.prompt.contains("all tests passed"));
    }

    #[tokio::test]
    async fn test_hook_started_sessions_do_not_retrigger_hooks() {
        let f = fixture();
        f.scheduler
            .add_task(new_task(
                "echo",
                ScheduleConfig::hook(HookEventKind::SessionComplete, None),
            ))
            .await
            .unwrap();

        let own = HookEvent::SessionComplete {
            completion: completion(
                "echo",
                SessionStatus::Success,
                Correlation::Task {
                    task_id: "echo".into(),
                    hook: true,
                },
            ),
        };
        assert_eq!(f.scheduler.dispatch_hook_at(&own, &at(9, 0)).await, 0);
    }

    #[tokio::test]
    async fn test_disabled_hook_task_ignored() {
        let f = fixture();
        let task = f
            .scheduler
            .add_task(new_task("boot", ScheduleConfig::hook(HookEventKind::Startup, None)))
            .await
            .unwrap();
        f.scheduler.set_enabled(&task.id, false).await.unwrap();
        assert_eq!(f.scheduler.dispatch_hook_at(&HookEvent::Startup, &at(9, 0)).await, 0);
    }

    #[tokio::test]
    async fn test_registered_hooks_receive_registry_events() {
        let f = fixture();
        f.scheduler
            .add_task(new_task("boot", ScheduleConfig::hook(HookEventKind::Startup, None)))
            .await
            .unwrap();
        let registry = HookRegistry::new();
        f.scheduler.register_hooks(&registry).await;

        registry.dispatch(HookEvent::Startup).await;
        assert_eq!(f.runner.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_run_loop_scans_immediately_and_stops_on_cancel() {
        let f = fixture();
        let task = f
            .scheduler
            .add_task(new_task("digest", ScheduleConfig::interval(10, IntervalUnit::Minutes)))
            .await
            .unwrap();
        f.store
            .update(&task.id, |t| t.next_run = Some(Utc::now() - chrono::Duration::minutes(1)))
            .await
            .unwrap();

        let shutdown = CancellationToken::new();
        let scheduler = Arc::new(
            TaskScheduler::new(
                f.store.clone(),
                f.runner.clone(),
                Arc::new(AssistantDirectory::default()),
            )
            .with_poll_interval(Duration::from_secs(3600)),
        );
        let handle = tokio::spawn(scheduler.run(shutdown.clone()));

        for _ in 0..100 {
            if !f.runner.requests().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(f.runner.requests().len(), 1);

        shutdown.cancel();
        handle.await.unwrap();
    }

    #[test]
    fn test_tail_chars() {
        assert_eq!(tail_chars("abcdef", 3), "def");
        assert_eq!(tail_chars("ab", 3), "ab");
        assert_eq!(tail_chars("héllo", 4), "éllo");
    }
}

//! Goal execution engine: triggers runs, interprets completions and owns the
//! per-goal timer table.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use autopilot_config::GoalsConfig;
use autopilot_session::{AssistantConfigProvider, SessionRunner, SessionSpec, build_request};
use autopilot_storage::GoalStore;
use autopilot_types::{
    Correlation, GoalStatus, LongTermGoal, ProgressEntry, SessionCompletion, SessionStatus,
};

use crate::prompt::{build_prompt, parse_reply, session_title};
use crate::{GoalPatch, NewGoal};

/// A pending run for one goal.
struct Timer {
    token: u64,
    /// Persisted `next_run_at` this timer was armed for.
    at: DateTime<Utc>,
    /// Taken by whichever happens first: the elapsed sleep (the timer
    /// fires) or a cancel (the task is aborted). A firing timer is never
    /// aborted.
    settled: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl Timer {
    fn cancel(self) {
        if !self.settled.swap(true, Ordering::SeqCst) {
            self.handle.abort();
        }
    }
}

/// What a completion decided for its goal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Decision {
    /// Goal is not active or the run was superseded; log only.
    None,
    Completed,
    Abandoned,
    Paused,
    RunAt(DateTime<Utc>),
}

/// Who asked for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Fire {
    /// Explicit [`GoalEngine::trigger`]; runs whenever the goal is active.
    Manual,
    /// A timer; runs only while the goal still has a pending run and no
    /// session of this engine is in flight for it.
    Scheduled,
}

/// Outcome of claiming a run at trigger time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Claim {
    Skip,
    Capped,
    Run,
}

/// Drives [`LongTermGoal`]s through repeated sessions.
///
/// At most one timer exists per goal. Arming replaces the previous timer,
/// and pause/delete cancel it before touching the store. A timer claims its
/// run inside the store update that clears `next_run_at`, so a replaced
/// timer that was already firing cannot start a second session.
pub struct GoalEngine {
    store: Arc<GoalStore>,
    runner: Arc<dyn SessionRunner>,
    assistants: Arc<dyn AssistantConfigProvider>,
    config: GoalsConfig,
    timers: Mutex<HashMap<String, Timer>>,
    /// Goals with a session started by this engine and not yet completed.
    running: Mutex<HashSet<String>>,
    next_token: AtomicU64,
    me: Weak<GoalEngine>,
}

impl GoalEngine {
    pub fn new(
        store: Arc<GoalStore>,
        runner: Arc<dyn SessionRunner>,
        assistants: Arc<dyn AssistantConfigProvider>,
        config: GoalsConfig,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            store,
            runner,
            assistants,
            config,
            timers: Mutex::new(HashMap::new()),
            running: Mutex::new(HashSet::new()),
            next_token: AtomicU64::new(0),
            me: me.clone(),
        })
    }

    // ─── CRUD ───────────────────────────────────────────────

    /// Persist a new active goal. The caller starts the first run.
    pub async fn create_goal(&self, new: NewGoal) -> anyhow::Result<LongTermGoal> {
        if new.name.trim().is_empty() {
            anyhow::bail!("Goal name is required");
        }
        if new.description.trim().is_empty() {
            anyhow::bail!("Goal description is required");
        }
        if new.max_runs == 0 {
            anyhow::bail!("max_runs must be at least 1");
        }
        let now = Utc::now();
        let goal = LongTermGoal {
            id: uuid::Uuid::new_v4().to_string(),
            name: new.name,
            description: new.description,
            assistant_id: new.assistant_id,
            cwd: new.cwd,
            retry_interval: new.retry_interval,
            max_runs: new.max_runs,
            status: GoalStatus::Active,
            total_runs: 0,
            consecutive_errors: 0,
            next_run_at: None,
            progress_log: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        self.store.insert(goal.clone()).await?;
        info!(goal_id = %goal.id, name = %goal.name, max_runs = goal.max_runs, "Goal created");
        Ok(goal)
    }

    /// Edit descriptive and control fields. A pending run is re-armed at its
    /// persisted time.
    pub async fn update_goal(&self, id: &str, patch: GoalPatch) -> anyhow::Result<Option<LongTermGoal>> {
        if patch.max_runs == Some(0) {
            anyhow::bail!("max_runs must be at least 1");
        }
        if patch.name.as_deref().is_some_and(|n| n.trim().is_empty()) {
            anyhow::bail!("Goal name is required");
        }
        let updated = self
            .store
            .update(id, |goal| {
                if let Some(name) = patch.name {
                    goal.name = name;
                }
                if let Some(description) = patch.description {
                    goal.description = description;
                }
                if let Some(assistant_id) = patch.assistant_id {
                    goal.assistant_id = assistant_id;
                }
                if let Some(cwd) = patch.cwd {
                    goal.cwd = cwd;
                }
                if let Some(retry_interval) = patch.retry_interval {
                    goal.retry_interval = retry_interval;
                }
                if let Some(max_runs) = patch.max_runs {
                    goal.max_runs = max_runs;
                }
                goal.updated_at = Utc::now();
            })
            .await?;
        if let Some(goal) = &updated {
            if goal.status == GoalStatus::Active {
                if let Some(at) = goal.next_run_at {
                    self.arm(&goal.id, at, delay_until(at, Utc::now()));
                }
            }
            info!(goal_id = %goal.id, "Goal updated");
        }
        Ok(updated)
    }

    /// Suspend a goal: cancel its timer and forget the pending run.
    pub async fn pause_goal(&self, id: &str) -> anyhow::Result<Option<LongTermGoal>> {
        self.cancel_timer(id);
        let paused = self
            .store
            .update(id, |goal| {
                goal.status = GoalStatus::Paused;
                goal.next_run_at = None;
                goal.updated_at = Utc::now();
            })
            .await?;
        if paused.is_some() {
            info!(goal_id = %id, "Goal paused");
        }
        Ok(paused)
    }

    /// Reactivate a goal and fire a run on the next tick.
    ///
    /// Works from any status, including an active goal left without a
    /// pending run by a crash.
    pub async fn resume_goal(&self, id: &str) -> anyhow::Result<Option<LongTermGoal>> {
        let resumed = queue_run(&self.store, id).await?;
        if let Some(goal) = &resumed {
            if goal.total_runs >= goal.max_runs {
                warn!(goal_id = %id, "Resumed goal is already at max_runs, raise the cap to continue");
            }
            if let Some(at) = goal.next_run_at {
                self.arm(id, at, Duration::ZERO);
            }
            info!(goal_id = %id, "Goal resumed");
        }
        Ok(resumed)
    }

    /// Cancel the goal's timer, then remove it.
    pub async fn delete_goal(&self, id: &str) -> anyhow::Result<bool> {
        self.cancel_timer(id);
        self.running().remove(id);
        let removed = self.store.remove(id).await?;
        if removed {
            info!(goal_id = %id, "Goal deleted");
        }
        Ok(removed)
    }

    pub async fn list_goals(&self) -> Vec<LongTermGoal> {
        self.store.list().await
    }

    pub async fn get_goal(&self, id: &str) -> Option<LongTermGoal> {
        self.store.get(id).await
    }

    // ─── Runs ───────────────────────────────────────────────

    /// Start a run now, replacing any pending timer for the goal.
    ///
    /// Returns `false` when the goal is missing, not active, or already at
    /// its cap (which marks it abandoned).
    pub async fn trigger(&self, id: &str) -> anyhow::Result<bool> {
        self.cancel_timer(id);
        self.fire(id, Fire::Manual).await
    }

    async fn fire(&self, id: &str, mode: Fire) -> anyhow::Result<bool> {
        let mut claim = Claim::Skip;
        let claimed = self
            .store
            .update(id, |goal| {
                if goal.status != GoalStatus::Active {
                    return;
                }
                let mut running = self.running();
                if mode == Fire::Scheduled
                    && (goal.next_run_at.is_none() || running.contains(id))
                {
                    return;
                }
                goal.next_run_at = None;
                if goal.total_runs >= goal.max_runs {
                    goal.status = GoalStatus::Abandoned;
                    claim = Claim::Capped;
                    return;
                }
                goal.total_runs += 1;
                running.insert(id.to_string());
                claim = Claim::Run;
            })
            .await;
        let goal = match claimed {
            Ok(goal) => goal,
            Err(e) => {
                if claim == Claim::Run {
                    self.running().remove(id);
                }
                return Err(e.into());
            }
        };

        let goal = match (goal, claim) {
            (Some(goal), Claim::Run) => goal,
            (Some(goal), Claim::Capped) => {
                info!(goal_id = %id, runs = goal.total_runs, "Goal reached max_runs, abandoned");
                return Ok(false);
            }
            (Some(_), Claim::Skip) => {
                debug!(goal_id = %id, "Goal is not active or has no pending run, skipping");
                return Ok(false);
            }
            (None, _) => {
                debug!(goal_id = %id, "Goal no longer exists, skipping run");
                return Ok(false);
            }
        };

        let run = goal.total_runs;
        let request = build_request(
            self.assistants.as_ref(),
            SessionSpec {
                title: session_title(&goal.name, run),
                prompt: build_prompt(&goal, self.config.progress_window),
                cwd: goal.cwd.clone(),
                assistant_id: goal.assistant_id.clone(),
                quiet: false,
                correlation: Correlation::Goal {
                    goal_id: goal.id.clone(),
                    run,
                },
            },
        );
        let session_id = request.session_id.clone();
        let title = request.title.clone();
        let assistant_id = request.assistant_id.clone();
        info!(goal_id = %goal.id, run, max_runs = goal.max_runs, "Triggering goal run");

        if let Err(e) = self.runner.start(request).await {
            warn!(goal_id = %goal.id, run, "Failed to start goal session: {e}");
            // Count the rejected start as a failed run so the retry and
            // circuit breaker rules apply.
            let failed = SessionCompletion {
                session_id,
                title,
                assistant_id,
                last_message: format!("Failed to start session: {e}"),
                status: SessionStatus::Error,
                correlation: Correlation::Goal {
                    goal_id: goal.id.clone(),
                    run,
                },
            };
            self.handle_completion(&failed).await?;
        }
        Ok(true)
    }

    /// Record a finished goal session and decide what happens next.
    ///
    /// Completions for other correlations are ignored.
    pub async fn handle_completion(&self, completion: &SessionCompletion) -> anyhow::Result<()> {
        let (goal_id, run) = match &completion.correlation {
            Correlation::Goal { goal_id, run } => (goal_id.as_str(), *run),
            Correlation::Task { .. } => return Ok(()),
        };

        let is_error = completion.is_error();
        let mut reply = parse_reply(&completion.last_message, self.config.summary_excerpt_chars);
        if is_error {
            reply.is_complete = false;
        }
        let now = Utc::now();
        let threshold = self.config.retry_threshold;
        let mut decision = Decision::None;

        let updated = self
            .store
            .update(goal_id, |goal| {
                goal.progress_log.push(ProgressEntry {
                    session_id: completion.session_id.clone(),
                    run,
                    run_at: now,
                    summary: reply.summary,
                    is_complete: reply.is_complete,
                    next_steps: reply.next_steps,
                    is_error,
                });
                if goal.status != GoalStatus::Active || run != goal.total_runs {
                    return;
                }
                decision = decide(goal, reply.is_complete, is_error, threshold, now);
            })
            .await?;

        let Some(goal) = updated else {
            self.running().remove(goal_id);
            warn!(goal_id = %goal_id, "Completion for unknown goal");
            return Ok(());
        };
        if run == goal.total_runs {
            self.running().remove(goal_id);
        }

        match decision {
            Decision::None => {
                debug!(goal_id = %goal.id, run, status = ?goal.status, "Completion logged without scheduling");
            }
            Decision::Completed => info!(goal_id = %goal.id, runs = goal.total_runs, "Goal completed"),
            Decision::Abandoned => {
                info!(goal_id = %goal.id, runs = goal.total_runs, "Goal reached max_runs without completing, abandoned")
            }
            Decision::Paused => warn!(
                goal_id = %goal.id,
                errors = goal.consecutive_errors,
                "Goal paused after consecutive errors"
            ),
            Decision::RunAt(at) => {
                let delay = delay_until(at, now);
                debug!(goal_id = %goal.id, delay_secs = delay.as_secs(), "Next goal run scheduled");
                self.arm(&goal.id, at, delay);
            }
        }
        Ok(())
    }

    // ─── Restart recovery ───────────────────────────────────

    /// Arm timers for every active goal with a persisted pending run.
    ///
    /// Past runs fire on the next tick, future ones after the remaining
    /// delay. Active goals without `next_run_at` stay dormant until resumed.
    pub async fn resume_active_goals(&self) -> usize {
        self.resume_active_goals_at(Utc::now()).await
    }

    pub async fn resume_active_goals_at(&self, now: DateTime<Utc>) -> usize {
        self.arm_pending(now, false).await
    }

    /// Reconcile timers with the store, for goals scheduled or paused by
    /// another process. A goal whose timer already targets its persisted
    /// `next_run_at` is left alone; a changed time re-arms it, and a goal
    /// that is no longer active loses its timer.
    pub async fn sync_pending(&self) -> usize {
        self.arm_pending(Utc::now(), true).await
    }

    async fn arm_pending(&self, now: DateTime<Utc>, sync: bool) -> usize {
        let mut armed = 0;
        for goal in self.store.list().await {
            let pending = match goal.status {
                GoalStatus::Active => goal.next_run_at,
                _ => None,
            };
            let Some(at) = pending else {
                if goal.status != GoalStatus::Active {
                    if sync && self.has_timer(&goal.id) {
                        debug!(goal_id = %goal.id, status = ?goal.status, "Goal is no longer active, dropping its timer");
                        self.cancel_timer(&goal.id);
                    }
                } else if !sync {
                    debug!(goal_id = %goal.id, "Active goal has no pending run, leaving dormant");
                }
                continue;
            };
            if sync && self.armed_at(&goal.id) == Some(at) {
                continue;
            }
            self.arm(&goal.id, at, delay_until(at, now));
            armed += 1;
        }
        if armed > 0 {
            info!(armed, "Pending goal runs armed");
        }
        armed
    }

    // ─── Timers ─────────────────────────────────────────────

    fn timers(&self) -> MutexGuard<'_, HashMap<String, Timer>> {
        self.timers.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn running(&self) -> MutexGuard<'_, HashSet<String>> {
        self.running.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Whether a run is pending in this process for the goal.
    pub fn has_timer(&self, id: &str) -> bool {
        self.timers().contains_key(id)
    }

    fn armed_at(&self, id: &str) -> Option<DateTime<Utc>> {
        self.timers().get(id).map(|t| t.at)
    }

    /// Schedule the run persisted for `at` after `delay`, replacing any
    /// existing timer.
    fn arm(&self, id: &str, at: DateTime<Utc>, delay: Duration) {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let settled = Arc::new(AtomicBool::new(false));
        let engine = self.me.clone();
        let goal_id = id.to_string();
        let flag = settled.clone();

        // Hold the table while spawning so the timer cannot finish before it
        // is registered.
        let mut timers = self.timers();
        let handle = tokio::spawn(async move {
            if delay.is_zero() {
                tokio::task::yield_now().await;
            } else {
                tokio::time::sleep(delay).await;
            }
            if flag.swap(true, Ordering::SeqCst) {
                return;
            }
            if let Some(engine) = engine.upgrade() {
                engine.fire_timer(&goal_id, token).await;
            }
        });
        let previous = timers.insert(
            id.to_string(),
            Timer {
                token,
                at,
                settled,
                handle,
            },
        );
        drop(timers);
        if let Some(previous) = previous {
            previous.cancel();
        }
    }

    async fn fire_timer(&self, id: &str, token: u64) {
        if let Err(e) = self.fire(id, Fire::Scheduled).await {
            warn!(goal_id = %id, "Goal run failed: {e}");
        }
        let mut timers = self.timers();
        if timers.get(id).is_some_and(|t| t.token == token) {
            timers.remove(id);
        }
    }

    fn cancel_timer(&self, id: &str) {
        let removed = self.timers().remove(id);
        if let Some(timer) = removed {
            timer.cancel();
            debug!(goal_id = %id, "Goal timer cancelled");
        }
    }
}

/// Mark a goal active with a run due now, without arming a timer.
///
/// Resets the error counter. A running engine picks the run up on its next
/// [`GoalEngine::sync_pending`].
pub async fn queue_run(store: &GoalStore, id: &str) -> anyhow::Result<Option<LongTermGoal>> {
    let now = Utc::now();
    let queued = store
        .update(id, |goal| {
            goal.status = GoalStatus::Active;
            goal.consecutive_errors = 0;
            goal.next_run_at = Some(now);
            goal.updated_at = now;
        })
        .await?;
    Ok(queued)
}

/// Status transition after a run, applied in order: completion, cap,
/// error circuit breaker, then the next run.
fn decide(
    goal: &mut LongTermGoal,
    is_complete: bool,
    is_error: bool,
    threshold: u32,
    now: DateTime<Utc>,
) -> Decision {
    if is_complete {
        goal.status = GoalStatus::Completed;
        goal.next_run_at = None;
        return Decision::Completed;
    }
    if goal.total_runs >= goal.max_runs {
        goal.status = GoalStatus::Abandoned;
        goal.next_run_at = None;
        return Decision::Abandoned;
    }
    if is_error {
        goal.consecutive_errors += 1;
    } else {
        goal.consecutive_errors = 0;
    }
    if goal.consecutive_errors >= threshold {
        goal.status = GoalStatus::Paused;
        goal.next_run_at = None;
        return Decision::Paused;
    }
    let at = if goal.retry_interval <= 0 {
        now
    } else {
        chrono::Duration::try_minutes(goal.retry_interval)
            .and_then(|d| now.checked_add_signed(d))
            .unwrap_or(now)
    };
    goal.next_run_at = Some(at);
    Decision::RunAt(at)
}

fn delay_until(at: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (at - now).to_std().unwrap_or(Duration::ZERO)
}

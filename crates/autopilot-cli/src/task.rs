//! `autopilot task ...`

use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, Local, Utc};
use clap::{ArgGroup, Args, Subcommand};
use tokio::sync::mpsc;

use autopilot_config::AutopilotConfig;
use autopilot_cron::{NewTask, TaskScheduler};
use autopilot_session::ProcessSessionRunner;
use autopilot_storage::TaskStore;
use autopilot_types::{
    HookEventKind, HookFilter, IntervalUnit, ScheduleConfig, ScheduleType, ScheduledTask,
    parse_clock_time,
};

#[derive(Subcommand)]
pub enum TaskCommand {
    /// Create a scheduled task
    Add(AddTask),
    /// List all tasks
    List,
    /// Delete a task
    Remove { id: String },
    /// Enable a task and recompute its next run
    Enable { id: String },
    /// Disable a task
    Disable { id: String },
    /// Run a task now and print the session's final message
    Run { id: String },
}

#[derive(Args)]
#[command(group(
    ArgGroup::new("schedule")
        .required(true)
        .args(["at", "every", "daily", "heartbeat", "hook"])
))]
pub struct AddTask {
    /// Task name
    name: String,

    /// Prompt sent to the assistant
    #[arg(short, long)]
    prompt: String,

    /// Assistant ID (defaults to the configured default)
    #[arg(long)]
    assistant: Option<String>,

    /// Working directory override
    #[arg(long)]
    cwd: Option<String>,

    /// Run once at an RFC 3339 timestamp
    #[arg(long)]
    at: Option<String>,

    /// Repeat every N units, e.g. 30m, 2h, 1d, 1w
    #[arg(long)]
    every: Option<String>,

    /// Run daily at HH:MM local time
    #[arg(long)]
    daily: Option<String>,

    /// Weekdays for --daily, 0 = Sunday (e.g. 1,2,3,4,5)
    #[arg(long, value_delimiter = ',', requires = "daily")]
    days: Vec<u8>,

    /// Heartbeat check-in every N minutes
    #[arg(long)]
    heartbeat: Option<u64>,

    /// Keep trivial heartbeat replies out of the info log
    #[arg(long, requires = "heartbeat")]
    quiet: bool,

    /// Fire on a lifecycle event: startup or session.complete
    #[arg(long)]
    hook: Option<String>,

    /// Only for sessions of this assistant
    #[arg(long, requires = "hook")]
    filter_assistant: Option<String>,

    /// Only for sessions whose title matches this regex
    #[arg(long, requires = "hook")]
    filter_title: Option<String>,

    /// Only for sessions that ended in error
    #[arg(long, requires = "hook")]
    error_only: bool,

    /// Create the task disabled
    #[arg(long)]
    disabled: bool,
}

pub async fn run(action: TaskCommand, config: &AutopilotConfig) -> anyhow::Result<()> {
    let dir = autopilot_config::ensure_config_dir()?;
    let (tx, mut completions) = mpsc::unbounded_channel();
    let runner = Arc::new(ProcessSessionRunner::new(config.runner.clone(), tx));
    let scheduler = TaskScheduler::new(
        Arc::new(TaskStore::open(autopilot_config::tasks_file_path(&dir))),
        runner,
        Arc::new(config.assistant_directory()),
    );

    match action {
        TaskCommand::Add(args) => {
            let schedule = schedule_from(&args)?;
            let task = scheduler
                .add_task(NewTask {
                    name: args.name,
                    prompt: args.prompt,
                    cwd: args.cwd,
                    assistant_id: args.assistant,
                    schedule,
                    enabled: !args.disabled,
                })
                .await?;
            println!("Created task {}", task.id);
            println!("  {}", describe(&task));
        }
        TaskCommand::List => {
            let tasks = scheduler.list_tasks().await;
            if tasks.is_empty() {
                println!("No tasks.");
            }
            for task in tasks {
                println!("{}  {}", task.id, describe(&task));
            }
        }
        TaskCommand::Remove { id } => {
            if !scheduler.delete_task(&id).await? {
                anyhow::bail!("Task {id} not found");
            }
            println!("Removed task {id}");
        }
        TaskCommand::Enable { id } => match scheduler.set_enabled(&id, true).await? {
            Some(task) => println!("Enabled: {}", describe(&task)),
            None => anyhow::bail!("Task {id} not found"),
        },
        TaskCommand::Disable { id } => match scheduler.set_enabled(&id, false).await? {
            Some(task) => println!("Disabled: {}", describe(&task)),
            None => anyhow::bail!("Task {id} not found"),
        },
        TaskCommand::Run { id } => {
            if !scheduler.run_task_now(&id).await? {
                anyhow::bail!("Task {id} not found");
            }
            let completion = completions
                .recv()
                .await
                .context("Session ended without reporting an outcome")?;
            println!("[{:?}] {}", completion.status, completion.title);
            println!("{}", completion.last_message);
        }
    }
    Ok(())
}

fn schedule_from(args: &AddTask) -> anyhow::Result<ScheduleConfig> {
    if let Some(at) = &args.at {
        let at = DateTime::parse_from_rfc3339(at)
            .with_context(|| format!("Invalid --at timestamp: {at}"))?
            .with_timezone(&Utc);
        return Ok(ScheduleConfig::once(at));
    }
    if let Some(every) = &args.every {
        let (value, unit) = parse_every(every)?;
        return Ok(ScheduleConfig::interval(value, unit));
    }
    if let Some(time) = &args.daily {
        if parse_clock_time(time).is_none() {
            anyhow::bail!("Invalid --daily time {time}, expected HH:MM");
        }
        let days = (!args.days.is_empty()).then(|| args.days.clone());
        return Ok(ScheduleConfig::daily(time, days));
    }
    if let Some(minutes) = args.heartbeat {
        if minutes == 0 {
            anyhow::bail!("--heartbeat must be at least 1 minute");
        }
        return Ok(ScheduleConfig::heartbeat(minutes, args.quiet));
    }
    if let Some(event) = &args.hook {
        let event = parse_hook_event(event)?;
        let filter = HookFilter {
            assistant_id: args.filter_assistant.clone(),
            title_pattern: args.filter_title.clone(),
            error_only: args.error_only,
        };
        let filter = (filter != HookFilter::default()).then_some(filter);
        return Ok(ScheduleConfig::hook(event, filter));
    }
    anyhow::bail!("A schedule is required: --at, --every, --daily, --heartbeat or --hook")
}

/// Parse `30m`, `2h`, `1d` or `1w`.
fn parse_every(s: &str) -> anyhow::Result<(u64, IntervalUnit)> {
    let s = s.trim();
    let split = s
        .find(|c: char| !c.is_ascii_digit())
        .with_context(|| format!("Missing unit in --every {s}, use m, h, d or w"))?;
    let (digits, unit) = s.split_at(split);
    let value: u64 = digits
        .parse()
        .with_context(|| format!("Invalid number in --every {s}"))?;
    if value == 0 {
        anyhow::bail!("--every must be greater than zero");
    }
    let unit = match unit {
        "m" | "min" | "minutes" => IntervalUnit::Minutes,
        "h" | "hours" => IntervalUnit::Hours,
        "d" | "days" => IntervalUnit::Days,
        "w" | "weeks" => IntervalUnit::Weeks,
        other => anyhow::bail!("Unknown unit {other:?} in --every, use m, h, d or w"),
    };
    Ok((value, unit))
}

fn parse_hook_event(s: &str) -> anyhow::Result<HookEventKind> {
    match s {
        "startup" => Ok(HookEventKind::Startup),
        "session.complete" => Ok(HookEventKind::SessionComplete),
        other => anyhow::bail!("Unknown hook event {other:?}, use startup or session.complete"),
    }
}

fn describe(task: &ScheduledTask) -> String {
    let state = if task.enabled { "on " } else { "off" };
    let next = task
        .next_run
        .map(|t| t.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "-".to_string());
    format!(
        "[{state}] {} | {} | next: {next}",
        task.name,
        describe_schedule(&task.schedule)
    )
}

fn describe_schedule(schedule: &ScheduleConfig) -> String {
    match schedule.schedule_type {
        ScheduleType::Once => match schedule.scheduled_time {
            Some(at) => format!("once at {}", at.to_rfc3339()),
            None => "once (no time)".to_string(),
        },
        ScheduleType::Interval => format!(
            "every {} {:?}",
            schedule.interval_value.unwrap_or_default(),
            schedule.interval_unit.unwrap_or(IntervalUnit::Minutes)
        )
        .to_lowercase(),
        ScheduleType::Daily => {
            let time = schedule.daily_time.as_deref().unwrap_or("?");
            match schedule.daily_days.as_deref() {
                Some(days) if !days.is_empty() => {
                    let days: Vec<String> = days.iter().map(u8::to_string).collect();
                    format!("daily at {time} on days {}", days.join(","))
                }
                _ => format!("daily at {time}"),
            }
        }
        ScheduleType::Heartbeat => format!(
            "heartbeat every {} min{}",
            schedule.heartbeat_interval.unwrap_or_default(),
            if schedule.heartbeat_suppress_trivial {
                ", quiet"
            } else {
                ""
            }
        ),
        ScheduleType::Hook => match schedule.hook_event {
            Some(event) => format!("on {}", event.as_str()),
            None => "hook (no event)".to_string(),
        },
    }
}

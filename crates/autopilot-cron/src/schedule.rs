//! Next-run calculation for every schedule kind.
//!
//! All functions are pure: they take the current instant explicitly and
//! never return an instant at or before it. Daily schedules are evaluated
//! in the time zone of the `now` argument.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, TimeZone, Utc};

use autopilot_types::{Schedule, ScheduledTask, WeekdaySet};

/// Upper bound on days inspected when looking for a permitted weekday.
const MAX_DAILY_PROBES: usize = 8;

/// Longest DST gap stepped over when a daily time does not exist locally.
const MAX_GAP_MINUTES: i64 = 180;

/// Next trigger instant for a task's current configuration.
///
/// Disabled tasks, hook tasks, expired `once` tasks and malformed
/// configurations all yield `None`.
pub fn next_run<Tz: TimeZone>(task: &ScheduledTask, now: &DateTime<Tz>) -> Option<DateTime<Utc>> {
    if !task.enabled {
        return None;
    }
    let schedule = task.schedule.resolve()?;
    next_run_for(&schedule, task.last_run, now)
}

/// Next trigger instant for an already-resolved schedule.
pub fn next_run_for<Tz: TimeZone>(
    schedule: &Schedule,
    last_run: Option<DateTime<Utc>>,
    now: &DateTime<Tz>,
) -> Option<DateTime<Utc>> {
    let now_utc = now.with_timezone(&Utc);
    match schedule {
        Schedule::Once { at } => (*at > now_utc).then_some(*at),
        Schedule::Interval { every_minutes } | Schedule::Heartbeat { every_minutes, .. } => {
            every(*every_minutes, last_run, now_utc)
        }
        Schedule::Daily {
            hour,
            minute,
            weekdays,
        } => daily(*hour, *minute, *weekdays, now),
        Schedule::Hook { .. } => None,
    }
}

/// `last_run + period`, or `now + period` when that is already past.
///
/// Restarting from `now` instead of stepping forward from a stale
/// `last_run` means missed periods are never replayed.
fn every(minutes: i64, last_run: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    if minutes <= 0 {
        return None;
    }
    let period = Duration::try_minutes(minutes)?;
    let candidate = last_run.unwrap_or(now).checked_add_signed(period)?;
    if candidate > now {
        Some(candidate)
    } else {
        now.checked_add_signed(period)
    }
}

fn daily<Tz: TimeZone>(
    hour: u32,
    minute: u32,
    weekdays: Option<WeekdaySet>,
    now: &DateTime<Tz>,
) -> Option<DateTime<Utc>> {
    let tz = now.timezone();
    let now_utc = now.with_timezone(&Utc);
    let mut date = now.date_naive();

    for _ in 0..MAX_DAILY_PROBES {
        let permitted = weekdays.is_none_or(|set| set.contains(date.weekday()));
        if permitted {
            match local_instant(&tz, date, hour, minute) {
                Some(at) if at > now_utc => return Some(at),
                _ => {}
            }
        }
        date = date.succ_opt()?;
    }
    None
}

/// `date hour:minute` in `tz`.
fn local_instant<Tz: TimeZone>(tz: &Tz, date: NaiveDate, hour: u32, minute: u32) -> Option<DateTime<Utc>> {
    let naive = date.and_hms_opt(hour, minute, 0)?;
    first_valid_local(naive, |local| {
        tz.from_local_datetime(local)
            .earliest()
            .map(|dt| dt.with_timezone(&Utc))
    })
}

/// Resolve a wall-clock time, moving forward out of a DST gap to the first
/// local minute that exists.
fn first_valid_local(
    naive: NaiveDateTime,
    resolve: impl Fn(&NaiveDateTime) -> Option<DateTime<Utc>>,
) -> Option<DateTime<Utc>> {
    (0..=MAX_GAP_MINUTES).find_map(|offset| {
        let local = naive.checked_add_signed(Duration::minutes(offset))?;
        resolve(&local)
    })
}

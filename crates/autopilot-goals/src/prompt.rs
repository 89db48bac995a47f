//! Goal run prompts and parsing of the model's structured reply.

use regex::Regex;

use autopilot_types::{LongTermGoal, ProgressEntry};

pub const COMPLETE_TAG: &str = "goal_complete";
pub const SUMMARY_TAG: &str = "goal_summary";
pub const NEXT_STEPS_TAG: &str = "goal_next_steps";

/// Session title for a goal run, e.g. `[goal] Ship v2 - run 3`.
pub fn session_title(goal_name: &str, run: u32) -> String {
    format!("[goal] {goal_name} - run {run}")
}

/// Prompt for the next run of `goal`.
///
/// Only the last `window` progress entries are embedded.
pub fn build_prompt(goal: &LongTermGoal, window: usize) -> String {
    let mut prompt = format!(
        "You are working on a long-term goal across multiple sessions.\n\n\
         Goal: {}\n\n{}\n\n\
         This is run {} of at most {}.\n",
        goal.name,
        goal.description.trim(),
        goal.total_runs,
        goal.max_runs
    );

    let start = goal.progress_log.len().saturating_sub(window);
    let recent = &goal.progress_log[start..];
    if recent.is_empty() {
        prompt.push_str("\nNo previous runs. Start from the beginning.\n");
    } else {
        prompt.push_str("\nProgress so far");
        if start > 0 {
            prompt.push_str(&format!(" (last {} of {} runs)", recent.len(), goal.progress_log.len()));
        }
        prompt.push_str(":\n");
        for entry in recent {
            prompt.push_str(&format_entry(entry));
        }
    }

    prompt.push_str(&format!(
        "\nContinue the work. When you finish this session, end your reply with:\n\
         <{COMPLETE_TAG}>true or false</{COMPLETE_TAG}>\n\
         <{SUMMARY_TAG}>one or two sentences on what this run achieved</{SUMMARY_TAG}>\n\
         <{NEXT_STEPS_TAG}>what the next run should do (omit if complete)</{NEXT_STEPS_TAG}>\n\
         Only answer true for {COMPLETE_TAG} when the whole goal is done.\n"
    ));
    prompt
}

fn format_entry(entry: &ProgressEntry) -> String {
    let mut line = format!(
        "- Run {} ({}){}: {}\n",
        entry.run,
        entry.run_at.format("%Y-%m-%d %H:%M UTC"),
        if entry.is_error { " [error]" } else { "" },
        entry.summary
    );
    if let Some(next) = &entry.next_steps {
        line.push_str(&format!("  Next steps: {next}\n"));
    }
    line
}

/// What a run reported about itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GoalReply {
    pub is_complete: bool,
    pub summary: String,
    pub next_steps: Option<String>,
}

/// Extract the completion tags from a session's final message.
///
/// Missing tags degrade: completion defaults to false and the summary to the
/// last `excerpt_chars` characters of the message.
pub fn parse_reply(text: &str, excerpt_chars: usize) -> GoalReply {
    let is_complete = tag_value(text, COMPLETE_TAG)
        .map(|v| matches!(v.to_ascii_lowercase().as_str(), "true" | "yes"))
        .unwrap_or(false);
    let summary = tag_value(text, SUMMARY_TAG)
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| tail_excerpt(text.trim(), excerpt_chars).to_string());
    let next_steps = tag_value(text, NEXT_STEPS_TAG).filter(|s| !s.is_empty());
    GoalReply {
        is_complete,
        summary,
        next_steps,
    }
}

/// Trimmed content of the last `<tag>...</tag>` pair, if any.
fn tag_value(text: &str, tag: &str) -> Option<String> {
    let re = Regex::new(&format!(r"(?is)<{tag}>(.*?)</{tag}>")).ok()?;
    re.captures_iter(text)
        .last()
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
}

fn tail_excerpt(text: &str, max: usize) -> &str {
    let count = text.chars().count();
    if count <= max {
        return text;
    }
    text.char_indices()
        .nth(count - max)
        .map(|(i, _)| &text[i..])
        .unwrap_or(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use autopilot_types::GoalStatus;
    use chrono::Utc;

    fn goal_with_runs(n: u32) -> LongTermGoal {
        let now = Utc::now();
        LongTermGoal {
            id: "g".into(),
            name: "Migrate docs".into(),
            description: "Move every page to the new site.".into(),
            assistant_id: None,
            cwd: None,
            retry_interval: 5,
            max_runs: 20,
            status: GoalStatus::Active,
            total_runs: n + 1,
            consecutive_errors: 0,
            next_run_at: None,
            progress_log: (1..=n)
                .map(|run| ProgressEntry {
                    session_id: format!("s{run}"),
                    run,
                    run_at: now,
                    summary: format!("did part {run}"),
                    is_complete: false,
                    next_steps: Some(format!("part {}", run + 1)),
                    is_error: false,
                })
                .collect(),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_title_convention() {
        assert_eq!(session_title("Ship v2", 3), "[goal] Ship v2 - run 3");
    }

    #[test]
    fn test_prompt_first_run() {
        let prompt = build_prompt(&goal_with_runs(0), 8);
        assert!(prompt.contains("Migrate docs"));
        assert!(prompt.contains("Move every page"));
        assert!(prompt.contains("run 1 of at most 20"));
        assert!(prompt.contains("No previous runs"));
        assert!(prompt.contains("<goal_complete>"));
    }

    #[test]
    fn test_prompt_window_keeps_latest_entries() {
        let prompt = build_prompt(&goal_with_runs(12), 8);
        assert!(prompt.contains("last 8 of 12 runs"));
        assert!(!prompt.contains("did part 4\n"));
        assert!(prompt.contains("did part 5\n"));
        assert!(prompt.contains("did part 12\n"));
        assert!(prompt.contains("Next steps: part 13"));
    }

    #[test]
    fn test_parse_all_tags() {
        let reply = parse_reply(
            "Done with the import.\n<goal_complete> TRUE </goal_complete>\n\
             <goal_summary>Imported all pages.</goal_summary>\n\
             <goal_next_steps></goal_next_steps>",
            300,
        );
        assert!(reply.is_complete);
        assert_eq!(reply.summary, "Imported all pages.");
        assert_eq!(reply.next_steps, None);
    }

    #[test]
    fn test_parse_last_tag_wins() {
        let reply = parse_reply(
            "<goal_summary>draft</goal_summary> ... <goal_summary>final</goal_summary>\
             <goal_next_steps>\nfix links\n</goal_next_steps>",
            300,
        );
        assert!(!reply.is_complete);
        assert_eq!(reply.summary, "final");
        assert_eq!(reply.next_steps.as_deref(), Some("fix links"));
    }

    #[test]
    fn test_parse_missing_tags_falls_back_to_excerpt() {
        let text = format!("{}END", "x".repeat(500));
        let reply = parse_reply(&text, 10);
        assert!(!reply.is_complete);
        assert_eq!(reply.summary, "xxxxxxxEND");
        assert_eq!(reply.next_steps, None);
    }

    #[test]
    fn test_parse_unrecognized_completion_value() {
        let reply = parse_reply("<goal_complete>maybe</goal_complete>", 300);
        assert!(!reply.is_complete);
    }
}

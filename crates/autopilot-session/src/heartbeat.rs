//! Heartbeat check-in prompt and reply classification.

/// Token the model replies with when a check-in finds nothing to do.
pub const HEARTBEAT_OK: &str = "HEARTBEAT_OK";

/// Remarks alongside the token shorter than this (in chars) are still trivial.
const TRIVIAL_REMARK_CHARS: usize = 40;

/// Wrap a heartbeat task's prompt in the check-in preamble.
pub fn heartbeat_prompt(prompt: &str) -> String {
    format!(
        "This is a periodic heartbeat check-in.\n\n{}\n\nIf nothing needs attention, reply with exactly {HEARTBEAT_OK}.",
        prompt.trim()
    )
}

/// Whether a heartbeat reply carries nothing worth surfacing.
///
/// Only an empty reply, or the token with at most a short remark, is
/// trivial. Any reply without the token is surfaced, however short.
pub fn is_trivial_heartbeat_reply(reply: &str) -> bool {
    let reply = reply.trim();
    if reply.is_empty() {
        return true;
    }
    if !reply.contains(HEARTBEAT_OK) {
        return false;
    }
    let remark = reply.replace(HEARTBEAT_OK, "");
    remark.trim().chars().count() < TRIVIAL_REMARK_CHARS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_contains_token_and_task() {
        let p = heartbeat_prompt("  look at the inbox ");
        assert!(p.contains("look at the inbox"));
        assert!(p.contains(HEARTBEAT_OK));
    }

    #[test]
    fn test_trivial_replies() {
        assert!(is_trivial_heartbeat_reply(""));
        assert!(is_trivial_heartbeat_reply("HEARTBEAT_OK"));
        assert!(is_trivial_heartbeat_reply("HEARTBEAT_OK - inbox is empty."));
        assert!(!is_trivial_heartbeat_reply(
            "Two new pull requests need review and the nightly build failed on main."
        ));
    }

    #[test]
    fn test_short_alert_is_not_trivial() {
        assert!(!is_trivial_heartbeat_reply("Nightly build failed"));
        assert!(!is_trivial_heartbeat_reply("All good."));
        assert!(!is_trivial_heartbeat_reply(
            "HEARTBEAT_OK, but the nightly build failed on main and two PRs wait for review."
        ));
    }
}

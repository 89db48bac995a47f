//! Routes session completions back to their originators.

use std::sync::Arc;

use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use autopilot_goals::GoalEngine;
use autopilot_hooks::{HookEvent, HookRegistry};
use autopilot_types::{Correlation, SessionCompletion};

/// Deliver each completion to the goal engine (goal runs) and then to the
/// `session.complete` hooks, until shutdown or the channel closes.
pub async fn route_completions(
    mut completions: UnboundedReceiver<SessionCompletion>,
    goals: Arc<GoalEngine>,
    hooks: Arc<HookRegistry>,
    shutdown: CancellationToken,
) {
    loop {
        let completion = tokio::select! {
            _ = shutdown.cancelled() => break,
            next = completions.recv() => match next {
                Some(completion) => completion,
                None => {
                    info!("Completion channel closed, router stopping");
                    break;
                }
            },
        };
        route(&completion, &goals, &hooks).await;
    }
}

async fn route(completion: &SessionCompletion, goals: &GoalEngine, hooks: &HookRegistry) {
    debug!(
        session_id = %completion.session_id,
        title = %completion.title,
        status = ?completion.status,
        "Session completed"
    );
    if let Correlation::Goal { goal_id, run } = &completion.correlation {
        if let Err(e) = goals.handle_completion(completion).await {
            warn!(goal_id = %goal_id, run, "Failed to record goal completion: {e}");
        }
    }
    hooks
        .emit(HookEvent::SessionComplete {
            completion: completion.clone(),
        })
        .await;
}

//! Hook event types.

use serde::{Deserialize, Serialize};

use autopilot_types::{HookEventKind, SessionCompletion};

/// Events that hooks can subscribe to.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HookEvent {
    /// The application has started.
    Startup,
    /// A session reached a terminal state.
    SessionComplete { completion: SessionCompletion },
}

impl HookEvent {
    pub fn kind(&self) -> HookEventKind {
        match self {
            HookEvent::Startup => HookEventKind::Startup,
            HookEvent::SessionComplete { .. } => HookEventKind::SessionComplete,
        }
    }

    /// Session context carried by the event, if any.
    pub fn completion(&self) -> Option<&SessionCompletion> {
        match self {
            HookEvent::Startup => None,
            HookEvent::SessionComplete { completion } => Some(completion),
        }
    }
}

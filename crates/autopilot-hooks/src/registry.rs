//! Hook registry: manages hook subscriptions and dispatches events.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, warn};

use autopilot_types::HookEventKind;

use crate::events::HookEvent;

/// Async hook handler function type.
pub type HookHandler =
    Arc<dyn Fn(HookEvent) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Manages hook subscriptions and dispatches events.
pub struct HookRegistry {
    handlers: RwLock<HashMap<HookEventKind, Vec<HookHandler>>>,
}

impl HookRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
        }
    }

    /// Register a handler for a specific event kind.
    pub async fn on(&self, kind: HookEventKind, handler: HookHandler) {
        let mut handlers = self.handlers.write().await;
        handlers.entry(kind).or_default().push(handler);
    }

    /// Register a handler for multiple event kinds.
    pub async fn on_many(&self, kinds: &[HookEventKind], handler: HookHandler) {
        for kind in kinds {
            self.on(*kind, handler.clone()).await;
        }
    }

    async fn handlers_for(&self, kind: HookEventKind) -> Vec<HookHandler> {
        self.handlers
            .read()
            .await
            .get(&kind)
            .cloned()
            .unwrap_or_default()
    }

    /// Dispatch an event to all registered handlers without waiting for them.
    pub async fn emit(&self, event: HookEvent) {
        let handlers = self.handlers_for(event.kind()).await;
        debug!(event = event.kind().as_str(), handlers = handlers.len(), "Emitting hook event");
        for handler in handlers {
            let event = event.clone();
            tokio::spawn(async move {
                handler(event).await;
            });
        }
    }

    /// Dispatch an event and wait until every handler has finished.
    ///
    /// Handlers still run on their own tasks, so a panicking handler is
    /// logged and does not take the caller down.
    pub async fn dispatch(&self, event: HookEvent) {
        let handlers = self.handlers_for(event.kind()).await;
        let kind = event.kind();
        let tasks: Vec<_> = handlers
            .into_iter()
            .map(|handler| {
                let event = event.clone();
                tokio::spawn(async move { handler(event).await })
            })
            .collect();
        for task in tasks {
            if let Err(e) = task.await {
                warn!(event = kind.as_str(), "Hook handler failed: {e}");
            }
        }
    }
}

impl Default for HookRegistry {
    fn default() -> Self {
        Self::new()
    }
}

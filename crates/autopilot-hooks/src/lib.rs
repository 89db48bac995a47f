//! autopilot-hooks: Application lifecycle events.
//!
//! Hooks respond to lifecycle events (startup, session completion) and run
//! asynchronous handlers registered per event kind.

pub mod events;
pub mod registry;

pub use events::HookEvent;
pub use registry::{HookHandler, HookRegistry};

//! autopilot-session: The boundary to whatever actually runs an AI session.
//!
//! The scheduler and goal engine only ever build a [`SessionRequest`] and hand
//! it to a [`SessionRunner`]. The runner acknowledges immediately and reports
//! the outcome later as a [`SessionCompletion`](autopilot_types::SessionCompletion)
//! carrying the request's [`Correlation`].

pub mod heartbeat;
pub mod process;

use std::sync::RwLock;

use async_trait::async_trait;

use autopilot_types::{AssistantDirectory, Correlation, SessionRequest};

pub use process::ProcessSessionRunner;

/// Starts AI sessions.
#[async_trait]
pub trait SessionRunner: Send + Sync {
    /// Accept a request. Execution continues in the background; an error
    /// means the request was not accepted and nothing will be reported.
    async fn start(&self, request: SessionRequest) -> anyhow::Result<()>;
}

/// Read-only view of the configured assistants.
pub trait AssistantConfigProvider: Send + Sync {
    fn assistants(&self) -> AssistantDirectory;
}

impl AssistantConfigProvider for AssistantDirectory {
    fn assistants(&self) -> AssistantDirectory {
        self.clone()
    }
}

/// Assistant directory that can be swapped while the daemon runs.
#[derive(Default)]
pub struct SharedAssistants {
    inner: RwLock<AssistantDirectory>,
}

impl SharedAssistants {
    pub fn new(directory: AssistantDirectory) -> Self {
        Self {
            inner: RwLock::new(directory),
        }
    }

    pub fn replace(&self, directory: AssistantDirectory) {
        *self.inner.write().unwrap_or_else(|e| e.into_inner()) = directory;
    }
}

impl AssistantConfigProvider for SharedAssistants {
    fn assistants(&self) -> AssistantDirectory {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

/// What a caller wants run, before assistant resolution.
#[derive(Debug, Clone)]
pub struct SessionSpec {
    pub title: String,
    pub prompt: String,
    pub cwd: Option<String>,
    pub assistant_id: Option<String>,
    pub quiet: bool,
    pub correlation: Correlation,
}

/// Resolve the assistant (explicit ID, else default) and fill in provider,
/// model, skills, persona and working directory.
///
/// An explicit `cwd` wins over the assistant's default directory. If no
/// assistant can be resolved the request carries only what the caller asked for.
pub fn build_request(assistants: &dyn AssistantConfigProvider, wanted: SessionSpec) -> SessionRequest {
    let directory = assistants.assistants();
    let resolved = directory.resolve(wanted.assistant_id.as_deref());

    let mut request = SessionRequest {
        session_id: uuid::Uuid::new_v4().to_string(),
        title: wanted.title,
        prompt: wanted.prompt,
        cwd: wanted.cwd,
        assistant_id: wanted.assistant_id,
        provider: None,
        model: None,
        skills: Vec::new(),
        persona: None,
        quiet: wanted.quiet,
        correlation: wanted.correlation,
    };

    if let Some((id, profile)) = resolved {
        request.assistant_id = Some(id.to_string());
        request.provider = profile.provider.clone();
        request.model = profile.model.clone();
        request.skills = profile.skills.clone();
        request.persona = profile.persona.clone();
        if request.cwd.is_none() {
            request.cwd = profile.default_cwd.clone();
        }
    }
    request
}

//! Session runner that pipes the prompt into an external command.

use std::process::Stdio;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

use autopilot_config::RunnerConfig;
use autopilot_types::{SessionCompletion, SessionRequest, SessionStatus};

use crate::SessionRunner;
use crate::heartbeat::is_trivial_heartbeat_reply;

/// Runs each session as a child process.
///
/// The prompt is written to the child's stdin, its stdout becomes the final
/// message. A non-zero exit, an unreadable child or a timeout is reported
/// as an error completion.
pub struct ProcessSessionRunner {
    config: RunnerConfig,
    completions: UnboundedSender<SessionCompletion>,
}

impl ProcessSessionRunner {
    pub fn new(config: RunnerConfig, completions: UnboundedSender<SessionCompletion>) -> Self {
        Self {
            config,
            completions,
        }
    }

    fn command(&self, request: &SessionRequest) -> Command {
        let mut cmd = Command::new(&self.config.command);
        cmd.args(&self.config.args);
        if let Some(dir) = &request.cwd {
            cmd.current_dir(dir);
        }
        cmd.env("AUTOPILOT_SESSION_ID", &request.session_id);
        cmd.env("AUTOPILOT_SESSION_TITLE", &request.title);
        cmd.env("AUTOPILOT_SKILLS", request.skills.join(","));
        let optional = [
            ("AUTOPILOT_ASSISTANT", &request.assistant_id),
            ("AUTOPILOT_PROVIDER", &request.provider),
            ("AUTOPILOT_MODEL", &request.model),
            ("AUTOPILOT_PERSONA", &request.persona),
        ];
        for (key, value) in optional {
            if let Some(value) = value {
                cmd.env(key, value);
            }
        }
        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl SessionRunner for ProcessSessionRunner {
    async fn start(&self, request: SessionRequest) -> anyhow::Result<()> {
        if self.completions.is_closed() {
            anyhow::bail!("Completion channel is closed");
        }
        let child = self
            .command(&request)
            .spawn()
            .with_context(|| format!("Failed to spawn session command `{}`", self.config.command))?;

        info!(session_id = %request.session_id, title = %request.title, "Session started");

        let config = self.config.clone();
        let completions = self.completions.clone();
        tokio::spawn(async move {
            let (status, last_message) = drive(child, &request.prompt, &config).await;
            if status == SessionStatus::Error {
                warn!(session_id = %request.session_id, "Session ended with error");
            } else if request.quiet && is_trivial_heartbeat_reply(&last_message) {
                debug!(session_id = %request.session_id, "Heartbeat reported nothing");
            } else {
                info!(session_id = %request.session_id, "Session finished");
            }

            let completion = SessionCompletion {
                session_id: request.session_id,
                title: request.title,
                assistant_id: request.assistant_id,
                last_message,
                status,
                correlation: request.correlation,
            };
            if completions.send(completion).is_err() {
                warn!("Completion channel closed, dropping session outcome");
            }
        });
        Ok(())
    }
}

async fn drive(mut child: Child, prompt: &str, config: &RunnerConfig) -> (SessionStatus, String) {
    // Feed stdin on its own task so a chatty child cannot deadlock on a full stdout pipe.
    if let Some(mut stdin) = child.stdin.take() {
        let prompt = prompt.to_string();
        tokio::spawn(async move {
            if let Err(e) = stdin.write_all(prompt.as_bytes()).await {
                debug!("Session command closed stdin early: {e}");
            }
        });
    }

    let max = config.max_output_bytes;
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let run = async {
        let (stdout, stderr, status) = tokio::join!(
            read_bounded(stdout, max),
            read_bounded(stderr, max),
            child.wait()
        );
        Ok::<_, std::io::Error>((status?, stdout?, stderr?))
    };

    let waited = match config.timeout_secs {
        Some(secs) => match tokio::time::timeout(Duration::from_secs(secs), run).await {
            Ok(result) => result,
            Err(_) => {
                return (
                    SessionStatus::Error,
                    format!("Session timed out after {secs}s"),
                );
            }
        },
        None => run.await,
    };

    let (status, stdout, stderr) = match waited {
        Ok(output) => output,
        Err(e) => return (SessionStatus::Error, format!("Session command failed: {e}")),
    };

    let stdout = truncate_output(&stdout, max);
    if status.success() {
        return (SessionStatus::Success, stdout);
    }

    let exit_code = status.code().unwrap_or(-1);
    let message = if stdout.is_empty() {
        truncate_output(&stderr, max)
    } else {
        stdout
    };
    (
        SessionStatus::Error,
        format!("Exit code: {exit_code}\n{message}").trim().to_string(),
    )
}

/// Keep the first `max` bytes of a pipe and discard the rest, so the child
/// never blocks on a full pipe and memory stays bounded.
async fn read_bounded<R>(reader: Option<R>, max: usize) -> std::io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::new();
    let Some(mut reader) = reader else {
        return Ok(buf);
    };
    (&mut reader).take(max as u64).read_to_end(&mut buf).await?;
    tokio::io::copy(&mut reader, &mut tokio::io::sink()).await?;
    Ok(buf)
}

fn truncate_output(bytes: &[u8], max: usize) -> String {
    let mut text = String::from_utf8_lossy(bytes).trim().to_string();
    if text.len() > max {
        let mut cut = max;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        text.truncate(cut);
    }
    text
}

//! Container Session Manager
//!
//! One isolated container per check, bound to exactly one staged artifact:
//!
//! ```text
//! Created -> Started -> [Compiling -> Compiled] -> Running -> Captured -> Stopping -> Removed
//! ```
//!
//! The compile pair is skipped for single-step toolchains. An infrastructure
//! error on any exec moves the session straight to `Stopping`. `close`
//! consumes the session, so teardown happens once; a session dropped without
//! `close` is force-removed in the background.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::capture::{capture, CapturedOutput};
use crate::config::SandboxConfig;
use crate::engine::{ContainerRuntime, ContainerSpec};
use crate::error::CheckError;
use crate::profiles::{LanguageProfile, APP_DIR};
use crate::stager::StagedArtifact;

/// Exit status of a process killed with SIGKILL (OOM killer, pids limit)
const SIGKILL_EXIT_CODE: i64 = 137;

/// Slack added to the step timeouts for the container's own lifetime
const KEEP_ALIVE_SLACK_SECS: u64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    Started,
    Compiling,
    Compiled,
    Running,
    Captured,
    Stopping,
    Removed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Step {
    Compile,
    Run,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Compile => f.write_str("compile"),
            Step::Run => f.write_str("run"),
        }
    }
}

/// Per-session resource and time bounds
#[derive(Debug, Clone)]
pub struct SessionLimits {
    pub compile_timeout: Duration,
    pub run_timeout: Duration,
    pub capture_limit_bytes: usize,
    pub pids_limit: i64,
    pub stop_grace_secs: i64,
}

impl SessionLimits {
    pub fn timeout_for(&self, step: Step) -> Duration {
        match step {
            Step::Compile => self.compile_timeout,
            Step::Run => self.run_timeout,
        }
    }
}

impl From<&SandboxConfig> for SessionLimits {
    fn from(config: &SandboxConfig) -> Self {
        Self {
            compile_timeout: config.compile_timeout,
            run_timeout: config.run_timeout,
            capture_limit_bytes: config.capture_limit_bytes,
            pids_limit: config.pids_limit,
            stop_grace_secs: config.stop_grace_secs,
        }
    }
}

/// What one exec step produced
#[derive(Debug, Clone)]
pub struct StepOutput {
    pub step: Step,
    pub captured: CapturedOutput,
    /// `None` when the step timed out or the runtime could not tell
    pub exit_code: Option<i64>,
    pub timeout: Duration,
}

impl StepOutput {
    /// The user-facing failure text, or `None` if the step succeeded.
    ///
    /// Any captured output is a failure and is returned verbatim. A timeout or
    /// a silent SIGKILL from a sandbox limit also fails the step.
    pub fn failure_message(&self) -> Option<String> {
        let text = &self.captured.text;

        if self.captured.timed_out {
            let notice = format!("[execution timed out after {}ms]", self.timeout.as_millis());
            return Some(if text.is_empty() {
                notice
            } else {
                format!("{}\n{}", text, notice)
            });
        }

        if !text.is_empty() {
            return Some(text.clone());
        }

        if self.exit_code == Some(SIGKILL_EXIT_CODE) {
            return Some("[process killed: resource limit exceeded]".to_string());
        }

        None
    }
}

pub struct ContainerSession {
    id: Uuid,
    container_id: String,
    state: SessionState,
    runtime: Arc<dyn ContainerRuntime>,
    stop_grace_secs: i64,
}

impl ContainerSession {
    /// Create and start a container bound to `artifact`.
    ///
    /// If the container was created but cannot be started it is removed
    /// before the error is returned.
    pub async fn open(
        runtime: Arc<dyn ContainerRuntime>,
        profile: &LanguageProfile,
        artifact: &StagedArtifact,
        limits: &SessionLimits,
    ) -> Result<Self, CheckError> {
        let id = Uuid::new_v4();

        runtime
            .ensure_image(&profile.image)
            .await
            .map_err(|source| CheckError::SessionCreate {
                context: format!("image '{}' unavailable", profile.image),
                source,
            })?;

        let keep_alive_secs = limits.compile_timeout.as_secs()
            + limits.run_timeout.as_secs()
            + KEEP_ALIVE_SLACK_SECS;

        let spec = ContainerSpec {
            name: format!("codepilot-{}", id),
            image: profile.image.clone(),
            working_dir: APP_DIR.to_string(),
            artifact_host_path: artifact.host_path.clone(),
            artifact_container_path: profile.source_path(),
            memory_bytes: i64::from(profile.memory_limit_mb) * 1024 * 1024,
            nano_cpus: (f64::from(profile.cpu_limit) * 1_000_000_000.0) as i64,
            pids_limit: limits.pids_limit,
            keep_alive_secs,
            labels: HashMap::from([
                ("codepilot.session".to_string(), id.to_string()),
                ("codepilot.language".to_string(), profile.language.to_string()),
            ]),
        };

        let container_id = runtime
            .create_container(&spec)
            .await
            .map_err(|source| CheckError::SessionCreate {
                context: format!("could not create container from '{}'", profile.image),
                source,
            })?;

        let mut session = Self {
            id,
            container_id,
            state: SessionState::Created,
            runtime,
            stop_grace_secs: limits.stop_grace_secs,
        };
        session.log_transition();

        if let Err(source) = session.runtime.start_container(&session.container_id).await {
            session.close().await;
            return Err(CheckError::SessionCreate {
                context: "could not start container".to_string(),
                source,
            });
        }
        session.transition(SessionState::Started);

        Ok(session)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn container_id(&self) -> &str {
        &self.container_id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    fn log_transition(&self) {
        debug!(session_id = %self.id, container_id = %self.container_id, state = ?self.state, "Session state");
    }

    fn transition(&mut self, next: SessionState) {
        self.state = next;
        self.log_transition();
    }

    /// Run one step and capture its combined output within `limits`
    pub async fn exec(
        &mut self,
        step: Step,
        cmd: &[String],
        limits: &SessionLimits,
    ) -> Result<StepOutput, CheckError> {
        let (active, done) = match step {
            Step::Compile => (SessionState::Compiling, SessionState::Compiled),
            Step::Run => (SessionState::Running, SessionState::Captured),
        };
        self.transition(active);

        let timeout = limits.timeout_for(step);
        match self.exec_within(step, cmd, timeout, limits.capture_limit_bytes).await {
            Ok(output) => {
                self.transition(done);
                Ok(output)
            }
            Err(e) => {
                self.transition(SessionState::Stopping);
                Err(e)
            }
        }
    }

    async fn exec_within(
        &self,
        step: Step,
        cmd: &[String],
        timeout: Duration,
        capture_limit: usize,
    ) -> Result<StepOutput, CheckError> {
        let deadline = Instant::now() + timeout;

        let handle = tokio::time::timeout_at(deadline, self.runtime.start_exec(&self.container_id, cmd))
            .await
            .map_err(|_| CheckError::DispatchTimeout {
                step,
                timeout_ms: timeout.as_millis() as u64,
            })?
            .map_err(|source| CheckError::Exec { step, source })?;

        let captured = capture(handle.output, capture_limit, deadline)
            .await
            .map_err(|source| CheckError::Capture { step, source })?;

        // A timed-out exec is still running; its status is meaningless
        let exit_code = if captured.timed_out {
            None
        } else {
            match self.runtime.exec_exit_code(&handle.exec_id).await {
                Ok(code) => code,
                Err(e) => {
                    warn!(session_id = %self.id, step = %step, error = %e, "Failed to inspect exec");
                    None
                }
            }
        };

        debug!(
            session_id = %self.id,
            step = %step,
            bytes = captured.text.len(),
            truncated = captured.truncated,
            timed_out = captured.timed_out,
            exit_code = ?exit_code,
            "Step captured"
        );

        Ok(StepOutput {
            step,
            captured,
            exit_code,
            timeout,
        })
    }

    /// Stop and remove the container. Failures are logged, never returned.
    pub async fn close(mut self) {
        self.transition(SessionState::Stopping);

        if let Err(e) = self
            .runtime
            .stop_container(&self.container_id, self.stop_grace_secs)
            .await
        {
            debug!(session_id = %self.id, error = %e, "Stop failed, removing by force");
        }

        if let Err(e) = self.runtime.remove_container(&self.container_id).await {
            warn!(
                session_id = %self.id,
                container_id = %self.container_id,
                error = %e,
                "Failed to remove container"
            );
        }

        self.transition(SessionState::Removed);
    }
}

impl Drop for ContainerSession {
    fn drop(&mut self) {
        if self.state == SessionState::Removed {
            return;
        }

        // Dropped without close (panic or aborted task): remove in the background
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(container_id = %self.container_id, "Session leaked outside a runtime");
            return;
        };

        let runtime = Arc::clone(&self.runtime);
        let container_id = self.container_id.clone();
        handle.spawn(async move {
            if let Err(e) = runtime.remove_container(&container_id).await {
                warn!(container_id = %container_id, error = %e, "Failed to clean up dropped session");
            }
        });
    }
}

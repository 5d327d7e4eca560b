/// Execution Orchestrator - High-Level Check Flow
///
/// **Responsibility:**
/// Turn (language, user code, fixture key) into a verdict:
/// 1. Resolve the language profile
/// 2. Stage the merged source (stager.rs)
/// 3. Open a container session bound to it (session.rs)
/// 4. Compile if the profile says so; any compiler output fails the check
/// 5. Run; any output fails the check, silence passes it
/// 6. Close the session and release the artifact on every path
///
/// **Verdict policy:**
/// Emptiness of the captured output is the success signal. A program that
/// prints diagnostics on success is judged as failing.
use std::sync::Arc;
use std::time::Instant;

use codepilot_common::types::Verdict;
use tokio::sync::Semaphore;
use tracing::{debug, info, instrument, warn, Instrument};
use uuid::Uuid;

use crate::config::SandboxConfig;
use crate::engine::ContainerRuntime;
use crate::error::CheckError;
use crate::profiles::{self, LanguageProfile};
use crate::session::{ContainerSession, SessionLimits, Step};
use crate::stager::ArtifactStager;
use crate::storage::FixtureStore;

/// Outcome of one check, returned to the caller and then discarded
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub verdict: Verdict,
    /// The step whose output decided a `Fail`
    pub failed_step: Option<Step>,
    pub artifact_id: Uuid,
    pub session_id: Uuid,
    pub duration_ms: u64,
}

/// Entry point for checking submissions. Cheap to clone; clones share the
/// runtime client, the stager and the session limiter.
#[derive(Clone)]
pub struct Checker {
    inner: Arc<CheckerInner>,
}

struct CheckerInner {
    runtime: Arc<dyn ContainerRuntime>,
    stager: ArtifactStager,
    limits: SessionLimits,
    sessions: Semaphore,
}

impl Checker {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        store: Arc<dyn FixtureStore>,
        config: &SandboxConfig,
    ) -> Self {
        let stager = ArtifactStager::new(&config.staging_dir, &config.host_staging_dir, store);
        Self {
            inner: Arc::new(CheckerInner {
                runtime,
                stager,
                limits: SessionLimits::from(config),
                sessions: Semaphore::new(config.max_sessions),
            }),
        }
    }

    /// Create the staging directory. Call once at startup.
    pub async fn prepare(&self) -> std::io::Result<()> {
        self.inner.stager.prepare().await
    }

    /// Check `user_code` against the fixture stored under `fixture_key`.
    ///
    /// The work runs on its own task, so dropping the returned future does
    /// not interrupt teardown of the container or the staged file.
    #[instrument(skip_all, fields(language = %language_name, fixture = %fixture_key))]
    pub async fn check(
        &self,
        language_name: &str,
        user_code: &str,
        fixture_key: &str,
    ) -> Result<ExecutionResult, CheckError> {
        let profile = profiles::lookup(language_name)?;

        let inner = Arc::clone(&self.inner);
        let user_code = user_code.to_string();
        let fixture_key = fixture_key.to_string();

        // Carry the caller's span (worker job_id, language, fixture) into the pipeline
        tokio::spawn(async move { inner.run(profile, &user_code, &fixture_key).await }.in_current_span())
            .await
            .map_err(|e| CheckError::Aborted(e.to_string()))?
    }
}

impl CheckerInner {
    async fn run(
        &self,
        profile: &'static LanguageProfile,
        user_code: &str,
        fixture_key: &str,
    ) -> Result<ExecutionResult, CheckError> {
        let _permit = self
            .sessions
            .acquire()
            .await
            .map_err(|e| CheckError::Aborted(e.to_string()))?;

        let started = Instant::now();

        let artifact = self.stager.stage(fixture_key, user_code, profile).await?;
        let artifact_id = artifact.id;

        let outcome = match ContainerSession::open(
            Arc::clone(&self.runtime),
            profile,
            &artifact,
            &self.limits,
        )
        .await
        {
            Ok(mut session) => {
                let session_id = session.id();
                let judged = self.judge(&mut session, profile).await;
                session.close().await;
                judged.map(|(verdict, failed_step)| (verdict, failed_step, session_id))
            }
            Err(e) => Err(e),
        };

        self.stager.release(artifact).await;

        let duration_ms = started.elapsed().as_millis() as u64;
        let (verdict, failed_step, session_id) = match outcome {
            Ok(judged) => judged,
            Err(e) => {
                warn!(artifact_id = %artifact_id, error = %e, duration_ms, "Check aborted by infrastructure fault");
                return Err(e);
            }
        };

        info!(
            artifact_id = %artifact_id,
            session_id = %session_id,
            language = %profile.language,
            passed = verdict.is_pass(),
            failed_step = ?failed_step,
            duration_ms,
            "Check completed"
        );

        Ok(ExecutionResult {
            verdict,
            failed_step,
            artifact_id,
            session_id,
            duration_ms,
        })
    }

    /// Drive the compile and run steps. The run step never starts after a failed compile.
    async fn judge(
        &self,
        session: &mut ContainerSession,
        profile: &LanguageProfile,
    ) -> Result<(Verdict, Option<Step>), CheckError> {
        if let Some(compile) = &profile.compile_command {
            let output = session.exec(Step::Compile, compile, &self.limits).await?;
            if let Some(message) = output.failure_message() {
                debug!(session_id = %session.id(), "Compilation failed");
                return Ok((Verdict::Fail(message), Some(Step::Compile)));
            }
        }

        let output = session.exec(Step::Run, &profile.run_command, &self.limits).await?;
        match output.failure_message() {
            Some(message) => Ok((Verdict::Fail(message), Some(Step::Run))),
            None => Ok((Verdict::Pass, None)),
        }
    }
}

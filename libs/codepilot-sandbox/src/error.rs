use std::path::PathBuf;

use thiserror::Error;

use crate::session::Step;

/// Errors surfaced by the container runtime client
pub type RuntimeError = bollard::errors::Error;

/// Errors from the fixture store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("fixture '{0}' not found")]
    NotFound(String),

    #[error("invalid fixture key '{0}'")]
    InvalidKey(String),

    #[error("failed to read fixture '{key}': {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },
}

/// Everything that can stop a check from producing a verdict.
///
/// Program failures (compile errors, failing assertions) are not errors:
/// they come back as `Verdict::Fail`.
#[derive(Debug, Error)]
pub enum CheckError {
    #[error("language '{0}' is not supported")]
    NotSupported(String),

    #[error("failed to fetch fixture '{key}'")]
    FixtureFetch {
        key: String,
        #[source]
        source: StoreError,
    },

    #[error("failed to stage artifact at {}", path.display())]
    StagingIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to open container session: {context}")]
    SessionCreate {
        context: String,
        #[source]
        source: RuntimeError,
    },

    #[error("failed to dispatch {step} command")]
    Exec {
        step: Step,
        #[source]
        source: RuntimeError,
    },

    #[error("{step} command was not dispatched within {timeout_ms}ms")]
    DispatchTimeout { step: Step, timeout_ms: u64 },

    #[error("output stream of {step} command failed")]
    Capture {
        step: Step,
        #[source]
        source: RuntimeError,
    },

    #[error("check task aborted: {0}")]
    Aborted(String),
}

impl CheckError {
    /// True when the caller sent something we cannot check, as opposed to an infrastructure fault
    pub fn is_client_error(&self) -> bool {
        matches!(self, CheckError::NotSupported(_))
    }

    /// True for faults raised before any container session was opened
    pub fn is_staging_failure(&self) -> bool {
        matches!(
            self,
            CheckError::FixtureFetch { .. } | CheckError::StagingIo { .. }
        )
    }
}

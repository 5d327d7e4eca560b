use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Toolchains the checker knows how to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    Go,
    Rust,
    Cpp,
}

impl Language {
    pub const ALL: [Language; 4] = [Language::Python, Language::Go, Language::Rust, Language::Cpp];

    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Python => "python",
            Language::Go => "go",
            Language::Rust => "rust",
            Language::Cpp => "cpp",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a language name has no matching toolchain
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("language '{0}' is not supported")]
pub struct UnsupportedLanguage(pub String);

impl FromStr for Language {
    type Err = UnsupportedLanguage;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "python" => Ok(Language::Python),
            "go" => Ok(Language::Go),
            "rust" => Ok(Language::Rust),
            "cpp" => Ok(Language::Cpp),
            _ => Err(UnsupportedLanguage(s.to_string())),
        }
    }
}

/// Outcome of one check invocation.
///
/// `Fail` carries the captured combined stdout/stderr of the step that failed,
/// which the caller shows to the user as-is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", content = "message", rename_all = "snake_case")]
pub enum Verdict {
    Pass,
    Fail(String),
}

impl Verdict {
    pub fn is_pass(&self) -> bool {
        matches!(self, Verdict::Pass)
    }

    pub fn message(&self) -> Option<&str> {
        match self {
            Verdict::Pass => None,
            Verdict::Fail(message) => Some(message),
        }
    }
}

/// A submission waiting in the check queue.
///
/// `language` stays a raw string so that unknown names reach the checker
/// and are rejected there instead of failing deserialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckJob {
    pub id: Uuid,
    pub language: String,
    pub user_code: String,
    pub fixture_key: String,
    pub submitted_at: DateTime<Utc>,
}

impl CheckJob {
    pub fn new(language: impl Into<String>, user_code: impl Into<String>, fixture_key: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            language: language.into(),
            user_code: user_code.into(),
            fixture_key: fixture_key.into(),
            submitted_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Passed,
    Failed,
    /// Client error, e.g. an unsupported language
    Rejected,
    /// Infrastructure fault; the submission was not judged
    Error,
}

/// Stored result of a queued check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckReport {
    pub job_id: Uuid,
    pub status: CheckStatus,
    pub message: Option<String>,
    pub duration_ms: u64,
    pub completed_at: DateTime<Utc>,
}

impl CheckReport {
    pub fn from_verdict(job_id: Uuid, verdict: &Verdict, duration_ms: u64) -> Self {
        let status = if verdict.is_pass() {
            CheckStatus::Passed
        } else {
            CheckStatus::Failed
        };

        Self {
            job_id,
            status,
            message: verdict.message().map(str::to_string),
            duration_ms,
            completed_at: Utc::now(),
        }
    }

    pub fn rejected(job_id: Uuid, message: impl Into<String>) -> Self {
        Self {
            job_id,
            status: CheckStatus::Rejected,
            message: Some(message.into()),
            duration_ms: 0,
            completed_at: Utc::now(),
        }
    }

    pub fn errored(job_id: Uuid, message: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            job_id,
            status: CheckStatus::Error,
            message: Some(message.into()),
            duration_ms,
            completed_at: Utc::now(),
        }
    }
}

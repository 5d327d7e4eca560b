// Sandbox configuration, read from the environment at startup
use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct SandboxConfig {
    /// Where staged artifacts are written by this process
    pub staging_dir: PathBuf,
    /// The same directory as the container runtime sees it
    pub host_staging_dir: PathBuf,
    /// Local mirror of the fixture bucket
    pub fixture_root: PathBuf,
    pub max_sessions: usize,
    pub compile_timeout: Duration,
    pub run_timeout: Duration,
    pub capture_limit_bytes: usize,
    /// Counts threads as well as processes; `go run` and `rustc` spawn one per core
    pub pids_limit: i64,
    pub stop_grace_secs: i64,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        let staging_dir = std::env::temp_dir().join("codepilot-staging");
        Self {
            host_staging_dir: staging_dir.clone(),
            staging_dir,
            fixture_root: PathBuf::from("fixtures"),
            max_sessions: 8,
            compile_timeout: Duration::from_millis(30_000),
            run_timeout: Duration::from_millis(10_000),
            capture_limit_bytes: 64 * 1024,
            pids_limit: 512,
            stop_grace_secs: 1,
        }
    }
}

fn parse_var<T>(name: &str, raw: Option<String>, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match raw {
        Some(value) => value
            .trim()
            .parse::<T>()
            .with_context(|| format!("Invalid value for {}: {}", name, value)),
        None => Ok(default),
    }
}

fn absolute(path: PathBuf) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path);
    }
    let cwd = std::env::current_dir().context("Failed to resolve current directory")?;
    Ok(cwd.join(path))
}

impl SandboxConfig {
    /// Load configuration from `CODEPILOT_*` environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let staging_dir = match lookup("CODEPILOT_STAGING_DIR") {
            Some(dir) => absolute(PathBuf::from(dir))?,
            None => defaults.staging_dir,
        };
        let host_staging_dir = lookup("CODEPILOT_HOST_STAGING_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| staging_dir.clone());
        let fixture_root = lookup("CODEPILOT_FIXTURE_ROOT")
            .map(PathBuf::from)
            .unwrap_or(defaults.fixture_root);

        let compile_timeout_ms = parse_var(
            "CODEPILOT_COMPILE_TIMEOUT_MS",
            lookup("CODEPILOT_COMPILE_TIMEOUT_MS"),
            defaults.compile_timeout.as_millis() as u64,
        )?;
        let run_timeout_ms = parse_var(
            "CODEPILOT_RUN_TIMEOUT_MS",
            lookup("CODEPILOT_RUN_TIMEOUT_MS"),
            defaults.run_timeout.as_millis() as u64,
        )?;

        let config = Self {
            staging_dir,
            host_staging_dir,
            fixture_root,
            max_sessions: parse_var(
                "CODEPILOT_MAX_SESSIONS",
                lookup("CODEPILOT_MAX_SESSIONS"),
                defaults.max_sessions,
            )?,
            compile_timeout: Duration::from_millis(compile_timeout_ms),
            run_timeout: Duration::from_millis(run_timeout_ms),
            capture_limit_bytes: parse_var(
                "CODEPILOT_CAPTURE_LIMIT_BYTES",
                lookup("CODEPILOT_CAPTURE_LIMIT_BYTES"),
                defaults.capture_limit_bytes,
            )?,
            pids_limit: parse_var(
                "CODEPILOT_PIDS_LIMIT",
                lookup("CODEPILOT_PIDS_LIMIT"),
                defaults.pids_limit,
            )?,
            stop_grace_secs: parse_var(
                "CODEPILOT_STOP_GRACE_SECS",
                lookup("CODEPILOT_STOP_GRACE_SECS"),
                defaults.stop_grace_secs,
            )?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would leave the sandbox unbounded or unmountable
    pub fn validate(&self) -> Result<()> {
        if self.max_sessions == 0 {
            bail!("CODEPILOT_MAX_SESSIONS must be at least 1");
        }
        if self.compile_timeout.is_zero() || self.run_timeout.is_zero() {
            bail!("Execution timeouts must be greater than zero");
        }
        if self.capture_limit_bytes == 0 {
            bail!("CODEPILOT_CAPTURE_LIMIT_BYTES must be greater than zero");
        }
        if self.pids_limit <= 0 {
            bail!("CODEPILOT_PIDS_LIMIT must be greater than zero");
        }
        if self.stop_grace_secs < 0 {
            bail!("CODEPILOT_STOP_GRACE_SECS cannot be negative");
        }
        if !Path::new(&self.host_staging_dir).is_absolute() {
            bail!(
                "Host staging directory must be absolute for bind mounts: {}",
                self.host_staging_dir.display()
            );
        }
        Ok(())
    }
}

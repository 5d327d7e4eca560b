// Queue configuration shared by the worker and the CLI
use anyhow::{bail, Context, Result};

pub const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";
pub const DEFAULT_RESULT_TTL_SECS: u64 = 86_400;

#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub redis_url: String,
    pub result_ttl_secs: u64,
}

impl QueueConfig {
    /// Read `REDIS_URL` and `CODEPILOT_RESULT_TTL_SECS`
    pub fn from_env() -> Result<Self> {
        let redis_url = std::env::var("REDIS_URL").unwrap_or_else(|_| DEFAULT_REDIS_URL.to_string());

        let result_ttl_secs = match std::env::var("CODEPILOT_RESULT_TTL_SECS") {
            Ok(raw) => raw
                .parse::<u64>()
                .with_context(|| format!("Invalid CODEPILOT_RESULT_TTL_SECS: {}", raw))?,
            Err(_) => DEFAULT_RESULT_TTL_SECS,
        };

        if result_ttl_secs == 0 {
            bail!("CODEPILOT_RESULT_TTL_SECS must be greater than zero");
        }

        Ok(Self {
            redis_url,
            result_ttl_secs,
        })
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            redis_url: DEFAULT_REDIS_URL.to_string(),
            result_ttl_secs: DEFAULT_RESULT_TTL_SECS,
        }
    }
}

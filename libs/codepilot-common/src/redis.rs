use crate::types::{CheckJob, CheckReport};
use redis::{AsyncCommands, RedisResult};

/// Redis queue semantics shared by the worker and the CLI.
/// Keys are deterministic so producers and consumers never drift.

pub const QUEUE_KEY: &str = "codepilot:queue:check";
pub const RESULT_PREFIX: &str = "codepilot:result";

/// Generate result key for a job
pub fn result_key(job_id: &uuid::Uuid) -> String {
    format!("{}:{}", RESULT_PREFIX, job_id)
}

fn encode_error(e: serde_json::Error) -> redis::RedisError {
    redis::RedisError::from((redis::ErrorKind::TypeError, "serialization error", e.to_string()))
}

fn decode_error(e: serde_json::Error) -> redis::RedisError {
    redis::RedisError::from((redis::ErrorKind::TypeError, "deserialization error", e.to_string()))
}

/// Push a check job onto the queue.
/// Uses RPUSH for FIFO semantics
pub async fn push_job(
    conn: &mut redis::aio::ConnectionManager,
    job: &CheckJob,
) -> RedisResult<()> {
    let payload = serde_json::to_string(job).map_err(encode_error)?;
    conn.rpush(QUEUE_KEY, payload).await
}

/// Pop a check job from the queue.
/// Uses BLPOP with timeout for graceful shutdown
pub async fn pop_job(
    conn: &mut redis::aio::ConnectionManager,
    timeout_seconds: f64,
) -> RedisResult<Option<CheckJob>> {
    let result: Option<(String, String)> = conn.blpop(QUEUE_KEY, timeout_seconds).await?;

    match result {
        Some((_key, payload)) => {
            let job: CheckJob = serde_json::from_str(&payload).map_err(decode_error)?;
            Ok(Some(job))
        }
        None => Ok(None),
    }
}

/// Store a check report with the given TTL
pub async fn store_report(
    conn: &mut redis::aio::ConnectionManager,
    report: &CheckReport,
    ttl_seconds: u64,
) -> RedisResult<()> {
    let key = result_key(&report.job_id);
    let payload = serde_json::to_string(report).map_err(encode_error)?;
    conn.set_ex(&key, payload, ttl_seconds).await
}

/// Retrieve a check report, `None` while the job is still queued or running
pub async fn get_report(
    conn: &mut redis::aio::ConnectionManager,
    job_id: &uuid::Uuid,
) -> RedisResult<Option<CheckReport>> {
    let payload: Option<String> = conn.get(result_key(job_id)).await?;

    match payload {
        Some(data) => {
            let report: CheckReport = serde_json::from_str(&data).map_err(decode_error)?;
            Ok(Some(report))
        }
        None => Ok(None),
    }
}

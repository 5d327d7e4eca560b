// Maps a check outcome onto the report stored for the submitter
use codepilot_common::types::CheckReport;
use codepilot_sandbox::{CheckError, ExecutionResult};
use uuid::Uuid;

pub fn build_report(
    job_id: Uuid,
    outcome: Result<ExecutionResult, CheckError>,
    elapsed_ms: u64,
) -> CheckReport {
    match outcome {
        Ok(result) => CheckReport::from_verdict(job_id, &result.verdict, result.duration_ms),
        Err(e) if e.is_client_error() => CheckReport::rejected(job_id, e.to_string()),
        Err(e) => CheckReport::errored(job_id, format!("{:#}", anyhow::Error::from(e)), elapsed_ms),
    }
}

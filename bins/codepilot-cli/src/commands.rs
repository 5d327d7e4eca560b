// CLI commands for running and queueing checks
use anyhow::{bail, Context, Result};
use codepilot_common::config::QueueConfig;
use codepilot_common::redis;
use codepilot_common::types::{CheckJob, Language, Verdict};
use codepilot_sandbox::{profiles, Checker, DockerEngine, ExecutionResult, FsFixtureStore, SandboxConfig};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Read a submission from disk. An empty file is a valid (empty) submission.
fn load_source(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}

fn render_result(result: &ExecutionResult) -> String {
    match &result.verdict {
        Verdict::Pass => format!("✅ PASS ({} ms)", result.duration_ms),
        Verdict::Fail(message) => {
            let step = result
                .failed_step
                .map(|step| format!(" at {} step", step))
                .unwrap_or_default();
            format!("❌ FAIL{} ({} ms)\n\n{}", step, result.duration_ms, message)
        }
    }
}

/// Run one check against the local Docker daemon. Returns whether it passed.
pub async fn check(
    language: &str,
    code_path: &Path,
    fixture: &str,
    fixture_root: Option<PathBuf>,
) -> Result<bool> {
    let code = load_source(code_path)?;

    let mut config = SandboxConfig::from_env()?;
    if let Some(root) = fixture_root {
        config.fixture_root = root;
    }

    let profile = profiles::lookup(language)?;
    println!("🔍 Checking {} submission against '{}'", profile.language, fixture);
    println!("🐳 Image: {}", profile.image);

    let engine = DockerEngine::connect().await?;
    let store = FsFixtureStore::new(&config.fixture_root);
    let checker = Checker::new(Arc::new(engine), Arc::new(store), &config);
    checker
        .prepare()
        .await
        .with_context(|| format!("Failed to create {}", config.staging_dir.display()))?;

    let result = checker.check(language, &code, fixture).await?;
    println!("\n{}", render_result(&result));

    Ok(result.verdict.is_pass())
}

/// Push a job onto the check queue and print its id
pub async fn submit(language: &str, code_path: &Path, fixture: &str) -> Result<()> {
    let code = load_source(code_path)?;

    if let Err(e) = language.parse::<Language>() {
        bail!("{}. Run `codepilot-cli languages` for the supported list", e);
    }

    let config = QueueConfig::from_env()?;
    let client = ::redis::Client::open(config.redis_url.as_str())?;
    let mut conn = ::redis::aio::ConnectionManager::new(client)
        .await
        .with_context(|| format!("Failed to connect to Redis at {}", config.redis_url))?;

    let job = CheckJob::new(language, code, fixture);
    redis::push_job(&mut conn, &job).await?;

    println!("📤 Queued job {}", job.id);
    println!("\n💡 Fetch the report with: codepilot-cli result --job-id {}", job.id);
    Ok(())
}

/// Print a stored report as JSON, or `pending` while the worker has not finished
pub async fn show_result(job_id: uuid::Uuid) -> Result<()> {
    let config = QueueConfig::from_env()?;
    let client = ::redis::Client::open(config.redis_url.as_str())?;
    let mut conn = ::redis::aio::ConnectionManager::new(client)
        .await
        .with_context(|| format!("Failed to connect to Redis at {}", config.redis_url))?;

    match redis::get_report(&mut conn, &job_id).await? {
        Some(report) => println!("{}", serde_json::to_string_pretty(&report)?),
        None => println!("pending"),
    }
    Ok(())
}

pub fn list_languages() {
    println!("📋 Supported Languages:\n");
    println!("{:<8} {:<26} {:<8} {:<8} {:<10}", "NAME", "IMAGE", "EXT", "COMPILE", "LIMITS");
    println!("{}", "─".repeat(70));

    for profile in profiles::languages() {
        println!(
            "{:<8} {:<26} {:<8} {:<8} {} MB / {:.1} CPU",
            profile.language.as_str(),
            profile.image,
            profile.file_extension,
            if profile.has_compile_step() { "yes" } else { "no" },
            profile.memory_limit_mb,
            profile.cpu_limit
        );
    }
}

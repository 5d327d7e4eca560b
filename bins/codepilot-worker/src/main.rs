mod report;

use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use codepilot_common::config::QueueConfig;
use codepilot_common::redis;
use codepilot_common::types::CheckJob;
use codepilot_sandbox::{Checker, DockerEngine, FsFixtureStore, SandboxConfig};
use tokio::signal;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn};

/// BLPOP timeout; bounds how long a shutdown request waits on an idle queue
const POP_TIMEOUT_SECS: f64 = 5.0;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
        )
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .init();

    info!("CodePilot worker booting...");

    let sandbox_config = SandboxConfig::from_env()
        .map_err(|e| {
            error!("Invalid sandbox configuration: {:#}", e);
            e
        })?;
    let queue_config = QueueConfig::from_env()?;

    info!(
        staging_dir = %sandbox_config.staging_dir.display(),
        host_staging_dir = %sandbox_config.host_staging_dir.display(),
        fixture_root = %sandbox_config.fixture_root.display(),
        max_sessions = sandbox_config.max_sessions,
        "Sandbox configured"
    );

    let engine = DockerEngine::connect().await?;
    info!("Connected to Docker daemon");

    let store = FsFixtureStore::new(&sandbox_config.fixture_root);
    let checker = Checker::new(Arc::new(engine), Arc::new(store), &sandbox_config);
    checker
        .prepare()
        .await
        .with_context(|| format!("Failed to create {}", sandbox_config.staging_dir.display()))?;

    let client = ::redis::Client::open(queue_config.redis_url.as_str())?;
    let redis_conn = ::redis::aio::ConnectionManager::new(client).await?;

    info!("Connected to Redis: {}", queue_config.redis_url);

    // Flipped once on Ctrl-C; the loop stops taking jobs and drains
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => {
                warn!("Received shutdown signal, draining in-flight checks...");
                let _ = shutdown_tx.send(true);
            }
            Err(e) => {
                error!(error = %e, "Failed to install Ctrl-C handler");
                // Keep the sender alive so the worker does not read this as a shutdown
                std::future::pending::<()>().await;
            }
        }
    });

    worker_loop(
        redis_conn,
        checker,
        sandbox_config.max_sessions,
        queue_config.result_ttl_secs,
        shutdown_rx,
    )
    .await;

    info!("Worker shutdown complete");
    Ok(())
}

#[instrument(skip_all, fields(max_in_flight = max_in_flight))]
async fn worker_loop(
    mut redis_conn: ::redis::aio::ConnectionManager,
    checker: Checker,
    max_in_flight: usize,
    result_ttl_secs: u64,
    mut shutdown: watch::Receiver<bool>,
) {
    // Never hold more popped jobs than the checker can run at once
    let intake = Arc::new(Semaphore::new(max_in_flight));
    let mut in_flight = JoinSet::new();

    while !*shutdown.borrow() {
        while let Some(joined) = in_flight.try_join_next() {
            if let Err(e) = joined {
                error!(error = %e, "Check task panicked");
            }
        }

        let permit = tokio::select! {
            permit = Arc::clone(&intake).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
            _ = shutdown.changed() => break,
        };

        // BLPOP is not raced against shutdown so a popped job is never dropped
        match redis::pop_job(&mut redis_conn, POP_TIMEOUT_SECS).await {
            Ok(Some(job)) => {
                info!(
                    job_id = %job.id,
                    language = %job.language,
                    fixture = %job.fixture_key,
                    source_size = job.user_code.len(),
                    "Received job"
                );

                let checker = checker.clone();
                let conn = redis_conn.clone();
                in_flight.spawn(async move {
                    process_job(checker, conn, job, result_ttl_secs).await;
                    drop(permit);
                });
            }
            Ok(None) => {
                // Timeout - check for shutdown
                continue;
            }
            Err(e) => {
                error!(error = %e, "Redis error");
                tokio::time::sleep(tokio::time::Duration::from_secs(1)).await;
            }
        }
    }

    info!(in_flight = in_flight.len(), "Intake stopped, waiting for running checks");
    while let Some(joined) = in_flight.join_next().await {
        if let Err(e) = joined {
            error!(error = %e, "Check task panicked");
        }
    }
}

#[instrument(skip_all, fields(job_id = %job.id))]
async fn process_job(
    checker: Checker,
    mut redis_conn: ::redis::aio::ConnectionManager,
    job: CheckJob,
    result_ttl_secs: u64,
) {
    let job_id = job.id;
    let started = Instant::now();

    let outcome = checker
        .check(&job.language, &job.user_code, &job.fixture_key)
        .await;

    if let Ok(result) = &outcome {
        debug!(
            job_id = %job_id,
            artifact_id = %result.artifact_id,
            session_id = %result.session_id,
            failed_step = ?result.failed_step,
            "Check finished"
        );
    }

    let report = report::build_report(job_id, outcome, started.elapsed().as_millis() as u64);

    info!(
        job_id = %job_id,
        status = ?report.status,
        duration_ms = report.duration_ms,
        "Execution completed"
    );

    match redis::store_report(&mut redis_conn, &report, result_ttl_secs).await {
        Ok(_) => {
            info!(job_id = %job_id, "Report persisted to Redis");
        }
        Err(e) => {
            error!(job_id = %job_id, error = %e, "Failed to persist report");
        }
    }
}

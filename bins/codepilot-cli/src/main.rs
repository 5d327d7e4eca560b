mod commands;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "codepilot-cli")]
#[command(about = "CodePilot CLI - Run, queue and inspect sandboxed submission checks", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check a submission locally against Docker
    Check {
        /// Language name (python, go, rust, cpp)
        #[arg(short, long)]
        language: String,

        /// File holding the submitted code
        #[arg(short, long)]
        code: PathBuf,

        /// Fixture key, relative to the fixture root
        #[arg(short, long)]
        fixture: String,

        /// Fixture root (overrides CODEPILOT_FIXTURE_ROOT)
        #[arg(long)]
        fixture_root: Option<PathBuf>,
    },

    /// Queue a submission for the worker
    Submit {
        /// Language name (python, go, rust, cpp)
        #[arg(short, long)]
        language: String,

        /// File holding the submitted code
        #[arg(short, long)]
        code: PathBuf,

        /// Fixture key, relative to the fixture root
        #[arg(short, long)]
        fixture: String,
    },

    /// Print the stored report of a queued submission
    Result {
        /// Job id printed by `submit`
        #[arg(short, long)]
        job_id: Uuid,
    },

    /// List supported languages
    Languages,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Check {
            language,
            code,
            fixture,
            fixture_root,
        } => {
            tracing_subscriber::fmt()
                .with_env_filter(
                    tracing_subscriber::EnvFilter::try_from_default_env()
                        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"))
                )
                .with_target(false)
                .init();

            let passed = commands::check(&language, &code, &fixture, fixture_root).await?;
            if !passed {
                std::process::exit(1);
            }
        }
        Commands::Submit {
            language,
            code,
            fixture,
        } => {
            commands::submit(&language, &code, &fixture).await?;
        }
        Commands::Result { job_id } => {
            commands::show_result(job_id).await?;
        }
        Commands::Languages => {
            commands::list_languages();
        }
    }

    Ok(())
}

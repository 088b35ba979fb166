//! Bundled diagnostic binary: submits one job description file to the queue, prints progress
//! as it runs, and reports the final artifact id or error. The HTTP handler layer this service
//! normally runs behind is out of scope (§1); this binary exists so the core pipeline can be
//! exercised and inspected standalone.

use anyhow::{Context, Result};
use clap::Parser;
use clipforge::config::Config;
use clipforge::job::{JobQueue, PipelineDeps};
use clipforge::model::{JobDescription, JobStatus};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "clipforge")]
#[command(version, about = "Renders a video-composition job description to an MP4")]
#[command(
    long_about = "Submits a job description (JSON) to the in-process queue, polls its status, \
                   and reports the resulting artifact id or error. A standalone way to drive \
                   the core rendering pipeline without the HTTP layer it normally sits behind."
)]
struct Cli {
    /// Path to a job description JSON file (§3 data model)
    job: PathBuf,

    /// Poll interval while the job is pending/processing
    #[arg(long, default_value = "500")]
    poll_interval_ms: u64,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Suppress progress output; print only the final result
    #[arg(short, long)]
    quiet: bool,
}

fn init_logging(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };

    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    if !cli.job.exists() {
        anyhow::bail!("job description file not found: {}", cli.job.display());
    }

    let config = Config::load().context("failed to load configuration")?;
    config.validate().context("configuration validation failed")?;

    let raw = std::fs::read_to_string(&cli.job)
        .with_context(|| format!("failed to read {}", cli.job.display()))?;
    let description: JobDescription =
        serde_json::from_str(&raw).context("job description is not valid JSON for this schema")?;

    if !cli.quiet {
        info!(
            projects = description.projects.len(),
            "submitting job description"
        );
    }

    let deps = PipelineDeps::new(config);
    let queue = JobQueue::start(deps);

    let job_id = queue
        .submit(description)
        .await
        .map_err(|e| anyhow::anyhow!("{e}"))?;

    if !cli.quiet {
        info!(job_id = %job_id, "job accepted");
    }

    // Cancel the job (not the process) on the first Ctrl+C; a second forces exit.
    let cancelled = Arc::new(AtomicBool::new(false));
    let cancelled_clone = cancelled.clone();
    ctrlc::set_handler(move || {
        if cancelled_clone.load(Ordering::Relaxed) {
            std::process::exit(1);
        }
        eprintln!("\nReceived Ctrl+C, cancelling job... (press again to force quit)");
        cancelled_clone.store(true, Ordering::Relaxed);
    })
    .ok();

    let mut last_progress: u8 = 0;
    loop {
        if cancelled.load(Ordering::Relaxed) {
            let _ = queue.cancel(&job_id).await;
            cancelled.store(false, Ordering::Relaxed);
        }

        let record = queue.status(&job_id).await.map_err(|e| anyhow::anyhow!("{e}"))?;

        if !cli.quiet && record.progress != last_progress {
            info!(job_id = %job_id, progress = record.progress, status = ?record.status, "progress");
            last_progress = record.progress;
        }

        match record.status {
            JobStatus::Completed => {
                println!(
                    "completed: artifact_id={}",
                    record.artifact_id.as_deref().unwrap_or("")
                );
                return Ok(());
            }
            JobStatus::Failed => {
                let message = record.error.as_deref().unwrap_or("unknown error");
                error!(job_id = %job_id, error = message, "job failed");
                anyhow::bail!("job failed: {message}");
            }
            JobStatus::Cancelled => {
                println!("cancelled");
                return Ok(());
            }
            JobStatus::Pending | JobStatus::Processing => {
                tokio::time::sleep(Duration::from_millis(cli.poll_interval_ms)).await;
            }
        }
    }
}

// ABOUTME: `labrun run`: submit a job file, poll until it finishes, emit the status document
// ABOUTME: The document goes to stdout or --output; a colored summary goes to stderr

use anyhow::{Context, Result};
use colored::*;
use labrun_capture::CaptureSettings;
use labrun_orchestrator::{
    JobOrchestrator, JobStatus, JobStatusDocument, OrchestratorSettings, TaskState,
};
use labrun_sandbox::{ProviderKind, SandboxAdapter};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

pub struct RunOptions {
    pub job: PathBuf,
    pub poll_ms: u64,
    pub wait_secs: u64,
    pub output: Option<PathBuf>,
    pub provider: Option<ProviderKind>,
}

/// Returns whether every task completed.
pub async fn run_command(options: RunOptions) -> Result<bool> {
    let specs = labrun_cli::load_job_file(&options.job).await?;

    let sandbox = super::sandbox_settings(options.provider);
    let limits = sandbox.limits.clone();
    let adapter = SandboxAdapter::from_settings(sandbox, CaptureSettings::from_env())
        .context("Failed to set up the sandbox")?;
    let orchestrator = JobOrchestrator::new(
        Arc::new(adapter),
        OrchestratorSettings::from_env(limits),
    );

    let job_id = orchestrator.submit(specs).await;
    eprintln!("{} {}", "Submitted job".cyan(), job_id.to_string().bold());

    let document = orchestrator
        .wait(
            job_id,
            Duration::from_millis(options.poll_ms.max(10)),
            Duration::from_secs(options.wait_secs),
        )
        .await
        .context("Job did not finish")?;

    let json = serde_json::to_string_pretty(&document)?;
    match &options.output {
        Some(path) => {
            tokio::fs::write(path, format!("{}\n", json))
                .await
                .with_context(|| format!("Failed to write {}", path.display()))?;
            info!("Wrote status document to {}", path.display());
        }
        None => println!("{}", json),
    }

    print_summary(&document);
    Ok(document.status == JobStatus::Completed && document.count(TaskState::Failed) == 0)
}

fn print_summary(document: &JobStatusDocument) {
    let status = match document.status {
        JobStatus::Completed => "completed".green().bold(),
        _ => "failed".red().bold(),
    };
    eprintln!("Job {} {}", document.job_id, status);
    if let Some(reason) = &document.error {
        eprintln!("  {}", reason.red());
    }

    for task in &document.tasks {
        let marker = match task.status {
            TaskState::Completed => "✓".green(),
            _ => "✗".red(),
        };
        let detail = match (task.error_kind, task.duration_ms) {
            (Some(kind), _) => kind.as_str().yellow().to_string(),
            (None, Some(ms)) => format!("{} artifact(s), {}ms", task.artifacts.len(), ms),
            (None, None) => String::new(),
        };
        eprintln!("  {} {} {}", marker, task.task_id, detail.dimmed());
    }
}

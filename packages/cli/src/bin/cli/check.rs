// ABOUTME: `labrun check`: print the resolved settings and probe the runtime provider
// ABOUTME: Fails when the workspace root is unwritable or the provider does not answer

use anyhow::{Context, Result};
use colored::*;
use labrun_capture::CaptureSettings;
use labrun_orchestrator::OrchestratorSettings;
use labrun_sandbox::{Language, ProviderKind, SandboxAdapter};

pub async fn check_command(provider: Option<ProviderKind>) -> Result<bool> {
    let sandbox = super::sandbox_settings(provider);
    let capture = CaptureSettings::from_env();
    let orchestrator = OrchestratorSettings::from_env(sandbox.limits.clone());

    println!("{}", "Sandbox".bold());
    println!("  provider:            {}", sandbox.provider.as_str());
    println!("  workspace root:      {}", sandbox.workspace_root.display());
    println!(
        "  runtime host:        {}",
        sandbox.runtime_host.as_deref().unwrap_or("(provider default)")
    );
    println!("  poll interval:       {:?}", sandbox.poll_interval);
    println!("  probe timeout:       {:?}", sandbox.probe_timeout);
    println!(
        "  ready budget:        node {:?}, html {:?}",
        sandbox.ready_timeout(Language::Node),
        sandbox.ready_timeout(Language::Html)
    );
    println!(
        "  limits:              {} MB, {} cpu",
        sandbox.memory_mb, sandbox.cpu_cores
    );
    println!(
        "  task timeouts:       batch {:?}, html {:?}, server {:?}",
        sandbox.limits.batch_timeout, sandbox.limits.html_timeout, sandbox.limits.server_timeout
    );

    println!("{}", "Capture".bold());
    println!("  artifact dir:        {}", capture.artifact_dir.display());
    println!(
        "  chrome:              {}",
        capture
            .chrome_path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(auto-detect)".to_string())
    );

    println!("{}", "Orchestrator".bold());
    println!(
        "  concurrent tasks:    {}",
        orchestrator.max_concurrent_tasks
    );

    let adapter = SandboxAdapter::from_settings(sandbox, capture)
        .context("Failed to set up the sandbox")?;
    match adapter.preflight().await {
        Ok(()) => {
            println!("{} ready", "✓".green());
            Ok(true)
        }
        Err(e) => {
            println!("{} {}", "✗".red(), e);
            Ok(false)
        }
    }
}

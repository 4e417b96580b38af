// ABOUTME: Tracing subscriber setup for the labrun binary
// ABOUTME: Honors RUST_LOG and falls back to info-level output for labrun crates

use labrun_config::constants::RUST_LOG;
use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str =
    "labrun=info,labrun_cli=info,labrun_sandbox=info,labrun_orchestrator=info,labrun_capture=info";

/// Install the global subscriber. `verbose` raises the default to debug;
/// an explicit `RUST_LOG` always wins.
pub fn init_tracing(verbose: bool) {
    let fallback = if verbose {
        DEFAULT_FILTER.replace("=info", "=debug")
    } else {
        DEFAULT_FILTER.to_string()
    };

    let filter = EnvFilter::try_from_env(RUST_LOG).unwrap_or_else(|_| EnvFilter::new(fallback));

    // A second init (tests) is harmless.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

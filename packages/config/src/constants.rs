// ABOUTME: Environment variable name constants
// ABOUTME: Centralized definitions of all environment variable names used across labrun

// Runtime provider selection
pub const LABRUN_PROVIDER: &str = "LABRUN_PROVIDER";
pub const LABRUN_RUNTIME_HOST: &str = "LABRUN_RUNTIME_HOST";

// Filesystem locations
pub const LABRUN_WORKSPACE_ROOT: &str = "LABRUN_WORKSPACE_ROOT";
pub const LABRUN_ARTIFACT_DIR: &str = "LABRUN_ARTIFACT_DIR";

// Readiness polling
pub const LABRUN_POLL_INTERVAL_MS: &str = "LABRUN_POLL_INTERVAL_MS";
pub const LABRUN_PROBE_TIMEOUT_MS: &str = "LABRUN_PROBE_TIMEOUT_MS";
pub const LABRUN_NODE_READY_TIMEOUT_SECS: &str = "LABRUN_NODE_READY_TIMEOUT_SECS";
pub const LABRUN_HTML_READY_TIMEOUT_SECS: &str = "LABRUN_HTML_READY_TIMEOUT_SECS";

// Task deadlines
pub const LABRUN_BATCH_TIMEOUT_SECS: &str = "LABRUN_BATCH_TIMEOUT_SECS";
pub const LABRUN_SERVER_TIMEOUT_SECS: &str = "LABRUN_SERVER_TIMEOUT_SECS";

// Input limits
pub const LABRUN_MAX_SOURCE_BYTES: &str = "LABRUN_MAX_SOURCE_BYTES";

// Isolated unit resource caps
pub const LABRUN_MEMORY_MB: &str = "LABRUN_MEMORY_MB";
pub const LABRUN_CPU_CORES: &str = "LABRUN_CPU_CORES";

// Scheduling
pub const LABRUN_MAX_CONCURRENT_TASKS: &str = "LABRUN_MAX_CONCURRENT_TASKS";

// Headless browser
pub const LABRUN_CHROME_PATH: &str = "LABRUN_CHROME_PATH";
pub const LABRUN_RENDER_SETTLE_MS: &str = "LABRUN_RENDER_SETTLE_MS";
pub const LABRUN_NAVIGATION_TIMEOUT_SECS: &str = "LABRUN_NAVIGATION_TIMEOUT_SECS";

// Logging
pub const RUST_LOG: &str = "RUST_LOG";

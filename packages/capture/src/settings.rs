// ABOUTME: Capture service settings
// ABOUTME: Artifact location, viewport and browser timing, loaded from the environment

use labrun_config::constants::*;
use labrun_config::{env_millis, env_path_or, env_secs, env_string};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct CaptureSettings {
    /// Root directory for persisted snapshots. One subdirectory per task.
    pub artifact_dir: PathBuf,
    pub viewport: (u32, u32),
    /// Extra wait after navigation completes, for late layout and scripts.
    pub settle_delay: Duration,
    /// Upper bound on a single route's navigate + snapshot.
    pub navigation_timeout: Duration,
    pub chrome_path: Option<PathBuf>,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            artifact_dir: std::env::temp_dir().join("labrun").join("artifacts"),
            viewport: (1200, 800),
            settle_delay: Duration::from_millis(1000),
            navigation_timeout: Duration::from_secs(30),
            chrome_path: None,
        }
    }
}

impl CaptureSettings {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            artifact_dir: env_path_or(LABRUN_ARTIFACT_DIR, defaults.artifact_dir),
            viewport: defaults.viewport,
            settle_delay: env_millis(LABRUN_RENDER_SETTLE_MS, 1000),
            navigation_timeout: env_secs(LABRUN_NAVIGATION_TIMEOUT_SECS, 30),
            chrome_path: env_string(LABRUN_CHROME_PATH).map(PathBuf::from),
        }
    }
}

// ABOUTME: Headless Chrome implementation of the page driver
// ABOUTME: Runs the blocking headless_chrome API on the tokio blocking pool

use crate::driver::{PageDriver, PageSession};
use crate::error::{CaptureError, CaptureResult, PageError};
use crate::settings::CaptureSettings;
use async_trait::async_trait;
use headless_chrome::protocol::cdp::Page::CaptureScreenshotFormatOption;
use headless_chrome::{Browser, LaunchOptions, Tab};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

pub struct ChromeDriver {
    settings: CaptureSettings,
}

impl ChromeDriver {
    pub fn new(settings: CaptureSettings) -> Self {
        Self { settings }
    }

    fn launch_options(&self) -> CaptureResult<LaunchOptions<'static>> {
        let (width, height) = self.settings.viewport;
        LaunchOptions::default_builder()
            .headless(true)
            .sandbox(false)
            .window_size(Some((width, height)))
            .path(self.settings.chrome_path.clone())
            .idle_browser_timeout(self.settings.navigation_timeout * 4)
            .args(vec![
                OsStr::new("--disable-dev-shm-usage"),
                OsStr::new("--disable-gpu"),
                OsStr::new("--hide-scrollbars"),
            ])
            .build()
            .map_err(|e| CaptureError::Browser {
                reason: format!("Invalid launch options: {}", e),
            })
    }
}

#[async_trait]
impl PageDriver for ChromeDriver {
    async fn open_session(&self) -> CaptureResult<Box<dyn PageSession>> {
        let options = self.launch_options()?;
        let navigation_timeout = self.settings.navigation_timeout;
        let settle_delay = self.settings.settle_delay;

        let (browser, tab) = tokio::task::spawn_blocking(move || {
            let browser = Browser::new(options)
                .map_err(|e| format!("Failed to launch browser: {}", e))?;
            let tab = browser
                .new_tab()
                .map_err(|e| format!("Failed to open tab: {}", e))?;
            tab.set_default_timeout(tab_timeout(navigation_timeout, settle_delay));
            Ok::<_, String>((browser, tab))
        })
        .await
        .map_err(|e| CaptureError::Browser {
            reason: format!("Browser launch task failed: {}", e),
        })?
        .map_err(|reason| CaptureError::Browser { reason })?;

        info!("Opened headless browser session");

        Ok(Box::new(ChromeSession {
            _browser: browser,
            tab,
            settle_delay,
        }))
    }
}

/// Per-call browser timeout. Navigation, load wait and screenshot each get
/// one, plus the settle delay, and together they must end before the
/// service gives up on the route.
fn tab_timeout(navigation_timeout: Duration, settle_delay: Duration) -> Duration {
    let budget = navigation_timeout.saturating_sub(settle_delay) / 4;
    budget.max(Duration::from_millis(250))
}

/// Marks a snapshot as abandoned when its future is dropped, so the blocking
/// half does not write a file nobody will report.
struct AbandonOnDrop(Arc<AtomicBool>);

impl Drop for AbandonOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

struct ChromeSession {
    // Held so the browser process lives as long as the session.
    _browser: Browser,
    tab: Arc<Tab>,
    settle_delay: Duration,
}

#[async_trait]
impl PageSession for ChromeSession {
    async fn snapshot(&mut self, url: &str, dest: &Path) -> Result<(), PageError> {
        let tab = self.tab.clone();
        let url = url.to_string();
        let dest: PathBuf = dest.to_path_buf();
        let settle_delay = self.settle_delay;
        let abandoned = Arc::new(AtomicBool::new(false));
        let _guard = AbandonOnDrop(abandoned.clone());

        tokio::task::spawn_blocking(move || {
            debug!("Navigating to {}", url);
            tab.navigate_to(&url)
                .and_then(|tab| tab.wait_until_navigated())
                .map_err(|e| PageError::from_message(e.to_string()))?;

            std::thread::sleep(settle_delay);

            let png = tab
                .capture_screenshot(CaptureScreenshotFormatOption::Png, None, None, true)
                .map_err(|e| PageError::Render(format!("Screenshot failed: {}", e)))?;

            if abandoned.load(Ordering::SeqCst) {
                return Err(PageError::Render("snapshot abandoned".to_string()));
            }
            std::fs::write(&dest, png).map_err(|e| {
                PageError::Render(format!("Failed to write {}: {}", dest.display(), e))
            })
        })
        .await
        .map_err(|e| PageError::Render(format!("Snapshot task failed: {}", e)))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tab_timeout_fits_inside_route_budget() {
        let navigation = Duration::from_secs(30);
        let settle = Duration::from_secs(1);
        let per_call = tab_timeout(navigation, settle);
        assert!(per_call * 3 + settle < navigation);
    }

    #[test]
    fn test_tab_timeout_has_a_floor() {
        let per_call = tab_timeout(Duration::from_millis(500), Duration::from_secs(1));
        assert_eq!(per_call, Duration::from_millis(250));
    }

    #[test]
    fn test_abandon_flag_set_on_drop() {
        let flag = Arc::new(AtomicBool::new(false));
        drop(AbandonOnDrop(flag.clone()));
        assert!(flag.load(Ordering::SeqCst));
    }
}

// ABOUTME: Browser driver abstraction used by the capture service
// ABOUTME: A driver opens sessions; a session navigates and writes one snapshot at a time

use crate::error::{CaptureResult, PageError};
use async_trait::async_trait;
use std::path::Path;

/// Source of browser sessions.
#[async_trait]
pub trait PageDriver: Send + Sync {
    /// Open a fresh session. Dropping the session releases the browser.
    async fn open_session(&self) -> CaptureResult<Box<dyn PageSession>>;
}

/// A live browser session bound to one capture.
#[async_trait]
pub trait PageSession: Send {
    /// Navigate to `url`, wait for the page to settle and write a PNG to `dest`.
    async fn snapshot(&mut self, url: &str, dest: &Path) -> Result<(), PageError>;
}

// ABOUTME: Error types for snapshot capture
// ABOUTME: Separates whole-capture failures from per-route page failures

use thiserror::Error;

/// Failure of a capture as a whole.
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Failed to start browser session: {reason}")]
    Browser { reason: String },

    #[error("Unreachable: connection refused for all {routes} route(s) at {target}")]
    Unreachable { target: String, routes: usize },

    #[error("Capture IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type CaptureResult<T> = Result<T, CaptureError>;

/// Failure of a single page load or snapshot.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PageError {
    #[error("connection refused: {0}")]
    Refused(String),

    #[error("{0}")]
    Render(String),
}

impl PageError {
    /// Classify a browser error message. Chrome reports refused connections as
    /// `net::ERR_CONNECTION_REFUSED` in the navigation error text.
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        if message.contains("ERR_CONNECTION_REFUSED") {
            PageError::Refused(message)
        } else {
            PageError::Render(message)
        }
    }
}

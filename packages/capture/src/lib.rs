//! Labrun Capture - visual evidence for task results.
//!
//! Drives a headless browser across the routes of a running server (or a
//! rendered document) and persists one PNG snapshot per route, preserving the
//! requested route order.

pub mod chrome;
pub mod driver;
pub mod error;
pub mod service;
pub mod settings;
pub mod transcript;
pub mod types;

pub use chrome::ChromeDriver;
pub use driver::{PageDriver, PageSession};
pub use error::{CaptureError, CaptureResult, PageError};
pub use service::{CaptureService, Capturer};
pub use settings::CaptureSettings;
pub use transcript::Transcript;
pub use types::{Artifact, CaptureReport, CaptureTarget, RouteError};

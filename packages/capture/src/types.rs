// ABOUTME: Capture targets, artifacts and per-route errors
// ABOUTME: A report keeps snapshots in route order alongside the routes that failed

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// One persisted snapshot of a route.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub route: String,
    pub path: PathBuf,
}

/// A route that produced no snapshot, with the reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteError {
    pub route: String,
    pub reason: String,
}

/// What to point the browser at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureTarget {
    /// A running server reachable at `base_url` (scheme, host and port, no path).
    Server { base_url: String },
    /// A rendered document on local disk.
    Document { path: PathBuf },
}

impl CaptureTarget {
    pub fn describe(&self) -> String {
        match self {
            CaptureTarget::Server { base_url } => base_url.clone(),
            CaptureTarget::Document { path } => path.display().to_string(),
        }
    }

    /// Resolve the browser URL for `route`.
    pub fn url_for(&self, route: &str) -> String {
        match self {
            CaptureTarget::Server { base_url } => {
                let base = base_url.trim_end_matches('/');
                if route.starts_with('/') {
                    format!("{}{}", base, route)
                } else {
                    format!("{}/{}", base, route)
                }
            }
            CaptureTarget::Document { path } => format!("file://{}", path.display()),
        }
    }
}

/// Ordered capture outcome for one task.
///
/// `artifacts` and `route_errors` each preserve the order in which routes were
/// requested.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureReport {
    pub artifacts: Vec<Artifact>,
    pub route_errors: Vec<RouteError>,
}

impl CaptureReport {
    pub fn has_artifacts(&self) -> bool {
        !self.artifacts.is_empty()
    }

    /// Route errors flattened to one line each, for human-readable failure text.
    pub fn error_summary(&self) -> String {
        self.route_errors
            .iter()
            .map(|e| format!("{}: {}", e.route, e.reason))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_url_join() {
        let target = CaptureTarget::Server {
            base_url: "http://127.0.0.1:41000/".to_string(),
        };
        assert_eq!(target.url_for("/"), "http://127.0.0.1:41000/");
        assert_eq!(target.url_for("/about"), "http://127.0.0.1:41000/about");
        assert_eq!(target.url_for("about"), "http://127.0.0.1:41000/about");
    }

    #[test]
    fn test_document_url_ignores_route() {
        let target = CaptureTarget::Document {
            path: PathBuf::from("/tmp/transcript.html"),
        };
        assert_eq!(target.url_for("/"), "file:///tmp/transcript.html");
    }

    #[test]
    fn test_error_summary() {
        let report = CaptureReport {
            artifacts: vec![],
            route_errors: vec![
                RouteError {
                    route: "/a".to_string(),
                    reason: "blank page".to_string(),
                },
                RouteError {
                    route: "/b".to_string(),
                    reason: "timeout".to_string(),
                },
            ],
        };
        assert_eq!(report.error_summary(), "/a: blank page\n/b: timeout");
        assert!(!report.has_artifacts());
    }
}

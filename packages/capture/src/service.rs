// ABOUTME: Visual capture service: one snapshot per route, in route order
// ABOUTME: Records per-route failures and fails outright only when nothing is reachable

use crate::chrome::ChromeDriver;
use crate::driver::PageDriver;
use crate::error::{CaptureError, CaptureResult, PageError};
use crate::settings::CaptureSettings;
use crate::types::{Artifact, CaptureReport, CaptureTarget, RouteError};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Anything that can turn a target plus routes into snapshots.
#[async_trait]
pub trait Capturer: Send + Sync {
    async fn capture(
        &self,
        task_id: &str,
        target: &CaptureTarget,
        routes: &[String],
    ) -> CaptureResult<CaptureReport>;
}

#[derive(Clone)]
pub struct CaptureService {
    driver: Arc<dyn PageDriver>,
    settings: CaptureSettings,
}

impl CaptureService {
    pub fn new(driver: Arc<dyn PageDriver>, settings: CaptureSettings) -> Self {
        Self { driver, settings }
    }

    /// Service backed by headless Chrome.
    pub fn chrome(settings: CaptureSettings) -> Self {
        let driver = Arc::new(ChromeDriver::new(settings.clone()));
        Self::new(driver, settings)
    }

    pub fn settings(&self) -> &CaptureSettings {
        &self.settings
    }

    fn task_dir(&self, task_id: &str) -> PathBuf {
        let safe: String = task_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.settings.artifact_dir.join(safe)
    }
}

/// Routes a target should be captured under. A document has no routing, so it
/// is captured once under the first requested route.
fn plan_routes(target: &CaptureTarget, routes: &[String]) -> Vec<String> {
    match target {
        CaptureTarget::Server { .. } => routes.to_vec(),
        CaptureTarget::Document { .. } => {
            vec![routes.first().cloned().unwrap_or_else(|| "/".to_string())]
        }
    }
}

/// `00-root-1a2b3c4d.png`, `01-about-9f8e7d6c.png`, ...
fn artifact_file_name(index: usize, route: &str) -> String {
    let slug: String = route
        .trim_matches('/')
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '-' })
        .take(40)
        .collect();
    let slug = if slug.is_empty() { "root".to_string() } else { slug };
    let unique = Uuid::new_v4().simple().to_string();
    format!("{:02}-{}-{}.png", index, slug, &unique[..8])
}

#[async_trait]
impl Capturer for CaptureService {
    async fn capture(
        &self,
        task_id: &str,
        target: &CaptureTarget,
        routes: &[String],
    ) -> CaptureResult<CaptureReport> {
        let planned = plan_routes(target, routes);
        let dir = self.task_dir(task_id);
        tokio::fs::create_dir_all(&dir).await?;

        let mut session = Some(self.driver.open_session().await?);
        let mut report = CaptureReport::default();
        let mut refused = 0usize;

        for (index, route) in planned.iter().enumerate() {
            let url = target.url_for(route);
            let dest = dir.join(artifact_file_name(index, route));

            // A timed-out snapshot may still be driving the old page, so each
            // route after a timeout starts from a fresh session.
            if session.is_none() {
                match self.driver.open_session().await {
                    Ok(fresh) => session = Some(fresh),
                    Err(e) => {
                        warn!("Could not reopen browser for task {}: {}", task_id, e);
                        for rest in &planned[index..] {
                            report.route_errors.push(RouteError {
                                route: rest.clone(),
                                reason: e.to_string(),
                            });
                        }
                        break;
                    }
                }
            }
            let Some(active) = session.as_mut() else {
                break;
            };

            let outcome =
                tokio::time::timeout(self.settings.navigation_timeout, active.snapshot(&url, &dest))
                    .await;

            let reason = match outcome {
                Ok(Ok(())) => {
                    info!("Captured {} for task {} -> {}", route, task_id, dest.display());
                    report.artifacts.push(Artifact {
                        route: route.clone(),
                        path: dest,
                    });
                    continue;
                }
                Ok(Err(PageError::Refused(reason))) => {
                    refused += 1;
                    format!("connection refused: {}", reason)
                }
                Ok(Err(PageError::Render(reason))) => reason,
                Err(_) => {
                    session = None;
                    if let Err(e) = tokio::fs::remove_file(&dest).await {
                        if e.kind() != std::io::ErrorKind::NotFound {
                            warn!("Failed to remove partial snapshot {}: {}", dest.display(), e);
                        }
                    }
                    format!(
                        "page did not settle within {}s",
                        self.settings.navigation_timeout.as_secs()
                    )
                }
            };

            warn!("Route {} of task {} failed: {}", route, task_id, reason);
            report.route_errors.push(RouteError {
                route: route.clone(),
                reason,
            });
        }

        drop(session);

        if !planned.is_empty() && refused == planned.len() {
            return Err(CaptureError::Unreachable {
                target: target.describe(),
                routes: planned.len(),
            });
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_artifact_file_name_shape() {
        let name = artifact_file_name(1, "/about/team");
        assert!(name.starts_with("01-about-team-"));
        assert!(name.ends_with(".png"));

        let root = artifact_file_name(0, "/");
        assert!(root.starts_with("00-root-"));
    }

    #[test]
    fn test_document_plans_single_route() {
        let target = CaptureTarget::Document {
            path: PathBuf::from("/tmp/t.html"),
        };
        let routes = vec!["/".to_string(), "/x".to_string()];
        assert_eq!(plan_routes(&target, &routes), vec!["/".to_string()]);
    }
}

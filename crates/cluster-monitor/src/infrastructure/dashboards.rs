use async_trait::async_trait;
use error_stack::Report;
use error_stack::ResultExt;
use serde::Serialize;

use crate::domain::dashboard::ClusterBag;
use crate::domain::dashboard::TierBag;
use crate::domain::error::BackendError;
use crate::domain::traits::DashboardRenderer;

/// Tracing target the dashboard bags are written under.
pub const DASHBOARD_TARGET: &str = "dashboards";

/// Renders bags as JSON lines on the `dashboards` target.
///
/// The logging setup routes that target to its own file, which an external
/// renderer consumes.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogDashboardRenderer;

fn encode<T: Serialize>(bag: &T) -> Result<String, Report<BackendError>> {
    serde_json::to_string(bag).change_context(BackendError::Serialization {
        message: "Failed to encode dashboard bag".to_string(),
    })
}

#[async_trait]
impl DashboardRenderer for LogDashboardRenderer {
    async fn render_tier(&self, bag: &TierBag) -> Result<(), Report<BackendError>> {
        let line = encode(bag)?;
        tracing::info!(target: DASHBOARD_TARGET, kind = "tier", "{line}");
        Ok(())
    }

    async fn render_cluster(&self, bag: &ClusterBag) -> Result<(), Report<BackendError>> {
        let line = encode(bag)?;
        tracing::info!(target: DASHBOARD_TARGET, kind = "cluster", "{line}");
        Ok(())
    }
}

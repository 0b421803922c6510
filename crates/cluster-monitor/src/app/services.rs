use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::MonitorConfig;
use crate::domain::Batcher;
use crate::domain::DashboardTrigger;
use crate::domain::DispatchQueue;
use crate::domain::MetricsEngine;
use crate::domain::PodController;
use crate::domain::PodMirror;
use crate::infrastructure::k8s::CacheWatchers;
use crate::infrastructure::k8s::PodWatcher;

/// Application dependencies - simple struct with Arc-wrapped services
pub struct ApplicationServices {
    pub config: Arc<MonitorConfig>,
    pub mirror: Arc<PodMirror>,
    pub queue: Arc<DispatchQueue>,
    pub pod_watcher: Arc<PodWatcher>,
    pub cache_watchers: Arc<CacheWatchers>,
    pub controller: Arc<PodController>,
    pub batcher: Arc<Batcher>,
    pub metrics_engine: Arc<MetricsEngine>,
    pub dashboards: Arc<DashboardTrigger>,
    /// Shared by every task and by in-flight instrumentation waits.
    pub cancellation_token: CancellationToken,
}

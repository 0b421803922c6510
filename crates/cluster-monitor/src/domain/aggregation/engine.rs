use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::config::MonitorConfig;
use crate::domain::aggregation::Summaries;
use crate::domain::correlation::endpoint_record;
use crate::domain::dashboard::DashboardStats;
use crate::domain::dashboard::DashboardTrigger;
use crate::domain::dispatch::batcher::Batcher;
use crate::domain::mirror::PodMirror;
use crate::domain::pipeline::PodPipeline;
use crate::domain::records::EndpointRecord;
use crate::domain::records::NamespaceRecord;
use crate::domain::records::PodRecord;
use crate::domain::traits::TelemetryBackend;

/// Result of one metrics cycle.
pub struct CycleOutcome {
    pub summaries: Summaries,
    pub pods: usize,
    pub metrics: usize,
    pub endpoints: usize,
    pub namespaces: usize,
    /// Dashboard assembly started by this cycle.
    pub dashboards: JoinHandle<DashboardStats>,
}

/// Rebuilds every summary from the full pod snapshot on a fixed cadence.
pub struct MetricsEngine {
    config: Arc<MonitorConfig>,
    pipeline: Arc<PodPipeline>,
    mirror: Arc<PodMirror>,
    backend: Arc<dyn TelemetryBackend>,
    batcher: Arc<Batcher>,
    dashboards: Arc<DashboardTrigger>,
}

impl MetricsEngine {
    pub fn new(
        config: Arc<MonitorConfig>,
        pipeline: Arc<PodPipeline>,
        mirror: Arc<PodMirror>,
        backend: Arc<dyn TelemetryBackend>,
        batcher: Arc<Batcher>,
        dashboards: Arc<DashboardTrigger>,
    ) -> Self {
        Self {
            config,
            pipeline,
            mirror,
            backend,
            batcher,
            dashboards,
        }
    }

    #[tracing::instrument(skip_all)]
    pub async fn run(&self, cancellation_token: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.metrics_sync_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        info!(interval = ?self.config.metrics_sync_interval, "Starting metrics cycle");

        loop {
            tokio::select! {
                _ = cancellation_token.cancelled() => {
                    info!("Metrics cycle shutdown requested");
                    break;
                }
                _ = interval.tick() => {
                    let outcome = self.run_cycle().await;
                    debug!(pods = outcome.pods, metrics = outcome.metrics, "Metrics cycle finished");
                }
            }
        }
    }

    /// Resets the summaries, folds every qualifying pod and posts the results.
    pub async fn run_cycle(&self) -> CycleOutcome {
        let transaction = self.backend.start_transaction("PostPodMetrics");
        let caches = self.pipeline.caches();

        let endpoints: Vec<EndpointRecord> = caches
            .endpoints
            .take_updated()
            .iter()
            .map(|endpoints| endpoint_record(endpoints, &self.config.cluster_name))
            .collect();

        let mut summaries = Summaries::new();
        let mut records: Vec<Arc<PodRecord>> = Vec::new();
        for pod in self.mirror.snapshot() {
            let namespace = pod.metadata.namespace.as_deref().unwrap_or_default();
            if !self.config.qualifies(namespace) {
                continue;
            }
            let record = Arc::new(self.pipeline.transform(&pod, None).await.record);
            summaries.fold(&record, caches, &self.config);
            self.dashboards.eligibility().register(record.clone());
            records.push(record);
        }

        summaries.process_namespaces(caches, &self.config);
        let namespaces: Vec<NamespaceRecord> = caches
            .namespaces
            .take_updated()
            .iter()
            .map(|entry| entry.to_record(&self.config.cluster_name))
            .collect();
        self.batcher.post_namespaces(&namespaces).await;

        let metrics = summaries.flatten();
        if let Err(e) = self.backend.post_metrics(&metrics).await {
            warn!(count = metrics.len(), "Failed to post metrics: {e:?}");
        }
        self.batcher.post_endpoints(&endpoints).await;

        let pods = records.len();
        let dashboards = {
            let trigger = self.dashboards.clone();
            tokio::spawn(async move { trigger.build(&records).await })
        };

        self.backend.stop_transaction(transaction);
        CycleOutcome {
            summaries,
            pods,
            metrics: metrics.len(),
            endpoints: endpoints.len(),
            namespaces: namespaces.len(),
            dashboards,
        }
    }
}

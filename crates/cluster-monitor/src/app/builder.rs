use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use kube::Client;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::app::Application;
use crate::app::ApplicationServices;
use crate::config::MonitorArgs;
use crate::config::MonitorConfig;
use crate::domain::caches::CorrelationCaches;
use crate::domain::dashboard::DashboardEligibility;
use crate::domain::indexes::NamespaceIndex;
use crate::domain::indexes::OwnerIndex;
use crate::domain::pipeline::logs::LogCollector;
use crate::domain::traits::SystemClock;
use crate::domain::traits::TelemetryBackend;
use crate::domain::traits::TimeSource;
use crate::domain::Batcher;
use crate::domain::DashboardTrigger;
use crate::domain::DispatchQueue;
use crate::domain::InstrumentationTracker;
use crate::domain::MetricsEngine;
use crate::domain::PodController;
use crate::domain::PodMirror;
use crate::domain::PodPipeline;
use crate::infrastructure::backend::BackendSettings;
use crate::infrastructure::backend::HttpTelemetryBackend;
use crate::infrastructure::dashboards::LogDashboardRenderer;
use crate::infrastructure::instrumenter::HttpInstrumenter;
use crate::infrastructure::k8s::CacheWatchers;
use crate::infrastructure::k8s::KubeEventPublisher;
use crate::infrastructure::k8s::MetricsApiSource;
use crate::infrastructure::k8s::PodLogSource;
use crate::infrastructure::k8s::PodWatcher;
use crate::infrastructure::kube_client::init_kube_client;

/// Application builder
pub struct ApplicationBuilder {
    args: MonitorArgs,
}

impl ApplicationBuilder {
    pub fn new(args: MonitorArgs) -> Self {
        Self { args }
    }

    /// Build complete application
    pub async fn build(self) -> Result<Application> {
        tracing::info!("Building application components...");

        let config = Arc::new(MonitorConfig::from(&self.args));
        let client = init_kube_client(self.args.kubeconfig.clone())
            .await
            .map_err(|e| anyhow::anyhow!("Failed to initialize Kubernetes client: {e:?}"))?;
        let backend: Arc<dyn TelemetryBackend> = Arc::new(
            HttpTelemetryBackend::new(BackendSettings::from(&self.args))
                .map_err(|e| anyhow::anyhow!("Failed to create telemetry backend: {e:?}"))?,
        );
        let cancellation_token = CancellationToken::new();

        let components = self.create_core_components(&config, &client, &backend);
        let instrumentation = self.create_instrumentation(
            &config,
            &client,
            &components,
            cancellation_token.clone(),
        )?;

        let controller = Arc::new(PodController::new(
            components.pipeline.clone(),
            components.mirror.clone(),
            components.queue.clone(),
            components.eligibility.clone(),
            components.logs.clone(),
            backend.clone(),
            instrumentation,
            components.namespaces.clone(),
        ));
        let batcher = Arc::new(Batcher::new(backend.clone(), config.clone()));
        let metrics_engine = Arc::new(MetricsEngine::new(
            config.clone(),
            components.pipeline.clone(),
            components.mirror.clone(),
            backend,
            batcher.clone(),
            components.dashboards.clone(),
        ));

        let services = ApplicationServices {
            config,
            pod_watcher: Arc::new(PodWatcher::new(client.clone(), components.mirror.clone())),
            cache_watchers: Arc::new(CacheWatchers::new(client, &components.caches)),
            mirror: components.mirror,
            queue: components.queue,
            controller,
            batcher,
            metrics_engine,
            dashboards: components.dashboards,
            cancellation_token,
        };

        Ok(Application::new(services, self.args))
    }

    /// Create the caches, indexes and pipeline shared by the controller and
    /// the metrics engine
    fn create_core_components(
        &self,
        config: &Arc<MonitorConfig>,
        client: &Client,
        backend: &Arc<dyn TelemetryBackend>,
    ) -> CoreComponents {
        let caches = CorrelationCaches::new();
        let namespaces = Arc::new(NamespaceIndex::new());
        let clock: Arc<dyn TimeSource> = Arc::new(SystemClock);
        let queue = Arc::new(DispatchQueue::new());

        let pipeline = Arc::new(PodPipeline::new(
            config.clone(),
            caches.clone(),
            Arc::new(OwnerIndex::new()),
            namespaces.clone(),
            Arc::new(MetricsApiSource::new(client.clone())),
            clock.clone(),
        ));

        let eligibility = Arc::new(DashboardEligibility::new(config));
        let dashboards = Arc::new(DashboardTrigger::new(
            config.clone(),
            eligibility.clone(),
            Arc::new(LogDashboardRenderer),
            backend.clone(),
        ));

        let logs = Arc::new(LogCollector::new(
            Arc::new(PodLogSource::new(client.clone())),
            queue.clone(),
            clock,
        ));

        CoreComponents {
            caches,
            namespaces,
            mirror: Arc::new(PodMirror::new()),
            queue,
            pipeline,
            eligibility,
            dashboards,
            logs,
        }
    }

    /// Instrumentation is only wired when an injection service is configured
    fn create_instrumentation(
        &self,
        config: &Arc<MonitorConfig>,
        client: &Client,
        components: &CoreComponents,
        cancellation_token: CancellationToken,
    ) -> Result<Option<Arc<InstrumentationTracker>>> {
        let Some(url) = self
            .args
            .instrumentation_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
        else {
            tracing::info!("Instrumentation URL not set, instrumentation disabled");
            return Ok(None);
        };

        let url = Url::parse(url)?;
        let instrumenter = HttpInstrumenter::new(
            url,
            config.annotations.instrumented.clone(),
            config.instrumentation_timeout + Duration::from_secs(5),
        )
        .map_err(|e| anyhow::anyhow!("Failed to create instrumenter: {e:?}"))?;

        Ok(Some(Arc::new(InstrumentationTracker::new(
            config.clone(),
            Arc::new(instrumenter),
            Arc::new(KubeEventPublisher::new(client.clone())),
            components.eligibility.clone(),
            cancellation_token,
        ))))
    }
}

/// Core components collection
struct CoreComponents {
    caches: CorrelationCaches,
    namespaces: Arc<NamespaceIndex>,
    mirror: Arc<PodMirror>,
    queue: Arc<DispatchQueue>,
    pipeline: Arc<PodPipeline>,
    eligibility: Arc<DashboardEligibility>,
    dashboards: Arc<DashboardTrigger>,
    logs: Arc<LogCollector>,
}

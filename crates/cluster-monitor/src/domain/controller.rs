//! Pod event handling: the add, update and delete paths.

use std::collections::BTreeSet;
use std::sync::Arc;

use k8s_openapi::api::core::v1::Pod;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::domain::dashboard::DashboardEligibility;
use crate::domain::dispatch::DispatchQueue;
use crate::domain::indexes::NamespaceIndex;
use crate::domain::instrumentation::InstrumentationTracker;
use crate::domain::mirror::PodEvent;
use crate::domain::mirror::PodMirror;
use crate::domain::pipeline::logs::LogCollector;
use crate::domain::pipeline::owner_of;
use crate::domain::pipeline::PodPipeline;
use crate::domain::pipeline::Transformed;
use crate::domain::records::PodKey;
use crate::domain::records::PodRecord;
use crate::domain::traits::TelemetryBackend;

/// A mirrored pod, or only the owner of one that is gone.
#[derive(Debug, Clone)]
pub struct CachedPod {
    pub pod: Option<Arc<Pod>>,
    pub owner: Option<String>,
}

pub struct PodController {
    pipeline: Arc<PodPipeline>,
    mirror: Arc<PodMirror>,
    queue: Arc<DispatchQueue>,
    eligibility: Arc<DashboardEligibility>,
    logs: Arc<LogCollector>,
    backend: Arc<dyn TelemetryBackend>,
    instrumentation: Option<Arc<InstrumentationTracker>>,
    namespaces: Arc<NamespaceIndex>,
}

impl PodController {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pipeline: Arc<PodPipeline>,
        mirror: Arc<PodMirror>,
        queue: Arc<DispatchQueue>,
        eligibility: Arc<DashboardEligibility>,
        logs: Arc<LogCollector>,
        backend: Arc<dyn TelemetryBackend>,
        instrumentation: Option<Arc<InstrumentationTracker>>,
        namespaces: Arc<NamespaceIndex>,
    ) -> Self {
        Self {
            pipeline,
            mirror,
            queue,
            eligibility,
            logs,
            backend,
            instrumentation,
            namespaces,
        }
    }

    /// Consumes pod events until the channel closes or shutdown is requested.
    #[tracing::instrument(skip_all)]
    pub async fn run(
        &self,
        mut events: mpsc::Receiver<PodEvent>,
        cancellation_token: CancellationToken,
    ) {
        info!("Starting pod event dispatcher");
        loop {
            tokio::select! {
                _ = cancellation_token.cancelled() => {
                    info!("Pod event dispatcher shutdown requested");
                    break;
                }
                event = events.recv() => match event {
                    Some(event) => self.handle(event).await,
                    None => {
                        info!("Pod event channel closed");
                        break;
                    }
                }
            }
        }
    }

    pub async fn handle(&self, event: PodEvent) {
        let namespace = event.pod().metadata.namespace.as_deref().unwrap_or_default();
        if !self.pipeline.config().qualifies(namespace) {
            return;
        }
        match event {
            PodEvent::Added(pod) => self.on_add(pod).await,
            PodEvent::Updated { previous, current } => self.on_update(previous, current).await,
            PodEvent::Deleted(pod) => self.on_delete(pod).await,
        }
    }

    async fn on_add(&self, pod: Arc<Pod>) {
        let Transformed {
            record, log_tails, ..
        } = self.pipeline.transform(&pod, None).await;
        let record = Arc::new(record);
        debug!(namespace = %record.namespace, pod_name = %record.name, phase = %record.phase, "Pod added");

        self.queue.push(record.clone());
        self.eligibility.register(record.clone());
        self.logs.spawn(log_tails);
        self.evaluate_instrumentation(pod, record).await;
    }

    async fn on_update(&self, previous: Arc<Pod>, current: Arc<Pod>) {
        let Transformed {
            record,
            changed,
            log_tails,
        } = self.pipeline.transform(&current, Some(&previous)).await;
        let record = Arc::new(record);

        if changed {
            debug!(namespace = %record.namespace, pod_name = %record.name, phase = %record.phase, "Pod phase changed");
            self.queue.push(record.clone());
        }
        self.eligibility.register(record.clone());
        self.logs.spawn(log_tails);
        self.evaluate_instrumentation(current, record).await;
    }

    async fn on_delete(&self, pod: Arc<Pod>) {
        let Transformed { record, .. } = self.pipeline.transform(&pod, None).await;
        let record = Arc::new(record);
        debug!(namespace = %record.namespace, pod_name = %record.name, "Pod deleted");

        self.queue.push(record.clone());
        self.eligibility.forget(&record);
        if let Some(instrumentation) = &self.instrumentation {
            instrumentation.forget(&record.key());
        }

        if record.node_id > 0 {
            match self.backend.deregister_node(record.node_id).await {
                Ok(()) => info!(node_id = record.node_id, pod_name = %record.name, "Deregistered backend node"),
                Err(e) => warn!(node_id = record.node_id, "Failed to deregister backend node: {e:?}"),
            }
        }
    }

    async fn evaluate_instrumentation(&self, pod: Arc<Pod>, record: Arc<PodRecord>) {
        if let Some(instrumentation) = &self.instrumentation {
            let outcome = instrumentation.evaluate(pod, record).await;
            debug!(?outcome, "Instrumentation evaluated");
        }
    }

    /// Re-transforms and queues every mirrored pod of a namespace.
    pub async fn cache_updated(&self, namespace: &str) -> usize {
        if !self.pipeline.config().qualifies(namespace) {
            return 0;
        }
        let mut queued = 0;
        for pod in self
            .mirror
            .snapshot()
            .into_iter()
            .filter(|pod| pod.metadata.namespace.as_deref() == Some(namespace))
        {
            let record = Arc::new(self.pipeline.transform(&pod, None).await.record);
            if self.queue.push(record) {
                queued += 1;
            }
        }
        debug!(namespace = %namespace, queued, "Namespace pods re-queued");
        queued
    }

    pub fn cached_pod(&self, namespace: &str, name: &str) -> CachedPod {
        let key = PodKey::new(namespace, name);
        match self.mirror.get(&key) {
            Some(pod) => CachedPod {
                owner: Some(owner_of(&pod)),
                pod: Some(pod),
            },
            None => CachedPod {
                pod: None,
                owner: self.pipeline.owners().owner(&key),
            },
        }
    }

    pub fn known_namespaces(&self) -> BTreeSet<String> {
        self.namespaces.snapshot()
    }

    /// Workloads currently held for dashboarding.
    pub fn known_deployments(&self) -> Vec<(String, String)> {
        self.eligibility.workloads()
    }
}

#[cfg(test)]
mod tests {
    use k8s_openapi::api::core::v1::ConfigMap;
    use k8s_openapi::api::core::v1::ConfigMapEnvSource;
    use k8s_openapi::api::core::v1::EnvFromSource;

    use super::*;
    use crate::config::MonitorConfig;
    use crate::domain::caches::CorrelationCaches;
    use crate::domain::dispatch::QueueItem;
    use crate::domain::indexes::OwnerIndex;
    use crate::domain::mock::FixedClock;
    use crate::domain::mock::RecordingBackend;
    use crate::domain::mock::RecordingEvents;
    use crate::domain::mock::ScriptedInstrumenter;
    use crate::domain::mock::StaticLogSource;
    use crate::domain::mock::StaticMetricsSource;
    use crate::domain::pipeline::tests::pod;

    struct Fixture {
        controller: PodController,
        mirror: Arc<PodMirror>,
        queue: Arc<DispatchQueue>,
        backend: Arc<RecordingBackend>,
        caches: CorrelationCaches,
        instrumenter: Arc<ScriptedInstrumenter>,
    }

    fn fixture(config: MonitorConfig) -> Fixture {
        let config = Arc::new(config);
        let caches = CorrelationCaches::new();
        let owners = Arc::new(OwnerIndex::new());
        let namespaces = Arc::new(NamespaceIndex::new());
        let clock = Arc::new(FixedClock::new(1_000_000));
        let pipeline = Arc::new(PodPipeline::new(
            config.clone(),
            caches.clone(),
            owners,
            namespaces.clone(),
            Arc::new(StaticMetricsSource::new()),
            clock.clone(),
        ));
        let mirror = Arc::new(PodMirror::new());
        let queue = Arc::new(DispatchQueue::new());
        let backend = Arc::new(RecordingBackend::new());
        let eligibility = Arc::new(DashboardEligibility::new(&config));
        let instrumenter = Arc::new(ScriptedInstrumenter::succeeding(""));
        let tracker = Arc::new(InstrumentationTracker::new(
            config.clone(),
            instrumenter.clone(),
            Arc::new(RecordingEvents::new()),
            eligibility.clone(),
            CancellationToken::new(),
        ));
        let logs = Arc::new(LogCollector::new(
            Arc::new(StaticLogSource::new("")),
            queue.clone(),
            clock,
        ));
        let controller = PodController::new(
            pipeline,
            mirror.clone(),
            queue.clone(),
            eligibility,
            logs,
            backend.clone(),
            Some(tracker),
            namespaces,
        );
        Fixture {
            controller,
            mirror,
            queue,
            backend,
            caches,
            instrumenter,
        }
    }

    fn queued_phases(queue: &DispatchQueue) -> Vec<String> {
        let mut phases = Vec::new();
        while let Some(item) = queue.try_pop() {
            if let QueueItem::Pod(record) = item {
                phases.push(record.phase.clone());
            }
        }
        phases
    }

    #[test_log::test(tokio::test)]
    async fn update_queues_only_on_phase_change_but_always_evaluates() {
        let fixture = fixture(MonitorConfig::default());
        let added = fixture.mirror.apply(pod("ns1", "web-1", &[("name", "web")], "Running"));
        fixture.controller.handle(added).await;
        assert_eq!(queued_phases(&fixture.queue), vec!["Running".to_string()]);

        let mut relabelled = pod("ns1", "web-1", &[("name", "web")], "Running");
        relabelled
            .metadata
            .labels
            .get_or_insert_with(Default::default)
            .insert("rev".to_string(), "2".to_string());
        let updated = fixture.mirror.apply(relabelled);
        fixture.controller.handle(updated).await;
        assert!(fixture.queue.is_empty());

        let failed = fixture.mirror.apply(pod("ns1", "web-1", &[("name", "web")], "Failed"));
        fixture.controller.handle(failed).await;
        assert_eq!(queued_phases(&fixture.queue), vec!["Failed".to_string()]);

        // The successful first attempt marks the pod instrumented.
        assert_eq!(fixture.instrumenter.attempts(), 1);
    }

    #[tokio::test]
    async fn delete_always_queues_and_deregisters_the_backend_node() {
        let fixture = fixture(MonitorConfig::default());
        let mut tracked = pod("ns1", "web-1", &[("name", "web")], "Running");
        tracked.metadata.annotations =
            Some([("cluster-monitor/node-id".to_string(), "42".to_string())].into());
        fixture.mirror.apply(tracked.clone());

        let deleted = fixture.mirror.delete(tracked);
        fixture.controller.handle(deleted).await;

        assert_eq!(fixture.queue.len(), 1);
        assert_eq!(fixture.backend.deregistered_nodes(), vec![42]);
        let cached = fixture.controller.cached_pod("ns1", "web-1");
        assert!(cached.pod.is_none());
        assert_eq!(cached.owner.as_deref(), Some("web"));
    }

    #[tokio::test]
    async fn excluded_namespaces_are_ignored() {
        let fixture = fixture(MonitorConfig {
            include_namespaces: vec!["ns1".to_string()],
            ..Default::default()
        });
        let added = fixture.mirror.apply(pod("other", "x-1", &[], "Running"));
        fixture.controller.handle(added).await;
        assert!(fixture.queue.is_empty());
        assert!(fixture.controller.known_namespaces().is_empty());
    }

    #[tokio::test]
    async fn cache_update_requeues_the_namespace_with_fresh_dependencies() {
        let fixture = fixture(MonitorConfig::default());
        let mut dependent = pod("ns1", "web-1", &[("name", "web")], "Running");
        if let Some(spec) = dependent.spec.as_mut() {
            spec.containers[0].env_from = Some(vec![EnvFromSource {
                config_map_ref: Some(ConfigMapEnvSource {
                    name: Some("settings".to_string()),
                    optional: None,
                }),
                ..Default::default()
            }]);
        }
        fixture.mirror.apply(dependent);
        fixture.mirror.apply(pod("ns2", "api-1", &[], "Running"));

        fixture.caches.config_maps.insert("ns1/settings".to_string(), ConfigMap::default());
        assert_eq!(fixture.controller.cache_updated("ns1").await, 1);

        let Some(QueueItem::Pod(record)) = fixture.queue.try_pop() else {
            panic!("expected a requeued pod");
        };
        assert_eq!(record.name, "web-1");
        assert!(!record.missing_dependencies);
    }
}

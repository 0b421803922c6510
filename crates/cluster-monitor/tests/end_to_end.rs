use std::sync::Arc;

use cluster_monitor::config::MonitorConfig;
use cluster_monitor::domain::caches::CorrelationCaches;
use cluster_monitor::domain::dashboard::DashboardEligibility;
use cluster_monitor::domain::dispatch::QueueItem;
use cluster_monitor::domain::indexes::NamespaceIndex;
use cluster_monitor::domain::indexes::OwnerIndex;
use cluster_monitor::domain::mock::FixedClock;
use cluster_monitor::domain::mock::RecordingBackend;
use cluster_monitor::domain::mock::RecordingRenderer;
use cluster_monitor::domain::mock::StaticLogSource;
use cluster_monitor::domain::mock::StaticMetricsSource;
use cluster_monitor::domain::pipeline::logs::LogCollector;
use cluster_monitor::domain::Batcher;
use cluster_monitor::domain::DashboardTrigger;
use cluster_monitor::domain::DispatchQueue;
use cluster_monitor::domain::MetricsEngine;
use cluster_monitor::domain::PodController;
use cluster_monitor::domain::PodMirror;
use cluster_monitor::domain::PodPipeline;
use k8s_openapi::api::core::v1::Container;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::api::core::v1::PodSpec;
use k8s_openapi::api::core::v1::PodStatus;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use similar_asserts::assert_eq;

struct Monitor {
    controller: PodController,
    engine: MetricsEngine,
    batcher: Arc<Batcher>,
    mirror: Arc<PodMirror>,
    queue: Arc<DispatchQueue>,
    backend: Arc<RecordingBackend>,
}

fn monitor(config: MonitorConfig) -> Monitor {
    let config = Arc::new(config);
    let namespaces = Arc::new(NamespaceIndex::new());
    let clock = Arc::new(FixedClock::new(1_000_000));
    let backend = Arc::new(RecordingBackend::new());
    let mirror = Arc::new(PodMirror::new());
    let queue = Arc::new(DispatchQueue::new());
    let pipeline = Arc::new(PodPipeline::new(
        config.clone(),
        CorrelationCaches::new(),
        Arc::new(OwnerIndex::new()),
        namespaces.clone(),
        Arc::new(StaticMetricsSource::new()),
        clock.clone(),
    ));
    let eligibility = Arc::new(DashboardEligibility::new(&config));
    let logs = Arc::new(LogCollector::new(
        Arc::new(StaticLogSource::new("")),
        queue.clone(),
        clock,
    ));
    let controller = PodController::new(
        pipeline.clone(),
        mirror.clone(),
        queue.clone(),
        eligibility.clone(),
        logs,
        backend.clone(),
        None,
        namespaces,
    );
    let batcher = Arc::new(Batcher::new(backend.clone(), config.clone()));
    let dashboards = Arc::new(DashboardTrigger::new(
        config.clone(),
        eligibility,
        Arc::new(RecordingRenderer::new()),
        backend.clone(),
    ));
    let engine = MetricsEngine::new(
        config,
        pipeline,
        mirror.clone(),
        backend.clone(),
        batcher.clone(),
        dashboards,
    );
    Monitor {
        controller,
        engine,
        batcher,
        mirror,
        queue,
        backend,
    }
}

/// A running pod with one container, no limits and no probes.
fn bare_pod(namespace: &str, name: &str) -> Pod {
    Pod {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some([("name".to_string(), "web".to_string())].into()),
            ..Default::default()
        },
        spec: Some(PodSpec {
            node_name: Some("node-a".to_string()),
            containers: vec![Container {
                name: "app".to_string(),
                image: Some("web:1".to_string()),
                ..Default::default()
            }],
            ..Default::default()
        }),
        status: Some(PodStatus {
            phase: Some("Running".to_string()),
            ..Default::default()
        }),
    }
}

#[test_log::test(tokio::test)]
async fn added_pod_flows_from_watch_event_to_summaries_and_backend() {
    let monitor = monitor(MonitorConfig::default());

    let event = monitor.mirror.apply(bare_pod("ns1", "web-1"));
    monitor.controller.handle(event).await;

    assert_eq!(monitor.queue.len(), 1);
    let Some(QueueItem::Pod(record)) = monitor.queue.try_pop() else {
        panic!("expected a queued pod record");
    };
    assert_eq!(record.owner, "web");
    assert!(!record.limits_defined);
    assert_eq!(record.live_probes, 1);
    assert!(record.services.is_empty());

    let outcome = monitor.engine.run_cycle().await;
    let cluster = outcome.summaries.cluster.as_ref().unwrap();
    let namespace = &outcome.summaries.namespaces["ns1"];
    for summary in [cluster, namespace] {
        assert_eq!(summary.pod_count, 1);
        assert_eq!(summary.pod_running, 1);
        assert_eq!(summary.no_liveness_probe, 1);
        assert_eq!(summary.no_limits, 1);
    }
}

#[test_log::test(tokio::test)]
async fn queued_records_are_posted_in_bounded_batches() {
    let monitor = monitor(MonitorConfig {
        event_api_limit: 3,
        ..Default::default()
    });

    for index in 0..7 {
        let event = monitor.mirror.apply(bare_pod("ns1", &format!("web-{index}")));
        monitor.controller.handle(event).await;
    }
    assert_eq!(monitor.queue.len(), 7);

    let stats = monitor.batcher.flush(&monitor.queue).await;

    assert_eq!(stats.pod_batches, 3);
    assert_eq!(stats.pods, 7);
    assert_eq!(stats.containers, 7);
    assert_eq!(monitor.backend.batch_sizes("cluster_monitor_pods"), vec![3, 3, 1]);
    assert_eq!(
        monitor.backend.batch_sizes("cluster_monitor_containers"),
        vec![3, 3, 1]
    );
    assert!(monitor.queue.is_empty());
}

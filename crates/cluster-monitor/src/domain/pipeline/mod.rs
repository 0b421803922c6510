//! Pod transformation pipeline.
//!
//! Turns a raw pod (plus the previous observation, when there is one) into a
//! canonical [`PodRecord`], joining it against the correlation caches. The
//! only impure inputs are the clock, the metrics query for running pods and
//! the owner/namespace indexes it records into.

mod containers;
pub mod logs;
mod scheduling;
mod status;

use std::collections::BTreeMap;
use std::fmt::Write;
use std::sync::Arc;

use k8s_openapi::api::core::v1::Pod;
use tracing::warn;

use crate::config::MonitorConfig;
use crate::domain::caches::cache_key;
use crate::domain::caches::CorrelationCaches;
use crate::domain::caches::ServiceEntry;
use crate::domain::correlation::endpoint_matches_pod;
use crate::domain::indexes::NamespaceIndex;
use crate::domain::indexes::OwnerIndex;
use crate::domain::records::PodKey;
use crate::domain::records::PodRecord;
use crate::domain::records::REASON_EVICTED;
use crate::domain::traits::LogTailRequest;
use crate::domain::traits::PodMetricsSource;
use crate::domain::traits::TimeSource;

pub use status::RESTART_LOG_THRESHOLD;

/// Output of one pipeline run.
#[derive(Debug, Clone)]
pub struct Transformed {
    pub record: PodRecord,
    /// Set only when a previous observation exists and the phase differs.
    pub changed: bool,
    /// Log tails due for crash-looping containers.
    pub log_tails: Vec<LogTailRequest>,
}

pub struct PodPipeline {
    config: Arc<MonitorConfig>,
    caches: CorrelationCaches,
    owners: Arc<OwnerIndex>,
    namespaces: Arc<NamespaceIndex>,
    metrics: Arc<dyn PodMetricsSource>,
    clock: Arc<dyn TimeSource>,
}

impl PodPipeline {
    pub fn new(
        config: Arc<MonitorConfig>,
        caches: CorrelationCaches,
        owners: Arc<OwnerIndex>,
        namespaces: Arc<NamespaceIndex>,
        metrics: Arc<dyn PodMetricsSource>,
        clock: Arc<dyn TimeSource>,
    ) -> Self {
        Self {
            config,
            caches,
            owners,
            namespaces,
            metrics,
            clock,
        }
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn caches(&self) -> &CorrelationCaches {
        &self.caches
    }

    pub fn owners(&self) -> &OwnerIndex {
        &self.owners
    }

    pub fn namespaces(&self) -> &NamespaceIndex {
        &self.namespaces
    }

    pub async fn transform(&self, pod: &Pod, previous: Option<&Pod>) -> Transformed {
        let (mut record, log_tails) = self.build(pod);

        if record.is_running() {
            self.apply_usage(&mut record).await;
        }

        let changed = previous.is_some_and(|previous| phase_of(previous) != record.phase);
        Transformed {
            record,
            changed,
            log_tails,
        }
    }

    fn build(&self, pod: &Pod) -> (PodRecord, Vec<LogTailRequest>) {
        let metadata = &pod.metadata;
        let empty = BTreeMap::new();
        let labels = metadata.labels.as_ref().unwrap_or(&empty);
        let annotations = metadata.annotations.as_ref().unwrap_or(&empty);

        let mut record = PodRecord {
            name: metadata.name.clone().unwrap_or_default(),
            namespace: metadata.namespace.clone().unwrap_or_default(),
            node_name: pod
                .spec
                .as_ref()
                .and_then(|spec| spec.node_name.clone())
                .unwrap_or_default(),
            cluster_name: self.config.cluster_name.clone(),
            owner: owner_of(pod),
            labels: key_value_text(labels),
            annotations: key_value_text(annotations),
            ..Default::default()
        };
        self.owners.record(record.key(), &record.owner);
        self.namespaces.record(&record.namespace);

        record.app_name = labels
            .get(&self.config.app_label)
            .cloned()
            .unwrap_or_else(|| record.owner.clone());
        record.tier_name = labels
            .get(&self.config.tier_label)
            .cloned()
            .unwrap_or_else(|| record.owner.clone());
        self.apply_identity_annotations(annotations, &mut record);

        if let Some(status) = &pod.status {
            record.host_ip = status.host_ip.clone().unwrap_or_default();
            record.pod_ip = status.pod_ip.clone().unwrap_or_default();
            record.phase = status.phase.clone().unwrap_or_default();
            record.reason = status.reason.clone().unwrap_or_default();
            record.is_evicted = record.reason == REASON_EVICTED;
            record.start_time_millis = status.start_time.as_ref().map(status::millis).unwrap_or(0);
        }
        record.termination_time_millis = metadata
            .deletion_timestamp
            .as_ref()
            .map(status::millis)
            .unwrap_or(0);

        if let Some(spec) = &pod.spec {
            if !record.is_evicted {
                let all_containers = spec
                    .containers
                    .iter()
                    .chain(spec.init_containers.iter().flatten());
                let services: Vec<ServiceEntry> = self
                    .caches
                    .services
                    .snapshot()
                    .into_iter()
                    .filter(|service| {
                        service.matches_pod(
                            &record.namespace,
                            labels,
                            all_containers.clone().flat_map(|c| c.ports.iter().flatten()),
                        )
                    })
                    .collect();
                record.services = services.iter().map(ServiceEntry::key).collect();
                record.endpoints = self.caches.endpoints.read(|entries| {
                    entries
                        .iter()
                        .filter(|(_, endpoints)| {
                            endpoint_matches_pod(endpoints, &record.namespace, labels)
                        })
                        .map(|(key, _)| key.clone())
                        .collect()
                });

                for container in &spec.containers {
                    let processed = containers::process_container(
                        pod,
                        &mut record,
                        container,
                        false,
                        &services,
                        &self.caches,
                    );
                    record.container_count += 1;
                    record.containers.insert(processed.name.clone(), processed);
                }
                for container in spec.init_containers.iter().flatten() {
                    let processed = containers::process_container(
                        pod,
                        &mut record,
                        container,
                        true,
                        &services,
                        &self.caches,
                    );
                    record.init_container_count += 1;
                    record.init_containers.insert(processed.name.clone(), processed);
                }

                record.limits_defined = !record.containers.is_empty()
                    && record.containers.values().all(|c| c.limits_defined);
                let every = || record.containers.values().chain(record.init_containers.values());
                record.missing_dependencies = every().any(|c| c.has_missing_dependencies());
                record.no_connectivity = every().any(|c| c.has_no_connectivity());
            }
            scheduling::apply(spec, &mut record);
        }

        // Evicted pods keep only identity, phase and eviction data
        let mut log_tails = Vec::new();
        if record.is_evicted {
            return (record, log_tails);
        }
        if let Some(status) = &pod.status {
            status::apply_last_condition(status, &mut record);
            log_tails = status::fold_container_statuses(status, &mut record, &self.config);
        }
        status::compute_timing(&mut record, self.clock.now_millis());

        (record, log_tails)
    }

    /// Backend identifiers come from annotations; unparseable values are left at zero.
    fn apply_identity_annotations(
        &self,
        annotations: &BTreeMap<String, String>,
        record: &mut PodRecord,
    ) {
        let keys = &self.config.annotations;
        for (key, target) in [
            (&keys.app_id, &mut record.app_id),
            (&keys.tier_id, &mut record.tier_id),
            (&keys.node_id, &mut record.node_id),
        ] {
            let Some(value) = annotations.get(key) else {
                continue;
            };
            match value.trim().parse::<i64>() {
                Ok(id) => *target = id,
                Err(e) => warn!(
                    namespace = %record.namespace,
                    pod_name = %record.name,
                    annotation = %key,
                    value = %value,
                    "Ignoring non-numeric identity annotation: {e}"
                ),
            }
        }
        if let Some(name) = annotations.get(&keys.node_name) {
            record.apm_node_name = name.clone();
        }
    }

    async fn apply_usage(&self, record: &mut PodRecord) {
        match self.metrics.pod_usage(&record.namespace, &record.name).await {
            Ok(Some(usage)) => {
                let total = usage.total();
                record.cpu_use = total.cpu;
                record.mem_use = total.memory;
                let all_containers = record
                    .containers
                    .iter_mut()
                    .chain(record.init_containers.iter_mut());
                for (name, container) in all_containers {
                    let used = usage.container(name);
                    container.cpu_use = used.cpu;
                    container.mem_use = used.memory;
                }
            }
            Ok(None) => {}
            Err(e) => warn!(
                namespace = %record.namespace,
                pod_name = %record.name,
                "Failed to query pod usage: {e:?}"
            ),
        }
    }
}

/// Owning workload: a `name` label (exact key first, then any casing), else
/// the first owner reference, else the pod itself.
pub fn owner_of(pod: &Pod) -> String {
    let metadata = &pod.metadata;
    if let Some(labels) = &metadata.labels {
        if let Some(name) = labels.get("name") {
            return name.clone();
        }
        if let Some((_, name)) = labels.iter().find(|(key, _)| key.eq_ignore_ascii_case("name")) {
            return name.clone();
        }
    }
    if let Some(reference) = metadata.owner_references.iter().flatten().next() {
        return reference.name.clone();
    }
    metadata.name.clone().unwrap_or_default()
}

pub fn phase_of(pod: &Pod) -> &str {
    pod.status
        .as_ref()
        .and_then(|status| status.phase.as_deref())
        .unwrap_or_default()
}

pub fn pod_key(pod: &Pod) -> PodKey {
    PodKey::new(
        pod.metadata.namespace.clone().unwrap_or_default(),
        pod.metadata.name.clone().unwrap_or_default(),
    )
}

/// Cache key of the pod in the mirror.
pub fn pod_cache_key(pod: &Pod) -> String {
    cache_key(
        pod.metadata.namespace.as_deref().unwrap_or_default(),
        pod.metadata.name.as_deref().unwrap_or_default(),
    )
}

fn key_value_text(map: &BTreeMap<String, String>) -> String {
    map.iter().fold(String::new(), |mut out, (key, value)| {
        let _ = write!(out, "{key}:{value};");
        out
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use k8s_openapi::api::core::v1::Container;
    use k8s_openapi::api::core::v1::ContainerPort;
    use k8s_openapi::api::core::v1::ContainerStatus;
    use k8s_openapi::api::core::v1::PodCondition;
    use k8s_openapi::api::core::v1::PodSpec;
    use k8s_openapi::api::core::v1::PodStatus;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;

    use super::*;
    use crate::domain::caches::ServicePortEntry;
    use crate::domain::caches::TargetPort;
    use crate::domain::mock::FixedClock;
    use crate::domain::mock::StaticMetricsSource;
    use crate::domain::traits::ContainerUsage;
    use crate::domain::traits::PodUsage;

    /// A one-container pod listening on 8080 with the given labels and phase.
    pub(crate) fn pod(namespace: &str, name: &str, labels: &[(&str, &str)], phase: &str) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                labels: Some(
                    labels
                        .iter()
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                        .collect(),
                ),
                ..Default::default()
            },
            spec: Some(PodSpec {
                node_name: Some("node-a".to_string()),
                containers: vec![Container {
                    name: "app".to_string(),
                    image: Some("web:1".to_string()),
                    ports: Some(vec![ContainerPort {
                        container_port: 8080,
                        ..Default::default()
                    }]),
                    ..Default::default()
                }],
                ..Default::default()
            }),
            status: Some(PodStatus {
                phase: Some(phase.to_string()),
                ..Default::default()
            }),
        }
    }

    pub(crate) fn pipeline_with(caches: CorrelationCaches, metrics: StaticMetricsSource) -> PodPipeline {
        PodPipeline::new(
            Arc::new(MonitorConfig::default()),
            caches,
            Arc::new(OwnerIndex::new()),
            Arc::new(NamespaceIndex::new()),
            Arc::new(metrics),
            Arc::new(FixedClock::new(1_000_000)),
        )
    }

    fn service(target: i32) -> ServiceEntry {
        ServiceEntry {
            name: "web".to_string(),
            namespace: "ns1".to_string(),
            selector: [("name".to_string(), "web".to_string())].into(),
            ports: vec![ServicePortEntry {
                name: None,
                port: 80,
                target: TargetPort::Number(target),
            }],
            has_external_service: false,
        }
    }

    #[test]
    fn owner_prefers_name_label_then_owner_reference() {
        let mut labelled = pod("ns1", "web-1", &[("Name", "web")], "Running");
        assert_eq!(owner_of(&labelled), "web");

        labelled.metadata.labels = None;
        labelled.metadata.owner_references = Some(vec![OwnerReference {
            name: "web-5d8f".to_string(),
            ..Default::default()
        }]);
        assert_eq!(owner_of(&labelled), "web-5d8f");

        labelled.metadata.owner_references = None;
        assert_eq!(owner_of(&labelled), "web-1");
    }

    #[tokio::test]
    async fn transformation_is_idempotent_under_a_fixed_clock() {
        let caches = CorrelationCaches::new();
        caches.services.insert(service(8080).key(), service(8080));
        let metrics = StaticMetricsSource::new().with_usage(
            "ns1",
            "web-1",
            PodUsage {
                containers: [("app".to_string(), ContainerUsage { cpu: 12, memory: 2048 })].into(),
            },
        );
        let pipeline = pipeline_with(caches, metrics);
        let pod = pod("ns1", "web-1", &[("name", "web")], "Running");

        let first = pipeline.transform(&pod, None).await;
        let second = pipeline.transform(&pod, None).await;

        similar_asserts::assert_eq!(first.record, second.record);
        assert_eq!(
            serde_json::to_string(&first.record).unwrap(),
            serde_json::to_string(&second.record).unwrap()
        );
        assert_eq!(first.record.cpu_use, 12);
        assert_eq!(first.record.containers["app"].mem_use, 2048);
        assert_eq!(first.record.services, vec!["ns1/web".to_string()]);
    }

    #[tokio::test]
    async fn only_a_phase_change_marks_the_record_changed() {
        let pipeline = pipeline_with(CorrelationCaches::new(), StaticMetricsSource::new());
        let previous = pod("ns1", "web-1", &[("name", "web")], "Pending");

        let mut relabelled = previous.clone();
        relabelled
            .metadata
            .labels
            .get_or_insert_with(BTreeMap::new)
            .insert("extra".to_string(), "x".to_string());
        assert!(!pipeline.transform(&relabelled, Some(&previous)).await.changed);

        let running = pod("ns1", "web-1", &[("name", "web")], "Running");
        assert!(pipeline.transform(&running, Some(&previous)).await.changed);

        assert!(!pipeline.transform(&running, None).await.changed);
    }

    #[tokio::test]
    async fn port_is_mapped_only_when_a_service_exposes_it() {
        let caches = CorrelationCaches::new();
        caches.services.insert(service(9090).key(), service(9090));
        let pipeline = pipeline_with(caches.clone(), StaticMetricsSource::new());
        let pod = pod("ns1", "web-1", &[("name", "web")], "Running");

        let unmapped = pipeline.transform(&pod, None).await.record;
        let port = &unmapped.containers["app"].container_ports[0];
        assert_eq!(port.port_number, 8080);
        assert!(!port.mapped);
        assert_eq!(unmapped.containers["app"].missing_services, "8080;");
        assert!(unmapped.no_connectivity);

        let mut exposing = service(9090);
        exposing.ports.push(ServicePortEntry {
            name: Some("http".to_string()),
            port: 8080,
            target: TargetPort::Number(8080),
        });
        caches.services.insert(exposing.key(), exposing);

        let mapped = pipeline.transform(&pod, None).await.record;
        assert!(mapped.containers["app"].container_ports[0].mapped);
        assert!(mapped.containers["app"].missing_services.is_empty());
    }

    #[tokio::test]
    async fn evicted_pod_skips_correlation_and_containers() {
        let caches = CorrelationCaches::new();
        caches.services.insert(service(8080).key(), service(8080));
        let pipeline = pipeline_with(caches, StaticMetricsSource::new());
        let mut evicted = pod("ns1", "web-1", &[("name", "web")], "Failed");
        if let Some(status) = evicted.status.as_mut() {
            status.reason = Some("Evicted".to_string());
            status.conditions = Some(vec![PodCondition {
                type_: "Ready".to_string(),
                status: "False".to_string(),
                reason: Some("PodFailed".to_string()),
                ..Default::default()
            }]);
            status.container_statuses = Some(vec![ContainerStatus {
                name: "app".to_string(),
                restart_count: 5,
                ..Default::default()
            }]);
        }

        let record = pipeline.transform(&evicted, None).await.record;
        assert!(record.is_evicted);
        assert!(record.services.is_empty());
        assert!(record.containers.is_empty());
        assert_eq!(record.container_count, 0);
        assert_eq!(record.live_probes, 0);
        assert_eq!(record.pod_restarts, 0);
        assert_eq!(record.type_condition, "");
        assert_eq!(record.reason_condition, "");
        assert_eq!(record.status_condition, "");
        assert_eq!(record.last_transition_time_condition, None);
        assert_eq!(record.up_time_millis, 0);
    }

    #[tokio::test]
    async fn usage_is_filled_for_init_containers_too() {
        let mut with_init = pod("ns1", "web-1", &[("name", "web")], "Running");
        if let Some(spec) = with_init.spec.as_mut() {
            spec.init_containers = Some(vec![Container {
                name: "setup".to_string(),
                image: Some("setup:1".to_string()),
                ..Default::default()
            }]);
        }
        let metrics = StaticMetricsSource::new().with_usage(
            "ns1",
            "web-1",
            PodUsage {
                containers: [
                    ("app".to_string(), ContainerUsage { cpu: 12, memory: 2048 }),
                    ("setup".to_string(), ContainerUsage { cpu: 3, memory: 512 }),
                ]
                .into(),
            },
        );
        let pipeline = pipeline_with(CorrelationCaches::new(), metrics);

        let record = pipeline.transform(&with_init, None).await.record;
        assert_eq!(record.containers["app"].cpu_use, 12);
        assert_eq!(record.init_containers["setup"].cpu_use, 3);
        assert_eq!(record.init_containers["setup"].mem_use, 512);
        assert_eq!(record.cpu_use, 15);
    }

    #[tokio::test]
    async fn identity_annotations_are_parsed_and_bad_values_ignored() {
        let pipeline = pipeline_with(CorrelationCaches::new(), StaticMetricsSource::new());
        let mut annotated = pod("ns1", "web-1", &[("name", "web")], "Pending");
        annotated.metadata.annotations = Some(
            [
                ("cluster-monitor/app-id".to_string(), "17".to_string()),
                ("cluster-monitor/tier-id".to_string(), "tier-seven".to_string()),
                ("cluster-monitor/node-name".to_string(), "web-node".to_string()),
            ]
            .into(),
        );

        let record = pipeline.transform(&annotated, None).await.record;
        assert_eq!(record.app_id, 17);
        assert_eq!(record.tier_id, 0);
        assert_eq!(record.apm_node_name, "web-node");
        assert!(record.annotations.contains("cluster-monitor/app-id:17;"));
        assert_eq!(record.labels, "name:web;");
    }

    #[tokio::test]
    async fn transform_records_owner_and_namespace_indexes() {
        let pipeline = pipeline_with(CorrelationCaches::new(), StaticMetricsSource::new());
        pipeline
            .transform(&pod("ns2", "api-1", &[("name", "api")], "Pending"), None)
            .await;

        assert_eq!(
            pipeline.owners().owner(&PodKey::new("ns2", "api-1")),
            Some("api".to_string())
        );
        assert!(pipeline.namespaces().snapshot().contains("ns2"));
    }
}

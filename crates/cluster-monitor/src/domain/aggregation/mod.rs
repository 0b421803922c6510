//! Incremental rollups of pod records into six summary families.
//!
//! [`Summaries`] is rebuilt from scratch every metrics cycle by folding each
//! pod record in turn. It is owned by the cycle task and needs no lock.

pub mod engine;
pub mod summary;

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use serde::Serialize;

use crate::config::MonitorConfig;
use crate::domain::caches::CorrelationCaches;
use crate::domain::correlation::endpoint_stats;
use crate::domain::correlation::quota_applies_to;
use crate::domain::correlation::quota_metrics;
use crate::domain::records::PodRecord;
use crate::domain::records::PHASE_FAILED;
use crate::domain::records::PHASE_PENDING;
use crate::domain::records::PHASE_RUNNING;
use summary::running_average;
use summary::AppSummary;
use summary::ContainerSummary;
use summary::InstanceSummary;
use summary::PodSummary;
use summary::QuotaMetrics;
use summary::SummaryScope;

/// One exported metric: `path|name = value`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FlatMetric {
    pub name: String,
    pub value: i64,
    pub path: String,
}

impl FlatMetric {
    pub fn new(name: &str, value: i64, path: &str) -> Self {
        Self {
            name: name.to_string(),
            value,
            path: path.to_string(),
        }
    }

    pub fn full_name(&self) -> String {
        format!("{}|{}", self.path, self.name)
    }
}

type AppKey = (String, String);
type ContainerKey = (String, String, String);
type InstanceKey = (String, String, String, String);

/// The six summary families of one metrics cycle.
#[derive(Debug, Default)]
pub struct Summaries {
    pub cluster: Option<PodSummary>,
    pub nodes: BTreeMap<String, PodSummary>,
    pub namespaces: BTreeMap<String, PodSummary>,
    pub apps: BTreeMap<AppKey, AppSummary>,
    pub containers: BTreeMap<ContainerKey, ContainerSummary>,
    pub instances: BTreeMap<InstanceKey, InstanceSummary>,
    /// Quotas already added into the cluster totals this cycle.
    counted_quotas: BTreeSet<String>,
}

impl Summaries {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cluster_path(config: &MonitorConfig) -> String {
        format!("{}|{}", config.metric_path_root, config.cluster_name)
    }

    /// Adds one pod record to every family it belongs to.
    pub fn fold(&mut self, record: &PodRecord, caches: &CorrelationCaches, config: &MonitorConfig) {
        let cluster_path = Self::cluster_path(config);

        let cluster = self.cluster.get_or_insert_with(|| {
            let mut summary = PodSummary::new(SummaryScope::Cluster, cluster_path.clone());
            apply_service_stats(&mut summary, caches, None);
            summary
        });
        fold_pod(cluster, record);

        if !record.node_name.is_empty() {
            let node = self
                .nodes
                .entry(record.node_name.clone())
                .or_insert_with(|| {
                    PodSummary::new(
                        SummaryScope::Node(record.node_name.clone()),
                        format!("{cluster_path}|Nodes|{}", record.node_name),
                    )
                });
            fold_pod(node, record);
        }

        let namespace_path = format!("{cluster_path}|Namespaces|{}", record.namespace);
        let namespace = self
            .namespaces
            .entry(record.namespace.clone())
            .or_insert_with(|| {
                let mut summary = PodSummary::new(
                    SummaryScope::Namespace(record.namespace.clone()),
                    namespace_path.clone(),
                );
                apply_service_stats(&mut summary, caches, Some(&record.namespace));
                summary
            });
        fold_pod(namespace, record);

        let app_path = format!("{namespace_path}|Apps|{}", record.owner);
        let app_key = (record.namespace.clone(), record.owner.clone());
        if !self.apps.contains_key(&app_key) {
            let mut app = AppSummary {
                namespace: record.namespace.clone(),
                owner: record.owner.clone(),
                app_name: record.app_name.clone(),
                tier_name: record.tier_name.clone(),
                path: app_path.clone(),
                container_count: record.container_count,
                init_container_count: record.init_container_count,
                ..Default::default()
            };
            if let Some((quota_key, spec, used)) = first_matching_quota(caches, record) {
                app.quota_spec = spec;
                app.quota_used = used;
                namespace.quota_spec = spec;
                namespace.quota_used = used;
                if self.counted_quotas.insert(quota_key) {
                    if let Some(cluster) = self.cluster.as_mut() {
                        cluster.quota_spec.add(&spec);
                        cluster.quota_used.add(&used);
                    }
                }
            }
            self.apps.insert(app_key.clone(), app);
        }
        if let Some(app) = self.apps.get_mut(&app_key) {
            fold_app(app, record);
        }

        if record.is_evicted {
            return;
        }
        for container in record.containers.values() {
            let container_path = format!("{app_path}|Containers|{}", container.name);
            let key = (
                record.namespace.clone(),
                record.owner.clone(),
                container.name.clone(),
            );
            let summary = self.containers.entry(key).or_insert_with(|| ContainerSummary {
                namespace: record.namespace.clone(),
                owner: record.owner.clone(),
                container: container.name.clone(),
                path: container_path.clone(),
                request_cpu: container.cpu_request,
                limit_cpu: container.cpu_limit,
                request_memory: container.mem_request,
                limit_memory: container.mem_limit,
                no_liveness_probe: container.live_probes,
                no_readiness_probe: container.ready_probes,
                no_limits: i64::from(!container.limits_defined),
                pod_storage_request: container.pod_storage_request,
                pod_storage_limit: container.pod_storage_limit,
                storage_request: container.storage_request,
                storage_capacity: container.storage_capacity,
                restarts: 0,
            });
            summary.restarts += i64::from(container.restarts);

            let key = (
                record.namespace.clone(),
                record.owner.clone(),
                container.name.clone(),
                record.name.clone(),
            );
            self.instances.insert(
                key,
                InstanceSummary {
                    namespace: record.namespace.clone(),
                    owner: record.owner.clone(),
                    container: container.name.clone(),
                    pod_name: record.name.clone(),
                    path: format!("{container_path}|Instances|{}", record.name),
                    use_cpu: container.cpu_use,
                    use_memory: container.mem_use,
                    restarts: i64::from(container.restarts),
                },
            );
        }
    }

    /// Recounts quotas per namespace, persists changed counts into the
    /// namespace cache and fills the cluster namespace statistics.
    pub fn process_namespaces(&mut self, caches: &CorrelationCaches, config: &MonitorConfig) {
        let mut per_namespace: BTreeMap<String, i64> = BTreeMap::new();
        caches.quotas.read(|quotas| {
            for quota in quotas.values() {
                let namespace = quota.metadata.namespace.clone().unwrap_or_default();
                *per_namespace.entry(namespace).or_default() += 1;
            }
        });

        let (count, without_quotas) = caches.namespaces.update(|entries| {
            let mut touched = Vec::new();
            for (key, entry) in entries.iter_mut() {
                let quotas = per_namespace.get(&entry.name).copied().unwrap_or(0);
                if entry.quotas != quotas {
                    entry.quotas = quotas;
                    touched.push(key.clone());
                }
            }
            let without = entries.values().filter(|entry| entry.quotas == 0).count();
            ((entries.len() as i64, without as i64), touched)
        });

        let cluster = self.cluster.get_or_insert_with(|| {
            let mut summary = PodSummary::new(SummaryScope::Cluster, Self::cluster_path(config));
            apply_service_stats(&mut summary, caches, None);
            summary
        });
        cluster.namespace_count = count;
        cluster.namespace_no_quotas = without_quotas;
    }

    /// Flattens every family through its explicit field mapping.
    pub fn flatten(&self) -> Vec<FlatMetric> {
        let mut metrics = Vec::new();
        if let Some(cluster) = &self.cluster {
            cluster.push_metrics(&mut metrics);
        }
        for summary in self.nodes.values().chain(self.namespaces.values()) {
            summary.push_metrics(&mut metrics);
        }
        for app in self.apps.values() {
            app.push_metrics(&mut metrics);
        }
        for container in self.containers.values() {
            container.push_metrics(&mut metrics);
        }
        for instance in self.instances.values() {
            instance.push_metrics(&mut metrics);
        }
        metrics
    }
}

fn fold_pod(summary: &mut PodSummary, record: &PodRecord) {
    summary.pod_count += 1;
    match record.phase.as_str() {
        PHASE_RUNNING => summary.pod_running += 1,
        PHASE_PENDING => summary.pod_pending += 1,
        PHASE_FAILED => summary.pod_failed += 1,
        _ => {}
    }
    summary.evictions += i64::from(record.is_evicted);
    summary.container_count += record.container_count;
    summary.init_container_count += record.init_container_count;
    summary.no_limits += i64::from(!record.limits_defined);
    summary.privileged += record.num_privileged;
    summary.no_liveness_probe += record.live_probes;
    summary.no_readiness_probe += record.ready_probes;
    summary.missing_dependencies += i64::from(record.missing_dependencies);
    summary.no_connectivity += i64::from(record.no_connectivity);
    summary.pod_restarts += record.pod_restarts;

    if !record.is_evicted {
        summary.request_cpu += record.cpu_request;
        summary.limit_cpu += record.cpu_limit;
        summary.request_memory += record.mem_request;
        summary.limit_memory += record.mem_limit;
        summary.use_cpu += record.cpu_use;
        summary.use_memory += record.mem_use;
        summary.pod_storage_request += record.pod_storage_request;
        summary.pod_storage_limit += record.pod_storage_limit;
        summary.storage_request += record.storage_request;
        summary.storage_capacity += record.storage_capacity;
    }

    running_average(&mut summary.pending_time, record.pending_time, summary.pod_count);
    running_average(&mut summary.up_time, record.up_time_millis, summary.pod_count);
}

fn fold_app(app: &mut AppSummary, record: &PodRecord) {
    app.pod_count += 1;
    match record.phase.as_str() {
        PHASE_RUNNING => app.pod_running += 1,
        PHASE_PENDING => app.pod_pending += 1,
        PHASE_FAILED => app.pod_failed += 1,
        _ => {}
    }
    app.evictions += i64::from(record.is_evicted);
    app.no_limits += i64::from(!record.limits_defined);
    app.privileged += record.num_privileged;
    app.no_liveness_probe += record.live_probes;
    app.no_readiness_probe += record.ready_probes;
    app.missing_dependencies += i64::from(record.missing_dependencies);
    app.no_connectivity += i64::from(record.no_connectivity);
    app.pod_restarts += record.pod_restarts;

    if !record.is_evicted {
        app.request_cpu += record.cpu_request;
        app.limit_cpu += record.cpu_limit;
        app.request_memory += record.mem_request;
        app.limit_memory += record.mem_limit;
        app.use_cpu += record.cpu_use;
        app.use_memory += record.mem_use;
    }

    running_average(&mut app.pending_time, record.pending_time, app.pod_count);
    running_average(&mut app.up_time, record.up_time_millis, app.pod_count);
}

/// Service and endpoint statistics, cluster-wide or for one namespace.
fn apply_service_stats(summary: &mut PodSummary, caches: &CorrelationCaches, namespace: Option<&str>) {
    caches.services.read(|services| {
        for service in services
            .values()
            .filter(|service| namespace.map_or(true, |ns| service.namespace == ns))
        {
            summary.service_count += 1;
            summary.ext_service_count += i64::from(service.has_external_service);
        }
    });
    caches.endpoints.read(|endpoints| {
        for endpoint in endpoints.values().filter(|endpoint| {
            namespace.map_or(true, |ns| endpoint.metadata.namespace.as_deref() == Some(ns))
        }) {
            let stats = endpoint_stats(endpoint);
            summary.endpoint_count += 1;
            summary.ep_ready_count += stats.ready;
            summary.ep_not_ready_count += stats.not_ready;
            summary.orphan_endpoints += i64::from(stats.orphan);
        }
    });
}

/// First quota in key order whose namespace and scopes match the pod.
fn first_matching_quota(
    caches: &CorrelationCaches,
    record: &PodRecord,
) -> Option<(String, QuotaMetrics, QuotaMetrics)> {
    caches.quotas.read(|quotas| {
        quotas
            .iter()
            .find(|(_, quota)| quota_applies_to(quota, record))
            .map(|(key, quota)| {
                let (spec, used) = quota_metrics(quota);
                (key.clone(), spec, used)
            })
    })
}

//! Summary record types and their explicit metric mappings.

use super::FlatMetric;

/// Quota figures attached to app, namespace and cluster summaries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QuotaMetrics {
    pub request_cpu: i64,
    pub limit_cpu: i64,
    pub request_memory: i64,
    pub limit_memory: i64,
    pub pods: i64,
    pub request_storage: i64,
    pub claims: i64,
    pub request_ephemeral_storage: i64,
    pub limit_ephemeral_storage: i64,
}

impl QuotaMetrics {
    pub fn add(&mut self, other: &QuotaMetrics) {
        self.request_cpu += other.request_cpu;
        self.limit_cpu += other.limit_cpu;
        self.request_memory += other.request_memory;
        self.limit_memory += other.limit_memory;
        self.pods += other.pods;
        self.request_storage += other.request_storage;
        self.claims += other.claims;
        self.request_ephemeral_storage += other.request_ephemeral_storage;
        self.limit_ephemeral_storage += other.limit_ephemeral_storage;
    }

    fn fields(&self) -> [(&'static str, i64); 9] {
        [
            ("RequestCpu", self.request_cpu),
            ("LimitCpu", self.limit_cpu),
            ("RequestMemory", self.request_memory),
            ("LimitMemory", self.limit_memory),
            ("Pods", self.pods),
            ("RequestStorage", self.request_storage),
            ("PersistentVolumeClaims", self.claims),
            ("RequestEphemeralStorage", self.request_ephemeral_storage),
            ("LimitEphemeralStorage", self.limit_ephemeral_storage),
        ]
    }

    fn push_metrics(&self, base_path: &str, kind: &str, out: &mut Vec<FlatMetric>) {
        let path = format!("{base_path}|Quota|{kind}");
        out.extend(
            self.fields()
                .into_iter()
                .map(|(name, value)| FlatMetric::new(name, value, &path)),
        );
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum SummaryScope {
    #[default]
    Cluster,
    Node(String),
    Namespace(String),
}

/// Pod-level counters shared by the cluster, node and namespace families.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PodSummary {
    pub scope: SummaryScope,
    pub path: String,

    pub pod_count: i64,
    pub pod_running: i64,
    pub pod_pending: i64,
    pub pod_failed: i64,
    pub evictions: i64,
    pub container_count: i64,
    pub init_container_count: i64,
    pub no_limits: i64,
    pub privileged: i64,
    pub no_liveness_probe: i64,
    pub no_readiness_probe: i64,
    pub missing_dependencies: i64,
    pub no_connectivity: i64,
    pub pod_restarts: i64,

    pub request_cpu: i64,
    pub limit_cpu: i64,
    pub request_memory: i64,
    pub limit_memory: i64,
    pub use_cpu: i64,
    pub use_memory: i64,
    pub pod_storage_request: i64,
    pub pod_storage_limit: i64,
    pub storage_request: i64,
    pub storage_capacity: i64,

    /// Running average, see [`running_average`].
    pub pending_time: i64,
    pub up_time: i64,

    pub service_count: i64,
    pub ext_service_count: i64,
    pub endpoint_count: i64,
    pub ep_ready_count: i64,
    pub ep_not_ready_count: i64,
    pub orphan_endpoints: i64,

    pub namespace_count: i64,
    pub namespace_no_quotas: i64,

    pub quota_spec: QuotaMetrics,
    pub quota_used: QuotaMetrics,
}

impl PodSummary {
    pub fn new(scope: SummaryScope, path: String) -> Self {
        Self {
            scope,
            path,
            ..Default::default()
        }
    }

    fn fields(&self) -> Vec<(&'static str, i64)> {
        vec![
            ("PodCount", self.pod_count),
            ("PodRunning", self.pod_running),
            ("PodPending", self.pod_pending),
            ("PodFailed", self.pod_failed),
            ("Evictions", self.evictions),
            ("ContainerCount", self.container_count),
            ("InitContainerCount", self.init_container_count),
            ("NoLimits", self.no_limits),
            ("Privileged", self.privileged),
            ("NoLivenessProbe", self.no_liveness_probe),
            ("NoReadinessProbe", self.no_readiness_probe),
            ("MissingDependencies", self.missing_dependencies),
            ("NoConnectivity", self.no_connectivity),
            ("PodRestarts", self.pod_restarts),
            ("RequestCpu", self.request_cpu),
            ("LimitCpu", self.limit_cpu),
            ("RequestMemory", self.request_memory),
            ("LimitMemory", self.limit_memory),
            ("UseCpu", self.use_cpu),
            ("UseMemory", self.use_memory),
            ("PodStorageRequest", self.pod_storage_request),
            ("PodStorageLimit", self.pod_storage_limit),
            ("StorageRequest", self.storage_request),
            ("StorageCapacity", self.storage_capacity),
            ("PendingTime", self.pending_time),
            ("UpTime", self.up_time),
            ("ServiceCount", self.service_count),
            ("ExtServiceCount", self.ext_service_count),
            ("EndpointCount", self.endpoint_count),
            ("EPReadyCount", self.ep_ready_count),
            ("EPNotReadyCount", self.ep_not_ready_count),
            ("OrphanEndpoint", self.orphan_endpoints),
            ("NamespaceCount", self.namespace_count),
            ("NamespaceNoQuotas", self.namespace_no_quotas),
        ]
    }

    /// Fields that carry no meaning at this scope.
    pub fn excluded(&self, field: &str) -> bool {
        const SERVICE_FIELDS: [&str; 6] = [
            "ServiceCount",
            "ExtServiceCount",
            "EndpointCount",
            "EPReadyCount",
            "EPNotReadyCount",
            "OrphanEndpoint",
        ];
        const NAMESPACE_FIELDS: [&str; 2] = ["NamespaceCount", "NamespaceNoQuotas"];
        match self.scope {
            SummaryScope::Cluster => false,
            SummaryScope::Namespace(_) => NAMESPACE_FIELDS.contains(&field),
            SummaryScope::Node(_) => {
                SERVICE_FIELDS.contains(&field) || NAMESPACE_FIELDS.contains(&field)
            }
        }
    }

    pub fn push_metrics(&self, out: &mut Vec<FlatMetric>) {
        out.extend(
            self.fields()
                .into_iter()
                .filter(|(name, _)| !self.excluded(name))
                .map(|(name, value)| FlatMetric::new(name, value, &self.path)),
        );
        if !matches!(self.scope, SummaryScope::Node(_)) {
            self.quota_spec.push_metrics(&self.path, "Spec", out);
            self.quota_used.push_metrics(&self.path, "Used", out);
        }
    }
}

/// Per (namespace, owner) workload summary.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppSummary {
    pub namespace: String,
    pub owner: String,
    pub app_name: String,
    pub tier_name: String,
    pub path: String,

    pub pod_count: i64,
    pub pod_running: i64,
    pub pod_pending: i64,
    pub pod_failed: i64,
    pub evictions: i64,
    /// Taken from the first pod of the workload, not summed.
    pub container_count: i64,
    pub init_container_count: i64,
    pub no_limits: i64,
    pub privileged: i64,
    pub no_liveness_probe: i64,
    pub no_readiness_probe: i64,
    pub missing_dependencies: i64,
    pub no_connectivity: i64,
    pub pod_restarts: i64,

    pub request_cpu: i64,
    pub limit_cpu: i64,
    pub request_memory: i64,
    pub limit_memory: i64,
    pub use_cpu: i64,
    pub use_memory: i64,

    pub pending_time: i64,
    pub up_time: i64,

    pub quota_spec: QuotaMetrics,
    pub quota_used: QuotaMetrics,
}

impl AppSummary {
    fn fields(&self) -> Vec<(&'static str, i64)> {
        vec![
            ("PodCount", self.pod_count),
            ("PodRunning", self.pod_running),
            ("PodPending", self.pod_pending),
            ("PodFailed", self.pod_failed),
            ("Evictions", self.evictions),
            ("ContainerCount", self.container_count),
            ("InitContainerCount", self.init_container_count),
            ("NoLimits", self.no_limits),
            ("Privileged", self.privileged),
            ("NoLivenessProbe", self.no_liveness_probe),
            ("NoReadinessProbe", self.no_readiness_probe),
            ("MissingDependencies", self.missing_dependencies),
            ("NoConnectivity", self.no_connectivity),
            ("PodRestarts", self.pod_restarts),
            ("RequestCpu", self.request_cpu),
            ("LimitCpu", self.limit_cpu),
            ("RequestMemory", self.request_memory),
            ("LimitMemory", self.limit_memory),
            ("UseCpu", self.use_cpu),
            ("UseMemory", self.use_memory),
            ("PendingTime", self.pending_time),
            ("UpTime", self.up_time),
        ]
    }

    pub fn push_metrics(&self, out: &mut Vec<FlatMetric>) {
        out.extend(
            self.fields()
                .into_iter()
                .map(|(name, value)| FlatMetric::new(name, value, &self.path)),
        );
        self.quota_spec.push_metrics(&self.path, "Spec", out);
        self.quota_used.push_metrics(&self.path, "Used", out);
    }
}

/// Per (namespace, owner, container) summary of non-evicted pods.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerSummary {
    pub namespace: String,
    pub owner: String,
    pub container: String,
    pub path: String,

    pub request_cpu: i64,
    pub limit_cpu: i64,
    pub request_memory: i64,
    pub limit_memory: i64,
    pub no_liveness_probe: i64,
    pub no_readiness_probe: i64,
    pub no_limits: i64,
    pub pod_storage_request: i64,
    pub pod_storage_limit: i64,
    pub storage_request: i64,
    pub storage_capacity: i64,
    /// Summed over every instance.
    pub restarts: i64,
}

impl ContainerSummary {
    pub fn push_metrics(&self, out: &mut Vec<FlatMetric>) {
        let fields = [
            ("RequestCpu", self.request_cpu),
            ("LimitCpu", self.limit_cpu),
            ("RequestMemory", self.request_memory),
            ("LimitMemory", self.limit_memory),
            ("NoLivenessProbe", self.no_liveness_probe),
            ("NoReadinessProbe", self.no_readiness_probe),
            ("NoLimits", self.no_limits),
            ("PodStorageRequest", self.pod_storage_request),
            ("PodStorageLimit", self.pod_storage_limit),
            ("StorageRequest", self.storage_request),
            ("StorageCapacity", self.storage_capacity),
            ("Restarts", self.restarts),
        ];
        out.extend(
            fields
                .into_iter()
                .map(|(name, value)| FlatMetric::new(name, value, &self.path)),
        );
    }
}

/// One container of one pod.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstanceSummary {
    pub namespace: String,
    pub owner: String,
    pub container: String,
    pub pod_name: String,
    pub path: String,

    pub use_cpu: i64,
    pub use_memory: i64,
    pub restarts: i64,
}

impl InstanceSummary {
    pub fn push_metrics(&self, out: &mut Vec<FlatMetric>) {
        let fields = [
            ("UseCpu", self.use_cpu),
            ("UseMemory", self.use_memory),
            ("Restarts", self.restarts),
        ];
        out.extend(
            fields
                .into_iter()
                .map(|(name, value)| FlatMetric::new(name, value, &self.path)),
        );
    }
}

/// `avg += value / count`, evaluated after `count` was incremented.
pub fn running_average(average: &mut i64, value: i64, count: i64) {
    if count > 0 {
        *average += value / count;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn running_average_keeps_the_incremental_formula() {
        let mut average = 0;
        running_average(&mut average, 100, 1);
        running_average(&mut average, 300, 2);
        // A true mean would be 200.
        assert_eq!(average, 250);
        running_average(&mut average, 5, 0);
        assert_eq!(average, 250);
    }

    #[test]
    fn new_summary_starts_with_zeroed_counters() {
        let summary = PodSummary::new(SummaryScope::Namespace("ns1".to_string()), "p".to_string());
        assert_eq!(summary.scope, SummaryScope::Namespace("ns1".to_string()));
        assert_eq!(summary.path, "p");
        assert!(summary.fields().iter().all(|(_, value)| *value == 0));
        assert_eq!(summary.quota_spec, QuotaMetrics::default());
        assert_eq!(summary.quota_used, QuotaMetrics::default());
    }

    #[test]
    fn node_scope_excludes_service_and_quota_metrics() {
        let summary = PodSummary::new(SummaryScope::Node("node-a".to_string()), "p".to_string());
        let mut metrics = Vec::new();
        summary.push_metrics(&mut metrics);

        assert!(metrics.iter().all(|metric| metric.name != "ServiceCount"));
        assert!(metrics.iter().all(|metric| !metric.path.contains("|Quota|")));
        assert!(metrics.iter().any(|metric| metric.name == "PodCount"));
    }

    #[test]
    fn cluster_scope_exports_quota_paths() {
        let mut summary = PodSummary::new(SummaryScope::Cluster, "root|c".to_string());
        summary.quota_spec.pods = 10;
        let mut metrics = Vec::new();
        summary.push_metrics(&mut metrics);

        let pods = metrics
            .iter()
            .find(|metric| metric.path == "root|c|Quota|Spec" && metric.name == "Pods")
            .map(|metric| metric.value);
        assert_eq!(pods, Some(10));
        assert!(metrics.iter().any(|metric| metric.name == "NamespaceCount"));
    }
}

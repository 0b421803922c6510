pub mod cli;
pub mod monitor;

use std::time::Duration;

/// Annotation keys read from (and written to) monitored pods.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnotationKeys {
    pub app_id: String,
    pub tier_id: String,
    pub node_id: String,
    pub node_name: String,
    pub instrumented: String,
}

impl Default for AnnotationKeys {
    fn default() -> Self {
        Self {
            app_id: "cluster-monitor/app-id".to_string(),
            tier_id: "cluster-monitor/tier-id".to_string(),
            node_id: "cluster-monitor/node-id".to_string(),
            node_name: "cluster-monitor/node-name".to_string(),
            instrumented: "cluster-monitor/instrumented".to_string(),
        }
    }
}

/// Event schema names, all derived from one prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaNames {
    pub pods: String,
    pub containers: String,
    pub logs: String,
    pub namespaces: String,
    pub endpoints: String,
}

impl SchemaNames {
    pub fn with_prefix(prefix: &str) -> Self {
        Self {
            pods: format!("{prefix}_pods"),
            containers: format!("{prefix}_containers"),
            logs: format!("{prefix}_logs"),
            namespaces: format!("{prefix}_namespaces"),
            endpoints: format!("{prefix}_endpoints"),
        }
    }
}

/// Engine configuration derived from the `run` command line.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub cluster_name: String,
    /// Empty means every namespace qualifies.
    pub include_namespaces: Vec<String>,
    pub exclude_namespaces: Vec<String>,
    pub metrics_sync_interval: Duration,
    pub snapshot_sync_interval: Duration,
    /// Maximum records per events API request.
    pub event_api_limit: usize,
    pub dashboard_delay: Duration,
    pub deploys_to_dashboard: Vec<String>,
    pub app_label: String,
    pub tier_label: String,
    pub annotations: AnnotationKeys,
    pub schemas: SchemaNames,
    pub metric_path_root: String,
    pub max_instrumentation_attempts: u32,
    pub instrumentation_timeout: Duration,
    pub cluster_app_id: i64,
    pub cluster_tier_id: i64,
    pub cluster_node_id: i64,
    pub cache_sync_timeout: Duration,
}

impl MonitorConfig {
    /// Namespace inclusion/exclusion policy.
    pub fn qualifies(&self, namespace: &str) -> bool {
        let included = self.include_namespaces.is_empty()
            || self.include_namespaces.iter().any(|ns| ns == namespace);
        included && !self.exclude_namespaces.iter().any(|ns| ns == namespace)
    }

    pub fn is_dashboard_workload(&self, owner: &str) -> bool {
        self.deploys_to_dashboard.iter().any(|name| name == owner)
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            cluster_name: "cluster".to_string(),
            include_namespaces: Vec::new(),
            exclude_namespaces: Vec::new(),
            metrics_sync_interval: Duration::from_secs(60),
            snapshot_sync_interval: Duration::from_secs(15),
            event_api_limit: 100,
            dashboard_delay: Duration::from_secs(2 * 60),
            deploys_to_dashboard: Vec::new(),
            app_label: "app".to_string(),
            tier_label: "tier".to_string(),
            annotations: AnnotationKeys::default(),
            schemas: SchemaNames::with_prefix("cluster_monitor"),
            metric_path_root: "Custom Metrics|Cluster Stats".to_string(),
            max_instrumentation_attempts: 3,
            instrumentation_timeout: Duration::from_secs(120),
            cluster_app_id: 0,
            cluster_tier_id: 0,
            cluster_node_id: 0,
            cache_sync_timeout: Duration::from_secs(60),
        }
    }
}

fn non_empty(values: &[String]) -> Vec<String> {
    values
        .iter()
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .collect()
}

impl From<&monitor::MonitorArgs> for MonitorConfig {
    fn from(args: &monitor::MonitorArgs) -> Self {
        Self {
            cluster_name: args.cluster_name.clone(),
            include_namespaces: non_empty(&args.include_namespaces),
            exclude_namespaces: non_empty(&args.exclude_namespaces),
            metrics_sync_interval: Duration::from_secs(args.metrics_sync_interval.max(1)),
            snapshot_sync_interval: Duration::from_secs(args.snapshot_sync_interval.max(1)),
            event_api_limit: args.event_api_limit.max(1),
            dashboard_delay: Duration::from_secs(args.dashboard_delay_min * 60),
            deploys_to_dashboard: non_empty(&args.deploys_to_dashboard),
            app_label: args.app_label.clone(),
            tier_label: args.tier_label.clone(),
            annotations: AnnotationKeys {
                app_id: args.app_id_annotation.clone(),
                tier_id: args.tier_id_annotation.clone(),
                node_id: args.node_id_annotation.clone(),
                node_name: args.node_name_annotation.clone(),
                instrumented: args.instrumented_annotation.clone(),
            },
            schemas: SchemaNames::with_prefix(&args.schema_prefix),
            metric_path_root: args.metric_path_root.clone(),
            max_instrumentation_attempts: args.max_instrumentation_attempts,
            instrumentation_timeout: Duration::from_secs(args.instrumentation_timeout),
            cluster_app_id: args.cluster_app_id,
            cluster_tier_id: args.cluster_tier_id,
            cluster_node_id: args.cluster_node_id,
            cache_sync_timeout: Duration::from_secs(args.cache_sync_timeout),
        }
    }
}

pub use cli::*;
pub use monitor::*;

use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Clone, Debug)]
pub struct MonitorArgs {
    #[arg(
        long,
        env = "KUBECONFIG",
        value_hint = clap::ValueHint::FilePath,
        help = "Path to kubeconfig file (defaults to cluster config or ~/.kube/config)"
    )]
    pub kubeconfig: Option<PathBuf>,

    #[arg(
        long,
        env = "CLUSTER_NAME",
        default_value = "cluster",
        help = "Cluster name reported on every record and used as the metric path root"
    )]
    pub cluster_name: String,

    #[arg(
        long,
        env = "INCLUDE_NAMESPACES",
        value_delimiter = ',',
        help = "Namespaces to monitor, comma separated (empty for all namespaces)"
    )]
    pub include_namespaces: Vec<String>,

    #[arg(
        long,
        env = "EXCLUDE_NAMESPACES",
        value_delimiter = ',',
        help = "Namespaces to ignore, comma separated"
    )]
    pub exclude_namespaces: Vec<String>,

    #[arg(
        long,
        env = "METRICS_SYNC_INTERVAL",
        default_value = "60",
        help = "Seconds between two metrics aggregation cycles"
    )]
    pub metrics_sync_interval: u64,

    #[arg(
        long,
        env = "SNAPSHOT_SYNC_INTERVAL",
        default_value = "15",
        help = "Seconds between two flushes of the pod record queue"
    )]
    pub snapshot_sync_interval: u64,

    #[arg(
        long,
        env = "EVENT_API_LIMIT",
        default_value = "100",
        help = "Maximum number of records per events API request"
    )]
    pub event_api_limit: usize,

    #[arg(
        long,
        env = "DASHBOARD_DELAY_MIN",
        default_value = "2",
        help = "Minutes to wait after startup before dashboards are built"
    )]
    pub dashboard_delay_min: u64,

    #[arg(
        long,
        env = "DEPLOYS_TO_DASHBOARD",
        value_delimiter = ',',
        help = "Workload names that get a tier dashboard, comma separated"
    )]
    pub deploys_to_dashboard: Vec<String>,

    #[arg(long, default_value = "app", help = "Pod label holding the application name")]
    pub app_label: String,

    #[arg(long, default_value = "tier", help = "Pod label holding the tier name")]
    pub tier_label: String,

    #[arg(long, default_value = "cluster-monitor/app-id")]
    pub app_id_annotation: String,

    #[arg(long, default_value = "cluster-monitor/tier-id")]
    pub tier_id_annotation: String,

    #[arg(long, default_value = "cluster-monitor/node-id")]
    pub node_id_annotation: String,

    #[arg(long, default_value = "cluster-monitor/node-name")]
    pub node_name_annotation: String,

    #[arg(
        long,
        default_value = "cluster-monitor/instrumented",
        help = "Annotation written on pods once the agent is injected"
    )]
    pub instrumented_annotation: String,

    #[arg(long, env = "EVENTS_URL", help = "Base URL of the events API")]
    pub events_url: Option<String>,

    #[arg(long, env = "EVENTS_ACCOUNT", default_value = "")]
    pub events_account: String,

    #[arg(long, env = "EVENTS_KEY", default_value = "", hide_env_values = true)]
    pub events_key: String,

    #[arg(long, env = "METRICS_URL", help = "URL metric batches are posted to")]
    pub metrics_url: Option<String>,

    #[arg(long, env = "CONTROLLER_URL", help = "Base URL of the monitoring controller")]
    pub controller_url: Option<String>,

    #[arg(long, env = "CONTROLLER_USER", default_value = "")]
    pub controller_user: String,

    #[arg(long, env = "CONTROLLER_PASSWORD", default_value = "", hide_env_values = true)]
    pub controller_password: String,

    #[arg(
        long,
        default_value = "cluster_monitor",
        help = "Prefix of the event schemas (<prefix>_pods, <prefix>_containers, ...)"
    )]
    pub schema_prefix: String,

    #[arg(long, default_value = "Custom Metrics|Cluster Stats")]
    pub metric_path_root: String,

    #[arg(
        long,
        env = "INSTRUMENTATION_URL",
        help = "Agent injection service URL (instrumentation is disabled when unset)"
    )]
    pub instrumentation_url: Option<String>,

    #[arg(long, default_value = "3")]
    pub max_instrumentation_attempts: u32,

    #[arg(
        long,
        default_value = "120",
        help = "Seconds to wait for one instrumentation attempt"
    )]
    pub instrumentation_timeout: u64,

    #[arg(long, default_value = "0")]
    pub cluster_app_id: i64,

    #[arg(long, default_value = "0")]
    pub cluster_tier_id: i64,

    #[arg(long, default_value = "0")]
    pub cluster_node_id: i64,

    #[arg(
        long,
        default_value = "60",
        help = "Seconds to wait for the initial pod listing before starting anyway"
    )]
    pub cache_sync_timeout: u64,

    #[arg(
        long,
        env = "DASHBOARD_LOG_FILE",
        value_hint = clap::ValueHint::FilePath,
        default_value = "/logs/dashboards.log",
        help = "Path dashboard bags are written to, e.g. /logs/dashboards.log"
    )]
    pub dashboard_log_file: Option<PathBuf>,
}

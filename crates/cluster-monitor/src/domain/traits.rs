//! Traits for the collaborators the engine talks to

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use error_stack::Report;
use k8s_openapi::api::core::v1::Pod;

use super::aggregation::FlatMetric;
use super::dashboard::ClusterBag;
use super::dashboard::TierBag;
use super::dispatch::schema::SchemaDefinition;
use super::error::BackendError;
use super::error::SourceError;
use super::records::PodKey;
use super::records::PodRecord;

/// Handle returned by [`TelemetryBackend::start_transaction`].
#[derive(Debug)]
pub struct TransactionHandle {
    pub name: String,
    pub started_at: Instant,
}

impl TransactionHandle {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            started_at: Instant::now(),
        }
    }
}

/// Remote telemetry backend: event schemas, event batches, metrics and node registry.
#[async_trait]
pub trait TelemetryBackend: Send + Sync {
    /// Creates the schema if it is missing. Safe to call repeatedly.
    async fn ensure_schema(
        &self,
        schema: &str,
        definition: &SchemaDefinition,
    ) -> Result<(), Report<BackendError>>;

    async fn schema_exists(&self, schema: &str) -> Result<bool, Report<BackendError>>;

    async fn create_schema(
        &self,
        schema: &str,
        definition: &SchemaDefinition,
    ) -> Result<(), Report<BackendError>>;

    /// Posts one batch of serialized records to `schema`.
    async fn post_events(
        &self,
        schema: &str,
        records: &[serde_json::Value],
    ) -> Result<(), Report<BackendError>>;

    async fn post_metrics(&self, metrics: &[FlatMetric]) -> Result<(), Report<BackendError>>;

    /// Opens a business-transaction timing marker.
    fn start_transaction(&self, name: &str) -> TransactionHandle;

    fn stop_transaction(&self, handle: TransactionHandle);

    async fn deregister_node(&self, node_id: i64) -> Result<(), Report<BackendError>>;
}

/// Usage of one container, cpu in milli-cores and memory in bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ContainerUsage {
    pub cpu: i64,
    pub memory: i64,
}

/// Point-in-time usage of a pod, per container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PodUsage {
    pub containers: BTreeMap<String, ContainerUsage>,
}

impl PodUsage {
    pub fn total(&self) -> ContainerUsage {
        self.containers
            .values()
            .fold(ContainerUsage::default(), |acc, usage| ContainerUsage {
                cpu: acc.cpu + usage.cpu,
                memory: acc.memory + usage.memory,
            })
    }

    pub fn container(&self, name: &str) -> ContainerUsage {
        self.containers.get(name).copied().unwrap_or_default()
    }
}

/// Point query against the cluster metrics API.
#[async_trait]
pub trait PodMetricsSource: Send + Sync {
    /// Returns `None` when the metrics server has no sample for the pod.
    async fn pod_usage(
        &self,
        namespace: &str,
        pod_name: &str,
    ) -> Result<Option<PodUsage>, Report<SourceError>>;
}

/// Parameters of a one-shot log tail of a restarting container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogTailRequest {
    pub cluster_name: String,
    pub namespace: String,
    pub pod_owner: String,
    pub pod_name: String,
    pub container: String,
    pub since_seconds: i64,
    pub tail_lines: i64,
}

/// Non-following, timestamped container log reads.
#[async_trait]
pub trait LogSource: Send + Sync {
    /// Returns newline-delimited, timestamp-prefixed text.
    async fn tail(&self, request: &LogTailRequest) -> Result<String, Report<SourceError>>;
}

/// Outcome of one instrumentation attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttachStatus {
    pub key: PodKey,
    pub success: bool,
    pub message: String,
    pub count: u32,
}

/// Agent-injection subsystem.
#[async_trait]
pub trait Instrumenter: Send + Sync {
    /// Whether the pod carries the marker written after a successful injection.
    fn is_instrumented(&self, pod: &Pod) -> bool;

    async fn attempt(&self, pod: Arc<Pod>, record: Arc<PodRecord>) -> AttachStatus;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
pub enum EventSeverity {
    #[display("Normal")]
    Normal,
    #[display("Warning")]
    Warning,
}

/// Publishes instrumentation outcomes as cluster events on the pod.
#[async_trait]
pub trait InstrumentationEvents: Send + Sync {
    async fn emit(
        &self,
        pod: &Pod,
        severity: EventSeverity,
        note: &str,
    ) -> Result<(), Report<SourceError>>;
}

/// Turns assembled bags into backend dashboards.
#[async_trait]
pub trait DashboardRenderer: Send + Sync {
    async fn render_tier(&self, bag: &TierBag) -> Result<(), Report<BackendError>>;

    async fn render_cluster(&self, bag: &ClusterBag) -> Result<(), Report<BackendError>>;
}

/// Trait for getting current time
pub trait TimeSource: Send + Sync {
    /// Current Unix timestamp in milliseconds
    fn now_millis(&self) -> i64;
}

/// Wall clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl TimeSource for SystemClock {
    fn now_millis(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

//! Test adapters implementing the collaborator traits
//!
//! In-memory stand-ins for the backend, the cluster data sources and the
//! instrumentation subsystem, used by unit tests and the integration suite.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::collections::HashSet;
use std::sync::atomic::AtomicI64;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use error_stack::Report;
use k8s_openapi::api::core::v1::Pod;

use super::aggregation::FlatMetric;
use super::dashboard::ClusterBag;
use super::dashboard::TierBag;
use super::dispatch::schema::SchemaDefinition;
use super::error::BackendError;
use super::error::SourceError;
use super::pipeline::pod_key;
use super::records::PodKey;
use super::records::PodRecord;
use super::traits::AttachStatus;
use super::traits::DashboardRenderer;
use super::traits::EventSeverity;
use super::traits::InstrumentationEvents;
use super::traits::Instrumenter;
use super::traits::LogSource;
use super::traits::LogTailRequest;
use super::traits::PodMetricsSource;
use super::traits::PodUsage;
use super::traits::TelemetryBackend;
use super::traits::TimeSource;
use super::traits::TransactionHandle;
use crate::config::AnnotationKeys;

#[derive(Debug, Default)]
struct BackendState {
    existing: BTreeSet<String>,
    created: Vec<String>,
    failing: BTreeSet<String>,
    batches: Vec<(String, usize)>,
    metric_batches: Vec<Vec<FlatMetric>>,
    transactions: Vec<String>,
    deregistered: Vec<i64>,
}

/// Backend that records every call and succeeds unless told otherwise.
#[derive(Debug, Default)]
pub struct RecordingBackend {
    state: Mutex<BackendState>,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes schema ensure/create fail for `schema`.
    pub fn fail_schema(&self, schema: &str) {
        self.state.lock().unwrap().failing.insert(schema.to_string());
    }

    /// Sizes of the event batches posted to `schema`, in order.
    pub fn batch_sizes(&self, schema: &str) -> Vec<usize> {
        self.state
            .lock()
            .unwrap()
            .batches
            .iter()
            .filter(|(name, _)| name == schema)
            .map(|(_, size)| *size)
            .collect()
    }

    pub fn created_schemas(&self) -> Vec<String> {
        self.state.lock().unwrap().created.clone()
    }

    pub fn metric_batches(&self) -> Vec<Vec<FlatMetric>> {
        self.state.lock().unwrap().metric_batches.clone()
    }

    /// Names of the started transactions, in order.
    pub fn transactions(&self) -> Vec<String> {
        self.state.lock().unwrap().transactions.clone()
    }

    pub fn deregistered_nodes(&self) -> Vec<i64> {
        self.state.lock().unwrap().deregistered.clone()
    }

    fn check_schema(&self, schema: &str) -> Result<(), Report<BackendError>> {
        if self.state.lock().unwrap().failing.contains(schema) {
            return Err(Report::new(BackendError::Schema {
                schema: schema.to_string(),
                message: "scripted failure".to_string(),
            }));
        }
        Ok(())
    }
}

#[async_trait]
impl TelemetryBackend for RecordingBackend {
    async fn ensure_schema(
        &self,
        schema: &str,
        _definition: &SchemaDefinition,
    ) -> Result<(), Report<BackendError>> {
        self.check_schema(schema)?;
        self.state.lock().unwrap().existing.insert(schema.to_string());
        Ok(())
    }

    async fn schema_exists(&self, schema: &str) -> Result<bool, Report<BackendError>> {
        Ok(self.state.lock().unwrap().existing.contains(schema))
    }

    async fn create_schema(
        &self,
        schema: &str,
        _definition: &SchemaDefinition,
    ) -> Result<(), Report<BackendError>> {
        self.check_schema(schema)?;
        let mut state = self.state.lock().unwrap();
        state.existing.insert(schema.to_string());
        state.created.push(schema.to_string());
        Ok(())
    }

    async fn post_events(
        &self,
        schema: &str,
        records: &[serde_json::Value],
    ) -> Result<(), Report<BackendError>> {
        self.state
            .lock()
            .unwrap()
            .batches
            .push((schema.to_string(), records.len()));
        Ok(())
    }

    async fn post_metrics(&self, metrics: &[FlatMetric]) -> Result<(), Report<BackendError>> {
        self.state
            .lock()
            .unwrap()
            .metric_batches
            .push(metrics.to_vec());
        Ok(())
    }

    fn start_transaction(&self, name: &str) -> TransactionHandle {
        self.state
            .lock()
            .unwrap()
            .transactions
            .push(name.to_string());
        TransactionHandle::new(name)
    }

    fn stop_transaction(&self, _handle: TransactionHandle) {}

    async fn deregister_node(&self, node_id: i64) -> Result<(), Report<BackendError>> {
        self.state.lock().unwrap().deregistered.push(node_id);
        Ok(())
    }
}

/// Instrumenter returning one scripted outcome for every attempt.
///
/// A successful attempt marks the pod instrumented, the way the real
/// subsystem writes its annotation.
pub struct ScriptedInstrumenter {
    success: bool,
    message: String,
    delay: Option<Duration>,
    annotation: String,
    attempts: AtomicUsize,
    instrumented: Mutex<HashSet<PodKey>>,
}

impl ScriptedInstrumenter {
    fn new(success: bool, message: &str) -> Self {
        Self {
            success,
            message: message.to_string(),
            delay: None,
            annotation: AnnotationKeys::default().instrumented,
            attempts: AtomicUsize::new(0),
            instrumented: Mutex::new(HashSet::new()),
        }
    }

    pub fn succeeding(message: &str) -> Self {
        Self::new(true, message)
    }

    pub fn failing(message: &str) -> Self {
        Self::new(false, message)
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Instrumenter for ScriptedInstrumenter {
    fn is_instrumented(&self, pod: &Pod) -> bool {
        let annotated = pod
            .metadata
            .annotations
            .as_ref()
            .is_some_and(|annotations| annotations.contains_key(&self.annotation));
        annotated || self.instrumented.lock().unwrap().contains(&pod_key(pod))
    }

    async fn attempt(&self, _pod: Arc<Pod>, record: Arc<PodRecord>) -> AttachStatus {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.success {
            self.instrumented.lock().unwrap().insert(record.key());
        }
        AttachStatus {
            key: record.key(),
            success: self.success,
            message: self.message.clone(),
            count: 0,
        }
    }
}

/// Clock frozen at a settable instant.
#[derive(Debug)]
pub struct FixedClock {
    now: AtomicI64,
}

impl FixedClock {
    pub fn new(now_millis: i64) -> Self {
        Self {
            now: AtomicI64::new(now_millis),
        }
    }

    pub fn set(&self, now_millis: i64) {
        self.now.store(now_millis, Ordering::SeqCst);
    }
}

impl TimeSource for FixedClock {
    fn now_millis(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Metrics source answering from a fixed table.
#[derive(Debug, Default)]
pub struct StaticMetricsSource {
    usage: BTreeMap<PodKey, PodUsage>,
    failing: bool,
}

impl StaticMetricsSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Default::default()
        }
    }

    pub fn with_usage(mut self, namespace: &str, pod_name: &str, usage: PodUsage) -> Self {
        self.usage.insert(PodKey::new(namespace, pod_name), usage);
        self
    }
}

#[async_trait]
impl PodMetricsSource for StaticMetricsSource {
    async fn pod_usage(
        &self,
        namespace: &str,
        pod_name: &str,
    ) -> Result<Option<PodUsage>, Report<SourceError>> {
        if self.failing {
            return Err(Report::new(SourceError::Metrics {
                namespace: namespace.to_string(),
                pod_name: pod_name.to_string(),
                message: "scripted failure".to_string(),
            }));
        }
        Ok(self.usage.get(&PodKey::new(namespace, pod_name)).cloned())
    }
}

/// Log source returning the same text for every request.
#[derive(Debug, Default)]
pub struct StaticLogSource {
    text: Option<String>,
    requests: Mutex<Vec<LogTailRequest>>,
}

impl StaticLogSource {
    pub fn new(text: &str) -> Self {
        Self {
            text: Some(text.to_string()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self::default()
    }

    pub fn requests(&self) -> Vec<LogTailRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl LogSource for StaticLogSource {
    async fn tail(&self, request: &LogTailRequest) -> Result<String, Report<SourceError>> {
        self.requests.lock().unwrap().push(request.clone());
        self.text.clone().ok_or_else(|| {
            Report::new(SourceError::Logs {
                namespace: request.namespace.clone(),
                pod_name: request.pod_name.clone(),
                container: request.container.clone(),
                message: "scripted failure".to_string(),
            })
        })
    }
}

/// Renderer keeping every bag it was given.
#[derive(Debug, Default)]
pub struct RecordingRenderer {
    tiers: Mutex<Vec<TierBag>>,
    clusters: Mutex<Vec<ClusterBag>>,
}

impl RecordingRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tiers(&self) -> Vec<TierBag> {
        self.tiers.lock().unwrap().clone()
    }

    pub fn clusters(&self) -> Vec<ClusterBag> {
        self.clusters.lock().unwrap().clone()
    }
}

#[async_trait]
impl DashboardRenderer for RecordingRenderer {
    async fn render_tier(&self, bag: &TierBag) -> Result<(), Report<BackendError>> {
        self.tiers.lock().unwrap().push(bag.clone());
        Ok(())
    }

    async fn render_cluster(&self, bag: &ClusterBag) -> Result<(), Report<BackendError>> {
        self.clusters.lock().unwrap().push(bag.clone());
        Ok(())
    }
}

/// Event sink keeping the notes by severity.
#[derive(Debug, Default)]
pub struct RecordingEvents {
    events: Mutex<Vec<(EventSeverity, String)>>,
}

impl RecordingEvents {
    pub fn new() -> Self {
        Self::default()
    }

    fn notes(&self, severity: EventSeverity) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|(recorded, _)| *recorded == severity)
            .map(|(_, note)| note.clone())
            .collect()
    }

    pub fn normals(&self) -> Vec<String> {
        self.notes(EventSeverity::Normal)
    }

    pub fn warnings(&self) -> Vec<String> {
        self.notes(EventSeverity::Warning)
    }
}

#[async_trait]
impl InstrumentationEvents for RecordingEvents {
    async fn emit(
        &self,
        _pod: &Pod,
        severity: EventSeverity,
        note: &str,
    ) -> Result<(), Report<SourceError>> {
        self.events
            .lock()
            .unwrap()
            .push((severity, note.to_string()));
        Ok(())
    }
}

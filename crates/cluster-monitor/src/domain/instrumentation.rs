//! Per-pod instrumentation retry state machine.
//!
//! A pod moves from uninstrumented to pending when an attempt is dispatched,
//! then to success or failure. Failures are counted per pod and retried on
//! later evaluations until the ceiling, after which the pod is abandoned.
//! At most one attempt per pod is in flight.

use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::Mutex;

use k8s_openapi::api::core::v1::Pod;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::config::MonitorConfig;
use crate::domain::dashboard::DashboardEligibility;
use crate::domain::records::PodKey;
use crate::domain::records::PodRecord;
use crate::domain::traits::AttachStatus;
use crate::domain::traits::EventSeverity;
use crate::domain::traits::InstrumentationEvents;
use crate::domain::traits::Instrumenter;

/// Failure bookkeeping of one pod.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttemptRecord {
    pub count: u32,
    pub message: String,
}

/// What one evaluation did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Evaluation {
    AlreadyInstrumented,
    Abandoned,
    NotRunning,
    InFlight,
    Succeeded { remark: Option<String> },
    Failed { count: u32 },
    Cancelled,
}

pub struct InstrumentationTracker {
    config: Arc<MonitorConfig>,
    instrumenter: Arc<dyn Instrumenter>,
    events: Arc<dyn InstrumentationEvents>,
    eligibility: Arc<DashboardEligibility>,
    pending: Mutex<HashSet<PodKey>>,
    failures: Mutex<HashMap<PodKey, AttemptRecord>>,
    cancellation_token: CancellationToken,
}

impl InstrumentationTracker {
    pub fn new(
        config: Arc<MonitorConfig>,
        instrumenter: Arc<dyn Instrumenter>,
        events: Arc<dyn InstrumentationEvents>,
        eligibility: Arc<DashboardEligibility>,
        cancellation_token: CancellationToken,
    ) -> Self {
        Self {
            config,
            instrumenter,
            events,
            eligibility,
            pending: Mutex::new(HashSet::new()),
            failures: Mutex::new(HashMap::new()),
            cancellation_token,
        }
    }

    pub fn is_pending(&self, key: &PodKey) -> bool {
        self.pending
            .lock()
            .expect("should not be poisoned")
            .contains(key)
    }

    pub fn failures(&self, key: &PodKey) -> Option<AttemptRecord> {
        self.failures
            .lock()
            .expect("should not be poisoned")
            .get(key)
            .cloned()
    }

    /// Drops every trace of a pod that disappeared.
    pub fn forget(&self, key: &PodKey) {
        self.pending
            .lock()
            .expect("should not be poisoned")
            .remove(key);
        self.failures
            .lock()
            .expect("should not be poisoned")
            .remove(key);
    }

    fn release(&self, key: &PodKey) {
        self.pending
            .lock()
            .expect("should not be poisoned")
            .remove(key);
    }

    /// Decides whether to attempt instrumentation and waits for the outcome.
    #[tracing::instrument(skip_all, fields(namespace = %record.namespace, pod_name = %record.name))]
    pub async fn evaluate(&self, pod: Arc<Pod>, record: Arc<PodRecord>) -> Evaluation {
        let key = record.key();

        if self.instrumenter.is_instrumented(&pod) {
            self.forget(&key);
            return Evaluation::AlreadyInstrumented;
        }

        let failed = self.failures(&key).map(|attempt| attempt.count).unwrap_or(0);
        if failed >= self.config.max_instrumentation_attempts {
            self.release(&key);
            debug!(attempts = failed, "Instrumentation abandoned");
            return Evaluation::Abandoned;
        }

        if !record.is_running() {
            return Evaluation::NotRunning;
        }

        let inserted = self
            .pending
            .lock()
            .expect("should not be poisoned")
            .insert(key.clone());
        if !inserted {
            return Evaluation::InFlight;
        }

        let (sender, receiver) = oneshot::channel();
        {
            let instrumenter = self.instrumenter.clone();
            let pod = pod.clone();
            let record = record.clone();
            tokio::spawn(async move {
                let status = instrumenter.attempt(pod, record).await;
                let _ = sender.send(status);
            });
        }

        let status = tokio::select! {
            _ = self.cancellation_token.cancelled() => {
                self.release(&key);
                info!("Abandoning in-flight instrumentation attempt on shutdown");
                return Evaluation::Cancelled;
            }
            result = tokio::time::timeout(self.config.instrumentation_timeout, receiver) => match result {
                Ok(Ok(status)) => status,
                Ok(Err(_)) => AttachStatus {
                    key: key.clone(),
                    message: "instrumentation attempt ended without a result".to_string(),
                    ..Default::default()
                },
                Err(_) => AttachStatus {
                    key: key.clone(),
                    message: format!(
                        "instrumentation attempt timed out after {:?}",
                        self.config.instrumentation_timeout
                    ),
                    ..Default::default()
                },
            },
        };

        if status.success {
            self.on_success(&pod, &record, &key, status).await
        } else {
            self.on_failure(&pod, &key, status).await
        }
    }

    async fn on_success(
        &self,
        pod: &Pod,
        record: &PodRecord,
        key: &PodKey,
        status: AttachStatus,
    ) -> Evaluation {
        self.forget(key);
        self.eligibility.flag(&record.namespace, &record.owner);

        if status.message.is_empty() {
            info!("Instrumentation succeeded");
            self.emit(pod, EventSeverity::Normal, "Instrumentation succeeded").await;
            Evaluation::Succeeded { remark: None }
        } else {
            warn!(remark = %status.message, "Instrumentation succeeded with a remark");
            self.emit(pod, EventSeverity::Warning, &status.message).await;
            Evaluation::Succeeded {
                remark: Some(status.message),
            }
        }
    }

    async fn on_failure(&self, pod: &Pod, key: &PodKey, status: AttachStatus) -> Evaluation {
        let count = {
            let mut failures = self.failures.lock().expect("should not be poisoned");
            let attempt = failures
                .entry(key.clone())
                .and_modify(|attempt| attempt.count += 1)
                .or_insert_with(|| AttemptRecord {
                    count: status.count.max(1),
                    message: String::new(),
                });
            attempt.message = status.message.clone();
            attempt.count
        };
        self.release(key);

        warn!(attempts = count, message = %status.message, "Instrumentation attempt failed");
        if !status.message.is_empty() {
            self.emit(pod, EventSeverity::Warning, &status.message).await;
        }
        Evaluation::Failed { count }
    }

    async fn emit(&self, pod: &Pod, severity: EventSeverity, note: &str) {
        if let Err(e) = self.events.emit(pod, severity, note).await {
            warn!(severity = %severity, "Failed to publish instrumentation event: {e:?}");
        }
    }
}

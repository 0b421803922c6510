//! Canonical records produced per pod observation.
//!
//! A [`PodRecord`] is built once by the transformation pipeline and then
//! shared read-only (`Arc<PodRecord>`) with the dispatch queue, the
//! dashboard cache and the aggregation engine.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;
use serde::Serializer;

pub const PHASE_RUNNING: &str = "Running";
pub const PHASE_PENDING: &str = "Pending";
pub const PHASE_FAILED: &str = "Failed";
pub const REASON_EVICTED: &str = "Evicted";

/// Maximum length of a single text field accepted by the events API.
pub const MAX_FIELD_LENGTH: usize = 4096;

/// Namespace + name identity of a pod.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PodKey {
    pub namespace: String,
    pub name: String,
}

impl PodKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for PodKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Declared container port and whether a service routes to it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerPortRecord {
    pub port_number: i32,
    pub name: String,
    pub mapped: bool,
    pub ready: bool,
}

/// Per-container view of a pod observation.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerRecord {
    pub name: String,
    pub namespace: String,
    pub node_name: String,
    pub pod_name: String,
    pub init: bool,
    pub pod_init_time_millis: i64,

    pub image: String,
    pub restarts: i32,
    pub wait_reason: String,
    pub term_reason: String,
    pub termination_time_millis: i64,
    pub start_time_millis: Option<i64>,
    pub last_termination_time_millis: Option<i64>,
    pub exit_code: i32,

    pub privileged: i64,
    pub live_probes: i64,
    pub ready_probes: i64,
    pub limits_defined: bool,

    pub cpu_request: i64,
    pub cpu_limit: i64,
    pub mem_request: i64,
    pub mem_limit: i64,
    pub cpu_use: i64,
    pub mem_use: i64,
    pub pod_storage_request: i64,
    pub pod_storage_limit: i64,
    pub storage_request: i64,
    pub storage_capacity: i64,

    pub mounts: String,
    #[serde(serialize_with = "serialize_ports")]
    pub container_ports: Vec<ContainerPortRecord>,
    pub missing_services: String,
    pub missing_configs: String,
    pub missing_secrets: String,
}

impl ContainerRecord {
    pub fn has_missing_dependencies(&self) -> bool {
        !self.missing_configs.is_empty() || !self.missing_secrets.is_empty()
    }

    /// A declared port that no service routes to, or that is routed but not ready.
    pub fn has_no_connectivity(&self) -> bool {
        self.container_ports
            .iter()
            .any(|port| !port.mapped || !port.ready)
    }
}

/// The canonical, backend-agnostic state of one pod at one observation.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PodRecord {
    pub name: String,
    pub namespace: String,
    pub node_name: String,
    pub cluster_name: String,
    pub owner: String,
    pub app_name: String,
    pub tier_name: String,
    pub app_id: i64,
    pub tier_id: i64,
    pub node_id: i64,
    #[serde(rename = "apmNodeName")]
    pub apm_node_name: String,
    pub labels: String,
    pub annotations: String,
    pub host_ip: String,
    pub pod_ip: String,

    pub phase: String,
    pub reason: String,
    pub is_evicted: bool,
    pub reason_condition: String,
    pub status_condition: String,
    pub type_condition: String,
    pub last_transition_time_condition: Option<i64>,

    pub start_time_millis: i64,
    pub running_start_time_millis: i64,
    pub termination_time_millis: i64,
    pub break_point_millis: i64,
    pub pending_time: i64,
    pub up_time_millis: i64,

    pub container_count: i64,
    pub init_container_count: i64,
    pub num_privileged: i64,
    pub live_probes: i64,
    pub ready_probes: i64,
    pub pod_restarts: i64,
    pub limits_defined: bool,
    pub missing_dependencies: bool,
    pub no_connectivity: bool,

    pub cpu_request: i64,
    pub cpu_limit: i64,
    pub mem_request: i64,
    pub mem_limit: i64,
    pub cpu_use: i64,
    pub mem_use: i64,
    pub pod_storage_request: i64,
    pub pod_storage_limit: i64,
    pub storage_request: i64,
    pub storage_capacity: i64,

    pub priority: i32,
    pub service_account_name: String,
    pub termination_grace_period_seconds: i64,
    pub restart_policy: String,
    pub has_active_deadline: bool,
    pub tolerations: String,
    pub node_affinity_preferred: String,
    pub node_affinity_required: String,
    pub pod_affinity_preferred: String,
    pub pod_affinity_required: String,
    pub pod_anti_affinity_preferred: String,
    pub pod_anti_affinity_required: String,

    /// Keys (`namespace/name`) of the services routing to this pod.
    #[serde(serialize_with = "serialize_joined")]
    pub services: Vec<String>,
    /// Keys (`namespace/name`) of the endpoints whose labels select this pod.
    #[serde(serialize_with = "serialize_joined")]
    pub endpoints: Vec<String>,

    /// Posted to their own schema, not nested in the pod event.
    #[serde(skip)]
    pub containers: BTreeMap<String, ContainerRecord>,
    #[serde(skip)]
    pub init_containers: BTreeMap<String, ContainerRecord>,
}

impl PodRecord {
    pub fn key(&self) -> PodKey {
        PodKey::new(&self.namespace, &self.name)
    }

    pub fn is_running(&self) -> bool {
        self.phase == PHASE_RUNNING
    }
}

/// One log line tailed from a restarting container.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogRecord {
    pub cluster_name: String,
    pub namespace: String,
    pub pod_owner: String,
    pub pod_name: String,
    pub container_name: String,
    pub timestamp: Option<chrono::DateTime<chrono::Utc>>,
    pub message: String,
    pub batch_timestamp: i64,
}

/// Endpoint record posted when an endpoint object changed since the last cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointRecord {
    pub name: String,
    pub namespace: String,
    pub cluster_name: String,
    pub ready_count: i64,
    pub not_ready_count: i64,
    pub is_orphan: bool,
}

/// Namespace record, re-posted when its quota count changes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NamespaceRecord {
    pub name: String,
    pub cluster_name: String,
    pub status: String,
    pub quotas: i64,
}

fn serialize_joined<S: Serializer>(values: &[String], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(&values.iter().map(|value| format!("{value};")).collect::<String>())
}

fn serialize_ports<S: Serializer>(
    ports: &[ContainerPortRecord],
    serializer: S,
) -> Result<S::Ok, S::Error> {
    let text: String = ports
        .iter()
        .map(|port| format!("{}:{}:{}:{};", port.port_number, port.name, port.mapped, port.ready))
        .collect();
    serializer.collect_str(&text)
}

/// Truncates `message` to [`MAX_FIELD_LENGTH`] bytes, keeping the tail.
pub fn keep_tail(message: &str) -> &str {
    if message.len() < MAX_FIELD_LENGTH {
        return message;
    }
    let mut start = message.len() - MAX_FIELD_LENGTH;
    while !message.is_char_boundary(start) {
        start += 1;
    }
    &message[start..]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keep_tail_preserves_short_messages() {
        assert_eq!(keep_tail("hello"), "hello");
    }

    #[test]
    fn keep_tail_truncates_from_the_front() {
        let message = format!("{}{}", "a".repeat(10), "b".repeat(MAX_FIELD_LENGTH));
        let tail = keep_tail(&message);
        assert_eq!(tail.len(), MAX_FIELD_LENGTH);
        assert!(tail.chars().all(|c| c == 'b'));
    }

    #[test]
    fn no_connectivity_requires_ready_ports() {
        let mut container = ContainerRecord::default();
        assert!(!container.has_no_connectivity());
        container.container_ports.push(ContainerPortRecord {
            port_number: 8080,
            mapped: true,
            ready: true,
            ..Default::default()
        });
        assert!(!container.has_no_connectivity());
        container.container_ports[0].ready = false;
        assert!(container.has_no_connectivity());
    }
}

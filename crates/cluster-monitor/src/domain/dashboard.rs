//! Dashboard bag assembly behind a start-up warm-up gate.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::RwLock;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing::warn;

use crate::config::MonitorConfig;
use crate::domain::records::PodRecord;
use crate::domain::records::PHASE_FAILED;
use crate::domain::records::PHASE_PENDING;
use crate::domain::records::PHASE_RUNNING;
use crate::domain::traits::DashboardRenderer;
use crate::domain::traits::TelemetryBackend;

type WorkloadKey = (String, String);

/// Latest pod records of the workloads that get a dashboard.
///
/// A workload is eligible when it is listed in the configuration or was
/// flagged after a successful instrumentation.
#[derive(Debug, Default)]
pub struct DashboardEligibility {
    configured: BTreeSet<String>,
    flagged: RwLock<BTreeSet<WorkloadKey>>,
    records: RwLock<BTreeMap<WorkloadKey, BTreeMap<String, Arc<PodRecord>>>>,
}

impl DashboardEligibility {
    pub fn new(config: &MonitorConfig) -> Self {
        Self {
            configured: config.deploys_to_dashboard.iter().cloned().collect(),
            ..Default::default()
        }
    }

    pub fn flag(&self, namespace: &str, owner: &str) {
        self.flagged
            .write()
            .expect("should not be poisoned")
            .insert((namespace.to_string(), owner.to_string()));
    }

    pub fn is_eligible(&self, namespace: &str, owner: &str) -> bool {
        self.configured.contains(owner)
            || self
                .flagged
                .read()
                .expect("should not be poisoned")
                .contains(&(namespace.to_string(), owner.to_string()))
    }

    /// Keeps the record when its workload is eligible. Returns whether it was kept.
    pub fn register(&self, record: Arc<PodRecord>) -> bool {
        if !self.is_eligible(&record.namespace, &record.owner) {
            return false;
        }
        self.records
            .write()
            .expect("should not be poisoned")
            .entry((record.namespace.clone(), record.owner.clone()))
            .or_default()
            .insert(record.name.clone(), record);
        true
    }

    pub fn forget(&self, record: &PodRecord) {
        let mut records = self.records.write().expect("should not be poisoned");
        let key = (record.namespace.clone(), record.owner.clone());
        if let Some(pods) = records.get_mut(&key) {
            pods.remove(&record.name);
            if pods.is_empty() {
                records.remove(&key);
            }
        }
    }

    /// Workloads with at least one registered record.
    pub fn workloads(&self) -> Vec<WorkloadKey> {
        self.records
            .read()
            .expect("should not be poisoned")
            .keys()
            .cloned()
            .collect()
    }

    /// Removes and returns every registered record, grouped by workload.
    pub fn take(&self) -> BTreeMap<WorkloadKey, Vec<Arc<PodRecord>>> {
        std::mem::take(&mut *self.records.write().expect("should not be poisoned"))
            .into_iter()
            .map(|(key, pods)| (key, pods.into_values().collect()))
            .collect()
    }

    pub fn clear(&self) {
        self.records.write().expect("should not be poisoned").clear();
    }
}

/// All current pod records of one workload.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TierBag {
    pub cluster_name: String,
    pub namespace: String,
    pub owner: String,
    pub app_name: String,
    pub tier_name: String,
    pub app_id: i64,
    pub tier_id: i64,
    pub pods: Vec<PodRecord>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, derive_more::Display)]
#[serde(rename_all = "lowercase")]
pub enum HeatState {
    #[display("healthy")]
    Healthy,
    #[display("pending")]
    Pending,
    #[display("warning")]
    Warning,
    #[display("failed")]
    Failed,
}

impl HeatState {
    pub fn of(record: &PodRecord) -> Self {
        if record.is_evicted || record.phase == PHASE_FAILED {
            return HeatState::Failed;
        }
        if record.phase == PHASE_PENDING {
            return HeatState::Pending;
        }
        let degraded = record.pod_restarts > 0 || record.missing_dependencies || record.no_connectivity;
        if record.phase == PHASE_RUNNING && !degraded {
            HeatState::Healthy
        } else {
            HeatState::Warning
        }
    }
}

/// One cell of the cluster heat map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HeatNode {
    pub namespace: String,
    pub owner: String,
    pub name: String,
    pub node_name: String,
    pub phase: String,
    pub state: HeatState,
    pub restarts: i64,
}

/// Cluster-wide bag with a heat map over every pod.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterBag {
    pub cluster_name: String,
    pub app_id: i64,
    pub tier_id: i64,
    pub node_id: i64,
    pub pod_count: usize,
    pub heat_map: Vec<HeatNode>,
}

impl ClusterBag {
    pub fn from_records(config: &MonitorConfig, records: &[Arc<PodRecord>]) -> Self {
        let heat_map = records
            .iter()
            .map(|record| HeatNode {
                namespace: record.namespace.clone(),
                owner: record.owner.clone(),
                name: record.name.clone(),
                node_name: record.node_name.clone(),
                phase: record.phase.clone(),
                state: HeatState::of(record),
                restarts: record.pod_restarts,
            })
            .collect();
        Self {
            cluster_name: config.cluster_name.clone(),
            app_id: config.cluster_app_id,
            tier_id: config.cluster_tier_id,
            node_id: config.cluster_node_id,
            pod_count: records.len(),
            heat_map,
        }
    }
}

/// Counts of one dashboard build.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DashboardStats {
    pub tiers: usize,
    pub cluster: bool,
}

pub struct DashboardTrigger {
    config: Arc<MonitorConfig>,
    eligibility: Arc<DashboardEligibility>,
    renderer: Arc<dyn DashboardRenderer>,
    backend: Arc<dyn TelemetryBackend>,
    warmed_up: AtomicBool,
}

impl DashboardTrigger {
    pub fn new(
        config: Arc<MonitorConfig>,
        eligibility: Arc<DashboardEligibility>,
        renderer: Arc<dyn DashboardRenderer>,
        backend: Arc<dyn TelemetryBackend>,
    ) -> Self {
        Self {
            config,
            eligibility,
            renderer,
            backend,
            warmed_up: AtomicBool::new(false),
        }
    }

    pub fn eligibility(&self) -> &Arc<DashboardEligibility> {
        &self.eligibility
    }

    pub fn is_warmed_up(&self) -> bool {
        self.warmed_up.load(Ordering::Acquire)
    }

    pub fn open_gate(&self) {
        self.warmed_up.store(true, Ordering::Release);
    }

    /// Opens the gate once the configured delay has elapsed.
    pub async fn run_warm_up(&self, cancellation_token: CancellationToken) {
        info!(delay = ?self.config.dashboard_delay, "Dashboard warm-up started");
        tokio::select! {
            _ = cancellation_token.cancelled() => {
                info!("Dashboard warm-up cancelled");
            }
            _ = tokio::time::sleep(self.config.dashboard_delay) => {
                self.open_gate();
                info!("Dashboard warm-up complete");
            }
        }
    }

    /// Renders one bag per eligible workload and the cluster bag.
    ///
    /// Before warm-up the registered records are discarded and nothing renders.
    #[tracing::instrument(skip_all, fields(pods = records.len()))]
    pub async fn build(&self, records: &[Arc<PodRecord>]) -> DashboardStats {
        let mut stats = DashboardStats::default();
        if !self.is_warmed_up() {
            self.eligibility.clear();
            return stats;
        }
        let transaction = self.backend.start_transaction("BuildDashboard");

        for ((namespace, owner), pods) in self.eligibility.take() {
            let Some(first) = pods.first() else {
                continue;
            };
            let bag = TierBag {
                cluster_name: self.config.cluster_name.clone(),
                namespace: namespace.clone(),
                owner: owner.clone(),
                app_name: first.app_name.clone(),
                tier_name: first.tier_name.clone(),
                app_id: first.app_id,
                tier_id: first.tier_id,
                pods: pods.iter().map(|pod| pod.as_ref().clone()).collect(),
            };
            match self.renderer.render_tier(&bag).await {
                Ok(()) => stats.tiers += 1,
                Err(e) => warn!(namespace = %namespace, owner = %owner, "Failed to render tier dashboard: {e:?}"),
            }
        }

        let bag = ClusterBag::from_records(&self.config, records);
        match self.renderer.render_cluster(&bag).await {
            Ok(()) => stats.cluster = true,
            Err(e) => warn!("Failed to render cluster dashboard: {e:?}"),
        }

        self.backend.stop_transaction(transaction);
        stats
    }
}

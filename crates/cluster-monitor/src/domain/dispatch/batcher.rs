use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::config::MonitorConfig;
use crate::domain::dispatch::schema::SchemaDefinition;
use crate::domain::dispatch::DispatchQueue;
use crate::domain::dispatch::QueueItem;
use crate::domain::records::ContainerRecord;
use crate::domain::records::EndpointRecord;
use crate::domain::records::LogRecord;
use crate::domain::records::NamespaceRecord;
use crate::domain::records::PodRecord;
use crate::domain::traits::TelemetryBackend;

/// Counters of one queue drain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushStats {
    pub pod_batches: usize,
    pub pods: usize,
    pub containers: usize,
    pub logs: usize,
}

/// Drains the dispatch queue into size-bounded events API calls.
pub struct Batcher {
    backend: Arc<dyn TelemetryBackend>,
    config: Arc<MonitorConfig>,
}

impl Batcher {
    pub fn new(backend: Arc<dyn TelemetryBackend>, config: Arc<MonitorConfig>) -> Self {
        Self { backend, config }
    }

    /// Flushes on the snapshot interval; on shutdown drains once more and
    /// closes the queue.
    #[tracing::instrument(skip_all)]
    pub async fn run(&self, queue: &DispatchQueue, cancellation_token: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.snapshot_sync_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        info!(interval = ?self.config.snapshot_sync_interval, "Starting queue flush loop");

        loop {
            tokio::select! {
                _ = cancellation_token.cancelled() => {
                    info!("Queue flush shutdown requested");
                    break;
                }
                _ = interval.tick() => {
                    let stats = self.flush(queue).await;
                    if stats.pods > 0 || stats.logs > 0 {
                        debug!(?stats, "Queue flushed");
                    }
                }
            }
        }

        queue.shutdown();
        let stats = self.flush(queue).await;
        info!(?stats, "Queue drained on shutdown");
    }

    fn limit(&self) -> usize {
        self.config.event_api_limit.max(1)
    }

    /// Pops until the queue is empty, posting a pod batch each time it reaches
    /// the per-request limit and the remainder at the end.
    ///
    /// Failed batches are logged and dropped.
    #[tracing::instrument(skip_all)]
    pub async fn flush(&self, queue: &DispatchQueue) -> FlushStats {
        let mut stats = FlushStats::default();
        if queue.is_empty() {
            return stats;
        }
        let transaction = self.backend.start_transaction("FlushPodDataQueue");
        info!(queued = queue.len(), "Flushing the pod record queue");

        let mut pods: Vec<Arc<PodRecord>> = Vec::new();
        let mut logs: Vec<LogRecord> = Vec::new();

        while let Some(item) = queue.try_pop() {
            match item {
                QueueItem::Pod(record) => {
                    pods.push(record);
                    if pods.len() >= self.limit() {
                        self.post_pod_batch(&pods, &mut stats).await;
                        pods.clear();
                    }
                }
                QueueItem::Logs(batch) => logs.extend(batch),
            }
        }
        if !pods.is_empty() {
            self.post_pod_batch(&pods, &mut stats).await;
        }
        if !logs.is_empty() {
            stats.logs = logs.len();
            self.post_logs(&logs).await;
        }

        self.backend.stop_transaction(transaction);
        stats
    }

    async fn post_pod_batch(&self, pods: &[Arc<PodRecord>], stats: &mut FlushStats) {
        debug!(count = pods.len(), "Sending pod records to the events API");
        let schemas = &self.config.schemas;
        let records = to_values(pods.iter().map(|pod| pod.as_ref()));
        self.post_chunked(&schemas.pods, &SchemaDefinition::pods(), records)
            .await;
        stats.pod_batches += 1;
        stats.pods += pods.len();

        let containers: Vec<&ContainerRecord> = pods
            .iter()
            .flat_map(|pod| pod.containers.values())
            .collect();
        stats.containers += containers.len();
        if !containers.is_empty() {
            let records = to_values(containers.into_iter());
            self.post_chunked(&schemas.containers, &SchemaDefinition::containers(), records)
                .await;
        }
    }

    /// Log records use an explicit exists/create pair instead of ensure.
    async fn post_logs(&self, logs: &[LogRecord]) {
        let schema = &self.config.schemas.logs;
        match self.backend.schema_exists(schema).await {
            Ok(true) => {}
            Ok(false) => {
                info!(schema = %schema, "Creating log schema");
                if let Err(e) = self
                    .backend
                    .create_schema(schema, &SchemaDefinition::logs())
                    .await
                {
                    warn!(schema = %schema, "Failed to create log schema: {e:?}");
                    return;
                }
            }
            Err(e) => {
                warn!(schema = %schema, "Failed to check log schema: {e:?}");
                return;
            }
        }
        for chunk in to_values(logs.iter()).chunks(self.limit()) {
            if let Err(e) = self.backend.post_events(schema, chunk).await {
                warn!(schema = %schema, count = chunk.len(), "Dropping log batch: {e:?}");
            }
        }
    }

    pub async fn post_endpoints(&self, records: &[EndpointRecord]) {
        if records.is_empty() {
            return;
        }
        self.post_chunked(
            &self.config.schemas.endpoints,
            &SchemaDefinition::endpoints(),
            to_values(records.iter()),
        )
        .await;
    }

    pub async fn post_namespaces(&self, records: &[NamespaceRecord]) {
        if records.is_empty() {
            return;
        }
        self.post_chunked(
            &self.config.schemas.namespaces,
            &SchemaDefinition::namespaces(),
            to_values(records.iter()),
        )
        .await;
    }

    /// Ensures the schema, then posts `records` in chunks of at most the limit.
    async fn post_chunked(&self, schema: &str, definition: &SchemaDefinition, records: Vec<Value>) {
        if let Err(e) = self.backend.ensure_schema(schema, definition).await {
            warn!(schema = %schema, count = records.len(), "Dropping batch, schema not ensured: {e:?}");
            return;
        }
        for chunk in records.chunks(self.limit()) {
            if let Err(e) = self.backend.post_events(schema, chunk).await {
                warn!(schema = %schema, count = chunk.len(), "Dropping batch: {e:?}");
            }
        }
    }
}

fn to_values<'a, T: Serialize + 'a>(items: impl Iterator<Item = &'a T>) -> Vec<Value> {
    items
        .filter_map(|item| match serde_json::to_value(item) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("Skipping record that failed to serialize: {e}");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::mock::RecordingBackend;
    use crate::domain::records::ContainerRecord;

    fn pod(name: &str, containers: usize) -> Arc<PodRecord> {
        let mut record = PodRecord {
            namespace: "ns1".to_string(),
            name: name.to_string(),
            ..Default::default()
        };
        for index in 0..containers {
            let name = format!("c{index}");
            record.containers.insert(
                name.clone(),
                ContainerRecord {
                    name,
                    ..Default::default()
                },
            );
        }
        Arc::new(record)
    }

    fn batcher(backend: Arc<RecordingBackend>, limit: usize) -> Batcher {
        let config = MonitorConfig {
            event_api_limit: limit,
            ..Default::default()
        };
        Batcher::new(backend, Arc::new(config))
    }

    #[test_log::test(tokio::test)]
    async fn drain_posts_ceil_q_over_l_pod_batches() {
        let backend = Arc::new(RecordingBackend::new());
        let batcher = batcher(backend.clone(), 3);
        let queue = DispatchQueue::new();
        for index in 0..7 {
            queue.push(pod(&format!("web-{index}"), 1));
        }

        let stats = batcher.flush(&queue).await;

        assert!(queue.is_empty());
        assert_eq!(stats.pod_batches, 3);
        assert_eq!(stats.pods, 7);
        let sizes = backend.batch_sizes("cluster_monitor_pods");
        assert_eq!(sizes, vec![3, 3, 1]);
        assert!(sizes.iter().all(|size| *size <= 3));
        assert_eq!(backend.batch_sizes("cluster_monitor_containers"), vec![3, 3, 1]);
        assert_eq!(
            backend.transactions(),
            vec!["FlushPodDataQueue".to_string()]
        );
    }

    #[tokio::test]
    async fn container_records_are_chunked_by_limit() {
        let backend = Arc::new(RecordingBackend::new());
        let batcher = batcher(backend.clone(), 2);
        let queue = DispatchQueue::new();
        queue.push(pod("web-0", 5));

        batcher.flush(&queue).await;

        assert_eq!(backend.batch_sizes("cluster_monitor_pods"), vec![1]);
        assert_eq!(backend.batch_sizes("cluster_monitor_containers"), vec![2, 2, 1]);
    }

    #[tokio::test]
    async fn failed_schema_drops_the_batch() {
        let backend = Arc::new(RecordingBackend::new());
        backend.fail_schema("cluster_monitor_pods");
        let batcher = batcher(backend.clone(), 10);
        let queue = DispatchQueue::new();
        queue.push(pod("web-0", 0));

        let stats = batcher.flush(&queue).await;

        assert_eq!(stats.pods, 1);
        assert!(queue.is_empty());
        assert!(backend.batch_sizes("cluster_monitor_pods").is_empty());
    }

    #[tokio::test]
    async fn logs_create_their_schema_once() {
        let backend = Arc::new(RecordingBackend::new());
        let batcher = batcher(backend.clone(), 10);
        let queue = DispatchQueue::new();
        queue.push_logs(vec![LogRecord::default(), LogRecord::default()]);

        batcher.flush(&queue).await;
        queue.push_logs(vec![LogRecord::default()]);
        batcher.flush(&queue).await;

        assert_eq!(backend.created_schemas(), vec!["cluster_monitor_logs".to_string()]);
        assert_eq!(backend.batch_sizes("cluster_monitor_logs"), vec![2, 1]);
    }

    #[tokio::test]
    async fn shutdown_drains_and_closes_the_queue() {
        let backend = Arc::new(RecordingBackend::new());
        let batcher = batcher(backend.clone(), 10);
        let queue = DispatchQueue::new();
        queue.push(pod("web-0", 0));
        let token = CancellationToken::new();
        token.cancel();

        batcher.run(&queue, token).await;

        assert!(queue.is_empty());
        assert!(queue.is_shutdown());
        assert_eq!(backend.batch_sizes("cluster_monitor_pods"), vec![1]);
    }

    #[tokio::test]
    async fn empty_queue_posts_nothing() {
        let backend = Arc::new(RecordingBackend::new());
        let batcher = batcher(backend.clone(), 10);
        let stats = batcher.flush(&DispatchQueue::new()).await;
        assert_eq!(stats, FlushStats::default());
        assert!(backend.transactions().is_empty());
    }
}

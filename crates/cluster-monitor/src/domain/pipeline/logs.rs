//! Log tails of crash-looping containers, turned into log records.

use std::sync::Arc;

use chrono::DateTime;
use chrono::Utc;
use tracing::debug;
use tracing::warn;

use crate::domain::dispatch::DispatchQueue;
use crate::domain::records::keep_tail;
use crate::domain::records::LogRecord;
use crate::domain::traits::LogSource;
use crate::domain::traits::LogTailRequest;
use crate::domain::traits::TimeSource;

/// Splits each line on its first space into an RFC 3339 timestamp and the
/// message. Lines without a parseable timestamp keep the whole text.
pub fn parse_log_lines(text: &str, request: &LogTailRequest, batch_timestamp: i64) -> Vec<LogRecord> {
    text.lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            let (timestamp, message) = match line.split_once(' ') {
                Some((head, tail)) => match DateTime::parse_from_rfc3339(head) {
                    Ok(parsed) => (Some(parsed.with_timezone(&Utc)), tail),
                    Err(_) => (None, line),
                },
                None => (None, line),
            };
            LogRecord {
                cluster_name: request.cluster_name.clone(),
                namespace: request.namespace.clone(),
                pod_owner: request.pod_owner.clone(),
                pod_name: request.pod_name.clone(),
                container_name: request.container.clone(),
                timestamp,
                message: keep_tail(message).to_string(),
                batch_timestamp,
            }
        })
        .collect()
}

/// Fetches log tails and queues the resulting records for dispatch.
pub struct LogCollector {
    source: Arc<dyn LogSource>,
    queue: Arc<DispatchQueue>,
    clock: Arc<dyn TimeSource>,
}

impl LogCollector {
    pub fn new(
        source: Arc<dyn LogSource>,
        queue: Arc<DispatchQueue>,
        clock: Arc<dyn TimeSource>,
    ) -> Self {
        Self {
            source,
            queue,
            clock,
        }
    }

    /// Returns the number of records queued. Fetch errors are logged and yield zero.
    pub async fn collect(&self, request: &LogTailRequest) -> usize {
        let text = match self.source.tail(request).await {
            Ok(text) => text,
            Err(e) => {
                warn!(
                    namespace = %request.namespace,
                    pod_name = %request.pod_name,
                    container = %request.container,
                    "Failed to read container logs: {e:?}"
                );
                return 0;
            }
        };
        let records = parse_log_lines(&text, request, self.clock.now_millis());
        let count = records.len();
        debug!(pod_name = %request.pod_name, container = %request.container, count, "Queueing log records");
        self.queue.push_logs(records);
        count
    }

    /// Runs each tail in its own task.
    pub fn spawn(self: &Arc<Self>, requests: Vec<LogTailRequest>) {
        for request in requests {
            let collector = Arc::clone(self);
            tokio::spawn(async move {
                collector.collect(&request).await;
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::dispatch::QueueItem;
    use crate::domain::mock::FixedClock;
    use crate::domain::mock::StaticLogSource;
    use crate::domain::records::MAX_FIELD_LENGTH;

    fn request() -> LogTailRequest {
        LogTailRequest {
            cluster_name: "cluster".to_string(),
            namespace: "ns1".to_string(),
            pod_owner: "web".to_string(),
            pod_name: "web-1".to_string(),
            container: "app".to_string(),
            since_seconds: 15,
            tail_lines: 100,
        }
    }

    #[test]
    fn lines_split_into_timestamp_and_message() {
        let text = "2024-05-01T10:00:00.123456789Z panic: out of memory\n\n2024-05-01T10:00:01Z exiting with code 2\n";
        let records = parse_log_lines(text, &request(), 42);

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].message, "panic: out of memory");
        assert_eq!(
            records[0].timestamp.map(|ts| ts.timestamp_millis()),
            Some(1_714_557_600_123)
        );
        assert_eq!(records[1].container_name, "app");
        assert_eq!(records[1].batch_timestamp, 42);
    }

    #[test]
    fn unparseable_timestamp_keeps_the_whole_line() {
        let records = parse_log_lines("not-a-time something happened", &request(), 0);
        assert_eq!(records[0].timestamp, None);
        assert_eq!(records[0].message, "not-a-time something happened");
    }

    #[test]
    fn long_messages_keep_their_tail() {
        let text = format!("2024-05-01T10:00:00Z {}END", "x".repeat(MAX_FIELD_LENGTH));
        let records = parse_log_lines(&text, &request(), 0);
        assert_eq!(records[0].message.len(), MAX_FIELD_LENGTH);
        assert!(records[0].message.ends_with("END"));
    }

    #[tokio::test]
    async fn collected_lines_are_queued() {
        let source = Arc::new(StaticLogSource::new("2024-05-01T10:00:00Z boom\n"));
        let queue = Arc::new(DispatchQueue::new());
        let collector = LogCollector::new(source, queue.clone(), Arc::new(FixedClock::new(7)));

        assert_eq!(collector.collect(&request()).await, 1);
        let Some(QueueItem::Logs(logs)) = queue.try_pop() else {
            panic!("expected queued logs");
        };
        assert_eq!(logs[0].message, "boom");
        assert_eq!(logs[0].batch_timestamp, 7);
    }

    #[tokio::test]
    async fn fetch_errors_queue_nothing() {
        let source = Arc::new(StaticLogSource::failing());
        let queue = Arc::new(DispatchQueue::new());
        let collector = LogCollector::new(source, queue.clone(), Arc::new(FixedClock::new(7)));

        assert_eq!(collector.collect(&request()).await, 0);
        assert!(queue.is_empty());
    }
}

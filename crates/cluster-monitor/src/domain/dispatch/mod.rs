//! Deduplicating work queue between record production and remote submission.
//!
//! Producers push immutable records at event time; the flush timer drains the
//! queue through the [`batcher::Batcher`]. A pod that is queued again before the
//! next flush replaces its older record in place, so each flush carries at most
//! one record per pod and the flush cadence bounds the submission rate.

pub mod batcher;
pub mod schema;

use std::collections::HashSet;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;

use tokio::sync::Notify;

use crate::domain::records::LogRecord;
use crate::domain::records::PodKey;
use crate::domain::records::PodRecord;

#[derive(Debug, Clone)]
pub enum QueueItem {
    Pod(Arc<PodRecord>),
    Logs(Vec<LogRecord>),
}

#[derive(Debug, Default)]
struct QueueState {
    items: VecDeque<QueueItem>,
    queued_pods: HashSet<PodKey>,
    shutdown: bool,
}

/// FIFO of pending records, deduplicated by pod.
///
/// There is no limiter on pushes: the submission rate is bounded only by the
/// flush interval and the per-request batch limit of the [`batcher::Batcher`].
#[derive(Debug, Default)]
pub struct DispatchQueue {
    state: Mutex<QueueState>,
    notify: Notify,
}

impl DispatchQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a pod record, replacing a queued record of the same pod.
    /// Returns `false` once the queue is shut down.
    pub fn push(&self, record: Arc<PodRecord>) -> bool {
        let mut state = self.state.lock().expect("should not be poisoned");
        if state.shutdown {
            return false;
        }
        let key = record.key();
        if state.queued_pods.contains(&key) {
            let slot = state.items.iter_mut().find(
                |item| matches!(item, QueueItem::Pod(queued) if queued.key() == key),
            );
            if let Some(slot) = slot {
                *slot = QueueItem::Pod(record);
                return true;
            }
        }
        state.queued_pods.insert(key);
        state.items.push_back(QueueItem::Pod(record));
        drop(state);
        self.notify.notify_one();
        true
    }

    pub fn push_logs(&self, logs: Vec<LogRecord>) -> bool {
        if logs.is_empty() {
            return true;
        }
        let mut state = self.state.lock().expect("should not be poisoned");
        if state.shutdown {
            return false;
        }
        state.items.push_back(QueueItem::Logs(logs));
        drop(state);
        self.notify.notify_one();
        true
    }

    /// Pops without waiting.
    pub fn try_pop(&self) -> Option<QueueItem> {
        let mut state = self.state.lock().expect("should not be poisoned");
        let item = state.items.pop_front()?;
        if let QueueItem::Pod(record) = &item {
            state.queued_pods.remove(&record.key());
        }
        Some(item)
    }

    /// Waits for the next item; `None` once the queue is shut down and empty.
    pub async fn pop(&self) -> Option<QueueItem> {
        loop {
            let notified = self.notify.notified();
            if let Some(item) = self.try_pop() {
                return Some(item);
            }
            if self.is_shutdown() {
                return None;
            }
            notified.await;
        }
    }

    pub fn len(&self) -> usize {
        self.state
            .lock()
            .expect("should not be poisoned")
            .items
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Rejects further pushes and wakes a waiting consumer.
    pub fn shutdown(&self) {
        self.state.lock().expect("should not be poisoned").shutdown = true;
        self.notify.notify_waiters();
        self.notify.notify_one();
    }

    pub fn is_shutdown(&self) -> bool {
        self.state.lock().expect("should not be poisoned").shutdown
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn record(namespace: &str, name: &str, phase: &str) -> Arc<PodRecord> {
        Arc::new(PodRecord {
            namespace: namespace.to_string(),
            name: name.to_string(),
            phase: phase.to_string(),
            ..Default::default()
        })
    }

    #[test]
    fn newer_record_replaces_queued_one_in_place() {
        let queue = DispatchQueue::new();
        queue.push(record("ns1", "a", "Pending"));
        queue.push(record("ns1", "b", "Pending"));
        queue.push(record("ns1", "a", "Running"));
        assert_eq!(queue.len(), 2);

        let Some(QueueItem::Pod(first)) = queue.try_pop() else {
            panic!("expected a pod record");
        };
        assert_eq!(first.name, "a");
        assert_eq!(first.phase, "Running");

        // Once popped, the same pod can be queued again.
        queue.push(record("ns1", "a", "Failed"));
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn pushes_are_accepted_without_throttling() {
        let queue = DispatchQueue::new();
        for index in 0..500 {
            assert!(queue.push(record("ns1", &format!("web-{index}"), "Running")));
        }
        assert_eq!(queue.len(), 500);
    }

    #[test]
    fn shutdown_rejects_new_items() {
        let queue = DispatchQueue::new();
        queue.shutdown();
        assert!(!queue.push(record("ns1", "a", "Running")));
        assert!(!queue.push_logs(vec![LogRecord::default()]));
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn pop_waits_for_items_and_ends_on_shutdown() {
        let queue = Arc::new(DispatchQueue::new());
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move {
                let mut popped = 0;
                while queue.pop().await.is_some() {
                    popped += 1;
                }
                popped
            })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        queue.push(record("ns1", "a", "Running"));
        queue.push_logs(vec![LogRecord::default()]);
        tokio::time::sleep(Duration::from_millis(10)).await;
        queue.shutdown();

        let popped = tokio::time::timeout(Duration::from_secs(1), consumer)
            .await
            .expect("consumer should finish")
            .expect("consumer should not panic");
        assert_eq!(popped, 2);
    }
}

//! Local mirror of every pod in the cluster.
//!
//! The watch layer feeds raw watch results into [`PodMirror::apply`] and
//! [`PodMirror::relist`]; both return the typed [`PodEvent`]s the controller
//! consumes. A relist diffs against the current content, so a broken watch
//! converges back to cluster state without losing deletions.

use std::collections::BTreeMap;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::RwLock;
use std::time::Duration;

use k8s_openapi::api::core::v1::Pod;
use tokio::sync::Notify;

use crate::domain::pipeline::pod_key;
use crate::domain::records::PodKey;

#[derive(Debug, Clone)]
pub enum PodEvent {
    Added(Arc<Pod>),
    Updated {
        previous: Arc<Pod>,
        current: Arc<Pod>,
    },
    Deleted(Arc<Pod>),
}

impl PodEvent {
    pub fn pod(&self) -> &Pod {
        match self {
            PodEvent::Added(pod) | PodEvent::Deleted(pod) => pod,
            PodEvent::Updated { current, .. } => current,
        }
    }
}

#[derive(Debug, Default)]
pub struct PodMirror {
    pods: RwLock<BTreeMap<PodKey, Arc<Pod>>>,
    synced: AtomicBool,
    synced_notify: Notify,
}

impl PodMirror {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores an added or modified pod.
    pub fn apply(&self, pod: Pod) -> PodEvent {
        let current = Arc::new(pod);
        let previous = self
            .pods
            .write()
            .expect("should not be poisoned")
            .insert(pod_key(&current), current.clone());
        match previous {
            Some(previous) => PodEvent::Updated { previous, current },
            None => PodEvent::Added(current),
        }
    }

    pub fn delete(&self, pod: Pod) -> PodEvent {
        let key = pod_key(&pod);
        let removed = self
            .pods
            .write()
            .expect("should not be poisoned")
            .remove(&key);
        PodEvent::Deleted(removed.unwrap_or_else(|| Arc::new(pod)))
    }

    /// Replaces the content with a full listing and marks the mirror synced.
    ///
    /// Pods missing from the listing are reported as deleted.
    pub fn relist(&self, pods: Vec<Pod>) -> Vec<PodEvent> {
        let mut listed: BTreeMap<PodKey, Arc<Pod>> = pods
            .into_iter()
            .map(|pod| (pod_key(&pod), Arc::new(pod)))
            .collect();

        let mut events = Vec::new();
        {
            let mut stored = self.pods.write().expect("should not be poisoned");
            for (key, previous) in stored.iter() {
                match listed.get(key) {
                    Some(current) => events.push(PodEvent::Updated {
                        previous: previous.clone(),
                        current: current.clone(),
                    }),
                    None => events.push(PodEvent::Deleted(previous.clone())),
                }
            }
            for (key, current) in listed.iter() {
                if !stored.contains_key(key) {
                    events.push(PodEvent::Added(current.clone()));
                }
            }
            std::mem::swap(&mut *stored, &mut listed);
        }

        self.synced.store(true, Ordering::Release);
        self.synced_notify.notify_waiters();
        events
    }

    pub fn get(&self, key: &PodKey) -> Option<Arc<Pod>> {
        self.pods
            .read()
            .expect("should not be poisoned")
            .get(key)
            .cloned()
    }

    /// Point-in-time copy of every mirrored pod, in key order.
    pub fn snapshot(&self) -> Vec<Arc<Pod>> {
        self.pods
            .read()
            .expect("should not be poisoned")
            .values()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.pods.read().expect("should not be poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn has_synced(&self) -> bool {
        self.synced.load(Ordering::Acquire)
    }

    /// Waits until the initial listing completed; `false` on timeout.
    pub async fn wait_synced(&self, timeout: Duration) -> bool {
        let wait = async {
            loop {
                let notified = self.synced_notify.notified();
                if self.has_synced() {
                    return;
                }
                notified.await;
            }
        };
        tokio::time::timeout(timeout, wait).await.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::pipeline::tests::pod;

    #[test]
    fn apply_reports_add_then_update_with_previous() {
        let mirror = PodMirror::new();
        assert!(matches!(
            mirror.apply(pod("ns1", "web-1", &[], "Pending")),
            PodEvent::Added(_)
        ));
        let PodEvent::Updated { previous, current } = mirror.apply(pod("ns1", "web-1", &[], "Running"))
        else {
            panic!("expected an update");
        };
        assert_eq!(crate::domain::pipeline::phase_of(&previous), "Pending");
        assert_eq!(crate::domain::pipeline::phase_of(&current), "Running");
        assert_eq!(mirror.len(), 1);
    }

    #[test]
    fn relist_reports_vanished_pods_as_deleted() {
        let mirror = PodMirror::new();
        mirror.apply(pod("ns1", "old", &[], "Running"));
        mirror.apply(pod("ns1", "kept", &[], "Running"));

        let events = mirror.relist(vec![
            pod("ns1", "kept", &[], "Running"),
            pod("ns1", "new", &[], "Pending"),
        ]);

        let deleted: Vec<_> = events
            .iter()
            .filter(|event| matches!(event, PodEvent::Deleted(_)))
            .map(|event| event.pod().metadata.name.clone().unwrap_or_default())
            .collect();
        assert_eq!(deleted, vec!["old".to_string()]);
        assert_eq!(events.len(), 3);
        assert!(mirror.get(&PodKey::new("ns1", "new")).is_some());
        assert!(mirror.get(&PodKey::new("ns1", "old")).is_none());
        assert!(mirror.has_synced());
    }

    #[tokio::test]
    async fn wait_synced_returns_after_first_listing() {
        let mirror = Arc::new(PodMirror::new());
        assert!(!mirror.wait_synced(Duration::from_millis(10)).await);

        let waiter = {
            let mirror = mirror.clone();
            tokio::spawn(async move { mirror.wait_synced(Duration::from_secs(1)).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        mirror.relist(Vec::new());
        assert!(waiter.await.unwrap());
    }
}

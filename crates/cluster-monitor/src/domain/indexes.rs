//! Best-effort pod key indexes that outlive the pods themselves.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::RwLock;

use crate::domain::records::PodKey;

/// Pod key to owning workload; entries are never evicted so deleted pods
/// still resolve to an owner.
#[derive(Debug, Default)]
pub struct OwnerIndex {
    owners: RwLock<BTreeMap<PodKey, String>>,
}

impl OwnerIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, key: PodKey, owner: &str) {
        self.owners
            .write()
            .expect("should not be poisoned")
            .insert(key, owner.to_string());
    }

    pub fn owner(&self, key: &PodKey) -> Option<String> {
        self.owners
            .read()
            .expect("should not be poisoned")
            .get(key)
            .cloned()
    }

    /// Copy of the whole index.
    pub fn snapshot(&self) -> BTreeMap<PodKey, String> {
        self.owners.read().expect("should not be poisoned").clone()
    }
}

/// Every namespace a pod has been observed in.
#[derive(Debug, Default)]
pub struct NamespaceIndex {
    namespaces: RwLock<BTreeSet<String>>,
}

impl NamespaceIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, namespace: &str) {
        let known = self
            .namespaces
            .read()
            .expect("should not be poisoned")
            .contains(namespace);
        if !known {
            self.namespaces
                .write()
                .expect("should not be poisoned")
                .insert(namespace.to_string());
        }
    }

    pub fn snapshot(&self) -> BTreeSet<String> {
        self.namespaces.read().expect("should not be poisoned").clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn owner_survives_repeated_records() {
        let index = OwnerIndex::new();
        let key = PodKey::new("ns1", "web-1");
        index.record(key.clone(), "web");
        index.record(key.clone(), "web-v2");
        assert_eq!(index.owner(&key).as_deref(), Some("web-v2"));
        assert_eq!(index.snapshot().len(), 1);
    }

    #[test]
    fn namespaces_are_deduplicated() {
        let index = NamespaceIndex::new();
        index.record("ns1");
        index.record("ns1");
        index.record("ns2");
        assert_eq!(
            index.snapshot().into_iter().collect::<Vec<_>>(),
            vec!["ns1".to_string(), "ns2".to_string()]
        );
    }
}

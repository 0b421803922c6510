//! Lock-protected local mirrors of the cluster resources pods are joined with.
//!
//! Each [`ResourceCache`] is owned by exactly one watcher which writes to it;
//! the pipeline and the metrics engine only read. Entries are kept in key
//! order so every scan over a cache is deterministic.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::RwLock;

use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::api::core::v1::Endpoints;
use k8s_openapi::api::core::v1::Namespace;
use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use k8s_openapi::api::core::v1::ResourceQuota;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use crate::domain::records::NamespaceRecord;

/// Cache key for a namespaced object.
pub fn cache_key(namespace: &str, name: &str) -> String {
    if namespace.is_empty() {
        name.to_string()
    } else {
        format!("{namespace}/{name}")
    }
}

#[derive(Debug)]
struct CacheState<T> {
    entries: BTreeMap<String, T>,
    updated: BTreeSet<String>,
}

/// A keyed mirror of one resource kind behind a single reader/writer lock.
#[derive(Debug)]
pub struct ResourceCache<T> {
    state: RwLock<CacheState<T>>,
}

impl<T> Default for ResourceCache<T> {
    fn default() -> Self {
        Self {
            state: RwLock::new(CacheState {
                entries: BTreeMap::new(),
                updated: BTreeSet::new(),
            }),
        }
    }
}

impl<T: Clone> ResourceCache<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<T> {
        self.state
            .read()
            .expect("should not be poisoned")
            .entries
            .get(key)
            .cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.state
            .read()
            .expect("should not be poisoned")
            .entries
            .contains_key(key)
    }

    /// Inserts or replaces an entry and marks it as updated.
    pub fn insert(&self, key: String, value: T) {
        let mut state = self.state.write().expect("should not be poisoned");
        state.updated.insert(key.clone());
        state.entries.insert(key, value);
    }

    pub fn remove(&self, key: &str) -> Option<T> {
        let mut state = self.state.write().expect("should not be poisoned");
        state.updated.remove(key);
        state.entries.remove(key)
    }

    /// Replaces the whole content, e.g. after a watch relist.
    pub fn replace_all(&self, entries: impl IntoIterator<Item = (String, T)>) {
        let mut state = self.state.write().expect("should not be poisoned");
        state.entries = entries.into_iter().collect();
        state.updated = state.entries.keys().cloned().collect();
    }

    pub fn len(&self) -> usize {
        self.state
            .read()
            .expect("should not be poisoned")
            .entries
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Clones every entry in key order.
    pub fn snapshot(&self) -> Vec<T> {
        self.state
            .read()
            .expect("should not be poisoned")
            .entries
            .values()
            .cloned()
            .collect()
    }

    /// Runs `f` over the entries while holding the read lock.
    pub fn read<R>(&self, f: impl FnOnce(&BTreeMap<String, T>) -> R) -> R {
        let state = self.state.read().expect("should not be poisoned");
        f(&state.entries)
    }

    /// Runs `f` over the entries while holding the write lock; keys returned by
    /// `f` are marked as updated.
    pub fn update<R>(&self, f: impl FnOnce(&mut BTreeMap<String, T>) -> (R, Vec<String>)) -> R {
        let mut state = self.state.write().expect("should not be poisoned");
        let (result, touched) = f(&mut state.entries);
        state.updated.extend(touched);
        result
    }

    /// Returns the entries changed since the previous call and resets the marks.
    pub fn take_updated(&self) -> Vec<T> {
        let mut state = self.state.write().expect("should not be poisoned");
        let updated = std::mem::take(&mut state.updated);
        updated
            .iter()
            .filter_map(|key| state.entries.get(key).cloned())
            .collect()
    }
}

/// Service port with its resolved target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServicePortEntry {
    pub name: Option<String>,
    pub port: i32,
    pub target: TargetPort,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetPort {
    Number(i32),
    Name(String),
}

/// The parts of a service the pipeline correlates on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceEntry {
    pub name: String,
    pub namespace: String,
    pub selector: BTreeMap<String, String>,
    pub ports: Vec<ServicePortEntry>,
    pub has_external_service: bool,
}

impl ServiceEntry {
    pub fn key(&self) -> String {
        cache_key(&self.namespace, &self.name)
    }
}

impl From<&Service> for ServiceEntry {
    fn from(service: &Service) -> Self {
        let spec = service.spec.clone().unwrap_or_default();
        let ports = spec
            .ports
            .unwrap_or_default()
            .into_iter()
            .map(|port| {
                let target = match port.target_port {
                    Some(IntOrString::Int(number)) => TargetPort::Number(number),
                    Some(IntOrString::String(name)) => match name.parse::<i32>() {
                        Ok(number) => TargetPort::Number(number),
                        Err(_) => TargetPort::Name(name),
                    },
                    None => TargetPort::Number(port.port),
                };
                ServicePortEntry {
                    name: port.name,
                    port: port.port,
                    target,
                }
            })
            .collect();
        let has_external_service = matches!(
            spec.type_.as_deref(),
            Some("LoadBalancer") | Some("NodePort") | Some("ExternalName")
        ) || spec.external_ips.is_some_and(|ips| !ips.is_empty());

        Self {
            name: service.metadata.name.clone().unwrap_or_default(),
            namespace: service.metadata.namespace.clone().unwrap_or_default(),
            selector: spec.selector.unwrap_or_default(),
            ports,
            has_external_service,
        }
    }
}

/// Namespace entry; `quotas` is maintained by the metrics engine.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NamespaceEntry {
    pub name: String,
    pub status: String,
    pub quotas: i64,
}

impl NamespaceEntry {
    pub fn to_record(&self, cluster_name: &str) -> NamespaceRecord {
        NamespaceRecord {
            name: self.name.clone(),
            cluster_name: cluster_name.to_string(),
            status: self.status.clone(),
            quotas: self.quotas,
        }
    }
}

impl From<&Namespace> for NamespaceEntry {
    fn from(namespace: &Namespace) -> Self {
        Self {
            name: namespace.metadata.name.clone().unwrap_or_default(),
            status: namespace
                .status
                .as_ref()
                .and_then(|status| status.phase.clone())
                .unwrap_or_default(),
            quotas: 0,
        }
    }
}

/// The correlation caches the pipeline and metrics engine read from.
#[derive(Debug, Default, Clone)]
pub struct CorrelationCaches {
    pub services: Arc<ResourceCache<ServiceEntry>>,
    pub endpoints: Arc<ResourceCache<Endpoints>>,
    pub quotas: Arc<ResourceCache<ResourceQuota>>,
    pub claims: Arc<ResourceCache<PersistentVolumeClaim>>,
    pub config_maps: Arc<ResourceCache<ConfigMap>>,
    pub secrets: Arc<ResourceCache<Secret>>,
    pub namespaces: Arc<ResourceCache<NamespaceEntry>>,
}

impl CorrelationCaches {
    pub fn new() -> Self {
        Self::default()
    }
}

use std::collections::BTreeSet;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use error_stack::Report;
use futures::StreamExt;
use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::api::core::v1::Endpoints;
use k8s_openapi::api::core::v1::Namespace;
use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use k8s_openapi::api::core::v1::ResourceQuota;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::api::core::v1::Service;
use kube::runtime::watcher;
use kube::runtime::watcher::Config;
use kube::Api;
use kube::Client;
use kube::Resource;
use kube::ResourceExt;
use serde::de::DeserializeOwned;
use tokio::select;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use crate::domain::caches::cache_key;
use crate::domain::caches::CorrelationCaches;
use crate::domain::caches::NamespaceEntry;
use crate::domain::caches::ResourceCache;
use crate::domain::caches::ServiceEntry;
use crate::infrastructure::k8s::types::KubernetesError;

/// Maps a watched object, and the entry it replaces, to its cache entry.
type Projection<K, V> = fn(&K, Option<V>) -> V;

/// Keeps one correlation cache in sync with a watched resource kind.
pub struct ResourceWatcher<K, V> {
    client: Client,
    resource: &'static str,
    cache: Arc<ResourceCache<V>>,
    project: Projection<K, V>,
    /// Whether changed namespaces are reported for re-queue.
    requeue: bool,
}

impl<K, V> ResourceWatcher<K, V>
where
    K: Resource + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
    K::DynamicType: Default,
    V: Clone + Send + Sync + 'static,
{
    pub fn new(
        client: Client,
        resource: &'static str,
        cache: Arc<ResourceCache<V>>,
        project: Projection<K, V>,
    ) -> Self {
        Self {
            client,
            resource,
            cache,
            project,
            requeue: false,
        }
    }

    /// Reports the namespace of every added, modified or deleted object.
    pub fn requeuing(mut self) -> Self {
        self.requeue = true;
        self
    }

    #[tracing::instrument(skip_all, fields(resource = self.resource))]
    pub async fn run(
        &self,
        requeue: mpsc::Sender<String>,
        cancellation_token: CancellationToken,
    ) -> Result<(), Report<KubernetesError>> {
        info!("Starting resource watcher");
        loop {
            select! {
                _ = cancellation_token.cancelled() => {
                    info!("Resource watcher shutdown requested");
                    break;
                }
                result = self.watch(&requeue) => {
                    match result {
                        Ok(()) => {
                            warn!("Resource watch stream ended unexpectedly, restarting...");
                        }
                        Err(e) => {
                            error!("Resource watch failed: {e:?}");
                            tokio::time::sleep(Duration::from_secs(5)).await;
                        }
                    }
                }
            }
        }

        Ok(())
    }

    async fn watch(&self, requeue: &mpsc::Sender<String>) -> Result<(), Report<KubernetesError>> {
        let api: Api<K> = Api::all(self.client.clone());
        let mut stream = watcher(api, Config::default()).boxed();

        while let Some(event) = stream.next().await {
            match event {
                Ok(event) => {
                    let touched = self.apply_event(event);
                    if !self.requeue {
                        continue;
                    }
                    for namespace in touched {
                        if let Err(e) = requeue.send(namespace).await {
                            warn!("Failed to request namespace re-queue: {e}");
                        }
                    }
                }
                Err(e) => {
                    return Err(Report::new(KubernetesError::WatchFailed {
                        resource: self.resource.to_string(),
                        message: format!("Watch stream error: {e}"),
                    }));
                }
            }
        }

        Ok(())
    }

    /// Applies one watch result to the cache; returns the namespaces it touched.
    ///
    /// A relist replaces the cache content but touches nothing, so startup
    /// does not re-queue every pod.
    fn apply_event(&self, event: watcher::Event<K>) -> BTreeSet<String> {
        match event {
            watcher::Event::Applied(object) => {
                let key = object_key(&object);
                let entry = (self.project)(&object, self.cache.get(&key));
                self.cache.insert(key, entry);
                object.namespace().into_iter().collect()
            }
            watcher::Event::Deleted(object) => {
                self.cache.remove(&object_key(&object));
                object.namespace().into_iter().collect()
            }
            watcher::Event::Restarted(objects) => {
                let entries: Vec<(String, V)> = objects
                    .iter()
                    .map(|object| {
                        let key = object_key(object);
                        let entry = (self.project)(object, self.cache.get(&key));
                        (key, entry)
                    })
                    .collect();
                debug!(count = entries.len(), "Resource listing received");
                self.cache.replace_all(entries);
                BTreeSet::new()
            }
        }
    }
}

fn object_key<K: Resource>(object: &K) -> String {
    cache_key(
        object.meta().namespace.as_deref().unwrap_or_default(),
        object.meta().name.as_deref().unwrap_or_default(),
    )
}

fn keep<K: Clone>(object: &K, _previous: Option<K>) -> K {
    object.clone()
}

fn service_entry(service: &Service, _previous: Option<ServiceEntry>) -> ServiceEntry {
    ServiceEntry::from(service)
}

/// Namespace quota counts are owned by the metrics engine and survive updates.
fn namespace_entry(namespace: &Namespace, previous: Option<NamespaceEntry>) -> NamespaceEntry {
    NamespaceEntry {
        quotas: previous.map_or(0, |entry| entry.quotas),
        ..NamespaceEntry::from(namespace)
    }
}

/// One watcher per correlation cache.
pub struct CacheWatchers {
    pub services: ResourceWatcher<Service, ServiceEntry>,
    pub endpoints: ResourceWatcher<Endpoints, Endpoints>,
    pub quotas: ResourceWatcher<ResourceQuota, ResourceQuota>,
    pub claims: ResourceWatcher<PersistentVolumeClaim, PersistentVolumeClaim>,
    pub config_maps: ResourceWatcher<ConfigMap, ConfigMap>,
    pub secrets: ResourceWatcher<Secret, Secret>,
    pub namespaces: ResourceWatcher<Namespace, NamespaceEntry>,
}

impl CacheWatchers {
    /// Config map and secret changes are reported for re-queue.
    pub fn new(client: Client, caches: &CorrelationCaches) -> Self {
        Self {
            services: ResourceWatcher::new(
                client.clone(),
                "services",
                caches.services.clone(),
                service_entry,
            ),
            endpoints: ResourceWatcher::new(
                client.clone(),
                "endpoints",
                caches.endpoints.clone(),
                keep,
            ),
            quotas: ResourceWatcher::new(
                client.clone(),
                "resourcequotas",
                caches.quotas.clone(),
                keep,
            ),
            claims: ResourceWatcher::new(
                client.clone(),
                "persistentvolumeclaims",
                caches.claims.clone(),
                keep,
            ),
            config_maps: ResourceWatcher::new(
                client.clone(),
                "configmaps",
                caches.config_maps.clone(),
                keep,
            )
            .requeuing(),
            secrets: ResourceWatcher::new(client.clone(), "secrets", caches.secrets.clone(), keep)
                .requeuing(),
            namespaces: ResourceWatcher::new(
                client,
                "namespaces",
                caches.namespaces.clone(),
                namespace_entry,
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use k8s_openapi::api::core::v1::NamespaceStatus;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    use super::*;

    fn test_client() -> Client {
        let config = kube::Config::new("http://127.0.0.1:1".parse().unwrap());
        Client::try_from(config).unwrap()
    }

    fn config_map(namespace: &str, name: &str) -> ConfigMap {
        ConfigMap {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn namespace(name: &str, phase: &str) -> Namespace {
        Namespace {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            spec: None,
            status: Some(NamespaceStatus {
                phase: Some(phase.to_string()),
                ..Default::default()
            }),
        }
    }

    #[tokio::test]
    async fn applied_and_deleted_objects_touch_their_namespace() {
        let cache: Arc<ResourceCache<ConfigMap>> = Arc::new(ResourceCache::new());
        let watcher = ResourceWatcher::new(test_client(), "configmaps", cache.clone(), keep);

        let touched = watcher.apply_event(watcher::Event::Applied(config_map("ns1", "settings")));
        assert_eq!(touched.into_iter().collect::<Vec<_>>(), vec!["ns1".to_string()]);
        assert!(cache.contains("ns1/settings"));

        let touched = watcher.apply_event(watcher::Event::Deleted(config_map("ns1", "settings")));
        assert_eq!(touched.len(), 1);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn relist_replaces_content_without_touching_namespaces() {
        let cache: Arc<ResourceCache<ConfigMap>> = Arc::new(ResourceCache::new());
        let watcher = ResourceWatcher::new(test_client(), "configmaps", cache.clone(), keep);
        watcher.apply_event(watcher::Event::Applied(config_map("ns1", "stale")));

        let touched = watcher.apply_event(watcher::Event::Restarted(vec![
            config_map("ns1", "a"),
            config_map("ns2", "b"),
        ]));

        assert!(touched.is_empty());
        assert_eq!(cache.len(), 2);
        assert!(!cache.contains("ns1/stale"));
    }

    #[tokio::test]
    async fn namespace_updates_keep_the_quota_count() {
        let cache: Arc<ResourceCache<NamespaceEntry>> = Arc::new(ResourceCache::new());
        let watcher =
            ResourceWatcher::new(test_client(), "namespaces", cache.clone(), namespace_entry);
        watcher.apply_event(watcher::Event::Applied(namespace("ns1", "Active")));
        cache.update(|entries| {
            if let Some(entry) = entries.get_mut("ns1") {
                entry.quotas = 2;
            }
            ((), vec!["ns1".to_string()])
        });

        watcher.apply_event(watcher::Event::Applied(namespace("ns1", "Terminating")));

        let entry = cache.get("ns1").unwrap();
        assert_eq!(entry.status, "Terminating");
        assert_eq!(entry.quotas, 2);
    }
}

//! Joins between pods and the cached services, endpoints and quotas.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::ContainerPort;
use k8s_openapi::api::core::v1::Endpoints;
use k8s_openapi::api::core::v1::ResourceQuota;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

use crate::domain::aggregation::summary::QuotaMetrics;
use crate::domain::caches::ResourceCache;
use crate::domain::caches::ServiceEntry;
use crate::domain::caches::TargetPort;
use crate::domain::quantity;
use crate::domain::records::EndpointRecord;
use crate::domain::records::PodRecord;

/// Equality-based selector match; an empty selector matches everything.
pub fn selector_matches(
    selector: &BTreeMap<String, String>,
    labels: &BTreeMap<String, String>,
) -> bool {
    selector
        .iter()
        .all(|(key, value)| labels.get(key) == Some(value))
}

impl ServiceEntry {
    /// Same namespace and a non-empty selector that matches the labels.
    pub fn selects(&self, namespace: &str, labels: &BTreeMap<String, String>) -> bool {
        self.namespace == namespace
            && !self.selector.is_empty()
            && selector_matches(&self.selector, labels)
    }

    /// Whether any service port targets the container port, by number or by name.
    pub fn exposes(&self, port: &ContainerPort) -> bool {
        self.ports.iter().any(|service_port| match &service_port.target {
            TargetPort::Number(number) => *number == port.container_port,
            TargetPort::Name(name) => port.name.as_deref() == Some(name.as_str()),
        })
    }

    /// Service routes to at least one of the given container ports.
    pub fn matches_pod<'a>(
        &self,
        namespace: &str,
        labels: &BTreeMap<String, String>,
        mut ports: impl Iterator<Item = &'a ContainerPort>,
    ) -> bool {
        self.selects(namespace, labels) && ports.any(|port| self.exposes(port))
    }

    /// `(mapped, ready)` of a container port behind this service.
    ///
    /// Ready means the same-name endpoints list the pod as a ready address on
    /// a subset carrying the port (or carrying no ports at all).
    pub fn port_status(
        &self,
        port: &ContainerPort,
        pod_name: &str,
        endpoints: &ResourceCache<Endpoints>,
    ) -> (bool, bool) {
        if !self.exposes(port) {
            return (false, false);
        }
        let ready = endpoints
            .get(&self.key())
            .is_some_and(|endpoints| endpoints_ready_for(&endpoints, pod_name, port.container_port));
        (true, ready)
    }
}

fn endpoints_ready_for(endpoints: &Endpoints, pod_name: &str, port_number: i32) -> bool {
    endpoints.subsets.iter().flatten().any(|subset| {
        let carries_port = subset
            .ports
            .as_ref()
            .map_or(true, |ports| ports.is_empty() || ports.iter().any(|p| p.port == port_number));
        let lists_pod = subset.addresses.iter().flatten().any(|address| {
            address
                .target_ref
                .as_ref()
                .and_then(|target| target.name.as_deref())
                == Some(pod_name)
        });
        carries_port && lists_pod
    })
}

/// Same namespace and the endpoint labels, taken as a selector, match the pod.
pub fn endpoint_matches_pod(
    endpoints: &Endpoints,
    namespace: &str,
    labels: &BTreeMap<String, String>,
) -> bool {
    endpoints.metadata.namespace.as_deref() == Some(namespace)
        && endpoints
            .metadata
            .labels
            .as_ref()
            .map_or(true, |selector| selector_matches(selector, labels))
}

/// Address counts of an endpoints object.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EndpointStats {
    pub ready: i64,
    pub not_ready: i64,
    pub orphan: bool,
}

pub fn endpoint_stats(endpoints: &Endpoints) -> EndpointStats {
    let (ready, not_ready) = endpoints
        .subsets
        .iter()
        .flatten()
        .fold((0_i64, 0_i64), |(ready, not_ready), subset| {
            (
                ready + subset.addresses.as_ref().map_or(0, Vec::len) as i64,
                not_ready + subset.not_ready_addresses.as_ref().map_or(0, Vec::len) as i64,
            )
        });
    EndpointStats {
        ready,
        not_ready,
        orphan: ready == 0 && not_ready == 0,
    }
}

pub fn endpoint_record(endpoints: &Endpoints, cluster_name: &str) -> EndpointRecord {
    let stats = endpoint_stats(endpoints);
    EndpointRecord {
        name: endpoints.metadata.name.clone().unwrap_or_default(),
        namespace: endpoints.metadata.namespace.clone().unwrap_or_default(),
        cluster_name: cluster_name.to_string(),
        ready_count: stats.ready,
        not_ready_count: stats.not_ready,
        is_orphan: stats.orphan,
    }
}

/// Whether a quota constrains the pod: same namespace and every scope holds.
///
/// Scopes other than the best-effort and terminating pairs do not narrow the match.
pub fn quota_applies_to(quota: &ResourceQuota, record: &PodRecord) -> bool {
    if quota.metadata.namespace.as_deref() != Some(record.namespace.as_str()) {
        return false;
    }
    let best_effort = record.cpu_request == 0
        && record.cpu_limit == 0
        && record.mem_request == 0
        && record.mem_limit == 0;
    let terminating = record.has_active_deadline;

    quota
        .spec
        .as_ref()
        .and_then(|spec| spec.scopes.as_ref())
        .into_iter()
        .flatten()
        .all(|scope| match scope.as_str() {
            "BestEffort" => best_effort,
            "NotBestEffort" => !best_effort,
            "Terminating" => terminating,
            "NotTerminating" => !terminating,
            _ => true,
        })
}

/// `(spec, used)` figures of a quota.
pub fn quota_metrics(quota: &ResourceQuota) -> (QuotaMetrics, QuotaMetrics) {
    let hard = quota.spec.as_ref().and_then(|spec| spec.hard.as_ref());
    let used = quota.status.as_ref().and_then(|status| status.used.as_ref());
    (quota_figures(hard), quota_figures(used))
}

fn quota_figures(resources: Option<&BTreeMap<String, Quantity>>) -> QuotaMetrics {
    let milli = |name: &str| quantity::resource_milli(resources, name);
    let base = |name: &str| milli(name).map(|value| value / 1000);
    QuotaMetrics {
        request_cpu: milli("requests.cpu").or_else(|| milli("cpu")).unwrap_or(0),
        limit_cpu: milli("limits.cpu").unwrap_or(0),
        request_memory: base("requests.memory")
            .or_else(|| base("memory"))
            .unwrap_or(0),
        limit_memory: base("limits.memory").unwrap_or(0),
        pods: base("pods").unwrap_or(0),
        request_storage: base("requests.storage").unwrap_or(0),
        claims: base("persistentvolumeclaims").unwrap_or(0),
        request_ephemeral_storage: base("requests.ephemeral-storage")
            .or_else(|| base("ephemeral-storage"))
            .unwrap_or(0),
        limit_ephemeral_storage: base("limits.ephemeral-storage").unwrap_or(0),
    }
}

#[cfg(test)]
mod tests {
    use k8s_openapi::api::core::v1::EndpointAddress;
    use k8s_openapi::api::core::v1::EndpointPort;
    use k8s_openapi::api::core::v1::EndpointSubset;
    use k8s_openapi::api::core::v1::ObjectReference;
    use k8s_openapi::api::core::v1::ResourceQuotaSpec;
    use k8s_openapi::api::core::v1::ResourceQuotaStatus;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    use super::*;
    use crate::domain::caches::ServicePortEntry;

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn service(target: TargetPort) -> ServiceEntry {
        ServiceEntry {
            name: "web".to_string(),
            namespace: "ns1".to_string(),
            selector: labels(&[("name", "web")]),
            ports: vec![ServicePortEntry {
                name: None,
                port: 80,
                target,
            }],
            has_external_service: false,
        }
    }

    fn container_port(number: i32, name: Option<&str>) -> ContainerPort {
        ContainerPort {
            container_port: number,
            name: name.map(str::to_string),
            ..Default::default()
        }
    }

    fn ready_endpoints(pod_name: &str, port: i32) -> Endpoints {
        Endpoints {
            metadata: ObjectMeta {
                name: Some("web".to_string()),
                namespace: Some("ns1".to_string()),
                ..Default::default()
            },
            subsets: Some(vec![EndpointSubset {
                addresses: Some(vec![EndpointAddress {
                    ip: "10.0.0.1".to_string(),
                    target_ref: Some(ObjectReference {
                        name: Some(pod_name.to_string()),
                        ..Default::default()
                    }),
                    ..Default::default()
                }]),
                not_ready_addresses: Some(vec![EndpointAddress {
                    ip: "10.0.0.2".to_string(),
                    ..Default::default()
                }]),
                ports: Some(vec![EndpointPort {
                    port,
                    ..Default::default()
                }]),
            }]),
        }
    }

    #[test]
    fn empty_service_selector_selects_nothing() {
        let mut entry = service(TargetPort::Number(8080));
        entry.selector.clear();
        assert!(!entry.selects("ns1", &labels(&[("name", "web")])));
    }

    #[test]
    fn service_must_expose_a_container_port() {
        let entry = service(TargetPort::Number(9090));
        let pod_labels = labels(&[("name", "web"), ("tier", "front")]);
        let ports = [container_port(8080, None)];
        assert!(!entry.matches_pod("ns1", &pod_labels, ports.iter()));

        let entry = service(TargetPort::Number(8080));
        assert!(entry.matches_pod("ns1", &pod_labels, ports.iter()));
        assert!(!entry.matches_pod("ns2", &pod_labels, ports.iter()));
    }

    #[test]
    fn named_target_port_matches_container_port_name() {
        let entry = service(TargetPort::Name("http".to_string()));
        assert!(entry.exposes(&container_port(8080, Some("http"))));
        assert!(!entry.exposes(&container_port(8080, None)));
    }

    #[test]
    fn port_is_ready_when_endpoints_list_the_pod() {
        let entry = service(TargetPort::Number(8080));
        let endpoints = ResourceCache::new();
        let port = container_port(8080, None);
        assert_eq!(entry.port_status(&port, "web-1", &endpoints), (true, false));

        endpoints.insert("ns1/web".to_string(), ready_endpoints("web-1", 8080));
        assert_eq!(entry.port_status(&port, "web-1", &endpoints), (true, true));
        assert_eq!(entry.port_status(&port, "web-2", &endpoints), (true, false));
    }

    #[test]
    fn endpoint_stats_count_addresses() {
        let stats = endpoint_stats(&ready_endpoints("web-1", 8080));
        assert_eq!(
            stats,
            EndpointStats {
                ready: 1,
                not_ready: 1,
                orphan: false
            }
        );
        assert!(endpoint_stats(&Endpoints::default()).orphan);
    }

    #[test]
    fn endpoint_without_labels_matches_any_pod_in_namespace() {
        let endpoints = ready_endpoints("web-1", 8080);
        assert!(endpoint_matches_pod(&endpoints, "ns1", &labels(&[])));
        assert!(!endpoint_matches_pod(&endpoints, "ns2", &labels(&[])));
    }

    #[test]
    fn quota_scopes_filter_pods() {
        let quota = ResourceQuota {
            metadata: ObjectMeta {
                name: Some("compute".to_string()),
                namespace: Some("ns1".to_string()),
                ..Default::default()
            },
            spec: Some(ResourceQuotaSpec {
                hard: Some(BTreeMap::from([
                    ("requests.cpu".to_string(), Quantity("2".to_string())),
                    ("limits.memory".to_string(), Quantity("1Gi".to_string())),
                    ("pods".to_string(), Quantity("10".to_string())),
                ])),
                scopes: Some(vec!["NotBestEffort".to_string()]),
                ..Default::default()
            }),
            status: Some(ResourceQuotaStatus {
                used: Some(BTreeMap::from([(
                    "requests.cpu".to_string(),
                    Quantity("500m".to_string()),
                )])),
                ..Default::default()
            }),
        };

        let mut record = PodRecord {
            namespace: "ns1".to_string(),
            ..Default::default()
        };
        assert!(!quota_applies_to(&quota, &record));
        record.cpu_request = 100;
        assert!(quota_applies_to(&quota, &record));

        let (spec, used) = quota_metrics(&quota);
        assert_eq!(spec.request_cpu, 2000);
        assert_eq!(spec.limit_memory, 1 << 30);
        assert_eq!(spec.pods, 10);
        assert_eq!(used.request_cpu, 500);
    }
}

use std::collections::BTreeMap;

use async_trait::async_trait;
use error_stack::Report;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::api::ApiResource;
use kube::api::DynamicObject;
use kube::api::GroupVersionKind;
use kube::Api;
use kube::Client;
use serde::Deserialize;

use crate::domain::error::SourceError;
use crate::domain::quantity::base_value;
use crate::domain::quantity::milli_value;
use crate::domain::traits::ContainerUsage;
use crate::domain::traits::PodMetricsSource;
use crate::domain::traits::PodUsage;

#[derive(Debug, Deserialize)]
struct ContainerMetrics {
    name: String,
    #[serde(default)]
    usage: BTreeMap<String, Quantity>,
}

/// Reads `PodMetrics` from the `metrics.k8s.io` aggregated API.
pub struct MetricsApiSource {
    client: Client,
    resource: ApiResource,
}

impl MetricsApiSource {
    pub fn new(client: Client) -> Self {
        let gvk = GroupVersionKind::gvk("metrics.k8s.io", "v1beta1", "PodMetrics");
        Self {
            client,
            resource: ApiResource::from_gvk_with_plural(&gvk, "pods"),
        }
    }
}

/// Sums the samples of a `PodMetrics` object per container.
fn usage_from(object: &DynamicObject) -> Result<PodUsage, serde_json::Error> {
    let containers: Vec<ContainerMetrics> = match object.data.get("containers") {
        Some(value) => serde_json::from_value(value.clone())?,
        None => Vec::new(),
    };
    let containers = containers
        .into_iter()
        .map(|container| {
            let usage = ContainerUsage {
                cpu: container.usage.get("cpu").map(milli_value).unwrap_or_default(),
                memory: container.usage.get("memory").map(base_value).unwrap_or_default(),
            };
            (container.name, usage)
        })
        .collect();
    Ok(PodUsage { containers })
}

#[async_trait]
impl PodMetricsSource for MetricsApiSource {
    async fn pod_usage(
        &self,
        namespace: &str,
        pod_name: &str,
    ) -> Result<Option<PodUsage>, Report<SourceError>> {
        let source_error = |message: String| SourceError::Metrics {
            namespace: namespace.to_string(),
            pod_name: pod_name.to_string(),
            message,
        };

        let api: Api<DynamicObject> =
            Api::namespaced_with(self.client.clone(), namespace, &self.resource);
        let object = api
            .get_opt(pod_name)
            .await
            .map_err(|e| Report::new(source_error(e.to_string())))?;

        object
            .map(|object| usage_from(&object))
            .transpose()
            .map_err(|e| Report::new(source_error(format!("Malformed PodMetrics: {e}"))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn container_samples_are_converted_to_base_units() {
        let object: DynamicObject = serde_json::from_value(serde_json::json!({
            "apiVersion": "metrics.k8s.io/v1beta1",
            "kind": "PodMetrics",
            "metadata": { "name": "web-1", "namespace": "ns1" },
            "timestamp": "2024-01-01T00:00:00Z",
            "window": "30s",
            "containers": [
                { "name": "app", "usage": { "cpu": "250m", "memory": "64Mi" } },
                { "name": "sidecar", "usage": { "cpu": "1", "memory": "1Ki" } }
            ]
        }))
        .unwrap();

        let usage = usage_from(&object).unwrap();

        assert_eq!(usage.container("app"), ContainerUsage { cpu: 250, memory: 64 * 1024 * 1024 });
        assert_eq!(usage.total(), ContainerUsage { cpu: 1250, memory: 64 * 1024 * 1024 + 1024 });
    }

    #[test]
    fn missing_container_list_is_empty_usage() {
        let object: DynamicObject = serde_json::from_value(serde_json::json!({
            "apiVersion": "metrics.k8s.io/v1beta1",
            "kind": "PodMetrics",
            "metadata": { "name": "web-1" }
        }))
        .unwrap();

        assert!(usage_from(&object).unwrap().containers.is_empty());
    }
}

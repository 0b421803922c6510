use async_trait::async_trait;
use error_stack::Report;
use k8s_openapi::api::core::v1::Pod;
use kube::api::LogParams;
use kube::Api;
use kube::Client;

use crate::domain::error::SourceError;
use crate::domain::traits::LogSource;
use crate::domain::traits::LogTailRequest;

/// Reads container logs through the pod `log` subresource.
pub struct PodLogSource {
    client: Client,
}

impl PodLogSource {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

fn log_params(request: &LogTailRequest) -> LogParams {
    LogParams {
        container: Some(request.container.clone()),
        follow: false,
        previous: false,
        timestamps: true,
        since_seconds: Some(request.since_seconds),
        tail_lines: Some(request.tail_lines),
        ..Default::default()
    }
}

#[async_trait]
impl LogSource for PodLogSource {
    async fn tail(&self, request: &LogTailRequest) -> Result<String, Report<SourceError>> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), &request.namespace);
        api.logs(&request.pod_name, &log_params(request))
            .await
            .map_err(|e| {
                Report::new(SourceError::Logs {
                    namespace: request.namespace.clone(),
                    pod_name: request.pod_name.clone(),
                    container: request.container.clone(),
                    message: e.to_string(),
                })
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tail_requests_are_one_shot_and_timestamped() {
        let params = log_params(&LogTailRequest {
            namespace: "ns1".to_string(),
            pod_name: "web-1".to_string(),
            container: "app".to_string(),
            since_seconds: 60,
            tail_lines: 100,
            ..Default::default()
        });

        assert_eq!(params.container.as_deref(), Some("app"));
        assert!(!params.follow);
        assert!(!params.previous);
        assert!(params.timestamps);
        assert_eq!(params.since_seconds, Some(60));
        assert_eq!(params.tail_lines, Some(100));
    }
}

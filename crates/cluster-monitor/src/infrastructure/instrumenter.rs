use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use error_stack::Report;
use error_stack::ResultExt;
use k8s_openapi::api::core::v1::Pod;
use reqwest::Client as HttpClient;
use serde::Deserialize;
use serde::Serialize;
use tracing::debug;
use url::Url;

use crate::domain::error::BackendError;
use crate::domain::records::PodRecord;
use crate::domain::traits::AttachStatus;
use crate::domain::traits::Instrumenter;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AttachRequest<'a> {
    namespace: &'a str,
    pod_name: &'a str,
    owner: &'a str,
    app_name: &'a str,
    tier_name: &'a str,
    containers: Vec<&'a str>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct AttachResponse {
    success: bool,
    message: String,
    count: u32,
}

/// Delegates agent injection to the instrumentation service over HTTP.
pub struct HttpInstrumenter {
    url: Url,
    annotation: String,
    http: HttpClient,
}

impl HttpInstrumenter {
    /// `annotation` is the key the service writes on pods it instrumented.
    pub fn new(
        url: Url,
        annotation: String,
        timeout: Duration,
    ) -> Result<Self, Report<BackendError>> {
        let http = HttpClient::builder()
            .timeout(timeout)
            .build()
            .change_context(BackendError::NotConfigured {
                message: "Failed to create instrumentation HTTP client".to_string(),
            })?;
        Ok(Self {
            url,
            annotation,
            http,
        })
    }

    async fn request(&self, record: &PodRecord) -> Result<AttachResponse, reqwest::Error> {
        let body = AttachRequest {
            namespace: &record.namespace,
            pod_name: &record.name,
            owner: &record.owner,
            app_name: &record.app_name,
            tier_name: &record.tier_name,
            containers: record.containers.keys().map(String::as_str).collect(),
        };
        self.http
            .post(self.url.clone())
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
    }
}

#[async_trait]
impl Instrumenter for HttpInstrumenter {
    fn is_instrumented(&self, pod: &Pod) -> bool {
        pod.metadata
            .annotations
            .as_ref()
            .is_some_and(|annotations| annotations.contains_key(&self.annotation))
    }

    async fn attempt(&self, _pod: Arc<Pod>, record: Arc<PodRecord>) -> AttachStatus {
        debug!(namespace = %record.namespace, pod_name = %record.name, "Requesting instrumentation");
        match self.request(&record).await {
            Ok(response) => AttachStatus {
                key: record.key(),
                success: response.success,
                message: response.message,
                count: response.count,
            },
            Err(e) => AttachStatus {
                key: record.key(),
                success: false,
                message: format!("instrumentation request failed: {e}"),
                count: 0,
            },
        }
    }
}

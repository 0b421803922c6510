//! HTTP client for the telemetry backend.
//!
//! Three endpoints are involved: the events API (schemas and event batches),
//! the metrics receiver and the controller REST API (node registry).

use std::time::Duration;

use async_trait::async_trait;
use error_stack::Report;
use error_stack::ResultExt;
use reqwest::Client as HttpClient;
use reqwest::RequestBuilder;
use reqwest::StatusCode;
use serde::Serialize;
use tracing::debug;
use tracing::info;
use url::Url;

use crate::config::MonitorArgs;
use crate::domain::aggregation::FlatMetric;
use crate::domain::dispatch::schema::SchemaDefinition;
use crate::domain::error::BackendError;
use crate::domain::traits::TelemetryBackend;
use crate::domain::traits::TransactionHandle;

const EVENTS_CONTENT_TYPE: &str = "application/vnd.appd.events+json;v=2";
const ACCOUNT_HEADER: &str = "X-Events-API-AccountName";
const KEY_HEADER: &str = "X-Events-API-Key";

/// Endpoints and credentials of the telemetry backend.
#[derive(Debug, Clone, Default)]
pub struct BackendSettings {
    pub events_url: Option<Url>,
    pub events_account: String,
    pub events_key: String,
    pub metrics_url: Option<Url>,
    pub controller_url: Option<Url>,
    pub controller_user: String,
    pub controller_password: String,
    pub request_timeout: Duration,
}

fn parse_url(name: &str, value: Option<&String>) -> Option<Url> {
    let value = value?.trim();
    if value.is_empty() {
        return None;
    }
    match Url::parse(value) {
        Ok(url) => Some(url),
        Err(e) => {
            tracing::error!(setting = name, url = value, "Ignoring invalid URL: {e}");
            None
        }
    }
}

impl From<&MonitorArgs> for BackendSettings {
    fn from(args: &MonitorArgs) -> Self {
        Self {
            events_url: parse_url("events-url", args.events_url.as_ref()),
            events_account: args.events_account.clone(),
            events_key: args.events_key.clone(),
            metrics_url: parse_url("metrics-url", args.metrics_url.as_ref()),
            controller_url: parse_url("controller-url", args.controller_url.as_ref()),
            controller_user: args.controller_user.clone(),
            controller_password: args.controller_password.clone(),
            request_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MetricSample<'a> {
    metric_name: String,
    aggregator_type: &'a str,
    value: i64,
}

fn metric_samples(metrics: &[FlatMetric]) -> Vec<MetricSample<'static>> {
    metrics
        .iter()
        .map(|metric| MetricSample {
            metric_name: metric.full_name(),
            aggregator_type: "OBSERVATION",
            value: metric.value,
        })
        .collect()
}

/// [`TelemetryBackend`] over HTTP.
pub struct HttpTelemetryBackend {
    settings: BackendSettings,
    http: HttpClient,
}

impl HttpTelemetryBackend {
    pub fn new(settings: BackendSettings) -> Result<Self, Report<BackendError>> {
        let http = HttpClient::builder()
            .timeout(settings.request_timeout)
            .build()
            .change_context(BackendError::NotConfigured {
                message: "Failed to create HTTP client".to_string(),
            })?;

        info!(
            events = settings.events_url.is_some(),
            metrics = settings.metrics_url.is_some(),
            controller = settings.controller_url.is_some(),
            "Telemetry backend client created"
        );
        Ok(Self { settings, http })
    }

    fn events_endpoint(&self, kind: &str, schema: &str) -> Result<Url, Report<BackendError>> {
        let base = self.settings.events_url.as_ref().ok_or_else(|| {
            Report::new(BackendError::NotConfigured {
                message: "events URL is not set".to_string(),
            })
        })?;
        base.join(&format!("events/{kind}/{schema}"))
            .change_context(BackendError::NotConfigured {
                message: format!("Invalid events URL {base}"),
            })
    }

    fn events_request(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .header(ACCOUNT_HEADER, &self.settings.events_account)
            .header(KEY_HEADER, &self.settings.events_key)
            .header(reqwest::header::ACCEPT, EVENTS_CONTENT_TYPE)
            .header(reqwest::header::CONTENT_TYPE, EVENTS_CONTENT_TYPE)
    }
}

#[async_trait]
impl TelemetryBackend for HttpTelemetryBackend {
    async fn ensure_schema(
        &self,
        schema: &str,
        definition: &SchemaDefinition,
    ) -> Result<(), Report<BackendError>> {
        if !self.schema_exists(schema).await? {
            self.create_schema(schema, definition).await?;
        }
        Ok(())
    }

    async fn schema_exists(&self, schema: &str) -> Result<bool, Report<BackendError>> {
        let schema_error = || BackendError::Schema {
            schema: schema.to_string(),
            message: "schema lookup failed".to_string(),
        };
        let url = self.events_endpoint("schema", schema)?;
        let response = self
            .events_request(self.http.get(url))
            .send()
            .await
            .change_context_lazy(schema_error)?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(false),
            status if status.is_success() => Ok(true),
            status => Err(Report::new(schema_error()).attach_printable(format!("HTTP {status}"))),
        }
    }

    async fn create_schema(
        &self,
        schema: &str,
        definition: &SchemaDefinition,
    ) -> Result<(), Report<BackendError>> {
        let schema_error = || BackendError::Schema {
            schema: schema.to_string(),
            message: "schema creation failed".to_string(),
        };
        let url = self.events_endpoint("schema", schema)?;
        self.events_request(self.http.post(url))
            .json(definition)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .change_context_lazy(schema_error)?;
        info!(schema, "Created event schema");
        Ok(())
    }

    async fn post_events(
        &self,
        schema: &str,
        records: &[serde_json::Value],
    ) -> Result<(), Report<BackendError>> {
        let url = self.events_endpoint("publish", schema)?;
        self.events_request(self.http.post(url))
            .json(records)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .change_context_lazy(|| BackendError::PostEvents {
                schema: schema.to_string(),
                message: format!("{} records", records.len()),
            })?;
        debug!(schema, count = records.len(), "Posted events");
        Ok(())
    }

    async fn post_metrics(&self, metrics: &[FlatMetric]) -> Result<(), Report<BackendError>> {
        let url = self.settings.metrics_url.clone().ok_or_else(|| {
            Report::new(BackendError::NotConfigured {
                message: "metrics URL is not set".to_string(),
            })
        })?;
        self.http
            .post(url)
            .json(&metric_samples(metrics))
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .change_context_lazy(|| BackendError::PostMetrics {
                message: format!("{} metrics", metrics.len()),
            })?;
        debug!(count = metrics.len(), "Posted metrics");
        Ok(())
    }

    fn start_transaction(&self, name: &str) -> TransactionHandle {
        TransactionHandle::new(name)
    }

    fn stop_transaction(&self, handle: TransactionHandle) {
        debug!(
            transaction = %handle.name,
            elapsed_ms = handle.started_at.elapsed().as_millis() as u64,
            "Business transaction completed"
        );
    }

    async fn deregister_node(&self, node_id: i64) -> Result<(), Report<BackendError>> {
        let deregister_error = |message: &str| BackendError::Deregister {
            node_id,
            message: message.to_string(),
        };
        let base = self
            .settings
            .controller_url
            .as_ref()
            .ok_or_else(|| Report::new(deregister_error("controller URL is not set")))?;
        let mut url = base
            .join("controller/rest/mark-nodes-historical")
            .change_context(deregister_error("invalid controller URL"))?;
        url.query_pairs_mut()
            .append_pair("application-component-node-ids", &node_id.to_string());

        self.http
            .post(url)
            .basic_auth(
                &self.settings.controller_user,
                Some(&self.settings.controller_password),
            )
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .change_context_lazy(|| deregister_error("request failed"))?;
        Ok(())
    }
}

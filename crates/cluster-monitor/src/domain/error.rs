use core::error::Error;

/// Errors raised by the telemetry backend adapters.
#[derive(Debug, derive_more::Display)]
pub enum BackendError {
    #[display("Failed to ensure schema {schema}: {message}")]
    Schema { schema: String, message: String },
    #[display("Failed to post events to {schema}: {message}")]
    PostEvents { schema: String, message: String },
    #[display("Failed to post metrics: {message}")]
    PostMetrics { message: String },
    #[display("Failed to deregister node {node_id}: {message}")]
    Deregister { node_id: i64, message: String },
    #[display("Failed to serialize payload: {message}")]
    Serialization { message: String },
    #[display("Backend is not configured: {message}")]
    NotConfigured { message: String },
}

impl Error for BackendError {}

/// Errors raised by cluster-side data sources (metrics API, log stream, events).
#[derive(Debug, derive_more::Display)]
pub enum SourceError {
    #[display("Failed to query pod metrics for {namespace}/{pod_name}: {message}")]
    Metrics {
        namespace: String,
        pod_name: String,
        message: String,
    },
    #[display("Failed to read logs for {namespace}/{pod_name}/{container}: {message}")]
    Logs {
        namespace: String,
        pod_name: String,
        container: String,
        message: String,
    },
    #[display("Failed to publish event for {namespace}/{pod_name}: {message}")]
    Event {
        namespace: String,
        pod_name: String,
        message: String,
    },
}

impl Error for SourceError {}

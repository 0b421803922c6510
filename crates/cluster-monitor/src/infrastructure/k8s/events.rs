use async_trait::async_trait;
use error_stack::Report;
use k8s_openapi::api::core::v1::Pod;
use kube::runtime::events::Event;
use kube::runtime::events::EventType;
use kube::runtime::events::Recorder;
use kube::runtime::events::Reporter;
use kube::Client;
use kube::Resource;

use crate::domain::error::SourceError;
use crate::domain::traits::EventSeverity;
use crate::domain::traits::InstrumentationEvents;

const REPORTER: &str = "cluster-monitor";
const REASON: &str = "Instrumentation";
const ACTION: &str = "Instrument";

/// Publishes instrumentation outcomes as Kubernetes events on the pod.
pub struct KubeEventPublisher {
    client: Client,
    reporter: Reporter,
}

impl KubeEventPublisher {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            reporter: Reporter {
                controller: REPORTER.to_string(),
                instance: std::env::var("HOSTNAME").ok(),
            },
        }
    }
}

fn event_type(severity: EventSeverity) -> EventType {
    match severity {
        EventSeverity::Normal => EventType::Normal,
        EventSeverity::Warning => EventType::Warning,
    }
}

#[async_trait]
impl InstrumentationEvents for KubeEventPublisher {
    async fn emit(
        &self,
        pod: &Pod,
        severity: EventSeverity,
        note: &str,
    ) -> Result<(), Report<SourceError>> {
        let recorder = Recorder::new(
            self.client.clone(),
            self.reporter.clone(),
            pod.object_ref(&()),
        );
        recorder
            .publish(Event {
                type_: event_type(severity),
                reason: REASON.to_string(),
                note: Some(note.to_string()),
                action: ACTION.to_string(),
                secondary: None,
            })
            .await
            .map_err(|e| {
                Report::new(SourceError::Event {
                    namespace: pod.metadata.namespace.clone().unwrap_or_default(),
                    pod_name: pod.metadata.name.clone().unwrap_or_default(),
                    message: e.to_string(),
                })
            })
    }
}

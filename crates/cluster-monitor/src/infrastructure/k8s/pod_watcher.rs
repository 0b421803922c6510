use std::sync::Arc;
use std::time::Duration;

use error_stack::Report;
use futures::StreamExt;
use k8s_openapi::api::core::v1::Pod;
use kube::runtime::watcher;
use kube::runtime::watcher::Config;
use kube::Api;
use kube::Client;
use tokio::select;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::error;
use tracing::info;
use tracing::warn;

use crate::domain::mirror::PodEvent;
use crate::domain::mirror::PodMirror;
use crate::infrastructure::k8s::types::KubernetesError;

/// Watches every pod in the cluster.
///
/// Raw watch results are applied to the [`PodMirror`] and the resulting
/// [`PodEvent`]s are forwarded, in watch order, to the controller.
pub struct PodWatcher {
    client: Client,
    mirror: Arc<PodMirror>,
}

impl PodWatcher {
    pub fn new(client: Client, mirror: Arc<PodMirror>) -> Self {
        Self { client, mirror }
    }

    /// Start watching pods for changes.
    ///
    /// Runs until cancelled, restarting the watch after a short pause when
    /// the stream fails. Every restart relists, which the mirror turns into
    /// the events missed while disconnected.
    #[tracing::instrument(skip_all)]
    pub async fn run(
        &self,
        event_sender: mpsc::Sender<PodEvent>,
        cancellation_token: CancellationToken,
    ) -> Result<(), Report<KubernetesError>> {
        info!("Starting pod watcher");
        loop {
            select! {
                _ = cancellation_token.cancelled() => {
                    info!("Pod watcher shutdown requested");
                    break;
                }
                result = self.watch_pods(&event_sender) => {
                    match result {
                        Ok(()) => {
                            warn!("Pod watch stream ended unexpectedly, restarting...");
                        }
                        Err(e) => {
                            error!("Pod watch failed: {e:?}");
                            tokio::time::sleep(Duration::from_secs(5)).await;
                        }
                    }
                }
            }
        }

        Ok(())
    }

    async fn watch_pods(
        &self,
        event_sender: &mpsc::Sender<PodEvent>,
    ) -> Result<(), Report<KubernetesError>> {
        let api: Api<Pod> = Api::all(self.client.clone());
        let mut stream = watcher(api, Config::default()).boxed();

        while let Some(event) = stream.next().await {
            match event {
                Ok(event) => {
                    for pod_event in self.apply_event(event) {
                        if let Err(e) = event_sender.send(pod_event).await {
                            warn!("Failed to forward pod event: {e}");
                        }
                    }
                }
                Err(e) => {
                    return Err(Report::new(KubernetesError::WatchFailed {
                        resource: "pods".to_string(),
                        message: format!("Watch stream error: {e}"),
                    }));
                }
            }
        }

        Ok(())
    }

    /// Applies one raw watch result to the mirror.
    fn apply_event(&self, event: watcher::Event<Pod>) -> Vec<PodEvent> {
        match event {
            watcher::Event::Applied(pod) => vec![self.mirror.apply(pod)],
            watcher::Event::Deleted(pod) => vec![self.mirror.delete(pod)],
            watcher::Event::Restarted(pods) => {
                info!(count = pods.len(), "Pod listing received");
                self.mirror.relist(pods)
            }
        }
    }
}

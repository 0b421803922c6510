use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use kube::Resource;
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::app::core::Application;
use crate::domain::PodController;
use crate::domain::PodEvent;
use crate::infrastructure::k8s::CacheWatchers;
use crate::infrastructure::k8s::ResourceWatcher;

const POD_EVENT_CAPACITY: usize = 1024;
const REQUEUE_CAPACITY: usize = 64;

/// Task manager, responsible for starting and managing all background tasks
pub struct Tasks {
    pub tasks: Vec<JoinHandle<()>>,
    cancellation_token: CancellationToken,
}

impl Default for Tasks {
    fn default() -> Self {
        Self::new()
    }
}

impl Tasks {
    pub fn new() -> Self {
        Self::with_token(CancellationToken::new())
    }

    pub fn with_token(cancellation_token: CancellationToken) -> Self {
        Self {
            tasks: Vec::new(),
            cancellation_token,
        }
    }

    /// Start all background tasks
    pub fn spawn_all_tasks(&mut self, app: &Application) -> Result<()> {
        let (pod_event_sender, pod_event_receiver) =
            mpsc::channel::<PodEvent>(POD_EVENT_CAPACITY);
        let (requeue_sender, requeue_receiver) = mpsc::channel::<String>(REQUEUE_CAPACITY);

        let pod_watcher_task = self.spawn_pod_watcher_task(app, pod_event_sender);
        self.tasks.push(pod_watcher_task);

        // One watcher per correlation cache
        let watchers = app.services().cache_watchers.clone();
        let cache_tasks = vec![
            self.spawn_resource_watcher_task(&watchers, |w| &w.services, &requeue_sender),
            self.spawn_resource_watcher_task(&watchers, |w| &w.endpoints, &requeue_sender),
            self.spawn_resource_watcher_task(&watchers, |w| &w.quotas, &requeue_sender),
            self.spawn_resource_watcher_task(&watchers, |w| &w.claims, &requeue_sender),
            self.spawn_resource_watcher_task(&watchers, |w| &w.config_maps, &requeue_sender),
            self.spawn_resource_watcher_task(&watchers, |w| &w.secrets, &requeue_sender),
            self.spawn_resource_watcher_task(&watchers, |w| &w.namespaces, &requeue_sender),
        ];
        self.tasks.extend(cache_tasks);

        let requeue_task =
            self.spawn_requeue_task(app.services().controller.clone(), requeue_receiver);
        self.tasks.push(requeue_task);

        let controller_task = self.spawn_controller_task(app, pod_event_receiver);
        self.tasks.push(controller_task);

        let flush_task = self.spawn_flush_task(app);
        self.tasks.push(flush_task);

        let metrics_task = self.spawn_metrics_task(app);
        self.tasks.push(metrics_task);

        let warm_up_task = self.spawn_dashboard_warm_up_task(app);
        self.tasks.push(warm_up_task);

        Ok(())
    }

    /// wait for tasks to complete or receive shutdown signal
    pub async fn wait_for_completion(&mut self) -> Result<()> {
        let signal_handler = {
            #[cfg(unix)]
            {
                use tokio::signal::unix::{signal, SignalKind};
                let mut sigterm = signal(SignalKind::terminate())?;
                let mut sigint = signal(SignalKind::interrupt())?;

                tokio::spawn(async move {
                    tokio::select! {
                        _ = sigterm.recv() => {
                            tracing::info!("Received SIGTERM, initiating graceful shutdown");
                        }
                        _ = sigint.recv() => {
                            tracing::info!("Received SIGINT, initiating graceful shutdown");
                        }
                    }
                })
            }
            #[cfg(not(unix))]
            {
                tokio::spawn(async {
                    if let Err(e) = tokio::signal::ctrl_c().await {
                        tracing::error!("Failed to listen for Ctrl+C: {e}");
                    }
                    tracing::info!("Received Ctrl+C, initiating graceful shutdown");
                })
            }
        };

        tokio::select! {
            _ = signal_handler => {
                tracing::info!("Shutdown signal received, cancelling all tasks");
                self.cancellation_token.cancel();

                self.wait_for_tasks_with_timeout(Duration::from_secs(30)).await;
            }
            result = futures::future::select_all(&mut self.tasks) => {
                let (result, _index, _remaining) = result;
                self.cancellation_token.cancel();
                if let Err(e) = result {
                    tracing::error!("Task completed with error: {e}");
                    return Err(e.into());
                }
                tracing::warn!("Task completed unexpectedly");
            }
        }

        Ok(())
    }

    async fn wait_for_tasks_with_timeout(&mut self, timeout: Duration) {
        tokio::time::timeout(timeout, async {
            for task in &mut self.tasks {
                if let Err(e) = task.await {
                    tracing::error!("Task failed during shutdown: {e}");
                }
            }
        })
        .await
        .unwrap_or_else(|_| {
            tracing::warn!("Task shutdown timed out after {:?}", timeout);
        });
    }

    fn spawn_pod_watcher_task(
        &self,
        app: &Application,
        pod_event_sender: mpsc::Sender<PodEvent>,
    ) -> JoinHandle<()> {
        let token = self.cancellation_token.clone();
        let pod_watcher = app.services().pod_watcher.clone();
        tokio::spawn(async move {
            tracing::info!("Starting Kubernetes pod watcher task");
            if let Err(e) = pod_watcher.run(pod_event_sender, token).await {
                tracing::error!("Kubernetes pod watcher failed: {e:?}");
            } else {
                tracing::info!("Kubernetes pod watcher completed");
            }
        })
    }

    fn spawn_resource_watcher_task<K, V>(
        &self,
        watchers: &Arc<CacheWatchers>,
        pick: fn(&CacheWatchers) -> &ResourceWatcher<K, V>,
        requeue_sender: &mpsc::Sender<String>,
    ) -> JoinHandle<()>
    where
        K: Resource + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
        K::DynamicType: Default,
        V: Clone + Send + Sync + 'static,
    {
        let token = self.cancellation_token.clone();
        let watchers = watchers.clone();
        let requeue_sender = requeue_sender.clone();
        tokio::spawn(async move {
            if let Err(e) = pick(&watchers).run(requeue_sender, token).await {
                tracing::error!("Resource watcher failed: {e:?}");
            }
        })
    }

    /// Re-queues the pods of namespaces whose config maps or secrets changed
    fn spawn_requeue_task(
        &self,
        controller: Arc<PodController>,
        mut requeue_receiver: mpsc::Receiver<String>,
    ) -> JoinHandle<()> {
        let token = self.cancellation_token.clone();
        tokio::spawn(async move {
            tracing::info!("Starting namespace re-queue task");
            loop {
                tokio::select! {
                    namespace = requeue_receiver.recv() => match namespace {
                        Some(namespace) => {
                            controller.cache_updated(&namespace).await;
                        }
                        None => {
                            tracing::info!("Namespace re-queue receiver closed");
                            break;
                        }
                    },
                    _ = token.cancelled() => {
                        tracing::info!("Namespace re-queue task cancelled");
                        break;
                    }
                }
            }
        })
    }

    fn spawn_controller_task(
        &self,
        app: &Application,
        pod_event_receiver: mpsc::Receiver<PodEvent>,
    ) -> JoinHandle<()> {
        let controller = app.services().controller.clone();
        let mirror = app.services().mirror.clone();
        let sync_timeout = app.services().config.cache_sync_timeout;
        let token = self.cancellation_token.clone();

        tokio::spawn(async move {
            tracing::info!("Starting pod controller task");
            if !mirror.wait_synced(sync_timeout).await {
                tracing::error!(
                    timeout = ?sync_timeout,
                    "Pod cache did not sync in time, starting anyway"
                );
            }
            controller.run(pod_event_receiver, token).await;
            tracing::info!("Pod controller task completed");
        })
    }

    fn spawn_flush_task(&self, app: &Application) -> JoinHandle<()> {
        let batcher = app.services().batcher.clone();
        let queue = app.services().queue.clone();
        let token = self.cancellation_token.clone();

        tokio::spawn(async move {
            tracing::info!("Starting queue flush task");
            batcher.run(&queue, token).await;
            tracing::info!("Queue flush task completed");
        })
    }

    fn spawn_metrics_task(&self, app: &Application) -> JoinHandle<()> {
        let metrics_engine = app.services().metrics_engine.clone();
        let mirror = app.services().mirror.clone();
        let sync_timeout = app.services().config.cache_sync_timeout;
        let token = self.cancellation_token.clone();

        tokio::spawn(async move {
            tracing::info!("Starting metrics collection task");
            tokio::select! {
                _ = token.cancelled() => return,
                _ = mirror.wait_synced(sync_timeout) => {}
            }
            metrics_engine.run(token).await;
            tracing::info!("Metrics collection task completed");
        })
    }

    fn spawn_dashboard_warm_up_task(&self, app: &Application) -> JoinHandle<()> {
        let dashboards = app.services().dashboards.clone();
        let token = self.cancellation_token.clone();

        tokio::spawn(async move {
            tracing::info!("Starting dashboard warm-up task");
            dashboards.run_warm_up(token.clone()).await;
            // The warm-up finishes early; keep the slot alive until shutdown
            token.cancelled().await;
        })
    }
}

use anyhow::Result;

use crate::app::services::ApplicationServices;
use crate::app::tasks::Tasks;
use crate::config::MonitorArgs;

/// Application core structure with explicit dependencies
pub struct Application {
    services: ApplicationServices,
    args: MonitorArgs,
}

impl Application {
    pub fn new(services: ApplicationServices, args: MonitorArgs) -> Self {
        Self { services, args }
    }

    pub fn services(&self) -> &ApplicationServices {
        &self.services
    }

    pub fn args(&self) -> &MonitorArgs {
        &self.args
    }

    /// Run application, start all tasks and wait for completion
    pub async fn run(&self) -> Result<()> {
        tracing::info!("Starting all application tasks...");

        let mut tasks = Tasks::with_token(self.services.cancellation_token.clone());

        if let Err(e) = tasks.spawn_all_tasks(self) {
            tracing::error!("Failed to spawn application tasks: {}", e);
            return Err(e);
        }

        if let Err(e) = tasks.wait_for_completion().await {
            tracing::error!("Error during task execution: {}", e);
            return Err(e);
        }

        tracing::info!("Application run completed");
        Ok(())
    }

    /// Gracefully shutdown application
    pub async fn shutdown(&self) -> Result<()> {
        tracing::info!("Shutting down application...");

        self.services.cancellation_token.cancel();
        if !self.services.queue.is_empty() {
            let stats = self.services.batcher.flush(&self.services.queue).await;
            tracing::info!(?stats, "Flushed records left in the queue");
        }
        self.services.queue.shutdown();

        tracing::info!(
            mirrored_pods = self.services.mirror.len(),
            "Application shutdown completed"
        );
        Ok(())
    }
}

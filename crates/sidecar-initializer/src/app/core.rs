use std::sync::Arc;

use anyhow::Result;

use crate::app::tasks::Tasks;
use crate::config::InitializerSettings;
use crate::domain::SidecarInitializer;
use crate::infrastructure::k8s::KubeSession;
use crate::infrastructure::k8s::WorkloadFeed;

/// Application core structure with explicit dependencies
pub struct Application {
    initializer: Arc<SidecarInitializer<KubeSession>>,
    feed: WorkloadFeed,
    settings: InitializerSettings,
}

impl Application {
    pub fn new(
        initializer: Arc<SidecarInitializer<KubeSession>>,
        feed: WorkloadFeed,
        settings: InitializerSettings,
    ) -> Self {
        Self {
            initializer,
            feed,
            settings,
        }
    }

    pub fn initializer(&self) -> &Arc<SidecarInitializer<KubeSession>> {
        &self.initializer
    }

    pub fn feed(&self) -> &WorkloadFeed {
        &self.feed
    }

    /// Run application, start the feed and wait for a shutdown signal
    pub async fn run(&self) -> Result<()> {
        tracing::info!(
            initializer = %self.settings.initializer_name,
            "Starting all application tasks..."
        );

        let mut tasks = Tasks::new();
        tasks.spawn_all_tasks(self);

        if let Err(e) = tasks.wait_for_completion().await {
            tracing::error!("Error during task execution: {}", e);
            return Err(e);
        }

        tracing::info!("Application run completed");
        Ok(())
    }
}

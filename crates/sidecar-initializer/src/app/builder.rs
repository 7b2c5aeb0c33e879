use std::sync::Arc;

use anyhow::Result;

use crate::app::Application;
use crate::config::InitializerSettings;
use crate::config::SidecarConfig;
use crate::domain::AdmissionPolicy;
use crate::domain::SidecarInitializer;
use crate::infrastructure::k8s::KubeSession;
use crate::infrastructure::k8s::WorkloadFeed;
use crate::infrastructure::kube_client;

/// Application builder
pub struct ApplicationBuilder {
    settings: InitializerSettings,
}

impl ApplicationBuilder {
    /// Create new application builder
    pub fn new(settings: InitializerSettings) -> Self {
        Self { settings }
    }

    /// Build complete application
    ///
    /// Any failure here is fatal: the initializer cannot run without
    /// credentials and a valid sidecar configuration.
    pub async fn build(self) -> Result<Application> {
        tracing::info!("Building application components...");

        let client = kube_client::init_kube_client(&self.settings.credentials)
            .await
            .map_err(|e| anyhow::anyhow!("{e:?}"))?;
        let session = KubeSession::new(client.clone());

        let sidecar = SidecarConfig::load(
            &session,
            &self.settings.configmap_namespace,
            &self.settings.configmap,
        )
        .await
        .map_err(|e| anyhow::anyhow!("{e:?}"))?;

        let policy = AdmissionPolicy::new(
            self.settings.initializer_name.clone(),
            self.settings.gate.clone(),
            Arc::new(sidecar),
        );
        let initializer = Arc::new(SidecarInitializer::new(policy, session));
        let feed = WorkloadFeed::new(client, self.settings.resync_period);

        Ok(Application::new(initializer, feed, self.settings))
    }
}

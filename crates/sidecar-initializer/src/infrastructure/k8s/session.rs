use std::future::Future;

use error_stack::Report;
use error_stack::ResultExt;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::Patch;
use kube::api::PatchParams;
use kube::Api;
use kube::Client;
use tracing::debug;

use crate::infrastructure::k8s::KubernetesError;
use crate::infrastructure::k8s::Workload;

/// Cluster calls made while loading configuration and processing events.
///
/// Listing and watching stay on [`kube::Client`] inside the feed; everything
/// the initializer pipeline does goes through this trait.
pub trait ClusterSession: Send + Sync {
    /// Fetch one ConfigMap by namespace and name.
    fn get_config_map(
        &self,
        namespace: &str,
        name: &str,
    ) -> impl Future<Output = Result<ConfigMap, Report<KubernetesError>>> + Send;

    /// Submit a strategic merge patch against one Deployment.
    fn patch_workload(
        &self,
        namespace: &str,
        name: &str,
        patch: &serde_json::Value,
    ) -> impl Future<Output = Result<(), Report<KubernetesError>>> + Send;
}

/// [`ClusterSession`] backed by the Kubernetes API.
#[derive(Clone)]
pub struct KubeSession {
    client: Client,
}

impl KubeSession {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

impl ClusterSession for KubeSession {
    async fn get_config_map(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<ConfigMap, Report<KubernetesError>> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        api.get(name)
            .await
            .change_context(KubernetesError::ConfigMapFetch {
                name: name.to_string(),
                namespace: namespace.to_string(),
            })
    }

    async fn patch_workload(
        &self,
        namespace: &str,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<(), Report<KubernetesError>> {
        let api: Api<Workload> = Api::namespaced(self.client.clone(), namespace);
        debug!(namespace = %namespace, name = %name, %patch, "Submitting strategic merge patch");
        api.patch(name, &PatchParams::default(), &Patch::Strategic(patch))
            .await
            .change_context(KubernetesError::PatchFailed {
                name: name.to_string(),
                namespace: namespace.to_string(),
            })?;
        Ok(())
    }
}

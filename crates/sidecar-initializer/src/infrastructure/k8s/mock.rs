//! In-memory [`ClusterSession`] for tests.

use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;

use error_stack::Report;
use k8s_openapi::api::core::v1::ConfigMap;

use super::ClusterSession;
use super::KubernetesError;

/// A patch recorded by [`MockSession`].
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedPatch {
    pub namespace: String,
    pub name: String,
    pub patch: serde_json::Value,
}

/// Session that serves fixed ConfigMaps and records patches.
#[derive(Clone, Default)]
pub struct MockSession {
    config_maps: Vec<ConfigMap>,
    patches: Arc<Mutex<Vec<RecordedPatch>>>,
    attempts: Arc<AtomicUsize>,
    reject_patches: bool,
}

impl MockSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config_map(mut self, config_map: ConfigMap) -> Self {
        self.config_maps.push(config_map);
        self
    }

    /// Make every patch fail as if the API server refused it.
    pub fn rejecting_patches(mut self) -> Self {
        self.reject_patches = true;
        self
    }

    pub fn patches(&self) -> Vec<RecordedPatch> {
        self.patches.lock().unwrap().clone()
    }

    /// Patch submissions seen, accepted or not.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl ClusterSession for MockSession {
    async fn get_config_map(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<ConfigMap, Report<KubernetesError>> {
        self.config_maps
            .iter()
            .find(|cm| {
                cm.metadata.namespace.as_deref() == Some(namespace)
                    && cm.metadata.name.as_deref() == Some(name)
            })
            .cloned()
            .ok_or_else(|| {
                Report::new(KubernetesError::ConfigMapFetch {
                    name: name.to_string(),
                    namespace: namespace.to_string(),
                })
            })
    }

    async fn patch_workload(
        &self,
        namespace: &str,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<(), Report<KubernetesError>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.reject_patches {
            return Err(Report::new(KubernetesError::PatchFailed {
                name: name.to_string(),
                namespace: namespace.to_string(),
            })
            .attach_printable("deployments.apps not found"));
        }
        self.patches.lock().unwrap().push(RecordedPatch {
            namespace: namespace.to_string(),
            name: name.to_string(),
            patch: patch.clone(),
        });
        Ok(())
    }
}

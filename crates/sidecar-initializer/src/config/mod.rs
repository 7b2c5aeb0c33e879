pub mod cli;
pub mod sidecar;

use std::time::Duration;

pub use cli::*;
pub use sidecar::SidecarConfig;

/// Where cluster credentials come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialSource {
    /// Service account mounted into the pod.
    InCluster,
    /// `$HOME/.kube/config`.
    LocalKubeconfig,
}

/// Annotation gating policy, fixed at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnotationGate {
    pub annotation: String,
    pub require: bool,
}

impl AnnotationGate {
    /// Whether a workload with the given annotation presence may receive sidecars.
    pub fn admits(&self, has_annotation: bool) -> bool {
        !self.require || has_annotation
    }
}

/// Immutable settings built once from the command line.
#[derive(Debug, Clone)]
pub struct InitializerSettings {
    pub initializer_name: String,
    pub gate: AnnotationGate,
    pub configmap: String,
    pub configmap_namespace: String,
    pub credentials: CredentialSource,
    pub resync_period: Duration,
}

impl From<&Cli> for InitializerSettings {
    fn from(cli: &Cli) -> Self {
        Self {
            initializer_name: cli.initializer_name.clone(),
            gate: AnnotationGate {
                annotation: cli.annotation.clone(),
                require: cli.require_annotation,
            },
            configmap: cli.configmap.clone(),
            configmap_namespace: cli.namespace.clone(),
            credentials: if cli.kubeconfig {
                CredentialSource::LocalKubeconfig
            } else {
                CredentialSource::InCluster
            },
            resync_period: Duration::from_secs(cli.resync_period_secs),
        }
    }
}

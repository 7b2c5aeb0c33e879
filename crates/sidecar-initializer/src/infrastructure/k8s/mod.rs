//! Kubernetes integration module.
//!
//! This module provides the cluster-facing half of the initializer: the
//! Deployment snapshot type, the event feed that delivers uninitialized
//! Deployments, and the session used to read configuration and submit patches.
//!
//! The main components are:
//! - [`Workload`]: Deployment snapshot carrying the pending initializer queue
//! - [`WorkloadFeed`]: Cancellable stream of Deployments awaiting initialization
//! - [`ClusterSession`]: Seam for the get/patch calls made while processing events

use core::error::Error;

pub mod feed;
#[cfg(test)]
pub(crate) mod mock;
pub mod session;
pub mod workload;

pub use feed::WorkloadFeed;
pub use session::ClusterSession;
pub use session::KubeSession;
pub use workload::Initializer;
pub use workload::Initializers;
pub use workload::Workload;
pub use workload::WorkloadMeta;

/// Errors that can occur during Kubernetes operations.
#[derive(Debug, derive_more::Display)]
pub enum KubernetesError {
    #[display("Failed to connect to Kubernetes API: {message}")]
    ConnectionFailed { message: String },
    #[display("Failed to watch deployments: {message}")]
    WatchFailed { message: String },
    #[display("ConfigMap not found: {name} in namespace {namespace}")]
    ConfigMapFetch { name: String, namespace: String },
    #[display("Failed to patch deployment {namespace}/{name}")]
    PatchFailed { name: String, namespace: String },
}

impl Error for KubernetesError {}

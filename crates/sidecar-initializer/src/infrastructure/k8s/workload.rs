//! Deployment snapshot with the initializer queue in its metadata.
//!
//! The upstream `ObjectMeta` has no `initializers` field, so the Deployment is
//! modelled here with a metadata wrapper that carries the queue next to the
//! standard object metadata.

use std::borrow::Cow;

use k8s_openapi::api::apps::v1::DeploymentSpec;
use k8s_openapi::api::apps::v1::DeploymentStatus;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::NamespaceResourceScope;
use kube::Resource;
use serde::Deserialize;
use serde::Serialize;

/// One entry of the pending initializer queue.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Initializer {
    pub name: String,
}

impl Initializer {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// Initializers still owed action on an object. `pending[0]` acts next.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Initializers {
    #[serde(default)]
    pub pending: Vec<Initializer>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
}

/// Standard object metadata plus the initializer queue.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkloadMeta {
    #[serde(flatten)]
    pub object: ObjectMeta,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initializers: Option<Initializers>,
}

/// An `apps/v1` Deployment as seen by the initializer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Workload {
    pub metadata: WorkloadMeta,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spec: Option<DeploymentSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<DeploymentStatus>,
}

impl Workload {
    /// The pending queue, empty when no initialization is outstanding.
    pub fn pending_initializers(&self) -> &[Initializer] {
        self.metadata
            .initializers
            .as_ref()
            .map(|initializers| initializers.pending.as_slice())
            .unwrap_or_default()
    }

    pub fn has_pending_initializers(&self) -> bool {
        !self.pending_initializers().is_empty()
    }

    pub fn has_annotation(&self, key: &str) -> bool {
        self.metadata
            .object
            .annotations
            .as_ref()
            .is_some_and(|annotations| annotations.contains_key(key))
    }

    /// `namespace/name`, used for logging.
    pub fn key(&self) -> String {
        format!(
            "{}/{}",
            self.metadata.object.namespace.as_deref().unwrap_or_default(),
            self.metadata.object.name.as_deref().unwrap_or_default()
        )
    }
}

impl Resource for Workload {
    type DynamicType = ();
    type Scope = NamespaceResourceScope;

    fn kind(_: &()) -> Cow<'_, str> {
        Cow::Borrowed("Deployment")
    }

    fn group(_: &()) -> Cow<'_, str> {
        Cow::Borrowed("apps")
    }

    fn version(_: &()) -> Cow<'_, str> {
        Cow::Borrowed("v1")
    }

    fn plural(_: &()) -> Cow<'_, str> {
        Cow::Borrowed("deployments")
    }

    fn meta(&self) -> &ObjectMeta {
        &self.metadata.object
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata.object
    }
}

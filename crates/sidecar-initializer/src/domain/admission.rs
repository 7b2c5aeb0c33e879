//! Per-object initializer decision.
//!
//! Only the initializer named at the head of `metadata.initializers.pending`
//! may act on an object. When it does, it removes itself from the queue and,
//! unless the annotation gate says otherwise, appends the configured sidecar
//! containers and volumes to the pod template.

use std::sync::Arc;

use crate::config::AnnotationGate;
use crate::config::SidecarConfig;
use crate::infrastructure::k8s::Initializers;
use crate::infrastructure::k8s::Workload;

/// Result of deciding on one snapshot.
#[derive(Debug, Clone, PartialEq)]
pub enum Admission {
    /// Queue absent or headed by another initializer. Leave the object alone.
    NotOwned,
    /// Owned, but the required annotation is missing: only unblock.
    GatedSkip { desired: Workload },
    /// Owned and admitted: unblock and inject sidecars.
    Inject { desired: Workload },
}

impl Admission {
    pub fn desired(&self) -> Option<&Workload> {
        match self {
            Admission::NotOwned => None,
            Admission::GatedSkip { desired } | Admission::Inject { desired } => Some(desired),
        }
    }
}

/// Everything the decision depends on besides the snapshot itself.
#[derive(Debug, Clone)]
pub struct AdmissionPolicy {
    initializer_name: String,
    gate: AnnotationGate,
    sidecar: Arc<SidecarConfig>,
}

impl AdmissionPolicy {
    pub fn new(
        initializer_name: impl Into<String>,
        gate: AnnotationGate,
        sidecar: Arc<SidecarConfig>,
    ) -> Self {
        Self {
            initializer_name: initializer_name.into(),
            gate,
            sidecar,
        }
    }

    pub fn initializer_name(&self) -> &str {
        &self.initializer_name
    }

    pub fn gate(&self) -> &AnnotationGate {
        &self.gate
    }

    /// Decide what this initializer does with `workload`.
    ///
    /// Pure: the original snapshot is never modified and no cluster state is
    /// consulted.
    pub fn decide(&self, workload: &Workload) -> Admission {
        let Some(initializers) = workload.metadata.initializers.as_ref() else {
            return Admission::NotOwned;
        };
        match initializers.pending.first() {
            Some(head) if head.name == self.initializer_name => {}
            _ => return Admission::NotOwned,
        }

        let mut desired = workload.clone();
        desired.metadata.initializers = without_head(initializers);

        if !self.gate.admits(workload.has_annotation(&self.gate.annotation)) {
            return Admission::GatedSkip { desired };
        }

        self.append_sidecars(&mut desired);
        Admission::Inject { desired }
    }

    fn append_sidecars(&self, desired: &mut Workload) {
        let pod_spec = desired
            .spec
            .get_or_insert_with(Default::default)
            .template
            .spec
            .get_or_insert_with(Default::default);

        pod_spec
            .containers
            .extend(self.sidecar.containers.iter().cloned());

        if !self.sidecar.volumes.is_empty() {
            pod_spec
                .volumes
                .get_or_insert_with(Vec::new)
                .extend(self.sidecar.volumes.iter().cloned());
        }
    }
}

/// Drop the head of the queue, keeping the rest in order.
///
/// An emptied queue becomes `None`: other initializers only see the object as
/// admitted once the whole `initializers` field is gone.
fn without_head(initializers: &Initializers) -> Option<Initializers> {
    let rest = initializers.pending.get(1..).unwrap_or_default();
    if rest.is_empty() {
        return None;
    }
    Some(Initializers {
        pending: rest.to_vec(),
        result: initializers.result.clone(),
    })
}

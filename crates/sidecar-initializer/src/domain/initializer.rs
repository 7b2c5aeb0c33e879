use error_stack::Report;
use futures::Stream;
use futures::StreamExt;
use tracing::debug;
use tracing::error;
use tracing::info;

use crate::domain::Admission;
use crate::domain::AdmissionPolicy;
use crate::domain::InitializerError;
use crate::domain::PatchRequest;
use crate::infrastructure::k8s::ClusterSession;
use crate::infrastructure::k8s::Workload;

/// What happened to one delivered Deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Another initializer is next in line, or nothing is pending.
    NotOwned,
    /// Queue entry removed without injecting (annotation gate).
    Unblocked,
    /// Queue entry removed and sidecars injected.
    Injected,
}

/// Runs the admission decision and patch submission for each event.
pub struct SidecarInitializer<S> {
    policy: AdmissionPolicy,
    session: S,
}

impl<S: ClusterSession> SidecarInitializer<S> {
    pub fn new(policy: AdmissionPolicy, session: S) -> Self {
        Self { policy, session }
    }

    /// Process one snapshot.
    ///
    /// # Errors
    ///
    /// - [`InitializerError::DiffEncoding`] if the snapshots cannot be diffed
    /// - [`InitializerError::PatchRejected`] if the API server refuses the patch
    #[tracing::instrument(skip_all, fields(workload = %workload.key()))]
    pub async fn handle(&self, workload: &Workload) -> Result<Outcome, Report<InitializerError>> {
        let admission = self.policy.decide(workload);
        let (outcome, desired) = match &admission {
            Admission::NotOwned => {
                debug!("Not next in the initializer queue, leaving deployment untouched");
                return Ok(Outcome::NotOwned);
            }
            Admission::GatedSkip { desired } => {
                info!(
                    "Required '{}' annotation missing; skipping sidecar injection",
                    self.policy.gate().annotation
                );
                (Outcome::Unblocked, desired)
            }
            Admission::Inject { desired } => {
                info!(
                    initializer = %self.policy.initializer_name(),
                    "Initializing deployment"
                );
                (Outcome::Injected, desired)
            }
        };

        if let Some(request) = PatchRequest::between(workload, desired)? {
            request.submit(&self.session).await?;
        }
        Ok(outcome)
    }

    /// Process events one at a time until the stream ends.
    ///
    /// Failures are logged and the event dropped; they never stop the loop.
    pub async fn run<E>(&self, events: E)
    where
        E: Stream<Item = Workload>,
    {
        let mut events = std::pin::pin!(events);
        while let Some(workload) = events.next().await {
            if let Err(e) = self.handle(&workload).await {
                error!(workload = %workload.key(), "Failed to initialize deployment: {e:?}");
            }
        }
    }
}

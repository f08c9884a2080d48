//! Idempotent node lifecycle reconciliation
//!
//! Drives the local node to a joined, healthy state in the desired role.
//! A node found with partial state is always reset to Clean first; it is
//! never repaired in place. Any failure of a join or init resets the node
//! again before the error is returned.

use bench_core::{
    poll_until, retry_transient, ClusterConfig, Error, JoinCredential, NodeConfig, NodeHost,
    NodeInspection, NodeRole, NodeState, Orchestrator, PollError, PollPolicy, Probe, Result,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Taints placed on control plane nodes by the bootstrap tool
const CONTROL_PLANE_TAINTS: [&str; 2] = [
    "node-role.kubernetes.io/control-plane",
    "node-role.kubernetes.io/master",
];

/// Classify a node from its local markers and daemon health.
///
/// A control plane is Joined only with its files present and both the API
/// and the agent answering. A worker is Joined with its agent credentials
/// present, the agent healthy, and no control plane files left over.
pub fn detect_state(inspection: &NodeInspection, role: NodeRole) -> NodeState {
    if !inspection.has_any_markers() {
        return NodeState::Clean;
    }

    let joined = match role {
        NodeRole::ControlPlane => {
            !inspection.control_plane_files.is_empty()
                && inspection.api_healthy
                && inspection.agent_healthy
        }
        NodeRole::Worker => {
            inspection.control_plane_files.is_empty()
                && !inspection.worker_files.is_empty()
                && inspection.agent_healthy
        }
    };

    if joined {
        NodeState::Joined
    } else {
        NodeState::PartiallyJoined
    }
}

/// Result of one reconcile call
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconcileOutcome {
    pub role: NodeRole,
    /// State detected before any action
    pub previous: NodeState,
    /// State after the call
    pub state: NodeState,
    pub reset_performed: bool,
    /// False when the node was already joined and nothing was touched
    pub changed: bool,
}

/// Node lifecycle reconciler
pub struct NodeReconciler {
    host: Arc<dyn NodeHost>,
    orchestrator: Option<Arc<dyn Orchestrator>>,
    node: NodeConfig,
    cluster: ClusterConfig,
    retry: PollPolicy,
}

impl NodeReconciler {
    pub fn new(host: Arc<dyn NodeHost>, node: NodeConfig, cluster: ClusterConfig, retry: PollPolicy) -> Self {
        Self {
            host,
            orchestrator: None,
            node,
            cluster,
            retry,
        }
    }

    /// Orchestrator used to deregister stale node objects and to finish
    /// control plane setup. Without one those steps are skipped.
    pub fn with_orchestrator(mut self, orchestrator: Arc<dyn Orchestrator>) -> Self {
        self.orchestrator = Some(orchestrator);
        self
    }

    /// Current state of the local node
    pub async fn detect(&self, role: NodeRole) -> Result<NodeState> {
        let inspection = self.host.inspect().await?;
        Ok(detect_state(&inspection, role))
    }

    /// Drive the node to Joined in `role`.
    ///
    /// Workers need a credential; an expired one fails with
    /// `CredentialExpired` after the node has been returned to Clean.
    pub async fn reconcile(&self, role: NodeRole, credential: Option<&JoinCredential>) -> Result<ReconcileOutcome> {
        let previous = self.detect(role).await?;
        info!(%role, state = %previous, "reconciling node");

        if previous == NodeState::Joined {
            info!(%role, "node already joined and healthy, nothing to do");
            return Ok(ReconcileOutcome {
                role,
                previous,
                state: previous,
                reset_performed: false,
                changed: false,
            });
        }

        let mut reset_performed = false;
        if previous != NodeState::Clean {
            warn!(%role, state = %previous, "partial node state found, resetting");
            self.reset().await?;
            reset_performed = true;
        }

        let credential = match role {
            NodeRole::Worker => {
                let credential = credential
                    .ok_or_else(|| Error::invalid_request("a join credential is required for the worker role"))?;
                if credential.is_expired() {
                    return Err(Error::credential_expired(format!(
                        "token {} expired at {}",
                        credential.redacted_token(),
                        credential.expires_at
                    )));
                }
                Some(credential)
            }
            NodeRole::ControlPlane => None,
        };

        self.bootstrap(role, credential).await?;
        self.wait_healthy(role).await?;

        if role == NodeRole::ControlPlane {
            self.finish_control_plane().await;
        }

        info!(%role, "node joined");
        Ok(ReconcileOutcome {
            role,
            previous,
            state: NodeState::Joined,
            reset_performed,
            changed: true,
        })
    }

    /// Return the node to Clean and verify nothing is left behind
    pub async fn reset(&self) -> Result<()> {
        self.host.reset().await?;
        self.deregister().await;

        let inspection = self.host.inspect().await?;
        let residual = inspection.residual_files();
        if !residual.is_empty() {
            return Err(Error::reset_failed(format!(
                "{} file(s) remain after reset: {}",
                residual.len(),
                residual
                    .iter()
                    .map(|p| p.display().to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            )));
        }
        if inspection.agent_healthy || inspection.api_healthy {
            return Err(Error::reset_failed("local services still running after reset"));
        }

        debug!("node reset to clean");
        Ok(())
    }

    /// Mint a join credential for workers (control plane only)
    pub async fn mint_credential(&self, ttl: Duration) -> Result<JoinCredential> {
        let credential = self.host.mint_credential(ttl).await?;
        info!(
            token = %credential.redacted_token(),
            endpoint = %credential.endpoint,
            expires_at = %credential.expires_at,
            "minted join credential"
        );
        Ok(credential)
    }

    /// Best-effort removal of this node's object from the control plane
    async fn deregister(&self) {
        let Some(orchestrator) = &self.orchestrator else {
            return;
        };
        let hostname = match self.host.hostname().await {
            Ok(hostname) => hostname,
            Err(e) => {
                warn!(error = %e, "could not determine hostname, skipping node deregistration");
                return;
            }
        };
        if let Err(e) = orchestrator.delete_node(&hostname).await {
            warn!(node = %hostname, error = %e, "node deregistration failed");
        }
    }

    /// Init or join with transient retries. Every failed attempt resets
    /// the node before its error is surfaced.
    async fn bootstrap(&self, role: NodeRole, credential: Option<&JoinCredential>) -> Result<()> {
        let what = match role {
            NodeRole::ControlPlane => "init_control_plane",
            NodeRole::Worker => "join",
        };

        retry_transient(&self.retry, what, || async move {
            let attempt = match credential {
                Some(credential) => self.host.join(credential).await,
                None => self.host.init_control_plane().await,
            };
            if let Err(e) = attempt {
                warn!(%role, error = %e, category = e.category(), "bootstrap failed, resetting node");
                if let Err(reset) = self.reset().await {
                    return Err(Error::reset_failed(format!("{} (after: {})", reset, e)));
                }
                return Err(e);
            }
            Ok(())
        })
        .await
    }

    /// Wait until the node reads Joined, resetting it when the wait expires
    async fn wait_healthy(&self, role: NodeRole) -> Result<()> {
        let policy = PollPolicy::fixed(self.node.health_poll_interval())
            .with_timeout(self.node.health_wait());

        let waited = poll_until(&policy, |_| async move {
            match self.host.inspect().await {
                Ok(inspection) => match detect_state(&inspection, role) {
                    NodeState::Joined => Probe::Ready(()),
                    _ => Probe::Pending,
                },
                Err(e) => Probe::Abort(e),
            }
        })
        .await;

        match waited {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!(%role, error = %e, "node did not become healthy, resetting");
                self.reset().await?;
                match e {
                    PollError::Aborted(e) => Err(e),
                    other => Err(Error::timeout(format!("node health after join: {}", other))),
                }
            }
        }
    }

    async fn finish_control_plane(&self) {
        let Some(orchestrator) = &self.orchestrator else {
            return;
        };
        let hostname = match self.host.hostname().await {
            Ok(hostname) => hostname,
            Err(e) => {
                warn!(error = %e, "could not determine hostname, skipping control plane setup");
                return;
            }
        };

        if self.node.untaint_control_plane {
            for taint in CONTROL_PLANE_TAINTS {
                if let Err(e) = orchestrator.remove_taint(&hostname, taint).await {
                    warn!(node = %hostname, taint, error = %e, "failed to remove taint");
                }
            }
        }

        let label = &self.cluster.accelerator_label;
        match orchestrator.label_node(&hostname, &label.key, &label.value).await {
            Ok(()) => info!(node = %hostname, label = %label.key, "labelled accelerator node"),
            Err(e) => warn!(node = %hostname, error = %e, "failed to label node"),
        }
    }
}

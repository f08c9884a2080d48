//! Traits for the orchestrator and the local node
//!
//! Every read and mutation of cluster or node state goes through these seams,
//! so the reconciler, preflight validator, and job supervisor can be driven
//! against mocks in tests.

use crate::{JoinCredential, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;

/// Access to the container orchestrator's management API.
///
/// Namespaced operations act on the namespace the implementation was
/// configured with.
#[async_trait]
pub trait Orchestrator: Send + Sync {
    /// Cheap request proving the control plane answers
    async fn probe_health(&self) -> Result<()>;

    /// List registered nodes
    async fn list_nodes(&self) -> Result<Vec<NodeInfo>>;

    /// Set a label on a node, overwriting any previous value
    async fn label_node(&self, node: &str, key: &str, value: &str) -> Result<()>;

    /// Remove a taint by key; a missing taint is not an error
    async fn remove_taint(&self, node: &str, key: &str) -> Result<()>;

    /// Deregister a node; a missing node is not an error
    async fn delete_node(&self, node: &str) -> Result<()>;

    async fn runtime_class_exists(&self, name: &str) -> Result<bool>;

    async fn create_runtime_class(&self, name: &str, handler: &str) -> Result<()>;

    async fn namespace_exists(&self, name: &str) -> Result<bool>;

    async fn create_namespace(&self, name: &str) -> Result<()>;

    /// Read one key of a secret; `None` when the secret or key is absent
    async fn get_secret_value(&self, name: &str, key: &str) -> Result<Option<String>>;

    /// Create or replace a config map
    async fn create_config_map(&self, name: &str, data: &BTreeMap<String, String>) -> Result<()>;

    /// Delete a config map; a missing config map is not an error
    async fn delete_config_map(&self, name: &str) -> Result<()>;

    /// Submit a job; fails with `AlreadyExists` if one with the same name is live
    async fn create_job(&self, manifest: &JobManifest) -> Result<()>;

    /// Current job status; `None` once the job is gone
    async fn get_job(&self, name: &str) -> Result<Option<JobStatus>>;

    /// Delete a job and its pods; a missing job is not an error
    async fn delete_job(&self, name: &str) -> Result<()>;

    /// Pods created for a job
    async fn list_pods(&self, job: &str) -> Result<Vec<PodStatus>>;

    /// Follow a pod's output, sending each line until the stream ends
    async fn stream_logs(&self, pod: &str, sender: mpsc::Sender<String>) -> Result<()>;

    /// Human-readable description of a pod
    async fn describe_pod(&self, pod: &str) -> Result<String>;

    /// Most recent cluster events in the namespace, oldest first
    async fn recent_events(&self, limit: u32) -> Result<Vec<String>>;
}

/// The machine benchctl runs on, seen through its bootstrap tooling
#[async_trait]
pub trait NodeHost: Send + Sync {
    /// Observe which credential, config, and network markers exist and
    /// whether the local daemons are healthy
    async fn inspect(&self) -> Result<NodeInspection>;

    /// Stop local services and remove all cluster state
    async fn reset(&self) -> Result<()>;

    /// Initialize a control plane on this node
    async fn init_control_plane(&self) -> Result<()>;

    /// Join an existing cluster as a worker.
    ///
    /// Fails with `CredentialExpired` when the control plane rejects the token.
    async fn join(&self, credential: &JoinCredential) -> Result<()>;

    /// Mint a join credential (control plane only)
    async fn mint_credential(&self, ttl: Duration) -> Result<JoinCredential>;

    /// Name this node registers under
    async fn hostname(&self) -> Result<String>;
}

/// A rendered job document, submitted verbatim
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobManifest {
    pub name: String,
    pub namespace: String,
    /// Serialized document
    pub document: String,
}

/// Orchestrator-side job counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStatus {
    pub active: u32,
    pub succeeded: u32,
    pub failed: u32,
    /// Reason reported on a failed condition, if any
    pub failure_reason: Option<String>,
}

impl JobStatus {
    pub fn is_succeeded(&self) -> bool {
        self.succeeded > 0
    }

    pub fn is_failed(&self) -> bool {
        self.failed > 0 || self.failure_reason.is_some()
    }

    pub fn is_finished(&self) -> bool {
        self.is_succeeded() || self.is_failed()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PodPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl PodPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PodPhase::Succeeded | PodPhase::Failed)
    }
}

impl std::str::FromStr for PodPhase {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "Pending" => Ok(PodPhase::Pending),
            "Running" => Ok(PodPhase::Running),
            "Succeeded" => Ok(PodPhase::Succeeded),
            "Failed" => Ok(PodPhase::Failed),
            "Unknown" => Ok(PodPhase::Unknown),
            _ => Err(format!("Unknown pod phase: {}", s)),
        }
    }
}

/// Execution unit status
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodStatus {
    pub name: String,
    pub phase: PodPhase,
    /// Scheduler message when the pod cannot be placed on any node
    pub unschedulable: Option<String>,
    /// Container waiting reason (e.g. image pull back-off)
    pub waiting_reason: Option<String>,
    /// Exit code of the workload container once it terminated
    pub exit_code: Option<i32>,
}

impl PodStatus {
    pub fn new(name: impl Into<String>, phase: PodPhase) -> Self {
        Self {
            name: name.into(),
            phase,
            unschedulable: None,
            waiting_reason: None,
            exit_code: None,
        }
    }

    /// Whether the workload has started (or already finished) executing
    pub fn has_started(&self) -> bool {
        matches!(
            self.phase,
            PodPhase::Running | PodPhase::Succeeded | PodPhase::Failed
        )
    }
}

/// Registered node summary
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub name: String,
    pub ready: bool,
    /// Allocatable accelerator devices
    pub accelerators: u64,
    pub labels: BTreeMap<String, String>,
    /// Taint keys
    pub taints: Vec<String>,
}

/// Local markers and daemon health
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInspection {
    /// Present control plane credential/config files
    pub control_plane_files: Vec<PathBuf>,
    /// Present worker credential/config files
    pub worker_files: Vec<PathBuf>,
    /// Present pod network configuration files
    pub cni_files: Vec<PathBuf>,
    /// Local API server answers its readiness endpoint
    pub api_healthy: bool,
    /// Node agent service is active
    pub agent_healthy: bool,
}

impl NodeInspection {
    pub fn has_any_markers(&self) -> bool {
        !self.control_plane_files.is_empty()
            || !self.worker_files.is_empty()
            || !self.cni_files.is_empty()
    }

    pub fn residual_files(&self) -> Vec<PathBuf> {
        self.control_plane_files
            .iter()
            .chain(&self.worker_files)
            .chain(&self.cni_files)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_status_outcome() {
        let running = JobStatus {
            active: 1,
            ..Default::default()
        };
        assert!(!running.is_finished());

        let done = JobStatus {
            succeeded: 1,
            ..Default::default()
        };
        assert!(done.is_succeeded());
        assert!(done.is_finished());

        let deadline = JobStatus {
            failure_reason: Some("DeadlineExceeded".to_string()),
            ..Default::default()
        };
        assert!(deadline.is_failed());
    }

    #[test]
    fn test_pod_phase() {
        assert_eq!("Running".parse::<PodPhase>().unwrap(), PodPhase::Running);
        assert!("running".parse::<PodPhase>().is_err());
        assert!(PodPhase::Failed.is_terminal());
        assert!(!PodStatus::new("p", PodPhase::Pending).has_started());
        assert!(PodStatus::new("p", PodPhase::Succeeded).has_started());
    }

    #[test]
    fn test_inspection_markers() {
        let mut inspection = NodeInspection::default();
        assert!(!inspection.has_any_markers());

        inspection.cni_files.push(PathBuf::from("/etc/cni/net.d/10-flannel.conflist"));
        assert!(inspection.has_any_markers());
        assert_eq!(inspection.residual_files().len(), 1);
    }
}

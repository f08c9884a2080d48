//! In-memory node host with scripted join failures

use async_trait::async_trait;
use bench_core::{Error, JoinCredential, NodeHost, NodeInspection, NodeRole, Result};
use chrono::Utc;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// Scripted failure for the next init or join
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockJoinFailure {
    /// Control plane not reachable; leaves a half-joined node behind
    Unreachable,
    /// Control plane rejects the token as expired
    Expired,
    /// Preflight of the bootstrap tool fails
    Rejected,
}

#[derive(Debug, Default)]
struct HostState {
    hostname: String,
    inspection: NodeInspection,
    failures: VecDeque<MockJoinFailure>,
    reset_leaves_residue: bool,
    /// Health checks the agent stays down for after a successful join
    agent_start_delay: u32,
    agent_pending: u32,
    resets: u32,
    joins: u32,
    inits: u32,
}

fn control_plane_files() -> Vec<PathBuf> {
    vec![
        PathBuf::from("/etc/kubernetes/admin.conf"),
        PathBuf::from("/etc/kubernetes/pki/ca.key"),
    ]
}

fn worker_files() -> Vec<PathBuf> {
    vec![
        PathBuf::from("/etc/kubernetes/kubelet.conf"),
        PathBuf::from("/var/lib/kubelet/config.yaml"),
    ]
}

fn cni_files() -> Vec<PathBuf> {
    vec![PathBuf::from("/etc/cni/net.d/10-flannel.conflist")]
}

/// Mock node host
#[derive(Debug, Clone)]
pub struct MockNodeHost {
    inner: Arc<RwLock<HostState>>,
}

impl MockNodeHost {
    fn with_inspection(hostname: &str, inspection: NodeInspection) -> Self {
        Self {
            inner: Arc::new(RwLock::new(HostState {
                hostname: hostname.to_string(),
                inspection,
                ..Default::default()
            })),
        }
    }

    /// Node with no cluster state at all
    pub fn clean(hostname: &str) -> Self {
        Self::with_inspection(hostname, NodeInspection::default())
    }

    /// Node already joined in `role` with healthy daemons
    pub fn joined(hostname: &str, role: NodeRole) -> Self {
        let inspection = match role {
            NodeRole::ControlPlane => NodeInspection {
                control_plane_files: control_plane_files(),
                worker_files: worker_files(),
                cni_files: cni_files(),
                api_healthy: true,
                agent_healthy: true,
            },
            NodeRole::Worker => NodeInspection {
                worker_files: worker_files(),
                cni_files: cni_files(),
                agent_healthy: true,
                ..Default::default()
            },
        };
        Self::with_inspection(hostname, inspection)
    }

    /// Leftover control plane credentials without a responsive API or agent config
    pub fn stale_control_plane(hostname: &str) -> Self {
        Self::with_inspection(
            hostname,
            NodeInspection {
                control_plane_files: control_plane_files(),
                ..Default::default()
            },
        )
    }

    /// Worker credentials present but the agent is not running
    pub fn half_joined_worker(hostname: &str) -> Self {
        Self::with_inspection(
            hostname,
            NodeInspection {
                worker_files: worker_files(),
                cni_files: cni_files(),
                ..Default::default()
            },
        )
    }

    /// Queue a failure for the next init or join
    pub async fn fail_next(&self, failure: MockJoinFailure) {
        self.inner.write().await.failures.push_back(failure);
    }

    /// Reset reports success but leaves network state behind
    pub async fn set_reset_leaves_residue(&self, residue: bool) {
        self.inner.write().await.reset_leaves_residue = residue;
    }

    /// Keep the agent unhealthy for `checks` inspections after each successful join
    pub async fn set_agent_start_delay(&self, checks: u32) {
        self.inner.write().await.agent_start_delay = checks;
    }

    /// Stop the local agent without touching files
    pub async fn stop_agent(&self) {
        self.inner.write().await.inspection.agent_healthy = false;
    }

    pub async fn reset_count(&self) -> u32 {
        self.inner.read().await.resets
    }

    pub async fn join_count(&self) -> u32 {
        self.inner.read().await.joins
    }

    pub async fn init_count(&self) -> u32 {
        self.inner.read().await.inits
    }

    /// Files left in the credential, config, and network directories
    pub async fn residual_files(&self) -> Vec<PathBuf> {
        self.inner.read().await.inspection.residual_files()
    }
}

fn scripted_error(failure: MockJoinFailure) -> Error {
    match failure {
        MockJoinFailure::Unreachable => {
            Error::unreachable("couldn't validate the identity of the API server: connection refused")
        }
        MockJoinFailure::Expired => {
            Error::credential_expired("bootstrap token is expired or no longer valid")
        }
        MockJoinFailure::Rejected => Error::join_failed("[ERROR Swap]: running with swap on"),
    }
}

#[async_trait]
impl NodeHost for MockNodeHost {
    async fn inspect(&self) -> Result<NodeInspection> {
        let mut state = self.inner.write().await;
        if state.agent_pending > 0 {
            state.agent_pending -= 1;
            state.inspection.agent_healthy = state.agent_pending == 0;
        }
        Ok(state.inspection.clone())
    }

    async fn reset(&self) -> Result<()> {
        let mut state = self.inner.write().await;
        state.resets += 1;
        let residue = state.reset_leaves_residue;
        state.agent_pending = 0;
        state.inspection = NodeInspection::default();
        if residue {
            state.inspection.cni_files = cni_files();
        }
        Ok(())
    }

    async fn init_control_plane(&self) -> Result<()> {
        let mut state = self.inner.write().await;
        state.inits += 1;
        if let Some(failure) = state.failures.pop_front() {
            state.inspection.control_plane_files = control_plane_files();
            return Err(scripted_error(failure));
        }
        state.inspection = NodeInspection {
            control_plane_files: control_plane_files(),
            worker_files: worker_files(),
            cni_files: cni_files(),
            api_healthy: true,
            agent_healthy: true,
        };
        Ok(())
    }

    async fn join(&self, _credential: &JoinCredential) -> Result<()> {
        let mut state = self.inner.write().await;
        state.joins += 1;
        if let Some(failure) = state.failures.pop_front() {
            state.inspection.worker_files = worker_files();
            return Err(scripted_error(failure));
        }
        state.agent_pending = state.agent_start_delay;
        state.inspection = NodeInspection {
            worker_files: worker_files(),
            cni_files: cni_files(),
            agent_healthy: state.agent_pending == 0,
            ..Default::default()
        };
        Ok(())
    }

    async fn mint_credential(&self, ttl: Duration) -> Result<JoinCredential> {
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|e| Error::invalid_request(format!("invalid ttl: {}", e)))?;
        Ok(JoinCredential {
            token: "abcdef.0123456789abcdef".to_string(),
            endpoint: "10.0.0.1:6443".to_string(),
            ca_cert_hash: "sha256:0f1e2d3c4b5a69788796a5b4c3d2e1f00f1e2d3c4b5a69788796a5b4c3d2e1f0"
                .to_string(),
            expires_at: Utc::now() + ttl,
        })
    }

    async fn hostname(&self) -> Result<String> {
        Ok(self.inner.read().await.hostname.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_failed_join_leaves_partial_state() {
        let host = MockNodeHost::clean("worker-1");
        host.fail_next(MockJoinFailure::Unreachable).await;

        let credential = host.mint_credential(Duration::from_secs(60)).await.unwrap();
        assert!(host.join(&credential).await.is_err());

        let inspection = host.inspect().await.unwrap();
        assert!(inspection.has_any_markers());
        assert!(!inspection.agent_healthy);
    }

    #[tokio::test]
    async fn test_reset_clears_everything() {
        let host = MockNodeHost::joined("cp-1", NodeRole::ControlPlane);
        host.reset().await.unwrap();
        assert!(host.residual_files().await.is_empty());
        assert_eq!(host.reset_count().await, 1);
    }
}

//! Core type definitions for node and cluster state

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Role a node plays in the cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NodeRole {
    /// Hosts the management API accepting workload and node objects
    ControlPlane,
    /// Runs workloads and advertises accelerator resources
    Worker,
}

impl std::str::FromStr for NodeRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "control-plane" | "controlplane" | "master" => Ok(NodeRole::ControlPlane),
            "worker" => Ok(NodeRole::Worker),
            _ => Err(format!("Unknown node role: {}", s)),
        }
    }
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeRole::ControlPlane => write!(f, "control-plane"),
            NodeRole::Worker => write!(f, "worker"),
        }
    }
}

/// Observed cluster state. Always derived from live probes, never cached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClusterState {
    Unreachable,
    PartiallyInitialized,
    Ready,
}

impl ClusterState {
    pub fn is_ready(&self) -> bool {
        matches!(self, ClusterState::Ready)
    }
}

impl fmt::Display for ClusterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClusterState::Unreachable => write!(f, "unreachable"),
            ClusterState::PartiallyInitialized => write!(f, "partially-initialized"),
            ClusterState::Ready => write!(f, "ready"),
        }
    }
}

/// Reconciler view of a single node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeState {
    /// Not yet inspected
    Unknown,
    /// No credential, config, or network markers present
    Clean,
    /// Some markers present without the matching healthy daemon
    PartiallyJoined,
    /// Markers present for the desired role and its daemons are healthy
    Joined,
    /// A reconcile attempt ended in an error
    Failed,
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeState::Unknown => write!(f, "unknown"),
            NodeState::Clean => write!(f, "clean"),
            NodeState::PartiallyJoined => write!(f, "partially-joined"),
            NodeState::Joined => write!(f, "joined"),
            NodeState::Failed => write!(f, "failed"),
        }
    }
}

/// Short-lived token minted by the control plane authorizing one node join.
///
/// Consumed exactly once. An expired credential is never retried.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinCredential {
    /// Bootstrap token (`abcdef.0123456789abcdef`)
    pub token: String,

    /// Control plane API endpoint (`host:port`)
    pub endpoint: String,

    /// Discovery hash of the cluster CA (`sha256:...`)
    pub ca_cert_hash: String,

    /// Expiry time reported when the token was minted
    pub expires_at: DateTime<Utc>,
}

impl JoinCredential {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Token with the secret half masked, for logging
    pub fn redacted_token(&self) -> String {
        match self.token.split_once('.') {
            Some((id, _)) => format!("{}.****", id),
            None => "****".to_string(),
        }
    }
}

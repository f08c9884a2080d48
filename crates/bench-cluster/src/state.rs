//! Live cluster state observation

use bench_core::{retry_transient, ClusterState, Error, Orchestrator, PollPolicy, Result};
use tracing::{debug, warn};

/// Observe the cluster through live probes. Never cached.
///
/// Unreachable when the health probe still fails after retries,
/// PartiallyInitialized when the API answers but no node is Ready.
pub async fn observe_cluster_state(orchestrator: &dyn Orchestrator, retry: &PollPolicy) -> ClusterState {
    if let Err(e) = retry_transient(retry, "probe_health", || orchestrator.probe_health()).await {
        warn!(error = %e, "control plane health probe failed");
        return ClusterState::Unreachable;
    }

    match retry_transient(retry, "list_nodes", || orchestrator.list_nodes()).await {
        Ok(nodes) => {
            let ready = nodes.iter().filter(|n| n.ready).count();
            debug!(nodes = nodes.len(), ready, "observed nodes");
            if ready > 0 {
                ClusterState::Ready
            } else {
                ClusterState::PartiallyInitialized
            }
        }
        Err(e) if e.is_retryable() => {
            warn!(error = %e, "node listing failed");
            ClusterState::Unreachable
        }
        Err(e) => {
            warn!(error = %e, "node listing failed");
            ClusterState::PartiallyInitialized
        }
    }
}

/// Fail unless the cluster reads Ready
pub async fn require_ready(orchestrator: &dyn Orchestrator, retry: &PollPolicy) -> Result<()> {
    match observe_cluster_state(orchestrator, retry).await {
        ClusterState::Ready => Ok(()),
        ClusterState::Unreachable => Err(Error::unreachable("control plane did not answer")),
        ClusterState::PartiallyInitialized => Err(Error::invalid_request(
            "cluster is partially initialized: no node is Ready",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bench_core::{ClusterConfig, NodeInfo};
    use bench_dev::MockOrchestrator;
    use std::time::Duration;

    fn policy() -> PollPolicy {
        PollPolicy::fixed(Duration::from_millis(10)).with_max_attempts(2)
    }

    #[tokio::test(start_paused = true)]
    async fn test_ready_cluster() {
        let orch = MockOrchestrator::ready(&ClusterConfig::default());
        assert_eq!(observe_cluster_state(&orch, &policy()).await, ClusterState::Ready);
        assert!(require_ready(&orch, &policy()).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreachable_cluster() {
        let orch = MockOrchestrator::ready(&ClusterConfig::default());
        orch.set_reachable(false).await;
        assert_eq!(observe_cluster_state(&orch, &policy()).await, ClusterState::Unreachable);
        assert!(matches!(
            require_ready(&orch, &policy()).await,
            Err(Error::Unreachable(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_ready_node() {
        let orch = MockOrchestrator::empty("benchmarks");
        orch.add_node(NodeInfo {
            name: "cp-1".to_string(),
            ready: false,
            ..Default::default()
        })
        .await;
        assert_eq!(
            observe_cluster_state(&orch, &policy()).await,
            ClusterState::PartiallyInitialized
        );
    }
}

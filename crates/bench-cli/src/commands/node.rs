//! Node lifecycle commands

use crate::output::{row_pairs, Formattable, OutputFormat, OutputFormatter};
use anyhow::{Context, Result};
use bench_cluster::{KubectlOrchestrator, LocalNodeHost, NodeReconciler, ReconcileOutcome};
use bench_core::{Config, JoinCredential, NodeRole};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

impl Formattable for ReconcileOutcome {
    fn table_headers() -> Vec<String> {
        vec![
            "Role".to_string(),
            "Previous".to_string(),
            "State".to_string(),
            "Reset".to_string(),
            "Changed".to_string(),
        ]
    }

    fn table_row(&self) -> Vec<String> {
        vec![
            self.role.to_string(),
            self.previous.to_string(),
            self.state.to_string(),
            self.reset_performed.to_string(),
            self.changed.to_string(),
        ]
    }

    fn key_value_pairs(&self) -> Vec<(String, String)> {
        row_pairs(self)
    }
}

impl Formattable for JoinCredential {
    fn table_headers() -> Vec<String> {
        vec![
            "Endpoint".to_string(),
            "Token".to_string(),
            "CA Cert Hash".to_string(),
            "Expires At".to_string(),
        ]
    }

    fn table_row(&self) -> Vec<String> {
        vec![
            self.endpoint.clone(),
            self.token.clone(),
            self.ca_cert_hash.clone(),
            self.expires_at.to_rfc3339(),
        ]
    }

    fn key_value_pairs(&self) -> Vec<(String, String)> {
        row_pairs(self)
    }
}

/// Reconciler for this host. Control-plane runs fall back to the admin
/// kubeconfig written by init when no kubeconfig is configured.
fn reconciler(config: &Config, role: NodeRole) -> NodeReconciler {
    let host = Arc::new(LocalNodeHost::new(&config.node, &config.cluster));

    let mut orchestrator = KubectlOrchestrator::new(&config.cluster);
    if role == NodeRole::ControlPlane && config.cluster.kubeconfig.is_none() {
        orchestrator = orchestrator.with_kubeconfig(config.node.admin_kubeconfig());
    }

    NodeReconciler::new(
        host,
        config.node.clone(),
        config.cluster.clone(),
        config.retry.policy(),
    )
    .with_orchestrator(Arc::new(orchestrator))
}

fn read_credential(path: &Path) -> Result<JoinCredential> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read credential file {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("invalid credential file {}", path.display()))
}

/// Bring this node to Joined in `role`
pub async fn reconcile_node(
    config: &Config,
    role: NodeRole,
    credential: Option<PathBuf>,
    output_format: OutputFormat,
) -> Result<()> {
    let formatter = OutputFormatter::new(output_format);
    let credential = credential.as_deref().map(read_credential).transpose()?;

    formatter.print_progress(&format!("Reconciling node as {}", role));
    let outcome = reconciler(config, role)
        .reconcile(role, credential.as_ref())
        .await
        .with_context(|| format!("failed to reconcile node as {}", role))?;

    formatter.print_item(&outcome)?;
    if !outcome.changed {
        formatter.print_info("Node already joined; no changes made");
    } else {
        formatter.print_success(&format!("Node joined as {}", role));
    }
    Ok(())
}

/// Mint a worker join credential on the control plane
pub async fn mint_credential(config: &Config, ttl_secs: Option<u64>, output_format: OutputFormat) -> Result<()> {
    let formatter = OutputFormatter::new(output_format);
    let ttl = Duration::from_secs(ttl_secs.unwrap_or(config.node.credential_ttl_secs));

    let credential = reconciler(config, NodeRole::ControlPlane)
        .mint_credential(ttl)
        .await
        .context("failed to mint join credential")?;

    formatter.print_item(&credential)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bench_core::NodeState;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_read_credential_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("join.json");
        let credential = JoinCredential {
            token: "abcdef.0123456789abcdef".to_string(),
            endpoint: "10.0.0.1:6443".to_string(),
            ca_cert_hash: "sha256:deadbeef".to_string(),
            expires_at: Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap(),
        };
        std::fs::write(&path, serde_json::to_string(&credential).unwrap()).unwrap();

        assert_eq!(read_credential(&path).unwrap(), credential);
    }

    #[test]
    fn test_missing_credential_file_names_path() {
        let err = read_credential(Path::new("/nonexistent/join.json")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/join.json"));
    }

    #[test]
    fn test_outcome_pairs() {
        let outcome = ReconcileOutcome {
            role: NodeRole::Worker,
            previous: NodeState::PartiallyJoined,
            state: NodeState::Joined,
            reset_performed: true,
            changed: true,
        };
        let pairs = outcome.key_value_pairs();
        assert_eq!(pairs[1], ("Previous".to_string(), "partially-joined".to_string()));
        assert_eq!(pairs[3], ("Reset".to_string(), "true".to_string()));
    }
}

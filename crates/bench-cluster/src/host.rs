//! The local node, driven through its bootstrap tool and service manager

use crate::command::{args, run_command, CommandOutput};
use async_trait::async_trait;
use bench_core::{
    ClusterConfig, Error, JoinCredential, NodeConfig, NodeHost, NodeInspection, Result,
};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Bound on short local commands (service queries, link removal)
const SHORT_COMMAND: Duration = Duration::from_secs(30);

/// Bound on `reset`, which may wait for containers to stop
const RESET_COMMAND: Duration = Duration::from_secs(300);

/// Node host for the machine benchctl runs on
#[derive(Debug, Clone)]
pub struct LocalNodeHost {
    config: NodeConfig,
    kubectl: String,
}

impl LocalNodeHost {
    pub fn new(node: &NodeConfig, cluster: &ClusterConfig) -> Self {
        Self {
            config: node.clone(),
            kubectl: cluster.kubectl.clone(),
        }
    }

    async fn run(&self, program: &str, arguments: Vec<String>, limit: Duration) -> Result<CommandOutput> {
        run_command(program, &arguments, None, limit).await
    }

    async fn service_active(&self, service: &str) -> bool {
        match self
            .run(
                &self.config.systemctl,
                args(["is-active", "--quiet", service]),
                SHORT_COMMAND,
            )
            .await
        {
            Ok(output) => output.success(),
            Err(e) => {
                debug!(service, error = %e, "service query failed");
                false
            }
        }
    }

    /// Start a service if it is not already active
    async fn ensure_service(&self, service: &str) -> Result<()> {
        if self.service_active(service).await {
            return Ok(());
        }

        info!(service, "starting service");
        let output = self
            .run(&self.config.systemctl, args(["start", service]), SHORT_COMMAND)
            .await?;
        if !output.success() {
            return Err(Error::join_failed(format!(
                "service {} failed to start: {}",
                service,
                output.diagnostic()
            )));
        }
        Ok(())
    }

    async fn api_healthy(&self) -> bool {
        let admin = self.config.admin_kubeconfig();
        if !path_exists(&admin).await {
            return false;
        }

        let arguments = vec![
            "--kubeconfig".to_string(),
            admin.display().to_string(),
            "--server".to_string(),
            self.config.api_server.clone(),
            "--request-timeout=5s".to_string(),
            "get".to_string(),
            "--raw=/readyz".to_string(),
        ];
        match self.run(&self.kubectl, arguments, SHORT_COMMAND).await {
            Ok(output) => output.success() && output.stdout.trim() == "ok",
            Err(_) => false,
        }
    }

    /// Clear packet filter rules left by the service proxy and pod network.
    /// A missing tool or a failed flush is logged and does not fail reset.
    async fn flush_firewall(&self) {
        for command in &self.config.firewall_flush {
            let Some((program, arguments)) = command.split_first() else {
                continue;
            };
            let line = command.join(" ");
            match self.run(program, arguments.to_vec(), SHORT_COMMAND).await {
                Ok(output) if output.success() => debug!(command = %line, "flushed firewall state"),
                Ok(output) => warn!(command = %line, error = %output.diagnostic(), "firewall flush failed"),
                Err(e) => warn!(command = %line, error = %e, "firewall flush failed"),
            }
        }
    }

    async fn existing(paths: &[PathBuf]) -> Vec<PathBuf> {
        let mut present = Vec::new();
        for path in paths {
            if path_exists(path).await {
                present.push(path.clone());
            }
        }
        present
    }

    /// Remove everything inside `dir`, keeping the directory itself
    async fn clear_dir(dir: &Path) -> Result<()> {
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => {
                return Err(Error::reset_failed(format!("cannot read {}: {}", dir.display(), e)))
            }
        };

        while let Some(entry) = entries.next_entry().await? {
            remove_path(&entry.path()).await?;
        }
        Ok(())
    }
}

async fn path_exists(path: &Path) -> bool {
    tokio::fs::try_exists(path).await.unwrap_or(false)
}

async fn dir_entries(dir: &Path) -> Vec<PathBuf> {
    let mut found = Vec::new();
    if let Ok(mut entries) = tokio::fs::read_dir(dir).await {
        while let Ok(Some(entry)) = entries.next_entry().await {
            found.push(entry.path());
        }
    }
    found.sort();
    found
}

async fn remove_path(path: &Path) -> Result<()> {
    let metadata = match tokio::fs::symlink_metadata(path).await {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(Error::reset_failed(format!("{}: {}", path.display(), e))),
    };

    let result = if metadata.is_dir() {
        tokio::fs::remove_dir_all(path).await
    } else {
        tokio::fs::remove_file(path).await
    };
    result.map_err(|e| Error::reset_failed(format!("cannot remove {}: {}", path.display(), e)))
}

/// Map a failed init or join onto the error taxonomy
pub fn classify_bootstrap(output: &CommandOutput) -> Error {
    let message = output.diagnostic().to_string();
    let lower = message.to_lowercase();

    let token_rejected = (lower.contains("token")
        && (lower.contains("expired") || lower.contains("invalid") || lower.contains("jws")))
        || lower.contains("unauthorized");

    if token_rejected {
        Error::credential_expired(message)
    } else if ["connection refused", "no route to host", "i/o timeout", "connection reset"]
        .iter()
        .any(|needle| lower.contains(needle))
    {
        Error::unreachable(message)
    } else if lower.contains("timed out") || lower.contains("deadline exceeded") {
        Error::timeout(message)
    } else {
        Error::join_failed(message)
    }
}

/// Parse the output of `token create --print-join-command`
pub fn parse_join_command(output: &str, expires_at: DateTime<Utc>) -> Result<JoinCredential> {
    let words: Vec<&str> = output.split_whitespace().collect();
    let after = |flag: &str| {
        words
            .iter()
            .position(|w| *w == flag)
            .and_then(|i| words.get(i + 1))
            .map(|w| w.to_string())
    };

    let malformed = || Error::command(format!("unexpected join command: {}", output.trim()));

    Ok(JoinCredential {
        endpoint: after("join").ok_or_else(malformed)?,
        token: after("--token").ok_or_else(malformed)?,
        ca_cert_hash: after("--discovery-token-ca-cert-hash").ok_or_else(malformed)?,
        expires_at,
    })
}

#[async_trait]
impl NodeHost for LocalNodeHost {
    async fn inspect(&self) -> Result<NodeInspection> {
        Ok(NodeInspection {
            control_plane_files: Self::existing(&self.config.control_plane_markers).await,
            worker_files: Self::existing(&self.config.worker_markers).await,
            cni_files: dir_entries(&self.config.cni_dir).await,
            api_healthy: self.api_healthy().await,
            agent_healthy: self.service_active(&self.config.agent_service).await,
        })
    }

    async fn reset(&self) -> Result<()> {
        info!("resetting node");

        match self
            .run(&self.config.kubeadm, args(["reset", "--force"]), RESET_COMMAND)
            .await
        {
            Ok(output) if output.success() => {}
            Ok(output) => warn!(error = %output.diagnostic(), "bootstrap reset reported an error, cleaning up directly"),
            Err(e) => warn!(error = %e, "bootstrap reset failed, cleaning up directly"),
        }

        match self
            .run(
                &self.config.systemctl,
                args(["stop", self.config.agent_service.as_str()]),
                SHORT_COMMAND,
            )
            .await
        {
            Ok(output) if !output.success() => {
                warn!(error = %output.diagnostic(), "failed to stop node agent")
            }
            Err(e) => warn!(error = %e, "failed to stop node agent"),
            Ok(_) => {}
        }

        Self::clear_dir(&self.config.credential_dir).await?;
        Self::clear_dir(&self.config.cni_dir).await?;
        for path in self
            .config
            .state_paths
            .iter()
            .chain(&self.config.control_plane_markers)
            .chain(&self.config.worker_markers)
        {
            remove_path(path).await?;
        }

        for interface in &self.config.cni_interfaces {
            if let Ok(output) = self
                .run(
                    &self.config.ip,
                    args(["link", "delete", interface.as_str()]),
                    SHORT_COMMAND,
                )
                .await
            {
                if output.success() {
                    debug!(interface = %interface, "removed network interface");
                }
            }
        }

        self.flush_firewall().await;
        Ok(())
    }

    async fn init_control_plane(&self) -> Result<()> {
        self.ensure_service(&self.config.runtime_service).await?;

        info!(pod_network_cidr = %self.config.pod_network_cidr, "initializing control plane");
        let output = self
            .run(
                &self.config.kubeadm,
                vec![
                    "init".to_string(),
                    format!("--pod-network-cidr={}", self.config.pod_network_cidr),
                ],
                self.config.health_wait() + RESET_COMMAND,
            )
            .await?;
        if !output.success() {
            return Err(classify_bootstrap(&output));
        }

        if let Some(manifest) = &self.config.cni_manifest {
            info!(manifest = %manifest, "installing pod network");
            let arguments = vec![
                "--kubeconfig".to_string(),
                self.config.admin_kubeconfig().display().to_string(),
                "apply".to_string(),
                "-f".to_string(),
                manifest.clone(),
            ];
            let output = self.run(&self.kubectl, arguments, RESET_COMMAND).await?;
            if !output.success() {
                return Err(Error::join_failed(format!(
                    "pod network install failed: {}",
                    output.diagnostic()
                )));
            }
        }

        Ok(())
    }

    async fn join(&self, credential: &JoinCredential) -> Result<()> {
        self.ensure_service(&self.config.runtime_service).await?;

        info!(endpoint = %credential.endpoint, token = %credential.redacted_token(), "joining cluster");
        let output = self
            .run(
                &self.config.kubeadm,
                vec![
                    "join".to_string(),
                    credential.endpoint.clone(),
                    "--token".to_string(),
                    credential.token.clone(),
                    "--discovery-token-ca-cert-hash".to_string(),
                    credential.ca_cert_hash.clone(),
                ],
                self.config.health_wait() + RESET_COMMAND,
            )
            .await?;

        if output.success() {
            Ok(())
        } else {
            Err(classify_bootstrap(&output))
        }
    }

    async fn mint_credential(&self, ttl: Duration) -> Result<JoinCredential> {
        let lifetime = chrono::Duration::from_std(ttl)
            .map_err(|e| Error::invalid_request(format!("invalid ttl: {}", e)))?;
        let expires_at = Utc::now() + lifetime;

        let output = self
            .run(
                &self.config.kubeadm,
                vec![
                    "token".to_string(),
                    "create".to_string(),
                    "--ttl".to_string(),
                    format!("{}s", ttl.as_secs()),
                    "--print-join-command".to_string(),
                ],
                SHORT_COMMAND,
            )
            .await?;
        if !output.success() {
            return Err(Error::command(format!(
                "token creation failed: {}",
                output.diagnostic()
            )));
        }

        parse_join_command(&output.stdout, expires_at)
    }

    async fn hostname(&self) -> Result<String> {
        let name = tokio::fs::read_to_string("/proc/sys/kernel/hostname").await?;
        Ok(name.trim().to_lowercase())
    }
}

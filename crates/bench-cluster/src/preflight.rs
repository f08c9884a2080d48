//! Preflight validation of cluster invariants
//!
//! A fixed, named set of checks runs against the live cluster before any
//! workload may be submitted. Checks are read-only unless `autofix` is set,
//! in which case failures with a safe repair (creating the runtime
//! registration or the namespace) are repaired and re-checked. Checks that
//! need operator-private data, like the workload secret, are never repaired.
//!
//! A [`Clearance`] can only be obtained from a report without FAIL checks;
//! the job supervisor requires one.

use bench_core::{retry_transient, ClusterConfig, Error, Orchestrator, PollPolicy, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

pub const CONTROL_PLANE_REACHABLE: &str = "control-plane-reachable";
pub const ACCELERATOR_NODE: &str = "accelerator-node";
pub const RUNTIME_CLASS: &str = "runtime-class";
pub const NAMESPACE: &str = "namespace";
pub const WORKLOAD_SECRET: &str = "workload-secret";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CheckStatus {
    Pass,
    Warn,
    Fail,
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckStatus::Pass => write!(f, "PASS"),
            CheckStatus::Warn => write!(f, "WARN"),
            CheckStatus::Fail => write!(f, "FAIL"),
        }
    }
}

/// Individual check result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResult {
    pub name: String,
    pub status: CheckStatus,
    /// The check failed and was repaired in place
    pub repaired: bool,
    pub message: String,
}

impl CheckResult {
    fn new(name: &str, status: CheckStatus, message: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            status,
            repaired: false,
            message: message.into(),
        }
    }

    fn pass(name: &str, message: impl Into<String>) -> Self {
        Self::new(name, CheckStatus::Pass, message)
    }

    fn warn(name: &str, message: impl Into<String>) -> Self {
        Self::new(name, CheckStatus::Warn, message)
    }

    fn fail(name: &str, message: impl Into<String>) -> Self {
        Self::new(name, CheckStatus::Fail, message)
    }
}

/// Results of one validation pass, in check order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreflightReport {
    pub checks: Vec<CheckResult>,
    pub checked_at: DateTime<Utc>,
}

impl PreflightReport {
    pub fn check(&self, name: &str) -> Option<&CheckResult> {
        self.checks.iter().find(|c| c.name == name)
    }

    pub fn failures(&self) -> impl Iterator<Item = &CheckResult> {
        self.checks.iter().filter(|c| c.status == CheckStatus::Fail)
    }

    pub fn has_failures(&self) -> bool {
        self.failures().next().is_some()
    }

    /// Permission to run workloads, granted only without FAIL checks
    pub fn into_clearance(self) -> Result<Clearance> {
        let failed: Vec<&str> = self.failures().map(|c| c.name.as_str()).collect();
        if !failed.is_empty() {
            return Err(Error::preflight_failed(format!(
                "failing checks: {}",
                failed.join(", ")
            )));
        }
        Ok(Clearance {
            checked_at: self.checked_at,
        })
    }
}

/// Proof that preflight passed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Clearance {
    checked_at: DateTime<Utc>,
}

impl Clearance {
    pub fn checked_at(&self) -> DateTime<Utc> {
        self.checked_at
    }
}

/// Validates cluster invariants before execution
pub struct PreflightValidator {
    orchestrator: Arc<dyn Orchestrator>,
    cluster: ClusterConfig,
    retry: PollPolicy,
}

impl PreflightValidator {
    pub fn new(orchestrator: Arc<dyn Orchestrator>, cluster: ClusterConfig, retry: PollPolicy) -> Self {
        Self {
            orchestrator,
            cluster,
            retry,
        }
    }

    /// Run every check. Orchestrator errors are reported as FAIL results.
    pub async fn validate(&self, autofix: bool) -> PreflightReport {
        let mut checks = Vec::with_capacity(5);

        let reachable = self.check_control_plane().await;
        let skip = reachable.status == CheckStatus::Fail;
        checks.push(reachable);

        if skip {
            for name in [ACCELERATOR_NODE, RUNTIME_CLASS, NAMESPACE, WORKLOAD_SECRET] {
                checks.push(CheckResult::fail(name, "skipped: control plane unreachable"));
            }
        } else {
            checks.push(self.check_accelerator_node().await);
            checks.push(self.check_runtime_class(autofix).await);
            checks.push(self.check_namespace(autofix).await);
            checks.push(self.check_workload_secret().await);
        }

        for check in &checks {
            match check.status {
                CheckStatus::Pass => {
                    info!(check = %check.name, repaired = check.repaired, "preflight check passed")
                }
                CheckStatus::Warn => warn!(check = %check.name, message = %check.message, "preflight warning"),
                CheckStatus::Fail => warn!(check = %check.name, message = %check.message, "preflight check failed"),
            }
        }

        PreflightReport {
            checks,
            checked_at: Utc::now(),
        }
    }

    async fn check_control_plane(&self) -> CheckResult {
        let orch = &self.orchestrator;
        match retry_transient(&self.retry, "probe_health", || orch.probe_health()).await {
            Ok(()) => CheckResult::pass(CONTROL_PLANE_REACHABLE, "control plane answered"),
            Err(e) => CheckResult::fail(CONTROL_PLANE_REACHABLE, e.to_string()),
        }
    }

    async fn check_accelerator_node(&self) -> CheckResult {
        let orch = &self.orchestrator;
        let nodes = match retry_transient(&self.retry, "list_nodes", || orch.list_nodes()).await {
            Ok(nodes) => nodes,
            Err(e) => return CheckResult::fail(ACCELERATOR_NODE, e.to_string()),
        };

        let advertising: Vec<_> = nodes
            .iter()
            .filter(|n| n.ready && n.accelerators > 0)
            .collect();
        if advertising.is_empty() {
            return CheckResult::fail(
                ACCELERATOR_NODE,
                format!(
                    "no Ready node advertises {} ({} nodes registered)",
                    self.cluster.accelerator_resource,
                    nodes.len()
                ),
            );
        }

        let label = &self.cluster.accelerator_label;
        let labelled = advertising
            .iter()
            .filter(|n| n.labels.get(&label.key) == Some(&label.value))
            .count();
        if labelled == 0 {
            return CheckResult::warn(
                ACCELERATOR_NODE,
                format!(
                    "{} node(s) advertise {} but none is labelled {}={}",
                    advertising.len(),
                    self.cluster.accelerator_resource,
                    label.key,
                    label.value
                ),
            );
        }

        CheckResult::pass(
            ACCELERATOR_NODE,
            format!("{} accelerator node(s) ready", labelled),
        )
    }

    async fn check_runtime_class(&self, autofix: bool) -> CheckResult {
        let orch = &self.orchestrator;
        let name = self.cluster.runtime_class.as_str();

        match retry_transient(&self.retry, "runtime_class_exists", || orch.runtime_class_exists(name)).await {
            Ok(true) => return CheckResult::pass(RUNTIME_CLASS, format!("runtime class {} registered", name)),
            Ok(false) if !autofix => {
                return CheckResult::fail(RUNTIME_CLASS, format!("runtime class {} is not registered", name))
            }
            Ok(false) => {}
            Err(e) => return CheckResult::fail(RUNTIME_CLASS, e.to_string()),
        }

        let handler = self.cluster.runtime_handler.as_str();
        info!(runtime_class = name, handler, "registering runtime class");
        let created = retry_transient(&self.retry, "create_runtime_class", || {
            orch.create_runtime_class(name, handler)
        })
        .await;
        if let Err(e) = created {
            if !matches!(e, Error::AlreadyExists(_)) {
                return CheckResult::fail(RUNTIME_CLASS, format!("repair failed: {}", e));
            }
        }

        self.recheck(RUNTIME_CLASS, || orch.runtime_class_exists(name)).await
    }

    async fn check_namespace(&self, autofix: bool) -> CheckResult {
        let orch = &self.orchestrator;
        let name = self.cluster.namespace.as_str();

        match retry_transient(&self.retry, "namespace_exists", || orch.namespace_exists(name)).await {
            Ok(true) => return CheckResult::pass(NAMESPACE, format!("namespace {} present", name)),
            Ok(false) if !autofix => {
                return CheckResult::fail(NAMESPACE, format!("namespace {} does not exist", name))
            }
            Ok(false) => {}
            Err(e) => return CheckResult::fail(NAMESPACE, e.to_string()),
        }

        info!(namespace = name, "creating namespace");
        let created = retry_transient(&self.retry, "create_namespace", || orch.create_namespace(name)).await;
        if let Err(e) = created {
            if !matches!(e, Error::AlreadyExists(_)) {
                return CheckResult::fail(NAMESPACE, format!("repair failed: {}", e));
            }
        }

        self.recheck(NAMESPACE, || orch.namespace_exists(name)).await
    }

    async fn check_workload_secret(&self) -> CheckResult {
        let orch = &self.orchestrator;
        let name = self.cluster.secret_name.as_str();
        let key = self.cluster.secret_key.as_str();

        match retry_transient(&self.retry, "get_secret_value", || orch.get_secret_value(name, key)).await {
            Ok(None) => CheckResult::fail(
                WORKLOAD_SECRET,
                format!("secret {} with key {} is missing; create it with the workload credential", name, key),
            ),
            Ok(Some(value)) if self.cluster.is_placeholder(&value) => CheckResult::fail(
                WORKLOAD_SECRET,
                format!("secret {} still holds a placeholder value", name),
            ),
            Ok(Some(_)) => CheckResult::pass(WORKLOAD_SECRET, format!("secret {} present", name)),
            Err(e) => CheckResult::fail(WORKLOAD_SECRET, e.to_string()),
        }
    }

    /// Re-run an existence probe after a repair
    async fn recheck<F, Fut>(&self, name: &str, probe: F) -> CheckResult
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<bool>>,
    {
        match retry_transient(&self.retry, name, probe).await {
            Ok(true) => {
                let mut result = CheckResult::pass(name, "repaired");
                result.repaired = true;
                result
            }
            Ok(false) => CheckResult::fail(name, "repair did not take effect"),
            Err(e) => CheckResult::fail(name, e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bench_core::NodeInfo;
    use bench_dev::MockOrchestrator;
    use std::time::Duration;

    fn validator(orch: &MockOrchestrator) -> PreflightValidator {
        PreflightValidator::new(
            Arc::new(orch.clone()),
            ClusterConfig::default(),
            PollPolicy::fixed(Duration::from_millis(10)).with_max_attempts(2),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_ready_cluster_passes() {
        let orch = MockOrchestrator::ready(&ClusterConfig::default());
        let report = validator(&orch).validate(false).await;

        assert_eq!(report.checks.len(), 5);
        assert!(report.checks.iter().all(|c| c.status == CheckStatus::Pass));
        assert!(report.into_clearance().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreachable_fails_every_check() {
        let orch = MockOrchestrator::ready(&ClusterConfig::default());
        orch.set_reachable(false).await;
        let report = validator(&orch).validate(true).await;

        assert_eq!(report.failures().count(), 5);
        assert_eq!(orch.mutation_count().await, 0);
        assert!(matches!(report.into_clearance(), Err(Error::PreflightFailed(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_placeholder_secret_is_never_repaired() {
        let config = ClusterConfig::default();
        let orch = MockOrchestrator::ready(&config);
        orch.set_secret(&config.secret_name, &config.secret_key, "changeme").await;

        let report = validator(&orch).validate(true).await;
        let secret = report.check(WORKLOAD_SECRET).unwrap();
        assert_eq!(secret.status, CheckStatus::Fail);
        assert!(!secret.repaired);
        assert_eq!(orch.mutation_count().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_secret_fails() {
        let config = ClusterConfig::default();
        let orch = MockOrchestrator::ready(&config);
        orch.remove_secret(&config.secret_name).await;

        let report = validator(&orch).validate(true).await;
        assert_eq!(report.check(WORKLOAD_SECRET).unwrap().status, CheckStatus::Fail);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unlabelled_accelerator_node_warns() {
        let orch = MockOrchestrator::empty("benchmarks");
        orch.add_node(NodeInfo {
            name: "gpu-2".to_string(),
            ready: true,
            accelerators: 4,
            ..Default::default()
        })
        .await;

        let report = validator(&orch).validate(false).await;
        assert_eq!(report.check(ACCELERATOR_NODE).unwrap().status, CheckStatus::Warn);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_accelerator_node_fails() {
        let orch = MockOrchestrator::ready(&ClusterConfig::default());
        orch.clear_nodes().await;
        let report = validator(&orch).validate(true).await;
        assert_eq!(report.check(ACCELERATOR_NODE).unwrap().status, CheckStatus::Fail);
    }
}

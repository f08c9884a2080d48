//! In-memory orchestrator with scripted job lifecycles

use async_trait::async_trait;
use bench_core::{
    ClusterConfig, Error, JobManifest, JobStatus, NodeInfo, Orchestrator, PodPhase, PodStatus,
    Result,
};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::debug;

/// How a submitted job behaves
#[derive(Debug, Clone, PartialEq)]
pub enum MockOutcome {
    /// Runs, then completes successfully
    Succeed,
    /// Runs, then fails with the given exit code
    Fail { exit_code: i32 },
    /// The pod is never placed; the scheduler reports this message
    Unschedulable(String),
    /// The pod stays Pending without a scheduling verdict
    NeverStarts,
    /// Runs forever
    Hang,
}

/// Scripted lifecycle for every job submitted under one name
#[derive(Debug, Clone)]
pub struct MockJobPlan {
    pub outcome: MockOutcome,
    /// Pod checks reporting Pending before the pod starts running
    pub pending_checks: u32,
    /// Job status checks reporting active before the job finishes
    pub running_checks: u32,
    /// Further status checks the job stays active after its pod has finished
    pub status_lag: u32,
    /// Output delivered by the log stream
    pub logs: Vec<String>,
}

impl MockJobPlan {
    pub fn succeed(logs: Vec<String>) -> Self {
        Self {
            outcome: MockOutcome::Succeed,
            pending_checks: 1,
            running_checks: 2,
            status_lag: 0,
            logs,
        }
    }

    pub fn fail(exit_code: i32, logs: Vec<String>) -> Self {
        Self {
            outcome: MockOutcome::Fail { exit_code },
            ..Self::succeed(logs)
        }
    }

    pub fn unschedulable(message: impl Into<String>) -> Self {
        Self {
            outcome: MockOutcome::Unschedulable(message.into()),
            ..Self::succeed(Vec::new())
        }
    }

    pub fn never_starts() -> Self {
        Self {
            outcome: MockOutcome::NeverStarts,
            ..Self::succeed(Vec::new())
        }
    }

    pub fn hang(logs: Vec<String>) -> Self {
        Self {
            outcome: MockOutcome::Hang,
            ..Self::succeed(logs)
        }
    }

    pub fn with_pending_checks(mut self, checks: u32) -> Self {
        self.pending_checks = checks;
        self
    }

    pub fn with_running_checks(mut self, checks: u32) -> Self {
        self.running_checks = checks;
        self
    }

    /// Let the pod reach its terminal phase `checks` status checks before
    /// the job reports it; `u32::MAX` keeps the job active forever
    pub fn with_status_lag(mut self, checks: u32) -> Self {
        self.status_lag = checks;
        self
    }
}

impl Default for MockJobPlan {
    fn default() -> Self {
        Self::succeed(Vec::new())
    }
}

#[derive(Debug)]
struct MockJob {
    plan: MockJobPlan,
    pod: String,
    pod_checks: u32,
    status_checks: u32,
    started: bool,
    /// Status checks left before a deleted job disappears
    deleting: Option<u32>,
}

impl MockJob {
    fn completes(&self) -> bool {
        self.started
            && matches!(
                self.plan.outcome,
                MockOutcome::Succeed | MockOutcome::Fail { .. }
            )
    }

    fn pod_finished(&self) -> bool {
        self.completes() && self.status_checks > self.plan.running_checks
    }

    fn job_finished(&self) -> bool {
        self.completes()
            && self.status_checks > self.plan.running_checks.saturating_add(self.plan.status_lag)
    }

    fn pod_status(&self) -> PodStatus {
        let mut status = PodStatus::new(&self.pod, PodPhase::Pending);
        match &self.plan.outcome {
            MockOutcome::Unschedulable(message) => {
                status.unschedulable = Some(message.clone());
                return status;
            }
            MockOutcome::NeverStarts => {
                status.waiting_reason = Some("ContainerCreating".to_string());
                return status;
            }
            _ => {}
        }

        if !self.started {
            return status;
        }

        status.phase = PodPhase::Running;
        if self.pod_finished() {
            match self.plan.outcome {
                MockOutcome::Fail { exit_code } => {
                    status.phase = PodPhase::Failed;
                    status.exit_code = Some(exit_code);
                }
                _ => {
                    status.phase = PodPhase::Succeeded;
                    status.exit_code = Some(0);
                }
            }
        }
        status
    }
}

#[derive(Debug, Default)]
struct MockState {
    reachable: bool,
    namespace: String,
    create_failures: u32,
    nodes: Vec<NodeInfo>,
    runtime_classes: BTreeMap<String, String>,
    namespaces: BTreeSet<String>,
    secrets: BTreeMap<(String, String), String>,
    config_maps: BTreeMap<String, BTreeMap<String, String>>,
    jobs: BTreeMap<String, MockJob>,
    plans: BTreeMap<String, MockJobPlan>,
    submitted: Vec<JobManifest>,
    deletion_checks: u32,
    stuck_deletions: bool,
    mutations: u32,
    conflicts: u32,
    pod_counter: u32,
    events: Vec<String>,
}

impl MockState {
    fn check_reachable(&self) -> Result<()> {
        if self.reachable {
            Ok(())
        } else {
            Err(Error::unreachable("mock control plane is down"))
        }
    }

    fn job_for_pod(&self, pod: &str) -> Option<&MockJob> {
        self.jobs.values().find(|job| job.pod == pod)
    }
}

/// Mock orchestrator that simulates a cluster in memory
#[derive(Debug, Clone)]
pub struct MockOrchestrator {
    inner: Arc<RwLock<MockState>>,
}

impl MockOrchestrator {
    /// Reachable cluster with nothing in it
    pub fn empty(namespace: &str) -> Self {
        Self::from_state(MockState {
            reachable: true,
            namespace: namespace.to_string(),
            ..Default::default()
        })
    }

    /// Cluster satisfying every preflight check for `config`
    pub fn ready(config: &ClusterConfig) -> Self {
        let mut state = MockState {
            reachable: true,
            namespace: config.namespace.clone(),
            ..Default::default()
        };

        let mut labels = BTreeMap::new();
        labels.insert(
            config.accelerator_label.key.clone(),
            config.accelerator_label.value.clone(),
        );
        state.nodes.push(NodeInfo {
            name: "gpu-node-1".to_string(),
            ready: true,
            accelerators: 1,
            labels,
            taints: Vec::new(),
        });
        state
            .runtime_classes
            .insert(config.runtime_class.clone(), config.runtime_handler.clone());
        state.namespaces.insert(config.namespace.clone());
        state.secrets.insert(
            (config.secret_name.clone(), config.secret_key.clone()),
            "hf_mockTokenValue0123456789".to_string(),
        );

        Self::from_state(state)
    }

    fn from_state(state: MockState) -> Self {
        Self {
            inner: Arc::new(RwLock::new(state)),
        }
    }

    pub async fn set_reachable(&self, reachable: bool) {
        self.inner.write().await.reachable = reachable;
    }

    /// Make the next `count` job submissions fail as unreachable
    pub async fn fail_next_creates(&self, count: u32) {
        self.inner.write().await.create_failures = count;
    }

    pub async fn add_node(&self, node: NodeInfo) {
        self.inner.write().await.nodes.push(node);
    }

    pub async fn clear_nodes(&self) {
        self.inner.write().await.nodes.clear();
    }

    pub async fn remove_runtime_class(&self, name: &str) {
        self.inner.write().await.runtime_classes.remove(name);
    }

    pub async fn remove_namespace(&self, name: &str) {
        self.inner.write().await.namespaces.remove(name);
    }

    pub async fn set_secret(&self, name: &str, key: &str, value: &str) {
        self.inner
            .write()
            .await
            .secrets
            .insert((name.to_string(), key.to_string()), value.to_string());
    }

    pub async fn remove_secret(&self, name: &str) {
        self.inner.write().await.secrets.retain(|(n, _), _| n != name);
    }

    /// Script every future submission of `job`
    pub async fn plan_job(&self, job: &str, plan: MockJobPlan) {
        self.inner.write().await.plans.insert(job.to_string(), plan);
    }

    /// Status checks a deleted job remains visible for
    pub async fn set_deletion_checks(&self, checks: u32) {
        self.inner.write().await.deletion_checks = checks;
    }

    /// Deleted jobs never disappear
    pub async fn set_stuck_deletions(&self, stuck: bool) {
        self.inner.write().await.stuck_deletions = stuck;
    }

    /// Place a running instance of `job`, as left behind by an earlier invocation
    pub async fn insert_live_job(&self, job: &str) {
        let mut state = self.inner.write().await;
        state.pod_counter += 1;
        let pod = format!("{}-stale{}", job, state.pod_counter);
        state.jobs.insert(
            job.to_string(),
            MockJob {
                plan: MockJobPlan::hang(Vec::new()),
                pod,
                pod_checks: 0,
                status_checks: 0,
                started: true,
                deleting: None,
            },
        );
    }

    pub async fn push_event(&self, event: impl Into<String>) {
        self.inner.write().await.events.push(event.into());
    }

    /// Number of mutating calls received
    pub async fn mutation_count(&self) -> u32 {
        self.inner.read().await.mutations
    }

    /// Number of submissions rejected because an instance was still live
    pub async fn conflict_count(&self) -> u32 {
        self.inner.read().await.conflicts
    }

    /// Every accepted submission, in order
    pub async fn submitted(&self) -> Vec<JobManifest> {
        self.inner.read().await.submitted.clone()
    }

    /// Names of jobs currently present
    pub async fn live_jobs(&self) -> Vec<String> {
        self.inner.read().await.jobs.keys().cloned().collect()
    }

    pub async fn has_runtime_class(&self, name: &str) -> bool {
        self.inner.read().await.runtime_classes.contains_key(name)
    }

    pub async fn has_namespace(&self, name: &str) -> bool {
        self.inner.read().await.namespaces.contains(name)
    }

    pub async fn config_map(&self, name: &str) -> Option<BTreeMap<String, String>> {
        self.inner.read().await.config_maps.get(name).cloned()
    }

    pub async fn node(&self, name: &str) -> Option<NodeInfo> {
        self.inner
            .read()
            .await
            .nodes
            .iter()
            .find(|n| n.name == name)
            .cloned()
    }
}

#[async_trait]
impl Orchestrator for MockOrchestrator {
    async fn probe_health(&self) -> Result<()> {
        self.inner.read().await.check_reachable()
    }

    async fn list_nodes(&self) -> Result<Vec<NodeInfo>> {
        let state = self.inner.read().await;
        state.check_reachable()?;
        Ok(state.nodes.clone())
    }

    async fn label_node(&self, node: &str, key: &str, value: &str) -> Result<()> {
        let mut state = self.inner.write().await;
        state.check_reachable()?;
        state.mutations += 1;
        let entry = state
            .nodes
            .iter_mut()
            .find(|n| n.name == node)
            .ok_or_else(|| Error::not_found(format!("node {}", node)))?;
        entry.labels.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove_taint(&self, node: &str, key: &str) -> Result<()> {
        let mut state = self.inner.write().await;
        state.check_reachable()?;
        state.mutations += 1;
        if let Some(entry) = state.nodes.iter_mut().find(|n| n.name == node) {
            entry.taints.retain(|t| t != key);
        }
        Ok(())
    }

    async fn delete_node(&self, node: &str) -> Result<()> {
        let mut state = self.inner.write().await;
        state.check_reachable()?;
        state.mutations += 1;
        state.nodes.retain(|n| n.name != node);
        Ok(())
    }

    async fn runtime_class_exists(&self, name: &str) -> Result<bool> {
        let state = self.inner.read().await;
        state.check_reachable()?;
        Ok(state.runtime_classes.contains_key(name))
    }

    async fn create_runtime_class(&self, name: &str, handler: &str) -> Result<()> {
        let mut state = self.inner.write().await;
        state.check_reachable()?;
        state.mutations += 1;
        if state.runtime_classes.contains_key(name) {
            return Err(Error::already_exists(format!("runtimeclass {}", name)));
        }
        state
            .runtime_classes
            .insert(name.to_string(), handler.to_string());
        Ok(())
    }

    async fn namespace_exists(&self, name: &str) -> Result<bool> {
        let state = self.inner.read().await;
        state.check_reachable()?;
        Ok(state.namespaces.contains(name))
    }

    async fn create_namespace(&self, name: &str) -> Result<()> {
        let mut state = self.inner.write().await;
        state.check_reachable()?;
        state.mutations += 1;
        if !state.namespaces.insert(name.to_string()) {
            return Err(Error::already_exists(format!("namespace {}", name)));
        }
        Ok(())
    }

    async fn get_secret_value(&self, name: &str, key: &str) -> Result<Option<String>> {
        let state = self.inner.read().await;
        state.check_reachable()?;
        Ok(state
            .secrets
            .get(&(name.to_string(), key.to_string()))
            .cloned())
    }

    async fn create_config_map(&self, name: &str, data: &BTreeMap<String, String>) -> Result<()> {
        let mut state = self.inner.write().await;
        state.check_reachable()?;
        state.mutations += 1;
        state.config_maps.insert(name.to_string(), data.clone());
        Ok(())
    }

    async fn delete_config_map(&self, name: &str) -> Result<()> {
        let mut state = self.inner.write().await;
        state.check_reachable()?;
        state.mutations += 1;
        state.config_maps.remove(name);
        Ok(())
    }

    async fn create_job(&self, manifest: &JobManifest) -> Result<()> {
        let mut state = self.inner.write().await;
        state.check_reachable()?;

        if state.create_failures > 0 {
            state.create_failures -= 1;
            return Err(Error::unreachable("mock create_job connection reset"));
        }

        state.mutations += 1;
        if manifest.namespace != state.namespace {
            return Err(Error::invalid_request(format!(
                "namespace {} does not match {}",
                manifest.namespace, state.namespace
            )));
        }
        if state.jobs.contains_key(&manifest.name) {
            state.conflicts += 1;
            return Err(Error::already_exists(format!("job {}", manifest.name)));
        }

        state.pod_counter += 1;
        let pod = format!("{}-pod{}", manifest.name, state.pod_counter);
        let plan = state.plans.get(&manifest.name).cloned().unwrap_or_default();
        debug!(job = %manifest.name, pod = %pod, outcome = ?plan.outcome, "mock job created");

        state.jobs.insert(
            manifest.name.clone(),
            MockJob {
                plan,
                pod,
                pod_checks: 0,
                status_checks: 0,
                started: false,
                deleting: None,
            },
        );
        state.submitted.push(manifest.clone());
        Ok(())
    }

    async fn get_job(&self, name: &str) -> Result<Option<JobStatus>> {
        let mut state = self.inner.write().await;
        state.check_reachable()?;
        let stuck = state.stuck_deletions;

        let Some(job) = state.jobs.get_mut(name) else {
            return Ok(None);
        };

        if let Some(remaining) = job.deleting {
            if remaining == 0 && !stuck {
                state.jobs.remove(name);
                return Ok(None);
            }
            job.deleting = Some(remaining.saturating_sub(1));
            return Ok(Some(JobStatus {
                active: 1,
                ..Default::default()
            }));
        }

        if job.started {
            job.status_checks += 1;
        }

        let status = if job.job_finished() {
            match job.plan.outcome {
                MockOutcome::Fail { exit_code } => JobStatus {
                    failed: 1,
                    failure_reason: Some(format!("BackoffLimitExceeded (exit {})", exit_code)),
                    ..Default::default()
                },
                _ => JobStatus {
                    succeeded: 1,
                    ..Default::default()
                },
            }
        } else {
            JobStatus {
                active: 1,
                ..Default::default()
            }
        };
        Ok(Some(status))
    }

    async fn delete_job(&self, name: &str) -> Result<()> {
        let mut state = self.inner.write().await;
        state.check_reachable()?;
        state.mutations += 1;
        let checks = state.deletion_checks;
        if let Some(job) = state.jobs.get_mut(name) {
            if job.deleting.is_none() {
                job.deleting = Some(checks);
            }
        }
        Ok(())
    }

    async fn list_pods(&self, job: &str) -> Result<Vec<PodStatus>> {
        let mut state = self.inner.write().await;
        state.check_reachable()?;

        let Some(entry) = state.jobs.get_mut(job) else {
            return Ok(Vec::new());
        };
        if entry.deleting.is_some() {
            return Ok(Vec::new());
        }

        entry.pod_checks += 1;
        let schedulable = matches!(
            entry.plan.outcome,
            MockOutcome::Succeed | MockOutcome::Fail { .. } | MockOutcome::Hang
        );
        if schedulable && entry.pod_checks > entry.plan.pending_checks {
            entry.started = true;
        }
        Ok(vec![entry.pod_status()])
    }

    async fn stream_logs(&self, pod: &str, sender: mpsc::Sender<String>) -> Result<()> {
        let (lines, hang) = {
            let state = self.inner.read().await;
            state.check_reachable()?;
            let job = state
                .job_for_pod(pod)
                .ok_or_else(|| Error::not_found(format!("pod {}", pod)))?;
            (job.plan.logs.clone(), job.plan.outcome == MockOutcome::Hang)
        };

        for line in lines {
            if sender.send(line).await.is_err() {
                return Ok(());
            }
        }

        if hang {
            std::future::pending::<()>().await;
        }
        Ok(())
    }

    async fn describe_pod(&self, pod: &str) -> Result<String> {
        let state = self.inner.read().await;
        state.check_reachable()?;
        let job = state
            .job_for_pod(pod)
            .ok_or_else(|| Error::not_found(format!("pod {}", pod)))?;
        let status = job.pod_status();
        Ok(format!(
            "Name: {}\nNamespace: {}\nStatus: {:?}\nExit Code: {}\n",
            status.name,
            state.namespace,
            status.phase,
            status
                .exit_code
                .map(|c| c.to_string())
                .unwrap_or_else(|| "-".to_string())
        ))
    }

    async fn recent_events(&self, limit: u32) -> Result<Vec<String>> {
        let state = self.inner.read().await;
        state.check_reachable()?;
        let skip = state.events.len().saturating_sub(limit as usize);
        Ok(state.events.iter().skip(skip).cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest(name: &str) -> JobManifest {
        JobManifest {
            name: name.to_string(),
            namespace: "benchmarks".to_string(),
            document: format!("metadata:\n  name: {}\n", name),
        }
    }

    #[tokio::test]
    async fn test_scripted_success() {
        let orch = MockOrchestrator::ready(&ClusterConfig::default());
        orch.plan_job("demo", MockJobPlan::succeed(vec!["hello".to_string()]))
            .await;
        orch.create_job(&manifest("demo")).await.unwrap();

        let pods = orch.list_pods("demo").await.unwrap();
        assert_eq!(pods[0].phase, PodPhase::Pending);
        let pods = orch.list_pods("demo").await.unwrap();
        assert_eq!(pods[0].phase, PodPhase::Running);

        let mut finished = false;
        for _ in 0..5 {
            if orch.get_job("demo").await.unwrap().unwrap().is_succeeded() {
                finished = true;
                break;
            }
        }
        assert!(finished);
    }

    #[tokio::test]
    async fn test_status_lag_finishes_pod_before_job() {
        let orch = MockOrchestrator::ready(&ClusterConfig::default());
        orch.plan_job(
            "demo",
            MockJobPlan::succeed(Vec::new())
                .with_pending_checks(0)
                .with_running_checks(0)
                .with_status_lag(1),
        )
        .await;
        orch.create_job(&manifest("demo")).await.unwrap();
        assert_eq!(orch.list_pods("demo").await.unwrap()[0].phase, PodPhase::Running);

        let status = orch.get_job("demo").await.unwrap().unwrap();
        assert!(!status.is_finished());
        assert_eq!(orch.list_pods("demo").await.unwrap()[0].phase, PodPhase::Succeeded);
        assert!(orch.get_job("demo").await.unwrap().unwrap().is_succeeded());
    }

    #[tokio::test]
    async fn test_duplicate_create_is_a_conflict() {
        let orch = MockOrchestrator::ready(&ClusterConfig::default());
        orch.create_job(&manifest("demo")).await.unwrap();
        let err = orch.create_job(&manifest("demo")).await.unwrap_err();
        assert!(matches!(err, Error::AlreadyExists(_)));
        assert_eq!(orch.conflict_count().await, 1);
    }

    #[tokio::test]
    async fn test_deletion_is_observed_later() {
        let orch = MockOrchestrator::ready(&ClusterConfig::default());
        orch.set_deletion_checks(2).await;
        orch.insert_live_job("demo").await;

        orch.delete_job("demo").await.unwrap();
        assert!(orch.get_job("demo").await.unwrap().is_some());
        assert!(orch.get_job("demo").await.unwrap().is_some());
        assert!(orch.get_job("demo").await.unwrap().is_none());
        assert!(orch.live_jobs().await.is_empty());
    }

    #[tokio::test]
    async fn test_unreachable() {
        let orch = MockOrchestrator::ready(&ClusterConfig::default());
        orch.set_reachable(false).await;
        assert!(orch.probe_health().await.unwrap_err().is_retryable());
        assert!(orch.list_nodes().await.is_err());
    }
}

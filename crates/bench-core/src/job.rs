//! Benchmark job specifications and job runs

use crate::{Error, MetricRecord, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use uuid::Uuid;

/// Maximum job name length; leaves room for the suffixes the orchestrator
/// appends to pod and config map names.
const MAX_JOB_NAME_LEN: usize = 52;

/// Full or reduced ("smoke") data volume
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    Smoke,
    Full,
}

impl std::str::FromStr for RunMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "smoke" => Ok(RunMode::Smoke),
            "full" => Ok(RunMode::Full),
            _ => Err(format!("Unknown run mode: {}", s)),
        }
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunMode::Smoke => write!(f, "smoke"),
            RunMode::Full => write!(f, "full"),
        }
    }
}

/// Opaque container workload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkloadRef {
    /// Container image
    pub image: String,

    /// Entrypoint override
    #[serde(default)]
    pub command: Vec<String>,

    /// Arguments to the entrypoint
    #[serde(default)]
    pub args: Vec<String>,

    /// Extra environment variables
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Local script shipped to the workload through a config map
    #[serde(default)]
    pub script: Option<PathBuf>,
}

/// Resources requested for the workload's execution unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceRequirements {
    /// Number of accelerator devices
    pub accelerators: u32,

    /// Memory request and limit (e.g. "32Gi")
    pub memory: String,
}

impl Default for ResourceRequirements {
    fn default() -> Self {
        Self {
            accelerators: 1,
            memory: "32Gi".to_string(),
        }
    }
}

/// A single benchmark workload to submit. `name` is the unique key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkJobSpec {
    pub name: String,

    /// Benchmark kind selecting extraction rules and thresholds
    pub kind: String,

    pub workload: WorkloadRef,

    #[serde(default)]
    pub resources: ResourceRequirements,

    /// Node labels the execution unit must be placed on
    #[serde(default)]
    pub node_selector: BTreeMap<String, String>,

    /// Wall-clock bound for scheduling and execution combined
    pub timeout_secs: u64,

    pub mode: RunMode,

    /// Reduced sample count; `None` runs the full data volume
    #[serde(default)]
    pub sample_count: Option<u32>,
}

impl BenchmarkJobSpec {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Environment variables carrying the sample count to the workload
    pub fn sample_env(&self) -> BTreeMap<String, String> {
        let mut env = BTreeMap::new();
        match self.sample_count {
            Some(count) => {
                env.insert("SAMPLE_COUNT".to_string(), count.to_string());
                env.insert("SAMPLE_SPLIT".to_string(), format!("[:{}]", count));
            }
            None => {
                env.insert("SAMPLE_SPLIT".to_string(), String::new());
            }
        }
        env
    }

    /// Validate the spec before submission
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() || self.name.len() > MAX_JOB_NAME_LEN {
            return Err(Error::invalid_request(format!(
                "job name must be 1-{} characters: {:?}",
                MAX_JOB_NAME_LEN, self.name
            )));
        }

        let valid_chars = self
            .name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
        if !valid_chars || self.name.starts_with('-') || self.name.ends_with('-') {
            return Err(Error::invalid_request(format!(
                "job name must be a lowercase DNS label: {:?}",
                self.name
            )));
        }

        if self.workload.image.trim().is_empty() {
            return Err(Error::invalid_request(format!("job {} has no image", self.name)));
        }

        if self.timeout_secs == 0 {
            return Err(Error::invalid_request(format!("job {} has a zero timeout", self.name)));
        }

        if self.mode == RunMode::Full && self.sample_count.is_some() {
            return Err(Error::invalid_request(format!(
                "job {} is in full mode but carries a sample count",
                self.name
            )));
        }

        Ok(())
    }
}

/// Lifecycle of a job run.
///
/// `Pending -> {Unschedulable | PodStartTimeout | Running}`,
/// `Running -> {Succeeded | ExecutionFailed | TimedOut}`. `TimedOut` and
/// `OrchestratorUnreachable` may also end a pending run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending,
    Running,
    Succeeded,
    Unschedulable,
    PodStartTimeout,
    ExecutionFailed,
    TimedOut,
    OrchestratorUnreachable,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobState::Pending | JobState::Running)
    }

    pub fn is_success(&self) -> bool {
        matches!(self, JobState::Succeeded)
    }

    fn rank(&self) -> u8 {
        match self {
            JobState::Pending => 0,
            JobState::Running => 1,
            _ => 2,
        }
    }

    /// Whether `next` is reachable from `self` without revisiting a state
    pub fn can_advance_to(&self, next: JobState) -> bool {
        if self.is_terminal() || next.rank() <= self.rank() {
            return false;
        }
        // Scheduling verdicts only make sense before the unit ran.
        !(matches!(self, JobState::Running)
            && matches!(next, JobState::Unschedulable | JobState::PodStartTimeout))
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobState::Pending => "Pending",
            JobState::Running => "Running",
            JobState::Succeeded => "Succeeded",
            JobState::Unschedulable => "Unschedulable",
            JobState::PodStartTimeout => "PodStartTimeout",
            JobState::ExecutionFailed => "ExecutionFailed",
            JobState::TimedOut => "TimedOut",
            JobState::OrchestratorUnreachable => "OrchestratorUnreachable",
        };
        write!(f, "{}", s)
    }
}

/// One execution attempt of a named benchmark, from submission to terminal state.
///
/// Attachments and state changes are rejected once the run is terminal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRun {
    pub id: Uuid,
    pub job_name: String,
    pub kind: String,
    pub spec: BenchmarkJobSpec,
    pub submitted_at: DateTime<Utc>,
    /// Directory holding this run's artifacts
    pub artifact_dir: PathBuf,
    state: JobState,
    finished_at: Option<DateTime<Utc>>,
    pod: Option<String>,
    manifest_path: Option<PathBuf>,
    log_path: Option<PathBuf>,
    metrics: Option<MetricRecord>,
    diagnostics_path: Option<PathBuf>,
    message: Option<String>,
}

impl JobRun {
    pub fn new(spec: &BenchmarkJobSpec, artifact_dir: impl Into<PathBuf>) -> Self {
        Self::with_id(Uuid::new_v4(), spec, artifact_dir)
    }

    pub fn with_id(id: Uuid, spec: &BenchmarkJobSpec, artifact_dir: impl Into<PathBuf>) -> Self {
        Self {
            id,
            job_name: spec.name.clone(),
            kind: spec.kind.clone(),
            spec: spec.clone(),
            submitted_at: Utc::now(),
            artifact_dir: artifact_dir.into(),
            state: JobState::Pending,
            finished_at: None,
            pod: None,
            manifest_path: None,
            log_path: None,
            metrics: None,
            diagnostics_path: None,
            message: None,
        }
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    pub fn pod(&self) -> Option<&str> {
        self.pod.as_deref()
    }

    pub fn manifest_path(&self) -> Option<&Path> {
        self.manifest_path.as_deref()
    }

    pub fn log_path(&self) -> Option<&Path> {
        self.log_path.as_deref()
    }

    pub fn metrics(&self) -> Option<&MetricRecord> {
        self.metrics.as_ref()
    }

    pub fn diagnostics_path(&self) -> Option<&Path> {
        self.diagnostics_path.as_deref()
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// Wall-clock time from submission to the terminal state
    pub fn duration(&self) -> Option<chrono::Duration> {
        self.finished_at.map(|end| end - self.submitted_at)
    }

    /// Move to `next`, rejecting regressions and changes after a terminal state
    pub fn advance(&mut self, next: JobState) -> Result<()> {
        if !self.state.can_advance_to(next) {
            return Err(Error::invalid_request(format!(
                "job run {} cannot move from {} to {}",
                self.id, self.state, next
            )));
        }
        self.state = next;
        if next.is_terminal() {
            self.finished_at = Some(Utc::now());
        }
        Ok(())
    }

    /// Move to a terminal state with an explanatory message
    pub fn finish(&mut self, next: JobState, message: impl Into<String>) -> Result<()> {
        if !next.is_terminal() {
            return Err(Error::invalid_request(format!("{} is not a terminal state", next)));
        }
        self.ensure_open()?;
        self.message = Some(message.into());
        self.advance(next)
    }

    pub fn set_pod(&mut self, pod: impl Into<String>) -> Result<()> {
        self.ensure_open()?;
        self.pod = Some(pod.into());
        Ok(())
    }

    pub fn set_manifest_path(&mut self, path: impl Into<PathBuf>) -> Result<()> {
        self.ensure_open()?;
        self.manifest_path = Some(path.into());
        Ok(())
    }

    pub fn set_log_path(&mut self, path: impl Into<PathBuf>) -> Result<()> {
        self.ensure_open()?;
        self.log_path = Some(path.into());
        Ok(())
    }

    pub fn attach_metrics(&mut self, metrics: MetricRecord) -> Result<()> {
        self.ensure_open()?;
        self.metrics = Some(metrics);
        Ok(())
    }

    pub fn attach_diagnostics(&mut self, path: impl Into<PathBuf>) -> Result<()> {
        self.ensure_open()?;
        self.diagnostics_path = Some(path.into());
        Ok(())
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_terminal() {
            return Err(Error::invalid_request(format!(
                "job run {} is terminal ({})",
                self.id, self.state
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> BenchmarkJobSpec {
        BenchmarkJobSpec {
            name: "mlperf-bench".to_string(),
            kind: "mlperf-summarization".to_string(),
            workload: WorkloadRef {
                image: "vllm/vllm-openai:latest".to_string(),
                command: vec!["python3".to_string()],
                args: vec!["/scripts/mlperf_summarization.py".to_string()],
                env: BTreeMap::new(),
                script: None,
            },
            resources: ResourceRequirements::default(),
            node_selector: BTreeMap::new(),
            timeout_secs: 3600,
            mode: RunMode::Smoke,
            sample_count: Some(100),
        }
    }

    #[test]
    fn test_sample_env() {
        let smoke = spec();
        let env = smoke.sample_env();
        assert_eq!(env.get("SAMPLE_COUNT").map(String::as_str), Some("100"));
        assert_eq!(env.get("SAMPLE_SPLIT").map(String::as_str), Some("[:100]"));

        let mut full = spec();
        full.mode = RunMode::Full;
        full.sample_count = None;
        let env = full.sample_env();
        assert!(env.get("SAMPLE_COUNT").is_none());
        assert_eq!(env.get("SAMPLE_SPLIT").map(String::as_str), Some(""));
    }

    #[test]
    fn test_validate() {
        assert!(spec().validate().is_ok());

        let mut bad = spec();
        bad.name = "MLPerf_Bench".to_string();
        assert!(bad.validate().is_err());

        let mut bad = spec();
        bad.timeout_secs = 0;
        assert!(bad.validate().is_err());

        let mut bad = spec();
        bad.mode = RunMode::Full;
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_state_transitions_are_monotonic() {
        let mut run = JobRun::new(&spec(), "/tmp/run");
        assert_eq!(run.state(), JobState::Pending);

        run.advance(JobState::Running).unwrap();
        assert!(run.advance(JobState::Pending).is_err());
        assert!(run.advance(JobState::Unschedulable).is_err());

        run.advance(JobState::Succeeded).unwrap();
        assert!(run.is_terminal());
        assert!(run.finished_at().is_some());
        assert!(run.advance(JobState::TimedOut).is_err());
    }

    #[test]
    fn test_pending_can_fail_fast() {
        let mut run = JobRun::new(&spec(), "/tmp/run");
        run.finish(JobState::Unschedulable, "0/3 nodes available").unwrap();
        assert_eq!(run.state(), JobState::Unschedulable);
        assert_eq!(run.message(), Some("0/3 nodes available"));
    }

    #[test]
    fn test_terminal_run_is_immutable() {
        let mut run = JobRun::new(&spec(), "/tmp/run");
        run.finish(JobState::TimedOut, "deadline").unwrap();

        assert!(run.attach_metrics(MetricRecord::new()).is_err());
        assert!(run.set_pod("pod-1").is_err());
        assert!(run.finish(JobState::Succeeded, "late").is_err());
        assert_eq!(run.message(), Some("deadline"));
    }

    #[test]
    fn test_finish_requires_terminal_state() {
        let mut run = JobRun::new(&spec(), "/tmp/run");
        assert!(run.finish(JobState::Running, "nope").is_err());
    }
}

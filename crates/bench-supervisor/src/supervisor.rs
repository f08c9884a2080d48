//! Job supervisor
//!
//! Submits one benchmark workload, supervises it to a terminal state, tees
//! its output into the run directory, and records the outcome in a
//! [`JobRun`]. Workload failures never surface as errors; they are encoded
//! in the run's terminal state.
//!
//! A run goes through these steps:
//!
//! 1. Any live instance of the job is deleted and its removal observed
//!    before the replacement is created.
//! 2. The pod is polled a bounded number of times until it starts. A pod
//!    the orchestrator reports as unschedulable ends the run immediately.
//! 3. Once running, a background task tees the pod log to `output.log`
//!    while job status and pod phase are polled. Job status decides; a
//!    terminal pod phase only triggers an early re-check of it.
//! 4. A wall-clock deadline covers steps 2 and 3. On expiry log streaming
//!    is cancelled, the job is deleted, and the run ends `TimedOut`.
//! 5. Metrics are extracted from the captured log; failed runs also get a
//!    diagnostic snapshot.

use crate::artifacts::{JobArtifacts, RunDirectory};
use crate::diagnostics;
use crate::logs::LogTee;
use crate::manifest;
use bench_cluster::Clearance;
use bench_core::{
    poll_until, retry_transient, BenchmarkJobSpec, ClusterConfig, Config, Error, JobRun, JobState,
    Orchestrator, PollError, PollPolicy, Probe, Result, SupervisorConfig,
};
use bench_results::ExtractorRegistry;
use std::path::Path;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio::time::{sleep, timeout_at, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Terminal state and explanation produced by supervision
#[derive(Debug)]
struct Ending {
    state: JobState,
    message: String,
}

impl Ending {
    fn new(state: JobState, message: impl Into<String>) -> Self {
        Self {
            state,
            message: message.into(),
        }
    }

    /// Transient errors that survived retries mean the orchestrator is gone;
    /// anything else is an execution failure.
    fn from_error(error: &Error) -> Self {
        let state = if error.is_retryable() {
            JobState::OrchestratorUnreachable
        } else {
            JobState::ExecutionFailed
        };
        Self::new(state, error.to_string())
    }
}

#[derive(Debug)]
enum Scheduling {
    Started(String),
    Unschedulable { pod: String, message: String },
    NotStarted { pod: Option<String>, detail: String },
}

#[derive(Debug)]
enum Completion {
    Succeeded,
    Failed(String),
}

/// Supervises benchmark jobs within one run directory.
///
/// Holds no state across runs; clones share the orchestrator and registry.
#[derive(Clone)]
pub struct JobSupervisor {
    orchestrator: Arc<dyn Orchestrator>,
    cluster: ClusterConfig,
    settings: SupervisorConfig,
    retry: PollPolicy,
    registry: Arc<ExtractorRegistry>,
    run_dir: RunDirectory,
    clearance: Clearance,
}

impl JobSupervisor {
    /// Create a supervisor. A [`Clearance`] proves preflight passed.
    pub fn new(
        orchestrator: Arc<dyn Orchestrator>,
        config: &Config,
        registry: Arc<ExtractorRegistry>,
        run_dir: RunDirectory,
        clearance: Clearance,
    ) -> Self {
        Self {
            orchestrator,
            cluster: config.cluster.clone(),
            settings: config.supervisor.clone(),
            retry: config.retry.policy(),
            registry,
            run_dir,
            clearance,
        }
    }

    pub fn run_dir(&self) -> &RunDirectory {
        &self.run_dir
    }

    pub fn clearance(&self) -> &Clearance {
        &self.clearance
    }

    /// Run one job to a terminal state
    pub async fn run(&self, spec: &BenchmarkJobSpec) -> JobRun {
        let id = Uuid::new_v4();
        let artifacts = self.run_dir.job(&spec.name, id);
        let mut run = JobRun::with_id(id, spec, artifacts.dir());
        info!(job = %spec.name, jobrun = %id, mode = %spec.mode, "starting job run");

        let ending = match self.supervise(&mut run, &artifacts).await {
            Ok(ending) => ending,
            Err(e) => {
                warn!(job = %spec.name, error = %e, category = e.category(), "supervision failed");
                Ending::from_error(&e)
            }
        };

        self.conclude(&mut run, &artifacts, ending).await;
        run
    }

    /// Run several jobs, one after another or concurrently. A failing job
    /// never stops its siblings. Results keep the order of `specs`.
    pub async fn run_all(&self, specs: &[BenchmarkJobSpec], parallel: bool) -> Vec<JobRun> {
        if !parallel {
            let mut runs = Vec::with_capacity(specs.len());
            for spec in specs {
                runs.push(self.run(spec).await);
            }
            return runs;
        }

        let mut tasks = JoinSet::new();
        for (index, spec) in specs.iter().cloned().enumerate() {
            let supervisor = self.clone();
            tasks.spawn(async move { (index, supervisor.run(&spec).await) });
        }

        let mut slots: Vec<Option<JobRun>> = vec![None; specs.len()];
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, run)) => slots[index] = Some(run),
                Err(e) => error!(error = %e, "job supervision task failed"),
            }
        }

        slots
            .into_iter()
            .zip(specs)
            .map(|(slot, spec)| slot.unwrap_or_else(|| self.lost_run(spec)))
            .collect()
    }

    fn lost_run(&self, spec: &BenchmarkJobSpec) -> JobRun {
        let id = Uuid::new_v4();
        let mut run = JobRun::with_id(id, spec, self.run_dir.job(&spec.name, id).dir());
        if let Err(e) = run.finish(JobState::ExecutionFailed, "supervision task aborted") {
            error!(job = %spec.name, error = %e, "failed to record aborted run");
        }
        run
    }

    async fn supervise(&self, run: &mut JobRun, artifacts: &JobArtifacts) -> Result<Ending> {
        run.spec.validate()?;
        artifacts.create().await?;

        let name = run.job_name.clone();
        if let Some(ending) = self.remove_prior(&name).await? {
            return Ok(ending);
        }

        self.publish_script(&run.spec).await?;

        let manifest = manifest::render_job(&run.spec, &self.cluster, run.id)?;
        let manifest_path = artifacts.write_manifest(&manifest.document).await?;
        run.set_manifest_path(manifest_path)?;

        let orchestrator = &self.orchestrator;
        retry_transient(&self.retry, "create_job", || orchestrator.create_job(&manifest)).await?;
        info!(job = %name, jobrun = %run.id, "job submitted");

        let timeout = run.spec.timeout();
        let deadline = Instant::now() + timeout;
        let mut tee = None;

        let watched = timeout_at(deadline, self.watch(run, artifacts, &mut tee)).await;
        match watched {
            Ok(result) => {
                if let Some(tee) = tee.take() {
                    let lines = tee.finish(self.settings.log_drain_timeout()).await;
                    debug!(job = %name, lines, "log captured");
                }
                result
            }
            Err(_) => {
                if let Some(tee) = tee.take() {
                    tee.cancel().await;
                }
                warn!(job = %name, timeout_secs = timeout.as_secs(), "job timed out");
                Ok(Ending::new(
                    JobState::TimedOut,
                    format!("no terminal state within {}s", timeout.as_secs()),
                ))
            }
        }
    }

    /// Scheduling wait followed by execution supervision
    async fn watch(&self, run: &mut JobRun, artifacts: &JobArtifacts, tee: &mut Option<LogTee>) -> Result<Ending> {
        let name = run.job_name.clone();

        let pod = match self.wait_scheduled(&name).await? {
            Scheduling::Started(pod) => pod,
            Scheduling::Unschedulable { pod, message } => {
                warn!(job = %name, pod = %pod, reason = %message, "pod is unschedulable");
                run.set_pod(pod)?;
                return Ok(Ending::new(JobState::Unschedulable, message));
            }
            Scheduling::NotStarted { pod, detail } => {
                warn!(job = %name, detail = %detail, "pod did not start");
                if let Some(pod) = pod {
                    run.set_pod(pod)?;
                }
                return Ok(Ending::new(JobState::PodStartTimeout, detail));
            }
        };

        run.set_pod(pod.as_str())?;
        run.advance(JobState::Running)?;
        info!(job = %name, pod = %pod, "pod running");

        let log_path = artifacts.log_path();
        *tee = Some(LogTee::spawn(self.orchestrator.clone(), &pod, &log_path).await?);
        run.set_log_path(log_path)?;

        match self.wait_completion(&name, &pod).await? {
            Completion::Succeeded => Ok(Ending::new(JobState::Succeeded, "completed")),
            Completion::Failed(reason) => Ok(Ending::new(JobState::ExecutionFailed, reason)),
        }
    }

    /// Delete a live instance of `job` and wait until it is gone.
    ///
    /// Returns an ending when the old instance outlives the deletion timeout.
    async fn remove_prior(&self, job: &str) -> Result<Option<Ending>> {
        let orchestrator = &self.orchestrator;
        let retry = &self.retry;

        if retry_transient(retry, "get_job", || orchestrator.get_job(job))
            .await?
            .is_none()
        {
            return Ok(None);
        }

        warn!(job, "live instance found, deleting before resubmission");
        retry_transient(retry, "delete_job", || orchestrator.delete_job(job)).await?;

        let policy = PollPolicy::fixed(self.settings.settle_interval()).with_timeout(self.settings.deletion_timeout());
        let removed = poll_until(&policy, |_| async move {
            match retry_transient(retry, "get_job", || orchestrator.get_job(job)).await {
                Ok(None) => Probe::Ready(()),
                Ok(Some(_)) => Probe::Pending,
                Err(e) => Probe::Abort(e),
            }
        })
        .await;

        match removed {
            Ok(()) => {
                info!(job, "prior instance removed");
                Ok(None)
            }
            Err(PollError::Aborted(e)) => Err(e),
            Err(e) => Ok(Some(Ending::new(
                JobState::ExecutionFailed,
                format!("prior instance of {} was not removed: {}", job, e),
            ))),
        }
    }

    /// Replace the job's script config map, if it ships a script
    async fn publish_script(&self, spec: &BenchmarkJobSpec) -> Result<()> {
        let Some(path) = &spec.workload.script else {
            return Ok(());
        };

        let data = manifest::load_script(path).await?;
        let name = manifest::script_config_map_name(&spec.name);
        let orchestrator = &self.orchestrator;
        retry_transient(&self.retry, "create_config_map", || {
            orchestrator.create_config_map(&name, &data)
        })
        .await?;
        debug!(job = %spec.name, config_map = %name, script = %path.display(), "script published");
        Ok(())
    }

    async fn wait_scheduled(&self, job: &str) -> Result<Scheduling> {
        let orchestrator = &self.orchestrator;
        let retry = &self.retry;
        let policy = PollPolicy::fixed(self.settings.schedule_interval())
            .with_max_attempts(self.settings.schedule_attempts);

        let polled = poll_until(&policy, |attempt| async move {
            let pods = match retry_transient(retry, "list_pods", || orchestrator.list_pods(job)).await {
                Ok(pods) => pods,
                Err(e) => return Probe::Abort(e),
            };
            let Some(pod) = pods.into_iter().next() else {
                debug!(job, attempt, "no pod yet");
                return Probe::Pending;
            };

            if let Some(message) = &pod.unschedulable {
                return Probe::Ready(Scheduling::Unschedulable {
                    pod: pod.name.clone(),
                    message: message.clone(),
                });
            }
            if pod.has_started() {
                return Probe::Ready(Scheduling::Started(pod.name));
            }

            debug!(job, pod = %pod.name, attempt, reason = ?pod.waiting_reason, "pod pending");
            Probe::Pending
        })
        .await;

        match polled {
            Ok(scheduling) => Ok(scheduling),
            Err(PollError::Aborted(e)) => Err(e),
            Err(e) => {
                let last = orchestrator
                    .list_pods(job)
                    .await
                    .ok()
                    .and_then(|pods| pods.into_iter().next());
                let detail = match &last {
                    Some(pod) => format!(
                        "pod {} did not start ({}): {}",
                        pod.name,
                        e,
                        pod.waiting_reason.as_deref().unwrap_or("Pending")
                    ),
                    None => format!("no pod appeared ({})", e),
                };
                Ok(Scheduling::NotStarted {
                    pod: last.map(|pod| pod.name),
                    detail,
                })
            }
        }
    }

    async fn wait_completion(&self, job: &str, pod: &str) -> Result<Completion> {
        let policy = PollPolicy::fixed(self.settings.poll_interval());

        let polled = poll_until(&policy, |_| async move {
            match self.completion_signal(job, pod).await {
                Ok(Some(completion)) => Probe::Ready(completion),
                Ok(None) => Probe::Pending,
                Err(e) => Probe::Abort(e),
            }
        })
        .await;

        match polled {
            Ok(completion) => Ok(completion),
            Err(PollError::Aborted(e)) => Err(e),
            Err(e) => Err(Error::timeout(format!("job {}: {}", job, e))),
        }
    }

    /// Job status first; a finished pod ahead of its job gets one early re-check
    async fn completion_signal(&self, job: &str, pod: &str) -> Result<Option<Completion>> {
        if let Some(completion) = self.job_completion(job).await? {
            return Ok(Some(completion));
        }

        let orchestrator = &self.orchestrator;
        let pods = retry_transient(&self.retry, "list_pods", || orchestrator.list_pods(job)).await?;
        match pods.iter().find(|p| p.name == pod).map(|p| p.phase) {
            Some(phase) if phase.is_terminal() => {
                debug!(job, pod, phase = ?phase, "pod finished ahead of job status, re-checking");
                sleep(self.settings.settle_interval()).await;
                self.job_completion(job).await
            }
            _ => Ok(None),
        }
    }

    async fn job_completion(&self, job: &str) -> Result<Option<Completion>> {
        let orchestrator = &self.orchestrator;
        let status = retry_transient(&self.retry, "get_job", || orchestrator.get_job(job))
            .await?
            .ok_or_else(|| Error::not_found(format!("job {} disappeared while running", job)))?;

        if status.is_succeeded() {
            Ok(Some(Completion::Succeeded))
        } else if status.is_failed() {
            let reason = status
                .failure_reason
                .unwrap_or_else(|| "job reported failure".to_string());
            Ok(Some(Completion::Failed(reason)))
        } else {
            Ok(None)
        }
    }

    /// Attach metrics and diagnostics, clean up, and seal the run
    async fn conclude(&self, run: &mut JobRun, artifacts: &JobArtifacts, ending: Ending) {
        let Ending { state, message } = ending;
        let job = run.job_name.clone();

        if matches!(state, JobState::Succeeded | JobState::ExecutionFailed) {
            if let Some(log) = run.log_path().map(Path::to_path_buf) {
                let metrics = self.registry.extract_file(&run.kind, &log);
                debug!(job = %job, available = metrics.available_count(), total = metrics.len(), "metrics extracted");
                if let Err(e) = artifacts.write_metrics(&metrics).await {
                    warn!(job = %job, error = %e, "failed to write metrics");
                }
                if let Err(e) = run.attach_metrics(metrics) {
                    warn!(job = %job, error = %e, "failed to attach metrics");
                }
            }
        }

        if state != JobState::Succeeded {
            let report = diagnostics::capture(
                self.orchestrator.as_ref(),
                &job,
                run.pod(),
                &message,
                self.settings.event_count,
            )
            .await;
            match artifacts.write_diagnostics(&report).await {
                Ok(path) => {
                    if let Err(e) = run.attach_diagnostics(path) {
                        warn!(job = %job, error = %e, "failed to attach diagnostics");
                    }
                }
                Err(e) => warn!(job = %job, error = %e, "failed to write diagnostics"),
            }
        }

        if matches!(
            state,
            JobState::TimedOut | JobState::Unschedulable | JobState::PodStartTimeout
        ) {
            if let Err(e) = self.orchestrator.delete_job(&job).await {
                warn!(job = %job, error = %e, "best-effort job deletion failed");
            }
        }

        if let Err(e) = run.finish(state, message) {
            error!(job = %job, error = %e, "failed to record terminal state");
        }
        if let Err(e) = artifacts.write_jobrun(run).await {
            warn!(job = %job, error = %e, "failed to write job run record");
        }

        if state.is_success() {
            info!(job = %job, jobrun = %run.id, state = %state, "job run finished");
        } else {
            warn!(job = %job, jobrun = %run.id, state = %state, reason = run.message().unwrap_or_default(), "job run failed");
        }
    }
}

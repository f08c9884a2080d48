use bench_cluster::PreflightValidator;
use bench_core::{BenchmarkJobSpec, Config, JobState, MetricValue, Orchestrator, RunMode};
use bench_dev::{fixtures, setup_test_logging, test_config, MockJobPlan, MockOrchestrator};
use bench_results::{aggregate, new_run_id, ExtractorRegistry, RunSummary};
use bench_supervisor::{JobSupervisor, RunDirectory};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::time::Instant;

struct Harness {
    _root: TempDir,
    config: Config,
    orchestrator: MockOrchestrator,
    supervisor: JobSupervisor,
}

async fn harness() -> Harness {
    setup_test_logging();
    let root = tempfile::tempdir().unwrap();
    let config = test_config(root.path());
    let orchestrator = MockOrchestrator::ready(&config.cluster);
    let shared: Arc<dyn Orchestrator> = Arc::new(orchestrator.clone());

    let clearance = PreflightValidator::new(shared.clone(), config.cluster.clone(), config.retry.policy())
        .validate(false)
        .await
        .into_clearance()
        .unwrap();
    let run_dir = RunDirectory::create(&config.supervisor.artifact_root, new_run_id())
        .await
        .unwrap();
    let supervisor = JobSupervisor::new(
        shared,
        &config,
        Arc::new(ExtractorRegistry::builtin()),
        run_dir,
        clearance,
    );

    Harness {
        _root: root,
        config,
        orchestrator,
        supervisor,
    }
}

fn spec(config: &Config, name: &str, timeout_secs: Option<u64>) -> BenchmarkJobSpec {
    config
        .benchmark(name)
        .unwrap()
        .to_spec(RunMode::Smoke, timeout_secs)
}

#[tokio::test(start_paused = true)]
async fn smoke_run_succeeds_with_metrics_and_exact_manifest() {
    let h = harness().await;
    h.orchestrator
        .plan_job(
            "mlperf-bench",
            MockJobPlan::succeed(fixtures::lines(fixtures::MLPERF_SUMMARIZATION_LOG)),
        )
        .await;

    let run = h.supervisor.run(&spec(&h.config, "mlperf-bench", None)).await;

    assert_eq!(run.state(), JobState::Succeeded, "{:?}", run.message());
    let metrics = run.metrics().unwrap();
    assert_eq!(metrics.value("rougeL"), Some(0.2457));

    let submitted = h.orchestrator.submitted().await;
    assert_eq!(submitted.len(), 1);
    let artifact = std::fs::read(run.manifest_path().unwrap()).unwrap();
    assert_eq!(artifact, submitted[0].document.as_bytes());
    assert!(submitted[0].document.contains("SAMPLE_COUNT"));

    let log = std::fs::read_to_string(run.log_path().unwrap()).unwrap();
    assert!(log.contains("ROUGE-L: 0.2457"));
    assert!(run.diagnostics_path().is_none());
    assert!(run.artifact_dir.join("metrics.json").exists());
    assert!(run.artifact_dir.join("jobrun.json").exists());
}

#[tokio::test(start_paused = true)]
async fn unschedulable_pod_fails_fast() {
    let h = harness().await;
    h.orchestrator
        .plan_job("mmlu", MockJobPlan::unschedulable("0/1 nodes are available: 1 Insufficient nvidia.com/gpu"))
        .await;

    let started = Instant::now();
    let run = h.supervisor.run(&spec(&h.config, "mmlu", None)).await;

    assert_eq!(run.state(), JobState::Unschedulable);
    assert!(started.elapsed() < h.config.supervisor.poll_interval());
    assert!(run.message().unwrap().contains("Insufficient"));
    assert!(run.metrics().is_none());
    assert!(run.diagnostics_path().unwrap().exists());
}

#[tokio::test(start_paused = true)]
async fn pod_that_never_starts_times_out_scheduling() {
    let h = harness().await;
    h.orchestrator.plan_job("mmlu-pro", MockJobPlan::never_starts()).await;

    let run = h.supervisor.run(&spec(&h.config, "mmlu-pro", None)).await;

    assert_eq!(run.state(), JobState::PodStartTimeout);
    assert!(run.message().unwrap().contains("ContainerCreating"));
}

#[tokio::test(start_paused = true)]
async fn hanging_job_times_out_within_one_poll_interval() {
    let h = harness().await;
    h.orchestrator
        .plan_job("inference", MockJobPlan::hang(vec!["loading model".to_string()]))
        .await;
    let timeout = Duration::from_secs(60);

    let started = Instant::now();
    let run = h
        .supervisor
        .run(&spec(&h.config, "inference", Some(timeout.as_secs())))
        .await;
    let elapsed = started.elapsed();

    assert_eq!(run.state(), JobState::TimedOut);
    assert!(elapsed >= timeout, "{:?}", elapsed);
    assert!(elapsed < timeout + h.config.supervisor.poll_interval(), "{:?}", elapsed);
    assert!(run.metrics().is_none());
    assert!(run.diagnostics_path().is_some());
    let log = std::fs::read_to_string(run.log_path().unwrap()).unwrap();
    assert_eq!(log, "loading model\n");
}

#[tokio::test(start_paused = true)]
async fn failed_job_keeps_partial_metrics_and_diagnostics() {
    let h = harness().await;
    let partial: Vec<String> = fixtures::lines(fixtures::MMLU_LOG)
        .into_iter()
        .filter(|line| !line.contains("Completion rate"))
        .collect();
    h.orchestrator
        .plan_job("mmlu", MockJobPlan::fail(1, partial))
        .await;
    h.orchestrator.push_event("Warning BackoffLimitExceeded job/mmlu").await;

    let run = h.supervisor.run(&spec(&h.config, "mmlu", None)).await;

    assert_eq!(run.state(), JobState::ExecutionFailed);
    let metrics = run.metrics().unwrap();
    assert_eq!(metrics.get("completion_rate"), Some(MetricValue::Unavailable));
    assert_eq!(metrics.value("accuracy"), Some(0.6842));

    let diagnostics = std::fs::read_to_string(run.diagnostics_path().unwrap()).unwrap();
    assert!(diagnostics.contains("BackoffLimitExceeded"));
    assert!(diagnostics.contains("Exit Code: 1"));
}

async fn timed_mmlu_run(plan: MockJobPlan) -> (JobState, Duration, Config) {
    let h = harness().await;
    h.orchestrator.plan_job("mmlu", plan).await;

    let started = Instant::now();
    let run = h.supervisor.run(&spec(&h.config, "mmlu", None)).await;
    (run.state(), started.elapsed(), h.config)
}

#[tokio::test(start_paused = true)]
async fn pod_finishing_ahead_of_job_status_is_rechecked_after_settling() {
    let logs = fixtures::lines(fixtures::MMLU_LOG);
    let (state, prompt, _) = timed_mmlu_run(MockJobPlan::succeed(logs.clone())).await;
    assert_eq!(state, JobState::Succeeded);

    let (state, lagged, config) = timed_mmlu_run(MockJobPlan::succeed(logs).with_status_lag(1)).await;
    assert_eq!(state, JobState::Succeeded);

    let settle = config.supervisor.settle_interval();
    assert!(lagged >= prompt + settle, "{:?} vs {:?}", lagged, prompt);
    assert!(lagged < prompt + config.supervisor.poll_interval(), "{:?} vs {:?}", lagged, prompt);
}

#[tokio::test(start_paused = true)]
async fn job_status_outranks_a_failed_pod_phase() {
    let h = harness().await;
    h.orchestrator
        .plan_job(
            "inference",
            MockJobPlan::fail(1, vec!["CUDA error: device-side assert".to_string()]).with_status_lag(u32::MAX),
        )
        .await;
    let timeout = Duration::from_secs(60);

    let run = h
        .supervisor
        .run(&spec(&h.config, "inference", Some(timeout.as_secs())))
        .await;

    assert_eq!(run.state(), JobState::TimedOut, "{:?}", run.message());
    assert!(run.metrics().is_none());
    assert!(run.diagnostics_path().is_some());
}

#[tokio::test(start_paused = true)]
async fn live_instance_is_removed_before_resubmission() {
    let h = harness().await;
    h.orchestrator.insert_live_job("mmlu").await;
    h.orchestrator.set_deletion_checks(2).await;
    h.orchestrator
        .plan_job("mmlu", MockJobPlan::succeed(fixtures::lines(fixtures::MMLU_LOG)))
        .await;

    let run = h.supervisor.run(&spec(&h.config, "mmlu", None)).await;

    assert_eq!(run.state(), JobState::Succeeded, "{:?}", run.message());
    assert_eq!(h.orchestrator.conflict_count().await, 0);
    assert_eq!(h.orchestrator.submitted().await.len(), 1);
    assert_eq!(h.orchestrator.live_jobs().await, vec!["mmlu".to_string()]);
    assert!(run.pod().unwrap().contains("-pod"));
}

#[tokio::test(start_paused = true)]
async fn stuck_deletion_never_creates_a_second_instance() {
    let h = harness().await;
    h.orchestrator.insert_live_job("mmlu").await;
    h.orchestrator.set_stuck_deletions(true).await;

    let run = h.supervisor.run(&spec(&h.config, "mmlu", None)).await;

    assert_eq!(run.state(), JobState::ExecutionFailed);
    assert!(h.orchestrator.submitted().await.is_empty());
    assert!(run.manifest_path().is_none());
}

#[tokio::test(start_paused = true)]
async fn unreachable_orchestrator_is_classified() {
    let h = harness().await;
    h.orchestrator.fail_next_creates(10).await;

    let run = h.supervisor.run(&spec(&h.config, "mmlu", None)).await;

    assert_eq!(run.state(), JobState::OrchestratorUnreachable);
    assert!(h.orchestrator.submitted().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn timed_out_then_successful_run_supersedes_in_summary() {
    let h = harness().await;
    h.orchestrator
        .plan_job("mlperf-bench", MockJobPlan::hang(Vec::new()))
        .await;
    let first = h
        .supervisor
        .run(&spec(&h.config, "mlperf-bench", Some(30)))
        .await;

    h.orchestrator
        .plan_job(
            "mlperf-bench",
            MockJobPlan::succeed(fixtures::lines(fixtures::MLPERF_SUMMARIZATION_LOG)),
        )
        .await;
    let second = h
        .supervisor
        .run(&spec(&h.config, "mlperf-bench", Some(30)))
        .await;

    assert_eq!(first.state(), JobState::TimedOut);
    assert_eq!(second.state(), JobState::Succeeded, "{:?}", second.message());
    assert_ne!(first.artifact_dir, second.artifact_dir);

    let run_dir = h.supervisor.run_dir();
    let summary = aggregate(run_dir.run_id(), &[first.clone(), second.clone()], &h.config.thresholds);
    assert_eq!(summary.entries.len(), 2);
    assert_eq!(summary.entries[0].state, JobState::TimedOut);
    assert_eq!(summary.entries[1].state, JobState::Succeeded);
    assert_eq!(summary.latest_for("mlperf-bench").unwrap().jobrun_id, second.id);
    assert!(summary.passed());

    summary.persist(run_dir.path()).await.unwrap();
    assert_eq!(RunSummary::load(run_dir.path()).await.unwrap(), summary);
}

#[tokio::test(start_paused = true)]
async fn parallel_runs_are_isolated() {
    let h = harness().await;
    h.orchestrator
        .plan_job("mmlu", MockJobPlan::succeed(fixtures::lines(fixtures::MMLU_LOG)))
        .await;
    h.orchestrator
        .plan_job("mmlu-pro", MockJobPlan::fail(2, Vec::new()))
        .await;
    h.orchestrator
        .plan_job(
            "inference",
            MockJobPlan::succeed(fixtures::lines(fixtures::INFERENCE_THROUGHPUT_LOG)),
        )
        .await;

    let specs = vec![
        spec(&h.config, "mmlu", None),
        spec(&h.config, "mmlu-pro", None),
        spec(&h.config, "inference", None),
    ];
    let runs = h.supervisor.run_all(&specs, true).await;

    let states: Vec<(String, JobState)> = runs
        .iter()
        .map(|r| (r.job_name.clone(), r.state()))
        .collect();
    assert_eq!(
        states,
        vec![
            ("mmlu".to_string(), JobState::Succeeded),
            ("mmlu-pro".to_string(), JobState::ExecutionFailed),
            ("inference".to_string(), JobState::Succeeded),
        ]
    );
}

use bench_core::{Config, Error, JobRun, JobState, MetricValue, RunMode};
use bench_dev::fixtures;
use bench_results::{aggregate, ExtractorRegistry, RunSummary, Verdict};

#[test]
fn extracts_every_builtin_kind() {
    let registry = ExtractorRegistry::builtin();

    let mlperf = registry.extract("mlperf-summarization", fixtures::MLPERF_SUMMARIZATION_LOG);
    assert_eq!(mlperf.value("rouge1"), Some(0.3812));
    assert_eq!(mlperf.value("rouge2"), Some(0.1604));
    assert_eq!(mlperf.value("rougeL"), Some(0.2457));
    assert_eq!(mlperf.value("samples"), Some(100.0));
    assert_eq!(mlperf.value("samples_per_s"), Some(0.195));

    let mmlu_pro = registry.extract("mmlu-pro", fixtures::MMLU_PRO_LOG);
    let accuracy = mmlu_pro.value("accuracy").unwrap();
    assert!((accuracy - 0.4143).abs() < 1e-9);
    assert_eq!(mmlu_pro.value("questions_per_s"), Some(0.117));

    let mmlu = registry.extract("mmlu", fixtures::MMLU_LOG);
    assert_eq!(mmlu.value("accuracy"), Some(0.6842));
    let completion = mmlu.value("completion_rate").unwrap();
    assert!((completion - 0.9825).abs() < 1e-9);
    assert_eq!(mmlu.value("failed_questions"), Some(5.0));
    assert_eq!(mmlu.value("avg_response_time_s"), Some(1.84));

    let inference = registry.extract("inference-throughput", fixtures::INFERENCE_THROUGHPUT_LOG);
    assert_eq!(inference.value("single_tokens_per_s"), Some(62.44));
    assert_eq!(inference.value("batch_tokens_per_s"), Some(480.12));
}

#[test]
fn missing_metric_line_is_unavailable() {
    let registry = ExtractorRegistry::builtin();
    let truncated: String = fixtures::MLPERF_SUMMARIZATION_LOG
        .lines()
        .filter(|line| !line.starts_with("ROUGE-L:"))
        .map(|line| format!("{}\n", line))
        .collect();

    let record = registry.extract("mlperf-summarization", &truncated);

    assert_eq!(record.get("rougeL"), Some(MetricValue::Unavailable));
    assert_eq!(record.value("rouge1"), Some(0.3812));
    assert_eq!(record.available_count(), 4);
}

#[tokio::test]
async fn superseded_run_is_kept_but_not_latest() {
    let config = Config::default();
    let spec = config
        .benchmark("mlperf-bench")
        .unwrap()
        .to_spec(RunMode::Smoke, None);
    let registry = ExtractorRegistry::builtin();

    let mut first = JobRun::new(&spec, "/tmp/first");
    first.advance(JobState::Running).unwrap();
    first.finish(JobState::TimedOut, "deadline exceeded").unwrap();

    let mut second = JobRun::new(&spec, "/tmp/second");
    second.advance(JobState::Running).unwrap();
    second
        .attach_metrics(registry.extract(&spec.kind, fixtures::MLPERF_SUMMARIZATION_LOG))
        .unwrap();
    second.advance(JobState::Succeeded).unwrap();

    let summary = aggregate("20261019-120000", &[first.clone(), second.clone()], &config.thresholds);

    assert_eq!(summary.entries.len(), 2);
    assert_eq!(summary.entries[0].state, JobState::TimedOut);
    assert_eq!(summary.entries[1].state, JobState::Succeeded);
    assert_eq!(summary.latest.get("mlperf-bench"), Some(&second.id));
    assert_eq!(summary.verdict, Verdict::Pass);

    let dir = tempfile::tempdir().unwrap();
    summary.persist(dir.path()).await.unwrap();
    let loaded = RunSummary::load(dir.path()).await.unwrap();
    assert_eq!(loaded, summary);
}

#[tokio::test]
async fn missing_summary_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let err = RunSummary::load(dir.path()).await.unwrap_err();
    assert!(matches!(err, Error::NotFound(_)), "{:?}", err);
}

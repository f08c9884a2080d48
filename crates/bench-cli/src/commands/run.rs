//! Benchmark run command

use super::{cluster, orchestrator, summary};
use crate::output::{OutputFormat, OutputFormatter};
use anyhow::{bail, Context, Result};
use bench_cluster::{require_ready, CheckStatus, PreflightValidator};
use bench_core::{BenchmarkJobSpec, Config, RunMode};
use bench_results::{aggregate, new_run_id, ExtractorRegistry};
use bench_supervisor::{JobSupervisor, RunDirectory};
use std::sync::Arc;
use tracing::info;

/// Options of one `benchctl run` invocation
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Selected benchmark names; empty selects the whole catalog
    pub jobs: Vec<String>,
    pub mode: RunMode,
    pub timeout_secs: Option<u64>,
    pub parallel: bool,
    pub autofix: bool,
}

/// Resolve the selection into job specs in selection order
pub(crate) fn job_specs(config: &Config, options: &RunOptions) -> Result<Vec<BenchmarkJobSpec>> {
    let specs: Vec<BenchmarkJobSpec> = config
        .select(&options.jobs)?
        .into_iter()
        .map(|definition| definition.to_spec(options.mode, options.timeout_secs))
        .collect();

    if specs.is_empty() {
        bail!("no benchmarks configured");
    }
    for spec in &specs {
        spec.validate()
            .with_context(|| format!("benchmark {} is not runnable", spec.name))?;
    }
    Ok(specs)
}

/// Observe Ready, pass preflight, supervise every selected job, then
/// aggregate and persist the run summary. Fails when the verdict is FAIL.
pub async fn run_benchmarks(config: &Config, options: RunOptions, output_format: OutputFormat) -> Result<()> {
    let formatter = OutputFormatter::new(output_format);
    let specs = job_specs(config, &options)?;
    let orchestrator = orchestrator(config);
    let retry = config.retry.policy();

    formatter.print_progress("Observing cluster state");
    require_ready(orchestrator.as_ref(), &retry)
        .await
        .context("cluster is not ready for benchmark jobs")?;

    formatter.print_progress("Running preflight checks");
    let report = PreflightValidator::new(orchestrator.clone(), config.cluster.clone(), retry)
        .validate(options.autofix)
        .await;
    if report.has_failures() {
        cluster::print_report(&formatter, &report)?;
        bail!("preflight failed: {}", cluster::failed_names(&report));
    }
    for check in report.checks.iter().filter(|c| c.status == CheckStatus::Warn) {
        formatter.print_warning(&format!("{}: {}", check.name, check.message));
    }
    let clearance = report.into_clearance()?;

    let run_dir = RunDirectory::create(&config.supervisor.artifact_root, new_run_id()).await?;
    info!(
        run_id = run_dir.run_id(),
        path = %run_dir.path().display(),
        jobs = specs.len(),
        mode = %options.mode,
        parallel = options.parallel,
        "starting benchmark run"
    );

    let supervisor = JobSupervisor::new(
        orchestrator,
        config,
        Arc::new(ExtractorRegistry::builtin()),
        run_dir,
        clearance,
    );
    formatter.print_progress(&format!("Supervising {} job(s)", specs.len()));
    let runs = supervisor.run_all(&specs, options.parallel).await;

    let run_dir = supervisor.run_dir();
    let summary = aggregate(run_dir.run_id(), &runs, &config.thresholds);
    let path = summary.persist(run_dir.path()).await?;

    summary::print_summary(&formatter, &summary)?;
    if !summary.passed() {
        bail!("run {} verdict FAIL (summary at {})", summary.run_id, path.display());
    }
    formatter.print_success(&format!("Run {} passed; summary at {}", summary.run_id, path.display()));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bench_core::{BenchmarkDefinition, KeyValue};

    fn config() -> Config {
        let mut config = Config::default();
        config.benchmarks = vec![
            BenchmarkDefinition {
                name: "mmlu".to_string(),
                kind: "mmlu".to_string(),
                image: "registry.local/mmlu:1".to_string(),
                command: vec!["python".to_string(), "run.py".to_string()],
                args: Vec::new(),
                env: vec![KeyValue::new("MODEL", "llama")],
                script: None,
                accelerators: 1,
                memory: "32Gi".to_string(),
                node_selector: Vec::new(),
                timeout_secs: 1800,
                smoke_samples: Some(16),
            },
            BenchmarkDefinition {
                name: "inference".to_string(),
                kind: "inference".to_string(),
                image: "registry.local/inference:1".to_string(),
                command: Vec::new(),
                args: Vec::new(),
                env: Vec::new(),
                script: None,
                accelerators: 1,
                memory: "16Gi".to_string(),
                node_selector: Vec::new(),
                timeout_secs: 900,
                smoke_samples: None,
            },
        ];
        config
    }

    fn options(jobs: &[&str]) -> RunOptions {
        RunOptions {
            jobs: jobs.iter().map(|j| j.to_string()).collect(),
            mode: RunMode::Smoke,
            timeout_secs: Some(120),
            parallel: false,
            autofix: false,
        }
    }

    #[test]
    fn test_specs_follow_selection_order() {
        let specs = job_specs(&config(), &options(&["inference", "mmlu"])).unwrap();
        let names: Vec<&str> = specs.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["inference", "mmlu"]);
        assert!(specs.iter().all(|s| s.timeout_secs == 120));
    }

    #[test]
    fn test_empty_selection_runs_catalog() {
        let specs = job_specs(&config(), &options(&[])).unwrap();
        assert_eq!(specs.len(), 2);
    }

    #[test]
    fn test_unknown_benchmark_is_rejected() {
        assert!(job_specs(&config(), &options(&["hellaswag"])).is_err());
    }
}

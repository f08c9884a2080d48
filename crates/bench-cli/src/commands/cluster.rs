//! Cluster observation and preflight commands

use super::orchestrator;
use crate::output::{colorize_status, row_pairs, Formattable, OutputFormat, OutputFormatter};
use anyhow::{bail, Result};
use bench_cluster::{observe_cluster_state, CheckResult, PreflightReport, PreflightValidator};
use bench_core::{ClusterState, Config};
use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Serialize)]
struct ClusterStateView {
    state: ClusterState,
    namespace: String,
    observed_at: DateTime<Utc>,
}

impl Formattable for ClusterStateView {
    fn table_headers() -> Vec<String> {
        vec!["State".to_string(), "Namespace".to_string(), "Observed At".to_string()]
    }

    fn table_row(&self) -> Vec<String> {
        vec![
            colorize_status(&self.state.to_string()).to_string(),
            self.namespace.clone(),
            self.observed_at.to_rfc3339(),
        ]
    }

    fn key_value_pairs(&self) -> Vec<(String, String)> {
        row_pairs(self)
    }
}

impl Formattable for CheckResult {
    fn table_headers() -> Vec<String> {
        vec![
            "Check".to_string(),
            "Status".to_string(),
            "Repaired".to_string(),
            "Message".to_string(),
        ]
    }

    fn table_row(&self) -> Vec<String> {
        vec![
            self.name.clone(),
            colorize_status(&self.status.to_string()).to_string(),
            if self.repaired { "yes".to_string() } else { String::new() },
            self.message.clone(),
        ]
    }

    fn key_value_pairs(&self) -> Vec<(String, String)> {
        row_pairs(self)
    }
}

/// Observe the live cluster state; fails unless it reads Ready
pub async fn cluster_state(config: &Config, output_format: OutputFormat) -> Result<()> {
    let formatter = OutputFormatter::new(output_format);
    let orchestrator = orchestrator(config);

    formatter.print_progress("Observing cluster state");
    let state = observe_cluster_state(orchestrator.as_ref(), &config.retry.policy()).await;

    formatter.print_item(&ClusterStateView {
        state,
        namespace: config.cluster.namespace.clone(),
        observed_at: Utc::now(),
    })?;

    if !state.is_ready() {
        bail!("cluster is {}", state);
    }
    Ok(())
}

/// Run every preflight check, optionally repairing what can be repaired
pub async fn preflight(config: &Config, autofix: bool, output_format: OutputFormat) -> Result<()> {
    let formatter = OutputFormatter::new(output_format);
    let validator = PreflightValidator::new(orchestrator(config), config.cluster.clone(), config.retry.policy());

    formatter.print_progress("Running preflight checks");
    let report = validator.validate(autofix).await;
    print_report(&formatter, &report)?;

    if report.has_failures() {
        bail!("preflight failed: {}", failed_names(&report));
    }
    formatter.print_success("Cluster is ready for benchmark jobs");
    Ok(())
}

pub(crate) fn print_report(formatter: &OutputFormatter, report: &PreflightReport) -> Result<()> {
    if formatter.is_structured() {
        formatter.print_value(report)
    } else {
        formatter.print_list(&report.checks)
    }
}

pub(crate) fn failed_names(report: &PreflightReport) -> String {
    report
        .failures()
        .map(|check| check.name.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

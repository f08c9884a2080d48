//! Run summary display

use crate::output::{colorize_status, format_duration, render_table, Formattable, OutputFormat, OutputFormatter};
use anyhow::{Context, Result};
use bench_results::{RunEntry, RunSummary};
use colored::*;
use std::path::Path;

/// One summary entry, flagged when it is the job's latest result
struct EntryRow<'a> {
    entry: &'a RunEntry,
    latest: bool,
}

impl Formattable for EntryRow<'_> {
    fn table_headers() -> Vec<String> {
        vec![
            "Job".to_string(),
            "Mode".to_string(),
            "State".to_string(),
            "Verdict".to_string(),
            "Duration".to_string(),
            "Metrics".to_string(),
            "Latest".to_string(),
        ]
    }

    fn table_row(&self) -> Vec<String> {
        let entry = self.entry;
        vec![
            entry.job_name.clone(),
            entry.mode.to_string(),
            colorize_status(&entry.state.to_string()).to_string(),
            colorize_status(&entry.verdict.to_string()).to_string(),
            entry.duration_secs.map(format_duration).unwrap_or_default(),
            metrics_line(entry),
            if self.latest { "*".to_string() } else { String::new() },
        ]
    }

    fn key_value_pairs(&self) -> Vec<(String, String)> {
        let entry = self.entry;
        let mut pairs = vec![
            ("Job".to_string(), entry.job_name.clone()),
            ("Run".to_string(), entry.jobrun_id.to_string()),
            ("State".to_string(), entry.state.to_string()),
            ("Verdict".to_string(), entry.verdict.to_string()),
            ("Metrics".to_string(), metrics_line(entry)),
            ("Artifacts".to_string(), entry.artifact_dir.display().to_string()),
        ];
        if let Some(reason) = &entry.reason {
            pairs.push(("Reason".to_string(), reason.clone()));
        }
        pairs
    }
}

fn metrics_line(entry: &RunEntry) -> String {
    entry
        .metrics
        .iter()
        .map(|(name, value)| format!("{}={}", name, value))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Print a summary: structured formats get the whole document, tabular
/// formats a table of every entry plus the reasons behind failed verdicts.
pub(crate) fn print_summary(formatter: &OutputFormatter, summary: &RunSummary) -> Result<()> {
    if formatter.is_structured() {
        return formatter.print_value(summary);
    }

    let latest: Vec<_> = summary.latest_entries().iter().map(|e| e.jobrun_id).collect();
    let rows: Vec<EntryRow<'_>> = summary
        .entries
        .iter()
        .map(|entry| EntryRow {
            entry,
            latest: latest.contains(&entry.jobrun_id),
        })
        .collect();

    println!("{} {}", "Run:".bold().cyan(), summary.run_id);
    println!(
        "{} {}",
        "Verdict:".bold().cyan(),
        colorize_status(&summary.verdict.to_string()).bold()
    );

    if rows.is_empty() {
        println!("{}", "No job runs recorded".dimmed());
        return Ok(());
    }
    println!("{}", render_table(&rows));

    for entry in summary.latest_entries() {
        if entry.verdict.is_pass() {
            continue;
        }
        if let Some(reason) = &entry.reason {
            println!("{} {}: {}", "✗".red().bold(), entry.job_name, reason);
        }
        if let Some(path) = &entry.diagnostics_path {
            println!("  diagnostics: {}", path.display());
        }
    }
    Ok(())
}

/// Show the summary persisted in a run directory
pub async fn show_summary(path: &Path, output_format: OutputFormat) -> Result<()> {
    let formatter = OutputFormatter::new(output_format);
    let summary = RunSummary::load(path).await.with_context(|| format!("failed to load summary from {}", path.display()))?;
    print_summary(&formatter, &summary)
}

//! Run summaries: per-job verdicts against thresholds, persisted as JSON

use bench_core::{
    Error, ErrorContext, JobRun, JobState, MetricRecord, Result, RunMode, Threshold,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::info;
use uuid::Uuid;

/// File name of the persisted summary inside a run directory
pub const SUMMARY_FILE: &str = "summary.json";

/// Run identifier derived from the current UTC time
pub fn new_run_id() -> String {
    Utc::now().format("%Y%m%d-%H%M%S").to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Verdict {
    Pass,
    Fail,
}

impl Verdict {
    pub fn is_pass(&self) -> bool {
        matches!(self, Verdict::Pass)
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Pass => write!(f, "PASS"),
            Verdict::Fail => write!(f, "FAIL"),
        }
    }
}

/// Outcome of one job run within a summary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunEntry {
    pub job_name: String,
    pub kind: String,
    pub jobrun_id: Uuid,
    pub mode: RunMode,
    pub state: JobState,
    pub submitted_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_secs: Option<f64>,
    pub metrics: MetricRecord,
    pub threshold: Option<Threshold>,
    pub verdict: Verdict,
    /// Why the verdict is FAIL, or the run's terminal message
    pub reason: Option<String>,
    pub artifact_dir: PathBuf,
    pub log_path: Option<PathBuf>,
    pub diagnostics_path: Option<PathBuf>,
}

impl RunEntry {
    pub fn from_run(run: &JobRun, threshold: Option<&Threshold>) -> Self {
        let metrics = run.metrics().cloned().unwrap_or_default();
        let (verdict, reason) = judge(run.state(), &metrics, threshold);

        Self {
            job_name: run.job_name.clone(),
            kind: run.kind.clone(),
            jobrun_id: run.id,
            mode: run.spec.mode,
            state: run.state(),
            submitted_at: run.submitted_at,
            finished_at: run.finished_at(),
            duration_secs: run.duration().map(|d| d.num_milliseconds() as f64 / 1000.0),
            metrics,
            threshold: threshold.cloned(),
            verdict,
            reason: reason.or_else(|| run.message().map(str::to_string)),
            artifact_dir: run.artifact_dir.clone(),
            log_path: run.log_path().map(Path::to_path_buf),
            diagnostics_path: run.diagnostics_path().map(Path::to_path_buf),
        }
    }
}

/// Verdict for one run. Anything but a successful run meeting its threshold fails.
fn judge(
    state: JobState,
    metrics: &MetricRecord,
    threshold: Option<&Threshold>,
) -> (Verdict, Option<String>) {
    if !state.is_success() {
        return (Verdict::Fail, Some(format!("job ended {}", state)));
    }

    let Some(threshold) = threshold else {
        return (Verdict::Pass, None);
    };

    match metrics.value(&threshold.metric) {
        None => (
            Verdict::Fail,
            Some(format!("{} unavailable", threshold.metric)),
        ),
        Some(value) if value < threshold.min => (
            Verdict::Fail,
            Some(format!(
                "{} {:.4} below threshold {:.4}",
                threshold.metric, value, threshold.min
            )),
        ),
        Some(_) => (Verdict::Pass, None),
    }
}

/// The run's canonical artifact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub created_at: DateTime<Utc>,
    /// Every job run, in submission order
    pub entries: Vec<RunEntry>,
    /// Most recent job run per job name
    pub latest: BTreeMap<String, Uuid>,
    /// Overall verdict over the latest run of each job
    pub verdict: Verdict,
}

impl RunSummary {
    pub fn passed(&self) -> bool {
        self.verdict.is_pass()
    }

    pub fn entry(&self, jobrun_id: Uuid) -> Option<&RunEntry> {
        self.entries.iter().find(|e| e.jobrun_id == jobrun_id)
    }

    pub fn latest_for(&self, job_name: &str) -> Option<&RunEntry> {
        self.latest.get(job_name).and_then(|id| self.entry(*id))
    }

    /// Latest entries in job-name order
    pub fn latest_entries(&self) -> Vec<&RunEntry> {
        self.latest.values().filter_map(|id| self.entry(*id)).collect()
    }

    /// Write `summary.json` into `dir`, replacing any previous one
    pub async fn persist(&self, dir: &Path) -> Result<PathBuf> {
        tokio::fs::create_dir_all(dir)
            .await
            .with_context_fn(|| format!("failed to create {}", dir.display()))?;

        let path = dir.join(SUMMARY_FILE);
        let tmp = dir.join(format!(".{}.tmp", SUMMARY_FILE));
        let json = serde_json::to_vec_pretty(self)?;
        tokio::fs::write(&tmp, json)
            .await
            .with_context_fn(|| format!("failed to write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .with_context_fn(|| format!("failed to write {}", path.display()))?;

        info!(run_id = %self.run_id, path = %path.display(), verdict = %self.verdict, "run summary persisted");
        Ok(path)
    }

    /// Load a summary from a run directory or a summary file
    pub async fn load(path: &Path) -> Result<Self> {
        let file = match tokio::fs::metadata(path).await {
            Ok(metadata) if metadata.is_dir() => path.join(SUMMARY_FILE),
            _ => path.to_path_buf(),
        };
        let bytes = match tokio::fs::read(&file).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::not_found(format!("run summary {}", file.display())))
            }
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_slice(&bytes)?)
    }
}

/// Merge the job runs of one invocation into a summary.
///
/// A later submission of the same job name supersedes earlier ones as the
/// "latest" result; earlier runs stay in `entries`. An empty run fails.
pub fn aggregate(
    run_id: &str,
    runs: &[JobRun],
    thresholds: &BTreeMap<String, Threshold>,
) -> RunSummary {
    let entries: Vec<RunEntry> = runs
        .iter()
        .map(|run| RunEntry::from_run(run, thresholds.get(&run.kind)))
        .collect();

    let mut latest: BTreeMap<String, &RunEntry> = BTreeMap::new();
    for entry in &entries {
        let newer = latest
            .get(&entry.job_name)
            .map_or(true, |current| entry.submitted_at >= current.submitted_at);
        if newer {
            latest.insert(entry.job_name.clone(), entry);
        }
    }

    let verdict = if !latest.is_empty() && latest.values().all(|e| e.verdict.is_pass()) {
        Verdict::Pass
    } else {
        Verdict::Fail
    };
    let latest = latest
        .into_iter()
        .map(|(name, entry)| (name, entry.jobrun_id))
        .collect();

    RunSummary {
        run_id: run_id.to_string(),
        created_at: Utc::now(),
        entries,
        latest,
        verdict,
    }
}

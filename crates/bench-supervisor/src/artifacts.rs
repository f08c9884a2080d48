//! Run-scoped artifact directories
//!
//! ```text
//! <artifact_root>/<run_id>/summary.json
//! <artifact_root>/<run_id>/<job>/<jobrun-id>/{manifest.yaml, output.log, metrics.json, diagnostics.txt, jobrun.json}
//! ```

use bench_core::{ErrorContext, JobRun, MetricRecord, Result};
use bench_results::SUMMARY_FILE;
use std::path::{Path, PathBuf};
use uuid::Uuid;

const MANIFEST_FILE: &str = "manifest.yaml";
const LOG_FILE: &str = "output.log";
const METRICS_FILE: &str = "metrics.json";
const DIAGNOSTICS_FILE: &str = "diagnostics.txt";
const JOBRUN_FILE: &str = "jobrun.json";

/// Directory holding every artifact of one invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunDirectory {
    run_id: String,
    path: PathBuf,
}

impl RunDirectory {
    /// Create `<root>/<run_id>`
    pub async fn create(root: &Path, run_id: impl Into<String>) -> Result<Self> {
        let run_id = run_id.into();
        let path = root.join(&run_id);
        tokio::fs::create_dir_all(&path)
            .await
            .with_context_fn(|| format!("failed to create run directory {}", path.display()))?;
        Ok(Self { run_id, path })
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn summary_path(&self) -> PathBuf {
        self.path.join(SUMMARY_FILE)
    }

    /// Artifact paths of one job run. Nothing is created until [`JobArtifacts::create`].
    pub fn job(&self, job_name: &str, jobrun_id: Uuid) -> JobArtifacts {
        JobArtifacts {
            dir: self.path.join(job_name).join(jobrun_id.to_string()),
        }
    }
}

/// Artifacts of a single job run, kept apart from every other run of the same job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobArtifacts {
    dir: PathBuf,
}

impl JobArtifacts {
    pub async fn create(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context_fn(|| format!("failed to create {}", self.dir.display()))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.dir.join(MANIFEST_FILE)
    }

    pub fn log_path(&self) -> PathBuf {
        self.dir.join(LOG_FILE)
    }

    pub fn metrics_path(&self) -> PathBuf {
        self.dir.join(METRICS_FILE)
    }

    pub fn diagnostics_path(&self) -> PathBuf {
        self.dir.join(DIAGNOSTICS_FILE)
    }

    pub fn jobrun_path(&self) -> PathBuf {
        self.dir.join(JOBRUN_FILE)
    }

    /// Write the manifest exactly as it will be submitted
    pub async fn write_manifest(&self, document: &str) -> Result<PathBuf> {
        let path = self.manifest_path();
        write(&path, document.as_bytes()).await?;
        Ok(path)
    }

    pub async fn write_metrics(&self, metrics: &MetricRecord) -> Result<PathBuf> {
        let path = self.metrics_path();
        write(&path, &serde_json::to_vec_pretty(metrics)?).await?;
        Ok(path)
    }

    pub async fn write_diagnostics(&self, text: &str) -> Result<PathBuf> {
        let path = self.diagnostics_path();
        write(&path, text.as_bytes()).await?;
        Ok(path)
    }

    pub async fn write_jobrun(&self, run: &JobRun) -> Result<PathBuf> {
        let path = self.jobrun_path();
        write(&path, &serde_json::to_vec_pretty(run)?).await?;
        Ok(path)
    }
}

async fn write(path: &Path, contents: &[u8]) -> Result<()> {
    tokio::fs::write(path, contents)
        .await
        .with_context_fn(|| format!("failed to write {}", path.display()))
}

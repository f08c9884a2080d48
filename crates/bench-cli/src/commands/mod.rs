//! Command implementations for benchctl

pub mod benchmarks;
pub mod cluster;
pub mod config;
pub mod node;
pub mod run;
pub mod summary;

use bench_cluster::KubectlOrchestrator;
use bench_core::{Config, Orchestrator};
use std::sync::Arc;

/// Orchestrator client for the configured cluster
pub(crate) fn orchestrator(config: &Config) -> Arc<dyn Orchestrator> {
    Arc::new(KubectlOrchestrator::new(&config.cluster))
}

//! Utility functions for development and testing

use bench_core::Config;
use std::path::Path;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Setup test logging with appropriate levels
pub fn setup_test_logging() {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "bench_core=debug,bench_cluster=debug,bench_supervisor=debug,bench_results=debug"
                    .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .try_init();
}

/// Configuration with short, deterministic timings and artifacts under `artifact_root`
pub fn test_config(artifact_root: &Path) -> Config {
    let mut config = Config::default();

    config.supervisor.artifact_root = artifact_root.to_path_buf();
    config.supervisor.poll_interval_secs = 5;
    config.supervisor.settle_interval_secs = 1;
    config.supervisor.schedule_attempts = 10;
    config.supervisor.schedule_interval_secs = 2;
    config.supervisor.deletion_timeout_secs = 30;
    config.supervisor.log_drain_timeout_secs = 5;
    config.supervisor.event_count = 10;

    // No jitter so timing assertions are exact
    config.retry.max_attempts = 3;
    config.retry.initial_backoff_ms = 100;
    config.retry.max_backoff_ms = 1_000;
    config.retry.jitter = false;

    config.node.health_wait_secs = 30;

    config
}

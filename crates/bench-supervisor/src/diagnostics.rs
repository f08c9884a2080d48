//! Diagnostic snapshot captured when a job run fails

use bench_core::Orchestrator;
use chrono::Utc;
use std::fmt::Write;
use tracing::warn;

/// Collect the pod description and recent cluster events into one report.
///
/// Sections that cannot be fetched are noted in the report instead of
/// failing the capture.
pub async fn capture(
    orchestrator: &dyn Orchestrator,
    job: &str,
    pod: Option<&str>,
    message: &str,
    event_count: u32,
) -> String {
    let mut report = String::new();
    let _ = writeln!(report, "job: {}", job);
    let _ = writeln!(report, "captured_at: {}", Utc::now().to_rfc3339());
    let _ = writeln!(report, "reason: {}", message);

    let _ = writeln!(report, "\n=== pod ===");
    match pod {
        Some(pod) => match orchestrator.describe_pod(pod).await {
            Ok(description) => report.push_str(&description),
            Err(e) => {
                warn!(job, pod, error = %e, "pod description unavailable");
                let _ = writeln!(report, "description unavailable: {}", e);
            }
        },
        None => {
            let _ = writeln!(report, "no pod was scheduled");
        }
    }
    if !report.ends_with('\n') {
        report.push('\n');
    }

    let _ = writeln!(report, "\n=== recent events ===");
    match orchestrator.recent_events(event_count).await {
        Ok(events) if events.is_empty() => {
            let _ = writeln!(report, "(none)");
        }
        Ok(events) => {
            for event in events {
                let _ = writeln!(report, "{}", event);
            }
        }
        Err(e) => {
            warn!(job, error = %e, "recent events unavailable");
            let _ = writeln!(report, "events unavailable: {}", e);
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use bench_core::ClusterConfig;
    use bench_dev::MockOrchestrator;

    #[tokio::test]
    async fn test_capture_without_pod() {
        let orch = MockOrchestrator::ready(&ClusterConfig::default());
        orch.push_event("Warning FailedScheduling pod/mmlu-pod1 0/1 nodes are available").await;

        let report = capture(&orch, "mmlu", None, "unschedulable", 10).await;
        assert!(report.contains("no pod was scheduled"));
        assert!(report.contains("FailedScheduling"));
    }

    #[tokio::test]
    async fn test_capture_tolerates_unreachable_cluster() {
        let orch = MockOrchestrator::ready(&ClusterConfig::default());
        orch.set_reachable(false).await;

        let report = capture(&orch, "mmlu", Some("mmlu-pod1"), "failed", 10).await;
        assert!(report.contains("description unavailable"));
        assert!(report.contains("events unavailable"));
    }
}

use bench_cluster::NodeReconciler;
use bench_core::{Error, JoinCredential, NodeHost, NodeInfo, NodeRole, NodeState, Orchestrator};
use bench_dev::{setup_test_logging, test_config, MockJoinFailure, MockNodeHost, MockOrchestrator};
use chrono::Utc;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

fn reconciler(host: &MockNodeHost, orchestrator: &MockOrchestrator) -> NodeReconciler {
    let config = test_config(Path::new("results"));
    NodeReconciler::new(
        Arc::new(host.clone()) as Arc<dyn NodeHost>,
        config.node.clone(),
        config.cluster.clone(),
        config.retry.policy(),
    )
    .with_orchestrator(Arc::new(orchestrator.clone()) as Arc<dyn Orchestrator>)
}

fn fresh_credential() -> JoinCredential {
    JoinCredential {
        token: "abcdef.0123456789abcdef".to_string(),
        endpoint: "10.0.0.1:6443".to_string(),
        ca_cert_hash: "sha256:deadbeef".to_string(),
        expires_at: Utc::now() + chrono::Duration::hours(1),
    }
}

fn expired_credential() -> JoinCredential {
    JoinCredential {
        expires_at: Utc::now() - chrono::Duration::minutes(5),
        ..fresh_credential()
    }
}

#[tokio::test(start_paused = true)]
async fn joined_node_is_left_untouched() {
    setup_test_logging();
    let orchestrator = MockOrchestrator::ready(&test_config(Path::new("results")).cluster);
    let host = MockNodeHost::joined("gpu-node-1", NodeRole::Worker);
    let reconciler = reconciler(&host, &orchestrator);
    let credential = fresh_credential();

    let first = reconciler.reconcile(NodeRole::Worker, Some(&credential)).await.unwrap();
    let second = reconciler.reconcile(NodeRole::Worker, Some(&credential)).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(second.state, NodeState::Joined);
    assert!(!second.changed);
    assert_eq!(orchestrator.mutation_count().await, 0);
    assert_eq!(host.reset_count().await, 0);
    assert_eq!(host.join_count().await, 0);
}

#[tokio::test(start_paused = true)]
async fn stale_control_plane_files_are_cleared_before_expired_credential_is_rejected() {
    setup_test_logging();
    let orchestrator = MockOrchestrator::ready(&test_config(Path::new("results")).cluster);
    let host = MockNodeHost::stale_control_plane("worker-7");
    let reconciler = reconciler(&host, &orchestrator);

    assert_eq!(
        reconciler.detect(NodeRole::Worker).await.unwrap(),
        NodeState::PartiallyJoined
    );

    let result = reconciler
        .reconcile(NodeRole::Worker, Some(&expired_credential()))
        .await;

    assert!(matches!(result, Err(Error::CredentialExpired(_))));
    assert_eq!(host.reset_count().await, 1);
    assert_eq!(host.join_count().await, 0);
    assert!(host.residual_files().await.is_empty());
    assert_eq!(reconciler.detect(NodeRole::Worker).await.unwrap(), NodeState::Clean);
}

#[tokio::test(start_paused = true)]
async fn half_joined_worker_is_reset_then_joined() {
    let orchestrator = MockOrchestrator::ready(&test_config(Path::new("results")).cluster);
    let host = MockNodeHost::half_joined_worker("worker-2");
    let reconciler = reconciler(&host, &orchestrator);

    let outcome = reconciler
        .reconcile(NodeRole::Worker, Some(&fresh_credential()))
        .await
        .unwrap();

    assert_eq!(outcome.previous, NodeState::PartiallyJoined);
    assert_eq!(outcome.state, NodeState::Joined);
    assert!(outcome.reset_performed);
    assert_eq!(host.reset_count().await, 1);
    assert_eq!(host.join_count().await, 1);
}

#[tokio::test(start_paused = true)]
async fn health_wait_polls_at_the_configured_interval() {
    let mut config = test_config(Path::new("results"));
    config.node.health_poll_interval_secs = 7;
    let orchestrator = MockOrchestrator::ready(&config.cluster);
    let host = MockNodeHost::clean("worker-5");
    host.set_agent_start_delay(2).await;

    let reconciler = NodeReconciler::new(
        Arc::new(host.clone()) as Arc<dyn NodeHost>,
        config.node.clone(),
        config.cluster.clone(),
        config.retry.policy(),
    )
    .with_orchestrator(Arc::new(orchestrator.clone()) as Arc<dyn Orchestrator>);

    let started = tokio::time::Instant::now();
    let outcome = reconciler
        .reconcile(NodeRole::Worker, Some(&fresh_credential()))
        .await
        .unwrap();

    assert_eq!(outcome.state, NodeState::Joined);
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(7), "elapsed {:?}", elapsed);
    assert!(elapsed < Duration::from_secs(14), "elapsed {:?}", elapsed);
}

#[tokio::test(start_paused = true)]
async fn unreachable_join_is_reset_and_retried() {
    let orchestrator = MockOrchestrator::ready(&test_config(Path::new("results")).cluster);
    let host = MockNodeHost::clean("worker-3");
    host.fail_next(MockJoinFailure::Unreachable).await;
    let reconciler = reconciler(&host, &orchestrator);

    let outcome = reconciler
        .reconcile(NodeRole::Worker, Some(&fresh_credential()))
        .await
        .unwrap();

    assert_eq!(outcome.state, NodeState::Joined);
    assert!(!outcome.reset_performed);
    assert_eq!(host.join_count().await, 2);
    assert_eq!(host.reset_count().await, 1);
}

#[tokio::test(start_paused = true)]
async fn rejected_token_is_fatal_and_leaves_node_clean() {
    let orchestrator = MockOrchestrator::ready(&test_config(Path::new("results")).cluster);
    let host = MockNodeHost::clean("worker-4");
    host.fail_next(MockJoinFailure::Expired).await;
    let reconciler = reconciler(&host, &orchestrator);

    let result = reconciler
        .reconcile(NodeRole::Worker, Some(&fresh_credential()))
        .await;

    assert!(matches!(result, Err(Error::CredentialExpired(_))));
    assert_eq!(host.join_count().await, 1);
    assert_eq!(host.reset_count().await, 1);
    assert_eq!(reconciler.detect(NodeRole::Worker).await.unwrap(), NodeState::Clean);
}

#[tokio::test(start_paused = true)]
async fn persistent_unreachability_exhausts_retries() {
    let orchestrator = MockOrchestrator::ready(&test_config(Path::new("results")).cluster);
    let host = MockNodeHost::clean("worker-5");
    for _ in 0..3 {
        host.fail_next(MockJoinFailure::Unreachable).await;
    }
    let reconciler = reconciler(&host, &orchestrator);

    let result = reconciler
        .reconcile(NodeRole::Worker, Some(&fresh_credential()))
        .await;

    assert!(matches!(result, Err(Error::Unreachable(_))));
    assert_eq!(host.join_count().await, 3);
    assert!(host.residual_files().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn reset_leaving_residue_fails() {
    let orchestrator = MockOrchestrator::ready(&test_config(Path::new("results")).cluster);
    let host = MockNodeHost::half_joined_worker("worker-6");
    host.set_reset_leaves_residue(true).await;
    let reconciler = reconciler(&host, &orchestrator);

    let result = reconciler
        .reconcile(NodeRole::Worker, Some(&fresh_credential()))
        .await;

    assert!(matches!(result, Err(Error::ResetFailed(_))));
    assert_eq!(host.join_count().await, 0);
}

#[tokio::test(start_paused = true)]
async fn worker_requires_a_credential() {
    let orchestrator = MockOrchestrator::ready(&test_config(Path::new("results")).cluster);
    let host = MockNodeHost::clean("worker-8");
    let reconciler = reconciler(&host, &orchestrator);

    let result = reconciler.reconcile(NodeRole::Worker, None).await;
    assert!(matches!(result, Err(Error::InvalidRequest(_))));
}

#[tokio::test(start_paused = true)]
async fn control_plane_init_untaints_and_labels() {
    let config = test_config(Path::new("results"));
    let orchestrator = MockOrchestrator::empty(&config.cluster.namespace);
    orchestrator
        .add_node(NodeInfo {
            name: "cp-1".to_string(),
            ready: true,
            accelerators: 2,
            taints: vec!["node-role.kubernetes.io/control-plane".to_string()],
            ..Default::default()
        })
        .await;
    let host = MockNodeHost::clean("cp-1");
    let reconciler = reconciler(&host, &orchestrator);

    let outcome = reconciler.reconcile(NodeRole::ControlPlane, None).await.unwrap();
    assert_eq!(outcome.state, NodeState::Joined);
    assert_eq!(host.init_count().await, 1);

    let node = orchestrator.node("cp-1").await.unwrap();
    assert!(node.taints.is_empty());
    let label = &config.cluster.accelerator_label;
    assert_eq!(node.labels.get(&label.key), Some(&label.value));

    let credential = reconciler.mint_credential(Duration::from_secs(600)).await.unwrap();
    assert!(!credential.is_expired());
}

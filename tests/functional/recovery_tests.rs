//! Degraded clusters: failed masters, health checks and IP changes.

use redis_operator::crd::TopologyState;
use redis_operator::topology::{AddressingMode, ClusterCommand, PlannedOperation};

use crate::cluster_lifecycle_tests::formed_cluster;

#[tokio::test]
async fn test_restarted_master_is_met_at_new_ip() {
    let mock = formed_cluster(3, 3).await;
    mock.restart_pod("redis-leader-1", "10.0.1.99");
    let orchestrator = mock.orchestrator(AddressingMode::Hostname, 3, 3);

    assert_eq!(orchestrator.check_cluster_state().await.unwrap(), 1);
    assert!(!orchestrator.check_health().await.unwrap());

    let report = orchestrator.converge(3).await.unwrap();

    assert_eq!(report.state, TopologyState::Degraded);
    assert_eq!(report.executed, vec![PlannedOperation::RepairDisconnectedMasters]);
    assert_eq!(
        mock.commands_of("meet"),
        vec![ClusterCommand::Meet {
            ip: "10.0.1.99".to_string(),
            port: 6379
        }]
    );
    assert_eq!(orchestrator.check_cluster_state().await.unwrap(), 0);
    assert!(orchestrator.check_health().await.unwrap());
    assert_eq!(orchestrator.converge(3).await.unwrap().state, TopologyState::Stable);
}

#[tokio::test]
async fn test_repair_skips_masters_without_hostname() {
    let mock = formed_cluster(3, 0).await;
    mock.hide_hostnames();
    mock.restart_pod("redis-leader-1", "10.0.1.99");
    let orchestrator = mock.orchestrator(AddressingMode::PodIp, 3, 0);

    let report = orchestrator.converge(3).await.unwrap();

    assert_eq!(report.state, TopologyState::Degraded);
    assert!(report.failure.is_none());
    assert_eq!(report.skipped, vec![PlannedOperation::RepairDisconnectedMasters]);
    assert!(mock.commands_of("meet").is_empty());
}

#[tokio::test]
async fn test_repair_reports_failure_and_retries() {
    let mock = formed_cluster(3, 0).await;
    mock.restart_pod("redis-leader-2", "10.0.1.77");
    mock.fail_next("meet");
    let orchestrator = mock.orchestrator(AddressingMode::Hostname, 3, 0);

    let report = orchestrator.converge(3).await.unwrap();
    assert!(matches!(
        report.failure,
        Some((PlannedOperation::RepairDisconnectedMasters, _))
    ));

    let retry = orchestrator.converge(3).await.unwrap();
    assert!(retry.failure.is_none());
    assert_eq!(orchestrator.check_cluster_state().await.unwrap(), 0);
}

#[tokio::test]
async fn test_unstable_cluster_skips_empty_master_rebalance() {
    let mock = formed_cluster(3, 0).await;
    mock.restart_pod("redis-leader-2", "10.0.1.50");
    let orchestrator = mock.orchestrator(AddressingMode::PodIp, 3, 0);

    assert!(!orchestrator.is_stable().await.unwrap());
    assert_eq!(
        orchestrator.rebalance_empty_masters_if_stable().await.unwrap(),
        redis_operator::topology::Outcome::Skipped
    );
    assert!(mock.commands_of("rebalance").is_empty());
}

#[tokio::test]
async fn test_verify_leader_after_failover() {
    let mock = formed_cluster(3, 3).await;
    let orchestrator = mock.orchestrator(AddressingMode::PodIp, 3, 3);
    assert!(orchestrator.verify_leader(0).await.unwrap());

    mock.promote("redis-follower-0");
    assert!(!orchestrator.verify_leader(0).await.unwrap());

    orchestrator.cluster_failover(0).await.unwrap();
    assert!(orchestrator.verify_leader(0).await.unwrap());
    assert_eq!(mock.slots_of("redis-leader-0"), 5462);
}

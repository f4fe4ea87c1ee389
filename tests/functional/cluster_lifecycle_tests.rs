//! Cluster formation: create, single-leader bootstrap, follower attachment
//! and addressing consistency across a whole lifecycle.

use std::net::SocketAddr;

use redis_operator::crd::TopologyState;
use redis_operator::topology::{
    AddressingMode, ClusterCommand, ClusterInspector, CommandExecutor, ConvergeReport,
    TopologyOrchestrator,
};

use crate::mock_cluster::MockCluster;

/// Run converge passes until the cluster reports Stable.
pub async fn converge_until_stable<E: CommandExecutor, I: ClusterInspector>(
    orchestrator: &TopologyOrchestrator<E, I>,
    leader_statefulset_replicas: i32,
) -> Vec<ConvergeReport> {
    let mut reports = Vec::new();
    for _ in 0..6 {
        let report = orchestrator
            .converge(leader_statefulset_replicas)
            .await
            .unwrap();
        assert!(report.failure.is_none(), "pass failed: {:?}", report.failure);
        let stable = report.state == TopologyState::Stable;
        reports.push(report);
        if stable {
            return reports;
        }
    }
    panic!("cluster did not stabilise: {:?}", reports);
}

/// A formed cluster of `leaders` masters with `followers` attached.
pub async fn formed_cluster(leaders: i32, followers: i32) -> MockCluster {
    let mock = MockCluster::new("redis", leaders, followers);
    let orchestrator = mock.orchestrator(AddressingMode::PodIp, leaders, followers);
    converge_until_stable(&orchestrator, leaders).await;
    mock.clear_commands();
    mock
}

#[tokio::test]
async fn test_three_leader_bootstrap() {
    let mock = MockCluster::new("redis", 3, 3);
    let orchestrator = mock.orchestrator(AddressingMode::PodIp, 3, 3);

    let reports = converge_until_stable(&orchestrator, 3).await;

    assert_eq!(reports.len(), 3);
    assert_eq!(reports[0].state, TopologyState::Uninitialized);
    assert_eq!(reports[0].executed_count("cluster-create"), 1);
    assert_eq!(reports[1].state, TopologyState::ScalingUp);
    assert_eq!(reports[1].executed_count("attach-followers"), 1);

    let creates = mock.commands_of("create");
    assert_eq!(creates.len(), 1);
    assert_eq!(
        creates[0].addresses(),
        vec!["10.0.1.1:6379", "10.0.1.2:6379", "10.0.1.3:6379"]
    );
    assert_eq!(mock.commands_of("add-replica").len(), 3);
    assert_eq!(mock.assigned_slots(), 16384);
    assert_eq!(mock.masters().len(), 3);
}

#[tokio::test]
async fn test_follower_attaches_to_matching_leader() {
    let mock = MockCluster::new("redis", 3, 3);
    let orchestrator = mock.orchestrator(AddressingMode::PodIp, 3, 3);
    converge_until_stable(&orchestrator, 3).await;

    for i in 0..3 {
        assert_eq!(
            mock.master_of(&format!("redis-follower-{}", i)),
            Some(format!("redis-leader-{}", i))
        );
    }
    assert_eq!(orchestrator.check_node_count(None).await.unwrap(), 6);
    assert_eq!(
        orchestrator
            .check_node_count(Some(redis_operator::crd::ClusterRole::Follower))
            .await
            .unwrap(),
        3
    );
}

#[tokio::test]
async fn test_attach_followers_is_idempotent() {
    let mock = formed_cluster(3, 3).await;
    let orchestrator = mock.orchestrator(AddressingMode::PodIp, 3, 3);

    assert_eq!(orchestrator.attach_followers().await.unwrap(), 0);
    assert!(mock.commands_of("add-replica").is_empty());
}

#[tokio::test]
async fn test_unreachable_follower_is_skipped() {
    let mock = MockCluster::new("redis", 3, 2);
    let orchestrator = mock.orchestrator(AddressingMode::PodIp, 3, 2);
    orchestrator.create_cluster().await.unwrap();
    mock.set_unreachable("redis-follower-1", true);

    assert_eq!(orchestrator.attach_followers().await.unwrap(), 1);
    assert!(mock.members().contains(&"redis-follower-0".to_string()));
    assert!(!mock.members().contains(&"redis-follower-1".to_string()));
}

#[tokio::test]
async fn test_single_leader_assigns_all_slots() {
    let mock = MockCluster::new("redis", 1, 0);
    let orchestrator = mock.orchestrator(AddressingMode::PodIp, 1, 0);

    let reports = converge_until_stable(&orchestrator, 1).await;

    assert_eq!(reports.len(), 2);
    let kinds: Vec<&str> = mock.commands().iter().map(|c| c.command.kind()).collect();
    assert_eq!(kinds, vec!["reset", "add-slots"]);
    assert!(mock.commands_of("create").is_empty());
    assert_eq!(mock.slots_of("redis-leader-0"), 16384);
}

#[tokio::test]
async fn test_single_leader_flushes_when_reset_fails() {
    let mock = MockCluster::new("redis", 1, 0);
    let orchestrator = mock.orchestrator(AddressingMode::PodIp, 1, 0);
    mock.fail_next("reset");

    orchestrator.create_cluster().await.unwrap();

    let kinds: Vec<&str> = mock.commands().iter().map(|c| c.command.kind()).collect();
    assert_eq!(kinds, vec!["reset", "flushall", "reset", "add-slots"]);
    assert_eq!(mock.slots_of("redis-leader-0"), 16384);
}

#[tokio::test]
async fn test_single_leader_already_assigned_is_skipped() {
    let mock = formed_cluster(1, 0).await;
    let orchestrator = mock.orchestrator(AddressingMode::PodIp, 1, 0);

    assert_eq!(
        orchestrator.create_cluster().await.unwrap(),
        redis_operator::topology::Outcome::Skipped
    );
    assert!(mock.commands().is_empty());
}

#[tokio::test]
async fn test_stable_cluster_pass_changes_nothing() {
    let mock = formed_cluster(3, 3).await;
    let orchestrator = mock.orchestrator(AddressingMode::PodIp, 3, 3);

    let report = orchestrator.converge(3).await.unwrap();

    assert_eq!(report.state, TopologyState::Stable);
    assert!(report.executed.is_empty());
    assert!(mock.commands().is_empty());
    assert!(orchestrator.check_health().await.unwrap());
    assert_eq!(orchestrator.check_cluster_state().await.unwrap(), 0);
}

#[tokio::test]
async fn test_hostname_mode_uses_dns_names_everywhere() {
    let mock = MockCluster::new("redis", 3, 3);
    let orchestrator = mock.orchestrator(AddressingMode::for_cluster_version(Some("v7")), 3, 3);

    converge_until_stable(&orchestrator, 3).await;

    let commands = mock.commands();
    assert!(!commands.is_empty());
    for recorded in &commands {
        for address in recorded.command.addresses() {
            assert!(
                address.ends_with(".svc:6379"),
                "{} in {:?} is not a DNS address",
                address,
                recorded.command
            );
        }
    }
    assert_eq!(
        mock.commands_of("create")[0].addresses()[0],
        "redis-leader-0.redis-leader-headless.default.svc:6379"
    );
    assert_eq!(mock.members().len(), 6);
}

#[tokio::test]
async fn test_ip_mode_uses_pod_ips_everywhere() {
    let mock = MockCluster::new("redis", 3, 3);
    let orchestrator = mock.orchestrator(AddressingMode::for_cluster_version(None), 3, 3);

    converge_until_stable(&orchestrator, 3).await;

    for recorded in mock.commands() {
        for address in recorded.command.addresses() {
            assert!(
                address.parse::<SocketAddr>().is_ok(),
                "{} in {:?} is not an IP address",
                address,
                recorded.command
            );
        }
    }
    let follower_adds: Vec<ClusterCommand> = mock.commands_of("add-replica");
    assert!(follower_adds.iter().all(|c| c.addresses().len() == 2));
}

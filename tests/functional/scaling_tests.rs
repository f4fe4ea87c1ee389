//! Scale-up and scale-down against a formed cluster: operation ordering,
//! slot safety and stopping at the first failure.

use redis_operator::crd::TopologyState;
use redis_operator::topology::{
    AddressingMode, ClusterCommand, ConvergeReport, Outcome, PlannedOperation, TopologyError,
};

use crate::cluster_lifecycle_tests::{converge_until_stable, formed_cluster};
use crate::mock_cluster::MockCluster;

fn is_del_node_of(id: &str) -> impl Fn(&ClusterCommand) -> bool + '_ {
    move |c: &ClusterCommand| matches!(c, ClusterCommand::DelNode { node_id, .. } if node_id == id)
}

#[tokio::test]
async fn test_scale_up_adds_leader_and_rebalances() {
    let mock = MockCluster::new("redis", 4, 0);
    converge_until_stable(&mock.orchestrator(AddressingMode::PodIp, 3, 0), 3).await;
    mock.clear_commands();

    let orchestrator = mock.orchestrator(AddressingMode::PodIp, 4, 0);
    let report = orchestrator.converge(4).await.unwrap();

    assert_eq!(report.state, TopologyState::ScalingUp);
    assert_eq!(
        report.executed,
        vec![
            PlannedOperation::AddLeader { index: 3 },
            PlannedOperation::RebalanceEmptyMasters
        ]
    );
    assert!(matches!(
        mock.commands_of("rebalance").as_slice(),
        [ClusterCommand::Rebalance {
            use_empty_masters: true,
            ..
        }]
    ));
    for i in 0..4 {
        assert_eq!(mock.slots_of(&format!("redis-leader-{}", i)), 4096);
    }

    let next = orchestrator.converge(4).await.unwrap();
    assert_eq!(next.state, TopologyState::Stable);
}

#[tokio::test]
async fn test_scale_up_attaches_new_follower() {
    let mock = MockCluster::new("redis", 3, 3);
    converge_until_stable(&mock.orchestrator(AddressingMode::PodIp, 3, 2), 3).await;
    assert!(!mock.members().contains(&"redis-follower-2".to_string()));

    converge_until_stable(&mock.orchestrator(AddressingMode::PodIp, 3, 3), 3).await;

    assert_eq!(
        mock.master_of("redis-follower-2"),
        Some("redis-leader-2".to_string())
    );
}

#[tokio::test]
async fn test_empty_master_is_rebalanced_once() {
    let mock = MockCluster::new("redis", 4, 0);
    converge_until_stable(&mock.orchestrator(AddressingMode::PodIp, 3, 0), 3).await;
    let orchestrator = mock.orchestrator(AddressingMode::PodIp, 4, 0);
    orchestrator.add_leader(3).await.unwrap();
    mock.clear_commands();

    assert_eq!(orchestrator.check_if_empty_masters().await.unwrap(), Outcome::Executed);
    assert_eq!(mock.commands_of("rebalance").len(), 1);
    assert_eq!(mock.slots_of("redis-leader-3"), 4096);

    assert_eq!(orchestrator.check_if_empty_masters().await.unwrap(), Outcome::Skipped);
    assert_eq!(mock.commands_of("rebalance").len(), 1);
}

#[tokio::test]
async fn test_scale_down_orders_reshard_before_removal() {
    let mock = formed_cluster(4, 4).await;
    let leader_id = mock.node_id("redis-leader-3");
    let follower_id = mock.node_id("redis-follower-3");

    let orchestrator = mock.orchestrator(AddressingMode::PodIp, 3, 3);
    let report = orchestrator.converge(4).await.unwrap();

    assert_eq!(report.state, TopologyState::ScalingDown);
    assert!(report.failure.is_none());
    assert_eq!(report.skipped, vec![PlannedOperation::PromoteIfReplica { shard: 3 }]);

    let reshard = mock
        .position(|c| matches!(c, ClusterCommand::Reshard { from_node_id, .. } if *from_node_id == leader_id))
        .unwrap();
    let remove_follower = mock.position(is_del_node_of(&follower_id)).unwrap();
    let remove_leader = mock.position(is_del_node_of(&leader_id)).unwrap();
    let rebalance = mock
        .position(|c| matches!(c, ClusterCommand::Rebalance { .. }))
        .unwrap();
    assert!(reshard < remove_follower);
    assert!(remove_follower < remove_leader);
    assert!(remove_leader < rebalance);

    assert_eq!(mock.masters(), vec!["redis-leader-0", "redis-leader-1", "redis-leader-2"]);
    assert_eq!(mock.assigned_slots(), 16384);
    assert!(!mock.members().contains(&"redis-follower-3".to_string()));

    // StatefulSets shrink afterwards; the next pass sees a stable cluster
    let next = orchestrator.converge(3).await.unwrap();
    assert_eq!(next.state, TopologyState::Stable);
}

#[tokio::test]
async fn test_scale_down_reshards_to_modulo_target() {
    let mock = formed_cluster(5, 0).await;
    let target_of_4 = mock.node_id("redis-leader-1");
    let target_of_3 = mock.node_id("redis-leader-0");

    let orchestrator = mock.orchestrator(AddressingMode::PodIp, 3, 0);
    orchestrator.converge(5).await.unwrap();

    let targets: Vec<String> = mock
        .commands_of("reshard")
        .into_iter()
        .filter_map(|c| match c {
            ClusterCommand::Reshard { to_node_id, .. } => Some(to_node_id),
            _ => None,
        })
        .collect();
    assert_eq!(targets, vec![target_of_4, target_of_3]);
    assert_eq!(mock.masters().len(), 3);
    assert_eq!(mock.assigned_slots(), 16384);
}

#[tokio::test]
async fn test_scale_down_promotes_leader_pod_first() {
    let mock = formed_cluster(4, 4).await;
    mock.promote("redis-follower-3");
    assert_eq!(mock.master_of("redis-leader-3"), Some("redis-follower-3".to_string()));

    let orchestrator = mock.orchestrator(AddressingMode::PodIp, 3, 3);
    let report = orchestrator.converge(4).await.unwrap();

    assert!(report.failure.is_none());
    assert_eq!(report.executed.first(), Some(&PlannedOperation::PromoteIfReplica { shard: 3 }));
    let first = &mock.commands()[0];
    assert_eq!(first.target, "redis-leader-3");
    assert_eq!(first.command, ClusterCommand::Failover);

    assert_eq!(mock.masters(), vec!["redis-leader-0", "redis-leader-1", "redis-leader-2"]);
    assert!(!mock.members().contains(&"redis-follower-3".to_string()));
}

#[tokio::test]
async fn test_scale_down_finishes_when_extra_leader_never_joined() {
    let mock = formed_cluster(3, 0).await;
    let orchestrator = mock.orchestrator(AddressingMode::PodIp, 3, 0);

    // Four leader replicas declared but leader-3 never joined
    let report = orchestrator.converge(4).await.unwrap();

    assert_eq!(report.state, TopologyState::ScalingDown);
    assert_eq!(report.executed, vec![PlannedOperation::Rebalance]);
    assert!(report.ran_to_completion());
    assert!(mock.commands_of("del-node").is_empty());
    assert!(mock.commands_of("reshard").is_empty());
}

/// Drive passes the way the reconciler does: scale-down passes at the
/// current StatefulSet size, which shrinks only after a complete pass.
async fn scale_down_until_stable(
    orchestrator: &redis_operator::topology::TopologyOrchestrator<MockCluster, MockCluster>,
    mut statefulset_replicas: i32,
    desired: i32,
) -> (i32, Vec<ConvergeReport>) {
    let mut reports = Vec::new();
    for _ in 0..6 {
        let report = orchestrator.converge(statefulset_replicas).await.unwrap();
        if statefulset_replicas > desired && report.ran_to_completion() {
            statefulset_replicas = desired;
        }
        let stable = report.state == TopologyState::Stable;
        reports.push(report);
        if stable {
            return (statefulset_replicas, reports);
        }
    }
    panic!("scale-down did not finish: {:?}", reports);
}

#[tokio::test]
async fn test_scale_down_resumes_after_failed_second_reshard() {
    let mock = formed_cluster(5, 0).await;
    mock.fail_after("reshard", 1);
    let orchestrator = mock.orchestrator(AddressingMode::PodIp, 3, 0);

    let first = orchestrator.converge(5).await.unwrap();

    let (operation, _) = first.failure.as_ref().unwrap();
    assert_eq!(*operation, PlannedOperation::Reshard { shard: 3, to: 0 });
    assert_eq!(mock.masters().len(), 4);

    let (statefulset_replicas, reports) = scale_down_until_stable(&orchestrator, 5, 3).await;

    assert_eq!(
        reports[0].executed,
        vec![
            PlannedOperation::Reshard { shard: 3, to: 0 },
            PlannedOperation::RemoveLeader { shard: 3 },
            PlannedOperation::Rebalance
        ]
    );
    assert_eq!(statefulset_replicas, 3);
    assert_eq!(mock.masters(), vec!["redis-leader-0", "redis-leader-1", "redis-leader-2"]);
    assert_eq!(mock.assigned_slots(), 16384);
}

#[tokio::test]
async fn test_scale_down_retries_failed_rebalance() {
    let mock = formed_cluster(4, 0).await;
    mock.fail_next("rebalance");
    let orchestrator = mock.orchestrator(AddressingMode::PodIp, 3, 0);

    let first = orchestrator.converge(4).await.unwrap();
    assert_eq!(first.failure.as_ref().map(|(op, _)| *op), Some(PlannedOperation::Rebalance));
    assert_eq!(mock.masters().len(), 3);

    let (statefulset_replicas, reports) = scale_down_until_stable(&orchestrator, 4, 3).await;

    assert_eq!(reports[0].executed, vec![PlannedOperation::Rebalance]);
    assert_eq!(mock.commands_of("rebalance").len(), 2);
    assert_eq!(statefulset_replicas, 3);
    assert_eq!(mock.assigned_slots(), 16384);
}

#[tokio::test]
async fn test_failed_step_stops_the_pass() {
    let mock = formed_cluster(4, 4).await;
    mock.fail_next("reshard");

    let orchestrator = mock.orchestrator(AddressingMode::PodIp, 3, 3);
    let report = orchestrator.converge(4).await.unwrap();

    let (operation, error) = report.failure.unwrap();
    assert_eq!(operation, PlannedOperation::Reshard { shard: 3, to: 0 });
    assert!(matches!(error, TopologyError::Executor { .. }));
    assert!(mock.commands_of("del-node").is_empty());
    assert!(mock.commands_of("rebalance").is_empty());
    assert_eq!(mock.masters().len(), 4);

    let retry = orchestrator.converge(4).await.unwrap();
    assert!(retry.failure.is_none());
    assert_eq!(mock.masters().len(), 3);
}

#[tokio::test]
async fn test_reshard_of_empty_node_is_skipped() {
    let mock = MockCluster::new("redis", 4, 0);
    converge_until_stable(&mock.orchestrator(AddressingMode::PodIp, 3, 0), 3).await;
    let orchestrator = mock.orchestrator(AddressingMode::PodIp, 4, 0);
    orchestrator.add_leader(3).await.unwrap();
    mock.clear_commands();

    let outcome = orchestrator
        .reshard_away(&mock.node_id("redis-leader-3"), &mock.node_id("redis-leader-0"))
        .await
        .unwrap();

    assert_eq!(outcome, Outcome::Skipped);
    assert!(mock.commands().is_empty());
}

#[tokio::test]
async fn test_reshard_rejects_bad_node_ids() {
    let mock = formed_cluster(3, 0).await;
    let orchestrator = mock.orchestrator(AddressingMode::PodIp, 3, 0);
    let id = mock.node_id("redis-leader-1");

    assert!(matches!(
        orchestrator.reshard_away("", &id).await,
        Err(TopologyError::PreconditionViolation(_))
    ));
    assert!(matches!(
        orchestrator.reshard_away(&id, &id).await,
        Err(TopologyError::PreconditionViolation(_))
    ));
    assert!(mock.commands().is_empty());
}

#[tokio::test]
async fn test_node_owning_slots_is_never_removed() {
    let mock = formed_cluster(3, 0).await;
    let orchestrator = mock.orchestrator(AddressingMode::PodIp, 3, 0);

    let result = orchestrator
        .remove_node(&mock.node_id("redis-leader-2"))
        .await;

    assert!(matches!(result, Err(TopologyError::PreconditionViolation(_))));
    assert!(mock.commands_of("del-node").is_empty());
    assert_eq!(mock.masters().len(), 3);
}

#[tokio::test]
async fn test_remove_attached_replicas_only_touches_that_shard() {
    let mock = formed_cluster(3, 3).await;
    let orchestrator = mock.orchestrator(AddressingMode::PodIp, 3, 3);

    let removed = orchestrator
        .remove_attached_replicas(&mock.node_id("redis-leader-1"))
        .await
        .unwrap();

    assert_eq!(removed, 1);
    assert_eq!(
        mock.members(),
        vec![
            "redis-leader-0",
            "redis-leader-1",
            "redis-leader-2",
            "redis-follower-0",
            "redis-follower-2"
        ]
    );
}

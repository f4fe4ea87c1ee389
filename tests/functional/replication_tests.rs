//! Replication groups: real-master resolution, `SLAVEOF` repair and the
//! sentinel monitor target that follows the resolved master.

use redis_operator::crd::RedisSentinelConfig;
use redis_operator::replication::{ReplicationManager, RoleLabel, label_changes};
use redis_operator::sentinel::MonitorTarget;
use redis_operator::topology::{AddressingMode, ClusterCommand};

use crate::mock_cluster::MockCluster;

fn manager(mock: &MockCluster, mode: AddressingMode, size: i32) -> ReplicationManager<MockCluster, MockCluster> {
    ReplicationManager::new(mock.clone(), mock.clone(), mock.addressing(mode), size)
}

fn replica_of(host: &str) -> ClusterCommand {
    ClusterCommand::ReplicaOf {
        host: host.to_string(),
        port: 6379,
    }
}

#[tokio::test]
async fn test_fresh_group_converges_on_first_pod() {
    let mock = MockCluster::replication("cache", 3);
    let manager = manager(&mock, AddressingMode::PodIp, 3);

    let report = manager.reconcile_topology().await.unwrap();

    assert_eq!(report.master(), Some("cache-0"));
    assert_eq!(report.repointed, vec!["cache-1", "cache-2"]);
    assert!(report.failed.is_empty());
    assert_eq!(mock.commands_of("replicaof"), vec![replica_of("10.0.3.1"); 2]);
    assert_eq!(mock.master_of("cache-1"), Some("cache-0".to_string()));
    assert_eq!(mock.master_of("cache-2"), Some("cache-0".to_string()));
}

#[tokio::test]
async fn test_converged_group_sends_nothing() {
    let mock = MockCluster::replication("cache", 3);
    let manager = manager(&mock, AddressingMode::PodIp, 3);
    manager.reconcile_topology().await.unwrap();
    mock.clear_commands();

    let report = manager.reconcile_topology().await.unwrap();

    assert_eq!(report.master(), Some("cache-0"));
    assert!(report.repointed.is_empty());
    assert!(mock.commands().is_empty());
    assert_eq!(report.assignment.label_for("cache-0"), Some(RoleLabel::Master));
    assert_eq!(report.assignment.label_for("cache-2"), Some(RoleLabel::Slave));
    assert_eq!(report.assignment.attached["cache-0"].len(), 2);
}

#[tokio::test]
async fn test_restarted_pod_does_not_steal_mastership() {
    // cache-1 took over while cache-0 was away; cache-0 came back empty
    let mock = MockCluster::replication("cache", 3);
    mock.replicate("cache-2", "cache-1");
    let manager = manager(&mock, AddressingMode::PodIp, 3);

    let report = manager.reconcile_topology().await.unwrap();

    assert_eq!(report.master(), Some("cache-1"));
    assert_eq!(report.repointed, vec!["cache-0"]);
    assert_eq!(mock.commands_of("replicaof"), vec![replica_of("10.0.3.2")]);
    assert_eq!(mock.master_of("cache-0"), Some("cache-1".to_string()));
}

#[tokio::test]
async fn test_unreachable_pod_is_left_alone() {
    let mock = MockCluster::replication("cache", 3);
    mock.set_unreachable("cache-2", true);
    let manager = manager(&mock, AddressingMode::PodIp, 3);

    let report = manager.reconcile_topology().await.unwrap();

    assert_eq!(report.master(), Some("cache-0"));
    assert_eq!(report.repointed, vec!["cache-1"]);
    assert!(mock.commands().iter().all(|c| c.target != "cache-2"));
}

#[tokio::test]
async fn test_failed_repoint_is_reported() {
    let mock = MockCluster::replication("cache", 3);
    mock.fail_next("replicaof");
    let manager = manager(&mock, AddressingMode::PodIp, 3);

    let report = manager.reconcile_topology().await.unwrap();

    assert_eq!(report.failed, vec!["cache-1"]);
    assert_eq!(report.repointed, vec!["cache-2"]);

    let retry = manager.reconcile_topology().await.unwrap();
    assert_eq!(retry.repointed, vec!["cache-1"]);
    assert!(retry.failed.is_empty());
}

#[tokio::test]
async fn test_hostname_mode_points_at_dns_name() {
    let mock = MockCluster::replication("cache", 2);
    let manager = manager(&mock, AddressingMode::Hostname, 2);

    manager.reconcile_topology().await.unwrap();

    assert_eq!(
        mock.commands_of("replicaof"),
        vec![replica_of("cache-0.cache-headless.default.svc")]
    );
}

#[tokio::test]
async fn test_single_pod_group_is_its_own_master() {
    let mock = MockCluster::replication("cache", 1);
    let manager = manager(&mock, AddressingMode::PodIp, 1);

    let master = manager.master_node().await.unwrap().unwrap();

    assert_eq!(master.pod_name, "cache-0");
    assert_eq!(master.address(), "10.0.3.1:6379");
    assert!(manager.reconcile_topology().await.unwrap().repointed.is_empty());
}

#[tokio::test]
async fn test_sentinel_target_follows_master() {
    let mock = MockCluster::replication("cache", 3);
    mock.replicate("cache-0", "cache-1");
    mock.replicate("cache-2", "cache-1");
    let manager = manager(&mock, AddressingMode::PodIp, 3);
    let config: RedisSentinelConfig =
        serde_json::from_value(serde_json::json!({"redisReplicationName": "cache"})).unwrap();

    let master = manager.master_node().await.unwrap().unwrap();
    let target = MonitorTarget::new(&config, &master, Some("s3cret".to_string()));

    assert_eq!(target.address(), "10.0.3.2:6379");
    let current = ("10.0.3.1".to_string(), 6379);
    let kinds: Vec<&str> = target
        .commands_for(Some(&current))
        .iter()
        .map(|c| c.kind())
        .collect();
    assert_eq!(kinds, vec!["remove", "monitor", "set", "reset"]);

    let monitored = (target.host.clone(), target.port);
    assert!(target.commands_for(Some(&monitored)).is_empty());
}

/// Labels after applying the assignment on top of `current`.
fn labels_after(
    current: &[(String, Option<String>)],
    report: &redis_operator::replication::ReplicationReport,
) -> Vec<(String, Option<String>)> {
    let desired = report.assignment.labels_to_apply().unwrap();
    let changes = label_changes(current, desired);
    current
        .iter()
        .map(|(pod, label)| {
            let label = changes
                .iter()
                .find(|(changed, _)| changed == pod)
                .map(|(_, role)| role.as_str().to_string())
                .or_else(|| label.clone());
            (pod.clone(), label)
        })
        .collect()
}

#[tokio::test]
async fn test_unrepointed_stray_master_is_labeled_slave() {
    let mock = MockCluster::replication("cache", 3);
    mock.replicate("cache-2", "cache-1");
    mock.fail_next("replicaof");
    let manager = manager(&mock, AddressingMode::PodIp, 3);

    let report = manager.reconcile_topology().await.unwrap();

    // cache-0 still answers role:master but is not the resolved master
    assert_eq!(report.failed, vec!["cache-0"]);
    assert!(mock.node("cache-0").master_id.is_none());
    let current = vec![
        ("cache-0".to_string(), Some("master".to_string())),
        ("cache-1".to_string(), Some("master".to_string())),
        ("cache-2".to_string(), None),
    ];
    let masters: Vec<String> = labels_after(&current, &report)
        .into_iter()
        .filter(|(_, label)| label.as_deref() == Some("master"))
        .map(|(pod, _)| pod)
        .collect();
    assert_eq!(masters, vec!["cache-1"]);
}

#[tokio::test]
async fn test_unreachable_single_pod_keeps_master_label() {
    let mock = MockCluster::replication("cache", 1);
    mock.set_unreachable("cache-0", true);
    let manager = manager(&mock, AddressingMode::PodIp, 1);

    let report = manager.reconcile_topology().await.unwrap();

    assert_eq!(report.assignment.label_for("cache-0"), Some(RoleLabel::Master));
    let current = vec![("cache-0".to_string(), Some("master".to_string()))];
    assert_eq!(labels_after(&current, &report), current);
}

#[tokio::test]
async fn test_no_labels_written_without_master() {
    let mock = MockCluster::replication("cache", 3);
    for pod in ["cache-0", "cache-1", "cache-2"] {
        mock.set_unreachable(pod, true);
    }
    let manager = manager(&mock, AddressingMode::PodIp, 3);

    let report = manager.reconcile_topology().await.unwrap();

    assert!(report.master().is_none());
    assert!(report.assignment.labels_to_apply().is_none());
}

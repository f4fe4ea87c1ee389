// Test code is allowed to panic on failure
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic,
    clippy::string_slice
)]

//! Property-based tests for redis-operator.
//!
//! Uses proptest to generate random inputs and verify invariants.

use proptest::prelude::*;

use redis_operator::client::types::count_slots_owned_by;
use redis_operator::client::{ClusterTopologySnapshot, ReplicationRole, SlotAssignment};
use redis_operator::crd::{TOTAL_HASH_SLOTS, TopologyState};
use redis_operator::replication::{PodRole, ReplicationRoleAssignment, RoleLabel, resolve_master};
use redis_operator::topology::plan::scale_down;
use redis_operator::topology::{
    Addressing, AddressingMode, ClusterObservation, PlannedOperation, TopologyError, classify,
    plan,
};

/// Strategy for cut points that split 0..16383 into `masters` contiguous ranges.
fn slot_partition(masters: usize) -> impl Strategy<Value = Vec<(u16, u16)>> {
    prop::collection::btree_set(1..TOTAL_HASH_SLOTS as u16, masters - 1).prop_map(|cuts| {
        let mut bounds = vec![0u16];
        bounds.extend(cuts);
        bounds.push(TOTAL_HASH_SLOTS as u16);
        bounds.windows(2).map(|w| (w[0], w[1] - 1)).collect()
    })
}

fn node_id(i: usize) -> String {
    format!("{:040x}", 0xbeef + i)
}

fn render_nodes(ranges: &[(u16, u16)], replicas: usize) -> String {
    let mut out = String::new();
    for (i, (start, end)) in ranges.iter().enumerate() {
        out.push_str(&format!(
            "{} 10.0.1.{}:6379@16379 master - 0 0 {} connected {}-{}\n",
            node_id(i),
            i + 1,
            i + 1,
            start,
            end
        ));
    }
    for r in 0..replicas {
        out.push_str(&format!(
            "{} 10.0.2.{}:6379@16379 slave {} 0 0 1 connected\n",
            node_id(100 + r),
            r + 1,
            node_id(r % ranges.len())
        ));
    }
    out
}

/// Strategy for what a replication pod reported.
fn any_pod_role() -> impl Strategy<Value = (Option<bool>, u32)> {
    (
        prop_oneof![Just(None), Just(Some(true)), Just(Some(false))],
        0..4u32,
    )
}

fn pods_from(roles: &[(Option<bool>, u32)]) -> Vec<PodRole> {
    roles
        .iter()
        .enumerate()
        .map(|(i, (role, replicas))| PodRole {
            pod_name: format!("cache-{}", i),
            role: role.map(|master| {
                if master {
                    ReplicationRole::Master
                } else {
                    ReplicationRole::Slave
                }
            }),
            online_replicas: if *role == Some(true) { *replicas } else { 0 },
            replica_addresses: Vec::new(),
        })
        .collect()
}

fn observation() -> impl Strategy<Value = ClusterObservation> {
    (1..8i32, 0..8i32, 1..10i32, 0..10i32, 0..20i32, 0..3i32, any::<bool>()).prop_map(
        |(desired_leaders, desired_followers, sts, live_masters, extra_nodes, failed, full)| {
            ClusterObservation {
                desired_leaders,
                desired_followers,
                leader_statefulset_replicas: sts,
                live_masters,
                live_nodes: live_masters + extra_nodes,
                failed_nodes: failed,
                slots_assigned: if full { TOTAL_HASH_SLOTS } else { 0 },
                full_coverage: full,
            }
        },
    )
}

proptest! {
    /// Property: Slots parsed from CLUSTER NODES add up to every slot exactly
    /// once, whatever the split between masters.
    #[test]
    fn test_partitioned_slots_cover_everything(
        ranges in (3usize..12).prop_flat_map(slot_partition),
        replicas in 0usize..12
    ) {
        let snapshot = ClusterTopologySnapshot::parse(&render_nodes(&ranges, replicas)).unwrap();

        prop_assert_eq!(snapshot.masters().len(), ranges.len());
        prop_assert_eq!(snapshot.total_slots_assigned(), TOTAL_HASH_SLOTS);
        prop_assert!(snapshot.has_full_coverage());
        prop_assert!(snapshot.is_stable());
        let attached: usize = (0..ranges.len())
            .map(|i| snapshot.attached_replicas(&node_id(i)).len())
            .sum();
        prop_assert_eq!(attached, replicas);
    }

    /// Property: Dropping any master leaves a coverage hole.
    #[test]
    fn test_missing_master_breaks_coverage(
        ranges in (3usize..8).prop_flat_map(slot_partition),
        drop in 0usize..8
    ) {
        let drop = drop % ranges.len();
        let text: String = render_nodes(&ranges, 0)
            .lines()
            .enumerate()
            .filter(|(i, _)| *i != drop)
            .map(|(_, line)| format!("{}\n", line))
            .collect();
        let snapshot = ClusterTopologySnapshot::parse(&text).unwrap();

        prop_assert!(!snapshot.has_full_coverage());
        prop_assert!(snapshot.total_slots_assigned() < TOTAL_HASH_SLOTS);
    }

    /// Property: A node owns the sum of the ranges that list it and nothing
    /// else; an unknown node owns zero.
    #[test]
    fn test_slot_count_matches_ranges(ranges in (3usize..10).prop_flat_map(slot_partition)) {
        let ids: Vec<String> = (0..ranges.len()).map(node_id).collect();
        let assignments: Vec<SlotAssignment> = ranges
            .iter()
            .zip(&ids)
            .map(|((start, end), id)| SlotAssignment::new(*start, *end, &[id.as_str()]))
            .collect();

        let mut total = 0;
        for (i, (start, end)) in ranges.iter().enumerate() {
            let owned = count_slots_owned_by(&assignments, &ids[i]);
            prop_assert_eq!(owned, u32::from(end - start) + 1);
            total += owned;
        }
        prop_assert_eq!(total, TOTAL_HASH_SLOTS);
        prop_assert_eq!(count_slots_owned_by(&assignments, &node_id(999)), 0);
    }

    /// Property: The resolved master claims mastership, has the most online
    /// replicas and is the only pod labeled master.
    #[test]
    fn test_master_resolution(roles in prop::collection::vec(any_pod_role(), 2..7)) {
        let pods = pods_from(&roles);
        let size = i32::try_from(pods.len()).unwrap();
        let assignment = ReplicationRoleAssignment::resolve(&pods, size);

        match resolve_master(&pods, size) {
            Some(master) => {
                prop_assert!(master.claims_master());
                let best = pods.iter().filter(|p| p.claims_master()).map(|p| p.online_replicas).max();
                prop_assert_eq!(Some(master.online_replicas), best);
                let labeled: Vec<&String> = assignment
                    .labels
                    .iter()
                    .filter(|(_, label)| **label == RoleLabel::Master)
                    .map(|(pod, _)| pod)
                    .collect();
                prop_assert_eq!(labeled, vec![&master.pod_name]);
                prop_assert!(!assignment.stray_masters.contains(&master.pod_name));
            }
            None => {
                prop_assert!(pods.iter().all(|p| !p.claims_master()));
                prop_assert!(assignment.stray_masters.is_empty());
                prop_assert!(assignment.labels_to_apply().is_none());
            }
        }
        prop_assert_eq!(ReplicationRoleAssignment::resolve(&pods, size), assignment);
    }

    /// Property: Every departing shard is resharded, emptied of replicas and
    /// removed in that order, to a surviving leader, with one rebalance last.
    #[test]
    fn test_scale_down_ordering(desired in 1i32..10, extra in 1i32..10) {
        let current = desired + extra;
        let ops = scale_down(current, desired);

        prop_assert_eq!(ops.len(), usize::try_from(4 * extra + 1).unwrap());
        prop_assert_eq!(ops.last(), Some(&PlannedOperation::Rebalance));
        for shard in desired..current {
            let at = |op: PlannedOperation| ops.iter().position(|o| *o == op).unwrap();
            let reshard = ops
                .iter()
                .position(|o| matches!(o, PlannedOperation::Reshard { shard: s, to } if *s == shard && *to < desired))
                .unwrap();
            prop_assert!(at(PlannedOperation::PromoteIfReplica { shard }) < reshard, "promote must precede reshard for shard {}", shard);
            prop_assert!(reshard < at(PlannedOperation::RemoveReplicas { shard }), "reshard must precede replica removal for shard {}", shard);
            prop_assert!(at(PlannedOperation::RemoveReplicas { shard }) < at(PlannedOperation::RemoveLeader { shard }), "replica removal must precede leader removal for shard {}", shard);
        }
    }

    /// Property: Leaders are only removed while the StatefulSet still holds
    /// more leaders than declared, only shards that are still live masters
    /// are removed, and the state is then ScalingDown.
    #[test]
    fn test_removal_only_when_scaling_down(obs in observation()) {
        let planned = plan(&obs);
        let removes = planned
            .operations
            .iter()
            .any(|op| matches!(op, PlannedOperation::RemoveLeader { .. } | PlannedOperation::Reshard { .. }));
        if removes {
            prop_assert!(obs.leader_statefulset_replicas > obs.desired_leaders);
            prop_assert!(obs.live_masters > obs.desired_leaders);
            prop_assert!(obs.live_masters <= obs.leader_statefulset_replicas);
        }
        for op in &planned.operations {
            if let PlannedOperation::RemoveLeader { shard } = op {
                prop_assert!((obs.desired_leaders..obs.live_masters).contains(shard));
            }
        }
        if obs.leader_statefulset_replicas > obs.desired_leaders {
            prop_assert_eq!(classify(&obs), TopologyState::ScalingDown);
        }
        prop_assert_eq!(planned.state, classify(&obs));
    }

    /// Property: Node references never carry an empty host.
    #[test]
    fn test_node_refs_have_hosts(
        index in 0i32..50,
        ip in prop_oneof![Just(String::new()), Just("  ".to_string()), "10\\.[0-9]{1,3}\\.[0-9]{1,3}\\.[0-9]{1,3}"],
        hostname_mode in any::<bool>()
    ) {
        let mode = if hostname_mode { AddressingMode::Hostname } else { AddressingMode::PodIp };
        let addressing = Addressing::new("redis", "prod", 6379, mode);
        let pod = addressing.replication_pod(index);

        match addressing.node_ref(&pod, Some(&ip)) {
            Ok(node) => {
                prop_assert!(!node.host.trim().is_empty());
                prop_assert!(node.address().ends_with(":6379"));
                if hostname_mode {
                    prop_assert!(node.host.starts_with(&format!("{}.", pod)), "host {} should start with pod name {}", node.host, pod);
                }
            }
            Err(e) => {
                prop_assert!(!hostname_mode);
                prop_assert!(ip.trim().is_empty());
                prop_assert!(matches!(e, TopologyError::PreconditionViolation(_)));
            }
        }
    }
}

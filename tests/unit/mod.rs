//! Unit tests for redis-operator.
//!
//! These tests run without a Kubernetes cluster and test individual
//! components in isolation.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]

mod crd_tests {
    use kube::CustomResourceExt;
    use redis_operator::crd::{
        ClusterRole, Condition, Redis, RedisCluster, RedisClusterSpec, RedisReplication,
        RedisSentinel, ResourceState, TopologyState,
    };

    #[test]
    fn test_state_display() {
        assert_eq!(ResourceState::Initializing.to_string(), "Initializing");
        assert_eq!(ResourceState::Bootstrap.to_string(), "Bootstrap");
        assert_eq!(ResourceState::Ready.to_string(), "Ready");
        assert_eq!(ResourceState::Failed.to_string(), "Failed");
        assert_eq!(TopologyState::ScalingDown.to_string(), "ScalingDown");
    }

    #[test]
    fn test_state_default() {
        assert_eq!(ResourceState::default(), ResourceState::Initializing);
        assert_eq!(TopologyState::default(), TopologyState::Uninitialized);
    }

    #[test]
    fn test_condition_ready() {
        let condition = Condition::ready(true, "Ready", "Cluster is healthy", Some(1));
        assert_eq!(condition.r#type, "Ready");
        assert_eq!(condition.status, "True");
        assert_eq!(condition.reason, "Ready");
        assert_eq!(condition.observed_generation, Some(1));
        assert!(!condition.last_transition_time.is_empty());
    }

    #[test]
    fn test_condition_not_ready() {
        let condition = Condition::ready(false, "Bootstrap", "Forming cluster", None);
        assert_eq!(condition.status, "False");
    }

    #[test]
    fn test_crd_names() {
        let crds = [
            (RedisCluster::crd(), "RedisCluster", "redisclusters"),
            (RedisReplication::crd(), "RedisReplication", "redisreplications"),
            (RedisSentinel::crd(), "RedisSentinel", "redissentinels"),
            (Redis::crd(), "Redis", "redis"),
        ];
        for (crd, kind, plural) in crds {
            assert_eq!(crd.spec.group, "redisoperator.smoketurner.com");
            assert_eq!(crd.spec.names.kind, kind);
            assert_eq!(crd.spec.names.plural, plural);
            assert_eq!(crd.spec.scope, "Namespaced");
        }
    }

    #[test]
    fn test_cluster_manifest_round_trip_keeps_overrides() {
        let spec: RedisClusterSpec = serde_json::from_value(serde_json::json!({
            "clusterSize": 6,
            "clusterVersion": "v7",
            "redisFollower": {"replicas": 3},
            "kubernetesConfig": {
                "existingPasswordSecret": {"name": "redis-auth"},
                "service": {"serviceType": "NodePort"}
            },
            "storage": {"enabled": true, "keepAfterDelete": true}
        }))
        .unwrap();

        assert_eq!(spec.replicas_for(ClusterRole::Leader), 6);
        assert_eq!(spec.replicas_for(ClusterRole::Follower), 3);
        assert!(spec.uses_hostnames());
        assert!(spec.storage.keep_after_delete);
        assert_eq!(
            spec.kubernetes_config
                .existing_password_secret
                .as_ref()
                .unwrap()
                .key,
            "password"
        );

        let value = serde_json::to_value(&spec).unwrap();
        assert_eq!(value["kubernetesConfig"]["service"]["serviceType"], "NodePort");
        assert_eq!(value["redisFollower"]["replicas"], 3);
        assert!(value["redisLeader"].get("replicas").is_none());
    }

    #[test]
    fn test_replication_defaults() {
        let replication = RedisReplication::new("cache", Default::default());
        assert_eq!(replication.spec.cluster_size, 3);
        assert_eq!(replication.spec.port, 6379);
        assert_eq!(replication.spec.kubernetes_config.image, "redis:7.2");
        assert!(!replication.spec.storage.enabled);
    }
}

mod error_tests {
    use redis_operator::controller::error::Error;
    use redis_operator::topology::TopologyError;
    use std::time::Duration;

    fn api_error(code: u16) -> kube::Error {
        kube::Error::Api(kube::error::ErrorResponse {
            status: "Failure".to_string(),
            message: "test".to_string(),
            reason: "Test".to_string(),
            code,
        })
    }

    #[test]
    fn test_error_is_retryable() {
        assert!(Error::Kube(api_error(504)).is_retryable());
        assert!(Error::Kube(api_error(409)).is_retryable());
        assert!(!Error::Kube(api_error(403)).is_retryable());
        assert!(!Error::Validation("invalid spec".to_string()).is_retryable());
        assert!(Error::Transient("secret missing".to_string()).is_retryable());
    }

    #[test]
    fn test_topology_errors_retry() {
        let err = Error::from(TopologyError::precondition("node still owns slots"));
        assert!(err.is_retryable());
        assert_eq!(err.requeue_after(), Duration::from_secs(30));
    }

    #[test]
    fn test_not_found_through_topology() {
        assert!(Error::Kube(api_error(404)).is_not_found());
        assert!(Error::Topology(TopologyError::Kube(api_error(404))).is_not_found());
        assert!(!Error::MissingField("password".to_string()).is_not_found());
    }

    #[test]
    fn test_permanent_errors_back_off() {
        let err = Error::Permanent("unsupported".to_string());
        assert_eq!(err.requeue_after(), Duration::from_secs(300));
    }
}

mod status_tests {
    use redis_operator::controller::status::{
        carry_transition_times, conditions_for, is_condition_true,
    };
    use redis_operator::crd::{Condition, ResourceState};

    #[test]
    fn test_ready_state_conditions() {
        let conditions = conditions_for(ResourceState::Ready, "Cluster is healthy", Some(2));

        assert_eq!(conditions.len(), 3);
        assert!(is_condition_true(&conditions, "Ready"));
        assert!(!is_condition_true(&conditions, "Progressing"));
        assert!(!is_condition_true(&conditions, "Degraded"));
        assert!(conditions.iter().all(|c| c.observed_generation == Some(2)));
    }

    #[test]
    fn test_failed_state_is_degraded() {
        let conditions = conditions_for(ResourceState::Failed, "1 node failed", None);
        assert!(is_condition_true(&conditions, "Degraded"));
        assert!(!is_condition_true(&conditions, "Ready"));
    }

    #[test]
    fn test_transition_time_kept_when_status_unchanged() {
        let mut previous = conditions_for(ResourceState::Bootstrap, "", None);
        for condition in &mut previous {
            condition.last_transition_time = "2024-01-01T00:00:00Z".to_string();
        }

        let next = carry_transition_times(
            &previous,
            conditions_for(ResourceState::Ready, "", None),
        );

        let time_of = |t: &str| {
            next.iter()
                .find(|c| c.r#type == t)
                .map(|c| c.last_transition_time.clone())
                .unwrap()
        };
        assert_ne!(time_of("Ready"), "2024-01-01T00:00:00Z");
        assert_ne!(time_of("Progressing"), "2024-01-01T00:00:00Z");
        assert_eq!(time_of("Degraded"), "2024-01-01T00:00:00Z");
    }

    #[test]
    fn test_is_condition_true_missing() {
        let conditions: Vec<Condition> = vec![];
        assert!(!is_condition_true(&conditions, "Ready"));
    }
}

mod resource_tests {
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use redis_operator::crd::{ClusterRole, RedisCluster, RedisReplication, RedisSentinel};
    use redis_operator::replication::RoleLabel;
    use redis_operator::resources::services::{
        generate_client_service, generate_headless_service, generate_role_service,
    };
    use redis_operator::resources::statefulset::generate_statefulset;
    use redis_operator::resources::{Workload, label_selector};

    fn with_meta<K: kube::Resource>(mut resource: K, name: &str) -> K {
        *resource.meta_mut() = ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some("prod".to_string()),
            uid: Some("uid-1".to_string()),
            ..Default::default()
        };
        resource
    }

    #[test]
    fn test_cluster_statefulsets_share_owner() {
        let cluster = with_meta(RedisCluster::new("orders", Default::default()), "orders");

        for (role, name) in [
            (ClusterRole::Leader, "orders-leader"),
            (ClusterRole::Follower, "orders-follower"),
        ] {
            let sts = generate_statefulset(&Workload::cluster(&cluster, role));
            assert_eq!(sts.metadata.name.as_deref(), Some(name));
            assert_eq!(sts.metadata.namespace.as_deref(), Some("prod"));
            let owner = &sts.metadata.owner_references.as_ref().unwrap()[0];
            assert_eq!(owner.kind, "RedisCluster");
            assert_eq!(owner.uid, "uid-1");

            let spec = sts.spec.unwrap();
            assert_eq!(spec.replicas, Some(3));
            assert_eq!(spec.service_name, Some(format!("{}-headless", name)));
        }
    }

    #[test]
    fn test_headless_service_selects_statefulset_pods() {
        let cluster = with_meta(RedisCluster::new("orders", Default::default()), "orders");
        let workload = Workload::cluster(&cluster, ClusterRole::Leader);

        let service = generate_headless_service(&workload);
        let spec = service.spec.unwrap();

        assert_eq!(service.metadata.name.as_deref(), Some("orders-leader-headless"));
        assert_eq!(spec.cluster_ip.as_deref(), Some("None"));
        assert_eq!(spec.selector, Some(workload.selector_labels()));
        assert_eq!(spec.ports.unwrap().len(), 2);
    }

    #[test]
    fn test_replication_role_services() {
        let replication = with_meta(RedisReplication::new("cache", Default::default()), "cache");
        let workload = Workload::replication(&replication);
        let config = workload.service_config();

        let master = generate_role_service(&workload, &config, RoleLabel::Master);
        let replica = generate_role_service(&workload, &config, RoleLabel::Slave);

        assert_eq!(master.metadata.name.as_deref(), Some("cache-master"));
        assert_eq!(replica.metadata.name.as_deref(), Some("cache-replica"));
        let selector = master.spec.unwrap().selector.unwrap();
        assert_eq!(selector.get("redis-role").map(String::as_str), Some("master"));
        assert_eq!(
            selector.get("app.kubernetes.io/instance").map(String::as_str),
            Some("cache")
        );
    }

    #[test]
    fn test_sentinel_workload() {
        let spec = serde_json::from_value(serde_json::json!({"clusterSize": 3})).unwrap();
        let sentinel = with_meta(RedisSentinel::new("watch", spec), "watch");
        let workload = Workload::sentinel(&sentinel);

        assert_eq!(workload.name, "watch-sentinel");
        assert_eq!(workload.port, 26379);
        let service = generate_client_service(&workload, &workload.service_config());
        assert_eq!(service.metadata.name.as_deref(), Some("watch-sentinel"));
    }

    #[test]
    fn test_label_selector_is_sorted() {
        let cluster = with_meta(RedisCluster::new("orders", Default::default()), "orders");
        let workload = Workload::cluster(&cluster, ClusterRole::Follower);
        assert_eq!(
            label_selector(&workload.selector_labels()),
            "app.kubernetes.io/component=follower,app.kubernetes.io/instance=orders-follower"
        );
    }
}

mod command_tests {
    use redis_operator::client::SlotRange;
    use redis_operator::topology::{CliAuth, ClusterCommand};

    #[test]
    fn test_del_node_argv_with_auth() {
        let auth = CliAuth {
            password: Some("pw".to_string()),
            tls: false,
        };
        let argv = ClusterCommand::DelNode {
            anchor: "10.0.0.1:6379".to_string(),
            node_id: "abc".to_string(),
        }
        .to_argv(&auth);

        assert_eq!(
            argv,
            vec!["redis-cli", "--cluster", "del-node", "10.0.0.1:6379", "abc", "-a", "pw"]
        );
    }

    #[test]
    fn test_native_and_composite_split() {
        assert!(ClusterCommand::AddSlots {
            range: SlotRange::new(0, 16383)
        }
        .is_native());
        assert!(ClusterCommand::Failover.is_native());
        assert!(!ClusterCommand::Check { port: 6379 }.is_native());
        assert!(ClusterCommand::Check { port: 6379 }.addresses().is_empty());
    }
}

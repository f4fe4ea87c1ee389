// Test code is allowed to panic on failure
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic,
    clippy::string_slice
)]

//! Functional tests for cluster and replication orchestration.
//!
//! These tests drive the real `TopologyOrchestrator` and `ReplicationManager`
//! against a simulated set of Redis pods, WITHOUT a Kubernetes cluster or
//! Redis servers. The simulation applies every command the way Redis and
//! `redis-cli --cluster` would and records it, so tests assert both the
//! resulting topology and the exact command sequence.
//!
//! ```bash
//! # Run all functional tests
//! cargo test --test functional
//!
//! # Run specific test
//! cargo test --test functional test_scale_down_orders_reshard_before_removal
//!
//! # Run with verbose output
//! cargo test --test functional -- --nocapture
//! ```
//!
//! ## Test Categories
//!
//! - **Lifecycle tests**: cluster create, single-leader bootstrap, follower
//!   attachment, DNS vs IP addressing
//! - **Scaling tests**: add-node and rebalance, scale-down ordering, slot
//!   safety, failure handling
//! - **Recovery tests**: failed masters, health checks, failover
//! - **Replication tests**: master resolution, `SLAVEOF` repair, sentinel targets

mod cluster_lifecycle_tests;
mod recovery_tests;
mod replication_tests;
mod scaling_tests;

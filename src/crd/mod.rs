//! Custom Resource Definitions (CRDs) for redis-operator.
//!
//! - `Redis`: a single standalone server
//! - `RedisCluster`: leader/follower sharded cluster
//! - `RedisReplication`: one master with asynchronous replicas
//! - `RedisSentinel`: sentinels monitoring a replication group

mod common;
mod redis_cluster;
mod redis_replication;
mod redis_sentinel;
mod redis_standalone;

pub use common::*;
pub use redis_cluster::*;
pub use redis_replication::*;
pub use redis_sentinel::*;
pub use redis_standalone::*;

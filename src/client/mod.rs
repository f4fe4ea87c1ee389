//! Redis client module.
//!
//! Wraps the `fred` client for single-node connections and provides parsed
//! types for `CLUSTER NODES`, `CLUSTER SLOTS`, `CLUSTER INFO` and `INFO`.
//!
//! - `redis_client`: connection setup (auth, TLS) and typed commands
//! - `types`: cluster topology and slot types
//! - `parsing`: `INFO` output parsing

pub mod parsing;
pub mod redis_client;
pub mod types;

pub use parsing::{ReplicationInfo, ReplicationRole};
pub use redis_client::{RedisClient, RedisClientConfig, RedisError, TlsCertData};
pub use types::{
    ClusterInfo, ClusterNodeInfo, ClusterTopologySnapshot, ParseError, SlotAssignment, SlotRange,
};

//! Cluster topology orchestration.
//!
//! - `addressing`: DNS-vs-IP node addressing, fixed per pass
//! - `command`: typed `redis-cli --cluster` and native cluster commands
//! - `connection`: per-resource connection parameters and node connector
//! - `executor`: pod exec and native command executors
//! - `inspector`: live cluster state queries
//! - `plan`: pure state classification and scaling plans
//! - `orchestrator`: runs plans against a live cluster

pub mod addressing;
pub mod command;
pub mod connection;
pub mod error;
pub mod executor;
pub mod inspector;
pub mod orchestrator;
pub mod plan;

pub use addressing::{Addressing, AddressingMode, NodeRef};
pub use command::{CliAuth, ClusterCommand};
pub use connection::{ConnectionParams, NodeConnector};
pub use error::{Result, TopologyError};
pub use executor::{CommandExecutor, CommandOutput, NativeExecutor, PodExecutor, RoutingExecutor};
pub use inspector::{ClusterInspector, LiveInspector};
pub use orchestrator::{ConvergeReport, Outcome, TopologyOrchestrator};
pub use plan::{ClusterObservation, PlannedOperation, ScalingPlan, classify, plan};

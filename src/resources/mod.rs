//! Resource generation.
//!
//! Contains the Kubernetes objects owned by the Redis custom resources.
//!
//! ## Resources Generated
//!
//! | Resource | Purpose |
//! |----------|---------|
//! | StatefulSet | Stable pod identity for every topology |
//! | Headless Service | Pod DNS names (publishNotReadyAddresses) |
//! | Client Service | Client access endpoint |
//! | Role Services | `<cr>-master` / `<cr>-replica` for replication |

pub mod common;
pub mod services;
pub mod statefulset;

pub use common::{
    ServiceConfig, Workload, WorkloadKind, label_selector, owner_reference, standard_labels,
};

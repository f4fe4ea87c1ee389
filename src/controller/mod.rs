//! Controller module for redis-operator.
//!
//! One reconciler per custom resource plus the error handling, shared
//! context, finalizer and status helpers they use.

// Shared modules
pub mod common;
pub mod context;
pub mod error;
pub mod status;

// Reconcilers
pub mod cluster_reconciler;
pub mod replication_reconciler;
pub mod sentinel_reconciler;
pub mod standalone_reconciler;

//! Controller module for cluster topology reconciliation
//! This module contains the per-cluster event loop, the Node and Service
//! reconcilers, and the watch plumbing that feeds them.

pub mod cluster_loop;
pub mod eligibility;
pub mod events;
pub mod informer;
pub mod metrics;
mod node;
pub mod registry;
mod service;

pub use cluster_loop::ClusterLoop;
pub use events::{ClusterEvent, ResourceEvent, ResourceKind};
pub use informer::{watch_resource, Informer};
pub use node::NodeReconciler;
pub use registry::Registry;
pub use service::ServiceReconciler;

//! Events consumed by a cluster loop
//!
//! Node and Service watch tasks of one cluster feed a single channel, so the
//! interleaving of the two streams is explicit: whatever order the events
//! arrive in the channel is the order the cluster state sees them.

use k8s_openapi::api::core::v1::{Node, Service};

/// Change to one watched object, as derived by the informer
#[derive(Clone, Debug, PartialEq)]
pub enum ResourceEvent<K> {
    Observed(K),
    Changed { old: K, new: K },
    Removed(K),
    /// The initial list of this resource kind has been delivered
    Synced,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Node,
    Service,
}

#[derive(Clone, Debug)]
pub enum ClusterEvent {
    NodeObserved(Node),
    NodeChanged { old: Node, new: Node },
    NodeRemoved(Node),
    ServiceObserved(Service),
    ServiceChanged { old: Service, new: Service },
    ServiceRemoved(Service),
    Synced(ResourceKind),
}

impl ClusterEvent {
    /// Metric and log label
    pub fn kind(&self) -> &'static str {
        match self {
            ClusterEvent::NodeObserved(_) => "node_observed",
            ClusterEvent::NodeChanged { .. } => "node_changed",
            ClusterEvent::NodeRemoved(_) => "node_removed",
            ClusterEvent::ServiceObserved(_) => "service_observed",
            ClusterEvent::ServiceChanged { .. } => "service_changed",
            ClusterEvent::ServiceRemoved(_) => "service_removed",
            ClusterEvent::Synced(_) => "synced",
        }
    }
}

impl From<ResourceEvent<Node>> for ClusterEvent {
    fn from(event: ResourceEvent<Node>) -> Self {
        match event {
            ResourceEvent::Observed(node) => ClusterEvent::NodeObserved(node),
            ResourceEvent::Changed { old, new } => ClusterEvent::NodeChanged { old, new },
            ResourceEvent::Removed(node) => ClusterEvent::NodeRemoved(node),
            ResourceEvent::Synced => ClusterEvent::Synced(ResourceKind::Node),
        }
    }
}

impl From<ResourceEvent<Service>> for ClusterEvent {
    fn from(event: ResourceEvent<Service>) -> Self {
        match event {
            ResourceEvent::Observed(svc) => ClusterEvent::ServiceObserved(svc),
            ResourceEvent::Changed { old, new } => ClusterEvent::ServiceChanged { old, new },
            ResourceEvent::Removed(svc) => ClusterEvent::ServiceRemoved(svc),
            ResourceEvent::Synced => ClusterEvent::Synced(ResourceKind::Service),
        }
    }
}

//! Eligibility predicates for nodes and services
//!
//! These are total: a missing label, annotation, condition, address or port
//! means "not eligible", never an error.

use k8s_openapi::api::core::v1::{Node, Service};
use kube::Resource;

use crate::options::ANNOTATION_ENABLED_VALUE;
use crate::topology::Worker;

const NODE_READY: &str = "Ready";
const CONDITION_TRUE: &str = "True";
const CONDITION_FALSE: &str = "False";
const SERVICE_TYPE_NODE_PORT: &str = "NodePort";

/// Status of the node's Ready condition, "False" when absent
pub fn ready_condition(node: &Node) -> &str {
    node.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .and_then(|conditions| conditions.iter().find(|c| c.type_ == NODE_READY))
        .map(|c| c.status.as_str())
        .unwrap_or(CONDITION_FALSE)
}

pub fn has_label(node: &Node, key: &str) -> bool {
    node.metadata
        .labels
        .as_ref()
        .is_some_and(|labels| labels.contains_key(key))
}

/// Labelled with the worker label and Ready
pub fn is_worker_eligible(node: &Node, worker_label: &str) -> bool {
    has_label(node, worker_label) && ready_condition(node) == CONDITION_TRUE
}

/// First reported address of the node
pub fn primary_address(node: &Node) -> Option<&str> {
    node.status
        .as_ref()
        .and_then(|s| s.addresses.as_ref())
        .and_then(|addresses| addresses.first())
        .map(|a| a.address.as_str())
        .filter(|a| !a.is_empty())
}

pub fn worker_from_node(master_ip: &str, node: &Node) -> Option<Worker> {
    primary_address(node).map(|host_ip| Worker::new(master_ip, host_ip, ready_condition(node)))
}

/// NodePort typed and annotated with the enabled value
pub fn is_service_eligible(service: &Service, annotation: &str) -> bool {
    let is_node_port = service
        .spec
        .as_ref()
        .and_then(|s| s.type_.as_deref())
        .is_some_and(|t| t == SERVICE_TYPE_NODE_PORT);

    let is_annotated = service
        .metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(annotation))
        .is_some_and(|v| v == ANNOTATION_ENABLED_VALUE);

    is_node_port && is_annotated
}

/// Allocated NodePort of the service's first port
pub fn service_node_port(service: &Service) -> Option<i32> {
    service
        .spec
        .as_ref()
        .and_then(|s| s.ports.as_ref())
        .and_then(|ports| ports.first())
        .and_then(|p| p.node_port)
}

/// The port to expose when the service is eligible
pub fn eligible_node_port(service: &Service, annotation: &str) -> Option<i32> {
    if is_service_eligible(service, annotation) {
        service_node_port(service)
    } else {
        None
    }
}

/// True when both objects carry the same resource version (a redelivery)
pub fn same_resource_version<K: Resource>(old: &K, new: &K) -> bool {
    match (
        old.meta().resource_version.as_deref(),
        new.meta().resource_version.as_deref(),
    ) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

//! Node reconciler
//!
//! Derives worker eligibility (worker label present and Ready=True) from
//! Node events and keeps the cluster's worker set, and every NodePort's
//! backend list, in line with it. Each handler returns whether the cluster
//! state changed; the caller publishes only on change.

use std::sync::Arc;

use k8s_openapi::api::core::v1::Node;
use kube::ResourceExt;
use tracing::{debug, info, instrument, warn};

use crate::topology::{Cluster, WorkerKey};

use super::eligibility::{
    is_worker_eligible, primary_address, same_resource_version, worker_from_node,
};
use super::metrics;

pub struct NodeReconciler {
    cluster: Arc<Cluster>,
    worker_label: String,
}

impl NodeReconciler {
    pub fn new(cluster: Arc<Cluster>, worker_label: impl Into<String>) -> Self {
        Self {
            cluster,
            worker_label: worker_label.into(),
        }
    }

    #[instrument(skip(self, node), fields(master_ip = %self.cluster.master_ip(), node = %node.name_any()))]
    pub async fn observed(&self, node: &Node) -> bool {
        if !is_worker_eligible(node, &self.worker_label) {
            debug!("Node is not labelled or not ready, skipping");
            return false;
        }
        self.add(node).await
    }

    #[instrument(skip(self, old, new), fields(master_ip = %self.cluster.master_ip(), node = %new.name_any()))]
    pub async fn changed(&self, old: &Node, new: &Node) -> bool {
        if same_resource_version(old, new) {
            debug!("Resource version unchanged, ignoring redelivered update");
            return false;
        }

        let Some(host_ip) = primary_address(old).or_else(|| primary_address(new)) else {
            warn!("Node reports no address, skipping");
            return false;
        };
        let key = self.cluster.worker_key(host_ip);
        let tracked = self.cluster.contains_worker(&key).await;
        let eligible = is_worker_eligible(new, &self.worker_label);

        match (tracked, eligible) {
            (true, true) => {
                debug!("Node {} is still healthy and labelled, skipping", host_ip);
                false
            }
            (true, false) => {
                info!(
                    "Node {} is not healthy or not labelled anymore, removing from workers",
                    host_ip
                );
                self.remove(&key).await
            }
            (false, true) => {
                info!("Node {} is now healthy and labelled, adding to workers", host_ip);
                self.add(new).await
            }
            (false, false) => {
                debug!("Node {} is still unhealthy or unlabelled, skipping", host_ip);
                false
            }
        }
    }

    #[instrument(skip(self, node), fields(master_ip = %self.cluster.master_ip(), node = %node.name_any()))]
    pub async fn removed(&self, node: &Node) -> bool {
        let Some(host_ip) = primary_address(node) else {
            debug!("Deleted node reports no address, nothing to remove");
            return false;
        };

        let key = self.cluster.worker_key(host_ip);
        if self.remove(&key).await {
            info!("Deleted node {} removed from workers", host_ip);
            true
        } else {
            debug!("Deleted node {} was not a worker, skipping", host_ip);
            false
        }
    }

    async fn add(&self, node: &Node) -> bool {
        let Some(worker) = worker_from_node(self.cluster.master_ip(), node) else {
            warn!("Eligible node reports no address, cannot add it as a worker");
            return false;
        };

        let host_ip = worker.host_ip.clone();
        if self.cluster.insert_worker(worker).await {
            metrics::inc_target_nodes(self.cluster.master_ip());
            info!("Added node {} to workers and every NodePort", host_ip);
            true
        } else {
            debug!("Node {} is already a worker", host_ip);
            false
        }
    }

    async fn remove(&self, key: &WorkerKey) -> bool {
        if self.cluster.remove_worker(key).await {
            metrics::dec_target_nodes(self.cluster.master_ip());
            true
        } else {
            false
        }
    }
}

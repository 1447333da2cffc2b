//! In-memory model of every managed cluster
//!
//! `Topology` is the aggregate root: an ordered list of clusters built once
//! at startup. Reconcilers mutate clusters through their own locks; the
//! apply pipeline only ever sees a `TopologySnapshot`.

mod cluster;
mod node_port;
mod snapshot;
mod worker;

use std::sync::Arc;

pub use cluster::{Cluster, TrackOutcome};
pub use node_port::{NodePort, NodePortKey};
pub use snapshot::{ClusterSnapshot, NodePortSnapshot, TopologySnapshot};
pub use worker::{Worker, WorkerKey};

#[derive(Debug, Default)]
pub struct Topology {
    clusters: Vec<Arc<Cluster>>,
}

impl Topology {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a cluster. Clusters are never removed.
    pub fn push(&mut self, cluster: Arc<Cluster>) {
        self.clusters.push(cluster);
    }

    pub fn clusters(&self) -> &[Arc<Cluster>] {
        &self.clusters
    }

    pub fn cluster(&self, master_ip: &str) -> Option<Arc<Cluster>> {
        self.clusters
            .iter()
            .find(|c| c.master_ip() == master_ip)
            .cloned()
    }

    /// Snapshot every cluster, taking each cluster lock only while copying it
    pub async fn snapshot(&self) -> TopologySnapshot {
        let mut clusters = Vec::with_capacity(self.clusters.len());
        for cluster in &self.clusters {
            clusters.push(cluster.snapshot().await);
        }
        TopologySnapshot { clusters }
    }
}

//! Cluster: the reconciled state of one managed Kubernetes cluster
//!
//! Workers and NodePorts live behind a single lock owned by the cluster.
//! Every mutation goes through a method that takes the lock for the whole
//! read-modify-write, so NodePort seeding never interleaves with a worker
//! removal.

use std::collections::BTreeMap;

use tokio::sync::Mutex;

use super::node_port::{NodePort, NodePortKey};
use super::snapshot::{ClusterSnapshot, NodePortSnapshot};
use super::worker::{Worker, WorkerKey};

#[derive(Debug, Default)]
struct ClusterState {
    workers: BTreeMap<WorkerKey, Worker>,
    node_ports: BTreeMap<NodePortKey, NodePort>,
}

/// Result of inserting a NodePort that may already be tracked
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrackOutcome {
    Inserted,
    AlreadyTracked,
}

#[derive(Debug)]
pub struct Cluster {
    master_ip: String,
    state: Mutex<ClusterState>,
}

impl Cluster {
    pub fn new(master_ip: impl Into<String>) -> Self {
        Self {
            master_ip: master_ip.into(),
            state: Mutex::new(ClusterState::default()),
        }
    }

    pub fn master_ip(&self) -> &str {
        &self.master_ip
    }

    pub fn worker_key(&self, host_ip: &str) -> WorkerKey {
        WorkerKey {
            master_ip: self.master_ip.clone(),
            host_ip: host_ip.to_string(),
        }
    }

    pub fn node_port_key(&self, port: i32) -> NodePortKey {
        NodePortKey {
            master_ip: self.master_ip.clone(),
            port,
        }
    }

    /// Insert a worker into the cluster and into every NodePort.
    ///
    /// Returns false, changing nothing, when a worker with the same identity
    /// is already tracked.
    pub async fn insert_worker(&self, worker: Worker) -> bool {
        let mut state = self.state.lock().await;
        let key = worker.key();
        if state.workers.contains_key(&key) {
            return false;
        }

        for node_port in state.node_ports.values_mut() {
            node_port.add_worker(worker.clone());
        }
        state.workers.insert(key, worker);
        true
    }

    /// Remove a worker from the cluster and from every NodePort.
    ///
    /// Returns false when the worker was never tracked.
    pub async fn remove_worker(&self, key: &WorkerKey) -> bool {
        let mut state = self.state.lock().await;
        if state.workers.remove(key).is_none() {
            return false;
        }

        for node_port in state.node_ports.values_mut() {
            node_port.remove_worker(key);
        }
        true
    }

    pub async fn contains_worker(&self, key: &WorkerKey) -> bool {
        self.state.lock().await.workers.contains_key(key)
    }

    pub async fn worker_count(&self) -> usize {
        self.state.lock().await.workers.len()
    }

    pub async fn workers(&self) -> Vec<Worker> {
        self.state.lock().await.workers.values().cloned().collect()
    }

    /// Track a NodePort seeded with every current worker
    pub async fn track_node_port(&self, port: i32) -> TrackOutcome {
        let mut state = self.state.lock().await;
        let key = self.node_port_key(port);
        if state.node_ports.contains_key(&key) {
            return TrackOutcome::AlreadyTracked;
        }

        let node_port = NodePort::seeded(self.master_ip.clone(), port, state.workers.values());
        state.node_ports.insert(key, node_port);
        TrackOutcome::Inserted
    }

    /// Returns false when no NodePort was tracked under that port
    pub async fn remove_node_port(&self, port: i32) -> bool {
        let key = self.node_port_key(port);
        self.state.lock().await.node_ports.remove(&key).is_some()
    }

    /// Swap the NodePort at `old_port` for a freshly seeded one at `new_port`
    /// in a single critical section.
    ///
    /// Returns whether the tracked set changed.
    pub async fn replace_node_port(&self, old_port: i32, new_port: i32) -> bool {
        let mut state = self.state.lock().await;
        let removed = state
            .node_ports
            .remove(&self.node_port_key(old_port))
            .is_some();

        let new_key = self.node_port_key(new_port);
        let inserted = !state.node_ports.contains_key(&new_key);
        let node_port = NodePort::seeded(self.master_ip.clone(), new_port, state.workers.values());
        state.node_ports.insert(new_key, node_port);

        removed || inserted
    }

    pub async fn contains_node_port(&self, port: i32) -> bool {
        let key = self.node_port_key(port);
        self.state.lock().await.node_ports.contains_key(&key)
    }

    pub async fn node_port_count(&self) -> usize {
        self.state.lock().await.node_ports.len()
    }

    /// Backend workers of the NodePort at `port`, if tracked
    pub async fn node_port_workers(&self, port: i32) -> Option<Vec<Worker>> {
        let key = self.node_port_key(port);
        self.state
            .lock()
            .await
            .node_ports
            .get(&key)
            .map(|np| np.workers().cloned().collect())
    }

    /// Copy the current state out from under the lock
    pub async fn snapshot(&self) -> ClusterSnapshot {
        let state = self.state.lock().await;
        ClusterSnapshot {
            master_ip: self.master_ip.clone(),
            workers: state.workers.values().cloned().collect(),
            node_ports: state
                .node_ports
                .values()
                .map(|np| NodePortSnapshot {
                    master_ip: np.master_ip.clone(),
                    port: np.port,
                    workers: np.workers().cloned().collect(),
                })
                .collect(),
        }
    }
}

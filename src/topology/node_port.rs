//! NodePort: an exposed Service paired with its backend workers

use std::collections::BTreeMap;

use super::worker::{Worker, WorkerKey};

/// Identity of a NodePort inside the whole topology
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodePortKey {
    pub master_ip: String,
    pub port: i32,
}

/// A NodePort service exposed through the proxy.
///
/// Each NodePort holds its own copy of the backend workers because the
/// rendered configuration is a fully denormalized tree. Equality is
/// `master_ip` + `port` only.
#[derive(Clone, Debug)]
pub struct NodePort {
    pub master_ip: String,
    pub port: i32,
    workers: BTreeMap<WorkerKey, Worker>,
}

impl NodePort {
    pub fn new(master_ip: impl Into<String>, port: i32) -> Self {
        Self {
            master_ip: master_ip.into(),
            port,
            workers: BTreeMap::new(),
        }
    }

    /// Build a NodePort whose backend list is the given worker set
    pub fn seeded<'a>(
        master_ip: impl Into<String>,
        port: i32,
        workers: impl IntoIterator<Item = &'a Worker>,
    ) -> Self {
        let mut node_port = Self::new(master_ip, port);
        for worker in workers {
            node_port.add_worker(worker.clone());
        }
        node_port
    }

    pub fn key(&self) -> NodePortKey {
        NodePortKey {
            master_ip: self.master_ip.clone(),
            port: self.port,
        }
    }

    /// Returns true when the worker was not already a backend
    pub fn add_worker(&mut self, worker: Worker) -> bool {
        let key = worker.key();
        if self.workers.contains_key(&key) {
            return false;
        }
        self.workers.insert(key, worker);
        true
    }

    /// Returns true when the worker was a backend
    pub fn remove_worker(&mut self, key: &WorkerKey) -> bool {
        self.workers.remove(key).is_some()
    }

    #[cfg(test)]
    pub fn has_worker(&self, key: &WorkerKey) -> bool {
        self.workers.contains_key(key)
    }

    pub fn workers(&self) -> impl Iterator<Item = &Worker> {
        self.workers.values()
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }
}

impl PartialEq for NodePort {
    fn eq(&self, other: &Self) -> bool {
        self.master_ip == other.master_ip && self.port == other.port
    }
}

impl Eq for NodePort {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equality_ignores_workers() {
        let empty = NodePort::new("10.0.0.1", 30080);
        let worker = Worker::new("10.0.0.1", "10.0.0.44", "True");
        let seeded = NodePort::seeded("10.0.0.1", 30080, [&worker]);

        assert_eq!(empty, seeded);
        assert_ne!(empty, NodePort::new("10.0.0.1", 30081));
        assert_ne!(empty, NodePort::new("10.0.0.2", 30080));
    }

    #[test]
    fn test_add_worker_is_idempotent() {
        let mut node_port = NodePort::new("10.0.0.1", 30080);
        assert!(node_port.add_worker(Worker::new("10.0.0.1", "10.0.0.44", "True")));
        assert!(!node_port.add_worker(Worker::new("10.0.0.1", "10.0.0.44", "Unknown")));
        assert_eq!(node_port.worker_count(), 1);
    }

    #[test]
    fn test_remove_worker() {
        let worker = Worker::new("10.0.0.1", "10.0.0.44", "True");
        let mut node_port = NodePort::seeded("10.0.0.1", 30080, [&worker]);

        assert!(node_port.remove_worker(&worker.key()));
        assert!(!node_port.remove_worker(&worker.key()));
        assert!(!node_port.has_worker(&worker.key()));
    }
}

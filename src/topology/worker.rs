//! Worker: a node currently eligible as a load-balancing backend

use serde::Serialize;

/// Identity of a Worker inside the whole topology
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WorkerKey {
    pub master_ip: String,
    pub host_ip: String,
}

/// A node judged eligible (labelled and Ready) to receive proxied traffic.
///
/// Equality only looks at `master_ip` and `host_ip`. The node condition is
/// informational so a Ready to NotReady flip is decided by the reconciler,
/// not by comparing two workers.
#[derive(Clone, Debug, Serialize)]
pub struct Worker {
    #[serde(rename = "MasterIP")]
    pub master_ip: String,
    #[serde(rename = "HostIP")]
    pub host_ip: String,
    #[serde(rename = "NodeCondition")]
    pub node_condition: String,
}

impl Worker {
    pub fn new(
        master_ip: impl Into<String>,
        host_ip: impl Into<String>,
        node_condition: impl Into<String>,
    ) -> Self {
        Self {
            master_ip: master_ip.into(),
            host_ip: host_ip.into(),
            node_condition: node_condition.into(),
        }
    }

    pub fn key(&self) -> WorkerKey {
        WorkerKey {
            master_ip: self.master_ip.clone(),
            host_ip: self.host_ip.clone(),
        }
    }
}

impl PartialEq for Worker {
    fn eq(&self, other: &Self) -> bool {
        self.master_ip == other.master_ip && self.host_ip == other.host_ip
    }
}

impl Eq for Worker {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equality_ignores_node_condition() {
        let ready = Worker::new("10.0.0.1", "10.0.0.44", "True");
        let not_ready = Worker::new("10.0.0.1", "10.0.0.44", "False");
        assert_eq!(ready, not_ready);
        assert_eq!(ready.key(), not_ready.key());
    }

    #[test]
    fn test_equality_uses_master_and_host() {
        let a = Worker::new("10.0.0.1", "10.0.0.44", "True");
        assert_ne!(a, Worker::new("10.0.0.2", "10.0.0.44", "True"));
        assert_ne!(a, Worker::new("10.0.0.1", "10.0.0.45", "True"));
    }

    #[test]
    fn test_serialized_field_names() {
        let worker = Worker::new("10.0.0.1", "10.0.0.44", "True");
        let value = serde_json::to_value(&worker).unwrap();
        assert_eq!(value["MasterIP"], "10.0.0.1");
        assert_eq!(value["HostIP"], "10.0.0.44");
        assert_eq!(value["NodeCondition"], "True");
    }
}

//! Serializable copies of the topology handed to the template
//!
//! Field names are exactly what the proxy template dereferences:
//! `Clusters[].MasterIP`, `Clusters[].Workers[]`, `Clusters[].NodePorts[].Port`
//! and `Clusters[].NodePorts[].Workers[].HostIP`.

use serde::Serialize;

use super::worker::Worker;

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct TopologySnapshot {
    #[serde(rename = "Clusters")]
    pub clusters: Vec<ClusterSnapshot>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ClusterSnapshot {
    #[serde(rename = "MasterIP")]
    pub master_ip: String,
    #[serde(rename = "Workers")]
    pub workers: Vec<Worker>,
    #[serde(rename = "NodePorts")]
    pub node_ports: Vec<NodePortSnapshot>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct NodePortSnapshot {
    #[serde(rename = "MasterIP")]
    pub master_ip: String,
    #[serde(rename = "Port")]
    pub port: i32,
    #[serde(rename = "Workers")]
    pub workers: Vec<Worker>,
}

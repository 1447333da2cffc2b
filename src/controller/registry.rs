//! Cluster registry
//!
//! One entry per configured kubeconfig: resolve the API endpoint, derive the
//! cluster's MasterIP from it, and wire a Node watch, a Service watch and a
//! cluster loop around an empty `Cluster`.

use std::path::Path;
use std::sync::Arc;

use k8s_openapi::api::core::v1::{Node, Service};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Api, Client};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{error, info};

use crate::apply::Publisher;
use crate::error::{Error, Result};
use crate::options::GeneratorOptions;
use crate::topology::{Cluster, Topology};

use super::cluster_loop::ClusterLoop;
use super::informer::watch_resource;

const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Host part of the API server URL, used as the cluster identity
pub fn master_ip(config: &kube::Config) -> Result<String> {
    config
        .cluster_url
        .host()
        .map(|h| h.trim_start_matches('[').trim_end_matches(']').to_string())
        .filter(|h| !h.is_empty())
        .ok_or_else(|| {
            Error::ConfigError(format!(
                "cluster url {} has no host",
                config.cluster_url
            ))
        })
}

/// Load a kubeconfig file, returning the client and the derived MasterIP
pub async fn connect(path: &Path) -> Result<(Client, String)> {
    let kubeconfig = Kubeconfig::read_from(path)?;
    let config =
        kube::Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default()).await?;
    let master_ip = master_ip(&config)?;
    let client = Client::try_from(config)?;
    Ok((client, master_ip))
}

struct ManagedCluster {
    cluster: Arc<Cluster>,
    client: Client,
}

pub struct Registry {
    topology: Arc<Topology>,
    managed: Vec<ManagedCluster>,
}

impl Registry {
    /// Connect to every configured cluster and build the topology
    pub async fn connect(opts: &GeneratorOptions) -> Result<Self> {
        let mut topology = Topology::new();
        let mut managed = Vec::with_capacity(opts.kubeconfig_paths.len());

        for path in &opts.kubeconfig_paths {
            let (client, master_ip) = connect(path).await.map_err(|e| {
                error!(
                    "An error occurred while getting k8s config from {}: {}",
                    path.display(),
                    e
                );
                e
            })?;

            if topology.cluster(&master_ip).is_some() {
                return Err(Error::ConfigError(format!(
                    "cluster {} from {} is configured more than once",
                    master_ip,
                    path.display()
                )));
            }

            info!(
                "Connected to cluster {} using {}",
                master_ip,
                path.display()
            );
            let cluster = Arc::new(Cluster::new(master_ip));
            topology.push(cluster.clone());
            managed.push(ManagedCluster { cluster, client });
        }

        Ok(Self {
            topology: Arc::new(topology),
            managed,
        })
    }

    pub fn topology(&self) -> Arc<Topology> {
        self.topology.clone()
    }

    /// Start the watches and loops of every cluster.
    ///
    /// Returns when all loops have stopped, or with the first loop error.
    pub async fn run(self, opts: Arc<GeneratorOptions>, publisher: Arc<dyn Publisher>) -> Result<()> {
        let mut loops = JoinSet::new();

        for managed in self.managed {
            let master_ip = managed.cluster.master_ip().to_string();
            let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

            let nodes: Api<Node> = Api::all(managed.client.clone());
            tokio::spawn(watch_resource(nodes, tx.clone(), master_ip.clone()));

            let services: Api<Service> = Api::all(managed.client);
            tokio::spawn(watch_resource(services, tx, master_ip));

            let cluster_loop = ClusterLoop::new(
                managed.cluster,
                self.topology.clone(),
                publisher.clone(),
                &opts,
            );
            loops.spawn(cluster_loop.run(rx));
        }

        while let Some(joined) = loops.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!("Cluster loop failed: {}", e);
                    loops.abort_all();
                    return Err(e);
                }
                Err(e) => {
                    loops.abort_all();
                    return Err(Error::TaskError(format!("cluster loop panicked: {}", e)));
                }
            }
        }

        Ok(())
    }
}

//! Service reconciler
//!
//! Derives NodePort eligibility (type NodePort and annotated "true") from
//! Service events. A NodePort without upstream servers is never added while
//! the worker set is empty; removals always go through.

use std::sync::Arc;

use k8s_openapi::api::core::v1::Service;
use kube::ResourceExt;
use tracing::{debug, info, instrument, warn};

use crate::topology::{Cluster, TrackOutcome};

use super::eligibility::{eligible_node_port, same_resource_version};
use super::metrics;

pub struct ServiceReconciler {
    cluster: Arc<Cluster>,
    annotation: String,
}

impl ServiceReconciler {
    pub fn new(cluster: Arc<Cluster>, annotation: impl Into<String>) -> Self {
        Self {
            cluster,
            annotation: annotation.into(),
        }
    }

    async fn has_workers(&self) -> bool {
        if self.cluster.worker_count().await == 0 {
            warn!("Cluster has no workers, a NodePort without upstream servers can not be published");
            return false;
        }
        true
    }

    #[instrument(skip(self, svc), fields(master_ip = %self.cluster.master_ip(), service = %svc.name_any(), namespace = %svc.namespace().unwrap_or_default()))]
    pub async fn observed(&self, svc: &Service) -> bool {
        if !self.has_workers().await {
            return false;
        }

        let Some(port) = eligible_node_port(svc, &self.annotation) else {
            debug!("Service is not annotated or not a NodePort type service, skipping");
            return false;
        };

        match self.cluster.track_node_port(port).await {
            TrackOutcome::Inserted => {
                info!("Added NodePort {}", port);
                self.record_node_ports().await;
                true
            }
            TrackOutcome::AlreadyTracked => {
                debug!("NodePort {} is already tracked", port);
                false
            }
        }
    }

    #[instrument(skip(self, old, new), fields(master_ip = %self.cluster.master_ip(), service = %new.name_any(), namespace = %new.namespace().unwrap_or_default()))]
    pub async fn changed(&self, old: &Service, new: &Service) -> bool {
        if same_resource_version(old, new) {
            debug!("Resource version unchanged, ignoring redelivered update");
            return false;
        }

        let old_port = eligible_node_port(old, &self.annotation);
        let new_port = eligible_node_port(new, &self.annotation);

        if new_port.is_some() && new_port != old_port && !self.has_workers().await {
            return false;
        }

        let changed = match (old_port, new_port) {
            (Some(old_port), Some(new_port)) if old_port == new_port => {
                debug!("NodePort {} unchanged on the updated service", new_port);
                false
            }
            (Some(old_port), Some(new_port)) => {
                info!("NodePort changed from {} to {}, replacing", old_port, new_port);
                self.cluster.replace_node_port(old_port, new_port).await
            }
            (Some(old_port), None) => {
                let removed = self.cluster.remove_node_port(old_port).await;
                if removed {
                    info!(
                        "Service is no longer an annotated NodePort, removed NodePort {}",
                        old_port
                    );
                }
                removed
            }
            (None, Some(new_port)) => match self.cluster.track_node_port(new_port).await {
                TrackOutcome::Inserted => {
                    info!("Service became an annotated NodePort, added NodePort {}", new_port);
                    true
                }
                TrackOutcome::AlreadyTracked => {
                    warn!(
                        "NodePort {} is already tracked by another service, state has diverged from the cluster",
                        new_port
                    );
                    false
                }
            },
            (None, None) => false,
        };

        if changed {
            self.record_node_ports().await;
        }
        changed
    }

    #[instrument(skip(self, svc), fields(master_ip = %self.cluster.master_ip(), service = %svc.name_any(), namespace = %svc.namespace().unwrap_or_default()))]
    pub async fn removed(&self, svc: &Service) -> bool {
        let Some(port) = eligible_node_port(svc, &self.annotation) else {
            return false;
        };

        if self.cluster.remove_node_port(port).await {
            info!("Deleted service removed NodePort {}", port);
            self.record_node_ports().await;
            true
        } else {
            debug!("NodePort {} of the deleted service was not tracked", port);
            false
        }
    }

    async fn record_node_ports(&self) {
        metrics::set_processed_nodeports(
            self.cluster.master_ip(),
            self.cluster.node_port_count().await,
        );
    }
}

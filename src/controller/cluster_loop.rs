//! Per-cluster event loop
//!
//! Consumes the merged Node/Service event channel of one cluster, runs the
//! matching reconciler and publishes a fresh topology snapshot after every
//! state change. Publishing happens outside the cluster lock.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::apply::{ApplyError, Publisher, RetryPolicy};
use crate::error::{Error, Result};
use crate::options::GeneratorOptions;
use crate::topology::{Cluster, Topology};

use super::events::{ClusterEvent, ResourceKind};
use super::metrics;
use super::node::NodeReconciler;
use super::service::ServiceReconciler;

pub struct ClusterLoop {
    cluster: Arc<Cluster>,
    topology: Arc<Topology>,
    nodes: NodeReconciler,
    services: ServiceReconciler,
    publisher: Arc<dyn Publisher>,
    retry: RetryPolicy,
    fail_fast: bool,
    /// Set when the last publish exhausted its retries
    pending: bool,
    synced: HashSet<ResourceKind>,
}

impl ClusterLoop {
    pub fn new(
        cluster: Arc<Cluster>,
        topology: Arc<Topology>,
        publisher: Arc<dyn Publisher>,
        opts: &GeneratorOptions,
    ) -> Self {
        Self {
            nodes: NodeReconciler::new(cluster.clone(), opts.worker_node_label.clone()),
            services: ServiceReconciler::new(cluster.clone(), opts.custom_annotation.clone()),
            cluster,
            topology,
            publisher,
            retry: RetryPolicy::with_max_attempts(opts.apply_max_retries),
            fail_fast: opts.fail_fast,
            pending: false,
            synced: HashSet::new(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn cluster(&self) -> &Arc<Cluster> {
        &self.cluster
    }

    /// Whether a failed publish is waiting to be retried
    pub fn is_pending(&self) -> bool {
        self.pending
    }

    /// Both the Node and the Service initial lists have been delivered
    pub fn is_ready(&self) -> bool {
        self.synced.contains(&ResourceKind::Node) && self.synced.contains(&ResourceKind::Service)
    }

    /// Run the reconciler for one event. Returns whether the cluster changed.
    pub async fn reconcile(&mut self, event: ClusterEvent) -> bool {
        metrics::inc_event(self.cluster.master_ip(), event.kind());

        match event {
            ClusterEvent::NodeObserved(node) => self.nodes.observed(&node).await,
            ClusterEvent::NodeChanged { old, new } => self.nodes.changed(&old, &new).await,
            ClusterEvent::NodeRemoved(node) => self.nodes.removed(&node).await,
            ClusterEvent::ServiceObserved(svc) => self.services.observed(&svc).await,
            ClusterEvent::ServiceChanged { old, new } => self.services.changed(&old, &new).await,
            ClusterEvent::ServiceRemoved(svc) => self.services.removed(&svc).await,
            ClusterEvent::Synced(kind) => {
                self.synced.insert(kind);
                debug!(
                    "{:?} cache synced for cluster {}",
                    kind,
                    self.cluster.master_ip()
                );
                if self.is_ready() {
                    info!("Cluster {} is ready", self.cluster.master_ip());
                }
                false
            }
        }
    }

    /// Reconcile one event and publish if anything changed, or if an earlier
    /// publish is still pending.
    pub async fn handle(&mut self, event: ClusterEvent) -> Result<()> {
        let changed = self.reconcile(event).await;
        if changed || self.pending {
            self.publish().await?;
        }
        Ok(())
    }

    /// Publish the current topology, retrying with backoff.
    ///
    /// While an earlier publish is pending only one attempt is made; the
    /// retry timer in `run` spaces out the following ones. In-memory state is
    /// never rolled back on failure.
    pub async fn publish(&mut self) -> Result<()> {
        let master_ip = self.cluster.master_ip().to_string();
        let max_attempts = if self.pending {
            1
        } else {
            self.retry.max_attempts
        };
        let mut attempt = 0;

        loop {
            let snapshot = self.topology.snapshot().await;
            let started = Instant::now();
            let result = self.publisher.apply(&snapshot).await;
            let elapsed = started.elapsed().as_secs_f64();

            let err = match result {
                Ok(()) => {
                    metrics::observe_apply(&master_ip, "success", elapsed);
                    if self.pending {
                        info!("Pending apply for cluster {} succeeded", master_ip);
                    }
                    self.pending = false;
                    return Ok(());
                }
                Err(e) => e,
            };

            metrics::observe_apply(&master_ip, err.kind(), elapsed);
            attempt += 1;

            if attempt >= max_attempts {
                return self.exhausted(master_ip, attempt, err);
            }

            let delay = self.retry.delay(attempt - 1);
            warn!(
                "Apply for cluster {} failed (attempt {}/{}), retrying in {:?}: {}",
                master_ip, attempt, max_attempts, delay, err
            );
            tokio::time::sleep(delay).await;
        }
    }

    fn exhausted(&mut self, master_ip: String, attempts: u32, err: ApplyError) -> Result<()> {
        if self.pending {
            warn!(
                "Pending apply for cluster {} still failing, next retry in {:?}: {}",
                master_ip, self.retry.max_delay, err
            );
            return Ok(());
        }

        error!(
            "Apply for cluster {} failed after {} attempts: {}",
            master_ip, attempts, err
        );
        if self.fail_fast {
            return Err(Error::ApplyExhausted {
                master_ip,
                attempts,
                source: err,
            });
        }
        self.pending = true;
        Ok(())
    }

    /// Consume events until every sender is gone.
    ///
    /// While a publish is pending it is retried every `max_delay` even if no
    /// new event arrives.
    pub async fn run(mut self, mut rx: mpsc::Receiver<ClusterEvent>) -> Result<()> {
        info!("Starting event loop for cluster {}", self.cluster.master_ip());

        loop {
            let event = if self.pending {
                tokio::select! {
                    event = rx.recv() => event,
                    _ = tokio::time::sleep(self.retry.max_delay) => {
                        self.publish().await?;
                        continue;
                    }
                }
            } else {
                rx.recv().await
            };

            match event {
                Some(event) => self.handle(event).await?,
                None => break,
            }
        }

        info!("Event loop for cluster {} stopped", self.cluster.master_ip());
        Ok(())
    }
}

//! End-to-end reconciliation scenarios driven through a cluster loop
//!
//! A recording publisher stands in for the render/reload pipeline so the
//! tests can assert exactly which snapshots would have been published.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{
    Node, NodeAddress, NodeCondition, NodeStatus, Service, ServicePort, ServiceSpec,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use nginx_conf_generator::apply::{ApplyError, Publisher, ReloadError, RetryPolicy};
use nginx_conf_generator::controller::{metrics, ClusterEvent, ClusterLoop, ResourceKind};
use nginx_conf_generator::options::GeneratorOptions;
use nginx_conf_generator::topology::{Cluster, ClusterSnapshot, Topology, TopologySnapshot};
use nginx_conf_generator::Error;
use tokio::sync::mpsc;
use tokio_test::{assert_err, assert_ok};

const ANNOTATION: &str = "nginx-conf-generator/enabled";

fn node(name: &str, ip: &str, ready: bool, labelled: bool, version: &str) -> Node {
    let mut labels = BTreeMap::new();
    if labelled {
        labels.insert("worker".to_string(), String::new());
    }

    Node {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(labels),
            resource_version: Some(version.to_string()),
            ..Default::default()
        },
        spec: None,
        status: Some(NodeStatus {
            conditions: Some(vec![NodeCondition {
                type_: "Ready".to_string(),
                status: if ready { "True" } else { "False" }.to_string(),
                ..Default::default()
            }]),
            addresses: Some(vec![NodeAddress {
                type_: "InternalIP".to_string(),
                address: ip.to_string(),
            }]),
            ..Default::default()
        }),
    }
}

fn service(name: &str, node_port: i32, version: &str) -> Service {
    let mut annotations = BTreeMap::new();
    annotations.insert(ANNOTATION.to_string(), "true".to_string());

    Service {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some("default".to_string()),
            annotations: Some(annotations),
            resource_version: Some(version.to_string()),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            type_: Some("NodePort".to_string()),
            ports: Some(vec![ServicePort {
                port: 80,
                node_port: Some(node_port),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        status: None,
    }
}

/// Records every snapshot it is asked to publish
#[derive(Default)]
struct RecordingPublisher {
    applied: Mutex<Vec<TopologySnapshot>>,
}

impl RecordingPublisher {
    fn count(&self) -> usize {
        self.applied.lock().unwrap().len()
    }

    fn last(&self) -> Option<TopologySnapshot> {
        self.applied.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl Publisher for RecordingPublisher {
    async fn apply(&self, snapshot: &TopologySnapshot) -> Result<(), ApplyError> {
        self.applied.lock().unwrap().push(snapshot.clone());
        Ok(())
    }
}

/// Fails the first `failures` applies with a reload error
struct FlakyPublisher {
    failures: u32,
    calls: AtomicU32,
}

impl FlakyPublisher {
    fn new(failures: u32) -> Self {
        Self {
            failures,
            calls: AtomicU32::new(0),
        }
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Publisher for FlakyPublisher {
    async fn apply(&self, _snapshot: &TopologySnapshot) -> Result<(), ApplyError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            return Err(ApplyError::Reload(ReloadError::Timeout {
                program: "nginx".to_string(),
                timeout: Duration::from_secs(1),
            }));
        }
        Ok(())
    }
}

fn cluster_snapshot<'a>(
    snapshot: &'a TopologySnapshot,
    master_ip: &str,
) -> Option<&'a ClusterSnapshot> {
    snapshot.clusters.iter().find(|c| c.master_ip == master_ip)
}

fn fast_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
    }
}

fn cluster_loop(
    master_ip: &str,
    publisher: Arc<dyn Publisher>,
    opts: &GeneratorOptions,
) -> (Arc<Cluster>, ClusterLoop) {
    let cluster = Arc::new(Cluster::new(master_ip));
    let mut topology = Topology::new();
    topology.push(cluster.clone());

    let cluster_loop = ClusterLoop::new(cluster.clone(), Arc::new(topology), publisher, opts)
        .with_retry_policy(fast_retry(opts.apply_max_retries));
    (cluster, cluster_loop)
}

#[tokio::test]
async fn test_worker_and_node_port_lifecycle() {
    let master_ip = "192.0.2.10";
    let publisher = Arc::new(RecordingPublisher::default());
    let (cluster, mut cluster_loop) = cluster_loop(
        master_ip,
        publisher.clone(),
        &GeneratorOptions::with_defaults(),
    );

    let n1 = node("n1", "10.0.0.44", true, true, "1");
    assert_ok!(cluster_loop.handle(ClusterEvent::NodeObserved(n1.clone())).await);
    assert_eq!(cluster.worker_count().await, 1);
    assert_eq!(metrics::target_nodes(master_ip), 1);

    let svc1 = service("svc1", 30080, "1");
    assert_ok!(cluster_loop.handle(ClusterEvent::ServiceObserved(svc1.clone())).await);
    let backends = cluster.node_port_workers(30080).await.unwrap();
    assert_eq!(backends.len(), 1);
    assert_eq!(backends[0].host_ip, "10.0.0.44");

    let published = publisher.last().unwrap();
    let snapshot = cluster_snapshot(&published, master_ip).unwrap();
    assert_eq!(snapshot.node_ports[0].port, 30080);
    assert_eq!(snapshot.node_ports[0].workers.len(), 1);

    let not_ready = node("n1", "10.0.0.44", false, true, "2");
    assert_ok!(
        cluster_loop
            .handle(ClusterEvent::NodeChanged {
                old: n1,
                new: not_ready,
            })
            .await
    );
    assert_eq!(cluster.worker_count().await, 0);
    assert!(cluster.node_port_workers(30080).await.unwrap().is_empty());
    assert_eq!(metrics::target_nodes(master_ip), 0);

    assert_ok!(cluster_loop.handle(ClusterEvent::ServiceRemoved(svc1)).await);
    assert_eq!(cluster.worker_count().await, 0);
    assert_eq!(cluster.node_port_count().await, 0);

    assert_eq!(publisher.count(), 4);
    let last = publisher.last().unwrap();
    let snapshot = cluster_snapshot(&last, master_ip).unwrap();
    assert!(snapshot.workers.is_empty());
    assert!(snapshot.node_ports.is_empty());
}

#[tokio::test]
async fn test_redelivered_updates_do_not_publish() {
    let publisher = Arc::new(RecordingPublisher::default());
    let (cluster, mut cluster_loop) = cluster_loop(
        "192.0.2.11",
        publisher.clone(),
        &GeneratorOptions::with_defaults(),
    );

    let n1 = node("n1", "10.0.0.44", true, true, "5");
    let svc1 = service("svc1", 30080, "9");
    cluster_loop.handle(ClusterEvent::NodeObserved(n1.clone())).await.unwrap();
    cluster_loop.handle(ClusterEvent::ServiceObserved(svc1.clone())).await.unwrap();
    assert_eq!(publisher.count(), 2);

    cluster_loop
        .handle(ClusterEvent::NodeChanged {
            old: n1.clone(),
            new: node("n1", "10.0.0.44", false, false, "5"),
        })
        .await
        .unwrap();
    cluster_loop
        .handle(ClusterEvent::ServiceChanged {
            old: svc1.clone(),
            new: service("svc1", 30090, "9"),
        })
        .await
        .unwrap();

    assert_eq!(publisher.count(), 2);
    assert_eq!(cluster.worker_count().await, 1);
    assert!(cluster.contains_node_port(30080).await);
}

#[tokio::test]
async fn test_duplicate_add_does_not_publish() {
    let publisher = Arc::new(RecordingPublisher::default());
    let (_cluster, mut cluster_loop) = cluster_loop(
        "192.0.2.12",
        publisher.clone(),
        &GeneratorOptions::with_defaults(),
    );

    let n1 = node("n1", "10.0.0.44", true, true, "1");
    cluster_loop.handle(ClusterEvent::NodeObserved(n1.clone())).await.unwrap();
    cluster_loop.handle(ClusterEvent::NodeObserved(n1)).await.unwrap();
    assert_eq!(publisher.count(), 1);
}

#[tokio::test]
async fn test_service_before_workers_is_dropped() {
    let publisher = Arc::new(RecordingPublisher::default());
    let (cluster, mut cluster_loop) = cluster_loop(
        "192.0.2.13",
        publisher.clone(),
        &GeneratorOptions::with_defaults(),
    );

    let svc1 = service("svc1", 30080, "1");
    cluster_loop.handle(ClusterEvent::ServiceObserved(svc1.clone())).await.unwrap();
    assert_eq!(cluster.node_port_count().await, 0);
    assert_eq!(publisher.count(), 0);

    // Picked up again once a worker exists and the service is re-observed.
    cluster_loop
        .handle(ClusterEvent::NodeObserved(node("n1", "10.0.0.44", true, true, "1")))
        .await
        .unwrap();
    cluster_loop.handle(ClusterEvent::ServiceObserved(svc1)).await.unwrap();
    assert_eq!(cluster.node_port_workers(30080).await.unwrap().len(), 1);
    assert_eq!(publisher.count(), 2);
}

#[tokio::test]
async fn test_port_change_publishes_replacement() {
    let master_ip = "192.0.2.14";
    let publisher = Arc::new(RecordingPublisher::default());
    let (_cluster, mut cluster_loop) = cluster_loop(
        master_ip,
        publisher.clone(),
        &GeneratorOptions::with_defaults(),
    );

    for (name, ip) in [("n1", "10.0.0.44"), ("n2", "10.0.0.45")] {
        cluster_loop
            .handle(ClusterEvent::NodeObserved(node(name, ip, true, true, "1")))
            .await
            .unwrap();
    }
    let old = service("svc1", 30080, "1");
    cluster_loop.handle(ClusterEvent::ServiceObserved(old.clone())).await.unwrap();
    cluster_loop
        .handle(ClusterEvent::ServiceChanged {
            old,
            new: service("svc1", 30090, "2"),
        })
        .await
        .unwrap();

    let last = publisher.last().unwrap();
    let snapshot = cluster_snapshot(&last, master_ip).unwrap();
    assert_eq!(snapshot.node_ports.len(), 1);
    assert_eq!(snapshot.node_ports[0].port, 30090);
    assert_eq!(snapshot.node_ports[0].workers.len(), 2);
}

#[tokio::test]
async fn test_sync_signals_mark_the_loop_ready() {
    let publisher = Arc::new(RecordingPublisher::default());
    let (_cluster, mut cluster_loop) = cluster_loop(
        "192.0.2.15",
        publisher.clone(),
        &GeneratorOptions::with_defaults(),
    );

    assert!(!cluster_loop.is_ready());
    cluster_loop.handle(ClusterEvent::Synced(ResourceKind::Node)).await.unwrap();
    assert!(!cluster_loop.is_ready());
    cluster_loop.handle(ClusterEvent::Synced(ResourceKind::Service)).await.unwrap();
    assert!(cluster_loop.is_ready());
    assert_eq!(publisher.count(), 0);
}

#[tokio::test]
async fn test_exhausted_apply_fails_fast() {
    let master_ip = "192.0.2.16";
    let publisher = Arc::new(FlakyPublisher::new(u32::MAX));
    let mut opts = GeneratorOptions::with_defaults();
    opts.apply_max_retries = 3;
    opts.fail_fast = true;
    let (cluster, mut cluster_loop) = cluster_loop(master_ip, publisher.clone(), &opts);

    let result = cluster_loop
        .handle(ClusterEvent::NodeObserved(node("n1", "10.0.0.44", true, true, "1")))
        .await;

    match assert_err!(result) {
        Error::ApplyExhausted { attempts, .. } => assert_eq!(attempts, 3),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(publisher.calls(), 3);
    assert_eq!(metrics::apply_count(master_ip, "reload_failed"), 3);
    // No rollback of in-memory state.
    assert_eq!(cluster.worker_count().await, 1);
}

#[tokio::test]
async fn test_exhausted_apply_stays_pending_and_recovers() {
    let master_ip = "192.0.2.17";
    let publisher = Arc::new(FlakyPublisher::new(2));
    let mut opts = GeneratorOptions::with_defaults();
    opts.apply_max_retries = 2;
    let (_cluster, mut cluster_loop) = cluster_loop(master_ip, publisher.clone(), &opts);

    assert_ok!(
        cluster_loop
            .handle(ClusterEvent::NodeObserved(node("n1", "10.0.0.44", true, true, "1")))
            .await
    );
    assert!(cluster_loop.is_pending());
    assert_eq!(publisher.calls(), 2);

    // An event that changes nothing still flushes the pending apply.
    assert_ok!(
        cluster_loop
            .handle(ClusterEvent::Synced(ResourceKind::Node))
            .await
    );
    assert!(!cluster_loop.is_pending());
    assert_eq!(publisher.calls(), 3);
    assert_eq!(metrics::apply_count(master_ip, "success"), 1);
}

#[tokio::test]
async fn test_pending_apply_tries_once_per_event() {
    let master_ip = "192.0.2.21";
    let publisher = Arc::new(FlakyPublisher::new(u32::MAX));
    let mut opts = GeneratorOptions::with_defaults();
    opts.apply_max_retries = 3;
    let (_cluster, mut cluster_loop) = cluster_loop(master_ip, publisher.clone(), &opts);

    assert_ok!(
        cluster_loop
            .handle(ClusterEvent::NodeObserved(node("n1", "10.0.0.44", true, true, "1")))
            .await
    );
    assert!(cluster_loop.is_pending());
    assert_eq!(publisher.calls(), 3);

    for (i, ip) in ["10.0.0.45", "10.0.0.46"].into_iter().enumerate() {
        assert_ok!(
            cluster_loop
                .handle(ClusterEvent::NodeObserved(node("n2", ip, true, true, "1")))
                .await
        );
        assert!(cluster_loop.is_pending());
        assert_eq!(publisher.calls(), 4 + i as u32);
    }
    assert_eq!(metrics::apply_count(master_ip, "reload_failed"), 5);
}

#[tokio::test]
async fn test_retry_succeeds_within_budget() {
    let publisher = Arc::new(FlakyPublisher::new(2));
    let mut opts = GeneratorOptions::with_defaults();
    opts.apply_max_retries = 5;
    opts.fail_fast = true;
    let (_cluster, mut cluster_loop) = cluster_loop("192.0.2.18", publisher.clone(), &opts);

    assert_ok!(
        cluster_loop
            .handle(ClusterEvent::NodeObserved(node("n1", "10.0.0.44", true, true, "1")))
            .await
    );
    assert!(!cluster_loop.is_pending());
    assert_eq!(publisher.calls(), 3);
}

#[tokio::test]
async fn test_run_consumes_channel_until_closed() {
    let publisher = Arc::new(RecordingPublisher::default());
    let (cluster, cluster_loop) = cluster_loop(
        "192.0.2.19",
        publisher.clone(),
        &GeneratorOptions::with_defaults(),
    );

    let (tx, rx) = mpsc::channel(16);
    let handle = tokio::spawn(cluster_loop.run(rx));

    tx.send(ClusterEvent::NodeObserved(node("n1", "10.0.0.44", true, true, "1")))
        .await
        .unwrap();
    tx.send(ClusterEvent::ServiceObserved(service("svc1", 30080, "1")))
        .await
        .unwrap();
    drop(tx);

    assert_ok!(handle.await.unwrap());
    assert_eq!(publisher.count(), 2);
    assert_eq!(cluster.node_port_workers(30080).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_run_retries_pending_apply_on_timer() {
    let publisher = Arc::new(FlakyPublisher::new(1));
    let mut opts = GeneratorOptions::with_defaults();
    opts.apply_max_retries = 1;
    let (_cluster, cluster_loop) = cluster_loop("192.0.2.20", publisher.clone(), &opts);

    let (tx, rx) = mpsc::channel(16);
    let handle = tokio::spawn(cluster_loop.run(rx));

    tx.send(ClusterEvent::NodeObserved(node("n1", "10.0.0.44", true, true, "1")))
        .await
        .unwrap();

    // No further events: the retry timer alone flushes the pending apply.
    tokio::time::timeout(Duration::from_secs(5), async {
        while publisher.calls() < 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    drop(tx);
    assert_ok!(handle.await.unwrap());
}

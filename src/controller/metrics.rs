//! Prometheus metrics for nginx-conf-generator
//!
//! # Exported metrics
//! - `ncg_target_nodes` (gauge): live workers labeled by master_ip.
//! - `ncg_processed_nodeports` (gauge): live NodePorts labeled by master_ip.
//! - `ncg_apply_total` (counter): apply outcomes labeled by master_ip and result.
//! - `ncg_apply_duration_seconds` (histogram): apply duration labeled by master_ip.
//! - `ncg_events_total` (counter): consumed watch events labeled by master_ip and kind.

use std::sync::atomic::{AtomicI64, AtomicU64};

use once_cell::sync::Lazy;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{exponential_buckets, Histogram};
use prometheus_client::registry::Registry;

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ClusterLabels {
    pub master_ip: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ApplyLabels {
    pub master_ip: String,
    /// "success", "render_failed" or "reload_failed"
    pub result: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct EventLabels {
    pub master_ip: String,
    /// e.g. "node_observed", "service_removed"
    pub kind: String,
}

/// Gauge tracking eligible worker nodes per cluster
pub static TARGET_NODES: Lazy<Family<ClusterLabels, Gauge<i64, AtomicI64>>> =
    Lazy::new(Family::default);

/// Gauge tracking exposed NodePort services per cluster
pub static PROCESSED_NODEPORTS: Lazy<Family<ClusterLabels, Gauge<i64, AtomicI64>>> =
    Lazy::new(Family::default);

/// Counter tracking apply outcomes
pub static APPLY_TOTAL: Lazy<Family<ApplyLabels, Counter<u64, AtomicU64>>> =
    Lazy::new(Family::default);

/// Histogram tracking apply duration (seconds)
pub static APPLY_DURATION_SECONDS: Lazy<Family<ClusterLabels, Histogram>> = Lazy::new(|| {
    fn apply_histogram() -> Histogram {
        // 1ms .. ~32s across 16 buckets.
        Histogram::new(exponential_buckets(0.001, 2.0, 16))
    }

    Family::new_with_constructor(apply_histogram)
});

/// Counter tracking consumed watch events
pub static EVENTS_TOTAL: Lazy<Family<EventLabels, Counter<u64, AtomicU64>>> =
    Lazy::new(Family::default);

/// Global metrics registry
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let mut registry = Registry::default();

    registry.register(
        "ncg_target_nodes",
        "Target nodes on the managed clusters",
        TARGET_NODES.clone(),
    );
    registry.register(
        "ncg_processed_nodeports",
        "NodePort type services exposed through the proxy",
        PROCESSED_NODEPORTS.clone(),
    );
    registry.register(
        "ncg_apply",
        "Total number of apply attempts by result",
        APPLY_TOTAL.clone(),
    );
    registry.register(
        "ncg_apply_duration_seconds",
        "Duration of render and reload in seconds",
        APPLY_DURATION_SECONDS.clone(),
    );
    registry.register(
        "ncg_events",
        "Total number of watch events consumed",
        EVENTS_TOTAL.clone(),
    );

    registry
});

fn cluster_labels(master_ip: &str) -> ClusterLabels {
    ClusterLabels {
        master_ip: master_ip.to_string(),
    }
}

pub fn inc_target_nodes(master_ip: &str) {
    TARGET_NODES.get_or_create(&cluster_labels(master_ip)).inc();
}

pub fn dec_target_nodes(master_ip: &str) {
    TARGET_NODES.get_or_create(&cluster_labels(master_ip)).dec();
}

/// Current worker gauge value for a cluster
pub fn target_nodes(master_ip: &str) -> i64 {
    TARGET_NODES.get_or_create(&cluster_labels(master_ip)).get()
}

pub fn set_processed_nodeports(master_ip: &str, count: usize) {
    PROCESSED_NODEPORTS
        .get_or_create(&cluster_labels(master_ip))
        .set(count as i64);
}

pub fn processed_nodeports(master_ip: &str) -> i64 {
    PROCESSED_NODEPORTS
        .get_or_create(&cluster_labels(master_ip))
        .get()
}

/// Record one apply attempt
pub fn observe_apply(master_ip: &str, result: &str, seconds: f64) {
    let labels = ApplyLabels {
        master_ip: master_ip.to_string(),
        result: result.to_string(),
    };
    APPLY_TOTAL.get_or_create(&labels).inc();
    APPLY_DURATION_SECONDS
        .get_or_create(&cluster_labels(master_ip))
        .observe(seconds);
}

pub fn apply_count(master_ip: &str, result: &str) -> u64 {
    let labels = ApplyLabels {
        master_ip: master_ip.to_string(),
        result: result.to_string(),
    };
    APPLY_TOTAL.get_or_create(&labels).get()
}

pub fn inc_event(master_ip: &str, kind: &str) {
    let labels = EventLabels {
        master_ip: master_ip.to_string(),
        kind: kind.to_string(),
    };
    EVENTS_TOTAL.get_or_create(&labels).inc();
}

/// Encode the registry in the prometheus text format
pub fn encode() -> Result<String, std::fmt::Error> {
    let mut buffer = String::new();
    prometheus_client::encoding::text::encode(&mut buffer, &REGISTRY)?;
    Ok(buffer)
}

//! Adapter from kube-runtime watch events to observed/changed/removed
//!
//! `watcher` only reports the latest state of an object. The informer keeps
//! the last object seen per `namespace/name` so updates can be delivered
//! with their previous state, and diffs every (re-)list against the cache so
//! objects deleted while the watch was down are still reported as removed.

use std::collections::BTreeMap;

use futures::StreamExt;
use kube::runtime::{watcher, WatchStreamExt};
use kube::{Api, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::events::{ClusterEvent, ResourceEvent};

fn object_key<K: Resource>(obj: &K) -> String {
    match obj.namespace() {
        Some(ns) => format!("{}/{}", ns, obj.name_any()),
        None => obj.name_any(),
    }
}

#[derive(Debug)]
pub struct Informer<K> {
    cache: BTreeMap<String, K>,
    relist: Option<BTreeMap<String, K>>,
    synced: bool,
}

impl<K> Default for Informer<K> {
    fn default() -> Self {
        Self {
            cache: BTreeMap::new(),
            relist: None,
            synced: false,
        }
    }
}

impl<K: Resource + Clone> Informer<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the first full list has been delivered
    pub fn is_synced(&self) -> bool {
        self.synced
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    pub fn handle(&mut self, event: watcher::Event<K>) -> Vec<ResourceEvent<K>> {
        match event {
            watcher::Event::Apply(obj) => {
                let key = object_key(&obj);
                match self.cache.insert(key, obj.clone()) {
                    Some(old) => vec![ResourceEvent::Changed { old, new: obj }],
                    None => vec![ResourceEvent::Observed(obj)],
                }
            }
            watcher::Event::Delete(obj) => {
                let key = object_key(&obj);
                self.cache.remove(&key);
                vec![ResourceEvent::Removed(obj)]
            }
            watcher::Event::Init => {
                self.relist = Some(BTreeMap::new());
                Vec::new()
            }
            watcher::Event::InitApply(obj) => {
                self.relist
                    .get_or_insert_with(BTreeMap::new)
                    .insert(object_key(&obj), obj);
                Vec::new()
            }
            watcher::Event::InitDone => self.finish_relist(),
        }
    }

    fn finish_relist(&mut self) -> Vec<ResourceEvent<K>> {
        let listed = self.relist.take().unwrap_or_default();
        let previous = std::mem::take(&mut self.cache);
        let mut events = Vec::new();

        for (key, old) in &previous {
            if !listed.contains_key(key) {
                events.push(ResourceEvent::Removed(old.clone()));
            }
        }

        let mut previous = previous;
        for (key, obj) in &listed {
            match previous.remove(key) {
                Some(old) => events.push(ResourceEvent::Changed {
                    old,
                    new: obj.clone(),
                }),
                None => events.push(ResourceEvent::Observed(obj.clone())),
            }
        }

        self.cache = listed;
        if !self.synced {
            self.synced = true;
            events.push(ResourceEvent::Synced);
        }
        events
    }
}

/// Watch every object of kind `K` and forward derived events to a cluster loop.
///
/// Returns when the receiving loop has gone away.
pub async fn watch_resource<K>(api: Api<K>, tx: mpsc::Sender<ClusterEvent>, master_ip: String)
where
    K: Resource + Clone + DeserializeOwned + std::fmt::Debug + Send + Sync + 'static,
    K::DynamicType: Default,
    ClusterEvent: From<ResourceEvent<K>>,
{
    let kind = K::kind(&K::DynamicType::default()).to_string();
    let mut informer = Informer::<K>::new();
    let mut stream = watcher(api, watcher::Config::default())
        .default_backoff()
        .boxed();

    debug!("Starting {} watch for cluster {}", kind, master_ip);

    while let Some(event) = stream.next().await {
        match event {
            Ok(event) => {
                let was_synced = informer.is_synced();
                let derived_events = informer.handle(event);
                if !was_synced && informer.is_synced() {
                    debug!("{} cache for cluster {} synced", kind, master_ip);
                }
                for derived in derived_events {
                    if tx.send(derived.into()).await.is_err() {
                        debug!("{} watch for cluster {} stopped", kind, master_ip);
                        return;
                    }
                }
            }
            Err(e) => {
                warn!("{} watch error for cluster {}: {}", kind, master_ip, e);
            }
        }
    }

    warn!("{} watch stream for cluster {} ended", kind, master_ip);
}

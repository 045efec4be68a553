//! Kubernetes watch adapter
//!
//! Drives one `kube` watcher per [`WatchTarget`] and translates its
//! applied/deleted/restarted events into add, update and delete callbacks.
//! A local map of known objects tells adds from updates and lets a re-list
//! emit deletes for objects that vanished while the watch was down.

use exporter_lib::dynamic::{resource_key, GvrConfig};
use exporter_lib::{HealthRegistry, ResourceEvent, StructuredLogger, WatchTarget};
use futures::StreamExt;
use kube::api::{Api, ApiResource, DynamicObject, GroupVersionKind};
use kube::runtime::watcher::Event;
use kube::runtime::{watcher, WatchStreamExt};
use kube::Client;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Instant;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Dynamic API resource for a configured identity
pub fn api_resource(gvr: &GvrConfig) -> ApiResource {
    let gvk = GroupVersionKind::gvk(&gvr.group, &gvr.version, &gvr.kind);
    ApiResource::from_gvk_with_plural(&gvk, &gvr.resource)
}

/// Last delivered version of every object seen on one watch
#[derive(Debug, Default)]
pub struct KnownObjects {
    objects: HashMap<String, Value>,
}

impl KnownObjects {
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Record `obj` and return the previous version, if any
    pub fn applied(&mut self, obj: Value) -> (Option<Value>, &Value) {
        let key = resource_key(&obj);
        let previous = self.objects.remove(&key);
        let current = self.objects.entry(key).or_insert(obj);
        (previous, current)
    }

    pub fn deleted(&mut self, obj: &Value) -> Option<Value> {
        self.objects.remove(&resource_key(obj))
    }

    /// Replace the whole set after a re-list. Returns objects that were
    /// known before but are absent from `objects`.
    pub fn restarted(&mut self, objects: Vec<Value>) -> (Vec<(Option<Value>, Value)>, Vec<Value>) {
        let mut previous = std::mem::take(&mut self.objects);
        let mut listed = Vec::with_capacity(objects.len());

        for obj in objects {
            let key = resource_key(&obj);
            let old = previous.remove(&key);
            self.objects.insert(key, obj.clone());
            listed.push((old, obj));
        }

        (listed, previous.into_values().collect())
    }
}

/// Translate one watcher event into callbacks on `target`.
///
/// Returns true when the event completed a full list.
pub fn dispatch(known: &mut KnownObjects, target: &WatchTarget, event: Event<Value>) -> bool {
    let handler = &target.handler;
    match event {
        Event::Applied(obj) => {
            let (previous, current) = known.applied(obj);
            match &previous {
                Some(old) => handler.handle(ResourceEvent::Updated { old, new: current }),
                None => handler.handle(ResourceEvent::Added(current)),
            }
            false
        }
        Event::Deleted(obj) => {
            known.deleted(&obj);
            handler.handle(ResourceEvent::Deleted(&obj));
            false
        }
        Event::Restarted(objects) => {
            let (listed, vanished) = known.restarted(objects);
            for obj in &vanished {
                handler.handle(ResourceEvent::Deleted(obj));
            }
            for (old, new) in &listed {
                match old {
                    Some(old) => handler.handle(ResourceEvent::Updated { old, new }),
                    None => handler.handle(ResourceEvent::Added(new)),
                }
            }
            true
        }
    }
}

fn to_value(event: Event<DynamicObject>) -> Result<Event<Value>, serde_json::Error> {
    Ok(match event {
        Event::Applied(obj) => Event::Applied(serde_json::to_value(obj)?),
        Event::Deleted(obj) => Event::Deleted(serde_json::to_value(obj)?),
        Event::Restarted(objs) => Event::Restarted(
            objs.into_iter()
                .map(serde_json::to_value)
                .collect::<Result<_, _>>()?,
        ),
    })
}

fn target_label(target: &WatchTarget) -> String {
    match &target.namespace {
        Some(ns) => format!("{} in {ns}", target.gvr),
        None => target.gvr.to_string(),
    }
}

/// Run one watch until shutdown.
///
/// Stream errors are retried by the watcher backoff and mark this watch
/// degraded until its next good event. The owning collector reports healthy
/// again only once none of its watches is degraded.
pub async fn run_watch(
    client: Client,
    target: WatchTarget,
    health: HealthRegistry,
    logger: StructuredLogger,
    mut shutdown: broadcast::Receiver<()>,
) {
    let resource = target_label(&target);
    let ar = api_resource(&target.gvr);
    let api: Api<DynamicObject> = match &target.namespace {
        Some(ns) => Api::namespaced_with(client, ns, &ar),
        None => Api::all_with(client, &ar),
    };

    info!(collector = %target.collector, resource = %resource, "Starting watch");

    let started = Instant::now();
    let mut stream = watcher(api, watcher::Config::default())
        .default_backoff()
        .boxed();
    let mut known = KnownObjects::default();
    let mut degraded = false;

    loop {
        tokio::select! {
            next = stream.next() => match next {
                Some(Ok(event)) => {
                    if degraded {
                        health.set_source_healthy(&target.collector, &resource).await;
                        degraded = false;
                    }

                    let event = match to_value(event) {
                        Ok(event) => event,
                        Err(e) => {
                            warn!(
                                collector = %target.collector,
                                error = %e,
                                "Failed to encode watched object"
                            );
                            continue;
                        }
                    };

                    let listed = dispatch(&mut known, &target, event);
                    if listed && !target.sync.is_synced() {
                        target.sync.mark_synced();
                        logger.log_cache_synced(&target.collector, started.elapsed());
                    } else if listed {
                        debug!(
                            collector = %target.collector,
                            objects = known.len(),
                            "Watch re-listed"
                        );
                    }
                }
                Some(Err(e)) => {
                    logger.log_watch_error(&target.collector, &resource, &e.to_string());
                    health
                        .set_source_degraded(
                            &target.collector,
                            &resource,
                            format!("watch {resource}: {e}"),
                        )
                        .await;
                    degraded = true;
                }
                None => {
                    health
                        .set_unhealthy(&target.collector, format!("watch {resource} ended"))
                        .await;
                    break;
                }
            },
            _ = shutdown.recv() => {
                debug!(collector = %target.collector, resource = %resource, "Stopping watch");
                break;
            }
        }
    }
}

//! Event handler plumbing between the watch layer and collectors
//!
//! Collectors hand the watch layer a set of [`WatchTarget`]s. Each target
//! names a resource identity and carries the callbacks to invoke for add,
//! update and delete events on it.

use crate::dynamic::GvrConfig;
use crate::lifecycle::{LifecycleGate, SyncHandle};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

pub type ObjectFn = Arc<dyn Fn(&Value) + Send + Sync>;
pub type UpdateFn = Arc<dyn Fn(&Value, &Value) + Send + Sync>;

/// A watch event, borrowed from the watch layer's store
#[derive(Debug, Clone, Copy)]
pub enum ResourceEvent<'a> {
    Added(&'a Value),
    Updated { old: &'a Value, new: &'a Value },
    Deleted(&'a Value),
}

impl ResourceEvent<'_> {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceEvent::Added(_) => "add",
            ResourceEvent::Updated { .. } => "update",
            ResourceEvent::Deleted(_) => "delete",
        }
    }
}

/// Callback set; unset callbacks are no-ops
#[derive(Clone, Default)]
pub struct EventHandlerFuncs {
    add: Option<ObjectFn>,
    update: Option<UpdateFn>,
    delete: Option<ObjectFn>,
}

impl EventHandlerFuncs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_add(mut self, f: impl Fn(&Value) + Send + Sync + 'static) -> Self {
        self.add = Some(Arc::new(f));
        self
    }

    pub fn on_update(mut self, f: impl Fn(&Value, &Value) + Send + Sync + 'static) -> Self {
        self.update = Some(Arc::new(f));
        self
    }

    pub fn on_delete(mut self, f: impl Fn(&Value) + Send + Sync + 'static) -> Self {
        self.delete = Some(Arc::new(f));
        self
    }

    /// Drop every event while the gate is closed.
    pub fn gated(self, name: impl Into<String>, gate: LifecycleGate) -> Self {
        let name: String = name.into();
        let accept = Arc::new(move |event: &str| {
            let open = gate.may_run();
            if !open {
                debug!(collector = %name, event, "Gate closed, ignoring event");
            }
            open
        });

        let inner = self;
        let mut gated = EventHandlerFuncs::new();
        if let Some(add) = inner.add {
            let accept = Arc::clone(&accept);
            gated.add = Some(Arc::new(move |obj: &Value| {
                if accept("add") {
                    add(obj)
                }
            }));
        }
        if let Some(update) = inner.update {
            let accept = Arc::clone(&accept);
            gated.update = Some(Arc::new(move |old: &Value, new: &Value| {
                if accept("update") {
                    update(old, new)
                }
            }));
        }
        if let Some(delete) = inner.delete {
            gated.delete = Some(Arc::new(move |obj: &Value| {
                if accept("delete") {
                    delete(obj)
                }
            }));
        }
        gated
    }

    pub fn handle(&self, event: ResourceEvent<'_>) {
        match event {
            ResourceEvent::Added(obj) => {
                if let Some(add) = &self.add {
                    add(obj);
                }
            }
            ResourceEvent::Updated { old, new } => {
                if let Some(update) = &self.update {
                    update(old, new);
                }
            }
            ResourceEvent::Deleted(obj) => {
                if let Some(delete) = &self.delete {
                    delete(obj);
                }
            }
        }
    }
}

impl fmt::Debug for EventHandlerFuncs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventHandlerFuncs")
            .field("add", &self.add.is_some())
            .field("update", &self.update.is_some())
            .field("delete", &self.delete.is_some())
            .finish()
    }
}

/// One resource stream a collector wants delivered
#[derive(Debug, Clone)]
pub struct WatchTarget {
    /// Owning collector, for logs and self-metrics
    pub collector: String,
    pub gvr: GvrConfig,
    /// `None` watches all namespaces
    pub namespace: Option<String>,
    pub handler: EventHandlerFuncs,
    pub sync: SyncHandle,
}

impl WatchTarget {
    /// One target per namespace, or a single cluster-wide target when the
    /// list is empty.
    pub fn for_namespaces(
        collector: &str,
        gvr: &GvrConfig,
        namespaces: &[String],
        handler: &EventHandlerFuncs,
        mut register: impl FnMut() -> SyncHandle,
    ) -> Vec<WatchTarget> {
        let scopes: Vec<Option<String>> = if namespaces.is_empty() {
            vec![None]
        } else {
            namespaces.iter().cloned().map(Some).collect()
        };

        scopes
            .into_iter()
            .map(|namespace| WatchTarget {
                collector: collector.to_string(),
                gvr: gvr.clone(),
                namespace,
                handler: handler.clone(),
                sync: register(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_handle_dispatches_by_kind() {
        let adds = Arc::new(AtomicUsize::new(0));
        let deletes = Arc::new(AtomicUsize::new(0));

        let handler = EventHandlerFuncs::new()
            .on_add({
                let adds = Arc::clone(&adds);
                move |_| {
                    adds.fetch_add(1, Ordering::SeqCst);
                }
            })
            .on_delete({
                let deletes = Arc::clone(&deletes);
                move |_| {
                    deletes.fetch_add(1, Ordering::SeqCst);
                }
            });

        let obj = json!({});
        handler.handle(ResourceEvent::Added(&obj));
        handler.handle(ResourceEvent::Updated { old: &obj, new: &obj });
        handler.handle(ResourceEvent::Deleted(&obj));

        assert_eq!(adds.load(Ordering::SeqCst), 1);
        assert_eq!(deletes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_gated_handler_drops_events_while_closed() {
        let adds = Arc::new(AtomicUsize::new(0));
        let gate = LifecycleGate::new();
        let handler = EventHandlerFuncs::new()
            .on_add({
                let adds = Arc::clone(&adds);
                move |_| {
                    adds.fetch_add(1, Ordering::SeqCst);
                }
            })
            .gated("test", gate.clone());

        let obj = json!({});
        handler.handle(ResourceEvent::Added(&obj));
        assert_eq!(adds.load(Ordering::SeqCst), 0);

        gate.set_may_run(true);
        handler.handle(ResourceEvent::Added(&obj));
        assert_eq!(adds.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_targets_per_namespace() {
        let gvr = GvrConfig::new("", "v1", "pods", "Pod");
        let handler = EventHandlerFuncs::new();

        let all = WatchTarget::for_namespaces("pod", &gvr, &[], &handler, SyncHandle::default);
        assert_eq!(all.len(), 1);
        assert!(all[0].namespace.is_none());

        let scoped = WatchTarget::for_namespaces(
            "pod",
            &gvr,
            &["a".to_string(), "b".to_string()],
            &handler,
            SyncHandle::default,
        );
        assert_eq!(scoped.len(), 2);
        assert_eq!(scoped[1].namespace.as_deref(), Some("b"));
    }
}

//! Watch-driven local cache backed by a kube reflector store
//!
//! The `Informer` consumes a `watcher` stream, keeps a reflector store up to
//! date and turns each watch event into a [`Notification`]. The paired
//! [`ReflectorLister`] serves point lookups from the same store.

use std::collections::{HashMap, HashSet};
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::{Stream, StreamExt};
use kube::runtime::reflector::{store::Writer, ObjectRef, Store};
use kube::runtime::watcher;
use kube::Resource;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::{meta_namespace_key, Lister};
use crate::error::Result;
use crate::informer::{DeletedObject, EventHandler, Notification};
use crate::metrics;
use crate::resource::ManagedResource;

/// Lister over a reflector store.
pub struct ReflectorLister<K>
where
    K: Resource + Clone + 'static,
    K::DynamicType: Eq + Hash + Clone,
{
    store: Store<K>,
    synced: Arc<AtomicBool>,
}

impl<K> Clone for ReflectorLister<K>
where
    K: Resource + Clone + 'static,
    K::DynamicType: Eq + Hash + Clone,
{
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            synced: self.synced.clone(),
        }
    }
}

impl<K> Lister<K> for ReflectorLister<K>
where
    K: Resource<DynamicType = ()> + ManagedResource,
{
    fn get(&self, namespace: Option<&str>, name: &str) -> Result<Option<Arc<K>>> {
        let mut obj_ref = ObjectRef::<K>::new(name);
        if let Some(ns) = namespace {
            obj_ref = obj_ref.within(ns);
        }
        Ok(self.store.get(&obj_ref))
    }

    fn has_synced(&self) -> bool {
        self.synced.load(Ordering::Acquire)
    }
}

/// Drives a reflector store from a watch stream and emits notifications.
pub struct Informer<K>
where
    K: Resource + Clone + 'static,
    K::DynamicType: Eq + Hash + Clone,
{
    kind: &'static str,
    writer: Writer<K>,
    reader: Store<K>,
    synced: Arc<AtomicBool>,
    /// Objects seen since the current relist started
    relist: Option<Vec<K>>,
}

impl<K> Informer<K>
where
    K: Resource<DynamicType = ()> + ManagedResource + Debug,
{
    pub fn new(kind: &'static str) -> Self {
        let writer = Writer::default();
        let reader = writer.as_reader();
        Self {
            kind,
            writer,
            reader,
            synced: Arc::new(AtomicBool::new(false)),
            relist: None,
        }
    }

    pub fn lister(&self) -> ReflectorLister<K> {
        ReflectorLister {
            store: self.reader.clone(),
            synced: self.synced.clone(),
        }
    }

    /// Apply a watch event to the store and return the notifications it
    /// produces.
    ///
    /// Objects delivered during a relist are held back until the relist
    /// completes, so notifications never run ahead of the store. Objects
    /// that disappeared during the relist are reported as stale-reference
    /// deletes.
    pub fn translate(&mut self, event: watcher::Event<K>) -> Vec<Notification<K>> {
        match event {
            watcher::Event::Apply(obj) => {
                let old = self.reader.get(&ObjectRef::from_obj(&obj));
                self.writer.apply_watcher_event(&watcher::Event::Apply(obj.clone()));
                let new = Arc::new(obj);
                vec![match old {
                    Some(old) => Notification::Updated { old, new },
                    None => Notification::Added(new),
                }]
            }
            watcher::Event::Delete(obj) => {
                self.writer.apply_watcher_event(&watcher::Event::Delete(obj.clone()));
                vec![Notification::Deleted(DeletedObject::Live(Arc::new(obj)))]
            }
            watcher::Event::Init => {
                debug!(kind = self.kind, "Relist started");
                self.relist = Some(Vec::new());
                self.writer.apply_watcher_event(&watcher::Event::Init);
                Vec::new()
            }
            watcher::Event::InitApply(obj) => {
                self.writer.apply_watcher_event(&watcher::Event::InitApply(obj.clone()));
                self.relist.get_or_insert_with(Vec::new).push(obj);
                Vec::new()
            }
            watcher::Event::InitDone => {
                let previous: HashMap<ObjectRef<K>, Arc<K>> = self
                    .reader
                    .state()
                    .into_iter()
                    .map(|obj| (ObjectRef::from_obj(obj.as_ref()), obj))
                    .collect();
                self.writer.apply_watcher_event(&watcher::Event::InitDone);

                let listed = self.relist.take().unwrap_or_default();
                let mut seen = HashSet::with_capacity(listed.len());
                let mut notifications = Vec::with_capacity(listed.len());
                for obj in listed {
                    let obj_ref = ObjectRef::from_obj(&obj);
                    let new = Arc::new(obj);
                    notifications.push(match previous.get(&obj_ref) {
                        Some(old) => Notification::Updated {
                            old: old.clone(),
                            new,
                        },
                        None => Notification::Added(new),
                    });
                    seen.insert(obj_ref);
                }
                for (obj_ref, last_known) in previous {
                    if !seen.contains(&obj_ref) {
                        notifications.push(Notification::Deleted(DeletedObject::StaleReference {
                            key: meta_namespace_key(obj_ref.namespace.as_deref(), &obj_ref.name),
                            last_known: Some(last_known),
                        }));
                    }
                }

                if !self.synced.swap(true, Ordering::AcqRel) {
                    info!(kind = self.kind, objects = self.reader.len(), "Local cache synced");
                    metrics::CACHE_SYNCED.with_label_values(&[self.kind]).set(1.0);
                }
                notifications
            }
        }
    }

    /// Consume `events` until the stream ends or `shutdown` fires, feeding
    /// every notification to `handler`.
    pub async fn run<S>(mut self, events: S, handler: EventHandler<K>, shutdown: CancellationToken)
    where
        S: Stream<Item = std::result::Result<watcher::Event<K>, watcher::Error>> + Send,
    {
        let mut events = std::pin::pin!(events);
        info!(kind = self.kind, "Starting watch");
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                next = events.next() => match next {
                    Some(Ok(event)) => {
                        for notification in self.translate(event) {
                            handler.handle(notification);
                        }
                    }
                    Some(Err(e)) => {
                        warn!(kind = self.kind, error = %e, "Watch error, backing off");
                    }
                    None => {
                        warn!(kind = self.kind, "Watch stream ended");
                        break;
                    }
                },
            }
        }
        info!(kind = self.kind, "Stopped watch");
    }
}

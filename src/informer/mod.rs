//! Change notifications and their translation into queue keys
//!
//! A watch source reports adds, updates and deletes. Each notification maps
//! to at most one key; the key, not the object, goes on the queue so the
//! worker always reads the newest cached state.

use std::sync::Arc;

use tracing::{debug, error};

use crate::cache::{key_for, split_key};
use crate::error::{Error, Result};
use crate::metrics;
use crate::queue::WorkQueue;
use crate::resource::ManagedResource;

/// Payload of a delete notification.
#[derive(Debug, Clone)]
pub enum DeletedObject<R> {
    /// The object as it was when deleted
    Live(Arc<R>),
    /// The deletion was inferred after the fact (e.g. the object vanished
    /// during a relist); only the key is authoritative
    StaleReference {
        key: String,
        last_known: Option<Arc<R>>,
    },
}

/// A change reported by the watch source.
#[derive(Debug, Clone)]
pub enum Notification<R> {
    Added(Arc<R>),
    Updated { old: Arc<R>, new: Arc<R> },
    Deleted(DeletedObject<R>),
}

/// Key to enqueue for a notification.
///
/// `Ok(None)` for updates that leave the spec untouched: status-only and
/// metadata-only churn (including this controller's own status writes) must
/// not trigger another reconciliation.
pub fn enqueue_key<R: ManagedResource>(notification: &Notification<R>) -> Result<Option<String>> {
    match notification {
        Notification::Added(obj) => key_for(obj.as_ref()).map(Some),
        Notification::Updated { old, new } => {
            if old.spec() == new.spec() {
                return Ok(None);
            }
            key_for(new.as_ref()).map(Some)
        }
        Notification::Deleted(DeletedObject::Live(obj)) => key_for(obj.as_ref()).map(Some),
        Notification::Deleted(DeletedObject::StaleReference { key, .. }) => {
            split_key(key).map_err(|e| {
                Error::InvalidNotification(format!("couldn't get key from tombstone: {}", e))
            })?;
            Ok(Some(key.clone()))
        }
    }
}

/// Feeds notifications into a work queue. Never blocks.
pub struct EventHandler<R> {
    kind: &'static str,
    queue: Arc<WorkQueue<String>>,
    _resource: std::marker::PhantomData<fn() -> R>,
}

impl<R> Clone for EventHandler<R> {
    fn clone(&self) -> Self {
        Self {
            kind: self.kind,
            queue: self.queue.clone(),
            _resource: std::marker::PhantomData,
        }
    }
}

impl<R: ManagedResource> EventHandler<R> {
    pub fn new(kind: &'static str, queue: Arc<WorkQueue<String>>) -> Self {
        Self {
            kind,
            queue,
            _resource: std::marker::PhantomData,
        }
    }

    pub fn handle(&self, notification: Notification<R>) {
        let action = match &notification {
            Notification::Added(_) => "adding",
            Notification::Updated { .. } => "updating",
            Notification::Deleted(_) => "deleting",
        };

        match enqueue_key(&notification) {
            Ok(Some(key)) => {
                debug!(kind = self.kind, key = %key, "{} {}", action, self.kind);
                self.queue.add(key);
            }
            Ok(None) => {
                debug!(kind = self.kind, "No updates on the spec of {}, skipping syncing", self.kind);
            }
            Err(e) => {
                metrics::DROPPED_NOTIFICATIONS
                    .with_label_values(&[self.kind])
                    .inc();
                error!(kind = self.kind, error = %e, "Dropping malformed notification");
            }
        }
    }

    pub fn on_add(&self, obj: Arc<R>) {
        self.handle(Notification::Added(obj));
    }

    pub fn on_update(&self, old: Arc<R>, new: Arc<R>) {
        self.handle(Notification::Updated { old, new });
    }

    pub fn on_delete(&self, obj: DeletedObject<R>) {
        self.handle(Notification::Deleted(obj));
    }
}

//! Worker pool and per-key reconciliation
//!
//! Workers pull keys off the queue, resolve them against the local cache
//! and hand the object to the sync handler. The outcome decides the key's
//! fate: success forgets its backoff, failure requeues it rate limited.

use std::any::Any;
use std::future::Future;
use std::marker::PhantomData;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, trace};

use crate::cache::{split_key, wait_for_cache_sync, Lister};
use crate::error::{Error, Result};
use crate::informer::EventHandler;
use crate::metrics;
use crate::queue::WorkQueue;
use crate::resource::ManagedResource;

/// Business logic run for every resolved object.
///
/// Returning an error requeues the key with backoff.
#[async_trait]
pub trait SyncHandler<R>: Send + Sync {
    async fn sync(&self, obj: Arc<R>) -> Result<()>;
}

#[async_trait]
impl<R, F, Fut> SyncHandler<R> for F
where
    R: Send + Sync + 'static,
    F: Fn(Arc<R>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<()>> + Send,
{
    async fn sync(&self, obj: Arc<R>) -> Result<()> {
        (self)(obj).await
    }
}

/// How a claimed key left the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Synced, deleted, or malformed: backoff forgotten
    Forgotten,
    /// Failed or panicked: requeued with backoff
    Requeued,
}

pub struct Controller<R, L, H> {
    name: &'static str,
    queue: Arc<WorkQueue<String>>,
    lister: Arc<L>,
    handler: Arc<H>,
    _resource: PhantomData<fn() -> R>,
}

impl<R, L, H> Controller<R, L, H>
where
    R: ManagedResource,
    L: Lister<R> + 'static,
    H: SyncHandler<R> + 'static,
{
    pub fn new(
        name: &'static str,
        queue: Arc<WorkQueue<String>>,
        lister: Arc<L>,
        handler: Arc<H>,
    ) -> Self {
        Self {
            name,
            queue,
            lister,
            handler,
            _resource: PhantomData,
        }
    }

    pub fn queue(&self) -> &Arc<WorkQueue<String>> {
        &self.queue
    }

    /// Notification handler feeding this controller's queue
    pub fn event_handler(&self) -> EventHandler<R> {
        EventHandler::new(self.name, self.queue.clone())
    }

    /// Wait for the cache to sync, start `workers` workers and block until
    /// `shutdown` fires.
    ///
    /// On shutdown the queue is shut down, idle workers return, and
    /// in-flight reconciliations run to completion before this returns.
    /// If `shutdown` fires before the cache syncs no worker is started and
    /// [`Error::CacheSync`] is returned.
    pub async fn run(self: Arc<Self>, workers: usize, shutdown: CancellationToken) -> Result<()> {
        if workers == 0 {
            self.queue.shut_down();
            return Err(Error::config("worker count must be at least 1"));
        }

        info!(controller = self.name, "Starting controller");

        debug!(controller = self.name, "Waiting for informer caches to sync");
        if !wait_for_cache_sync::<R, L>(self.lister.as_ref(), &shutdown).await {
            self.queue.shut_down();
            return Err(Error::CacheSync(format!(
                "{} cache did not sync before shutdown",
                self.name
            )));
        }

        debug!(controller = self.name, workers, "Starting workers");
        let mut pool = JoinSet::new();
        for id in 0..workers {
            let this = self.clone();
            pool.spawn(async move { this.run_worker(id).await });
        }
        metrics::OPERATOR_READY.set(1.0);

        shutdown.cancelled().await;
        info!(controller = self.name, "Shutting down controller");
        metrics::OPERATOR_READY.set(0.0);
        self.queue.shut_down();

        while let Some(joined) = pool.join_next().await {
            if let Err(e) = joined {
                error!(controller = self.name, error = %e, "Worker task failed");
            }
        }
        info!(controller = self.name, "Controller stopped");
        Ok(())
    }

    async fn run_worker(&self, id: usize) {
        trace!(controller = self.name, worker = id, "Worker started");
        while self.process_next_work_item().await.is_some() {}
        trace!(controller = self.name, worker = id, "Worker stopped");
    }

    /// Claim one key and reconcile it.
    ///
    /// Returns `None` once the queue is shut down and drained.
    pub async fn process_next_work_item(&self) -> Option<Disposition> {
        let key = self.queue.get().await?;

        metrics::RECONCILIATIONS
            .with_label_values(&[self.name])
            .inc();
        let timer = metrics::RECONCILE_DURATION
            .with_label_values(&[self.name])
            .start_timer();

        let outcome = AssertUnwindSafe(self.sync_key(&key)).catch_unwind().await;
        let disposition = match outcome {
            Ok(Ok(())) => {
                self.queue.forget(&key);
                info!(controller = self.name, key = %key, "Successfully synced");
                Disposition::Forgotten
            }
            Ok(Err(e)) => {
                self.queue.add_rate_limited(key.clone());
                metrics::RECONCILIATION_ERRORS
                    .with_label_values(&[self.name])
                    .inc();
                error!(
                    controller = self.name,
                    key = %key,
                    requeues = self.queue.num_requeues(&key),
                    error = %e,
                    "Error syncing, requeuing"
                );
                Disposition::Requeued
            }
            Err(panic) => {
                self.queue.add_rate_limited(key.clone());
                metrics::RECONCILIATION_PANICS
                    .with_label_values(&[self.name])
                    .inc();
                error!(
                    controller = self.name,
                    key = %key,
                    panic = %panic_message(panic.as_ref()),
                    "Panic while syncing, requeuing"
                );
                Disposition::Requeued
            }
        };

        timer.observe_duration();
        self.queue.done(&key);
        Some(disposition)
    }

    /// Resolve `key` against the cache and run the sync handler.
    #[instrument(skip(self), fields(controller = self.name))]
    async fn sync_key(&self, key: &str) -> Result<()> {
        let (namespace, name) = match split_key(key) {
            Ok(parts) => parts,
            Err(e) => {
                // Retrying cannot fix a malformed key.
                error!(error = %e, "Dropping invalid resource key");
                return Ok(());
            }
        };

        debug!("Start processing");
        let Some(obj) = self.lister.get(namespace, name)? else {
            info!("Resource has been deleted");
            return Ok(());
        };

        self.handler.sync(obj).await
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

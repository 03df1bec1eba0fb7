//! Status write-back with optimistic concurrency
//!
//! Objects handed out by the local cache are shared snapshots and must never
//! be modified. Every write here goes through a private copy; on a conflict
//! the copy is rebuilt from the newest cached object and the write retried.

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tracing::{debug, error, info, warn};

use crate::cache::Lister;
use crate::error::Result;
use crate::metrics;
use crate::resource::ManagedResource;

/// Conditional write of an object's status.
///
/// Implementations must report a concurrent modification as an error for
/// which [`crate::Error::is_conflict`] is true.
#[async_trait]
pub trait StatusWriter<R>: Send + Sync {
    /// Persist `obj`'s status, returning the stored object.
    async fn write_status(&self, obj: &R) -> Result<R>;
}

/// Retry budget for conflicting status writes.
#[derive(Clone, Debug, PartialEq)]
pub struct RetryPolicy {
    /// Total write attempts, including the first
    pub steps: u32,
    /// Delay after the first conflict
    pub delay: Duration,
    /// Multiplier applied to the delay after each conflict
    pub factor: f64,
    /// Random extra delay, as a fraction of the current delay
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            steps: 5,
            delay: Duration::from_millis(10),
            factor: 1.0,
            jitter: 0.1,
        }
    }
}

impl RetryPolicy {
    fn jittered(&self, delay: Duration) -> Duration {
        if self.jitter <= 0.0 {
            return delay;
        }
        let extra = rand::thread_rng().gen_range(0.0..self.jitter);
        delay.mul_f64(1.0 + extra)
    }
}

/// Loop state of one `update_status` call.
struct Attempt<R> {
    number: u32,
    delay: Duration,
    current: R,
}

/// Writes statuses back, retrying on conflicts against fresh cache reads.
pub struct StatusPersister<R, W, L> {
    kind: &'static str,
    writer: W,
    lister: Arc<L>,
    policy: RetryPolicy,
    _resource: PhantomData<fn() -> R>,
}

impl<R, W, L> StatusPersister<R, W, L>
where
    R: ManagedResource,
    W: StatusWriter<R>,
    L: Lister<R>,
{
    pub fn new(kind: &'static str, writer: W, lister: Arc<L>, policy: RetryPolicy) -> Self {
        Self {
            kind,
            writer,
            lister,
            policy,
            _resource: PhantomData,
        }
    }

    pub fn writer(&self) -> &W {
        &self.writer
    }

    /// Set `status` on a copy of `obj` and persist it.
    ///
    /// Conflicts are retried up to the policy's step count, each time on a
    /// copy of the newest cached version of the object. An object that no
    /// longer exists needs no status and counts as success. Other write
    /// errors are returned immediately. When the budget runs out the last conflict
    /// is returned.
    pub async fn update_status(&self, obj: &R, status: &R::Status) -> Result<()> {
        let name = obj.name().unwrap_or_default().to_string();
        let namespace = obj.namespace().map(str::to_string);
        debug!(kind = self.kind, name = %name, "Try to update status");

        let mut attempt = Attempt {
            number: 1,
            delay: self.policy.delay,
            current: obj.clone(),
        };

        loop {
            attempt.current.set_status(status.clone());
            let err = match self.writer.write_status(&attempt.current).await {
                Ok(_) => return Ok(()),
                Err(e) if e.is_not_found() => {
                    info!(kind = self.kind, name = %name, "Object deleted before status update, skipping");
                    return Ok(());
                }
                Err(e) if e.is_conflict() => e,
                Err(e) => return Err(e),
            };

            metrics::STATUS_UPDATE_CONFLICTS
                .with_label_values(&[self.kind])
                .inc();
            match self.lister.get(namespace.as_deref(), &name) {
                Ok(Some(latest)) => attempt.current = (*latest).clone(),
                Ok(None) => {
                    error!(kind = self.kind, name = %name, "Error getting updated object from lister: not found");
                }
                Err(e) => {
                    error!(kind = self.kind, name = %name, error = %e, "Error getting updated object from lister");
                }
            }

            if attempt.number >= self.policy.steps {
                warn!(
                    kind = self.kind,
                    name = %name,
                    attempts = attempt.number,
                    "Giving up on status update after repeated conflicts"
                );
                return Err(err);
            }

            tokio::time::sleep(self.policy.jittered(attempt.delay)).await;
            attempt.number += 1;
            attempt.delay = attempt.delay.mul_f64(self.policy.factor.max(1.0));
        }
    }
}

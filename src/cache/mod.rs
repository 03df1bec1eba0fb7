//! Local read cache
//!
//! A read-only, eventually consistent mirror of resource state. The
//! controller only ever reads from it; population happens elsewhere (a
//! reflector fed by a watch, or an embedding application).
//!
//! Objects come back as shared `Arc` snapshots. Never mutate them: clone
//! first.

mod key;
mod memory;

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::debug;

pub use key::{key_for, meta_namespace_key, split_key};
pub use memory::MemoryStore;

use crate::error::Result;

/// How often `wait_for_cache_sync` polls the synced flag
pub const SYNC_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Point lookups against the local read cache.
pub trait Lister<R>: Send + Sync {
    /// Look up an object. `Ok(None)` means it is not in the cache.
    fn get(&self, namespace: Option<&str>, name: &str) -> Result<Option<Arc<R>>>;

    /// Whether the initial population has completed.
    fn has_synced(&self) -> bool;
}

/// Block until `lister` reports synced. Returns false if `shutdown` fires
/// first.
pub async fn wait_for_cache_sync<R, L>(lister: &L, shutdown: &CancellationToken) -> bool
where
    L: Lister<R> + ?Sized,
{
    let mut interval = tokio::time::interval(SYNC_POLL_INTERVAL);
    loop {
        if lister.has_synced() {
            return true;
        }
        tokio::select! {
            _ = shutdown.cancelled() => {
                debug!("Shutdown requested before cache sync");
                return false;
            }
            _ = interval.tick() => {}
        }
    }
}

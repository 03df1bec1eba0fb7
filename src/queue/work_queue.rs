//! Deduplicating, delaying, rate-limited work queue

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet, VecDeque};
use std::hash::Hash;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::trace;

use super::rate_limiter::RateLimiter;
use crate::metrics;

/// A key scheduled to become ready at `ready_at`.
struct Waiting<K> {
    ready_at: Instant,
    seq: u64,
    item: K,
}

impl<K> PartialEq for Waiting<K> {
    fn eq(&self, other: &Self) -> bool {
        self.ready_at == other.ready_at && self.seq == other.seq
    }
}

impl<K> Eq for Waiting<K> {}

impl<K> PartialOrd for Waiting<K> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<K> Ord for Waiting<K> {
    // Reversed so the max-heap pops the earliest ready time first.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .ready_at
            .cmp(&self.ready_at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct State<K> {
    /// Keys ready to be handed out, in order
    queue: VecDeque<K>,
    /// Keys that need processing: everything in `queue` plus keys re-added
    /// while in flight
    dirty: HashSet<K>,
    /// Keys currently claimed by a worker
    processing: HashSet<K>,
    /// Earliest ready time per delayed key
    waiting: HashMap<K, Instant>,
    /// Delayed keys ordered by ready time; entries superseded in `waiting`
    /// are skipped when popped
    heap: BinaryHeap<Waiting<K>>,
    seq: u64,
    shutting_down: bool,
}

impl<K: Eq + Hash + Clone> State<K> {
    /// Mark `item` dirty. Returns true when it became available to `get`.
    fn insert(&mut self, item: K) -> bool {
        if self.dirty.contains(&item) {
            return false;
        }
        self.dirty.insert(item.clone());
        if self.processing.contains(&item) {
            return false;
        }
        self.queue.push_back(item);
        true
    }

    fn schedule(&mut self, item: K, ready_at: Instant) {
        if let Some(existing) = self.waiting.get(&item) {
            if *existing <= ready_at {
                return;
            }
        }
        self.waiting.insert(item.clone(), ready_at);
        self.seq = self.seq.wrapping_add(1);
        self.heap.push(Waiting {
            ready_at,
            seq: self.seq,
            item,
        });
    }

    /// Move every delayed key whose time has come into the ready queue.
    fn promote_ready(&mut self, now: Instant) {
        while let Some(next) = self.heap.peek() {
            if next.ready_at > now {
                break;
            }
            let Some(entry) = self.heap.pop() else { break };
            if self.waiting.get(&entry.item) != Some(&entry.ready_at) {
                continue;
            }
            self.waiting.remove(&entry.item);
            self.insert(entry.item);
        }
    }

    fn next_ready_at(&self) -> Option<Instant> {
        self.heap.peek().map(|entry| entry.ready_at)
    }
}

/// Work queue with at-most-one-in-flight-per-key semantics.
///
/// * `add` coalesces: a key already pending, or re-added while in flight, is
///   stored once.
/// * `get` claims a key exclusively until `done` releases it. A key re-added
///   during processing is handed out again only after `done`.
/// * `add_rate_limited` re-adds after a delay chosen by the rate limiter;
///   `forget` clears that limiter's history for the key.
/// * `shut_down` stops accepting new keys. `get` keeps handing out keys
///   already pending and returns `None` once the queue is empty.
pub struct WorkQueue<K> {
    name: String,
    state: Mutex<State<K>>,
    notify: Notify,
    rate_limiter: Box<dyn RateLimiter<K>>,
}

impl<K> WorkQueue<K>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
{
    /// Create a named queue. The name labels the queue's metrics.
    pub fn new(name: impl Into<String>, rate_limiter: impl RateLimiter<K> + 'static) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(State {
                queue: VecDeque::new(),
                dirty: HashSet::new(),
                processing: HashSet::new(),
                waiting: HashMap::new(),
                heap: BinaryHeap::new(),
                seq: 0,
                shutting_down: false,
            }),
            notify: Notify::new(),
            rate_limiter: Box::new(rate_limiter),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn state(&self) -> MutexGuard<'_, State<K>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record_depth(&self, state: &State<K>) {
        metrics::QUEUE_DEPTH
            .with_label_values(&[&self.name])
            .set(state.queue.len() as f64);
    }

    /// Mark `item` as needing processing. Never blocks.
    pub fn add(&self, item: K) {
        let mut state = self.state();
        if state.shutting_down {
            return;
        }
        metrics::QUEUE_ADDS.with_label_values(&[&self.name]).inc();
        if state.insert(item) {
            self.record_depth(&state);
            drop(state);
            self.notify.notify_one();
        }
    }

    /// Add `item` once `delay` has elapsed. A zero delay adds immediately.
    ///
    /// While the key is waiting, a later call keeps whichever ready time is
    /// earlier.
    pub fn add_after(&self, item: K, delay: Duration) {
        if delay.is_zero() {
            self.add(item);
            return;
        }

        let mut state = self.state();
        if state.shutting_down {
            return;
        }
        state.schedule(item, Instant::now() + delay);
        drop(state);
        // A sleeping worker may need to shorten its deadline.
        self.notify.notify_one();
    }

    /// Add `item` after the delay the rate limiter assigns to it.
    pub fn add_rate_limited(&self, item: K) {
        let delay = self.rate_limiter.when(&item);
        metrics::QUEUE_RETRIES.with_label_values(&[&self.name]).inc();
        trace!(queue = %self.name, delay_ms = delay.as_millis() as u64, "Scheduling rate limited requeue");
        self.add_after(item, delay);
    }

    /// Clear the rate limiter's failure history for `item`.
    pub fn forget(&self, item: &K) {
        self.rate_limiter.forget(item);
    }

    /// Failures recorded for `item` since it was last forgotten.
    pub fn num_requeues(&self, item: &K) -> u32 {
        self.rate_limiter.num_requeues(item)
    }

    /// Claim the next ready key, waiting until one is available.
    ///
    /// Returns `None` once the queue is shut down and drained.
    pub async fn get(&self) -> Option<K> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register before inspecting state so a concurrent add or
            // shutdown cannot slip between the check and the wait.
            notified.as_mut().enable();

            let deadline = {
                let mut state = self.state();
                state.promote_ready(Instant::now());

                if let Some(item) = state.queue.pop_front() {
                    state.dirty.remove(&item);
                    state.processing.insert(item.clone());
                    self.record_depth(&state);
                    let more = !state.queue.is_empty();
                    drop(state);
                    if more {
                        self.notify.notify_one();
                    }
                    return Some(item);
                }

                if state.shutting_down {
                    return None;
                }
                state.next_ready_at()
            };

            match deadline {
                Some(deadline) => {
                    tokio::select! {
                        _ = &mut notified => {}
                        _ = tokio::time::sleep_until(deadline) => {}
                    }
                }
                None => notified.await,
            }
        }
    }

    /// Release the claim on `item`. If it was re-added while in flight it
    /// becomes ready again.
    pub fn done(&self, item: &K) {
        let mut state = self.state();
        state.processing.remove(item);
        if state.dirty.contains(item) {
            state.queue.push_back(item.clone());
            self.record_depth(&state);
            drop(state);
            self.notify.notify_one();
        }
    }

    /// Stop accepting keys and wake every waiting `get`.
    ///
    /// Delayed keys that are not yet ready are dropped.
    pub fn shut_down(&self) {
        let mut state = self.state();
        state.shutting_down = true;
        state.waiting.clear();
        state.heap.clear();
        drop(state);
        self.notify.notify_waiters();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.state().shutting_down
    }

    /// Number of keys ready to be handed out
    pub fn len(&self) -> usize {
        self.state().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

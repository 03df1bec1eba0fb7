//! Integration tests for the reconciliation engine
//!
//! These tests drive the controller against an in-memory cache and a
//! recording sync handler.

mod common;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use helmchart_controller::cache::{Lister, MemoryStore};
use helmchart_controller::controllers::{Controller, Disposition, SyncHandler};
use helmchart_controller::queue::WorkQueue;
use helmchart_controller::{Error, Result};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use common::{synced_store, test_queue, widget, Widget};

// ============================================================================
// Test Helpers
// ============================================================================

/// Records every object it is handed. Fails or panics on the first
/// `fail_times` / `panic_times` calls.
#[derive(Default)]
struct RecordingHandler {
    seen: Mutex<Vec<(String, i32)>>,
    fail_times: AtomicU32,
    panic_times: AtomicU32,
}

impl RecordingHandler {
    fn failing(times: u32) -> Self {
        let handler = Self::default();
        handler.fail_times.store(times, Ordering::SeqCst);
        handler
    }

    fn panicking(times: u32) -> Self {
        let handler = Self::default();
        handler.panic_times.store(times, Ordering::SeqCst);
        handler
    }

    fn calls(&self) -> usize {
        self.seen.lock().unwrap().len()
    }
}

fn take_one(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[async_trait]
impl SyncHandler<Widget> for RecordingHandler {
    async fn sync(&self, obj: Arc<Widget>) -> Result<()> {
        self.seen
            .lock()
            .unwrap()
            .push((obj.name.clone().unwrap_or_default(), obj.spec.replicas));
        if take_one(&self.panic_times) {
            panic!("handler blew up");
        }
        if take_one(&self.fail_times) {
            return Err(Error::sync("transient failure"));
        }
        Ok(())
    }
}

/// Lister whose every lookup fails.
struct BrokenLister;

impl Lister<Widget> for BrokenLister {
    fn get(&self, _namespace: Option<&str>, _name: &str) -> Result<Option<Arc<Widget>>> {
        Err(Error::cache("index unavailable"))
    }

    fn has_synced(&self) -> bool {
        true
    }
}

type TestController<L> = Controller<Widget, L, RecordingHandler>;

fn controller<L>(
    lister: Arc<L>,
    handler: RecordingHandler,
) -> (Arc<TestController<L>>, Arc<RecordingHandler>, Arc<WorkQueue<String>>)
where
    L: Lister<Widget> + 'static,
{
    let queue = test_queue(Duration::from_secs(1));
    let handler = Arc::new(handler);
    let controller = Arc::new(Controller::new(
        "Widget",
        queue.clone(),
        lister,
        handler.clone(),
    ));
    (controller, handler, queue)
}

// ============================================================================
// Single item processing
// ============================================================================

#[tokio::test]
async fn existing_object_is_synced_once_and_forgotten() {
    let store = synced_store(vec![widget("ns1", "foo", 3)]);
    let (controller, handler, queue) = controller(store, RecordingHandler::default());

    queue.add("ns1/foo".to_string());

    assert_eq!(
        controller.process_next_work_item().await,
        Some(Disposition::Forgotten)
    );
    assert_eq!(
        *handler.seen.lock().unwrap(),
        vec![("foo".to_string(), 3)]
    );
    assert_eq!(queue.num_requeues(&"ns1/foo".to_string()), 0);
    assert!(queue.is_empty());
}

#[tokio::test]
async fn deleted_object_is_forgotten_without_calling_handler() {
    let store = synced_store(vec![widget("ns1", "foo", 3)]);
    let (controller, handler, queue) = controller(store, RecordingHandler::default());

    queue.add("ns1/bar".to_string());

    assert_eq!(
        controller.process_next_work_item().await,
        Some(Disposition::Forgotten)
    );
    assert_eq!(handler.calls(), 0);
    assert!(queue.is_empty());
}

#[tokio::test]
async fn malformed_key_is_dropped() {
    let store = synced_store(vec![widget("ns1", "foo", 3)]);
    let (controller, handler, queue) = controller(store, RecordingHandler::default());

    queue.add("a/b/c".to_string());

    assert_eq!(
        controller.process_next_work_item().await,
        Some(Disposition::Forgotten)
    );
    assert_eq!(handler.calls(), 0);
    assert_eq!(queue.num_requeues(&"a/b/c".to_string()), 0);
    assert!(queue.is_empty());
}

#[tokio::test]
async fn cluster_scoped_key_resolves_without_namespace() {
    let mut obj = widget("ignored", "global", 1);
    obj.namespace = None;
    let store = synced_store(vec![obj]);
    let (controller, handler, queue) = controller(store, RecordingHandler::default());

    queue.add("global".to_string());

    assert_eq!(
        controller.process_next_work_item().await,
        Some(Disposition::Forgotten)
    );
    assert_eq!(handler.calls(), 1);
}

// ============================================================================
// Failure handling
// ============================================================================

#[tokio::test(start_paused = true)]
async fn transient_failures_are_retried_with_growing_backoff() {
    let store = synced_store(vec![widget("ns1", "foo", 3)]);
    let (controller, handler, queue) = controller(store, RecordingHandler::failing(2));
    let key = "ns1/foo".to_string();

    queue.add(key.clone());
    let start = Instant::now();

    assert_eq!(
        controller.process_next_work_item().await,
        Some(Disposition::Requeued)
    );
    assert_eq!(queue.num_requeues(&key), 1);

    assert_eq!(
        controller.process_next_work_item().await,
        Some(Disposition::Requeued)
    );
    assert_eq!(start.elapsed(), Duration::from_millis(5));
    assert_eq!(queue.num_requeues(&key), 2);

    assert_eq!(
        controller.process_next_work_item().await,
        Some(Disposition::Forgotten)
    );
    assert_eq!(start.elapsed(), Duration::from_millis(15));
    assert_eq!(queue.num_requeues(&key), 0);
    assert_eq!(handler.calls(), 3);
}

#[tokio::test]
async fn lookup_error_is_retried() {
    let (controller, handler, queue) =
        controller(Arc::new(BrokenLister), RecordingHandler::default());

    queue.add("ns1/foo".to_string());

    assert_eq!(
        controller.process_next_work_item().await,
        Some(Disposition::Requeued)
    );
    assert_eq!(handler.calls(), 0);
    assert_eq!(queue.num_requeues(&"ns1/foo".to_string()), 1);
}

#[tokio::test(start_paused = true)]
async fn handler_panic_is_contained_and_retried() {
    let store = synced_store(vec![widget("ns1", "foo", 3), widget("ns1", "bar", 1)]);
    let (controller, handler, queue) = controller(store, RecordingHandler::panicking(1));

    queue.add("ns1/foo".to_string());
    queue.add("ns1/bar".to_string());

    assert_eq!(
        controller.process_next_work_item().await,
        Some(Disposition::Requeued)
    );
    // The same worker keeps going.
    assert_eq!(
        controller.process_next_work_item().await,
        Some(Disposition::Forgotten)
    );
    assert_eq!(
        controller.process_next_work_item().await,
        Some(Disposition::Forgotten)
    );

    let seen = handler.seen.lock().unwrap().clone();
    assert_eq!(
        seen,
        vec![
            ("foo".to_string(), 3),
            ("bar".to_string(), 1),
            ("foo".to_string(), 3),
        ]
    );
    assert!(queue.is_empty());
}

// ============================================================================
// Run loop
// ============================================================================

#[tokio::test(start_paused = true)]
async fn workers_wait_for_cache_sync() {
    let store: Arc<MemoryStore<Widget>> = Arc::new(MemoryStore::new());
    store.upsert(widget("ns1", "foo", 3)).unwrap();
    let (controller, handler, queue) = controller(store, RecordingHandler::default());
    queue.add("ns1/foo".to_string());

    let shutdown = CancellationToken::new();
    let run = tokio::spawn(controller.clone().run(2, shutdown.clone()));

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(handler.calls(), 0);

    shutdown.cancel();
    let result = run.await.unwrap();
    assert!(matches!(result, Err(Error::CacheSync(_))));
    assert_eq!(handler.calls(), 0);
    assert!(queue.is_shutting_down());
}

#[tokio::test(start_paused = true)]
async fn workers_start_once_cache_syncs() {
    let store: Arc<MemoryStore<Widget>> = Arc::new(MemoryStore::new());
    store.upsert(widget("ns1", "foo", 3)).unwrap();
    let (controller, handler, queue) = controller(store.clone(), RecordingHandler::default());
    queue.add("ns1/foo".to_string());

    let shutdown = CancellationToken::new();
    let run = tokio::spawn(controller.clone().run(2, shutdown.clone()));

    tokio::time::sleep(Duration::from_millis(250)).await;
    assert_eq!(handler.calls(), 0);

    store.mark_synced();
    tokio::time::sleep(Duration::from_millis(250)).await;
    assert_eq!(handler.calls(), 1);

    shutdown.cancel();
    run.await.unwrap().unwrap();
}

#[tokio::test]
async fn zero_workers_is_rejected() {
    let store = synced_store(vec![]);
    let (controller, _handler, queue) = controller(store, RecordingHandler::default());

    let result = controller.run(0, CancellationToken::new()).await;

    assert!(matches!(result, Err(Error::Config(_))));
    assert!(queue.is_shutting_down());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn worker_pool_drains_queue_and_stops_on_shutdown() {
    let names: Vec<String> = (0..20).map(|i| format!("w{}", i)).collect();
    let store = synced_store(names.iter().map(|n| widget("ns1", n, 1)).collect());
    let (controller, handler, queue) = controller(store, RecordingHandler::default());
    for name in &names {
        queue.add(format!("ns1/{}", name));
    }

    let shutdown = CancellationToken::new();
    let run = tokio::spawn(controller.clone().run(4, shutdown.clone()));

    for _ in 0..100 {
        if handler.calls() == names.len() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert_eq!(handler.calls(), names.len());

    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(5), run)
        .await
        .expect("controller did not stop after shutdown")
        .unwrap()
        .unwrap();
    assert!(queue.is_empty());
}

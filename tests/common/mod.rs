//! Shared fixtures for integration tests

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use helmchart_controller::cache::MemoryStore;
use helmchart_controller::controllers::status::StatusWriter;
use helmchart_controller::queue::{ItemExponentialFailureRateLimiter, WorkQueue};
use helmchart_controller::resource::ManagedResource;
use helmchart_controller::{Error, Result};
use kube::core::ErrorResponse;

// ============================================================================
// Test resource
// ============================================================================

#[derive(Clone, Debug, PartialEq)]
pub struct WidgetSpec {
    pub replicas: i32,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct WidgetStatus {
    pub ready_replicas: i32,
    pub phase: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Widget {
    pub namespace: Option<String>,
    pub name: Option<String>,
    pub resource_version: u64,
    pub labels: BTreeMap<String, String>,
    pub spec: WidgetSpec,
    pub status: Option<WidgetStatus>,
}

impl ManagedResource for Widget {
    type Spec = WidgetSpec;
    type Status = WidgetStatus;

    fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    fn spec(&self) -> &WidgetSpec {
        &self.spec
    }

    fn status(&self) -> Option<&WidgetStatus> {
        self.status.as_ref()
    }

    fn set_status(&mut self, status: WidgetStatus) {
        self.status = Some(status);
    }
}

pub fn widget(namespace: &str, name: &str, replicas: i32) -> Widget {
    Widget {
        namespace: Some(namespace.to_string()),
        name: Some(name.to_string()),
        resource_version: 1,
        labels: BTreeMap::new(),
        spec: WidgetSpec { replicas },
        status: None,
    }
}

pub fn synced_store(objects: Vec<Widget>) -> Arc<MemoryStore<Widget>> {
    let store = Arc::new(MemoryStore::new());
    for obj in objects {
        store.upsert(obj).unwrap();
    }
    store.mark_synced();
    store
}

/// Queue with plain exponential backoff (5ms base) and no overall bucket
pub fn test_queue(max_delay: Duration) -> Arc<WorkQueue<String>> {
    Arc::new(WorkQueue::new(
        "test",
        ItemExponentialFailureRateLimiter::new(Duration::from_millis(5), max_delay),
    ))
}

// ============================================================================
// Fake status writer
// ============================================================================

/// In-memory stand-in for the API server's status subresource.
///
/// Rejects the first `forced_conflicts` writes outright. When a server-side
/// object is present, also rejects writes whose resource version is stale,
/// like the real API server does.
pub struct FakeStatusWriter {
    forced_conflicts: AtomicU32,
    pub attempts: AtomicU32,
    pub server: Mutex<Option<Widget>>,
    pub fail_with_io: bool,
    pub fail_with_not_found: bool,
}

impl FakeStatusWriter {
    pub fn new() -> Self {
        Self {
            forced_conflicts: AtomicU32::new(0),
            attempts: AtomicU32::new(0),
            server: Mutex::new(None),
            fail_with_io: false,
            fail_with_not_found: false,
        }
    }

    pub fn with_conflicts(conflicts: u32) -> Self {
        let writer = Self::new();
        writer.forced_conflicts.store(conflicts, Ordering::SeqCst);
        writer
    }

    pub fn with_server(obj: Widget) -> Self {
        let writer = Self::new();
        *writer.server.lock().unwrap() = Some(obj);
        writer
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn persisted(&self) -> Option<Widget> {
        self.server.lock().unwrap().clone()
    }
}

#[async_trait]
impl StatusWriter<Widget> for FakeStatusWriter {
    async fn write_status(&self, obj: &Widget) -> Result<Widget> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        if self.fail_with_io {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "connection reset",
            )));
        }

        if self.fail_with_not_found {
            return Err(Error::Kube(kube::Error::Api(ErrorResponse {
                status: "Failure".to_string(),
                message: "helmcharts \"foo\" not found".to_string(),
                reason: "NotFound".to_string(),
                code: 404,
            })));
        }

        let forced = self
            .forced_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if forced {
            return Err(Error::conflict("object has been modified"));
        }

        let mut server = self.server.lock().unwrap();
        if let Some(current) = server.as_ref() {
            if current.resource_version != obj.resource_version {
                return Err(Error::conflict(format!(
                    "stale resource version {} (current {})",
                    obj.resource_version, current.resource_version
                )));
            }
        }

        let mut stored = obj.clone();
        stored.resource_version = obj.resource_version + 1;
        *server = Some(stored.clone());
        Ok(stored)
    }
}

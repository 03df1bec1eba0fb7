//! Reconciliation engine and the HelmChart controller built on it
//!
//! This module contains the generic worker pool, the status persister, and
//! the controller wiring for HelmChart resources.

mod controller;
mod helm_chart_controller;
pub mod status;

pub use controller::{Controller, Disposition, SyncHandler};
pub use helm_chart_controller::run as run_helm_chart_controller;

use kube::Client;
use tokio_util::sync::CancellationToken;

use crate::config::ControllerConfig;

/// Shared context for all controllers
pub struct Context {
    /// Kubernetes client
    pub client: Client,
    /// Controller configuration
    pub config: ControllerConfig,
    /// Process-wide shutdown signal
    pub shutdown: CancellationToken,
}

impl Context {
    /// Create a new context
    pub fn new(client: Client, config: ControllerConfig, shutdown: CancellationToken) -> Self {
        Self {
            client,
            config,
            shutdown,
        }
    }
}

//! Prometheus metrics for the HelmChart controller
//!
//! This module exposes metrics for monitoring controller health, queue
//! behaviour and reconciliation outcomes.

mod prometheus;

pub use prometheus::*;

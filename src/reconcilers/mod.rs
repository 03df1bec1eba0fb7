//! Sync handlers for HelmChart resources
//!
//! This module contains the business logic run for each resolved object.
//! Sync handlers are responsible for:
//! - Validating CRD specs
//! - Deriving the observed state
//! - Updating resource status

pub mod helm_chart;

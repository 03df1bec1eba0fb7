//! HelmChart reconciliation controller
//!
//! A level-triggered controller: watch notifications become keys on a
//! deduplicating, rate-limited work queue, a pool of workers resolves each
//! key against a local read cache and runs a pluggable sync handler, and
//! status is written back with optimistic concurrency.

pub mod adapters;
pub mod cache;
pub mod config;
pub mod controllers;
pub mod crd;
pub mod error;
pub mod informer;
pub mod metrics;
pub mod queue;
pub mod reconcilers;
pub mod resource;

pub use error::{Error, Result};

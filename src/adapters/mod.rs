//! Adapters binding the generic controller to the Kubernetes API
//!
//! This module provides:
//! - A watch-driven informer and reflector-backed lister (the local read cache)
//! - A status writer using the status subresource

mod kube_status;
mod reflector;

pub use kube_status::KubeStatusWriter;
pub use reflector::{Informer, ReflectorLister};

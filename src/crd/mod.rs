//! Custom Resource Definitions for the HelmChart controller

mod helm_chart;

pub use helm_chart::*;

use kube::CustomResourceExt;

/// Generate all CRD YAML manifests
pub fn generate_crds() -> Result<Vec<String>, serde_yaml::Error> {
    Ok(vec![serde_yaml::to_string(&HelmChart::crd())?])
}

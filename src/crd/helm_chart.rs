//! HelmChart Custom Resource Definition

use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::resource::ManagedResource;

/// HelmChart resource specification
#[derive(CustomResource, Clone, Debug, PartialEq, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "apps.clusternet.io",
    version = "v1alpha1",
    kind = "HelmChart",
    plural = "helmcharts",
    singular = "helmchart",
    shortname = "chart",
    namespaced,
    status = "HelmChartStatus",
    printcolumn = r#"{"name": "Chart", "type": "string", "jsonPath": ".spec.chart"}"#,
    printcolumn = r#"{"name": "Version", "type": "string", "jsonPath": ".spec.version"}"#,
    printcolumn = r#"{"name": "Repo", "type": "string", "jsonPath": ".spec.repo"}"#,
    printcolumn = r#"{"name": "Status", "type": "string", "jsonPath": ".status.phase"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct HelmChartSpec {
    /// Chart repository URL (http, https or oci)
    pub repo: String,

    /// Chart name within the repository
    pub chart: String,

    /// Chart version; the latest version is used when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Namespace the chart is installed into
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_namespace: Option<String>,

    /// Secret holding credentials for a private repository
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chart_pull_secret: Option<ChartPullSecretRef>,
}

/// Reference to a repository credentials secret
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ChartPullSecretRef {
    /// Secret name
    pub name: String,

    /// Secret namespace, defaults to the HelmChart's namespace
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

/// Whether the referenced chart could be resolved
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub enum HelmChartPhase {
    Found,
    NotFound,
}

impl std::fmt::Display for HelmChartPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HelmChartPhase::Found => write!(f, "Found"),
            HelmChartPhase::NotFound => write!(f, "NotFound"),
        }
    }
}

/// HelmChart status
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HelmChartStatus {
    /// Current phase (Found, NotFound)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<HelmChartPhase>,

    /// Human-readable reason for the phase
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// Observed generation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// When the phase last changed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<DateTime<Utc>>,
}

impl HelmChartStatus {
    /// Whether two statuses describe the same observation, ignoring timestamps
    pub fn same_observation(&self, other: &HelmChartStatus) -> bool {
        self.phase == other.phase
            && self.reason == other.reason
            && self.observed_generation == other.observed_generation
    }
}

impl ManagedResource for HelmChart {
    type Spec = HelmChartSpec;
    type Status = HelmChartStatus;

    fn namespace(&self) -> Option<&str> {
        self.metadata.namespace.as_deref()
    }

    fn name(&self) -> Option<&str> {
        self.metadata.name.as_deref()
    }

    fn spec(&self) -> &HelmChartSpec {
        &self.spec
    }

    fn status(&self) -> Option<&HelmChartStatus> {
        self.status.as_ref()
    }

    fn set_status(&mut self, status: HelmChartStatus) {
        self.status = Some(status);
    }
}

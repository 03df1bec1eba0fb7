//! HelmChart sync handler
//!
//! Handles the business logic for a single HelmChart:
//! - Spec validation
//! - Deriving the observed phase
//! - Status write-back (skipped when nothing changed)

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info, warn};
use url::Url;

use crate::cache::Lister;
use crate::controllers::status::{StatusPersister, StatusWriter};
use crate::controllers::SyncHandler;
use crate::crd::{HelmChart, HelmChartPhase, HelmChartStatus};
use crate::error::{Error, Result};

/// Validate the HelmChart spec
pub fn validate(chart: &HelmChart) -> Result<()> {
    validate_repo(&chart.spec.repo)?;

    let name = chart.spec.chart.trim();
    if name.is_empty() {
        return Err(Error::validation("Chart name must be specified"));
    }
    if name.contains('/') {
        return Err(Error::validation(format!(
            "Invalid chart name '{}': must not contain '/'",
            name
        )));
    }

    if let Some(version) = &chart.spec.version {
        if version.trim().is_empty() {
            return Err(Error::validation("Chart version must not be empty when set"));
        }
    }

    if let Some(secret) = &chart.spec.chart_pull_secret {
        if secret.name.trim().is_empty() {
            return Err(Error::validation("Chart pull secret name must not be empty"));
        }
    }

    Ok(())
}

/// Validate the chart repository URL
fn validate_repo(repo: &str) -> Result<()> {
    if repo.trim().is_empty() {
        return Err(Error::validation("Chart repository must be specified"));
    }

    let url = Url::parse(repo)
        .map_err(|e| Error::validation(format!("Invalid chart repository '{}': {}", repo, e)))?;
    match url.scheme() {
        "http" | "https" | "oci" => {}
        other => {
            return Err(Error::validation(format!(
                "Invalid chart repository scheme '{}': must be one of: http, https, oci",
                other
            )));
        }
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(Error::validation(format!(
            "Invalid chart repository '{}': missing host",
            repo
        )));
    }
    Ok(())
}

/// Status the chart should carry after this sync
pub fn desired_status(chart: &HelmChart) -> HelmChartStatus {
    let (phase, reason) = match validate(chart) {
        Ok(()) => (HelmChartPhase::Found, None),
        Err(e) => (HelmChartPhase::NotFound, Some(e.to_string())),
    };

    let previous = chart.status.as_ref();
    let last_transition_time = match previous {
        Some(status) if status.phase == Some(phase) => status.last_transition_time,
        _ => Some(Utc::now()),
    };

    HelmChartStatus {
        phase: Some(phase),
        reason,
        observed_generation: chart.metadata.generation,
        last_transition_time,
    }
}

/// Validates HelmCharts and records the result in their status.
pub struct HelmChartSyncer<W, L> {
    persister: StatusPersister<HelmChart, W, L>,
}

impl<W, L> HelmChartSyncer<W, L>
where
    W: StatusWriter<HelmChart>,
    L: Lister<HelmChart>,
{
    pub fn new(persister: StatusPersister<HelmChart, W, L>) -> Self {
        Self { persister }
    }

    pub fn persister(&self) -> &StatusPersister<HelmChart, W, L> {
        &self.persister
    }
}

#[async_trait]
impl<W, L> SyncHandler<HelmChart> for HelmChartSyncer<W, L>
where
    W: StatusWriter<HelmChart>,
    L: Lister<HelmChart>,
{
    async fn sync(&self, chart: Arc<HelmChart>) -> Result<()> {
        let name = chart.metadata.name.as_deref().unwrap_or_default();
        let namespace = chart.metadata.namespace.as_deref().unwrap_or_default();
        let status = desired_status(&chart);

        if let Some(current) = &chart.status {
            if current.same_observation(&status) {
                debug!(namespace, name, "Status unchanged, skipping update");
                return Ok(());
            }
        }

        match status.phase {
            Some(HelmChartPhase::NotFound) => warn!(
                namespace,
                name,
                reason = status.reason.as_deref().unwrap_or_default(),
                "HelmChart is invalid"
            ),
            _ => info!(namespace, name, chart = %chart.spec.chart, "HelmChart found"),
        }

        self.persister.update_status(&chart, &status).await
    }
}

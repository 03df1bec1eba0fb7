//! HelmChart controller
//!
//! Watches HelmChart resources and reconciles them through the generic
//! worker pool.

use std::sync::Arc;

use kube::api::ListParams;
use kube::runtime::{watcher, WatchStreamExt};
use kube::Api;
use tracing::{error, info};

use super::controller::Controller;
use super::status::StatusPersister;
use super::Context;
use crate::adapters::{Informer, KubeStatusWriter};
use crate::crd::HelmChart;
use crate::error::Result;
use crate::queue::WorkQueue;
use crate::reconcilers::helm_chart::HelmChartSyncer;

/// Kind label used in logs and metrics
const KIND: &str = "HelmChart";

/// Queue name
const QUEUE_NAME: &str = "helmChart";

/// Run the HelmChart controller until `ctx.shutdown` fires
pub async fn run(ctx: Arc<Context>) -> Result<()> {
    let api: Api<HelmChart> = match &ctx.config.watch_namespace {
        Some(ns) => Api::namespaced(ctx.client.clone(), ns),
        None => Api::all(ctx.client.clone()),
    };

    // Verify CRD is installed
    if let Err(e) = api.list(&ListParams::default().limit(1)).await {
        error!("HelmChart CRD not installed: {}", e);
        return Err(e.into());
    }

    info!("Starting HelmChart controller");

    let queue = Arc::new(WorkQueue::new(QUEUE_NAME, ctx.config.rate_limiter()));
    let informer = Informer::<HelmChart>::new(KIND);
    let lister = Arc::new(informer.lister());

    let persister = StatusPersister::new(
        KIND,
        KubeStatusWriter::new(ctx.client.clone()),
        lister.clone(),
        ctx.config.status_retry(),
    );
    let syncer = Arc::new(HelmChartSyncer::new(persister));
    let controller = Arc::new(Controller::new(KIND, queue, lister, syncer));

    let events = watcher(api, watcher::Config::default()).default_backoff();
    let watch = tokio::spawn(informer.run(
        events,
        controller.event_handler(),
        ctx.shutdown.clone(),
    ));

    let result = controller.run(ctx.config.workers, ctx.shutdown.clone()).await;

    // Stop the watch even if the controller bailed out on its own.
    ctx.shutdown.cancel();
    if let Err(e) = watch.await {
        error!(error = %e, "Watch task failed");
    }

    result
}

//! HelmChart controller
//!
//! Main entry point. Sets up the Kubernetes client, starts the metrics
//! server and runs the HelmChart controller until SIGINT or SIGTERM.

use std::sync::Arc;

use clap::Parser;
use kube::Client;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use helmchart_controller::{
    config::ControllerConfig,
    controllers::{self, Context},
    metrics,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    info!("Starting HelmChart controller");

    let config = ControllerConfig::parse();
    config.validate()?;
    info!(
        workers = config.workers,
        namespace = config.watch_namespace.as_deref().unwrap_or("*"),
        "Loaded configuration"
    );

    let client = Client::try_default().await?;
    info!("Connected to Kubernetes API server");

    let shutdown = CancellationToken::new();
    let metrics_port = config.metrics_port;
    let context = Arc::new(Context::new(client, config, shutdown.clone()));

    let mut metrics_handle = tokio::spawn(metrics::serve(metrics_port));
    info!("Metrics server starting on port {}", metrics_port);

    let mut controller = tokio::spawn(controllers::run_helm_chart_controller(context));

    tokio::select! {
        result = &mut controller => {
            match result {
                Ok(Ok(())) => info!("HelmChart controller stopped"),
                Ok(Err(e)) => error!(error = %e, "HelmChart controller exited with error"),
                Err(e) => error!(error = %e, "HelmChart controller task failed"),
            }
            shutdown.cancel();
            return Ok(());
        }
        _ = &mut metrics_handle => {
            error!("Metrics server exited unexpectedly");
        }
        _ = shutdown_signal() => {
            info!("Received shutdown signal, stopping controller");
        }
    }

    // Let in-flight reconciliations finish.
    shutdown.cancel();
    match controller.await {
        Ok(Err(e)) => error!(error = %e, "HelmChart controller exited with error"),
        Err(e) => error!(error = %e, "HelmChart controller task failed"),
        Ok(Ok(())) => {}
    }

    info!("HelmChart controller stopped");
    Ok(())
}

/// Initialize tracing subscriber
fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,kube=warn,hyper=warn"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().json())
        .init();
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install CTRL+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received CTRL+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}

//! Prometheus metrics definitions and HTTP server

use std::net::SocketAddr;

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use prometheus::{
    register_counter_vec, register_gauge_vec, register_histogram_vec, CounterVec, Encoder,
    GaugeVec, HistogramVec, TextEncoder,
};
use tokio::net::TcpListener;
use tracing::{error, info};

lazy_static::lazy_static! {
    /// Total number of reconciliations
    pub static ref RECONCILIATIONS: CounterVec = register_counter_vec!(
        "helmchart_controller_reconciliations_total",
        "Total number of reconciliations",
        &["controller"]
    ).unwrap();

    /// Total number of reconciliation errors
    pub static ref RECONCILIATION_ERRORS: CounterVec = register_counter_vec!(
        "helmchart_controller_reconciliation_errors_total",
        "Total number of reconciliation errors",
        &["controller"]
    ).unwrap();

    /// Reconciliations that panicked
    pub static ref RECONCILIATION_PANICS: CounterVec = register_counter_vec!(
        "helmchart_controller_reconciliation_panics_total",
        "Total number of reconciliations that panicked",
        &["controller"]
    ).unwrap();

    /// Reconciliation duration histogram
    pub static ref RECONCILE_DURATION: HistogramVec = register_histogram_vec!(
        "helmchart_controller_reconcile_duration_seconds",
        "Duration of reconciliations in seconds",
        &["controller"],
        vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    ).unwrap();

    /// Keys ready to be handed out
    pub static ref QUEUE_DEPTH: GaugeVec = register_gauge_vec!(
        "helmchart_controller_workqueue_depth",
        "Current depth of the work queue",
        &["name"]
    ).unwrap();

    /// Total number of adds handled by the work queue
    pub static ref QUEUE_ADDS: CounterVec = register_counter_vec!(
        "helmchart_controller_workqueue_adds_total",
        "Total number of adds handled by the work queue",
        &["name"]
    ).unwrap();

    /// Total number of rate limited requeues
    pub static ref QUEUE_RETRIES: CounterVec = register_counter_vec!(
        "helmchart_controller_workqueue_retries_total",
        "Total number of rate limited requeues",
        &["name"]
    ).unwrap();

    /// Status writes rejected with a conflict
    pub static ref STATUS_UPDATE_CONFLICTS: CounterVec = register_counter_vec!(
        "helmchart_controller_status_update_conflicts_total",
        "Total number of status updates rejected with a conflict",
        &["kind"]
    ).unwrap();

    /// Watch notifications dropped as malformed
    pub static ref DROPPED_NOTIFICATIONS: CounterVec = register_counter_vec!(
        "helmchart_controller_dropped_notifications_total",
        "Total number of malformed watch notifications dropped",
        &["kind"]
    ).unwrap();

    /// Local cache synchronization (1 = synced, 0 = not yet)
    pub static ref CACHE_SYNCED: GaugeVec = register_gauge_vec!(
        "helmchart_controller_cache_synced",
        "Whether the local read cache has completed its initial sync",
        &["kind"]
    ).unwrap();

    /// Controller health (1 = healthy, 0 = unhealthy)
    pub static ref OPERATOR_HEALTH: prometheus::Gauge = prometheus::register_gauge!(
        "helmchart_controller_health",
        "Controller health status (1 = healthy, 0 = unhealthy)"
    ).unwrap();

    /// Readiness (1 = all caches synced and workers running)
    pub static ref OPERATOR_READY: prometheus::Gauge = prometheus::register_gauge!(
        "helmchart_controller_ready",
        "Controller readiness (1 = workers running, 0 = not ready)"
    ).unwrap();
}

/// Start the metrics HTTP server
pub async fn serve(port: u16) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    info!("Metrics server listening on {}", addr);

    OPERATOR_HEALTH.set(1.0);

    loop {
        let (stream, _) = listener.accept().await?;
        let io = TokioIo::new(stream);

        tokio::spawn(async move {
            if let Err(e) = http1::Builder::new()
                .serve_connection(io, service_fn(handle_request))
                .await
            {
                error!("Error serving connection: {}", e);
            }
        });
    }
}

/// Handle HTTP requests
async fn handle_request(
    req: Request<hyper::body::Incoming>,
) -> Result<Response<Full<Bytes>>, hyper::Error> {
    Ok(route(req.uri().path()))
}

fn route(path: &str) -> Response<Full<Bytes>> {
    match path {
        "/metrics" => metrics_response(),
        "/healthz" | "/health" => text_response(StatusCode::OK, "ok"),
        "/readyz" | "/ready" => ready_response(),
        _ => text_response(StatusCode::NOT_FOUND, "Not Found"),
    }
}

fn text_response(status: StatusCode, body: &'static str) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    response
}

/// Generate metrics response
fn metrics_response() -> Response<Full<Bytes>> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!("Failed to encode metrics: {}", e);
        return text_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to encode metrics");
    }

    let mut response = Response::new(Full::new(Bytes::from(buffer)));
    if let Ok(content_type) = HeaderValue::from_str(encoder.format_type()) {
        response.headers_mut().insert(CONTENT_TYPE, content_type);
    }
    response
}

/// Readiness check response, 503 until the workers are running
fn ready_response() -> Response<Full<Bytes>> {
    if OPERATOR_READY.get() < 1.0 {
        return text_response(StatusCode::SERVICE_UNAVAILABLE, "cache not synced");
    }
    text_response(StatusCode::OK, "ok")
}

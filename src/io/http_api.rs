//! HTTP API and Prometheus metrics endpoint
//!
//! Serves the request-side zone operations, the current membership and the
//! metrics in Prometheus text format. Uses hyper for the HTTP server.
//!
//! Routes:
//! - `GET /health`
//! - `GET /metrics`
//! - `GET /zones`
//! - `GET /membership`
//! - `GET /zones/{name}/devices`
//! - `GET /zone-locations`
//! - `POST /zones/{name}/localize` (`none` localizes globally)

use crate::domain::error::ZoneError;
use crate::infra::metrics::{Metrics, MetricsSummary, METRICS_BUCKET_BOUNDS, METRICS_NUM_BUCKETS};
use crate::services::zone_service::ZoneService;
use bytes::Bytes;
use http_body_util::Full;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::Serialize;
use std::convert::Infallible;
use std::fmt::Write;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Everything a request handler can reach
pub struct ApiState {
    pub service: Arc<ZoneService>,
    pub metrics: Arc<Metrics>,
    pub site_id: String,
    pub membership: watch::Receiver<Vec<String>>,
}

/// Prometheus metric type
enum MetricType {
    Counter,
    Gauge,
}

impl MetricType {
    fn as_str(&self) -> &'static str {
        match self {
            MetricType::Counter => "counter",
            MetricType::Gauge => "gauge",
        }
    }
}

/// Write a simple metric (counter or gauge) with site label
fn write_metric(output: &mut String, name: &str, help: &str, typ: MetricType, site: &str, val: u64) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} {}", typ.as_str());
    let _ = writeln!(output, "{name}{{site=\"{site}\"}} {val}");
}

/// Write a histogram metric with buckets, sum, and count
fn write_histogram(
    output: &mut String,
    name: &str,
    help: &str,
    site: &str,
    buckets: &[u64; METRICS_NUM_BUCKETS],
    avg: u64,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} histogram");

    let mut cumulative = 0u64;
    for (i, &bound) in METRICS_BUCKET_BOUNDS.iter().enumerate() {
        cumulative += buckets[i];
        let _ = writeln!(output, "{name}_bucket{{site=\"{site}\",le=\"{bound}\"}} {cumulative}");
    }
    cumulative += buckets[METRICS_NUM_BUCKETS - 1];
    let _ = writeln!(output, "{name}_bucket{{site=\"{site}\",le=\"+Inf\"}} {cumulative}");

    let count: u64 = buckets.iter().sum();
    let _ = writeln!(output, "{name}_sum{{site=\"{site}\"}} {}", avg * count);
    let _ = writeln!(output, "{name}_count{{site=\"{site}\"}} {count}");
}

/// Format metrics in Prometheus text exposition format
fn format_prometheus_metrics(summary: &MetricsSummary, current_zones: usize, site: &str) -> String {
    let mut output = String::with_capacity(4096);

    let counters: [(&str, &str, u64); 10] = [
        ("zone_observations_total", "Observations received", summary.observations_received),
        ("zone_observations_dropped_total", "Observations dropped (queue full)", summary.observations_dropped),
        (
            "zone_observations_rejected_total",
            "Observations that failed to parse or transform",
            summary.observations_rejected,
        ),
        ("zone_poses_total", "Poses processed by the transition engine", summary.poses_total),
        ("zone_enter_events_total", "ENTER events emitted", summary.enter_events_total),
        ("zone_exit_events_total", "EXIT events emitted", summary.exit_events_total),
        (
            "zone_correlation_failures_total",
            "Transitions emitted without locations after a correlation failure",
            summary.correlation_failures,
        ),
        ("zone_registry_failures_total", "Failed registry or localization calls", summary.registry_failures),
        ("zone_device_requests_total", "Device listing requests", summary.device_requests_total),
        ("zone_localization_requests_total", "Localization requests", summary.localization_requests_total),
    ];
    for (name, help, val) in counters {
        write_metric(&mut output, name, help, MetricType::Counter, site, val);
    }

    write_histogram(
        &mut output,
        "zone_pose_latency_us",
        "Pose processing latency in microseconds",
        site,
        &summary.lat_buckets,
        summary.avg_latency_us,
    );
    write_metric(
        &mut output,
        "zone_pose_latency_p99_us",
        "99th percentile pose processing latency",
        MetricType::Gauge,
        site,
        summary.lat_p99_us,
    );
    write_metric(
        &mut output,
        "zone_current_zones",
        "Zones the robot is currently in",
        MetricType::Gauge,
        site,
        current_zones as u64,
    );

    output
}

fn response(status: StatusCode, content_type: &'static str, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response.headers_mut().insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}

fn json_response<T: Serialize>(value: &T) -> Response<Full<Bytes>> {
    match serde_json::to_vec(value) {
        Ok(body) => response(StatusCode::OK, "application/json", body),
        Err(e) => {
            error!(error = %e, "http_encode_failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "encode_failed", "response encoding failed")
        }
    }
}

/// JSON error body: stable `kind` for clients, readable `error` for humans
fn error_response(status: StatusCode, kind: &str, message: &str) -> Response<Full<Bytes>> {
    let body = serde_json::json!({ "ok": false, "kind": kind, "error": message }).to_string();
    response(status, "application/json", body)
}

fn zone_error_response(e: &ZoneError) -> Response<Full<Bytes>> {
    let status = match e {
        ZoneError::NotFound(_) => StatusCode::NOT_FOUND,
        e if e.is_upstream() => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error_response(status, e.kind(), &e.to_string())
}

/// Split `/zones/{name}/{action}` into name and action
fn zone_route(path: &str) -> Option<(&str, &str)> {
    let rest = path.strip_prefix("/zones/")?;
    let (name, action) = rest.rsplit_once('/')?;
    if name.is_empty() {
        return None;
    }
    Some((name, action))
}

/// Dispatch a request by method and path
pub async fn route(method: &Method, path: &str, state: &ApiState) -> Response<Full<Bytes>> {
    match (method, path) {
        (&Method::GET, "/health") => response(StatusCode::OK, "text/plain", "ok"),
        (&Method::GET, "/metrics") => {
            let current = state.membership.borrow().len();
            let body = format_prometheus_metrics(&state.metrics.snapshot(), current, &state.site_id);
            response(StatusCode::OK, "text/plain; version=0.0.4; charset=utf-8", body)
        }
        (&Method::GET, "/zones") => json_response(&state.service.zones()),
        (&Method::GET, "/membership") => {
            let zones = state.membership.borrow().clone();
            json_response(&serde_json::json!({ "zones": zones }))
        }
        (&Method::GET, "/zone-locations") => match state.service.get_zone_locations().await {
            Ok(pairs) => json_response(&pairs),
            Err(e) => zone_error_response(&e),
        },
        _ => match (method, zone_route(path)) {
            (&Method::GET, Some((zone, "devices"))) => {
                match state.service.list_devices_in_zone(zone).await {
                    Ok(controls) => json_response(&controls),
                    Err(e) => zone_error_response(&e),
                }
            }
            (&Method::POST, Some((zone, "localize"))) => match state.service.localize_in_zone(zone).await {
                Ok(ack) => json_response(&serde_json::json!({ "ok": true, "ack": ack })),
                Err(e) => zone_error_response(&e),
            },
            _ => error_response(StatusCode::NOT_FOUND, "no_such_route", path),
        },
    }
}

async fn handle_request(
    req: Request<hyper::body::Incoming>,
    state: Arc<ApiState>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let response = route(req.method(), req.uri().path(), &state).await;
    debug!(method = %req.method(), path = %req.uri().path(), status = %response.status().as_u16(), "http_request");
    if response.status().is_server_error() {
        warn!(path = %req.uri().path(), status = %response.status().as_u16(), "http_request_failed");
    }
    Ok(response)
}

/// Start the HTTP API server
pub async fn start_http_server(
    port: u16,
    state: Arc<ApiState>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;

    info!(port = %port, site = %state.site_id, "http_api_started");

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let io = TokioIo::new(stream);
                        let state = state.clone();

                        tokio::spawn(async move {
                            let service = service_fn(move |req| handle_request(req, state.clone()));

                            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                                error!(error = %e, "http_connection_error");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "http_accept_error");
                    }
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("http_api_shutdown");
                    return Ok(());
                }
            }
        }
    }
}

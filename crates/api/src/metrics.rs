//! Prometheus metrics for the server.
//!
//! The engagement core records its own frame counters; this module adds the
//! transport-side ones and installs the exporter.

use std::time::Instant;

use axum::body::Body;
use axum::extract::{MatchedPath, State};
use axum::http::{header, Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

use crate::AppState;

/// Install the global Prometheus recorder
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    PrometheusBuilder::new().install_recorder()
}

/// Metric names as constants for consistency.
pub mod names {
    pub const HTTP_REQUESTS_TOTAL: &str = "interview_http_requests_total";
    pub const HTTP_REQUEST_DURATION_SECONDS: &str = "interview_http_request_duration_seconds";

    pub const WS_CONNECTIONS_TOTAL: &str = "interview_ws_connections_total";
    pub const WS_CONNECTIONS_ACTIVE: &str = "interview_ws_connections_active";
    pub const WS_MESSAGES_RECEIVED: &str = "interview_ws_messages_received_total";

    pub const LIVE_STREAMS_ACTIVE: &str = "interview_live_streams_active";
}

pub fn record_ws_connection(endpoint: &'static str) {
    counter!(names::WS_CONNECTIONS_TOTAL, "endpoint" => endpoint).increment(1);
}

pub fn set_ws_active_connections(count: usize) {
    gauge!(names::WS_CONNECTIONS_ACTIVE).set(count as f64);
}

pub fn record_ws_message_received(kind: &'static str) {
    counter!(names::WS_MESSAGES_RECEIVED, "type" => kind).increment(1);
}

pub fn set_live_stream_active(active: bool) {
    gauge!(names::LIVE_STREAMS_ACTIVE).set(if active { 1.0 } else { 0.0 });
}

/// Request counter and latency, labelled by route template
pub async fn metrics_middleware(request: Request<Body>, next: Next) -> Response {
    let method = request.method().to_string();
    let path = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());
    let start = Instant::now();

    let response = next.run(request).await;

    let labels = [
        ("method", method),
        ("path", path),
        ("status", response.status().as_u16().to_string()),
    ];
    counter!(names::HTTP_REQUESTS_TOTAL, &labels).increment(1);
    histogram!(names::HTTP_REQUEST_DURATION_SECONDS, &labels).record(start.elapsed().as_secs_f64());

    response
}

/// `GET /metrics`
pub async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => (StatusCode::NOT_FOUND, "metrics disabled").into_response(),
    }
}

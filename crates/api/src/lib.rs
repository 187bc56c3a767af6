//! Interview Vision API Server
//!
//! HTTP, WebSocket and MJPEG front for the engagement core. Each WebSocket
//! connection is one interview session with its own worker; the MJPEG
//! preview drives a single shared live session.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::State,
    http::{HeaderValue, Method},
    middleware,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use engagement::{
    CascadeBank, DetectorBank, EngagementError, EngagementPipeline, LiveSummary, SharedPipeline,
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tower_governor::GovernorLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub mod error;
pub mod metrics;
pub mod rate_limit;
pub mod routes;
pub mod settings;

pub use error::{ApiError, ApiResult};
pub use settings::Settings;

/// Running MJPEG preview
pub(crate) struct LiveHandle {
    pub stop: watch::Sender<bool>,
    pub task: JoinHandle<Result<LiveSummary, EngagementError>>,
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    /// Cascades loaded once, shared by every session
    pub detector: Arc<dyn DetectorBank + Sync>,
    /// Session analysed by the live preview
    pub live_pipeline: SharedPipeline,
    pub(crate) live: Arc<Mutex<Option<LiveHandle>>>,
    pub metrics: Option<PrometheusHandle>,
    pub sessions: Arc<AtomicUsize>,
    pub start_time: Instant,
}

impl AppState {
    /// Load the configured cascades and build the state
    pub fn new(settings: Settings, metrics: Option<PrometheusHandle>) -> Result<Self, EngagementError> {
        let detector = CascadeBank::new(&settings.engagement.detector)?;
        Self::with_detector(settings, Arc::new(detector), metrics)
    }

    /// Build the state around an already loaded detector bank
    pub fn with_detector(
        settings: Settings,
        detector: Arc<dyn DetectorBank + Sync>,
        metrics: Option<PrometheusHandle>,
    ) -> Result<Self, EngagementError> {
        let live = EngagementPipeline::with_detector(settings.engagement.clone(), Box::new(detector.clone()))?;
        Ok(Self {
            settings: Arc::new(settings),
            detector,
            live_pipeline: Arc::new(Mutex::new(live)),
            live: Arc::new(Mutex::new(None)),
            metrics,
            sessions: Arc::new(AtomicUsize::new(0)),
            start_time: Instant::now(),
        })
    }

    /// Fresh pipeline for one interview session
    pub fn new_pipeline(&self) -> Result<EngagementPipeline, EngagementError> {
        EngagementPipeline::with_detector(self.settings.engagement.clone(), Box::new(self.detector.clone()))
    }

    /// Stop the live preview, if one is running
    pub async fn stop_live(&self) -> Option<LiveSummary> {
        let handle = self.live.lock().await.take()?;
        let summary = Self::finish_live(handle).await;
        metrics::set_live_stream_active(false);
        summary
    }

    async fn finish_live(handle: LiveHandle) -> Option<LiveSummary> {
        // The task may already have ended on its own
        let _ = handle.stop.send(true);
        match handle.task.await {
            Ok(Ok(summary)) => Some(summary),
            Ok(Err(e)) => {
                warn!("Live stream ended with error: {}", e);
                None
            }
            Err(e) => {
                warn!("Live stream task failed: {}", e);
                None
            }
        }
    }

    /// Install a freshly started preview. A preview installed by an
    /// overlapping request in the meantime is stopped, never orphaned.
    pub(crate) async fn set_live(&self, handle: LiveHandle) {
        let previous = self.live.lock().await.replace(handle);
        metrics::set_live_stream_active(true);
        if let Some(previous) = previous {
            if let Some(summary) = Self::finish_live(previous).await {
                info!("Replaced overlapping live preview after {} frames", summary.frames_emitted);
            }
        }
    }

    pub async fn live_running(&self) -> bool {
        self.live
            .lock()
            .await
            .as_ref()
            .map(|h| !h.task.is_finished())
            .unwrap_or(false)
    }
}

/// Health response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub active_sessions: usize,
    pub camera: CameraStatus,
}

#[derive(Debug, Serialize)]
pub struct CameraStatus {
    pub configured: bool,
    pub streaming: bool,
}

/// Create the application router
pub fn create_router(state: AppState) -> Router {
    let mut http = Router::new()
        .route("/api/v1/health", get(health_handler))
        .route("/api/stop-camera", post(routes::camera::stop_camera))
        .route("/api/analytics", get(routes::camera::analytics))
        .route("/api/analytics/timeline", get(routes::camera::timeline))
        .route("/api/new-question", post(routes::camera::new_question))
        .route("/metrics", get(metrics::metrics_handler));

    if let Some(governor) = rate_limit::create_governor_config(&state.settings.rate_limit) {
        http = http.layer(GovernorLayer { config: governor });
    }

    let streaming = Router::new()
        .route("/ws/video", get(routes::session::ws_video))
        .route("/ws/metrics", get(routes::session::ws_metrics))
        .route("/api/stream", get(routes::camera::stream));

    Router::new()
        .merge(http)
        .merge(streaming)
        .route_layer(middleware::from_fn(metrics::metrics_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(&state.settings.server.cors_origin))
        .with_state(state)
}

fn cors_layer(origin: &str) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);
    match origin {
        "*" => cors.allow_origin(Any),
        origin => match origin.parse::<HeaderValue>() {
            Ok(value) => cors.allow_origin(value),
            Err(_) => {
                warn!("Invalid CORS origin {:?}, allowing any", origin);
                cors.allow_origin(Any)
            }
        },
    }
}

/// Health check handler
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let response = HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        active_sessions: state.sessions.load(Ordering::Relaxed),
        camera: CameraStatus {
            configured: state.settings.camera.device.is_some(),
            streaming: state.live_running().await,
        },
    };

    Json(response)
}

/// Initialize logging; `RUST_LOG` wins over the configured level
pub fn init_logging(settings: &settings::LoggingSettings) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&settings.level));

    let result = if settings.json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_target(true))
            .with(env_filter)
            .try_init()
    };
    if let Err(e) = result {
        eprintln!("Logging already initialised: {e}");
    }
}

/// Run the server until it stops
pub async fn run_server(state: AppState) -> Result<(), Box<dyn std::error::Error>> {
    let addr = state.settings.server.bind_addr();
    let app = create_router(state.clone());

    info!("Starting API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(summary) = state.stop_live().await {
        info!("Live preview stopped after {} frames", summary.frames_emitted);
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

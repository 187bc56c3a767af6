//! Live Preview Routes
//!
//! `/api/stream` replays the configured source as MJPEG while analysing it
//! into the shared live session. Only one preview runs at a time; opening a
//! new one stops the previous one first.

use std::convert::Infallible;
use std::time::Instant;

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::Json;
use camera_capture::{mjpeg_part, ImageSequenceSource, MJPEG_BOUNDARY};
use engagement::{run_live_stream, LiveFrame, QuestionMetrics, SessionAnalytics, TimelineSample};
use futures_util::stream;
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tracing::info;

use crate::error::{ApiError, ApiResult};
use crate::{AppState, LiveHandle};

/// Encoded frames buffered between the live loop and the HTTP body
const LIVE_BUFFER_FRAMES: usize = 4;

/// `GET /api/stream`
pub async fn stream(State(state): State<AppState>) -> ApiResult<Response> {
    let camera = state
        .settings
        .camera
        .camera_config()
        .ok_or_else(|| ApiError::CameraUnavailable("no camera source configured".to_string()))?;

    if let Some(previous) = state.stop_live().await {
        info!("Replaced live preview after {} frames", previous.frames_emitted);
    }

    let source = ImageSequenceSource::new(&camera);
    let (tx, mut rx) = mpsc::channel::<LiveFrame>(LIVE_BUFFER_FRAMES);
    let (stop_tx, stop_rx) = watch::channel(false);
    let pipeline = state.live_pipeline.clone();
    let task = tokio::spawn(async move { run_live_stream(source, pipeline, tx, stop_rx, &camera).await });

    // Nothing is committed to the client until the source produced a frame
    let Some(first) = rx.recv().await else {
        return Err(match task.await {
            Ok(Err(e)) => ApiError::from(e),
            Ok(Ok(_)) => ApiError::CameraUnavailable("source produced no frames".to_string()),
            Err(e) => ApiError::Internal(format!("live stream task failed: {}", e)),
        });
    };
    state.set_live(LiveHandle { stop: stop_tx, task }).await;

    let parts = stream::unfold((Some(first), rx), |(pending, mut rx)| async move {
        let frame = match pending {
            Some(frame) => frame,
            None => rx.recv().await?,
        };
        let part = Bytes::from(mjpeg_part(&frame.jpeg));
        Some((Ok::<_, Infallible>(part), (None, rx)))
    });

    Ok((
        [
            (
                header::CONTENT_TYPE,
                format!("multipart/x-mixed-replace; boundary={}", MJPEG_BOUNDARY),
            ),
            (header::CACHE_CONTROL, "no-cache".to_string()),
        ],
        Body::from_stream(parts),
    )
        .into_response())
}

#[derive(Debug, Serialize)]
pub struct StopResponse {
    pub stopped: bool,
    pub frames_emitted: u64,
    pub closed_segment: Option<QuestionMetrics>,
}

/// `POST /api/stop-camera`
pub async fn stop_camera(State(state): State<AppState>) -> Json<StopResponse> {
    let response = match state.stop_live().await {
        Some(summary) => StopResponse {
            stopped: true,
            frames_emitted: summary.frames_emitted,
            closed_segment: summary.closed_segment,
        },
        None => StopResponse {
            stopped: false,
            frames_emitted: 0,
            closed_segment: None,
        },
    };
    Json(response)
}

/// `GET /api/analytics`
pub async fn analytics(State(state): State<AppState>) -> Json<SessionAnalytics> {
    Json(state.live_pipeline.lock().await.session_analytics(Instant::now()))
}

#[derive(Debug, Serialize)]
pub struct TimelineResponse {
    pub vision_timeline: Vec<TimelineSample>,
    pub per_question_metrics: Vec<QuestionMetrics>,
}

/// `GET /api/analytics/timeline`
pub async fn timeline(State(state): State<AppState>) -> Json<TimelineResponse> {
    let analytics = state.live_pipeline.lock().await.session_analytics(Instant::now());
    Json(TimelineResponse {
        vision_timeline: analytics.metrics_timeline,
        per_question_metrics: analytics.per_question_metrics,
    })
}

#[derive(Debug, Serialize)]
pub struct NewQuestionResponse {
    pub question_index: u32,
    pub closed: Option<QuestionMetrics>,
}

/// `POST /api/new-question`: advance the live session to the next question
pub async fn new_question(State(state): State<AppState>) -> Json<NewQuestionResponse> {
    let mut pipeline = state.live_pipeline.lock().await;
    let closed = pipeline.new_question(Instant::now());
    Json(NewQuestionResponse {
        question_index: pipeline.session().question_index(),
        closed,
    })
}

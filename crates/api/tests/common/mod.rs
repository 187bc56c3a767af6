#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;

use api::rate_limit::RateLimitConfig;
use api::{create_router, AppState, Settings};
use axum::body::{to_bytes, Body};
use axum::http::{Method, Request, StatusCode};
use axum::response::Response;
use axum::Router;
use engagement::{DetectorBank, EngagementError, Observation, Rect};
use image::{GrayImage, Rgb, RgbImage};
use serde_json::Value;
use tower::util::ServiceExt;

/// Always sees an attentive, smiling candidate
pub struct AttentiveDetector;

impl DetectorBank for AttentiveDetector {
    fn detect(&self, _gray: &GrayImage) -> Result<Observation, EngagementError> {
        Ok(Observation::Frontal {
            face: Rect::new(4, 4, 24, 24),
            eyes: 2,
            smiling: true,
        })
    }
}

pub struct TestApp {
    pub app: Router,
    pub state: AppState,
}

pub fn spawn_test_app(camera_dir: Option<&Path>) -> TestApp {
    build_app(camera_dir, false)
}

/// Test app whose live source replays its frames forever
pub fn spawn_looping_app(camera_dir: &Path) -> TestApp {
    build_app(Some(camera_dir), true)
}

fn build_app(camera_dir: Option<&Path>, looping: bool) -> TestApp {
    let mut settings = Settings::default();
    settings.rate_limit = RateLimitConfig::disabled();
    settings.camera.device = camera_dir.map(|dir| dir.to_string_lossy().to_string());
    settings.camera.fps = 200;
    settings.camera.looping = looping;

    let state = AppState::with_detector(settings, Arc::new(AttentiveDetector), None).expect("test state");
    TestApp {
        app: create_router(state.clone()),
        state,
    }
}

/// Write `count` small PNG frames into `dir`
pub fn write_frames(dir: &Path, count: u32) {
    for i in 0..count {
        let image = RgbImage::from_pixel(32, 32, Rgb([60 + i as u8 * 10, 80, 100]));
        image.save(dir.join(format!("frame_{i:03}.png"))).expect("write frame");
    }
}

pub async fn request(app: &Router, method: Method, path: &str) -> Response {
    let request = Request::builder()
        .method(method)
        .uri(path)
        .body(Body::empty())
        .expect("request");
    app.clone().oneshot(request).await.expect("response")
}

pub async fn response_json(response: Response) -> (StatusCode, Value) {
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

//! Interview Engagement Estimation
//!
//! Real-time facial engagement analysis for mock interviews:
//! - Face, eye, smile and profile detection (Haar cascades)
//! - Motion stability via sparse optical flow
//! - Flicker-free focus, emotion, confidence and stress scores
//! - Per-question and whole-session aggregation

pub mod analysis;
pub mod cascade;
pub mod config;
pub mod contrast;
pub mod detector;
pub mod hint;
pub mod live;
pub mod motion;
pub mod pipeline;
pub mod session;
pub mod stabilizer;
pub mod state;
pub mod worker;

pub use analysis::FrameMetrics;
pub use config::EngagementConfig;
pub use detector::{CascadeBank, DetectorBank, Observation, Rect};
pub use hint::{Hint, HintScores};
pub use live::{run_live_stream, LiveFrame, LiveSummary, SharedPipeline};
pub use motion::MotionTracker;
pub use pipeline::EngagementPipeline;
pub use session::{QuestionMetrics, SessionAggregator, SessionAnalytics, TimelineSample};
pub use stabilizer::Stabilizer;
pub use state::EngagementState;
pub use worker::SessionWorker;

use camera_capture::{CameraError, CodecError};
use thiserror::Error;

/// Engagement error types
#[derive(Error, Debug)]
pub enum EngagementError {
    #[error("Model loading failed: {0}")]
    ModelLoad(String),

    #[error("Frame codec failed: {0}")]
    Codec(#[from] CodecError),

    #[error("Detection failed: {0}")]
    Detection(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Camera(#[from] CameraError),

    #[error("Session worker is closed")]
    WorkerClosed,
}

/// Metric names recorded by the pipeline
pub mod metric_names {
    pub const FRAMES_PROCESSED: &str = "engagement_frames_processed_total";
    pub const FRAMES_SKIPPED: &str = "engagement_frames_skipped_total";
    pub const FRAMES_DROPPED: &str = "engagement_frames_dropped_total";
    pub const ACTIVE_SESSIONS: &str = "engagement_active_sessions";
}

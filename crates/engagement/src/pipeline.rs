//! Per-session engagement pipeline
//!
//! decode -> detect -> track -> smooth -> aggregate
//!
//! Decoding and detection run before any state is touched, so a frame that
//! fails either step leaves the session exactly as it was.

use std::time::Instant;

use camera_capture::{decode_payload, VideoFrame};
use metrics::counter;
use tracing::{info, warn};

use crate::analysis::FrameMetrics;
use crate::config::EngagementConfig;
use crate::detector::{CascadeBank, DetectorBank};
use crate::metric_names;
use crate::motion::MotionTracker;
use crate::session::{QuestionMetrics, SessionAggregator, SessionAnalytics};
use crate::stabilizer::Stabilizer;
use crate::state::EngagementState;
use crate::EngagementError;

/// Engagement pipeline for one interview session
pub struct EngagementPipeline {
    config: EngagementConfig,
    detector: Box<dyn DetectorBank>,
    tracker: MotionTracker,
    stabilizer: Stabilizer,
    session: SessionAggregator,
}

impl EngagementPipeline {
    /// Create a pipeline backed by the configured cascade files
    pub fn new(config: EngagementConfig) -> Result<Self, EngagementError> {
        config.validate()?;
        let detector = CascadeBank::new(&config.detector)?;
        Self::with_detector(config, Box::new(detector))
    }

    /// Create a pipeline around any detector bank
    pub fn with_detector(config: EngagementConfig, detector: Box<dyn DetectorBank>) -> Result<Self, EngagementError> {
        config.validate()?;
        info!("Engagement session started");
        Ok(Self {
            tracker: MotionTracker::new(config.motion.clone()),
            stabilizer: Stabilizer::new(&config),
            session: SessionAggregator::new(config.session.clone(), Instant::now()),
            detector,
            config,
        })
    }

    pub fn config(&self) -> &EngagementConfig {
        &self.config
    }

    pub fn state(&self) -> &EngagementState {
        self.stabilizer.state()
    }

    pub fn session(&self) -> &SessionAggregator {
        &self.session
    }

    /// Metrics of the last processed frame
    pub fn latest_metrics(&self) -> &FrameMetrics {
        self.session.latest()
    }

    /// Decode and analyse a client frame payload
    pub fn analyze_payload(&mut self, payload: &str, now: Instant) -> Result<FrameMetrics, EngagementError> {
        let frame = decode_payload(payload)?;
        self.analyze_frame(&frame, now)
    }

    /// Analyse a decoded frame
    pub fn analyze_frame(&mut self, frame: &VideoFrame, now: Instant) -> Result<FrameMetrics, EngagementError> {
        let gray = frame.to_grayscale();
        let observation = self.detector.detect(&gray)?;

        let steady = self.tracker.update(&gray, observation.face_region());
        let metrics = self.stabilizer.update(&observation, gray.width(), steady, now);
        self.session.record(&metrics, now);

        counter!(metric_names::FRAMES_PROCESSED).increment(1);
        Ok(metrics)
    }

    /// Best-effort variant of [`analyze_payload`](Self::analyze_payload):
    /// failures are logged and the frame is skipped
    pub fn process_frame(&mut self, payload: &str, now: Instant) -> Option<FrameMetrics> {
        let result = self.analyze_payload(payload, now);
        Self::skip_on_error(result)
    }

    /// Best-effort variant of [`analyze_frame`](Self::analyze_frame)
    pub fn process_video_frame(&mut self, frame: &VideoFrame, now: Instant) -> Option<FrameMetrics> {
        let result = self.analyze_frame(frame, now);
        Self::skip_on_error(result)
    }

    fn skip_on_error(result: Result<FrameMetrics, EngagementError>) -> Option<FrameMetrics> {
        match result {
            Ok(metrics) => Some(metrics),
            Err(e) => {
                warn!("Skipping frame: {}", e);
                counter!(metric_names::FRAMES_SKIPPED).increment(1);
                None
            }
        }
    }

    /// Close the current question segment and start the next one
    pub fn new_question(&mut self, now: Instant) -> Option<QuestionMetrics> {
        let closed = self.session.new_question(now);
        info!("Question {} started", self.session.question_index());
        closed
    }

    /// Flush the open segment without advancing the question index
    pub fn close_segment(&mut self, now: Instant) -> Option<QuestionMetrics> {
        self.session.close_segment(now)
    }

    /// Close the open segment and report the whole session
    pub fn end_session(&mut self, now: Instant) -> SessionAnalytics {
        self.session.end_session(now)
    }

    /// Whole-session snapshot; the open segment stays open
    pub fn session_analytics(&self, now: Instant) -> SessionAnalytics {
        self.session.analytics(now)
    }

    /// Start over as if freshly constructed
    pub fn reset_session(&mut self, now: Instant) {
        self.stabilizer.reset();
        self.tracker.reset();
        self.session.reset(now);
        info!("Engagement session reset");
    }
}

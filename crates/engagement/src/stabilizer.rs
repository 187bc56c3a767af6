//! Signal smoother
//!
//! Turns one frame's observation plus the steadiness flag into the reported
//! scores. Targets come from the detections, the internal estimates follow
//! them asymmetrically (drops faster than rises), and the displayed values
//! only move past the hysteresis band. Attentiveness is the exception: it
//! tracks how well the face is centred with a plain exponential blend.

use std::time::Instant;

use tracing::debug;

use crate::analysis::FrameMetrics;
use crate::config::{EngagementConfig, SmoothingRates, TargetConfig};
use crate::detector::{Observation, Rect};
use crate::hint::{Hint, HintScores};
use crate::state::EngagementState;

/// Raw per-frame targets before smoothing
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Targets {
    pub focus: f32,
    pub emotion: f32,
    /// Only a frontal face says anything about framing
    pub attentiveness: Option<f32>,
}

/// 100 with the face centre on the frame's vertical midline, falling
/// linearly to 0 at either edge
pub fn attentiveness_target(face: Rect, frame_width: u32) -> Option<f32> {
    if frame_width == 0 {
        return None;
    }
    let mid = frame_width as f32 / 2.0;
    let (cx, _) = face.center();
    let offset = (cx - mid).abs() / mid;
    Some((100.0 - offset * 100.0).max(0.0))
}

impl Targets {
    /// Map an observation and the windowed eye mean to targets
    pub fn from_observation(
        observation: &Observation,
        mean_eyes: f32,
        frame_width: u32,
        config: &TargetConfig,
    ) -> Self {
        match observation {
            Observation::Frontal { face, smiling, .. } => {
                let focus = if mean_eyes >= 1.5 {
                    config.both_eyes_focus
                } else if mean_eyes >= 0.75 {
                    config.one_eye_focus
                } else if mean_eyes > 0.0 {
                    // Some recent frames had eyes: a blink, not closure
                    config.blinking_focus
                } else {
                    config.eyes_closed_focus
                };
                let emotion = if *smiling {
                    config.smile_emotion
                } else {
                    config.neutral_emotion
                };
                Self {
                    focus,
                    emotion,
                    attentiveness: attentiveness_target(*face, frame_width),
                }
            }
            Observation::Profile { .. } => Self {
                focus: config.profile_focus,
                emotion: config.profile_emotion,
                attentiveness: None,
            },
            Observation::Absent => Self {
                focus: config.absent_focus,
                emotion: config.absent_emotion,
                attentiveness: None,
            },
        }
    }
}

/// Per-session smoother
pub struct Stabilizer {
    config: EngagementConfig,
    state: EngagementState,
}

impl Stabilizer {
    pub fn new(config: &EngagementConfig) -> Self {
        Self {
            state: EngagementState::new(config),
            config: config.clone(),
        }
    }

    pub fn state(&self) -> &EngagementState {
        &self.state
    }

    /// Fold one frame of `frame_width` pixels into the state and report the
    /// resulting metrics
    pub fn update(&mut self, observation: &Observation, frame_width: u32, steady: bool, now: Instant) -> FrameMetrics {
        let smoothing = &self.config.smoothing;
        let state = &mut self.state;

        state.eyes_history.push(observation.eye_count());
        let targets = Targets::from_observation(observation, state.mean_eyes(), frame_width, &self.config.targets);

        let focus = state.focus.update(targets.focus, smoothing.focus, steady, smoothing);
        let emotion = state.emotion.update(targets.emotion, smoothing.emotion, steady, smoothing);
        if let Some(target) = targets.attentiveness {
            let rate = smoothing.attentiveness_rate;
            let rates = SmoothingRates { drop: rate, rise: rate };
            state.attentiveness.update(target, rates, false, smoothing);
        }
        let attentiveness = state.attentiveness.displayed();

        let bonus = if steady { smoothing.steady_bonus } else { 0.0 };
        let confidence_target = (focus * smoothing.confidence_focus_weight
            + emotion * smoothing.confidence_emotion_weight
            + attentiveness * smoothing.confidence_attentiveness_weight
            + bonus)
            .clamp(0.0, 100.0);
        state
            .confidence
            .update(confidence_target, smoothing.confidence, steady, smoothing);
        state.is_steady = steady;

        let scores = HintScores {
            focus: state.focus.score(),
            emotion: state.emotion.score(),
            confidence: state.confidence.score(),
            attentiveness: state.attentiveness.score(),
        };
        let HintScores { focus, emotion, confidence, attentiveness } = scores;
        let stress = (100 - confidence).clamp(smoothing.stress_floor, smoothing.stress_ceiling);

        let present = !matches!(observation, Observation::Absent);
        let candidate = Hint::select(present, scores, &self.config.hints);
        let hint = state.hint.offer(candidate, now);

        debug!(
            "Targets {:.0}/{:.0} -> focus {} emotion {} confidence {} (steady: {})",
            targets.focus, targets.emotion, focus, emotion, confidence, steady
        );

        FrameMetrics {
            focus,
            emotion,
            confidence,
            stress,
            attentiveness,
            hint: hint.to_string(),
            is_steady: steady,
            face_visible: observation.face_visible(),
            eye_contact: observation.eye_contact(),
        }
    }

    pub fn reset(&mut self) {
        self.state.reset();
    }
}

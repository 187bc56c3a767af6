//! Engagement pipeline configuration
//!
//! Every tuning constant of the pipeline lives here. The numeric targets are
//! empirical defaults, not calibrated physical constants.

use serde::{Deserialize, Serialize};

use crate::EngagementError;

/// Multi-scale cascade search parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CascadeParams {
    /// Window growth per scale step (> 1.0)
    pub scale_factor: f32,
    /// Overlapping raw hits required to confirm a detection
    pub min_neighbors: u32,
    /// Smallest detection edge in pixels
    pub min_size: u32,
}

impl CascadeParams {
    pub const fn new(scale_factor: f32, min_neighbors: u32, min_size: u32) -> Self {
        Self {
            scale_factor,
            min_neighbors,
            min_size,
        }
    }
}

/// Cascade detector bank configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Model paths (OpenCV `.xml` cascades or their JSON rendering)
    pub face_cascade_path: Option<String>,
    pub eye_cascade_path: Option<String>,
    pub smile_cascade_path: Option<String>,
    pub profile_cascade_path: Option<String>,

    /// Apply CLAHE to the frame and again to the face crop
    pub equalize: bool,
    /// CLAHE clip limit (multiples of the mean bin height)
    pub clahe_clip_limit: f32,
    /// CLAHE tile grid edge (tiles x tiles)
    pub clahe_tiles: u32,

    pub face: CascadeParams,
    pub profile: CascadeParams,
    pub eyes: CascadeParams,
    pub smile: CascadeParams,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            face_cascade_path: None,
            eye_cascade_path: None,
            smile_cascade_path: None,
            profile_cascade_path: None,
            equalize: true,
            clahe_clip_limit: 2.0,
            clahe_tiles: 8,
            face: CascadeParams::new(1.1, 4, 60),
            profile: CascadeParams::new(1.1, 4, 60),
            eyes: CascadeParams::new(1.1, 3, 15),
            smile: CascadeParams::new(1.7, 20, 25),
        }
    }
}

/// Optical-flow stability tracker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MotionConfig {
    /// Maximum corners seeded inside the face box
    pub max_corners: usize,
    /// Corner quality relative to the strongest corner (0-1)
    pub quality_level: f32,
    /// Minimum distance between seeded corners (px)
    pub min_distance: f32,
    /// Neighbourhood edge for the corner response
    pub block_size: u32,
    /// Lucas-Kanade window edge (px, odd)
    pub win_size: u32,
    /// Pyramid levels above the base image
    pub max_level: u32,
    /// Lucas-Kanade iterations per level
    pub max_iterations: u32,
    /// Lucas-Kanade convergence threshold (px)
    pub epsilon: f32,
    /// Mean displacement below which the subject is steady (px)
    pub steady_threshold_px: f32,
    /// Recent per-frame displacements averaged before the steadiness test
    /// (1 = current frame only)
    pub movement_window: usize,
    /// Tracked points needed to keep the current seed
    pub min_tracked_points: usize,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            max_corners: 50,
            quality_level: 0.3,
            min_distance: 7.0,
            block_size: 7,
            win_size: 15,
            max_level: 2,
            max_iterations: 10,
            epsilon: 0.03,
            steady_threshold_px: 0.6,
            movement_window: 1,
            min_tracked_points: 5,
        }
    }
}

/// Per-frame smoothing rates (0-1). `drop` applies when the target is below
/// the current value, `rise` when above.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SmoothingRates {
    pub drop: f32,
    pub rise: f32,
}

/// Signal smoother configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SmoothingConfig {
    pub focus: SmoothingRates,
    pub emotion: SmoothingRates,
    pub confidence: SmoothingRates,
    /// Exponential blend rate toward the framing target, not damped when steady
    pub attentiveness_rate: f32,
    /// Rate multiplier while the subject is steady
    pub steady_damping: f32,
    /// Floor for the damped rate
    pub min_rate: f32,
    /// Displayed values only move when the internal value is further away than this
    pub hysteresis: f32,
    pub confidence_focus_weight: f32,
    pub confidence_emotion_weight: f32,
    pub confidence_attentiveness_weight: f32,
    /// Confidence bonus while steady
    pub steady_bonus: f32,
    /// Stress is clamped into [stress_floor, stress_ceiling]
    pub stress_floor: u8,
    pub stress_ceiling: u8,
}

impl Default for SmoothingConfig {
    fn default() -> Self {
        Self {
            focus: SmoothingRates { drop: 0.25, rise: 0.08 },
            emotion: SmoothingRates { drop: 0.20, rise: 0.10 },
            confidence: SmoothingRates { drop: 0.20, rise: 0.06 },
            attentiveness_rate: 0.15,
            steady_damping: 0.5,
            min_rate: 0.02,
            hysteresis: 1.0,
            confidence_focus_weight: 0.55,
            confidence_emotion_weight: 0.30,
            confidence_attentiveness_weight: 0.15,
            steady_bonus: 5.0,
            stress_floor: 5,
            stress_ceiling: 95,
        }
    }
}

/// Mapping from detections to raw target scores
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetConfig {
    /// Recent eye counts averaged for the focus target (1 = instantaneous)
    pub eye_window: usize,
    pub both_eyes_focus: f32,
    pub one_eye_focus: f32,
    pub blinking_focus: f32,
    pub eyes_closed_focus: f32,
    pub profile_focus: f32,
    pub absent_focus: f32,
    pub smile_emotion: f32,
    pub neutral_emotion: f32,
    pub profile_emotion: f32,
    pub absent_emotion: f32,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            eye_window: 5,
            both_eyes_focus: 95.0,
            one_eye_focus: 65.0,
            blinking_focus: 45.0,
            eyes_closed_focus: 20.0,
            profile_focus: 35.0,
            absent_focus: 10.0,
            smile_emotion: 95.0,
            neutral_emotion: 45.0,
            profile_emotion: 25.0,
            absent_emotion: 10.0,
        }
    }
}

/// Advisory hint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HintConfig {
    /// Minimum time between hint changes (milliseconds)
    pub cooldown_ms: u64,
    pub focus_critical: f32,
    pub focus_low: f32,
    pub emotion_low: f32,
    /// Below this attentiveness the subject is asked to re-centre
    pub attentiveness_low: f32,
    pub confidence_low: f32,
}

impl Default for HintConfig {
    fn default() -> Self {
        Self {
            cooldown_ms: 3000,
            focus_critical: 40.0,
            focus_low: 60.0,
            emotion_low: 30.0,
            attentiveness_low: 60.0,
            confidence_low: 50.0,
        }
    }
}

/// Session aggregation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Record a timeline sample every N processed frames
    pub timeline_every_n: u64,
    /// Timeline samples retained
    pub timeline_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timeline_every_n: 10,
            timeline_capacity: 100,
        }
    }
}

/// Engagement pipeline configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngagementConfig {
    pub detector: DetectorConfig,
    pub motion: MotionConfig,
    pub smoothing: SmoothingConfig,
    pub targets: TargetConfig,
    pub hints: HintConfig,
    pub session: SessionConfig,
}

impl EngagementConfig {
    /// The simpler historical profile: no contrast normalisation,
    /// instantaneous eye counts, coarse face search.
    pub fn legacy() -> Self {
        Self {
            detector: DetectorConfig {
                equalize: false,
                face: CascadeParams::new(1.3, 5, 30),
                profile: CascadeParams::new(1.3, 5, 30),
                eyes: CascadeParams::new(1.1, 5, 10),
                smile: CascadeParams::new(1.7, 22, 20),
                ..Default::default()
            },
            motion: MotionConfig {
                steady_threshold_px: 0.8,
                movement_window: 10,
                ..Default::default()
            },
            targets: TargetConfig {
                eye_window: 1,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Create strict config (slower to forgive, quicker to advise)
    pub fn strict() -> Self {
        Self {
            smoothing: SmoothingConfig {
                focus: SmoothingRates { drop: 0.35, rise: 0.05 },
                ..Default::default()
            },
            hints: HintConfig {
                cooldown_ms: 2000,
                focus_low: 70.0,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Create lenient config (smoother, fewer hints)
    pub fn lenient() -> Self {
        Self {
            smoothing: SmoothingConfig {
                focus: SmoothingRates { drop: 0.15, rise: 0.10 },
                ..Default::default()
            },
            hints: HintConfig {
                cooldown_ms: 5000,
                focus_low: 50.0,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Reject configurations the pipeline cannot run with
    pub fn validate(&self) -> Result<(), EngagementError> {
        let d = &self.detector;
        for (name, params) in [
            ("face", d.face),
            ("profile", d.profile),
            ("eyes", d.eyes),
            ("smile", d.smile),
        ] {
            if params.scale_factor <= 1.0 {
                return Err(EngagementError::Config(format!(
                    "{name} scale_factor must be > 1.0, got {}",
                    params.scale_factor
                )));
            }
        }
        if d.equalize && (d.clahe_tiles == 0 || d.clahe_clip_limit <= 0.0) {
            return Err(EngagementError::Config("CLAHE needs tiles > 0 and clip limit > 0".into()));
        }

        let m = &self.motion;
        if m.win_size < 3 || m.win_size % 2 == 0 {
            return Err(EngagementError::Config(format!(
                "win_size must be odd and >= 3, got {}",
                m.win_size
            )));
        }
        if m.min_tracked_points == 0 || m.max_corners < m.min_tracked_points {
            return Err(EngagementError::Config(
                "max_corners must be >= min_tracked_points > 0".into(),
            ));
        }
        if m.movement_window == 0 {
            return Err(EngagementError::Config("movement_window must be >= 1".into()));
        }

        let s = &self.smoothing;
        for (name, rates) in [
            ("focus", s.focus),
            ("emotion", s.emotion),
            ("confidence", s.confidence),
        ] {
            let valid = |r: f32| r > 0.0 && r <= 1.0;
            if !valid(rates.drop) || !valid(rates.rise) {
                return Err(EngagementError::Config(format!("{name} rates must be in (0, 1]")));
            }
        }
        if !(s.attentiveness_rate > 0.0 && s.attentiveness_rate <= 1.0) {
            return Err(EngagementError::Config("attentiveness_rate must be in (0, 1]".into()));
        }
        if s.min_rate <= 0.0 || s.hysteresis < 0.0 {
            return Err(EngagementError::Config("min_rate must be > 0, hysteresis >= 0".into()));
        }
        if s.stress_floor > s.stress_ceiling || s.stress_ceiling > 100 {
            return Err(EngagementError::Config(format!(
                "stress bounds [{}, {}] invalid",
                s.stress_floor, s.stress_ceiling
            )));
        }

        if self.targets.eye_window == 0 {
            return Err(EngagementError::Config("eye_window must be >= 1".into()));
        }
        if self.session.timeline_every_n == 0 || self.session.timeline_capacity == 0 {
            return Err(EngagementError::Config("timeline decimation and capacity must be >= 1".into()));
        }
        Ok(())
    }
}

//! Advisory hints shown next to the live metrics
//!
//! Selection is a fixed priority table with no randomness, so replaying the
//! same frames always yields the same hints. A cooldown gate keeps the text
//! from flickering when the metrics hover around a threshold.

use std::fmt;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::HintConfig;

/// Advisory hint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Hint {
    /// Nothing analysed yet
    #[default]
    Ready,
    FaceAbsent,
    LookAtCamera,
    KeepEyeContact,
    /// Face drifted toward the frame edge
    CenterYourself,
    Smile,
    SteadyHead,
    Positive,
}

impl Hint {
    pub fn message(&self) -> &'static str {
        match self {
            Hint::Ready => "Ready...",
            Hint::FaceAbsent => "Please align your face with the camera.",
            Hint::LookAtCamera => "Look at the camera lens, not the screen.",
            Hint::KeepEyeContact => "Maintain eye contact with the camera.",
            Hint::CenterYourself => "Center yourself in the frame.",
            Hint::Smile => "A slight smile can help convey confidence!",
            Hint::SteadyHead => "Try to keep your head steady and breathe.",
            Hint::Positive => "Great composure! Keep it up.",
        }
    }

    /// Pick the hint for the current scores; focus problems outrank the rest,
    /// then framing
    pub fn select(face_present: bool, scores: HintScores, config: &HintConfig) -> Self {
        let focus = scores.focus as f32;
        let emotion = scores.emotion as f32;
        let confidence = scores.confidence as f32;
        if !face_present {
            Hint::FaceAbsent
        } else if focus < config.focus_critical {
            Hint::LookAtCamera
        } else if focus < config.focus_low {
            Hint::KeepEyeContact
        } else if (scores.attentiveness as f32) < config.attentiveness_low {
            Hint::CenterYourself
        } else if emotion < config.emotion_low {
            Hint::Smile
        } else if confidence < config.confidence_low {
            Hint::SteadyHead
        } else {
            Hint::Positive
        }
    }
}

/// Displayed scores the hint table looks at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HintScores {
    pub focus: u8,
    pub emotion: u8,
    pub confidence: u8,
    pub attentiveness: u8,
}

impl fmt::Display for Hint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

/// Rate limiter for hint changes
#[derive(Debug, Clone)]
pub struct HintGate {
    cooldown: Duration,
    current: Hint,
    last_changed: Option<Instant>,
}

impl HintGate {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            current: Hint::Ready,
            last_changed: None,
        }
    }

    pub fn current(&self) -> Hint {
        self.current
    }

    pub fn last_changed(&self) -> Option<Instant> {
        self.last_changed
    }

    /// Offer a candidate hint; returns the hint to display.
    ///
    /// The first hint is always accepted. Afterwards a differing hint is
    /// only accepted once the cooldown since the last change has elapsed.
    pub fn offer(&mut self, candidate: Hint, now: Instant) -> Hint {
        if candidate == self.current {
            return self.current;
        }

        let allowed = match self.last_changed {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.cooldown,
        };
        if allowed {
            debug!("Hint {:?} -> {:?}", self.current, candidate);
            self.current = candidate;
            // Never move the change marker backwards
            self.last_changed = Some(self.last_changed.map_or(now, |last| last.max(now)));
        }
        self.current
    }

    pub fn reset(&mut self) {
        self.current = Hint::Ready;
        self.last_changed = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scores(focus: u8, emotion: u8, confidence: u8, attentiveness: u8) -> HintScores {
        HintScores {
            focus,
            emotion,
            confidence,
            attentiveness,
        }
    }

    #[test]
    fn test_priority_table() {
        let c = HintConfig::default();
        let pick = |present, s| Hint::select(present, s, &c);
        assert_eq!(pick(false, scores(99, 99, 99, 99)), Hint::FaceAbsent);
        assert_eq!(pick(true, scores(39, 10, 10, 10)), Hint::LookAtCamera);
        assert_eq!(pick(true, scores(59, 10, 10, 10)), Hint::KeepEyeContact);
        assert_eq!(pick(true, scores(60, 10, 10, 59)), Hint::CenterYourself);
        assert_eq!(pick(true, scores(60, 29, 10, 60)), Hint::Smile);
        assert_eq!(pick(true, scores(60, 30, 49, 60)), Hint::SteadyHead);
        assert_eq!(pick(true, scores(60, 30, 50, 60)), Hint::Positive);
        assert_eq!(Hint::CenterYourself.to_string(), "Center yourself in the frame.");
    }

    #[test]
    fn test_first_hint_always_accepted() {
        let mut gate = HintGate::new(Duration::from_secs(3));
        let t0 = Instant::now();
        assert_eq!(gate.offer(Hint::Smile, t0), Hint::Smile);
        assert_eq!(gate.last_changed(), Some(t0));
    }

    #[test]
    fn test_cooldown_blocks_then_allows() {
        let mut gate = HintGate::new(Duration::from_secs(3));
        let t0 = Instant::now();
        gate.offer(Hint::Positive, t0);

        // Two differing candidates within the window: no visible change
        assert_eq!(gate.offer(Hint::Smile, t0 + Duration::from_millis(500)), Hint::Positive);
        assert_eq!(gate.offer(Hint::SteadyHead, t0 + Duration::from_millis(2900)), Hint::Positive);

        // First differing candidate after expiry wins
        let t1 = t0 + Duration::from_secs(3);
        assert_eq!(gate.offer(Hint::SteadyHead, t1), Hint::SteadyHead);
        assert_eq!(gate.last_changed(), Some(t1));
        assert_eq!(gate.offer(Hint::Smile, t1 + Duration::from_secs(1)), Hint::SteadyHead);
    }

    #[test]
    fn test_same_hint_does_not_restart_cooldown() {
        let mut gate = HintGate::new(Duration::from_secs(3));
        let t0 = Instant::now();
        gate.offer(Hint::Positive, t0);
        gate.offer(Hint::Positive, t0 + Duration::from_secs(2));
        assert_eq!(gate.last_changed(), Some(t0));
        assert_eq!(gate.offer(Hint::Smile, t0 + Duration::from_secs(3)), Hint::Smile);
    }

    #[test]
    fn test_last_changed_is_monotonic() {
        let mut gate = HintGate::new(Duration::ZERO);
        let t0 = Instant::now() + Duration::from_secs(10);
        gate.offer(Hint::Positive, t0);
        // A clock reading from before the last change
        gate.offer(Hint::Smile, t0 - Duration::from_secs(5));
        assert!(gate.last_changed().unwrap() >= t0);
    }

    #[test]
    fn test_reset() {
        let mut gate = HintGate::new(Duration::from_secs(3));
        gate.offer(Hint::Smile, Instant::now());
        gate.reset();
        assert_eq!(gate.current(), Hint::Ready);
        assert_eq!(gate.last_changed(), None);
        assert_eq!(gate.current().to_string(), "Ready...");
    }
}

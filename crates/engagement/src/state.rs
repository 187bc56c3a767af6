//! Per-session engagement state

use std::time::{Duration, Instant};

use ring_buffer::RingBuffer;

use crate::config::{EngagementConfig, SmoothingConfig, SmoothingRates};
use crate::hint::{Hint, HintGate};

/// Starting points for a fresh session
pub const INITIAL_FOCUS: f32 = 100.0;
pub const INITIAL_EMOTION: f32 = 50.0;
pub const INITIAL_CONFIDENCE: f32 = 80.0;
pub const INITIAL_ATTENTIVENESS: f32 = 80.0;

/// A score with a high-precision internal estimate and a hysteresis-gated
/// displayed value
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SmoothedMetric {
    internal: f32,
    displayed: f32,
}

impl SmoothedMetric {
    pub fn new(initial: f32) -> Self {
        let initial = initial.clamp(0.0, 100.0);
        Self {
            internal: initial,
            displayed: initial,
        }
    }

    pub fn internal(&self) -> f32 {
        self.internal
    }

    pub fn displayed(&self) -> f32 {
        self.displayed
    }

    /// Displayed value as a reported integer score
    pub fn score(&self) -> u8 {
        self.displayed.round().clamp(0.0, 100.0) as u8
    }

    /// Per-frame rate: drops react faster than rises, and a steady subject
    /// damps the rate without letting it reach zero
    pub fn rate(&self, target: f32, rates: SmoothingRates, steady: bool, config: &SmoothingConfig) -> f32 {
        let base = if target < self.internal { rates.drop } else { rates.rise };
        if steady {
            (base * config.steady_damping).max(config.min_rate.min(base))
        } else {
            base
        }
    }

    /// Move toward `target` and return the displayed value
    pub fn update(&mut self, target: f32, rates: SmoothingRates, steady: bool, config: &SmoothingConfig) -> f32 {
        let target = target.clamp(0.0, 100.0);
        let rate = self.rate(target, rates, steady, config);
        self.internal = (self.internal + (target - self.internal) * rate).clamp(0.0, 100.0);

        if (self.internal - self.displayed).abs() > config.hysteresis {
            self.displayed = self.internal;
        }
        self.displayed
    }
}

/// Engagement state carried across the frames of one session
#[derive(Debug, Clone)]
pub struct EngagementState {
    pub focus: SmoothedMetric,
    pub emotion: SmoothedMetric,
    pub confidence: SmoothedMetric,
    /// How well the face is centred horizontally
    pub attentiveness: SmoothedMetric,
    pub is_steady: bool,
    pub hint: HintGate,
    /// Recent eye counts, oldest first
    pub eyes_history: RingBuffer<usize>,
}

impl EngagementState {
    pub fn new(config: &EngagementConfig) -> Self {
        Self {
            focus: SmoothedMetric::new(INITIAL_FOCUS),
            emotion: SmoothedMetric::new(INITIAL_EMOTION),
            confidence: SmoothedMetric::new(INITIAL_CONFIDENCE),
            attentiveness: SmoothedMetric::new(INITIAL_ATTENTIVENESS),
            is_steady: false,
            hint: HintGate::new(Duration::from_millis(config.hints.cooldown_ms)),
            eyes_history: RingBuffer::new(config.targets.eye_window),
        }
    }

    pub fn current_hint(&self) -> Hint {
        self.hint.current()
    }

    pub fn hint_last_changed(&self) -> Option<Instant> {
        self.hint.last_changed()
    }

    /// Mean of the recent eye counts
    pub fn mean_eyes(&self) -> f32 {
        self.eyes_history.mean_by(|&n| n as f64).unwrap_or(0.0) as f32
    }

    /// Back to the values of a freshly created session
    pub fn reset(&mut self) {
        self.focus = SmoothedMetric::new(INITIAL_FOCUS);
        self.emotion = SmoothedMetric::new(INITIAL_EMOTION);
        self.confidence = SmoothedMetric::new(INITIAL_CONFIDENCE);
        self.attentiveness = SmoothedMetric::new(INITIAL_ATTENTIVENESS);
        self.is_steady = false;
        self.hint.reset();
        self.eyes_history.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn frames_to_converge(start: f32, target: f32, rates: SmoothingRates) -> usize {
        let config = SmoothingConfig::default();
        let mut metric = SmoothedMetric::new(start);
        let gap = (target - start).abs();
        (1..=500)
            .find(|_| {
                metric.update(target, rates, false, &config);
                (metric.displayed() - target).abs() <= gap * 0.1
            })
            .unwrap_or(usize::MAX)
    }

    #[test]
    fn test_hysteresis_holds_under_small_oscillation() {
        let config = SmoothingConfig::default();
        let rates = config.focus;
        let mut metric = SmoothedMetric::new(70.0);
        for i in 0..200 {
            let target = if i % 2 == 0 { 71.0 } else { 69.0 };
            assert_eq!(metric.update(target, rates, i % 3 == 0, &config), 70.0);
        }
        assert_eq!(metric.score(), 70);
    }

    #[test]
    fn test_drop_converges_faster_than_rise() {
        let rates = SmoothingConfig::default().focus;
        let drop = frames_to_converge(95.0, 20.0, rates);
        let rise = frames_to_converge(20.0, 95.0, rates);
        assert!(drop < rise, "drop took {drop} frames, rise took {rise}");
    }

    #[test]
    fn test_steady_damping_never_stalls() {
        let config = SmoothingConfig::default();
        let mut metric = SmoothedMetric::new(95.0);
        let rates = SmoothingRates { drop: 0.03, rise: 0.03 };
        // Damped 0.015 is floored at min_rate
        assert_eq!(metric.rate(10.0, rates, true, &config), config.min_rate);
        for _ in 0..300 {
            metric.update(10.0, rates, true, &config);
        }
        assert!(metric.displayed() < 15.0);
    }

    #[test]
    fn test_damping_does_not_speed_up_slow_rates() {
        let config = SmoothingConfig::default();
        let metric = SmoothedMetric::new(50.0);
        let slow = SmoothingRates { drop: 0.01, rise: 0.01 };
        assert_eq!(metric.rate(10.0, slow, true, &config), 0.01);
    }

    #[test]
    fn test_reset_restores_initial_values() {
        let config = EngagementConfig::default();
        let mut state = EngagementState::new(&config);
        state.focus.update(0.0, config.smoothing.focus, false, &config.smoothing);
        state.eyes_history.push(2);
        state.is_steady = true;
        state.hint.offer(Hint::Smile, Instant::now());

        state.reset();
        assert_eq!(state.focus, SmoothedMetric::new(INITIAL_FOCUS));
        assert!(state.eyes_history.is_empty());
        assert!(!state.is_steady);
        assert_eq!(state.current_hint(), Hint::Ready);
        assert_eq!(state.hint_last_changed(), None);
    }

    #[test]
    fn test_eye_window_mean() {
        let config = EngagementConfig::default();
        let mut state = EngagementState::new(&config);
        assert_eq!(state.mean_eyes(), 0.0);
        for n in [2, 2, 2, 2, 2, 0, 0] {
            state.eyes_history.push(n);
        }
        // Window of 5: [2, 2, 2, 0, 0]
        assert!((state.mean_eyes() - 1.2).abs() < 1e-6);
    }

    proptest! {
        #[test]
        fn prop_scores_stay_bounded(
            start in 0.0f32..=100.0,
            targets in prop::collection::vec(-500.0f32..500.0, 1..200),
            steady in any::<bool>(),
        ) {
            let config = SmoothingConfig::default();
            let mut metric = SmoothedMetric::new(start);
            for target in targets {
                let shown = metric.update(target, config.confidence, steady, &config);
                prop_assert!((0.0..=100.0).contains(&shown));
                prop_assert!((0.0..=100.0).contains(&metric.internal()));
            }
        }
    }
}

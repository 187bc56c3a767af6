//! Session aggregation
//!
//! Frame counters are kept twice: for the whole session and for the current
//! question segment. A new-question signal closes the segment into a
//! [`QuestionMetrics`] record; the smoothing state is untouched by that.

use std::time::Instant;

use chrono::{DateTime, Utc};
use ring_buffer::RingBuffer;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::analysis::FrameMetrics;
use crate::config::SessionConfig;

/// Percentage rounded to one decimal place
fn percentage(part: u64, total: u64) -> f32 {
    if total == 0 {
        return 0.0;
    }
    ((part as f64 / total as f64) * 1000.0).round() as f32 / 10.0
}

/// Frame counters over some span of frames
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameCounters {
    pub total_frames: u64,
    pub eye_contact_frames: u64,
    pub face_visible_frames: u64,
    pub steady_frames: u64,
}

impl FrameCounters {
    pub fn record(&mut self, metrics: &FrameMetrics) {
        self.total_frames += 1;
        self.eye_contact_frames += u64::from(metrics.eye_contact);
        self.face_visible_frames += u64::from(metrics.face_visible);
        self.steady_frames += u64::from(metrics.is_steady);
    }

    pub fn eye_contact_percentage(&self) -> f32 {
        percentage(self.eye_contact_frames, self.total_frames)
    }

    pub fn face_visibility_percentage(&self) -> f32 {
        percentage(self.face_visible_frames, self.total_frames)
    }

    pub fn steadiness_percentage(&self) -> f32 {
        percentage(self.steady_frames, self.total_frames)
    }
}

/// Aggregates of one finished question segment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionMetrics {
    pub question_index: u32,
    pub frame_count: u64,
    pub eye_contact_percentage: f32,
    pub face_visibility_percentage: f32,
    pub steadiness_percentage: f32,
    /// Displayed scores when the segment closed
    pub final_focus: u8,
    pub final_emotion: u8,
    pub final_confidence: u8,
    /// Offset of the segment end from session start
    pub timestamp: f64,
}

/// A sampled point of the metrics timeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineSample {
    /// Processed-frame number (1-based)
    pub frame: u64,
    /// Seconds since session start
    pub offset_seconds: f64,
    pub recorded_at: DateTime<Utc>,
    pub question_index: u32,
    #[serde(flatten)]
    pub metrics: FrameMetrics,
}

/// Whole-session analytics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionAnalytics {
    pub session_duration_seconds: f64,
    pub total_frames_analyzed: u64,
    pub overall_eye_contact_percentage: f32,
    pub overall_face_visibility_percentage: f32,
    pub overall_steadiness_percentage: f32,
    pub per_question_metrics: Vec<QuestionMetrics>,
    /// Most recent samples, oldest first
    pub metrics_timeline: Vec<TimelineSample>,
    pub final_metrics: FrameMetrics,
}

/// Per-session aggregator
pub struct SessionAggregator {
    config: SessionConfig,
    started: Instant,
    session: FrameCounters,
    segment: FrameCounters,
    question_index: u32,
    questions: Vec<QuestionMetrics>,
    timeline: RingBuffer<TimelineSample>,
    latest: FrameMetrics,
}

impl SessionAggregator {
    pub fn new(config: SessionConfig, now: Instant) -> Self {
        let timeline = RingBuffer::new(config.timeline_capacity);
        Self {
            config,
            started: now,
            session: FrameCounters::default(),
            segment: FrameCounters::default(),
            question_index: 0,
            questions: Vec::new(),
            timeline,
            latest: FrameMetrics::default(),
        }
    }

    /// Whole-session counters
    pub fn totals(&self) -> &FrameCounters {
        &self.session
    }

    /// Counters of the open question segment
    pub fn segment(&self) -> &FrameCounters {
        &self.segment
    }

    pub fn question_index(&self) -> u32 {
        self.question_index
    }

    pub fn questions(&self) -> &[QuestionMetrics] {
        &self.questions
    }

    pub fn latest(&self) -> &FrameMetrics {
        &self.latest
    }

    pub fn record(&mut self, metrics: &FrameMetrics, now: Instant) {
        self.session.record(metrics);
        self.segment.record(metrics);
        self.latest = metrics.clone();

        if self.session.total_frames % self.config.timeline_every_n == 0 {
            self.timeline.push(TimelineSample {
                frame: self.session.total_frames,
                offset_seconds: self.elapsed(now),
                recorded_at: Utc::now(),
                question_index: self.question_index,
                metrics: metrics.clone(),
            });
        }
    }

    fn elapsed(&self, now: Instant) -> f64 {
        now.saturating_duration_since(self.started).as_secs_f64()
    }

    /// Close the open segment; empty segments leave no record
    pub fn close_segment(&mut self, now: Instant) -> Option<QuestionMetrics> {
        if self.segment.total_frames == 0 {
            return None;
        }
        let record = QuestionMetrics {
            question_index: self.question_index,
            frame_count: self.segment.total_frames,
            eye_contact_percentage: self.segment.eye_contact_percentage(),
            face_visibility_percentage: self.segment.face_visibility_percentage(),
            steadiness_percentage: self.segment.steadiness_percentage(),
            final_focus: self.latest.focus,
            final_emotion: self.latest.emotion,
            final_confidence: self.latest.confidence,
            timestamp: self.elapsed(now),
        };
        info!(
            "Question {} closed: {} frames, eye contact {:.1}%",
            record.question_index, record.frame_count, record.eye_contact_percentage
        );
        self.questions.push(record.clone());
        self.segment = FrameCounters::default();
        Some(record)
    }

    /// Start the next question segment, returning the closed one if it had frames
    pub fn new_question(&mut self, now: Instant) -> Option<QuestionMetrics> {
        let closed = self.close_segment(now);
        self.segment = FrameCounters::default();
        self.question_index += 1;
        closed
    }

    /// Snapshot without closing the open segment
    pub fn analytics(&self, now: Instant) -> SessionAnalytics {
        SessionAnalytics {
            session_duration_seconds: self.elapsed(now),
            total_frames_analyzed: self.session.total_frames,
            overall_eye_contact_percentage: self.session.eye_contact_percentage(),
            overall_face_visibility_percentage: self.session.face_visibility_percentage(),
            overall_steadiness_percentage: self.session.steadiness_percentage(),
            per_question_metrics: self.questions.clone(),
            metrics_timeline: self.timeline.to_vec(),
            final_metrics: self.latest.clone(),
        }
    }

    /// Close the open segment and report the whole session
    pub fn end_session(&mut self, now: Instant) -> SessionAnalytics {
        self.close_segment(now);
        let analytics = self.analytics(now);
        info!(
            "Session ended: {} frames over {:.1}s, {} questions",
            analytics.total_frames_analyzed,
            analytics.session_duration_seconds,
            analytics.per_question_metrics.len()
        );
        analytics
    }

    pub fn reset(&mut self, now: Instant) {
        *self = Self::new(self.config.clone(), now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::time::Duration;

    fn frame(eye_contact: bool, face_visible: bool, is_steady: bool) -> FrameMetrics {
        FrameMetrics {
            eye_contact,
            face_visible,
            is_steady,
            ..Default::default()
        }
    }

    #[test]
    fn test_percentage_rounding() {
        assert_eq!(percentage(1, 3), 33.3);
        assert_eq!(percentage(2, 3), 66.7);
        assert_eq!(percentage(0, 0), 0.0);
        assert_eq!(percentage(5, 5), 100.0);
    }

    #[test]
    fn test_question_segments() {
        let t0 = Instant::now();
        let mut agg = SessionAggregator::new(SessionConfig::default(), t0);

        // Empty opening segment leaves no record
        assert!(agg.new_question(t0).is_none());
        assert_eq!(agg.question_index(), 1);

        for i in 0..4 {
            agg.record(&frame(i < 3, true, i % 2 == 0), t0);
        }
        let q1 = agg.new_question(t0 + Duration::from_secs(20)).unwrap();
        assert_eq!(q1.question_index, 1);
        assert_eq!(q1.frame_count, 4);
        assert_eq!(q1.eye_contact_percentage, 75.0);
        assert_eq!(q1.face_visibility_percentage, 100.0);
        assert_eq!(q1.steadiness_percentage, 50.0);
        assert_eq!(q1.timestamp, 20.0);
        assert_eq!(agg.segment().total_frames, 0);
        assert_eq!(agg.totals().total_frames, 4);

        agg.record(&frame(false, false, false), t0);
        let analytics = agg.end_session(t0 + Duration::from_secs(30));
        assert_eq!(analytics.per_question_metrics.len(), 2);
        assert_eq!(analytics.per_question_metrics[1].question_index, 2);
        assert_eq!(analytics.total_frames_analyzed, 5);
        assert_eq!(analytics.overall_eye_contact_percentage, 60.0);
        assert_eq!(analytics.session_duration_seconds, 30.0);
    }

    #[test]
    fn test_timeline_decimation_and_capacity() {
        let t0 = Instant::now();
        let mut agg = SessionAggregator::new(SessionConfig::default(), t0);
        for i in 0..1500u64 {
            agg.record(&frame(true, true, true), t0 + Duration::from_millis(i * 100));
        }
        let timeline = agg.analytics(t0).metrics_timeline;
        assert_eq!(timeline.len(), 100);
        assert_eq!(timeline[0].frame, 510);
        assert_eq!(timeline[99].frame, 1500);
        assert!(timeline.windows(2).all(|w| w[0].offset_seconds < w[1].offset_seconds));
    }

    #[test]
    fn test_analytics_does_not_close_segment() {
        let t0 = Instant::now();
        let mut agg = SessionAggregator::new(SessionConfig::default(), t0);
        agg.record(&frame(true, true, false), t0);
        let snapshot = agg.analytics(t0);
        assert!(snapshot.per_question_metrics.is_empty());
        assert_eq!(agg.segment().total_frames, 1);
    }

    #[test]
    fn test_reset_clears_everything() {
        let t0 = Instant::now();
        let mut agg = SessionAggregator::new(SessionConfig::default(), t0);
        for _ in 0..25 {
            agg.record(&frame(true, true, true), t0);
        }
        agg.new_question(t0);
        agg.reset(t0 + Duration::from_secs(5));

        let analytics = agg.analytics(t0 + Duration::from_secs(5));
        assert_eq!(analytics.total_frames_analyzed, 0);
        assert!(analytics.metrics_timeline.is_empty());
        assert!(analytics.per_question_metrics.is_empty());
        assert_eq!(analytics.session_duration_seconds, 0.0);
        assert_eq!(agg.question_index(), 0);
        assert_eq!(analytics.final_metrics, FrameMetrics::default());
    }

    #[test]
    fn test_analytics_json_keys() {
        let agg = SessionAggregator::new(SessionConfig::default(), Instant::now());
        let json = serde_json::to_value(agg.analytics(Instant::now())).unwrap();
        for key in [
            "session_duration_seconds",
            "total_frames_analyzed",
            "overall_eye_contact_percentage",
            "overall_face_visibility_percentage",
            "overall_steadiness_percentage",
            "per_question_metrics",
            "metrics_timeline",
            "final_metrics",
        ] {
            assert!(json.get(key).is_some(), "missing {key}");
        }
    }

    proptest! {
        #[test]
        fn prop_segments_sum_to_total(
            events in prop::collection::vec(prop_oneof![
                3 => any::<(bool, bool, bool)>().prop_map(Some),
                1 => Just(None),
            ], 0..300),
        ) {
            let t0 = Instant::now();
            let mut agg = SessionAggregator::new(SessionConfig::default(), t0);
            for event in events {
                match event {
                    Some((eye, face, steady)) => agg.record(&frame(eye, face, steady), t0),
                    None => { agg.new_question(t0); }
                }
                let closed: u64 = agg.questions().iter().map(|q| q.frame_count).sum();
                prop_assert_eq!(closed + agg.segment().total_frames, agg.totals().total_frames);
            }
        }
    }
}

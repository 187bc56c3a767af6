//! Per-frame engagement results

use serde::{Deserialize, Serialize};

use crate::hint::Hint;
use crate::state::{INITIAL_ATTENTIVENESS, INITIAL_CONFIDENCE, INITIAL_EMOTION, INITIAL_FOCUS};

/// Metrics reported for one processed frame
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameMetrics {
    /// Attention on the camera (0-100)
    pub focus: u8,

    /// Expressiveness / warmth (0-100)
    pub emotion: u8,

    /// Weighted blend of focus, emotion and attentiveness, bonus when steady (0-100)
    pub confidence: u8,

    /// Complement of confidence, never at an extreme
    pub stress: u8,

    /// Horizontal centring of the face in the frame (0-100)
    pub attentiveness: u8,

    /// Advisory text
    pub hint: String,

    /// Subject physically still
    pub is_steady: bool,

    /// A frontal face was found
    pub face_visible: bool,

    /// A frontal face with both eyes was found
    pub eye_contact: bool,
}

impl Default for FrameMetrics {
    /// What a client sees before the first frame is analysed
    fn default() -> Self {
        let confidence = INITIAL_CONFIDENCE as u8;
        Self {
            focus: INITIAL_FOCUS as u8,
            emotion: INITIAL_EMOTION as u8,
            confidence,
            stress: 100 - confidence,
            attentiveness: INITIAL_ATTENTIVENESS as u8,
            hint: Hint::Ready.to_string(),
            is_steady: false,
            face_visible: false,
            eye_contact: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_ready() {
        let metrics = FrameMetrics::default();
        assert_eq!(metrics.hint, "Ready...");
        assert_eq!(metrics.confidence + metrics.stress, 100);
        assert!(!metrics.face_visible);
    }

    #[test]
    fn test_json_field_names() {
        let json = serde_json::to_value(FrameMetrics::default()).unwrap();
        for key in ["focus", "emotion", "confidence", "stress", "attentiveness", "hint", "is_steady", "face_visible", "eye_contact"] {
            assert!(json.get(key).is_some(), "missing {key}");
        }
        assert_eq!(json["focus"], 100);
    }
}

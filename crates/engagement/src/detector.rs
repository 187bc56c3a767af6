//! Face, eye, smile and profile detection
//!
//! The bank reduces one grayscale frame to a single [`Observation`]. Frontal
//! faces win over profiles; the profile cascade only runs when no frontal
//! face was found.

use std::sync::Arc;

use image::{imageops, GrayImage};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::cascade::HaarCascade;
use crate::config::DetectorConfig;
use crate::contrast;
use crate::EngagementError;

/// Axis-aligned bounding box in pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

impl Rect {
    pub const fn new(x: u32, y: u32, w: u32, h: u32) -> Self {
        Self { x, y, w, h }
    }

    pub fn area(&self) -> u64 {
        self.w as u64 * self.h as u64
    }

    pub fn center(&self) -> (f32, f32) {
        (self.x as f32 + self.w as f32 / 2.0, self.y as f32 + self.h as f32 / 2.0)
    }

    /// Clip to an image of the given size; `None` when nothing is left
    pub fn clamp_to(&self, width: u32, height: u32) -> Option<Rect> {
        if self.x >= width || self.y >= height {
            return None;
        }
        let w = self.w.min(width - self.x);
        let h = self.h.min(height - self.y);
        (w > 0 && h > 0).then(|| Rect::new(self.x, self.y, w, h))
    }
}

/// What the detector bank saw in one frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Observation {
    /// Frontal face with the eye and smile results from inside it
    Frontal { face: Rect, eyes: usize, smiling: bool },
    /// Side-on face; the subject is looking away
    Profile { region: Rect },
    /// Nobody in frame
    Absent,
}

impl Observation {
    /// Region the motion tracker seeds from
    pub fn face_region(&self) -> Option<Rect> {
        match self {
            Observation::Frontal { face, .. } => Some(*face),
            Observation::Profile { region } => Some(*region),
            Observation::Absent => None,
        }
    }

    pub fn face_visible(&self) -> bool {
        matches!(self, Observation::Frontal { .. })
    }

    /// Eye contact needs a frontal face with both eyes found
    pub fn eye_contact(&self) -> bool {
        matches!(self, Observation::Frontal { eyes, .. } if *eyes >= 2)
    }

    /// Eye count fed into the focus window; zero unless frontal
    pub fn eye_count(&self) -> usize {
        match self {
            Observation::Frontal { eyes, .. } => *eyes,
            _ => 0,
        }
    }
}

/// Anything that can turn a grayscale frame into an observation
pub trait DetectorBank: Send {
    fn detect(&self, gray: &GrayImage) -> Result<Observation, EngagementError>;
}

/// One loaded bank shared by many sessions
impl<T: DetectorBank + Sync + ?Sized> DetectorBank for Arc<T> {
    fn detect(&self, gray: &GrayImage) -> Result<Observation, EngagementError> {
        (**self).detect(gray)
    }
}

/// Largest-area box, the primary subject
fn largest(rects: &[Rect]) -> Option<Rect> {
    rects.iter().copied().max_by_key(Rect::area)
}

/// Viola-Jones cascade bank
pub struct CascadeBank {
    config: DetectorConfig,
    face: HaarCascade,
    eyes: HaarCascade,
    smile: HaarCascade,
    profile: Option<HaarCascade>,
}

impl CascadeBank {
    pub fn new(config: &DetectorConfig) -> Result<Self, EngagementError> {
        let load = |name: &str, path: &Option<String>| -> Result<HaarCascade, EngagementError> {
            let path = path.as_deref().ok_or_else(|| {
                error!("No {} cascade path configured", name);
                EngagementError::ModelLoad(format!("{name} cascade path not configured"))
            })?;
            HaarCascade::from_file(path).map_err(|e| {
                error!("Failed to load {} cascade: {}", name, e);
                e
            })
        };

        let face = load("face", &config.face_cascade_path)?;
        let eyes = load("eye", &config.eye_cascade_path)?;
        let smile = load("smile", &config.smile_cascade_path)?;
        let profile = match &config.profile_cascade_path {
            Some(_) => Some(load("profile", &config.profile_cascade_path)?),
            None => {
                warn!("No profile cascade configured; looking away reads as absent");
                None
            }
        };
        info!("Cascade bank ready (equalize: {})", config.equalize);

        Ok(Self {
            config: config.clone(),
            face,
            eyes,
            smile,
            profile,
        })
    }

    fn normalise(&self, gray: &GrayImage) -> GrayImage {
        if self.config.equalize {
            contrast::clahe(gray, self.config.clahe_clip_limit, self.config.clahe_tiles)
        } else {
            gray.clone()
        }
    }
}

impl DetectorBank for CascadeBank {
    fn detect(&self, gray: &GrayImage) -> Result<Observation, EngagementError> {
        let (width, height) = gray.dimensions();
        if width == 0 || height == 0 {
            return Err(EngagementError::Detection("empty frame".into()));
        }
        let frame = self.normalise(gray);

        let faces = self.face.detect(&frame, &self.config.face);
        if let Some(face) = largest(&faces).and_then(|f| f.clamp_to(width, height)) {
            let crop = imageops::crop_imm(&frame, face.x, face.y, face.w, face.h).to_image();
            let crop = self.normalise(&crop);

            let eyes = self.eyes.detect(&crop, &self.config.eyes).len();
            let smiling = !self.smile.detect(&crop, &self.config.smile).is_empty();
            debug!(
                "Frontal face {:?} of {} candidates: {} eyes, smiling: {}",
                face,
                faces.len(),
                eyes,
                smiling
            );
            return Ok(Observation::Frontal { face, eyes, smiling });
        }

        if let Some(profile) = &self.profile {
            let profiles = profile.detect(&frame, &self.config.profile);
            if let Some(region) = largest(&profiles).and_then(|r| r.clamp_to(width, height)) {
                debug!("Profile face {:?}", region);
                return Ok(Observation::Profile { region });
            }
        }

        Ok(Observation::Absent)
    }
}

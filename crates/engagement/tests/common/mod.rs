#![allow(dead_code)]

use std::io::Cursor;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use engagement::{DetectorBank, EngagementConfig, EngagementError, EngagementPipeline, Observation, Rect};
use image::{GrayImage, ImageFormat, Rgb, RgbImage};

pub const FRAME_SIZE: u32 = 96;
pub const FACE: Rect = Rect::new(16, 16, 64, 64);

/// What a synthetic frame shows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scene {
    Absent = 0,
    Profile = 1,
    OneEye = 2,
    Smiling = 3,
    Neutral = 4,
    EyesClosed = 5,
}

impl Scene {
    fn marker(self) -> u8 {
        self as u8 * 40
    }

    fn from_marker(value: u8) -> Self {
        match (u32::from(value) + 20) / 40 {
            1 => Scene::Profile,
            2 => Scene::OneEye,
            3 => Scene::Smiling,
            4 => Scene::Neutral,
            5 => Scene::EyesClosed,
            _ => Scene::Absent,
        }
    }
}

/// Reads the scene from the marker pixel at (0, 0) instead of running cascades
pub struct MarkerDetector;

impl DetectorBank for MarkerDetector {
    fn detect(&self, gray: &GrayImage) -> Result<Observation, EngagementError> {
        let observation = match Scene::from_marker(gray.get_pixel(0, 0)[0]) {
            Scene::Absent => Observation::Absent,
            Scene::Profile => Observation::Profile { region: FACE },
            Scene::OneEye => Observation::Frontal {
                face: FACE,
                eyes: 1,
                smiling: false,
            },
            Scene::Smiling => Observation::Frontal {
                face: FACE,
                eyes: 2,
                smiling: true,
            },
            Scene::Neutral => Observation::Frontal {
                face: FACE,
                eyes: 2,
                smiling: false,
            },
            Scene::EyesClosed => Observation::Frontal {
                face: FACE,
                eyes: 0,
                smiling: false,
            },
        };
        Ok(observation)
    }
}

/// Checkerboard with the scene marker; `shift` moves the pattern right
pub fn scene_image(scene: Scene, shift: u32) -> RgbImage {
    let mut image = RgbImage::from_fn(FRAME_SIZE, FRAME_SIZE, |x, y| {
        if ((x + shift) / 8 + y / 8) % 2 == 0 {
            Rgb([230, 230, 230])
        } else {
            Rgb([25, 25, 25])
        }
    });
    let m = scene.marker();
    image.put_pixel(0, 0, Rgb([m, m, m]));
    image
}

/// Browser-style frame payload
pub fn scene_payload(scene: Scene, shift: u32) -> String {
    let mut bytes = Vec::new();
    scene_image(scene, shift)
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .expect("encode png");
    format!("data:image/png;base64,{}", STANDARD.encode(bytes))
}

pub fn pipeline() -> EngagementPipeline {
    pipeline_with(EngagementConfig::default())
}

pub fn pipeline_with(config: EngagementConfig) -> EngagementPipeline {
    EngagementPipeline::with_detector(config, Box::new(MarkerDetector)).expect("valid config")
}

//! Motion stability tracker
//!
//! Shi-Tomasi corners are seeded inside the face box and followed from frame
//! to frame with pyramidal Lucas-Kanade optical flow. The subject counts as
//! steady when the tracked points barely move, averaged over a short window
//! of recent frames. Detector jitter does not matter here: only pixels are
//! compared.

use image::GrayImage;
use imageproc::gradients::{horizontal_sobel, vertical_sobel};
use ndarray::Array2;
use ring_buffer::RingBuffer;
use tracing::debug;

use crate::config::MotionConfig;
use crate::detector::Rect;

/// Smallest normalised eigenvalue of the LK gradient matrix worth tracking
const MIN_EIGENVALUE: f32 = 1e-3;

/// One pyramid level: intensities and their central-difference gradients
struct Level {
    image: Array2<f32>,
    gx: Array2<f32>,
    gy: Array2<f32>,
}

impl Level {
    fn new(image: Array2<f32>) -> Self {
        let (h, w) = image.dim();
        let gx = Array2::from_shape_fn((h, w), |(y, x)| {
            (image[[y, (x + 1).min(w - 1)]] - image[[y, x.saturating_sub(1)]]) / 2.0
        });
        let gy = Array2::from_shape_fn((h, w), |(y, x)| {
            (image[[(y + 1).min(h - 1), x]] - image[[y.saturating_sub(1), x]]) / 2.0
        });
        Self { image, gx, gy }
    }
}

fn build_pyramid(gray: &GrayImage, max_level: u32, win_size: u32) -> Vec<Level> {
    let (w, h) = gray.dimensions();
    let base = Array2::from_shape_fn((h as usize, w as usize), |(y, x)| {
        gray.get_pixel(x as u32, y as u32).0[0] as f32
    });

    let mut levels = vec![Level::new(base)];
    for _ in 0..max_level {
        let prev = &levels[levels.len() - 1].image;
        let (ph, pw) = prev.dim();
        let (nh, nw) = (ph / 2, pw / 2);
        if nh.min(nw) < win_size as usize {
            break;
        }
        // 2x2 box downsample
        let next = Array2::from_shape_fn((nh, nw), |(y, x)| {
            let (sy, sx) = (y * 2, x * 2);
            (prev[[sy, sx]] + prev[[sy, sx + 1]] + prev[[sy + 1, sx]] + prev[[sy + 1, sx + 1]]) / 4.0
        });
        levels.push(Level::new(next));
    }
    levels
}

/// Bilinear sample with edge clamping
fn sample(a: &Array2<f32>, x: f32, y: f32) -> f32 {
    let (h, w) = a.dim();
    let x = x.clamp(0.0, (w - 1) as f32);
    let y = y.clamp(0.0, (h - 1) as f32);
    let (x0, y0) = (x.floor() as usize, y.floor() as usize);
    let (x1, y1) = ((x0 + 1).min(w - 1), (y0 + 1).min(h - 1));
    let (ax, ay) = (x - x0 as f32, y - y0 as f32);

    a[[y0, x0]] * (1.0 - ax) * (1.0 - ay)
        + a[[y0, x1]] * ax * (1.0 - ay)
        + a[[y1, x0]] * (1.0 - ax) * ay
        + a[[y1, x1]] * ax * ay
}

/// Smaller eigenvalue of the symmetric matrix [[a, b], [b, c]]
fn min_eigenvalue(a: f32, b: f32, c: f32) -> f32 {
    (a + c) / 2.0 - (((a - c) / 2.0).powi(2) + b * b).sqrt()
}

/// Optical-flow stability tracker
pub struct MotionTracker {
    config: MotionConfig,
    previous: Option<Vec<Level>>,
    points: Vec<(f32, f32)>,
    steady: bool,
    last_displacement: Option<f32>,
    /// Mean displacements of the recent compared frames
    movement: RingBuffer<f32>,
}

impl MotionTracker {
    pub fn new(config: MotionConfig) -> Self {
        Self {
            movement: RingBuffer::new(config.movement_window.max(1)),
            config,
            previous: None,
            points: Vec::new(),
            steady: false,
            last_displacement: None,
        }
    }

    pub fn is_steady(&self) -> bool {
        self.steady
    }

    /// Points currently being followed
    pub fn tracked_points(&self) -> usize {
        self.points.len()
    }

    /// Mean displacement measured on the last compared frame (px)
    pub fn last_displacement(&self) -> Option<f32> {
        self.last_displacement
    }

    /// Forget the previous frame and the point set
    pub fn reset(&mut self) {
        self.previous = None;
        self.points.clear();
        self.steady = false;
        self.last_displacement = None;
        self.movement.clear();
    }

    /// Mean of the displacements in the movement window (px)
    pub fn average_movement(&self) -> Option<f32> {
        self.movement.mean_by(|&d| d as f64).map(|m| m as f32)
    }

    /// Feed the next frame; returns whether the subject is steady
    pub fn update(&mut self, gray: &GrayImage, face: Option<Rect>) -> bool {
        let (w, h) = gray.dimensions();
        if w == 0 || h == 0 {
            self.reset();
            return false;
        }

        let pyramid = build_pyramid(gray, self.config.max_level, self.config.win_size);
        let face = face.and_then(|f| f.clamp_to(w, h));
        let previous = self
            .previous
            .take()
            .filter(|prev| prev[0].image.dim() == pyramid[0].image.dim());
        self.last_displacement = None;

        let steady = match (face, previous) {
            // No face region: the tracker cannot vouch for anything
            (None, _) => {
                self.points.clear();
                self.movement.clear();
                false
            }
            (Some(face), Some(prev)) if !self.points.is_empty() => {
                let pairs: Vec<((f32, f32), (f32, f32))> = self
                    .points
                    .iter()
                    .filter_map(|&p| self.track_point(&prev, &pyramid, p).map(|q| (p, q)))
                    .collect();

                if pairs.len() < self.config.min_tracked_points {
                    debug!("Tracking lost ({} points); re-seeding", pairs.len());
                    self.points = self.good_features(gray, face);
                    self.movement.clear();
                    false
                } else {
                    let mean = pairs
                        .iter()
                        .map(|(p, q)| (q.0 - p.0).hypot(q.1 - p.1))
                        .sum::<f32>()
                        / pairs.len() as f32;
                    self.last_displacement = Some(mean);
                    self.points = pairs.into_iter().map(|(_, q)| q).collect();
                    self.movement.push(mean);
                    self.average_movement().unwrap_or(mean) < self.config.steady_threshold_px
                }
            }
            (Some(face), _) => {
                self.points = self.good_features(gray, face);
                self.movement.clear();
                debug!("Seeded {} corners in {:?}", self.points.len(), face);
                false
            }
        };

        self.previous = Some(pyramid);
        self.steady = steady;
        steady
    }

    /// Shi-Tomasi corners inside `region`, strongest first, spaced by `min_distance`
    fn good_features(&self, gray: &GrayImage, region: Rect) -> Vec<(f32, f32)> {
        let (w, h) = gray.dimensions();
        let gx = horizontal_sobel(gray);
        let gy = vertical_sobel(gray);
        let half = self.config.block_size / 2;

        let mut response = Array2::<f32>::zeros((region.h as usize, region.w as usize));
        for ry in 0..region.h {
            for rx in 0..region.w {
                let (cx, cy) = (region.x + rx, region.y + ry);
                if cx < half || cy < half || cx + half >= w || cy + half >= h {
                    continue;
                }
                let (mut a, mut b, mut c) = (0.0f32, 0.0f32, 0.0f32);
                for y in (cy - half)..=(cy + half) {
                    for x in (cx - half)..=(cx + half) {
                        let ix = gx.get_pixel(x, y).0[0] as f32;
                        let iy = gy.get_pixel(x, y).0[0] as f32;
                        a += ix * ix;
                        b += ix * iy;
                        c += iy * iy;
                    }
                }
                response[[ry as usize, rx as usize]] = min_eigenvalue(a, b, c);
            }
        }

        let strongest = response.iter().copied().fold(0.0f32, f32::max);
        if strongest <= 0.0 {
            return Vec::new();
        }
        let threshold = strongest * self.config.quality_level;

        // Local maxima above the quality threshold
        let (rh, rw) = response.dim();
        let mut candidates: Vec<(f32, usize, usize)> = Vec::new();
        for y in 0..rh {
            for x in 0..rw {
                let v = response[[y, x]];
                if v < threshold {
                    continue;
                }
                let is_peak = (y.saturating_sub(1)..=(y + 1).min(rh - 1)).all(|ny| {
                    (x.saturating_sub(1)..=(x + 1).min(rw - 1)).all(|nx| response[[ny, nx]] <= v)
                });
                if is_peak {
                    candidates.push((v, x, y));
                }
            }
        }
        candidates.sort_by(|a, b| b.0.total_cmp(&a.0).then(a.2.cmp(&b.2)).then(a.1.cmp(&b.1)));

        let min_dist_sq = self.config.min_distance * self.config.min_distance;
        let mut corners: Vec<(f32, f32)> = Vec::with_capacity(self.config.max_corners);
        for (_, x, y) in candidates {
            if corners.len() >= self.config.max_corners {
                break;
            }
            let p = ((region.x as usize + x) as f32, (region.y as usize + y) as f32);
            if corners
                .iter()
                .all(|q| (p.0 - q.0).powi(2) + (p.1 - q.1).powi(2) >= min_dist_sq)
            {
                corners.push(p);
            }
        }
        corners
    }

    /// Pyramidal Lucas-Kanade for one point, coarse to fine
    fn track_point(&self, prev: &[Level], next: &[Level], p: (f32, f32)) -> Option<(f32, f32)> {
        let half = (self.config.win_size / 2) as i32;
        let levels = prev.len().min(next.len());
        let mut guess = (0.0f32, 0.0f32);

        for level in (0..levels).rev() {
            let scale = (1u32 << level) as f32;
            let (px, py) = (p.0 / scale, p.1 / scale);
            let (pl, nl) = (&prev[level], &next[level]);

            let (mut gxx, mut gxy, mut gyy) = (0.0f32, 0.0f32, 0.0f32);
            let mut window = Vec::with_capacity(((2 * half + 1) * (2 * half + 1)) as usize);
            for dy in -half..=half {
                for dx in -half..=half {
                    let (x, y) = (px + dx as f32, py + dy as f32);
                    let ix = sample(&pl.gx, x, y);
                    let iy = sample(&pl.gy, x, y);
                    gxx += ix * ix;
                    gxy += ix * iy;
                    gyy += iy * iy;
                    window.push((x, y, sample(&pl.image, x, y), ix, iy));
                }
            }

            let det = gxx * gyy - gxy * gxy;
            if det.abs() <= f32::EPSILON
                || min_eigenvalue(gxx, gxy, gyy) / (window.len() as f32) < MIN_EIGENVALUE
            {
                return None;
            }

            let mut v = (0.0f32, 0.0f32);
            for _ in 0..self.config.max_iterations {
                let (mut bx, mut by) = (0.0f32, 0.0f32);
                for &(x, y, i, ix, iy) in &window {
                    let diff = i - sample(&nl.image, x + guess.0 + v.0, y + guess.1 + v.1);
                    bx += diff * ix;
                    by += diff * iy;
                }
                let eta = ((gyy * bx - gxy * by) / det, (gxx * by - gxy * bx) / det);
                v = (v.0 + eta.0, v.1 + eta.1);
                if eta.0.hypot(eta.1) < self.config.epsilon {
                    break;
                }
            }

            guess = if level > 0 {
                (2.0 * (guess.0 + v.0), 2.0 * (guess.1 + v.1))
            } else {
                (guess.0 + v.0, guess.1 + v.1)
            };
        }

        let q = (p.0 + guess.0, p.1 + guess.1);
        let (h, w) = next[0].image.dim();
        let inside = q.0.is_finite()
            && q.1.is_finite()
            && q.0 >= 0.0
            && q.1 >= 0.0
            && q.0 < w as f32
            && q.1 < h as f32;
        inside.then_some(q)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn checkerboard(size: u32, cell: u32, shift: u32) -> GrayImage {
        GrayImage::from_fn(size, size, |x, y| {
            let on = (((x + shift) / cell) + (y / cell)) % 2 == 0;
            Luma([if on { 40 } else { 210 }])
        })
    }

    #[test]
    fn test_first_frame_seeds_but_is_not_steady() {
        let mut tracker = MotionTracker::new(MotionConfig::default());
        let frame = checkerboard(96, 8, 0);
        assert!(!tracker.update(&frame, Some(Rect::new(16, 16, 64, 64))));
        assert!(tracker.tracked_points() >= 5);
        assert!(tracker.tracked_points() <= 50);
    }

    #[test]
    fn test_identical_frames_are_steady() {
        let mut tracker = MotionTracker::new(MotionConfig::default());
        let frame = checkerboard(96, 8, 0);
        let face = Some(Rect::new(16, 16, 64, 64));
        tracker.update(&frame, face);
        assert!(tracker.update(&frame, face));
        assert!(tracker.last_displacement().unwrap() < 0.01);
        assert!(tracker.update(&frame, face));
    }

    #[test]
    fn test_motion_is_not_steady() {
        let mut tracker = MotionTracker::new(MotionConfig::default());
        let face = Some(Rect::new(16, 16, 64, 64));
        tracker.update(&checkerboard(96, 8, 0), face);
        assert!(!tracker.update(&checkerboard(96, 8, 3), face));

        // Without a window a single one-pixel jolt already counts
        let mut tracker = MotionTracker::new(MotionConfig::default());
        tracker.update(&checkerboard(96, 8, 0), face);
        assert!(tracker.update(&checkerboard(96, 8, 0), face));
        assert!(!tracker.update(&checkerboard(96, 8, 1), face));
    }

    #[test]
    fn test_movement_window_absorbs_single_spike() {
        let config = MotionConfig {
            movement_window: 4,
            ..Default::default()
        };
        let mut tracker = MotionTracker::new(config);
        let face = Some(Rect::new(16, 16, 64, 64));
        let still = checkerboard(96, 8, 0);
        tracker.update(&still, face);
        for _ in 0..3 {
            assert!(tracker.update(&still, face));
        }

        // One jolt among three still frames stays under the threshold
        assert!(tracker.update(&checkerboard(96, 8, 1), face));
        assert!(tracker.last_displacement().unwrap() > 0.6);
        assert!(tracker.average_movement().unwrap() < 0.6);

        // Sustained motion fills the window and breaks steadiness
        for shift in 2..=4 {
            tracker.update(&checkerboard(96, 8, shift), face);
        }
        assert!(!tracker.update(&checkerboard(96, 8, 5), face));

        tracker.reset();
        assert_eq!(tracker.average_movement(), None);
    }

    #[test]
    fn test_absent_face_is_never_steady() {
        let mut tracker = MotionTracker::new(MotionConfig::default());
        let frame = checkerboard(96, 8, 0);
        let face = Some(Rect::new(16, 16, 64, 64));
        tracker.update(&frame, face);
        assert!(tracker.update(&frame, face));

        assert!(!tracker.update(&frame, None));
        assert_eq!(tracker.tracked_points(), 0);
        // Face back: re-seed first, steady again one frame later
        assert!(!tracker.update(&frame, face));
        assert!(tracker.update(&frame, face));
    }

    #[test]
    fn test_flat_region_has_no_corners() {
        let mut tracker = MotionTracker::new(MotionConfig::default());
        let flat = GrayImage::from_pixel(64, 64, Luma([128]));
        let face = Some(Rect::new(8, 8, 48, 48));
        assert!(!tracker.update(&flat, face));
        assert_eq!(tracker.tracked_points(), 0);
        assert!(!tracker.update(&flat, face));
    }

    #[test]
    fn test_resolution_change_reseeds() {
        let mut tracker = MotionTracker::new(MotionConfig::default());
        let face = Some(Rect::new(16, 16, 64, 64));
        tracker.update(&checkerboard(96, 8, 0), face);
        assert!(!tracker.update(&checkerboard(128, 8, 0), face));
        assert!(tracker.update(&checkerboard(128, 8, 0), face));
    }

    #[test]
    fn test_min_eigenvalue() {
        assert_eq!(min_eigenvalue(4.0, 0.0, 9.0), 4.0);
        assert!(min_eigenvalue(1.0, 1.0, 1.0).abs() < 1e-6);
    }
}

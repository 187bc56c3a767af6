//! Haar cascade classifier (Viola-Jones)
//!
//! Models load from OpenCV's `haarcascade_*.xml` files or from a JSON
//! rendering of the same structure: a base window size, and stages of
//! depth-1 trees over weighted rectangle features. Feature responses are
//! normalised by the standard deviation of the window inset by one base
//! pixel, matching OpenCV, so detection tolerates global brightness changes.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use image::GrayImage;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::CascadeParams;
use crate::detector::Rect;
use crate::EngagementError;

/// Overlap tolerance used when grouping raw hits
const GROUP_EPS: f32 = 0.2;

/// Weighted rectangle in base-window coordinates
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FeatureRect {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
    pub weight: f32,
}

/// Depth-1 decision tree over one Haar-like feature
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeakClassifier {
    pub rects: Vec<FeatureRect>,
    pub threshold: f32,
    pub left: f32,
    pub right: f32,
}

/// Boosted stage; the window is rejected when the leaf sum falls below `threshold`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CascadeStage {
    pub threshold: f32,
    pub classifiers: Vec<WeakClassifier>,
}

/// Haar cascade classifier
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HaarCascade {
    /// Base window size (width, height)
    pub window: (u32, u32),
    pub stages: Vec<CascadeStage>,
}

/// Summed-area tables of intensity and squared intensity
pub struct IntegralImage {
    width: usize,
    height: usize,
    sum: Vec<u64>,
    sq_sum: Vec<u64>,
}

impl IntegralImage {
    pub fn new(image: &GrayImage) -> Self {
        let (w, h) = image.dimensions();
        let (w, h) = (w as usize, h as usize);
        let stride = w + 1;
        let mut sum = vec![0u64; stride * (h + 1)];
        let mut sq_sum = vec![0u64; stride * (h + 1)];
        let raw = image.as_raw();

        for y in 0..h {
            let mut row = 0u64;
            let mut row_sq = 0u64;
            for x in 0..w {
                let v = raw[y * w + x] as u64;
                row += v;
                row_sq += v * v;
                let idx = (y + 1) * stride + (x + 1);
                sum[idx] = sum[idx - stride] + row;
                sq_sum[idx] = sq_sum[idx - stride] + row_sq;
            }
        }

        Self {
            width: w,
            height: h,
            sum,
            sq_sum,
        }
    }

    fn table_sum(table: &[u64], stride: usize, x: u32, y: u32, w: u32, h: u32) -> u64 {
        let (x0, y0) = (x as usize, y as usize);
        let (x1, y1) = (x0 + w as usize, y0 + h as usize);
        table[y1 * stride + x1] + table[y0 * stride + x0]
            - table[y1 * stride + x0]
            - table[y0 * stride + x1]
    }

    /// Sum of pixel values in the rectangle
    pub fn rect_sum(&self, x: u32, y: u32, w: u32, h: u32) -> u64 {
        Self::table_sum(&self.sum, self.width + 1, x, y, w, h)
    }

    /// (mean, standard deviation) of the rectangle
    pub fn mean_std(&self, x: u32, y: u32, w: u32, h: u32) -> (f32, f32) {
        let area = (w as f64) * (h as f64);
        if area == 0.0 {
            return (0.0, 0.0);
        }
        let s = self.rect_sum(x, y, w, h) as f64;
        let sq = Self::table_sum(&self.sq_sum, self.width + 1, x, y, w, h) as f64;
        let mean = s / area;
        let variance = (sq / area - mean * mean).max(0.0);
        (mean as f32, variance.sqrt() as f32)
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width as u32, self.height as u32)
    }
}

impl HaarCascade {
    /// Load a cascade file; `.xml` is read as an OpenCV cascade, anything
    /// else as the JSON rendering
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, EngagementError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| EngagementError::ModelLoad(format!("{}: {}", path.display(), e)))?;
        let is_xml = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("xml"));
        let parsed = if is_xml {
            Self::from_opencv_xml_str(&text)
        } else {
            Self::from_json_str(&text)
        };
        let cascade = parsed.map_err(|e| EngagementError::ModelLoad(format!("{}: {}", path.display(), e)))?;
        info!(
            "Loaded cascade {} ({} stages, {}x{} window)",
            path.display(),
            cascade.stages.len(),
            cascade.window.0,
            cascade.window.1
        );
        Ok(cascade)
    }

    /// Parse and validate a cascade from JSON text
    pub fn from_json_str(text: &str) -> Result<Self, EngagementError> {
        let cascade: HaarCascade =
            serde_json::from_str(text).map_err(|e| EngagementError::ModelLoad(e.to_string()))?;
        cascade.validate()?;
        Ok(cascade)
    }

    /// Parse an OpenCV `opencv-cascade-classifier` document. Only boosted
    /// HAAR cascades of single-split trees over upright features load.
    pub fn from_opencv_xml_str(text: &str) -> Result<Self, EngagementError> {
        let doc = roxmltree::Document::parse(text).map_err(xml_error)?;
        let cascade = child(doc.root_element(), "cascade")?;
        if cascade.attribute("type_id") == Some("opencv-haar-classifier") {
            return Err(xml_error("old-style opencv-haar-classifier files are not supported"));
        }
        for (tag, expected) in [("stageType", "BOOST"), ("featureType", "HAAR")] {
            let found = child(cascade, tag)?.text().unwrap_or("").trim();
            if found != expected {
                return Err(xml_error(format!("<{tag}> is {found:?}, expected {expected}")));
            }
        }
        let width: u32 = number(cascade, "width")?;
        let height: u32 = number(cascade, "height")?;

        let features = entries(child(cascade, "features")?)
            .map(parse_feature)
            .collect::<Result<Vec<_>, _>>()?;
        let stages = entries(child(cascade, "stages")?)
            .enumerate()
            .map(|(index, stage)| parse_stage(index, stage, &features))
            .collect::<Result<Vec<_>, _>>()?;

        if let Ok(declared) = number::<usize>(cascade, "stageNum") {
            if declared != stages.len() {
                return Err(xml_error(format!("<stageNum> is {declared} but {} stages follow", stages.len())));
            }
        }

        let cascade = HaarCascade {
            window: (width, height),
            stages,
        };
        cascade.validate()?;
        Ok(cascade)
    }

    fn validate(&self) -> Result<(), EngagementError> {
        let (ww, wh) = self.window;
        if ww == 0 || wh == 0 {
            return Err(EngagementError::ModelLoad("cascade window must be non-empty".into()));
        }
        if self.stages.is_empty() {
            return Err(EngagementError::ModelLoad("cascade has no stages".into()));
        }
        for (s, stage) in self.stages.iter().enumerate() {
            for classifier in &stage.classifiers {
                for r in &classifier.rects {
                    if r.w == 0 || r.h == 0 || r.x + r.w > ww || r.y + r.h > wh {
                        return Err(EngagementError::ModelLoad(format!(
                            "stage {s}: feature rect empty or outside {ww}x{wh} window"
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    /// Evaluate every stage on one window; true when all stages pass
    fn evaluate_window(&self, integral: &IntegralImage, x: u32, y: u32, scale: f32, win: (u32, u32)) -> bool {
        let inset = (scale.round() as u32).max(1);
        let (nx, ny, nw, nh) = if win.0 > 2 * inset && win.1 > 2 * inset {
            (x + inset, y + inset, win.0 - 2 * inset, win.1 - 2 * inset)
        } else {
            (x, y, win.0, win.1)
        };
        let (_, std) = integral.mean_std(nx, ny, nw, nh);
        // area * std; a flat region leaves the raw response unscaled
        let spread = std * (nw * nh) as f32;
        let norm = if spread > 0.0 { spread } else { 1.0 };

        for stage in &self.stages {
            let mut stage_sum = 0.0f32;
            for classifier in &stage.classifiers {
                let mut response = 0.0f32;
                for r in &classifier.rects {
                    let rx = x + (r.x as f32 * scale) as u32;
                    let ry = y + (r.y as f32 * scale) as u32;
                    let rw = ((r.w as f32 * scale) as u32).max(1);
                    let rh = ((r.h as f32 * scale) as u32).max(1);
                    response += integral.rect_sum(rx, ry, rw, rh) as f32 * r.weight;
                }
                let response = response / norm;
                stage_sum += if response < classifier.threshold {
                    classifier.left
                } else {
                    classifier.right
                };
            }
            if stage_sum < stage.threshold {
                return false;
            }
        }
        true
    }

    /// Raw sliding-window hits over all scales
    pub fn scan(&self, integral: &IntegralImage, params: &CascadeParams) -> Vec<Rect> {
        let (img_w, img_h) = integral.dimensions();
        let (base_w, base_h) = self.window;
        let mut hits = Vec::new();

        let min_scale = (params.min_size as f32 / base_w.min(base_h) as f32).max(1.0);
        let mut scale = min_scale;
        loop {
            let win_w = (base_w as f32 * scale).round() as u32;
            let win_h = (base_h as f32 * scale).round() as u32;
            if win_w > img_w || win_h > img_h {
                break;
            }
            let step = if scale < 2.0 { 1 } else { (scale / 2.0).round().max(1.0) as usize };

            for y in (0..=(img_h - win_h)).step_by(step) {
                for x in (0..=(img_w - win_w)).step_by(step) {
                    if self.evaluate_window(integral, x, y, scale, (win_w, win_h)) {
                        hits.push(Rect::new(x, y, win_w, win_h));
                    }
                }
            }
            scale *= params.scale_factor;
        }
        debug!("Cascade scan: {} raw hits", hits.len());
        hits
    }

    /// Multi-scale detection with neighbour grouping
    pub fn detect(&self, image: &GrayImage, params: &CascadeParams) -> Vec<Rect> {
        let integral = IntegralImage::new(image);
        let hits = self.scan(&integral, params);
        group_rectangles(&hits, params.min_neighbors)
    }
}

type XmlNode<'a, 'input> = roxmltree::Node<'a, 'input>;

fn xml_error(message: impl fmt::Display) -> EngagementError {
    EngagementError::ModelLoad(format!("cascade xml: {message}"))
}

fn child<'a, 'input>(node: XmlNode<'a, 'input>, tag: &str) -> Result<XmlNode<'a, 'input>, EngagementError> {
    node.children()
        .find(|n| n.has_tag_name(tag))
        .ok_or_else(|| xml_error(format!("<{}> has no <{tag}>", node.tag_name().name())))
}

/// Items of an OpenCV sequence, each written as `<_>`
fn entries<'a, 'input>(node: XmlNode<'a, 'input>) -> impl Iterator<Item = XmlNode<'a, 'input>> {
    node.children().filter(|n| n.has_tag_name("_"))
}

fn numbers<T: FromStr>(node: XmlNode<'_, '_>) -> Result<Vec<T>, EngagementError> {
    node.text()
        .unwrap_or("")
        .split_whitespace()
        .map(|token| {
            token
                .parse()
                .map_err(|_| xml_error(format!("bad number {token:?} in <{}>", node.tag_name().name())))
        })
        .collect()
}

fn number<T: FromStr>(node: XmlNode<'_, '_>, tag: &str) -> Result<T, EngagementError> {
    let mut values = numbers(child(node, tag)?)?.into_iter();
    match (values.next(), values.next()) {
        (Some(value), None) => Ok(value),
        _ => Err(xml_error(format!("<{tag}> must hold exactly one number"))),
    }
}

fn parse_feature(node: XmlNode<'_, '_>) -> Result<Vec<FeatureRect>, EngagementError> {
    if let Ok(tilted) = child(node, "tilted") {
        if numbers::<u32>(tilted)?.iter().any(|&t| t != 0) {
            return Err(xml_error("tilted features are not supported"));
        }
    }
    entries(child(node, "rects")?)
        .map(|rect| match *numbers::<f32>(rect)?.as_slice() {
            [x, y, w, h, weight] if [x, y, w, h].iter().all(|c| *c >= 0.0 && c.fract() == 0.0) => Ok(FeatureRect {
                x: x as u32,
                y: y as u32,
                w: w as u32,
                h: h as u32,
                weight,
            }),
            _ => Err(xml_error(format!("bad feature rect {:?}", rect.text().unwrap_or("").trim()))),
        })
        .collect()
}

fn parse_stage(index: usize, node: XmlNode<'_, '_>, features: &[Vec<FeatureRect>]) -> Result<CascadeStage, EngagementError> {
    let threshold = number(node, "stageThreshold")?;
    let classifiers = entries(child(node, "weakClassifiers")?)
        .map(|weak| {
            let split = numbers::<f32>(child(weak, "internalNodes")?)?;
            let leaves = numbers::<f32>(child(weak, "leafValues")?)?;
            match (split.as_slice(), leaves.as_slice()) {
                (&[_, _, feature, threshold], &[left, right]) => {
                    let rects = (feature >= 0.0)
                        .then(|| features.get(feature as usize))
                        .flatten()
                        .ok_or_else(|| xml_error(format!("stage {index}: feature {feature} out of range")))?;
                    Ok(WeakClassifier {
                        rects: rects.clone(),
                        threshold,
                        left,
                        right,
                    })
                }
                _ => Err(xml_error(format!(
                    "stage {index}: only single-split weak classifiers are supported"
                ))),
            }
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(CascadeStage { threshold, classifiers })
}

fn similar(a: &Rect, b: &Rect) -> bool {
    let delta = GROUP_EPS * (a.w.min(b.w) + a.h.min(b.h)) as f32 * 0.5;
    let close = |p: u32, q: u32| (p as f32 - q as f32).abs() <= delta;
    close(a.x, b.x) && close(a.y, b.y) && close(a.x + a.w, b.x + b.w) && close(a.y + a.h, b.y + b.h)
}

fn find(parent: &mut [usize], mut i: usize) -> usize {
    while parent[i] != i {
        parent[i] = parent[parent[i]];
        i = parent[i];
    }
    i
}

/// Cluster overlapping raw hits, keep clusters with more than `min_neighbors`
/// members, and drop clusters nested inside a stronger one.
pub fn group_rectangles(hits: &[Rect], min_neighbors: u32) -> Vec<Rect> {
    if min_neighbors == 0 || hits.is_empty() {
        return hits.to_vec();
    }

    let mut parent: Vec<usize> = (0..hits.len()).collect();
    for i in 0..hits.len() {
        for j in (i + 1)..hits.len() {
            if similar(&hits[i], &hits[j]) {
                let (ri, rj) = (find(&mut parent, i), find(&mut parent, j));
                if ri != rj {
                    parent[rj] = ri;
                }
            }
        }
    }

    // Per-cluster coordinate sums and vote counts
    let mut sums: Vec<[u64; 4]> = vec![[0; 4]; hits.len()];
    let mut votes = vec![0u32; hits.len()];
    for (i, r) in hits.iter().enumerate() {
        let root = find(&mut parent, i);
        sums[root][0] += r.x as u64;
        sums[root][1] += r.y as u64;
        sums[root][2] += r.w as u64;
        sums[root][3] += r.h as u64;
        votes[root] += 1;
    }

    let clusters: Vec<(Rect, u32)> = (0..hits.len())
        .filter(|&i| votes[i] > min_neighbors)
        .map(|i| {
            let n = votes[i] as u64;
            let avg = |s: u64| ((s + n / 2) / n) as u32;
            (
                Rect::new(avg(sums[i][0]), avg(sums[i][1]), avg(sums[i][2]), avg(sums[i][3])),
                votes[i],
            )
        })
        .collect();

    clusters
        .iter()
        .enumerate()
        .filter(|(i, (r, n))| {
            !clusters.iter().enumerate().any(|(j, (outer, m))| {
                if *i == j {
                    return false;
                }
                let dx = (outer.w as f32 * GROUP_EPS) as i64;
                let dy = (outer.h as f32 * GROUP_EPS) as i64;
                let nested = r.x as i64 >= outer.x as i64 - dx
                    && r.y as i64 >= outer.y as i64 - dy
                    && (r.x + r.w) as i64 <= (outer.x + outer.w) as i64 + dx
                    && (r.y + r.h) as i64 <= (outer.y + outer.h) as i64 + dy;
                nested && (*m > 3 || *m > *n) && r.area() < outer.area()
            })
        })
        .map(|(_, (r, _))| *r)
        .collect()
}

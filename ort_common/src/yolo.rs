//! YOLOv8 ONNX detector backed by ort.

use std::path::Path;
use std::time::Instant;

use anyhow::{Context, Result};
use image::RgbImage;
use image::imageops::{self, FilterType};
use inference_common::bbox::Bbox;
use inference_common::detection::RawDetection;
use inference_common::detector::Detector;
use ndarray::{Array4, CowArray};
use ort::session::Session;
use ort::session::builder::GraphOptimizationLevel;
use ort::value::TensorRef;

/// Candidates scoring below this never reach NMS. The operator-facing
/// confidence threshold is applied later by the detection adapter.
pub const MIN_CANDIDATE_SCORE: f32 = 0.25;

#[derive(Debug, Clone)]
pub struct YoloConfig {
    /// Square model input edge, in pixels.
    pub input_size: u32,
    pub nms_threshold: f32,
    pub min_candidate_score: f32,
}

impl Default for YoloConfig {
    fn default() -> Self {
        Self {
            input_size: 640,
            nms_threshold: 0.45,
            min_candidate_score: MIN_CANDIDATE_SCORE,
        }
    }
}

pub struct YoloDetector {
    session: Session,
    config: YoloConfig,
}

impl YoloDetector {
    /// Loads the model. The caller decides what a failure means; the
    /// surveillance server keeps running without a detector.
    pub fn load(model_path: &Path, config: YoloConfig) -> Result<Self> {
        if !model_path.exists() {
            anyhow::bail!("Model file not found: {model_path:?}");
        }

        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .commit_from_file(model_path)
            .with_context(|| format!("Failed to load model {model_path:?}"))?;
        log::debug!("{session:?}");
        log::info!(
            "Loaded yolo model {model_path:?} (input {}px, nms {:.2})",
            config.input_size,
            config.nms_threshold
        );

        Ok(Self { session, config })
    }
}

impl Detector for YoloDetector {
    fn detect(&mut self, image: &RgbImage) -> Result<Vec<RawDetection>> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Ok(Vec::new());
        }

        let start = Instant::now();
        let input_array = image_to_tensor(image, self.config.input_size);
        let preprocess = start.elapsed();

        let start = Instant::now();
        let input_array_dyn = CowArray::from(input_array).into_dyn();
        let input = ort::inputs![TensorRef::from_array_view(&input_array_dyn)?];
        let outputs = self.session.run(input)?;
        let (shape, output) = outputs[0].try_extract_tensor::<f32>()?;
        let dims: Vec<usize> = shape.iter().map(|&d| d.max(0) as usize).collect();
        let forward_pass = start.elapsed();

        let start = Instant::now();
        let scale_x = width as f32 / self.config.input_size as f32;
        let scale_y = height as f32 / self.config.input_size as f32;
        let candidates = decode_output(
            output,
            &dims,
            scale_x,
            scale_y,
            self.config.min_candidate_score,
        )?;
        drop(outputs);

        let detections = non_max_suppression(candidates, self.config.nms_threshold)
            .into_iter()
            .map(|det| RawDetection {
                bbox: det.bbox.clamp_to(width, height),
                ..det
            })
            .collect::<Vec<_>>();
        let postprocess = start.elapsed();

        log::debug!(
            "yolo: {} detections, preprocess {preprocess:?}, forward {forward_pass:?}, postprocess {postprocess:?}",
            detections.len()
        );
        Ok(detections)
    }
}

/// Resizes to `size` x `size` and converts to NCHW f32 in [0, 1].
pub fn image_to_tensor(image: &RgbImage, size: u32) -> Array4<f32> {
    let resized = imageops::resize(image, size, size, FilterType::Triangle);
    let mut array = Array4::<f32>::zeros((1, 3, size as usize, size as usize));

    for (x, y, pixel) in resized.enumerate_pixels() {
        let (x, y) = (x as usize, y as usize);
        array[[0, 0, y, x]] = pixel[0] as f32 / 255.0;
        array[[0, 1, y, x]] = pixel[1] as f32 / 255.0;
        array[[0, 2, y, x]] = pixel[2] as f32 / 255.0;
    }

    array
}

/// Decodes a YOLOv8 head output.
///
/// Accepts `[1, 4 + classes, anchors]` and the transposed
/// `[1, anchors, 4 + classes]` layout. Each anchor keeps its best class.
pub fn decode_output(
    data: &[f32],
    dims: &[usize],
    scale_x: f32,
    scale_y: f32,
    min_score: f32,
) -> Result<Vec<RawDetection>> {
    let &[batch, a, b] = dims else {
        anyhow::bail!("Unexpected yolo output rank: {dims:?}");
    };
    if batch != 1 || data.len() != a * b {
        anyhow::bail!("Unexpected yolo output shape {dims:?} for {} values", data.len());
    }

    // anchors outnumber attributes in every real export
    let transposed = a > b;
    let (attrs, anchors) = if transposed { (b, a) } else { (a, b) };
    if attrs < 5 {
        anyhow::bail!("Yolo output has no class scores: {dims:?}");
    }
    let value = |attr: usize, anchor: usize| {
        if transposed {
            data[anchor * attrs + attr]
        } else {
            data[attr * anchors + anchor]
        }
    };

    let mut detections = Vec::new();
    for anchor in 0..anchors {
        let (class_id, score) = (4..attrs)
            .map(|attr| (attr - 4, value(attr, anchor)))
            .fold((0, f32::MIN), |best, cur| if cur.1 > best.1 { cur } else { best });
        if score < min_score {
            continue;
        }

        let bbox = Bbox::from_center(
            value(0, anchor) * scale_x,
            value(1, anchor) * scale_y,
            value(2, anchor) * scale_x,
            value(3, anchor) * scale_y,
        );
        detections.push(RawDetection {
            bbox,
            confidence: score,
            class_id,
        });
    }

    Ok(detections)
}

/// Class-wise greedy NMS, highest confidence first.
pub fn non_max_suppression(mut detections: Vec<RawDetection>, iou_threshold: f32) -> Vec<RawDetection> {
    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut keep: Vec<RawDetection> = Vec::new();
    for det in detections {
        let suppressed = keep
            .iter()
            .any(|kept| kept.class_id == det.class_id && kept.bbox.iou(&det.bbox) >= iou_threshold);
        if !suppressed {
            keep.push(det);
        }
    }

    keep
}

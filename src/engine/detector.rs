//! SCRFD Face Detector
//!
//! Runs an InsightFace SCRFD model and returns boxes with 5-point landmarks in source
//! image coordinates.

use anyhow::{bail, Result};
use image::{DynamicImage, GenericImageView};
use openvino::{InferRequest, Tensor};
use tracing::debug;

use super::inference::{read_tensor_f32, run_single_input, SafeCompiledModel};
use super::preprocess::{preprocess_for_detection, ResizeInfo, DETECTOR_INPUT_SIZE};

/// Face detection result
#[derive(Debug, Clone)]
pub struct FaceBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub confidence: f32,
    pub landmarks: [(f32, f32); 5],
}

impl FaceBox {
    pub fn area(&self) -> f32 {
        (self.x2 - self.x1).max(0.0) * (self.y2 - self.y1).max(0.0)
    }

    fn iou(&self, other: &FaceBox) -> f32 {
        let x1 = self.x1.max(other.x1);
        let y1 = self.y1.max(other.y1);
        let x2 = self.x2.min(other.x2);
        let y2 = self.y2.min(other.y2);
        let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
        let union = self.area() + other.area() - intersection;
        if union > 0.0 {
            intersection / union
        } else {
            0.0
        }
    }
}

/// Output layout of an SCRFD export, derived from its output count
struct Layout {
    strides: &'static [i32],
    with_kps: bool,
    anchors_per_cell: usize,
}

impl Layout {
    fn from_output_count(count: usize) -> Result<Self> {
        const THREE: &[i32] = &[8, 16, 32];
        const FIVE: &[i32] = &[8, 16, 32, 64, 128];
        let (strides, with_kps, anchors_per_cell) = match count {
            6 => (THREE, false, 2),
            9 => (THREE, true, 2),
            10 => (FIVE, false, 1),
            15 => (FIVE, true, 1),
            other => bail!("unsupported SCRFD output count {}", other),
        };
        Ok(Self {
            strides,
            with_kps,
            anchors_per_cell,
        })
    }
}

/// SCRFD detector bound to one compiled model
pub struct FaceDetector<'a> {
    model: &'a SafeCompiledModel,
    confidence_threshold: f32,
    nms_threshold: f32,
}

impl<'a> FaceDetector<'a> {
    pub fn new(model: &'a SafeCompiledModel, confidence_threshold: f32) -> Self {
        Self {
            model,
            confidence_threshold,
            nms_threshold: 0.4,
        }
    }

    /// Detect faces, highest confidence first
    pub fn detect(&self, image: &DynamicImage) -> Result<Vec<FaceBox>> {
        let resize_info = ResizeInfo::new(image.dimensions(), DETECTOR_INPUT_SIZE);
        let input = preprocess_for_detection(image);
        let request = run_single_input(self.model, &input)?;

        let candidates = self.decode_outputs(&request, &resize_info)?;
        let faces = nms(candidates, self.nms_threshold);
        debug!("SCRFD kept {} faces after NMS", faces.len());
        Ok(faces)
    }

    fn decode_outputs(&self, request: &InferRequest, resize: &ResizeInfo) -> Result<Vec<FaceBox>> {
        let output_count = (0..20)
            .take_while(|&i| request.get_output_tensor_by_index(i).is_ok())
            .count();
        let layout = Layout::from_output_count(output_count)?;
        let fmc = layout.strides.len();
        let (input_w, input_h) = (DETECTOR_INPUT_SIZE.0 as i32, DETECTOR_INPUT_SIZE.1 as i32);

        let mut boxes = Vec::new();
        for (idx, &stride) in layout.strides.iter().enumerate() {
            let scores = read_output(request, idx)?;
            let bboxes = read_output(request, idx + fmc)?;
            let kps = if layout.with_kps {
                Some(read_output(request, idx + fmc * 2)?)
            } else {
                None
            };

            let stride_f = stride as f32;
            let (feat_w, feat_h) = (input_w / stride, input_h / stride);
            let centers = (0..feat_h)
                .flat_map(|y| (0..feat_w).map(move |x| (x as f32 * stride_f, y as f32 * stride_f)))
                .flat_map(|c| std::iter::repeat(c).take(layout.anchors_per_cell));

            for (i, (cx, cy)) in centers.enumerate() {
                let Some(&score) = scores.get(i) else { break };
                if score < self.confidence_threshold {
                    continue;
                }
                let Some(dist) = bboxes.get(i * 4..i * 4 + 4) else {
                    continue;
                };

                let (x1, y1) = resize.to_original(cx - dist[0] * stride_f, cy - dist[1] * stride_f);
                let (x2, y2) = resize.to_original(cx + dist[2] * stride_f, cy + dist[3] * stride_f);

                let mut landmarks = [(0.0f32, 0.0f32); 5];
                if let Some(points) = kps.as_ref().and_then(|k| k.get(i * 10..i * 10 + 10)) {
                    for (j, lm) in landmarks.iter_mut().enumerate() {
                        *lm = resize.to_original(
                            cx + points[j * 2] * stride_f,
                            cy + points[j * 2 + 1] * stride_f,
                        );
                    }
                }

                let (max_w, max_h) = (resize.original_width as f32, resize.original_height as f32);
                boxes.push(FaceBox {
                    x1: x1.clamp(0.0, max_w),
                    y1: y1.clamp(0.0, max_h),
                    x2: x2.clamp(0.0, max_w),
                    y2: y2.clamp(0.0, max_h),
                    confidence: score,
                    landmarks,
                });
            }
        }

        Ok(boxes)
    }
}

fn read_output(request: &InferRequest, index: usize) -> Result<Vec<f32>> {
    let tensor: Tensor = request.get_output_tensor_by_index(index)?;
    read_tensor_f32(&tensor)
}

/// Greedy non-maximum suppression; result is sorted by confidence
pub fn nms(mut boxes: Vec<FaceBox>, iou_threshold: f32) -> Vec<FaceBox> {
    boxes.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut keep: Vec<FaceBox> = Vec::with_capacity(boxes.len());
    for candidate in boxes {
        if keep.iter().all(|kept| kept.iou(&candidate) <= iou_threshold) {
            keep.push(candidate);
        }
    }
    keep
}

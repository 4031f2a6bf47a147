//! Image preprocessing for detection and embedding

use image::{DynamicImage, GenericImageView, ImageBuffer, Rgb};
use ndarray::Array4;

use super::models::Normalization;

/// SCRFD input size
pub const DETECTOR_INPUT_SIZE: (u32, u32) = (640, 640);

/// Side of the canonical aligned face the landmark template is defined on
const TEMPLATE_SIDE: f32 = 112.0;

/// ArcFace 5-point landmark template for a 112x112 crop:
/// left eye, right eye, nose, left mouth corner, right mouth corner
const LANDMARK_TEMPLATE: [(f32, f32); 5] = [
    (38.2946, 51.6963),
    (73.5318, 51.5014),
    (56.0252, 71.7366),
    (41.5493, 92.3655),
    (70.7299, 92.2041),
];

/// VGG-Face training set channel means, BGR
const VGG_MEAN_BGR: [f32; 3] = [93.5940, 104.7624, 129.1863];

/// Letterbox an image into the detector input and convert it to NCHW
pub fn preprocess_for_detection(image: &DynamicImage) -> Array4<f32> {
    let (target_w, target_h) = DETECTOR_INPUT_SIZE;
    let padded = resize_with_padding(image, target_w, target_h);
    image_to_nchw(&padded, Normalization::InsightFace)
}

/// Resize a face crop to the model input and convert it to NCHW
pub fn preprocess_for_embedding(
    face: &DynamicImage,
    input_size: (u32, u32),
    normalization: Normalization,
) -> Array4<f32> {
    let (w, h) = input_size;
    let resized = if face.dimensions() == input_size {
        face.clone()
    } else {
        face.resize_exact(w, h, image::imageops::FilterType::Lanczos3)
    };
    image_to_nchw(&resized, normalization)
}

fn resize_with_padding(image: &DynamicImage, target_w: u32, target_h: u32) -> DynamicImage {
    let info = ResizeInfo::new(image.dimensions(), (target_w, target_h));
    let (orig_w, orig_h) = image.dimensions();
    let new_w = ((orig_w as f32 * info.scale) as u32).max(1);
    let new_h = ((orig_h as f32 * info.scale) as u32).max(1);

    let resized = image
        .resize_exact(new_w, new_h, image::imageops::FilterType::Triangle)
        .to_rgb8();
    let mut canvas = ImageBuffer::from_pixel(target_w, target_h, Rgb([0u8, 0, 0]));
    image::imageops::overlay(&mut canvas, &resized, info.offset_x as i64, info.offset_y as i64);

    DynamicImage::ImageRgb8(canvas)
}

/// Convert an RGB image to a `1x3xHxW` tensor with the given normalization
pub fn image_to_nchw(image: &DynamicImage, normalization: Normalization) -> Array4<f32> {
    let rgb = image.to_rgb8();
    let (width, height) = rgb.dimensions();
    let mut tensor = Array4::<f32>::zeros((1, 3, height as usize, width as usize));

    for (x, y, pixel) in rgb.enumerate_pixels() {
        let [r, g, b] = pixel.0.map(f32::from);
        let (x, y) = (x as usize, y as usize);
        let channels = match normalization {
            Normalization::InsightFace => [
                (b - 127.5) / 128.0,
                (g - 127.5) / 128.0,
                (r - 127.5) / 128.0,
            ],
            Normalization::Standardize => [r, g, b],
            Normalization::VggMean => [
                b - VGG_MEAN_BGR[0],
                g - VGG_MEAN_BGR[1],
                r - VGG_MEAN_BGR[2],
            ],
        };
        for (c, value) in channels.into_iter().enumerate() {
            tensor[[0, c, y, x]] = value;
        }
    }

    if normalization == Normalization::Standardize {
        standardize(&mut tensor);
    }

    tensor
}

/// Zero mean, unit variance over the whole tensor (Facenet prewhitening)
fn standardize(tensor: &mut Array4<f32>) {
    let n = tensor.len().max(1) as f32;
    let mean = tensor.sum() / n;
    let variance = tensor.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / n;
    let std = variance.sqrt().max(1.0 / n.sqrt());
    tensor.mapv_inplace(|v| (v - mean) / std);
}

/// Intersect a box with the image as `(left, top, width, height)`
///
/// `None` when less than one whole pixel of the box lies inside the image.
pub fn clamp_box(bbox: (f32, f32, f32, f32), image_size: (u32, u32)) -> Option<(u32, u32, u32, u32)> {
    let (x1, y1, x2, y2) = bbox;
    if ![x1, y1, x2, y2].iter().all(|v| v.is_finite()) {
        return None;
    }
    let (img_w, img_h) = image_size;

    let left = x1.max(0.0) as u32;
    let top = y1.max(0.0) as u32;
    let right = x2.clamp(0.0, img_w as f32) as u32;
    let bottom = y2.clamp(0.0, img_h as f32) as u32;

    (right > left && bottom > top).then(|| (left, top, right - left, bottom - top))
}

/// Crop a face box with a relative margin on every side
pub fn crop_face(image: &DynamicImage, bbox: (f32, f32, f32, f32), margin: f32) -> Option<DynamicImage> {
    let (x1, y1, x2, y2) = bbox;
    let margin_x = (x2 - x1) * margin;
    let margin_y = (y2 - y1) * margin;

    let expanded = (x1 - margin_x, y1 - margin_y, x2 + margin_x, y2 + margin_y);
    let (left, top, width, height) = clamp_box(expanded, image.dimensions())?;
    Some(image.crop_imm(left, top, width, height))
}

/// Warp the face onto the landmark template scaled to `output_size`
pub fn align_face(
    image: &DynamicImage,
    landmarks: &[(f32, f32); 5],
    output_size: (u32, u32),
) -> DynamicImage {
    let (out_w, out_h) = output_size;
    let sx = out_w as f32 / TEMPLATE_SIDE;
    let sy = out_h as f32 / TEMPLATE_SIDE;
    let template = LANDMARK_TEMPLATE.map(|(x, y)| (x * sx, y * sy));

    let transform = estimate_similarity_transform(landmarks, &template);
    warp_affine(image, &transform, out_w, out_h)
}

/// Least-squares similarity transform (Umeyama) mapping `src` onto `dst`
fn estimate_similarity_transform(src: &[(f32, f32); 5], dst: &[(f32, f32); 5]) -> [[f32; 3]; 2] {
    let n = src.len() as f32;
    let centroid = |pts: &[(f32, f32); 5]| {
        let (sx, sy) = pts
            .iter()
            .fold((0.0f32, 0.0f32), |(ax, ay), &(x, y)| (ax + x, ay + y));
        (sx / n, sy / n)
    };
    let (src_cx, src_cy) = centroid(src);
    let (dst_cx, dst_cy) = centroid(dst);

    // Covariance of centered dst against centered src, plus src variance.
    let mut var_src = 0.0f32;
    let mut cov = [[0.0f32; 2]; 2];
    for ((sx, sy), (dx, dy)) in src.iter().zip(dst.iter()) {
        let (sx, sy) = (sx - src_cx, sy - src_cy);
        let (dx, dy) = (dx - dst_cx, dy - dst_cy);
        var_src += sx * sx + sy * sy;
        cov[0][0] += dx * sx;
        cov[0][1] += dx * sy;
        cov[1][0] += dy * sx;
        cov[1][1] += dy * sy;
    }
    var_src /= n;
    for row in cov.iter_mut() {
        for v in row.iter_mut() {
            *v /= n;
        }
    }

    // Closed-form 2x2 SVD.
    let [[a, b], [c, d]] = cov;
    let e = (a + d) / 2.0;
    let f = (a - d) / 2.0;
    let g = (c + b) / 2.0;
    let h = (c - b) / 2.0;
    let q = (e * e + h * h).sqrt();
    let r = (f * f + g * g).sqrt();
    let (s1, s2) = (q + r, (q - r).abs());
    let a1 = h.atan2(e);
    let a2 = g.atan2(f);
    let theta = (a2 - a1) / 2.0;
    let phi = (a2 + a1) / 2.0;

    // Reflections are folded back into a proper rotation.
    let reflect = a * d - b * c < 0.0;
    let (r00, r01, r10, r11, trace) = if reflect {
        let angle = phi + theta;
        (angle.cos(), angle.sin(), angle.sin(), -angle.cos(), s1 - s2)
    } else {
        let angle = phi - theta;
        (angle.cos(), -angle.sin(), angle.sin(), angle.cos(), s1 + s2)
    };

    let scale = if var_src > 1e-10 { trace / var_src } else { 1.0 };
    let tx = dst_cx - scale * (r00 * src_cx + r01 * src_cy);
    let ty = dst_cy - scale * (r10 * src_cx + r11 * src_cy);

    [
        [scale * r00, scale * r01, tx],
        [scale * r10, scale * r11, ty],
    ]
}

/// Backward-mapped affine warp with bilinear sampling; pixels outside the source stay black
fn warp_affine(image: &DynamicImage, m: &[[f32; 3]; 2], out_w: u32, out_h: u32) -> DynamicImage {
    let rgb = image.to_rgb8();
    let (src_w, src_h) = rgb.dimensions();
    let mut output = ImageBuffer::from_pixel(out_w, out_h, Rgb([0u8, 0, 0]));

    let det = m[0][0] * m[1][1] - m[0][1] * m[1][0];
    if det.abs() < f32::EPSILON || src_w < 2 || src_h < 2 {
        return DynamicImage::ImageRgb8(output);
    }
    let inv = [[m[1][1] / det, -m[0][1] / det], [-m[1][0] / det, m[0][0] / det]];

    for (x, y, out) in output.enumerate_pixels_mut() {
        let dx = x as f32 - m[0][2];
        let dy = y as f32 - m[1][2];
        let src_x = inv[0][0] * dx + inv[0][1] * dy;
        let src_y = inv[1][0] * dx + inv[1][1] * dy;

        if src_x < 0.0 || src_y < 0.0 || src_x >= (src_w - 1) as f32 || src_y >= (src_h - 1) as f32 {
            continue;
        }

        let (x0, y0) = (src_x as u32, src_y as u32);
        let (fx, fy) = (src_x - x0 as f32, src_y - y0 as f32);
        let p00 = rgb.get_pixel(x0, y0);
        let p10 = rgb.get_pixel(x0 + 1, y0);
        let p01 = rgb.get_pixel(x0, y0 + 1);
        let p11 = rgb.get_pixel(x0 + 1, y0 + 1);

        for c in 0..3 {
            let v = p00[c] as f32 * (1.0 - fx) * (1.0 - fy)
                + p10[c] as f32 * fx * (1.0 - fy)
                + p01[c] as f32 * (1.0 - fx) * fy
                + p11[c] as f32 * fx * fy;
            out[c] = v.clamp(0.0, 255.0) as u8;
        }
    }

    DynamicImage::ImageRgb8(output)
}

/// Letterbox geometry, used to map detections back to the source image
pub struct ResizeInfo {
    pub scale: f32,
    pub offset_x: u32,
    pub offset_y: u32,
    pub original_width: u32,
    pub original_height: u32,
}

impl ResizeInfo {
    pub fn new(original: (u32, u32), target: (u32, u32)) -> Self {
        let (orig_w, orig_h) = (original.0.max(1), original.1.max(1));
        let (target_w, target_h) = target;
        let scale = f32::min(
            target_w as f32 / orig_w as f32,
            target_h as f32 / orig_h as f32,
        );
        let new_w = ((orig_w as f32 * scale) as u32).min(target_w);
        let new_h = ((orig_h as f32 * scale) as u32).min(target_h);

        Self {
            scale,
            offset_x: (target_w - new_w) / 2,
            offset_y: (target_h - new_h) / 2,
            original_width: orig_w,
            original_height: orig_h,
        }
    }

    pub fn to_original(&self, x: f32, y: f32) -> (f32, f32) {
        (
            (x - self.offset_x as f32) / self.scale,
            (y - self.offset_y as f32) / self.scale,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resize_info_round_trip() {
        let info = ResizeInfo::new((1280, 640), DETECTOR_INPUT_SIZE);
        assert!((info.scale - 0.5).abs() < 1e-6);
        assert_eq!(info.offset_x, 0);
        assert_eq!(info.offset_y, 160);
        let (x, y) = info.to_original(320.0, 320.0);
        assert!((x - 640.0).abs() < 1e-3);
        assert!((y - 320.0).abs() < 1e-3);
    }

    #[test]
    fn test_template_maps_onto_itself() {
        let m = estimate_similarity_transform(&LANDMARK_TEMPLATE, &LANDMARK_TEMPLATE);
        assert!((m[0][0] - 1.0).abs() < 1e-3);
        assert!((m[1][1] - 1.0).abs() < 1e-3);
        assert!(m[0][1].abs() < 1e-3);
        assert!(m[0][2].abs() < 1e-2);
        assert!(m[1][2].abs() < 1e-2);
    }

    #[test]
    fn test_scaled_landmarks_recover_scale() {
        let src = LANDMARK_TEMPLATE.map(|(x, y)| (x * 2.0 + 10.0, y * 2.0 + 5.0));
        let m = estimate_similarity_transform(&src, &LANDMARK_TEMPLATE);
        assert!((m[0][0] - 0.5).abs() < 1e-3);
        assert!((m[1][1] - 0.5).abs() < 1e-3);
    }

    #[test]
    fn test_align_face_output_size() {
        let image = DynamicImage::new_rgb8(300, 300);
        let aligned = align_face(&image, &LANDMARK_TEMPLATE, (160, 160));
        assert_eq!(aligned.dimensions(), (160, 160));
    }

    #[test]
    fn test_crop_face_clamps_to_image() {
        let image = DynamicImage::new_rgb8(100, 80);
        let crop = crop_face(&image, (-10.0, 10.0, 120.0, 70.0), 0.1).unwrap();
        assert_eq!(crop.dimensions(), (100, 72));
    }

    #[test]
    fn test_box_outside_image_is_rejected() {
        // Right edge: clamping leaves nothing to crop.
        assert_eq!(clamp_box((100.0, 10.0, 140.0, 50.0), (100, 80)), None);
        assert_eq!(clamp_box((10.0, 80.0, 50.0, 95.0), (100, 80)), None);
        assert_eq!(clamp_box((-30.0, -30.0, -1.0, 20.0), (100, 80)), None);
        assert_eq!(clamp_box((20.0, 20.0, 20.0, 40.0), (100, 80)), None);
        assert_eq!(clamp_box((f32::NAN, 0.0, 10.0, 10.0), (100, 80)), None);
        assert_eq!(clamp_box((99.0, 79.0, 130.0, 90.0), (100, 80)), Some((99, 79, 1, 1)));

        let image = DynamicImage::new_rgb8(100, 80);
        assert!(crop_face(&image, (100.0, 10.0, 140.0, 50.0), 0.0).is_none());
    }

    #[test]
    fn test_standardized_tensor_has_zero_mean() {
        let mut image = image::RgbImage::new(4, 4);
        for (x, _, p) in image.enumerate_pixels_mut() {
            *p = Rgb([(x * 60) as u8, 10, 200]);
        }
        let tensor = image_to_nchw(&DynamicImage::ImageRgb8(image), Normalization::Standardize);
        let mean = tensor.sum() / tensor.len() as f32;
        assert!(mean.abs() < 1e-4);
    }

    #[test]
    fn test_detection_tensor_shape() {
        let image = DynamicImage::new_rgb8(320, 200);
        let tensor = preprocess_for_detection(&image);
        assert_eq!(tensor.shape(), &[1, 3, 640, 640]);
    }
}

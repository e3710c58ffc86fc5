//! Composite face quality scoring from detector geometry, pose and sharpness.
//!
//! The score predicts how reliable a detection is for matching: sharp,
//! frontal, well-sized faces score high. Assessments are derived on demand
//! and never persisted.

use image::imageops;
use image::GrayImage;
use serde::Serialize;

use crate::detection::{FaceDetection, PoseAngles};

// Weighting of the composite score. Empirically tuned against enrollment
// acceptance rates, not formally derived.
const WEIGHT_CONFIDENCE: f32 = 0.30;
const WEIGHT_POSE: f32 = 0.25;
const WEIGHT_SHARPNESS: f32 = 0.25;
const WEIGHT_SIZE: f32 = 0.20;

/// Laplacian-response variance of a sharp, well-lit face crop. Responses at
/// or above this scale count as fully sharp.
const LAPLACIAN_VARIANCE_SCALE: f32 = 1000.0;

/// Reference face area (200×200 px) at which the size score saturates.
const REFERENCE_FACE_AREA: f32 = 200.0 * 200.0;

// A face is considered frontal while all pose angles stay inside these
// absolute limits (degrees).
const FRONTAL_MAX_YAW: f32 = 30.0;
const FRONTAL_MAX_PITCH: f32 = 25.0;
const FRONTAL_MAX_ROLL: f32 = 20.0;

/// Derived quality of one detected face. All score fields live in [0,1].
#[derive(Debug, Clone, Serialize)]
pub struct QualityAssessment {
    /// Composite quality score in [0,1]; higher is better.
    pub score: f32,
    /// Blur level in [0,1]; 0 = sharp, 1 = blurry (or no usable crop).
    pub blur: f32,
    /// Pose angles passed through from the detector, when available.
    pub pose: Option<PoseAngles>,
    /// Face pixel area after clamping the box to the frame.
    pub face_area: u32,
    /// Whether the pose is close enough to frontal for reliable matching.
    pub frontal: bool,
}

/// Assess one detected face against its source image.
pub fn assess_quality(face: &FaceDetection, image: &image::RgbImage) -> QualityAssessment {
    let region = face.bbox.crop_from(image);

    let face_area = region
        .as_ref()
        .map(|r| r.width() * r.height())
        .unwrap_or(0);

    // Degenerate crops count as maximally blurry.
    let blur = match &region {
        Some(r) => blur_level(&imageops::grayscale(r)),
        None => 1.0,
    };

    let pose_penalty = face
        .pose
        .map(|p| ((p.yaw.abs() + p.pitch.abs() + p.roll.abs()) / 180.0).clamp(0.0, 1.0))
        .unwrap_or(0.0);

    // A detector that reports no pose is taken at face value as frontal.
    let frontal = face
        .pose
        .map(|p| {
            p.yaw.abs() < FRONTAL_MAX_YAW
                && p.pitch.abs() < FRONTAL_MAX_PITCH
                && p.roll.abs() < FRONTAL_MAX_ROLL
        })
        .unwrap_or(true);

    let size_score = (face_area as f32 / REFERENCE_FACE_AREA).min(1.0);
    let confidence = face.confidence.clamp(0.0, 1.0);

    let score = WEIGHT_CONFIDENCE * confidence
        + WEIGHT_POSE * (1.0 - pose_penalty)
        + WEIGHT_SHARPNESS * (1.0 - blur)
        + WEIGHT_SIZE * size_score;

    QualityAssessment {
        score: score.clamp(0.0, 1.0),
        blur,
        pose: face.pose,
        face_area,
        frontal,
    }
}

/// Pick the detection with the highest composite quality score, returning its
/// index and assessment. Ties keep the first-detected face.
pub fn select_best_face(
    faces: &[FaceDetection],
    image: &image::RgbImage,
) -> Option<(usize, QualityAssessment)> {
    let mut best: Option<(usize, QualityAssessment)> = None;
    for (index, face) in faces.iter().enumerate() {
        let assessment = assess_quality(face, image);
        let better = match &best {
            None => true,
            Some((_, current)) => assessment.score > current.score,
        };
        if better {
            best = Some((index, assessment));
        }
    }
    best
}

/// Sharpness proxy over the grayscale face region: variance of the discrete
/// Laplacian response, normalized and inverted so 0 = sharp, 1 = blurry.
fn blur_level(gray: &GrayImage) -> f32 {
    if gray.width() < 3 || gray.height() < 3 {
        return 1.0;
    }

    let response = imageproc::filter::laplacian_filter(gray);
    let count = response.len() as f64;
    let mean: f64 = response.iter().map(|&v| v as f64).sum::<f64>() / count;
    let variance: f64 = response
        .iter()
        .map(|&v| {
            let d = v as f64 - mean;
            d * d
        })
        .sum::<f64>()
        / count;

    let sharpness = (variance as f32 / LAPLACIAN_VARIANCE_SCALE).min(1.0);
    1.0 - sharpness
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::BoundingBox;
    use crate::embedding::Embedding;
    use image::{Rgb, RgbImage};

    fn face(bbox: BoundingBox, confidence: f32, pose: Option<PoseAngles>) -> FaceDetection {
        FaceDetection {
            bbox,
            confidence,
            pose,
            embedding: Embedding::new(vec![0.0; 4]),
        }
    }

    fn flat_image(w: u32, h: u32) -> RgbImage {
        RgbImage::from_pixel(w, h, Rgb([128, 128, 128]))
    }

    /// Alternating black/white pixels — maximal Laplacian response.
    fn checkerboard(w: u32, h: u32) -> RgbImage {
        RgbImage::from_fn(w, h, |x, y| {
            if (x + y) % 2 == 0 {
                Rgb([255, 255, 255])
            } else {
                Rgb([0, 0, 0])
            }
        })
    }

    #[test]
    fn score_stays_in_unit_interval() {
        let image = flat_image(64, 64);
        let f = face(
            BoundingBox {
                x1: 0.0,
                y1: 0.0,
                x2: 64.0,
                y2: 64.0,
            },
            1.5, // over-confident detector output gets clamped
            Some(PoseAngles {
                yaw: 5.0,
                pitch: 5.0,
                roll: 5.0,
            }),
        );
        let q = assess_quality(&f, &image);
        assert!((0.0..=1.0).contains(&q.score));
        assert!((0.0..=1.0).contains(&q.blur));
    }

    #[test]
    fn worst_case_face_scores_near_zero() {
        // Zero confidence, maximal pose deviation, flat (blurry) crop, no area.
        let image = flat_image(64, 64);
        let f = face(
            BoundingBox {
                x1: 10.0,
                y1: 10.0,
                x2: 10.0,
                y2: 10.0,
            },
            0.0,
            Some(PoseAngles {
                yaw: 90.0,
                pitch: 90.0,
                roll: 90.0,
            }),
        );
        let q = assess_quality(&f, &image);
        assert!(q.score < 0.01);
        assert_eq!(q.face_area, 0);
        assert_eq!(q.blur, 1.0);
    }

    #[test]
    fn degenerate_box_defaults_to_max_blur() {
        let image = flat_image(32, 32);
        let f = face(
            BoundingBox {
                x1: 5.0,
                y1: 5.0,
                x2: 5.0,
                y2: 20.0,
            },
            0.9,
            None,
        );
        let q = assess_quality(&f, &image);
        assert_eq!(q.blur, 1.0);
        assert_eq!(q.face_area, 0);
    }

    #[test]
    fn sharp_crop_beats_flat_crop() {
        let bbox = BoundingBox {
            x1: 0.0,
            y1: 0.0,
            x2: 48.0,
            y2: 48.0,
        };
        let sharp = assess_quality(&face(bbox, 0.9, None), &checkerboard(48, 48));
        let flat = assess_quality(&face(bbox, 0.9, None), &flat_image(48, 48));
        assert!(sharp.blur < flat.blur);
        assert!(sharp.score > flat.score);
    }

    #[test]
    fn frontal_flag_follows_pose_limits() {
        let image = flat_image(32, 32);
        let bbox = BoundingBox {
            x1: 0.0,
            y1: 0.0,
            x2: 32.0,
            y2: 32.0,
        };
        let frontal = assess_quality(
            &face(
                bbox,
                0.9,
                Some(PoseAngles {
                    yaw: 29.0,
                    pitch: 24.0,
                    roll: 19.0,
                }),
            ),
            &image,
        );
        assert!(frontal.frontal);

        let turned = assess_quality(
            &face(
                bbox,
                0.9,
                Some(PoseAngles {
                    yaw: 31.0,
                    pitch: 0.0,
                    roll: 0.0,
                }),
            ),
            &image,
        );
        assert!(!turned.frontal);
    }

    #[test]
    fn missing_pose_counts_as_frontal() {
        let image = flat_image(32, 32);
        let f = face(
            BoundingBox {
                x1: 0.0,
                y1: 0.0,
                x2: 32.0,
                y2: 32.0,
            },
            0.9,
            None,
        );
        let q = assess_quality(&f, &image);
        assert!(q.frontal);
    }

    #[test]
    fn size_score_saturates_at_reference_area() {
        // A 300×300 face must not score higher than a 200×200 one on size.
        let image = flat_image(400, 400);
        let large = face(
            BoundingBox {
                x1: 0.0,
                y1: 0.0,
                x2: 300.0,
                y2: 300.0,
            },
            0.5,
            None,
        );
        let reference = face(
            BoundingBox {
                x1: 0.0,
                y1: 0.0,
                x2: 200.0,
                y2: 200.0,
            },
            0.5,
            None,
        );
        let ql = assess_quality(&large, &image);
        let qr = assess_quality(&reference, &image);
        assert!((ql.score - qr.score).abs() < 1e-6);
    }

    #[test]
    fn best_face_prefers_higher_quality() {
        let image = checkerboard(64, 64);
        let weak = face(
            BoundingBox {
                x1: 0.0,
                y1: 0.0,
                x2: 8.0,
                y2: 8.0,
            },
            0.2,
            None,
        );
        let strong = face(
            BoundingBox {
                x1: 0.0,
                y1: 0.0,
                x2: 64.0,
                y2: 64.0,
            },
            0.95,
            None,
        );
        let (index, assessment) = select_best_face(&[weak, strong], &image).unwrap();
        assert_eq!(index, 1);
        assert!(assessment.score > 0.5);
    }

    #[test]
    fn best_face_tie_keeps_first_detected() {
        let image = checkerboard(64, 64);
        let bbox = BoundingBox {
            x1: 0.0,
            y1: 0.0,
            x2: 32.0,
            y2: 32.0,
        };
        let a = face(bbox, 0.8, None);
        let b = face(bbox, 0.8, None);
        let (index, _) = select_best_face(&[a, b], &image).unwrap();
        assert_eq!(index, 0);
    }

    #[test]
    fn no_faces_selects_nothing() {
        let image = flat_image(16, 16);
        assert!(select_best_face(&[], &image).is_none());
    }
}

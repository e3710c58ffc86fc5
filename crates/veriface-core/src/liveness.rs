//! Heuristic liveness scoring from raw pixel statistics of a face region.
//!
//! Printed photos and screen replays leave measurable traces in a capture:
//! screens add periodic high-frequency structure (pixel grid, moiré),
//! reprints flatten skin color ordering and micro-texture, and spoof
//! presentations often distort face proportions. This module combines five
//! cheap statistical checks into a single confidence without any extra model
//! inference.
//!
//! # Threat Coverage
//!
//! Best-effort spoof resistance only — these are pixel-statistics proxies,
//! not a cryptographic or challenge-response liveness guarantee. Numeric
//! thresholds are empirically tuned and must not be read as security bounds.

use image::{imageops, GrayImage, RgbImage};
use rustfft::num_complex::Complex;
use rustfft::FftPlanner;
use serde::Serialize;

use crate::detection::{BoundingBox, FaceDetection};

/// Combined-confidence weights of the five checks.
const WEIGHT_SCREEN: f32 = 0.25;
const WEIGHT_COLOR: f32 = 0.20;
const WEIGHT_PROPORTION: f32 = 0.10;
const WEIGHT_DETECTION: f32 = 0.25;
const WEIGHT_TEXTURE: f32 = 0.20;

/// Neutral score substituted for a check that could not be computed.
const UNAVAILABLE_SCORE: f32 = 0.5;

/// Combined confidence above which a capture is considered live.
const LIVE_CONFIDENCE_THRESHOLD: f32 = 0.55;

/// Side length the face region is resampled to before the 2-D FFT.
const SPECTRUM_SIZE: usize = 64;

/// Half-width of the low-frequency window around the spectrum origin.
const LOW_FREQ_RADIUS: usize = 4;

/// High/low frequency energy ratio at which the screen-pattern score
/// bottoms out.
const SCREEN_RATIO_SCALE: f32 = 2.0;

/// Ordering credit when the face region does not show the natural-skin
/// R > G > B channel ordering.
const COLOR_ORDER_PARTIAL_CREDIT: f32 = 0.6;

/// Per-channel standard deviation of a naturally textured face at which the
/// color-variance term saturates.
const COLOR_STDDEV_SCALE: f32 = 64.0;

/// Natural face bounding boxes are taller than wide; aspect ratios inside
/// this band get full proportion credit.
const PROPORTION_MIN_ASPECT: f32 = 0.6;
const PROPORTION_MAX_ASPECT: f32 = 0.9;
const PROPORTION_PARTIAL_CREDIT: f32 = 0.5;

/// Mean absolute neighbor difference of live skin micro-texture at which the
/// texture score saturates.
const TEXTURE_DIFF_SCALE: f32 = 25.0;

/// The five sub-scores, each in [0,1] when computable.
#[derive(Debug, Clone, Default, Serialize)]
pub struct LivenessChecks {
    pub screen_pattern: Option<f32>,
    pub color_distribution: Option<f32>,
    pub face_proportion: Option<f32>,
    pub detection_confidence: Option<f32>,
    pub texture_complexity: Option<f32>,
}

/// Result of a liveness analysis. Derived, never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct LivenessAssessment {
    pub checks: LivenessChecks,
    /// Weighted combination of the checks, in [0,1].
    pub confidence: f32,
    /// `confidence > 0.55`.
    pub is_live: bool,
    /// Set when the analysis could not run at all (empty face crop).
    pub error: Option<String>,
}

/// Run the heuristic liveness checks on one detected face.
pub fn assess_liveness(face: &FaceDetection, image: &RgbImage) -> LivenessAssessment {
    let Some(region) = face.bbox.crop_from(image) else {
        return LivenessAssessment {
            checks: LivenessChecks::default(),
            confidence: 0.0,
            is_live: false,
            error: Some("empty face region".to_string()),
        };
    };

    let gray = imageops::grayscale(&region);
    let checks = LivenessChecks {
        screen_pattern: screen_pattern_score(&gray),
        color_distribution: color_distribution_score(&region),
        face_proportion: face_proportion_score(&face.bbox),
        detection_confidence: Some(face.confidence.clamp(0.0, 1.0)),
        texture_complexity: texture_complexity_score(&gray),
    };

    let confidence = combine(&checks);
    LivenessAssessment {
        checks,
        is_live: confidence > LIVE_CONFIDENCE_THRESHOLD,
        confidence,
        error: None,
    }
}

fn combine(checks: &LivenessChecks) -> f32 {
    let score = |check: Option<f32>| check.unwrap_or(UNAVAILABLE_SCORE);
    let combined = WEIGHT_SCREEN * score(checks.screen_pattern)
        + WEIGHT_COLOR * score(checks.color_distribution)
        + WEIGHT_PROPORTION * score(checks.face_proportion)
        + WEIGHT_DETECTION * score(checks.detection_confidence)
        + WEIGHT_TEXTURE * score(checks.texture_complexity);
    combined.clamp(0.0, 1.0)
}

/// Screens superimpose periodic high-frequency structure on a capture.
///
/// The face region is resampled to a fixed grid, transformed with a 2-D FFT,
/// and the mean magnitude inside a small window around the spectrum origin
/// (low frequencies) is compared against the rest of the spectrum. A high
/// high/low energy ratio indicates screen-like structure and scores low:
/// `1 − min(ratio / 2, 1)`.
fn screen_pattern_score(gray: &GrayImage) -> Option<f32> {
    if gray.width() < 8 || gray.height() < 8 {
        return None;
    }

    let n = SPECTRUM_SIZE;
    let resized = imageops::resize(
        gray,
        n as u32,
        n as u32,
        imageops::FilterType::Triangle,
    );

    let mut data: Vec<Complex<f32>> = resized
        .iter()
        .map(|&p| Complex::new(p as f32 / 255.0, 0.0))
        .collect();

    let mut planner = FftPlanner::<f32>::new();
    let fft = planner.plan_fft_forward(n);

    // Row pass, then column pass on the transposed grid. Magnitude
    // statistics below are invariant under the final transposition, so the
    // grid is left column-major.
    fft.process(&mut data);
    let mut transposed = vec![Complex::new(0.0f32, 0.0); n * n];
    for row in 0..n {
        for col in 0..n {
            transposed[col * n + row] = data[row * n + col];
        }
    }
    fft.process(&mut transposed);

    let mut low_sum = 0.0f64;
    let mut low_count = 0u32;
    let mut high_sum = 0.0f64;
    let mut high_count = 0u32;
    for u in 0..n {
        for v in 0..n {
            // Wrapped distance from the DC bin at (0,0).
            let du = u.min(n - u);
            let dv = v.min(n - v);
            let magnitude = transposed[u * n + v].norm() as f64;
            if du <= LOW_FREQ_RADIUS && dv <= LOW_FREQ_RADIUS {
                low_sum += magnitude;
                low_count += 1;
            } else {
                high_sum += magnitude;
                high_count += 1;
            }
        }
    }

    let low_mean = (low_sum / low_count as f64) as f32;
    let high_mean = (high_sum / high_count as f64) as f32;
    if low_mean <= f32::EPSILON {
        return None;
    }

    let ratio = high_mean / low_mean;
    Some(1.0 - (ratio / SCREEN_RATIO_SCALE).min(1.0))
}

/// Natural skin orders the channel means R > G > B and carries
/// texture-driven color variance; flat reproductions lose both.
fn color_distribution_score(region: &RgbImage) -> Option<f32> {
    let count = (region.width() * region.height()) as f64;
    if count == 0.0 {
        return None;
    }

    let mut sums = [0.0f64; 3];
    let mut squares = [0.0f64; 3];
    for pixel in region.pixels() {
        for channel in 0..3 {
            let v = pixel[channel] as f64;
            sums[channel] += v;
            squares[channel] += v * v;
        }
    }

    let means: Vec<f64> = sums.iter().map(|s| s / count).collect();
    let stddevs: Vec<f64> = squares
        .iter()
        .zip(means.iter())
        .map(|(sq, mean)| (sq / count - mean * mean).max(0.0).sqrt())
        .collect();

    let ordering = if means[0] > means[1] && means[1] > means[2] {
        1.0
    } else {
        COLOR_ORDER_PARTIAL_CREDIT
    };

    let mean_stddev = (stddevs[0] + stddevs[1] + stddevs[2]) as f32 / 3.0;
    let variance_term = (mean_stddev / COLOR_STDDEV_SCALE).min(1.0);

    Some(0.5 * ordering + 0.5 * variance_term)
}

/// Full credit for width/height aspect ratios in the natural face band,
/// partial credit outside it.
fn face_proportion_score(bbox: &BoundingBox) -> Option<f32> {
    if bbox.height() <= 0.0 {
        return None;
    }
    let aspect = bbox.aspect_ratio();
    Some(
        if (PROPORTION_MIN_ASPECT..=PROPORTION_MAX_ASPECT).contains(&aspect) {
            1.0
        } else {
            PROPORTION_PARTIAL_CREDIT
        },
    )
}

/// Micro-texture proxy: mean absolute first difference of gray intensity
/// along both axes, normalized and capped.
fn texture_complexity_score(gray: &GrayImage) -> Option<f32> {
    let (w, h) = gray.dimensions();
    if w < 2 || h < 2 {
        return None;
    }

    let mut sum = 0.0f64;
    let mut count = 0u64;
    for y in 0..h {
        for x in 1..w {
            let a = gray.get_pixel(x, y)[0] as i16;
            let b = gray.get_pixel(x - 1, y)[0] as i16;
            sum += (a - b).abs() as f64;
            count += 1;
        }
    }
    for y in 1..h {
        for x in 0..w {
            let a = gray.get_pixel(x, y)[0] as i16;
            let b = gray.get_pixel(x, y - 1)[0] as i16;
            sum += (a - b).abs() as f64;
            count += 1;
        }
    }

    let mean = (sum / count as f64) as f32;
    Some((mean / TEXTURE_DIFF_SCALE).min(1.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::Embedding;
    use image::Rgb;

    fn face(bbox: BoundingBox, confidence: f32) -> FaceDetection {
        FaceDetection {
            bbox,
            confidence,
            pose: None,
            embedding: Embedding::new(vec![0.0; 4]),
        }
    }

    fn full_bbox(w: u32, h: u32) -> BoundingBox {
        BoundingBox {
            x1: 0.0,
            y1: 0.0,
            x2: w as f32,
            y2: h as f32,
        }
    }

    /// Skin-toned image with deterministic micro-texture (R > G > B).
    fn skin_image(w: u32, h: u32) -> RgbImage {
        RgbImage::from_fn(w, h, |x, y| {
            let jitter = ((x * 31 + y * 17) % 23) as u8;
            Rgb([190u8.saturating_add(jitter), 140, 110])
        })
    }

    /// Alternating stripes — strong periodic high-frequency structure.
    fn striped_image(w: u32, h: u32) -> RgbImage {
        RgbImage::from_fn(w, h, |x, _| {
            if x % 2 == 0 {
                Rgb([255, 255, 255])
            } else {
                Rgb([0, 0, 0])
            }
        })
    }

    fn flat_image(w: u32, h: u32) -> RgbImage {
        RgbImage::from_pixel(w, h, Rgb([120, 120, 120]))
    }

    #[test]
    fn confidence_stays_in_unit_interval() {
        let image = skin_image(80, 100);
        let result = assess_liveness(&face(full_bbox(80, 100), 0.97), &image);
        assert!((0.0..=1.0).contains(&result.confidence));
        assert!(result.error.is_none());
        for check in [
            result.checks.screen_pattern,
            result.checks.color_distribution,
            result.checks.face_proportion,
            result.checks.detection_confidence,
            result.checks.texture_complexity,
        ] {
            let value = check.unwrap();
            assert!((0.0..=1.0).contains(&value));
        }
    }

    #[test]
    fn empty_crop_is_not_live() {
        let image = skin_image(32, 32);
        let degenerate = BoundingBox {
            x1: 10.0,
            y1: 10.0,
            x2: 10.0,
            y2: 30.0,
        };
        let result = assess_liveness(&face(degenerate, 0.99), &image);
        assert!(!result.is_live);
        assert_eq!(result.confidence, 0.0);
        assert!(result.error.is_some());
        assert!(result.checks.screen_pattern.is_none());
    }

    #[test]
    fn natural_capture_passes() {
        // Textured skin tones, natural proportions, confident detection.
        let image = skin_image(72, 96);
        let result = assess_liveness(&face(full_bbox(72, 96), 0.95), &image);
        assert!(result.is_live, "confidence was {}", result.confidence);
    }

    #[test]
    fn striped_region_scores_low_on_screen_pattern() {
        let striped = imageops::grayscale(&striped_image(64, 64));
        let natural = imageops::grayscale(&skin_image(64, 64));
        let striped_score = screen_pattern_score(&striped).unwrap();
        let natural_score = screen_pattern_score(&natural).unwrap();
        assert!(striped_score < natural_score);
    }

    #[test]
    fn flat_region_keeps_screen_score_high() {
        // A flat region has all its energy at the origin.
        let gray = imageops::grayscale(&flat_image(64, 64));
        let score = screen_pattern_score(&gray).unwrap();
        assert!(score > 0.9);
    }

    #[test]
    fn tiny_region_has_no_screen_score() {
        let gray = imageops::grayscale(&flat_image(4, 4));
        assert!(screen_pattern_score(&gray).is_none());
    }

    #[test]
    fn skin_ordering_beats_inverted_ordering() {
        let skin = skin_image(32, 32);
        // Same texture, blue-dominant ordering.
        let inverted = RgbImage::from_fn(32, 32, |x, y| {
            let jitter = ((x * 31 + y * 17) % 23) as u8;
            Rgb([110, 140, 190u8.saturating_add(jitter)])
        });
        let skin_score = color_distribution_score(&skin).unwrap();
        let inverted_score = color_distribution_score(&inverted).unwrap();
        assert!(skin_score > inverted_score);
    }

    #[test]
    fn flat_gray_gets_partial_color_credit() {
        // No ordering, no variance: 0.5 · 0.6 + 0.5 · 0.0.
        let score = color_distribution_score(&flat_image(16, 16)).unwrap();
        assert!((score - 0.3).abs() < 1e-6);
    }

    #[test]
    fn proportion_band_gets_full_credit() {
        let natural = BoundingBox {
            x1: 0.0,
            y1: 0.0,
            x2: 75.0,
            y2: 100.0,
        };
        assert_eq!(face_proportion_score(&natural), Some(1.0));

        let square = BoundingBox {
            x1: 0.0,
            y1: 0.0,
            x2: 100.0,
            y2: 100.0,
        };
        assert_eq!(face_proportion_score(&square), Some(PROPORTION_PARTIAL_CREDIT));
    }

    #[test]
    fn texture_of_flat_region_is_zero() {
        let gray = imageops::grayscale(&flat_image(16, 16));
        assert_eq!(texture_complexity_score(&gray), Some(0.0));
    }

    #[test]
    fn texture_caps_at_one() {
        let gray = imageops::grayscale(&striped_image(16, 16));
        assert_eq!(texture_complexity_score(&gray), Some(1.0));
    }

    #[test]
    fn unavailable_checks_fall_back_to_neutral_weighting() {
        let checks = LivenessChecks {
            detection_confidence: Some(1.0),
            ..LivenessChecks::default()
        };
        // 0.25·1.0 for detection, 0.5 neutral for the other four weights.
        let expected = 0.25 + 0.5 * (0.25 + 0.20 + 0.10 + 0.20);
        assert!((combine(&checks) - expected).abs() < 1e-6);
    }

    #[test]
    fn low_detection_confidence_drags_decision_below_threshold() {
        let image = flat_image(64, 80);
        let result = assess_liveness(&face(full_bbox(64, 80), 0.1), &image);
        assert!(!result.is_live, "confidence was {}", result.confidence);
    }
}

//! Detector output data model and the collaborator seam.
//!
//! The face detector/embedder is an external collaborator: given an image it
//! returns zero or more detected faces, each with a bounding box, a detection
//! confidence, optional pose angles and an embedding. This module defines the
//! shape of that output and the [`FaceDetector`] trait the service is wired
//! against; it performs no inference itself.

use image::{imageops, RgbImage};
use serde::Serialize;
use thiserror::Error;

use crate::embedding::Embedding;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("detector inference failed: {0}")]
    Inference(String),
    #[error("detector unavailable: {0}")]
    Unavailable(String),
}

/// Axis-aligned face bounding box in pixel coordinates, `x1 < x2`, `y1 < y2`.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub fn width(&self) -> f32 {
        (self.x2 - self.x1).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.y2 - self.y1).max(0.0)
    }

    /// Width/height aspect ratio; 0.0 for a degenerate box.
    pub fn aspect_ratio(&self) -> f32 {
        let h = self.height();
        if h <= 0.0 {
            return 0.0;
        }
        self.width() / h
    }

    /// Intersect the box with the image bounds and return the integer crop
    /// region as `(x, y, width, height)`. `None` when the intersection is
    /// empty (degenerate or fully out-of-frame boxes).
    pub fn clamp_to(&self, image_width: u32, image_height: u32) -> Option<(u32, u32, u32, u32)> {
        let x1 = self.x1.max(0.0) as u32;
        let y1 = self.y1.max(0.0) as u32;
        let x2 = (self.x2.min(image_width as f32).max(0.0)) as u32;
        let y2 = (self.y2.min(image_height as f32).max(0.0)) as u32;
        if x2 <= x1 || y2 <= y1 {
            return None;
        }
        Some((x1, y1, x2 - x1, y2 - y1))
    }

    /// Crop the face region out of `image`, clamped to the frame.
    /// `None` when nothing of the box lies inside the image.
    pub fn crop_from(&self, image: &RgbImage) -> Option<RgbImage> {
        let (x, y, w, h) = self.clamp_to(image.width(), image.height())?;
        Some(imageops::crop_imm(image, x, y, w, h).to_image())
    }
}

/// Head pose angles in degrees, as reported by the detector.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct PoseAngles {
    pub yaw: f32,
    pub pitch: f32,
    pub roll: f32,
}

/// One detected face. Read-only input to this crate.
#[derive(Debug, Clone)]
pub struct FaceDetection {
    pub bbox: BoundingBox,
    /// Detection confidence in [0,1].
    pub confidence: f32,
    /// Pose angles when the detector reports them.
    pub pose: Option<PoseAngles>,
    pub embedding: Embedding,
}

/// External detector/embedder collaborator.
///
/// Implementations run whatever model stack the deployment ships (ONNX,
/// remote inference, …). Embeddings returned across calls are comparable
/// only when produced by the same model configuration.
pub trait FaceDetector: Send + Sync {
    fn detect(&self, image: &RgbImage) -> Result<Vec<FaceDetection>, DetectorError>;
}

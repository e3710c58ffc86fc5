//! Core face matching algorithms: embedding similarity, quality assessment
//! and heuristic liveness analysis.
//!
//! This crate is pure computation over detector output — no I/O, no async,
//! no model inference. The detector/embedder itself is an external
//! collaborator reached through the [`FaceDetector`] seam.

pub mod detection;
pub mod embedding;
pub mod liveness;
pub mod quality;

pub use detection::{BoundingBox, DetectorError, FaceDetection, FaceDetector, PoseAngles};
pub use embedding::{cosine_similarity, Embedding, EmbeddingError, EMBEDDING_DIM};
pub use liveness::{assess_liveness, LivenessAssessment, LivenessChecks};
pub use quality::{assess_quality, select_best_face, QualityAssessment};

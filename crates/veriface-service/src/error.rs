//! Service-level error taxonomy.
//!
//! Validation failures and not-found lookups surface to the caller and are
//! never retried internally. A quality-rejected enrollment is NOT an error —
//! it is a declined business decision modeled as an
//! [`EnrollOutcome`](crate::service::EnrollOutcome) variant. Backend
//! degradation is internal: the gallery store falls back to in-process
//! storage and logs, without ever failing a request for it.

use thiserror::Error;
use veriface_core::{DetectorError, EmbeddingError};

use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum ServiceError {
    // ── Validation: bad request input, surfaced as-is ────────────────────────
    #[error("image could not be decoded: {0}")]
    InvalidImage(String),
    #[error("image of {size} bytes exceeds the {limit} byte limit")]
    ImageTooLarge { size: usize, limit: usize },
    #[error("no face detected in image")]
    NoFaceDetected,
    #[error("identity key must not be empty")]
    EmptyIdentity,
    #[error("batch of {size} images exceeds the limit of {limit}")]
    BatchTooLarge { size: usize, limit: usize },
    #[error(transparent)]
    Embedding(#[from] EmbeddingError),

    // ── Lookup ───────────────────────────────────────────────────────────────
    #[error("identity '{0}' is not enrolled")]
    NotFound(String),

    // ── Throttling ───────────────────────────────────────────────────────────
    #[error("too many failed attempts for '{identity}'; try again in {retry_after_secs}s")]
    TooManyAttempts {
        identity: String,
        retry_after_secs: u64,
    },

    // ── Collaborator failures, surfaced for the caller to retry ──────────────
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("gallery store error: {0}")]
    Store(#[from] StoreError),
}

impl ServiceError {
    /// Whether this error belongs to the validation class (caller sent
    /// unusable input; retrying the same request cannot succeed).
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            ServiceError::InvalidImage(_)
                | ServiceError::ImageTooLarge { .. }
                | ServiceError::NoFaceDetected
                | ServiceError::EmptyIdentity
                | ServiceError::BatchTooLarge { .. }
                | ServiceError::Embedding(_)
        )
    }
}

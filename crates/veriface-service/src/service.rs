//! Matching orchestrator: coordinates the detector collaborator with the
//! quality assessor, similarity engine and gallery store to implement
//! enroll, verify (1:1), search/identify (1:N), batch embedding and
//! liveness checks.
//!
//! All operations are request-driven and synchronous from the caller's
//! perspective: no internal retries, no background work. Transient detector
//! or backend failures surface immediately; the caller decides whether to
//! retry.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use image::RgbImage;
use serde::Serialize;
use tokio::sync::Mutex;
use veriface_core::{
    assess_liveness, cosine_similarity, select_best_face, Embedding, FaceDetection, FaceDetector,
    LivenessAssessment, QualityAssessment,
};

use crate::config::Config;
use crate::error::ServiceError;
use crate::ratelimit::VerifyLimiter;
use crate::store::{EnrollmentRecord, GalleryStore};

/// Factor applied to the match threshold when collecting identify
/// candidates, so near-matches surface for display even when unconfirmed.
/// Heuristic and tunable, not load-bearing; the confirmed identity always
/// uses the full threshold.
const IDENTIFY_RELAXATION: f32 = 0.8;

/// Result of an enrollment request. A quality rejection is a declined
/// business decision, not an error.
#[derive(Debug, Serialize)]
pub enum EnrollOutcome {
    Enrolled {
        identity: String,
        quality: QualityAssessment,
        enrolled_at: DateTime<Utc>,
    },
    Rejected {
        quality: QualityAssessment,
        reason: String,
    },
}

impl EnrollOutcome {
    pub fn is_enrolled(&self) -> bool {
        matches!(self, EnrollOutcome::Enrolled { .. })
    }
}

/// Result of a 1:1 verification.
#[derive(Debug, Serialize)]
pub struct VerifyOutcome {
    pub identity: String,
    pub verified: bool,
    pub similarity: f32,
    pub threshold: f32,
    pub quality: QualityAssessment,
}

/// One gallery hit from search/identify, best first.
#[derive(Debug, Clone, Serialize)]
pub struct SearchMatch {
    pub identity: String,
    pub name: Option<String>,
    pub similarity: f32,
}

/// Result of a 1:N identification.
#[derive(Debug, Serialize)]
pub struct IdentifyOutcome {
    /// Best match at or above the full threshold — the confirmed identity.
    pub identity: Option<SearchMatch>,
    /// Ranked near-matches at or above the relaxed threshold.
    pub candidates: Vec<SearchMatch>,
}

/// Per-image result of a batch embedding request. A failed item carries an
/// error description instead of an embedding and never aborts the batch.
#[derive(Debug, Serialize)]
pub struct BatchEmbedItem {
    pub index: usize,
    pub embedding: Option<Embedding>,
    pub confidence: Option<f32>,
    pub error: Option<String>,
}

/// Directory entry for one enrolled identity (no embedding data).
#[derive(Debug, Serialize)]
pub struct GalleryEntry {
    pub identity: String,
    pub name: Option<String>,
    pub metadata: Option<HashMap<String, String>>,
    pub enrolled_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub enrolled: u64,
    pub backend: &'static str,
    pub degraded: bool,
    pub match_threshold: f32,
}

/// The face matching service. One instance per process; all operations take
/// `&self` and run concurrently.
pub struct FaceService {
    config: Config,
    detector: Arc<dyn FaceDetector>,
    store: GalleryStore,
    limiter: Mutex<VerifyLimiter>,
}

impl FaceService {
    pub fn new(config: Config, detector: Arc<dyn FaceDetector>, store: GalleryStore) -> Self {
        Self {
            config,
            detector,
            store,
            limiter: Mutex::new(VerifyLimiter::new()),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn gallery(&self) -> &GalleryStore {
        &self.store
    }

    /// Enroll an identity from an image. The best detected face must clear
    /// the configured quality threshold, otherwise the enrollment is
    /// declined (returned, not an error) and nothing is persisted.
    /// Re-enrolling an existing identity overwrites its record.
    pub async fn enroll(
        &self,
        identity: &str,
        image_bytes: &[u8],
        name: Option<String>,
        metadata: Option<HashMap<String, String>>,
    ) -> Result<EnrollOutcome, ServiceError> {
        if identity.trim().is_empty() {
            return Err(ServiceError::EmptyIdentity);
        }

        let image = self.decode_image(image_bytes)?;
        let (face, quality) = self.best_face(&image)?;

        if quality.score < self.config.quality_threshold {
            let reason = format!(
                "face quality {:.2} is below the required {:.2} (blur {:.2}, area {} px)",
                quality.score, self.config.quality_threshold, quality.blur, quality.face_area
            );
            tracing::info!(identity, score = quality.score, "enrollment declined on quality");
            return Ok(EnrollOutcome::Rejected { quality, reason });
        }

        face.embedding.validate()?;
        let record = EnrollmentRecord {
            identity: identity.to_string(),
            embedding: face.embedding,
            name,
            metadata,
            enrolled_at: Utc::now(),
        };
        self.store.save(&record).await?;

        tracing::info!(identity, score = quality.score, "identity enrolled");
        Ok(EnrollOutcome::Enrolled {
            identity: identity.to_string(),
            quality,
            enrolled_at: record.enrolled_at,
        })
    }

    /// 1:1 verification of a probe image against one enrolled identity.
    ///
    /// Only a deliberate non-match counts against the identity's rate
    /// limit; detector and store failures do not.
    pub async fn verify(
        &self,
        identity: &str,
        image_bytes: &[u8],
    ) -> Result<VerifyOutcome, ServiceError> {
        if identity.trim().is_empty() {
            return Err(ServiceError::EmptyIdentity);
        }

        {
            let mut limiter = self.limiter.lock().await;
            if let Err(retry_after_secs) = limiter.check(identity) {
                tracing::warn!(identity, retry_after_secs, "verify rate limited");
                return Err(ServiceError::TooManyAttempts {
                    identity: identity.to_string(),
                    retry_after_secs,
                });
            }
        }

        let record = self
            .store
            .load(identity)
            .await?
            .ok_or_else(|| ServiceError::NotFound(identity.to_string()))?;

        let image = self.decode_image(image_bytes)?;
        let (face, quality) = self.best_face(&image)?;
        let similarity = cosine_similarity(&face.embedding, &record.embedding)?;
        let verified = similarity >= self.config.match_threshold;

        {
            let mut limiter = self.limiter.lock().await;
            if verified {
                limiter.record_success(identity);
            } else {
                limiter.record_failure(identity);
            }
        }

        tracing::info!(identity, verified, similarity, "verify complete");
        Ok(VerifyOutcome {
            identity: identity.to_string(),
            verified,
            similarity,
            threshold: self.config.match_threshold,
            quality,
        })
    }

    /// 1:N search: rank every enrolled identity against the probe image and
    /// return those at or above the threshold (caller override or the
    /// configured default), best first, truncated to `top_k`.
    pub async fn search(
        &self,
        image_bytes: &[u8],
        top_k: Option<usize>,
        min_similarity: Option<f32>,
    ) -> Result<Vec<SearchMatch>, ServiceError> {
        let threshold = min_similarity.unwrap_or(self.config.match_threshold);
        let top_k = top_k.unwrap_or(self.config.default_top_k);

        let image = self.decode_image(image_bytes)?;
        let (face, _) = self.best_face(&image)?;

        let records = self.store.list_all().await?;
        let matches = rank_matches(&face.embedding, &records, threshold, top_k)?;
        tracing::debug!(
            gallery = records.len(),
            matches = matches.len(),
            "search complete"
        );
        Ok(matches)
    }

    /// 1:N identification: candidates are collected at a relaxed threshold
    /// so near-matches surface for display; the confirmed identity is the
    /// best candidate at or above the full threshold, or none.
    pub async fn identify(
        &self,
        image_bytes: &[u8],
        top_k: Option<usize>,
    ) -> Result<IdentifyOutcome, ServiceError> {
        let top_k = top_k.unwrap_or(self.config.default_top_k);
        let relaxed = self.config.match_threshold * IDENTIFY_RELAXATION;

        let image = self.decode_image(image_bytes)?;
        let (face, _) = self.best_face(&image)?;

        let records = self.store.list_all().await?;
        let candidates = rank_matches(&face.embedding, &records, relaxed, top_k)?;
        let identity = candidates
            .iter()
            .find(|candidate| candidate.similarity >= self.config.match_threshold)
            .cloned();

        tracing::info!(
            confirmed = identity.as_ref().map(|m| m.identity.as_str()),
            candidates = candidates.len(),
            "identify complete"
        );
        Ok(IdentifyOutcome {
            identity,
            candidates,
        })
    }

    /// Extract embeddings from a bounded list of images. Per-image failures
    /// are captured in the corresponding item and never abort the batch.
    pub fn batch_embed(&self, images: &[Vec<u8>]) -> Result<Vec<BatchEmbedItem>, ServiceError> {
        if images.len() > self.config.batch_limit {
            return Err(ServiceError::BatchTooLarge {
                size: images.len(),
                limit: self.config.batch_limit,
            });
        }

        let mut items = Vec::with_capacity(images.len());
        for (index, bytes) in images.iter().enumerate() {
            match self.embed_one(bytes) {
                Ok((embedding, confidence)) => items.push(BatchEmbedItem {
                    index,
                    embedding: Some(embedding),
                    confidence: Some(confidence),
                    error: None,
                }),
                Err(error) => {
                    tracing::debug!(index, %error, "batch item failed");
                    items.push(BatchEmbedItem {
                        index,
                        embedding: None,
                        confidence: None,
                        error: Some(error.to_string()),
                    });
                }
            }
        }
        Ok(items)
    }

    /// Run the heuristic liveness checks on the best face of an image.
    pub fn check_liveness(&self, image_bytes: &[u8]) -> Result<LivenessAssessment, ServiceError> {
        let image = self.decode_image(image_bytes)?;
        let (face, _) = self.best_face(&image)?;
        Ok(assess_liveness(&face, &image))
    }

    /// Remove an enrolled identity. Unknown identities are a not-found
    /// error at this layer.
    pub async fn unenroll(&self, identity: &str) -> Result<(), ServiceError> {
        if !self.store.delete(identity).await? {
            return Err(ServiceError::NotFound(identity.to_string()));
        }
        tracing::info!(identity, "identity unenrolled");
        Ok(())
    }

    /// Directory listing of the gallery, without embedding data.
    pub async fn list_gallery(&self) -> Result<Vec<GalleryEntry>, ServiceError> {
        let records = self.store.list_all().await?;
        Ok(records
            .into_iter()
            .map(|record| GalleryEntry {
                identity: record.identity,
                name: record.name,
                metadata: record.metadata,
                enrolled_at: record.enrolled_at,
            })
            .collect())
    }

    pub async fn health(&self) -> HealthReport {
        HealthReport {
            status: "ok",
            enrolled: self.store.count().await.unwrap_or(0),
            backend: self.store.backend_kind().await,
            degraded: self.store.is_degraded(),
            match_threshold: self.config.match_threshold,
        }
    }

    fn embed_one(&self, bytes: &[u8]) -> Result<(Embedding, f32), ServiceError> {
        let image = self.decode_image(bytes)?;
        let (face, _) = self.best_face(&image)?;
        face.embedding.validate()?;
        Ok((face.embedding, face.confidence.clamp(0.0, 1.0)))
    }

    fn decode_image(&self, bytes: &[u8]) -> Result<RgbImage, ServiceError> {
        if bytes.len() > self.config.max_image_bytes {
            return Err(ServiceError::ImageTooLarge {
                size: bytes.len(),
                limit: self.config.max_image_bytes,
            });
        }
        let image = image::load_from_memory(bytes)
            .map_err(|error| ServiceError::InvalidImage(error.to_string()))?;
        Ok(image.to_rgb8())
    }

    /// Detect faces and keep the one with the highest composite quality.
    fn best_face(
        &self,
        image: &RgbImage,
    ) -> Result<(FaceDetection, QualityAssessment), ServiceError> {
        let mut faces = self.detector.detect(image)?;
        let (index, quality) =
            select_best_face(&faces, image).ok_or(ServiceError::NoFaceDetected)?;
        let face = faces.swap_remove(index);
        Ok((face, quality))
    }
}

/// Linear scan of the gallery snapshot: keep records at or above the
/// threshold, sort descending by similarity (stable, so equal scores keep
/// the gallery iteration order) and truncate to `top_k`.
fn rank_matches(
    probe: &Embedding,
    records: &[EnrollmentRecord],
    threshold: f32,
    top_k: usize,
) -> Result<Vec<SearchMatch>, ServiceError> {
    let mut matches = Vec::new();
    for record in records {
        let similarity = cosine_similarity(probe, &record.embedding)?;
        if similarity >= threshold {
            matches.push(SearchMatch {
                identity: record.identity.clone(),
                name: record.name.clone(),
                similarity,
            });
        }
    }
    matches.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    matches.truncate(top_k);
    Ok(matches)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(identity: &str, values: Vec<f32>) -> EnrollmentRecord {
        EnrollmentRecord {
            identity: identity.to_string(),
            embedding: Embedding::new(values),
            name: None,
            metadata: None,
            enrolled_at: Utc::now(),
        }
    }

    fn probe() -> Embedding {
        Embedding::new(vec![1.0, 0.0])
    }

    #[test]
    fn ranking_sorts_descending_and_filters() {
        let gallery = vec![
            record("low", vec![0.3, (1.0f32 - 0.09).sqrt()]),
            record("high", vec![0.9, (1.0f32 - 0.81).sqrt()]),
            record("mid", vec![0.6, 0.8]),
        ];
        let matches = rank_matches(&probe(), &gallery, 0.5, 10).unwrap();
        let identities: Vec<&str> = matches.iter().map(|m| m.identity.as_str()).collect();
        assert_eq!(identities, vec!["high", "mid"]);
        assert!((matches[0].similarity - 0.9).abs() < 1e-6);
        assert!((matches[1].similarity - 0.6).abs() < 1e-6);
    }

    #[test]
    fn ranking_truncates_to_top_k() {
        let gallery = vec![
            record("a", vec![0.9, (1.0f32 - 0.81).sqrt()]),
            record("b", vec![0.8, 0.6]),
            record("c", vec![0.7, (1.0f32 - 0.49).sqrt()]),
        ];
        let matches = rank_matches(&probe(), &gallery, 0.5, 2).unwrap();
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].identity, "a");
        assert_eq!(matches[1].identity, "b");
    }

    #[test]
    fn equal_similarities_keep_gallery_order() {
        let gallery = vec![
            record("first", vec![0.7, (1.0f32 - 0.49).sqrt()]),
            record("second", vec![0.7, (1.0f32 - 0.49).sqrt()]),
        ];
        let matches = rank_matches(&probe(), &gallery, 0.5, 10).unwrap();
        assert_eq!(matches[0].identity, "first");
        assert_eq!(matches[1].identity, "second");
    }

    #[test]
    fn ranking_propagates_length_mismatch() {
        let gallery = vec![record("bad", vec![1.0, 0.0, 0.0])];
        let err = rank_matches(&probe(), &gallery, 0.0, 10).unwrap_err();
        assert!(matches!(err, ServiceError::Embedding(_)));
    }

    #[test]
    fn empty_gallery_ranks_empty() {
        let matches = rank_matches(&probe(), &[], 0.0, 10).unwrap();
        assert!(matches.is_empty());
    }
}

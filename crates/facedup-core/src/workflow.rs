//! End-to-end duplicate check for one inbound image.
//!
//! validate -> detect -> search every faceset -> duplicate, or allocate and
//! commit the new face. Every path ends in a [`VerifyOutcome`]; nothing here
//! returns `Err` to the caller.

use std::sync::Arc;

use crate::allocator::{AllocatorOptions, FacesetAllocator};
use crate::error::{Error, ErrorKind};
use crate::imaging::{validate_image, ImageError, ImageLimits};
use crate::service::FaceService;
use crate::store::FaceStore;
use crate::types::{group_by_faceset, rank_matches, FaceToken, VerificationMatch};

pub const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 90.0;
/// Matches requested per faceset search.
pub const DEFAULT_SEARCH_RESULT_COUNT: u32 = 5;

#[derive(Debug, Clone)]
pub struct VerifierOptions {
    /// Minimum confidence (0–100) for a search hit to count as a duplicate.
    pub confidence_threshold: f64,
    pub search_result_count: u32,
    pub image_limits: ImageLimits,
    pub allocator: AllocatorOptions,
}

impl Default for VerifierOptions {
    fn default() -> Self {
        Self {
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            search_result_count: DEFAULT_SEARCH_RESULT_COUNT,
            image_limits: ImageLimits::default(),
            allocator: AllocatorOptions::default(),
        }
    }
}

/// Terminal state of one verification.
#[derive(Debug)]
pub enum VerifyOutcome {
    /// New face, stored in `faceset_id`.
    Accepted {
        face_token: FaceToken,
        faceset_id: String,
    },
    /// At least one stored face cleared the threshold. `matches` is ranked,
    /// `best` is its first entry.
    DuplicateFound {
        face_token: FaceToken,
        best: VerificationMatch,
        matches: Vec<VerificationMatch>,
    },
    RejectedInvalidImage(ImageError),
    RejectedNoFace,
    /// Allocation or commit failed for a face that is not a duplicate.
    RejectedSaveFailed {
        face_token: FaceToken,
        error: Error,
    },
    /// Detection or the faceset scan failed.
    Failed {
        face_token: Option<FaceToken>,
        error: Error,
    },
}

impl VerifyOutcome {
    /// Short machine-readable status.
    pub fn status(&self) -> &'static str {
        match self {
            VerifyOutcome::Accepted { .. } => "success",
            VerifyOutcome::DuplicateFound { .. } => "duplicate_found",
            _ => "error",
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, VerifyOutcome::DuplicateFound { .. })
    }

    /// Failure classification, `None` for `Accepted` and `DuplicateFound`.
    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            VerifyOutcome::Accepted { .. } | VerifyOutcome::DuplicateFound { .. } => None,
            VerifyOutcome::RejectedInvalidImage(_) | VerifyOutcome::RejectedNoFace => {
                Some(ErrorKind::InvalidInput)
            }
            VerifyOutcome::RejectedSaveFailed { error, .. } | VerifyOutcome::Failed { error, .. } => {
                Some(error.kind())
            }
        }
    }

    pub fn face_token(&self) -> Option<&FaceToken> {
        match self {
            VerifyOutcome::Accepted { face_token, .. }
            | VerifyOutcome::DuplicateFound { face_token, .. }
            | VerifyOutcome::RejectedSaveFailed { face_token, .. } => Some(face_token),
            VerifyOutcome::Failed { face_token, .. } => face_token.as_ref(),
            VerifyOutcome::RejectedInvalidImage(_) | VerifyOutcome::RejectedNoFace => None,
        }
    }

    /// Human-readable summary.
    pub fn message(&self) -> String {
        match self {
            VerifyOutcome::Accepted { .. } => "New face found and token saved successfully".to_string(),
            VerifyOutcome::DuplicateFound { .. } => "Potential duplicate face detected".to_string(),
            VerifyOutcome::RejectedInvalidImage(e) => e.to_string(),
            VerifyOutcome::RejectedNoFace => {
                "No face detected in image. Please provide a clear image with a human face.".to_string()
            }
            VerifyOutcome::RejectedSaveFailed { error, .. } => {
                format!("Failed to save face data: {error}")
            }
            VerifyOutcome::Failed { error, .. } => format!("Error processing image: {error}"),
        }
    }
}

pub struct Verifier {
    service: Arc<dyn FaceService>,
    store: Arc<dyn FaceStore>,
    allocator: FacesetAllocator,
    options: VerifierOptions,
}

impl Verifier {
    pub fn new(
        service: Arc<dyn FaceService>,
        store: Arc<dyn FaceStore>,
        options: VerifierOptions,
    ) -> Self {
        let allocator =
            FacesetAllocator::new(service.clone(), store.clone(), options.allocator.clone());
        Self {
            service,
            store,
            allocator,
            options,
        }
    }

    pub fn options(&self) -> &VerifierOptions {
        &self.options
    }

    pub async fn verify(&self, image: &[u8]) -> VerifyOutcome {
        let outcome = self.run(image).await;
        match &outcome {
            VerifyOutcome::Accepted { face_token, faceset_id } => {
                tracing::info!(face_token = %face_token, faceset = %faceset_id, "verify: accepted new face");
            }
            VerifyOutcome::DuplicateFound { face_token, best, matches } => {
                tracing::info!(
                    face_token = %face_token,
                    matched = %best.face_token,
                    confidence = best.confidence,
                    matches = matches.len(),
                    "verify: duplicate found"
                );
            }
            VerifyOutcome::RejectedInvalidImage(e) => {
                tracing::info!(error = %e, "verify: invalid image");
            }
            VerifyOutcome::RejectedNoFace => tracing::info!("verify: no face detected"),
            VerifyOutcome::RejectedSaveFailed { face_token, error } => {
                tracing::error!(face_token = %face_token, error = %error, "verify: save failed");
            }
            VerifyOutcome::Failed { error, .. } => {
                tracing::error!(error = %error, "verify: failed");
            }
        }
        outcome
    }

    async fn run(&self, image: &[u8]) -> VerifyOutcome {
        let validated = match validate_image(image, &self.options.image_limits) {
            Ok(v) => v,
            Err(e) => return VerifyOutcome::RejectedInvalidImage(e),
        };
        tracing::debug!(
            width = validated.width,
            height = validated.height,
            size = validated.bytes.len(),
            reencoded_quality = ?validated.reencoded_quality,
            "verify: image validated"
        );

        let faces = match self.service.detect(validated.bytes).await {
            Ok(faces) => faces,
            Err(e) => {
                return VerifyOutcome::Failed {
                    face_token: None,
                    error: e.into(),
                }
            }
        };
        let Some(face_token) = faces.into_iter().next() else {
            return VerifyOutcome::RejectedNoFace;
        };
        tracing::debug!(face_token = %face_token, "verify: face detected");

        let matches = match self.search_all(&face_token).await {
            Ok(m) => m,
            Err(error) => {
                return VerifyOutcome::Failed {
                    face_token: Some(face_token),
                    error,
                }
            }
        };

        if let Some(best) = matches.first().cloned() {
            return VerifyOutcome::DuplicateFound {
                face_token,
                best,
                matches,
            };
        }

        match self.save(&face_token).await {
            Ok(faceset_id) => VerifyOutcome::Accepted {
                face_token,
                faceset_id,
            },
            Err(error) => VerifyOutcome::RejectedSaveFailed { face_token, error },
        }
    }

    /// Search every faceset that holds at least one indexed face and return
    /// the hits at or above the threshold, ranked by confidence.
    ///
    /// A failed search of one faceset is logged and skipped.
    pub async fn search_all(&self, face_token: &FaceToken) -> Result<Vec<VerificationMatch>, Error> {
        let records = self.store.get_all_faceset_records().await?;
        let by_faceset = group_by_faceset(&self.store.get_face_index().await?);

        let mut matches = Vec::new();
        for record in &records {
            if by_faceset.get(&record.id).map_or(true, |tokens| tokens.is_empty()) {
                tracing::debug!(faceset = %record.id, "skipping faceset with no stored faces");
                continue;
            }

            let hits = match self
                .service
                .search(face_token, &record.id, self.options.search_result_count)
                .await
            {
                Ok(hits) => hits,
                Err(e) => {
                    tracing::warn!(faceset = %record.id, error = %e, "faceset search failed; skipping");
                    continue;
                }
            };

            tracing::debug!(faceset = %record.id, hits = hits.len(), "faceset searched");
            matches.extend(
                hits.into_iter()
                    .filter(|m| m.confidence >= self.options.confidence_threshold),
            );
        }

        Ok(rank_matches(matches))
    }

    async fn save(&self, face_token: &FaceToken) -> Result<String, Error> {
        let faceset_id = self.allocator.find_or_create_target().await?;
        self.allocator.commit_face(face_token, &faceset_id).await?;
        Ok(faceset_id)
    }
}

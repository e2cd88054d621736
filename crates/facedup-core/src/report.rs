use serde::{Deserialize, Serialize};

use crate::types::{FaceToken, VerificationMatch};
use crate::workflow::VerifyOutcome;

/// Serializable summary of a [`VerifyOutcome`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationReport {
    /// `success`, `duplicate_found` or `error`.
    pub status: String,
    pub message: String,
    pub is_duplicate: bool,
    pub face_token: Option<FaceToken>,
    /// Confidence of the best match, duplicates only.
    pub confidence: Option<f64>,
    pub matches: Option<Vec<VerificationMatch>>,
    /// `invalid_input`, `transient` or `fatal` for error reports.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
}

impl From<&VerifyOutcome> for VerificationReport {
    fn from(outcome: &VerifyOutcome) -> Self {
        let (confidence, matches) = match outcome {
            VerifyOutcome::DuplicateFound { best, matches, .. } => {
                (Some(best.confidence), Some(matches.clone()))
            }
            _ => (None, None),
        };
        Self {
            status: outcome.status().to_string(),
            message: outcome.message(),
            is_duplicate: outcome.is_duplicate(),
            face_token: outcome.face_token().cloned(),
            confidence,
            matches,
            error_kind: outcome.error_kind().map(|k| k.as_str().to_string()),
        }
    }
}

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque identifier the remote service issues for a detected face.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FaceToken(String);

impl FaceToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FaceToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FaceToken {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for FaceToken {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Local bookkeeping for one remote faceset.
///
/// `count` caches the remote face count. It can drift and is overwritten with
/// the remote value after every insertion into this faceset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FacesetRecord {
    pub id: String,
    pub count: u32,
    pub created_at: DateTime<Utc>,
}

impl FacesetRecord {
    /// A freshly created, empty faceset.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            count: 0,
            created_at: Utc::now(),
        }
    }

    /// Whether one more face fits under `capacity`.
    pub fn has_capacity(&self, capacity: u32) -> bool {
        self.count < capacity
    }
}

/// Which faceset holds each accepted face.
pub type FaceIndex = HashMap<FaceToken, String>;

/// Invert a face index into `faceset id -> tokens`, tokens sorted for stable output.
pub fn group_by_faceset(index: &FaceIndex) -> HashMap<String, Vec<FaceToken>> {
    let mut grouped: HashMap<String, Vec<FaceToken>> = HashMap::new();
    for (token, faceset_id) in index {
        grouped
            .entry(faceset_id.clone())
            .or_default()
            .push(token.clone());
    }
    for tokens in grouped.values_mut() {
        tokens.sort();
    }
    grouped
}

/// One search hit. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationMatch {
    /// Similarity reported by the remote service, 0–100.
    pub confidence: f64,
    pub face_token: FaceToken,
}

/// Sort matches by confidence, highest first.
///
/// The sort is stable: among equal confidences the earlier-collected match
/// stays first, and that is the one reported as the best match.
pub fn rank_matches(mut matches: Vec<VerificationMatch>) -> Vec<VerificationMatch> {
    matches.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    matches
}

/// Remote truth about one faceset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FacesetDetail {
    pub face_count: u32,
    #[serde(default)]
    pub faceset_token: Option<String>,
}

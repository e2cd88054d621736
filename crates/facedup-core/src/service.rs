//! Seam to the remote face-recognition service.

use async_trait::async_trait;
use thiserror::Error;

use crate::error::ErrorKind;
use crate::types::{FaceToken, FacesetDetail, VerificationMatch};

/// Service error code for a faceset id the service does not know.
pub const CODE_INVALID_OUTER_ID: &str = "INVALID_OUTER_ID";
/// Service error code when creating a faceset whose id is already taken.
pub const CODE_FACESET_EXIST: &str = "FACESET_EXIST";
/// Service error code for the per-credential concurrency limit.
pub const CODE_CONCURRENCY_LIMIT: &str = "CONCURRENCY_LIMIT_EXCEEDED";

#[derive(Error, Debug)]
pub enum RemoteError {
    /// Non-200 response, not retried.
    #[error("{operation}: service returned HTTP {status}: {body}")]
    Service {
        operation: &'static str,
        status: u16,
        code: Option<String>,
        body: String,
    },
    /// HTTP 200 carrying an error message in the body.
    #[error("{operation} rejected: {message}")]
    Rejected {
        operation: &'static str,
        message: String,
    },
    #[error("{operation}: concurrency limit exceeded (HTTP {status})")]
    ConcurrencyLimit {
        operation: &'static str,
        status: u16,
        body: String,
    },
    #[error("{operation}: transport failure: {message}")]
    Transport {
        operation: &'static str,
        message: String,
    },
    /// Body was not JSON or did not decode. `status` is kept since a proxy
    /// error page lands here too.
    #[error("{operation}: malformed response (HTTP {status}): {message}")]
    Malformed {
        operation: &'static str,
        status: u16,
        message: String,
    },
    #[error("remote client misconfigured: {0}")]
    Config(String),
}

impl RemoteError {
    /// Whether another attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RemoteError::ConcurrencyLimit { .. } | RemoteError::Transport { .. }
        )
    }

    /// Whether the service answered with the given error code.
    pub fn has_code(&self, code: &str) -> bool {
        match self {
            RemoteError::Service { code: Some(c), .. } => c.starts_with(code),
            RemoteError::Rejected { message, .. } => message.starts_with(code),
            _ => false,
        }
    }

    /// Exhausted concurrency retries stay transient even once surfaced as
    /// [`RemoteError::Service`].
    pub fn kind(&self) -> ErrorKind {
        if self.is_retryable() || self.has_code(CODE_CONCURRENCY_LIMIT) {
            ErrorKind::Transient
        } else {
            ErrorKind::Fatal
        }
    }
}

/// Operations the workflow needs from the remote face service.
///
/// Implementations own rate limiting and retries. Facesets are addressed by
/// their caller-chosen `outer_id`.
#[async_trait]
pub trait FaceService: Send + Sync {
    /// Detect faces in an encoded image, in the service's detection order.
    async fn detect(&self, image: Vec<u8>) -> Result<Vec<FaceToken>, RemoteError>;

    /// Search one faceset for faces similar to `face_token`.
    async fn search(
        &self,
        face_token: &FaceToken,
        outer_id: &str,
        top_n: u32,
    ) -> Result<Vec<VerificationMatch>, RemoteError>;

    /// Create a faceset. An already existing `outer_id` counts as success.
    async fn create_faceset(
        &self,
        display_name: &str,
        outer_id: &str,
        tags: &str,
    ) -> Result<(), RemoteError>;

    /// Add a face to a faceset, returning how many faces were added.
    async fn add_face(&self, face_token: &FaceToken, outer_id: &str) -> Result<u32, RemoteError>;

    /// Current state of a faceset, or `None` if the service has no such faceset.
    async fn faceset_detail(&self, outer_id: &str) -> Result<Option<FacesetDetail>, RemoteError>;
}

//! facedup-core: duplicate-face detection over a remote face service.
//!
//! Faces live in capacity-bounded remote facesets. This crate decides which
//! faceset a new face joins, searches all facesets for near-duplicates, and
//! keeps a local index in step with the remote service. The service and the
//! local store are reached through the [`FaceService`] and [`FaceStore`] traits.

pub mod allocator;
pub mod error;
pub mod imaging;
pub mod report;
pub mod service;
pub mod store;
pub mod types;
pub mod workflow;

#[cfg(test)]
pub(crate) mod testutil;

pub use allocator::{AllocatorOptions, FacesetAllocator, MAX_FACESET_CAPACITY};
pub use error::{Error, ErrorKind};
pub use imaging::{validate_image, ImageError, ImageLimits, ValidatedImage};
pub use report::VerificationReport;
pub use service::{FaceService, RemoteError};
pub use store::{FaceStore, MemoryFaceStore, StoreError};
pub use types::{FaceIndex, FaceToken, FacesetDetail, FacesetRecord, VerificationMatch};
pub use workflow::{Verifier, VerifierOptions, VerifyOutcome, DEFAULT_CONFIDENCE_THRESHOLD};

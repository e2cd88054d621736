//! facedup-remote: Face++ implementation of [`facedup_core::FaceService`].
//!
//! Every request, retries included, passes one shared sliding-window
//! [`RateLimiter`]. Concurrency-limit responses and transport failures are
//! retried with exponential backoff; everything else fails fast.

pub mod client;
pub mod ratelimit;
pub mod retry;

pub use client::{ClientOptions, FacePlusPlusClient, DEFAULT_BASE_URL};
pub use ratelimit::{RateLimit, RateLimiter};
pub use retry::RetryPolicy;

//! Face++ v3 form API client.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use facedup_core::service::{CODE_CONCURRENCY_LIMIT, CODE_FACESET_EXIST, CODE_INVALID_OUTER_ID};
use facedup_core::{FaceService, FaceToken, FacesetDetail, RemoteError, VerificationMatch};
use reqwest::multipart::{Form, Part};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::ratelimit::{RateLimit, RateLimiter};
use crate::retry::RetryPolicy;

pub const DEFAULT_BASE_URL: &str = "https://api-us.faceplusplus.com/facepp/v3";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

const DETECT_UPLOAD_NAME: &str = "image.jpg";

#[derive(Clone)]
pub struct ClientOptions {
    pub base_url: String,
    pub api_key: String,
    pub api_secret: String,
    /// Per-request HTTP timeout.
    pub timeout: Duration,
    pub rate_limit: RateLimit,
    pub retry: RetryPolicy,
}

impl ClientOptions {
    pub fn new(api_key: impl Into<String>, api_secret: impl Into<String>) -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: api_key.into(),
            api_secret: api_secret.into(),
            timeout: DEFAULT_TIMEOUT,
            rate_limit: RateLimit::default(),
            retry: RetryPolicy::default(),
        }
    }
}

impl fmt::Debug for ClientOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientOptions")
            .field("base_url", &self.base_url)
            .field("api_key", &"<redacted>")
            .field("api_secret", &"<redacted>")
            .field("timeout", &self.timeout)
            .field("rate_limit", &self.rate_limit)
            .field("retry", &self.retry)
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct DetectResponse {
    #[serde(default)]
    faces: Vec<DetectedFace>,
}

#[derive(Debug, Deserialize)]
struct DetectedFace {
    face_token: FaceToken,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    results: Vec<VerificationMatch>,
}

#[derive(Debug, Deserialize)]
struct CreateFacesetResponse {
    #[allow(dead_code)]
    faceset_token: String,
}

#[derive(Debug, Deserialize)]
struct AddFaceResponse {
    face_added: u32,
}

/// Rate-limited, retrying client for the Face++ faceset API.
pub struct FacePlusPlusClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    api_secret: String,
    limiter: RateLimiter,
    retry: RetryPolicy,
}

impl FacePlusPlusClient {
    pub fn new(options: ClientOptions) -> Result<Self, RemoteError> {
        if options.api_key.is_empty() || options.api_secret.is_empty() {
            return Err(RemoteError::Config("api key and secret must be set".into()));
        }

        let http = reqwest::Client::builder()
            .timeout(options.timeout)
            .build()
            .map_err(|e| RemoteError::Config(format!("building HTTP client: {e}")))?;

        Ok(Self {
            http,
            base_url: options.base_url.trim_end_matches('/').to_string(),
            api_key: options.api_key,
            api_secret: options.api_secret,
            limiter: RateLimiter::new(options.rate_limit),
            retry: options.retry,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn form(&self) -> Form {
        Form::new()
            .text("api_key", self.api_key.clone())
            .text("api_secret", self.api_secret.clone())
    }

    /// POST `{base}/{path}` until it succeeds, fails fatally, or runs out of
    /// retries. `build` is called once per attempt since forms are consumed.
    async fn call<R, F>(&self, operation: &'static str, path: &str, build: F) -> Result<R, RemoteError>
    where
        R: DeserializeOwned,
        F: Fn() -> Form,
    {
        let url = format!("{}/{}", self.base_url, path);
        let mut malformed_retried = false;
        let mut attempt = 0u32;

        loop {
            self.limiter.acquire().await;

            let err = match self.send::<R>(operation, &url, build()).await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            let retry = attempt < self.retry.max_retries
                && match &err {
                    RemoteError::Malformed { .. } => !malformed_retried,
                    other => other.is_retryable(),
                };
            if !retry {
                return Err(surface(err));
            }
            if matches!(err, RemoteError::Malformed { .. }) {
                malformed_retried = true;
            }

            let delay = self.retry.delay(attempt);
            tracing::warn!(
                operation,
                attempt = attempt + 1,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "retrying request"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    async fn send<R: DeserializeOwned>(
        &self,
        operation: &'static str,
        url: &str,
        form: Form,
    ) -> Result<R, RemoteError> {
        tracing::debug!(operation, url, "sending request");

        let response = self
            .http
            .post(url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| transport(operation, e))?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(|e| transport(operation, e))?;

        tracing::debug!(operation, status, "response received");
        classify(operation, status, &body)
    }
}

/// Turn one `(status, body)` pair into a typed response or an error.
fn classify<R: DeserializeOwned>(
    operation: &'static str,
    status: u16,
    body: &str,
) -> Result<R, RemoteError> {
    let value: serde_json::Value = serde_json::from_str(body).map_err(|e| RemoteError::Malformed {
        operation,
        status,
        message: e.to_string(),
    })?;

    let error_message = value
        .get("error_message")
        .and_then(serde_json::Value::as_str)
        .map(str::to_string);

    if error_message
        .as_deref()
        .is_some_and(|m| m.contains(CODE_CONCURRENCY_LIMIT))
    {
        return Err(RemoteError::ConcurrencyLimit {
            operation,
            status,
            body: body.to_string(),
        });
    }

    if status != 200 {
        return Err(RemoteError::Service {
            operation,
            status,
            code: error_message,
            body: body.to_string(),
        });
    }

    if let Some(message) = error_message {
        return Err(RemoteError::Rejected { operation, message });
    }

    serde_json::from_value(value).map_err(|e| RemoteError::Malformed {
        operation,
        status,
        message: e.to_string(),
    })
}

/// Concurrency limits that outlast the retry budget surface as service errors.
fn surface(err: RemoteError) -> RemoteError {
    match err {
        RemoteError::ConcurrencyLimit {
            operation,
            status,
            body,
        } => RemoteError::Service {
            operation,
            status,
            code: Some(CODE_CONCURRENCY_LIMIT.to_string()),
            body,
        },
        other => other,
    }
}

fn transport(operation: &'static str, err: reqwest::Error) -> RemoteError {
    RemoteError::Transport {
        operation,
        message: err.to_string(),
    }
}

#[async_trait]
impl FaceService for FacePlusPlusClient {
    async fn detect(&self, image: Vec<u8>) -> Result<Vec<FaceToken>, RemoteError> {
        let response: DetectResponse = self
            .call("detect", "detect", || {
                self.form().part(
                    "image_file",
                    Part::bytes(image.clone()).file_name(DETECT_UPLOAD_NAME),
                )
            })
            .await?;

        let tokens: Vec<FaceToken> = response.faces.into_iter().map(|f| f.face_token).collect();
        tracing::debug!(faces = tokens.len(), "detect finished");
        Ok(tokens)
    }

    async fn search(
        &self,
        face_token: &FaceToken,
        outer_id: &str,
        top_n: u32,
    ) -> Result<Vec<VerificationMatch>, RemoteError> {
        let response: SearchResponse = self
            .call("search", "search", || {
                self.form()
                    .text("face_token", face_token.to_string())
                    .text("outer_id", outer_id.to_string())
                    .text("return_result_count", top_n.to_string())
            })
            .await?;

        tracing::debug!(faceset = outer_id, hits = response.results.len(), "search finished");
        Ok(response.results)
    }

    async fn create_faceset(
        &self,
        display_name: &str,
        outer_id: &str,
        tags: &str,
    ) -> Result<(), RemoteError> {
        let result: Result<CreateFacesetResponse, _> = self
            .call("create_faceset", "faceset/create", || {
                self.form()
                    .text("display_name", display_name.to_string())
                    .text("outer_id", outer_id.to_string())
                    .text("tags", tags.to_string())
            })
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(err) if err.has_code(CODE_FACESET_EXIST) => {
                tracing::debug!(faceset = outer_id, "faceset already exists");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    async fn add_face(&self, face_token: &FaceToken, outer_id: &str) -> Result<u32, RemoteError> {
        let response: AddFaceResponse = self
            .call("add_face", "faceset/addface", || {
                self.form()
                    .text("face_tokens", face_token.to_string())
                    .text("outer_id", outer_id.to_string())
            })
            .await?;
        Ok(response.face_added)
    }

    async fn faceset_detail(&self, outer_id: &str) -> Result<Option<FacesetDetail>, RemoteError> {
        let result: Result<FacesetDetail, _> = self
            .call("faceset_detail", "faceset/getdetail", || {
                self.form().text("outer_id", outer_id.to_string())
            })
            .await;

        match result {
            Ok(detail) => Ok(Some(detail)),
            Err(err) if err.has_code(CODE_INVALID_OUTER_ID) => Ok(None),
            Err(err) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_success() {
        let detail: FacesetDetail =
            classify("faceset_detail", 200, r#"{"face_count": 7, "faceset_token": "ft"}"#).unwrap();
        assert_eq!(detail.face_count, 7);
        assert_eq!(detail.faceset_token.as_deref(), Some("ft"));
    }

    #[test]
    fn test_classify_concurrency_before_status() {
        let body = r#"{"error_message": "CONCURRENCY_LIMIT_EXCEEDED"}"#;
        let err = classify::<AddFaceResponse>("add_face", 403, body).unwrap_err();
        assert!(matches!(err, RemoteError::ConcurrencyLimit { status: 403, .. }));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_classify_non_200_is_service_error() {
        let body = r#"{"error_message": "INVALID_OUTER_ID"}"#;
        let err = classify::<FacesetDetail>("faceset_detail", 400, body).unwrap_err();
        match err {
            RemoteError::Service { status, code, body: raw, .. } => {
                assert_eq!(status, 400);
                assert_eq!(code.as_deref(), Some("INVALID_OUTER_ID"));
                assert_eq!(raw, body);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_classify_200_with_error_is_rejected() {
        let body = r#"{"error_message": "IMAGE_ERROR_UNSUPPORTED_FORMAT: image_file"}"#;
        let err = classify::<DetectResponse>("detect", 200, body).unwrap_err();
        assert!(matches!(err, RemoteError::Rejected { .. }));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_classify_malformed() {
        let err = classify::<DetectResponse>("detect", 502, "<html>bad gateway</html>").unwrap_err();
        assert!(matches!(err, RemoteError::Malformed { status: 502, .. }), "got {err:?}");
        assert!(err.to_string().contains("HTTP 502"));

        // Valid JSON missing a required field is malformed too.
        let err = classify::<SearchResponse>("search", 200, r#"{"time_used": 3}"#).unwrap_err();
        assert!(matches!(err, RemoteError::Malformed { status: 200, .. }));
    }

    #[test]
    fn test_surface_exhausted_concurrency() {
        let err = surface(RemoteError::ConcurrencyLimit {
            operation: "search",
            status: 403,
            body: "{}".into(),
        });
        assert!(matches!(err, RemoteError::Service { status: 403, .. }));
        assert!(err.has_code(CODE_CONCURRENCY_LIMIT));
    }

    #[test]
    fn test_options_debug_hides_credentials() {
        let options = ClientOptions::new("key-123", "secret-456");
        let debug = format!("{options:?}");
        assert!(!debug.contains("key-123"));
        assert!(!debug.contains("secret-456"));
    }

    #[test]
    fn test_missing_credentials_rejected() {
        let err = FacePlusPlusClient::new(ClientOptions::new("", "secret")).err();
        assert!(matches!(err, Some(RemoteError::Config(_))));
    }
}

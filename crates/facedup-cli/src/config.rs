use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Result};
use facedup_core::allocator::MAX_FACESET_CAPACITY;
use facedup_core::workflow::DEFAULT_SEARCH_RESULT_COUNT;
use facedup_core::{AllocatorOptions, ImageLimits, VerifierOptions, DEFAULT_CONFIDENCE_THRESHOLD};
use facedup_remote::{ClientOptions, RateLimit, RetryPolicy, DEFAULT_BASE_URL};

/// CLI configuration, loaded from environment variables.
pub struct Config {
    /// Face++ credentials; only `verify` needs them.
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
    pub api_base_url: String,
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Minimum search confidence (0–100) that counts as a duplicate.
    pub confidence_threshold: f64,
    /// Maximum faces per faceset.
    pub faceset_capacity: u32,
    pub search_result_count: u32,
    pub rate_limit_requests: usize,
    pub rate_limit_window_ms: u64,
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    pub request_timeout_secs: u64,
}

impl Config {
    /// Load configuration from `FPP_*` and `FACEDUP_*` environment variables with defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        let data_dir = var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                let home = var("HOME").unwrap_or_else(|| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("facedup");

        let db_path = var("FACEDUP_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("faces.db"));

        Self {
            api_key: var("FPP_API_KEY").filter(|v| !v.is_empty()),
            api_secret: var("FPP_API_SECRET").filter(|v| !v.is_empty()),
            api_base_url: var("FACEDUP_API_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            db_path,
            confidence_threshold: parse_or(&var, "FACEDUP_CONFIDENCE_THRESHOLD", DEFAULT_CONFIDENCE_THRESHOLD),
            faceset_capacity: parse_or(&var, "FACEDUP_FACESET_CAPACITY", MAX_FACESET_CAPACITY),
            search_result_count: parse_or(&var, "FACEDUP_SEARCH_RESULT_COUNT", DEFAULT_SEARCH_RESULT_COUNT),
            rate_limit_requests: parse_or(&var, "FACEDUP_RATE_LIMIT_REQUESTS", 10),
            rate_limit_window_ms: parse_or(&var, "FACEDUP_RATE_LIMIT_WINDOW_MS", 1000),
            max_retries: parse_or(&var, "FACEDUP_MAX_RETRIES", 3),
            retry_base_delay_ms: parse_or(&var, "FACEDUP_RETRY_BASE_DELAY_MS", 1000),
            request_timeout_secs: parse_or(&var, "FACEDUP_REQUEST_TIMEOUT_SECS", 30),
        }
    }

    pub fn has_credentials(&self) -> bool {
        self.api_key.is_some() && self.api_secret.is_some()
    }

    /// Options for the Face++ client. Fails if credentials are missing.
    pub fn client_options(&self) -> Result<ClientOptions> {
        let (Some(key), Some(secret)) = (&self.api_key, &self.api_secret) else {
            bail!("Face++ credentials not configured: set FPP_API_KEY and FPP_API_SECRET");
        };
        Ok(ClientOptions {
            base_url: self.api_base_url.clone(),
            timeout: Duration::from_secs(self.request_timeout_secs),
            rate_limit: RateLimit {
                max_requests: self.rate_limit_requests,
                window: Duration::from_millis(self.rate_limit_window_ms),
            },
            retry: RetryPolicy {
                max_retries: self.max_retries,
                base_delay: Duration::from_millis(self.retry_base_delay_ms),
            },
            ..ClientOptions::new(key.clone(), secret.clone())
        })
    }

    pub fn verifier_options(&self) -> VerifierOptions {
        VerifierOptions {
            confidence_threshold: self.confidence_threshold,
            search_result_count: self.search_result_count,
            image_limits: ImageLimits::default(),
            allocator: AllocatorOptions {
                capacity: self.faceset_capacity,
                ..AllocatorOptions::default()
            },
        }
    }
}

fn parse_or<T: FromStr>(var: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    var(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let cfg = config(&[("HOME", "/home/alice")]);
        assert_eq!(cfg.db_path, PathBuf::from("/home/alice/.local/share/facedup/faces.db"));
        assert_eq!(cfg.api_base_url, DEFAULT_BASE_URL);
        assert_eq!(cfg.confidence_threshold, 90.0);
        assert_eq!(cfg.faceset_capacity, 1000);
        assert_eq!(cfg.search_result_count, 5);
        assert_eq!(cfg.rate_limit_requests, 10);
        assert_eq!(cfg.max_retries, 3);
        assert!(!cfg.has_credentials());
    }

    #[test]
    fn test_overrides() {
        let cfg = config(&[
            ("XDG_DATA_HOME", "/data"),
            ("FACEDUP_CONFIDENCE_THRESHOLD", "85.5"),
            ("FACEDUP_FACESET_CAPACITY", "200"),
            ("FACEDUP_RATE_LIMIT_WINDOW_MS", "250"),
        ]);
        assert_eq!(cfg.db_path, PathBuf::from("/data/facedup/faces.db"));
        assert_eq!(cfg.confidence_threshold, 85.5);

        let verifier = cfg.verifier_options();
        assert_eq!(verifier.allocator.capacity, 200);
        assert_eq!(verifier.allocator.outer_id_prefix, "faceset");
    }

    #[test]
    fn test_unparsable_value_falls_back() {
        let cfg = config(&[("FACEDUP_MAX_RETRIES", "many")]);
        assert_eq!(cfg.max_retries, 3);
    }

    #[test]
    fn test_explicit_db_path_wins() {
        let cfg = config(&[("XDG_DATA_HOME", "/data"), ("FACEDUP_DB_PATH", "/var/lib/faces.db")]);
        assert_eq!(cfg.db_path, PathBuf::from("/var/lib/faces.db"));
    }

    #[test]
    fn test_client_options_require_credentials() {
        assert!(config(&[("FPP_API_KEY", "k")]).client_options().is_err());
        assert!(config(&[("FPP_API_KEY", "k"), ("FPP_API_SECRET", "")])
            .client_options()
            .is_err());

        let options = config(&[
            ("FPP_API_KEY", "k"),
            ("FPP_API_SECRET", "s"),
            ("FACEDUP_RETRY_BASE_DELAY_MS", "50"),
        ])
        .client_options()
        .unwrap();
        assert_eq!(options.api_key, "k");
        assert_eq!(options.retry.base_delay, Duration::from_millis(50));
        assert_eq!(options.rate_limit.window, Duration::from_secs(1));
    }
}

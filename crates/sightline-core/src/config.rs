use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::consumer::RunMode;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{0} environment variable not set")]
    Missing(&'static str),
}

/// Pipeline configuration, loaded once from `SIGHTLINE_*` environment
/// variables at process start and threaded explicitly into each component.
#[derive(Clone)]
pub struct Config {
    /// Recognition gateway base URL.
    pub recognition_endpoint: String,
    /// Bearer token for the recognition, storage, and queue gateways; the
    /// three share one service credential.
    pub recognition_api_key: String,
    /// Identity collection the cropped faces are searched against.
    pub collection_id: String,
    /// Identifier of the billable recognition model used for batch runs.
    pub model_id: String,
    /// Minimum confidence for a candidate match, enforced server-side.
    pub match_threshold: f32,

    /// Object storage base URL.
    pub storage_endpoint: String,
    /// Bucket holding the image binaries.
    pub bucket: String,
    /// Key prefix; full keys are `<prefix><content-digest>`.
    pub key_prefix: String,
    /// Media types processed without a rendition fallback.
    pub allowed_media_types: Vec<String>,

    /// Work queue base URL. Only required for batch mode.
    pub queue_endpoint: Option<String>,
    /// Long-poll wait per receive call.
    pub poll_wait_secs: u64,
    /// Maximum messages per receive call.
    pub receive_batch_size: u32,

    /// Document repository base URL.
    pub document_endpoint: String,
    pub document_user: String,
    pub document_password: String,
    /// Collection enumerated by the batch producer. Only required for batch mode.
    pub source_collection: Option<String>,
    /// Title of the rendition used when the primary media type is not allowed.
    pub hires_rendition: String,
    /// Document field receiving the recognized identities.
    pub identities_field: String,
    /// Name of the object tag used as the enqueue/processed marker.
    pub marker_tag: String,

    /// Concurrent identity searches per image.
    pub worker_pool_size: usize,
    /// Timeout for individual HTTP calls.
    pub http_timeout_secs: u64,
    /// Deadline for the model to reach RUNNING after a start request.
    pub model_start_timeout_secs: u64,
    /// Interval between model status polls while starting.
    pub model_poll_interval_secs: u64,

    /// Consumer run mode: poll forever or exit once the queue stays empty.
    pub run_mode: RunMode,
    /// Completion notice recipient; no notice is sent when unset.
    pub notify_email: Option<String>,
    pub notify_from: String,
}

impl Config {
    /// Load configuration from `SIGHTLINE_*` environment variables.
    ///
    /// Endpoints and credentials are required; everything else falls back to
    /// a default. Unparseable numeric values fall back silently.
    pub fn from_env() -> Result<Self, ConfigError> {
        let run_mode = match std::env::var("SIGHTLINE_RUN_MODE").as_deref() {
            Ok("drain") => RunMode::Drain { empty_polls: env_u32("SIGHTLINE_DRAIN_EMPTY_POLLS", 3) },
            _ => RunMode::Forever,
        };

        Ok(Self {
            recognition_endpoint: env_required("SIGHTLINE_RECOGNITION_ENDPOINT")?,
            recognition_api_key: env_required("SIGHTLINE_RECOGNITION_API_KEY")?,
            collection_id: env_required("SIGHTLINE_COLLECTION_ID")?,
            model_id: env_required("SIGHTLINE_MODEL_ID")?,
            match_threshold: env_f32("SIGHTLINE_MATCH_THRESHOLD", 80.0),

            storage_endpoint: env_required("SIGHTLINE_STORAGE_ENDPOINT")?,
            bucket: env_required("SIGHTLINE_BUCKET")?,
            key_prefix: env_string("SIGHTLINE_KEY_PREFIX", "binaries/"),
            allowed_media_types: env_list(
                "SIGHTLINE_ALLOWED_MEDIA_TYPES",
                &["image/jpeg", "image/png"],
            ),

            queue_endpoint: std::env::var("SIGHTLINE_QUEUE_ENDPOINT").ok(),
            poll_wait_secs: env_u64("SIGHTLINE_POLL_WAIT_SECS", 20),
            receive_batch_size: env_u32("SIGHTLINE_RECEIVE_BATCH_SIZE", 10),

            document_endpoint: env_required("SIGHTLINE_DOCUMENT_ENDPOINT")?,
            document_user: env_required("SIGHTLINE_DOCUMENT_USER")?,
            document_password: env_required("SIGHTLINE_DOCUMENT_PASSWORD")?,
            source_collection: std::env::var("SIGHTLINE_SOURCE_COLLECTION").ok(),
            hires_rendition: env_string("SIGHTLINE_HIRES_RENDITION", "FullHD"),
            identities_field: env_string("SIGHTLINE_IDENTITIES_FIELD", "recognition:identities"),
            marker_tag: env_string("SIGHTLINE_MARKER_TAG", "recognition-state"),

            worker_pool_size: env_usize("SIGHTLINE_WORKER_POOL_SIZE", 4),
            http_timeout_secs: env_u64("SIGHTLINE_HTTP_TIMEOUT_SECS", 10),
            model_start_timeout_secs: env_u64("SIGHTLINE_MODEL_START_TIMEOUT_SECS", 900),
            model_poll_interval_secs: env_u64("SIGHTLINE_MODEL_POLL_INTERVAL_SECS", 15),

            run_mode,
            notify_email: std::env::var("SIGHTLINE_NOTIFY_EMAIL").ok(),
            notify_from: env_string("SIGHTLINE_NOTIFY_FROM", "no-reply@localhost"),
        })
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn poll_wait(&self) -> Duration {
        Duration::from_secs(self.poll_wait_secs)
    }

    pub fn model_start_timeout(&self) -> Duration {
        Duration::from_secs(self.model_start_timeout_secs)
    }

    pub fn model_poll_interval(&self) -> Duration {
        Duration::from_secs(self.model_poll_interval_secs)
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("recognition_endpoint", &self.recognition_endpoint)
            .field("recognition_api_key", &"[REDACTED]")
            .field("collection_id", &self.collection_id)
            .field("model_id", &self.model_id)
            .field("match_threshold", &self.match_threshold)
            .field("storage_endpoint", &self.storage_endpoint)
            .field("bucket", &self.bucket)
            .field("key_prefix", &self.key_prefix)
            .field("allowed_media_types", &self.allowed_media_types)
            .field("queue_endpoint", &self.queue_endpoint)
            .field("poll_wait_secs", &self.poll_wait_secs)
            .field("receive_batch_size", &self.receive_batch_size)
            .field("document_endpoint", &self.document_endpoint)
            .field("document_user", &self.document_user)
            .field("document_password", &"[REDACTED]")
            .field("source_collection", &self.source_collection)
            .field("hires_rendition", &self.hires_rendition)
            .field("identities_field", &self.identities_field)
            .field("marker_tag", &self.marker_tag)
            .field("worker_pool_size", &self.worker_pool_size)
            .field("http_timeout_secs", &self.http_timeout_secs)
            .field("model_start_timeout_secs", &self.model_start_timeout_secs)
            .field("model_poll_interval_secs", &self.model_poll_interval_secs)
            .field("run_mode", &self.run_mode)
            .field("notify_email", &self.notify_email)
            .field("notify_from", &self.notify_from)
            .finish()
    }
}

fn env_required(key: &'static str) -> Result<String, ConfigError> {
    std::env::var(key).map_err(|_| ConfigError::Missing(key))
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_list(key: &str, default: &[&str]) -> Vec<String> {
    match std::env::var(key) {
        Ok(raw) => raw
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        Err(_) => default.iter().map(|s| s.to_string()).collect(),
    }
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_helpers_default_on_missing_or_garbage() {
        assert_eq!(env_f32("SIGHTLINE_TEST_UNSET_F32", 80.0), 80.0);
        assert_eq!(env_u64("SIGHTLINE_TEST_UNSET_U64", 20), 20);
        assert_eq!(env_usize("SIGHTLINE_TEST_UNSET_USIZE", 4), 4);
        assert_eq!(env_string("SIGHTLINE_TEST_UNSET_STRING", "FullHD"), "FullHD");

        std::env::set_var("SIGHTLINE_TEST_GARBAGE_F32", "not-a-number");
        assert_eq!(env_f32("SIGHTLINE_TEST_GARBAGE_F32", 80.0), 80.0);
        std::env::remove_var("SIGHTLINE_TEST_GARBAGE_F32");
    }

    #[test]
    fn test_env_list_parsing() {
        assert_eq!(
            env_list("SIGHTLINE_TEST_UNSET_LIST", &["image/jpeg", "image/png"]),
            vec!["image/jpeg".to_string(), "image/png".to_string()]
        );

        std::env::set_var("SIGHTLINE_TEST_SET_LIST", "image/png, image/webp,");
        assert_eq!(
            env_list("SIGHTLINE_TEST_SET_LIST", &["image/jpeg"]),
            vec!["image/png".to_string(), "image/webp".to_string()]
        );
        std::env::remove_var("SIGHTLINE_TEST_SET_LIST");
    }

    #[test]
    fn test_missing_required_var_errors() {
        std::env::remove_var("SIGHTLINE_RECOGNITION_ENDPOINT");
        let err = env_required("SIGHTLINE_RECOGNITION_ENDPOINT").unwrap_err();
        assert!(err.to_string().contains("SIGHTLINE_RECOGNITION_ENDPOINT"));
    }
}

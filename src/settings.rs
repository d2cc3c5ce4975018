use crate::api::upload::{DEFAULT_INITIATE_BASE, DEFAULT_LEGACY_ENDPOINTS};
use crate::api::UploadEndpoints;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_API_BASE_URL: &str = "https://queue.fal.run/fal-ai/nano-banana-pro";

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Settings {
    /// Queue endpoint; edit requests go to `<base>/edit`.
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    /// Base of the two-stage upload protocol. The three initiate variants are
    /// derived from it.
    #[serde(default = "default_upload_initiate_base")]
    pub upload_initiate_base: String,
    #[serde(default = "default_upload_legacy_endpoints")]
    pub upload_legacy_endpoints: Vec<String>,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_max_poll_attempts")]
    pub max_poll_attempts: u32,
    /// Job records older than this are discarded on recovery.
    #[serde(default = "default_record_ttl_hours")]
    pub record_ttl_hours: i64,
    /// How long a failed job record stays readable before it is removed.
    #[serde(default = "default_failure_grace_secs")]
    pub failure_grace_secs: i64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_store_path")]
    pub store_path: String,
    #[serde(default = "default_export_dir")]
    pub export_dir: String,
    /// Directory for a daily rolling log file. Logs go to stderr when unset.
    #[serde(default)]
    pub log_dir: Option<String>,
    /// When enabled the logger starts at debug level and honours `RUST_LOG`.
    #[serde(default)]
    pub debug_logging: bool,
}

fn default_api_base_url() -> String {
    DEFAULT_API_BASE_URL.into()
}

fn default_upload_initiate_base() -> String {
    DEFAULT_INITIATE_BASE.into()
}

fn default_upload_legacy_endpoints() -> Vec<String> {
    DEFAULT_LEGACY_ENDPOINTS.iter().map(|s| s.to_string()).collect()
}

fn default_poll_interval_secs() -> u64 {
    5
}

fn default_max_poll_attempts() -> u32 {
    60
}

fn default_record_ttl_hours() -> i64 {
    24
}

fn default_failure_grace_secs() -> i64 {
    5 * 60
}

fn default_request_timeout_secs() -> u64 {
    60
}

fn default_store_path() -> String {
    "scriptoon_store.json".into()
}

fn default_export_dir() -> String {
    "scriptoon_exports".into()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            upload_initiate_base: default_upload_initiate_base(),
            upload_legacy_endpoints: default_upload_legacy_endpoints(),
            poll_interval_secs: default_poll_interval_secs(),
            max_poll_attempts: default_max_poll_attempts(),
            record_ttl_hours: default_record_ttl_hours(),
            failure_grace_secs: default_failure_grace_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            store_path: default_store_path(),
            export_dir: default_export_dir(),
            log_dir: None,
            debug_logging: false,
        }
    }
}

impl Settings {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path).unwrap_or_default();
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_json::from_str(&content)?)
    }

    pub fn save(&self, path: &str) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn upload_endpoints(&self) -> UploadEndpoints {
        UploadEndpoints::from_bases(
            &self.upload_initiate_base,
            self.upload_legacy_endpoints.clone(),
        )
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn max_poll_attempts(&self) -> u32 {
        if self.max_poll_attempts == 0 {
            tracing::warn!("max_poll_attempts of 0 is invalid; using default 60");
            return default_max_poll_attempts();
        }
        self.max_poll_attempts
    }
}

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::secrets::SecretRef;

pub const CONFIG_VERSION: &str = "1.0";

/// Environment variable consulted for the LLM key when the config names none.
pub const DEFAULT_LLM_KEY_ENV: &str = "OPENAI_API_KEY";
pub const DEFAULT_STORAGE_TOKEN_ENV: &str = "RYOSHU_STORAGE_TOKEN";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default = "default_version")]
    pub version: String,
    /// Defaults to `~/.ryoshu/data/ryoshu.db`.
    #[serde(default)]
    pub database_path: Option<PathBuf>,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub ocr: OcrConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
}

fn default_version() -> String {
    CONFIG_VERSION.to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: default_version(),
            database_path: None,
            worker: WorkerConfig::default(),
            ocr: OcrConfig::default(),
            llm: LlmConfig::default(),
            storage: StorageConfig::default(),
            server: ServerConfig::default(),
            auth: AuthConfig::default(),
        }
    }
}

impl Config {
    pub fn resolved_database_path(&self) -> PathBuf {
        self.database_path
            .clone()
            .or_else(crate::db::default_database_path)
            .unwrap_or_else(|| PathBuf::from("ryoshu.db"))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkerConfig {
    /// Sleep between polls when the queue is empty.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default)]
    pub backoff: BackoffConfig,
    /// Minimum spacing of the degraded-mode warning.
    #[serde(default = "default_degraded_log_interval_secs")]
    pub degraded_log_interval_secs: u64,
}

fn default_poll_interval_secs() -> u64 {
    2
}

fn default_degraded_log_interval_secs() -> u64 {
    60
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            backoff: BackoffConfig::default(),
            degraded_log_interval_secs: default_degraded_log_interval_secs(),
        }
    }
}

impl WorkerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn degraded_log_interval(&self) -> Duration {
        Duration::from_secs(self.degraded_log_interval_secs)
    }
}

/// Delay after a loop-level failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum BackoffConfig {
    Fixed {
        #[serde(default = "default_backoff_secs")]
        delay_secs: u64,
    },
    Exponential {
        initial_secs: u64,
        max_secs: u64,
        #[serde(default = "default_backoff_factor")]
        factor: f64,
    },
}

fn default_backoff_secs() -> u64 {
    5
}

fn default_backoff_factor() -> f64 {
    2.0
}

impl Default for BackoffConfig {
    fn default() -> Self {
        BackoffConfig::Fixed {
            delay_secs: default_backoff_secs(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OcrEngine {
    #[default]
    TesseractCli,
    Leptess,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OcrConfig {
    #[serde(default)]
    pub engine: OcrEngine,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default = "default_tesseract_path")]
    pub tesseract_path: PathBuf,
    #[serde(default = "default_ocr_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_language() -> String {
    "jpn".to_string()
}

fn default_tesseract_path() -> PathBuf {
    PathBuf::from("tesseract")
}

fn default_ocr_timeout_secs() -> u64 {
    120
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            engine: OcrEngine::default(),
            language: default_language(),
            tesseract_path: default_tesseract_path(),
            timeout_secs: default_ocr_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LlmConfig {
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_llm_key")]
    pub api_key: SecretRef,
    #[serde(default)]
    pub temperature: f32,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_llm_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_model() -> String {
    "gpt-3.5-turbo".to_string()
}

fn default_llm_key() -> SecretRef {
    SecretRef::from_env(DEFAULT_LLM_KEY_ENV)
}

fn default_llm_timeout_secs() -> u64 {
    60
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_llm_base_url(),
            model: default_model(),
            api_key: default_llm_key(),
            temperature: 0.0,
            timeout_secs: default_llm_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    /// When set, only objects in this bucket are fetched.
    #[serde(default)]
    pub bucket: Option<String>,
    #[serde(default = "default_region")]
    pub region: String,
    /// S3-compatible endpoint; switches to path-style URLs.
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_storage_token")]
    pub token: SecretRef,
    /// Directory for downloads. Defaults to the system temp dir.
    #[serde(default)]
    pub temp_dir: Option<PathBuf>,
    /// Root for local file references submitted by non-admin sessions.
    /// When unset they may only submit object-store references.
    #[serde(default)]
    pub upload_dir: Option<PathBuf>,
    #[serde(default = "default_storage_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_storage_token() -> SecretRef {
    SecretRef::from_env(DEFAULT_STORAGE_TOKEN_ENV)
}

fn default_storage_timeout_secs() -> u64 {
    60
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            bucket: None,
            region: default_region(),
            endpoint: None,
            token: default_storage_token(),
            temp_dir: None,
            upload_dir: None,
            timeout_secs: default_storage_timeout_secs(),
        }
    }
}

impl StorageConfig {
    pub fn resolved_temp_dir(&self) -> PathBuf {
        self.temp_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_stream_interval_secs")]
    pub stream_interval_secs: u64,
    #[serde(default = "default_stream_limit")]
    pub stream_limit: u64,
}

fn default_bind() -> String {
    "127.0.0.1:3000".to_string()
}

fn default_stream_interval_secs() -> u64 {
    2
}

fn default_stream_limit() -> u64 {
    100
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            stream_interval_secs: default_stream_interval_secs(),
            stream_limit: default_stream_limit(),
        }
    }
}

impl ServerConfig {
    pub fn stream_interval(&self) -> Duration {
        Duration::from_secs(self.stream_interval_secs)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuthConfig {
    #[serde(default)]
    pub sessions: Vec<SessionConfig>,
}

/// A bearer token and the uploader it authenticates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SessionConfig {
    pub token: String,
    pub uploader_name: String,
    #[serde(default)]
    pub is_admin: bool,
}

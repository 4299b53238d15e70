use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::config::schema::{BackoffConfig, Config, CONFIG_VERSION};
use crate::error::ConfigError;

pub const ENV_DATABASE_PATH: &str = "RYOSHU_DATABASE_PATH";
pub const ENV_BIND: &str = "RYOSHU_BIND";
pub const ENV_STORAGE_BUCKET: &str = "RYOSHU_STORAGE_BUCKET";
pub const ENV_STORAGE_REGION: &str = "AWS_REGION";
pub const ENV_STORAGE_ENDPOINT: &str = "RYOSHU_STORAGE_ENDPOINT";
pub const ENV_UPLOAD_DIR: &str = "RYOSHU_UPLOAD_DIR";

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<Config, ConfigError> {
    let config: Config = serde_json::from_str(content)?;
    finalize(config)
}

/// Loads the file if one is given, otherwise starts from defaults.
pub fn load_config_or_default(path: Option<&Path>) -> Result<Config, ConfigError> {
    match path {
        Some(path) => load_config(path),
        None => finalize(Config::default()),
    }
}

fn finalize(mut config: Config) -> Result<Config, ConfigError> {
    apply_env_overrides(&mut config, |name| std::env::var(name).ok());
    validate_config(&config)?;
    Ok(config)
}

/// Applies environment overrides. Empty values are ignored.
pub fn apply_env_overrides<F>(config: &mut Config, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

    if let Some(path) = get(ENV_DATABASE_PATH) {
        config.database_path = Some(PathBuf::from(path));
    }
    if let Some(bind) = get(ENV_BIND) {
        config.server.bind = bind;
    }
    if let Some(bucket) = get(ENV_STORAGE_BUCKET) {
        config.storage.bucket = Some(bucket);
    }
    if let Some(region) = get(ENV_STORAGE_REGION) {
        config.storage.region = region;
    }
    if let Some(endpoint) = get(ENV_STORAGE_ENDPOINT) {
        config.storage.endpoint = Some(endpoint);
    }
    if let Some(dir) = get(ENV_UPLOAD_DIR) {
        config.storage.upload_dir = Some(PathBuf::from(dir));
    }
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::Validation {
        message: message.into(),
    }
}

pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.version != CONFIG_VERSION {
        return Err(invalid(format!(
            "Unsupported config version: {}",
            config.version
        )));
    }

    let non_zero = [
        ("worker.poll_interval_secs", config.worker.poll_interval_secs),
        (
            "worker.degraded_log_interval_secs",
            config.worker.degraded_log_interval_secs,
        ),
        ("ocr.timeout_secs", config.ocr.timeout_secs),
        ("llm.timeout_secs", config.llm.timeout_secs),
        ("storage.timeout_secs", config.storage.timeout_secs),
        ("server.stream_interval_secs", config.server.stream_interval_secs),
        ("server.stream_limit", config.server.stream_limit),
    ];
    for (name, value) in non_zero {
        if value == 0 {
            return Err(invalid(format!("{} must be greater than zero", name)));
        }
    }

    match &config.worker.backoff {
        BackoffConfig::Fixed { delay_secs } if *delay_secs == 0 => {
            return Err(invalid("worker.backoff.delay_secs must be greater than zero"));
        }
        BackoffConfig::Exponential {
            initial_secs,
            max_secs,
            factor,
        } => {
            if *initial_secs == 0 {
                return Err(invalid(
                    "worker.backoff.initial_secs must be greater than zero",
                ));
            }
            if max_secs < initial_secs {
                return Err(invalid("worker.backoff.max_secs must be >= initial_secs"));
            }
            if !factor.is_finite() || *factor < 1.0 {
                return Err(invalid("worker.backoff.factor must be >= 1"));
            }
        }
        BackoffConfig::Fixed { .. } => {}
    }

    if !(0.0..=2.0).contains(&config.llm.temperature) {
        return Err(invalid("llm.temperature must be between 0 and 2"));
    }

    let mut tokens = HashSet::new();
    for session in &config.auth.sessions {
        if session.token.trim().is_empty() {
            return Err(invalid(format!(
                "Session for '{}' has an empty token",
                session.uploader_name
            )));
        }
        if session.uploader_name.trim().is_empty() {
            return Err(invalid("Session uploader_name must not be empty"));
        }
        if !tokens.insert(session.token.as_str()) {
            return Err(invalid(format!(
                "Duplicate session token for '{}'",
                session.uploader_name
            )));
        }
    }

    Ok(())
}

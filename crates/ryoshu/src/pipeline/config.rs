use std::time::Duration;

use crate::config::Config;

/// Per-job settings the pipeline needs at run time.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub model: String,
    pub temperature: f32,
    pub retrieval_timeout: Duration,
    pub ocr_timeout: Duration,
    pub llm_timeout: Duration,
}

impl PipelineConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            model: config.llm.model.clone(),
            temperature: config.llm.temperature,
            retrieval_timeout: Duration::from_secs(config.storage.timeout_secs),
            ocr_timeout: Duration::from_secs(config.ocr.timeout_secs),
            llm_timeout: Duration::from_secs(config.llm.timeout_secs),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

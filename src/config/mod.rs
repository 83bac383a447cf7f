//! Configuration management for hintbatch
//!
//! Settings come from a TOML file, environment variables (a `.env` file is
//! honoured), or both: the file is read first and the environment overrides
//! it. API keys are never read from the file; see
//! [`CredentialPool::from_env`](crate::credentials::CredentialPool::from_env).

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::credentials::DEFAULT_MAX_NUMBERED_KEYS;
use crate::dispatch::DispatchConfig;
use crate::error::{Error, Result};
use crate::input::{parse_skip_rows, InputConfig};
use crate::llm::LlmConfig;
use crate::output::OutputConfig;
use crate::service::ServiceConfig;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Text-generation service
    pub gemini: LlmConfig,

    /// Retry timing
    pub dispatch: DispatchConfig,

    /// Input table layout
    pub input: InputConfig,

    /// Output location
    pub output: OutputConfig,

    /// Polling service
    pub service: ServiceConfig,

    /// Prompt template
    pub prompt: PromptConfig,

    /// Credential discovery
    pub credentials: CredentialsConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Prompt template configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptConfig {
    /// Handlebars template file; the built-in template is used when unset
    pub template_path: Option<PathBuf>,
}

/// Credential discovery configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialsConfig {
    /// Highest `API_KEY_<n>` suffix scanned
    pub max_numbered_keys: usize,
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            max_numbered_keys: DEFAULT_MAX_NUMBERED_KEYS,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (text, json)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: String::from("info"),
            format: String::from("text"),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration from an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        config.apply_overrides(lookup)?;
        Ok(config)
    }

    /// Load configuration from a file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::config(format!("Failed to read config file {}: {e}", path.display()))
        })?;

        toml::from_str(&content).map_err(|e| {
            Error::config(format!(
                "Failed to parse TOML config file {}: {e}",
                path.display()
            ))
        })
    }

    /// Load the optional file, apply environment overrides and validate
    pub fn load(path: Option<&Path>) -> Result<Self> {
        dotenvy::dotenv().ok();

        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_overrides(|name| std::env::var(name).ok())?;
        config.validate()?;

        Ok(config)
    }

    /// Override settings from environment-style variables
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(v) = var("GEMINI_ENDPOINT") {
            self.gemini.endpoint = v;
        }
        if let Some(v) = var("GEMINI_MODEL") {
            self.gemini.model = v;
        }
        if let Some(v) = var("GEMINI_TIMEOUT") {
            self.gemini.timeout_secs = parse_var("GEMINI_TIMEOUT", &v)?;
        }
        if let Some(v) = var("HINTBATCH_PROXY") {
            self.gemini.proxy = Some(v);
        }
        if let Some(v) = var("HINTBATCH_REQUESTS_PER_MINUTE") {
            self.gemini.requests_per_minute = Some(parse_var("HINTBATCH_REQUESTS_PER_MINUTE", &v)?);
        }

        if let Some(v) = var("PROBLEM_COLUMN") {
            self.input.fields.problem = v;
        }
        if let Some(v) = var("CODE_COLUMN") {
            self.input.fields.code = v;
        }
        if let Some(v) = var("ANSWER_COLUMN") {
            self.input.fields.answer = v;
        }
        if let Some(v) = lookup("SKIP_ROWS") {
            self.input.skip_rows = parse_skip_rows(&v)?;
        }
        if let Some(v) = var("HINTBATCH_FIRST_ROW") {
            self.input.first_row_number = parse_var("HINTBATCH_FIRST_ROW", &v)?;
        }

        if let Some(v) = var("HINTBATCH_RATE_LIMIT_BASE_MS") {
            self.dispatch.rate_limit_base_ms = parse_var("HINTBATCH_RATE_LIMIT_BASE_MS", &v)?;
        }
        if let Some(v) = var("HINTBATCH_TRANSIENT_MAX_ATTEMPTS") {
            self.dispatch.transient_max_attempts =
                parse_var("HINTBATCH_TRANSIENT_MAX_ATTEMPTS", &v)?;
        }

        if let Some(v) = var("HINTBATCH_OUTPUT_DIR") {
            self.output.dir = PathBuf::from(v);
        }
        if let Some(v) = var("HINTBATCH_INPUT_DIR") {
            self.service.input_dir = PathBuf::from(v);
        }
        if let Some(v) = var("HINTBATCH_PROCESSED_DIR") {
            self.service.processed_dir = Some(PathBuf::from(v));
        }
        if let Some(v) = var("HINTBATCH_POLL_INTERVAL") {
            self.service.poll_interval_secs = parse_var("HINTBATCH_POLL_INTERVAL", &v)?;
        }

        if let Some(v) = var("HINTBATCH_PROMPT_TEMPLATE") {
            self.prompt.template_path = Some(PathBuf::from(v));
        }

        if let Some(v) = var("HINTBATCH_LOG_LEVEL") {
            self.logging.level = v;
        }
        if let Some(v) = var("HINTBATCH_LOG_FORMAT") {
            self.logging.format = v;
        }

        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.gemini.model.trim().is_empty() {
            return Err(Error::config("gemini.model must not be empty"));
        }

        if self.gemini.timeout_secs == 0 {
            return Err(Error::config("gemini.timeout_secs must be greater than 0"));
        }

        if self.gemini.requests_per_minute == Some(0) {
            return Err(Error::config("gemini.requests_per_minute must be greater than 0"));
        }

        if self.dispatch.rate_limit_base_ms == 0 {
            return Err(Error::config(
                "dispatch.rate_limit_base_ms must be greater than 0",
            ));
        }

        if self.dispatch.transient_max_attempts == 0 {
            return Err(Error::config(
                "dispatch.transient_max_attempts must be greater than 0",
            ));
        }

        if self.dispatch.backoff_multiplier < 1.0 {
            return Err(Error::config("dispatch.backoff_multiplier must be at least 1.0"));
        }

        if self.dispatch.transient_min_delay_ms > self.dispatch.transient_max_delay_ms {
            return Err(Error::config(
                "dispatch.transient_min_delay_ms must not exceed transient_max_delay_ms",
            ));
        }

        if self.service.poll_interval_secs == 0 {
            return Err(Error::config("service.poll_interval_secs must be greater than 0"));
        }

        if self.credentials.max_numbered_keys == 0 {
            return Err(Error::config(
                "credentials.max_numbered_keys must be greater than 0",
            ));
        }

        if !matches!(self.logging.format.as_str(), "text" | "json") {
            return Err(Error::config(format!(
                "logging.format must be 'text' or 'json', got '{}'",
                self.logging.format
            )));
        }

        Ok(())
    }
}

fn parse_var<T: FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::config(format!("Invalid value for {name}: '{value}'")))
}

//! Remote call adapter for the text-generation service
//!
//! This module is the request/response boundary: one call, one credential,
//! one rendered prompt. It performs no retries of its own. Failures are
//! classified into the three kinds the dispatcher understands:
//!
//! - [`CallError::RateLimited`] - the credential is over quota
//! - [`CallError::Transient`] - network or service error worth retrying
//! - [`CallError::Fatal`] - anything else (bad request, auth rejection)
//!
//! Status-code classification is configurable through [`StatusPolicy`].

use async_trait::async_trait;
use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::num::NonZeroU32;
use std::time::Duration;
use thiserror::Error;

use crate::credentials::Credential;
use crate::error::{ErrorCategory, HintbatchError, Result};

/// Header carrying the API key
const API_KEY_HEADER: &str = "x-goog-api-key";

/// Marker the service puts in quota rejections regardless of status code
const RESOURCE_EXHAUSTED: &str = "RESOURCE_EXHAUSTED";

/// Maximum response body length kept in error messages
const ERROR_BODY_LIMIT: usize = 300;

/// Failure of a single remote call
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CallError {
    /// The service signalled over-quota / too many requests
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// Network or service error expected to be retryable
    #[error("Transient failure: {0}")]
    Transient(String),

    /// Malformed request, authentication rejection or unrecognized error
    #[error("Fatal failure: {0}")]
    Fatal(String),
}

impl CallError {
    /// Short kind label for logs
    pub fn kind(&self) -> &'static str {
        match self {
            Self::RateLimited(_) => "rate_limited",
            Self::Transient(_) => "transient",
            Self::Fatal(_) => "fatal",
        }
    }
}

impl HintbatchError for CallError {
    fn is_recoverable(&self) -> bool {
        // Fatal calls still end up as a row-scoped error record
        true
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::RateLimited(_) | Self::Transient(_) => ErrorCategory::Network,
            Self::Fatal(_) => ErrorCategory::Llm,
        }
    }
}

/// The remote text-generation operation
///
/// Implement this trait to plug in another service or a test double.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Generate a response for `prompt` using `credential`
    async fn generate(
        &self,
        credential: &Credential,
        prompt: &str,
    ) -> std::result::Result<String, CallError>;
}

/// Mapping from HTTP status codes to failure kinds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusPolicy {
    /// Status codes treated as rate limiting
    pub rate_limit_statuses: Vec<u16>,

    /// Status codes treated as transient
    pub transient_statuses: Vec<u16>,
}

impl Default for StatusPolicy {
    fn default() -> Self {
        Self {
            rate_limit_statuses: vec![429],
            transient_statuses: vec![408, 500, 502, 503, 504],
        }
    }
}

impl StatusPolicy {
    /// Classify a non-success response
    pub fn classify(&self, status: u16, body: &str) -> CallError {
        let message = format!("HTTP {status}: {}", truncate(body, ERROR_BODY_LIMIT));

        if self.rate_limit_statuses.contains(&status) || body.contains(RESOURCE_EXHAUSTED) {
            CallError::RateLimited(message)
        } else if self.transient_statuses.contains(&status) {
            CallError::Transient(message)
        } else {
            CallError::Fatal(message)
        }
    }
}

/// Configuration for the Gemini client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// API base URL
    pub endpoint: String,

    /// Model name to use
    pub model: String,

    /// Request timeout in seconds
    pub timeout_secs: u64,

    /// Optional proxy applied to all requests
    pub proxy: Option<String>,

    /// Optional pacing limit shared by all credentials
    pub requests_per_minute: Option<u32>,

    /// Status classification
    pub status_policy: StatusPolicy,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://generativelanguage.googleapis.com".to_string(),
            model: "gemini-1.5-flash".to_string(),
            timeout_secs: 120,
            proxy: None,
            requests_per_minute: None,
            status_policy: StatusPolicy::default(),
        }
    }
}

impl LlmConfig {
    /// Request timeout as Duration
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Full URL of the generate operation
    pub fn generate_url(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.endpoint.trim_end_matches('/'),
            self.model
        )
    }
}

/// Gemini generateContent request
#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    role: &'static str,
    parts: Vec<RequestPart<'a>>,
}

#[derive(Debug, Serialize)]
struct RequestPart<'a> {
    text: &'a str,
}

/// Gemini generateContent response
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

impl GenerateResponse {
    /// Concatenated text of the first candidate
    fn into_text(self) -> std::result::Result<String, CallError> {
        let block_reason = self.prompt_feedback.and_then(|f| f.block_reason);

        let Some(candidate) = self.candidates.into_iter().next() else {
            return Err(CallError::Fatal(format!(
                "Response contained no candidates (block reason: {})",
                block_reason.as_deref().unwrap_or("none")
            )));
        };

        let text: String = candidate
            .content
            .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
            .unwrap_or_default();

        if text.is_empty() {
            return Err(CallError::Fatal(format!(
                "Response candidate had no text (finish reason: {})",
                candidate.finish_reason.as_deref().unwrap_or("unknown")
            )));
        }

        Ok(text)
    }
}

/// HTTP client for the Gemini generateContent API
pub struct GeminiClient {
    client: Client,
    config: LlmConfig,
    pacer: Option<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>,
}

impl GeminiClient {
    /// Create a client from configuration
    ///
    /// # Errors
    ///
    /// Returns `Error::Http` if the HTTP client cannot be built (bad proxy URL).
    pub fn new(config: LlmConfig) -> Result<Self> {
        let mut builder = Client::builder()
            .timeout(config.request_timeout())
            .gzip(true);

        if let Some(proxy) = &config.proxy {
            builder = builder.proxy(reqwest::Proxy::all(proxy)?);
        }

        let client = builder.build()?;

        let pacer = config
            .requests_per_minute
            .and_then(NonZeroU32::new)
            .map(|rate| RateLimiter::direct(Quota::per_minute(rate)));

        Ok(Self {
            client,
            config,
            pacer,
        })
    }

    /// Client configuration
    pub fn config(&self) -> &LlmConfig {
        &self.config
    }

    fn classify_transport(err: &reqwest::Error) -> CallError {
        if err.is_timeout() {
            CallError::Transient("Request timeout".to_string())
        } else if err.is_connect() || err.is_request() || err.is_body() {
            CallError::Transient(format!("Request failed: {err}"))
        } else {
            CallError::Fatal(format!("Request failed: {err}"))
        }
    }
}

#[async_trait]
impl TextGenerator for GeminiClient {
    async fn generate(
        &self,
        credential: &Credential,
        prompt: &str,
    ) -> std::result::Result<String, CallError> {
        if let Some(pacer) = &self.pacer {
            pacer.until_ready().await;
        }

        let request = GenerateRequest {
            contents: vec![Content {
                role: "user",
                parts: vec![RequestPart { text: prompt }],
            }],
        };

        let response = self
            .client
            .post(self.config.generate_url())
            .header(API_KEY_HEADER, credential.expose())
            .json(&request)
            .send()
            .await
            .map_err(|e| Self::classify_transport(&e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(self.config.status_policy.classify(status.as_u16(), &body));
        }

        let body = response
            .text()
            .await
            .map_err(|e| Self::classify_transport(&e))?;

        let parsed: GenerateResponse = serde_json::from_str(&body).map_err(|e| {
            CallError::Transient(format!(
                "Failed to parse response: {e} (body: {})",
                truncate(&body, ERROR_BODY_LIMIT)
            ))
        })?;

        parsed.into_text()
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let truncated: String = text.chars().take(max_chars).collect();
        format!("{truncated}...")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = LlmConfig::default();
        assert_eq!(config.model, "gemini-1.5-flash");
        assert_eq!(config.request_timeout(), Duration::from_secs(120));
        assert_eq!(
            config.generate_url(),
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-1.5-flash:generateContent"
        );
    }

    #[test]
    fn test_status_classification() {
        let policy = StatusPolicy::default();

        assert!(matches!(policy.classify(429, ""), CallError::RateLimited(_)));
        assert!(matches!(policy.classify(503, ""), CallError::Transient(_)));
        assert!(matches!(policy.classify(400, "bad"), CallError::Fatal(_)));
        assert!(matches!(policy.classify(401, ""), CallError::Fatal(_)));
    }

    #[test]
    fn test_resource_exhausted_body_is_rate_limit() {
        let policy = StatusPolicy::default();
        let body = r#"{"error":{"code":403,"status":"RESOURCE_EXHAUSTED"}}"#;
        assert!(matches!(policy.classify(403, body), CallError::RateLimited(_)));
    }

    #[test]
    fn test_custom_policy() {
        let policy = StatusPolicy {
            rate_limit_statuses: vec![429, 403],
            transient_statuses: vec![],
        };
        assert!(matches!(policy.classify(403, ""), CallError::RateLimited(_)));
        assert!(matches!(policy.classify(503, ""), CallError::Fatal(_)));
    }

    #[test]
    fn test_parse_response_text() {
        let json = r#"{"candidates":[{"content":{"parts":[{"text":"Hint one. "},{"text":"Hint two."}]},"finishReason":"STOP"}]}"#;
        let parsed: GenerateResponse = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.into_text().unwrap(), "Hint one. Hint two.");
    }

    #[test]
    fn test_parse_blocked_response() {
        let json = r#"{"promptFeedback":{"blockReason":"SAFETY"}}"#;
        let parsed: GenerateResponse = serde_json::from_str(json).unwrap();
        let err = parsed.into_text().unwrap_err();
        assert!(matches!(err, CallError::Fatal(ref m) if m.contains("SAFETY")));
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("abcdefghij", 4), "abcd...");
    }
}

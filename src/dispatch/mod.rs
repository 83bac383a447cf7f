//! Credential-rotating retry dispatcher
//!
//! Turns one logical "process this row" request into a resilient call
//! sequence against a [`TextGenerator`]:
//!
//! ```text
//!              ┌──────── success ────────▶ record usage, return
//!              │
//!   attempt ───┼── rate limited ──▶ rotate key, jittered wait ──▶ attempt (unbounded)
//!              │
//!              ├── transient ─────▶ exponential wait ───────────▶ attempt (bounded)
//!              │                         └── bound reached ──▶ DispatchError::Failed
//!              │
//!              └── fatal ─────────▶ DispatchError::Failed
//! ```
//!
//! The rate-limit loop has no upper bound. A row blocked purely by rate
//! limiting is retried until it succeeds or shutdown is signalled.

pub mod backoff;

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::credentials::CredentialPool;
use crate::error::{ErrorCategory, HintbatchError};
use crate::llm::{CallError, TextGenerator};

pub use backoff::{ExponentialBackoff, JitteredBackoff};

/// Dispatch failure surfaced to the row processor
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// Fatal call failure or transient retries exhausted
    #[error("Dispatch failed after {attempts} attempt(s): {reason}")]
    Failed { attempts: u32, reason: String },

    /// Shutdown was signalled while the row was in flight
    #[error("Dispatch cancelled after {attempts} attempt(s)")]
    Cancelled { attempts: u32 },
}

impl DispatchError {
    /// Attempts made before the failure
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Failed { attempts, .. } | Self::Cancelled { attempts } => *attempts,
        }
    }
}

impl HintbatchError for DispatchError {
    fn is_recoverable(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Failed { .. } => ErrorCategory::Llm,
            Self::Cancelled { .. } => ErrorCategory::Other,
        }
    }
}

/// Retry timing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Base delay in milliseconds for the jittered rate-limit wait
    pub rate_limit_base_ms: u64,

    /// Attempts allowed for transient failures (including the first)
    pub transient_max_attempts: u32,

    /// Delay in milliseconds after the first transient failure
    pub transient_min_delay_ms: u64,

    /// Maximum delay in milliseconds between transient retries
    pub transient_max_delay_ms: u64,

    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            rate_limit_base_ms: 2000,
            transient_max_attempts: 3,
            transient_min_delay_ms: 4000,
            transient_max_delay_ms: 10_000,
            backoff_multiplier: 2.0,
        }
    }
}

impl DispatchConfig {
    /// Build the retry policy described by this configuration
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            rate_limit: JitteredBackoff::new(Duration::from_millis(self.rate_limit_base_ms)),
            transient: ExponentialBackoff {
                max_attempts: self.transient_max_attempts,
                min_delay: Duration::from_millis(self.transient_min_delay_ms),
                max_delay: Duration::from_millis(self.transient_max_delay_ms),
                multiplier: self.backoff_multiplier,
            },
        }
    }
}

/// What the dispatcher does after a failed attempt
#[derive(Debug, Clone, PartialEq)]
pub enum RetryDecision {
    /// Rotate to the next credential and retry after the delay (unbounded)
    RotateAndRetry(Duration),

    /// Retry with the same credential after the delay (bounded)
    Backoff(Duration),

    /// Stop retrying and surface the failure
    GiveUp(String),
}

/// Combined rate-limit and transient retry policy
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Wait applied after each rate-limit rotation
    pub rate_limit: JitteredBackoff,

    /// Bounded policy for transient failures
    pub transient: ExponentialBackoff,
}

impl RetryPolicy {
    /// Decide the next step given the failure and the transient failures so far
    ///
    /// `transient_failures` already includes `error` when it is transient.
    pub fn decide(&self, error: &CallError, transient_failures: u32) -> RetryDecision {
        match error {
            CallError::RateLimited(_) => RetryDecision::RotateAndRetry(self.rate_limit.next_delay()),
            CallError::Transient(reason) => {
                if self.transient.allows_retry(transient_failures) {
                    RetryDecision::Backoff(self.transient.delay_for(transient_failures))
                } else {
                    RetryDecision::GiveUp(format!(
                        "transient failure persisted after {transient_failures} attempt(s): {reason}"
                    ))
                }
            }
            CallError::Fatal(reason) => RetryDecision::GiveUp(reason.clone()),
        }
    }
}

/// Successful dispatch of one row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchOutcome {
    /// Rendered request text (unchanged across retries)
    pub prompt: String,

    /// Response text from the service
    pub response: String,

    /// Attempts taken, starting at 1
    pub attempts: u32,

    /// Redacted identity of the credential that succeeded
    pub credential: String,

    /// That credential's cumulative usage after this request
    pub credential_usage: u64,
}

/// Issues requests through a [`TextGenerator`] with rotation and retries
pub struct RetryDispatcher {
    generator: Arc<dyn TextGenerator>,
    pool: CredentialPool,
    policy: RetryPolicy,
    shutdown: Option<watch::Receiver<bool>>,
}

impl RetryDispatcher {
    /// Create a dispatcher owning the credential pool
    pub fn new(generator: Arc<dyn TextGenerator>, pool: CredentialPool, policy: RetryPolicy) -> Self {
        Self {
            generator,
            pool,
            policy,
            shutdown: None,
        }
    }

    /// Stop waiting and in-flight calls when `shutdown` flips to true
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Credential pool with its usage counters
    pub fn pool(&self) -> &CredentialPool {
        &self.pool
    }

    /// Retry policy in use
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Dispatch the rendered `prompt` for `row`
    ///
    /// # Errors
    ///
    /// - `DispatchError::Failed` on a fatal failure or when transient retries
    ///   are exhausted
    /// - `DispatchError::Cancelled` when shutdown is signalled
    pub async fn dispatch(
        &mut self,
        row: usize,
        prompt: &str,
    ) -> Result<DispatchOutcome, DispatchError> {
        let mut attempts: u32 = 0;
        let mut transient_failures: u32 = 0;

        loop {
            attempts += 1;
            let credential = self.pool.current().clone();

            debug!(row, attempt = attempts, key = %credential, "Attempting request");

            let call = self.generator.generate(&credential, prompt);
            let Some(result) = cancellable(&mut self.shutdown, call).await else {
                info!(row, attempt = attempts, "Request cancelled by shutdown");
                return Err(DispatchError::Cancelled { attempts });
            };

            let error = match result {
                Ok(response) => {
                    let credential_usage = self.pool.record_use(&credential);
                    if attempts > 1 {
                        debug!(row, attempts, "Request succeeded after retry");
                    }
                    return Ok(DispatchOutcome {
                        prompt: prompt.to_string(),
                        response,
                        attempts,
                        credential: credential.redacted(),
                        credential_usage,
                    });
                }
                Err(error) => error,
            };

            if matches!(error, CallError::Transient(_)) {
                transient_failures += 1;
            }

            warn!(
                row,
                attempt = attempts,
                key = %credential,
                kind = error.kind(),
                error = %error,
                "Request failed"
            );

            let delay = match self.policy.decide(&error, transient_failures) {
                RetryDecision::RotateAndRetry(delay) => {
                    self.pool.advance();
                    delay
                }
                RetryDecision::Backoff(delay) => delay,
                RetryDecision::GiveUp(reason) => {
                    return Err(DispatchError::Failed { attempts, reason });
                }
            };

            debug!(
                row,
                attempt = attempts,
                delay_ms = delay.as_millis() as u64,
                "Waiting before retrying"
            );

            if cancellable(&mut self.shutdown, tokio::time::sleep(delay))
                .await
                .is_none()
            {
                info!(row, attempt = attempts, "Retry wait cancelled by shutdown");
                return Err(DispatchError::Cancelled { attempts });
            }
        }
    }
}

/// Drive `fut` to completion unless shutdown is signalled first
///
/// Returns `None` when cancelled. A dropped shutdown sender never cancels.
pub(crate) async fn cancellable<F: Future>(
    shutdown: &mut Option<watch::Receiver<bool>>,
    fut: F,
) -> Option<F::Output> {
    let Some(rx) = shutdown.as_mut() else {
        return Some(fut.await);
    };

    if *rx.borrow() {
        return None;
    }

    tokio::pin!(fut);
    loop {
        tokio::select! {
            output = &mut fut => return Some(output),
            changed = rx.changed() => match changed {
                Ok(()) => {
                    if *rx.borrow() {
                        return None;
                    }
                }
                Err(_) => return Some(fut.await),
            },
        }
    }
}

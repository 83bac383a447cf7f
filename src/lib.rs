//! hintbatch - batch annotation of programming exercises with a text-generation service
//!
//! Reads a table of problem / code / answer rows, renders a prompt per row,
//! sends it to Gemini through a pool of API keys, and appends one result
//! record per row to a timestamped CSV file.
//!
//! # Architecture
//!
//! - [`credentials`] - API key pool with round-robin rotation and usage counts
//! - [`llm`] - Remote call adapter and failure classification
//! - [`dispatch`] - Retry state machine (key rotation, jittered and exponential backoff)
//! - [`input`] - CSV row source and field mapping
//! - [`prompt`] - Handlebars prompt template
//! - [`processor`] - Row to result record
//! - [`output`] - Append-only, per-record durable CSV sink
//! - [`batch`] - One pass over an input file
//! - [`service`] - Poll, process, archive loop
//! - [`config`] - Configuration management and settings
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use hintbatch::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load(None)?;
//!     let pool = CredentialPool::from_env(config.credentials.max_numbered_keys)?;
//!     let client = Arc::new(GeminiClient::new(config.gemini.clone())?);
//!     let mut runner = BatchRunner::new(&config, client, pool)?;
//!     let stats = runner
//!         .run_pass(std::path::Path::new("input.csv"), &config.output.dir, chrono::Local::now())
//!         .await?;
//!     println!("{} rows written to {}", stats.processed, stats.output.display());
//!     Ok(())
//! }
//! ```

pub mod batch;
pub mod config;
pub mod credentials;
pub mod dispatch;
pub mod error;
pub mod input;
pub mod llm;
pub mod models;
pub mod output;
pub mod processor;
pub mod prompt;
pub mod service;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::batch::{BatchRunner, BatchStats};
    pub use crate::config::Config;
    pub use crate::credentials::{Credential, CredentialPool};
    pub use crate::dispatch::{DispatchConfig, RetryDispatcher};
    pub use crate::error::{Error, ErrorCategory, HintbatchError, Result};
    pub use crate::llm::{CallError, GeminiClient, LlmConfig, TextGenerator};
    pub use crate::models::{RecordStatus, ResultRecord};
    pub use crate::service::{PollOutcome, Service, ServiceConfig};
}

// Direct re-exports for convenience
pub use models::{RecordStatus, ResultRecord, Row, RowFields};

//! Unified error handling for the hintbatch crate
//!
//! Call and row errors stay inside their layers: the dispatcher consumes
//! [`CallError`], the row processor turns [`RowError`] into an error record.
//! Only dispatch cancellation and run-level failures surface as [`Error`].
//!
//! # Architecture
//!
//! - [`HintbatchError`] - Common interface implemented by all error types
//! - [`ErrorCategory`] - Classification of errors for handling strategies
//! - [`Error`] - Unified error enum wrapping all domain-specific errors
//!
//! # Usage
//!
//! ```rust,ignore
//! use hintbatch::error::{Error, HintbatchError};
//!
//! fn handle_error(err: Error) {
//!     if err.is_recoverable() {
//!         println!("Row-scoped failure: {err}");
//!     } else {
//!         eprintln!("Fatal error: {err}");
//!     }
//! }
//! ```

use std::io;
use thiserror::Error;

// Re-export domain-specific errors for convenience
pub use crate::dispatch::DispatchError;
pub use crate::llm::CallError;
pub use crate::processor::RowError;

/// Common trait for all hintbatch error types
///
/// Failures that are retried or recorded at row scope report
/// `is_recoverable() == true`. Everything else aborts the run.
pub trait HintbatchError: std::error::Error {
    /// Check if the batch can continue past this error
    fn is_recoverable(&self) -> bool;

    /// Get the error category for handling strategies
    fn category(&self) -> ErrorCategory;
}

/// Classification of errors for handling strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Network-related errors (HTTP, timeout, rate limit)
    Network,
    /// Input table errors (short rows, unreadable records)
    Input,
    /// Output and archive I/O errors
    Storage,
    /// Text-generation service errors
    Llm,
    /// Configuration and validation errors
    Config,
    /// Other/unknown errors
    Other,
}

impl ErrorCategory {
    /// Short label used in logs
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Input => "input",
            Self::Storage => "storage",
            Self::Llm => "llm",
            Self::Config => "config",
            Self::Other => "other",
        }
    }
}

/// Unified error type for the hintbatch crate
#[derive(Error, Debug)]
pub enum Error {
    /// Dispatch errors (retries exhausted, fatal failure, cancellation)
    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// CSV read/write errors
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Prompt template errors
    #[error("Template error: {0}")]
    Template(String),

    /// HTTP client errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Generic error with context
    #[error("{context}")]
    Other {
        context: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl HintbatchError for Error {
    fn is_recoverable(&self) -> bool {
        match self {
            Self::Dispatch(e) => e.is_recoverable(),
            Self::Config(_) => false,
            Self::Io(_) => false,
            Self::Csv(_) => false,
            Self::Template(_) => false,
            Self::Http(_) => false,
            Self::Other { .. } => false,
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Dispatch(e) => e.category(),
            Self::Config(_) | Self::Template(_) => ErrorCategory::Config,
            Self::Io(_) => ErrorCategory::Storage,
            Self::Csv(_) => ErrorCategory::Input,
            Self::Http(_) => ErrorCategory::Network,
            Self::Other { .. } => ErrorCategory::Other,
        }
    }
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a generic error with context
    pub fn other(context: impl Into<String>) -> Self {
        Self::Other {
            context: context.into(),
            source: None,
        }
    }

    /// Create a generic error with context and source
    pub fn with_source(
        context: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Other {
            context: context.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Whether this is a startup configuration failure
    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config(_) | Self::Template(_))
    }
}

impl From<handlebars::TemplateError> for Error {
    fn from(err: handlebars::TemplateError) -> Self {
        Self::Template(err.to_string())
    }
}

impl From<handlebars::RenderError> for Error {
    fn from(err: handlebars::RenderError) -> Self {
        Self::Template(err.to_string())
    }
}

/// Result type alias using the unified Error type
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_category() {
        assert_eq!(
            CallError::RateLimited("quota".to_string()).category(),
            ErrorCategory::Network
        );

        let row_err = RowError::Malformed {
            row: 4,
            field: "code".to_string(),
            column: 2,
        };
        assert_eq!(row_err.category(), ErrorCategory::Input);
        assert!(row_err.is_recoverable());

        let csv_err = Error::Csv(csv::Error::from(io::Error::new(io::ErrorKind::Other, "eof")));
        assert_eq!(csv_err.category(), ErrorCategory::Input);
    }

    #[test]
    fn test_is_recoverable() {
        let dispatch_err = Error::Dispatch(DispatchError::Failed {
            attempts: 3,
            reason: "503".to_string(),
        });
        assert!(dispatch_err.is_recoverable());

        let cancelled = Error::Dispatch(DispatchError::Cancelled { attempts: 1 });
        assert!(!cancelled.is_recoverable());
    }

    #[test]
    fn test_config_error() {
        let err = Error::config("No API keys found");
        assert_eq!(err.category(), ErrorCategory::Config);
        assert!(!err.is_recoverable());
        assert!(err.is_config());
    }

    #[test]
    fn test_other_error() {
        let err = Error::other("Something went wrong");
        assert_eq!(err.category(), ErrorCategory::Other);
        assert_eq!(err.to_string(), "Something went wrong");
    }

    #[test]
    fn test_error_conversion() {
        let dispatch_err = DispatchError::Cancelled { attempts: 2 };
        let unified: Error = dispatch_err.into();
        assert!(matches!(unified, Error::Dispatch(DispatchError::Cancelled { attempts: 2 })));

        let io_err = io::Error::new(io::ErrorKind::NotFound, "input.csv");
        let unified: Error = io_err.into();
        assert_eq!(unified.category(), ErrorCategory::Storage);
    }
}

//! Row processor: field extraction, dispatch and result assembly
//!
//! Every row produces exactly one [`ResultRecord`]. `MalformedRow` and
//! `DispatchFailed` are caught here and turned into error records; only a
//! cancelled dispatch or an unclassified error escapes to the caller.

use thiserror::Error;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::dispatch::{DispatchError, RetryDispatcher};
use crate::error::{Error, ErrorCategory, HintbatchError, Result};
use crate::input::ResolvedMapping;
use crate::models::{ResultRecord, Row, RowFields};
use crate::prompt::PromptTemplate;

/// Row-scoped failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RowError {
    /// A required field is missing from the row
    #[error("Row {row} has no value for '{field}' (column index {column})")]
    Malformed {
        row: usize,
        field: String,
        column: usize,
    },

    /// A mapped field is not valid UTF-8
    #[error("Row {row} has invalid UTF-8 in '{field}' (column index {column})")]
    Undecodable {
        row: usize,
        field: String,
        column: usize,
    },

    /// Dispatch gave up on the row
    #[error("Row {row}: {source}")]
    DispatchFailed {
        row: usize,
        #[source]
        source: DispatchError,
    },
}

impl HintbatchError for RowError {
    fn is_recoverable(&self) -> bool {
        true
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Malformed { .. } | Self::Undecodable { .. } => ErrorCategory::Input,
            Self::DispatchFailed { .. } => ErrorCategory::Llm,
        }
    }
}

/// Turns rows into result records through the retry dispatcher
pub struct RowProcessor {
    template: PromptTemplate,
    dispatcher: RetryDispatcher,
}

impl RowProcessor {
    /// Create a processor
    pub fn new(template: PromptTemplate, dispatcher: RetryDispatcher) -> Self {
        Self {
            template,
            dispatcher,
        }
    }

    /// Forward shutdown to the dispatcher
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.dispatcher = self.dispatcher.with_shutdown(shutdown);
        self
    }

    /// Dispatcher and its credential pool
    pub fn dispatcher(&self) -> &RetryDispatcher {
        &self.dispatcher
    }

    /// Prompt template
    pub fn template(&self) -> &PromptTemplate {
        &self.template
    }

    /// Extract the logical fields, failing if any mapped column is missing
    /// or not valid UTF-8
    pub fn extract(mapping: &ResolvedMapping, row: &Row) -> std::result::Result<RowFields, RowError> {
        let mut values = Vec::with_capacity(3);
        for (field, column) in mapping.columns() {
            if row.undecodable.contains(&column) {
                return Err(RowError::Undecodable {
                    row: row.number,
                    field: field.to_string(),
                    column,
                });
            }
            let value = row.get(column).ok_or_else(|| RowError::Malformed {
                row: row.number,
                field: field.to_string(),
                column,
            })?;
            values.push(value);
        }
        Ok(RowFields::new(values[0], values[1], values[2]))
    }

    /// Extract whatever fields are present; missing ones are empty
    pub fn extract_lossy(mapping: &ResolvedMapping, row: &Row) -> RowFields {
        RowFields::new(
            row.get(mapping.problem).unwrap_or_default(),
            row.get(mapping.code).unwrap_or_default(),
            row.get(mapping.answer).unwrap_or_default(),
        )
    }

    /// Produce the result record for one row
    ///
    /// # Errors
    ///
    /// Returns `Error::Dispatch(DispatchError::Cancelled)` when shutdown
    /// interrupts the row, and `Error::Template` if rendering fails.
    pub async fn process(&mut self, mapping: &ResolvedMapping, row: &Row) -> Result<ResultRecord> {
        if row.skip {
            info!(row = row.number, "Skipped row");
            return Ok(ResultRecord::skipped(row.number, Self::extract_lossy(mapping, row)));
        }

        let fields = match Self::extract(mapping, row) {
            Ok(fields) => fields,
            Err(e) => {
                warn!(row = row.number, error = %e, "Malformed row");
                return Ok(ResultRecord::error(
                    row.number,
                    Self::extract_lossy(mapping, row),
                    None,
                    0,
                    &e.to_string(),
                ));
            }
        };

        let prompt = self.template.render(&fields)?;

        info!(row = row.number, "Processing row");
        match self.dispatcher.dispatch(row.number, &prompt).await {
            Ok(outcome) => Ok(ResultRecord::success(row.number, fields, outcome)),
            Err(DispatchError::Cancelled { attempts }) => {
                Err(Error::Dispatch(DispatchError::Cancelled { attempts }))
            }
            Err(source) => {
                let attempts = source.attempts();
                let e = RowError::DispatchFailed {
                    row: row.number,
                    source,
                };
                warn!(row = row.number, attempts, error = %e, "Row failed");
                Ok(ResultRecord::error(
                    row.number,
                    fields,
                    Some(prompt),
                    attempts,
                    &e.to_string(),
                ))
            }
        }
    }
}

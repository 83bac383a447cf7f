// Core data structures for hintbatch

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::dispatch::DispatchOutcome;

/// Output column order; matches the field order of [`ResultRecord`]
pub const RESULT_COLUMNS: [&str; 11] = [
    "row",
    "problem",
    "code",
    "answer",
    "prompt",
    "response",
    "timestamp",
    "attempts",
    "api_key",
    "total_requests",
    "status",
];

/// Response marker for skipped rows
pub const SKIPPED_MARKER: &str = "Skipped";

/// One input row, immutable once read
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    pub number: usize, // Spreadsheet row number, stable across retries
    pub values: Vec<String>,
    pub skip: bool, // Listed in the skip set; recorded without dispatch
    pub undecodable: Vec<usize>, // Columns that are not valid UTF-8
}

impl Row {
    /// Value at a zero-based column, if the row is long enough
    pub fn get(&self, column: usize) -> Option<&str> {
        self.values.get(column).map(String::as_str)
    }

    /// True when every field is empty or whitespace
    pub fn is_blank(&self) -> bool {
        self.values.iter().all(|v| v.trim().is_empty())
    }
}

/// Logical fields extracted from a row; also the prompt template data
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowFields {
    pub problem: String,
    pub code: String,
    pub answer: String,
}

impl RowFields {
    /// Build fields, collapsing doubled quotes in the code
    pub fn new(problem: &str, code: &str, answer: &str) -> Self {
        Self {
            problem: problem.to_string(),
            code: clean_code(code),
            answer: answer.to_string(),
        }
    }
}

/// Collapse `""` (spreadsheet quote escaping) to `"`
pub fn clean_code(code: &str) -> String {
    code.replace("\"\"", "\"")
}

/// Outcome class of a result record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    Success,
    Skipped,
    Error,
}

/// Durable output unit, one per row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub row: usize,
    pub problem: String,
    pub code: String,
    pub answer: String,
    pub prompt: String,
    pub response: String, // Response text, or the skip / error marker
    pub timestamp: DateTime<Utc>,
    pub attempts: u32,
    pub api_key: Option<String>, // Redacted identity of the successful credential
    pub total_requests: Option<u64>,
    pub status: RecordStatus,
}

impl ResultRecord {
    /// Record for a successfully dispatched row
    pub fn success(row: usize, fields: RowFields, outcome: DispatchOutcome) -> Self {
        Self {
            row,
            problem: fields.problem,
            code: fields.code,
            answer: fields.answer,
            prompt: outcome.prompt,
            response: outcome.response,
            timestamp: Utc::now(),
            attempts: outcome.attempts,
            api_key: Some(outcome.credential),
            total_requests: Some(outcome.credential_usage),
            status: RecordStatus::Success,
        }
    }

    /// Record for a row in the skip set
    pub fn skipped(row: usize, fields: RowFields) -> Self {
        Self {
            row,
            problem: fields.problem,
            code: fields.code,
            answer: fields.answer,
            prompt: String::new(),
            response: SKIPPED_MARKER.to_string(),
            timestamp: Utc::now(),
            attempts: 0,
            api_key: None,
            total_requests: None,
            status: RecordStatus::Skipped,
        }
    }

    /// Record for a row-scoped failure
    pub fn error(
        row: usize,
        fields: RowFields,
        prompt: Option<String>,
        attempts: u32,
        message: &str,
    ) -> Self {
        Self {
            row,
            problem: fields.problem,
            code: fields.code,
            answer: fields.answer,
            prompt: prompt.unwrap_or_default(),
            response: format!("Error: {message}"),
            timestamp: Utc::now(),
            attempts,
            api_key: None,
            total_requests: None,
            status: RecordStatus::Error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_row() {
        let blank = Row {
            number: 7,
            values: vec![String::new(), "  ".to_string(), String::new()],
            skip: false,
            undecodable: Vec::new(),
        };
        assert!(blank.is_blank());

        let filled = Row {
            number: 8,
            values: vec![String::new(), "x".to_string()],
            skip: false,
            undecodable: Vec::new(),
        };
        assert!(!filled.is_blank());
        assert_eq!(filled.get(1), Some("x"));
        assert_eq!(filled.get(5), None);
    }

    #[test]
    fn test_clean_code() {
        assert_eq!(clean_code(r#"print(""hi"")"#), r#"print("hi")"#);
        assert_eq!(clean_code("x = 1"), "x = 1");
    }

    #[test]
    fn test_error_record() {
        let fields = RowFields::new("p", "c", "a");
        let record = ResultRecord::error(4, fields, None, 0, "row too short");
        assert_eq!(record.status, RecordStatus::Error);
        assert_eq!(record.response, "Error: row too short");
        assert!(record.prompt.is_empty());
        assert!(record.api_key.is_none());
    }

    #[test]
    fn test_success_record() {
        let outcome = DispatchOutcome {
            prompt: "rendered".to_string(),
            response: "hint".to_string(),
            attempts: 2,
            credential: "...abcd".to_string(),
            credential_usage: 9,
        };
        let record = ResultRecord::success(3, RowFields::new("p", "c", "a"), outcome);
        assert_eq!(record.status, RecordStatus::Success);
        assert_eq!(record.api_key.as_deref(), Some("...abcd"));
        assert_eq!(record.total_requests, Some(9));
        assert_eq!(record.attempts, 2);
    }
}

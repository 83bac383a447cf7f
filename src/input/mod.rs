//! Row source over a CSV table
//!
//! Produces a lazy, finite, ordered sequence of [`Row`]s:
//!
//! - The first record is the header; data rows are numbered from
//!   `first_row_number` (2 by default, matching spreadsheet numbering).
//! - A record whose fields are all empty ends the data. Iteration stops there
//!   and never yields later rows.
//! - Rows listed in the skip set are yielded with `skip = true`.
//!
//! There is no resume cursor. Restarting means opening the file again.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::io::{Cursor, Read};
use std::path::Path;

use crate::error::{Error, Result};
use crate::models::Row;

/// Byte-order mark some spreadsheet exports put before the first header
const BOM: char = '\u{feff}';

/// Input table configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    /// Logical field to column mapping
    pub fields: FieldMapping,

    /// Row numbers recorded as skipped without dispatch
    pub skip_rows: BTreeSet<usize>,

    /// Number given to the first data row
    pub first_row_number: usize,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            fields: FieldMapping::default(),
            skip_rows: BTreeSet::new(),
            first_row_number: 2,
        }
    }
}

/// Column selectors for the logical fields
///
/// Each selector is a header name or a spreadsheet column letter (`B`, `AA`).
/// Header names take precedence over letters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldMapping {
    pub problem: String,
    pub code: String,
    pub answer: String,
}

impl Default for FieldMapping {
    fn default() -> Self {
        Self {
            problem: "B".to_string(),
            code: "C".to_string(),
            answer: "D".to_string(),
        }
    }
}

impl FieldMapping {
    /// Resolve selectors to zero-based positions against the header row
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` when a selector matches neither a header name
    /// nor a column inside the header's width.
    pub fn resolve(&self, headers: &[String]) -> Result<ResolvedMapping> {
        Ok(ResolvedMapping {
            problem: resolve_selector("problem", &self.problem, headers)?,
            code: resolve_selector("code", &self.code, headers)?,
            answer: resolve_selector("answer", &self.answer, headers)?,
        })
    }
}

/// Field positions resolved once per input file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedMapping {
    pub problem: usize,
    pub code: usize,
    pub answer: usize,
}

impl ResolvedMapping {
    /// `(field name, position)` pairs in output order
    pub fn columns(&self) -> [(&'static str, usize); 3] {
        [
            ("problem", self.problem),
            ("code", self.code),
            ("answer", self.answer),
        ]
    }
}

fn resolve_selector(field: &str, selector: &str, headers: &[String]) -> Result<usize> {
    let selector = selector.trim();
    if selector.is_empty() {
        return Err(Error::config(format!("Field '{field}' has an empty column selector")));
    }

    if let Some(index) = headers.iter().position(|h| h.trim() == selector) {
        return Ok(index);
    }

    match column_letter_index(selector) {
        Some(index) if index < headers.len() => Ok(index),
        Some(index) => Err(Error::config(format!(
            "Field '{field}' maps to column {selector} (index {index}) but the header has only {} column(s)",
            headers.len()
        ))),
        None => Err(Error::config(format!(
            "Field '{field}' maps to '{selector}', which is neither a header name nor a column letter. Headers: {}",
            headers.join(", ")
        ))),
    }
}

/// Convert a spreadsheet column letter (`A`, `Z`, `AA`) to a zero-based index
pub fn column_letter_index(letters: &str) -> Option<usize> {
    if letters.is_empty() || letters.len() > 3 || !letters.chars().all(|c| c.is_ascii_alphabetic()) {
        return None;
    }

    let mut index = 0usize;
    for c in letters.chars() {
        let digit = (c.to_ascii_uppercase() as u8 - b'A') as usize + 1;
        index = index * 26 + digit;
    }
    Some(index - 1)
}

/// Parse a comma-separated list of row numbers; blanks are ignored
pub fn parse_skip_rows(list: &str) -> Result<BTreeSet<usize>> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<usize>()
                .map_err(|_| Error::config(format!("Invalid row number in skip list: '{s}'")))
        })
        .collect()
}

/// Lazy iterator over the data rows of a CSV table
///
/// The table is held in memory so the bytes between records can be
/// inspected: the csv reader discards empty lines, and an empty line is the
/// end-of-data marker.
pub struct RowSource {
    reader: csv::Reader<Cursor<Vec<u8>>>,
    headers: Vec<String>,
    mapping: ResolvedMapping,
    skip_rows: BTreeSet<usize>,
    next_number: usize,
    finished: bool,
}

impl RowSource {
    /// Open a CSV file and resolve the field mapping against its header
    pub fn open(path: &Path, config: &InputConfig) -> Result<Self> {
        let data = std::fs::read(path)?;
        Self::from_bytes(data, config)
    }

    /// Build a source over any reader
    pub fn from_reader<R: Read>(mut reader: R, config: &InputConfig) -> Result<Self> {
        let mut data = Vec::new();
        reader.read_to_end(&mut data)?;
        Self::from_bytes(data, config)
    }

    /// Build a source over an in-memory table
    ///
    /// # Errors
    ///
    /// Returns `Error::Csv` if the header cannot be read and `Error::Config`
    /// if the field mapping does not fit the header.
    pub fn from_bytes(data: Vec<u8>, config: &InputConfig) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(Cursor::new(data));

        let headers: Vec<String> = reader
            .headers()?
            .iter()
            .enumerate()
            .map(|(i, h)| {
                if i == 0 {
                    h.trim_start_matches(BOM).to_string()
                } else {
                    h.to_string()
                }
            })
            .collect();

        let mapping = config.fields.resolve(&headers)?;
        tracing::debug!(headers = ?headers, mapping = ?mapping, "Resolved field mapping");

        let mut source = Self {
            reader,
            headers,
            mapping,
            skip_rows: config.skip_rows.clone(),
            next_number: config.first_row_number,
            finished: false,
        };

        if source.empty_line_follows() {
            tracing::info!(row = source.next_number, "Reached empty row, stopping processing");
            source.finished = true;
        }

        Ok(source)
    }

    /// Header row
    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    /// Field positions for this table
    pub fn mapping(&self) -> ResolvedMapping {
        self.mapping
    }

    /// Whether the unread input starts with an empty line
    fn empty_line_follows(&self) -> bool {
        let data = self.reader.get_ref().get_ref();
        let pos = usize::try_from(self.reader.position().byte()).unwrap_or(data.len());
        let mut rest = data.get(pos..).unwrap_or_default();

        // A record ended by CRLF stops after the CR; its LF is still unread
        if pos > 0 && data.get(pos - 1) == Some(&b'\r') {
            rest = rest.strip_prefix(b"\n").unwrap_or(rest);
        }

        matches!(rest.first(), Some(b'\n' | b'\r'))
    }
}

/// Decode every field, noting the columns that are not valid UTF-8
fn decode_fields(record: &csv::ByteRecord) -> (Vec<String>, Vec<usize>) {
    let mut undecodable = Vec::new();
    let values = record
        .iter()
        .enumerate()
        .map(|(column, field)| match std::str::from_utf8(field) {
            Ok(text) => text.to_string(),
            Err(_) => {
                undecodable.push(column);
                String::from_utf8_lossy(field).into_owned()
            }
        })
        .collect();
    (values, undecodable)
}

impl Iterator for RowSource {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        let mut record = csv::ByteRecord::new();
        match self.reader.read_byte_record(&mut record) {
            Ok(true) => {}
            Ok(false) => {
                self.finished = true;
                return None;
            }
            Err(e) => {
                self.finished = true;
                return Some(Err(Error::Csv(e)));
            }
        }

        let number = self.next_number;
        self.next_number += 1;

        let (values, undecodable) = decode_fields(&record);
        let row = Row {
            number,
            values,
            skip: self.skip_rows.contains(&number),
            undecodable,
        };

        if row.is_blank() {
            tracing::info!(row = number, "Reached empty row, stopping processing");
            self.finished = true;
            return None;
        }

        if !row.undecodable.is_empty() {
            tracing::warn!(row = number, columns = ?row.undecodable, "Row is not valid UTF-8");
        }

        if self.empty_line_follows() {
            tracing::info!(row = self.next_number, "Reached empty row, stopping processing");
            self.finished = true;
        }

        Some(Ok(row))
    }
}

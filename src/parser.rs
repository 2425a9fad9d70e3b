//! CSV tokenization into headers and raw records.
//!
//! The first record is the header row. Quoted fields may contain commas,
//! doubled quotes, and newlines. A data record whose field count differs from
//! the header count is dropped and reported as a [`ParseWarning`]; parsing
//! always continues with the next record.

use std::sync::Arc;

use log::{debug, warn};
use serde::Serialize;

use crate::io_utils;

/// One parsed data row, keyed by the original header text.
///
/// Values are stored positionally next to a shared header list, so duplicate
/// raw headers keep their own values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    headers: Arc<[String]>,
    values: Vec<Option<String>>,
    line: u64,
}

impl RawRecord {
    pub fn new(headers: Arc<[String]>, values: Vec<Option<String>>, line: u64) -> Self {
        debug_assert_eq!(headers.len(), values.len());
        Self {
            headers,
            values,
            line,
        }
    }

    pub fn get(&self, header: &str) -> Option<&str> {
        self.headers
            .iter()
            .position(|h| h == header)
            .and_then(|idx| self.value(idx))
    }

    pub fn value(&self, index: usize) -> Option<&str> {
        self.values.get(index).and_then(|v| v.as_deref())
    }

    pub fn values(&self) -> &[Option<String>] {
        &self.values
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&str>)> {
        self.headers
            .iter()
            .map(String::as_str)
            .zip(self.values.iter().map(|v| v.as_deref()))
    }

    /// 1-based physical line where the record started.
    pub fn line(&self) -> u64 {
        self.line
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Owned `(header, value)` pairs, used as the sample attached to load errors.
    pub fn to_pairs(&self) -> Vec<(String, Option<String>)> {
        self.iter()
            .map(|(h, v)| (h.to_string(), v.map(str::to_string)))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParseWarning {
    pub line: u64,
    pub expected_fields: usize,
    pub found_fields: usize,
    /// The line opened a quoted field that never closed.
    pub unterminated_quote: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ParsedCsv {
    pub headers: Vec<String>,
    pub records: Vec<RawRecord>,
    pub warnings: Vec<ParseWarning>,
}

impl ParsedCsv {
    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }
}

fn csv_reader(text: &str) -> csv::Reader<&[u8]> {
    csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .double_quote(true)
        .from_reader(text.as_bytes())
}

/// True when a quoted field in `raw` is still open at the end of the slice.
fn has_open_quote(raw: &[u8]) -> bool {
    let mut in_quotes = false;
    let mut field_start = true;
    let mut bytes = raw.iter().peekable();
    while let Some(&byte) = bytes.next() {
        if in_quotes {
            if byte == b'"' {
                if bytes.peek() == Some(&&b'"') {
                    bytes.next();
                } else {
                    in_quotes = false;
                }
            }
            continue;
        }
        match byte {
            b'"' if field_start => {
                in_quotes = true;
                field_start = false;
            }
            b',' | b'\n' | b'\r' => field_start = true,
            _ => field_start = false,
        }
    }
    in_quotes
}

/// Parses `text` into headers and records.
///
/// A data record that opens a quote and never closes it, or that spans
/// several physical lines and still has the wrong field count, is dropped
/// along with only the line it started on. Scanning resumes on the next
/// physical line.
pub fn parse_csv(text: &str) -> ParsedCsv {
    let text = io_utils::strip_bom(text);
    let mut parsed = ParsedCsv::default();
    let mut shared_headers: Option<Arc<[String]>> = None;
    let mut offset = 0usize;
    let mut line_base = 0u64;

    'scan: while offset < text.len() {
        let slice = &text[offset..];
        let mut reader = csv_reader(slice);
        let mut record = csv::ByteRecord::new();
        loop {
            match reader.read_byte_record(&mut record) {
                Ok(true) => {}
                Ok(false) => break 'scan,
                Err(err) => {
                    warn!("Stopping CSV scan after reader error: {err}");
                    break 'scan;
                }
            }
            let (start, start_line) = record
                .position()
                .map(|p| (p.byte() as usize, p.line()))
                .unwrap_or_default();
            let end = (reader.position().byte() as usize).min(slice.len());
            let start = start.min(end);
            let lead = &slice.as_bytes()[start..end];
            let skipped = lead.iter().take_while(|b| matches!(b, b'\r' | b'\n')).count();
            let newlines = lead[..skipped].iter().filter(|b| **b == b'\n').count() as u64;
            let start = start + skipped;
            let line = line_base + start_line + newlines;

            let headers = match &shared_headers {
                Some(headers) => Arc::clone(headers),
                None => {
                    let headers: Vec<String> = record
                        .iter()
                        .map(|field| String::from_utf8_lossy(field).into_owned())
                        .collect();
                    parsed.headers = headers.clone();
                    shared_headers = Some(Arc::from(headers));
                    continue;
                }
            };

            let raw = &slice.as_bytes()[start..end];
            let unterminated_quote = has_open_quote(raw);
            let field_count_matches = record.len() == headers.len();
            if unterminated_quote || !field_count_matches {
                debug!(
                    "Dropping line {line}: expected {} field(s), found {}{}",
                    headers.len(),
                    record.len(),
                    if unterminated_quote { " (unclosed quote)" } else { "" }
                );
                parsed.warnings.push(ParseWarning {
                    line,
                    expected_fields: headers.len(),
                    found_fields: record.len(),
                    unterminated_quote,
                });
                let spans_lines = raw.trim_ascii_end().contains(&b'\n');
                if unterminated_quote || spans_lines {
                    match slice.as_bytes()[start..].iter().position(|b| *b == b'\n') {
                        Some(newline) => {
                            offset += start + newline + 1;
                            line_base = line;
                            continue 'scan;
                        }
                        None => break 'scan,
                    }
                }
                continue;
            }

            let values = record
                .iter()
                .map(|field| {
                    if field.is_empty() {
                        None
                    } else {
                        Some(String::from_utf8_lossy(field).into_owned())
                    }
                })
                .collect();
            parsed
                .records
                .push(RawRecord::new(headers, values, line));
        }
    }

    if !parsed.warnings.is_empty() {
        warn!(
            "Dropped {} malformed row(s) out of {}",
            parsed.warnings.len(),
            parsed.warnings.len() + parsed.records.len()
        );
    }
    parsed
}

/// Writes a header row plus `rows` as CSV, escaping quotes, commas, and
/// newlines. `None` becomes an unquoted empty field.
pub fn serialize_rows(headers: &[String], rows: &[Vec<Option<String>>]) -> csv::Result<Vec<u8>> {
    let mut writer = io_utils::csv_writer_builder().from_writer(Vec::new());
    writer.write_record(headers)?;
    for row in rows {
        writer.write_record(row.iter().map(|v| v.as_deref().unwrap_or("")))?;
    }
    writer
        .into_inner()
        .map_err(|err| csv::Error::from(err.into_error()))
}

pub fn serialize_records(headers: &[String], records: &[RawRecord]) -> csv::Result<Vec<u8>> {
    let rows: Vec<Vec<Option<String>>> = records.iter().map(|r| r.values().to_vec()).collect();
    serialize_rows(headers, &rows)
}

//! Value types and the low-level date and number parsers used by the cleaner.
//!
//! Every destination column is text, so [`CleanedValue::to_column_text`] is
//! the single place where a coerced value turns back into the string that is
//! actually stored.

use std::{fmt, str::FromStr};

use anyhow::{Result, anyhow, bail};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

pub const DATE_OUTPUT_FORMAT: &str = "%Y-%m-%d";
pub const DATETIME_OUTPUT_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const CURRENCY_SYMBOLS: &[char] = &['$', '€', '£', '¥'];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum CleanedValue {
    Null,
    Text(String),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
    Number(Decimal),
}

impl CleanedValue {
    pub fn is_null(&self) -> bool {
        matches!(self, CleanedValue::Null)
    }

    pub fn to_column_text(&self) -> Option<String> {
        match self {
            CleanedValue::Null => None,
            CleanedValue::Text(s) => Some(s.clone()),
            CleanedValue::Date(d) => Some(d.format(DATE_OUTPUT_FORMAT).to_string()),
            CleanedValue::DateTime(dt) => Some(dt.format(DATETIME_OUTPUT_FORMAT).to_string()),
            CleanedValue::Number(n) => Some(n.normalize().to_string()),
        }
    }
}

impl fmt::Display for CleanedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_column_text() {
            Some(text) => write!(f, "{text}"),
            None => write!(f, "NULL"),
        }
    }
}

/// A parsed temporal value that remembers whether the source carried a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Temporal {
    Date(NaiveDate),
    DateTime(NaiveDateTime),
}

impl Temporal {
    pub fn into_datetime(self) -> NaiveDateTime {
        match self {
            Temporal::Date(d) => d.and_time(NaiveTime::MIN),
            Temporal::DateTime(dt) => dt,
        }
    }
}

pub fn parse_naive_date(value: &str) -> Result<NaiveDate> {
    const DATE_FORMATS: &[&str] = &[
        "%d %b %Y",
        "%Y-%m-%d",
        "%d/%m/%Y",
        "%Y/%m/%d",
        "%d-%m-%Y",
        "%d-%b-%Y",
        "%b %d, %Y",
    ];
    for fmt in DATE_FORMATS {
        if let Ok(parsed) = NaiveDate::parse_from_str(value, fmt) {
            return Ok(parsed);
        }
    }
    Err(anyhow!("Failed to parse '{value}' as date"))
}

pub fn parse_naive_datetime(value: &str) -> Result<NaiveDateTime> {
    const DATETIME_FORMATS: &[&str] = &[
        "%Y-%m-%d %H:%M:%S",
        "%d %b %Y %H:%M:%S",
        "%d %b %Y %H:%M",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S%.f",
        "%d/%m/%Y %H:%M:%S",
        "%Y-%m-%d %H:%M",
        "%Y-%m-%dT%H:%M",
    ];
    for fmt in DATETIME_FORMATS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(value, fmt) {
            return Ok(parsed);
        }
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Ok(parsed.naive_utc());
    }
    Err(anyhow!("Failed to parse '{value}' as datetime"))
}

/// Tries datetime layouts first so a value with a time is never truncated.
pub fn parse_temporal(value: &str) -> Result<Temporal> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        bail!("Empty value is not a date");
    }
    if let Ok(dt) = parse_naive_datetime(trimmed) {
        return Ok(Temporal::DateTime(dt));
    }
    parse_naive_date(trimmed)
        .map(Temporal::Date)
        .map_err(|_| anyhow!("Unrecognized date format '{trimmed}'"))
}

/// Parses currency-prefixed and locale-ambiguous numbers.
///
/// When both `,` and `.` appear the later one is the decimal point. A lone
/// comma followed by at most two digits is a decimal point; any other commas
/// group thousands. The result keeps every digit of the source.
pub fn parse_loose_number(value: &str) -> Result<Decimal> {
    let mut token = value.trim();
    if token.is_empty() {
        bail!("Empty value is not a number");
    }

    let mut negative = false;
    if token.starts_with('(') && token.ends_with(')') && token.len() > 2 {
        negative = true;
        token = token[1..token.len() - 1].trim();
    }
    token = strip_currency_prefix(token);
    if let Some(rest) = token.strip_prefix('-') {
        negative = !negative;
        token = rest.trim_start();
    } else if let Some(rest) = token.strip_prefix('+') {
        token = rest.trim_start();
    }
    token = strip_currency_prefix(token);

    let compact: String = token.chars().filter(|c| !c.is_whitespace()).collect();
    if compact.is_empty() || !compact.chars().all(|c| c.is_ascii_digit() || c == ',' || c == '.')
    {
        bail!("'{value}' is not numeric");
    }
    let canonical = canonicalize_separators(&compact)
        .ok_or_else(|| anyhow!("'{value}' has ambiguous separators"))?;
    let number = Decimal::from_str(&canonical)
        .map_err(|err| anyhow!("'{value}' is not numeric: {err}"))?
        .normalize();
    Ok(if negative { -number } else { number })
}

fn strip_currency_prefix(token: &str) -> &str {
    let token = token.trim_start();
    if let Some(rest) = token.strip_prefix(CURRENCY_SYMBOLS) {
        return rest.trim_start();
    }
    let letters = token
        .char_indices()
        .take_while(|(_, c)| c.is_ascii_alphabetic())
        .count();
    if letters == 3 {
        let rest = &token[3..];
        if rest.starts_with(|c: char| c.is_whitespace() || c.is_ascii_digit() || c == '-') {
            return rest.trim_start();
        }
    }
    token
}

fn canonicalize_separators(token: &str) -> Option<String> {
    let last_comma = token.rfind(',');
    let last_dot = token.rfind('.');
    let canonical = match (last_comma, last_dot) {
        (Some(comma), Some(dot)) => {
            let (decimal_sep, group_sep, decimal_at) = if comma > dot {
                (',', '.', comma)
            } else {
                ('.', ',', dot)
            };
            if token[..decimal_at].contains(decimal_sep) {
                return None;
            }
            let integer: String = token[..decimal_at]
                .chars()
                .filter(|c| *c != group_sep)
                .collect();
            let fraction = &token[decimal_at + 1..];
            if fraction.contains(group_sep) {
                return None;
            }
            format!("{integer}.{fraction}")
        }
        (Some(comma), None) => {
            let trailing = token.len() - comma - 1;
            if token.matches(',').count() == 1 && trailing <= 2 {
                token.replacen(',', ".", 1)
            } else {
                token.replace(',', "")
            }
        }
        (None, Some(_)) if token.matches('.').count() > 1 => token.replace('.', ""),
        _ => token.to_string(),
    };
    let valid = !canonical.is_empty()
        && !canonical.starts_with('.')
        && !canonical.ends_with('.')
        && canonical.chars().any(|c| c.is_ascii_digit());
    valid.then_some(canonical)
}

/// True for plain or comma-grouped numbers without a leading zero or a `+`
/// sign, so codes and international phone numbers stay text.
pub fn looks_like_number(value: &str) -> bool {
    let trimmed = value.trim();
    let unsigned = trimmed.strip_prefix('-').unwrap_or(trimmed);
    let (integer, fraction) = match unsigned.split_once('.') {
        Some((integer, fraction)) => (integer, Some(fraction)),
        None => (unsigned, None),
    };
    if let Some(fraction) = fraction
        && (fraction.is_empty() || !fraction.chars().all(|c| c.is_ascii_digit()))
    {
        return false;
    }
    if integer.is_empty() {
        return false;
    }
    let groups: Vec<&str> = integer.split(',').collect();
    let first = groups[0];
    if first.is_empty() || !first.chars().all(|c| c.is_ascii_digit()) {
        return false;
    }
    if groups.len() > 1 {
        if first.len() > 3 || first.starts_with('0') {
            return false;
        }
        return groups[1..]
            .iter()
            .all(|g| g.len() == 3 && g.chars().all(|c| c.is_ascii_digit()));
    }
    !(first.len() > 1 && first.starts_with('0'))
}

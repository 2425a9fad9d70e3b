//! Column and table name normalization.
//!
//! Raw export headers become storage-safe identifiers. Within one header set
//! the mapping from position to final name is injective: collisions are
//! suffixed, never merged. Names never start with `_`, which leaves that
//! prefix free for the system columns added by the schema manager.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub const MAX_IDENTIFIER_LEN: usize = 63;
const HASH_HEX_LEN: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMapping {
    pub position: usize,
    pub original: String,
    pub normalized: String,
}

/// Original → final names for one table's header set, in header order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderMapping {
    pub columns: Vec<ColumnMapping>,
}

impl HeaderMapping {
    pub fn from_headers(headers: &[String]) -> Self {
        let mut used: HashSet<String> = HashSet::with_capacity(headers.len());
        let mut next_suffix: HashMap<String, usize> = HashMap::new();
        let mut columns = Vec::with_capacity(headers.len());

        for (position, original) in headers.iter().enumerate() {
            let base = normalize_header(original, position);
            let normalized = if used.insert(base.clone()) {
                base
            } else {
                let counter = next_suffix.entry(base.clone()).or_insert(1);
                loop {
                    let candidate = with_suffix(&base, *counter);
                    *counter += 1;
                    if used.insert(candidate.clone()) {
                        break candidate;
                    }
                }
            };
            columns.push(ColumnMapping {
                position,
                original: original.clone(),
                normalized,
            });
        }
        HeaderMapping { columns }
    }

    pub fn names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.normalized.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn normalized_for(&self, original: &str) -> Option<&str> {
        self.columns
            .iter()
            .find(|c| c.original == original)
            .map(|c| c.normalized.as_str())
    }
}

/// Normalizes a single header without duplicate resolution.
pub fn normalize_header(raw: &str, position: usize) -> String {
    if raw.trim().is_empty() {
        return format!("col_{position}_empty");
    }
    if !raw.is_ascii() {
        return format!("col_{position}_{}", content_hash(raw));
    }
    let cleaned = clean_identifier(raw);
    if cleaned.is_empty() {
        format!("col_{position}_cleaned")
    } else {
        cleaned
    }
}

/// Destination table name for a logical export name.
pub fn normalize_table_name(logical: &str) -> String {
    if logical.is_ascii() {
        let cleaned = clean_identifier(logical);
        if !cleaned.is_empty() {
            return cleaned;
        }
    }
    format!("table_{}", content_hash(logical))
}

/// First eight hex characters of the SHA-256 of `text`.
pub fn content_hash(text: &str) -> String {
    let digest = Sha256::digest(text.as_bytes());
    digest
        .iter()
        .take(HASH_HEX_LEN / 2)
        .map(|byte| format!("{byte:02x}"))
        .collect()
}

fn clean_identifier(raw: &str) -> String {
    let mut cleaned = String::with_capacity(raw.len());
    for ch in raw.chars() {
        let mapped = match ch.to_ascii_lowercase() {
            c @ ('a'..='z' | '0'..='9') => c,
            _ => '_',
        };
        if mapped == '_' && cleaned.ends_with('_') {
            continue;
        }
        cleaned.push(mapped);
    }
    let trimmed = cleaned.trim_matches('_');
    truncate_ascii(trimmed, MAX_IDENTIFIER_LEN).to_string()
}

fn with_suffix(base: &str, counter: usize) -> String {
    let suffix = format!("_{counter}");
    let keep = MAX_IDENTIFIER_LEN.saturating_sub(suffix.len());
    format!("{}{suffix}", truncate_ascii(base, keep))
}

fn truncate_ascii(value: &str, max: usize) -> &str {
    if value.len() <= max {
        value
    } else {
        &value[..max]
    }
}

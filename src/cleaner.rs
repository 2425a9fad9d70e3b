//! Value cleaning driven by a declarative column classification table.
//!
//! A column's semantic type comes from the first rule in
//! [`CleanerConfig::rules`] whose pattern matches its normalized name. Date
//! columns are rewritten to ISO dates or timestamps, numeric columns to plain
//! decimal numbers. A value that cannot be coerced becomes NULL and a
//! [`CleaningWarning`]; cleaning itself never fails.

use std::fmt;

use log::warn;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::data::{CleanedValue, Temporal, looks_like_number, parse_loose_number, parse_temporal};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SemanticType {
    Date,
    DateTime,
    Numeric,
    Text,
}

impl fmt::Display for SemanticType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SemanticType::Date => "date",
            SemanticType::DateTime => "datetime",
            SemanticType::Numeric => "numeric",
            SemanticType::Text => "text",
        };
        f.write_str(label)
    }
}

/// Serializable form of a classification rule, as written in run config files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSpec {
    pub pattern: String,
    #[serde(rename = "type")]
    pub semantic: SemanticType,
}

#[derive(Debug, Clone)]
pub struct ClassificationRule {
    pub pattern: Regex,
    pub semantic: SemanticType,
}

const DEFAULT_RULES: &[(&str, SemanticType)] = &[
    (r"^(date|transaction_date)$", SemanticType::Date),
    (r"_date$", SemanticType::Date),
    (r"^time$", SemanticType::DateTime),
    (r"_time$", SemanticType::DateTime),
    (
        r"^(created|modified|updated)(_(at|on|time|timestamp))?$",
        SemanticType::DateTime,
    ),
    (r"_id$", SemanticType::Numeric),
    (r"_amount$", SemanticType::Numeric),
    (r"_bcy$", SemanticType::Numeric),
    (
        r"^(total|sub_total|quantity|balance|age_in_days|price|cost|rate|discount)$",
        SemanticType::Numeric,
    ),
];

#[derive(Debug, Clone)]
pub struct CleanerConfig {
    pub rules: Vec<ClassificationRule>,
    /// Convert number-like values in otherwise unclassified columns.
    pub infer_numbers: bool,
}

impl CleanerConfig {
    pub fn from_rules(specs: &[RuleSpec], infer_numbers: bool) -> Result<Self, regex::Error> {
        let rules = specs
            .iter()
            .map(|spec| {
                Ok(ClassificationRule {
                    pattern: Regex::new(&spec.pattern)?,
                    semantic: spec.semantic,
                })
            })
            .collect::<Result<Vec<_>, regex::Error>>()?;
        Ok(Self {
            rules,
            infer_numbers,
        })
    }

    pub fn default_rule_specs() -> Vec<RuleSpec> {
        DEFAULT_RULES
            .iter()
            .map(|(pattern, semantic)| RuleSpec {
                pattern: (*pattern).to_string(),
                semantic: *semantic,
            })
            .collect()
    }
}

impl Default for CleanerConfig {
    fn default() -> Self {
        let rules = DEFAULT_RULES
            .iter()
            .filter_map(|(pattern, semantic)| {
                Regex::new(pattern).ok().map(|pattern| ClassificationRule {
                    pattern,
                    semantic: *semantic,
                })
            })
            .collect();
        Self {
            rules,
            infer_numbers: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CleaningWarning {
    pub column: String,
    pub value: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct CleanedRows {
    pub rows: Vec<Vec<Option<String>>>,
    pub warnings: Vec<CleaningWarning>,
}

#[derive(Debug, Clone, Default)]
pub struct ValueCleaner {
    config: CleanerConfig,
}

impl ValueCleaner {
    pub fn new(config: CleanerConfig) -> Self {
        Self { config }
    }

    pub fn classify(&self, column: &str) -> SemanticType {
        self.config
            .rules
            .iter()
            .find(|rule| rule.pattern.is_match(column))
            .map(|rule| rule.semantic)
            .unwrap_or(SemanticType::Text)
    }

    pub fn plan(&self, columns: &[String]) -> Vec<SemanticType> {
        columns.iter().map(|c| self.classify(c)).collect()
    }

    pub fn clean_value(
        &self,
        column: &str,
        semantic: SemanticType,
        value: Option<&str>,
        warnings: &mut Vec<CleaningWarning>,
    ) -> CleanedValue {
        let Some(value) = value else {
            return CleanedValue::Null;
        };
        let outcome = match semantic {
            SemanticType::Date => parse_temporal(value).map(|parsed| match parsed {
                Temporal::Date(d) => CleanedValue::Date(d),
                Temporal::DateTime(dt) => CleanedValue::DateTime(dt),
            }),
            SemanticType::DateTime => {
                parse_temporal(value).map(|parsed| CleanedValue::DateTime(parsed.into_datetime()))
            }
            SemanticType::Numeric => parse_loose_number(value).map(CleanedValue::Number),
            SemanticType::Text => {
                let inferred = (self.config.infer_numbers && looks_like_number(value))
                    .then(|| parse_loose_number(value).ok())
                    .flatten();
                Ok(inferred.map_or_else(
                    || CleanedValue::Text(value.to_string()),
                    CleanedValue::Number,
                ))
            }
        };
        match outcome {
            Ok(cleaned) => cleaned,
            Err(err) => {
                warn!("Column '{column}' ({semantic}): {err}; storing NULL");
                warnings.push(CleaningWarning {
                    column: column.to_string(),
                    value: value.to_string(),
                    reason: err.to_string(),
                });
                CleanedValue::Null
            }
        }
    }

    pub fn clean_rows(&self, columns: &[String], rows: &[&[Option<String>]]) -> CleanedRows {
        let plan = self.plan(columns);
        let mut cleaned = CleanedRows {
            rows: Vec::with_capacity(rows.len()),
            warnings: Vec::new(),
        };
        for row in rows {
            let values = columns
                .iter()
                .zip(plan.iter())
                .enumerate()
                .map(|(idx, (column, semantic))| {
                    let raw = row.get(idx).and_then(|v| v.as_deref());
                    self.clean_value(column, *semantic, raw, &mut cleaned.warnings)
                        .to_column_text()
                })
                .collect();
            cleaned.rows.push(values);
        }
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clean(column: &str, value: &str) -> (CleanedValue, Vec<CleaningWarning>) {
        let cleaner = ValueCleaner::default();
        let mut warnings = Vec::new();
        let semantic = cleaner.classify(column);
        let cleaned = cleaner.clean_value(column, semantic, Some(value), &mut warnings);
        (cleaned, warnings)
    }

    fn number(text: &str) -> CleanedValue {
        CleanedValue::Number(text.parse().unwrap())
    }

    #[test]
    fn classification_table_is_ordered() {
        let cleaner = ValueCleaner::default();
        assert_eq!(cleaner.classify("invoice_date"), SemanticType::Date);
        assert_eq!(cleaner.classify("transaction_date"), SemanticType::Date);
        assert_eq!(cleaner.classify("last_modified_time"), SemanticType::DateTime);
        assert_eq!(cleaner.classify("created_at"), SemanticType::DateTime);
        assert_eq!(cleaner.classify("created_by"), SemanticType::Text);
        assert_eq!(cleaner.classify("customer_id"), SemanticType::Numeric);
        assert_eq!(cleaner.classify("total_bcy"), SemanticType::Numeric);
        assert_eq!(cleaner.classify("sub_total"), SemanticType::Numeric);
        assert_eq!(cleaner.classify("customer_name"), SemanticType::Text);
    }

    #[test]
    fn numeric_columns_accept_currency_and_grouping() {
        assert_eq!(clean("total", "SAR 3,661.60").0, number("3661.6"));
        assert_eq!(clean("price", "1.234,56").0, number("1234.56"));
        assert_eq!(clean("balance", "1,234.56").0, number("1234.56"));
    }

    #[test]
    fn numeric_failure_is_null_with_warning() {
        let (cleaned, warnings) = clean("quantity", "abc");
        assert_eq!(cleaned, CleanedValue::Null);
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].column, "quantity");
        assert_eq!(warnings[0].value, "abc");
    }

    #[test]
    fn date_columns_emit_iso_forms() {
        let (cleaned, _) = clean("invoice_date", "03 Aug 2024");
        assert_eq!(cleaned.to_column_text().as_deref(), Some("2024-08-03"));
        let (cleaned, _) = clean("invoice_date", "2024-08-03 16:47:43");
        assert_eq!(
            cleaned.to_column_text().as_deref(),
            Some("2024-08-03 16:47:43")
        );
        let (cleaned, _) = clean("created_time", "2024-08-03");
        assert_eq!(
            cleaned.to_column_text().as_deref(),
            Some("2024-08-03 00:00:00")
        );
        let (cleaned, warnings) = clean("due_date", "someday");
        assert!(cleaned.is_null());
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn text_columns_pass_through_or_infer_numbers() {
        assert_eq!(
            clean("customer_name", "Acme, Ltd").0,
            CleanedValue::Text("Acme, Ltd".to_string())
        );
        assert_eq!(clean("notes", "1,250.5").0, number("1250.5"));
        assert_eq!(
            clean("phone", "0501234567").0,
            CleanedValue::Text("0501234567".to_string())
        );
        assert_eq!(
            clean("phone", "+966501234567").0,
            CleanedValue::Text("+966501234567".to_string())
        );
        assert_eq!(
            clean("reference", "12345678901234567890")
                .0
                .to_column_text()
                .as_deref(),
            Some("12345678901234567890")
        );
    }

    #[test]
    fn custom_rules_replace_defaults() {
        let specs = vec![RuleSpec {
            pattern: "^posted$".to_string(),
            semantic: SemanticType::Date,
        }];
        let cleaner = ValueCleaner::new(CleanerConfig::from_rules(&specs, false).unwrap());
        assert_eq!(cleaner.classify("posted"), SemanticType::Date);
        assert_eq!(cleaner.classify("invoice_date"), SemanticType::Text);
        let mut warnings = Vec::new();
        let value = cleaner.clean_value("notes", SemanticType::Text, Some("42"), &mut warnings);
        assert_eq!(value, CleanedValue::Text("42".to_string()));
        assert!(CleanerConfig::from_rules(
            &[RuleSpec {
                pattern: "(".to_string(),
                semantic: SemanticType::Text
            }],
            true
        )
        .is_err());
    }

    #[test]
    fn clean_rows_keeps_nulls_and_column_order() {
        let cleaner = ValueCleaner::default();
        let columns = vec!["invoice_date".to_string(), "total".to_string()];
        let row = vec![Some("03 Aug 2024".to_string()), None];
        let cleaned = cleaner.clean_rows(&columns, &[row.as_slice()]);
        assert_eq!(
            cleaned.rows,
            vec![vec![Some("2024-08-03".to_string()), None]]
        );
        assert!(cleaned.warnings.is_empty());
    }
}

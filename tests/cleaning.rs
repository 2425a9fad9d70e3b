use csv_replicator::{
    cleaner::{CleanerConfig, RuleSpec, SemanticType, ValueCleaner},
    columns::HeaderMapping,
    parser::parse_csv,
};

mod common;

fn clean_table(text: &str, cleaner: &ValueCleaner) -> (Vec<String>, Vec<Vec<Option<String>>>, usize) {
    let parsed = parse_csv(text);
    let columns = HeaderMapping::from_headers(&parsed.headers).names();
    let values: Vec<&[Option<String>]> = parsed.records.iter().map(|r| r.values()).collect();
    let cleaned = cleaner.clean_rows(&columns, &values);
    (columns, cleaned.rows, cleaned.warnings.len())
}

fn text(value: &str) -> Option<String> {
    Some(value.to_string())
}

#[test]
fn invoice_export_is_cleaned_column_by_column() {
    let csv = common::csv_text(
        "Invoice ID,Invoice Date,Total,Customer Name,Last Modified Time",
        &[
            "1001,03 Aug 2024,\"SAR 3,661.60\",Acme,2024-08-03 16:47:43",
            "1002,2024-08-04,\"1.234,56\",\"Bolt, Inc\",04 Aug 2024",
            "1003,not a date,abc,,",
        ],
    );
    let (columns, rows, warnings) = clean_table(&csv, &ValueCleaner::default());
    assert_eq!(
        columns,
        vec![
            "invoice_id",
            "invoice_date",
            "total",
            "customer_name",
            "last_modified_time"
        ]
    );
    assert_eq!(
        rows[0],
        vec![
            text("1001"),
            text("2024-08-03"),
            text("3661.6"),
            text("Acme"),
            text("2024-08-03 16:47:43"),
        ]
    );
    assert_eq!(
        rows[1],
        vec![
            text("1002"),
            text("2024-08-04"),
            text("1234.56"),
            text("Bolt, Inc"),
            text("2024-08-04 00:00:00"),
        ]
    );
    assert_eq!(rows[2], vec![text("1003"), None, None, None, None]);
    assert_eq!(warnings, 2);
}

#[test]
fn date_columns_keep_timestamps_intact() {
    let csv = common::csv_text("Payment Date", &["2024-08-03 16:47:43", "03 Aug 2024"]);
    let (_, rows, warnings) = clean_table(&csv, &ValueCleaner::default());
    assert_eq!(rows[0], vec![text("2024-08-03 16:47:43")]);
    assert_eq!(rows[1], vec![text("2024-08-03")]);
    assert_eq!(warnings, 0);
}

#[test]
fn unclassified_columns_only_convert_plain_numbers() {
    let csv = common::csv_text("Notes,Code", &["\"1,234.56\",00123", "hello,42"]);
    let (_, rows, _) = clean_table(&csv, &ValueCleaner::default());
    assert_eq!(rows[0], vec![text("1234.56"), text("00123")]);
    assert_eq!(rows[1], vec![text("hello"), text("42")]);

    let cleaner = ValueCleaner::new(CleanerConfig {
        infer_numbers: false,
        ..CleanerConfig::default()
    });
    let (_, rows, _) = clean_table(&csv, &cleaner);
    assert_eq!(rows[0], vec![text("1,234.56"), text("00123")]);
}

#[test]
fn custom_rules_replace_the_default_table() {
    let cleaner = ValueCleaner::new(
        CleanerConfig::from_rules(
            &[RuleSpec {
                pattern: "^posted$".to_string(),
                semantic: SemanticType::Date,
            }],
            false,
        )
        .expect("valid rules"),
    );
    assert_eq!(cleaner.classify("posted"), SemanticType::Date);
    assert_eq!(cleaner.classify("invoice_date"), SemanticType::Text);
    let csv = common::csv_text("Posted,Total", &["03 Aug 2024,\"SAR 1,000\""]);
    let (_, rows, _) = clean_table(&csv, &cleaner);
    assert_eq!(rows[0], vec![text("2024-08-03"), text("SAR 1,000")]);
}

#[test]
fn invalid_rule_pattern_is_reported() {
    let err = CleanerConfig::from_rules(
        &[RuleSpec {
            pattern: "([".to_string(),
            semantic: SemanticType::Numeric,
        }],
        true,
    );
    assert!(err.is_err());
}

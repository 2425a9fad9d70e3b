use std::collections::HashSet;

use csv_replicator::columns::{
    HeaderMapping, MAX_IDENTIFIER_LEN, content_hash, normalize_header, normalize_table_name,
};
use proptest::prelude::*;

fn headers(raw: &[&str]) -> Vec<String> {
    raw.iter().map(|h| h.to_string()).collect()
}

#[test]
fn export_headers_become_snake_case_identifiers() {
    let mapping = HeaderMapping::from_headers(&headers(&[
        "Invoice Date",
        "Total (BCY)",
        "Customer-Name",
        "  ",
        "###",
    ]));
    assert_eq!(
        mapping.names(),
        vec![
            "invoice_date",
            "total_bcy",
            "customer_name",
            "col_3_empty",
            "col_4_cleaned",
        ]
    );
    assert_eq!(mapping.normalized_for("Total (BCY)"), Some("total_bcy"));
}

#[test]
fn duplicate_headers_are_suffixed_in_order() {
    let mapping = HeaderMapping::from_headers(&headers(&["Amount", "amount", "AMOUNT", "amount_1"]));
    assert_eq!(
        mapping.names(),
        vec!["amount", "amount_1", "amount_2", "amount_1_1"]
    );
    let positions: Vec<usize> = mapping.columns.iter().map(|c| c.position).collect();
    assert_eq!(positions, vec![0, 1, 2, 3]);
}

#[test]
fn long_duplicates_stay_within_identifier_limit() {
    let long = "x".repeat(80);
    let mapping = HeaderMapping::from_headers(&[long.clone(), long]);
    let names = mapping.names();
    assert_eq!(names[0].len(), MAX_IDENTIFIER_LEN);
    assert_eq!(names[1].len(), MAX_IDENTIFIER_LEN);
    assert!(names[1].ends_with("_1"));
    assert_ne!(names[0], names[1]);
}

#[test]
fn non_ascii_headers_hash_stably() {
    let first = normalize_header("المبلغ", 2);
    let second = normalize_header("المبلغ", 2);
    assert_eq!(first, second);
    assert_eq!(first, format!("col_2_{}", content_hash("المبلغ")));
    assert_eq!(content_hash("المبلغ").len(), 8);
    assert_ne!(normalize_header("المبلغ", 2), normalize_header("التاريخ", 2));
}

#[test]
fn table_names_fall_back_to_a_hash() {
    assert_eq!(normalize_table_name("Sales by Item"), "sales_by_item");
    assert_eq!(normalize_table_name("Invoices"), "invoices");
    let hashed = normalize_table_name("فواتير");
    assert!(hashed.starts_with("table_"));
    assert_eq!(hashed, normalize_table_name("فواتير"));
    assert!(normalize_table_name("!!!").starts_with("table_"));
}

fn header_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("Amount".to_string()),
        Just("amount".to_string()),
        Just(String::new()),
        "[A-Za-z0-9 _()#%-]{0,80}",
        "\\PC{0,10}",
    ]
}

proptest! {
    #[test]
    fn normalized_names_are_unique_and_safe(
        raw in proptest::collection::vec(header_strategy(), 1..24)
    ) {
        let mapping = HeaderMapping::from_headers(&raw);
        let names = mapping.names();
        prop_assert_eq!(names.len(), raw.len());
        let unique: HashSet<&String> = names.iter().collect();
        prop_assert_eq!(unique.len(), names.len());
        for name in &names {
            prop_assert!(!name.is_empty());
            prop_assert!(name.len() <= MAX_IDENTIFIER_LEN);
            prop_assert!(!name.starts_with('_'));
            prop_assert!(name.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_'));
        }
        prop_assert_eq!(HeaderMapping::from_headers(&raw), mapping);
    }
}

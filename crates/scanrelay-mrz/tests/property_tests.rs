//! Property-based tests for the MRZ parser.
//!
//! Synthetic passports are built field by field with correct check digits,
//! then parsed back through the bundled TD3 template.

use std::sync::Arc;

use chrono::NaiveDate;
use proptest::prelude::*;
use scanrelay_mrz::{
    DocumentKind, DocumentTemplate, FieldSpec, MrzField, MrzParser, RowSeparator, TemplateStore,
    check_digit,
};

fn parser() -> MrzParser {
    MrzParser::new(Arc::new(TemplateStore::builtin().unwrap()))
        .with_reference_date(NaiveDate::from_ymd_opt(2026, 10, 16).unwrap())
}

fn passport_only() -> MrzParser {
    let template = DocumentTemplate::new(DocumentKind::Passport, 2, 44)
        .with_field(MrzField::LastName, FieldSpec::search(0, 5))
        .with_field(MrzField::FirstName, FieldSpec::search(0, 5));
    MrzParser::new(Arc::new(TemplateStore::from_templates(vec![template])))
}

fn pad(s: &str, width: usize) -> String {
    format!("{s:<<width$}")
}

/// Build a TD3 passport MRZ from its parts.
fn passport_mrz(surname: &str, given: &[String], number: &str, birth: &str, expiry: &str) -> String {
    let names = format!("{}<<{}", surname, given.join("<"));
    let row0 = pad(&format!("P<UTO{names}"), 44);

    let number = pad(number, 9);
    let row1 = format!(
        "{number}{}UTO{birth}{}F{expiry}{}",
        check_digit(&number).unwrap(),
        check_digit(birth).unwrap(),
        check_digit(expiry).unwrap(),
    );
    let row1 = pad(&row1, 44);

    format!("{row0}\r\n{row1}")
}

/// Strategy for name tokens (letters only, no filler).
fn name_token() -> impl Strategy<Value = String> {
    prop::string::string_regex("[A-Z]{1,10}").expect("name regex")
}

/// Strategy for full-length document numbers (9 alphanumerics).
fn document_number() -> impl Strategy<Value = String> {
    prop::string::string_regex("[A-Z0-9]{9}").expect("document number regex")
}

/// Strategy for calendar-valid YYMMDD tokens.
fn yymmdd() -> impl Strategy<Value = String> {
    (0u32..100, 1u32..=12, 1u32..=28).prop_map(|(y, m, d)| format!("{y:02}{m:02}{d:02}"))
}

/// Strategy for arbitrary MRZ rows of a fixed width.
fn mrz_row(width: usize) -> impl Strategy<Value = String> {
    prop::string::string_regex(&format!("[A-Z0-9<]{{{width}}}")).expect("row regex")
}

proptest! {
    /// Property: names and document number survive a build/parse cycle
    /// once fillers are stripped.
    #[test]
    fn prop_passport_fields_roundtrip(
        surname in name_token(),
        given in prop::collection::vec(name_token(), 1..3),
        number in document_number(),
        birth in yymmdd(),
        expiry in yymmdd(),
    ) {
        // Keep the name zone within the 39 characters TD3 allows.
        prop_assume!(surname.len() + 2 + given.iter().map(|g| g.len() + 1).sum::<usize>() <= 39);

        let raw = passport_mrz(&surname, &given, &number, &birth, &expiry);
        let record = parser().parse(&raw, RowSeparator::CrLf).unwrap();

        let check = check_digit(&number).unwrap();

        prop_assert_eq!(record.last_name, surname);
        prop_assert_eq!(record.first_name, given.join(" "));
        prop_assert_eq!(record.document_number, format!("{}{}", number, check));
        prop_assert!(record.check_digit_failures.is_empty());
    }

    /// Property: every 2x44 input matching the passport shape yields a
    /// record with a document type and the untouched raw text.
    #[test]
    fn prop_passport_shape_always_parses(row0 in mrz_row(44), row1 in mrz_row(44)) {
        let raw = format!("{row0}\n{row1}");
        let record = passport_only().parse(&raw, RowSeparator::Lf).unwrap();

        prop_assert!(!record.document_type.is_empty());
        prop_assert_eq!(record.raw_mrz_data, raw);
    }

    /// Property: 3x30 input never matches a store without a 3x30 layout.
    #[test]
    fn prop_unknown_shape_is_no_match(
        row0 in mrz_row(30),
        row1 in mrz_row(30),
        row2 in mrz_row(30),
    ) {
        let raw = format!("{row0}\n{row1}\n{row2}");
        prop_assert!(passport_only().parse(&raw, RowSeparator::Lf).is_none());
    }

    /// Property: parsing never panics on arbitrary text.
    #[test]
    fn prop_parse_total(raw in ".{0,200}") {
        let _ = parser().parse(&raw, RowSeparator::Lf);
    }
}

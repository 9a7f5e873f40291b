//! Template-driven MRZ field parser.
//!
//! The parser splits raw reader output into rows, picks the template whose
//! row count and row width match, and slices every declared field out of
//! its row. It never fails: a scan with no matching template yields `None`
//! and a single bad field is left empty (or null for dates) while the rest
//! of the record is still produced.

use std::sync::Arc;

use chrono::{Local, NaiveDate};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use scanrelay_core::MrzRecord;
use scanrelay_core::constants::{MRZ_NAME_SEPARATOR, UNSPECIFIED_SEX};

use crate::fields::{
    check_digit, check_digit_value, normalize_country, parse_birth_date, parse_expiry_date,
    strip_filler,
};
use crate::template::{DocumentTemplate, FieldSpec, MrzField, TemplateStore};

/// Line separator between MRZ rows in raw reader output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RowSeparator {
    /// `\r\n`
    #[default]
    CrLf,
    /// `\r`
    Cr,
    /// `\n`
    Lf,
}

impl RowSeparator {
    pub fn as_str(&self) -> &'static str {
        match self {
            RowSeparator::CrLf => "\r\n",
            RowSeparator::Cr => "\r",
            RowSeparator::Lf => "\n",
        }
    }
}

/// MRZ parser bound to a template set.
///
/// Cheap to clone; the template store is shared.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use scanrelay_mrz::{MrzParser, RowSeparator, TemplateStore};
///
/// let parser = MrzParser::new(Arc::new(TemplateStore::builtin().unwrap()));
/// let raw = "P<UTOERIKSSON<<ANNA<MARIA<<<<<<<<<<<<<<<<<<<\n\
///            L898902C36UTO7408122F1204159ZE184226B<<<<<10";
///
/// let record = parser.parse(raw, RowSeparator::Lf).unwrap();
/// assert_eq!(record.last_name, "ERIKSSON");
/// assert_eq!(record.first_name, "ANNA MARIA");
/// ```
#[derive(Debug, Clone)]
pub struct MrzParser {
    templates: Arc<TemplateStore>,
    today: Option<NaiveDate>,
}

impl MrzParser {
    pub fn new(templates: Arc<TemplateStore>) -> Self {
        Self {
            templates,
            today: None,
        }
    }

    /// Fix the date used for the birth-year pivot instead of the local clock.
    pub fn with_reference_date(mut self, today: NaiveDate) -> Self {
        self.today = Some(today);
        self
    }

    pub fn templates(&self) -> &TemplateStore {
        &self.templates
    }

    /// Parse raw MRZ text. Returns `None` when no template fits its shape.
    pub fn parse(&self, raw: &str, separator: RowSeparator) -> Option<MrzRecord> {
        let today = self.today.unwrap_or_else(|| Local::now().date_naive());
        parse_at(raw, separator, &self.templates, today)
    }
}

/// Parse raw MRZ text against `templates` using today's date for the
/// birth-year pivot.
pub fn parse(raw: &str, separator: RowSeparator, templates: &TemplateStore) -> Option<MrzRecord> {
    parse_at(raw, separator, templates, Local::now().date_naive())
}

fn parse_at(
    raw: &str,
    separator: RowSeparator,
    templates: &TemplateStore,
    today: NaiveDate,
) -> Option<MrzRecord> {
    let rows: Vec<&str> = raw
        .split(separator.as_str())
        .map(str::trim)
        .filter(|row| !row.is_empty())
        .collect();

    let width = rows.first()?.len();
    if rows.iter().any(|row| row.len() != width || !row.is_ascii()) {
        debug!(rows = rows.len(), "MRZ rows differ in width, no template can match");
        return None;
    }

    let Some(template) = select_template(templates, &rows, width) else {
        debug!(rows = rows.len(), width, "No document template matches MRZ shape");
        return None;
    };

    trace!(
        kind = %template.kind,
        country = %template.country,
        "Matched document template"
    );
    Some(extract_record(template, &rows, raw, today))
}

/// Pick a template among those with the right shape.
///
/// A country-specific template wins when the issuing country it extracts
/// equals its own country, unless a generic template of the same shape
/// reads a populated position the country template leaves out. Otherwise
/// the first generic one is used.
fn select_template<'a>(
    templates: &'a TemplateStore,
    rows: &[&str],
    width: usize,
) -> Option<&'a DocumentTemplate> {
    let candidates: Vec<&DocumentTemplate> = templates.find(rows.len(), width).collect();

    let country_match = candidates.iter().copied().find(|template| {
        !template.country.is_empty()
            && template
                .field(&MrzField::IssuingCountry)
                .and_then(|spec| slice_field(rows, spec, &MrzField::IssuingCountry))
                .map(|raw| normalize_country(&strip_filler(raw)))
                .is_some_and(|issuer| issuer == normalize_country(&template.country))
    });
    let generic = candidates.iter().copied().find(|t| t.country.is_empty());

    match (country_match, generic) {
        (Some(specific), Some(generic)) if leaves_data_unread(specific, generic, rows) => {
            debug!(
                country = %specific.country,
                kind = %generic.kind,
                "Country layout does not fit MRZ, using generic layout"
            );
            Some(generic)
        }
        (Some(specific), _) => Some(specific),
        (None, generic) => generic.or_else(|| candidates.first().copied()),
    }
}

/// True when `generic` declares a field that `specific` lacks and that
/// field holds something other than filler in `rows`.
fn leaves_data_unread(
    specific: &DocumentTemplate,
    generic: &DocumentTemplate,
    rows: &[&str],
) -> bool {
    generic.fields.iter().any(|(field, spec)| {
        specific.field(field).is_none()
            && slice_field(rows, spec, field).is_some_and(|raw| !strip_filler(raw).is_empty())
    })
}

fn extract_record(
    template: &DocumentTemplate,
    rows: &[&str],
    raw: &str,
    today: NaiveDate,
) -> MrzRecord {
    let mut record = MrzRecord {
        raw_mrz_data: raw.to_string(),
        ..MrzRecord::default()
    };

    for (field, spec) in &template.fields {
        let Some(value) = slice_field(rows, spec, field) else {
            debug!(field = %field, row = spec.row, "Field not present in MRZ");
            continue;
        };

        if verify_check_digit(rows, spec) == Some(false) {
            warn!(field = %field, "MRZ check digit mismatch");
            record.check_digit_failures.push(field.name().to_string());
        }

        let text = strip_filler(value);
        match field {
            MrzField::DocumentType => record.document_type = text,
            MrzField::FirstName => record.first_name = text,
            MrzField::LastName => record.last_name = text,
            MrzField::DocumentNumber => record.document_number = text,
            MrzField::Sex => {
                record.sex = if text.is_empty() {
                    UNSPECIFIED_SEX.to_string()
                } else {
                    text
                }
            }
            MrzField::BirthDate => {
                record.birth_date = parse_birth_date(&text, today);
                if record.birth_date.is_none() {
                    warn!(token = %text, "Unparseable birth date, leaving it null");
                }
            }
            MrzField::ExpirationDate => {
                record.expiration_date = parse_expiry_date(&text);
                if record.expiration_date.is_none() {
                    warn!(token = %text, "Unparseable expiration date, leaving it null");
                }
            }
            MrzField::IssuingCountry => record.issuing_country = normalize_country(&text),
            MrzField::Nationality => record.nationality = normalize_country(&text),
            MrzField::Other(_) => {}
        }
    }

    if record.document_type.is_empty() {
        record.document_type = template.kind.code().to_string();
    }

    record
}

/// Raw (unstripped) text of a field, or `None` when the row or slice does
/// not exist.
fn slice_field<'r>(rows: &[&'r str], spec: &FieldSpec, field: &MrzField) -> Option<&'r str> {
    let row: &'r str = *rows.get(spec.row)?;

    match (spec.start, spec.search_from) {
        (Some(start), _) => {
            let end = spec.end.unwrap_or(row.len()).min(row.len());
            row.get(start..end)
        }
        (None, Some(offset)) => {
            let zone = row.get(offset..)?;
            let split = zone.split_once(MRZ_NAME_SEPARATOR);
            Some(match (field, split) {
                (MrzField::FirstName, Some((_, given))) => given,
                (MrzField::FirstName, None) => "",
                (_, Some((primary, _))) => primary,
                (_, None) => zone,
            })
        }
        (None, None) => None,
    }
}

/// `Some(valid)` when the field declares a check digit, `None` otherwise.
fn verify_check_digit(rows: &[&str], spec: &FieldSpec) -> Option<bool> {
    let position = spec.check_digit?;
    let start = spec.start?;
    let row = rows.get(spec.row)?;

    let end = spec.end.unwrap_or(row.len()).min(position);
    let computed = row.get(start..end).and_then(check_digit);
    let declared = row
        .get(position..position + 1)
        .and_then(|s| s.chars().next())
        .and_then(check_digit_value);

    Some(matches!((computed, declared), (Some(c), Some(d)) if c == d))
}

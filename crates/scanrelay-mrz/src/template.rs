//! Document templates and the store that holds them.
//!
//! A template describes one MRZ layout: how many rows, how wide each row is,
//! and where each named field lives. Templates come from a declarative XML
//! source, loaded once at startup and immutable afterwards:
//!
//! ```xml
//! <DOCUMENTS>
//!   <DOCUMENT ROWS="2" ROWSIZE="44" COUNTRY="" TYPE="P">
//!     <LASTNAME ROW="0" SEARCHFROM="5" />
//!     <DOCUMENTNO ROW="1" START="0" END="10" CHECKDIGIT="9" />
//!   </DOCUMENT>
//! </DOCUMENTS>
//! ```
//!
//! Every child element of `DOCUMENT` is a field whose element name is the
//! field name. Positions are 0-based with an exclusive `END`; an empty or
//! missing position means "not declared".

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use roxmltree::{Document, Node};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Result, TemplateError};

/// Template set shipped with the crate.
const BUILTIN_TEMPLATES: &str = include_str!("../templates/documents.xml");

/// Document family a template describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    #[default]
    Passport,
    IdCard,
    CCard,
    OldGermanId,
}

impl DocumentKind {
    /// Type code used in template sources.
    pub fn code(&self) -> &'static str {
        match self {
            DocumentKind::Passport => "P",
            DocumentKind::IdCard => "ID",
            DocumentKind::CCard => "C",
            DocumentKind::OldGermanId => "IDOLDGERMAN",
        }
    }

    /// Map a template type code. Unknown codes are treated as passports.
    pub fn from_code(code: &str) -> Self {
        match code.trim().to_ascii_uppercase().as_str() {
            "ID" => DocumentKind::IdCard,
            "C" => DocumentKind::CCard,
            "IDOLDGERMAN" => DocumentKind::OldGermanId,
            _ => DocumentKind::Passport,
        }
    }
}

impl fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Named MRZ field.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MrzField {
    DocumentType,
    FirstName,
    LastName,
    DocumentNumber,
    Sex,
    BirthDate,
    ExpirationDate,
    IssuingCountry,
    Nationality,
    /// Any other element; extracted for check-digit validation only.
    Other(String),
}

impl MrzField {
    /// Element name used in template sources.
    pub fn name(&self) -> &str {
        match self {
            MrzField::DocumentType => "DOCUMENTTYPE",
            MrzField::FirstName => "FIRSTNAME",
            MrzField::LastName => "LASTNAME",
            MrzField::DocumentNumber => "DOCUMENTNO",
            MrzField::Sex => "SEX",
            MrzField::BirthDate => "BIRTHDATE",
            MrzField::ExpirationDate => "EXPIRATIONDATE",
            MrzField::IssuingCountry => "ISSUINGCOUNTRY",
            MrzField::Nationality => "NATIONALITY",
            MrzField::Other(name) => name,
        }
    }
}

impl FromStr for MrzField {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(match s.to_ascii_uppercase().as_str() {
            "DOCUMENTTYPE" => MrzField::DocumentType,
            "FIRSTNAME" => MrzField::FirstName,
            "LASTNAME" => MrzField::LastName,
            "DOCUMENTNO" => MrzField::DocumentNumber,
            "SEX" => MrzField::Sex,
            "BIRTHDATE" => MrzField::BirthDate,
            "EXPIRATIONDATE" => MrzField::ExpirationDate,
            "ISSUINGCOUNTRY" => MrzField::IssuingCountry,
            "NATIONALITY" => MrzField::Nationality,
            other => MrzField::Other(other.to_string()),
        })
    }
}

impl fmt::Display for MrzField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Where a field lives inside the MRZ.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FieldSpec {
    /// Row index (0-based).
    pub row: usize,
    /// First character of the field.
    pub start: Option<usize>,
    /// One past the last character; `None` reads to the end of the row.
    pub end: Option<usize>,
    /// Name-zone offset used when the field has no fixed position.
    pub search_from: Option<usize>,
    /// Position of the check digit covering this field.
    pub check_digit: Option<usize>,
}

impl FieldSpec {
    /// Field at a fixed `[start, end)` slice of `row`.
    pub fn fixed(row: usize, start: usize, end: usize) -> Self {
        Self {
            row,
            start: Some(start),
            end: Some(end),
            ..Self::default()
        }
    }

    /// Field found by scanning the name zone from `offset`.
    pub fn search(row: usize, offset: usize) -> Self {
        Self {
            row,
            search_from: Some(offset),
            ..Self::default()
        }
    }

    /// Attach a check-digit position.
    pub fn with_check_digit(mut self, position: usize) -> Self {
        self.check_digit = Some(position);
        self
    }
}

/// One document layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentTemplate {
    /// Issuing country this layout is specific to, empty for generic layouts.
    pub country: String,
    pub kind: DocumentKind,
    pub rows: usize,
    pub row_size: usize,
    /// Fields in declaration order.
    pub fields: Vec<(MrzField, FieldSpec)>,
}

impl DocumentTemplate {
    pub fn new(kind: DocumentKind, rows: usize, row_size: usize) -> Self {
        Self {
            country: String::new(),
            kind,
            rows,
            row_size,
            fields: Vec::new(),
        }
    }

    pub fn with_country(mut self, country: impl Into<String>) -> Self {
        self.country = country.into();
        self
    }

    pub fn with_field(mut self, field: MrzField, spec: FieldSpec) -> Self {
        self.fields.push((field, spec));
        self
    }

    /// Look up the descriptor of a field.
    pub fn field(&self, field: &MrzField) -> Option<&FieldSpec> {
        self.fields
            .iter()
            .find_map(|(name, spec)| (name == field).then_some(spec))
    }

    /// True when this template describes `rows` rows of `row_size` characters.
    pub fn matches_shape(&self, rows: usize, row_size: usize) -> bool {
        self.rows == rows && self.row_size == row_size
    }
}

/// Immutable set of document templates.
#[derive(Debug, Clone, Default)]
pub struct TemplateStore {
    templates: Vec<DocumentTemplate>,
}

impl TemplateStore {
    /// Load the bundled template set.
    ///
    /// # Errors
    /// Only fails if the bundled XML itself is broken.
    pub fn builtin() -> Result<Self> {
        Self::from_xml_str(BUILTIN_TEMPLATES)
    }

    /// Load templates from an XML file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or is not a valid
    /// template source.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let xml = std::fs::read_to_string(path).map_err(|source| TemplateError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let store = Self::from_xml_str(&xml)?;
        info!(
            path = %path.display(),
            templates = store.len(),
            "Loaded document templates"
        );
        Ok(store)
    }

    /// Parse templates from XML text.
    ///
    /// # Errors
    /// Returns an error for malformed XML, a root other than `DOCUMENTS`,
    /// missing `ROWS`/`ROWSIZE`, non-numeric positions, or an empty source.
    pub fn from_xml_str(xml: &str) -> Result<Self> {
        let doc = Document::parse(xml)?;
        let root = doc.root_element();

        if !root.tag_name().name().eq_ignore_ascii_case("DOCUMENTS") {
            return Err(TemplateError::UnexpectedRoot(
                root.tag_name().name().to_string(),
            ));
        }

        let templates = root
            .children()
            .filter(|n| n.is_element() && n.tag_name().name().eq_ignore_ascii_case("DOCUMENT"))
            .map(|node| parse_document(&node))
            .collect::<Result<Vec<_>>>()?;

        if templates.is_empty() {
            return Err(TemplateError::Empty);
        }

        debug!(count = templates.len(), "Parsed document templates");
        Ok(Self { templates })
    }

    /// Build a store from already constructed templates.
    pub fn from_templates(templates: Vec<DocumentTemplate>) -> Self {
        Self { templates }
    }

    /// Templates whose shape is `rows` × `row_size`, in declaration order.
    pub fn find(&self, rows: usize, row_size: usize) -> impl Iterator<Item = &DocumentTemplate> {
        self.templates
            .iter()
            .filter(move |t| t.matches_shape(rows, row_size))
    }

    pub fn templates(&self) -> &[DocumentTemplate] {
        &self.templates
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

fn parse_document(node: &Node) -> Result<DocumentTemplate> {
    let element = node.tag_name().name();
    let rows = required_usize(node, "ROWS")?;
    let row_size = required_usize(node, "ROWSIZE")?;

    if rows == 0 || row_size == 0 {
        return Err(TemplateError::invalid_attribute(
            element,
            if rows == 0 { "ROWS" } else { "ROWSIZE" },
            "must be greater than zero",
        ));
    }

    let mut template = DocumentTemplate::new(
        DocumentKind::from_code(node.attribute("TYPE").unwrap_or_default()),
        rows,
        row_size,
    )
    .with_country(node.attribute("COUNTRY").unwrap_or_default().trim());

    for child in node.children().filter(Node::is_element) {
        let name = child.tag_name().name();
        let spec = FieldSpec {
            row: optional_usize(&child, "ROW")?.unwrap_or(0),
            start: optional_usize(&child, "START")?,
            end: optional_usize(&child, "END")?,
            search_from: optional_usize(&child, "SEARCHFROM")?,
            check_digit: optional_usize(&child, "CHECKDIGIT")?,
        };
        // FromStr for MrzField is infallible.
        let field = name.parse::<MrzField>().unwrap_or(MrzField::Other(name.to_string()));
        template.fields.push((field, spec));
    }

    Ok(template)
}

fn required_usize(node: &Node, attribute: &str) -> Result<usize> {
    optional_usize(node, attribute)?.ok_or_else(|| {
        TemplateError::invalid_attribute(node.tag_name().name(), attribute, "missing")
    })
}

fn optional_usize(node: &Node, attribute: &str) -> Result<Option<usize>> {
    match node.attribute(attribute).map(str::trim) {
        None | Some("") => Ok(None),
        Some(value) => value.parse::<usize>().map(Some).map_err(|_| {
            TemplateError::invalid_attribute(
                node.tag_name().name(),
                attribute,
                format!("not a number: {value}"),
            )
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::io::Write;

    const SAMPLE: &str = r#"
        <DOCUMENTS>
          <DOCUMENT ROWS="2" ROWSIZE="44" COUNTRY="" TYPE="P">
            <LASTNAME ROW="0" SEARCHFROM="5" />
            <DOCUMENTNO ROW="1" START="0" END="10" CHECKDIGIT="9" />
            <REMARK ROW="1" START="28" END="42" />
          </DOCUMENT>
          <DOCUMENT ROWS="3" ROWSIZE="30" COUNTRY="D" TYPE="IDOLDGERMAN" />
        </DOCUMENTS>
    "#;

    #[test]
    fn test_builtin_templates_load() {
        let store = TemplateStore::builtin().unwrap();
        assert!(store.len() >= 4);
        assert_eq!(store.find(2, 44).count(), 1);
        assert_eq!(store.find(3, 30).count(), 2);
    }

    #[test]
    fn test_parse_fields_and_defaults() {
        let store = TemplateStore::from_xml_str(SAMPLE).unwrap();
        let passport = &store.templates()[0];

        assert_eq!(passport.kind, DocumentKind::Passport);
        assert_eq!(passport.country, "");

        let last = passport.field(&MrzField::LastName).unwrap();
        assert_eq!(last.row, 0);
        assert_eq!(last.start, None);
        assert_eq!(last.search_from, Some(5));

        let number = passport.field(&MrzField::DocumentNumber).unwrap();
        assert_eq!(*number, FieldSpec::fixed(1, 0, 10).with_check_digit(9));

        assert!(
            passport
                .field(&MrzField::Other("REMARK".to_string()))
                .is_some()
        );
    }

    #[test]
    fn test_country_and_kind() {
        let store = TemplateStore::from_xml_str(SAMPLE).unwrap();
        let german = &store.templates()[1];
        assert_eq!(german.kind, DocumentKind::OldGermanId);
        assert_eq!(german.country, "D");
        assert!(german.fields.is_empty());
    }

    #[rstest]
    #[case("P", DocumentKind::Passport)]
    #[case("ID", DocumentKind::IdCard)]
    #[case("c", DocumentKind::CCard)]
    #[case("IDOLDGERMAN", DocumentKind::OldGermanId)]
    #[case("VISA", DocumentKind::Passport)]
    #[case("", DocumentKind::Passport)]
    fn test_kind_from_code(#[case] code: &str, #[case] expected: DocumentKind) {
        assert_eq!(DocumentKind::from_code(code), expected);
    }

    #[test]
    fn test_rejects_non_numeric_position() {
        let xml = r#"<DOCUMENTS><DOCUMENT ROWS="2" ROWSIZE="44" TYPE="P">
            <SEX ROW="1" START="twenty" END="21" /></DOCUMENT></DOCUMENTS>"#;
        let err = TemplateStore::from_xml_str(xml).unwrap_err();
        assert!(matches!(err, TemplateError::InvalidAttribute { .. }));
        assert!(err.to_string().contains("START"));
    }

    #[test]
    fn test_rejects_missing_shape() {
        let xml = r#"<DOCUMENTS><DOCUMENT ROWSIZE="44" TYPE="P" /></DOCUMENTS>"#;
        let err = TemplateStore::from_xml_str(xml).unwrap_err();
        assert!(err.to_string().contains("ROWS"));
    }

    #[test]
    fn test_rejects_wrong_root_and_empty() {
        assert!(matches!(
            TemplateStore::from_xml_str("<TEMPLATES />"),
            Err(TemplateError::UnexpectedRoot(_))
        ));
        assert!(matches!(
            TemplateStore::from_xml_str("<DOCUMENTS />"),
            Err(TemplateError::Empty)
        ));
        assert!(matches!(
            TemplateStore::from_xml_str("<DOCUMENTS>"),
            Err(TemplateError::Xml(_))
        ));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let store = TemplateStore::load(file.path()).unwrap();
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_load_missing_file() {
        let err = TemplateStore::load("/nonexistent/Documents.xml").unwrap_err();
        assert!(matches!(err, TemplateError::Read { .. }));
    }
}

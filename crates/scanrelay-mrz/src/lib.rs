//! Template-driven parsing of machine readable zones (MRZ).
//!
//! Two pieces live here:
//!
//! - [`TemplateStore`] loads document layouts (row count, row width and
//!   per-field positions) from a declarative XML source.
//! - [`MrzParser`] turns raw reader text into an [`MrzRecord`] using the
//!   template whose shape matches the text.
//!
//! ```
//! use std::sync::Arc;
//! use scanrelay_mrz::{MrzParser, RowSeparator, TemplateStore};
//!
//! let templates = Arc::new(TemplateStore::builtin().unwrap());
//! let parser = MrzParser::new(templates);
//!
//! // Three rows of 30 with no TD1 template loaded would be `None`;
//! // garbage of any shape is simply not a document.
//! assert!(parser.parse("HELLO", RowSeparator::CrLf).is_none());
//! ```
//!
//! Parsing never returns an error. A scan that fits no template is `None`
//! so the caller can discard it and keep listening; an unreadable date is
//! nulled and logged while the remaining fields are still filled in.
//!
//! [`MrzRecord`]: scanrelay_core::MrzRecord

pub mod error;
pub mod fields;
pub mod parser;
pub mod template;

pub use error::{Result, TemplateError};
pub use fields::{check_digit, normalize_country, parse_birth_date, parse_expiry_date};
pub use parser::{MrzParser, RowSeparator, parse};
pub use template::{DocumentKind, DocumentTemplate, FieldSpec, MrzField, TemplateStore};

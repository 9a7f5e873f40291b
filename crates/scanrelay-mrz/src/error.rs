//! Errors raised while loading document templates.
//!
//! Parsing MRZ text never fails with an error: a scan that fits no template
//! is `None`, a bad field is nulled. Only the template source can be wrong.

use std::path::PathBuf;

/// Result type alias for template operations.
pub type Result<T> = std::result::Result<T, TemplateError>;

#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    /// Template file could not be read.
    #[error("Failed to read template file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Template source is not well-formed XML.
    #[error("Invalid template XML: {0}")]
    Xml(#[from] roxmltree::Error),

    /// Root element is not `DOCUMENTS`.
    #[error("Unexpected root element <{0}>, expected <DOCUMENTS>")]
    UnexpectedRoot(String),

    /// A `DOCUMENT` or field attribute is missing or malformed.
    #[error("Invalid attribute {attribute} on <{element}>: {message}")]
    InvalidAttribute {
        element: String,
        attribute: String,
        message: String,
    },

    /// The source declares no documents at all.
    #[error("Template source contains no documents")]
    Empty,
}

impl TemplateError {
    pub fn invalid_attribute(
        element: impl Into<String>,
        attribute: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::InvalidAttribute {
            element: element.into(),
            attribute: attribute.into(),
            message: message.into(),
        }
    }
}

impl From<TemplateError> for scanrelay_core::Error {
    fn from(err: TemplateError) -> Self {
        scanrelay_core::Error::Template(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_attribute_display() {
        let err = TemplateError::invalid_attribute("BIRTHDATE", "START", "not a number: x");
        assert_eq!(
            err.to_string(),
            "Invalid attribute START on <BIRTHDATE>: not a number: x"
        );
    }

    #[test]
    fn test_converts_into_core_error() {
        let err: scanrelay_core::Error = TemplateError::Empty.into();
        assert!(matches!(err, scanrelay_core::Error::Template(_)));
    }
}

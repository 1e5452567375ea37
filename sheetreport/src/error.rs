//! Error types for report rendering.

use thiserror::Error;

/// Result type for rendering operations
pub type Result<T> = std::result::Result<T, ReportError>;

/// Errors that can occur while rendering a report
#[derive(Error, Debug)]
pub enum ReportError {
    /// The requested output kind is not produced by this formatter
    #[error("Unsupported output type '{output}' for template '{document}'")]
    UnsupportedOutput { document: String, output: String },

    /// PDF/HTML output was requested but no document converter is configured
    #[error("No document converter configured to produce {output} for template '{document}'")]
    MissingConverter { document: String, output: String },

    /// The template itself is malformed (bad named range, missing part)
    #[error("Invalid template '{document}': {reason}")]
    Template { document: String, reason: String },

    /// Any other failure while formatting, wrapped with the template name
    #[error("An error occurred while formatting template '{document}': {source}")]
    Formatting {
        document: String,
        #[source]
        source: Box<ReportError>,
    },

    /// Cooperative cancellation was requested
    #[error("Report rendering was interrupted")]
    Interrupted,

    /// Placeholder or band data could not be interpreted
    #[error("Bad alias '{alias}': {reason}")]
    BadAlias { alias: String, reason: String },

    /// A content inliner failed to embed its value
    #[error("Content inliner '{inliner}' failed: {reason}")]
    Inliner { inliner: String, reason: String },

    /// Malformed package structure (missing part, bad relationship)
    #[error("Invalid package: {0}")]
    Package(String),

    /// XML generation or parsing error
    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    /// Attribute parsing error
    #[error("XML attribute error: {0}")]
    XmlAttribute(#[from] quick_xml::events::attributes::AttrError),

    /// ZIP archive error
    #[error("Archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV serialization error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Non UTF-8 XML part
    #[error("Encoding error: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    /// Unreadable configuration file
    #[error("Configuration error: {0}")]
    ConfigSyntax(#[from] toml::de::Error),

    /// Configuration values that cannot be used
    #[error("Configuration error: {0}")]
    InvalidConfig(String),
}

impl ReportError {
    /// Create a template error
    pub fn template(document: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Template {
            document: document.into(),
            reason: reason.into(),
        }
    }

    /// Create a bad alias error
    pub fn bad_alias(alias: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::BadAlias {
            alias: alias.into(),
            reason: reason.into(),
        }
    }

    /// Create a package error
    pub fn package(reason: impl Into<String>) -> Self {
        Self::Package(reason.into())
    }

    /// Wrap an error with the template document name.
    ///
    /// Interruption, configuration and already wrapped errors pass through untouched.
    pub fn wrap(self, document: &str) -> Self {
        match self {
            Self::Interrupted
            | Self::UnsupportedOutput { .. }
            | Self::MissingConverter { .. }
            | Self::ConfigSyntax(_)
            | Self::InvalidConfig(_)
            | Self::Template { .. }
            | Self::Formatting { .. } => self,
            other => Self::Formatting {
                document: document.to_string(),
                source: Box::new(other),
            },
        }
    }

    /// True when the error is the cooperative cancellation signal
    pub fn is_interrupted(&self) -> bool {
        matches!(self, Self::Interrupted)
    }

    /// True for configuration errors that must not be retried
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::UnsupportedOutput { .. }
                | Self::MissingConverter { .. }
                | Self::ConfigSyntax(_)
                | Self::InvalidConfig(_)
        )
    }

    /// Name of the template this error refers to, when known
    pub fn document(&self) -> Option<&str> {
        match self {
            Self::UnsupportedOutput { document, .. }
            | Self::MissingConverter { document, .. }
            | Self::Template { document, .. }
            | Self::Formatting { document, .. } => Some(document),
            _ => None,
        }
    }
}

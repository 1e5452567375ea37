//! Output kinds and the external document converter

use crate::error::{ReportError, Result};
use std::fmt;
use std::str::FromStr;

/// What a report is rendered into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputType {
    /// The native spreadsheet format of the template
    #[default]
    Xlsx,
    /// First sheet flattened to delimited text
    Csv,
    /// Converted by a [`DocumentConverter`]
    Pdf,
    /// Converted by a [`DocumentConverter`]
    Html,
}

impl OutputType {
    /// File extension of the produced document
    pub fn extension(&self) -> &'static str {
        match self {
            OutputType::Xlsx => "xlsx",
            OutputType::Csv => "csv",
            OutputType::Pdf => "pdf",
            OutputType::Html => "html",
        }
    }

    /// Whether the output goes through a [`DocumentConverter`]
    pub fn needs_converter(&self) -> bool {
        matches!(self, OutputType::Pdf | OutputType::Html)
    }
}

impl fmt::Display for OutputType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for OutputType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "xlsx" => Ok(OutputType::Xlsx),
            "csv" => Ok(OutputType::Csv),
            "pdf" => Ok(OutputType::Pdf),
            "html" | "htm" => Ok(OutputType::Html),
            other => Err(format!("unknown output type '{}'", other)),
        }
    }
}

/// Converts a rendered XLSX document into another format.
///
/// Implementations typically drive an office suite; none ships with this
/// crate.
pub trait DocumentConverter: Send + Sync {
    fn convert_to_pdf(&self, xlsx: &[u8]) -> Result<Vec<u8>>;

    fn convert_to_html(&self, xlsx: &[u8]) -> Result<Vec<u8>>;
}

/// A template to render: its document name, requested output and bytes
#[derive(Debug, Clone)]
pub struct ReportTemplate {
    pub document_name: String,
    pub output: OutputType,
    pub content: Vec<u8>,
}

impl ReportTemplate {
    pub fn new(document_name: impl Into<String>, output: OutputType, content: Vec<u8>) -> Self {
        Self {
            document_name: document_name.into(),
            output,
            content,
        }
    }

    /// Reject templates this formatter cannot read before any work is done.
    ///
    /// Legacy XLS workbooks are OLE compound files, not zip packages.
    pub fn validate(&self) -> Result<()> {
        const OLE_MAGIC: &[u8] = &[0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];
        let is_xls = self.content.starts_with(OLE_MAGIC)
            || self.document_name.to_ascii_lowercase().ends_with(".xls");
        if is_xls {
            return Err(ReportError::UnsupportedOutput {
                document: self.document_name.clone(),
                output: "xls".to_string(),
            });
        }
        Ok(())
    }
}

//! sheetreport: band-driven spreadsheet report rendering
//!
//! A report is a tree of bands (named, repeating groups of parameters) and an
//! XLSX template whose named ranges describe how each band looks. Every band
//! occurrence is copied from its named range into the result, with
//! `${band.param}` placeholders substituted, and every formula, merged region,
//! chart, conditional format and pivot source is moved to follow the
//! expansion.

pub mod band;
pub mod cancel;
pub mod config;
pub mod dependencies;
pub mod error;
pub mod formula;
pub mod output;
pub mod package;
pub mod placeholder;
pub mod range;
pub mod reader;
pub mod registry;
pub mod render;
pub mod writer;

use std::sync::Arc;

pub use band::{BandId, BandSpec, BandTree, Orientation, ParamValue, ROOT_BAND_NAME};
pub use cancel::Interrupter;
pub use config::FormatterConfig;
pub use error::{ReportError, Result};
pub use output::{DocumentConverter, OutputType, ReportTemplate};
pub use placeholder::{ContentInliner, FieldFormats};
pub use range::{Offset, Range};
pub use render::{RenderContext, XlsxFormatter};

/// Main report rendering interface
pub struct ReportFormatter {
    config: FormatterConfig,
    formats: FieldFormats,
    inliners: Vec<Box<dyn ContentInliner>>,
    converter: Option<Arc<dyn DocumentConverter>>,
    interrupter: Interrupter,
}

impl ReportFormatter {
    /// Create a formatter with default configuration
    pub fn new() -> Self {
        Self::with_config(FormatterConfig::default())
    }

    /// Create a formatter with custom configuration
    pub fn with_config(config: FormatterConfig) -> Self {
        let formats = config.field_formats();
        Self {
            config,
            formats,
            inliners: placeholder::default_inliners(),
            converter: None,
            interrupter: Interrupter::new(),
        }
    }

    /// Converter used for PDF and HTML output
    pub fn with_converter(mut self, converter: Arc<dyn DocumentConverter>) -> Self {
        self.converter = Some(converter);
        self
    }

    /// Share an interrupter with the caller to cancel renders in flight
    pub fn with_interrupter(mut self, interrupter: Interrupter) -> Self {
        self.interrupter = interrupter;
        self
    }

    /// Register an additional content inliner
    pub fn with_inliner(mut self, inliner: Box<dyn ContentInliner>) -> Self {
        self.inliners.push(inliner);
        self
    }

    /// Add a field format on top of the configured ones
    pub fn with_format(mut self, key: impl Into<String>, format: impl Into<String>) -> Self {
        self.formats.insert(key, format);
        self
    }

    pub fn config(&self) -> &FormatterConfig {
        &self.config
    }

    pub fn interrupter(&self) -> &Interrupter {
        &self.interrupter
    }

    /// Render a band tree into a template.
    ///
    /// Every failure except interruption and configuration errors is
    /// reported as a formatting error carrying the template name.
    pub fn render(&self, template: &ReportTemplate, tree: &BandTree) -> Result<Vec<u8>> {
        self.render_inner(template, tree)
            .map_err(|e| e.wrap(&template.document_name))
    }

    fn render_inner(&self, template: &ReportTemplate, tree: &BandTree) -> Result<Vec<u8>> {
        template.validate()?;
        if template.output.needs_converter() && self.converter.is_none() {
            return Err(ReportError::MissingConverter {
                document: template.document_name.clone(),
                output: template.output.to_string(),
            });
        }

        let formatter = XlsxFormatter::new(&template.document_name, &template.content, self.context(tree))?;
        formatter.write(template.output, self.converter.as_deref())
    }

    /// Render without serializing, for callers that inspect the result model
    pub fn formatter<'a>(&'a self, template: &ReportTemplate, tree: &'a BandTree) -> Result<XlsxFormatter<'a>> {
        template.validate()?;
        let mut formatter = XlsxFormatter::new(&template.document_name, &template.content, self.context(tree))
            .map_err(|e| e.wrap(&template.document_name))?;
        formatter
            .render()
            .map_err(|e| e.wrap(&template.document_name))?;
        Ok(formatter)
    }

    fn context<'a>(&'a self, tree: &'a BandTree) -> RenderContext<'a> {
        RenderContext {
            tree,
            config: &self.config,
            formats: &self.formats,
            inliners: &self.inliners,
            interrupter: &self.interrupter,
        }
    }
}

impl Default for ReportFormatter {
    fn default() -> Self {
        Self::new()
    }
}

//! Band rendering into XLSX templates
//!
//! Rendering happens in two passes. The first walks the band tree depth
//! first and materializes every band occurrence by copying its template
//! range into the result document, queueing the formulas it copies. The
//! second pass fixes up everything that points into moved cells: formulas,
//! merged regions, charts, conditional formatting, pivot sources, defined
//! names, headers/footers and sheet names.

mod formulas;
mod materializer;
mod references;

use crate::band::{BandId, BandTree};
use crate::cancel::Interrupter;
use crate::config::FormatterConfig;
use crate::dependencies::RangeDependencies;
use crate::error::{ReportError, Result};
use crate::output::{DocumentConverter, OutputType};
use crate::placeholder::{ContentInliner, FieldFormats, Placeholders};
use crate::range::Range;
use crate::reader::Document;
use crate::registry::BandsForRanges;
use crate::writer::{self, AnchoredPicture};
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, info};

/// Collaborators shared by every render of a formatter
#[derive(Clone, Copy)]
pub struct RenderContext<'a> {
    pub tree: &'a BandTree,
    pub config: &'a FormatterConfig,
    pub formats: &'a FieldFormats,
    pub inliners: &'a [Box<dyn ContentInliner>],
    pub interrupter: &'a Interrupter,
}

/// A formula cell copied into a result range, waiting for the second pass
#[derive(Debug, Clone)]
pub(crate) struct PendingFormula {
    pub band: BandId,
    /// Template range of the band that copied the cell
    pub template: Range,
    /// Result range the cell landed in
    pub result: Range,
    pub row: u32,
    pub column: u32,
}

/// Parent band, sheet and first result row shared by vertical bands lined up
/// on the same horizontal line
pub(crate) type VerticalLine = (Option<BandId>, String, u32);

/// Renders one band tree into one XLSX template
pub struct XlsxFormatter<'a> {
    document_name: String,
    tree: &'a BandTree,
    config: &'a FormatterConfig,
    placeholders: Placeholders<'a>,
    interrupter: &'a Interrupter,
    template: Document,
    result: Document,
    /// Band named ranges of the template, in workbook order
    named_ranges: Vec<(String, Range)>,
    templates_by_name: HashMap<String, Range>,
    /// Template ranges crossed by the same horizontal line as the key range
    vertical_intersections: HashMap<Range, Vec<Range>>,
    dependencies: RangeDependencies,
    registry: BandsForRanges,
    /// Columns gained by vertical bands, per parent band and result row:
    /// (template last column, growth)
    vertical_growth: HashMap<VerticalLine, Vec<(u32, i64)>>,
    inner_formulas: Vec<PendingFormula>,
    outer_formulas: Vec<PendingFormula>,
    pictures: Vec<AnchoredPicture>,
    rendered: bool,
}

impl<'a> XlsxFormatter<'a> {
    /// Load a template and prepare an empty result document.
    ///
    /// Every sheet that hosts a band named range is cleared in the result;
    /// its content only comes back through rendered bands.
    pub fn new(document_name: &str, template: &[u8], context: RenderContext<'a>) -> Result<Self> {
        let template = Document::from_bytes(template, context.interrupter)?;
        let named_ranges = template.named_ranges(document_name)?;

        let mut result = template.clone();
        let band_sheets: BTreeSet<&str> = named_ranges.iter().map(|(_, r)| r.sheet()).collect();
        for sheet in result.sheets.iter_mut() {
            if band_sheets.contains(sheet.name.as_str()) {
                sheet.clear_content();
            }
        }

        let vertical_intersections = vertical_intersections(&named_ranges);
        let templates_by_name = named_ranges.iter().cloned().collect();
        debug!(
            document = document_name,
            named_ranges = named_ranges.len(),
            "loaded template"
        );

        Ok(Self {
            document_name: document_name.to_string(),
            tree: context.tree,
            config: context.config,
            placeholders: Placeholders::new(context.tree, context.formats, context.inliners),
            interrupter: context.interrupter,
            template,
            result,
            named_ranges,
            templates_by_name,
            vertical_intersections,
            dependencies: RangeDependencies::new(),
            registry: BandsForRanges::new(),
            vertical_growth: HashMap::new(),
            inner_formulas: Vec::new(),
            outer_formulas: Vec::new(),
            pictures: Vec::new(),
            rendered: false,
        })
    }

    /// Render every band, then update the cross references of the result
    pub fn render(&mut self) -> Result<()> {
        if self.rendered {
            return Ok(());
        }
        let root = self.tree.root();
        self.render_band(root)?;
        self.interrupter.check()?;

        self.update_inner_formulas()?;
        self.update_outer_formulas()?;
        self.update_static_formulas()?;
        self.update_merges();
        self.update_charts()?;
        self.update_conditional_formats()?;
        self.update_pivot_sources()?;
        self.update_defined_names();

        let pictures = std::mem::take(&mut self.pictures);
        writer::embed_pictures(&mut self.result, &pictures)?;

        self.update_headers_and_footers()?;
        self.update_sheet_names()?;
        self.rendered = true;

        info!(
            document = %self.document_name,
            templates = self.dependencies.templates().count(),
            results = self.dependencies.results().count(),
            "rendered report"
        );
        Ok(())
    }

    /// Render and serialize the result into the requested output
    pub fn write(
        mut self,
        output: OutputType,
        converter: Option<&dyn DocumentConverter>,
    ) -> Result<Vec<u8>> {
        if output.needs_converter() && converter.is_none() {
            return Err(ReportError::MissingConverter {
                document: self.document_name.clone(),
                output: output.to_string(),
            });
        }
        self.render()?;

        match output {
            OutputType::Xlsx => writer::write_xlsx(&mut self.result, self.config.global.full_calc_on_load),
            OutputType::Csv => writer::write_csv(
                &self.result,
                self.config.csv_delimiter(),
                self.config.global.skip_empty_rows,
            ),
            OutputType::Pdf | OutputType::Html => {
                let xlsx = writer::write_xlsx(&mut self.result, self.config.global.full_calc_on_load)?;
                match converter {
                    Some(c) if output == OutputType::Pdf => c.convert_to_pdf(&xlsx),
                    Some(c) => c.convert_to_html(&xlsx),
                    None => Err(ReportError::MissingConverter {
                        document: self.document_name.clone(),
                        output: output.to_string(),
                    }),
                }
            }
        }
    }

    pub fn document_name(&self) -> &str {
        &self.document_name
    }

    /// Template range -> result ranges recorded so far
    pub fn dependencies(&self) -> &RangeDependencies {
        &self.dependencies
    }

    pub fn registry(&self) -> &BandsForRanges {
        &self.registry
    }

    /// The document being rendered into
    pub fn result(&self) -> &Document {
        &self.result
    }

    pub fn into_result(self) -> Document {
        self.result
    }

    /// Smallest named template range containing `range`
    fn template_containing(&self, range: &Range) -> Option<&Range> {
        self.named_ranges
            .iter()
            .map(|(_, template)| template)
            .filter(|template| template.contains(range))
            .min_by_key(|template| u64::from(template.height()) * u64::from(template.width()))
    }
}

/// Pairs of template ranges on the same sheet whose row spans overlap
fn vertical_intersections(named_ranges: &[(String, Range)]) -> HashMap<Range, Vec<Range>> {
    let mut intersections: HashMap<Range, Vec<Range>> = HashMap::new();
    for (_, range) in named_ranges {
        for (_, other) in named_ranges {
            if range != other && range.sheet() == other.sheet() && range.rows_overlap(other) {
                intersections
                    .entry(range.clone())
                    .or_default()
                    .push(other.clone());
            }
        }
    }
    intersections
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vertical_intersections() {
        let named = vec![
            ("Title".to_string(), Range::new("S", 1, 1, 1, 3)),
            ("Left".to_string(), Range::new("S", 2, 1, 3, 1)),
            ("Right".to_string(), Range::new("S", 3, 3, 3, 4)),
            ("Other".to_string(), Range::new("T", 2, 1, 2, 1)),
        ];
        let intersections = vertical_intersections(&named);

        assert_eq!(
            intersections.get(&named[1].1),
            Some(&vec![named[2].1.clone()])
        );
        assert_eq!(
            intersections.get(&named[2].1),
            Some(&vec![named[1].1.clone()])
        );
        assert!(!intersections.contains_key(&named[0].1));
        assert!(!intersections.contains_key(&named[3].1));
    }
}

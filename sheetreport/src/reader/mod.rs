//! XLSX template reader built on quick-xml

use crate::cancel::Interrupter;
use crate::error::{ReportError, Result};
use crate::package::XlsxPackage;
use crate::range::Range;
use tracing::debug;

pub mod parser_utils;
pub mod workbook;
pub mod xlsx_parser;

pub use workbook::{
    Cell, CellValue, ConditionalFormat, DefinedName, Row, SheetInfo, Workbook, Worksheet,
};

/// A loaded spreadsheet: the raw package plus the parsed model of every sheet.
///
/// The renderer reads a template `Document` and writes into a clone of it.
#[derive(Debug, Clone)]
pub struct Document {
    pub package: XlsxPackage,
    pub workbook: Workbook,
    pub sheets: Vec<Worksheet>,
}

impl Document {
    /// Parse the workbook and every worksheet of a package
    pub fn from_package(package: XlsxPackage, interrupter: &Interrupter) -> Result<Self> {
        let workbook = xlsx_parser::parse_workbook(&package)?;
        let mut sheets = Vec::with_capacity(workbook.sheets.len());

        for info in &workbook.sheets {
            interrupter.check()?;
            let xml = package.part_string(&info.part)?;
            let sheet = xlsx_parser::parse_worksheet(
                &info.name,
                &info.part,
                &xml,
                &workbook.shared_strings,
                interrupter,
            )?;
            debug!(sheet = %info.name, rows = sheet.rows.len(), "parsed worksheet");
            sheets.push(sheet);
        }

        Ok(Self {
            package,
            workbook,
            sheets,
        })
    }

    /// Load from XLSX bytes
    pub fn from_bytes(data: &[u8], interrupter: &Interrupter) -> Result<Self> {
        Self::from_package(XlsxPackage::from_bytes(data)?, interrupter)
    }

    /// Get a sheet by name
    pub fn sheet(&self, name: &str) -> Option<&Worksheet> {
        self.sheets.iter().find(|s| s.name == name)
    }

    pub fn sheet_mut(&mut self, name: &str) -> Option<&mut Worksheet> {
        self.sheets.iter_mut().find(|s| s.name == name)
    }

    /// User defined names resolved to ranges, in workbook order.
    ///
    /// Internal names (`_xlnm.*`) are skipped; a name whose formula is not a
    /// plain sheet range is a template error.
    pub fn named_ranges(&self, document: &str) -> Result<Vec<(String, Range)>> {
        let mut ranges: Vec<(String, Range)> = Vec::new();
        for name in &self.workbook.defined_names {
            if name.is_internal() {
                continue;
            }
            let range = Range::from_formula(&name.formula).ok_or_else(|| {
                ReportError::template(
                    document,
                    format!(
                        "named range '{}' has an unsupported reference '{}'",
                        name.name, name.formula
                    ),
                )
            })?;
            if self.sheet(range.sheet()).is_none() {
                return Err(ReportError::template(
                    document,
                    format!(
                        "named range '{}' refers to unknown sheet '{}'",
                        name.name,
                        range.sheet()
                    ),
                ));
            }
            if ranges.iter().all(|(existing, _)| existing != &name.name) {
                ranges.push((name.name.clone(), range));
            }
        }
        Ok(ranges)
    }
}

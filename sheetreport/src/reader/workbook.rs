//! Template document data structures

use crate::range::Range;
use std::collections::{BTreeMap, BTreeSet};

/// A `<sheet>` entry of the workbook
#[derive(Debug, Clone, PartialEq)]
pub struct SheetInfo {
    pub name: String,
    pub sheet_id: u32,
    /// Relationship id in the workbook rels
    pub rel_id: String,
    /// Resolved part path, e.g. `xl/worksheets/sheet1.xml`
    pub part: String,
    /// `hidden` / `veryHidden`, `None` when visible
    pub state: Option<String>,
}

/// A `<definedName>` of the workbook
#[derive(Debug, Clone, PartialEq)]
pub struct DefinedName {
    pub name: String,
    pub formula: String,
    /// Index of the sheet the name is local to
    pub local_sheet_id: Option<u32>,
    pub hidden: bool,
}

impl DefinedName {
    /// Excel-internal names (`_xlnm.Print_Area`, filter databases)
    pub fn is_internal(&self) -> bool {
        self.name.starts_with("_xlnm.") || self.name.contains("_FilterDatabase")
    }
}

/// Workbook-level metadata
#[derive(Debug, Clone, Default)]
pub struct Workbook {
    /// Part path of the workbook XML
    pub part: String,
    pub sheets: Vec<SheetInfo>,
    pub defined_names: Vec<DefinedName>,
    pub shared_strings: Vec<String>,
}

impl Workbook {
    /// Get a sheet by name
    pub fn sheet(&self, name: &str) -> Option<&SheetInfo> {
        self.sheets.iter().find(|s| s.name == name)
    }

    /// Get all sheet names
    pub fn sheet_names(&self) -> Vec<&str> {
        self.sheets.iter().map(|s| s.name.as_str()).collect()
    }
}

/// Cell value types
#[derive(Debug, Clone, PartialEq, Default)]
pub enum CellValue {
    #[default]
    Empty,
    Number(f64),
    Bool(bool),
    Text(String),
    Formula {
        formula: String,
        cached: Option<String>,
    },
    Error(String),
}

impl CellValue {
    pub fn is_empty(&self) -> bool {
        matches!(self, CellValue::Empty)
    }

    /// Get the formula if this is a formula cell
    pub fn as_formula(&self) -> Option<&str> {
        match self {
            CellValue::Formula { formula, .. } => Some(formula),
            _ => None,
        }
    }

    /// Get the text if this is a text cell
    pub fn as_text(&self) -> Option<&str> {
        match self {
            CellValue::Text(text) => Some(text),
            _ => None,
        }
    }

    /// Create a formula cell without cached value
    pub fn formula(f: impl Into<String>) -> Self {
        CellValue::Formula {
            formula: f.into(),
            cached: None,
        }
    }
}

/// A single cell
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Cell {
    /// Index into the stylesheet's `cellXfs`
    pub style: Option<u32>,
    pub value: CellValue,
}

impl Cell {
    pub fn new(value: CellValue) -> Self {
        Self { style: None, value }
    }
}

/// A row with its format attributes and cells keyed by 1-based column
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Row {
    pub height: Option<f64>,
    pub custom_height: bool,
    pub outline_level: u8,
    pub collapsed: bool,
    pub hidden: bool,
    pub style: Option<u32>,
    pub custom_format: bool,
    pub cells: BTreeMap<u32, Cell>,
}

impl Row {
    /// Copy height, outline and style attributes, leaving cells untouched
    pub fn copy_format_from(&mut self, other: &Row) {
        self.height = other.height;
        self.custom_height = other.custom_height;
        self.outline_level = other.outline_level;
        self.collapsed = other.collapsed;
        self.hidden = other.hidden;
        self.style = other.style;
        self.custom_format = other.custom_format;
    }

    pub fn has_values(&self) -> bool {
        self.cells.values().any(|c| !c.value.is_empty())
    }
}

/// A `<conditionalFormatting>` block
#[derive(Debug, Clone, PartialEq)]
pub struct ConditionalFormat {
    pub sqref: Vec<Range>,
    pub pivot: bool,
    /// Inner `<cfRule>` markup, kept verbatim
    pub rules: String,
}

/// A top-level worksheet element kept verbatim
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct RawElement {
    pub tag: String,
    pub xml: String,
}

/// A parsed worksheet.
///
/// Elements the renderer rewrites are held structurally; every other
/// top-level element is preserved as raw XML and written back in schema
/// order.
#[derive(Debug, Clone, Default)]
pub struct Worksheet {
    pub name: String,
    pub part: String,
    /// XML declaration and `<worksheet ...>` start tag
    pub(crate) prolog: String,
    pub(crate) elements: Vec<RawElement>,
    /// Rows keyed by 1-based row number
    pub rows: BTreeMap<u32, Row>,
    pub merges: Vec<Range>,
    pub conditional_formats: Vec<ConditionalFormat>,
    /// Rows followed by a manual page break
    pub row_breaks: BTreeSet<u32>,
    /// Raw `<headerFooter>` element
    pub header_footer: Option<String>,
    /// Relationship id of the sheet drawing
    pub drawing: Option<String>,
}

impl Worksheet {
    pub fn new(name: impl Into<String>, part: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            part: part.into(),
            ..Default::default()
        }
    }

    /// Get a cell at the given position
    pub fn cell(&self, row: u32, col: u32) -> Option<&Cell> {
        self.rows.get(&row).and_then(|r| r.cells.get(&col))
    }

    /// Get a row, creating it when missing
    pub fn row_mut(&mut self, row: u32) -> &mut Row {
        self.rows.entry(row).or_default()
    }

    pub fn set_cell(&mut self, row: u32, col: u32, cell: Cell) {
        self.row_mut(row).cells.insert(col, cell);
    }

    /// Last row present in the sheet, 0 for an empty sheet
    pub fn last_row(&self) -> u32 {
        self.rows.keys().next_back().copied().unwrap_or(0)
    }

    /// Used area covering every cell, if any
    pub fn used_range(&self) -> Option<Range> {
        let mut bounds: Option<(u32, u32, u32, u32)> = None;
        for (&r, row) in &self.rows {
            for &c in row.cells.keys() {
                bounds = Some(match bounds {
                    None => (r, c, r, c),
                    Some((r1, c1, r2, c2)) => (r1.min(r), c1.min(c), r2.max(r), c2.max(c)),
                });
            }
        }
        bounds.map(|(r1, c1, r2, c2)| Range::new(self.name.as_str(), r1, c1, r2, c2))
    }

    /// Remove every row, merge and page break (the sheet keeps its layout elements)
    pub fn clear_content(&mut self) {
        self.rows.clear();
        self.merges.clear();
        self.row_breaks.clear();
    }

    /// Iterate over cells with their positions in row-major order
    pub fn cells(&self) -> impl Iterator<Item = (u32, u32, &Cell)> {
        self.rows
            .iter()
            .flat_map(|(&r, row)| row.cells.iter().map(move |(&c, cell)| (r, c, cell)))
    }
}

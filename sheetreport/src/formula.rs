//! Cell references inside formula text
//!
//! Formulas are never evaluated, only scanned for A1-style references so the
//! renderer can move them. String literals, external workbook brackets and
//! function names that look like cells (`LOG10(`) are skipped.

use crate::range::{Range, quote_sheet, unquote_sheet};
use crate::reader::parser_utils::{column_letters, parse_cell_ref};
use regex::{Captures, Regex};
use std::sync::LazyLock;

static REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?:(?P<sheet>'(?:[^']|'')+'|[A-Za-z_][A-Za-z0-9_.]*)!)?(?P<first>\$?[A-Za-z]{1,3}\$?[0-9]{1,7})(?::(?P<last>\$?[A-Za-z]{1,3}\$?[0-9]{1,7}))?",
    )
    .expect("reference pattern is valid")
});

/// One corner of a reference with its absolute markers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Anchor {
    pub row: u32,
    pub col: u32,
    pub row_absolute: bool,
    pub col_absolute: bool,
}

impl Anchor {
    fn parse(text: &str) -> Option<Self> {
        let (row, col) = parse_cell_ref(text)?;
        if col > 16_384 || row > 1_048_576 {
            return None;
        }
        let col_absolute = text.starts_with('$');
        let row_absolute = text[1..].contains('$');
        Some(Self {
            row,
            col,
            row_absolute,
            col_absolute,
        })
    }

    fn render(&self) -> String {
        format!(
            "{}{}{}{}",
            if self.col_absolute { "$" } else { "" },
            column_letters(self.col),
            if self.row_absolute { "$" } else { "" },
            self.row
        )
    }

    fn moved_to(&self, row: u32, col: u32) -> Self {
        Self { row, col, ..*self }
    }
}

/// A reference found in a formula: optional sheet, one or two corners
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormulaRef {
    /// Explicit, unquoted sheet name
    pub sheet: Option<String>,
    pub first: Anchor,
    pub last: Option<Anchor>,
}

impl FormulaRef {
    /// Area covered, qualified with `default_sheet` when the reference has no sheet
    pub fn to_range(&self, default_sheet: &str) -> Range {
        let last = self.last.unwrap_or(self.first);
        Range::new(
            self.sheet.as_deref().unwrap_or(default_sheet),
            self.first.row,
            self.first.col,
            last.row,
            last.col,
        )
    }

    /// Same markers and sheet qualification, new coordinates
    pub fn with_range(&self, range: &Range) -> Self {
        let first = self
            .first
            .moved_to(range.first_row(), range.first_column());
        let last = if range.is_one_cell() && self.last.is_none() {
            None
        } else {
            Some(
                self.last
                    .unwrap_or(self.first)
                    .moved_to(range.last_row(), range.last_column()),
            )
        };
        Self {
            sheet: self.sheet.clone(),
            first,
            last,
        }
    }

    /// Formula text of this reference
    pub fn render(&self) -> String {
        let mut text = String::new();
        if let Some(sheet) = &self.sheet {
            text.push_str(&quote_sheet(sheet));
            text.push('!');
        }
        text.push_str(&self.first.render());
        if let Some(last) = &self.last {
            text.push(':');
            text.push_str(&last.render());
        }
        text
    }

    fn from_captures(caps: &Captures) -> Option<Self> {
        let first = Anchor::parse(caps.name("first")?.as_str())?;
        let last = match caps.name("last") {
            Some(m) => Some(Anchor::parse(m.as_str())?),
            None => None,
        };
        Some(Self {
            sheet: caps.name("sheet").map(|m| unquote_sheet(m.as_str())),
            first,
            last,
        })
    }
}

/// Rewrite every reference of a formula.
///
/// The callback returns the replacement text, or `None` to keep the
/// reference as written.
pub fn replace_references<F>(formula: &str, mut replace: F) -> String
where
    F: FnMut(&FormulaRef) -> Option<String>,
{
    let mut output = String::with_capacity(formula.len());
    for (segment, is_code) in split_literals(formula) {
        if !is_code {
            output.push_str(segment);
            continue;
        }
        let mut last_end = 0;
        for caps in REFERENCE.captures_iter(segment) {
            let Some(whole) = caps.get(0) else { continue };
            if !is_reference_boundary(segment, whole.start(), whole.end()) {
                continue;
            }
            let Some(reference) = FormulaRef::from_captures(&caps) else {
                continue;
            };
            if let Some(replacement) = replace(&reference) {
                output.push_str(&segment[last_end..whole.start()]);
                output.push_str(&replacement);
                last_end = whole.end();
            }
        }
        output.push_str(&segment[last_end..]);
    }
    output
}

/// Every reference of a formula, in order of appearance
pub fn references(formula: &str) -> Vec<FormulaRef> {
    let mut found = Vec::new();
    replace_references(formula, |reference| {
        found.push(reference.clone());
        None
    });
    found
}

/// Move every reference by a fixed delta, markers preserved
pub fn shift_references(formula: &str, down: i64, right: i64) -> String {
    replace_references(formula, |reference| {
        Some(reference.with_range(&reference.to_range("").shift(down, right)).render())
    })
}

/// Translate a shared formula from its master cell to another cell.
///
/// Only the relative parts of each reference move, the way a fill does.
pub fn translate_shared_formula(formula: &str, row_shift: i64, col_shift: i64) -> String {
    replace_references(formula, |reference| {
        let shift = |anchor: Anchor| Anchor {
            row: if anchor.row_absolute {
                anchor.row
            } else {
                (anchor.row as i64 + row_shift).max(1) as u32
            },
            col: if anchor.col_absolute {
                anchor.col
            } else {
                (anchor.col as i64 + col_shift).max(1) as u32
            },
            ..anchor
        };
        let moved = FormulaRef {
            sheet: reference.sheet.clone(),
            first: shift(reference.first),
            last: reference.last.map(shift),
        };
        Some(moved.render())
    })
}

/// Split formula text into (segment, is_code) pieces, isolating `"..."` literals
fn split_literals(formula: &str) -> Vec<(&str, bool)> {
    let mut segments = Vec::new();
    let bytes = formula.as_bytes();
    let mut start = 0;
    let mut i = 0;
    let mut in_string = false;

    while i < bytes.len() {
        if bytes[i] == b'"' {
            if in_string {
                if bytes.get(i + 1) == Some(&b'"') {
                    i += 2;
                    continue;
                }
                segments.push((&formula[start..=i], false));
                start = i + 1;
                in_string = false;
            } else {
                if start < i {
                    segments.push((&formula[start..i], true));
                }
                start = i;
                in_string = true;
            }
        }
        i += 1;
    }
    if start < formula.len() {
        segments.push((&formula[start..], !in_string));
    }
    segments
}

fn is_reference_boundary(segment: &str, start: usize, end: usize) -> bool {
    let before = segment[..start].chars().next_back();
    let after = segment[end..].chars().next();
    let word = |c: char| c.is_alphanumeric() || c == '_' || c == '.';
    !before.is_some_and(|c| word(c) || c == '[' || c == '\'')
        && !after.is_some_and(|c| word(c) || c == '(' || c == '[' || c == '!')
}

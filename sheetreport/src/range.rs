//! Rectangular sheet regions and the offsets between them

use crate::reader::parser_utils::{cell_ref, parse_cell_range};
use std::fmt;

/// A rectangular region of a sheet.
///
/// Rows and columns are 1-based and inclusive. `first_row <= last_row` and
/// `first_column <= last_column` always hold.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Range {
    sheet: String,
    first_row: u32,
    first_column: u32,
    last_row: u32,
    last_column: u32,
}

impl Range {
    /// Create a range, normalizing swapped bounds
    pub fn new(
        sheet: impl Into<String>,
        first_row: u32,
        first_column: u32,
        last_row: u32,
        last_column: u32,
    ) -> Self {
        Self {
            sheet: sheet.into(),
            first_row: first_row.min(last_row).max(1),
            first_column: first_column.min(last_column).max(1),
            last_row: first_row.max(last_row).max(1),
            last_column: first_column.max(last_column).max(1),
        }
    }

    /// One-cell range
    pub fn cell(sheet: impl Into<String>, row: u32, column: u32) -> Self {
        Self::new(sheet, row, column, row, column)
    }

    /// Parse a sheet-qualified reference such as `Sheet1!$A$1:$B$2` or `'My sheet'!A1`
    pub fn from_formula(formula: &str) -> Option<Self> {
        let formula = formula.trim().trim_start_matches('=');
        let split = formula.rfind('!')?;
        let sheet = unquote_sheet(&formula[..split]);
        if sheet.is_empty() {
            return None;
        }
        Self::from_range(&sheet, &formula[split + 1..])
    }

    /// Parse an unqualified reference (`A1:B2`, `C3`) on the given sheet
    pub fn from_range(sheet: &str, range: &str) -> Option<Self> {
        let (first_row, first_column, last_row, last_column) = parse_cell_range(range.trim())?;
        Some(Self::new(sheet, first_row, first_column, last_row, last_column))
    }

    pub fn sheet(&self) -> &str {
        &self.sheet
    }

    pub fn first_row(&self) -> u32 {
        self.first_row
    }

    pub fn first_column(&self) -> u32 {
        self.first_column
    }

    pub fn last_row(&self) -> u32 {
        self.last_row
    }

    pub fn last_column(&self) -> u32 {
        self.last_column
    }

    /// Number of rows covered
    pub fn height(&self) -> u32 {
        self.last_row - self.first_row + 1
    }

    /// Number of columns covered
    pub fn width(&self) -> u32 {
        self.last_column - self.first_column + 1
    }

    pub fn is_one_cell(&self) -> bool {
        self.first_row == self.last_row && self.first_column == self.last_column
    }

    /// True iff `other` lies entirely within this range (same sheet)
    pub fn contains(&self, other: &Range) -> bool {
        self.sheet == other.sheet
            && self.first_row <= other.first_row
            && other.last_row <= self.last_row
            && self.first_column <= other.first_column
            && other.last_column <= self.last_column
    }

    /// Symmetric overlap test (same sheet, overlapping rows and columns)
    pub fn intersects(&self, other: &Range) -> bool {
        self.sheet == other.sheet && self.rows_overlap(other) && self.columns_overlap(other)
    }

    /// True iff the row spans overlap, ignoring columns
    pub fn rows_overlap(&self, other: &Range) -> bool {
        self.first_row <= other.last_row && other.first_row <= self.last_row
    }

    /// True iff the column spans overlap, ignoring rows
    pub fn columns_overlap(&self, other: &Range) -> bool {
        self.first_column <= other.last_column && other.first_column <= self.last_column
    }

    /// Translate all four bounds; bounds never drop below 1
    pub fn shift(&self, down: i64, right: i64) -> Self {
        Self {
            sheet: self.sheet.clone(),
            first_row: add_clamped(self.first_row, down),
            first_column: add_clamped(self.first_column, right),
            last_row: add_clamped(self.last_row, down),
            last_column: add_clamped(self.last_column, right),
        }
    }

    /// Translate by an offset
    pub fn shift_by(&self, offset: Offset) -> Self {
        self.shift(offset.down, offset.right)
    }

    /// Extend (or shrink) only the last row and column
    pub fn grow(&self, down: i64, right: i64) -> Self {
        Self::new(
            self.sheet.clone(),
            self.first_row,
            self.first_column,
            add_clamped(self.last_row, down),
            add_clamped(self.last_column, right),
        )
    }

    /// Same bounds on another sheet
    pub fn with_sheet(&self, sheet: impl Into<String>) -> Self {
        Self {
            sheet: sheet.into(),
            ..self.clone()
        }
    }

    /// Smallest range covering both (sheet of `self`)
    pub fn union(&self, other: &Range) -> Self {
        Self::new(
            self.sheet.clone(),
            self.first_row.min(other.first_row),
            self.first_column.min(other.first_column),
            self.last_row.max(other.last_row),
            self.last_column.max(other.last_column),
        )
    }

    /// Offset between the top-left corners of `self` and `target`
    pub fn offset_to(&self, target: &Range) -> Offset {
        Offset {
            down: target.first_row as i64 - self.first_row as i64,
            right: target.first_column as i64 - self.first_column as i64,
        }
    }

    /// Unqualified reference: `A1:B2`, or `A1` for one cell
    pub fn to_range(&self) -> String {
        if self.is_one_cell() {
            cell_ref(self.first_row, self.first_column)
        } else {
            format!(
                "{}:{}",
                cell_ref(self.first_row, self.first_column),
                cell_ref(self.last_row, self.last_column)
            )
        }
    }

    /// Sheet-qualified reference without `$` markers: `Sheet1!A1:B2`
    pub fn to_formula(&self) -> String {
        format!("{}!{}", quote_sheet(&self.sheet), self.to_range())
    }

    /// Sheet-qualified absolute reference: `Sheet1!$A$1:$B$2`
    pub fn to_absolute_formula(&self) -> String {
        let first = format!(
            "${}${}",
            crate::reader::parser_utils::column_letters(self.first_column),
            self.first_row
        );
        let last = format!(
            "${}${}",
            crate::reader::parser_utils::column_letters(self.last_column),
            self.last_row
        );
        if self.is_one_cell() {
            format!("{}!{}", quote_sheet(&self.sheet), first)
        } else {
            format!("{}!{}:{}", quote_sheet(&self.sheet), first, last)
        }
    }
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_formula())
    }
}

/// Delta between two ranges' top-left corners
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Offset {
    pub down: i64,
    pub right: i64,
}

impl Offset {
    pub fn new(down: i64, right: i64) -> Self {
        Self { down, right }
    }

    pub fn is_zero(&self) -> bool {
        self.down == 0 && self.right == 0
    }
}

/// Quote a sheet name for use in a formula when it is not a plain identifier
pub fn quote_sheet(sheet: &str) -> String {
    let plain = !sheet.is_empty()
        && !sheet.starts_with(|c: char| c.is_ascii_digit())
        && sheet
            .chars()
            .all(|c| c.is_alphanumeric() || c == '_' || c == '.');
    if plain {
        sheet.to_string()
    } else {
        format!("'{}'", sheet.replace('\'', "''"))
    }
}

/// Strip formula quoting from a sheet name: `'It''s'` -> `It's`
pub fn unquote_sheet(sheet: &str) -> String {
    let sheet = sheet.trim();
    if sheet.len() >= 2 && sheet.starts_with('\'') && sheet.ends_with('\'') {
        sheet[1..sheet.len() - 1].replace("''", "'")
    } else {
        sheet.to_string()
    }
}

fn add_clamped(value: u32, delta: i64) -> u32 {
    (value as i64 + delta).clamp(1, u32::MAX as i64) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_formula() {
        let range = Range::from_formula("Sheet1!$A$1:$B$2").unwrap();
        assert_eq!(range, Range::new("Sheet1", 1, 1, 2, 2));

        let range = Range::from_formula("'Q1 sales'!C3").unwrap();
        assert_eq!(range.sheet(), "Q1 sales");
        assert!(range.is_one_cell());

        assert!(Range::from_formula("A1:B2").is_none());
        assert!(Range::from_formula("Sheet1!#REF!").is_none());
    }

    #[test]
    fn test_formula_round_trip() {
        let ranges = [
            Range::new("Sheet1", 1, 1, 2, 2),
            Range::new("Data", 10, 3, 10, 3),
            Range::new("My sheet", 5, 27, 9, 30),
            Range::new("It's", 1, 1, 1, 2),
            Range::new("2024", 3, 1, 4, 1),
        ];
        for range in ranges {
            assert_eq!(Range::from_formula(&range.to_formula()), Some(range.clone()));
            assert_eq!(
                Range::from_formula(&range.to_absolute_formula()),
                Some(range.clone())
            );
        }
    }

    #[test]
    fn test_contains_and_intersects() {
        let outer = Range::new("S", 2, 2, 6, 5);
        assert!(outer.contains(&Range::new("S", 3, 3, 4, 4)));
        assert!(outer.contains(&outer));
        assert!(!outer.contains(&Range::new("S", 1, 3, 4, 4)));
        assert!(!outer.contains(&Range::new("T", 3, 3, 4, 4)));

        let other = Range::new("S", 6, 5, 8, 8);
        assert!(outer.intersects(&other));
        assert!(other.intersects(&outer));
        assert!(!outer.intersects(&Range::new("S", 7, 1, 8, 8)));
        assert!(!outer.intersects(&Range::new("S", 2, 6, 6, 6)));
    }

    #[test]
    fn test_shift_and_grow() {
        let range = Range::new("S", 2, 1, 3, 2);
        assert_eq!(range.shift(3, 1), Range::new("S", 5, 2, 6, 3));
        assert_eq!(range.shift(-5, 0), Range::new("S", 1, 1, 1, 2));
        assert_eq!(range.grow(2, 0), Range::new("S", 2, 1, 5, 2));
        assert_eq!(range.grow(0, 3), Range::new("S", 2, 1, 3, 5));
    }

    #[test]
    fn test_offset_to() {
        let template = Range::new("S", 2, 1, 2, 2);
        let result = Range::new("S", 5, 3, 5, 4);
        let offset = template.offset_to(&result);
        assert_eq!(offset, Offset::new(3, 2));
        assert_eq!(template.shift_by(offset), result);
    }

    #[test]
    fn test_to_range() {
        assert_eq!(Range::new("S", 1, 1, 1, 1).to_range(), "A1");
        assert_eq!(Range::new("S", 1, 1, 3, 28).to_range(), "A1:AB3");
        assert_eq!(Range::new("My S", 1, 1, 3, 2).to_formula(), "'My S'!A1:B3");
    }
}

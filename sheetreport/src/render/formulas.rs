//! Second pass over formulas copied by band occurrences

use super::{PendingFormula, XlsxFormatter};
use crate::band::BandId;
use crate::error::Result;
use crate::formula::{FormulaRef, replace_references};
use crate::range::Range;
use crate::reader::{Cell, CellValue};
use std::collections::BTreeSet;
use tracing::warn;

/// How an outer reference resolved
enum Resolution {
    Moved(String),
    Untouched,
    Dangling,
}

impl XlsxFormatter<'_> {
    /// Formulas whose references all lie inside their own template range
    /// move with the occurrence.
    pub(super) fn update_inner_formulas(&mut self) -> Result<()> {
        let pending = std::mem::take(&mut self.inner_formulas);
        for formula in &pending {
            self.interrupter.check()?;
            let offset = formula.template.offset_to(&formula.result);
            let template = &formula.template;
            if let Some(cell) = self.pending_cell(formula) {
                let Some(text) = cell.value.as_formula() else {
                    continue;
                };
                let updated = replace_references(text, |reference| {
                    let range = reference.to_range(template.sheet());
                    template
                        .contains(&range)
                        .then(|| reference.with_range(&range.shift_by(offset)).render())
                });
                cell.value = CellValue::formula(updated);
            }
        }
        Ok(())
    }

    /// Formulas pointing outside their template follow the expansion of the
    /// band they reference.
    ///
    /// Candidates are the occurrences that share the formula band's parent;
    /// failing that, the occurrences one level deeper (their grandparent is
    /// the formula band's parent). A reference to a band range with no
    /// candidate turns the cell into the configured error marker.
    pub(super) fn update_outer_formulas(&mut self) -> Result<()> {
        let pending = std::mem::take(&mut self.outer_formulas);
        for formula in &pending {
            self.interrupter.check()?;
            let Some(text) = self
                .pending_cell(formula)
                .and_then(|cell| cell.value.as_formula().map(str::to_string))
            else {
                continue;
            };

            let mut dangling = false;
            let updated = replace_references(&text, |reference| {
                match self.resolve_outer_reference(formula, reference) {
                    Resolution::Moved(text) => Some(text),
                    Resolution::Untouched => None,
                    Resolution::Dangling => {
                        dangling = true;
                        None
                    }
                }
            });

            let marker = self.config.global.error_marker.clone();
            if let Some(cell) = self.pending_cell(formula) {
                if dangling {
                    warn!(
                        sheet = formula.result.sheet(),
                        row = formula.row,
                        column = formula.column,
                        formula = %text,
                        "formula references an empty range"
                    );
                    cell.value = CellValue::Text(marker);
                } else {
                    cell.value = CellValue::formula(updated);
                }
            }
        }
        Ok(())
    }

    /// Formulas on sheets without bands grow over every expansion of the
    /// band ranges they reference.
    pub(super) fn update_static_formulas(&mut self) -> Result<()> {
        let band_sheets: BTreeSet<String> = self
            .named_ranges
            .iter()
            .map(|(_, r)| r.sheet().to_string())
            .collect();

        for index in 0..self.result.sheets.len() {
            let sheet_name = self.result.sheets[index].name.clone();
            if band_sheets.contains(&sheet_name) {
                continue;
            }
            let formulas: Vec<(u32, u32, String)> = self.result.sheets[index]
                .cells()
                .filter_map(|(r, c, cell)| cell.value.as_formula().map(|f| (r, c, f.to_string())))
                .collect();

            for (row, column, text) in formulas {
                self.interrupter.check()?;
                let updated = replace_references(&text, |reference| {
                    let range = reference.to_range(&sheet_name);
                    let template = self.template_containing(&range)?;
                    let results = self.dependencies.results_for_template(template);
                    let (first, last) = (results.first()?, results.last()?);
                    Some(reference.with_range(&expand(&range, template, first, last)).render())
                });
                if updated != text
                    && let Some(cell) = self.result.sheets[index]
                        .rows
                        .get_mut(&row)
                        .and_then(|r| r.cells.get_mut(&column))
                {
                    cell.value = CellValue::formula(updated);
                }
            }
        }
        Ok(())
    }

    fn resolve_outer_reference(&self, formula: &PendingFormula, reference: &FormulaRef) -> Resolution {
        let range = reference.to_range(formula.template.sheet());

        // Mixed formulas: references into the own template move with the cell
        if formula.template.contains(&range) {
            let offset = formula.template.offset_to(&formula.result);
            return Resolution::Moved(reference.with_range(&range.shift_by(offset)).render());
        }

        let Some(template) = self.template_containing(&range) else {
            return Resolution::Untouched;
        };
        let results = self.dependencies.results_for_template(template);
        let parent = self.tree.parent(formula.band);

        let siblings = self.results_below(results, parent, |band| self.tree.parent(band));
        let candidates = if parent.is_none() {
            results.iter().collect()
        } else if siblings.is_empty() {
            self.results_below(results, parent, |band| {
                self.tree.parent(band).and_then(|p| self.tree.parent(p))
            })
        } else {
            siblings
        };

        match (candidates.first(), candidates.last()) {
            (Some(first), Some(last)) => {
                Resolution::Moved(reference.with_range(&expand(&range, template, first, last)).render())
            }
            _ => {
                if !results.is_empty() {
                    warn!(
                        band = self.tree.name(formula.band),
                        range = %template,
                        "referenced band is nested more than two levels away, only siblings and their children are resolved"
                    );
                }
                Resolution::Dangling
            }
        }
    }

    /// Results whose band's `level` ancestor is `parent`, which must exist
    fn results_below<'r, F>(&self, results: &'r [Range], parent: Option<BandId>, level: F) -> Vec<&'r Range>
    where
        F: Fn(BandId) -> Option<BandId>,
    {
        results
            .iter()
            .filter(|result| {
                self.registry
                    .band_for_result(result)
                    .is_some_and(|band| parent.is_some() && level(band) == parent)
            })
            .collect()
    }

    /// Result cell of a pending formula
    fn pending_cell(&mut self, formula: &PendingFormula) -> Option<&mut Cell> {
        self.result
            .sheet_mut(formula.result.sheet())?
            .rows
            .get_mut(&formula.row)?
            .cells
            .get_mut(&formula.column)
    }
}

/// Move a reference into the first occurrence of its template and grow it
/// down to the last one
pub(super) fn expand(range: &Range, template: &Range, first: &Range, last: &Range) -> Range {
    range.shift_by(template.offset_to(first)).grow(
        i64::from(last.last_row()) - i64::from(first.last_row()),
        i64::from(last.last_column()) - i64::from(first.last_column()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand() {
        let template = Range::new("S", 2, 1, 2, 2);
        let first = Range::new("S", 5, 1, 5, 2);
        let last = Range::new("S", 7, 1, 7, 2);
        let column = Range::cell("S", 2, 2);
        assert_eq!(expand(&column, &template, &first, &last), Range::new("S", 5, 2, 7, 2));
        assert_eq!(expand(&column, &template, &first, &first), Range::cell("S", 5, 2));
    }
}

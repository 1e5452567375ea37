//! First pass: placing band occurrences and copying their template ranges

use super::{PendingFormula, VerticalLine, XlsxFormatter};
use crate::band::{BandId, Orientation};
use crate::error::{ReportError, Result};
use crate::formula::references;
use crate::placeholder::Substitution;
use crate::range::Range;
use crate::reader::CellValue;
use crate::writer::AnchoredPicture;
use tracing::{debug, trace};

impl XlsxFormatter<'_> {
    /// Render a band occurrence, then its children in original order
    pub(super) fn render_band(&mut self, band: BandId) -> Result<()> {
        self.interrupter.check()?;
        let tree = self.tree;

        match self.templates_by_name.get(tree.name(band)).cloned() {
            Some(template) => {
                let result = match tree.orientation(band) {
                    Orientation::Horizontal => self.place_horizontal(band, &template),
                    Orientation::Vertical => self.place_vertical(band, &template),
                };
                trace!(band = tree.name(band), template = %template, result = %result, "placing band");
                if tree.orientation(band) == Orientation::Vertical {
                    self.record_vertical_growth(band, &template, &result);
                }
                self.dependencies.add_dependency(&template, &result);
                self.registry.add(band, &template, &result);
                self.copy_template(band, &template, &result)?;
            }
            None if band == tree.root() => {}
            None => debug!(band = tree.name(band), "no named range for band, skipping"),
        }

        for child in tree.children(band) {
            self.render_band(child)?;
        }
        Ok(())
    }

    /// Horizontal bands stack: each occurrence starts below the previous one
    fn place_horizontal(&self, band: BandId, template: &Range) -> Range {
        let first_row = match self.previous_rendered_sibling(band) {
            Some(previous) => self.last_row_of_subtree(previous) + 1,
            None => self.first_row_for(band, template),
        };
        Range::new(
            template.sheet(),
            first_row,
            template.first_column(),
            first_row + template.height() - 1,
            template.last_column(),
        )
    }

    /// Vertical bands line up: each occurrence starts right of the previous
    /// one, and a first occurrence moves right by what the vertical bands
    /// left of it on the same line have grown
    fn place_vertical(&self, band: BandId, template: &Range) -> Range {
        let (first_row, right) = match self
            .previous_rendered_sibling(band)
            .and_then(|previous| self.registry.result_for_band(previous))
        {
            Some(last) => (
                last.first_row(),
                i64::from(last.last_column()) + 1 - i64::from(template.first_column()),
            ),
            None => {
                let first_row = self.first_row_for(band, template);
                (first_row, self.growth_left_of(band, template, first_row))
            }
        };
        let down = i64::from(first_row) - i64::from(template.first_row());
        template.shift(down, right)
    }

    fn vertical_line(&self, band: BandId, template: &Range, first_row: u32) -> VerticalLine {
        (self.tree.parent(band), template.sheet().to_string(), first_row)
    }

    /// Largest growth of the vertical bands whose templates end left of `template`
    fn growth_left_of(&self, band: BandId, template: &Range, first_row: u32) -> i64 {
        self.vertical_growth
            .get(&self.vertical_line(band, template, first_row))
            .into_iter()
            .flatten()
            .filter(|(last_column, _)| *last_column < template.first_column())
            .map(|(_, growth)| *growth)
            .max()
            .unwrap_or(0)
    }

    fn record_vertical_growth(&mut self, band: BandId, template: &Range, result: &Range) {
        let growth = i64::from(result.last_column()) - i64::from(template.last_column());
        let line = self.vertical_line(band, template, result.first_row());
        self.vertical_growth
            .entry(line)
            .or_default()
            .push((template.last_column(), growth));
    }

    /// Nearest earlier occurrence of the same band under the same parent that rendered
    fn previous_rendered_sibling(&self, band: BandId) -> Option<BandId> {
        let parent = self.tree.parent(band)?;
        let siblings = self.tree.children_by_name(parent, self.tree.name(band));
        let position = siblings.iter().position(|&b| b == band)?;
        siblings[..position]
            .iter()
            .rev()
            .copied()
            .find(|&b| self.registry.contains(b))
    }

    /// First row of a band's first occurrence.
    ///
    /// Below a rendered parent the band shares the parent's first row when
    /// their templates start on the same row, otherwise it follows the
    /// parent's subtree. Otherwise the first already rendered range crossed by
    /// the same horizontal line supplies the row, and failing that the band
    /// is appended after the last row of the sheet.
    fn first_row_for(&self, band: BandId, template: &Range) -> u32 {
        let parent = self.tree.parent(band).and_then(|parent| {
            let result = self.registry.result_for_band(parent)?;
            let parent_template = self.registry.template_for_band(parent)?;
            (result.sheet() == template.sheet()).then_some((parent, parent_template, result))
        });
        if let Some((parent, parent_template, parent_result)) = parent {
            return if parent_template.first_row() == template.first_row() {
                parent_result.first_row()
            } else {
                self.last_row_of_subtree(parent) + 1
            };
        }

        let neighbour_row = self
            .vertical_intersections
            .get(template)
            .into_iter()
            .flatten()
            .find_map(|neighbour| self.dependencies.results_for_template(neighbour).first())
            .map(|result| result.first_row());
        if let Some(row) = neighbour_row {
            return row;
        }

        self.result
            .sheet(template.sheet())
            .map(|sheet| sheet.last_row())
            .unwrap_or(0)
            .max(self.last_result_row(template.sheet()))
            + 1
    }

    /// Last row used by a band and its rendered descendants on the band's sheet
    pub(super) fn last_row_of_subtree(&self, band: BandId) -> u32 {
        let Some(own) = self.registry.result_for_band(band) else {
            return 0;
        };
        let mut last_row = own.last_row();
        self.tree.visit(band, &mut |descendant| {
            if let Some(result) = self.registry.result_for_band(descendant)
                && result.sheet() == own.sheet()
            {
                last_row = last_row.max(result.last_row());
            }
        });
        last_row
    }

    /// Last row of every range rendered on a sheet, including empty rows
    fn last_result_row(&self, sheet: &str) -> u32 {
        self.dependencies
            .results()
            .filter(|r| r.sheet() == sheet)
            .map(|r| r.last_row())
            .max()
            .unwrap_or(0)
    }

    /// Copy rows, cells, page breaks and placeholders of `template` into `result`
    fn copy_template(&mut self, band: BandId, template: &Range, result: &Range) -> Result<()> {
        let offset = template.offset_to(result);
        let source = self.template.sheet(template.sheet()).ok_or_else(|| {
            ReportError::template(
                self.document_name.as_str(),
                format!("sheet '{}' is missing", template.sheet()),
            )
        })?;
        let target = self.result.sheet_mut(result.sheet()).ok_or_else(|| {
            ReportError::template(
                self.document_name.as_str(),
                format!("sheet '{}' is missing", result.sheet()),
            )
        })?;
        let horizontal = self.tree.orientation(band) == Orientation::Horizontal;

        for row in template.first_row()..=template.last_row() {
            self.interrupter.check()?;
            let dest_row = (i64::from(row) + offset.down) as u32;
            if source.row_breaks.contains(&row) {
                target.row_breaks.insert(dest_row);
            }
            let Some(source_row) = source.rows.get(&row) else {
                continue;
            };

            let is_new_row = !target.rows.contains_key(&dest_row);
            let target_row = target.row_mut(dest_row);
            if horizontal || is_new_row {
                target_row.copy_format_from(source_row);
            }

            for (&column, cell) in source_row
                .cells
                .range(template.first_column()..=template.last_column())
            {
                let dest_column = (i64::from(column) + offset.right) as u32;
                let mut copy = cell.clone();

                match &cell.value {
                    CellValue::Text(text) => match self.placeholders.substitute(band, text)? {
                        Substitution::Unchanged => {}
                        Substitution::Value(value) => copy.value = value,
                        Substitution::Picture(picture) => {
                            copy.value = CellValue::Empty;
                            self.pictures.push(AnchoredPicture {
                                sheet: result.sheet().to_string(),
                                row: dest_row,
                                column: dest_column,
                                picture,
                            });
                        }
                    },
                    CellValue::Formula { formula, .. } => {
                        copy.value = CellValue::formula(formula.as_str());
                        let refs = references(formula);
                        if !refs.is_empty() {
                            let pending = PendingFormula {
                                band,
                                template: template.clone(),
                                result: result.clone(),
                                row: dest_row,
                                column: dest_column,
                            };
                            let inner = refs
                                .iter()
                                .all(|r| template.contains(&r.to_range(template.sheet())));
                            if inner {
                                self.inner_formulas.push(pending);
                            } else {
                                self.outer_formulas.push(pending);
                            }
                        }
                    }
                    _ => {}
                }

                target_row.cells.insert(dest_column, copy);
            }
        }
        Ok(())
    }
}

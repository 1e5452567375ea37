//! Second pass over everything that is not a cell formula: merged regions,
//! drawings and charts, conditional formatting, pivot caches, defined names,
//! headers/footers and sheet names.

use super::XlsxFormatter;
use super::formulas::expand;
use crate::error::Result;
use crate::formula::{FormulaRef, replace_references, shift_references};
use crate::package::{REL_CHART, REL_DRAWING, REL_PIVOT_CACHE_DEFINITION};
use crate::placeholder::find_aliases;
use crate::range::{Offset, Range};
use crate::reader::parser_utils::attribute;
use crate::reader::{CellValue, ConditionalFormat};
use quick_xml::escape::{escape, unescape};
use quick_xml::events::{BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use regex::Regex;
use std::collections::HashSet;
use std::io::Cursor;
use std::sync::LazyLock;
use tracing::{debug, warn};

static RULE_FORMULA: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)(<(?:[A-Za-z0-9_]+:)?formula>)(.*?)(</(?:[A-Za-z0-9_]+:)?formula>)")
        .expect("rule formula pattern is valid")
});

/// Characters a sheet name cannot contain
const INVALID_SHEET_CHARS: &[char] = &['[', ']', ':', '*', '?', '/', '\\'];
const MAX_SHEET_NAME_LEN: usize = 31;

impl XlsxFormatter<'_> {
    /// Replicate merged regions of each template range into every expansion
    pub(super) fn update_merges(&mut self) {
        for (_, template) in &self.named_ranges {
            let Some(source) = self.template.sheet(template.sheet()) else {
                continue;
            };
            let merges: Vec<&Range> = source
                .merges
                .iter()
                .filter(|merge| self.template_containing(merge) == Some(template))
                .collect();
            if merges.is_empty() {
                continue;
            }

            let results = self.dependencies.results_for_template(template);
            let Some(target) = self.result.sheet_mut(template.sheet()) else {
                continue;
            };
            for result in results {
                let offset = template.offset_to(result);
                for merge in &merges {
                    let moved = merge.shift_by(offset);
                    if !target.merges.iter().any(|m| m.intersects(&moved)) {
                        target.merges.push(moved);
                    }
                }
            }
        }
    }

    /// Move drawing anchors with the band they sit on and grow chart series
    /// over every expansion of the ranges they plot
    pub(super) fn update_charts(&mut self) -> Result<()> {
        let mut charts_done: HashSet<String> = HashSet::new();

        for index in 0..self.result.sheets.len() {
            self.interrupter.check()?;
            let sheet_name = self.result.sheets[index].name.clone();
            let sheet_part = self.result.sheets[index].part.clone();
            let hosts_bands = self.named_ranges.iter().any(|(_, r)| r.sheet() == sheet_name);

            for drawing in self.result.package.related_parts(&sheet_part, REL_DRAWING)? {
                if hosts_bands && self.result.package.has_part(&drawing) {
                    let xml = self.result.package.part_string(&drawing)?;
                    let updated = shift_anchors(&xml, |row, column| {
                        self.first_offset(&Range::cell(sheet_name.as_str(), row, column))
                    })?;
                    self.result.package.set_part(&drawing, updated.into_bytes());
                }

                for chart in self.result.package.related_parts(&drawing, REL_CHART)? {
                    if !charts_done.insert(chart.clone()) || !self.result.package.has_part(&chart) {
                        continue;
                    }
                    let xml = self.result.package.part_string(&chart)?;
                    let updated = rewrite_chart_formulas(&xml, |formula| self.grow_chart_formula(formula))?;
                    debug!(chart = %chart, "updated chart series");
                    self.result.package.set_part(&chart, updated.into_bytes());
                }
            }
        }
        Ok(())
    }

    fn grow_chart_formula(&self, formula: &str) -> String {
        replace_references(formula, |reference| {
            let sheet = reference.sheet.as_deref()?;
            let range = reference.to_range(sheet);
            let template = self.template_containing(&range)?;
            let results = self.dependencies.results_for_template(template);
            let (first, last) = (results.first()?, results.last()?);
            Some(expand(&range, template, first, last).to_absolute_formula())
        })
    }

    /// Offset of the first expansion of the template containing `range`
    fn first_offset(&self, range: &Range) -> Offset {
        self.template_containing(range)
            .and_then(|template| {
                self.dependencies
                    .results_for_template(template)
                    .first()
                    .map(|first| template.offset_to(first))
            })
            .unwrap_or_default()
    }

    /// Rebuild conditional formatting from the template: each range inside a
    /// band template is repeated for every expansion, blocks left without
    /// ranges are dropped.
    pub(super) fn update_conditional_formats(&mut self) -> Result<()> {
        for index in 0..self.result.sheets.len() {
            let sheet_name = self.result.sheets[index].name.clone();
            if !self.named_ranges.iter().any(|(_, r)| r.sheet() == sheet_name) {
                continue;
            }
            let Some(source) = self.template.sheet(&sheet_name) else {
                continue;
            };

            let mut formats = Vec::with_capacity(source.conditional_formats.len());
            for format in &source.conditional_formats {
                self.interrupter.check()?;
                let mut sqref = Vec::new();
                let mut first_offset: Option<Offset> = None;
                for range in &format.sqref {
                    let Some(template) = self.template_containing(range) else {
                        continue;
                    };
                    for result in self.dependencies.results_for_template(template) {
                        let offset = template.offset_to(result);
                        first_offset.get_or_insert(offset);
                        sqref.push(range.shift_by(offset));
                    }
                }
                let Some(offset) = first_offset else {
                    continue;
                };
                formats.push(ConditionalFormat {
                    sqref,
                    pivot: format.pivot,
                    rules: shift_rule_formulas(&format.rules, offset),
                });
            }
            self.result.sheets[index].conditional_formats = formats;
        }
        Ok(())
    }

    /// Grow pivot cache sources over the rendered footprint of the band
    /// ranges they cover
    pub(super) fn update_pivot_sources(&mut self) -> Result<()> {
        let workbook_part = self.result.workbook.part.clone();
        let refresh = self.config.global.refresh_pivots_on_load;

        for cache in self
            .result
            .package
            .related_parts(&workbook_part, REL_PIVOT_CACHE_DEFINITION)?
        {
            if !self.result.package.has_part(&cache) {
                continue;
            }
            let xml = self.result.package.part_string(&cache)?;
            let updated = rewrite_pivot_source(&xml, refresh, |sheet, reference| {
                let source = Range::from_range(sheet, reference)?;
                let footprint = self
                    .named_ranges
                    .iter()
                    .filter(|(_, template)| template.intersects(&source))
                    .filter_map(|(_, template)| self.dependencies.footprint(template))
                    .reduce(|a, b| a.union(&b))?;
                Some((sheet.to_string(), source.union(&footprint).to_range()))
            })?;
            debug!(cache = %cache, "updated pivot cache source");
            self.result.package.set_part(&cache, updated.into_bytes());
        }
        Ok(())
    }

    /// Point band defined names at their rendered footprint.
    ///
    /// Names whose band never rendered keep their template reference.
    pub(super) fn update_defined_names(&mut self) {
        for (name, template) in &self.named_ranges {
            let Some(footprint) = self.dependencies.footprint(template) else {
                debug!(name = %name, "band range was not rendered, name left untouched");
                continue;
            };
            for defined in self
                .result
                .workbook
                .defined_names
                .iter_mut()
                .filter(|d| &d.name == name)
            {
                if Range::from_formula(&defined.formula).as_ref() == Some(template) {
                    defined.formula = footprint.to_absolute_formula();
                }
            }
        }
    }

    /// Substitute root band placeholders in headers and footers
    pub(super) fn update_headers_and_footers(&mut self) -> Result<()> {
        let root = self.tree.root();
        for sheet in self.result.sheets.iter_mut() {
            if let Some(header_footer) = &sheet.header_footer
                && find_aliases(header_footer).next().is_some()
            {
                let updated = self.placeholders.interpolate_xml(root, header_footer)?;
                sheet.header_footer = Some(updated);
            }
        }
        Ok(())
    }

    /// Substitute root band placeholders in sheet names and follow the
    /// renames everywhere a sheet is referenced
    pub(super) fn update_sheet_names(&mut self) -> Result<()> {
        let root = self.tree.root();
        let mut taken: Vec<String> = self
            .result
            .workbook
            .sheets
            .iter()
            .map(|s| s.name.clone())
            .collect();
        let mut renames: Vec<(String, String)> = Vec::new();

        for info in &self.result.workbook.sheets {
            if find_aliases(&info.name).next().is_none() {
                continue;
            }
            let candidate = sanitize_sheet_name(&self.placeholders.interpolate(root, &info.name)?);
            if candidate.is_empty() {
                warn!(sheet = %info.name, "sheet name is empty after substitution, keeping template name");
                continue;
            }
            let new_name = unique_sheet_name(&candidate, &info.name, &taken);
            taken.retain(|t| t != &info.name);
            taken.push(new_name.clone());
            renames.push((info.name.clone(), new_name));
        }
        if renames.is_empty() {
            return Ok(());
        }

        self.apply_sheet_renames(&renames)
    }

    fn apply_sheet_renames(&mut self, renames: &[(String, String)]) -> Result<()> {
        let rename = |sheet: &str| {
            renames
                .iter()
                .find(|(old, _)| old == sheet)
                .map(|(_, new)| new.clone())
        };

        for info in self.result.workbook.sheets.iter_mut() {
            if let Some(new) = rename(&info.name) {
                debug!(from = %info.name, to = %new, "renaming sheet");
                info.name = new;
            }
        }

        for sheet in self.result.sheets.iter_mut() {
            if let Some(new) = rename(&sheet.name) {
                sheet.name = new.clone();
                for merge in sheet.merges.iter_mut() {
                    *merge = merge.with_sheet(new.as_str());
                }
                for format in sheet.conditional_formats.iter_mut() {
                    for range in format.sqref.iter_mut() {
                        *range = range.with_sheet(new.as_str());
                    }
                }
            }
            for row in sheet.rows.values_mut() {
                for cell in row.cells.values_mut() {
                    if let CellValue::Formula { formula, .. } = &mut cell.value {
                        *formula = rename_in_formula(formula, renames);
                    }
                }
            }
        }

        for defined in self.result.workbook.defined_names.iter_mut() {
            defined.formula = rename_in_formula(&defined.formula, renames);
        }

        let charts: Vec<String> = self
            .result
            .package
            .part_names()
            .filter(|p| p.starts_with("xl/charts/chart") && p.ends_with(".xml"))
            .map(str::to_string)
            .collect();
        for chart in charts {
            let xml = self.result.package.part_string(&chart)?;
            let updated = rewrite_chart_formulas(&xml, |formula| rename_in_formula(formula, renames))?;
            self.result.package.set_part(&chart, updated.into_bytes());
        }

        let workbook_part = self.result.workbook.part.clone();
        for cache in self
            .result
            .package
            .related_parts(&workbook_part, REL_PIVOT_CACHE_DEFINITION)?
        {
            if !self.result.package.has_part(&cache) {
                continue;
            }
            let xml = self.result.package.part_string(&cache)?;
            let updated = rewrite_pivot_source(&xml, false, |sheet, reference| {
                rename(sheet).map(|new| (new, reference.to_string()))
            })?;
            self.result.package.set_part(&cache, updated.into_bytes());
        }
        Ok(())
    }
}

/// Point sheet-qualified references at renamed sheets
fn rename_in_formula(formula: &str, renames: &[(String, String)]) -> String {
    replace_references(formula, |reference| {
        let sheet = reference.sheet.as_deref()?;
        let (_, new) = renames.iter().find(|(old, _)| old == sheet)?;
        Some(
            FormulaRef {
                sheet: Some(new.clone()),
                ..reference.clone()
            }
            .render(),
        )
    })
}

/// Drop characters a sheet name cannot hold and cut it to 31 characters
pub(crate) fn sanitize_sheet_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .filter(|c| !INVALID_SHEET_CHARS.contains(c) && !c.is_control())
        .collect();
    cleaned
        .trim()
        .trim_matches('\'')
        .chars()
        .take(MAX_SHEET_NAME_LEN)
        .collect::<String>()
        .trim_end()
        .to_string()
}

/// `candidate`, or `candidate (N)` when another sheet already has that name
fn unique_sheet_name(candidate: &str, current: &str, taken: &[String]) -> String {
    let clashes =
        |name: &str| taken.iter().any(|t| t != current && t.eq_ignore_ascii_case(name));
    if !clashes(candidate) {
        return candidate.to_string();
    }
    (2..)
        .map(|n| {
            let suffix = format!(" ({})", n);
            let keep = MAX_SHEET_NAME_LEN.saturating_sub(suffix.chars().count());
            format!("{}{}", candidate.chars().take(keep).collect::<String>(), suffix)
        })
        .find(|name| !clashes(name))
        .unwrap_or_else(|| candidate.to_string())
}

/// Shift every `<formula>` of conditional formatting rules
fn shift_rule_formulas(rules: &str, offset: Offset) -> String {
    if offset.is_zero() {
        return rules.to_string();
    }
    RULE_FORMULA
        .replace_all(rules, |caps: &regex::Captures| {
            let body = match unescape(&caps[2]) {
                Ok(text) => escape(shift_references(&text, offset.down, offset.right).as_str()).into_owned(),
                Err(_) => caps[2].to_string(),
            };
            format!("{}{}{}", &caps[1], body, &caps[3])
        })
        .into_owned()
}

#[derive(Clone, Copy, PartialEq)]
enum AnchorCorner {
    From,
    To,
}

#[derive(Clone, Copy, PartialEq)]
enum AnchorField {
    Column,
    Row,
}

/// Shift drawing anchors by the offset `offset_for(row, column)` returns for
/// their 1-based top-left cell
fn shift_anchors<F>(xml: &str, offset_for: F) -> Result<String>
where
    F: Fn(u32, u32) -> Offset,
{
    let mut reader = Reader::from_str(xml);
    let mut writer = Writer::new(Cursor::new(Vec::new()));
    let mut anchor: Vec<Event> = Vec::new();
    let mut depth = 0usize;

    loop {
        let event = reader.read_event()?;
        if depth > 0 {
            match &event {
                Event::Start(_) => depth += 1,
                Event::End(_) => depth -= 1,
                Event::Eof => break,
                _ => {}
            }
            anchor.push(event);
            if depth == 0 {
                write_shifted_anchor(&mut writer, std::mem::take(&mut anchor), &offset_for)?;
            }
            continue;
        }

        match event {
            Event::Start(e) if is_anchor(e.local_name().as_ref()) => {
                depth = 1;
                anchor.push(Event::Start(e));
            }
            Event::Eof => break,
            e => writer.write_event(e)?,
        }
    }

    let result = writer.into_inner().into_inner();
    Ok(String::from_utf8(result)?)
}

fn is_anchor(name: &[u8]) -> bool {
    matches!(name, b"twoCellAnchor" | b"oneCellAnchor")
}

fn write_shifted_anchor<F>(writer: &mut Writer<Cursor<Vec<u8>>>, events: Vec<Event>, offset_for: &F) -> Result<()>
where
    F: Fn(u32, u32) -> Offset,
{
    let mut from = (None, None);
    walk_anchor_fields(&events, |corner, field, value| {
        if corner == AnchorCorner::From {
            match field {
                AnchorField::Column => from.0 = Some(value),
                AnchorField::Row => from.1 = Some(value),
            }
        }
    })?;
    let offset = match from {
        (Some(column), Some(row)) => offset_for(row + 1, column + 1),
        _ => Offset::default(),
    };

    let mut corner = None;
    let mut field = None;
    for event in events {
        match &event {
            Event::Start(e) => match e.local_name().as_ref() {
                b"from" => corner = Some(AnchorCorner::From),
                b"to" => corner = Some(AnchorCorner::To),
                b"col" if corner.is_some() => field = Some(AnchorField::Column),
                b"row" if corner.is_some() => field = Some(AnchorField::Row),
                _ => {}
            },
            Event::End(e) => match e.local_name().as_ref() {
                b"from" | b"to" => corner = None,
                b"col" | b"row" => field = None,
                _ => {}
            },
            Event::Text(t) if field.is_some() && !offset.is_zero() => {
                let value: i64 = t.unescape()?.trim().parse().unwrap_or(0);
                let delta = match field {
                    Some(AnchorField::Column) => offset.right,
                    _ => offset.down,
                };
                let moved = (value + delta).max(0).to_string();
                writer.write_event(Event::Text(BytesText::new(&moved)))?;
                continue;
            }
            _ => {}
        }
        writer.write_event(event)?;
    }
    Ok(())
}

/// Call `visit` with every 0-based `col`/`row` value of an anchor's corners
fn walk_anchor_fields<F>(events: &[Event], mut visit: F) -> Result<()>
where
    F: FnMut(AnchorCorner, AnchorField, u32),
{
    let mut corner = None;
    let mut field = None;
    for event in events {
        match event {
            Event::Start(e) => match e.local_name().as_ref() {
                b"from" => corner = Some(AnchorCorner::From),
                b"to" => corner = Some(AnchorCorner::To),
                b"col" => field = Some(AnchorField::Column),
                b"row" => field = Some(AnchorField::Row),
                _ => {}
            },
            Event::End(e) => match e.local_name().as_ref() {
                b"from" | b"to" => corner = None,
                b"col" | b"row" => field = None,
                _ => {}
            },
            Event::Text(t) => {
                if let (Some(c), Some(f)) = (corner, field)
                    && let Ok(value) = t.unescape()?.trim().parse()
                {
                    visit(c, f, value);
                }
            }
            _ => {}
        }
    }
    Ok(())
}

/// Rewrite the text of every `<c:f>` series formula of a chart
fn rewrite_chart_formulas<F>(xml: &str, mut rewrite: F) -> Result<String>
where
    F: FnMut(&str) -> String,
{
    let mut reader = Reader::from_str(xml);
    let mut writer = Writer::new(Cursor::new(Vec::new()));
    let mut in_formula = false;

    loop {
        match reader.read_event()? {
            Event::Start(e) if e.local_name().as_ref() == b"f" => {
                in_formula = true;
                writer.write_event(Event::Start(e))?;
            }
            Event::End(e) if e.local_name().as_ref() == b"f" => {
                in_formula = false;
                writer.write_event(Event::End(e))?;
            }
            Event::Text(t) if in_formula => {
                let updated = rewrite(&t.unescape()?);
                writer.write_event(Event::Text(BytesText::new(&updated)))?;
            }
            Event::Eof => break,
            e => writer.write_event(e)?,
        }
    }

    let result = writer.into_inner().into_inner();
    Ok(String::from_utf8(result)?)
}

/// Rewrite `<worksheetSource ref sheet>` of a pivot cache definition and
/// optionally ask for a refresh when the workbook opens
fn rewrite_pivot_source<F>(xml: &str, refresh_on_load: bool, mut rewrite: F) -> Result<String>
where
    F: FnMut(&str, &str) -> Option<(String, String)>,
{
    let mut reader = Reader::from_str(xml);
    let mut writer = Writer::new(Cursor::new(Vec::new()));

    loop {
        match reader.read_event()? {
            Event::Start(e) if refresh_on_load && e.local_name().as_ref() == b"pivotCacheDefinition" => {
                writer.write_event(Event::Start(with_attribute(&e, "refreshOnLoad", "1")?))?;
            }
            Event::Empty(e) if e.local_name().as_ref() == b"worksheetSource" => {
                let source = match (attribute(&e, b"sheet")?, attribute(&e, b"ref")?) {
                    (Some(sheet), Some(reference)) => rewrite(&sheet, &reference),
                    _ => None,
                };
                match source {
                    Some((sheet, reference)) => {
                        let updated = with_attribute(&e, "ref", &reference)?;
                        writer.write_event(Event::Empty(with_attribute(&updated, "sheet", &sheet)?))?;
                    }
                    None => writer.write_event(Event::Empty(e))?,
                }
            }
            Event::Eof => break,
            e => writer.write_event(e)?,
        }
    }

    let result = writer.into_inner().into_inner();
    Ok(String::from_utf8(result)?)
}

/// Copy of a start tag with one attribute set, replacing any previous value
fn with_attribute(e: &BytesStart, key: &str, value: &str) -> Result<BytesStart<'static>> {
    let mut updated = BytesStart::new(String::from_utf8_lossy(e.name().as_ref()).into_owned());
    let mut replaced = false;
    for attr in e.attributes() {
        let attr = attr?;
        if attr.key.as_ref() == key.as_bytes() {
            updated.push_attribute((key, value));
            replaced = true;
        } else {
            updated.push_attribute(attr);
        }
    }
    if !replaced {
        updated.push_attribute((key, value));
    }
    Ok(updated)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_sheet_name() {
        assert_eq!(sanitize_sheet_name("Sales: 2024/03"), "Sales 202403");
        assert_eq!(sanitize_sheet_name("'quoted'"), "quoted");
        assert_eq!(sanitize_sheet_name(&"x".repeat(40)).len(), 31);
        assert_eq!(sanitize_sheet_name("[]"), "");
    }

    #[test]
    fn test_unique_sheet_name() {
        let taken = vec!["Report".to_string(), "${Root.name}".to_string()];
        assert_eq!(unique_sheet_name("March", "${Root.name}", &taken), "March");
        assert_eq!(unique_sheet_name("report", "${Root.name}", &taken), "report (2)");
    }

    #[test]
    fn test_rename_in_formula() {
        let renames = vec![("${Root.month}".to_string(), "March sales".to_string())];
        assert_eq!(
            rename_in_formula("SUM('${Root.month}'!B2:B4)+Other!A1", &renames),
            "SUM('March sales'!B2:B4)+Other!A1"
        );
    }

    #[test]
    fn test_shift_rule_formulas() {
        let rules = r#"<cfRule type="expression" priority="1"><formula>$B2&gt;10</formula></cfRule>"#;
        assert_eq!(
            shift_rule_formulas(rules, Offset::new(3, 0)),
            r#"<cfRule type="expression" priority="1"><formula>$B5&gt;10</formula></cfRule>"#
        );
        assert_eq!(shift_rule_formulas(rules, Offset::default()), rules);
    }

    #[test]
    fn test_shift_anchors() {
        let xml = r#"<xdr:wsDr xmlns:xdr="x"><xdr:twoCellAnchor><xdr:from><xdr:col>1</xdr:col><xdr:colOff>0</xdr:colOff><xdr:row>4</xdr:row><xdr:rowOff>0</xdr:rowOff></xdr:from><xdr:to><xdr:col>6</xdr:col><xdr:colOff>0</xdr:colOff><xdr:row>14</xdr:row><xdr:rowOff>0</xdr:rowOff></xdr:to></xdr:twoCellAnchor></xdr:wsDr>"#;
        let updated = shift_anchors(xml, |row, column| {
            assert_eq!((row, column), (5, 2));
            Offset::new(10, 0)
        })
        .unwrap();

        assert!(updated.contains("<xdr:row>14</xdr:row><xdr:rowOff>0</xdr:rowOff></xdr:from>"));
        assert!(updated.contains("<xdr:row>24</xdr:row><xdr:rowOff>0</xdr:rowOff></xdr:to>"));
        assert!(updated.contains("<xdr:col>1</xdr:col>"));
        assert!(updated.contains("<xdr:col>6</xdr:col>"));
    }

    #[test]
    fn test_rewrite_chart_formulas() {
        let xml = r#"<c:chartSpace xmlns:c="c"><c:val><c:numRef><c:f>Data!$B$2</c:f></c:numRef></c:val></c:chartSpace>"#;
        let updated = rewrite_chart_formulas(xml, |f| f.replace("$B$2", "$B$2:$B$9")).unwrap();
        assert!(updated.contains("<c:f>Data!$B$2:$B$9</c:f>"));
    }

    #[test]
    fn test_rewrite_pivot_source() {
        let xml = r#"<pivotCacheDefinition xmlns="m" r:id="rId1"><cacheSource type="worksheet"><worksheetSource ref="A1:C2" sheet="Data"/></cacheSource></pivotCacheDefinition>"#;
        let updated = rewrite_pivot_source(xml, true, |sheet, reference| {
            assert_eq!((sheet, reference), ("Data", "A1:C2"));
            Some((sheet.to_string(), "A1:C9".to_string()))
        })
        .unwrap();
        assert!(updated.contains(r#"<worksheetSource ref="A1:C9" sheet="Data"/>"#));
        assert!(updated.contains(r#"refreshOnLoad="1""#));
    }
}

//! XML parsing of the template workbook and its worksheets

use crate::cancel::Interrupter;
use crate::error::{ReportError, Result};
use crate::formula::translate_shared_formula;
use crate::package::{XlsxPackage, resolve_target};
use crate::range::Range;
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use std::collections::HashMap;

use super::parser_utils::{attribute, is_truthy, parse_cell_ref, read_text_node};
use super::workbook::{
    Cell, CellValue, ConditionalFormat, DefinedName, RawElement, Row, SheetInfo, Workbook,
    Worksheet,
};

const REL_SHARED_STRINGS_SUFFIX: &str = "/sharedStrings";

/// Parse `workbook.xml`: sheets with their parts, defined names and shared strings
pub fn parse_workbook(package: &XlsxPackage) -> Result<Workbook> {
    let part = package.workbook_part()?;
    let xml = package.part_string(&part)?;
    let rels = package.relationships(&part)?;

    let mut workbook = Workbook {
        part: part.clone(),
        ..Default::default()
    };

    let mut reader = Reader::from_str(&xml);
    loop {
        match reader.read_event()? {
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"sheet" => {
                let name = attribute(&e, b"name")?.unwrap_or_default();
                let rel_id = attribute(&e, b"r:id")?.unwrap_or_default();
                let target = rels
                    .iter()
                    .find(|r| r.id == rel_id)
                    .map(|r| resolve_target(&part, &r.target))
                    .ok_or_else(|| {
                        ReportError::package(format!(
                            "relationship '{}' not found for sheet '{}'",
                            rel_id, name
                        ))
                    })?;
                workbook.sheets.push(SheetInfo {
                    name,
                    sheet_id: attribute(&e, b"sheetId")?
                        .and_then(|v| v.parse().ok())
                        .unwrap_or_default(),
                    rel_id,
                    part: target,
                    state: attribute(&e, b"state")?.filter(|s| s != "visible"),
                });
            }
            Event::Start(e) if e.local_name().as_ref() == b"definedName" => {
                let name = attribute(&e, b"name")?.unwrap_or_default();
                let local_sheet_id = attribute(&e, b"localSheetId")?.and_then(|v| v.parse().ok());
                let hidden = is_truthy(attribute(&e, b"hidden")?.as_deref());
                let formula = read_text_node(&mut reader)?;
                workbook.defined_names.push(DefinedName {
                    name,
                    formula,
                    local_sheet_id,
                    hidden,
                });
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if let Some(rel) = rels
        .iter()
        .find(|r| r.rel_type.ends_with(REL_SHARED_STRINGS_SUFFIX))
    {
        let strings_part = resolve_target(&part, &rel.target);
        if package.has_part(&strings_part) {
            workbook.shared_strings = parse_shared_strings(&package.part_string(&strings_part)?)?;
        }
    }

    Ok(workbook)
}

/// Parse `sharedStrings.xml`; rich text runs are flattened, phonetic runs dropped
pub fn parse_shared_strings(xml: &str) -> Result<Vec<String>> {
    let mut strings = Vec::new();
    let mut reader = Reader::from_str(xml);
    let mut current = String::new();
    let mut in_phonetic = false;

    loop {
        match reader.read_event()? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"si" => current.clear(),
                b"rPh" => in_phonetic = true,
                b"t" if !in_phonetic => current.push_str(&read_text_node(&mut reader)?),
                _ => {}
            },
            Event::End(e) => match e.local_name().as_ref() {
                b"si" => strings.push(std::mem::take(&mut current)),
                b"rPh" => in_phonetic = false,
                _ => {}
            },
            Event::Empty(e) if e.local_name().as_ref() == b"si" => strings.push(String::new()),
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(strings)
}

/// Parse one worksheet part into its document model
pub fn parse_worksheet(
    name: &str,
    part: &str,
    xml: &str,
    shared_strings: &[String],
    interrupter: &Interrupter,
) -> Result<Worksheet> {
    let mut sheet = Worksheet::new(name, part);
    let mut reader = Reader::from_str(xml);

    loop {
        let start = reader.buffer_position() as usize;
        match reader.read_event()? {
            Event::Start(e) if e.local_name().as_ref() == b"worksheet" => {
                sheet.prolog = xml[..reader.buffer_position() as usize].to_string();
            }
            Event::Start(e) => {
                let tag = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                match tag.as_str() {
                    "sheetData" => parse_sheet_data(&mut reader, &mut sheet, shared_strings, interrupter)?,
                    "mergeCells" => parse_merge_cells(&mut reader, &mut sheet)?,
                    "rowBreaks" => parse_row_breaks(&mut reader, &mut sheet)?,
                    "conditionalFormatting" => {
                        let sqref = parse_sqref(name, &attribute(&e, b"sqref")?.unwrap_or_default());
                        let pivot = is_truthy(attribute(&e, b"pivot")?.as_deref());
                        let span = reader.read_to_end(e.name())?;
                        sheet.conditional_formats.push(ConditionalFormat {
                            sqref,
                            pivot,
                            rules: xml[span.start as usize..span.end as usize].to_string(),
                        });
                    }
                    _ => {
                        reader.read_to_end(e.name())?;
                        let raw = xml[start..reader.buffer_position() as usize].to_string();
                        if tag == "headerFooter" {
                            sheet.header_footer = Some(raw);
                        } else {
                            sheet.elements.push(RawElement { tag, xml: raw });
                        }
                    }
                }
            }
            Event::Empty(e) => {
                let tag = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                let raw = xml[start..reader.buffer_position() as usize].to_string();
                match tag.as_str() {
                    // Recomputed on write
                    "dimension" => {}
                    "sheetData" | "mergeCells" | "rowBreaks" => {}
                    "drawing" => sheet.drawing = attribute(&e, b"r:id")?,
                    "headerFooter" => sheet.header_footer = Some(raw),
                    _ => sheet.elements.push(RawElement { tag, xml: raw }),
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if sheet.prolog.is_empty() {
        return Err(ReportError::package(format!(
            "part {} is not a worksheet",
            part
        )));
    }

    Ok(sheet)
}

/// Split a space separated `sqref` into ranges on `sheet`
pub fn parse_sqref(sheet: &str, sqref: &str) -> Vec<Range> {
    sqref
        .split_whitespace()
        .filter_map(|r| Range::from_range(sheet, r))
        .collect()
}

struct SharedFormula {
    formula: String,
    row: u32,
    col: u32,
}

fn parse_sheet_data(
    reader: &mut Reader<&[u8]>,
    sheet: &mut Worksheet,
    shared_strings: &[String],
    interrupter: &Interrupter,
) -> Result<()> {
    let mut shared_formulas: HashMap<u32, SharedFormula> = HashMap::new();
    let mut current_row = 0u32;
    let mut current_col = 0u32;

    loop {
        let event = reader.read_event()?;
        match &event {
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"row" => {
                interrupter.check()?;
                current_row = match attribute(e, b"r")?.and_then(|v| v.parse().ok()) {
                    Some(r) => r,
                    None => current_row + 1,
                };
                current_col = 0;
                let row = parse_row_attributes(e)?;
                sheet.rows.insert(current_row, row);
            }
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"c" => {
                let (row, col) = match attribute(e, b"r")?.and_then(|r| parse_cell_ref(&r)) {
                    Some(position) => position,
                    None => (current_row.max(1), current_col + 1),
                };
                current_col = col;
                let style = attribute(e, b"s")?.and_then(|v| v.parse().ok());
                let cell_type = attribute(e, b"t")?.unwrap_or_default();

                let value = if matches!(event, Event::Start(_)) {
                    let contents = parse_cell_contents(reader, &cell_type, shared_strings)?;
                    resolve_shared_formula(contents, row, col, &mut shared_formulas)
                } else {
                    CellValue::Empty
                };

                sheet.set_cell(row, col, Cell { style, value });
            }
            Event::End(e) if e.local_name().as_ref() == b"sheetData" => break,
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(())
}

fn parse_row_attributes(e: &BytesStart) -> Result<Row> {
    Ok(Row {
        height: attribute(e, b"ht")?.and_then(|v| v.parse().ok()),
        custom_height: is_truthy(attribute(e, b"customHeight")?.as_deref()),
        outline_level: attribute(e, b"outlineLevel")?
            .and_then(|v| v.parse().ok())
            .unwrap_or(0),
        collapsed: is_truthy(attribute(e, b"collapsed")?.as_deref()),
        hidden: is_truthy(attribute(e, b"hidden")?.as_deref()),
        style: attribute(e, b"s")?.and_then(|v| v.parse().ok()),
        custom_format: is_truthy(attribute(e, b"customFormat")?.as_deref()),
        cells: Default::default(),
    })
}

#[derive(Default)]
struct CellContents {
    value: Option<String>,
    inline_text: Option<String>,
    formula: Option<String>,
    shared_index: Option<u32>,
    cell_type: String,
}

fn parse_cell_contents(
    reader: &mut Reader<&[u8]>,
    cell_type: &str,
    shared_strings: &[String],
) -> Result<CellContents> {
    let mut contents = CellContents {
        cell_type: cell_type.to_string(),
        ..Default::default()
    };

    loop {
        let event = reader.read_event()?;
        match &event {
            Event::Start(e) | Event::Empty(e) => match e.local_name().as_ref() {
                b"v" if matches!(event, Event::Start(_)) => {
                    contents.value = Some(read_text_node(reader)?);
                }
                b"f" => {
                    if attribute(e, b"t")?.as_deref() == Some("shared") {
                        contents.shared_index = attribute(e, b"si")?.and_then(|v| v.parse().ok());
                    }
                    if matches!(event, Event::Start(_)) {
                        let text = read_text_node(reader)?;
                        if !text.is_empty() {
                            contents.formula = Some(text);
                        }
                    }
                }
                b"t" if matches!(event, Event::Start(_)) => {
                    let text = read_text_node(reader)?;
                    contents
                        .inline_text
                        .get_or_insert_with(String::new)
                        .push_str(&text);
                }
                _ => {}
            },
            Event::End(e) if e.local_name().as_ref() == b"c" => break,
            Event::Eof => break,
            _ => {}
        }
    }

    if contents.cell_type == "s"
        && let Some(index) = contents.value.as_ref().and_then(|v| v.parse::<usize>().ok())
    {
        contents.inline_text = Some(shared_strings.get(index).cloned().unwrap_or_default());
    }

    Ok(contents)
}

fn resolve_shared_formula(
    mut contents: CellContents,
    row: u32,
    col: u32,
    shared_formulas: &mut HashMap<u32, SharedFormula>,
) -> CellValue {
    if let Some(si) = contents.shared_index {
        match &contents.formula {
            Some(formula) => {
                shared_formulas.insert(
                    si,
                    SharedFormula {
                        formula: formula.clone(),
                        row,
                        col,
                    },
                );
            }
            None => {
                contents.formula = shared_formulas.get(&si).map(|master| {
                    translate_shared_formula(
                        &master.formula,
                        row as i64 - master.row as i64,
                        col as i64 - master.col as i64,
                    )
                });
            }
        }
    }

    if let Some(formula) = contents.formula {
        return CellValue::Formula {
            formula: formula.trim_start_matches('=').to_string(),
            cached: contents.value,
        };
    }

    match contents.cell_type.as_str() {
        "s" | "inlineStr" => CellValue::Text(contents.inline_text.unwrap_or_default()),
        "b" => CellValue::Bool(contents.value.as_deref() == Some("1")),
        "e" => CellValue::Error(contents.value.unwrap_or_default()),
        "str" | "d" => CellValue::Text(contents.value.unwrap_or_default()),
        _ => match contents.value {
            Some(v) => v
                .trim()
                .parse::<f64>()
                .map(CellValue::Number)
                .unwrap_or(CellValue::Text(v)),
            None => match contents.inline_text {
                Some(text) => CellValue::Text(text),
                None => CellValue::Empty,
            },
        },
    }
}

fn parse_merge_cells(reader: &mut Reader<&[u8]>, sheet: &mut Worksheet) -> Result<()> {
    loop {
        match reader.read_event()? {
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"mergeCell" => {
                if let Some(range) = attribute(&e, b"ref")?
                    .and_then(|r| Range::from_range(&sheet.name, &r))
                {
                    sheet.merges.push(range);
                }
            }
            Event::End(e) if e.local_name().as_ref() == b"mergeCells" => break,
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(())
}

fn parse_row_breaks(reader: &mut Reader<&[u8]>, sheet: &mut Worksheet) -> Result<()> {
    loop {
        match reader.read_event()? {
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"brk" => {
                if let Some(id) = attribute(&e, b"id")?.and_then(|v| v.parse().ok()) {
                    sheet.row_breaks.insert(id);
                }
            }
            Event::End(e) if e.local_name().as_ref() == b"rowBreaks" => break,
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(())
}

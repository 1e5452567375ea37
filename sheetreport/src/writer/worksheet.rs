//! Worksheet serialization

use crate::error::Result;
use crate::reader::parser_utils::cell_ref;
use crate::reader::{Cell, CellValue, Row, Worksheet};
use quick_xml::Writer;
use quick_xml::escape::escape;
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};

pub(crate) const NS_RELATIONSHIPS: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships";

/// Child order of `<worksheet>` in the SpreadsheetML schema
const ELEMENT_ORDER: &[&str] = &[
    "sheetPr",
    "dimension",
    "sheetViews",
    "sheetFormatPr",
    "cols",
    "sheetData",
    "sheetCalcPr",
    "sheetProtection",
    "protectedRanges",
    "scenarios",
    "autoFilter",
    "sortState",
    "dataConsolidate",
    "customSheetViews",
    "mergeCells",
    "phoneticPr",
    "conditionalFormatting",
    "dataValidations",
    "hyperlinks",
    "printOptions",
    "pageMargins",
    "pageSetup",
    "headerFooter",
    "rowBreaks",
    "colBreaks",
    "customProperties",
    "cellWatches",
    "ignoredErrors",
    "smartTags",
    "drawing",
    "legacyDrawing",
    "legacyDrawingHF",
    "drawingHF",
    "picture",
    "oleObjects",
    "controls",
    "webPublishItems",
    "tableParts",
    "extLst",
];

fn element_rank(tag: &str) -> Option<usize> {
    ELEMENT_ORDER.iter().position(|t| *t == tag)
}

/// Serialize a worksheet back to XML
pub fn write_worksheet(sheet: &Worksheet) -> Result<String> {
    let mut parts: Vec<(usize, String)> = Vec::new();
    let mut last_rank = 0;
    for element in &sheet.elements {
        // Unknown elements stay behind their predecessor
        last_rank = element_rank(&element.tag).unwrap_or(last_rank);
        parts.push((last_rank, element.xml.clone()));
    }

    let rank = |tag: &str| element_rank(tag).unwrap_or(0);
    let dimension = sheet
        .used_range()
        .map(|r| r.to_range())
        .unwrap_or_else(|| "A1".to_string());
    parts.push((rank("dimension"), format!(r#"<dimension ref="{}"/>"#, dimension)));
    parts.push((rank("sheetData"), write_sheet_data(sheet)?));

    if !sheet.merges.is_empty() {
        let mut xml = format!(r#"<mergeCells count="{}">"#, sheet.merges.len());
        for merge in &sheet.merges {
            xml.push_str(&format!(r#"<mergeCell ref="{}"/>"#, merge.to_range()));
        }
        xml.push_str("</mergeCells>");
        parts.push((rank("mergeCells"), xml));
    }

    for cf in &sheet.conditional_formats {
        let sqref = cf
            .sqref
            .iter()
            .map(|r| r.to_range())
            .collect::<Vec<_>>()
            .join(" ");
        parts.push((
            rank("conditionalFormatting"),
            format!(
                r#"<conditionalFormatting{} sqref="{}">{}</conditionalFormatting>"#,
                if cf.pivot { r#" pivot="1""# } else { "" },
                sqref,
                cf.rules
            ),
        ));
    }

    if let Some(header_footer) = &sheet.header_footer {
        parts.push((rank("headerFooter"), header_footer.clone()));
    }

    if !sheet.row_breaks.is_empty() {
        let mut xml = format!(
            r#"<rowBreaks count="{0}" manualBreakCount="{0}">"#,
            sheet.row_breaks.len()
        );
        for id in &sheet.row_breaks {
            xml.push_str(&format!(r#"<brk id="{}" max="16383" man="1"/>"#, id));
        }
        xml.push_str("</rowBreaks>");
        parts.push((rank("rowBreaks"), xml));
    }

    if let Some(drawing) = &sheet.drawing {
        parts.push((
            rank("drawing"),
            format!(r#"<drawing r:id="{}"/>"#, escape(drawing.as_str())),
        ));
    }

    parts.sort_by_key(|(rank, _)| *rank);

    let mut xml = String::with_capacity(parts.iter().map(|(_, p)| p.len()).sum::<usize>() + 512);
    xml.push_str(&sheet.prolog);
    for (_, part) in parts {
        xml.push_str(&part);
    }
    xml.push_str("</worksheet>");
    Ok(xml)
}

/// Add the relationships namespace to the `<worksheet>` tag when missing
pub(crate) fn ensure_relationships_namespace(sheet: &mut Worksheet) {
    if sheet.prolog.contains(NS_RELATIONSHIPS) {
        return;
    }
    if let Some(pos) = sheet.prolog.rfind('>') {
        let insert_at = if sheet.prolog[..pos].ends_with('/') { pos - 1 } else { pos };
        sheet
            .prolog
            .insert_str(insert_at, &format!(r#" xmlns:r="{}""#, NS_RELATIONSHIPS));
    }
}

fn write_sheet_data(sheet: &Worksheet) -> Result<String> {
    let mut writer = Writer::new(Vec::new());
    if sheet.rows.is_empty() {
        writer.write_event(Event::Empty(BytesStart::new("sheetData")))?;
        return Ok(String::from_utf8(writer.into_inner())?);
    }

    writer.write_event(Event::Start(BytesStart::new("sheetData")))?;
    for (&number, row) in &sheet.rows {
        write_row(&mut writer, number, row)?;
    }
    writer.write_event(Event::End(BytesEnd::new("sheetData")))?;
    Ok(String::from_utf8(writer.into_inner())?)
}

fn write_row(writer: &mut Writer<Vec<u8>>, number: u32, row: &Row) -> Result<()> {
    let mut start = BytesStart::new("row");
    start.push_attribute(("r", number.to_string().as_str()));
    if let Some(style) = row.style {
        start.push_attribute(("s", style.to_string().as_str()));
    }
    if row.custom_format {
        start.push_attribute(("customFormat", "1"));
    }
    if let Some(height) = row.height {
        start.push_attribute(("ht", height.to_string().as_str()));
    }
    if row.hidden {
        start.push_attribute(("hidden", "1"));
    }
    if row.custom_height {
        start.push_attribute(("customHeight", "1"));
    }
    if row.outline_level > 0 {
        start.push_attribute(("outlineLevel", row.outline_level.to_string().as_str()));
    }
    if row.collapsed {
        start.push_attribute(("collapsed", "1"));
    }

    if row.cells.is_empty() {
        writer.write_event(Event::Empty(start))?;
        return Ok(());
    }

    writer.write_event(Event::Start(start))?;
    for (&col, cell) in &row.cells {
        write_cell(writer, number, col, cell)?;
    }
    writer.write_event(Event::End(BytesEnd::new("row")))?;
    Ok(())
}

fn write_cell(writer: &mut Writer<Vec<u8>>, row: u32, col: u32, cell: &Cell) -> Result<()> {
    let reference = cell_ref(row, col);
    let mut start = BytesStart::new("c");
    start.push_attribute(("r", reference.as_str()));
    if let Some(style) = cell.style {
        start.push_attribute(("s", style.to_string().as_str()));
    }

    match &cell.value {
        CellValue::Empty => {
            writer.write_event(Event::Empty(start))?;
            return Ok(());
        }
        CellValue::Number(n) if !n.is_finite() => {
            start.push_attribute(("t", "e"));
            writer.write_event(Event::Start(start))?;
            write_text_element(writer, "v", "#NUM!")?;
        }
        CellValue::Number(n) => {
            writer.write_event(Event::Start(start))?;
            write_text_element(writer, "v", &n.to_string())?;
        }
        CellValue::Bool(b) => {
            start.push_attribute(("t", "b"));
            writer.write_event(Event::Start(start))?;
            write_text_element(writer, "v", if *b { "1" } else { "0" })?;
        }
        CellValue::Text(text) => {
            start.push_attribute(("t", "inlineStr"));
            writer.write_event(Event::Start(start))?;
            writer.write_event(Event::Start(BytesStart::new("is")))?;
            let mut t = BytesStart::new("t");
            if text.starts_with(char::is_whitespace) || text.ends_with(char::is_whitespace) {
                t.push_attribute(("xml:space", "preserve"));
            }
            writer.write_event(Event::Start(t))?;
            writer.write_event(Event::Text(BytesText::new(text)))?;
            writer.write_event(Event::End(BytesEnd::new("t")))?;
            writer.write_event(Event::End(BytesEnd::new("is")))?;
        }
        CellValue::Formula { formula, .. } => {
            writer.write_event(Event::Start(start))?;
            write_text_element(writer, "f", formula)?;
        }
        CellValue::Error(error) => {
            start.push_attribute(("t", "e"));
            writer.write_event(Event::Start(start))?;
            write_text_element(writer, "v", error)?;
        }
    }

    writer.write_event(Event::End(BytesEnd::new("c")))?;
    Ok(())
}

fn write_text_element(writer: &mut Writer<Vec<u8>>, tag: &str, text: &str) -> Result<()> {
    writer.write_event(Event::Start(BytesStart::new(tag)))?;
    writer.write_event(Event::Text(BytesText::new(text)))?;
    writer.write_event(Event::End(BytesEnd::new(tag)))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::Interrupter;
    use crate::range::Range;
    use crate::reader::ConditionalFormat;
    use crate::reader::xlsx_parser::parse_worksheet;

    const PROLOG: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main">"#;

    fn sample() -> Worksheet {
        let xml = format!(
            r#"{}<sheetPr/><cols><col min="1" max="1" width="9"/></cols><sheetData/><pageMargins left="0.7" right="0.7" top="0.75" bottom="0.75" header="0.3" footer="0.3"/><tableParts count="0"/></worksheet>"#,
            PROLOG
        );
        parse_worksheet("S", "xl/worksheets/sheet1.xml", &xml, &[], &Interrupter::new()).unwrap()
    }

    #[test]
    fn test_elements_written_in_schema_order() {
        let mut sheet = sample();
        sheet.set_cell(2, 1, Cell::new(CellValue::Text(" padded <x> ".into())));
        sheet.set_cell(2, 2, Cell::new(CellValue::formula("A2&\"!\"")));
        sheet.set_cell(3, 1, Cell::new(CellValue::Number(2.5)));
        sheet.set_cell(3, 2, Cell::new(CellValue::Bool(false)));
        sheet.merges.push(Range::new("S", 2, 1, 2, 2));
        sheet.row_breaks.insert(3);
        sheet.conditional_formats.push(ConditionalFormat {
            sqref: vec![Range::new("S", 3, 1, 3, 1), Range::new("S", 5, 1, 6, 1)],
            pivot: false,
            rules: r#"<cfRule type="cellIs" priority="1" operator="greaterThan"><formula>1</formula></cfRule>"#.into(),
        });
        sheet.drawing = Some("rId3".into());
        ensure_relationships_namespace(&mut sheet);

        let xml = write_worksheet(&sheet).unwrap();
        let order = [
            "<sheetPr",
            "<dimension ref=\"A2:B3\"",
            "<cols>",
            "<sheetData>",
            "<mergeCells count=\"1\">",
            "<conditionalFormatting sqref=\"A3 A5:A6\">",
            "<pageMargins",
            "<rowBreaks",
            "<drawing r:id=\"rId3\"/>",
            "<tableParts",
        ];
        let positions: Vec<usize> = order.iter().map(|t| xml.find(t).unwrap()).collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]), "{}", xml);

        assert!(xml.contains(r#"<t xml:space="preserve"> padded &lt;x&gt; </t>"#));
        assert!(xml.contains("<f>A2&amp;&quot;!&quot;</f>") || xml.contains("<f>A2&amp;\"!\"</f>"));
        assert!(xml.contains(r#"<c r="A3"><v>2.5</v></c>"#));
        assert!(xml.contains(r#"<c r="B3" t="b"><v>0</v></c>"#));
        assert!(xml.contains(NS_RELATIONSHIPS));
        assert!(xml.ends_with("</worksheet>"));
    }

    #[test]
    fn test_written_sheet_parses_back() {
        let mut sheet = sample();
        sheet.set_cell(1, 1, Cell {
            style: Some(3),
            value: CellValue::Text("x".into()),
        });
        sheet.row_mut(1).height = Some(20.5);
        sheet.row_mut(1).custom_height = true;
        let xml = write_worksheet(&sheet).unwrap();

        let reparsed = parse_worksheet("S", "p", &xml, &[], &Interrupter::new()).unwrap();
        assert_eq!(reparsed.cell(1, 1), sheet.cell(1, 1));
        assert_eq!(reparsed.rows[&1].height, Some(20.5));
        assert_eq!(reparsed.elements.len(), sheet.elements.len());
    }
}

//! XLSX package writer: worksheets, workbook.xml and the calculation chain

use crate::error::Result;
use crate::package::{REL_CALC_CHAIN, XlsxPackage, resolve_target};
use crate::reader::parser_utils::attribute;
use crate::reader::{DefinedName, Document, Workbook};
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use std::io::Cursor;
use tracing::debug;

use super::worksheet::write_worksheet;

/// Workbook children that follow `<calcPr>` in the schema
const AFTER_CALC_PR: &[&[u8]] = &[
    b"oleSize",
    b"customWorkbookViews",
    b"pivotCaches",
    b"smartTagPr",
    b"smartTagTypes",
    b"webPublishing",
    b"fileRecoveryPr",
    b"webPublishObjects",
    b"extLst",
];

/// Serialize a document model into XLSX bytes
pub fn write_xlsx(document: &mut Document, full_calc_on_load: bool) -> Result<Vec<u8>> {
    for sheet in &document.sheets {
        let xml = write_worksheet(sheet)?;
        document.package.set_part(&sheet.part, xml.into_bytes());
    }

    let workbook_part = document.workbook.part.clone();
    let workbook_xml = document.package.part_string(&workbook_part)?;
    let content = rewrite_workbook_xml(&workbook_xml, &document.workbook, full_calc_on_load)?;
    document.package.set_part(&workbook_part, content.into_bytes());

    drop_calc_chain(&mut document.package, &workbook_part)?;
    document.package.to_bytes()
}

/// Rewrite `workbook.xml` from the model: sheet names, defined names and `calcPr`
pub fn rewrite_workbook_xml(xml: &str, workbook: &Workbook, full_calc_on_load: bool) -> Result<String> {
    let mut reader = Reader::from_str(xml);
    let mut writer = Writer::new(Cursor::new(Vec::new()));
    let mut skip_depth = 0usize;
    let mut calc_written = !full_calc_on_load;

    loop {
        let event = reader.read_event()?;
        if skip_depth > 0 {
            match event {
                Event::Start(_) => skip_depth += 1,
                Event::End(_) => skip_depth -= 1,
                Event::Eof => break,
                _ => {}
            }
            continue;
        }

        let follows_calc_pr = matches!(
            &event,
            Event::Start(e) | Event::Empty(e) if is_after_calc_pr(e.local_name().as_ref())
        );
        if !calc_written && follows_calc_pr {
            write_calc_pr(&mut writer)?;
            calc_written = true;
            writer.write_event(event)?;
            continue;
        }

        match event {
            Event::Start(e) if e.local_name().as_ref() == b"sheet" => {
                writer.write_event(Event::Start(rename_sheet(&e, workbook)?))?;
            }
            Event::Empty(e) if e.local_name().as_ref() == b"sheet" => {
                writer.write_event(Event::Empty(rename_sheet(&e, workbook)?))?;
            }
            Event::Start(e) if e.local_name().as_ref() == b"definedNames" => {
                write_defined_names(&mut writer, &workbook.defined_names)?;
                skip_depth = 1;
            }
            Event::Empty(e) if e.local_name().as_ref() == b"definedNames" => {
                write_defined_names(&mut writer, &workbook.defined_names)?;
            }
            Event::Start(e) if e.local_name().as_ref() == b"calcPr" && !calc_written => {
                writer.write_event(Event::Start(with_full_calc(&e)?))?;
                calc_written = true;
            }
            Event::Empty(e) if e.local_name().as_ref() == b"calcPr" && !calc_written => {
                writer.write_event(Event::Empty(with_full_calc(&e)?))?;
                calc_written = true;
            }
            Event::End(e) if e.local_name().as_ref() == b"workbook" => {
                if !calc_written {
                    write_calc_pr(&mut writer)?;
                    calc_written = true;
                }
                writer.write_event(Event::End(e))?;
            }
            Event::Eof => break,
            e => writer.write_event(e)?,
        }
    }

    let result = writer.into_inner().into_inner();
    Ok(String::from_utf8(result)?)
}

fn is_after_calc_pr(name: &[u8]) -> bool {
    AFTER_CALC_PR.iter().any(|n| *n == name)
}

fn rename_sheet(e: &BytesStart, workbook: &Workbook) -> Result<BytesStart<'static>> {
    let rel_id = attribute(e, b"r:id")?.unwrap_or_default();
    let new_name = workbook
        .sheets
        .iter()
        .find(|s| s.rel_id == rel_id)
        .map(|s| s.name.clone());

    let mut renamed = BytesStart::new(String::from_utf8_lossy(e.name().as_ref()).into_owned());
    for attr in e.attributes() {
        let attr = attr?;
        match (&new_name, attr.key.as_ref()) {
            (Some(name), b"name") => renamed.push_attribute(("name", name.as_str())),
            _ => renamed.push_attribute(attr),
        }
    }
    Ok(renamed)
}

fn write_defined_names(writer: &mut Writer<Cursor<Vec<u8>>>, names: &[DefinedName]) -> Result<()> {
    if names.is_empty() {
        return Ok(());
    }
    writer.write_event(Event::Start(BytesStart::new("definedNames")))?;
    for name in names {
        let mut start = BytesStart::new("definedName");
        start.push_attribute(("name", name.name.as_str()));
        if let Some(local) = name.local_sheet_id {
            start.push_attribute(("localSheetId", local.to_string().as_str()));
        }
        if name.hidden {
            start.push_attribute(("hidden", "1"));
        }
        writer.write_event(Event::Start(start))?;
        writer.write_event(Event::Text(BytesText::new(&name.formula)))?;
        writer.write_event(Event::End(BytesEnd::new("definedName")))?;
    }
    writer.write_event(Event::End(BytesEnd::new("definedNames")))?;
    Ok(())
}

fn with_full_calc(e: &BytesStart) -> Result<BytesStart<'static>> {
    let mut calc = BytesStart::new(String::from_utf8_lossy(e.name().as_ref()).into_owned());
    for attr in e.attributes() {
        let attr = attr?;
        if attr.key.as_ref() != b"fullCalcOnLoad" {
            calc.push_attribute(attr);
        }
    }
    calc.push_attribute(("fullCalcOnLoad", "1"));
    Ok(calc)
}

fn write_calc_pr(writer: &mut Writer<Cursor<Vec<u8>>>) -> Result<()> {
    let mut calc = BytesStart::new("calcPr");
    calc.push_attribute(("fullCalcOnLoad", "1"));
    writer.write_event(Event::Empty(calc))?;
    Ok(())
}

/// Remove the calculation chain: its cell list is stale once rows moved
pub fn drop_calc_chain(package: &mut XlsxPackage, workbook_part: &str) -> Result<()> {
    let mut relationships = package.relationships(workbook_part)?;
    let chains: Vec<String> = relationships
        .iter()
        .filter(|r| r.rel_type == REL_CALC_CHAIN)
        .map(|r| resolve_target(workbook_part, &r.target))
        .collect();
    if chains.is_empty() {
        return Ok(());
    }

    relationships.retain(|r| r.rel_type != REL_CALC_CHAIN);
    package.set_relationships(workbook_part, &relationships);
    for part in chains {
        debug!(part = %part, "dropping calculation chain");
        package.remove_part(&part);
        package.remove_content_type_override(&part)?;
    }
    Ok(())
}

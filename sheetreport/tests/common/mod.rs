//! In-memory XLSX templates for integration tests

use sheetreport::reader::Document;
use sheetreport::{Interrupter, OutputType, ReportTemplate};
use std::io::{Cursor, Write};
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

pub const NS_MAIN: &str = "http://schemas.openxmlformats.org/spreadsheetml/2006/main";
pub const NS_REL: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships";

/// A worksheet of a mock template: `body` goes inside `<worksheet>`
pub struct MockSheet {
    pub name: String,
    pub body: String,
    /// (id, type suffix, target) relationships of the sheet part
    pub rels: Vec<(String, String, String)>,
}

/// Builder for a minimal but valid XLSX template
#[derive(Default)]
pub struct MockTemplate {
    sheets: Vec<MockSheet>,
    names: Vec<(String, String)>,
    parts: Vec<(String, String)>,
    overrides: Vec<(String, String)>,
    workbook_rels: Vec<(String, String, String)>,
    calc_chain: bool,
}

impl MockTemplate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a sheet whose `<sheetData>` holds `rows`
    pub fn sheet(self, name: &str, rows: &[String]) -> Self {
        let body = format!("<sheetData>{}</sheetData>", rows.concat());
        self.sheet_xml(name, &body, &[])
    }

    /// Add a sheet with a raw body and relationships `(id, type suffix, target)`
    pub fn sheet_xml(mut self, name: &str, body: &str, rels: &[(&str, &str, &str)]) -> Self {
        self.sheets.push(MockSheet {
            name: name.to_string(),
            body: body.to_string(),
            rels: rels
                .iter()
                .map(|(a, b, c)| (a.to_string(), b.to_string(), c.to_string()))
                .collect(),
        });
        self
    }

    pub fn name(mut self, name: &str, formula: &str) -> Self {
        self.names.push((name.to_string(), formula.to_string()));
        self
    }

    /// Add an arbitrary part with its content type override
    pub fn part(mut self, name: &str, content_type: &str, xml: &str) -> Self {
        self.parts.push((name.to_string(), xml.to_string()));
        self.overrides.push((name.to_string(), content_type.to_string()));
        self
    }

    /// Add a part without content type override (relationship parts)
    pub fn raw_part(mut self, name: &str, xml: &str) -> Self {
        self.parts.push((name.to_string(), xml.to_string()));
        self
    }

    /// Add a relationship from the workbook part
    pub fn workbook_rel(mut self, id: &str, rel_type: &str, target: &str) -> Self {
        self.workbook_rels
            .push((id.to_string(), rel_type.to_string(), target.to_string()));
        self
    }

    pub fn with_calc_chain(mut self) -> Self {
        self.calc_chain = true;
        self
    }

    /// Zip the template
    pub fn build(&self) -> Vec<u8> {
        self.try_build().expect("mock template builds")
    }

    fn try_build(&self) -> anyhow::Result<Vec<u8>> {
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        let options =
            SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);

        // 1. [Content_Types].xml
        zip.start_file("[Content_Types].xml", options)?;
        let mut content_types = String::from(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/><Override PartName="/xl/workbook.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml"/>"#,
        );
        for i in 0..self.sheets.len() {
            content_types.push_str(&format!(
                r#"<Override PartName="/xl/worksheets/sheet{}.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml"/>"#,
                i + 1
            ));
        }
        for (part, content_type) in &self.overrides {
            content_types.push_str(&format!(
                r#"<Override PartName="/{}" ContentType="{}"/>"#,
                part, content_type
            ));
        }
        if self.calc_chain {
            content_types.push_str(r#"<Override PartName="/xl/calcChain.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.calcChain+xml"/>"#);
        }
        content_types.push_str("</Types>");
        zip.write_all(content_types.as_bytes())?;

        // 2. _rels/.rels
        zip.start_file("_rels/.rels", options)?;
        zip.write_all(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="xl/workbook.xml"/></Relationships>"#
                .as_bytes(),
        )?;

        // 3. xl/workbook.xml
        zip.start_file("xl/workbook.xml", options)?;
        let mut workbook_xml = format!(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<workbook xmlns="{}" xmlns:r="{}"><sheets>"#,
            NS_MAIN, NS_REL
        );
        for (i, sheet) in self.sheets.iter().enumerate() {
            workbook_xml.push_str(&format!(
                r#"<sheet name="{}" sheetId="{}" r:id="rId{}"/>"#,
                escape(&sheet.name),
                i + 1,
                i + 1
            ));
        }
        workbook_xml.push_str("</sheets>");
        if !self.names.is_empty() {
            workbook_xml.push_str("<definedNames>");
            for (name, formula) in &self.names {
                workbook_xml.push_str(&format!(
                    r#"<definedName name="{}">{}</definedName>"#,
                    name,
                    escape(formula)
                ));
            }
            workbook_xml.push_str("</definedNames>");
        }
        workbook_xml.push_str(r#"<calcPr calcId="191029"/></workbook>"#);
        zip.write_all(workbook_xml.as_bytes())?;

        // 4. xl/_rels/workbook.xml.rels
        zip.start_file("xl/_rels/workbook.xml.rels", options)?;
        let mut rels_xml = String::from(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">"#,
        );
        for i in 0..self.sheets.len() {
            rels_xml.push_str(&format!(
                r#"<Relationship Id="rId{}" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet{}.xml"/>"#,
                i + 1,
                i + 1
            ));
        }
        for (id, rel_type, target) in &self.workbook_rels {
            rels_xml.push_str(&format!(
                r#"<Relationship Id="{}" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/{}" Target="{}"/>"#,
                id, rel_type, target
            ));
        }
        if self.calc_chain {
            rels_xml.push_str(r#"<Relationship Id="rIdCalc" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/calcChain" Target="calcChain.xml"/>"#);
        }
        rels_xml.push_str("</Relationships>");
        zip.write_all(rels_xml.as_bytes())?;

        // 5. sheets and their relationships
        for (i, sheet) in self.sheets.iter().enumerate() {
            zip.start_file(format!("xl/worksheets/sheet{}.xml", i + 1), options)?;
            zip.write_all(
                format!(
                    r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<worksheet xmlns="{}" xmlns:r="{}">{}</worksheet>"#,
                    NS_MAIN, NS_REL, sheet.body
                )
                .as_bytes(),
            )?;

            if !sheet.rels.is_empty() {
                zip.start_file(format!("xl/worksheets/_rels/sheet{}.xml.rels", i + 1), options)?;
                let mut rels = String::from(
                    r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">"#,
                );
                for (id, rel_type, target) in &sheet.rels {
                    rels.push_str(&format!(
                        r#"<Relationship Id="{}" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/{}" Target="{}"/>"#,
                        id, rel_type, target
                    ));
                }
                rels.push_str("</Relationships>");
                zip.write_all(rels.as_bytes())?;
            }
        }

        // 6. extra parts
        for (name, xml) in &self.parts {
            zip.start_file(name.as_str(), options)?;
            zip.write_all(xml.as_bytes())?;
        }
        if self.calc_chain {
            zip.start_file("xl/calcChain.xml", options)?;
            zip.write_all(
                format!(r#"<calcChain xmlns="{}"><c r="B5" i="1"/></calcChain>"#, NS_MAIN).as_bytes(),
            )?;
        }

        Ok(zip.finish()?.into_inner())
    }
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// `<row r="N">cells</row>`
pub fn row(number: u32, cells: &[String]) -> String {
    format!(r#"<row r="{}">{}</row>"#, number, cells.concat())
}

/// Inline string cell
pub fn text(reference: &str, value: &str) -> String {
    format!(
        r#"<c r="{}" t="inlineStr"><is><t>{}</t></is></c>"#,
        reference,
        escape(value)
    )
}

/// Numeric cell
pub fn number(reference: &str, value: f64) -> String {
    format!(r#"<c r="{}"><v>{}</v></c>"#, reference, value)
}

/// Formula cell with a stale cached value
pub fn formula(reference: &str, formula: &str) -> String {
    format!(
        r#"<c r="{}"><f>{}</f><v>0</v></c>"#,
        reference,
        escape(formula)
    )
}

pub fn xlsx_template(name: &str, content: Vec<u8>) -> ReportTemplate {
    ReportTemplate::new(name, OutputType::Xlsx, content)
}

/// Parse rendered XLSX bytes back into the document model
pub fn reload(bytes: &[u8]) -> Document {
    Document::from_bytes(bytes, &Interrupter::new()).expect("rendered document parses")
}

/// Text of a part of rendered XLSX bytes
pub fn part_text(bytes: &[u8], part: &str) -> Option<String> {
    let package = sheetreport::package::XlsxPackage::from_bytes(bytes).ok()?;
    package.part_string(part).ok()
}

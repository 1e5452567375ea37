//! In-memory XLSX package: zip parts, relationships and content types

use crate::error::{ReportError, Result};
use crate::reader::parser_utils::attribute;
use quick_xml::escape::escape;
use quick_xml::events::{BytesStart, Event};
use quick_xml::{Reader, Writer};
use std::collections::HashMap;
use std::io::{Cursor, Read, Write};
use std::path::Path;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

pub const REL_OFFICE_DOCUMENT: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument";
pub const REL_WORKSHEET: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet";
pub const REL_DRAWING: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/drawing";
pub const REL_CHART: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/chart";
pub const REL_IMAGE: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/image";
pub const REL_CALC_CHAIN: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/calcChain";
pub const REL_PIVOT_CACHE_DEFINITION: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/pivotCacheDefinition";

pub const CT_DRAWING: &str = "application/vnd.openxmlformats-officedocument.drawing+xml";

/// A relationship entry of a `.rels` part
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relationship {
    pub id: String,
    pub rel_type: String,
    pub target: String,
    pub external: bool,
}

/// Every part of an OOXML zip package, in archive order
#[derive(Debug, Clone, Default)]
pub struct XlsxPackage {
    parts: Vec<(String, Vec<u8>)>,
    index: HashMap<String, usize>,
}

impl XlsxPackage {
    /// Load a package from its zip bytes
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let mut archive = ZipArchive::new(Cursor::new(data))?;
        let mut package = Self::default();

        for i in 0..archive.len() {
            let mut file = archive.by_index(i)?;
            if file.is_dir() {
                continue;
            }
            let name = file.name().to_string();
            let mut buffer = Vec::with_capacity(file.size() as usize);
            file.read_to_end(&mut buffer)?;
            package.set_part(&name, buffer);
        }

        Ok(package)
    }

    /// Load a package from a file
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data = std::fs::read(path)?;
        Self::from_bytes(&data)
    }

    /// Write the package as a zip archive
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut zip_writer = ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

        for (name, data) in &self.parts {
            zip_writer.start_file(name.as_str(), options)?;
            zip_writer.write_all(data)?;
        }

        Ok(zip_writer.finish()?.into_inner())
    }

    pub fn has_part(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn part(&self, name: &str) -> Option<&[u8]> {
        self.index.get(name).map(|&i| self.parts[i].1.as_slice())
    }

    /// Read a part as UTF-8 text, failing when it is missing
    pub fn part_string(&self, name: &str) -> Result<String> {
        let data = self
            .part(name)
            .ok_or_else(|| ReportError::package(format!("missing part {}", name)))?;
        Ok(String::from_utf8(data.to_vec())?)
    }

    pub fn part_names(&self) -> impl Iterator<Item = &str> {
        self.parts.iter().map(|(name, _)| name.as_str())
    }

    /// Insert or replace a part
    pub fn set_part(&mut self, name: &str, data: Vec<u8>) {
        match self.index.get(name) {
            Some(&i) => self.parts[i].1 = data,
            None => {
                self.index.insert(name.to_string(), self.parts.len());
                self.parts.push((name.to_string(), data));
            }
        }
    }

    pub fn remove_part(&mut self, name: &str) -> bool {
        if self.index.remove(name).is_none() {
            return false;
        }
        self.parts.retain(|(part, _)| part != name);
        self.index = self
            .parts
            .iter()
            .enumerate()
            .map(|(i, (part, _))| (part.clone(), i))
            .collect();
        true
    }

    /// Relationships declared by `part` (empty when it has no `.rels`)
    pub fn relationships(&self, part: &str) -> Result<Vec<Relationship>> {
        let rels_path = rels_path_for(part);
        if !self.has_part(&rels_path) {
            return Ok(Vec::new());
        }
        parse_relationships(&self.part_string(&rels_path)?)
    }

    /// Rewrite the `.rels` part of `part`
    pub fn set_relationships(&mut self, part: &str, relationships: &[Relationship]) {
        let mut xml = String::from(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">"#,
        );
        for rel in relationships {
            xml.push_str(&format!(
                r#"<Relationship Id="{}" Type="{}" Target="{}"{}/>"#,
                escape(rel.id.as_str()),
                escape(rel.rel_type.as_str()),
                escape(rel.target.as_str()),
                if rel.external {
                    r#" TargetMode="External""#
                } else {
                    ""
                }
            ));
        }
        xml.push_str("</Relationships>");
        self.set_part(&rels_path_for(part), xml.into_bytes());
    }

    /// Add a relationship to `part` and return its new id
    pub fn add_relationship(&mut self, part: &str, rel_type: &str, target: &str) -> Result<String> {
        let mut relationships = self.relationships(part)?;
        let mut n = relationships.len() + 1;
        while relationships.iter().any(|r| r.id == format!("rId{}", n)) {
            n += 1;
        }
        let id = format!("rId{}", n);
        relationships.push(Relationship {
            id: id.clone(),
            rel_type: rel_type.to_string(),
            target: target.to_string(),
            external: false,
        });
        self.set_relationships(part, &relationships);
        Ok(id)
    }

    /// Resolved part names of the targets of `part` with the given type
    pub fn related_parts(&self, part: &str, rel_type: &str) -> Result<Vec<String>> {
        Ok(self
            .relationships(part)?
            .into_iter()
            .filter(|r| !r.external && r.rel_type == rel_type)
            .map(|r| resolve_target(part, &r.target))
            .collect())
    }

    /// Add an `<Override>` to `[Content_Types].xml` unless one exists
    pub fn add_content_type_override(&mut self, part: &str, content_type: &str) -> Result<()> {
        let part_name = format!("/{}", part.trim_start_matches('/'));
        let element = format!(
            r#"<Override PartName="{}" ContentType="{}"/>"#,
            escape(part_name.as_str()),
            escape(content_type)
        );
        self.add_content_type_entry(b"Override", b"PartName", &part_name, &element)
    }

    /// Add a `<Default>` extension mapping unless one exists
    pub fn add_content_type_default(&mut self, extension: &str, content_type: &str) -> Result<()> {
        let element = format!(
            r#"<Default Extension="{}" ContentType="{}"/>"#,
            escape(extension),
            escape(content_type)
        );
        self.add_content_type_entry(b"Default", b"Extension", extension, &element)
    }

    fn add_content_type_entry(
        &mut self,
        tag: &[u8],
        key: &[u8],
        value: &str,
        element: &str,
    ) -> Result<()> {
        let xml = self.part_string("[Content_Types].xml")?;
        let mut reader = Reader::from_str(&xml);
        loop {
            match reader.read_event()? {
                Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == tag => {
                    if attribute(&e, key)?.is_some_and(|v| v.eq_ignore_ascii_case(value)) {
                        return Ok(());
                    }
                }
                Event::Eof => break,
                _ => {}
            }
        }

        let updated = match xml.rfind("</Types>") {
            Some(pos) => format!("{}{}{}", &xml[..pos], element, &xml[pos..]),
            None => return Err(ReportError::package("[Content_Types].xml has no </Types>")),
        };
        self.set_part("[Content_Types].xml", updated.into_bytes());
        Ok(())
    }

    /// Drop the `<Override>` of a removed part
    pub fn remove_content_type_override(&mut self, part: &str) -> Result<()> {
        let part_name = format!("/{}", part.trim_start_matches('/'));
        let xml = self.part_string("[Content_Types].xml")?;
        let mut reader = Reader::from_str(&xml);
        let mut writer = Writer::new(Cursor::new(Vec::new()));

        loop {
            match reader.read_event()? {
                Event::Empty(e) if e.local_name().as_ref() == b"Override" => {
                    if attribute(&e, b"PartName")?.as_deref() != Some(part_name.as_str()) {
                        writer.write_event(Event::Empty(e))?;
                    }
                }
                Event::Eof => break,
                e => writer.write_event(e)?,
            }
        }

        let result = writer.into_inner().into_inner();
        self.set_part("[Content_Types].xml", result);
        Ok(())
    }

    /// Main workbook part, found through the package relationships
    pub fn workbook_part(&self) -> Result<String> {
        let main = self
            .relationships("")?
            .into_iter()
            .find(|r| r.rel_type == REL_OFFICE_DOCUMENT)
            .map(|r| resolve_target("", &r.target));
        match main {
            Some(part) => Ok(part),
            None if self.has_part("xl/workbook.xml") => Ok("xl/workbook.xml".to_string()),
            None => Err(ReportError::package("no workbook part found")),
        }
    }

    /// First free `prefix{N}{suffix}` part name
    pub fn next_part_name(&self, prefix: &str, suffix: &str) -> String {
        (1..)
            .map(|n| format!("{}{}{}", prefix, n, suffix))
            .find(|name| !self.has_part(name))
            .unwrap_or_else(|| format!("{}0{}", prefix, suffix))
    }
}

/// `xl/worksheets/sheet1.xml` -> `xl/worksheets/_rels/sheet1.xml.rels`
pub fn rels_path_for(part: &str) -> String {
    match part.rfind('/') {
        Some(pos) => format!("{}/_rels/{}.rels", &part[..pos], &part[pos + 1..]),
        None if part.is_empty() => "_rels/.rels".to_string(),
        None => format!("_rels/{}.rels", part),
    }
}

/// Resolve a relationship target relative to the part that declares it
pub fn resolve_target(base_part: &str, target: &str) -> String {
    if let Some(absolute) = target.strip_prefix('/') {
        return absolute.to_string();
    }
    let mut segments: Vec<&str> = match base_part.rfind('/') {
        Some(pos) => base_part[..pos].split('/').collect(),
        None => Vec::new(),
    };
    for segment in target.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }
    segments.join("/")
}

/// Path of `target` relative to the directory of `base_part`
pub fn relative_target(base_part: &str, target: &str) -> String {
    let base_dir: Vec<&str> = match base_part.rfind('/') {
        Some(pos) => base_part[..pos].split('/').collect(),
        None => Vec::new(),
    };
    let target_segments: Vec<&str> = target.split('/').collect();
    let common = base_dir
        .iter()
        .zip(target_segments.iter())
        .take_while(|(a, b)| a == b)
        .count();
    let mut relative: Vec<&str> = std::iter::repeat_n("..", base_dir.len() - common).collect();
    relative.extend(&target_segments[common..]);
    relative.join("/")
}

fn parse_relationships(xml: &str) -> Result<Vec<Relationship>> {
    let mut reader = Reader::from_str(xml);
    let mut relationships = Vec::new();

    loop {
        match reader.read_event()? {
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"Relationship" => {
                relationships.push(relationship_from(&e)?);
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(relationships)
}

fn relationship_from(e: &BytesStart) -> Result<Relationship> {
    Ok(Relationship {
        id: attribute(e, b"Id")?.unwrap_or_default(),
        rel_type: attribute(e, b"Type")?.unwrap_or_default(),
        target: attribute(e, b"Target")?.unwrap_or_default(),
        external: attribute(e, b"TargetMode")?.as_deref() == Some("External"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_package() -> XlsxPackage {
        let mut package = XlsxPackage::default();
        package.set_part(
            "[Content_Types].xml",
            br#"<?xml version="1.0" encoding="UTF-8"?><Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="xml" ContentType="application/xml"/><Override PartName="/xl/calcChain.xml" ContentType="calc"/></Types>"#.to_vec(),
        );
        package.set_part(
            "_rels/.rels",
            br#"<?xml version="1.0"?><Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="xl/workbook.xml"/></Relationships>"#.to_vec(),
        );
        package.set_part("xl/workbook.xml", b"<workbook/>".to_vec());
        package
    }

    #[test]
    fn test_paths() {
        assert_eq!(
            rels_path_for("xl/worksheets/sheet1.xml"),
            "xl/worksheets/_rels/sheet1.xml.rels"
        );
        assert_eq!(rels_path_for(""), "_rels/.rels");
        assert_eq!(
            resolve_target("xl/worksheets/sheet1.xml", "../drawings/drawing1.xml"),
            "xl/drawings/drawing1.xml"
        );
        assert_eq!(
            resolve_target("xl/workbook.xml", "worksheets/sheet2.xml"),
            "xl/worksheets/sheet2.xml"
        );
        assert_eq!(resolve_target("", "xl/workbook.xml"), "xl/workbook.xml");
        assert_eq!(
            relative_target("xl/worksheets/sheet1.xml", "xl/drawings/drawing1.xml"),
            "../drawings/drawing1.xml"
        );
        assert_eq!(
            relative_target("xl/drawings/drawing1.xml", "xl/media/image1.png"),
            "../media/image1.png"
        );
    }

    #[test]
    fn test_round_trip_through_zip() {
        let package = minimal_package();
        let bytes = package.to_bytes().unwrap();
        let reloaded = XlsxPackage::from_bytes(&bytes).unwrap();
        assert_eq!(reloaded.part("xl/workbook.xml"), Some(&b"<workbook/>"[..]));
        assert_eq!(reloaded.workbook_part().unwrap(), "xl/workbook.xml");
        let names: Vec<_> = reloaded.part_names().collect();
        assert_eq!(names, vec!["[Content_Types].xml", "_rels/.rels", "xl/workbook.xml"]);
    }

    #[test]
    fn test_relationships_and_content_types() {
        let mut package = minimal_package();
        let id = package
            .add_relationship("xl/worksheets/sheet1.xml", REL_DRAWING, "../drawings/drawing1.xml")
            .unwrap();
        assert_eq!(id, "rId1");
        assert_eq!(
            package
                .related_parts("xl/worksheets/sheet1.xml", REL_DRAWING)
                .unwrap(),
            vec!["xl/drawings/drawing1.xml".to_string()]
        );

        package
            .add_content_type_override("xl/drawings/drawing1.xml", CT_DRAWING)
            .unwrap();
        package
            .add_content_type_override("xl/drawings/drawing1.xml", CT_DRAWING)
            .unwrap();
        package.remove_content_type_override("xl/calcChain.xml").unwrap();
        let types = package.part_string("[Content_Types].xml").unwrap();
        assert_eq!(types.matches("/xl/drawings/drawing1.xml").count(), 1);
        assert!(!types.contains("calcChain"));
    }

    #[test]
    fn test_remove_part_reindexes() {
        let mut package = minimal_package();
        assert!(package.remove_part("_rels/.rels"));
        assert!(!package.remove_part("_rels/.rels"));
        assert!(package.has_part("xl/workbook.xml"));
        assert_eq!(package.part("xl/workbook.xml"), Some(&b"<workbook/>"[..]));
    }
}

//! Pictures anchored on report cells

use crate::error::{ReportError, Result};
use crate::package::{CT_DRAWING, REL_DRAWING, REL_IMAGE, relative_target, resolve_target};
use crate::placeholder::Picture;
use crate::reader::Document;
use regex::Regex;
use std::fmt::Write as _;
use std::sync::LazyLock;
use tracing::debug;

use super::worksheet::{NS_RELATIONSHIPS, ensure_relationships_namespace};

const NS_SPREADSHEET_DRAWING: &str =
    "http://schemas.openxmlformats.org/drawingml/2006/spreadsheetDrawing";
const NS_DRAWING_MAIN: &str = "http://schemas.openxmlformats.org/drawingml/2006/main";

/// English Metric Units per pixel at 96 DPI
const EMU_PER_PIXEL: u64 = 9525;

static SHAPE_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"cNvPr\s+id="(\d+)""#).expect("shape id regex is valid"));

/// A picture produced by an inliner, placed on a 1-based cell
#[derive(Debug, Clone)]
pub struct AnchoredPicture {
    pub sheet: String,
    pub row: u32,
    pub column: u32,
    pub picture: Picture,
}

/// Write pictures into the drawings of their sheets, creating drawings as needed
pub fn embed_pictures(document: &mut Document, pictures: &[AnchoredPicture]) -> Result<()> {
    for picture in pictures {
        let drawing_part = drawing_for_sheet(document, &picture.sheet)?;
        let package = &mut document.package;

        let media = package.next_part_name("xl/media/image", &format!(".{}", picture.picture.extension));
        package.set_part(&media, picture.picture.data.clone());
        package.add_content_type_default(
            picture.picture.extension,
            &format!("image/{}", picture.picture.extension),
        )?;
        let rel_id =
            package.add_relationship(&drawing_part, REL_IMAGE, &relative_target(&drawing_part, &media))?;

        let xml = package.part_string(&drawing_part)?;
        let updated = append_anchor(&xml, picture, &rel_id)?;
        package.set_part(&drawing_part, updated.into_bytes());
        debug!(sheet = %picture.sheet, row = picture.row, column = picture.column, media = %media, "embedded picture");
    }
    Ok(())
}

/// Drawing part of a sheet; a new empty drawing is attached when it has none
fn drawing_for_sheet(document: &mut Document, sheet_name: &str) -> Result<String> {
    let sheet = document
        .sheets
        .iter_mut()
        .find(|s| s.name == sheet_name)
        .ok_or_else(|| ReportError::package(format!("no sheet named '{}'", sheet_name)))?;

    if let Some(rel_id) = &sheet.drawing {
        let existing = document
            .package
            .relationships(&sheet.part)?
            .into_iter()
            .find(|r| &r.id == rel_id)
            .map(|r| resolve_target(&sheet.part, &r.target));
        if let Some(part) = existing {
            return Ok(part);
        }
    }

    let part = document.package.next_part_name("xl/drawings/drawing", ".xml");
    let xml = format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<xdr:wsDr xmlns:xdr="{}" xmlns:a="{}"></xdr:wsDr>"#,
        NS_SPREADSHEET_DRAWING, NS_DRAWING_MAIN
    );
    document.package.set_part(&part, xml.into_bytes());
    document.package.add_content_type_override(&part, CT_DRAWING)?;
    let rel_id = document
        .package
        .add_relationship(&sheet.part, REL_DRAWING, &relative_target(&sheet.part, &part))?;
    sheet.drawing = Some(rel_id);
    ensure_relationships_namespace(sheet);
    Ok(part)
}

/// Append a one-cell anchor before the closing `wsDr` tag, keeping its prefix
fn append_anchor(xml: &str, anchored: &AnchoredPicture, rel_id: &str) -> Result<String> {
    let close = xml
        .rfind("</")
        .filter(|&pos| xml[pos..].trim_end().ends_with("wsDr>"))
        .ok_or_else(|| ReportError::package("drawing part has no closing wsDr tag"))?;
    let prefix = xml[close + 2..]
        .trim_end()
        .trim_end_matches("wsDr>")
        .trim_end_matches(':')
        .to_string();
    let p = if prefix.is_empty() { String::new() } else { format!("{}:", prefix) };

    let shape_id = SHAPE_ID
        .captures_iter(xml)
        .filter_map(|c| c[1].parse::<u32>().ok())
        .max()
        .unwrap_or(0)
        + 1;
    let cx = u64::from(anchored.picture.width) * EMU_PER_PIXEL;
    let cy = u64::from(anchored.picture.height) * EMU_PER_PIXEL;

    let mut anchor = String::with_capacity(1024);
    let _ = write!(
        anchor,
        r#"<{p}oneCellAnchor xmlns:a="{a}" xmlns:r="{r}"><{p}from><{p}col>{col}</{p}col><{p}colOff>0</{p}colOff><{p}row>{row}</{p}row><{p}rowOff>0</{p}rowOff></{p}from><{p}ext cx="{cx}" cy="{cy}"/>"#,
        p = p,
        a = NS_DRAWING_MAIN,
        r = NS_RELATIONSHIPS,
        col = anchored.column.saturating_sub(1),
        row = anchored.row.saturating_sub(1),
        cx = cx,
        cy = cy,
    );
    let _ = write!(
        anchor,
        r#"<{p}pic><{p}nvPicPr><{p}cNvPr id="{id}" name="Picture {id}"/><{p}cNvPicPr><a:picLocks noChangeAspect="1"/></{p}cNvPicPr></{p}nvPicPr><{p}blipFill><a:blip r:embed="{rel}"/><a:stretch><a:fillRect/></a:stretch></{p}blipFill><{p}spPr><a:xfrm><a:off x="0" y="0"/><a:ext cx="{cx}" cy="{cy}"/></a:xfrm><a:prstGeom prst="rect"><a:avLst/></a:prstGeom></{p}spPr></{p}pic><{p}clientData/></{p}oneCellAnchor>"#,
        p = p,
        id = shape_id,
        rel = rel_id,
        cx = cx,
        cy = cy,
    );

    Ok(format!("{}{}{}", &xml[..close], anchor, &xml[close..]))
}

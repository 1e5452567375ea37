//! `${band.param}` placeholders: resolution, typing, field formats and inliners

use crate::band::{BandId, BandTree, ParamValue};
use crate::error::{ReportError, Result};
use crate::reader::CellValue;
use chrono::{NaiveDate, NaiveDateTime, Timelike};
use image::ImageFormat;
use quick_xml::escape::escape;
use regex::Regex;
use std::collections::HashMap;
use std::path::Path;
use std::sync::LazyLock;

static ALIAS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([^${}]+)\}").expect("alias pattern is valid"));

static ALIAS_WITH_INDEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<path>[^\[\]]+?)(?:\[(?P<index>\d+)\])?$").expect("index pattern is valid")
});

static INLINER_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\$\{(?P<name>[A-Za-z]+):(?P<width>\d+)x(?P<height>\d+)\}$")
        .expect("inliner pattern is valid")
});

const SECONDS_PER_DAY: f64 = 86_400.0;

/// A parsed placeholder: `${order.total[0]}` -> band `order`, param `total`, index 0
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alias {
    pub band_path: Option<String>,
    pub param: String,
    pub index: Option<usize>,
}

impl Alias {
    /// Parse the text between `${` and `}`
    pub fn parse(text: &str) -> Result<Self> {
        let caps = ALIAS_WITH_INDEX
            .captures(text.trim())
            .ok_or_else(|| ReportError::bad_alias(text, "malformed placeholder"))?;
        let path = caps.name("path").map(|m| m.as_str()).unwrap_or_default();
        let index = match caps.name("index") {
            Some(m) => Some(
                m.as_str()
                    .parse()
                    .map_err(|_| ReportError::bad_alias(text, "index out of range"))?,
            ),
            None => None,
        };
        let (band_path, param) = match path.rfind('.') {
            Some(pos) => (Some(path[..pos].to_string()), path[pos + 1..].to_string()),
            None => (None, path.to_string()),
        };
        if param.is_empty() {
            return Err(ReportError::bad_alias(text, "empty parameter name"));
        }
        Ok(Self {
            band_path,
            param,
            index,
        })
    }
}

/// Inner texts of every `${...}` in a string
pub fn find_aliases(text: &str) -> impl Iterator<Item = &str> {
    ALIAS
        .captures_iter(text)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str()))
}

/// The alias when `text` is exactly one placeholder and nothing else
pub fn single_alias(text: &str) -> Option<&str> {
    let caps = ALIAS.captures(text)?;
    let whole = caps.get(0)?;
    (whole.start() == 0 && whole.end() == text.len())
        .then(|| caps.get(1).map(|m| m.as_str()))
        .flatten()
}

/// Field formats keyed by `Band.param` or by plain `param`
#[derive(Debug, Clone, Default)]
pub struct FieldFormats {
    formats: HashMap<String, String>,
}

impl FieldFormats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, format: impl Into<String>) {
        self.formats.insert(key.into(), format.into());
    }

    /// Format for a parameter of a band, the qualified key winning
    pub fn get(&self, band_name: &str, param: &str) -> Option<&str> {
        self.formats
            .get(&format!("{}.{}", band_name, param))
            .or_else(|| self.formats.get(param))
            .map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.formats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.formats.is_empty()
    }
}

impl FromIterator<(String, String)> for FieldFormats {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self {
            formats: iter.into_iter().collect(),
        }
    }
}

/// An image to anchor on a cell
#[derive(Debug, Clone, PartialEq)]
pub struct Picture {
    pub data: Vec<u8>,
    /// File extension matching the image format (`png`, `jpeg`, ...)
    pub extension: &'static str,
    /// Size in pixels
    pub width: u32,
    pub height: u32,
}

/// Turns a parameter value into embedded content when its field format is
/// the inliner's tag, e.g. `${bitmap:100x60}`.
pub trait ContentInliner: Send + Sync {
    /// Tag name this inliner answers to
    fn name(&self) -> &str;

    /// Build the picture for a value; `None` leaves the cell blank
    fn inline(&self, value: &ParamValue, width: u32, height: u32) -> Result<Option<Picture>>;
}

/// `${bitmap:WxH}`: the value holds the raw image bytes
#[derive(Debug, Clone, Copy, Default)]
pub struct BitmapInliner;

impl ContentInliner for BitmapInliner {
    fn name(&self) -> &str {
        "bitmap"
    }

    fn inline(&self, value: &ParamValue, width: u32, height: u32) -> Result<Option<Picture>> {
        match value {
            ParamValue::Null => Ok(None),
            ParamValue::Bytes(data) if data.is_empty() => Ok(None),
            ParamValue::Bytes(data) => picture(self.name(), data.clone(), width, height).map(Some),
            other => Err(ReportError::Inliner {
                inliner: self.name().to_string(),
                reason: format!("expected binary content, got {:?}", kind(other)),
            }),
        }
    }
}

/// `${image:WxH}`: the value holds image bytes or a path to an image file
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageInliner;

impl ContentInliner for ImageInliner {
    fn name(&self) -> &str {
        "image"
    }

    fn inline(&self, value: &ParamValue, width: u32, height: u32) -> Result<Option<Picture>> {
        match value {
            ParamValue::Null => Ok(None),
            ParamValue::Bytes(data) if data.is_empty() => Ok(None),
            ParamValue::Bytes(data) => picture(self.name(), data.clone(), width, height).map(Some),
            ParamValue::Text(path) if path.trim().is_empty() => Ok(None),
            ParamValue::Text(path) => {
                let data = std::fs::read(Path::new(path.trim())).map_err(|e| ReportError::Inliner {
                    inliner: self.name().to_string(),
                    reason: format!("cannot read image '{}': {}", path, e),
                })?;
                picture(self.name(), data, width, height).map(Some)
            }
            other => Err(ReportError::Inliner {
                inliner: self.name().to_string(),
                reason: format!("expected an image or a path, got {:?}", kind(other)),
            }),
        }
    }
}

/// Inliners available by default
pub fn default_inliners() -> Vec<Box<dyn ContentInliner>> {
    vec![Box::new(BitmapInliner), Box::new(ImageInliner)]
}

fn picture(inliner: &str, data: Vec<u8>, width: u32, height: u32) -> Result<Picture> {
    let rejected = |reason: String| ReportError::Inliner {
        inliner: inliner.to_string(),
        reason,
    };
    let format = image::guess_format(&data).map_err(|e| rejected(e.to_string()))?;
    let extension = image_extension(format)
        .ok_or_else(|| rejected(format!("unsupported image format {:?}", format)))?;
    image::load_from_memory_with_format(&data, format)
        .map_err(|e| rejected(format!("corrupt {} image: {}", extension, e)))?;
    Ok(Picture {
        data,
        extension,
        width,
        height,
    })
}

/// Media file extension for the formats a workbook can embed
pub fn image_extension(format: ImageFormat) -> Option<&'static str> {
    match format {
        ImageFormat::Png => Some("png"),
        ImageFormat::Jpeg => Some("jpeg"),
        ImageFormat::Gif => Some("gif"),
        ImageFormat::Bmp => Some("bmp"),
        _ => None,
    }
}

fn kind(value: &ParamValue) -> &'static str {
    match value {
        ParamValue::Null => "null",
        ParamValue::Bool(_) => "boolean",
        ParamValue::Integer(_) | ParamValue::Float(_) => "number",
        ParamValue::Text(_) => "text",
        ParamValue::Date(_) | ParamValue::DateTime(_) => "date",
        ParamValue::Bytes(_) => "bytes",
    }
}

/// What a placeholder cell turns into
#[derive(Debug, Clone, PartialEq)]
pub enum Substitution {
    /// The cell holds no placeholder
    Unchanged,
    Value(CellValue),
    /// The cell is blanked and a picture anchored on it
    Picture(Picture),
}

/// Resolves placeholders against a band tree
pub struct Placeholders<'a> {
    tree: &'a BandTree,
    formats: &'a FieldFormats,
    inliners: &'a [Box<dyn ContentInliner>],
}

impl<'a> Placeholders<'a> {
    pub fn new(
        tree: &'a BandTree,
        formats: &'a FieldFormats,
        inliners: &'a [Box<dyn ContentInliner>],
    ) -> Self {
        Self {
            tree,
            formats,
            inliners,
        }
    }

    /// Band an alias refers to, seen from the band being rendered.
    ///
    /// Lookup order: the band itself by name, its ancestors, a path from the
    /// root, then the band being rendered.
    pub fn resolve_band(&self, band: BandId, alias: &Alias) -> BandId {
        let Some(path) = alias.band_path.as_deref() else {
            return band;
        };
        if self.tree.name(band) == path {
            return band;
        }
        if let Some(ancestor) = self.tree.ancestors(band).find(|&a| self.tree.name(a) == path) {
            return ancestor;
        }
        self.tree.find_band_by_path(path).unwrap_or(band)
    }

    /// Parameter value an alias resolves to; missing values are `Null`
    pub fn resolve(&self, band: BandId, alias: &Alias) -> (BandId, ParamValue) {
        let owner = self.resolve_band(band, alias);
        let mut value = self.tree.param(owner, &alias.param).cloned();
        if value.is_none() && alias.band_path.is_none() {
            value = self
                .tree
                .ancestors(band)
                .find_map(|a| self.tree.param(a, &alias.param).cloned());
        }
        let value = value.unwrap_or_default();
        match alias.index {
            Some(index) => {
                let text = value_to_text(&value);
                let ch = text.chars().nth(index).map(String::from).unwrap_or_default();
                (owner, ParamValue::Text(ch))
            }
            None => (owner, value),
        }
    }

    /// Replace every placeholder of `text` with its formatted value.
    ///
    /// A malformed placeholder fails the whole text with
    /// [`ReportError::BadAlias`], as it does in a cell of its own.
    pub fn interpolate(&self, band: BandId, text: &str) -> Result<String> {
        self.interpolate_with(band, text, |value| value)
    }

    /// Same as [`Placeholders::interpolate`] for text embedded in XML markup:
    /// substituted values are escaped, the surrounding markup is kept as is.
    pub fn interpolate_xml(&self, band: BandId, xml: &str) -> Result<String> {
        self.interpolate_with(band, xml, |value| escape(value.as_str()).into_owned())
    }

    fn interpolate_with<F>(&self, band: BandId, text: &str, finish: F) -> Result<String>
    where
        F: Fn(String) -> String,
    {
        let mut output = String::with_capacity(text.len());
        let mut last = 0;
        for caps in ALIAS.captures_iter(text) {
            let (Some(whole), Some(inner)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            let alias = Alias::parse(inner.as_str())?;
            let (owner, value) = self.resolve(band, &alias);
            output.push_str(&text[last..whole.start()]);
            output.push_str(&finish(match self.formats.get(self.tree.name(owner), &alias.param) {
                Some(format) if !is_inliner_tag(format) => format_value(&value, format),
                _ => value_to_text(&value),
            }));
            last = whole.end();
        }
        output.push_str(&text[last..]);
        Ok(output)
    }

    /// Substitution for a text cell of a band template
    pub fn substitute(&self, band: BandId, text: &str) -> Result<Substitution> {
        if let Some(inner) = single_alias(text) {
            let alias = Alias::parse(inner)?;
            let (owner, value) = self.resolve(band, &alias);
            let Some(format) = self.formats.get(self.tree.name(owner), &alias.param) else {
                return Ok(Substitution::Value(typed_value(&value)));
            };

            if let Some((inliner, width, height)) = self.find_inliner(format) {
                return Ok(match inliner.inline(&value, width, height)? {
                    Some(picture) => Substitution::Picture(picture),
                    None => Substitution::Value(CellValue::Empty),
                });
            }
            return Ok(Substitution::Value(match value {
                ParamValue::Null => CellValue::Empty,
                value => CellValue::Text(format_value(&value, format)),
            }));
        }

        if ALIAS.is_match(text) {
            Ok(Substitution::Value(CellValue::Text(self.interpolate(band, text)?)))
        } else {
            Ok(Substitution::Unchanged)
        }
    }

    fn find_inliner(&self, format: &str) -> Option<(&dyn ContentInliner, u32, u32)> {
        let caps = INLINER_TAG.captures(format)?;
        let name = caps.name("name")?.as_str();
        let width = caps.name("width")?.as_str().parse().ok()?;
        let height = caps.name("height")?.as_str().parse().ok()?;
        self.inliners
            .iter()
            .find(|i| i.name().eq_ignore_ascii_case(name))
            .map(|i| (i.as_ref(), width, height))
    }
}

fn is_inliner_tag(format: &str) -> bool {
    INLINER_TAG.is_match(format)
}

/// Cell value for a placeholder standing alone in its cell
pub fn typed_value(value: &ParamValue) -> CellValue {
    match value {
        ParamValue::Null | ParamValue::Bytes(_) => CellValue::Empty,
        ParamValue::Bool(b) => CellValue::Bool(*b),
        ParamValue::Integer(i) => CellValue::Number(*i as f64),
        ParamValue::Float(f) => CellValue::Number(*f),
        ParamValue::Text(s) => CellValue::Text(s.clone()),
        ParamValue::Date(d) => CellValue::Number(date_to_serial(*d)),
        ParamValue::DateTime(dt) => CellValue::Number(datetime_to_serial(*dt)),
    }
}

/// Plain text rendering of a value
pub fn value_to_text(value: &ParamValue) -> String {
    match value {
        ParamValue::Null | ParamValue::Bytes(_) => String::new(),
        ParamValue::Bool(b) => b.to_string(),
        ParamValue::Integer(i) => i.to_string(),
        ParamValue::Float(f) => format_float(*f),
        ParamValue::Text(s) => s.clone(),
        ParamValue::Date(d) => d.format("%Y-%m-%d").to_string(),
        ParamValue::DateTime(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
    }
}

/// Apply a field format: strftime patterns for dates, `0.00` / `#,##0` patterns for numbers
pub fn format_value(value: &ParamValue, format: &str) -> String {
    match value {
        ParamValue::Date(d) => d.format(format).to_string(),
        ParamValue::DateTime(dt) => dt.format(format).to_string(),
        ParamValue::Integer(i) => format_number(*i as f64, format),
        ParamValue::Float(f) => format_number(*f, format),
        other => value_to_text(other),
    }
}

/// Number pattern formatting: decimals from the zeros after `.`, `,` groups
/// thousands, a trailing `%` scales by 100. Other patterns print the number.
pub fn format_number(value: f64, pattern: &str) -> String {
    let pattern = pattern.trim();
    if pattern.is_empty() || !pattern.chars().all(|c| "#0.,%".contains(c)) {
        return format_float(value);
    }
    let percent = pattern.ends_with('%');
    let value = if percent { value * 100.0 } else { value };
    let decimals = pattern
        .split_once('.')
        .map(|(_, frac)| frac.chars().filter(|&c| c == '0' || c == '#').count())
        .unwrap_or(0);
    let fixed = format!("{:.*}", decimals, value.abs());
    let (int_part, frac_part) = match fixed.split_once('.') {
        Some((i, f)) => (i.to_string(), Some(f.to_string())),
        None => (fixed, None),
    };
    let int_part = if pattern.contains(',') {
        group_thousands(&int_part)
    } else {
        int_part
    };

    let mut out = String::new();
    if value < 0.0 && (int_part.chars().chain(frac_part.iter().flat_map(|f| f.chars())))
        .any(|c| c != '0' && c != ',')
    {
        out.push('-');
    }
    out.push_str(&int_part);
    if let Some(frac) = frac_part {
        out.push('.');
        out.push_str(&frac);
    }
    if percent {
        out.push('%');
    }
    out
}

fn group_thousands(digits: &str) -> String {
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    grouped
}

/// Print integral floats without a trailing `.0`
pub fn format_float(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        value.to_string()
    }
}

/// Excel 1900 date system serial of a date
pub fn date_to_serial(date: NaiveDate) -> f64 {
    let base = NaiveDate::from_ymd_opt(1899, 12, 30).unwrap_or_default();
    (date - base).num_days() as f64
}

/// Excel 1900 date system serial of a date-time
pub fn datetime_to_serial(dt: NaiveDateTime) -> f64 {
    date_to_serial(dt.date()) + dt.time().num_seconds_from_midnight() as f64 / SECONDS_PER_DAY
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::band::Orientation;

    fn tree() -> (BandTree, BandId, BandId) {
        let mut tree = BandTree::new();
        let root = tree.root();
        tree.set_param(root, "title", "Q1 report");
        let order = tree.add_band(root, "Orders", Orientation::Horizontal);
        tree.set_param(order, "total", 1234.5);
        tree.set_param(order, "code", "XZ-9");
        let item = tree.add_band(order, "Items", Orientation::Horizontal);
        tree.set_param(item, "name", "Apple");
        tree.set_param(item, "qty", 3i64);
        tree.set_param(
            item,
            "shipped",
            NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
        );
        (tree, order, item)
    }

    #[test]
    fn test_alias_parse() {
        let alias = Alias::parse("order.total[0]").unwrap();
        assert_eq!(alias.band_path.as_deref(), Some("order"));
        assert_eq!(alias.param, "total");
        assert_eq!(alias.index, Some(0));

        let alias = Alias::parse("Orders.Items.name").unwrap();
        assert_eq!(alias.band_path.as_deref(), Some("Orders.Items"));
        assert_eq!(Alias::parse("title").unwrap().band_path, None);
        assert!(Alias::parse("band.").is_err());
    }

    #[test]
    fn test_single_alias() {
        assert_eq!(single_alias("${item.name}"), Some("item.name"));
        assert_eq!(single_alias("Name: ${item.name}"), None);
        assert_eq!(single_alias("plain"), None);
        assert_eq!(find_aliases("${a} and ${b.c}").collect::<Vec<_>>(), vec!["a", "b.c"]);
    }

    #[test]
    fn test_resolution_order() {
        let (tree, order, item) = tree();
        let formats = FieldFormats::new();
        let inliners = default_inliners();
        let placeholders = Placeholders::new(&tree, &formats, &inliners);

        let by_name = Alias::parse("Items.name").unwrap();
        assert_eq!(placeholders.resolve_band(item, &by_name), item);
        let ancestor = Alias::parse("Orders.total").unwrap();
        assert_eq!(placeholders.resolve_band(item, &ancestor), order);
        let root = Alias::parse("Root.title").unwrap();
        assert_eq!(placeholders.resolve_band(item, &root), tree.root());
        let fallback = Alias::parse("item.name").unwrap();
        assert_eq!(placeholders.resolve_band(item, &fallback), item);
        assert_eq!(
            placeholders.resolve(item, &fallback).1,
            ParamValue::Text("Apple".into())
        );
    }

    #[test]
    fn test_typed_substitution() {
        let (tree, _, item) = tree();
        let formats = FieldFormats::new();
        let inliners = default_inliners();
        let placeholders = Placeholders::new(&tree, &formats, &inliners);

        assert_eq!(
            placeholders.substitute(item, "${item.qty}").unwrap(),
            Substitution::Value(CellValue::Number(3.0))
        );
        assert_eq!(
            placeholders.substitute(item, "${item.shipped}").unwrap(),
            Substitution::Value(CellValue::Number(45352.0))
        );
        assert_eq!(
            placeholders.substitute(item, "${item.missing}").unwrap(),
            Substitution::Value(CellValue::Empty)
        );
        assert_eq!(
            placeholders
                .substitute(item, "${item.name} x ${item.qty} (${Orders.code[1]})")
                .unwrap(),
            Substitution::Value(CellValue::Text("Apple x 3 (Z)".into()))
        );
        assert_eq!(
            placeholders.substitute(item, "static").unwrap(),
            Substitution::Unchanged
        );
    }

    #[test]
    fn test_field_formats() {
        let (tree, _, item) = tree();
        let mut formats = FieldFormats::new();
        formats.insert("Items.shipped", "%d.%m.%Y");
        formats.insert("total", "#,##0.00");
        let inliners = default_inliners();
        let placeholders = Placeholders::new(&tree, &formats, &inliners);

        assert_eq!(
            placeholders.substitute(item, "${item.shipped}").unwrap(),
            Substitution::Value(CellValue::Text("01.03.2024".into()))
        );
        assert_eq!(
            placeholders.interpolate(item, "Total: ${Orders.total}").unwrap(),
            "Total: 1,234.50"
        );
    }

    #[test]
    fn test_interpolate_xml() {
        let mut tree = BandTree::new();
        let root = tree.root();
        tree.set_param(root, "company", "Smith & Sons");
        let formats = FieldFormats::new();
        let inliners = default_inliners();
        let placeholders = Placeholders::new(&tree, &formats, &inliners);

        assert_eq!(
            placeholders
                .interpolate_xml(root, "<oddHeader>&amp;C${Root.company}</oddHeader>")
                .unwrap(),
            "<oddHeader>&amp;CSmith &amp; Sons</oddHeader>"
        );
    }

    #[test]
    fn test_malformed_placeholder_fails_inside_text() {
        let mut tree = BandTree::new();
        let root = tree.root();
        let band = tree.add_band(root, "Orders", Orientation::Horizontal);
        tree.set_param(band, "number", "A-1");
        let formats = FieldFormats::new();
        let inliners = default_inliners();
        let placeholders = Placeholders::new(&tree, &formats, &inliners);

        assert!(matches!(
            placeholders.substitute(band, "${Orders.number[x]}"),
            Err(ReportError::BadAlias { .. })
        ));
        assert!(matches!(
            placeholders.substitute(band, "Order ${Orders.number[x]} of ${Orders.}"),
            Err(ReportError::BadAlias { .. })
        ));
        assert!(matches!(
            placeholders.interpolate_xml(band, "<oddFooter>${Orders.}</oddFooter>"),
            Err(ReportError::BadAlias { .. })
        ));
        assert_eq!(
            placeholders.interpolate(band, "Order ${Orders.number} of $5").unwrap(),
            "Order A-1 of $5"
        );
    }

    fn encoded(format: ImageFormat) -> Vec<u8> {
        let mut bytes = std::io::Cursor::new(Vec::new());
        image::RgbImage::from_pixel(4, 2, image::Rgb([200, 30, 30]))
            .write_to(&mut bytes, format)
            .unwrap();
        bytes.into_inner()
    }

    #[test]
    fn test_bitmap_inliner() {
        let mut tree = BandTree::new();
        let root = tree.root();
        let band = tree.add_band(root, "Logo", Orientation::Horizontal);
        let png = encoded(ImageFormat::Png);
        tree.set_param(band, "image", ParamValue::Bytes(png.clone()));
        tree.set_param(band, "photo", ParamValue::Bytes(encoded(ImageFormat::Jpeg)));
        tree.set_param(band, "broken", ParamValue::Bytes(vec![1, 2, 3]));
        let mut formats = FieldFormats::new();
        formats.insert("image", "${bitmap:120x40}");
        formats.insert("photo", "${bitmap:60x60}");
        formats.insert("broken", "${bitmap:10x10}");
        let inliners = default_inliners();
        let placeholders = Placeholders::new(&tree, &formats, &inliners);

        match placeholders.substitute(band, "${Logo.image}").unwrap() {
            Substitution::Picture(picture) => {
                assert_eq!(picture.extension, "png");
                assert_eq!((picture.width, picture.height), (120, 40));
                assert_eq!(picture.data, png);
            }
            other => panic!("expected a picture, got {:?}", other),
        }
        match placeholders.substitute(band, "${Logo.photo}").unwrap() {
            Substitution::Picture(picture) => assert_eq!(picture.extension, "jpeg"),
            other => panic!("expected a picture, got {:?}", other),
        }
        assert!(matches!(
            placeholders.substitute(band, "${Logo.broken}"),
            Err(ReportError::Inliner { .. })
        ));
    }

    #[test]
    fn test_truncated_bitmap_is_rejected() {
        let mut tree = BandTree::new();
        let root = tree.root();
        let band = tree.add_band(root, "Logo", Orientation::Horizontal);
        let mut truncated = vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
        truncated.extend_from_slice(&[0; 16]);
        tree.set_param(band, "image", ParamValue::Bytes(truncated));
        let mut formats = FieldFormats::new();
        formats.insert("image", "${bitmap:120x40}");
        let inliners = default_inliners();
        let placeholders = Placeholders::new(&tree, &formats, &inliners);

        match placeholders.substitute(band, "${Logo.image}") {
            Err(ReportError::Inliner { inliner, reason }) => {
                assert_eq!(inliner, "bitmap");
                assert!(reason.starts_with("corrupt png image"), "{}", reason);
            }
            other => panic!("expected an inliner error, got {:?}", other),
        }
    }

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(1234567.891, "#,##0.00"), "1,234,567.89");
        assert_eq!(format_number(-5.4, "0"), "-5");
        assert_eq!(format_number(0.256, "0.0%"), "25.6%");
        assert_eq!(format_number(-0.001, "0.00"), "0.00");
        assert_eq!(format_number(3.0, "General"), "3");
        assert_eq!(format_float(2.5), "2.5");
    }

    #[test]
    fn test_serials() {
        let date = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        assert_eq!(date_to_serial(date), 45292.0);
        let noon = date.and_hms_opt(12, 0, 0).unwrap();
        assert_eq!(datetime_to_serial(noon), 45292.5);
    }
}

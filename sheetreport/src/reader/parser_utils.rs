//! Common parsing utilities shared by the template reader and the writers

use crate::error::Result;
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};

/// Parse a cell reference like "A1" or "$B$7" into (row, col) as 1-based indices
pub fn parse_cell_ref(cell_ref: &str) -> Option<(u32, u32)> {
    let mut col = 0u32;
    let mut row_str = String::new();

    for ch in cell_ref.chars() {
        if ch == '$' {
            continue;
        }
        if ch.is_ascii_alphabetic() {
            if !row_str.is_empty() {
                return None;
            }
            col = col
                .checked_mul(26)?
                .checked_add(ch.to_ascii_uppercase() as u32 - 'A' as u32 + 1)?;
        } else if ch.is_ascii_digit() {
            row_str.push(ch);
        } else {
            return None;
        }
    }

    if row_str.is_empty() || col == 0 {
        return None;
    }

    let row = row_str.parse::<u32>().ok()?;
    if row == 0 {
        return None;
    }

    Some((row, col))
}

/// Parse a cell range like "A1:B2" into (first_row, first_col, last_row, last_col)
///
/// A single cell reference is accepted as a one-cell range.
pub fn parse_cell_range(range: &str) -> Option<(u32, u32, u32, u32)> {
    let parts: Vec<&str> = range.split(':').collect();
    match parts.as_slice() {
        [single] => {
            let (row, col) = parse_cell_ref(single)?;
            Some((row, col, row, col))
        }
        [first, last] => {
            let (first_row, first_col) = parse_cell_ref(first)?;
            let (last_row, last_col) = parse_cell_ref(last)?;
            Some((first_row, first_col, last_row, last_col))
        }
        _ => None,
    }
}

/// Convert a 1-based column number to letters (1 -> A, 27 -> AA)
pub fn column_letters(col: u32) -> String {
    let mut c = col;
    let mut letters = String::new();
    while c > 0 {
        let m = (c - 1) % 26;
        letters.insert(0, (b'A' + m as u8) as char);
        c = (c - m) / 26;
    }
    letters
}

/// Build an "A1" style reference from 1-based row and column
pub fn cell_ref(row: u32, col: u32) -> String {
    format!("{}{}", column_letters(col), row)
}

/// Read text content from an XML node
pub fn read_text_node<R: std::io::BufRead>(reader: &mut Reader<R>) -> Result<String> {
    let mut buf = Vec::new();
    let mut text = String::new();
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Text(e) => text.push_str(e.unescape()?.as_ref()),
            Event::CData(e) => text.push_str(&String::from_utf8_lossy(e.as_ref())),
            Event::End(_) => break,
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(text)
}

/// Look up an attribute value by its (possibly prefixed) key
pub fn attribute(e: &BytesStart, key: &[u8]) -> Result<Option<String>> {
    for attr in e.attributes().flatten() {
        if attr.key.as_ref() == key {
            return Ok(Some(attr.unescape_value()?.to_string()));
        }
    }
    Ok(None)
}

/// True for "1" / "true" boolean attributes
pub fn is_truthy(value: Option<&str>) -> bool {
    matches!(value, Some("1") | Some("true"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_cell_ref() {
        assert_eq!(parse_cell_ref("A1"), Some((1, 1)));
        assert_eq!(parse_cell_ref("B2"), Some((2, 2)));
        assert_eq!(parse_cell_ref("Z26"), Some((26, 26)));
        assert_eq!(parse_cell_ref("AA1"), Some((1, 27)));
        assert_eq!(parse_cell_ref("$AB$10"), Some((10, 28)));
        assert_eq!(parse_cell_ref("A0"), None);
        assert_eq!(parse_cell_ref("1A"), None);
        assert_eq!(parse_cell_ref("A"), None);
    }

    #[test]
    fn test_parse_cell_range() {
        assert_eq!(parse_cell_range("A1:B2"), Some((1, 1, 2, 2)));
        assert_eq!(parse_cell_range("C3:D4"), Some((3, 3, 4, 4)));
        assert_eq!(parse_cell_range("$A$1:$Z$26"), Some((1, 1, 26, 26)));
        assert_eq!(parse_cell_range("C5"), Some((5, 3, 5, 3)));
        assert_eq!(parse_cell_range("A1:B2:C3"), None);
    }

    #[test]
    fn test_column_letters() {
        assert_eq!(column_letters(1), "A");
        assert_eq!(column_letters(26), "Z");
        assert_eq!(column_letters(27), "AA");
        assert_eq!(column_letters(702), "ZZ");
        assert_eq!(column_letters(703), "AAA");
        assert_eq!(cell_ref(10, 28), "AB10");
    }
}

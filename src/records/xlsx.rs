//! Minimal OOXML (`.xlsx`) reader/writer for a single sheet of text cells.
//!
//! Writing produces one worksheet with inline strings. Reading accepts the
//! first worksheet of workbooks written by this module or by spreadsheet
//! applications (shared strings, inline strings, plain values).

use quick_xml::escape::escape;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::io::{Cursor, Read, Write};

const SHEET_PATH: &str = "xl/worksheets/sheet1.xml";
const SHARED_STRINGS_PATH: &str = "xl/sharedStrings.xml";
/// Column `XFD`, the last one a worksheet can hold.
const MAX_COLUMN: usize = 16_383;

const CONTENT_TYPES_XML: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/><Override PartName="/xl/workbook.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml"/><Override PartName="/xl/worksheets/sheet1.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml"/></Types>"#;

const ROOT_RELS_XML: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="xl/workbook.xml"/></Relationships>"#;

const WORKBOOK_XML: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><sheets><sheet name="Sheet1" sheetId="1" r:id="rId1"/></sheets></workbook>"#;

const WORKBOOK_RELS_XML: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet1.xml"/></Relationships>"#;

/// MIME type for `.xlsx` downloads.
pub const XLSX_CONTENT_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

#[derive(Debug, thiserror::Error)]
pub enum XlsxError {
    #[error("xlsx container error: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("xlsx XML error: {0}")]
    Xml(#[from] quick_xml::Error),
    #[error("xlsx I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("shared string index {0} out of range")]
    SharedStringIndex(usize),
    #[error("malformed shared string reference {0:?}")]
    BadSharedStringRef(String),
    #[error("cell reference {0:?} is out of range")]
    BadCellRef(String),
}

/// Serialize rows of text into an `.xlsx` workbook.
pub fn write_workbook(rows: &[Vec<String>]) -> Result<Vec<u8>, XlsxError> {
    let sheet = render_sheet(rows);

    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated);

    for (name, body) in [
        ("[Content_Types].xml", CONTENT_TYPES_XML),
        ("_rels/.rels", ROOT_RELS_XML),
        ("xl/workbook.xml", WORKBOOK_XML),
        ("xl/_rels/workbook.xml.rels", WORKBOOK_RELS_XML),
        (SHEET_PATH, sheet.as_str()),
    ] {
        writer.start_file(name, options)?;
        writer.write_all(body.as_bytes())?;
    }

    Ok(writer.finish()?.into_inner())
}

fn render_sheet(rows: &[Vec<String>]) -> String {
    let mut xml = String::from(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><sheetData>"#,
    );
    for (r, row) in rows.iter().enumerate() {
        let row_num = r + 1;
        xml.push_str(&format!(r#"<row r="{row_num}">"#));
        for (c, value) in row.iter().enumerate() {
            if value.is_empty() {
                continue;
            }
            let cell_ref = format!("{}{row_num}", column_name(c));
            xml.push_str(&format!(
                r#"<c r="{cell_ref}" t="inlineStr"><is><t xml:space="preserve">{}</t></is></c>"#,
                escape(value.as_str())
            ));
        }
        xml.push_str("</row>");
    }
    xml.push_str("</sheetData></worksheet>");
    xml
}

/// Read every row of the first worksheet as text.
pub fn read_first_sheet(bytes: &[u8]) -> Result<Vec<Vec<String>>, XlsxError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))?;

    let shared = match read_entry(&mut archive, SHARED_STRINGS_PATH) {
        Ok(xml) => parse_shared_strings(&xml)?,
        Err(XlsxError::Zip(zip::result::ZipError::FileNotFound)) => Vec::new(),
        Err(e) => return Err(e),
    };
    let sheet = read_entry(&mut archive, SHEET_PATH)?;
    parse_sheet(&sheet, &shared)
}

fn read_entry<R: Read + std::io::Seek>(
    archive: &mut zip::ZipArchive<R>,
    name: &str,
) -> Result<String, XlsxError> {
    let mut entry = archive.by_name(name)?;
    let mut xml = String::new();
    entry.read_to_string(&mut xml)?;
    Ok(xml)
}

/// Each `<si>` is one string; rich-text runs are concatenated.
fn parse_shared_strings(xml: &str) -> Result<Vec<String>, XlsxError> {
    let mut reader = Reader::from_str(xml);
    let mut strings = Vec::new();
    let mut current = String::new();
    let mut in_text = false;
    // Phonetic hints (`<rPh>`) carry their own `<t>`; skip them.
    let mut in_phonetic = false;

    loop {
        match reader.read_event()? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"si" => current.clear(),
                b"rPh" => in_phonetic = true,
                b"t" if !in_phonetic => in_text = true,
                _ => {}
            },
            Event::Empty(e) if e.local_name().as_ref() == b"si" => strings.push(String::new()),
            Event::Text(t) if in_text => current.push_str(&t.unescape()?),
            Event::End(e) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"rPh" => in_phonetic = false,
                b"si" => strings.push(std::mem::take(&mut current)),
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(strings)
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum CellKind {
    Shared,
    Inline,
    Bool,
    Plain,
}

struct PendingCell {
    column: usize,
    kind: CellKind,
    text: String,
}

fn parse_sheet(xml: &str, shared: &[String]) -> Result<Vec<Vec<String>>, XlsxError> {
    let mut reader = Reader::from_str(xml);
    let mut rows = Vec::new();
    let mut row: Vec<String> = Vec::new();
    let mut next_column = 0usize;
    let mut cell: Option<PendingCell> = None;
    let mut in_value = false;

    loop {
        match reader.read_event()? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"row" => {
                    row = Vec::new();
                    next_column = 0;
                }
                b"c" => {
                    let (column, kind) = cell_attributes(&e, next_column)?;
                    cell = Some(PendingCell {
                        column,
                        kind,
                        text: String::new(),
                    });
                }
                b"v" | b"t" => in_value = cell.is_some(),
                _ => {}
            },
            Event::Empty(e) => match e.local_name().as_ref() {
                b"c" => next_column = cell_attributes(&e, next_column)?.0 + 1,
                b"row" => rows.push(Vec::new()),
                _ => {}
            },
            Event::Text(t) if in_value => {
                if let Some(pending) = cell.as_mut() {
                    pending.text.push_str(&t.unescape()?);
                }
            }
            Event::End(e) => match e.local_name().as_ref() {
                b"v" | b"t" => in_value = false,
                b"c" => {
                    if let Some(pending) = cell.take() {
                        let value = resolve_cell(&pending, shared)?;
                        place(&mut row, pending.column, value);
                        next_column = pending.column + 1;
                    }
                }
                b"row" => rows.push(std::mem::take(&mut row)),
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(rows)
}

fn cell_attributes(
    e: &BytesStart<'_>,
    fallback_column: usize,
) -> Result<(usize, CellKind), XlsxError> {
    let mut column = fallback_column;
    let mut kind = CellKind::Plain;
    for attr in e.attributes().flatten() {
        match attr.key.local_name().as_ref() {
            b"r" => {
                let cell_ref = String::from_utf8_lossy(&attr.value);
                if cell_ref.starts_with(|c: char| c.is_ascii_alphabetic()) {
                    column = column_index(&cell_ref)
                        .ok_or_else(|| XlsxError::BadCellRef(cell_ref.into_owned()))?;
                }
            }
            b"t" => {
                kind = match attr.value.as_ref() {
                    b"s" => CellKind::Shared,
                    b"inlineStr" => CellKind::Inline,
                    b"b" => CellKind::Bool,
                    _ => CellKind::Plain,
                };
            }
            _ => {}
        }
    }
    if column > MAX_COLUMN {
        return Err(XlsxError::BadCellRef(format!("column {}", column + 1)));
    }
    Ok((column, kind))
}

fn resolve_cell(cell: &PendingCell, shared: &[String]) -> Result<String, XlsxError> {
    Ok(match cell.kind {
        CellKind::Shared => {
            let idx: usize = cell
                .text
                .trim()
                .parse()
                .map_err(|_| XlsxError::BadSharedStringRef(cell.text.clone()))?;
            shared
                .get(idx)
                .cloned()
                .ok_or(XlsxError::SharedStringIndex(idx))?
        }
        CellKind::Bool => match cell.text.trim() {
            "1" => "TRUE".into(),
            _ => "FALSE".into(),
        },
        CellKind::Inline | CellKind::Plain => cell.text.clone(),
    })
}

fn place(row: &mut Vec<String>, column: usize, value: String) {
    if row.len() <= column {
        row.resize(column + 1, String::new());
    }
    row[column] = value;
}

/// `0 → "A"`, `25 → "Z"`, `26 → "AA"`.
fn column_name(mut index: usize) -> String {
    let mut name = Vec::new();
    loop {
        name.push(b'A' + (index % 26) as u8);
        if index < 26 {
            break;
        }
        index = index / 26 - 1;
    }
    name.reverse();
    String::from_utf8_lossy(&name).into_owned()
}

/// Column index from a cell reference such as `"AB12"`. `None` when there
/// are no column letters or the column lies past `XFD`.
fn column_index(cell_ref: &str) -> Option<usize> {
    let mut index = 0usize;
    for letter in cell_ref.bytes().take_while(u8::is_ascii_alphabetic) {
        let digit = usize::from(letter.to_ascii_uppercase() - b'A' + 1);
        index = index.checked_mul(26)?.checked_add(digit)?;
        if index > MAX_COLUMN + 1 {
            return None;
        }
    }
    index.checked_sub(1)
}

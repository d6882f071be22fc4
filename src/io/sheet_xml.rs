//! Reads the worksheet presentation details calamine does not surface: row
//! heights and hidden flags, column widths and outline state, and cell
//! hyperlinks.

use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{BufReader, Read, Seek};
use std::path::Path;

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use tracing::debug;
use zip::ZipArchive;

use crate::error::Result;
use crate::model::{CellLink, CellRef, ColMeta, RowMeta, Sheet};

const WORKBOOK_PART: &str = "xl/workbook.xml";
const WORKBOOK_RELS_PART: &str = "xl/_rels/workbook.xml.rels";
const MAX_LINK_AREA: u64 = 10_000;

/// Row, column and hyperlink metadata of one worksheet part.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SheetLayout {
    pub rows: BTreeMap<u32, RowMeta>,
    pub cols: BTreeMap<u32, ColMeta>,
    pub links: BTreeMap<CellRef, CellLink>,
}

impl SheetLayout {
    /// Copies the layout onto a sheet, keeping links already present.
    pub fn apply_to(self, sheet: &mut Sheet) {
        sheet.rows.extend(self.rows);
        sheet.cols.extend(self.cols);
        for (cell, link) in self.links {
            sheet.links.entry(cell).or_insert(link);
        }
    }
}

/// Direct access to the parts of an `.xlsx` package.
pub struct PackageReader<R> {
    archive: ZipArchive<R>,
    sheet_parts: HashMap<String, String>,
}

impl PackageReader<BufReader<File>> {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        Self::new(BufReader::new(file))
    }
}

impl<R: Read + Seek> PackageReader<R> {
    pub fn new(reader: R) -> Result<Self> {
        let mut archive = ZipArchive::new(reader)?;
        let workbook_xml = read_part(&mut archive, WORKBOOK_PART)?.unwrap_or_default();
        let rels_xml = read_part(&mut archive, WORKBOOK_RELS_PART)?.unwrap_or_default();
        let rels = parse_relationships(&rels_xml)?;

        let mut sheet_parts = HashMap::new();
        for (name, rid) in parse_workbook_sheets(&workbook_xml)? {
            if let Some(target) = rels.get(&rid) {
                sheet_parts.insert(name, resolve_target(WORKBOOK_PART, target));
            }
        }
        debug!(sheets = sheet_parts.len(), "worksheet parts resolved");

        Ok(Self {
            archive,
            sheet_parts,
        })
    }

    /// Layout of the named sheet; empty when the sheet has no part.
    pub fn sheet_layout(&mut self, sheet_name: &str) -> Result<SheetLayout> {
        let Some(part) = self.sheet_parts.get(sheet_name).cloned() else {
            return Ok(SheetLayout::default());
        };
        let Some(sheet_xml) = read_part(&mut self.archive, &part)? else {
            return Ok(SheetLayout::default());
        };
        let rels_xml = read_part(&mut self.archive, &rels_part_for(&part))?;
        parse_sheet_layout(&sheet_xml, rels_xml.as_deref())
    }
}

fn read_part<R: Read + Seek>(archive: &mut ZipArchive<R>, name: &str) -> Result<Option<String>> {
    let mut file = match archive.by_name(name) {
        Ok(file) => file,
        Err(zip::result::ZipError::FileNotFound) => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    let mut contents = String::new();
    file.read_to_string(&mut contents)?;
    Ok(Some(contents))
}

fn rels_part_for(part: &str) -> String {
    match part.rsplit_once('/') {
        Some((dir, file)) => format!("{dir}/_rels/{file}.rels"),
        None => format!("_rels/{part}.rels"),
    }
}

/// Resolves a relationship target against the part that declares it.
pub fn resolve_target(source_part: &str, target: &str) -> String {
    if let Some(absolute) = target.strip_prefix('/') {
        return normalize(absolute);
    }
    let base = source_part.rsplit_once('/').map_or("", |(dir, _)| dir);
    normalize(&format!("{base}/{target}"))
}

fn normalize(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    parts.join("/")
}

/// `Id → Target` pairs of a relationships part.
pub fn parse_relationships(xml: &str) -> Result<HashMap<String, String>> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut rels = HashMap::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Eof => break,
            Event::Empty(e) | Event::Start(e) if e.local_name().as_ref() == b"Relationship" => {
                let attrs = attributes(&e)?;
                if let (Some(id), Some(target)) = (attrs.get("Id"), attrs.get("Target")) {
                    rels.insert(id.clone(), target.clone());
                }
            }
            _ => {}
        }
        buf.clear();
    }

    Ok(rels)
}

/// `(sheet name, relationship id)` pairs in workbook order.
pub fn parse_workbook_sheets(xml: &str) -> Result<Vec<(String, String)>> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut sheets = Vec::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Eof => break,
            Event::Empty(e) | Event::Start(e) if e.local_name().as_ref() == b"sheet" => {
                let attrs = attributes(&e)?;
                if let (Some(name), Some(rid)) = (attrs.get("name"), attrs.get("id")) {
                    sheets.push((name.clone(), rid.clone()));
                }
            }
            _ => {}
        }
        buf.clear();
    }

    Ok(sheets)
}

/// Parses `<row>`, `<col>` and `<hyperlink>` elements of a worksheet part.
/// External hyperlink targets are resolved through the sheet's relationships;
/// in-workbook locations are kept as `#location`.
pub fn parse_sheet_layout(sheet_xml: &str, rels_xml: Option<&str>) -> Result<SheetLayout> {
    let rels = rels_xml.map(parse_relationships).transpose()?.unwrap_or_default();
    let mut reader = Reader::from_str(sheet_xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut layout = SheetLayout::default();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Eof => break,
            Event::Empty(e) | Event::Start(e) => match e.local_name().as_ref() {
                b"row" => read_row(&e, &mut layout)?,
                b"col" => read_col(&e, &mut layout)?,
                b"hyperlink" => read_hyperlink(&e, &rels, &mut layout)?,
                _ => {}
            },
            _ => {}
        }
        buf.clear();
    }

    Ok(layout)
}

fn read_row(e: &BytesStart<'_>, layout: &mut SheetLayout) -> Result<()> {
    let attrs = attributes(e)?;
    let Some(row) = attrs.get("r").and_then(|r| r.parse::<u32>().ok()) else {
        return Ok(());
    };
    let meta = RowMeta {
        height: attrs.get("ht").and_then(|ht| ht.parse().ok()),
        hidden: attrs.get("hidden").is_some_and(|v| flag(v)),
    };
    if meta != RowMeta::default() {
        layout.rows.insert(row, meta);
    }
    Ok(())
}

fn read_col(e: &BytesStart<'_>, layout: &mut SheetLayout) -> Result<()> {
    let attrs = attributes(e)?;
    let min = attrs.get("min").and_then(|v| v.parse::<u32>().ok());
    let max = attrs.get("max").and_then(|v| v.parse::<u32>().ok());
    let (Some(min), Some(max)) = (min, max.or(min)) else {
        return Ok(());
    };
    let meta = ColMeta {
        width: attrs.get("width").and_then(|v| v.parse().ok()),
        hidden: attrs.get("hidden").is_some_and(|v| flag(v)),
        outline_level: attrs.get("outlineLevel").and_then(|v| v.parse().ok()).unwrap_or(0),
        collapsed: attrs.get("collapsed").is_some_and(|v| flag(v)),
    };
    // Excel writes a trailing catch-all `<col min=".." max="16384">`.
    for col in min..=max.min(min.saturating_add(1024)) {
        layout.cols.insert(col, meta);
    }
    Ok(())
}

fn read_hyperlink(
    e: &BytesStart<'_>,
    rels: &HashMap<String, String>,
    layout: &mut SheetLayout,
) -> Result<()> {
    let attrs = attributes(e)?;
    let Some((first, last)) = attrs.get("ref").and_then(|r| parse_range(r)) else {
        return Ok(());
    };

    let external = attrs.get("id").and_then(|rid| rels.get(rid)).cloned();
    let location = attrs.get("location").filter(|l| !l.is_empty());
    let target = match (external, location) {
        (Some(url), Some(location)) => format!("{url}#{location}"),
        (Some(url), None) => url,
        (None, Some(location)) => format!("#{location}"),
        (None, None) => return Ok(()),
    };
    let mut link = CellLink::new(target);
    if let Some(display) = attrs.get("display").filter(|d| !d.trim().is_empty()) {
        link = link.with_display(display.clone());
    }

    let area = u64::from(last.0 - first.0 + 1) * u64::from(last.1 - first.1 + 1);
    if area > MAX_LINK_AREA {
        layout.links.insert(first, link);
        return Ok(());
    }
    for row in first.0..=last.0 {
        for col in first.1..=last.1 {
            layout.links.insert((row, col), link.clone());
        }
    }
    Ok(())
}

/// Attribute values keyed by local name (`r:id` becomes `id`).
fn attributes(e: &BytesStart<'_>) -> Result<HashMap<String, String>> {
    let mut values = HashMap::new();
    for attr in e.attributes() {
        let attr = attr?;
        let key = String::from_utf8_lossy(attr.key.local_name().as_ref()).into_owned();
        values.insert(key, attr.unescape_value()?.into_owned());
    }
    Ok(values)
}

fn flag(value: &str) -> bool {
    matches!(value, "1" | "true")
}

/// Parses an A1 reference such as `$B$12` into a one-based `(row, col)`.
pub fn parse_cell_ref(reference: &str) -> Option<CellRef> {
    let reference = reference.replace('$', "");
    let split = reference.find(|ch: char| ch.is_ascii_digit())?;
    let (letters, digits) = reference.split_at(split);
    if letters.is_empty() || !letters.chars().all(|ch| ch.is_ascii_alphabetic()) {
        return None;
    }
    let col = letters
        .chars()
        .try_fold(0u32, |acc, ch| {
            acc.checked_mul(26)?
                .checked_add(u32::from(ch.to_ascii_uppercase() as u8 - b'A' + 1))
        })?;
    let row = digits.parse::<u32>().ok().filter(|row| *row > 0)?;
    Some((row, col))
}

fn parse_range(reference: &str) -> Option<(CellRef, CellRef)> {
    match reference.split_once(':') {
        Some((start, end)) => {
            let (start, end) = (parse_cell_ref(start)?, parse_cell_ref(end)?);
            Some((
                (start.0.min(end.0), start.1.min(end.1)),
                (start.0.max(end.0), start.1.max(end.1)),
            ))
        }
        None => {
            let cell = parse_cell_ref(reference)?;
            Some((cell, cell))
        }
    }
}

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{IngestError, Result};

/// One-based `(row, column)` coordinate of a cell.
pub type CellRef = (u32, u32);

/// Represents the value stored in a single cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum CellValue {
    /// No value.
    Empty,
    /// Plain string literal.
    Text(String),
    /// Numeric literal (Excel stores integers as floats too).
    Number(f64),
    /// Boolean literal.
    Bool(bool),
    /// Formula text including the leading `=`.
    Formula(String),
    /// Cached error value such as `#REF!`.
    Error(String),
}

impl CellValue {
    /// True for empty cells and whitespace-only strings.
    pub fn is_blank(&self) -> bool {
        match self {
            CellValue::Empty => true,
            CellValue::Text(value) => value.trim().is_empty(),
            _ => false,
        }
    }

    /// Text shown for the value, with integral numbers rendered without a
    /// fractional part.
    pub fn display(&self) -> String {
        match self {
            CellValue::Empty => String::new(),
            CellValue::Text(value) => value.trim().to_string(),
            CellValue::Number(value) => format_number(*value),
            CellValue::Bool(true) => "TRUE".to_string(),
            CellValue::Bool(false) => "FALSE".to_string(),
            CellValue::Formula(value) => value.clone(),
            CellValue::Error(value) => value.clone(),
        }
    }

    /// Returns the formula text when the value is a formula.
    pub fn as_formula(&self) -> Option<&str> {
        match self {
            CellValue::Formula(value) => Some(value),
            _ => None,
        }
    }
}

fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        value.to_string()
    }
}

/// Rectangular span of merged cells, inclusive on both ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeRange {
    pub first_row: u32,
    pub first_col: u32,
    pub last_row: u32,
    pub last_col: u32,
}

impl MergeRange {
    pub fn new(first_row: u32, first_col: u32, last_row: u32, last_col: u32) -> Self {
        Self {
            first_row: first_row.min(last_row),
            first_col: first_col.min(last_col),
            last_row: first_row.max(last_row),
            last_col: first_col.max(last_col),
        }
    }

    pub fn contains(&self, row: u32, col: u32) -> bool {
        (self.first_row..=self.last_row).contains(&row)
            && (self.first_col..=self.last_col).contains(&col)
    }

    pub fn top_left(&self) -> CellRef {
        (self.first_row, self.first_col)
    }

    /// True when the range spans more than one row.
    pub fn spans_down(&self) -> bool {
        self.last_row > self.first_row
    }
}

/// Row-level presentation metadata.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RowMeta {
    pub height: Option<f64>,
    pub hidden: bool,
}

/// Column-level presentation metadata.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ColMeta {
    pub width: Option<f64>,
    pub hidden: bool,
    pub outline_level: u8,
    pub collapsed: bool,
}

/// Hyperlink attached to a cell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellLink {
    /// External URL/path, or `#Sheet!A1` for in-workbook locations.
    pub target: String,
    /// Display text recorded with the link, when present.
    pub display: Option<String>,
}

impl CellLink {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            display: None,
        }
    }

    pub fn with_display(mut self, display: impl Into<String>) -> Self {
        self.display = Some(display.into());
        self
    }

    /// True for links pointing at a location inside the workbook.
    pub fn is_internal(&self) -> bool {
        self.target.trim_start().starts_with('#')
    }
}

/// A single worksheet: a literal cell grid, an optional computed-value grid,
/// merges, row/column metadata and hyperlinks.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Sheet {
    pub name: String,
    /// Hidden or very-hidden sheets are skipped by the pipeline.
    pub hidden: bool,
    /// Literal view: constants plus formula text.
    pub cells: BTreeMap<CellRef, CellValue>,
    /// Computed view: cached results, when the source provides them.
    pub computed: Option<BTreeMap<CellRef, CellValue>>,
    pub merges: Vec<MergeRange>,
    pub rows: BTreeMap<u32, RowMeta>,
    pub cols: BTreeMap<u32, ColMeta>,
    pub links: BTreeMap<CellRef, CellLink>,
}

impl Sheet {
    /// Creates an empty, visible sheet.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Stores a literal value; blank values remove the cell.
    pub fn set(&mut self, row: u32, col: u32, value: CellValue) -> &mut Self {
        if value.is_blank() {
            self.cells.remove(&(row, col));
        } else {
            self.cells.insert((row, col), value);
        }
        self
    }

    /// Shorthand for storing a text literal.
    pub fn set_text(&mut self, row: u32, col: u32, value: impl Into<String>) -> &mut Self {
        self.set(row, col, CellValue::Text(value.into()))
    }

    /// Stores a cached (computed) value, creating the computed view on first use.
    pub fn set_computed(&mut self, row: u32, col: u32, value: CellValue) -> &mut Self {
        let view = self.computed.get_or_insert_with(BTreeMap::new);
        if value.is_blank() {
            view.remove(&(row, col));
        } else {
            view.insert((row, col), value);
        }
        self
    }

    pub fn merge(&mut self, range: MergeRange) -> &mut Self {
        self.merges.push(range);
        self
    }

    pub fn hide_row(&mut self, row: u32) -> &mut Self {
        self.rows.entry(row).or_default().hidden = true;
        self
    }

    pub fn set_row_height(&mut self, row: u32, height: f64) -> &mut Self {
        self.rows.entry(row).or_default().height = Some(height);
        self
    }

    pub fn set_col_meta(&mut self, col: u32, meta: ColMeta) -> &mut Self {
        self.cols.insert(col, meta);
        self
    }

    pub fn set_link(&mut self, row: u32, col: u32, link: CellLink) -> &mut Self {
        self.links.insert((row, col), link);
        self
    }

    /// Literal value at a cell, ignoring merges.
    pub fn value(&self, row: u32, col: u32) -> Option<&CellValue> {
        self.cells.get(&(row, col)).filter(|value| !value.is_blank())
    }

    /// Computed value at a cell, ignoring merges.
    pub fn computed_value(&self, row: u32, col: u32) -> Option<&CellValue> {
        self.computed
            .as_ref()
            .and_then(|view| view.get(&(row, col)))
            .filter(|value| !value.is_blank())
    }

    /// Last row holding a value, merge or link.
    pub fn max_row(&self) -> u32 {
        let cells = self.cells.keys().map(|(row, _)| *row);
        let computed = self.computed.iter().flat_map(|v| v.keys().map(|(row, _)| *row));
        let merges = self.merges.iter().map(|m| m.last_row);
        let links = self.links.keys().map(|(row, _)| *row);
        cells.chain(computed).chain(merges).chain(links).max().unwrap_or(0)
    }

    /// Last column holding a value, merge or link.
    pub fn max_col(&self) -> u32 {
        let cells = self.cells.keys().map(|(_, col)| *col);
        let computed = self.computed.iter().flat_map(|v| v.keys().map(|(_, col)| *col));
        let merges = self.merges.iter().map(|m| m.last_col);
        let links = self.links.keys().map(|(_, col)| *col);
        cells.chain(computed).chain(merges).chain(links).max().unwrap_or(0)
    }
}

/// Ordered collection of sheets held in memory.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Workbook {
    pub sheets: Vec<Sheet>,
}

impl Workbook {
    pub fn new(sheets: Vec<Sheet>) -> Self {
        Self { sheets }
    }
}

/// An open workbook handle. Sheets are listed up front and materialised one
/// at a time, in order.
pub trait WorkbookSource {
    fn sheet_names(&self) -> Vec<String>;

    fn load_sheet(&mut self, name: &str) -> Result<Sheet>;
}

impl WorkbookSource for Workbook {
    fn sheet_names(&self) -> Vec<String> {
        self.sheets.iter().map(|sheet| sheet.name.clone()).collect()
    }

    fn load_sheet(&mut self, name: &str) -> Result<Sheet> {
        self.sheets
            .iter()
            .find(|sheet| sheet.name == name)
            .cloned()
            .ok_or_else(|| IngestError::MissingSheet(name.to_string()))
    }
}

/// The variant a sheet is classified as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SheetType {
    TableOfContents,
    RevisionManaged,
    VersionManaged,
    Attachment,
    History,
    Software,
    Unknown,
}

impl SheetType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SheetType::TableOfContents => "table_of_contents",
            SheetType::RevisionManaged => "revision_managed",
            SheetType::VersionManaged => "version_managed",
            SheetType::Attachment => "attachment",
            SheetType::History => "history",
            SheetType::Software => "software",
            SheetType::Unknown => "unknown",
        }
    }

    /// Whether records of this sheet type carry a document key and revision.
    pub fn tracks_revisions(&self) -> bool {
        matches!(self, SheetType::RevisionManaged | SheetType::VersionManaged)
    }
}

impl fmt::Display for SheetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A column that survived header inference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderColumn {
    pub col: u32,
    pub name: String,
}

/// Result of header inference for one sheet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderSpec {
    /// Rows composing the header, ascending.
    pub header_rows: Vec<u32>,
    /// Visible columns with their composite names, left to right.
    pub columns: Vec<HeaderColumn>,
    /// Rightmost column considered part of the table.
    pub max_col: u32,
    /// First row holding data.
    pub data_start_row: u32,
}

impl HeaderSpec {
    pub fn names(&self) -> Vec<String> {
        self.columns.iter().map(|column| column.name.clone()).collect()
    }

    pub fn last_header_row(&self) -> u32 {
        self.header_rows.last().copied().unwrap_or(1)
    }
}

/// One logical record, possibly assembled from several physical rows.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Earliest hyperlink found in the record's rows.
    pub hyperlink: Option<String>,
    /// Every distinct hyperlink in the record's rows, in discovery order.
    pub hyperlinks: Vec<String>,
    /// Composite header → cell text.
    pub metadata: BTreeMap<String, String>,
    /// Composite header → hyperlink display text, for cells carrying a link.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub link_labels: BTreeMap<String, String>,
    /// Origin rows, ascending.
    pub rows: Vec<u32>,
    pub sheet_name: String,
    pub document_key: Option<String>,
    pub revision: Option<String>,
}

impl Record {
    pub fn new(sheet_name: impl Into<String>) -> Self {
        Self {
            sheet_name: sheet_name.into(),
            ..Self::default()
        }
    }

    /// First origin row.
    pub fn row_number(&self) -> u32 {
        self.rows.first().copied().unwrap_or(0)
    }

    pub fn has_values(&self) -> bool {
        self.metadata.values().any(|value| !value.trim().is_empty())
    }

    /// Merges one cell's text: the first non-empty value wins and later
    /// distinct values are appended with `" / "`.
    pub fn merge_value(&mut self, header: &str, value: &str) -> bool {
        let value = value.trim();
        if value.is_empty() {
            return false;
        }
        match self.metadata.get_mut(header) {
            Some(existing) if existing.is_empty() => {
                *existing = value.to_string();
                true
            }
            Some(existing) => {
                if existing.split(" / ").any(|part| part == value) {
                    false
                } else {
                    existing.push_str(" / ");
                    existing.push_str(value);
                    true
                }
            }
            None => {
                self.metadata.insert(header.to_string(), value.to_string());
                true
            }
        }
    }

    /// Adds a hyperlink if not yet present; the earliest becomes primary.
    pub fn add_link(&mut self, target: &str) -> bool {
        if target.is_empty() || self.hyperlinks.iter().any(|link| link == target) {
            return false;
        }
        self.hyperlinks.push(target.to_string());
        if self.hyperlink.is_none() {
            self.hyperlink = Some(target.to_string());
        }
        true
    }

    pub fn add_row(&mut self, row: u32) {
        if let Err(position) = self.rows.binary_search(&row) {
            self.rows.insert(position, row);
        }
    }
}

//! Merge-aware cell access and row/column visibility for one sheet.
//!
//! Visibility and the merge lookup table are built lazily, once per
//! [`SheetView`]; a new sheet handle gets a new view and therefore a fresh
//! cache.

use std::cell::OnceCell;
use std::collections::HashMap;

use crate::model::{CellLink, CellValue, ColMeta, MergeRange, Sheet};

/// Column widths at or below this are treated as hidden.
const NEAR_ZERO_WIDTH: f64 = 0.1;

/// Sorted, non-overlapping inclusive index spans.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HiddenSpans {
    spans: Vec<(u32, u32)>,
}

impl HiddenSpans {
    /// Builds spans from ascending indices.
    pub fn from_sorted(indices: impl IntoIterator<Item = u32>) -> Self {
        let mut spans: Vec<(u32, u32)> = Vec::new();
        for index in indices {
            match spans.last_mut() {
                Some((_, end)) if *end + 1 == index => *end = index,
                Some((_, end)) if *end >= index => {}
                _ => spans.push((index, index)),
            }
        }
        Self { spans }
    }

    pub fn contains(&self, index: u32) -> bool {
        let position = self.spans.partition_point(|(start, _)| *start <= index);
        position > 0 && self.spans[position - 1].1 >= index
    }

    pub fn spans(&self) -> &[(u32, u32)] {
        &self.spans
    }
}

/// Lazily-built per-sheet lookup tables.
#[derive(Debug, Default)]
struct SheetCache {
    hidden_rows: OnceCell<HiddenSpans>,
    hidden_cols: OnceCell<HiddenSpans>,
    merges_by_row: OnceCell<HashMap<u32, Vec<usize>>>,
}

/// Read-only accessor over a [`Sheet`] implementing the effective-value and
/// visibility rules used by every inference pass.
#[derive(Debug)]
pub struct SheetView<'a> {
    sheet: &'a Sheet,
    cache: SheetCache,
}

impl<'a> SheetView<'a> {
    pub fn new(sheet: &'a Sheet) -> Self {
        Self {
            sheet,
            cache: SheetCache::default(),
        }
    }

    pub fn sheet(&self) -> &'a Sheet {
        self.sheet
    }

    pub fn name(&self) -> &'a str {
        &self.sheet.name
    }

    pub fn max_row(&self) -> u32 {
        self.sheet.max_row()
    }

    pub fn max_col(&self) -> u32 {
        self.sheet.max_col()
    }

    /// Merge range covering a cell, if any.
    pub fn merge_at(&self, row: u32, col: u32) -> Option<&'a MergeRange> {
        let index = self.cache.merges_by_row.get_or_init(|| {
            let mut index: HashMap<u32, Vec<usize>> = HashMap::new();
            for (position, range) in self.sheet.merges.iter().enumerate() {
                for row in range.first_row..=range.last_row {
                    index.entry(row).or_default().push(position);
                }
            }
            index
        });
        index
            .get(&row)?
            .iter()
            .map(|position| &self.sheet.merges[*position])
            .find(|range| range.contains(row, col))
    }

    /// Literal effective value. A non-blank cell wins even inside a merge,
    /// which lets individual header cells override their merge's top-left.
    pub fn effective(&self, row: u32, col: u32) -> Option<&'a CellValue> {
        if let Some(value) = self.sheet.value(row, col) {
            return Some(value);
        }
        let (top, left) = self.merge_at(row, col)?.top_left();
        self.sheet.value(top, left)
    }

    /// Same rule as [`effective`](Self::effective) against the computed view,
    /// falling back to the literal view where no cached result exists.
    pub fn effective_computed(&self, row: u32, col: u32) -> Option<&'a CellValue> {
        if let Some(value) = self.direct_computed(row, col) {
            return Some(value);
        }
        let (top, left) = self.merge_at(row, col)?.top_left();
        self.direct_computed(top, left)
    }

    fn direct_computed(&self, row: u32, col: u32) -> Option<&'a CellValue> {
        self.sheet
            .computed_value(row, col)
            .or_else(|| self.sheet.value(row, col))
    }

    /// Display text of a cell: the computed value when cached, otherwise the
    /// label of a `HYPERLINK` formula or the literal text.
    pub fn text(&self, row: u32, col: u32) -> String {
        match self.effective_computed(row, col) {
            Some(CellValue::Formula(formula)) => match parse_hyperlink_formula(formula) {
                Some(link) => link.display.unwrap_or(link.target),
                None => formula.clone(),
            },
            Some(value) => value.display(),
            None => String::new(),
        }
    }

    /// Hyperlink at a cell: a direct link, then a `HYPERLINK` formula, each
    /// resolved through the merge top-left when the cell itself has none.
    /// Links to locations inside the workbook are not reported.
    pub fn link_at(&self, row: u32, col: u32) -> Option<CellLink> {
        if let Some(link) = self.direct_link(row, col) {
            return Some(link);
        }
        let (top, left) = self.merge_at(row, col)?.top_left();
        if (top, left) == (row, col) {
            return None;
        }
        self.direct_link(top, left)
    }

    fn direct_link(&self, row: u32, col: u32) -> Option<CellLink> {
        if let Some(link) = self.sheet.links.get(&(row, col)) {
            if !link.target.trim().is_empty() && !link.is_internal() {
                return Some(link.clone());
            }
        }
        self.sheet
            .value(row, col)
            .and_then(CellValue::as_formula)
            .and_then(parse_hyperlink_formula)
            .filter(|link| !link.is_internal())
    }

    pub fn is_row_hidden(&self, row: u32) -> bool {
        self.hidden_rows().contains(row)
    }

    pub fn is_col_hidden(&self, col: u32) -> bool {
        self.hidden_cols().contains(col)
    }

    pub fn hidden_rows(&self) -> &HiddenSpans {
        self.cache.hidden_rows.get_or_init(|| {
            HiddenSpans::from_sorted(
                self.sheet
                    .rows
                    .iter()
                    .filter(|(_, meta)| meta.hidden || meta.height.is_some_and(|h| h <= 0.0))
                    .map(|(row, _)| *row),
            )
        })
    }

    pub fn hidden_cols(&self) -> &HiddenSpans {
        self.cache.hidden_cols.get_or_init(|| {
            let limit = self
                .sheet
                .max_col()
                .max(self.sheet.cols.keys().next_back().copied().unwrap_or(0));
            HiddenSpans::from_sorted((1..=limit).filter(|col| column_hidden(self.sheet, *col, limit)))
        })
    }

    /// Visible columns in `1..=max_col`.
    pub fn visible_cols(&self, max_col: u32) -> impl Iterator<Item = u32> + '_ {
        (1..=max_col).filter(move |col| !self.is_col_hidden(*col))
    }

    /// Number of visible columns with a non-empty effective value.
    pub fn non_empty_count(&self, row: u32, max_col: u32) -> usize {
        self.visible_cols(max_col)
            .filter(|col| self.effective(row, *col).is_some())
            .count()
    }

    /// True when no visible cell in the row holds a literal value or a link.
    pub fn row_is_empty(&self, row: u32, max_col: u32) -> bool {
        !self.visible_cols(max_col).any(|col| {
            self.sheet.value(row, col).is_some() || self.sheet.links.contains_key(&(row, col))
        })
    }

    /// True when a merge covering the row continues below it.
    pub fn has_downward_merge(&self, row: u32, max_col: u32) -> bool {
        self.sheet
            .merges
            .iter()
            .any(|range| range.first_row <= row && row < range.last_row && range.first_col <= max_col)
    }

    /// Next row after `row` that is not hidden, bounded by the sheet's extent.
    pub fn next_visible_row(&self, row: u32) -> Option<u32> {
        (row + 1..=self.max_row()).find(|candidate| !self.is_row_hidden(*candidate))
    }
}

fn column_hidden(sheet: &Sheet, col: u32, limit: u32) -> bool {
    match sheet.cols.get(&col) {
        Some(meta) => {
            meta.hidden
                || meta.width.is_some_and(|width| width <= NEAR_ZERO_WIDTH)
                || (meta.outline_level > 0 && group_collapsed(sheet, col, meta.outline_level, limit))
        }
        None => {
            // Writers sometimes emit only the edges of an outline group. A gap
            // belongs to the group on its left only while the next described
            // column still continues or closes that group.
            let Some((_, left)) = sheet.cols.range(..col).next_back() else {
                return false;
            };
            if left.outline_level == 0 {
                return false;
            }
            let bounded = sheet.cols.range(col + 1..).next().is_some_and(|(_, right)| {
                right.outline_level >= left.outline_level || right.collapsed
            });
            bounded && (left.hidden || group_collapsed(sheet, col, left.outline_level, limit))
        }
    }
}

/// Walks outward from `col` through the outline group at `level`; the group
/// is collapsed when the summary column bounding it carries `collapsed`.
fn group_collapsed(sheet: &Sheet, col: u32, level: u8, limit: u32) -> bool {
    let summary = |meta: Option<&ColMeta>| -> Option<bool> {
        let meta = meta?;
        (meta.outline_level < level).then_some(meta.collapsed)
    };
    for right in col + 1..=limit + 1 {
        if let Some(collapsed) = summary(sheet.cols.get(&right)) {
            if collapsed {
                return true;
            }
            break;
        }
    }
    for left in (1..col).rev() {
        if let Some(collapsed) = summary(sheet.cols.get(&left)) {
            return collapsed;
        }
    }
    false
}

/// Parses `=HYPERLINK("target", "label")`. Only literal string arguments are
/// understood.
pub fn parse_hyperlink_formula(formula: &str) -> Option<CellLink> {
    let body = formula.trim().trim_start_matches('=').trim_start();
    let head = body.get(..10)?;
    if !head.eq_ignore_ascii_case("HYPERLINK(") {
        return None;
    }
    let args = split_arguments(&body[10..]);
    let target = args.first().and_then(|arg| unquote(arg))?;
    if target.trim().is_empty() {
        return None;
    }
    let display = args.get(1).and_then(|arg| unquote(arg));
    Some(CellLink { target, display })
}

fn split_arguments(rest: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut depth = 0usize;
    for ch in rest.chars() {
        match ch {
            '"' => {
                in_quotes = !in_quotes;
                current.push(ch);
            }
            '(' if !in_quotes => {
                depth += 1;
                current.push(ch);
            }
            ')' if !in_quotes => {
                if depth == 0 {
                    args.push(current.trim().to_string());
                    return args;
                }
                depth -= 1;
                current.push(ch);
            }
            ',' | ';' if !in_quotes && depth == 0 => {
                args.push(current.trim().to_string());
                current.clear();
            }
            _ => current.push(ch),
        }
    }
    args.push(current.trim().to_string());
    args
}

fn unquote(arg: &str) -> Option<String> {
    let inner = arg.strip_prefix('"')?.strip_suffix('"')?;
    Some(inner.replace("\"\"", "\""))
}

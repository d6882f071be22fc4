//! Header row detection, multi-row header spans and composite column names.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, warn};

use crate::config::{IngestConfig, matches_any};
use crate::infer::accessor::SheetView;
use crate::model::{HeaderColumn, HeaderSpec};

const MIN_HEADER_CELLS: usize = 3;
const LONG_VALUE_CHARS: usize = 30;
const SYMBOLIC_MAX_CHARS: usize = 12;

static DATE_LIKE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\d{1,4}[-./]\d{1,2}(?:[-./]\d{1,4})?$").expect("valid date pattern")
});

/// Score breakdown for one candidate header row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderCandidate {
    pub row: u32,
    pub score: i64,
    pub non_empty: usize,
}

/// Infers the header of a sheet. Never fails: a sheet without any plausible
/// header falls back to row 1.
pub fn infer_header(view: &SheetView<'_>, config: &IngestConfig) -> HeaderSpec {
    let sheet_max_col = view.max_col();
    let winner = match best_candidate(view, config) {
        Some(candidate) => {
            debug!(
                sheet = view.name(),
                row = candidate.row,
                score = candidate.score,
                non_empty = candidate.non_empty,
                "header row selected"
            );
            candidate.row
        }
        None => {
            warn!(sheet = view.name(), "no header candidate found, using row 1");
            1
        }
    };

    let max_col = header_extent(view, winner, sheet_max_col, config);
    let span = header_span(view, winner, max_col, config);
    // Data starts below the whole span, including marker rows dropped from it.
    let last = span.last().copied().unwrap_or(winner);
    let mut header_rows: Vec<u32> = span
        .into_iter()
        .filter(|row| !is_marker_row(view, *row, config))
        .collect();
    if header_rows.is_empty() {
        header_rows.push(winner);
    }

    let columns = composite_columns(view, &header_rows, max_col);
    let data_start_row = (last + 1..=view.max_row())
        .find(|row| !view.is_row_hidden(*row) && !view.row_is_empty(*row, max_col))
        .unwrap_or(last + 1);

    HeaderSpec {
        header_rows,
        columns,
        max_col,
        data_start_row,
    }
}

/// Scores every eligible row within the scan window and returns the best one.
/// Ties keep the earliest row.
pub fn best_candidate(view: &SheetView<'_>, config: &IngestConfig) -> Option<HeaderCandidate> {
    let max_col = view.max_col();
    let last_row = config.header_scan_rows.min(view.max_row());
    let mut best: Option<HeaderCandidate> = None;

    for row in 1..=last_row {
        if view.is_row_hidden(row)
            || is_marker_row(view, row, config)
            || is_marker_row(view, row + 1, config)
        {
            continue;
        }
        let Some(candidate) = score_row(view, row, max_col, config) else {
            continue;
        };
        debug!(row, score = candidate.score, "header candidate");
        if best.as_ref().is_none_or(|current| candidate.score > current.score) {
            best = Some(candidate);
        }
    }

    best
}

/// Scores a single row, or `None` when it has fewer than three values.
pub fn score_row(
    view: &SheetView<'_>,
    row: u32,
    max_col: u32,
    config: &IngestConfig,
) -> Option<HeaderCandidate> {
    let values = row_texts(view, row, max_col);
    if values.len() < MIN_HEADER_CELLS {
        return None;
    }

    let mut score = values.len() as i64;
    for value in &values {
        if value.contains('(') && value.contains(')') {
            score += 5;
        }
        if value.len() <= 2 && value.chars().all(|ch| ch.is_ascii_digit()) {
            score -= 3;
        }
        if matches_any(value, &config.header_keywords) {
            score += 3;
        }
        if value.chars().count() > LONG_VALUE_CHARS {
            score -= 2;
        }
    }

    if let Some(next) = view.next_visible_row(row) {
        let next_count = row_texts(view, next, max_col).len();
        if next_count as f64 >= values.len() as f64 * 0.5 {
            score += 3;
        }
    }

    Some(HeaderCandidate {
        row,
        score,
        non_empty: values.len(),
    })
}

fn row_texts(view: &SheetView<'_>, row: u32, max_col: u32) -> Vec<String> {
    view.visible_cols(max_col)
        .map(|col| view.text(row, col))
        .filter(|text| !text.is_empty())
        .collect()
}

/// True when any cell of the row carries a "back to contents" marker.
pub fn is_marker_row(view: &SheetView<'_>, row: u32, config: &IngestConfig) -> bool {
    if row == 0 || row > view.max_row() {
        return false;
    }
    (1..=view.max_col()).any(|col| {
        let text = view.text(row, col);
        !text.is_empty()
            && config
                .back_to_contents_markers
                .iter()
                .any(|marker| text.contains(marker.as_str()))
    })
}

/// Rightmost column of the header row holding a real (non-legend) value.
fn header_extent(view: &SheetView<'_>, row: u32, sheet_max_col: u32, config: &IngestConfig) -> u32 {
    (1..=sheet_max_col)
        .rev()
        .find(|col| {
            let text = view.text(row, *col);
            !text.is_empty() && !is_legend(&text, config)
        })
        .unwrap_or(sheet_max_col)
}

fn is_legend(text: &str, config: &IngestConfig) -> bool {
    config
        .legend_markers
        .iter()
        .any(|marker| text.starts_with(marker.as_str()) || text.contains(marker.as_str()))
}

/// Extends the header downward while the current row merges downward or the
/// next row is a symbolic sub-header.
fn header_span(view: &SheetView<'_>, winner: u32, max_col: u32, config: &IngestConfig) -> Vec<u32> {
    let mut rows = vec![winner];
    let mut current = winner;
    for _ in 0..config.max_extra_header_rows {
        let Some(next) = view.next_visible_row(current) else {
            break;
        };
        if view.has_downward_merge(current, max_col) || is_symbolic_subheader(view, next, max_col) {
            rows.push(next);
            current = next;
        } else {
            break;
        }
    }
    rows
}

/// A row of a few short, mostly-uppercase codes (e.g. `REV`, `DWG`, `A/B`)
/// sitting under a merged header.
pub fn is_symbolic_subheader(view: &SheetView<'_>, row: u32, max_col: u32) -> bool {
    let tokens = row_texts(view, row, max_col);
    let upper_bound = (max_col as usize / 2).max(3);
    if tokens.len() < 2 || tokens.len() > upper_bound {
        return false;
    }
    let symbolic = tokens.iter().filter(|token| is_symbolic_token(token)).count();
    symbolic as f64 >= tokens.len() as f64 * 0.6
}

pub fn is_symbolic_token(token: &str) -> bool {
    let condensed: String = token.chars().filter(|ch| !ch.is_whitespace()).collect();
    if condensed.is_empty() || condensed.chars().count() > SYMBOLIC_MAX_CHARS {
        return false;
    }
    if !condensed
        .chars()
        .all(|ch| ch.is_alphanumeric() || matches!(ch, '.' | '_' | '-' | '\'' | '/'))
    {
        return false;
    }
    if condensed.parse::<f64>().is_ok() || condensed.chars().all(|ch| ch.is_ascii_digit()) {
        return false;
    }
    if DATE_LIKE.is_match(&condensed) {
        return false;
    }
    let letters: Vec<char> = condensed.chars().filter(|ch| ch.is_alphabetic()).collect();
    if letters.is_empty() {
        return false;
    }
    let upper = letters.iter().filter(|ch| ch.is_uppercase()).count();
    upper as f64 >= letters.len() as f64 * 0.6
}

/// Joins each header row's value per visible column into a composite name.
fn composite_columns(view: &SheetView<'_>, header_rows: &[u32], max_col: u32) -> Vec<HeaderColumn> {
    let mut seen: HashMap<String, usize> = HashMap::new();
    let mut columns = Vec::new();

    for col in view.visible_cols(max_col) {
        let mut parts: Vec<String> = Vec::new();
        for row in header_rows {
            let text = view.text(*row, col);
            if !text.is_empty() && !parts.contains(&text) {
                parts.push(text);
            }
        }
        let base = if parts.is_empty() {
            format!("Column_{col}")
        } else {
            parts.join(" - ")
        };
        let count = seen.entry(base.clone()).or_insert(0);
        *count += 1;
        let name = if *count == 1 {
            base
        } else {
            format!("{base} ({count})")
        };
        columns.push(HeaderColumn { col, name });
    }

    columns
}

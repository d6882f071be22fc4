//! Folds physical data rows into logical records keyed by the first column.

use std::collections::VecDeque;

use tracing::debug;

use crate::config::IngestConfig;
use crate::infer::accessor::SheetView;
use crate::model::{CellLink, HeaderSpec, Record};

/// What a single physical row contributes to a record.
#[derive(Debug, Clone, Default, PartialEq)]
struct RowContribution {
    row: u32,
    anchor: bool,
    values: Vec<(String, String)>,
    links: Vec<(String, CellLink)>,
}

impl RowContribution {
    fn is_empty(&self) -> bool {
        self.values.is_empty() && self.links.is_empty()
    }

    fn apply_to(self, record: &mut Record) {
        record.add_row(self.row);
        for (header, value) in &self.values {
            record.merge_value(header, value);
        }
        for (header, link) in self.links {
            record.add_link(&link.target);
            if let Some(display) = link.display.filter(|d| !d.trim().is_empty()) {
                record
                    .link_labels
                    .entry(header)
                    .or_insert_with(|| display.trim().to_string());
            }
        }
    }
}

/// Groups the data rows of a sheet into records.
///
/// A row with a value in the first visible column starts a new record; rows
/// without one are folded into the open record. Rows seen before the first
/// anchor are buffered (oldest evicted past `orphan_capacity`) and absorbed by
/// that anchor.
pub fn group_rows(view: &SheetView<'_>, header: &HeaderSpec, config: &IngestConfig) -> Vec<Record> {
    let Some(anchor_col) = header.columns.first().map(|column| column.col) else {
        return Vec::new();
    };

    let mut records = Vec::new();
    let mut open: Option<Record> = None;
    let mut orphans: VecDeque<RowContribution> = VecDeque::new();
    let mut idle_rows = 0u32;

    for row in header.data_start_row..=view.max_row() {
        if view.is_row_hidden(row) {
            continue;
        }

        let contribution = read_row(view, header, anchor_col, row);
        if contribution.is_empty() {
            idle_rows += 1;
            if config.early_stop_empty_rows.is_some_and(|limit| idle_rows >= limit) {
                debug!(sheet = view.name(), row, idle_rows, "early stop after idle rows");
                break;
            }
            continue;
        }
        idle_rows = 0;

        if contribution.anchor {
            if let Some(record) = open.take() {
                flush(&mut records, record);
            }
            let mut record = Record::new(view.name());
            contribution.apply_to(&mut record);
            for orphan in orphans.drain(..) {
                orphan.apply_to(&mut record);
            }
            open = Some(record);
        } else if let Some(record) = open.as_mut() {
            contribution.apply_to(record);
        } else {
            if config.orphan_capacity == 0 {
                continue;
            }
            if orphans.len() >= config.orphan_capacity {
                if let Some(evicted) = orphans.pop_front() {
                    debug!(sheet = view.name(), row = evicted.row, "orphan row evicted");
                }
            }
            orphans.push_back(contribution);
        }
    }

    if let Some(record) = open.take() {
        flush(&mut records, record);
    }
    if !orphans.is_empty() {
        debug!(sheet = view.name(), count = orphans.len(), "orphan rows without anchor dropped");
    }

    records
}

fn flush(records: &mut Vec<Record>, record: Record) {
    if record.has_values() {
        records.push(record);
    } else {
        debug!(row = record.row_number(), "record without values discarded");
    }
}

fn read_row(view: &SheetView<'_>, header: &HeaderSpec, anchor_col: u32, row: u32) -> RowContribution {
    let mut contribution = RowContribution {
        row,
        anchor: view.sheet().value(row, anchor_col).is_some(),
        ..RowContribution::default()
    };

    for column in &header.columns {
        let text = view.text(row, column.col);
        if !text.is_empty() {
            contribution.values.push((column.name.clone(), text));
        }
        if let Some(link) = view.link_at(row, column.col) {
            contribution.links.push((column.name.clone(), link));
        }
    }

    contribution
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infer::header::infer_header;
    use crate::model::{MergeRange, Sheet};

    fn table(rows: &[&[&str]]) -> Sheet {
        let mut sheet = Sheet::new("목록");
        for (row_index, values) in rows.iter().enumerate() {
            for (col_index, value) in values.iter().enumerate() {
                sheet.set_text(row_index as u32 + 1, col_index as u32 + 1, *value);
            }
        }
        sheet
    }

    fn group(sheet: &Sheet, config: &IngestConfig) -> Vec<Record> {
        let view = SheetView::new(sheet);
        let header = infer_header(&view, config);
        group_rows(&view, &header, config)
    }

    #[test]
    fn continuation_row_merges_into_previous_anchor() {
        let sheet = table(&[
            &["번호", "제목", "Note"],
            &["A", "first", ""],
            &["", "", "x"],
            &["B", "second", ""],
        ]);
        let records = group(&sheet, &IngestConfig::default());
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].rows, vec![2, 3]);
        assert_eq!(records[0].metadata["Note"], "x");
        assert_eq!(records[0].metadata["번호"], "A");
        assert_eq!(records[1].rows, vec![4]);
        assert!(!records[1].metadata.contains_key("Note"));
    }

    #[test]
    fn distinct_continuation_values_are_appended() {
        let sheet = table(&[
            &["번호", "제목", "파일"],
            &["1", "도면", "a.pdf"],
            &["", "도면", "b.pdf"],
        ]);
        let records = group(&sheet, &IngestConfig::default());
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].metadata["제목"], "도면");
        assert_eq!(records[0].metadata["파일"], "a.pdf / b.pdf");
    }

    #[test]
    fn leading_orphans_are_absorbed_by_first_anchor() {
        let sheet = table(&[
            &["번호", "제목", "Note"],
            &["", "", "o1"],
            &["", "", "o2"],
            &["", "", "o3"],
            &["A", "t", "own"],
        ]);
        let config = IngestConfig {
            orphan_capacity: 2,
            ..IngestConfig::default()
        };
        let records = group(&sheet, &config);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].rows, vec![3, 4, 5]);
        assert_eq!(records[0].metadata["Note"], "own / o2 / o3");
    }

    #[test]
    fn hyperlinks_accumulate_and_labels_are_kept() {
        let mut sheet = table(&[
            &["번호", "제목", "REV"],
            &["1", "title", "R1"],
            &["", "", ""],
        ]);
        sheet.set_link(2, 3, CellLink::new("http://h/1.pdf").with_display("R1 (final)"));
        sheet.set_link(3, 2, CellLink::new("http://h/2.pdf"));
        sheet.set_link(3, 3, CellLink::new("http://h/1.pdf"));
        let records = group(&sheet, &IngestConfig::default());
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.hyperlink.as_deref(), Some("http://h/1.pdf"));
        assert_eq!(record.hyperlinks, vec!["http://h/1.pdf", "http://h/2.pdf"]);
        assert_eq!(record.link_labels["REV"], "R1 (final)");
        assert_eq!(record.rows, vec![2, 3]);
    }

    #[test]
    fn internal_links_never_become_record_hyperlinks() {
        let mut sheet = table(&[
            &["번호", "제목", "비고"],
            &["1", "title", "top"],
            &["2", "other", "next"],
        ]);
        sheet.set_link(2, 3, CellLink::new("#'목차'!A1").with_display("top"));
        sheet.set_link(3, 3, CellLink::new("#Sheet2!B4"));
        sheet.set_link(3, 2, CellLink::new("http://h/2.pdf"));
        let records = group(&sheet, &IngestConfig::default());
        assert_eq!(records.len(), 2);
        assert!(records[0].hyperlink.is_none());
        assert!(records[0].hyperlinks.is_empty());
        assert!(records[0].link_labels.is_empty());
        assert_eq!(records[1].hyperlink.as_deref(), Some("http://h/2.pdf"));
        assert_eq!(records[1].hyperlinks, vec!["http://h/2.pdf"]);
    }

    #[test]
    fn vertically_merged_anchor_yields_one_record() {
        let mut sheet = table(&[
            &["번호", "제목", "비고"],
            &["A", "t1", ""],
            &["", "t2", ""],
            &["B", "t3", ""],
        ]);
        sheet.merge(MergeRange::new(2, 1, 3, 1));
        let records = group(&sheet, &IngestConfig::default());
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].metadata["번호"], "A");
        assert_eq!(records[0].metadata["제목"], "t1 / t2");
    }

    #[test]
    fn hidden_rows_are_skipped() {
        let mut sheet = table(&[
            &["번호", "제목", "비고"],
            &["A", "t1", ""],
            &["B", "hidden", ""],
            &["C", "t3", ""],
        ]);
        sheet.hide_row(3);
        let records = group(&sheet, &IngestConfig::default());
        let anchors: Vec<&str> = records.iter().map(|r| r.metadata["번호"].as_str()).collect();
        assert_eq!(anchors, vec!["A", "C"]);
    }

    #[test]
    fn early_stop_aborts_after_idle_rows() {
        let mut sheet = table(&[&["번호", "제목", "비고"], &["A", "t1", ""]]);
        sheet.set_text(10, 1, "Z").set_text(10, 2, "late");
        let config = IngestConfig::default().with_early_stop(Some(3));
        assert_eq!(group(&sheet, &config).len(), 1);
        assert_eq!(group(&sheet, &IngestConfig::default()).len(), 2);
    }
}

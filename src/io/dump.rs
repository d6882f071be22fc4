use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{info, instrument};

use crate::error::Result;
use crate::infer::{SheetOutcome, WorkbookReport};
use crate::model::{Record, SheetType};

/// Serialized shape of one dumped sheet.
#[derive(Debug, Serialize)]
struct SheetDump<'a> {
    sheet_name: &'a str,
    sheet_type: SheetType,
    headers: &'a [String],
    total_items: usize,
    items: &'a [Record],
}

impl<'a> From<&'a SheetOutcome> for SheetDump<'a> {
    fn from(outcome: &'a SheetOutcome) -> Self {
        Self {
            sheet_name: &outcome.sheet_name,
            sheet_type: outcome.sheet_type,
            headers: &outcome.headers,
            total_items: outcome.total_items(),
            items: &outcome.records,
        }
    }
}

/// File-system safe variant of a sheet name.
pub fn safe_file_stem(sheet_name: &str) -> String {
    let replaced: String = sheet_name
        .chars()
        .map(|ch| if "\\/:*?\"<>|".contains(ch) { '_' } else { ch })
        .collect();
    let trimmed = replaced.trim();
    if trimmed.is_empty() {
        "sheet".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Renders one sheet outcome as pretty-printed JSON.
pub fn sheet_json(outcome: &SheetOutcome) -> Result<String> {
    Ok(serde_json::to_string_pretty(&SheetDump::from(outcome))?)
}

/// Writes `<sheet>.processed.json` for one outcome and returns its path.
#[instrument(level = "debug", skip(outcome), fields(sheet = %outcome.sheet_name))]
pub fn dump_sheet(outcome: &SheetOutcome, out_dir: &Path) -> Result<PathBuf> {
    fs::create_dir_all(out_dir)?;
    let path = out_dir.join(format!("{}.processed.json", safe_file_stem(&outcome.sheet_name)));
    fs::write(&path, sheet_json(outcome)?)?;
    info!(path = %path.display(), items = outcome.total_items(), "sheet dumped");
    Ok(path)
}

/// Dumps every processed sheet of a report.
#[instrument(level = "info", skip(report), fields(out_dir = %out_dir.display()))]
pub fn dump_report(report: &WorkbookReport, out_dir: &Path) -> Result<Vec<PathBuf>> {
    report
        .outcomes
        .iter()
        .map(|outcome| dump_sheet(outcome, out_dir))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::HeaderSpec;
    use serde_json::Value;
    use tempfile::tempdir;

    fn outcome(name: &str) -> SheetOutcome {
        let mut record = Record::new(name);
        record.merge_value("제목", "배치도");
        record.add_row(2);
        SheetOutcome {
            sheet_name: name.to_string(),
            sheet_type: SheetType::Attachment,
            headers: vec!["제목".into()],
            header: HeaderSpec {
                header_rows: vec![1],
                columns: Vec::new(),
                max_col: 1,
                data_start_row: 2,
            },
            records: vec![record],
        }
    }

    #[test]
    fn unsafe_characters_are_replaced() {
        assert_eq!(safe_file_stem("A/B:C?"), "A_B_C_");
        assert_eq!(safe_file_stem("   "), "sheet");
    }

    #[test]
    fn dump_writes_processed_json() {
        let dir = tempdir().expect("tempdir");
        let path = dump_sheet(&outcome("도면/목록"), dir.path()).expect("dump");
        assert_eq!(path.file_name().and_then(|n| n.to_str()), Some("도면_목록.processed.json"));

        let json: Value = serde_json::from_str(&fs::read_to_string(&path).expect("read")).expect("json");
        assert_eq!(json["sheet_name"], "도면/목록");
        assert_eq!(json["sheet_type"], "attachment");
        assert_eq!(json["total_items"], 1);
        assert_eq!(json["items"][0]["metadata"]["제목"], "배치도");
        assert_eq!(json["items"][0]["rows"][0], 2);
        assert!(json["items"][0].get("link_labels").is_none());
    }
}

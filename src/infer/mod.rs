//! Structural inference: header detection, sheet classification, row grouping
//! and document identity, driven sheet by sheet over a [`WorkbookSource`].

pub mod accessor;
pub mod classify;
pub mod grouping;
pub mod header;
pub mod identity;

use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::config::IngestConfig;
use crate::model::{HeaderSpec, Record, Sheet, SheetType, WorkbookSource};

pub use accessor::SheetView;
pub use classify::classify_sheet;
pub use grouping::group_rows;
pub use header::infer_header;
pub use identity::assign_identity;

/// Everything inferred from one sheet.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SheetOutcome {
    pub sheet_name: String,
    pub sheet_type: SheetType,
    pub headers: Vec<String>,
    #[serde(skip)]
    pub header: HeaderSpec,
    pub records: Vec<Record>,
}

impl SheetOutcome {
    pub fn total_items(&self) -> usize {
        self.records.len()
    }
}

/// Per-workbook results. Sheets that could not be loaded are listed with the
/// error that stopped them; hidden sheets are listed as skipped.
#[derive(Debug, Default)]
pub struct WorkbookReport {
    pub outcomes: Vec<SheetOutcome>,
    pub skipped_sheets: Vec<String>,
    pub failed_sheets: Vec<(String, String)>,
}

impl WorkbookReport {
    pub fn total_records(&self) -> usize {
        self.outcomes.iter().map(SheetOutcome::total_items).sum()
    }

    pub fn outcome(&self, sheet_name: &str) -> Option<&SheetOutcome> {
        self.outcomes.iter().find(|outcome| outcome.sheet_name == sheet_name)
    }
}

/// Runs every inference pass over a single sheet. Contents sheets yield no
/// records.
#[instrument(level = "debug", skip_all, fields(sheet = %sheet.name))]
pub fn process_sheet(sheet: &Sheet, config: &IngestConfig) -> SheetOutcome {
    let view = SheetView::new(sheet);
    let header = infer_header(&view, config);
    let sheet_type = classify_sheet(&view, &header, config);

    let mut records = if sheet_type == SheetType::TableOfContents {
        Vec::new()
    } else {
        group_rows(&view, &header, config)
    };
    if sheet_type.tracks_revisions() {
        for record in &mut records {
            assign_identity(record, sheet_type, &header, config);
        }
    }

    debug!(%sheet_type, records = records.len(), "sheet processed");
    SheetOutcome {
        sheet_name: sheet.name.clone(),
        sheet_type,
        headers: header.names(),
        header,
        records,
    }
}

/// Processes every visible sheet of a workbook in order. A sheet that fails to
/// load is recorded and the remaining sheets are still processed.
#[instrument(level = "info", skip_all)]
pub fn process_workbook<S: WorkbookSource>(source: &mut S, config: &IngestConfig) -> WorkbookReport {
    let mut report = WorkbookReport::default();

    for name in source.sheet_names() {
        let sheet = match source.load_sheet(&name) {
            Ok(sheet) => sheet,
            Err(error) => {
                warn!(sheet = %name, %error, "sheet could not be loaded");
                report.failed_sheets.push((name, error.to_string()));
                continue;
            }
        };
        if sheet.hidden {
            debug!(sheet = %name, "hidden sheet skipped");
            report.skipped_sheets.push(name);
            continue;
        }
        report.outcomes.push(process_sheet(&sheet, config));
    }

    info!(
        sheets = report.outcomes.len(),
        records = report.total_records(),
        skipped = report.skipped_sheets.len(),
        failed = report.failed_sheets.len(),
        "workbook processed"
    );
    report
}

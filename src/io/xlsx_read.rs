use std::collections::{BTreeMap, HashSet};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use calamine::{Data, Range, Reader, SheetVisible, Xlsx, open_workbook};
use chrono::{Duration, NaiveDate};
use tracing::{debug, instrument, warn};

use crate::error::{IngestError, Result};
use crate::io::sheet_xml::PackageReader;
use crate::model::{CellRef, CellValue, MergeRange, Sheet, WorkbookSource};

/// An `.xlsx` workbook opened once; each sheet is materialised on demand.
pub struct XlsxWorkbook {
    workbook: Xlsx<BufReader<File>>,
    package: Option<PackageReader<BufReader<File>>>,
    names: Vec<String>,
    hidden: HashSet<String>,
}

impl XlsxWorkbook {
    #[instrument(level = "info", skip_all, fields(input = %path.display()))]
    pub fn open(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(IngestError::MissingInput(path.to_path_buf()));
        }
        let mut workbook: Xlsx<_> = open_workbook(path)?;
        workbook.load_merged_regions()?;

        let mut names = Vec::new();
        let mut hidden = HashSet::new();
        for sheet in workbook.sheets_metadata() {
            if sheet.typ != calamine::SheetType::WorkSheet {
                continue;
            }
            if sheet.visible != SheetVisible::Visible {
                hidden.insert(sheet.name.clone());
            }
            names.push(sheet.name.clone());
        }

        let package = match PackageReader::open(path) {
            Ok(package) => Some(package),
            Err(error) => {
                warn!(%error, "worksheet layout unavailable, continuing without it");
                None
            }
        };
        debug!(sheets = names.len(), hidden = hidden.len(), "workbook opened");

        Ok(Self {
            workbook,
            package,
            names,
            hidden,
        })
    }
}

impl WorkbookSource for XlsxWorkbook {
    fn sheet_names(&self) -> Vec<String> {
        self.names.clone()
    }

    #[instrument(level = "debug", skip(self))]
    fn load_sheet(&mut self, name: &str) -> Result<Sheet> {
        if !self.names.iter().any(|candidate| candidate == name) {
            return Err(IngestError::MissingSheet(name.to_string()));
        }

        let mut sheet = Sheet::new(name);
        sheet.hidden = self.hidden.contains(name);

        let values = self.workbook.worksheet_range(name)?;
        let formulas = self.workbook.worksheet_formula(name).unwrap_or_else(|error| {
            warn!(sheet = name, %error, "formulas unavailable");
            Range::empty()
        });

        let formula_cells = formula_view(&formulas);
        let mut computed = BTreeMap::new();
        for (cell, value) in value_view(&values) {
            if !formula_cells.contains_key(&cell) {
                sheet.set(cell.0, cell.1, value.clone());
            }
            computed.insert(cell, value);
        }
        for (cell, formula) in formula_cells {
            sheet.set(cell.0, cell.1, formula);
        }
        sheet.computed = Some(computed);

        let merges = self
            .workbook
            .worksheet_merge_cells(name)
            .unwrap_or(Ok(Vec::new()))
            .unwrap_or_default();
        for region in merges {
            sheet.merge(MergeRange::new(
                region.start.0 + 1,
                region.start.1 + 1,
                region.end.0 + 1,
                region.end.1 + 1,
            ));
        }

        if let Some(package) = self.package.as_mut() {
            match package.sheet_layout(name) {
                Ok(layout) => layout.apply_to(&mut sheet),
                Err(error) => warn!(sheet = name, %error, "worksheet layout unreadable"),
            }
        }

        debug!(
            cells = sheet.cells.len(),
            merges = sheet.merges.len(),
            links = sheet.links.len(),
            "sheet loaded"
        );
        Ok(sheet)
    }
}

/// Opens a workbook from disk.
pub fn load_workbook(path: &Path) -> Result<XlsxWorkbook> {
    XlsxWorkbook::open(path)
}

fn value_view(range: &Range<Data>) -> Vec<(CellRef, CellValue)> {
    let (row0, col0) = range.start().unwrap_or((0, 0));
    range
        .used_cells()
        .map(|(row, col, data)| {
            let cell = (row0 + row as u32 + 1, col0 + col as u32 + 1);
            (cell, cell_value(data))
        })
        .filter(|(_, value)| !value.is_blank())
        .collect()
}

fn formula_view(range: &Range<String>) -> BTreeMap<CellRef, CellValue> {
    let (row0, col0) = range.start().unwrap_or((0, 0));
    range
        .used_cells()
        .filter(|(_, _, formula)| !formula.trim().is_empty())
        .map(|(row, col, formula)| {
            let cell = (row0 + row as u32 + 1, col0 + col as u32 + 1);
            let text = if formula.starts_with('=') {
                formula.clone()
            } else {
                format!("={formula}")
            };
            (cell, CellValue::Formula(text))
        })
        .collect()
}

fn cell_value(data: &Data) -> CellValue {
    match data {
        Data::Empty => CellValue::Empty,
        Data::String(value) => CellValue::Text(value.clone()),
        Data::Float(value) => CellValue::Number(*value),
        Data::Int(value) => CellValue::Number(*value as f64),
        Data::Bool(value) => CellValue::Bool(*value),
        Data::DateTime(value) if value.is_duration() => CellValue::Number(value.as_f64()),
        Data::DateTime(value) => CellValue::Text(excel_date_text(value.as_f64())),
        Data::DateTimeIso(value) | Data::DurationIso(value) => CellValue::Text(value.clone()),
        Data::Error(error) => CellValue::Error(error.to_string()),
    }
}

/// Renders an Excel serial date as `YYYY-MM-DD`, adding the time of day when
/// it is not midnight.
fn excel_date_text(serial: f64) -> String {
    let Some(epoch) = NaiveDate::from_ymd_opt(1899, 12, 30).and_then(|d| d.and_hms_opt(0, 0, 0))
    else {
        return serial.to_string();
    };
    let seconds = (serial * 86_400.0).round() as i64;
    let Some(moment) = epoch.checked_add_signed(Duration::seconds(seconds)) else {
        return serial.to_string();
    };
    if seconds % 86_400 == 0 {
        moment.format("%Y-%m-%d").to_string()
    } else {
        moment.format("%Y-%m-%d %H:%M:%S").to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serial_dates_render_as_iso_text() {
        assert_eq!(excel_date_text(45_413.0), "2024-05-01");
        assert_eq!(excel_date_text(45_413.5), "2024-05-01 12:00:00");
    }

    #[test]
    fn formulas_gain_a_leading_equals_sign() {
        let mut range: Range<String> = Range::new((1, 1), (1, 2));
        range.set_value((1, 1), "HYPERLINK(\"http://x\",\"x\")".to_string());
        let cells = formula_view(&range);
        assert_eq!(
            cells[&(2, 2)],
            CellValue::Formula("=HYPERLINK(\"http://x\",\"x\")".into())
        );
        assert_eq!(cells.len(), 1);
    }
}

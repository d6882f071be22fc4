//! Assigns a [`SheetType`] from the sheet name, the composite header and the
//! presence of hyperlinks near the top of the sheet.

use crate::config::{IngestConfig, matches_any};
use crate::infer::accessor::SheetView;
use crate::model::{HeaderSpec, SheetType};

/// Classifies a sheet. The first matching rule wins.
pub fn classify_sheet(view: &SheetView<'_>, header: &HeaderSpec, config: &IngestConfig) -> SheetType {
    let name = view.name();
    let headers = header.names();

    if matches_any(name, &config.contents_keywords)
        && headers.iter().any(|h| matches_any(h, &config.contents_keywords))
    {
        return SheetType::TableOfContents;
    }
    if matches_any(name, &config.software_keywords) {
        return SheetType::Software;
    }
    if matches_any(name, &config.history_keywords) {
        return SheetType::History;
    }
    if find_column(&headers, &config.rev_columns).is_some()
        && find_column(&headers, &config.wbs_columns).is_some()
    {
        return SheetType::RevisionManaged;
    }
    if find_column(&headers, &config.version_columns).is_some()
        && find_column(&headers, &config.manage_no_columns).is_some()
    {
        return SheetType::VersionManaged;
    }
    if has_leading_links(view, header, config) {
        return SheetType::Attachment;
    }
    SheetType::Unknown
}

/// Index of the first header matching any of the keywords.
pub fn find_column(headers: &[String], keywords: &[String]) -> Option<usize> {
    headers.iter().position(|header| matches_any(header, keywords))
}

/// Indices of every header matching any of the keywords.
pub fn find_columns(headers: &[String], keywords: &[String]) -> Vec<usize> {
    headers
        .iter()
        .enumerate()
        .filter(|(_, header)| matches_any(header, keywords))
        .map(|(index, _)| index)
        .collect()
}

fn has_leading_links(view: &SheetView<'_>, header: &HeaderSpec, config: &IngestConfig) -> bool {
    let last_row = config.attachment_probe_rows.min(view.max_row());
    let last_col = header.max_col.max(view.max_col());
    (1..=last_row).any(|row| (1..=last_col).any(|col| view.link_at(row, col).is_some()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infer::header::infer_header;
    use crate::model::{CellLink, CellValue, Sheet};

    fn classify(sheet: &Sheet) -> SheetType {
        let config = IngestConfig::default();
        let view = SheetView::new(sheet);
        let header = infer_header(&view, &config);
        classify_sheet(&view, &header, &config)
    }

    fn sheet_with_header(name: &str, headers: &[&str]) -> Sheet {
        let mut sheet = Sheet::new(name);
        for (index, value) in headers.iter().enumerate() {
            sheet.set_text(1, index as u32 + 1, *value);
            sheet.set_text(2, index as u32 + 1, format!("v{index}"));
        }
        sheet
    }

    #[test]
    fn contents_sheet_wins_over_revision_columns() {
        let sheet = sheet_with_header("목차", &["목차", "REV", "WBS-1", "제목"]);
        assert_eq!(classify(&sheet), SheetType::TableOfContents);
    }

    #[test]
    fn contents_name_without_contents_header_is_not_toc() {
        let sheet = sheet_with_header("목차", &["번호", "REV", "WBS-1"]);
        assert_eq!(classify(&sheet), SheetType::RevisionManaged);
    }

    #[test]
    fn rev_and_wbs_columns_classify_revision_managed() {
        let sheet = sheet_with_header("도면", &["REV", "WBS-1", "제목"]);
        assert_eq!(classify(&sheet), SheetType::RevisionManaged);
    }

    #[test]
    fn version_and_management_number_classify_version_managed() {
        let sheet = sheet_with_header("절차서", &["관리번호", "작성버전", "제목"]);
        assert_eq!(classify(&sheet), SheetType::VersionManaged);
    }

    #[test]
    fn name_keywords_classify_history_and_software() {
        let history = sheet_with_header("개정이력", &["REV", "WBS", "내용"]);
        assert_eq!(classify(&history), SheetType::History);
        let software = sheet_with_header("Software 형상", &["REV", "WBS", "내용"]);
        assert_eq!(classify(&software), SheetType::Software);
    }

    #[test]
    fn links_in_leading_rows_classify_attachment() {
        let mut sheet = sheet_with_header("첨부", &["번호", "제목", "파일"]);
        sheet.set_link(2, 3, CellLink::new("http://files/a.pdf"));
        assert_eq!(classify(&sheet), SheetType::Attachment);

        let mut formula = sheet_with_header("첨부", &["번호", "제목", "파일"]);
        formula.set(2, 3, CellValue::Formula(r#"=HYPERLINK("http://files/b.pdf","b")"#.into()));
        assert_eq!(classify(&formula), SheetType::Attachment);
    }

    #[test]
    fn back_to_contents_link_does_not_make_an_attachment_sheet() {
        let mut sheet = Sheet::new("메모");
        sheet.set_text(1, 1, "목차로");
        sheet.set_link(1, 1, CellLink::new("#'목차'!A1").with_display("목차로"));
        for (index, value) in ["번호", "제목", "내용"].iter().enumerate() {
            sheet.set_text(2, index as u32 + 1, *value);
            sheet.set_text(3, index as u32 + 1, format!("v{index}"));
        }
        assert_eq!(classify(&sheet), SheetType::Unknown);
    }

    #[test]
    fn plain_sheet_is_unknown() {
        let sheet = sheet_with_header("메모", &["번호", "제목", "내용"]);
        assert_eq!(classify(&sheet), SheetType::Unknown);
    }
}

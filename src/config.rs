//! Keyword tables and tuning knobs consulted by the structural inference
//! passes.
//!
//! Every field has a default matching the conventions of the Korean
//! engineering workbooks the engine was built for; a JSON file may override
//! any subset of them.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Configuration shared by header inference, classification, row grouping and
/// identity extraction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Sheet-name and header keywords identifying a table of contents.
    pub contents_keywords: Vec<String>,
    /// Sheet-name keywords identifying a change-history sheet.
    pub history_keywords: Vec<String>,
    /// Sheet-name keywords identifying a software configuration sheet.
    pub software_keywords: Vec<String>,
    /// Column names belonging to the REV family.
    pub rev_columns: Vec<String>,
    /// Column names belonging to the WBS family.
    pub wbs_columns: Vec<String>,
    /// Column names belonging to the written-version family.
    pub version_columns: Vec<String>,
    /// Column names belonging to the management-number family.
    pub manage_no_columns: Vec<String>,
    /// Words that make a candidate row look like a header.
    pub header_keywords: Vec<String>,
    /// Link texts pointing back to the table of contents.
    pub back_to_contents_markers: Vec<String>,
    /// Prefixes/words marking legend cells to the right of a header.
    pub legend_markers: Vec<String>,
    /// Number of leading rows scanned for a header.
    pub header_scan_rows: u32,
    /// Extra rows a multi-row header may extend below the winning row.
    pub max_extra_header_rows: u32,
    /// Number of leading rows probed for hyperlinks when classifying.
    pub attachment_probe_rows: u32,
    /// Maximum number of leading orphan rows kept before the first anchor.
    pub orphan_capacity: usize,
    /// Abort a sheet scan after this many consecutive rows contribute nothing.
    pub early_stop_empty_rows: Option<u32>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            contents_keywords: strings(&["목차", "TOC", "Contents", "Index", "차례"]),
            history_keywords: strings(&[
                "이력",
                "History",
                "변경",
                "히스토리",
                "개정",
                "Revision History",
            ]),
            software_keywords: strings(&["소프트웨어", "Software", "SW", "형상", "Configuration"]),
            rev_columns: strings(&[
                "REV", "Rev", "rev", "revision", "Revision", "리비전", "버전", "Ver",
            ]),
            wbs_columns: strings(&["WBS", "wbs", "Wbs", "작업분류체계", "업무분류", "업무분류체계"]),
            version_columns: strings(&["작성버전", "작성 버전", "버전", "Version", "Ver", "ver"]),
            manage_no_columns: strings(&[
                "관리번호",
                "관리 번호",
                "문서번호",
                "문서 번호",
                "ID",
                "문서ID",
                "DocID",
                "Document ID",
            ]),
            header_keywords: strings(&[
                "년도", "제목", "구분", "번호", "이름", "코드", "상태", "날짜", "작성", "담당",
                "버전", "WBS", "종별", "관리",
            ]),
            back_to_contents_markers: strings(&[
                "목차로",
                "목차 바로가기",
                "Back to Contents",
                "Back to TOC",
            ]),
            legend_markers: strings(&["※", "범례", "Legend"]),
            header_scan_rows: 15,
            max_extra_header_rows: 3,
            attachment_probe_rows: 20,
            orphan_capacity: 7,
            early_stop_empty_rows: None,
        }
    }
}

impl IngestConfig {
    /// Loads a configuration from a JSON file. Missing fields keep their
    /// defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&data)?)
    }

    /// Returns a copy with the early-stop counter set.
    pub fn with_early_stop(mut self, rows: Option<u32>) -> Self {
        self.early_stop_empty_rows = rows.filter(|n| *n > 0);
        self
    }
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|value| value.to_string()).collect()
}

/// Lowercases and strips whitespace so column names compare loosely.
pub(crate) fn condense(value: &str) -> String {
    value
        .chars()
        .filter(|ch| !ch.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Case- and space-insensitive substring match against any keyword.
pub(crate) fn matches_any(value: &str, keywords: &[String]) -> bool {
    let haystack = condense(value);
    if haystack.is_empty() {
        return false;
    }
    keywords.iter().any(|keyword| {
        let needle = condense(keyword);
        !needle.is_empty() && haystack.contains(&needle)
    })
}

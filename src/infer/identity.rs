//! Derives a document key and a revision token for records of
//! revision-tracking sheets.

use tracing::debug;

use crate::config::IngestConfig;
use crate::infer::classify::{find_column, find_columns};
use crate::model::{HeaderSpec, Record, SheetType};

/// Fills `document_key` and `revision` on a record. Either stays `None` when
/// the columns it is derived from are missing or empty.
pub fn assign_identity(
    record: &mut Record,
    sheet_type: SheetType,
    header: &HeaderSpec,
    config: &IngestConfig,
) {
    let headers = header.names();
    let (key, revision) = match sheet_type {
        SheetType::RevisionManaged => {
            let parts: Vec<&str> = find_columns(&headers, &config.wbs_columns)
                .into_iter()
                .filter_map(|index| record.metadata.get(&headers[index]))
                .map(|value| value.trim())
                .filter(|value| !value.is_empty())
                .collect();
            let key = (!parts.is_empty()).then(|| document_key(&parts.join("-"), &record.sheet_name));
            let revision = find_column(&headers, &config.rev_columns)
                .and_then(|index| revision_value(record, &headers[index]));
            (key, revision)
        }
        SheetType::VersionManaged => {
            let key = find_column(&headers, &config.manage_no_columns)
                .and_then(|index| non_empty(record.metadata.get(&headers[index])))
                .map(|number| document_key(&number, &record.sheet_name));
            let revision = find_column(&headers, &config.version_columns)
                .and_then(|index| revision_value(record, &headers[index]));
            (key, revision)
        }
        _ => return,
    };

    if key.is_none() || revision.is_none() {
        debug!(
            sheet = %record.sheet_name,
            row = record.row_number(),
            has_key = key.is_some(),
            has_revision = revision.is_some(),
            "incomplete document identity"
        );
    }
    record.document_key = key;
    record.revision = revision;
}

/// Joins an identifier with its sheet name, replacing spaces and slashes so the
/// key is safe to use as a file or object name.
pub fn document_key(identifier: &str, sheet_name: &str) -> String {
    format!("{identifier}_{sheet_name}")
        .chars()
        .map(|ch| if ch.is_whitespace() || ch == '/' || ch == '\\' { '_' } else { ch })
        .collect()
}

/// Hyperlink display text takes priority over the resolved cell value.
fn revision_value(record: &Record, header: &str) -> Option<String> {
    non_empty(record.link_labels.get(header)).or_else(|| non_empty(record.metadata.get(header)))
}

fn non_empty(value: Option<&String>) -> Option<String> {
    value
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

use std::fs;
use std::path::{Path, PathBuf};

use rust_xlsxwriter::Workbook as XlsxWriter;
use serde_json::Value;
use sheet_ingest::infer::{WorkbookReport, process_workbook};
use sheet_ingest::io::{dump, load_workbook};
use sheet_ingest::model::{Record, SheetType};
use sheet_ingest::store::RevisionStore;
use sheet_ingest::sync::{Container, DocumentUploader, FileAcquirer, sync_workbook_sheets};
use sheet_ingest::{IngestConfig, IngestError, Result};
use tempfile::tempdir;

const PLAN_URL: &str = "https://files.example/1.1.2.pdf";

/// Contents sheet, a drawing register with a continuation row, a hidden row
/// and a hyperlinked revision, and a hidden sheet.
fn write_register(path: &Path, first_revision: &str) {
    let mut workbook = XlsxWriter::new();

    let contents = workbook.add_worksheet();
    contents.set_name("목차").expect("name");
    for (col, title) in ["목차", "제목", "비고"].iter().enumerate() {
        contents.write_string(0, col as u16, *title).expect("header");
    }
    for (col, value) in ["1", "도면", "a"].iter().enumerate() {
        contents.write_string(1, col as u16, *value).expect("row");
    }

    let drawings = workbook.add_worksheet();
    drawings.set_name("도면").expect("name");
    for (col, title) in ["WBS", "제목", "REV", "비고"].iter().enumerate() {
        drawings.write_string(0, col as u16, *title).expect("header");
    }
    drawings.write_string(1, 0, "1.1.1").expect("wbs");
    drawings.write_string(1, 1, "배치도").expect("title");
    drawings.write_string(1, 2, first_revision).expect("rev");
    drawings.write_string(2, 1, "상세").expect("continuation");
    drawings.write_string(3, 0, "9.9.9").expect("hidden wbs");
    drawings.write_string(3, 1, "숨김").expect("hidden title");
    drawings.write_string(3, 2, "R9").expect("hidden rev");
    drawings.set_row_hidden(3).expect("hide row");
    drawings.write_string(4, 0, "1.1.2").expect("wbs");
    drawings.write_string(4, 1, "단면도").expect("title");
    drawings
        .write_url_with_text(4, 2, PLAN_URL, "R2")
        .expect("link");

    let archive = workbook.add_worksheet();
    archive.set_name("보관").expect("name");
    archive.write_string(0, 0, "old").expect("value");
    archive.set_hidden(true);

    workbook.save(path).expect("workbook saved");
}

fn process(path: &Path) -> WorkbookReport {
    let mut workbook = load_workbook(path).expect("workbook opened");
    process_workbook(&mut workbook, &IngestConfig::default())
}

fn find<'a>(records: &'a [Record], key: &str) -> &'a Record {
    records
        .iter()
        .find(|record| record.document_key.as_deref() == Some(key))
        .unwrap_or_else(|| panic!("record {key} missing"))
}

#[test]
fn register_workbook_is_classified_and_grouped() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("register.xlsx");
    write_register(&path, "R1");

    let report = process(&path);
    assert_eq!(report.skipped_sheets, vec!["보관".to_string()]);
    assert!(report.failed_sheets.is_empty());

    let contents = report.outcome("목차").expect("contents outcome");
    assert_eq!(contents.sheet_type, SheetType::TableOfContents);
    assert!(contents.records.is_empty());

    let drawings = report.outcome("도면").expect("drawing outcome");
    assert_eq!(drawings.sheet_type, SheetType::RevisionManaged);
    assert_eq!(drawings.headers, vec!["WBS", "제목", "REV", "비고"]);
    assert_eq!(drawings.records.len(), 2);

    let first = find(&drawings.records, "1.1.1_도면");
    assert_eq!(first.revision.as_deref(), Some("R1"));
    assert_eq!(first.metadata["제목"], "배치도 / 상세");
    assert_eq!(first.rows, vec![2, 3]);
    assert!(first.hyperlink.is_none());

    let second = find(&drawings.records, "1.1.2_도면");
    assert_eq!(second.revision.as_deref(), Some("R2"));
    assert_eq!(second.hyperlink.as_deref(), Some(PLAN_URL));
    assert_eq!(second.rows, vec![5]);

    assert!(
        drawings
            .records
            .iter()
            .all(|record| !record.metadata.values().any(|value| value == "숨김"))
    );
}

#[test]
fn dump_writes_one_file_per_processed_sheet() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("register.xlsx");
    write_register(&path, "R1");
    let report = process(&path);

    let out_dir = dir.path().join("processed");
    let written = dump::dump_report(&report, &out_dir).expect("dumped");
    assert_eq!(written.len(), 2);
    assert!(!out_dir.join("보관.processed.json").exists());

    let text = fs::read_to_string(out_dir.join("도면.processed.json")).expect("dump read");
    let json: Value = serde_json::from_str(&text).expect("dump parsed");
    assert_eq!(json["sheet_type"], "revision_managed");
    assert_eq!(json["total_items"], 2);
    assert_eq!(json["items"][1]["hyperlink"], PLAN_URL);
}

#[test]
fn missing_workbook_is_reported() {
    let dir = tempdir().expect("tempdir");
    let error = load_workbook(&dir.path().join("absent.xlsx")).err().expect("error");
    assert!(matches!(error, IngestError::MissingInput(_)));
}

/// Writes a placeholder file per URL into a download directory.
struct DirectoryAcquirer {
    dir: PathBuf,
    fetched: Vec<String>,
}

impl FileAcquirer for DirectoryAcquirer {
    fn acquire(&mut self, url: &str) -> Result<PathBuf> {
        let name = url.rsplit('/').next().unwrap_or("download");
        let path = self.dir.join(name);
        fs::write(&path, url)?;
        self.fetched.push(url.to_string());
        Ok(path)
    }
}

#[derive(Default)]
struct CountingUploader {
    uploads: usize,
    deleted: Vec<String>,
}

impl DocumentUploader for CountingUploader {
    fn upload(&mut self, _container: &Container, _path: &Path, record: &Record) -> Result<String> {
        self.uploads += 1;
        Ok(format!(
            "{}@{}",
            record.document_key.as_deref().unwrap_or("untracked"),
            record.revision.as_deref().unwrap_or("-")
        ))
    }

    fn delete(&mut self, _container: &Container, document_id: &str) -> Result<()> {
        self.deleted.push(document_id.to_string());
        Ok(())
    }
}

fn drawings_container(outcome: &sheet_ingest::infer::SheetOutcome) -> Option<Container> {
    outcome
        .sheet_type
        .tracks_revisions()
        .then(|| Container::new("ds-drawings", "도면"))
}

#[test]
fn repeated_sync_only_uploads_new_revisions() {
    let dir = tempdir().expect("tempdir");
    let downloads = dir.path().join("downloads");
    fs::create_dir_all(&downloads).expect("download dir");
    let db = dir.path().join("state").join("revisions.sqlite");
    let workbook = dir.path().join("register.xlsx");

    let mut acquirer = DirectoryAcquirer {
        dir: downloads,
        fetched: Vec::new(),
    };
    let mut uploader = CountingUploader::default();

    write_register(&workbook, "R1");
    let report = process(&workbook);
    let first = sync_workbook_sheets(&report, &mut acquirer, &mut uploader, drawings_container, |_| {
        RevisionStore::open(&db)
    });
    assert_eq!(first.len(), 1);
    let stats = first[0].result.as_ref().expect("first pass");
    // Only 1.1.2 carries a hyperlink.
    assert_eq!((stats.inserted, stats.skipped), (1, 1));
    assert_eq!(acquirer.fetched, vec![PLAN_URL.to_string()]);

    let again = sync_workbook_sheets(&report, &mut acquirer, &mut uploader, drawings_container, |_| {
        RevisionStore::open(&db)
    });
    let stats = again[0].result.as_ref().expect("second pass");
    assert_eq!((stats.inserted, stats.updated, stats.skipped), (0, 0, 2));
    assert_eq!(uploader.uploads, 1);

    let store = RevisionStore::open(&db).expect("store reopened");
    let stored = store
        .document("1.1.2_도면", "ds-drawings")
        .expect("lookup")
        .expect("stored");
    assert_eq!(stored.entry.revision.as_deref(), Some("R2"));
    assert_eq!(stored.entry.document_id, "1.1.2_도면@R2");
    assert_eq!(stored.entry.file_name.as_deref(), Some("1.1.2.pdf"));
    assert!(uploader.deleted.is_empty());
}

//! Reconciles extracted records with a container: decides per record whether
//! to insert, update or skip against a snapshot of the revision store, and
//! drives the file-acquisition and upload collaborators accordingly.

use std::collections::BTreeMap;
use std::ops::AddAssign;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::error::{IngestError, Result};
use crate::infer::{SheetOutcome, WorkbookReport};
use crate::model::Record;
use crate::revision::is_newer;
use crate::store::{DocumentEntry, RevisionRecord, RevisionStore};

/// Target collection records are ingested into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Container {
    pub dataset_id: String,
    pub dataset_name: String,
}

impl Container {
    pub fn new(dataset_id: impl Into<String>, dataset_name: impl Into<String>) -> Self {
        Self {
            dataset_id: dataset_id.into(),
            dataset_name: dataset_name.into(),
        }
    }
}

/// Turns a hyperlink into a local file ready for upload.
pub trait FileAcquirer {
    fn acquire(&mut self, url: &str) -> Result<PathBuf>;
}

/// Uploads files to, and removes documents from, the ingestion platform.
pub trait DocumentUploader {
    /// Uploads a file and returns the platform's id for the new document.
    fn upload(&mut self, container: &Container, path: &Path, record: &Record) -> Result<String>;

    fn delete(&mut self, container: &Container, document_id: &str) -> Result<()>;
}

/// What to do with one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestAction {
    Insert,
    Update { previous: Box<RevisionRecord> },
    Skip,
    /// The record has no document key; it is tracked by URL instead.
    Untracked,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncStats {
    pub inserted: usize,
    pub updated: usize,
    pub skipped: usize,
    pub untracked: usize,
    pub failed: usize,
}

impl SyncStats {
    pub fn total(&self) -> usize {
        self.inserted + self.updated + self.skipped + self.untracked + self.failed
    }
}

impl AddAssign for SyncStats {
    fn add_assign(&mut self, other: Self) {
        self.inserted += other.inserted;
        self.updated += other.updated;
        self.skipped += other.skipped;
        self.untracked += other.untracked;
        self.failed += other.failed;
    }
}

/// Decides the action for a record against a container snapshot.
///
/// An equal revision is skipped only when `skip_same_revision` is set. A
/// record without a revision never replaces a stored one.
pub fn decide(
    snapshot: &BTreeMap<String, RevisionRecord>,
    record: &Record,
    skip_same_revision: bool,
) -> IngestAction {
    let Some(key) = record.document_key.as_deref() else {
        return IngestAction::Untracked;
    };
    let Some(previous) = snapshot.get(key) else {
        return IngestAction::Insert;
    };

    let update = match (previous.entry.revision.as_deref(), record.revision.as_deref()) {
        (Some(old), Some(new)) if old.trim() == new.trim() => !skip_same_revision,
        (Some(old), Some(new)) => is_newer(old, new),
        (None, Some(_)) => true,
        (Some(_), None) => false,
        (None, None) => !skip_same_revision,
    };
    if update {
        IngestAction::Update {
            previous: Box::new(previous.clone()),
        }
    } else {
        IngestAction::Skip
    }
}

enum RecordOutcome {
    Inserted,
    Updated,
    Skipped,
    Untracked,
}

/// One container's pass over a list of records.
pub struct ContainerSync<'a, A, U> {
    store: &'a RevisionStore,
    acquirer: &'a mut A,
    uploader: &'a mut U,
    container: Container,
    skip_same_revision: bool,
}

impl<'a, A: FileAcquirer, U: DocumentUploader> ContainerSync<'a, A, U> {
    pub fn new(
        store: &'a RevisionStore,
        acquirer: &'a mut A,
        uploader: &'a mut U,
        container: Container,
    ) -> Self {
        Self {
            store,
            acquirer,
            uploader,
            container,
            skip_same_revision: true,
        }
    }

    pub fn skip_same_revision(mut self, skip: bool) -> Self {
        self.skip_same_revision = skip;
        self
    }

    /// Processes records in order. The store snapshot is taken once; a failing
    /// record is counted and the pass continues.
    #[instrument(
        level = "info",
        skip_all,
        fields(dataset = %self.container.dataset_name, record_count = records.len())
    )]
    pub fn run(&mut self, records: &[Record]) -> Result<SyncStats> {
        let snapshot = self.store.documents_for_dataset(&self.container.dataset_id)?;
        debug!(known = snapshot.len(), "container snapshot loaded");

        let mut stats = SyncStats::default();
        for record in records {
            match self.sync_record(&snapshot, record) {
                Ok(RecordOutcome::Inserted) => stats.inserted += 1,
                Ok(RecordOutcome::Updated) => stats.updated += 1,
                Ok(RecordOutcome::Skipped) => stats.skipped += 1,
                Ok(RecordOutcome::Untracked) => stats.untracked += 1,
                Err(error) => {
                    warn!(
                        sheet = %record.sheet_name,
                        row = record.row_number(),
                        document_key = ?record.document_key,
                        %error,
                        "record failed"
                    );
                    stats.failed += 1;
                }
            }
        }

        info!(
            inserted = stats.inserted,
            updated = stats.updated,
            skipped = stats.skipped,
            untracked = stats.untracked,
            failed = stats.failed,
            "container synchronised"
        );
        Ok(stats)
    }

    fn sync_record(
        &mut self,
        snapshot: &BTreeMap<String, RevisionRecord>,
        record: &Record,
    ) -> Result<RecordOutcome> {
        let action = decide(snapshot, record, self.skip_same_revision);
        let Some(url) = record.hyperlink.as_deref() else {
            debug!(row = record.row_number(), "record without hyperlink skipped");
            return Ok(RecordOutcome::Skipped);
        };

        match action {
            IngestAction::Skip => Ok(RecordOutcome::Skipped),
            IngestAction::Untracked => {
                if self.store.is_url_processed(url)? {
                    return Ok(RecordOutcome::Skipped);
                }
                let path = self.acquirer.acquire(url)?;
                self.uploader.upload(&self.container, &path, record)?;
                self.store.mark_url_processed(url)?;
                Ok(RecordOutcome::Untracked)
            }
            IngestAction::Insert => {
                self.upload_and_save(url, record)?;
                Ok(RecordOutcome::Inserted)
            }
            IngestAction::Update { previous } => {
                self.upload_and_save(url, record)?;
                if let Err(error) = self
                    .uploader
                    .delete(&self.container, &previous.entry.document_id)
                {
                    warn!(
                        document_id = %previous.entry.document_id,
                        %error,
                        "previous document not deleted"
                    );
                }
                Ok(RecordOutcome::Updated)
            }
        }
    }

    fn upload_and_save(&mut self, url: &str, record: &Record) -> Result<()> {
        let key = record
            .document_key
            .clone()
            .ok_or_else(|| IngestError::Collaborator("record has no document key".into()))?;
        let path = self.acquirer.acquire(url)?;
        let document_id = self.uploader.upload(&self.container, &path, record)?;
        self.store.save_document(&DocumentEntry {
            document_key: key,
            document_id,
            dataset_id: self.container.dataset_id.clone(),
            dataset_name: self.container.dataset_name.clone(),
            revision: record.revision.clone(),
            file_path: Some(path.to_string_lossy().into_owned()),
            file_name: path.file_name().map(|name| name.to_string_lossy().into_owned()),
        })
    }
}

/// Result of synchronising one sheet into its container.
#[derive(Debug)]
pub struct SheetSync {
    pub sheet_name: String,
    pub container: Container,
    pub result: Result<SyncStats>,
}

/// Runs one container pass per processed sheet. `container_for` maps a sheet
/// to its container (`None` leaves the sheet out) and `open_store` provides a
/// store connection per container; a container whose store cannot be opened
/// fails on its own.
pub fn sync_workbook_sheets<A, U, C, S>(
    report: &WorkbookReport,
    acquirer: &mut A,
    uploader: &mut U,
    mut container_for: C,
    mut open_store: S,
) -> Vec<SheetSync>
where
    A: FileAcquirer,
    U: DocumentUploader,
    C: FnMut(&SheetOutcome) -> Option<Container>,
    S: FnMut(&Container) -> Result<RevisionStore>,
{
    let mut results = Vec::new();
    for outcome in &report.outcomes {
        let Some(container) = container_for(outcome) else {
            continue;
        };
        let result = open_store(&container).and_then(|store| {
            ContainerSync::new(&store, acquirer, uploader, container.clone()).run(&outcome.records)
        });
        if let Err(error) = &result {
            warn!(sheet = %outcome.sheet_name, %error, "container failed");
        }
        results.push(SheetSync {
            sheet_name: outcome.sheet_name.clone(),
            container,
            result,
        });
    }
    results
}

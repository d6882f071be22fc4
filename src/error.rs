use std::path::PathBuf;

use thiserror::Error;

/// Convenient alias for fallible results returned throughout the crate.
pub type Result<T> = std::result::Result<T, IngestError>;

/// Error type covering the failure cases that can occur while a workbook is
/// loaded, interpreted, or reconciled against the revision store.
#[derive(Debug, Error)]
pub enum IngestError {
    /// Wrapper for IO failures such as reading workbooks or cached downloads.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Raised when JSON parsing or serialization fails.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Errors bubbled up from the Excel reader implementation.
    #[error("Excel read error: {0}")]
    ExcelRead(#[from] calamine::XlsxError),

    /// Raised when the workbook package cannot be opened as a zip archive.
    #[error("workbook package error: {0}")]
    Package(#[from] zip::result::ZipError),

    /// Raised when a worksheet XML part is malformed.
    #[error("worksheet XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    /// Raised when an XML attribute cannot be decoded.
    #[error("worksheet XML attribute error: {0}")]
    XmlAttr(#[from] quick_xml::events::attributes::AttrError),

    /// Errors raised by the embedded revision database.
    #[error("revision store error: {0}")]
    Store(#[from] rusqlite::Error),

    /// Raised when the revision store cannot be opened or initialised.
    #[error("revision store unavailable at {path}: {source}")]
    StoreUnavailable {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    /// Raised when a workbook does not have the structure the reader expects.
    #[error("invalid workbook structure: {0}")]
    InvalidWorkbook(String),

    /// Raised when a requested sheet does not exist in the workbook.
    #[error("missing sheet '{0}'")]
    MissingSheet(String),

    /// Raised when an external collaborator (file acquisition, upload) fails.
    #[error("collaborator failure: {0}")]
    Collaborator(String),

    /// Raised when the user provides a path that does not exist.
    #[error("input file not found: {0}")]
    MissingInput(PathBuf),

    /// Raised when a command is invoked without a required confirmation.
    #[error("refused: {0}")]
    Refused(String),

    /// Raised when the tracing subscriber fails to initialise.
    #[error("failed to initialise logging: {0}")]
    Logging(String),
}

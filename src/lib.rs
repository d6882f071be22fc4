//! Core library for the sheet-ingest command line application.
//!
//! The library infers the structure of loosely formatted document-register
//! workbooks and tracks which revision of each document has been ingested.
//! Workbook adapters live under [`io`], data representations inside
//! [`model`], the structural inference passes in [`infer`], revision ordering
//! in [`revision`], persistence in [`store`] and the per-container
//! orchestration in [`sync`].

pub mod config;
pub mod error;
pub mod infer;
pub mod io;
pub mod model;
pub mod revision;
pub mod store;
pub mod sync;

pub use config::IngestConfig;
pub use error::{IngestError, Result};

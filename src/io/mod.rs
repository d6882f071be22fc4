pub mod dump;
pub mod sheet_xml;
pub mod xlsx_read;

pub use xlsx_read::{XlsxWorkbook, load_workbook};

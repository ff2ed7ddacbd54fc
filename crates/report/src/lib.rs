//! Question catalog, report aggregation and spreadsheet export.

pub mod aggregator;
pub mod catalog;
pub mod export;

pub use aggregator::{AnswerRecord, Cell, Report, ReportTable, ResultRow, VALUE_NOT_FOUND, build_report};
pub use catalog::{CatalogError, QueryGroup, QuestionCatalog, QuestionEntry, Scenario, Strategy};
pub use export::{
    ExportFormat, cleanup_stale_output, export_table, output_path, report_name, write_answers_log,
};
pub use extract::Extraction;

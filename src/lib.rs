//! Parse ASCII benchmark reports of model-vs-observation diagnostics into
//! tables, merge several reports and relabel their runs.

pub mod error;
pub mod report;
pub mod table;
pub mod varinfo;

pub use error::{ReportError, Result};
pub use report::{merge_reports, parse_lines, parse_report, ParseOptions};
pub use table::{ReportRecord, ReportTable, RunLabels};
pub use varinfo::VariableInfoTable;

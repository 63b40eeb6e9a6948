use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ReportError>;

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("Could not access {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Variable info file not found: {}", .0.display())]
    VarInfoNotFound(PathBuf),

    #[error("Failed to load variable info from {}: {source}", .path.display())]
    VarInfoCsv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("Line {line} of {} has more than two fields", .path.display())]
    MalformedVarInfo { path: PathBuf, line: u64 },

    #[error("Failed to read spreadsheet {}: {source}", .path.display())]
    Spreadsheet {
        path: PathBuf,
        #[source]
        source: calamine::Error,
    },

    #[error("Spreadsheet {} has no sheet named '{sheet}'", .path.display())]
    MissingSheet { path: PathBuf, sheet: String },

    #[error("Data line {line} comes before any TEST CASE header")]
    MissingTestCase { line: usize },
}

impl ReportError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ReportError::Io {
            path: path.into(),
            source,
        }
    }
}

use std::collections::HashMap;
use std::path::Path;

use calamine::{open_workbook_auto, Reader};
use csv::{ReaderBuilder, Trim, WriterBuilder};
use tracing::{debug, info};

use crate::error::{ReportError, Result};

const SPREADSHEET_SHEET: &str = "DATA";
const NAME_COLUMN: u32 = 1;
const DESCRIPTION_COLUMN: u32 = 2;

/// Human-readable descriptions of report variables, in the order they were read.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VariableInfoTable {
    order: Vec<String>,
    descriptions: HashMap<String, String>,
}

impl VariableInfoTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a description. A replaced name keeps its original position.
    pub fn insert(&mut self, name: impl Into<String>, description: impl Into<String>) {
        let name = name.into();
        if self.descriptions.insert(name.clone(), description.into()).is_none() {
            self.order.push(name);
        }
    }

    /// Description of `variable`, or `None` if it is unknown or has an empty description
    pub fn description(&self, variable: &str) -> Option<&str> {
        self.descriptions
            .get(variable)
            .map(|d| d.as_str())
            .filter(|d| !d.is_empty())
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.order
            .iter()
            .map(move |k| (k.as_str(), self.descriptions[k].as_str()))
    }

    /// Read names from column 1 and descriptions from column 2 of the "DATA"
    /// sheet. Rows with an empty name are skipped.
    pub fn from_spreadsheet(path: &Path) -> Result<Self> {
        let spreadsheet_err = |source| ReportError::Spreadsheet {
            path: path.to_path_buf(),
            source,
        };

        let mut workbook = open_workbook_auto(path).map_err(spreadsheet_err)?;
        if !workbook.sheet_names().iter().any(|s| s == SPREADSHEET_SHEET) {
            return Err(ReportError::MissingSheet {
                path: path.to_path_buf(),
                sheet: SPREADSHEET_SHEET.to_string(),
            });
        }
        let range = workbook
            .worksheet_range(SPREADSHEET_SHEET)
            .map_err(spreadsheet_err)?;

        // Range rows start at the first used cell, so look cells up by absolute position
        let mut table = Self::new();
        if let (Some((first_row, _)), Some((last_row, _))) = (range.start(), range.end()) {
            for row in first_row..=last_row {
                let name = match range.get_value((row, NAME_COLUMN)) {
                    Some(cell) => cell.to_string(),
                    None => continue,
                };
                if name.trim().is_empty() {
                    continue;
                }
                let description = range
                    .get_value((row, DESCRIPTION_COLUMN))
                    .map(|cell| cell.to_string())
                    .unwrap_or_default();
                table.insert(name, description);
            }
        }

        info!("Read {} variable descriptions from {}", table.len(), path.display());
        Ok(table)
    }

    /// Read a `name, description` cache file. Lines without a comma are ignored.
    pub fn from_csv(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(ReportError::VarInfoNotFound(path.to_path_buf()));
        }

        let csv_err = |source| ReportError::VarInfoCsv {
            path: path.to_path_buf(),
            source,
        };

        let mut rdr = ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .trim(Trim::All)
            .from_path(path)
            .map_err(csv_err)?;

        let mut table = Self::new();
        for result in rdr.records() {
            let record = result.map_err(csv_err)?;
            match record.len() {
                2 => table.insert(&record[0], &record[1]),
                n if n > 2 => {
                    return Err(ReportError::MalformedVarInfo {
                        path: path.to_path_buf(),
                        line: record.position().map(|p| p.line()).unwrap_or(0),
                    })
                }
                _ => debug!("Skipping line without a description in {}", path.display()),
            }
        }

        Ok(table)
    }

    /// Write the table as a `name, description` cache file.
    pub fn write_csv(&self, path: &Path) -> Result<()> {
        let csv_err = |source| ReportError::VarInfoCsv {
            path: path.to_path_buf(),
            source,
        };

        let mut wtr = WriterBuilder::new()
            .has_headers(false)
            .from_path(path)
            .map_err(csv_err)?;
        for (name, description) in self.iter() {
            wtr.write_record([name, description]).map_err(csv_err)?;
        }
        wtr.flush().map_err(|e| ReportError::io(path, e))?;
        Ok(())
    }

    /// Load from the cache at `cache` if it exists. Otherwise read `spreadsheet`
    /// and write the cache so the next call can skip the spreadsheet.
    pub fn load_cached(cache: &Path, spreadsheet: Option<&Path>) -> Result<Self> {
        if cache.exists() {
            return Self::from_csv(cache);
        }

        let spreadsheet = match spreadsheet {
            Some(p) => p,
            None => return Err(ReportError::VarInfoNotFound(cache.to_path_buf())),
        };

        info!(
            "{} does not exist, loading variable info from {}",
            cache.display(),
            spreadsheet.display()
        );
        let table = Self::from_spreadsheet(spreadsheet)?;
        table.write_csv(cache)?;
        Ok(table)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for VariableInfoTable {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut table = Self::new();
        for (k, v) in iter {
            table.insert(k, v);
        }
        table
    }
}

use std::collections::HashMap;
use std::io::Write;

use serde::Serialize;

/// One row of a parsed report: a single variable for one run and year range.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportRecord {
    #[serde(rename = "Run")]
    pub run_id: String,
    #[serde(rename = "Years")]
    pub years: String,
    #[serde(rename = "Variable")]
    pub variable: String,
    #[serde(rename = "Description")]
    pub description: String,
    #[serde(rename = "Flag")]
    pub has_description: bool,
    #[serde(rename = "Model")]
    pub model_value: Option<f64>,
    #[serde(rename = "Obs")]
    pub obs_value: Option<f64>,
    #[serde(rename = "Bias")]
    pub bias: Option<f64>,
    #[serde(rename = "RMSE")]
    pub rmse: Option<f64>,
}

impl ReportRecord {
    /// The (run, years, variable, description) index of this row
    pub fn key(&self) -> (&str, &str, &str, &str) {
        (&self.run_id, &self.years, &self.variable, &self.description)
    }
}

/// Mapping from generated run labels back to the run identifiers they replaced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunLabels {
    pairs: Vec<(String, String)>,
}

impl RunLabels {
    pub fn original(&self, label: &str) -> Option<&str> {
        self.pairs.iter().find(|(l, _)| l == label).map(|(_, o)| o.as_str())
    }

    pub fn label_for(&self, original: &str) -> Option<&str> {
        self.pairs.iter().find(|(_, o)| o == original).map(|(l, _)| l.as_str())
    }

    /// (label, original) pairs in label order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs.iter().map(|(l, o)| (l.as_str(), o.as_str()))
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

/// Ordered collection of report rows.
///
/// A table built by parsing a single file also remembers the TEST CASE and
/// CONTROL CASE named in that file's header. Those are informational only and
/// are cleared when tables are concatenated.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReportTable {
    records: Vec<ReportRecord>,
    test_case: Option<String>,
    control_case: Option<String>,
    run_labels: RunLabels,
}

impl ReportTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_cases(test_case: Option<String>, control_case: Option<String>) -> Self {
        ReportTable {
            test_case,
            control_case,
            ..Self::default()
        }
    }

    pub fn push(&mut self, record: ReportRecord) {
        self.records.push(record);
    }

    /// Concatenate `other` after the rows already in this table.
    pub fn append(&mut self, other: ReportTable) {
        self.records.extend(other.records);
        self.test_case = None;
        self.control_case = None;
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[ReportRecord] {
        &self.records
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ReportRecord> {
        self.records.iter()
    }

    pub fn into_records(self) -> Vec<ReportRecord> {
        self.records
    }

    pub fn test_case(&self) -> Option<&str> {
        self.test_case.as_deref()
    }

    pub fn control_case(&self) -> Option<&str> {
        self.control_case.as_deref()
    }

    pub fn run_labels(&self) -> &RunLabels {
        &self.run_labels
    }

    pub fn rows_for_variable<'a>(&'a self, variable: &'a str) -> impl Iterator<Item = &'a ReportRecord> + 'a {
        self.records.iter().filter(move |r| r.variable == variable)
    }

    /// Run identifiers in the order they first appear
    pub fn distinct_run_ids(&self) -> Vec<&str> {
        let mut runs: Vec<&str> = Vec::new();
        for rec in &self.records {
            if !runs.contains(&rec.run_id.as_str()) {
                runs.push(&rec.run_id);
            }
        }
        runs
    }

    /// Replace every run identifier with `{prefix}{n}`, numbering distinct runs
    /// from 1 in first-seen order and zero-padding `n` to the number of digits
    /// in the distinct run count. Returns the label -> original mapping, which
    /// is also kept on the table.
    pub fn relabel_runs(&mut self, prefix: &str) -> &RunLabels {
        let originals: Vec<String> = self.distinct_run_ids().into_iter().map(String::from).collect();
        let width = digit_width(originals.len());
        let labels = (1..=originals.len())
            .map(|n| format!("{}{:0width$}", prefix, n, width = width))
            .collect();
        self.apply_labels(originals, labels)
    }

    /// Replace run identifiers with caller-supplied labels, one per distinct run
    /// in first-seen order. Returns `None` and leaves the table untouched if the
    /// number of labels does not match the number of runs or a label repeats.
    pub fn relabel_runs_with<S: AsRef<str>>(&mut self, labels: &[S]) -> Option<&RunLabels> {
        let originals: Vec<String> = self.distinct_run_ids().into_iter().map(String::from).collect();
        if labels.len() != originals.len() {
            return None;
        }
        let labels: Vec<String> = labels.iter().map(|l| l.as_ref().to_string()).collect();
        if labels.iter().enumerate().any(|(i, l)| labels[..i].contains(l)) {
            return None;
        }
        Some(self.apply_labels(originals, labels))
    }

    fn apply_labels(&mut self, originals: Vec<String>, labels: Vec<String>) -> &RunLabels {
        let lookup: HashMap<&str, &str> = originals
            .iter()
            .zip(labels.iter())
            .map(|(o, l)| (o.as_str(), l.as_str()))
            .collect();

        for rec in self.records.iter_mut() {
            if let Some(label) = lookup.get(rec.run_id.as_str()) {
                rec.run_id = label.to_string();
            }
        }

        self.run_labels = RunLabels {
            pairs: labels.into_iter().zip(originals).collect(),
        };
        &self.run_labels
    }

    /// Write the table as CSV with a header row; missing values become empty fields.
    pub fn write_csv<W: Write>(&self, writer: W) -> Result<(), csv::Error> {
        let mut wtr = csv::Writer::from_writer(writer);
        if self.records.is_empty() {
            wtr.write_record(["Run", "Years", "Variable", "Description", "Flag", "Model", "Obs", "Bias", "RMSE"])?;
        }
        for rec in &self.records {
            wtr.serialize(rec)?;
        }
        wtr.flush()?;
        Ok(())
    }
}

impl<'a> IntoIterator for &'a ReportTable {
    type Item = &'a ReportRecord;
    type IntoIter = std::slice::Iter<'a, ReportRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

fn digit_width(n: usize) -> usize {
    n.checked_ilog10().unwrap_or(0) as usize + 1
}

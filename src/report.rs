use std::fs;
use std::path::Path;

use float_cmp::{ApproxEq, F64Margin};
use lazy_static::lazy_static;
use regex::Regex;
use tracing::{debug, info, warn};

use crate::error::{ReportError, Result};
use crate::table::{ReportRecord, ReportTable};
use crate::varinfo::VariableInfoTable;

const TEST_CASE_MARKER: &str = "TEST CASE:";
const CONTROL_CASE_MARKER: &str = "CONTROL CASE:";
const DATA_HEADER_TOKEN: &str = "Variable";

// These names are preceded by free text containing spaces, so splitting the
// line on whitespace would shift every column.
const SPACED_VARIABLES: [&str; 2] = ["FSNTOAC_CERES-EBAF", "FSNTOA_CERES-EBAF"];

// Only a model value is reported for these; the reference is zero.
const ZERO_REFERENCE_VARIABLES: [&str; 2] = ["RESTOM", "RESSURF"];

const MISSING_SENTINEL: f64 = -999.0;

/// Options for a single report parse.
#[derive(Debug, Clone, Default)]
pub struct ParseOptions {
    /// Run identifier to use for every row. If `None`, the run named in the
    /// first TEST CASE header of the file is used.
    pub run_id: Option<String>,
    /// Log every skipped or special-cased line at debug level
    pub verbose: bool,
}

impl ParseOptions {
    pub fn verbose(verbose: bool) -> Self {
        ParseOptions { run_id: None, verbose }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanState {
    SeekingHeader,
    InData,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Values {
    model: Option<f64>,
    obs: Option<f64>,
    bias: Option<f64>,
    rmse: Option<f64>,
}

#[derive(Debug, PartialEq)]
enum LineRejection {
    Blank,
    TokenCount(usize),
    NotNumeric(String),
}

/// Parse one report file. The file is decoded as Latin-1.
pub fn parse_report(path: &Path, variable_info: Option<&VariableInfoTable>, options: &ParseOptions) -> Result<ReportTable> {
    let bytes = fs::read(path).map_err(|e| ReportError::io(path, e))?;
    let text = decode_latin1(&bytes);
    let table = parse_lines(text.lines(), variable_info, options)?;

    info!("Read {} rows from {}", table.len(), path.display());
    if options.verbose {
        debug!("Test case: {}", table.test_case().unwrap_or(""));
        debug!("Control case: {}", table.control_case().unwrap_or(""));
    }
    Ok(table)
}

/// Run the report state machine over already-decoded lines.
pub fn parse_lines<'a, I>(lines: I, variable_info: Option<&VariableInfoTable>, options: &ParseOptions) -> Result<ReportTable>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut state = ScanState::SeekingHeader;
    let mut run_id = options.run_id.clone();
    let mut years: Option<String> = None;
    let mut test_case: Option<String> = None;
    let mut control_case: Option<String> = None;
    let mut records = Vec::new();

    for (idx, line) in lines.into_iter().enumerate() {
        let line_num = idx + 1;

        if let Some(pos) = line.find(TEST_CASE_MARKER) {
            match parse_test_case(&line[pos + TEST_CASE_MARKER.len()..]) {
                Some((case, yrs)) => {
                    if run_id.is_none() {
                        run_id = Some(case.clone());
                    }
                    test_case = Some(case);
                    years = Some(yrs);
                }
                None => {
                    if options.verbose {
                        debug!("Line {}: TEST CASE header without (yrs ...): {}", line_num, line);
                    }
                }
            }
        } else if let Some(pos) = line.find(CONTROL_CASE_MARKER) {
            control_case = Some(line[pos + CONTROL_CASE_MARKER.len()..].trim().to_string());
        } else if line.contains(DATA_HEADER_TOKEN) {
            state = ScanState::InData;
        } else if state == ScanState::InData {
            let (variable, tokens) = match split_data_line(line) {
                Some(split) => split,
                None => {
                    log_rejection(options, line_num, line, &LineRejection::Blank);
                    continue;
                }
            };
            if options.verbose && SPACED_VARIABLES.contains(&variable) {
                debug!("Line {}: matched spaced variable {}", line_num, variable);
            }

            let values = match read_values(variable, &tokens) {
                Ok(v) => v,
                Err(why) => {
                    log_rejection(options, line_num, line, &why);
                    continue;
                }
            };

            let (run, yrs) = match (&run_id, &years) {
                (Some(r), Some(y)) => (r.clone(), y.clone()),
                _ => return Err(ReportError::MissingTestCase { line: line_num }),
            };

            let description = variable_info.and_then(|vi| vi.description(variable));
            records.push(ReportRecord {
                run_id: run,
                years: yrs,
                variable: variable.to_string(),
                description: description.unwrap_or_default().to_string(),
                has_description: description.is_some(),
                model_value: values.model,
                obs_value: values.obs,
                bias: values.bias,
                rmse: values.rmse,
            });
        } else if options.verbose {
            debug!("Ignoring line {}: {}", line_num, line);
        }
    }

    let mut table = ReportTable::with_cases(test_case, control_case);
    for rec in records {
        table.push(rec);
    }
    Ok(table)
}

/// Parse each report and concatenate the rows in path order. Files that fail
/// to parse are logged and skipped. With a non-empty `rename_prefix`, run
/// identifiers are replaced by short sequential labels (see
/// [`ReportTable::relabel_runs`]).
pub fn merge_reports<P: AsRef<Path>>(
    paths: &[P],
    variable_info: Option<&VariableInfoTable>,
    rename_prefix: Option<&str>,
    verbose: bool,
) -> ReportTable {
    let options = ParseOptions::verbose(verbose);
    let mut merged = ReportTable::new();
    let mut n_ok = 0;

    for path in paths {
        let path = path.as_ref();
        match parse_report(path, variable_info, &options) {
            Ok(table) => {
                merged.append(table);
                n_ok += 1;
            }
            Err(err) => warn!("Failed to read file {}: {}", path.display(), err),
        }
    }

    if n_ok == 0 && !paths.is_empty() {
        warn!("None of the {} report files could be read", paths.len());
    }

    if let Some(prefix) = rename_prefix.filter(|p| !p.is_empty()) {
        let labels = merged.relabel_runs(prefix);
        for (label, original) in labels.iter() {
            info!("{} -> {}", label, original);
        }
    }

    merged
}

fn decode_latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| char::from(b)).collect()
}

/// Split the text following "TEST CASE:" into (run, years)
fn parse_test_case(rest: &str) -> Option<(String, String)> {
    lazy_static! {
        static ref RE: Regex = Regex::new(r"^\s*(.*?)\s*\(yrs\s+([^)]*)\)?").unwrap();
    }
    let caps = RE.captures(rest)?;
    let case = caps.get(1)?.as_str().to_string();
    let years = caps.get(2)?.as_str().trim().to_string();
    Some((case, years))
}

/// Find the variable name and the value tokens that follow it
fn split_data_line(line: &str) -> Option<(&str, Vec<&str>)> {
    for &var in SPACED_VARIABLES.iter() {
        if let Some(pos) = line.find(var) {
            let tokens = line[pos + var.len()..].split_whitespace().collect();
            return Some((var, tokens));
        }
    }

    let mut parts = line.split_whitespace();
    let variable = parts.next()?;
    Some((variable, parts.collect()))
}

fn read_values(variable: &str, tokens: &[&str]) -> std::result::Result<Values, LineRejection> {
    if ZERO_REFERENCE_VARIABLES.contains(&variable) {
        if tokens.len() != 1 && tokens.len() != 4 {
            return Err(LineRejection::TokenCount(tokens.len()));
        }
        let model = normalize(parse_number(tokens[0])?);
        return Ok(Values {
            model,
            obs: Some(0.0),
            bias: model,
            rmse: None,
        });
    }

    // Some report generators put an integer column between the name and the values
    let values = match tokens.len() {
        4 => tokens,
        5 if tokens[0].parse::<u32>().is_ok() => &tokens[1..],
        n => return Err(LineRejection::TokenCount(n)),
    };

    Ok(Values {
        model: normalize(parse_number(values[0])?),
        obs: normalize(parse_number(values[1])?),
        bias: normalize(parse_number(values[2])?),
        rmse: normalize(parse_number(values[3])?),
    })
}

fn parse_number(token: &str) -> std::result::Result<f64, LineRejection> {
    token
        .parse::<f64>()
        .map_err(|_| LineRejection::NotNumeric(token.to_string()))
}

fn normalize(value: f64) -> Option<f64> {
    if value.is_nan() || value.approx_eq(MISSING_SENTINEL, F64Margin { ulps: 2, epsilon: 0.0 }) {
        None
    } else {
        Some(value)
    }
}

fn log_rejection(options: &ParseOptions, line_num: usize, line: &str, why: &LineRejection) {
    if !options.verbose {
        return;
    }
    match why {
        LineRejection::Blank => debug!("Ignoring blank line {}", line_num),
        LineRejection::TokenCount(n) => debug!("Ignoring line {} ({} value fields): {}", line_num, n, line),
        LineRejection::NotNumeric(tok) => debug!("Ignoring line {} (non-numeric field {:?}): {}", line_num, tok, line),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    const REPORT_A: &str = "\
Benchmark summary
TEST CASE: RunA (yrs 1-10)
CONTROL CASE: ctrl_case (yrs 1-10)
Variable       Model      Obs      Bias     RMSE
TSR            1                 1.2      1.3     0.1    0.05
LWCF           25.1      27.3     -2.2    -999
RESTOM         0.85
SW CRE FSNTOAC_CERES-EBAF  240.1  241.0  -0.9  3.2
this line is broken
";

    fn parse(text: &str) -> ReportTable {
        parse_lines(text.lines(), None, &ParseOptions::default()).unwrap()
    }

    fn write_report(dir: &Path, name: &str, run: &str, var: &str) -> std::path::PathBuf {
        let path = dir.join(name);
        let text = format!(
            "TEST CASE: {} (yrs 1-20)\nVariable Model Obs Bias RMSE\n{} 1.0 2.0 -1.0 0.5\n",
            run, var
        );
        fs::write(&path, text).unwrap();
        path
    }

    #[test]
    fn test_example_line() {
        let table = parse(REPORT_A);
        let rec = &table.records()[0];
        assert_eq!(rec.run_id, "RunA");
        assert_eq!(rec.years, "1-10");
        assert_eq!(rec.variable, "TSR");
        assert_eq!(rec.model_value, Some(1.2));
        assert_eq!(rec.obs_value, Some(1.3));
        assert_eq!(rec.bias, Some(0.1));
        assert_eq!(rec.rmse, Some(0.05));
        assert!(!rec.has_description);
        assert_eq!(rec.description, "");
    }

    #[test]
    fn test_rows_and_header_cases() {
        let table = parse(REPORT_A);
        let vars: Vec<&str> = table.iter().map(|r| r.variable.as_str()).collect();
        assert_eq!(vars, vec!["TSR", "LWCF", "RESTOM", "FSNTOAC_CERES-EBAF"]);
        assert_eq!(table.test_case(), Some("RunA"));
        assert_eq!(table.control_case(), Some("ctrl_case (yrs 1-10)"));
    }

    #[test]
    fn test_sentinel_is_missing() {
        let table = parse(REPORT_A);
        let rec = table.rows_for_variable("LWCF").next().unwrap();
        assert_eq!(rec.model_value, Some(25.1));
        assert_eq!(rec.bias, Some(-2.2));
        assert_eq!(rec.rmse, None);

        let table = parse("TEST CASE: r (yrs 1-2)\nVariable\nX -999 -999.0 -999 -999\n");
        let rec = &table.records()[0];
        assert_eq!(
            (rec.model_value, rec.obs_value, rec.bias, rec.rmse),
            (None, None, None, None)
        );
    }

    #[test]
    fn test_zero_reference_variables() {
        let table = parse(REPORT_A);
        let rec = table.rows_for_variable("RESTOM").next().unwrap();
        assert_eq!(rec.model_value, Some(0.85));
        assert_eq!(rec.obs_value, Some(0.0));
        assert_eq!(rec.bias, Some(0.85));
        assert_eq!(rec.rmse, None);

        let table = parse("TEST CASE: r (yrs 1-2)\nVariable\nRESSURF -1.5 0 0 0\nRESSURF 1 2\n");
        assert_eq!(table.len(), 1);
        let rec = &table.records()[0];
        assert_eq!((rec.model_value, rec.obs_value, rec.bias), (Some(-1.5), Some(0.0), Some(-1.5)));
    }

    #[test]
    fn test_spaced_variable_drops_prefix() {
        let table = parse(REPORT_A);
        let rec = table.rows_for_variable("FSNTOAC_CERES-EBAF").next().unwrap();
        assert_eq!(rec.model_value, Some(240.1));
        assert_eq!(rec.rmse, Some(3.2));

        let table = parse("TEST CASE: r (yrs 1-2)\nVariable\nnet SW FSNTOA_CERES-EBAF 1 2 3 4\n");
        assert_eq!(table.records()[0].variable, "FSNTOA_CERES-EBAF");
    }

    #[test]
    fn test_bad_lines_skipped() {
        let text = "TEST CASE: r (yrs 1-2)\nVariable\n\nA 1 2 3\nB 1 2 3 4 5 6\nC 1 x 3 4\nD 1.5 2 3 4 5\nE 1 2 3 4\n";
        let table = parse(text);
        let vars: Vec<&str> = table.iter().map(|r| r.variable.as_str()).collect();
        assert_eq!(vars, vec!["E"]);
    }

    #[test]
    fn test_no_data_header_gives_empty_table() {
        let table = parse("TEST CASE: r (yrs 1-2)\nTSR 1 2 3 4\nnothing here\n");
        assert!(table.is_empty());
        let table = parse("");
        assert!(table.is_empty());
    }

    #[test]
    fn test_descriptions() {
        let info: VariableInfoTable = vec![("TSR", "Net SW at TOA"), ("LWCF", "")].into_iter().collect();
        let table = parse_lines(REPORT_A.lines(), Some(&info), &ParseOptions::default()).unwrap();
        let tsr = table.rows_for_variable("TSR").next().unwrap();
        assert!(tsr.has_description);
        assert_eq!(tsr.description, "Net SW at TOA");
        let lwcf = table.rows_for_variable("LWCF").next().unwrap();
        assert!(!lwcf.has_description);
        assert_eq!(lwcf.description, "");
        assert_eq!(lwcf.key(), ("RunA", "1-10", "LWCF", ""));
    }

    #[test]
    fn test_explicit_run_id() {
        let opts = ParseOptions {
            run_id: Some("Run1".to_string()),
            verbose: true,
        };
        let table = parse_lines(REPORT_A.lines(), None, &opts).unwrap();
        assert!(table.iter().all(|r| r.run_id == "Run1"));
        assert_eq!(table.test_case(), Some("RunA"));
    }

    #[test]
    fn test_duplicate_rows_preserved() {
        let table = parse("TEST CASE: r (yrs 1-2)\nVariable\nX 1 2 3 4\nX 5 6 7 8\n");
        assert_eq!(table.len(), 2);
        assert_eq!(table.records()[1].model_value, Some(5.0));
    }

    #[test]
    fn test_header_without_years_and_no_data() {
        let table = parse_lines(
            "TEST CASE: N1850_abc\nCONTROL CASE: ctrl\nsome text\n".lines(),
            None,
            &ParseOptions::default(),
        )
        .unwrap();
        assert!(table.is_empty());
        assert_eq!(table.test_case(), None);
        assert_eq!(table.control_case(), Some("ctrl"));
    }

    #[test]
    fn test_header_without_years_fails_on_data() {
        let err = parse_lines(
            "TEST CASE: N1850_abc\nVariable\nTSR 1 2 3 4\n".lines(),
            None,
            &ParseOptions { run_id: Some("Run1".to_string()), verbose: true },
        )
        .unwrap_err();
        assert!(matches!(err, ReportError::MissingTestCase { line: 3 }));
    }

    #[test]
    fn test_header_without_closing_paren() {
        let table = parse("TEST CASE: N1850_abc (yrs 1-10\nVariable\nTSR 1 2 3 4\n");
        let rec = &table.records()[0];
        assert_eq!(rec.run_id, "N1850_abc");
        assert_eq!(rec.years, "1-10");
    }

    #[test]
    fn test_data_before_test_case() {
        let err = parse_lines("Variable\nX 1 2 3 4".lines(), None, &ParseOptions::default()).unwrap_err();
        assert!(matches!(err, ReportError::MissingTestCase { line: 2 }));
    }

    #[test]
    fn test_parse_report_latin1() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("report.txt");
        let mut bytes = b"TEST CASE: N1850_f09 (yrs 185-215)\r\nTemperature in \xb0C\r\nVariable\r\n".to_vec();
        bytes.extend_from_slice(b"TS 288.1 287.9 0.2 1.1\r\n");
        fs::write(&path, bytes).unwrap();

        let table = parse_report(&path, None, &ParseOptions::default()).unwrap();
        assert_eq!(table.len(), 1);
        let rec = &table.records()[0];
        assert_eq!(rec.run_id, "N1850_f09");
        assert_eq!(rec.years, "185-215");
        assert_eq!(rec.rmse, Some(1.1));
    }

    #[test]
    fn test_parse_report_missing_file() {
        let tmp = tempdir().unwrap();
        let err = parse_report(&tmp.path().join("missing.txt"), None, &ParseOptions::default()).unwrap_err();
        assert!(matches!(err, ReportError::Io { .. }));
    }

    #[test]
    fn test_merge_with_prefix() {
        let tmp = tempdir().unwrap();
        let a = write_report(tmp.path(), "a.txt", "N1850_abc", "TSR");
        let b = write_report(tmp.path(), "b.txt", "N1850_xyz", "TSR");

        let table = merge_reports(&[a, b], None, Some("Run"), false);
        assert_eq!(table.len(), 2);
        let labels = table.run_labels();
        assert_eq!(labels.len(), 2);
        assert_eq!(labels.original("Run1"), Some("N1850_abc"));
        assert_eq!(labels.original("Run2"), Some("N1850_xyz"));
        assert_eq!(table.distinct_run_ids(), vec!["Run1", "Run2"]);
    }

    #[test]
    fn test_merge_label_bijection() {
        let tmp = tempdir().unwrap();
        let label_re = Regex::new(r"^Run0*[1-9][0-9]*$").unwrap();
        let mut paths = Vec::new();
        for i in 0..11 {
            // f10 repeats the run of f0
            let run = format!("case_{}", i % 10);
            paths.push(write_report(tmp.path(), &format!("f{}.txt", i), &run, "AOD"));
        }

        let table = merge_reports(&paths, None, Some("Run"), false);
        let labels = table.run_labels();
        assert_eq!(labels.len(), 10);
        for (label, original) in labels.iter() {
            assert!(label_re.is_match(label), "bad label {}", label);
            assert_eq!(label.len(), "Run".len() + 2);
            assert_eq!(labels.label_for(original), Some(label));
        }
        assert_eq!(labels.original("Run01"), Some("case_0"));
        assert_eq!(table.records()[10].run_id, "Run01");
    }

    #[test]
    fn test_merge_skips_bad_files() {
        let tmp = tempdir().unwrap();
        let good = write_report(tmp.path(), "good.txt", "N1850_abc", "TSR");
        let bad = tmp.path().join("bad.txt");
        fs::write(&bad, "Variable\nTSR 1 2 3 4\nTEST CASE: late (yrs 1-2)\n").unwrap();
        let header_only = tmp.path().join("header_only.txt");
        fs::write(&header_only, "TEST CASE: N1850_xyz\n").unwrap();
        let missing = tmp.path().join("missing.txt");

        let table = merge_reports(&[bad, good, missing, header_only], None, None, true);
        assert_eq!(table.len(), 1);
        assert_eq!(table.records()[0].run_id, "N1850_abc");
        assert!(table.run_labels().is_empty());
    }

    #[test]
    fn test_merge_empty_prefix_keeps_run_ids() {
        let tmp = tempdir().unwrap();
        let a = write_report(tmp.path(), "a.txt", "N1850_abc", "TSR");
        let table = merge_reports(&[a], None, Some(""), false);
        assert_eq!(table.records()[0].run_id, "N1850_abc");
        assert!(table.run_labels().is_empty());
    }

    #[test]
    fn test_merge_nothing_readable() {
        let tmp = tempdir().unwrap();
        let table = merge_reports(&[tmp.path().join("missing.txt")], None, Some("Run"), false);
        assert!(table.is_empty());
        assert!(table.run_labels().is_empty());
    }
}

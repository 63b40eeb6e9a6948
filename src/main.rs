use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use report_merge::{merge_reports, ReportError, VariableInfoTable};
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

/* Verbosity levels:

   -1 = errors only
    0 = warnings, e.g. report files that could not be read
    1 = per-file summaries and the run label mapping
    2 = every skipped or special-cased report line
 */
fn init_logging(verbosity: i8) {
    let default_level = match verbosity {
        v if v < 0 => "error",
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let env = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    fmt::Subscriber::builder()
        .with_env_filter(env)
        .with_writer(io::stderr)
        .init();
}

fn load_var_info(cache: Option<&Path>, spreadsheet: Option<&Path>) -> Result<Option<VariableInfoTable>, ReportError> {
    match cache {
        Some(cache) => {
            let table = VariableInfoTable::load_cached(cache, spreadsheet)?;
            info!("Loaded {} variable descriptions", table.len());
            Ok(Some(table))
        },
        None => Ok(None)
    }
}

fn driver(clargs: &CmdLineArgs) -> Result<bool, String> {
    let var_info = load_var_info(clargs.var_info.as_deref(), clargs.spreadsheet.as_deref())
        .map_err(|e| e.to_string())?;

    let table = merge_reports(
        &clargs.reports,
        var_info.as_ref(),
        clargs.prefix.as_deref(),
        clargs.verbosity >= 2,
    );

    let written = match &clargs.output {
        Some(path) => {
            let f = File::create(path)
                .map_err(|e| format!("Unable to create {}: {}", path.display(), e))?;
            table.write_csv(f)
        },
        None => table.write_csv(io::stdout().lock())
    };
    written.map_err(|e| format!("Unable to write table: {}", e))?;

    info!(
        "{} rows from {} runs",
        table.len(),
        table.distinct_run_ids().len()
    );

    Ok(!table.is_empty())
}

#[derive(Debug)]
struct CmdLineArgs {
    reports: Vec<PathBuf>,
    prefix: Option<String>,
    var_info: Option<PathBuf>,
    spreadsheet: Option<PathBuf>,
    output: Option<PathBuf>,
    verbosity: i8
}

fn parse_clargs() -> CmdLineArgs {
    let yml = clap::load_yaml!("clargs.yml");
    let clargs = clap::App::from_yaml(yml).version(clap::crate_version!()).get_matches();

    let reports = clargs.values_of("reports")
        .map(|vals| vals.map(PathBuf::from).collect())
        .unwrap_or_default();
    let nverb = clargs.occurrences_of("verbose");
    let nquiet = clargs.occurrences_of("quiet");

    let args = CmdLineArgs{
        reports,
        prefix: clargs.value_of("prefix").map(String::from),
        var_info: clargs.value_of("var_info").map(PathBuf::from),
        spreadsheet: clargs.value_of("spreadsheet").map(PathBuf::from),
        output: clargs.value_of("output").map(PathBuf::from),
        verbosity: if nquiet > 0 {-1} else {nverb.min(i8::MAX as u64) as i8}
    };

    return args;
}

fn main() {
    let clargs = parse_clargs();
    init_logging(clargs.verbosity);

    match driver(&clargs) {
        Ok(has_rows) => {
            if has_rows {std::process::exit(0);}
            else {std::process::exit(1);}
        },
        Err(msg) => {
            eprintln!("ERROR: {}", msg);
            std::process::exit(2);
        }
    }
}

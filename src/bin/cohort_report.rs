use std::path::PathBuf;
use std::process::ExitCode;

use ecodash::{
    build_grid_view, compute_retention, fetch_dashboard_data, hgraph_config_from_env,
    init_logging, logging_config_from_env, shape_segment_grids, CohortGridConfig, GroupingMode,
    MissingFormationPolicy, RawMetricRow, RetentionOptions,
};

const USAGE: &str = "usage: cohort_report [--segmented] [--strict] [ROWS_JSON]";

#[derive(Debug, Default)]
struct Args {
    input: Option<PathBuf>,
    segmented: bool,
    strict: bool,
    help: bool,
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    init_logging(&logging_config_from_env())?;

    let args = parse_args(std::env::args().skip(1))?;
    if args.help {
        println!("{USAGE}");
        return Ok(());
    }
    let rows = match &args.input {
        Some(path) => {
            let raw = std::fs::read(path)
                .map_err(|err| format!("failed to read {}: {err}", path.display()))?;
            serde_json::from_slice::<Vec<RawMetricRow>>(&raw)?
        }
        None => fetch_dashboard_data(&hgraph_config_from_env())?.cohort_rows,
    };

    let options = RetentionOptions {
        mode: if args.segmented {
            GroupingMode::Segmented
        } else {
            GroupingMode::Flat
        },
        missing_formation: if args.strict {
            MissingFormationPolicy::Fail
        } else {
            MissingFormationPolicy::ZeroFill
        },
    };

    let mut config = CohortGridConfig::default();
    if let Ok(raw) = std::env::var("ECODASH_MAX_COHORTS") {
        config.max_cohorts = raw
            .trim()
            .parse()
            .map_err(|_| format!("ECODASH_MAX_COHORTS must be a whole number, got '{raw}'"))?;
    }
    config.validate()?;

    let cells = compute_retention(&rows, &options)?;
    let grids = shape_segment_grids(&cells, &config);
    if grids.is_empty() {
        println!("no cohort data");
        return Ok(());
    }

    for segment_grid in &grids {
        if let Some(segment) = &segment_grid.segment {
            println!("== segment {segment} ==");
        }
        let view = build_grid_view(&segment_grid.grid, &config);

        let mut header = format!("{:<14}{:>10}", "Cohort", "Users");
        for column in &view.columns {
            header.push_str(&format!("{column:>10}"));
        }
        println!("{header}");

        for row in &view.rows {
            let mut line = format!("{:<14}{:>10}", row.cohort_label, row.size_label);
            for cell in &row.cells {
                let label = cell.as_ref().map(|cell| cell.label.as_str()).unwrap_or("");
                line.push_str(&format!("{label:>10}"));
            }
            println!("{line}");
        }
        println!();
    }

    Ok(())
}

fn parse_args(args: impl Iterator<Item = String>) -> Result<Args, String> {
    let mut parsed = Args::default();
    for arg in args {
        match arg.as_str() {
            "--segmented" => parsed.segmented = true,
            "--strict" => parsed.strict = true,
            "-h" | "--help" => parsed.help = true,
            flag if flag.starts_with("--") => {
                return Err(format!("unknown flag {flag}\n{USAGE}"));
            }
            path => {
                if parsed.input.is_some() {
                    return Err(format!("only one input file is accepted\n{USAGE}"));
                }
                parsed.input = Some(PathBuf::from(path));
            }
        }
    }
    Ok(parsed)
}

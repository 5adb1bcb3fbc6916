use std::env;
use std::path::{Path, PathBuf};
use std::process;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use log::{info, warn};
use serde_json::json;

use rusty_eda::analysis::index::normalize;
use rusty_eda::analysis::pivot::{pivot, PivotOptions};
use rusty_eda::analysis::ticks::{select_ticks, TickOptions};
use rusty_eda::analysis::waterfall::{waterfall_traces, TraceSelection};
use rusty_eda::config::{self, ImportConfig, SimulationConfig};
use rusty_eda::data::directory::{concat_runs, import_directory, FILE_INDEX, RUN_ID};
use rusty_eda::data::loader::load_table;
use rusty_eda::data::store::{file_id_from_metadata, MetadataOverwrite, OverwritePolicy, Store};
use rusty_eda::data::writer::{write_matrix_csv, write_table};
use rusty_eda::fit::{fit_each_dataset, FitOptions, Parameters};
use rusty_eda::parallel::PoolOptions;
use rusty_eda::simulation::{trkr_model, TrkrParams};

enum Command {
    Import(ImportArgs),
    Pivot(PivotArgs),
    Ticks(TicksArgs),
    Fit(FitArgs),
}

#[derive(Debug, Default)]
struct ImportArgs {
    dir: PathBuf,
    config: Option<PathBuf>,
    levels: Vec<String>,
    output: Option<PathBuf>,
    db: Option<PathBuf>,
    raw_policy: OverwritePolicy,
    metadata_policy: MetadataOverwrite,
}

#[derive(Debug, Default)]
struct PivotArgs {
    input: PathBuf,
    index: Vec<String>,
    data: String,
    options: PivotOptions,
    output: Option<PathBuf>,
    waterfall: Option<usize>,
}

#[derive(Debug, Default)]
struct TicksArgs {
    input: Option<PathBuf>,
    column: Option<String>,
    values: Vec<f64>,
    options: TickOptions,
}

#[derive(Debug)]
struct FitArgs {
    input: PathBuf,
    index: Vec<String>,
    x_columns: Vec<String>,
    measured: String,
    params: Option<PathBuf>,
    pool: PoolOptions,
    output: Option<PathBuf>,
}

impl Default for FitArgs {
    fn default() -> Self {
        Self {
            input: PathBuf::new(),
            index: Vec::new(),
            x_columns: vec!["probe_delay".to_string(), "b_external".to_string()],
            measured: "kerr_rotation".to_string(),
            params: None,
            pool: PoolOptions::sequential(),
            output: None,
        }
    }
}

fn main() {
    env_logger::init();
    if let Err(err) = run() {
        eprintln!("error: {err:#}");
        process::exit(1);
    }
}

fn run() -> Result<()> {
    let Some(command) = parse_cli_from_env()? else {
        return Ok(());
    };
    match command {
        Command::Import(args) => handle_import(args),
        Command::Pivot(args) => handle_pivot(args),
        Command::Ticks(args) => handle_ticks(args),
        Command::Fit(args) => handle_fit(args),
    }
}

// ---------------------------------------------------------------------------
// Argument parsing
// ---------------------------------------------------------------------------

fn parse_cli_from_env() -> Result<Option<Command>> {
    let args = env::args().skip(1).collect::<Vec<_>>();
    if args.is_empty() || matches!(args[0].as_str(), "-h" | "--help") {
        print_root_help();
        return Ok(None);
    }
    if matches!(args[0].as_str(), "-V" | "--version") {
        println!("rusty-eda {}", env!("CARGO_PKG_VERSION"));
        return Ok(None);
    }

    let rest = &args[1..];
    let command = match args[0].as_str() {
        "import" => Command::Import(parse_import_args(rest)?),
        "pivot" => Command::Pivot(parse_pivot_args(rest)?),
        "ticks" => Command::Ticks(parse_ticks_args(rest)?),
        "fit" => Command::Fit(parse_fit_args(rest)?),
        other => bail!("unknown command '{other}'; expected one of: import, pivot, ticks, fit"),
    };
    Ok(Some(command))
}

fn split_flag(token: &str) -> Result<(&str, Option<String>)> {
    if !token.starts_with("--") {
        bail!("unexpected positional argument '{token}'; expected --flag value");
    }
    if let Some((flag, value)) = token.split_once('=') {
        return Ok((flag, Some(value.to_string())));
    }
    Ok((token, None))
}

fn take_flag_value(flag: &str, inline_value: Option<String>, tokens: &[String], idx: &mut usize) -> Result<String> {
    if let Some(value) = inline_value {
        return Ok(value);
    }
    *idx += 1;
    let value = tokens
        .get(*idx)
        .with_context(|| format!("{flag} requires a value"))?;
    if value.starts_with("--") {
        bail!("{flag} requires a value, but got option '{value}'");
    }
    Ok(value.clone())
}

fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_number<T: std::str::FromStr>(raw: &str, flag: &str) -> Result<T> {
    raw.parse::<T>()
        .map_err(|_| anyhow::anyhow!("{flag} expects a number, got '{raw}'"))
}

fn parse_import_args(tokens: &[String]) -> Result<ImportArgs> {
    let mut args = ImportArgs {
        levels: vec![RUN_ID.to_string(), FILE_INDEX.to_string()],
        ..ImportArgs::default()
    };
    let mut idx = 0usize;
    while idx < tokens.len() {
        let (flag, inline_value) = split_flag(tokens[idx].as_str())?;
        match flag {
            "--dir" => args.dir = PathBuf::from(take_flag_value(flag, inline_value, tokens, &mut idx)?),
            "--config" => args.config = Some(PathBuf::from(take_flag_value(flag, inline_value, tokens, &mut idx)?)),
            "--levels" => args.levels = parse_list(&take_flag_value(flag, inline_value, tokens, &mut idx)?),
            "--output" => args.output = Some(PathBuf::from(take_flag_value(flag, inline_value, tokens, &mut idx)?)),
            "--db" => args.db = Some(PathBuf::from(take_flag_value(flag, inline_value, tokens, &mut idx)?)),
            "--raw-policy" => args.raw_policy = take_flag_value(flag, inline_value, tokens, &mut idx)?.parse()?,
            "--metadata-policy" => {
                args.metadata_policy = take_flag_value(flag, inline_value, tokens, &mut idx)?.parse()?
            }
            other => bail!("unknown import option '{other}'"),
        }
        idx += 1;
    }
    if args.dir.as_os_str().is_empty() {
        bail!("import requires --dir <path>");
    }
    Ok(args)
}

fn parse_pivot_args(tokens: &[String]) -> Result<PivotArgs> {
    let mut args = PivotArgs::default();
    let mut idx = 0usize;
    while idx < tokens.len() {
        let (flag, inline_value) = split_flag(tokens[idx].as_str())?;
        match flag {
            "--input" => args.input = PathBuf::from(take_flag_value(flag, inline_value, tokens, &mut idx)?),
            "--index" => args.index = parse_list(&take_flag_value(flag, inline_value, tokens, &mut idx)?),
            "--data" => args.data = take_flag_value(flag, inline_value, tokens, &mut idx)?,
            "--x" => args.options.x_values_column = Some(take_flag_value(flag, inline_value, tokens, &mut idx)?),
            "--y" => args.options.y_values_column = Some(take_flag_value(flag, inline_value, tokens, &mut idx)?),
            "--fill" => {
                let raw = take_flag_value(flag, inline_value, tokens, &mut idx)?;
                args.options.fill_value = parse_number(&raw, flag)?;
            }
            "--force-no-xvals-conflicts" => args.options.force_no_xvals_conflicts = true,
            "--output" => args.output = Some(PathBuf::from(take_flag_value(flag, inline_value, tokens, &mut idx)?)),
            "--waterfall" => {
                let raw = take_flag_value(flag, inline_value, tokens, &mut idx)?;
                args.waterfall = Some(parse_number(&raw, flag)?);
            }
            other => bail!("unknown pivot option '{other}'"),
        }
        idx += 1;
    }
    if args.input.as_os_str().is_empty() || args.data.is_empty() {
        bail!("pivot requires --input <path> and --data <column>");
    }
    Ok(args)
}

fn parse_ticks_args(tokens: &[String]) -> Result<TicksArgs> {
    let mut args = TicksArgs::default();
    let mut idx = 0usize;
    while idx < tokens.len() {
        let (flag, inline_value) = split_flag(tokens[idx].as_str())?;
        match flag {
            "--input" => args.input = Some(PathBuf::from(take_flag_value(flag, inline_value, tokens, &mut idx)?)),
            "--column" => args.column = Some(take_flag_value(flag, inline_value, tokens, &mut idx)?),
            "--values" => {
                let raw = take_flag_value(flag, inline_value, tokens, &mut idx)?;
                args.values = parse_list(&raw)
                    .iter()
                    .map(|v| parse_number(v, flag))
                    .collect::<Result<_>>()?;
            }
            "--count" => {
                let raw = take_flag_value(flag, inline_value, tokens, &mut idx)?;
                args.options.linear_tick_count = parse_number(&raw, flag)?;
            }
            "--round" => args.options.round_dense_values = true,
            other => bail!("unknown ticks option '{other}'"),
        }
        idx += 1;
    }
    if args.values.is_empty() && (args.input.is_none() || args.column.is_none()) {
        bail!("ticks requires --values <v1,v2,...> or --input <path> --column <name>");
    }
    Ok(args)
}

fn parse_fit_args(tokens: &[String]) -> Result<FitArgs> {
    let mut args = FitArgs::default();
    let mut idx = 0usize;
    while idx < tokens.len() {
        let (flag, inline_value) = split_flag(tokens[idx].as_str())?;
        match flag {
            "--input" => args.input = PathBuf::from(take_flag_value(flag, inline_value, tokens, &mut idx)?),
            "--index" => args.index = parse_list(&take_flag_value(flag, inline_value, tokens, &mut idx)?),
            "--x" => args.x_columns = parse_list(&take_flag_value(flag, inline_value, tokens, &mut idx)?),
            "--measured" => args.measured = take_flag_value(flag, inline_value, tokens, &mut idx)?,
            "--params" => args.params = Some(PathBuf::from(take_flag_value(flag, inline_value, tokens, &mut idx)?)),
            "--parallel" => args.pool.parallel = true,
            "--workers" => {
                let raw = take_flag_value(flag, inline_value, tokens, &mut idx)?;
                args.pool.workers = parse_number(&raw, flag)?;
            }
            "--timeout" => {
                let raw = take_flag_value(flag, inline_value, tokens, &mut idx)?;
                args.pool.task_timeout = Duration::from_secs_f64(parse_number(&raw, flag)?);
            }
            "--output" => args.output = Some(PathBuf::from(take_flag_value(flag, inline_value, tokens, &mut idx)?)),
            other => bail!("unknown fit option '{other}'"),
        }
        idx += 1;
    }
    if args.input.as_os_str().is_empty() {
        bail!("fit requires --input <path>");
    }
    Ok(args)
}

fn print_root_help() {
    println!(
        "rusty-eda {}\n\nUSAGE:\n  rusty-eda <COMMAND> [OPTIONS]\n\nCOMMANDS:\n  \
         import   Import a directory of instrument files into one table\n  \
         pivot    Pivot a table into an X/Y/Z grid and write the Z matrix\n  \
         ticks    Pick axis ticks for a coordinate vector\n  \
         fit      Fit the TRKR model to every dataset of a table\n\n\
         Index columns are given as --index a,b,c. Set RUST_LOG=info for progress.",
        env!("CARGO_PKG_VERSION")
    );
}

fn as_strs(names: &[String]) -> Vec<&str> {
    names.iter().map(String::as_str).collect()
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

fn handle_import(args: ImportArgs) -> Result<()> {
    let config: ImportConfig = match &args.config {
        Some(path) => config::load_json(path)?,
        None => ImportConfig::default(),
    };
    let files = import_directory(&args.dir, &config)?;
    if files.is_empty() {
        bail!("no files imported from {}", args.dir.display());
    }

    if let Some(db) = &args.db {
        let mut store = Store::open(db)?;
        let mut written = 0;
        for file in &files {
            let file_id = match file_id_from_metadata(&file.metadata) {
                Ok(id) => id,
                Err(e) => {
                    warn!("not archiving {}: {e:#}", file.path.display());
                    continue;
                }
            };
            if store.add_file_to_raw_data_if_missing(&file_id, &file.table, args.raw_policy)? {
                written += 1;
            }
            store.update_metadata(&file_id, &file.metadata, args.metadata_policy)?;
        }
        info!("archived {written} of {} files into {}", files.len(), db.display());
    }

    let table = concat_runs(&files, &as_strs(&args.levels))?;
    println!("imported {} files, {} rows, {} columns", files.len(), table.len(), table.columns().len());
    if let Some(output) = &args.output {
        write_table(&table, output)?;
    }
    Ok(())
}

fn load_indexed(input: &Path, index: &[String]) -> Result<rusty_eda::Table> {
    load_table(input, &as_strs(index))
}

fn handle_pivot(args: PivotArgs) -> Result<()> {
    let table = load_indexed(&args.input, &args.index)?;
    let grid = pivot(&table, &args.data, &args.options)?;
    let (nrows, ncols) = grid.shape();
    if !args.options.force_no_xvals_conflicts && grid.has_x_conflicts() {
        warn!("x values differ within grid columns; consider --force-no-xvals-conflicts");
    }
    let axes = grid.collapse_axes();
    println!("{}", json!({ "rows": nrows, "columns": ncols, "x": &axes.x, "y": &axes.y }));

    if let Some(output) = &args.output {
        write_matrix_csv(&axes.z, output)?;
    }
    if let Some(count) = args.waterfall {
        for trace in waterfall_traces(&axes, &TraceSelection::Count(count)) {
            println!(
                "{}",
                json!({ "row": trace.row, "label": trace.label, "x": trace.x, "z": trace.z })
            );
        }
    }
    Ok(())
}

fn handle_ticks(args: TicksArgs) -> Result<()> {
    let coords = match (&args.input, &args.column) {
        (Some(input), Some(column)) if args.values.is_empty() => {
            let table = load_table(input, &[])?;
            table.column_f64(column)?
        }
        _ => args.values.clone(),
    };
    let ticks = select_ticks(&coords, &args.options);
    println!(
        "{}",
        json!({
            "major_indices": ticks.major_indices,
            "major_values": ticks.major_values,
            "minor_positions": ticks.minor_positions,
            "minor_values": ticks.minor_values,
        })
    );
    Ok(())
}

fn handle_fit(args: FitArgs) -> Result<()> {
    let table = load_indexed(&args.input, &args.index)?;
    let normalized = normalize(&table)?;
    if !normalized.dropped_levels.is_empty() {
        info!("fitting per combination of {:?}", normalized.dropped_levels);
    }
    let params: Parameters = match &args.params {
        Some(path) => config::load_json(path)?,
        None => default_trkr_start(),
    };
    let options = FitOptions {
        pool: args.pool.clone(),
        ..FitOptions::default()
    };
    let fits = fit_each_dataset(
        &normalized.table,
        trkr_model,
        &params,
        &as_strs(&args.x_columns),
        &args.measured,
        &options,
    )?;
    for (dataset, result) in &fits.results {
        println!(
            "{}",
            json!({
                "dataset": dataset.to_string(),
                "params": result.params.values_dict(),
                "reduced_chi_square": result.reduced_chi_square,
                "converged": result.converged,
            })
        );
    }
    if let Some(output) = &args.output {
        write_table(&fits.summary, output).context("writing fit summary")?;
    }
    Ok(())
}

/// Starting point at the center of the default simulation distribution,
/// with the g-factor and initial phase held fixed.
fn default_trkr_start() -> Parameters {
    let c = SimulationConfig::default();
    let mut params = TrkrParams {
        pulse_amplitude: c.pulse_amplitude_mean,
        gfactor: c.gfactor,
        spin_lifetime: c.spin_lifetime_mean,
        initial_phase: c.initial_phase,
        extra_phase_offset: c.extra_phase_offset_baseline,
        slope: 0.0,
        offset: 0.0,
    }
    .to_parameters();
    for name in ["gfactor", "initial_phase"] {
        if let Some(p) = params.get_mut(name) {
            p.vary = false;
        }
    }
    params
}

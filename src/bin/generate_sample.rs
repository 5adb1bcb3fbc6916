use std::env;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use log::info;

use rusty_eda::config::{self, SimulationConfig};
use rusty_eda::data::writer::write_table;
use rusty_eda::simulation::{generate_params, generate_table};

/// Delays in ps, from `start` in steps of `step`.
fn delay_axis(start: f64, step: f64, count: usize) -> Vec<f64> {
    (0..count).map(|i| start + i as f64 * step).collect()
}

/// Usage: generate_sample [output.parquet|output.csv] [--seed N] [--config sim.json]
fn main() -> Result<()> {
    env_logger::init();

    let mut output = PathBuf::from("sample_data.parquet");
    let mut seed = 42u64;
    let mut sim_config = SimulationConfig::default();

    let args: Vec<String> = env::args().skip(1).collect();
    let mut idx = 0;
    while idx < args.len() {
        match args[idx].as_str() {
            "--seed" => {
                idx += 1;
                let raw = args.get(idx).context("--seed requires a value")?;
                seed = raw.parse().with_context(|| format!("--seed expects an integer, got '{raw}'"))?;
            }
            "--config" => {
                idx += 1;
                let raw = args.get(idx).context("--config requires a value")?;
                sim_config = config::load_json(&PathBuf::from(raw))?;
            }
            flag if flag.starts_with("--") => bail!("unknown option '{flag}'"),
            path => output = PathBuf::from(path),
        }
        idx += 1;
    }

    // 400 delays from -500 ps, 25 field values from -100 mT to 100 mT
    let tvals = delay_axis(-500.0, 20.0, 400);
    let bvals: Vec<f64> = (0..25).map(|i| -100.0 + i as f64 * 200.0 / 24.0).collect();

    let params = generate_params(tvals.len(), bvals.len(), &sim_config, seed)?;
    let table = generate_table(&tvals, &bvals, &params)?;
    write_table(&table, &output)?;

    info!("seed {seed}, {} field values", bvals.len());
    println!(
        "Wrote {} scans ({} delays each) to {}",
        bvals.len(),
        tvals.len(),
        output.display()
    );
    Ok(())
}

//! Fitting over every dataset of a table.
//!
//! [`fit_each_dataset`] runs one independent fit per dataset (optionally on
//! the worker pool); [`fit_linked_datasets`] runs a single global fit over
//! the stacked matrices of all datasets and unpacks the shared parameter
//! vector into per-dataset parameter sets. Both finish by collapsing the
//! table into a summary table with one row per fitted dataset.

use std::collections::BTreeMap;
use std::sync::Arc;

use log::{info, warn};
use nalgebra::DMatrix;

use super::minimize::{minimize, MinimizerOptions, MinimizerResult};
use super::params::Parameters;
use super::residuals::ModelResiduals;
use crate::analysis::collapse::{collapse_datasets, CollapseOptions};
use crate::analysis::extract::{extract_matrices, extract_vectors_by_dataset};
use crate::analysis::index::normalize;
use crate::data::model::{Table, Value};
use crate::error::Result;
use crate::parallel::{parallel_map, PoolOptions};

/// Knobs shared by the dataset fitting routines.
#[derive(Debug, Clone, Default)]
pub struct FitOptions {
    pub minimizer: MinimizerOptions,
    pub pool: PoolOptions,
    pub collapse: CollapseOptions,
}

/// Independent fits, keyed by dataset.
#[derive(Debug, Clone)]
pub struct DatasetFits {
    pub results: BTreeMap<Value, MinimizerResult>,
    /// One row per fitted dataset: constant columns plus fit parameters.
    pub summary: Table,
}

/// A single global fit shared by all datasets.
#[derive(Debug, Clone)]
pub struct LinkedFit {
    pub result: MinimizerResult,
    /// The global parameters unpacked for each dataset.
    pub per_dataset: BTreeMap<Value, Parameters>,
    pub summary: Table,
}

/// Fit `model` to each dataset separately.
///
/// The table is normalized to (dataset, sample) first. Rows whose measured
/// value or any independent variable is NaN are left out of the fit;
/// datasets with no usable rows are skipped with a warning and do not
/// appear in the summary.
pub fn fit_each_dataset<M>(
    table: &Table,
    model: M,
    params: &Parameters,
    x_columns: &[&str],
    measured_column: &str,
    options: &FitOptions,
) -> Result<DatasetFits>
where
    M: Fn(&[f64], &Parameters) -> Result<f64> + Send + Sync + 'static,
{
    let normalized = normalize(table)?.table;
    let mut wanted: Vec<&str> = x_columns.to_vec();
    wanted.push(measured_column);
    let datasets = extract_vectors_by_dataset(&normalized, &wanted)?;

    let nx = x_columns.len();
    let mut tasks = Vec::with_capacity(datasets.len());
    for dataset in &datasets {
        let xs: Vec<Vec<f64>> = (0..nx).map(|i| dataset.numeric(i)).collect();
        let y = dataset.numeric(nx);
        let keep: Vec<usize> = (0..y.len())
            .filter(|&k| !y[k].is_nan() && xs.iter().all(|x| !x[k].is_nan()))
            .collect();
        if keep.is_empty() {
            warn!("fit_each_dataset: dataset {} has no usable points, skipping", dataset.key);
            continue;
        }
        let xs: Vec<Vec<f64>> = xs.iter().map(|x| keep.iter().map(|&k| x[k]).collect()).collect();
        let y: Vec<f64> = keep.iter().map(|&k| y[k]).collect();
        tasks.push((dataset.key.clone(), xs, y));
    }

    let residuals = Arc::new(ModelResiduals::new(model, x_columns));
    let start = params.clone();
    let minimizer = options.minimizer.clone();
    let ntasks = tasks.len();
    let fitted = parallel_map(
        tasks,
        move |(key, xs, y): (Value, Vec<Vec<f64>>, Vec<f64>)| {
            let xs: Vec<&[f64]> = xs.iter().map(Vec::as_slice).collect();
            let result = minimize(|p: &Parameters| residuals.evaluate(p, &xs, Some(y.as_slice())), &start, &minimizer)?;
            Ok((key, result))
        },
        &options.pool,
    )?;
    info!("fit_each_dataset: fitted {ntasks} of {} datasets", datasets.len());

    let results: BTreeMap<Value, MinimizerResult> = fitted.into_iter().collect();
    let by_dataset: BTreeMap<Value, Parameters> =
        results.iter().map(|(k, r)| (k.clone(), r.params.clone())).collect();
    let summary = summarize(&normalized, &by_dataset, &params.names(), &options.collapse)?;
    Ok(DatasetFits { results, summary })
}

/// Fit all datasets at once.
///
/// `residuals` receives the parameters, one `(datasets × samples)` matrix per
/// x column and the matrix of measured values, and returns the flattened
/// residual vector. `unpack` turns the global parameters into the parameter
/// set of one dataset for the summary table.
pub fn fit_linked_datasets<F, U>(
    table: &Table,
    residuals: F,
    params: &Parameters,
    unpack: U,
    x_columns: &[&str],
    measured_column: &str,
    options: &FitOptions,
) -> Result<LinkedFit>
where
    F: Fn(&Parameters, &[DMatrix<f64>], &DMatrix<f64>) -> Result<Vec<f64>>,
    U: Fn(&Parameters, &Value) -> Result<Parameters>,
{
    let normalized = normalize(table)?.table;
    let mut wanted: Vec<&str> = x_columns.to_vec();
    wanted.push(measured_column);
    let mut matrices = extract_matrices(&normalized, &wanted)?;
    let measured = matrices.pop().unwrap_or_else(|| DMatrix::zeros(0, 0));

    let result = minimize(|p: &Parameters| residuals(p, &matrices, &measured), params, &options.minimizer)?;

    let mut per_dataset = BTreeMap::new();
    let mut names: Vec<String> = Vec::new();
    for key in normalized.group_by_level(0).into_keys() {
        let unpacked = unpack(&result.params, &key)?;
        for name in unpacked.names() {
            if !names.contains(&name) {
                names.push(name);
            }
        }
        per_dataset.insert(key, unpacked);
    }
    info!(
        "fit_linked_datasets: {} datasets, {} varying parameters, chi2 {:.6e}",
        per_dataset.len(),
        result.n_varys,
        result.chi_square
    );
    let summary = summarize(&normalized, &per_dataset, &names, &options.collapse)?;
    Ok(LinkedFit {
        result,
        per_dataset,
        summary,
    })
}

fn summarize(
    normalized: &Table,
    by_dataset: &BTreeMap<Value, Parameters>,
    names: &[String],
    collapse: &CollapseOptions,
) -> Result<Table> {
    let fitted_rows: Vec<usize> = normalized
        .rows()
        .iter()
        .enumerate()
        .filter(|(_, r)| by_dataset.contains_key(&r.key[0]))
        .map(|(i, _)| i)
        .collect();
    let fitted_only = normalized.select_rows(&fitted_rows);
    if fitted_only.is_empty() {
        return Ok(Table::new([normalized.index_names()[0].clone()], Vec::<String>::new()));
    }
    collapse_datasets(&fitted_only, by_dataset, names, collapse)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(x: &[f64], p: &Parameters) -> Result<f64> {
        Ok(p.require("slope")? * x[0] + p.require("offset")?)
    }

    fn two_lines() -> Table {
        let mut t = Table::new(["run", "i"], ["t", "signal", "field"]);
        for (run, slope) in [(0i64, 2.0), (1, -1.0)] {
            for i in 0..10i64 {
                let x = i as f64;
                t.push_row(
                    vec![run.into(), i.into()],
                    vec![x.into(), (slope * x + 1.0).into(), (run as f64 * 10.0).into()],
                )
                .unwrap();
            }
        }
        t
    }

    #[test]
    fn fits_each_dataset_separately() {
        let params = Parameters::new().add("slope", 0.0).add("offset", 0.0);
        for pool in [PoolOptions::sequential(), PoolOptions::parallel().workers(2)] {
            let options = FitOptions {
                pool,
                ..FitOptions::default()
            };
            let fits = fit_each_dataset(&two_lines(), line, &params, &["t"], "signal", &options).unwrap();
            assert_eq!(fits.results.len(), 2);
            let slope = fits.results[&Value::Integer(1)].params.value("slope").unwrap();
            assert!((slope + 1.0).abs() < 1e-6);
            assert_eq!(fits.summary.len(), 2);
            assert!(fits.summary.has_column("slope"));
            assert!(fits.summary.has_column("field"));
            assert!(!fits.summary.has_column("t"));
        }
    }

    #[test]
    fn linked_fit_shares_the_offset() {
        let params = Parameters::new()
            .add("slope_0", 0.0)
            .add("slope_1", 0.0)
            .add("offset", 0.0);
        let fit = fit_linked_datasets(
            &two_lines(),
            |p: &Parameters, xs: &[DMatrix<f64>], y: &DMatrix<f64>| {
                let slopes = [p.require("slope_0")?, p.require("slope_1")?];
                let offset = p.require("offset")?;
                let mut out = Vec::new();
                for i in 0..y.nrows() {
                    for j in 0..y.ncols() {
                        out.push(y[(i, j)] - (slopes[i] * xs[0][(i, j)] + offset));
                    }
                }
                Ok(out)
            },
            &params,
            |p: &Parameters, key: &Value| {
                let i = key.as_f64().unwrap_or(0.0) as usize;
                Ok(Parameters::new()
                    .add("slope", p.require(&format!("slope_{i}"))?)
                    .add("offset", p.require("offset")?))
            },
            &["t"],
            "signal",
            &FitOptions::default(),
        )
        .unwrap();
        assert!((fit.result.params.value("offset").unwrap() - 1.0).abs() < 1e-6);
        assert_eq!(fit.per_dataset.len(), 2);
        assert!((fit.per_dataset[&Value::Integer(0)].value("slope").unwrap() - 2.0).abs() < 1e-6);
        assert_eq!(fit.summary.len(), 2);
    }
}

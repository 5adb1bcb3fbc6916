//! Fold each dataset into a single summary row carrying its fit results.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use log::debug;

use crate::data::model::{Table, Value};
use crate::error::{EdaError, Result};
use crate::fit::Parameters;

/// Reduces a whole column of one dataset to a single value.
pub type Aggregator = Arc<dyn Fn(&[Value]) -> Value + Send + Sync>;

/// Column handling when collapsing a dataset.
#[derive(Clone)]
pub struct CollapseOptions {
    /// Column name → aggregation applied to that column.
    pub aggregators: BTreeMap<String, Aggregator>,
    /// Keep columns whose value is identical on every row.
    pub keep_constant_columns: bool,
}

impl Default for CollapseOptions {
    fn default() -> Self {
        Self {
            aggregators: BTreeMap::new(),
            keep_constant_columns: true,
        }
    }
}

impl fmt::Debug for CollapseOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CollapseOptions")
            .field("aggregators", &self.aggregators.keys().collect::<Vec<_>>())
            .field("keep_constant_columns", &self.keep_constant_columns)
            .finish()
    }
}

impl CollapseOptions {
    /// Register an aggregator for `column`.
    pub fn aggregate(mut self, column: impl Into<String>, aggregator: Aggregator) -> Self {
        self.aggregators.insert(column.into(), aggregator);
        self
    }

    pub fn keep_constant_columns(mut self, keep: bool) -> Self {
        self.keep_constant_columns = keep;
        self
    }
}

/// Common aggregators.
pub mod aggregate {
    use std::sync::Arc;

    use super::Aggregator;
    use crate::data::model::Value;

    fn numeric(values: &[Value]) -> impl Iterator<Item = f64> + '_ {
        values.iter().filter_map(Value::as_f64).filter(|v| !v.is_nan())
    }

    /// `max - min` of the numeric cells (e.g. elapsed time of a scan).
    pub fn span() -> Aggregator {
        Arc::new(|values: &[Value]| {
            let (lo, hi) = numeric(values).fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
                (lo.min(v), hi.max(v))
            });
            if lo > hi {
                Value::Null
            } else {
                Value::Float(hi - lo)
            }
        })
    }

    /// Arithmetic mean of the numeric cells.
    pub fn mean() -> Aggregator {
        Arc::new(|values: &[Value]| {
            let (sum, n) = numeric(values).fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
            if n == 0 {
                Value::Null
            } else {
                Value::Float(sum / n as f64)
            }
        })
    }

    pub fn min() -> Aggregator {
        Arc::new(|values: &[Value]| numeric(values).reduce(f64::min).map_or(Value::Null, Value::Float))
    }

    pub fn max() -> Aggregator {
        Arc::new(|values: &[Value]| numeric(values).reduce(f64::max).map_or(Value::Null, Value::Float))
    }

    pub fn first() -> Aggregator {
        Arc::new(|values: &[Value]| values.first().cloned().unwrap_or(Value::Null))
    }
}

/// One dataset reduced to a row.
#[derive(Debug, Clone, PartialEq)]
pub struct SummaryRow {
    pub dataset: Value,
    pub columns: Vec<String>,
    pub values: Vec<Value>,
}

impl SummaryRow {
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns.iter().position(|c| c == column).map(|i| &self.values[i])
    }

    fn push(&mut self, column: String, value: Value) {
        self.columns.push(column);
        self.values.push(value);
    }
}

/// Collapse the rows of one dataset into a summary row.
///
/// Columns keep their original order; fit parameters follow, each with a
/// `<name>_error` column when its standard error is known and nonzero.
pub fn collapse(
    dataset: &Table,
    fitted_params: &BTreeMap<Value, Parameters>,
    params_to_add: &[String],
    options: &CollapseOptions,
) -> Result<SummaryRow> {
    let nlevels = dataset.nlevels();
    if nlevels < 2 {
        return Err(EdaError::NotADataset(format!(
            "expected a (dataset, sample) index, found {nlevels} level(s)"
        )));
    }
    if dataset.is_empty() {
        return Err(EdaError::NotADataset("no rows".to_string()));
    }
    let outer = nlevels - 2;
    let keys: BTreeSet<&Value> = dataset.rows().iter().map(|r| &r.key[outer]).collect();
    if keys.len() > 1 {
        return Err(EdaError::NotADataset(format!("rows span {} datasets", keys.len())));
    }
    let dataset_key = dataset.rows()[0].key[outer].clone();

    let mut row = SummaryRow {
        dataset: dataset_key.clone(),
        columns: Vec::new(),
        values: Vec::new(),
    };
    for (idx, name) in dataset.columns().iter().enumerate() {
        let column: Vec<Value> = dataset.rows().iter().map(|r| r.values[idx].clone()).collect();
        if let Some(agg) = options.aggregators.get(name) {
            row.push(name.clone(), agg(column.as_slice()));
        } else if options.keep_constant_columns && column.iter().all(|v| *v == column[0]) {
            row.push(name.clone(), column[0].clone());
        } else {
            debug!("collapse: dropping non-constant column '{name}' for dataset {dataset_key}");
        }
    }

    let params = fitted_params
        .get(&dataset_key)
        .ok_or_else(|| EdaError::NoFitForDataset(dataset_key.to_string()))?;
    for name in params_to_add {
        let Some(param) = params.get(name) else {
            continue;
        };
        row.push(name.clone(), Value::Float(param.value));
        if let Some(stderr) = param.stderr.filter(|e| *e != 0.0) {
            row.push(format!("{name}_error"), Value::Float(stderr));
        }
    }
    Ok(row)
}

/// Collapse every dataset of a 2-level table into one summary table indexed
/// by dataset key. Columns are the union over datasets; gaps are null.
pub fn collapse_datasets(
    table: &Table,
    fitted_params: &BTreeMap<Value, Parameters>,
    params_to_add: &[String],
    options: &CollapseOptions,
) -> Result<Table> {
    let nlevels = table.nlevels();
    if nlevels > 2 {
        return Err(EdaError::TooManyLevels { nlevels });
    }
    if nlevels < 2 {
        return Err(EdaError::NotADataset(format!(
            "expected a (dataset, sample) index, found {nlevels} level(s)"
        )));
    }
    let outer_name = table.index_names()[0].clone();
    let mut rows = Vec::new();
    for (_, indices) in table.group_by_level(0) {
        let summary = collapse(&table.select_rows(&indices), fitted_params, params_to_add, options)?;
        let mut one = Table::new([outer_name.clone()], summary.columns);
        one.push_row(vec![summary.dataset], summary.values)?;
        rows.push(one);
    }
    Table::concat_union(&rows)
}

//! Pull per-dataset vectors and stacked matrices out of a 2-level table,
//! in the shape fitting routines want them.

use std::collections::{BTreeMap, BTreeSet};

use log::{debug, warn};
use nalgebra::DMatrix;

use crate::data::model::{Table, Value};
use crate::error::{EdaError, Result};

/// The requested columns of one dataset.
#[derive(Debug, Clone, PartialEq)]
pub struct DatasetColumns {
    /// Outer key of the dataset (`Null` for a table without a dataset level).
    pub key: Value,
    /// One vector per requested column, rows in source order.
    pub columns: Vec<Vec<Value>>,
}

impl DatasetColumns {
    /// Numeric view of the `i`-th requested column.
    pub fn numeric(&self, i: usize) -> Vec<f64> {
        self.columns[i].iter().map(Value::to_f64_or_nan).collect()
    }

    /// Number of samples in the dataset.
    pub fn len(&self) -> usize {
        self.columns.first().map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn column_positions(table: &Table, names: &[&str]) -> Result<Vec<usize>> {
    names.iter().map(|n| table.column_index(n)).collect()
}

/// One entry per distinct outer key, in sorted key order.
///
/// A table with fewer than two index levels is treated as a single dataset.
pub fn extract_vectors_by_dataset(table: &Table, column_names: &[&str]) -> Result<Vec<DatasetColumns>> {
    let nlevels = table.nlevels();
    if nlevels > 2 {
        return Err(EdaError::TooManyLevels { nlevels });
    }
    let positions = column_positions(table, column_names)?;
    let gather = |rows: &[usize]| -> Vec<Vec<Value>> {
        positions
            .iter()
            .map(|&p| rows.iter().map(|&r| table.rows()[r].values[p].clone()).collect())
            .collect()
    };

    if nlevels < 2 {
        let all: Vec<usize> = (0..table.len()).collect();
        return Ok(vec![DatasetColumns {
            key: Value::Null,
            columns: gather(&all),
        }]);
    }

    Ok(table
        .group_by_level(0)
        .into_iter()
        .map(|(key, rows)| DatasetColumns {
            key,
            columns: gather(&rows),
        })
        .collect())
}

/// One `(datasets × samples)` matrix per requested column.
///
/// Samples are aligned on the inner key. When the inner keys differ between
/// datasets so that the aligned grid would be wider than the first dataset,
/// every dataset is instead re-labelled positionally with the first
/// dataset's inner keys; that fallback requires equal sample counts and
/// fails with `RaggedDataset` otherwise. Missing cells are NaN.
pub fn extract_matrices(table: &Table, column_names: &[&str]) -> Result<Vec<DMatrix<f64>>> {
    let nlevels = table.nlevels();
    if nlevels > 2 {
        return Err(EdaError::TooManyLevels { nlevels });
    }
    let positions = column_positions(table, column_names)?;

    if nlevels < 2 {
        return Ok(positions
            .iter()
            .map(|&p| {
                DMatrix::from_iterator(1, table.len(), table.rows().iter().map(|r| r.values[p].to_f64_or_nan()))
            })
            .collect());
    }

    let groups = table.group_by_level(0);
    let Some((_, first_rows)) = groups.iter().next() else {
        return Ok(positions.iter().map(|_| DMatrix::zeros(0, 0)).collect());
    };
    let first_len = first_rows.len();

    let inner_keys: BTreeSet<&Value> = table.rows().iter().map(|r| &r.key[1]).collect();
    // (dataset row, sample column) for every source row; first row wins.
    let mut cells: BTreeMap<(usize, usize), usize> = BTreeMap::new();
    let ncols;
    if inner_keys.len() == first_len {
        let col_of: BTreeMap<&Value, usize> = inner_keys.iter().enumerate().map(|(j, k)| (*k, j)).collect();
        for (i, rows) in groups.values().enumerate() {
            for &r in rows {
                cells.entry((i, col_of[&table.rows()[r].key[1]])).or_insert(r);
            }
        }
        ncols = inner_keys.len();
    } else {
        warn!(
            "extract_matrices: inner keys differ across datasets ({} distinct, {} in first dataset), \
             re-aligning positionally",
            inner_keys.len(),
            first_len
        );
        for (key, rows) in &groups {
            if rows.len() != first_len {
                return Err(EdaError::RaggedDataset {
                    dataset: key.to_string(),
                    expected: first_len,
                    found: rows.len(),
                });
            }
        }
        // Re-label positionally onto the first dataset's inner key order.
        let first_order: Vec<&Value> = first_rows.iter().map(|&r| &table.rows()[r].key[1]).collect();
        let sorted: BTreeSet<&Value> = first_order.iter().copied().collect();
        let col_of: BTreeMap<&Value, usize> = sorted.iter().enumerate().map(|(j, k)| (*k, j)).collect();
        for (i, rows) in groups.values().enumerate() {
            for (pos, &r) in rows.iter().enumerate() {
                cells.entry((i, col_of[first_order[pos]])).or_insert(r);
            }
        }
        ncols = sorted.len();
    }

    let nrows = groups.len();
    debug!("extract_matrices: {nrows} datasets x {ncols} samples");
    Ok(positions
        .iter()
        .map(|&p| {
            let mut m = DMatrix::from_element(nrows, ncols, f64::NAN);
            for (&(i, j), &r) in &cells {
                m[(i, j)] = table.rows()[r].values[p].to_f64_or_nan();
            }
            m
        })
        .collect())
}

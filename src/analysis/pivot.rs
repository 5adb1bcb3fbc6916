//! Pivot a hierarchically-indexed table into aligned X / Y / Z grids.
//!
//! ```text
//!   key (…, y_level, x_level)   x   y   data
//!            │                  │   │    │
//!            ▼                  ▼   ▼    ▼
//!   rows = sorted row groups    X   Y    Z   (same shape, fill where empty)
//!   cols = sorted x keys
//! ```

use std::collections::{BTreeMap, BTreeSet};

use log::debug;
use nalgebra::DMatrix;

use crate::data::model::{Table, Value};
use crate::error::{EdaError, Result};

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// How to place rows into the pivot grid.
#[derive(Debug, Clone)]
pub struct PivotOptions {
    /// Column providing X coordinates (defaults to the last index level).
    pub x_values_column: Option<String>,
    /// Column providing Y coordinates (defaults to the second-to-last level).
    pub y_values_column: Option<String>,
    /// Value stored in X, Y and Z for cells without a source row.
    pub fill_value: f64,
    /// Re-key to a block-diagonal grid when X varies within a grid column.
    pub force_no_xvals_conflicts: bool,
}

impl Default for PivotOptions {
    fn default() -> Self {
        Self {
            x_values_column: None,
            y_values_column: None,
            fill_value: f64::NAN,
            force_no_xvals_conflicts: false,
        }
    }
}

impl PivotOptions {
    pub fn x_values(mut self, column: impl Into<String>) -> Self {
        self.x_values_column = Some(column.into());
        self
    }

    pub fn y_values(mut self, column: impl Into<String>) -> Self {
        self.y_values_column = Some(column.into());
        self
    }

    pub fn fill_value(mut self, fill: f64) -> Self {
        self.fill_value = fill;
        self
    }

    pub fn force_no_xvals_conflicts(mut self, force: bool) -> Self {
        self.force_no_xvals_conflicts = force;
        self
    }
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

/// Three aligned grids plus the keys labelling their rows and columns.
#[derive(Debug, Clone)]
pub struct PivotTables {
    /// Row-group key of each grid row (extra levels, then the y level).
    pub row_keys: Vec<Vec<Value>>,
    /// Key of each grid column. One element normally; the row-group key
    /// followed by the x key for block-diagonal grids.
    pub column_keys: Vec<Vec<Value>>,
    pub x: DMatrix<f64>,
    pub y: DMatrix<f64>,
    pub z: DMatrix<f64>,
    occupied: DMatrix<bool>,
}

/// Coordinate vectors plus the data matrix, ready for a colorplot.
#[derive(Debug, Clone)]
pub struct AxesMatrix {
    /// One entry per matrix column.
    pub x: Vec<f64>,
    /// One entry per matrix row.
    pub y: Vec<f64>,
    pub z: DMatrix<f64>,
}

impl PivotTables {
    /// (rows, columns) of each grid.
    pub fn shape(&self) -> (usize, usize) {
        self.z.shape()
    }

    /// Whether cell (i, j) was filled from a source row.
    pub fn is_occupied(&self, i: usize, j: usize) -> bool {
        self.occupied[(i, j)]
    }

    /// Whether any grid column holds more than one distinct X coordinate.
    pub fn has_x_conflicts(&self) -> bool {
        (0..self.x.ncols()).any(|j| {
            let mut vals = (0..self.x.nrows())
                .filter(|&i| self.occupied[(i, j)])
                .map(|i| self.x[(i, j)])
                .filter(|v| !v.is_nan());
            match vals.next() {
                Some(first) => vals.any(|v| v != first),
                None => false,
            }
        })
    }

    /// Collapse X column-wise and Y row-wise to 1D coordinate vectors.
    ///
    /// Each entry is the mean over the occupied, non-NaN cells of that
    /// column (X) or row (Y). This is only exact when coordinates are
    /// constant along the collapsed axis; use
    /// [`PivotOptions::force_no_xvals_conflicts`] when they are not.
    pub fn collapse_axes(&self) -> AxesMatrix {
        let (nrows, ncols) = self.shape();
        let x = (0..ncols)
            .map(|j| nan_mean((0..nrows).filter(|&i| self.occupied[(i, j)]).map(|i| self.x[(i, j)])))
            .collect();
        let y = (0..nrows)
            .map(|i| nan_mean((0..ncols).filter(|&j| self.occupied[(i, j)]).map(|j| self.y[(i, j)])))
            .collect();
        AxesMatrix {
            x,
            y,
            z: self.z.clone(),
        }
    }
}

fn nan_mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, count) = values
        .filter(|v| !v.is_nan())
        .fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if count == 0 {
        f64::NAN
    } else {
        sum / count as f64
    }
}

// ---------------------------------------------------------------------------
// Pivot
// ---------------------------------------------------------------------------

/// One source row's placement and coordinates.
struct Placement {
    row_key: Vec<Value>,
    x_key: Value,
    x: f64,
    y: f64,
    z: f64,
}

/// Pivot `table` on its index (or on the axis columns for a flat table).
///
/// For every (row group, x key) cell the first matching source row wins.
/// Index levels above the last two are kept as part of the row group, so
/// distinct combinations stack along Y instead of merging.
pub fn pivot(table: &Table, data_column: &str, options: &PivotOptions) -> Result<PivotTables> {
    let data_idx = table.column_index(data_column)?;
    let x_idx = options
        .x_values_column
        .as_deref()
        .map(|c| table.column_index(c))
        .transpose()?;
    let y_idx = options
        .y_values_column
        .as_deref()
        .map(|c| table.column_index(c))
        .transpose()?;

    let nlevels = table.nlevels();
    let placements: Vec<Placement> = if nlevels < 2 {
        let (Some(xi), Some(yi)) = (x_idx, y_idx) else {
            return Err(EdaError::MissingAxisColumns);
        };
        table
            .rows()
            .iter()
            .map(|r| Placement {
                row_key: vec![r.values[yi].clone()],
                x_key: r.values[xi].clone(),
                x: r.values[xi].to_f64_or_nan(),
                y: r.values[yi].to_f64_or_nan(),
                z: r.values[data_idx].to_f64_or_nan(),
            })
            .collect()
    } else {
        table
            .rows()
            .iter()
            .map(|r| {
                let x_level = &r.key[nlevels - 1];
                let y_level = &r.key[nlevels - 2];
                Placement {
                    row_key: r.key[..nlevels - 1].to_vec(),
                    x_key: x_level.clone(),
                    x: x_idx.map_or(x_level, |i| &r.values[i]).to_f64_or_nan(),
                    y: y_idx.map_or(y_level, |i| &r.values[i]).to_f64_or_nan(),
                    z: r.values[data_idx].to_f64_or_nan(),
                }
            })
            .collect()
    };

    if placements.is_empty() {
        return Err(EdaError::EmptyPivot);
    }

    let grid = build_grid(&placements, options.fill_value, |p| vec![p.x_key.clone()]);
    debug!("pivot: {} x {} grid from {} rows", grid.shape().0, grid.shape().1, placements.len());

    if options.force_no_xvals_conflicts && grid.has_x_conflicts() {
        debug!("pivot: x values vary within columns, switching to block-diagonal layout");
        return Ok(build_grid(&placements, options.fill_value, |p| {
            let mut key = p.row_key.clone();
            key.push(p.x_key.clone());
            key
        }));
    }
    Ok(grid)
}

fn build_grid<F>(placements: &[Placement], fill: f64, column_key: F) -> PivotTables
where
    F: Fn(&Placement) -> Vec<Value>,
{
    let row_keys: Vec<Vec<Value>> = placements
        .iter()
        .map(|p| p.row_key.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let column_keys: Vec<Vec<Value>> = placements
        .iter()
        .map(&column_key)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let row_pos: BTreeMap<&Vec<Value>, usize> =
        row_keys.iter().enumerate().map(|(i, k)| (k, i)).collect();
    let col_pos: BTreeMap<&Vec<Value>, usize> =
        column_keys.iter().enumerate().map(|(j, k)| (k, j)).collect();

    let (nrows, ncols) = (row_keys.len(), column_keys.len());
    let mut x = DMatrix::from_element(nrows, ncols, fill);
    let mut y = DMatrix::from_element(nrows, ncols, fill);
    let mut z = DMatrix::from_element(nrows, ncols, fill);
    let mut occupied = DMatrix::from_element(nrows, ncols, false);

    for p in placements {
        let i = row_pos[&p.row_key];
        let j = col_pos[&column_key(p)];
        if occupied[(i, j)] {
            continue;
        }
        occupied[(i, j)] = true;
        x[(i, j)] = p.x;
        y[(i, j)] = p.y;
        z[(i, j)] = p.z;
    }

    PivotTables {
        row_keys,
        column_keys,
        x,
        y,
        z,
        occupied,
    }
}

/// Pivot and collapse the coordinate grids in one step.
pub fn pivot_axes_and_matrix(table: &Table, data_column: &str, options: &PivotOptions) -> Result<AxesMatrix> {
    Ok(pivot(table, data_column, options)?.collapse_axes())
}

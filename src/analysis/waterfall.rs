//! Line data for a waterfall view of a pivoted matrix.

use super::pivot::AxesMatrix;
use super::ticks::linspace;

/// Which matrix rows to turn into traces.
#[derive(Debug, Clone, PartialEq)]
pub enum TraceSelection {
    /// This many rows, evenly spaced from first to last.
    Count(usize),
    /// Exactly these rows.
    Rows(Vec<usize>),
}

impl Default for TraceSelection {
    fn default() -> Self {
        TraceSelection::Count(5)
    }
}

/// One trace, already shifted to its place in the stack.
#[derive(Debug, Clone, PartialEq)]
pub struct Trace {
    pub row: usize,
    /// Y coordinate of the row, used as the trace label.
    pub label: f64,
    pub x: Vec<f64>,
    pub z: Vec<f64>,
}

/// Stack the selected rows of `axes` on top of each other.
///
/// NaN cells are dropped. Each trace is shifted so that its maximum sits at
/// the running offset, and the offset then moves down by the trace's depth.
/// Rows outside the matrix are ignored.
///
/// Traces are plotted against the collapsed coordinates in `axes.x` and
/// labelled with `axes.y`, including when the pivot used the index levels
/// as coordinates. Column and row positions are only used where `axes`
/// has no coordinate for them. Pass positional axes to get index spacing.
pub fn waterfall_traces(axes: &AxesMatrix, selection: &TraceSelection) -> Vec<Trace> {
    let nrows = axes.z.nrows();
    let rows: Vec<usize> = match selection {
        TraceSelection::Count(count) => {
            let count = (*count).min(nrows);
            if nrows == 0 {
                Vec::new()
            } else {
                linspace(0.0, (nrows - 1) as f64, count)
                    .into_iter()
                    .map(|v| v.trunc() as usize)
                    .collect()
            }
        }
        TraceSelection::Rows(rows) => rows.iter().copied().filter(|&r| r < nrows).collect(),
    };

    let mut offset = 0.0;
    let mut traces = Vec::with_capacity(rows.len());
    for row in rows {
        let (x, mut z): (Vec<f64>, Vec<f64>) = (0..axes.z.ncols())
            .map(|j| (axes.x.get(j).copied().unwrap_or(j as f64), axes.z[(row, j)]))
            .filter(|(_, v)| !v.is_nan())
            .unzip();
        let top = z.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let mut depth = 0.0_f64;
        for v in z.iter_mut() {
            *v -= top;
            depth = depth.min(*v);
            *v += offset;
        }
        offset += depth;
        traces.push(Trace {
            row,
            label: axes.y.get(row).copied().unwrap_or(row as f64),
            x,
            z,
        });
    }
    traces
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::DMatrix;

    fn axes() -> AxesMatrix {
        AxesMatrix {
            x: vec![0.0, 1.0, 2.0],
            y: vec![10.0, 20.0, 30.0],
            z: DMatrix::from_row_slice(3, 3, &[1.0, 3.0, 2.0, 5.0, f64::NAN, 4.0, 0.0, 0.0, 2.0]),
        }
    }

    #[test]
    fn traces_stack_downwards() {
        let traces = waterfall_traces(&axes(), &TraceSelection::Count(3));
        assert_eq!(traces.len(), 3);
        assert_eq!(traces[0].z, vec![-2.0, 0.0, -1.0]);
        // second row: NaN dropped, max 5 at the running offset of -2
        assert_eq!(traces[1].x, vec![0.0, 2.0]);
        assert_eq!(traces[1].z, vec![-2.0, -3.0]);
        assert_eq!(traces[2].z, vec![-5.0, -5.0, -3.0]);
        assert_eq!(traces[2].label, 30.0);
    }

    #[test]
    fn traces_use_coordinates_not_positions() {
        let mut a = axes();
        a.x = vec![-50.0, 0.0, 50.0];
        a.y = vec![1.5];
        let traces = waterfall_traces(&a, &TraceSelection::Rows(vec![0, 2]));
        assert_eq!(traces[0].x, vec![-50.0, 0.0, 50.0]);
        assert_eq!(traces[0].label, 1.5);
        // no y coordinate for row 2
        assert_eq!(traces[1].label, 2.0);
    }

    #[test]
    fn explicit_rows_skip_out_of_range() {
        let traces = waterfall_traces(&axes(), &TraceSelection::Rows(vec![2, 7]));
        assert_eq!(traces.len(), 1);
        assert_eq!(traces[0].row, 2);
    }
}

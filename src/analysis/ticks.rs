//! Axis tick selection for coordinate vectors that may be non-monotonic
//! (e.g. a field sweep that goes up, then back down).

/// Local direction of a sequence between two consecutive points.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trend {
    Rising,
    Falling,
    /// No direction established yet (only equal points seen so far).
    Flat,
}

impl Trend {
    fn of_step(from: f64, to: f64) -> Trend {
        if to > from {
            Trend::Rising
        } else if to < from {
            Trend::Falling
        } else {
            Trend::Flat
        }
    }
}

/// Indices and values where the trend of `values` changes direction.
///
/// The first and last points are always included. A step with zero change
/// carries the current trend, so a plateau only registers when the
/// direction actually reverses after it; the boundary is then placed on the
/// last point of the previous run.
pub fn inflection_points(values: &[f64]) -> (Vec<usize>, Vec<f64>) {
    if values.len() < 2 {
        return ((0..values.len()).collect(), values.to_vec());
    }
    let mut trend = Trend::of_step(values[0], values[1]);
    let mut indices = vec![0];
    for i in 1..values.len() {
        let step = Trend::of_step(values[i - 1], values[i]);
        match (trend, step) {
            (_, Trend::Flat) => {}
            (Trend::Flat, dir) => trend = dir,
            (current, dir) if current != dir => {
                trend = dir;
                indices.push(i - 1);
            }
            _ => {}
        }
    }
    indices.push(values.len() - 1);
    let vals = indices.iter().map(|&i| values[i]).collect();
    (indices, vals)
}

/// Tick selection policy.
#[derive(Debug, Clone)]
pub struct TickOptions {
    /// Number of evenly spaced major ticks for a monotonic axis; also the
    /// minimum axis length for using them.
    pub linear_tick_count: usize,
    /// Round labels with magnitude above [`TickOptions::round_threshold`] to
    /// integers when every point becomes a tick.
    pub round_dense_values: bool,
    pub round_threshold: f64,
}

impl Default for TickOptions {
    fn default() -> Self {
        Self {
            linear_tick_count: 6,
            round_dense_values: false,
            round_threshold: 10.0,
        }
    }
}

/// Major (and optional minor) ticks, positioned by array index.
#[derive(Debug, Clone, PartialEq)]
pub struct AxisTicks {
    pub major_indices: Vec<usize>,
    pub major_values: Vec<f64>,
    /// Midpoints between consecutive inflection points; may be fractional.
    pub minor_positions: Option<Vec<f64>>,
    pub minor_values: Option<Vec<f64>>,
}

impl AxisTicks {
    fn major_only(major_indices: Vec<usize>, major_values: Vec<f64>) -> Self {
        Self {
            major_indices,
            major_values,
            minor_positions: None,
            minor_values: None,
        }
    }
}

/// Pick tick positions for an axis whose coordinates are `coords`.
///
/// * 0 or 1 point: that point set, no minor ticks.
/// * more inflection points than half the points: tick every index.
/// * a single monotonic run of at least `linear_tick_count` points:
///   `linear_tick_count` evenly spaced ticks.
/// * otherwise: inflection points as majors, their midpoints as minors.
pub fn select_ticks(coords: &[f64], options: &TickOptions) -> AxisTicks {
    let n = coords.len();
    let (inflect_indices, inflect_values) = inflection_points(coords);

    if inflect_indices.len() < 2 {
        return AxisTicks::major_only(inflect_indices, inflect_values);
    }

    if inflect_indices.len() as f64 > 0.5 * n as f64 {
        let values = coords
            .iter()
            .map(|&v| {
                if options.round_dense_values && v.abs() > options.round_threshold {
                    v.round()
                } else {
                    v
                }
            })
            .collect();
        return AxisTicks::major_only((0..n).collect(), values);
    }

    let count = options.linear_tick_count;
    if inflect_indices.len() == 2 && count >= 2 && n >= count {
        let indices: Vec<usize> = linspace(0.0, (n - 1) as f64, count)
            .into_iter()
            .map(|p| p.trunc() as usize)
            .collect();
        let values = indices.iter().map(|&i| coords[i]).collect();
        return AxisTicks::major_only(indices, values);
    }

    let minor_positions = inflect_indices
        .windows(2)
        .map(|w| 0.5 * (w[0] + w[1]) as f64)
        .collect();
    let minor_values = inflect_values
        .windows(2)
        .map(|w| w[1] - 0.5 * (w[1] - w[0]))
        .collect();
    AxisTicks {
        major_indices: inflect_indices,
        major_values: inflect_values,
        minor_positions: Some(minor_positions),
        minor_values: Some(minor_values),
    }
}

pub(crate) fn linspace(start: f64, stop: f64, num: usize) -> Vec<f64> {
    match num {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (stop - start) / (num - 1) as f64;
            (0..num)
                .map(|k| if k == num - 1 { stop } else { start + k as f64 * step })
                .collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plateau_does_not_register_on_its_own() {
        let (idx, _) = inflection_points(&[0.0, 1.0, 1.0, 2.0, 3.0]);
        assert_eq!(idx, vec![0, 4]);
    }

    #[test]
    fn reversal_after_plateau_marks_end_of_plateau() {
        let (idx, vals) = inflection_points(&[0.0, 1.0, 1.0, 0.0]);
        assert_eq!(idx, vec![0, 2, 3]);
        assert_eq!(vals, vec![0.0, 1.0, 0.0]);
    }

    #[test]
    fn leading_plateau_takes_first_direction() {
        let (idx, _) = inflection_points(&[2.0, 2.0, 3.0, 4.0]);
        assert_eq!(idx, vec![0, 3]);
    }

    #[test]
    fn linspace_hits_endpoints() {
        let pts = linspace(0.0, 9.0, 6);
        assert_eq!(pts.len(), 6);
        assert_eq!(pts[0], 0.0);
        assert_eq!(pts[5], 9.0);
        assert!((pts[2] - 3.6).abs() < 1e-12);
    }
}

use std::collections::BTreeMap;

use approx::assert_relative_eq;
use rusty_eda::analysis::collapse::{aggregate, collapse, collapse_datasets, CollapseOptions};
use rusty_eda::analysis::extract::{extract_matrices, extract_vectors_by_dataset};
use rusty_eda::analysis::index::normalize;
use rusty_eda::analysis::pivot::{pivot, pivot_axes_and_matrix, PivotOptions};
use rusty_eda::analysis::ticks::{inflection_points, select_ticks, TickOptions};
use rusty_eda::analysis::waterfall::{waterfall_traces, TraceSelection};
use rusty_eda::fit::{Parameter, Parameters};
use rusty_eda::{EdaError, Table, Value};

/// `nscans` delay scans of `nsamples` points, indexed by (scan, sample).
fn scan_table(nscans: i64, nsamples: i64) -> Table {
    let mut t = Table::new(["scan", "sample"], ["delay", "field", "kerr", "sample_name"]);
    for s in 0..nscans {
        for i in 0..nsamples {
            t.push_row(
                vec![s.into(), i.into()],
                vec![
                    (i as f64 * 10.0).into(),
                    (s as f64 * 50.0).into(),
                    (s as f64 + 0.1 * i as f64).into(),
                    "GaAs".into(),
                ],
            )
            .unwrap();
        }
    }
    t
}

#[test]
fn flat_table_needs_both_axis_columns() {
    let mut t = Table::new(["index"], ["x", "y", "z"]);
    t.push_row(vec![0i64.into()], vec![1.0.into(), 2.0.into(), 3.0.into()]).unwrap();

    let neither = PivotOptions::default();
    let only_x = PivotOptions::default().x_values("x");
    let only_y = PivotOptions::default().y_values("y");
    for options in [neither, only_x, only_y] {
        assert!(matches!(pivot(&t, "z", &options), Err(EdaError::MissingAxisColumns)));
    }

    let both = PivotOptions::default().x_values("x").y_values("y");
    let grid = pivot(&t, "z", &both).unwrap();
    assert_eq!(grid.shape(), (1, 1));
    assert_eq!(grid.z[(0, 0)], 3.0);
}

#[test]
fn normalize_is_idempotent_on_two_levels() {
    let t = scan_table(2, 3);
    let once = normalize(&t).unwrap();
    assert_eq!(once.table, t);
    assert!(once.dropped_levels.is_empty());
    let twice = normalize(&once.table).unwrap();
    assert_eq!(twice, once);
}

#[test]
fn normalize_folds_outer_levels_into_quoted_composite() {
    let mut t = Table::new(["run", "sample_id", "i"], ["v"]);
    t.push_row(vec![1i64.into(), "a, b".into(), 0i64.into()], vec![1.0.into()]).unwrap();
    t.push_row(vec![1i64.into(), "a".into(), 0i64.into()], vec![2.0.into()]).unwrap();
    let n = normalize(&t).unwrap();
    assert_eq!(n.dropped_levels, vec!["run", "sample_id"]);
    assert_eq!(n.table.index_names(), ["run,sample_id", "i"]);
    assert_eq!(n.table.rows()[0].key[0], Value::from("1, \"a, b\""));
    assert_eq!(n.table.rows()[1].key[0], Value::from("1, \"a\""));
}

#[test]
fn pivot_round_trips_a_complete_grid() {
    let t = scan_table(3, 4);
    let options = PivotOptions::default().x_values("delay").y_values("field");
    let grid = pivot(&t, "kerr", &options).unwrap();
    assert_eq!(grid.shape(), (3, 4));
    for row in t.rows() {
        let (Value::Integer(i), Value::Integer(j)) = (&row.key[0], &row.key[1]) else {
            panic!("integer keys expected");
        };
        let (i, j) = (*i as usize, *j as usize);
        assert!(grid.is_occupied(i, j));
        assert_eq!(grid.x[(i, j)], row.values[0].to_f64_or_nan());
        assert_eq!(grid.y[(i, j)], row.values[1].to_f64_or_nan());
        assert_eq!(grid.z[(i, j)], row.values[2].to_f64_or_nan());
    }
    assert!(!grid.has_x_conflicts());

    let axes = grid.collapse_axes();
    assert_eq!(axes.x, vec![0.0, 10.0, 20.0, 30.0]);
    assert_eq!(axes.y, vec![0.0, 50.0, 100.0]);
}

#[test]
fn first_source_row_wins_a_cell() {
    let mut t = Table::new(["scan", "i"], ["z"]);
    t.push_row(vec![0i64.into(), 0i64.into()], vec![1.0.into()]).unwrap();
    t.push_row(vec![0i64.into(), 0i64.into()], vec![2.0.into()]).unwrap();
    let grid = pivot(&t, "z", &PivotOptions::default()).unwrap();
    assert_eq!(grid.z[(0, 0)], 1.0);
}

#[test]
fn monotonic_axis_gets_six_linear_ticks() {
    let coords: Vec<f64> = (0..10).map(|i| i as f64 * 0.5).collect();
    let (idx, _) = inflection_points(&coords);
    assert_eq!(idx, vec![0, 9]);

    let ticks = select_ticks(&coords, &TickOptions::default());
    assert_eq!(ticks.major_indices, vec![0, 1, 3, 5, 7, 9]);
    assert_eq!(ticks.major_values, vec![0.0, 0.5, 1.5, 2.5, 3.5, 4.5]);
    assert!(ticks.minor_positions.is_none());
}

#[test]
fn oscillating_axis_ticks_every_index() {
    let coords = [0.0, 5.0, 0.0, 5.0, 0.0, 5.0];
    let ticks = select_ticks(&coords, &TickOptions::default());
    assert_eq!(ticks.major_indices, vec![0, 1, 2, 3, 4, 5]);
    assert_eq!(ticks.major_values, coords.to_vec());
}

#[test]
fn back_and_forth_scan_gets_minor_midpoints() {
    // up to 4, down to 0, up to 4 again
    let coords: Vec<f64> = (0..5).chain((0..4).rev()).chain(1..5).map(f64::from).collect();
    let ticks = select_ticks(&coords, &TickOptions::default());
    assert_eq!(ticks.major_indices, vec![0, 4, 8, 12]);
    assert_eq!(ticks.major_values, vec![0.0, 4.0, 0.0, 4.0]);
    let minors = ticks.minor_positions.unwrap();
    assert_eq!(minors, vec![2.0, 6.0, 10.0]);
    assert_eq!(ticks.minor_values.unwrap(), vec![2.0, 2.0, 2.0]);
}

fn ragged(second_keys: &[i64]) -> Table {
    let mut t = Table::new(["scan", "i"], ["v"]);
    for i in 0..3i64 {
        t.push_row(vec![0i64.into(), i.into()], vec![(i as f64).into()]).unwrap();
    }
    for &k in second_keys {
        t.push_row(vec![1i64.into(), k.into()], vec![(k as f64 * 10.0).into()]).unwrap();
    }
    t
}

#[test]
fn mismatched_inner_keys_realign_positionally() {
    let t = ragged(&[10, 11, 12]);
    let m = &extract_matrices(&t, &["v"]).unwrap()[0];
    assert_eq!(m.shape(), (2, 3));
    assert_eq!(m.row(1).iter().copied().collect::<Vec<_>>(), vec![100.0, 110.0, 120.0]);
}

#[test]
fn mismatched_inner_keys_with_other_counts_are_ragged() {
    let t = ragged(&[10, 11, 12, 13]);
    assert!(matches!(
        extract_matrices(&t, &["v"]),
        Err(EdaError::RaggedDataset { expected: 3, found: 4, .. })
    ));
}

#[test]
fn shorter_dataset_on_shared_keys_is_padded_with_nan() {
    let t = ragged(&[0, 1]);
    let m = &extract_matrices(&t, &["v"]).unwrap()[0];
    assert_eq!(m.shape(), (2, 3));
    assert!(m[(1, 2)].is_nan());

    let sets = extract_vectors_by_dataset(&t, &["v"]).unwrap();
    assert_eq!(sets.len(), 2);
    assert_eq!(sets[1].key, Value::Integer(1));
    assert_eq!(sets[1].numeric(0), vec![0.0, 10.0]);
}

#[test]
fn three_levels_are_too_many_to_extract() {
    let t = Table::new(["a", "b", "c"], ["v"]);
    assert!(matches!(
        extract_matrices(&t, &["v"]),
        Err(EdaError::TooManyLevels { nlevels: 3 })
    ));
}

fn fitted(scans: &[i64]) -> BTreeMap<Value, Parameters> {
    scans
        .iter()
        .map(|&s| {
            let mut params = Parameters::new();
            let mut amp = Parameter::new("amplitude", 2.0 * s as f64);
            amp.stderr = Some(0.1);
            params.insert(amp);
            let mut phase = Parameter::new("phase", 0.5);
            phase.stderr = Some(0.0);
            params.insert(phase);
            (Value::Integer(s), params)
        })
        .collect()
}

#[test]
fn collapse_keeps_constants_and_drops_varying_columns() {
    let t = scan_table(1, 4);
    let wanted = vec!["amplitude".to_string(), "phase".to_string()];
    let row = collapse(&t, &fitted(&[0]), &wanted, &CollapseOptions::default()).unwrap();
    assert_eq!(row.dataset, Value::Integer(0));
    assert_eq!(row.get("field"), Some(&Value::Float(0.0)));
    assert_eq!(row.get("sample_name"), Some(&Value::from("GaAs")));
    assert_eq!(row.get("delay"), None);
    assert_eq!(row.get("amplitude"), Some(&Value::Float(0.0)));
    assert_eq!(row.get("amplitude_error"), Some(&Value::Float(0.1)));
    assert_eq!(row.get("phase"), Some(&Value::Float(0.5)));
    // zero standard error is not reported
    assert_eq!(row.get("phase_error"), None);

    let with_span = CollapseOptions::default().aggregate("delay", aggregate::span());
    let row = collapse(&t, &fitted(&[0]), &wanted, &with_span).unwrap();
    assert_eq!(row.get("delay"), Some(&Value::Float(30.0)));
}

#[test]
fn collapse_rejects_multi_dataset_input() {
    let t = scan_table(2, 2);
    assert!(matches!(
        collapse(&t, &fitted(&[0, 1]), &[], &CollapseOptions::default()),
        Err(EdaError::NotADataset(_))
    ));
}

#[test]
fn summary_has_one_row_per_dataset() {
    let t = scan_table(3, 4);
    let summary = collapse_datasets(
        &t,
        &fitted(&[0, 1, 2]),
        &["amplitude".to_string()],
        &CollapseOptions::default().aggregate("kerr", aggregate::mean()),
    )
    .unwrap();
    assert_eq!(summary.len(), 3);
    assert_eq!(summary.index_names(), ["scan"]);
    let amplitude = summary.column_f64("amplitude").unwrap();
    assert_eq!(amplitude, vec![0.0, 2.0, 4.0]);
    let kerr = summary.column_f64("kerr").unwrap();
    assert_relative_eq!(kerr[2], 2.15, epsilon = 1e-12);
}

#[test]
fn missing_cells_hold_the_fill_value_everywhere() {
    let mut t = scan_table(2, 3);
    // scan 2 only has its first sample
    t.push_row(
        vec![2i64.into(), 0i64.into()],
        vec![0.0.into(), 100.0.into(), 2.0.into(), "GaAs".into()],
    )
    .unwrap();
    let options = PivotOptions::default()
        .x_values("delay")
        .y_values("field")
        .fill_value(-1.0);
    let grid = pivot(&t, "kerr", &options).unwrap();
    assert_eq!(grid.shape(), (3, 3));
    for j in 1..3 {
        assert!(!grid.is_occupied(2, j));
        assert_eq!(grid.x[(2, j)], -1.0);
        assert_eq!(grid.y[(2, j)], -1.0);
        assert_eq!(grid.z[(2, j)], -1.0);
    }

    let nan_grid = pivot(&t, "kerr", &PivotOptions::default()).unwrap();
    assert!(nan_grid.z[(2, 1)].is_nan());
}

#[test]
fn conflicting_x_values_go_block_diagonal_when_forced() {
    let mut t = Table::new(["scan", "i"], ["delay", "kerr"]);
    for (s, shift) in [(0i64, 0.0), (1, 5.0)] {
        for i in 0..2i64 {
            t.push_row(vec![s.into(), i.into()], vec![(i as f64 * 10.0 + shift).into(), 1.0.into()])
                .unwrap();
        }
    }
    let merged = pivot(&t, "kerr", &PivotOptions::default().x_values("delay")).unwrap();
    assert_eq!(merged.shape(), (2, 2));
    assert!(merged.has_x_conflicts());

    let forced = PivotOptions::default().x_values("delay").force_no_xvals_conflicts(true);
    let grid = pivot(&t, "kerr", &forced).unwrap();
    assert_eq!(grid.shape(), (2, 4));
    assert!(!grid.has_x_conflicts());
    assert!(grid.is_occupied(0, 0) && grid.is_occupied(1, 3));
    assert!(!grid.is_occupied(0, 2));
}

#[test]
fn extra_levels_stack_along_y() {
    let mut t = Table::new(["run", "scan", "i"], ["kerr"]);
    for run in 0..2i64 {
        for scan in 0..2i64 {
            t.push_row(vec![run.into(), scan.into(), 0i64.into()], vec![(run * 10 + scan).into()])
                .unwrap();
        }
    }
    let axes = pivot_axes_and_matrix(&t, "kerr", &PivotOptions::default()).unwrap();
    assert_eq!(axes.z.shape(), (4, 1));
    assert_eq!(axes.z[(3, 0)], 11.0);
    assert_eq!(axes.y, vec![0.0, 1.0, 0.0, 1.0]);
}

#[test]
fn waterfall_stacks_selected_rows() {
    let t = scan_table(5, 3);
    let axes = pivot_axes_and_matrix(&t, "kerr", &PivotOptions::default().x_values("delay")).unwrap();
    let traces = waterfall_traces(&axes, &TraceSelection::Count(3));
    assert_eq!(traces.iter().map(|tr| tr.row).collect::<Vec<_>>(), vec![0, 2, 4]);
    assert_eq!(traces[0].x, vec![0.0, 10.0, 20.0]);
    let top = traces[0].z.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    assert_relative_eq!(top, 0.0);
    // the next trace peaks where the previous one bottoms out
    let next_top = traces[1].z.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    assert_relative_eq!(next_top, traces[0].z[0], epsilon = 1e-12);
}

#[test]
fn signed_zero_field_keys_share_a_grid_column() {
    // field sweeps crossing zero print both "0.000" and "-0.000"
    let mut t = Table::new(["scan", "field"], ["kerr"]);
    for (scan, field, kerr) in [(0i64, "-0.000", 1.0), (0, "1.000", 2.0), (1, "0.000", 3.0), (1, "1.000", 4.0)] {
        t.push_row(vec![scan.into(), Value::guess(field)], vec![kerr.into()]).unwrap();
    }
    let grid = pivot(&t, "kerr", &PivotOptions::default()).unwrap();
    assert_eq!(grid.shape(), (2, 2));
    assert_eq!(grid.z[(0, 0)], 1.0);
    assert_eq!(grid.z[(1, 0)], 3.0);

    let m = extract_matrices(&t, &["kerr"]).unwrap();
    assert_eq!(m[0].shape(), (2, 2));
    assert_eq!(m[0][(1, 0)], 3.0);
}

#[test]
fn nan_axis_values_form_a_single_row() {
    let mut t = Table::new(["index"], ["x", "y", "z"]);
    t.push_row(vec![0i64.into()], vec![0.0.into(), f64::NAN.into(), 1.0.into()]).unwrap();
    t.push_row(vec![1i64.into()], vec![1.0.into(), f64::NAN.into(), 2.0.into()]).unwrap();
    let grid = pivot(&t, "z", &PivotOptions::default().x_values("x").y_values("y")).unwrap();
    assert_eq!(grid.shape(), (1, 2));
    assert_eq!(grid.z.as_slice(), &[1.0, 2.0]);

    let mut keyed = Table::new(["scan", "sample"], ["kerr"]);
    for (scan, sample, kerr) in [(0i64, f64::NAN, 1.0), (1, f64::NAN, 2.0)] {
        keyed.push_row(vec![scan.into(), sample.into()], vec![kerr.into()]).unwrap();
    }
    let m = extract_matrices(&keyed, &["kerr"]).unwrap();
    assert_eq!(m[0].shape(), (2, 1));
    assert_eq!(m[0].as_slice(), &[1.0, 2.0]);
}

#[test]
fn empty_table_has_nothing_to_pivot() {
    let t = Table::new(["scan", "sample"], ["kerr"]);
    assert!(matches!(
        pivot(&t, "kerr", &PivotOptions::default()),
        Err(EdaError::EmptyPivot)
    ));
}

#[test]
fn pivot_reports_missing_columns() {
    let t = scan_table(2, 3);
    let err = pivot(&t, "faraday", &PivotOptions::default());
    assert!(matches!(err, Err(EdaError::ColumnNotFound(ref c)) if c == "faraday"));
    let err = pivot(&t, "kerr", &PivotOptions::default().x_values("wavelength"));
    assert!(matches!(err, Err(EdaError::ColumnNotFound(ref c)) if c == "wavelength"));
}

#[test]
fn single_level_gets_a_constant_outer_key() {
    let mut t = Table::new(["sample"], ["kerr"]);
    for i in 0..3i64 {
        t.push_row(vec![i.into()], vec![(i as f64).into()]).unwrap();
    }
    let normalized = normalize(&t).unwrap();
    assert!(normalized.dropped_levels.is_empty());
    assert_eq!(normalized.table.index_names(), ["", "sample"]);
    for (i, row) in normalized.table.rows().iter().enumerate() {
        assert_eq!(row.key, vec![Value::from(""), Value::from(i)]);
    }
    assert_eq!(normalized.table.column_f64("kerr").unwrap(), vec![0.0, 1.0, 2.0]);
}

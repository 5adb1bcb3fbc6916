use approx::assert_relative_eq;
use rusty_eda::analysis::collapse::{aggregate, CollapseOptions};
use rusty_eda::config::SimulationConfig;
use rusty_eda::fit::{fit_each_dataset, minimize, FitOptions, MinimizerOptions, ModelResiduals, Parameters};
use rusty_eda::parallel::PoolOptions;
use rusty_eda::simulation::{generate_params, generate_table, trkr_decaying_cosine, trkr_model, TrkrParams};
use rusty_eda::{EdaError, Result, Table, Value};

fn decay(x: &[f64], p: &Parameters) -> Result<f64> {
    Ok(p.require("amplitude")? * (-x[0] / p.require("tau")?).exp() + p.require("offset")?)
}

/// Three decays with known parameters, one NaN reading in the last.
fn decays() -> Table {
    let mut t = Table::new(["sample", "i"], ["time", "counts", "temperature"]);
    for (s, (amp, tau)) in [(2.0, 10.0), (1.0, 5.0), (3.0, 20.0)].into_iter().enumerate() {
        for i in 0..40 {
            let time = i as f64;
            let counts = if s == 2 && i == 7 {
                f64::NAN
            } else {
                amp * (-time / tau).exp() + 0.5
            };
            t.push_row(
                vec![Value::from(s), Value::from(i as usize)],
                vec![time.into(), counts.into(), (4.0 * s as f64).into()],
            )
            .unwrap();
        }
    }
    t
}

fn decay_start() -> Parameters {
    Parameters::new()
        .add("amplitude", 1.5)
        .add_bounded("tau", 8.0, 0.1, 100.0)
        .add("offset", 0.0)
}

#[test]
fn each_dataset_gets_its_own_fit() {
    let fits = fit_each_dataset(&decays(), decay, &decay_start(), &["time"], "counts", &FitOptions::default()).unwrap();
    assert_eq!(fits.results.len(), 3);
    for (key, (amp, tau)) in [(0usize, (2.0, 10.0)), (1, (1.0, 5.0)), (2, (3.0, 20.0))] {
        let result = &fits.results[&Value::from(key)];
        assert!(result.converged);
        assert_relative_eq!(result.params.value("amplitude").unwrap(), amp, max_relative = 1e-6);
        assert_relative_eq!(result.params.value("tau").unwrap(), tau, max_relative = 1e-6);
        assert_relative_eq!(result.params.value("offset").unwrap(), 0.5, epsilon = 1e-6);
    }
    // the NaN reading is left out
    assert_eq!(fits.results[&Value::from(2usize)].n_data, 39);
    assert_eq!(fits.results[&Value::from(0usize)].n_data, 40);
}

#[test]
fn parallel_fits_match_sequential_fits() {
    let sequential =
        fit_each_dataset(&decays(), decay, &decay_start(), &["time"], "counts", &FitOptions::default()).unwrap();
    let options = FitOptions {
        pool: PoolOptions::parallel().workers(3),
        ..FitOptions::default()
    };
    let parallel = fit_each_dataset(&decays(), decay, &decay_start(), &["time"], "counts", &options).unwrap();
    for (key, result) in &sequential.results {
        assert_eq!(parallel.results[key].params, result.params);
    }
    assert_eq!(parallel.summary, sequential.summary);
}

#[test]
fn summary_rows_carry_parameters_and_constant_columns() {
    let options = FitOptions {
        collapse: CollapseOptions::default().aggregate("time", aggregate::max()),
        ..FitOptions::default()
    };
    let fits = fit_each_dataset(&decays(), decay, &decay_start(), &["time"], "counts", &options).unwrap();
    let summary = &fits.summary;
    assert_eq!(summary.index_names(), ["sample"]);
    assert_eq!(summary.len(), 3);
    assert_eq!(summary.column_f64("temperature").unwrap(), vec![0.0, 4.0, 8.0]);
    assert_eq!(summary.column_f64("time").unwrap(), vec![39.0, 39.0, 39.0]);
    assert!(!summary.has_column("counts"));
    let tau = summary.column_f64("tau").unwrap();
    assert_relative_eq!(tau[1], 5.0, max_relative = 1e-6);
}

#[test]
fn a_failing_model_fails_the_whole_batch() {
    let picky = |x: &[f64], p: &Parameters| -> Result<f64> {
        if x[0] > 30.0 && p.require("amplitude")? < 2.5 {
            return Err(EdaError::FitFailed("model undefined here".into()));
        }
        decay(x, p)
    };
    for pool in [PoolOptions::sequential(), PoolOptions::parallel().workers(2)] {
        let options = FitOptions {
            pool,
            ..FitOptions::default()
        };
        let err = fit_each_dataset(&decays(), picky, &decay_start(), &["time"], "counts", &options);
        assert!(matches!(err, Err(EdaError::TaskFailed { .. })));
    }
}

#[test]
fn missing_measured_column_is_reported() {
    let err = fit_each_dataset(&decays(), decay, &decay_start(), &["time"], "kerr", &FitOptions::default());
    assert!(matches!(err, Err(EdaError::ColumnNotFound(ref c)) if c == "kerr"));
}

#[test]
fn model_residuals_without_data_return_the_model() {
    let residuals = ModelResiduals::new(decay, &["time"]);
    let params = Parameters::new().add("amplitude", 1.0).add("tau", 1.0).add("offset", 0.0);
    let t = [0.0, 1.0];
    let model = residuals.evaluate(&params, &[t.as_slice()], None).unwrap();
    assert_relative_eq!(model[1], (-1.0f64).exp());
    let resid = residuals.evaluate(&params, &[t.as_slice()], Some([1.0, 1.0].as_slice())).unwrap();
    assert_relative_eq!(resid[0], 0.0);
    assert!(residuals.evaluate(&params, &[], None).is_err());
}

#[test]
fn fixed_parameters_do_not_move() {
    let params = decay_start().add_fixed("unused", 7.0);
    let x: Vec<f64> = (0..20).map(f64::from).collect();
    let y: Vec<f64> = x.iter().map(|t| 2.0 * (-t / 10.0).exp() + 0.5).collect();
    let residuals = ModelResiduals::new(decay, &["time"]);
    let result = minimize(
        |p: &Parameters| residuals.evaluate(p, &[x.as_slice()], Some(y.as_slice())),
        &params,
        &MinimizerOptions::default(),
    )
    .unwrap();
    assert_eq!(result.n_varys, 3);
    assert_eq!(result.params.value("unused"), Some(7.0));
    assert!(result.params.get("tau").unwrap().stderr.is_some());
    assert_eq!(result.params.get("unused").unwrap().stderr, None);
}

/// Every dataset shares lifetime and phase, so only the linear terms differ.
fn shared_dynamics() -> SimulationConfig {
    SimulationConfig {
        spin_lifetime_std_err: 0.0,
        noise_scale: 0.0,
        ..SimulationConfig::default()
    }
}

#[test]
fn trkr_fit_recovers_simulated_amplitudes() {
    let tvals: Vec<f64> = (0..60).map(|i| -200.0 + 50.0 * i as f64).collect();
    let bvals = [50.0, 150.0];
    let sim = generate_params(tvals.len(), bvals.len(), &shared_dynamics(), 5).unwrap();
    let table = generate_table(&tvals, &bvals, &sim).unwrap();

    let truth = sim.datasets[0];
    let mut start = TrkrParams {
        pulse_amplitude: 0.015,
        slope: 0.0,
        offset: 0.0,
        ..truth
    }
    .to_parameters();
    for name in ["gfactor", "spin_lifetime", "initial_phase", "extra_phase_offset"] {
        start.get_mut(name).unwrap().vary = false;
    }

    let fits = fit_each_dataset(
        &table,
        trkr_model,
        &start,
        &["probe_delay", "b_external"],
        "kerr_rotation",
        &FitOptions::default(),
    )
    .unwrap();
    assert_eq!(fits.results.len(), 2);
    for (k, key) in ["0, 0", "0, 1"].into_iter().enumerate() {
        let fitted = &fits.results[&Value::from(key)].params;
        let expected = sim.datasets[k];
        assert_relative_eq!(
            fitted.value("pulse_amplitude").unwrap(),
            expected.pulse_amplitude,
            max_relative = 1e-6
        );
        assert_relative_eq!(fitted.value("offset").unwrap(), expected.offset, epsilon = 1e-9);
    }
    assert_eq!(fits.summary.column_f64("b_external").unwrap(), bvals.to_vec());
}

#[test]
fn simulated_table_matches_the_model_without_noise() {
    let tvals = [0.0, 500.0, 13158.0 + 500.0];
    let sim = generate_params(3, 1, &shared_dynamics(), 9).unwrap();
    let table = generate_table(&tvals, &[100.0], &sim).unwrap();
    let kerr = table.column_f64("kerr_rotation").unwrap();
    let p = sim.datasets[0];
    assert_eq!(kerr[1], trkr_decaying_cosine(500.0, 100.0, &p));
    // one laser period later only the linear background differs
    assert_relative_eq!(kerr[2] - kerr[1], 13158.0 * p.slope, epsilon = 1e-12);

    let other_seed = generate_params(3, 1, &shared_dynamics(), 10).unwrap();
    assert_ne!(other_seed.datasets[0].pulse_amplitude, p.pulse_amplitude);
    assert!(generate_table(&tvals, &[100.0, 200.0], &sim).is_err());
}

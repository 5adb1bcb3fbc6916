//! Simulated time-resolved Kerr rotation (TRKR) scans.
//!
//! Each dataset is a delay scan at a fixed external field. The signal is a
//! decaying cosine whose amplitude and phase include the spin polarization
//! left over from all earlier laser pulses (resonant spin amplification).

use std::f64::consts::PI;

use anyhow::Context;
use log::debug;
use nalgebra::Complex;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};

use crate::config::SimulationConfig;
use crate::data::model::{Table, Value};
use crate::error::{EdaError, Result};
use crate::fit::Parameters;

/// Bohr magneton / (2π ħ), in 1/(ps·mT).
pub const GFACTORCONSTANT: f64 = 1.3996e-5;
/// Laser pulse period in ps.
pub const LASER_REPRATE: f64 = 13158.0;

/// Model parameters of one simulated dataset.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrkrParams {
    pub pulse_amplitude: f64,
    pub gfactor: f64,
    /// ps
    pub spin_lifetime: f64,
    pub initial_phase: f64,
    pub extra_phase_offset: f64,
    pub slope: f64,
    pub offset: f64,
}

impl TrkrParams {
    /// Names used when the model is fitted through [`trkr_model`].
    pub const NAMES: [&'static str; 7] = [
        "pulse_amplitude",
        "gfactor",
        "spin_lifetime",
        "initial_phase",
        "extra_phase_offset",
        "slope",
        "offset",
    ];

    pub fn to_parameters(&self) -> Parameters {
        let values = [
            self.pulse_amplitude,
            self.gfactor,
            self.spin_lifetime,
            self.initial_phase,
            self.extra_phase_offset,
            self.slope,
            self.offset,
        ];
        Self::NAMES
            .iter()
            .zip(values)
            .fold(Parameters::new(), |p, (name, v)| p.add(name, v))
    }

    pub fn from_parameters(params: &Parameters) -> Result<Self> {
        Ok(Self {
            pulse_amplitude: params.require("pulse_amplitude")?,
            gfactor: params.require("gfactor")?,
            spin_lifetime: params.require("spin_lifetime")?,
            initial_phase: params.require("initial_phase")?,
            extra_phase_offset: params.require("extra_phase_offset")?,
            slope: params.require("slope")?,
            offset: params.require("offset")?,
        })
    }
}

/// Net polarization magnitude and phase after infinitely many pulses.
///
/// Pulse `n` pulses ago contributes `exp(-nT/τ) · exp(i(φ₀ + nωT))`; the
/// geometric series sums to `exp(iφ₀) / (1 - exp(-T/τ) exp(iωT))`.
pub fn pulse_sum_vector(spin_lifetime: f64, gfactor: f64, bfield: f64, initial_phase: f64) -> (f64, f64) {
    let omega = 2.0 * PI * GFACTORCONSTANT * gfactor * bfield;
    let decay = (-LASER_REPRATE / spin_lifetime).exp();
    let one = Complex::new(1.0, 0.0);
    let sum = Complex::from_polar(1.0, initial_phase) / (one - Complex::from_polar(decay, omega * LASER_REPRATE));
    (sum.norm(), sum.arg())
}

/// Kerr rotation at `delay_time` (ps) in a total field of `total_bfield` (mT).
pub fn trkr_decaying_cosine(delay_time: f64, total_bfield: f64, p: &TrkrParams) -> f64 {
    let pos_def_delay = delay_time.rem_euclid(LASER_REPRATE);
    let omega = 2.0 * PI * GFACTORCONSTANT * p.gfactor * total_bfield;
    let (net_polarization, net_phase) = pulse_sum_vector(p.spin_lifetime, p.gfactor, total_bfield, p.initial_phase);
    let final_phase = (net_phase + pos_def_delay * omega).rem_euclid(2.0 * PI);
    let final_amplitude = p.pulse_amplitude * net_polarization * (-pos_def_delay / p.spin_lifetime).exp();
    let signal = final_amplitude * (final_phase + p.extra_phase_offset).cos();
    // the linear background uses the raw delay
    signal + delay_time * p.slope + p.offset
}

/// Pointwise fit model: `x = [probe_delay, b_external]`.
pub fn trkr_model(x: &[f64], params: &Parameters) -> Result<f64> {
    let [delay, bfield] = x else {
        return Err(EdaError::ShapeMismatch {
            what: "trkr model inputs",
            expected: 2,
            found: x.len(),
        });
    };
    Ok(trkr_decaying_cosine(*delay, *bfield, &TrkrParams::from_parameters(params)?))
}

/// Drawn parameters and noise for a batch of datasets.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationParams {
    pub datasets: Vec<TrkrParams>,
    /// One noise vector of length `nx` per dataset.
    pub noise_layers: Vec<Vec<f64>>,
}

fn normal(mean: f64, std_dev: f64, what: &str) -> anyhow::Result<Normal<f64>> {
    Normal::new(mean, std_dev).with_context(|| format!("invalid spread for {what}: {std_dev}"))
}

/// Draw per-dataset parameters. The same seed always gives the same draws.
pub fn generate_params(
    nx: usize,
    ndatasets: usize,
    config: &SimulationConfig,
    seed: u64,
) -> anyhow::Result<SimulationParams> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut draw = |dist: Normal<f64>| -> Vec<f64> { (0..ndatasets).map(|_| dist.sample(&mut rng)).collect() };

    let pulse_amplitudes = draw(normal(config.pulse_amplitude_mean, config.pulse_amplitude_std_err, "pulse amplitude")?);
    let spin_lifetimes = draw(normal(config.spin_lifetime_mean, config.spin_lifetime_std_err, "spin lifetime")?);
    let slopes = draw(normal(0.0, config.slopes_scale, "slopes")?);
    let offsets = draw(normal(0.0, config.offsets_scale, "offsets")?);

    let noise = normal(0.0, config.noise_scale, "noise")?;
    let noise_layers = (0..ndatasets)
        .map(|_| (0..nx).map(|_| noise.sample(&mut rng)).collect())
        .collect();

    let datasets = (0..ndatasets)
        .map(|k| {
            let sweep = 2.0 * PI * config.extra_phase_offset_cos_nperiods / ndatasets as f64;
            TrkrParams {
                pulse_amplitude: pulse_amplitudes[k],
                gfactor: config.gfactor,
                spin_lifetime: spin_lifetimes[k],
                initial_phase: config.initial_phase,
                extra_phase_offset: config.extra_phase_offset_baseline
                    + config.extra_phase_offset_cos_amp * (sweep * k as f64).sin(),
                slope: slopes[k],
                offset: offsets[k],
            }
        })
        .collect();
    debug!("generate_params: {ndatasets} datasets x {nx} points, seed {seed}");
    Ok(SimulationParams { datasets, noise_layers })
}

/// Index level names of a simulated table.
pub const INDEX_LEVELS: [&str; 3] = ["run_id", "index_2d", "index_1d"];
/// Data columns of a simulated table.
pub const COLUMNS: [&str; 3] = ["b_external", "probe_delay", "kerr_rotation"];

/// One delay scan per field value, stacked into a table keyed by
/// `(run_id, index_2d, index_1d)`.
pub fn generate_table(tvals: &[f64], bvals: &[f64], params: &SimulationParams) -> Result<Table> {
    if params.datasets.len() != bvals.len() || params.noise_layers.len() != bvals.len() {
        return Err(EdaError::ShapeMismatch {
            what: "simulated datasets",
            expected: bvals.len(),
            found: params.datasets.len().min(params.noise_layers.len()),
        });
    }
    let mut table = Table::new(INDEX_LEVELS, COLUMNS);
    for (index_2d, ((&b, p), noise)) in bvals.iter().zip(&params.datasets).zip(&params.noise_layers).enumerate() {
        if noise.len() != tvals.len() {
            return Err(EdaError::ShapeMismatch {
                what: "noise layer length",
                expected: tvals.len(),
                found: noise.len(),
            });
        }
        for (index_1d, (&t, &n)) in tvals.iter().zip(noise).enumerate() {
            table.push_row(
                vec![Value::Integer(0), Value::from(index_2d), Value::from(index_1d)],
                vec![
                    Value::Float(b),
                    Value::Float(t),
                    Value::Float(trkr_decaying_cosine(t, b, p) + n),
                ],
            )?;
        }
    }
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quiet() -> SimulationConfig {
        SimulationConfig {
            noise_scale: 0.0,
            ..SimulationConfig::default()
        }
    }

    #[test]
    fn pulse_sum_without_memory_is_a_single_pulse() {
        // lifetime much shorter than the pulse period: no accumulation
        let (amp, phase) = pulse_sum_vector(1.0, 0.44, 100.0, 0.3);
        assert!((amp - 1.0).abs() < 1e-12);
        assert!((phase - 0.3).abs() < 1e-12);
    }

    #[test]
    fn zero_field_accumulates_geometrically() {
        let (amp, _) = pulse_sum_vector(LASER_REPRATE, 0.44, 0.0, 0.0);
        assert!((amp - 1.0 / (1.0 - (-1.0f64).exp())).abs() < 1e-12);
    }

    #[test]
    fn same_seed_same_draws() {
        let a = generate_params(5, 3, &SimulationConfig::default(), 7).unwrap();
        let b = generate_params(5, 3, &SimulationConfig::default(), 7).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.noise_layers[2].len(), 5);
    }

    #[test]
    fn table_has_three_levels_and_noise_free_model_values() {
        let tvals = [0.0, 100.0, 200.0];
        let bvals = [0.0, 200.0];
        let params = generate_params(tvals.len(), bvals.len(), &quiet(), 1).unwrap();
        let table = generate_table(&tvals, &bvals, &params).unwrap();
        assert_eq!(table.index_names(), INDEX_LEVELS);
        assert_eq!(table.len(), 6);
        let row = &table.rows()[4];
        assert_eq!(row.key, vec![Value::Integer(0), Value::Integer(1), Value::Integer(1)]);
        let expected = trkr_decaying_cosine(100.0, 200.0, &params.datasets[1]);
        assert_eq!(row.values[2], Value::Float(expected));
    }

    #[test]
    fn model_round_trips_through_parameters() {
        let p = generate_params(1, 1, &quiet(), 3).unwrap().datasets[0];
        let direct = trkr_decaying_cosine(50.0, 10.0, &p);
        let via = trkr_model(&[50.0, 10.0], &p.to_parameters()).unwrap();
        assert_eq!(direct, via);
        assert!(trkr_model(&[50.0], &p.to_parameters()).is_err());
    }
}

//! Least-squares minimization over [`Parameters`].
//!
//! The residual function is opaque: it maps a parameter set to a residual
//! vector. [`levenberg_marquardt`] drives the search; the Jacobian is
//! estimated here by forward differences, and bounds are enforced by
//! clamping whenever the solver sets new values.

use std::cell::{Cell, RefCell};

use levenberg_marquardt::{LeastSquaresProblem, LevenbergMarquardt};
use log::{debug, trace};
use nalgebra::storage::Owned;
use nalgebra::{DMatrix, DVector, Dyn};

use super::params::Parameters;
use crate::error::{EdaError, Result};

/// Stopping and damping controls.
#[derive(Debug, Clone)]
pub struct MinimizerOptions {
    /// Evaluation budget, in multiples of (varying parameters + 1).
    pub patience: usize,
    /// Relative reduction of the sum of squares below which we stop.
    pub ftol: f64,
    /// Relative step size below which we stop.
    pub xtol: f64,
    /// Cosine between residuals and Jacobian columns below which we stop.
    pub gtol: f64,
    /// Initial step bound, relative to the scaled parameter norm.
    pub stepbound: f64,
    /// Relative step for finite-difference derivatives.
    pub diff_step: f64,
}

impl Default for MinimizerOptions {
    fn default() -> Self {
        Self {
            patience: 500,
            ftol: 1e-10,
            xtol: 1e-10,
            gtol: f64::EPSILON,
            stepbound: 100.0,
            diff_step: 1.5e-8,
        }
    }
}

/// Outcome of a fit.
#[derive(Debug, Clone)]
pub struct MinimizerResult {
    /// Best-fit parameters, with standard errors when they could be estimated.
    pub params: Parameters,
    pub residual: Vec<f64>,
    /// Covariance of the varying parameters, in parameter order.
    pub covariance: Option<DMatrix<f64>>,
    pub chi_square: f64,
    pub reduced_chi_square: f64,
    pub n_data: usize,
    pub n_varys: usize,
    pub n_function_evals: usize,
    pub converged: bool,
}

/// Residual function bound to a parameter template.
///
/// The solver only sees the varying values. Residuals at the current point
/// are cached by `set_params`; the first evaluation error is kept and the
/// solver is stopped by returning `None`.
struct Problem<'a, F> {
    residuals: &'a F,
    params: Parameters,
    bounds: Vec<(f64, f64)>,
    diff_step: f64,
    current: Option<DVector<f64>>,
    evals: Cell<usize>,
    error: RefCell<Option<EdaError>>,
}

impl<'a, F> Problem<'a, F>
where
    F: Fn(&Parameters) -> Result<Vec<f64>>,
{
    fn new(residuals: &'a F, params: &Parameters, diff_step: f64) -> Self {
        let mut problem = Self {
            residuals,
            params: params.clone(),
            bounds: params.varying_bounds(),
            diff_step,
            current: None,
            evals: Cell::new(0),
            error: RefCell::new(None),
        };
        let start = DVector::from_vec(params.varying_values());
        problem.set_params(&start);
        problem
    }

    fn eval(&self, params: &Parameters) -> Option<DVector<f64>> {
        self.evals.set(self.evals.get() + 1);
        match (self.residuals)(params) {
            Ok(r) => Some(DVector::from_vec(r)),
            Err(e) => {
                self.error.borrow_mut().get_or_insert(e);
                None
            }
        }
    }

    fn take_error(&self) -> Option<EdaError> {
        self.error.borrow_mut().take()
    }
}

impl<F> LeastSquaresProblem<f64, Dyn, Dyn> for Problem<'_, F>
where
    F: Fn(&Parameters) -> Result<Vec<f64>>,
{
    type ResidualStorage = Owned<f64, Dyn>;
    type JacobianStorage = Owned<f64, Dyn, Dyn>;
    type ParameterStorage = Owned<f64, Dyn>;

    fn set_params(&mut self, x: &DVector<f64>) {
        self.params.set_varying_values(x.as_slice());
        self.current = self.eval(&self.params);
    }

    fn params(&self) -> DVector<f64> {
        DVector::from_vec(self.params.varying_values())
    }

    fn residuals(&self) -> Option<DVector<f64>> {
        self.current.clone()
    }

    fn jacobian(&self) -> Option<DMatrix<f64>> {
        let r0 = self.current.as_ref()?;
        let p = self.params.varying_values();
        let mut jac = DMatrix::zeros(r0.len(), p.len());
        for j in 0..p.len() {
            let scale = if p[j] == 0.0 { 1.0 } else { p[j].abs() };
            let mut h = self.diff_step * scale;
            if p[j] + h > self.bounds[j].1 {
                h = -h;
            }
            let mut shifted = p.clone();
            shifted[j] += h;
            let mut params = self.params.clone();
            params.set_varying_values(&shifted);
            let r = self.eval(&params)?;
            if r.len() != r0.len() {
                self.error
                    .borrow_mut()
                    .get_or_insert(EdaError::FitFailed("residual length changed between evaluations".into()));
                return None;
            }
            jac.set_column(j, &((r - r0) / h));
        }
        Some(jac)
    }
}

/// Minimize the sum of squared residuals over the varying parameters.
pub fn minimize<F>(residuals: F, params: &Parameters, options: &MinimizerOptions) -> Result<MinimizerResult>
where
    F: Fn(&Parameters) -> Result<Vec<f64>>,
{
    let problem = Problem::new(&residuals, params, options.diff_step);
    if let Some(e) = problem.take_error() {
        return Err(e);
    }
    let m = problem.bounds.len();
    let r0 = problem
        .residuals()
        .ok_or_else(|| EdaError::FitFailed("no residuals at the initial parameters".into()))?;
    let n = r0.len();
    if r0.iter().any(|v| !v.is_finite()) {
        return Err(EdaError::FitFailed("non-finite residuals at initial parameters".into()));
    }
    if n < m {
        return Err(EdaError::FitFailed(format!("{n} data points for {m} varying parameters")));
    }

    let (problem, converged) = if m == 0 {
        (problem, true)
    } else {
        let (problem, report) = LevenbergMarquardt::new()
            .with_ftol(options.ftol)
            .with_xtol(options.xtol)
            .with_gtol(options.gtol)
            .with_stepbound(options.stepbound)
            .with_patience(options.patience)
            .minimize(problem);
        if let Some(e) = problem.take_error() {
            return Err(e);
        }
        trace!("minimize: {:?} after {} solver evaluations", report.termination, report.number_of_evaluations);
        (problem, report.termination.was_successful())
    };

    let r = problem
        .residuals()
        .ok_or_else(|| EdaError::FitFailed("no residuals at the final parameters".into()))?;
    let cost = r.norm_squared();
    if !cost.is_finite() {
        return Err(EdaError::FitFailed("non-finite residuals at the final parameters".into()));
    }
    let dof = n.saturating_sub(m);
    let reduced_chi_square = if dof > 0 { cost / dof as f64 } else { f64::NAN };
    // covariance = (JᵀJ)⁻¹ · χ²ᵣ at the solution
    let covariance = if m > 0 && dof > 0 {
        problem
            .jacobian()
            .and_then(|jac| (jac.transpose() * &jac).try_inverse())
            .map(|inv| inv * reduced_chi_square)
    } else {
        None
    };
    let stderr: Option<Vec<f64>> = covariance
        .as_ref()
        .map(|c| (0..m).map(|k| c[(k, k)].max(0.0).sqrt()).collect());
    let mut best = problem.params.clone();
    best.set_varying_stderr(stderr.as_deref());

    let evals = problem.evals.get();
    debug!("minimize: {evals} evals, chi2 {cost:.6e}, converged {converged}");
    Ok(MinimizerResult {
        params: best,
        residual: r.iter().copied().collect(),
        covariance,
        chi_square: cost,
        reduced_chi_square,
        n_data: n,
        n_varys: m,
        n_function_evals: evals,
        converged,
    })
}

use super::params::Parameters;
use crate::error::{EdaError, Result};

/// Turns a pointwise model into a residual function.
///
/// The model receives the independent variables of one data point (in the
/// order given by `independent_vars`) and the current parameters.
pub struct ModelResiduals<M> {
    model: M,
    independent_vars: Vec<String>,
}

impl<M> ModelResiduals<M>
where
    M: Fn(&[f64], &Parameters) -> Result<f64>,
{
    pub fn new(model: M, independent_vars: &[&str]) -> Self {
        Self {
            model,
            independent_vars: independent_vars.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn independent_vars(&self) -> &[String] {
        &self.independent_vars
    }

    /// Model values at every point, or `measured - model` when measured data
    /// is supplied.
    pub fn evaluate(&self, params: &Parameters, xs: &[&[f64]], measured: Option<&[f64]>) -> Result<Vec<f64>> {
        if xs.len() != self.independent_vars.len() {
            return Err(EdaError::ShapeMismatch {
                what: "independent variables",
                expected: self.independent_vars.len(),
                found: xs.len(),
            });
        }
        let n = match (xs.first(), measured) {
            (Some(x), _) => x.len(),
            (None, Some(y)) => y.len(),
            (None, None) => 0,
        };
        for x in xs {
            if x.len() != n {
                return Err(EdaError::ShapeMismatch {
                    what: "independent variable length",
                    expected: n,
                    found: x.len(),
                });
            }
        }
        if let Some(y) = measured {
            if y.len() != n {
                return Err(EdaError::ShapeMismatch {
                    what: "measured data length",
                    expected: n,
                    found: y.len(),
                });
            }
        }

        let mut point = vec![0.0; xs.len()];
        let mut out = Vec::with_capacity(n);
        for i in 0..n {
            for (slot, x) in point.iter_mut().zip(xs) {
                *slot = x[i];
            }
            let model = (self.model)(&point, params)?;
            out.push(match measured {
                Some(y) => y[i] - model,
                None => model,
            });
        }
        Ok(out)
    }
}

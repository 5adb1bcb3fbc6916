use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{EdaError, Result};

/// One named fit parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    pub value: f64,
    /// Whether the minimizer may change the value.
    pub vary: bool,
    pub min: f64,
    pub max: f64,
    /// Standard error, filled in after a successful fit.
    pub stderr: Option<f64>,
}

impl Parameter {
    pub fn new(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            value,
            vary: true,
            min: f64::NEG_INFINITY,
            max: f64::INFINITY,
            stderr: None,
        }
    }

    fn clamp(&self, v: f64) -> f64 {
        v.max(self.min).min(self.max)
    }
}

/// An ordered set of parameters, addressed by name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Parameters {
    params: Vec<Parameter>,
}

impl Parameters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace) a free parameter.
    pub fn add(mut self, name: &str, value: f64) -> Self {
        self.insert(Parameter::new(name, value));
        self
    }

    /// Add (or replace) a parameter held at `value`.
    pub fn add_fixed(mut self, name: &str, value: f64) -> Self {
        self.insert(Parameter {
            vary: false,
            ..Parameter::new(name, value)
        });
        self
    }

    /// Add (or replace) a free parameter restricted to `[min, max]`.
    pub fn add_bounded(mut self, name: &str, value: f64, min: f64, max: f64) -> Self {
        self.insert(Parameter {
            min,
            max,
            ..Parameter::new(name, value)
        });
        self
    }

    pub fn insert(&mut self, param: Parameter) {
        match self.params.iter_mut().find(|p| p.name == param.name) {
            Some(existing) => *existing = param,
            None => self.params.push(param),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Parameter> {
        self.params.iter().find(|p| p.name == name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Parameter> {
        self.params.iter_mut().find(|p| p.name == name)
    }

    pub fn value(&self, name: &str) -> Option<f64> {
        self.get(name).map(|p| p.value)
    }

    /// Value of a parameter a model cannot do without.
    pub fn require(&self, name: &str) -> Result<f64> {
        self.value(name)
            .ok_or_else(|| EdaError::FitFailed(format!("missing parameter '{name}'")))
    }

    pub fn values_dict(&self) -> BTreeMap<String, f64> {
        self.params.iter().map(|p| (p.name.clone(), p.value)).collect()
    }

    pub fn names(&self) -> Vec<String> {
        self.params.iter().map(|p| p.name.clone()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Parameter> {
        self.params.iter()
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub(crate) fn varying_values(&self) -> Vec<f64> {
        self.params.iter().filter(|p| p.vary).map(|p| p.value).collect()
    }

    /// Write `values` into the varying parameters (in order), clamped to
    /// their bounds.
    pub(crate) fn set_varying_values(&mut self, values: &[f64]) {
        for (p, &v) in self.params.iter_mut().filter(|p| p.vary).zip(values) {
            p.value = p.clamp(v);
        }
    }

    pub(crate) fn varying_bounds(&self) -> Vec<(f64, f64)> {
        self.params.iter().filter(|p| p.vary).map(|p| (p.min, p.max)).collect()
    }

    pub(crate) fn set_varying_stderr(&mut self, stderr: Option<&[f64]>) {
        let mut k = 0;
        for p in self.params.iter_mut() {
            if p.vary {
                p.stderr = stderr.map(|s| s[k]);
                k += 1;
            } else {
                p.stderr = None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_replaces_existing_name() {
        let p = Parameters::new().add("a", 1.0).add("b", 2.0).add("a", 3.0);
        assert_eq!(p.names(), vec!["a", "b"]);
        assert_eq!(p.value("a"), Some(3.0));
    }

    #[test]
    fn varying_values_skip_fixed_and_clamp() {
        let mut p = Parameters::new()
            .add_bounded("a", 0.5, 0.0, 1.0)
            .add_fixed("b", 7.0)
            .add("c", 1.0);
        assert_eq!(p.varying_values(), vec![0.5, 1.0]);
        p.set_varying_values(&[2.0, -4.0]);
        assert_eq!(p.value("a"), Some(1.0));
        assert_eq!(p.value("b"), Some(7.0));
        assert_eq!(p.value("c"), Some(-4.0));
    }
}

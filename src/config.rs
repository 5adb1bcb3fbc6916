//! Serde-backed settings for directory import and data simulation.
//!
//! Both configs load from JSON; every field has a default so a config file
//! only needs to name what it changes.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::data::model::Value;

// ---------------------------------------------------------------------------
// Import
// ---------------------------------------------------------------------------

/// How files are assigned a `Run ID`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RunCriteria {
    /// Every file belongs to run 0.
    Same,
    /// A new run starts whenever the parent directory changes.
    #[default]
    Directory,
}

/// `"..._warmup_..."` with `{key: "warmup", tag: "Warmup?", value: "Yes"}`
/// stores `Warmup? = Yes`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThisElementRule {
    pub key: String,
    pub tag: String,
    pub value: Value,
}

/// `"..._Ind_3_..."` with `{key: "Ind", tags: ["FastScanIndex"]}` stores
/// `FastScanIndex = 3`. Several tags consume several following tokens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NextElementRule {
    pub key: String,
    pub tags: Vec<String>,
}

/// `"..._30K_..."` with `{key: "K", tag: "SetTemperature"}` stores
/// `SetTemperature = 30`. Only numeric remainders are kept.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsideElementRule {
    pub key: String,
    pub tag: String,
}

/// Keyword rules applied to the tokens of a file path.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilepathKeywords {
    pub this_element: Vec<ThisElementRule>,
    pub next_element: Vec<NextElementRule>,
    pub inside_element: Vec<InsideElementRule>,
}

/// Copies a metadata tag into a constant column of the file's table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagColumn {
    pub tag: String,
    pub column: String,
}

/// Keeps a file only if its metadata tag passes every given test.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetadataFilter {
    pub tag: String,
    pub equals: Option<Value>,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl MetadataFilter {
    /// A file lacking the tag is rejected.
    pub fn accepts(&self, metadata: &BTreeMap<String, Value>) -> bool {
        let Some(value) = metadata.get(&self.tag) else {
            return false;
        };
        if let Some(expected) = &self.equals {
            if value != expected {
                return false;
            }
        }
        if self.min.is_none() && self.max.is_none() {
            return true;
        }
        match value.as_f64() {
            Some(v) => self.min.map_or(true, |m| v >= m) && self.max.map_or(true, |m| v <= m),
            None => false,
        }
    }
}

/// Settings for [`crate::data::directory::import_directory`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportConfig {
    /// Substring a file name must contain to be imported.
    pub filename_key: String,
    /// Lines before the CSV body, parsed as `key: value` metadata.
    pub header_lines: usize,
    pub delimiter: char,
    pub run_criteria: RunCriteria,
    pub keywords: FilepathKeywords,
    pub tag_to_column: Vec<TagColumn>,
    pub filters: Vec<MetadataFilter>,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            filename_key: ".dat".to_string(),
            header_lines: 0,
            delimiter: ',',
            run_criteria: RunCriteria::Directory,
            keywords: FilepathKeywords::default(),
            tag_to_column: Vec::new(),
            filters: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Simulation
// ---------------------------------------------------------------------------

/// Distribution of the per-dataset TRKR model parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub pulse_amplitude_mean: f64,
    pub pulse_amplitude_std_err: f64,
    pub gfactor: f64,
    /// Spin lifetime in ps.
    pub spin_lifetime_mean: f64,
    pub spin_lifetime_std_err: f64,
    pub initial_phase: f64,
    pub extra_phase_offset_baseline: f64,
    pub extra_phase_offset_cos_amp: f64,
    pub extra_phase_offset_cos_nperiods: f64,
    pub slopes_scale: f64,
    pub offsets_scale: f64,
    pub noise_scale: f64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            pulse_amplitude_mean: 0.02,
            pulse_amplitude_std_err: 0.002,
            gfactor: 0.44,
            spin_lifetime_mean: 20000.0,
            spin_lifetime_std_err: 1000.0,
            initial_phase: 0.0,
            extra_phase_offset_baseline: 0.0,
            extra_phase_offset_cos_amp: 0.0,
            extra_phase_offset_cos_nperiods: 1.0,
            slopes_scale: 1e-7,
            offsets_scale: 1e-4,
            noise_scale: 1e-3,
        }
    }
}

/// Read a JSON config file; missing fields take their defaults.
pub fn load_json<T>(path: &Path) -> Result<T>
where
    T: for<'de> Deserialize<'de>,
{
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing config {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_import_config_keeps_defaults() {
        let cfg: ImportConfig = serde_json::from_str(
            r#"{
                "header_lines": 2,
                "run_criteria": "same",
                "keywords": {"inside_element": [{"key": "K", "tag": "SetTemperature"}]}
            }"#,
        )
        .unwrap();
        assert_eq!(cfg.header_lines, 2);
        assert_eq!(cfg.run_criteria, RunCriteria::Same);
        assert_eq!(cfg.filename_key, ".dat");
        assert_eq!(cfg.keywords.inside_element[0].tag, "SetTemperature");
        assert!(cfg.keywords.next_element.is_empty());
    }

    #[test]
    fn filter_checks_range_and_equality() {
        let mut meta = BTreeMap::new();
        meta.insert("SetTemperature".to_string(), Value::Float(30.0));
        let filter = MetadataFilter {
            tag: "SetTemperature".into(),
            min: Some(10.0),
            max: Some(40.0),
            ..MetadataFilter::default()
        };
        assert!(filter.accepts(&meta));
        let filter = MetadataFilter {
            tag: "SetTemperature".into(),
            equals: Some(Value::Float(5.0)),
            ..MetadataFilter::default()
        };
        assert!(!filter.accepts(&meta));
        let filter = MetadataFilter {
            tag: "Missing".into(),
            ..MetadataFilter::default()
        };
        assert!(!filter.accepts(&meta));
    }
}
